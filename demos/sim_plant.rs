// Ideal swerve plant: turns wheel setpoints back into sensor frames
//
// Each module steers instantly and drives at its commanded speed; the gyro
// integrates the chassis rotation recovered from the wheels. Run it next to
// the runtime to close the loop without hardware.
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use swerve_zenoh_runtime::config::{DriveConfig, LOOP_HZ, TOPIC_RT_MODULES, TOPIC_SENSOR_MODULES};
use swerve_zenoh_runtime::drive::{NUM_MODULES, SwerveKinematics, WheelPositionSample, WheelState};
use swerve_zenoh_runtime::messages::{SensorMessage, WheelSetpoints};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = DriveConfig::default();
    let kinematics = SwerveKinematics::new(config.geometry())?;
    let dt = 1.0 / LOOP_HZ as f64;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let subscriber = session.declare_subscriber(TOPIC_RT_MODULES).await?;
    let publisher = session.declare_publisher(TOPIC_SENSOR_MODULES).await?;

    let mut wheels = [WheelPositionSample::default(); NUM_MODULES];
    let mut gyro = 0.0f64;
    let mut setpoints = WheelSetpoints::default();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Simulating plant: {} -> {}", TOPIC_RT_MODULES, TOPIC_SENSOR_MODULES);

    loop {
        tick.tick().await;

        // Keep only the newest setpoints
        while let Ok(Some(sample)) = subscriber.try_recv() {
            match serde_json::from_slice::<WheelSetpoints>(&sample.payload().to_bytes()) {
                Ok(sp) => setpoints = sp,
                Err(e) => warn!("Failed to parse setpoints: {}", e),
            }
        }

        let states = setpoints.modules.map(|m| WheelState::new(m.speed, m.angle));
        for (wheel, state) in wheels.iter_mut().zip(&states) {
            wheel.distance += state.speed * dt;
            wheel.angle = state.angle;
        }
        gyro += kinematics.to_chassis_velocity(&states).omega * dt;

        let msg = SensorMessage {
            wheels: wheels.map(Some),
            gyro_heading: Some(gyro),
        };
        publisher.put(serde_json::to_string(&msg)?).await?;
    }
}
