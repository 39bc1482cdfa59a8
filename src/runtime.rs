// Fixed-rate loop with joystick watchdog
// Note: the watchdog drops operator input if the driver station stops publishing,
// so a crashed teleop client cannot leave the robot driving on its last command

use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

// local imports
use crate::config::{
    CMD_TIMEOUT, DriveConfig, TOPIC_CMD_DRIVE, TOPIC_CMD_JOYSTICK, TOPIC_CMD_MODE, TOPIC_HEALTH,
    TOPIC_RT_MODULES, TOPIC_SENSOR_MODULES, TOPIC_STATE_POSE, TOPIC_VISION_POSE,
};
use crate::drive_loop::{DriveLoop, TickInput, TickOutput};
use crate::estimator::VisionObservation;
use crate::geometry::Pose;
use crate::messages::{
    DriveRequest, JoystickInput, ModeCommand, PoseReport, RuntimeHealth, SensorMessage, VisionMessage,
};
use crate::tick::Tickable;

/// Collects inputs between ticks and tracks runtime health
pub struct Runtime {
    started: Instant,
    latest_joystick: Option<JoystickInput>,
    joystick_received_at: Instant,
    enabled: bool,
    sensors: SensorMessage,
    pending_vision: Vec<VisionObservation>,
    pending_requests: Vec<DriveRequest>,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            latest_joystick: None,
            joystick_received_at: now,
            enabled: false,
            sensors: SensorMessage::default(),
            pending_vision: Vec::new(),
            pending_requests: Vec::new(),
            health: RuntimeHealth::Disabled, // Start disabled until the driver station enables
        }
    }

    /// Seconds since the runtime started
    pub fn clock(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn on_joystick(&mut self, joystick: JoystickInput) {
        self.latest_joystick = Some(joystick);
        self.joystick_received_at = Instant::now();
    }

    fn on_mode(&mut self, mode: ModeCommand) {
        if mode.enabled != self.enabled {
            info!("Mode command: {}", if mode.enabled { "enable" } else { "disable" });
        }
        self.enabled = mode.enabled;
    }

    fn on_sensors(&mut self, sensors: SensorMessage) {
        self.sensors = sensors;
    }

    fn on_vision(&mut self, msg: &VisionMessage) {
        self.pending_vision.push(VisionObservation::from(msg));
    }

    fn on_request(&mut self, request: DriveRequest) {
        info!("Received request: {:?}", &request);
        self.pending_requests.push(request);
    }

    /// Joystick input passed to the loop, `None` once the watchdog trips
    fn fresh_joystick(&self) -> Option<JoystickInput> {
        let age = self.joystick_received_at.elapsed();
        if age > CMD_TIMEOUT { None } else { self.latest_joystick }
    }

    /// Build this tick's loop input, draining queued vision and requests
    ///
    /// Sensor readings are consumed: a frame that does not arrive before the
    /// next tick reads as missing.
    pub fn take_tick_input(&mut self) -> TickInput {
        TickInput {
            timestamp: self.clock(),
            enabled: self.enabled,
            joystick: self.fresh_joystick(),
            sensors: std::mem::take(&mut self.sensors),
            vision: std::mem::take(&mut self.pending_vision),
            requests: std::mem::take(&mut self.pending_requests),
        }
    }

    /// Update health from the tick just run
    pub fn update_health(&mut self, joystick_fresh: bool, output: &TickOutput) -> RuntimeHealth {
        let health = if !self.enabled {
            RuntimeHealth::Disabled
        } else if output.sensors_stale {
            RuntimeHealth::SensorsStale
        } else if !joystick_fresh {
            RuntimeHealth::JoystickStale
        } else {
            RuntimeHealth::Ok
        };

        if health != self.health {
            match health {
                RuntimeHealth::Ok | RuntimeHealth::Disabled => info!("Health: {:?}", health),
                _ => warn!("Health: {:?}", health),
            }
        }
        self.health = health;
        health
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a JSON payload, logging and skipping anything malformed
fn decode<T: serde::de::DeserializeOwned>(topic: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice::<T>(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse {} message: {}", topic, e);
            None
        }
    }
}

pub async fn run(config: DriveConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut drive = DriveLoop::new(config.clone(), Pose::default())?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_joystick = session.declare_subscriber(TOPIC_CMD_JOYSTICK).await?;
    let sub_drive = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_mode = session.declare_subscriber(TOPIC_CMD_MODE).await?;
    let sub_sensors = session.declare_subscriber(TOPIC_SENSOR_MODULES).await?;
    let sub_vision = session.declare_subscriber(TOPIC_VISION_POSE).await?;
    let pub_modules = session.declare_publisher(TOPIC_RT_MODULES).await?;
    let pub_pose = session.declare_publisher(TOPIC_STATE_POSE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_secs_f64(config.period()));
    // Overruns are the scheduler's problem; never burst to catch up
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: {}Hz loop, {}ms joystick watchdog",
        config.loop_hz,
        CMD_TIMEOUT.as_millis()
    );
    info!(
        "Subscribed to: {}, {}, {}, {}, {}",
        TOPIC_CMD_JOYSTICK, TOPIC_CMD_DRIVE, TOPIC_CMD_MODE, TOPIC_SENSOR_MODULES, TOPIC_VISION_POSE
    );
    info!("Publishing to: {}, {}, {}", TOPIC_RT_MODULES, TOPIC_STATE_POSE, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending inputs (non-blocking), keep latest state samples
        while let Ok(Some(sample)) = sub_joystick.try_recv() {
            if let Some(js) = decode(TOPIC_CMD_JOYSTICK, &sample.payload().to_bytes()) {
                runtime.on_joystick(js);
            }
        }
        while let Ok(Some(sample)) = sub_mode.try_recv() {
            if let Some(mode) = decode(TOPIC_CMD_MODE, &sample.payload().to_bytes()) {
                runtime.on_mode(mode);
            }
        }
        while let Ok(Some(sample)) = sub_sensors.try_recv() {
            if let Some(sensors) = decode(TOPIC_SENSOR_MODULES, &sample.payload().to_bytes()) {
                runtime.on_sensors(sensors);
            }
        }
        while let Ok(Some(sample)) = sub_vision.try_recv() {
            if let Some(msg) = decode::<VisionMessage>(TOPIC_VISION_POSE, &sample.payload().to_bytes()) {
                runtime.on_vision(&msg);
            }
        }
        while let Ok(Some(sample)) = sub_drive.try_recv() {
            if let Some(request) = decode(TOPIC_CMD_DRIVE, &sample.payload().to_bytes()) {
                runtime.on_request(request);
            }
        }

        // 2. Run the drive loop (includes watchdog and sensor fallback)
        let input = runtime.take_tick_input();
        let output = drive.tick(&input);
        let health = runtime.update_health(input.joystick.is_some(), &output);

        // 3. Publish setpoints
        let setpoints_json = serde_json::to_string(&output.setpoints)?;
        pub_modules.put(setpoints_json).await?;

        // 4. Publish pose and health
        let pose_json = serde_json::to_string(&PoseReport::new(output.pose, input.timestamp))?;
        pub_pose.put(pose_json).await?;
        let health_json = serde_json::to_string(&health)?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::WheelPositionSample;

    fn full_sensors() -> SensorMessage {
        SensorMessage {
            wheels: [Some(WheelPositionSample::default()); 4],
            gyro_heading: Some(0.0),
        }
    }

    #[test]
    fn test_tick_input_drains_queues() {
        let mut runtime = Runtime::new();
        runtime.on_request(DriveRequest::ZeroHeading);
        runtime.on_vision(&VisionMessage {
            x: 1.0,
            y: 2.0,
            heading: 0.5,
            timestamp: 0.1,
        });
        runtime.on_sensors(full_sensors());

        let input = runtime.take_tick_input();
        assert_eq!(input.requests, vec![DriveRequest::ZeroHeading]);
        assert_eq!(input.vision.len(), 1);
        assert_eq!(input.vision[0].pose, Pose::new(1.0, 2.0, 0.5));
        assert!(input.sensors.gyro_heading.is_some());

        let next = runtime.take_tick_input();
        assert!(next.requests.is_empty());
        assert!(next.vision.is_empty());
        assert!(next.sensors.gyro_heading.is_none());
    }

    #[test]
    fn test_joystick_watchdog() {
        let mut runtime = Runtime::new();
        assert!(runtime.take_tick_input().joystick.is_none());

        runtime.on_joystick(JoystickInput::default());
        assert!(runtime.take_tick_input().joystick.is_some());

        runtime.joystick_received_at = Instant::now() - CMD_TIMEOUT - Duration::from_millis(10);
        assert!(runtime.take_tick_input().joystick.is_none());
    }

    #[test]
    fn test_health_transitions() {
        let mut runtime = Runtime::new();
        let mut drive = DriveLoop::new(DriveConfig::default(), Pose::default()).unwrap();

        runtime.on_sensors(full_sensors());
        let input = runtime.take_tick_input();
        let out = drive.tick(&input);
        assert_eq!(runtime.update_health(true, &out), RuntimeHealth::Disabled);

        runtime.on_mode(ModeCommand { enabled: true });
        runtime.on_sensors(full_sensors());
        let input = runtime.take_tick_input();
        let out = drive.tick(&input);
        assert_eq!(runtime.update_health(false, &out), RuntimeHealth::JoystickStale);
        assert_eq!(runtime.update_health(true, &out), RuntimeHealth::Ok);

        // No sensor frame this tick
        let input = runtime.take_tick_input();
        let out = drive.tick(&input);
        assert_eq!(runtime.update_health(true, &out), RuntimeHealth::SensorsStale);
    }
}
