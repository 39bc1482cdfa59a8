// Keyboard teleop: WASD translate, Z/X rotate, arrows nudge, 1-4 heading lock,
// C cancel lock, G zero heading, E toggle enable, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::{TOPIC_CMD_DRIVE, TOPIC_CMD_JOYSTICK, TOPIC_CMD_MODE};
use swerve_zenoh_runtime::messages::{DriveRequest, JoystickInput, ModeCommand, NudgeDirection};

const STICK: f64 = 0.8; // stick deflection while a key is held
const INPUT_TIMEOUT_MS: u64 = 100; // Release the sticks after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_joystick = session.declare_publisher(TOPIC_CMD_JOYSTICK).await?;
    let pub_drive = session.declare_publisher(TOPIC_CMD_DRIVE).await?;
    let pub_mode = session.declare_publisher(TOPIC_CMD_MODE).await?;

    info!("Controls: WASD=move, Z/X=rotate, arrows=nudge, 1-4=lock 0/90/180/270, C=cancel lock");
    info!("          G=zero heading, E=enable/disable, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&pub_joystick, &pub_drive, &pub_mode).await;
    disable_raw_mode()?;

    result
}

async fn send_request(
    publisher: &zenoh::pubsub::Publisher<'_>,
    request: DriveRequest,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Request: {:?}", request);
    publisher.put(serde_json::to_string(&request)?).await?;
    Ok(())
}

async fn run_teleop(
    pub_joystick: &zenoh::pubsub::Publisher<'_>,
    pub_drive: &zenoh::pubsub::Publisher<'_>,
    pub_mode: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Persistent stick state
    let mut joystick = JoystickInput::default();
    let mut enabled = false;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Translation stick: forward reads negative Y, left reads negative X
                    KeyCode::Char('w') if pressed => {
                        joystick.left_y = -STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        joystick.left_y = STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        joystick.left_x = -STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        joystick.left_x = STICK;
                        last_movement_input = Instant::now();
                    }

                    // Rotation stick
                    KeyCode::Char('z') if pressed => {
                        joystick.right_x = -STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        joystick.right_x = STICK;
                        last_movement_input = Instant::now();
                    }

                    // D-pad
                    KeyCode::Up if pressed => {
                        joystick.pov = Some(NudgeDirection::Forward);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Down if pressed => {
                        joystick.pov = Some(NudgeDirection::Backward);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Left if pressed => {
                        joystick.pov = Some(NudgeDirection::Left);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Right if pressed => {
                        joystick.pov = Some(NudgeDirection::Right);
                        last_movement_input = Instant::now();
                    }

                    // Heading lock
                    KeyCode::Char(c @ '1'..='4') if kind == KeyEventKind::Press => {
                        let target_deg = match c {
                            '1' => 0.0,
                            '2' => 90.0,
                            '3' => 180.0,
                            _ => 270.0,
                        };
                        send_request(pub_drive, DriveRequest::LockHeading { target_deg }).await?;
                    }
                    KeyCode::Char('c') if kind == KeyEventKind::Press => {
                        send_request(pub_drive, DriveRequest::CancelHeadingLock).await?;
                    }
                    KeyCode::Char('g') if kind == KeyEventKind::Press => {
                        send_request(pub_drive, DriveRequest::ZeroHeading).await?;
                    }

                    KeyCode::Char('e') if kind == KeyEventKind::Press => {
                        enabled = !enabled;
                        info!("Mode: {}", if enabled { "ENABLED" } else { "DISABLED" });
                        pub_mode
                            .put(serde_json::to_string(&ModeCommand { enabled })?)
                            .await?;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Release the sticks if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            joystick = JoystickInput::default();
        }

        // Always publish at ~50Hz
        pub_joystick.put(serde_json::to_string(&joystick)?).await?;
    }

    // Leave the robot disabled on exit
    pub_mode
        .put(serde_json::to_string(&ModeCommand { enabled: false })?)
        .await?;
    Ok(())
}
