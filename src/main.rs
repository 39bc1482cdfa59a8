use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::DriveConfig;

/// Swerve drive runtime: joystick + sensors in, wheel setpoints out
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON drive configuration; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override the loop rate in Hz
    #[arg(long)]
    loop_hz: Option<f64>,

    /// Drive relative to the robot instead of the field
    #[arg(long)]
    robot_relative: bool,
}

fn load_config(args: &Args) -> Result<DriveConfig, swerve_zenoh_runtime::config::ConfigError> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            DriveConfig::load(path)?
        }
        None => DriveConfig::default(),
    };
    config.with_overrides(args.loop_hz, args.robot_relative)
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init(); // installs the subscriber globally

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = swerve_zenoh_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
