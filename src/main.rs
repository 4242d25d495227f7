//! DishaNav daemon entry point

use disha_nav::{RoverApp, RoverConfig};
use std::path::Path;

fn main() -> disha_nav::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("DishaNav v{}", env!("CARGO_PKG_VERSION"));

    // Config path from argv, else disha.toml, else built-in defaults
    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading configuration from {}", path);
            RoverConfig::load(Path::new(&path))?
        }
        None if Path::new("disha.toml").exists() => {
            log::info!("Loading configuration from disha.toml");
            RoverConfig::load(Path::new("disha.toml"))?
        }
        None => {
            log::info!("Using default configuration");
            let mut config = RoverConfig::default();
            config.validate()?;
            config
        }
    };

    log::info!(
        "Receiver: {} @ {} baud; caster: {}",
        config.receiver.port,
        config.receiver.baud,
        config
            .caster_address()
            .unwrap_or_else(|| "none (GPS-only)".to_string())
    );

    let mut app = RoverApp::new(config)?;
    app.run()
}
