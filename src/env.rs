use std::path::Path;

use tracing::{info, warn};

const PRODUCTION_PROFILES: [&str; 2] = ["release", "production"];

/// Env files for the active Rocket profile, later files overriding earlier
/// ones.
pub fn env_files_for_profile(profile: &str) -> [&'static str; 3] {
    if PRODUCTION_PROFILES.contains(&profile) {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    }
}

pub fn load_environment() -> anyhow::Result<()> {
    let profile = dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "debug".to_string());

    for env_file in env_files_for_profile(&profile) {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> anyhow::Result<()> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}
