pub mod chat;
pub mod doctor;
pub mod learn;
pub mod memory;
pub mod onboard;
pub mod profiles;

use localmind_agent::LocalMind;
use localmind_config::AppConfig;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the store without touching the model.
pub async fn open_store_only() -> Result<LocalMind, Box<dyn std::error::Error>> {
    Ok(LocalMind::open(load_config()?).await)
}

/// Open the store and load the configured model.
pub async fn open_with_model() -> Result<LocalMind, Box<dyn std::error::Error>> {
    let mind = LocalMind::open(load_config()?).await;

    eprint!("  Loading model...");
    let loaded = match mind.load_model().await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!();
            eprintln!();
            eprintln!("  ERROR: Could not load the model: {e}");
            eprintln!();
            eprintln!("  Check the [model] section of:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!("  or run `localmind doctor`.");
            eprintln!();
            return Err("No model available. See above for setup instructions.".into());
        }
    };
    eprint!("\r                  \r");
    eprintln!(
        "  Model: {} ({} backend, {} token window)",
        loaded.model,
        mind.config().model.backend,
        loaded.context_window
    );
    Ok(mind)
}

pub fn kb(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}
