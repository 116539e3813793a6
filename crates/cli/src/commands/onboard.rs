//! `localmind onboard` — First-time setup.

use localmind_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🧠 LocalMind — First-Time Setup");
    println!("===============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    let defaults = AppConfig::default();
    if let Some(memory_dir) = defaults.memory.path.parent() {
        if !memory_dir.exists() {
            std::fs::create_dir_all(memory_dir)?;
            println!("✅ Created memory directory: {}", memory_dir.display());
        }
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Set [model] path to a .gguf file, or backend = \"server\" with a base_url");
        println!("   2. Run: localmind learn notes.md");
        println!("   3. Run: localmind chat\n");
    }

    println!("🎉 Setup complete! Run `localmind doctor` to check everything.\n");

    Ok(())
}
