//! `localmind doctor` — Diagnose system health.

use super::kb;
use localmind_config::{AppConfig, ModelBackend};
use localmind_core::Provider;
use localmind_providers::{DEFAULT_SERVER_URL, OpenAiCompatProvider};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 LocalMind Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    println!("  ✅ Rust binary running");

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file — using defaults; run `localmind onboard`");
        issues += 1;
    }
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before the remaining checks can run.");
            return Ok(());
        }
    };

    issues += check_model(&config).await;

    let memory_path = &config.memory.path;
    if memory_path.exists() {
        let mind = localmind_agent::LocalMind::open(config.clone()).await;
        let records = mind.list_records().await?;
        println!(
            "  ✅ Memory file: {} ({} document(s), {:.1} / {:.1} KB)",
            memory_path.display(),
            records.len(),
            kb(mind.store().total_bytes()),
            kb(mind.store().capacity_bytes())
        );
    } else {
        println!(
            "  ✅ No memory file yet; it will be created at {}",
            memory_path.display()
        );
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

async fn check_model(config: &AppConfig) -> usize {
    match config.model.backend {
        ModelBackend::Local => {
            if !cfg!(feature = "local") {
                println!("  ❌ Local backend selected but this build lacks the `local` feature");
                return 1;
            }
            let Some(path) = &config.model.path else {
                println!("  ❌ model.path not set — point it at a .gguf file");
                return 1;
            };
            if !path.exists() {
                println!("  ❌ Model file not found: {}", path.display());
                return 1;
            }
            println!("  ✅ Model file: {}", path.display());
            let tokenizer = path.with_file_name("tokenizer.json");
            if tokenizer.exists() {
                println!("  ✅ Tokenizer: {}", tokenizer.display());
                0
            } else {
                println!("  ❌ Missing tokenizer.json next to the model file");
                1
            }
        }
        ModelBackend::Server => {
            let url = config.model.base_url.as_deref().unwrap_or(DEFAULT_SERVER_URL);
            let api_key = config.model.api_key.clone().unwrap_or_default();
            let reachable = match OpenAiCompatProvider::new("server", url, api_key) {
                Ok(provider) => provider.health_check().await,
                Err(e) => Err(e),
            };
            match reachable {
                Ok(true) => {
                    println!("  ✅ Server backend: {url} (model {})", config.model.name);
                    0
                }
                Ok(false) => {
                    println!("  ❌ Server at {url} answered but /models failed");
                    1
                }
                Err(e) => {
                    println!("  ❌ Server backend unreachable at {url}: {e}");
                    1
                }
            }
        }
    }
}
