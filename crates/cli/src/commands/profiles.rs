//! `localmind profiles` — List generation profiles.

use localmind_agent::Profile;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let default = super::load_config()
        .map(|c| c.generation.default_profile)
        .unwrap_or_else(|_| Profile::default().name().to_string());

    println!("🎛️  Generation Profiles");
    println!("======================\n");

    for profile in Profile::all() {
        let marker = if profile.name() == default { " (default)" } else { "" };
        println!(
            "  {}{marker}  temperature {:.2}",
            profile.name(),
            profile.temperature()
        );
        println!("    {}\n", profile.preamble());
    }

    Ok(())
}
