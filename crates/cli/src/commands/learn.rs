//! `localmind learn` — Compress documents into memory.

use super::kb;
use localmind_agent::{LearnEvent, LearnReport};
use std::path::PathBuf;

pub async fn run(files: Vec<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mind = super::open_with_model().await?;
    let mut failures = 0;

    for path in files {
        println!("\n📄 {}", path.display());
        let mut handle = mind.learn(&path);
        let mut interrupted = false;

        loop {
            let event = tokio::select! {
                event = handle.next() => event,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    handle.cancel();
                    continue;
                }
            };
            let Some(event) = event else { break };
            match event {
                LearnEvent::Progress { stage, percent, .. } => {
                    println!("  [{percent:>3}%] {}", stage.label());
                }
                LearnEvent::Done(report) => print_report(&report),
                LearnEvent::Failed { error, .. } => {
                    failures += 1;
                    eprintln!("  ❌ {error}");
                }
                LearnEvent::Cancelled { .. } => {
                    println!("  ⏹️  Cancelled, nothing was stored.");
                }
            }
        }

        if interrupted {
            break;
        }
    }

    println!(
        "\n🧠 Memory: {} document(s), {:.1} / {:.1} KB",
        mind.list_records().await?.len(),
        kb(mind.store().total_bytes()),
        kb(mind.store().capacity_bytes()),
    );

    if failures > 0 {
        return Err(format!("{failures} document(s) could not be learned").into());
    }
    Ok(())
}

fn print_report(report: &LearnReport) {
    let verb = if report.replaced { "Updated" } else { "Learned" };
    println!("  [100%] ✅ {verb} {} (id {})", report.document, report.record.id);
    println!("{}", stats_line(report));
    for victim in &report.evicted {
        println!(
            "  🗑️  Evicted {} ({:.1} KB) to stay under capacity",
            victim.name,
            kb(victim.size_bytes)
        );
    }
    if let Some(warning) = &report.persistence_warning {
        eprintln!("  ⚠️  Stored in memory but not saved to disk: {warning}");
    }
}

fn stats_line(report: &LearnReport) -> String {
    let stats = &report.stats;
    format!(
        "         {:.1} KB → {:.1} KB ({:.1}x, {:.0}% smaller)",
        stats.original_kb, stats.compressed_kb, stats.ratio, stats.savings_percent
    )
}
