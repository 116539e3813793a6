//! `localmind memory` — Knowledge store commands.

use super::{kb, open_store_only};
use localmind_core::CompressionStats;

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let mind = open_store_only().await?;
    let records = mind.list_records().await?;

    println!("📚 Learned Documents");
    println!("====================");
    if records.is_empty() {
        println!("   Nothing learned yet. Run `localmind learn <FILE>`.");
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        println!(
            "  {:>2}. {}  {}  ({:.1} KB)",
            i + 1,
            record.id,
            record.name,
            kb(record.size_bytes)
        );
    }
    println!("\n  Oldest first; the oldest document is evicted when memory fills up.");
    Ok(())
}

pub async fn stats() -> Result<(), Box<dyn std::error::Error>> {
    let mind = open_store_only().await?;
    let snapshot = mind.store().snapshot().await?;
    let settings = mind.store().settings();

    let (original, compressed) = snapshot
        .records()
        .iter()
        .map(CompressionStats::of)
        .fold((0.0, 0.0), |(o, c), s| (o + s.original_kb, c + s.compressed_kb));
    let used = if snapshot.capacity_bytes() > 0 {
        snapshot.total_bytes() as f64 / snapshot.capacity_bytes() as f64 * 100.0
    } else {
        0.0
    };

    println!("🧠 Memory Statistics");
    println!("====================");
    println!("  File:       {}", mind.store().path().display());
    println!("  Documents:  {}", snapshot.len());
    println!(
        "  Used:       {:.1} / {:.1} KB ({used:.1}%)",
        kb(snapshot.total_bytes()),
        kb(snapshot.capacity_bytes())
    );
    println!("  Evicts at:  {:.0}% of capacity", settings.eviction_trigger * 100.0);
    if compressed > 0.0 {
        println!(
            "  Compressed: {original:.1} KB of documents → {compressed:.1} KB ({:.1}x)",
            original / compressed
        );
    }

    let context = mind.memory_context().await?;
    println!(
        "  Context:    ~{} / {} tokens per chat turn ({} trimmed)",
        context.report.tokens, context.report.budget, context.report.records_trimmed
    );

    Ok(())
}

pub async fn forget(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mind = open_store_only().await?;
    let outcome = mind.forget(id).await;
    match outcome.removed {
        Some(record) => println!("🗑️  Forgot {} ({})", record.name, record.id),
        None => println!("   No document with id {id}. See `localmind memory list`."),
    }
    if let Some(warning) = outcome.persistence {
        eprintln!("⚠️  Change not saved to disk: {warning}");
    }
    Ok(())
}

pub async fn cite(id: &str, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mind = open_store_only().await?;
    let Some(record) = mind.store().get(id).await? else {
        println!("   No document with id {id}. See `localmind memory list`.");
        return Ok(());
    };
    match mind.store().cite(id, query).await? {
        Some(quote) => {
            println!("📌 {}:", record.name());
            println!("   \"{quote}\"");
        }
        None => println!("   \"{query}\" does not occur in the stored text of {}.", record.name()),
    }
    Ok(())
}

pub async fn clear(confirm: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirm {
        println!("⚠️  This will delete ALL learned documents permanently.");
        println!("   Run with --confirm to proceed:");
        println!("   localmind memory clear --confirm");
        return Ok(());
    }

    let mind = open_store_only().await?;
    let outcome = mind.forget_all().await;
    if let Some(warning) = outcome.persistence {
        eprintln!("⚠️  Memory cleared but not saved to disk: {warning}");
    }
    println!("✅ Cleared {} document(s).", outcome.removed);

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mind = open_store_only().await?;
    let context = mind.memory_context().await?;

    if context.fragment.is_empty() {
        println!("   Nothing learned yet; chat turns carry no document knowledge.");
        return Ok(());
    }
    println!("{}", context.fragment);
    println!();
    println!("{}", serde_json::to_string_pretty(&context.report)?);
    Ok(())
}
