use anyhow::Result;
use colored::Colorize;

use super::Context;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let engine = ctx.open_engine(false)?;
    let stats = engine.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Code Index Statistics".bold());
    println!("{}", "-".repeat(30));
    println!("   {:<16} {:>6}", "Total elements", stats.total);
    for (kind, count) in &stats.by_type {
        println!("   {:<16} {:>6}", kind, count);
    }
    println!("   {:<16} {:>6}", "Files indexed", stats.unique_files);
    if let Some(ts) = stats.last_indexed {
        let dt = chrono::DateTime::from_timestamp(ts, 0)
            .map(|d| d.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        println!("   {:<16} {}", "Last indexed", dt);
    }

    Ok(())
}
