//! Index command - extract Python definitions and embed them into the code index

use std::path::Path;

use anyhow::{bail, Result};
use colored::Colorize;

use super::Context;
use tablesearch::core::extract::{collect_source_files, extract_file};

pub fn run(ctx: &Context, directory: &Path, clear: bool, json: bool) -> Result<()> {
    if !directory.is_dir() {
        bail!("Not a directory: {}", directory.display());
    }

    let engine = ctx.open_engine(true)?;

    if clear {
        let removed = engine.clear()?;
        if !json {
            println!("{} Cleared {} indexed elements", "→".dimmed(), removed);
        }
    }

    let files = collect_source_files(directory);
    if !json {
        println!(
            "{} Indexing {} Python files in {}...",
            "→".dimmed(),
            files.len().to_string().cyan(),
            directory.display()
        );
    }

    let mut units = Vec::new();
    let mut unreadable = 0;
    for file in &files {
        match extract_file(file) {
            Ok(found) => {
                tracing::debug!(file = %file.display(), elements = found.len(), "extracted");
                units.extend(found);
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), "skipping unreadable file: {:#}", e);
                unreadable += 1;
            }
        }
    }

    let stats = engine.index(units)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "files": files.len(),
                "unreadable_files": unreadable,
                "indexed": stats.indexed,
                "failed": stats.failed,
                "duration_ms": stats.duration_ms,
            })
        );
    } else {
        println!();
        println!(
            "{} Indexed {} elements from {} files in {:.2}s",
            "✓".green().bold(),
            stats.indexed.to_string().cyan(),
            files.len(),
            stats.duration_ms as f64 / 1000.0
        );
        if stats.failed > 0 {
            println!("  {} {} elements failed to embed", "✗".red(), stats.failed);
        }
        if unreadable > 0 {
            println!("  {} {} files could not be read", "✗".red(), unreadable);
        }
    }

    Ok(())
}
