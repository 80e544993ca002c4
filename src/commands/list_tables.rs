//! List configured searchable tables

use anyhow::Result;
use colored::Colorize;

use super::Context;
use tablesearch::TableConfig;

fn table_json(t: &TableConfig) -> serde_json::Value {
    serde_json::json!({
        "name": t.name,
        "command": format!("find-{}", t.name),
        "table": t.table.as_str(),
        "description": t.description,
        "columns": t.output_names(),
        "time_filter": t.time_filter.as_ref().map(|f| serde_json::json!({
            "column": f.column.as_str(),
            "default_hours": f.default_hours,
        })),
        "confidence_filter": t.confidence_filter.as_ref().map(|f| serde_json::json!({
            "column": f.column.as_str(),
            "default_min_confidence": f.default_min_confidence,
        })),
    })
}

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let (settings, registry) = ctx.load()?;

    if json {
        let tables: Vec<_> = registry.iter().map(table_json).collect();
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!(
            "{} No tables configured. Create a {} file.",
            "!".yellow().bold(),
            "tables.yaml".cyan()
        );
        return Ok(());
    }

    println!("{}", "Configured searchable tables".bold());
    if let Some(source) = &settings.source {
        println!("{}", format!("from {}", source.display()).dimmed());
    }
    println!("{}", "-".repeat(60));

    for t in registry.iter() {
        println!();
        println!("  {}", format!("find-{}", t.name).green());
        println!("    Table: {}", t.table);
        println!(
            "    Description: {}",
            t.description.as_deref().unwrap_or("No description")
        );
        if let Some(f) = &t.time_filter {
            println!("    Time filter: --hours (default: {})", f.default_hours);
        }
        if let Some(f) = &t.confidence_filter {
            println!(
                "    Confidence filter: --confidence (default: {})",
                f.default_min_confidence
            );
        }
    }
    println!();

    Ok(())
}
