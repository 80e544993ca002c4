//! Search any configured table

use anyhow::Result;
use colored::Colorize;

use super::find::score_colored;
use super::{truncate, value_text, Context};
use tablesearch::search::vectordb::Record;
use tablesearch::{SearchResult, TableConfig};

/// Columns shown next to the rank when present in a record.
const IDENTITY_COLUMNS: &[&str] = &["sender_name", "person_name", "name", "title"];
const KIND_COLUMNS: &[&str] = &["conversation_type", "fact_type", "kind", "type"];

pub struct SearchArgs<'a> {
    pub table: &'a str,
    pub query: &'a str,
    pub limit: i64,
    pub hours: Option<i64>,
    pub confidence: Option<f64>,
    pub json: bool,
}

pub fn run(ctx: &Context, args: &SearchArgs<'_>) -> Result<()> {
    let engine = ctx.open_engine(true)?;
    let table = engine.tables().resolve(args.table)?;
    let results = engine.search_text(args.table, args.query, args.limit, args.hours, args.confidence)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{} Searching {} for: {}", "→".dimmed(), args.table.cyan(), args.query.cyan());
    if let Some(f) = &table.time_filter {
        println!("   Time window: last {} hours", args.hours.unwrap_or(f.default_hours));
    }
    if let Some(f) = &table.confidence_filter {
        println!(
            "   Min confidence: {}",
            args.confidence.unwrap_or(f.default_min_confidence)
        );
    }
    println!();

    if results.is_empty() {
        println!("{} No results found", "→".dimmed());
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        print_row(i + 1, table, result);
    }

    Ok(())
}

fn print_row(rank: usize, table: &TableConfig, result: &SearchResult) {
    let record = &result.record;
    let mut header = vec![format!("[{}]", score_colored(result.score))];
    if let Some(identity) = first_present(record, IDENTITY_COLUMNS) {
        header.push(identity.cyan().to_string());
    }
    if let Some(kind) = first_present(record, KIND_COLUMNS) {
        header.push(format!("({})", kind));
    }
    println!("{}. {}", rank.to_string().bold(), header.join(" "));

    if let Some(f) = &table.time_filter {
        if let Some(ts) = first_present(record, &[f.column.as_str()]) {
            println!("   Time: {}", ts);
        }
    }
    if let Some(f) = &table.confidence_filter {
        if let Some(conf) = first_present(record, &[f.column.as_str()]) {
            println!("   Confidence: {}", conf);
        }
    }

    let content = table
        .display_columns
        .iter()
        .find(|c| c.column == table.content_column)
        .and_then(|c| record.get(c.output_name()))
        .map(value_text)
        .unwrap_or_default();
    if !content.is_empty() {
        println!("   {}", truncate(&content, 200));
    }
    println!();
}

fn first_present(record: &Record, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| record.get(n))
        .map(value_text)
        .find(|s| !s.is_empty())
}
