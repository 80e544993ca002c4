//! Find command - semantic search over the code index

use anyhow::Result;
use colored::Colorize;

use super::{truncate, Context};
use tablesearch::SearchResult;

pub fn run(ctx: &Context, query: &str, limit: i64, json: bool) -> Result<()> {
    let engine = ctx.open_engine(true)?;
    let results = engine.find_code_text(query, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!("{} {} results for: {}", "→".dimmed(), results.len(), query.cyan());
    println!();

    for (i, result) in results.iter().enumerate() {
        print_element(i + 1, result);
    }

    Ok(())
}

fn print_element(rank: usize, result: &SearchResult) {
    let field = |name: &str| result.record.get_str(name).unwrap_or("");

    println!(
        "{}. {} (score: {})",
        rank.to_string().bold(),
        field("element_name").cyan(),
        score_colored(result.score)
    );
    println!("   File: {}", field("file_path"));
    println!("   Type: {}", field("element_type"));
    if !field("signature").is_empty() {
        println!("   Signature: {}", field("signature"));
    }
    if !field("docstring").is_empty() {
        println!("   Docstring: {}", truncate(field("docstring"), 80).dimmed());
    }
    println!();
}

pub fn score_colored(score: f64) -> colored::ColoredString {
    let s = format!("{:.3}", score);
    if score > 0.8 {
        s.green()
    } else if score > 0.6 {
        s.yellow()
    } else {
        s.dimmed()
    }
}
