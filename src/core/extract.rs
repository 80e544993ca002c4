//! Python source extraction for the code index
//!
//! Line-oriented: finds `def`, `async def` and `class` headers at any depth
//! and the docstring that immediately follows. Good enough to feed the
//! indexer, not a parser.

use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::search::vectordb::CodeElement;

const SKIP_DIRS: &[&str] = &["__pycache__", "venv", ".venv", "node_modules", "site-packages"];

lazy_static! {
    static ref HEADER_RE: Regex =
        Regex::new(r"^\s*(async\s+def|def|class)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref DOC_OPEN_RE: Regex = Regex::new(r#"^\s*[rRuU]?("""|''')"#).unwrap();
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || SKIP_DIRS.contains(&name))
        .unwrap_or(false)
}

/// Every `*.py` file under `root`, sorted.
pub fn collect_source_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|ext| ext == "py").unwrap_or(false))
        .collect();
    files.sort();
    files
}

/// Read and extract one file.
pub fn extract_file(path: &Path) -> anyhow::Result<Vec<CodeElement>> {
    let content = fs::read_to_string(path)?;
    Ok(extract_units(&path.to_string_lossy(), &content))
}

pub fn extract_units(file_path: &str, content: &str) -> Vec<CodeElement> {
    let lines: Vec<&str> = content.lines().collect();
    let mut units = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let caps = match HEADER_RE.captures(lines[i]) {
            Some(c) => c,
            None => {
                i += 1;
                continue;
            }
        };

        let element_type = if &caps[1] == "class" { "class" } else { "function" };
        let element_name = caps[2].to_string();

        // Headers may wrap while parentheses are open.
        let mut header = lines[i].trim().to_string();
        let mut depth = paren_depth(lines[i]);
        while depth > 0 && i + 1 < lines.len() {
            i += 1;
            header.push(' ');
            header.push_str(lines[i].trim());
            depth += paren_depth(lines[i]);
        }
        let signature = header.trim_end_matches(':').trim_end().to_string();
        i += 1;

        let docstring = read_docstring(&lines, &mut i);

        units.push(CodeElement {
            file_path: file_path.to_string(),
            element_name,
            element_type: element_type.to_string(),
            signature: Some(signature),
            docstring,
        });
    }

    units
}

fn paren_depth(line: &str) -> i32 {
    line.chars().fold(0, |d, c| match c {
        '(' | '[' => d + 1,
        ')' | ']' => d - 1,
        _ => d,
    })
}

/// First paragraph of the docstring starting at the next non-blank line.
fn read_docstring(lines: &[&str], i: &mut usize) -> Option<String> {
    while *i < lines.len() && lines[*i].trim().is_empty() {
        *i += 1;
    }
    let first = lines.get(*i)?;
    let quote = DOC_OPEN_RE.captures(first)?.get(1)?.as_str();

    let start = first.find(quote)? + quote.len();
    let mut body = String::new();
    let mut rest = &first[start..];
    loop {
        if let Some(end) = rest.find(quote) {
            body.push_str(&rest[..end]);
            *i += 1;
            break;
        }
        body.push_str(rest);
        body.push('\n');
        *i += 1;
        match lines.get(*i) {
            Some(line) => rest = line,
            None => break,
        }
    }

    let paragraph = body
        .trim()
        .split("\n\n")
        .next()
        .unwrap_or("")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ");

    (!paragraph.is_empty()).then_some(paragraph)
}
