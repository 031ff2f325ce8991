//! Inspect command implementation.

use super::{read_metadata, trees, CliResult, Tree};
use rangedb_core::recovery::{list_history, RECOVERY_DIR};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Collection inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Collection path.
    pub path: String,
    /// On-disk format version.
    pub format_version: u32,
    /// Stored key kind.
    pub key_kind: String,
    /// Stored value type.
    pub value_type: String,
    /// Rollup levels of the data tree.
    pub rollup_levels: Vec<u64>,
    /// Folder sizes of the data tree.
    pub folder_sizes: Vec<u64>,
    /// Data tree followed by index trees.
    pub trees: Vec<TreeStats>,
    /// Recovery entries not yet applied.
    pub pending_changes: usize,
    /// Applied recovery entries kept as history.
    pub completed_changes: usize,
}

/// Layout of one segment tree.
#[derive(Debug, Serialize)]
pub struct TreeStats {
    /// `data` or `index <name>`.
    pub name: String,
    /// Number of segment folders holding at least one chunk.
    pub segments: usize,
    /// Chunk file count per rollup level, finest first.
    pub chunks_per_level: Vec<LevelStats>,
    /// Total chunk bytes.
    pub bytes: u64,
}

/// Chunk files at one rollup level.
#[derive(Debug, Serialize)]
pub struct LevelStats {
    /// Chunk length.
    pub level: u64,
    /// Chunk files of that length.
    pub chunks: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let result = inspect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result for `path`.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let metadata = read_metadata(path)?;
    let trees = trees(path, &metadata)?
        .iter()
        .map(tree_stats)
        .collect::<CliResult<Vec<_>>>()?;
    let history = list_history(&path.join(RECOVERY_DIR))?;
    let pending_changes = history.iter().filter(|entry| !entry.complete).count();

    Ok(InspectResult {
        path: path.display().to_string(),
        format_version: metadata.format_version,
        key_kind: metadata.key_kind.to_string(),
        value_type: metadata.value_type,
        rollup_levels: metadata.sizing.rollup_levels().to_vec(),
        folder_sizes: metadata.sizing.folder_sizes().to_vec(),
        trees,
        pending_changes,
        completed_changes: history.len() - pending_changes,
    })
}

fn tree_stats(tree: &Tree) -> CliResult<TreeStats> {
    let chunks = tree.chunk_files()?;
    let segments: BTreeSet<_> = chunks.iter().map(|chunk| chunk.segment).collect();
    let chunks_per_level = tree
        .sizing
        .rollup_levels()
        .iter()
        .map(|&level| LevelStats {
            level,
            chunks: chunks.iter().filter(|c| c.range.length() == level).count(),
        })
        .collect();
    let mut bytes = 0;
    for chunk in &chunks {
        bytes += std::fs::metadata(&chunk.path)?.len();
    }
    Ok(TreeStats {
        name: tree.label(),
        segments: segments.len(),
        chunks_per_level,
        bytes,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("rangedb Collection Inspection");
    println!("=============================");
    println!();
    println!("Path:           {}", result.path);
    println!("Format version: {}", result.format_version);
    println!("Key kind:       {}", result.key_kind);
    println!("Value type:     {}", result.value_type);
    println!("Rollup levels:  {:?}", result.rollup_levels);
    println!("Folder sizes:   {:?}", result.folder_sizes);

    for tree in &result.trees {
        println!();
        println!("{}:", capitalize(&tree.name));
        println!("  Segments: {}", tree.segments);
        for level in &tree.chunks_per_level {
            println!("  Level {:>12}: {} chunks", level.level, level.chunks);
        }
        println!("  Size:     {}", format_size(tree.bytes));
    }

    println!();
    println!("Recovery:");
    println!("  Pending:   {}", result.pending_changes);
    println!("  Completed: {}", result.completed_changes);
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
