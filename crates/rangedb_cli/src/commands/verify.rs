//! Verify command implementation.

use super::{read_metadata, trees, ChunkFile, CliResult, Tree};
use rangedb_codec::{from_cbor, Value};
use rangedb_core::{Entity, Key, Range};
use rangedb_storage::RecordReader;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of chunk files checked.
    pub chunks_checked: usize,
    /// Number of records checked.
    pub records_checked: usize,
    /// List of problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying collection at {}", path.display());
    println!();

    let result = verify(path)?;
    println!(
        "Checked {} records in {} chunk files",
        result.records_checked, result.chunks_checked
    );
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Collection verification passed");
        Ok(())
    } else {
        println!("✗ Collection verification failed");
        Err(format!("{} problems found", result.errors.len()).into())
    }
}

/// Checks every chunk file of the collection at `path` and of its indexes.
pub fn verify(path: &Path) -> CliResult<VerifyResult> {
    let metadata = read_metadata(path)?;
    let mut result = VerifyResult::default();
    for tree in trees(path, &metadata)? {
        verify_tree(&tree, &mut result)?;
    }
    Ok(result)
}

fn verify_tree(tree: &Tree, result: &mut VerifyResult) -> CliResult<()> {
    let chunks = tree.chunk_files()?;
    for pair in chunks.windows(2) {
        if pair[0].segment == pair[1].segment && pair[0].range.overlaps(&pair[1].range) {
            result.errors.push(format!(
                "{}: chunks {} and {} overlap in segment {}",
                tree.label(),
                pair[0].range,
                pair[1].range,
                pair[0].segment
            ));
        }
    }
    for chunk in &chunks {
        verify_chunk(tree, chunk, result)?;
    }
    Ok(())
}

fn verify_chunk(tree: &Tree, chunk: &ChunkFile, result: &mut VerifyResult) -> CliResult<()> {
    result.chunks_checked += 1;
    tracing::debug!(path = %chunk.path.display(), range = %chunk.range, "checking chunk");
    let Some(mut reader) = RecordReader::open(&chunk.path)? else {
        return Ok(());
    };
    let location = chunk.path.display();
    let mut previous: Option<Key> = None;
    let mut position = 0usize;

    while let Some(bytes) = reader.next_record()? {
        result.records_checked += 1;
        let entity = match from_cbor::<Entity<Value>>(&bytes) {
            Ok(entity) => entity,
            Err(e) => {
                result
                    .errors
                    .push(format!("{location}: record {position} does not decode: {e}"));
                position += 1;
                continue;
            }
        };
        let key = entity.key();

        let placement = placement(key, chunk.segment, tree.spans_ranges);
        if !chunk.range.contains(placement) {
            result.errors.push(format!(
                "{location}: key {key} belongs at {placement}, outside {}",
                chunk.range
            ));
        }
        if let Some(prev) = &previous {
            if prev >= key {
                result.errors.push(format!(
                    "{location}: key {key} at record {position} does not sort after {prev}"
                ));
            }
        }
        previous = Some(key.clone());
        position += 1;
    }

    if reader.is_truncated() {
        result
            .errors
            .push(format!("{location}: truncated record after record {position}"));
    }
    Ok(())
}

/// Grouping number that decides which chunk of `segment` holds `key`.
fn placement(key: &Key, segment: Range, spans_ranges: bool) -> i64 {
    if spans_ranges {
        key.grouping_number().max(segment.start())
    } else {
        key.grouping_number()
    }
}
