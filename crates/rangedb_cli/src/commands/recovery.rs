//! Recovery command implementation.

use super::{read_metadata, CliResult};
use rangedb_codec::Value;
use rangedb_core::object::ObjectInput;
use rangedb_core::recovery::{list_history, HistoryEntry, RECOVERY_DIR};
use rangedb_core::Recoverable;
use std::path::Path;

/// Runs the recovery command.
pub fn run(path: &Path, pending_only: bool) -> CliResult<()> {
    read_metadata(path)?;
    let entries: Vec<HistoryEntry> = list_history(&path.join(RECOVERY_DIR))?
        .into_iter()
        .filter(|entry| !pending_only || !entry.complete)
        .collect();

    println!("{:>15}  {:>8}  {:<9}  changes", "created", "id", "state");
    for entry in &entries {
        let state = if entry.complete { "complete" } else { "pending" };
        let changes = match change_count(entry) {
            Ok(count) => count.to_string(),
            Err(e) => format!("unreadable ({e})"),
        };
        println!(
            "{:>15}  {:>8}  {:<9}  {}",
            entry.creation_time, entry.id, state, changes
        );
    }
    println!();
    println!("{} entries", entries.len());
    Ok(())
}

fn change_count(entry: &HistoryEntry) -> CliResult<usize> {
    let recoverable = ObjectInput::<Recoverable<Value>>::open_unlocked(&entry.path)?
        .next_object_strict()?
        .ok_or("empty entry")?;
    Ok(recoverable.changes().len())
}
