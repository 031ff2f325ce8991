//! Dump-chunk command implementation.

use super::CliResult;
use rangedb_codec::Value;
use rangedb_core::object::ObjectInput;
use rangedb_core::{Entity, Range};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct DumpedEntity<'a> {
    key: String,
    grouping_number: i64,
    value: &'a Value,
}

/// Runs the dump-chunk command.
pub fn run(file: &Path, limit: Option<usize>, format: &str) -> CliResult<()> {
    let mut input = ObjectInput::<Entity<Value>>::open_unlocked(file)?;
    if !input.exists() {
        return Err(format!("no chunk file at {}", file.display()).into());
    }
    let range = file
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(Range::from_file_name);

    if format != "json" {
        match range {
            Some(range) => println!("Chunk {} (range {range})", file.display()),
            None => println!("Chunk {}", file.display()),
        }
        println!();
    }

    let limit = limit.unwrap_or(usize::MAX);
    let mut printed = 0;
    while printed < limit {
        let Some(entity) = input.next_object()? else {
            break;
        };
        match format {
            "json" => {
                let dumped = DumpedEntity {
                    key: entity.key().to_string(),
                    grouping_number: entity.key().grouping_number(),
                    value: entity.value(),
                };
                println!("{}", serde_json::to_string(&dumped)?);
            }
            _ => println!("{} => {:?}", entity.key(), entity.value()),
        }
        printed += 1;
    }

    if format != "json" {
        println!();
        println!("{printed} entities");
        if input.skipped() > 0 {
            println!("{} undecodable records skipped", input.skipped());
        }
        if input.is_truncated() {
            println!("file ends with a truncated record");
        }
    }
    Ok(())
}
