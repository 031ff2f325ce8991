//! CLI command implementations.

pub mod dump_chunk;
pub mod inspect;
pub mod recovery;
pub mod verify;

use rangedb_core::dir::CollectionMetadata;
use rangedb_core::index::{list_index_names, IndexMeta, EXTRACTOR_FILE};
use rangedb_core::object::ObjectInput;
use rangedb_core::segment::list_chunk_files;
use rangedb_core::{Range, SegmentPathManager, SegmentSizing};
use std::path::{Path, PathBuf};

/// Boxed error used by every command.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// One chunk file found while walking a segment tree.
#[derive(Debug, Clone)]
pub struct ChunkFile {
    /// Range of the segment folder holding the chunk.
    pub segment: Range,
    /// Range named by the chunk file.
    pub range: Range,
    /// The chunk file.
    pub path: PathBuf,
}

/// A segment tree: the collection data or one index.
#[derive(Debug)]
pub struct Tree {
    /// `None` for the data tree, the index name otherwise.
    pub index: Option<String>,
    /// Root folder of the tree.
    pub root: PathBuf,
    /// Folder and chunk sizes of the tree.
    pub sizing: SegmentSizing,
    /// True if time-frame keys may appear in chunks before their start.
    pub spans_ranges: bool,
}

impl Tree {
    /// Display name of the tree.
    pub fn label(&self) -> String {
        match &self.index {
            Some(name) => format!("index {name}"),
            None => "data".to_string(),
        }
    }

    /// Every chunk file of the tree, in range order.
    pub fn chunk_files(&self) -> CliResult<Vec<ChunkFile>> {
        let max = Range::max_range();
        let paths = SegmentPathManager::new(&self.root, self.sizing.clone());
        let mut chunks = Vec::new();
        for (segment, folder) in paths.existing_segments(max.start(), max.end())? {
            for (range, path) in list_chunk_files(&folder)? {
                chunks.push(ChunkFile {
                    segment,
                    range,
                    path,
                });
            }
        }
        Ok(chunks)
    }
}

/// Reads the metadata of the collection at `path`.
pub fn read_metadata(path: &Path) -> CliResult<CollectionMetadata> {
    CollectionMetadata::read(path)?
        .ok_or_else(|| format!("no rangedb collection found at {}", path.display()).into())
}

/// The data tree followed by one tree per stored index.
pub fn trees(path: &Path, metadata: &CollectionMetadata) -> CliResult<Vec<Tree>> {
    let mut trees = vec![Tree {
        index: None,
        root: path.to_path_buf(),
        sizing: metadata.sizing.clone(),
        spans_ranges: metadata.key_kind.spans_ranges(),
    }];
    for name in list_index_names(path)? {
        let root = path.join(&name);
        let meta = ObjectInput::<IndexMeta>::open_unlocked(&root.join(EXTRACTOR_FILE))?
            .next_object_strict()?
            .ok_or_else(|| format!("index {name} has an empty {EXTRACTOR_FILE} file"))?;
        trees.push(Tree {
            index: Some(name),
            root,
            sizing: SegmentSizing::for_kind(meta.key_kind),
            spans_ranges: false,
        });
    }
    Ok(trees)
}
