//! Mapping grouping numbers to folders and chunk files.
//!
//! A collection's directory is a fixed-depth tree. Each level of folders
//! partitions the grouping-number space into aligned ranges of one folder
//! size; the deepest folder is a segment. Inside a segment, chunk files are
//! named by the range they cover, at one of the configured rollup levels:
//!
//! ```text
//! <root>/0_4294967295/0_8388607/.../0_63/   <- segment (size 64)
//!                                   ├─ 5_5       <- level 1 chunk
//!                                   └─ 0_63      <- level 64 chunk (rolled up)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::key::KeyKind;
use crate::range::Range;
use rangedb_storage::fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rollup levels and folder sizes for one key kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSizing {
    rollup_levels: Vec<u64>,
    folder_sizes: Vec<u64>,
}

impl SegmentSizing {
    /// Creates a sizing after checking that the levels nest.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] unless:
    /// - rollup levels start at 1 and each divides the next
    /// - folder sizes are non-empty and each is a multiple of the next
    /// - the last rollup level equals the last folder size
    pub fn new(rollup_levels: Vec<u64>, folder_sizes: Vec<u64>) -> CoreResult<Self> {
        if rollup_levels.first() != Some(&1) {
            return Err(CoreError::invalid_argument("rollup levels must start at 1"));
        }
        if !nests(&rollup_levels) {
            return Err(CoreError::invalid_argument(format!(
                "rollup levels must ascend and divide each other: {rollup_levels:?}"
            )));
        }
        let mut descending = folder_sizes.clone();
        descending.reverse();
        if folder_sizes.is_empty() || !nests(&descending) {
            return Err(CoreError::invalid_argument(format!(
                "folder sizes must descend and divide each other: {folder_sizes:?}"
            )));
        }
        if rollup_levels.last() != folder_sizes.last() {
            return Err(CoreError::invalid_argument(
                "largest rollup level must equal the segment size",
            ));
        }
        Ok(Self {
            rollup_levels,
            folder_sizes,
        })
    }

    /// Default sizing for a key kind.
    #[must_use]
    pub fn for_kind(kind: KeyKind) -> Self {
        let (rollup_levels, folder_sizes) = match kind {
            KeyKind::Long => (
                vec![1, 64],
                vec![1 << 56, 1 << 49, 1 << 41, 1 << 32, 1 << 23, 1 << 14, 64],
            ),
            KeyKind::Time | KeyKind::TimeFrame => (
                vec![1, 6_000, 3_600_000],
                vec![31_104_000_000, 2_592_000_000, 86_400_000, 3_600_000],
            ),
            KeyKind::Integer => (vec![1, 256], vec![1 << 26, 1 << 20, 1 << 14, 256]),
            KeyKind::String | KeyKind::Uuid => {
                (vec![1, 524_288], vec![1 << 32, 1 << 26, 524_288])
            }
        };
        Self {
            rollup_levels,
            folder_sizes,
        }
    }

    /// Chunk sizes from finest to coarsest.
    #[must_use]
    pub fn rollup_levels(&self) -> &[u64] {
        &self.rollup_levels
    }

    /// Folder sizes from the top of the tree down to the segment.
    #[must_use]
    pub fn folder_sizes(&self) -> &[u64] {
        &self.folder_sizes
    }

    /// Number of grouping numbers per segment.
    #[must_use]
    pub fn segment_size(&self) -> u64 {
        self.folder_sizes.last().copied().unwrap_or(1)
    }
}

fn nests(sizes: &[u64]) -> bool {
    sizes
        .windows(2)
        .all(|pair| pair[0] > 0 && pair[1] > pair[0] && pair[1] % pair[0] == 0)
        && sizes.iter().all(|&size| size > 0)
}

/// Resolves segment folders and chunk paths under one root directory.
#[derive(Debug, Clone)]
pub struct SegmentPathManager {
    root: PathBuf,
    sizing: SegmentSizing,
}

impl SegmentPathManager {
    /// Creates a path manager rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, sizing: SegmentSizing) -> Self {
        Self {
            root: root.into(),
            sizing,
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The sizing in use.
    #[must_use]
    pub fn sizing(&self) -> &SegmentSizing {
        &self.sizing
    }

    /// Chunk sizes from finest to coarsest.
    #[must_use]
    pub fn rollup_levels(&self) -> &[u64] {
        self.sizing.rollup_levels()
    }

    /// Range of the segment holding `grouping_number`.
    #[must_use]
    pub fn segment_range(&self, grouping_number: i64) -> Range {
        Range::for_value_and_size(grouping_number, self.sizing.segment_size())
    }

    /// Folder of the segment holding `grouping_number`.
    #[must_use]
    pub fn segment_path(&self, grouping_number: i64) -> PathBuf {
        let mut path = self.root.clone();
        for &size in self.sizing.folder_sizes() {
            path.push(Range::for_value_and_size(grouping_number, size).to_file_name());
        }
        path
    }

    /// Chunk path for `grouping_number` at one rollup level.
    #[must_use]
    pub fn chunk_path(&self, grouping_number: i64, level: u64) -> PathBuf {
        self.segment_path(grouping_number)
            .join(Range::for_value_and_size(grouping_number, level).to_file_name())
    }

    /// Candidate chunk paths for `grouping_number`, finest level first.
    #[must_use]
    pub fn chunk_paths(&self, grouping_number: i64) -> Vec<PathBuf> {
        let segment = self.segment_path(grouping_number);
        self.rollup_levels()
            .iter()
            .map(|&level| {
                segment.join(Range::for_value_and_size(grouping_number, level).to_file_name())
            })
            .collect()
    }

    /// Ranges a write at `grouping_number` may eventually be rolled into.
    ///
    /// One range per rollup level above the finest.
    #[must_use]
    pub fn rollup_ranges(&self, grouping_number: i64) -> Vec<Range> {
        self.rollup_levels()
            .iter()
            .skip(1)
            .map(|&level| Range::for_value_and_size(grouping_number, level))
            .collect()
    }

    /// Checks that `range` is exactly one chunk at a non-finest level.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRollupRange`] otherwise.
    pub fn validate_rollup_range(&self, range: Range) -> CoreResult<()> {
        let length = range.length();
        let level = self
            .rollup_levels()
            .iter()
            .skip(1)
            .copied()
            .find(|&level| level == length)
            .ok_or_else(|| {
                CoreError::invalid_rollup_range(
                    range,
                    format!("length {length} is not one of {:?}", self.rollup_levels()),
                )
            })?;
        if Range::for_value_and_size(range.start(), level) != range {
            return Err(CoreError::invalid_rollup_range(
                range,
                "range is not aligned to its rollup level",
            ));
        }
        Ok(())
    }

    /// Existing segment folders whose range overlaps `[min, max]`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a folder cannot be listed.
    pub fn existing_segments(&self, min: i64, max: i64) -> CoreResult<Vec<(Range, PathBuf)>> {
        let query = Range::new(min, max);
        let mut frontier = vec![self.root.clone()];
        let mut found = Vec::new();
        for &size in self.sizing.folder_sizes() {
            found.clear();
            for dir in &frontier {
                for child in fs::list_dir(dir)? {
                    if !child.is_dir() {
                        continue;
                    }
                    let Some(range) = child
                        .file_name()
                        .and_then(|n| n.to_str())
                        .and_then(Range::from_file_name)
                    else {
                        continue;
                    };
                    if range.length() == size && range.overlaps(&query) {
                        found.push((range, child));
                    }
                }
            }
            found.sort_by(|a, b| a.0.cmp(&b.0));
            frontier = found.iter().map(|(_, path)| path.clone()).collect();
        }
        Ok(found)
    }
}

/// Chunk files directly inside `dir`, sorted by range.
///
/// Temp files and anything not named like a range are ignored.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_chunk_files(dir: &Path) -> CoreResult<Vec<(Range, PathBuf)>> {
    let mut chunks: Vec<(Range, PathBuf)> = fs::list_dir(dir)?
        .into_iter()
        .filter(|path| !fs::is_temp_file(path))
        .filter_map(|path| {
            let range = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(Range::from_file_name)?;
            Some((range, path))
        })
        .filter(|(_, path)| path.is_file())
        .collect();
    chunks.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    fn small() -> SegmentSizing {
        SegmentSizing::new(vec![1, 10, 100], vec![1000, 100]).unwrap()
    }

    #[test]
    fn default_sizings_are_valid() {
        for kind in [
            KeyKind::Long,
            KeyKind::Time,
            KeyKind::TimeFrame,
            KeyKind::Integer,
            KeyKind::String,
            KeyKind::Uuid,
        ] {
            let sizing = SegmentSizing::for_kind(kind);
            let rebuilt =
                SegmentSizing::new(sizing.rollup_levels().to_vec(), sizing.folder_sizes().to_vec());
            assert_eq!(rebuilt.unwrap(), sizing, "{kind}");
        }
        assert_eq!(SegmentSizing::for_kind(KeyKind::Long).segment_size(), 64);
        assert_eq!(SegmentSizing::for_kind(KeyKind::Time).segment_size(), 3_600_000);
    }

    #[test]
    fn rejects_bad_sizings() {
        assert!(SegmentSizing::new(vec![2, 10], vec![10]).is_err());
        assert!(SegmentSizing::new(vec![1, 3, 10], vec![10]).is_err());
        assert!(SegmentSizing::new(vec![1, 10], vec![100]).is_err());
        assert!(SegmentSizing::new(vec![1, 10], vec![]).is_err());
        assert!(SegmentSizing::new(vec![1, 10], vec![25, 10]).is_err());
    }

    #[test]
    fn segment_paths_nest_by_folder_size() {
        let paths = SegmentPathManager::new("/data", small());
        assert_eq!(paths.segment_path(1234), PathBuf::from("/data/1000_1999/1200_1299"));
        assert_eq!(paths.segment_path(-1), PathBuf::from("/data/-1000_-1/-100_-1"));
        assert_eq!(paths.segment_range(1234), Range::new(1200, 1299));
    }

    #[test]
    fn chunk_paths_run_finest_to_coarsest() {
        let paths = SegmentPathManager::new("/data", small());
        assert_eq!(
            paths.chunk_paths(1234),
            vec![
                PathBuf::from("/data/1000_1999/1200_1299/1234_1234"),
                PathBuf::from("/data/1000_1999/1200_1299/1230_1239"),
                PathBuf::from("/data/1000_1999/1200_1299/1200_1299"),
            ]
        );
        assert_eq!(paths.chunk_path(1234, 10), paths.chunk_paths(1234)[1]);
        assert_eq!(
            paths.rollup_ranges(1234),
            vec![Range::new(1230, 1239), Range::new(1200, 1299)]
        );
    }

    #[test]
    fn rollup_range_validation() {
        let paths = SegmentPathManager::new("/data", small());
        assert!(paths.validate_rollup_range(Range::new(0, 99)).is_ok());
        assert!(paths.validate_rollup_range(Range::new(10, 19)).is_ok());
        assert!(paths.validate_rollup_range(Range::new(0, 100)).is_err());
        assert!(paths.validate_rollup_range(Range::new(5, 14)).is_err());
        assert!(paths.validate_rollup_range(Range::new(3, 3)).is_err());
    }

    #[test]
    fn finds_existing_segments_in_order() {
        let dir = tempdir().unwrap();
        let paths = SegmentPathManager::new(dir.path(), small());
        for gn in [1234, 50, 2001, -7] {
            stdfs::create_dir_all(paths.segment_path(gn)).unwrap();
        }
        stdfs::create_dir_all(dir.path().join("by_name")).unwrap();
        stdfs::write(dir.path().join("METADATA"), b"x").unwrap();

        let found: Vec<Range> = paths
            .existing_segments(i64::MIN, i64::MAX)
            .unwrap()
            .into_iter()
            .map(|(range, _)| range)
            .collect();
        assert_eq!(
            found,
            vec![
                Range::new(-100, -1),
                Range::new(0, 99),
                Range::new(1200, 1299),
                Range::new(2000, 2099),
            ]
        );

        let window = paths.existing_segments(60, 1250).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].1, paths.segment_path(1234));
    }

    #[test]
    fn lists_only_chunk_files() {
        let dir = tempdir().unwrap();
        stdfs::write(dir.path().join("10_19"), b"").unwrap();
        stdfs::write(dir.path().join("2_2"), b"").unwrap();
        stdfs::write(dir.path().join("_tmp_3_3"), b"").unwrap();
        stdfs::write(dir.path().join("notes"), b"").unwrap();
        let ranges: Vec<Range> = list_chunk_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(r, _)| r)
            .collect();
        assert_eq!(ranges, vec![Range::new(2, 2), Range::new(10, 19)]);
    }
}
