//! On-disk layout of per-bucket journal files
//!
//! ```text
//! <data_root>/
//! └── <url-encoded bucket>/
//!     ├── bucketkeys.keys      input key journal
//!     ├── bucketkeys.failed    dead-letter journal from the last run
//!     ├── bucketkeys.0         chunks produced by split
//!     └── bucketkeys.1
//! ```

use std::path::{Path, PathBuf};

/// Input key journal file name
pub const KEYS_FILE: &str = "bucketkeys.keys";

/// Dead-letter journal file name
pub const FAILED_FILE: &str = "bucketkeys.failed";

/// Paths for one bucket's journals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLayout {
    dir: PathBuf,
}

impl BucketLayout {
    pub fn new(data_root: &Path, bucket: &str) -> Self {
        Self {
            dir: data_root.join(encode_bucket(bucket)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn keys_path(&self) -> PathBuf {
        self.dir.join(KEYS_FILE)
    }

    pub fn failed_path(&self) -> PathBuf {
        self.dir.join(FAILED_FILE)
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        chunk_path_for(&self.keys_path(), index)
    }
}

/// Directory name for a bucket
pub fn encode_bucket(bucket: &str) -> String {
    match bucket {
        // Would otherwise resolve to the data root or its parent
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(bucket).into_owned(),
    }
}

/// Name of the `index`-th chunk split from `source`
pub fn chunk_path_for(source: &Path, index: usize) -> PathBuf {
    source.with_extension(index.to_string())
}

/// Key journal path that belongs to a dump or load file
pub fn key_path_for(file: &Path, loaded: bool) -> PathBuf {
    file.with_extension(if loaded { "loadedkeys" } else { "keys" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_layout() {
        let layout = BucketLayout::new(Path::new("/data"), "user accounts/eu");
        assert_eq!(layout.dir(), Path::new("/data/user%20accounts%2Feu"));
        assert_eq!(
            layout.keys_path(),
            PathBuf::from("/data/user%20accounts%2Feu/bucketkeys.keys")
        );
        assert_eq!(
            layout.failed_path(),
            PathBuf::from("/data/user%20accounts%2Feu/bucketkeys.failed")
        );
        assert_eq!(
            layout.chunk_path(4),
            PathBuf::from("/data/user%20accounts%2Feu/bucketkeys.4")
        );
    }

    #[test]
    fn test_dot_buckets_stay_inside_root() {
        assert_eq!(encode_bucket("."), "%2E");
        assert_eq!(encode_bucket(".."), "%2E%2E");
        assert_eq!(encode_bucket("a.b"), "a.b");
    }

    #[test]
    fn test_key_path_for() {
        assert_eq!(
            key_path_for(Path::new("/dump/users.data"), false),
            PathBuf::from("/dump/users.keys")
        );
        assert_eq!(
            key_path_for(Path::new("/dump/users.data"), true),
            PathBuf::from("/dump/users.loadedkeys")
        );
        assert_eq!(
            key_path_for(Path::new("/dump/users"), false),
            PathBuf::from("/dump/users.keys")
        );
    }
}
