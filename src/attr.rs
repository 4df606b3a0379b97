//! Generic file attributes projected from store metadata.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Metadata key marking a zero-byte blob as a directory marker.
pub const FOLDER_KEY: &str = "hdi_isfolder";
/// Metadata key marking a blob as a symlink; the body holds the target.
pub const SYMLINK_KEY: &str = "is_symlink";

/// Size reported for directories, which have no bytes of their own.
pub const DIR_SIZE: u64 = 4096;

/// Default mode bits when the store carries no permissions.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Property flags carried alongside the attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrFlags {
    /// Metadata was fetched from the store, not synthesized.
    pub metadata_retrieved: bool,
    /// Mode bits are defaults, not persisted permissions.
    pub mode_default: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Attributes of a file, directory or symlink as seen by the kernel bridge.
#[derive(Debug, Clone)]
pub struct ObjAttr {
    /// Mount-relative path.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub crtime: DateTime<Utc>,
    /// Content MD5 as stored on the blob, when present.
    pub md5: Option<Vec<u8>>,
    pub flags: AttrFlags,
}

impl ObjAttr {
    /// File attributes with times and size from blob properties.
    ///
    /// Flat stores carry no permissions, so the mode is a default and
    /// `mode_default` is set for the bridge to substitute its own policy.
    pub fn file(path: &str, size: u64, mtime: DateTime<Utc>, crtime: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            name: base_name(path).to_string(),
            size,
            mode: DEFAULT_FILE_MODE,
            mtime,
            atime: mtime,
            ctime: mtime,
            crtime,
            md5: None,
            flags: AttrFlags {
                metadata_retrieved: true,
                mode_default: true,
                ..AttrFlags::default()
            },
        }
    }

    /// Synthesized directory attributes for a prefix with no marker blob.
    /// The store has nothing to report for these, so times are "now".
    pub fn virtual_dir(path: &str) -> Self {
        let now = Utc::now();
        let mut attr = Self::file(path, DIR_SIZE, now, now);
        attr.mode = DEFAULT_DIR_MODE;
        attr.flags.is_dir = true;
        attr
    }

    /// Applies store metadata: directory markers and symlink flags.
    pub fn apply_metadata(&mut self, metadata: &HashMap<String, String>) {
        if metadata.get(FOLDER_KEY).map(|v| v == "true").unwrap_or(false) {
            self.flags.is_dir = true;
            self.mode = DEFAULT_DIR_MODE;
            self.size = DIR_SIZE;
        }
        if metadata.get(SYMLINK_KEY).map(|v| v == "true").unwrap_or(false) {
            self.flags.is_symlink = true;
        }
    }

    pub fn is_dir(&self) -> bool {
        self.flags.is_dir
    }

    pub fn is_symlink(&self) -> bool {
        self.flags.is_symlink
    }
}

/// Final component of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_metadata_marks_directory() {
        let mut attr = ObjAttr::file("a/b", 0, Utc::now(), Utc::now());
        let mut meta = HashMap::new();
        meta.insert(FOLDER_KEY.to_string(), "true".to_string());
        attr.apply_metadata(&meta);
        assert!(attr.is_dir());
        assert_eq!(attr.size, DIR_SIZE);
        assert_eq!(attr.mode, DEFAULT_DIR_MODE);
    }

    #[test]
    fn symlink_metadata_sets_flag_only() {
        let mut attr = ObjAttr::file("a/link", 9, Utc::now(), Utc::now());
        let mut meta = HashMap::new();
        meta.insert(SYMLINK_KEY.to_string(), "true".to_string());
        attr.apply_metadata(&meta);
        assert!(attr.is_symlink());
        assert!(!attr.is_dir());
        assert_eq!(attr.size, 9);
    }

    #[test]
    fn base_name_handles_nested_and_trailing_slash() {
        assert_eq!(base_name("a/b/c.txt"), "c.txt");
        assert_eq!(base_name("dir/"), "dir");
        assert_eq!(base_name("top"), "top");
    }
}
