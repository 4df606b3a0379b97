//! Engine configuration.

use serde::Deserialize;

/// Access tiers attached to committed blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum AccessTier {
    #[default]
    Hot,
    Cool,
    Cold,
    Archive,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Hot => "Hot",
            AccessTier::Cool => "Cool",
            AccessTier::Cold => "Cold",
            AccessTier::Archive => "Archive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hot" => Some(AccessTier::Hot),
            "cool" => Some(AccessTier::Cool),
            "cold" => Some(AccessTier::Cold),
            "archive" => Some(AccessTier::Archive),
            _ => None,
        }
    }
}

/// Storage engine configuration.
///
/// The mount bootstrap fills this from its own flag/config-file handling;
/// the engine only consumes the resolved values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Service endpoint, e.g. `https://account.blob.example.net`.
    pub endpoint: String,
    /// Account name used for request signing.
    pub account: String,
    /// Base64-encoded shared account key.
    pub account_key: String,
    /// Container the mount is scoped to.
    pub container: String,
    /// Mount every container of the account instead of a single one.
    pub mount_all_containers: bool,
    /// Prefix prepended to every object name on the store.
    pub prefix_path: String,
    /// Block size for uploads and file growth; 0 selects automatically.
    pub block_size: u64,
    /// Parallelism for multi-chunk transfers.
    pub max_concurrency: usize,
    /// Access tier attached on commit.
    pub default_tier: Option<AccessTier>,
    /// Resolve attributes through listings so markerless directories work.
    pub virtual_directory: bool,
    /// Verify the MD5 of downloaded files against blob properties.
    pub validate_md5: bool,
    /// Compute and attach MD5 on uploads above the single-shot limit.
    pub update_md5: bool,
    /// Report success for mode/owner changes instead of failing.
    pub ignore_access_modifiers: bool,
    /// Maximum attempts per remote call.
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds.
    pub retry_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_retry_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            account: String::new(),
            account_key: String::new(),
            container: String::new(),
            mount_all_containers: false,
            prefix_path: String::new(),
            block_size: 0,
            max_concurrency: 8,
            default_tier: None,
            virtual_directory: false,
            validate_md5: false,
            update_md5: false,
            ignore_access_modifiers: false,
            max_retries: 5,
            retry_delay_ms: 500,
            max_retry_delay_ms: 60_000,
        }
    }
}

impl StorageConfig {
    /// Full on-store name for a mount-relative path.
    pub fn object_name(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix_path.is_empty() {
            path.to_string()
        } else if path.is_empty() {
            self.prefix_path.clone()
        } else {
            format!("{}/{}", self.prefix_path.trim_end_matches('/'), path)
        }
    }

    /// Strips the configured prefix from an on-store name.
    pub fn relative_path<'a>(&self, name: &'a str) -> &'a str {
        if self.prefix_path.is_empty() {
            return name;
        }
        name.strip_prefix(self.prefix_path.trim_end_matches('/'))
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_applies_prefix() {
        let cfg = StorageConfig {
            prefix_path: "data".to_string(),
            ..StorageConfig::default()
        };
        assert_eq!(cfg.object_name("a/b.txt"), "data/a/b.txt");
        assert_eq!(cfg.object_name("/a"), "data/a");
        assert_eq!(cfg.relative_path("data/a/b.txt"), "a/b.txt");
    }

    #[test]
    fn object_name_without_prefix() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.object_name("a/b.txt"), "a/b.txt");
        assert_eq!(cfg.relative_path("a/b.txt"), "a/b.txt");
    }
}
