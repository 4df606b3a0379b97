//! Directory synthesis over the flat namespace, plus symlinks.
//!
//! A directory is a zero-byte marker blob with `hdi_isfolder=true` in its
//! metadata, or merely a common prefix shared by deeper blobs. Recursive
//! operations walk paginated flat listings under `name/`.

use tracing::{debug, warn};

use crate::attr::{FOLDER_KEY, SYMLINK_KEY};
use crate::client::{CopyState, Metadata, ObjectClient};
use crate::engine::{BlockEngine, MAX_LIST_COUNT};
use crate::error::{StorageError, StorageResult};

/// Wait between copy-status polls during rename.
const COPY_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

impl BlockEngine {
    pub(crate) async fn create_directory_impl(&self, path: &str) -> StorageResult<()> {
        debug!(path, "create directory");
        let mut metadata = Metadata::new();
        metadata.insert(FOLDER_KEY.to_string(), "true".to_string());
        self.write_buffer(path, &metadata, &[]).await
    }

    pub(crate) async fn create_link_impl(&self, path: &str, target: &str) -> StorageResult<()> {
        debug!(path, target, "create symlink");
        let mut metadata = Metadata::new();
        metadata.insert(SYMLINK_KEY.to_string(), "true".to_string());
        self.write_buffer(path, &metadata, target.as_bytes()).await
    }

    pub(crate) async fn read_link_impl(&self, path: &str) -> StorageResult<String> {
        let body = self.client.get_range(&self.name(path), 0, 0).await?;
        String::from_utf8(body.to_vec())
            .map_err(|_| StorageError::io("symlink target is not valid utf-8"))
    }

    pub(crate) async fn delete_file_impl(&self, path: &str) -> StorageResult<()> {
        match self.client.delete(&self.name(path), true).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound) => {
                debug!(path, "delete of missing object");
                Err(StorageError::NotFound)
            }
            Err(err) => {
                warn!(path, error = %err, "failed to delete object");
                Err(err)
            }
        }
    }

    /// Deletes every blob under `path/` page by page, then the marker.
    /// Per-item failures are logged and the sweep continues; the last one
    /// wins as the overall result.
    pub(crate) async fn delete_directory_impl(&self, path: &str) -> StorageResult<()> {
        debug!(path, "delete directory");
        let prefix = format!("{}/", self.name(path));
        let mut marker: Option<String> = None;
        let mut last_err: Option<StorageError> = None;

        loop {
            let segment = self
                .client
                .list(&prefix, None, marker.as_deref(), MAX_LIST_COUNT)
                .await?;
            for item in &segment.items {
                let child = self.config.relative_path(&item.name).to_string();
                if let Err(err) = self.delete_file_impl(&child).await {
                    warn!(path = %child, error = %err, "failed to delete directory entry");
                    last_err = Some(err);
                }
            }
            match segment.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        match self.delete_file_impl(path).await {
            Ok(()) => match last_err {
                Some(err) => Err(err),
                None => Ok(()),
            },
            Err(err) => Err(err),
        }
    }

    /// Server-side copy, poll to completion, then delete the source. The
    /// copy carries the source's metadata so directory markers and symlinks
    /// survive a rename.
    pub(crate) async fn rename_file_impl(&self, source: &str, target: &str) -> StorageResult<()> {
        debug!(source, target, "rename file");
        let source_name = self.name(source);
        let target_name = self.name(target);

        let props = self.client.get_properties(&source_name).await?;
        self.client
            .start_copy(&target_name, &source_name, &props.metadata)
            .await?;

        loop {
            match self.client.poll_copy(&target_name).await? {
                CopyState::Pending => tokio::time::sleep(COPY_POLL_INTERVAL).await,
                CopyState::Success => break,
                CopyState::Failed | CopyState::Aborted => {
                    return Err(StorageError::io(format!(
                        "copy of {source} to {target} did not complete"
                    )));
                }
            }
        }

        self.delete_file_impl(source).await
    }

    /// Renames every blob under `source/`, then the marker itself.
    pub(crate) async fn rename_directory_impl(
        &self,
        source: &str,
        target: &str,
    ) -> StorageResult<()> {
        debug!(source, target, "rename directory");
        let prefix = format!("{}/", self.name(source));
        let mut marker: Option<String> = None;
        let mut last_err: Option<StorageError> = None;

        loop {
            let segment = self
                .client
                .list(&prefix, None, marker.as_deref(), MAX_LIST_COUNT)
                .await?;
            for item in &segment.items {
                let child = self.config.relative_path(&item.name).to_string();
                let renamed = child.replacen(source, target, 1);
                if let Err(err) = self.rename_file_impl(&child, &renamed).await {
                    warn!(path = %child, error = %err, "failed to rename directory entry");
                    last_err = Some(err);
                }
            }
            match segment.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        match self.rename_file_impl(source, target).await {
            Ok(()) => match last_err {
                Some(err) => Err(err),
                None => Ok(()),
            },
            Err(err) => Err(err),
        }
    }
}
