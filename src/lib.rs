//! blobmount-rs: a flat block-object store exposed as a POSIX-like filesystem.
//!
//! This crate is the storage engine behind such a mount: it translates
//! byte-range reads, writes and truncates into whole-blob puts or staged
//! block commits, synthesizes directories over the flat namespace, and
//! projects blob properties onto file attributes. The kernel bridge, caches
//! and mount bootstrap sit on top of [`engine::FsConnection`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blobmount_rs::{BlockEngine, FsConnection, MemoryClient, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = BlockEngine::new(StorageConfig::default(), Arc::new(MemoryClient::new()));
//!     engine.create_file("hello.txt", 0o644).await?;
//!     engine.write("hello.txt", 0, b"hello world", &Default::default()).await?;
//!     let data = engine.read_buffer("hello.txt", 0, 0).await?;
//!     assert_eq!(data, b"hello world");
//!     Ok(())
//! }
//! ```

pub mod attr;
pub mod block;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;

// Re-exports for convenience
pub use attr::ObjAttr;
pub use block::{Block, BlockList};
pub use client::{MemoryClient, ObjectClient, RestClient};
pub use config::{AccessTier, StorageConfig};
pub use engine::{BlockEngine, FsConnection};
pub use error::{StorageError, StorageResult};
