//! File manager storage layer
//!
//! Provides the sandboxed primitives the engine is built on:
//! - VirtualPath: root-relative paths that can never escape the document root
//! - Storage: the backend capability (resolve, stat, list, read, write, move, delete)
//! - LocalStorage: the local-disk implementation of Storage
//! - Name normalization for user-supplied file and folder names
//! - Zip packing/unpacking and tree summaries

mod virtual_path;
mod normalize;
mod storage;
mod summary;
mod archive;

pub use virtual_path::{validate_name, VirtualPath};
pub use normalize::{base_name, split_extension, NameNormalizer};
pub use storage::{EntryReader, EntryStat, LocalStorage, Storage, StorageEntry};
pub use summary::{summarize_tree, TreeSummary};
pub use archive::{zip_tree, ArchiveEntry, ArchiveReader, MAX_MEMBER_SIZE};

use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, FsError>;
