//! File manager core
//!
//! This crate contains:
//! - Configuration
//! - Error types
//! - Name policy
//! - Entry metadata
//! - Thumbnail cache
//! - The file operation engine
//! - Request dispatch

pub mod config;
pub mod error;
pub mod policy;
pub mod metadata;
pub mod thumbnail;
pub mod engine;
pub mod dispatch;

pub use config::{
    FmConfig, StorageConfig, SecurityConfig, ExtensionsConfig, PatternsConfig,
    UploadConfig, ImagesConfig, ThumbnailConfig, EditConfig, ListPolicy, SizeLimit,
};
pub use error::{ErrorKind, ErrorPayload, FmError, Result};
pub use policy::{ExtensionSet, PolicyEvaluator};
pub use metadata::{EntryAttributes, EntryDescriptor, EntryKind, MetadataReader};
pub use thumbnail::{ThumbnailCache, ThumbnailHandle};
pub use engine::{
    EditableContent, ExtractReport, FileContent, FileManager, ListFilter, RejectedUpload,
    SummaryData, UploadItem, UploadReport,
};
pub use dispatch::{Dispatcher, Payload, Request};

pub use fm_fs::{LocalStorage, Storage, VirtualPath};
