//! File manager error types

use serde::Serialize;
use thiserror::Error;

/// Stable classification reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidPath,
    NotFound,
    ForbiddenDirectoryAction,
    ForbiddenName,
    ReadOnly,
    Permission,
    AlreadyExists,
    SizeLimit,
    Config,
    Io,
    Server,
}

/// Main file manager error type
///
/// Every variant maps to exactly one `ErrorKind`. Arguments are the variant's
/// fields in declaration order.
#[derive(Error, Debug)]
pub enum FmError {
    // ===== Validation =====
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Directory is empty: {0}")]
    DirectoryEmpty(String),

    #[error("Operation not allowed on a directory: {0}")]
    ForbiddenDirectoryAction(String),

    #[error("Forbidden name: {0}")]
    ForbiddenName(String),

    // ===== Authorization =====
    #[error("File manager is read-only")]
    ReadOnly,

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("The document root cannot be modified")]
    RootImmutable,

    #[error("Directory already exists: {0}")]
    DirectoryAlreadyExists(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Empty upload: {0}")]
    EmptyUpload(String),

    #[error("{name} exceeds the upload limit of {limit} bytes")]
    SizeLimit { name: String, limit: u64 },

    // ===== Fatal =====
    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Execution =====
    #[error("Cannot create directory: {0}")]
    CreateDirectory(String),

    #[error("Cannot move directory to {0}")]
    MoveDirectory(String),

    #[error("Cannot move file to {0}")]
    MoveFile(String),

    #[error("Cannot rename directory {from} to {to}")]
    RenameDirectory { from: String, to: String },

    #[error("Cannot rename file {from} to {to}")]
    RenameFile { from: String, to: String },

    #[error("Cannot copy directory {name} to {target}")]
    CopyDirectory { name: String, target: String },

    #[error("Cannot copy file {name} to {target}")]
    CopyFile { name: String, target: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),
}

impl FmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FmError::InvalidPath(_) => ErrorKind::InvalidPath,
            FmError::NotFound(_) | FmError::DirectoryNotFound(_) | FmError::DirectoryEmpty(_) => {
                ErrorKind::NotFound
            }
            FmError::ForbiddenDirectoryAction(_) => ErrorKind::ForbiddenDirectoryAction,
            FmError::ForbiddenName(_) => ErrorKind::ForbiddenName,
            FmError::ReadOnly => ErrorKind::ReadOnly,
            FmError::Permission(_) | FmError::RootImmutable => ErrorKind::Permission,
            FmError::DirectoryAlreadyExists(_) | FmError::FileAlreadyExists(_) => {
                ErrorKind::AlreadyExists
            }
            FmError::EmptyUpload(_) | FmError::SizeLimit { .. } => ErrorKind::SizeLimit,
            FmError::Config(_) => ErrorKind::Config,
            FmError::CreateDirectory(_)
            | FmError::MoveDirectory(_)
            | FmError::MoveFile(_)
            | FmError::RenameDirectory { .. }
            | FmError::RenameFile { .. }
            | FmError::CopyDirectory { .. }
            | FmError::CopyFile { .. }
            | FmError::Io(_) => ErrorKind::Io,
            FmError::Server(_) => ErrorKind::Server,
        }
    }

    /// Machine-readable code of the concrete error
    pub fn code(&self) -> &'static str {
        match self {
            FmError::InvalidPath(_) => "INVALID_PATH",
            FmError::NotFound(_) => "NOT_FOUND",
            FmError::DirectoryNotFound(_) => "DIRECTORY_NOT_FOUND",
            FmError::DirectoryEmpty(_) => "DIRECTORY_EMPTY",
            FmError::ForbiddenDirectoryAction(_) => "FORBIDDEN_ACTION_DIR",
            FmError::ForbiddenName(_) => "FORBIDDEN_NAME",
            FmError::ReadOnly => "NOT_ALLOWED_SYSTEM",
            FmError::Permission(_) => "NOT_ALLOWED",
            FmError::RootImmutable => "NOT_ALLOWED",
            FmError::DirectoryAlreadyExists(_) => "DIRECTORY_ALREADY_EXISTS",
            FmError::FileAlreadyExists(_) => "FILE_ALREADY_EXISTS",
            FmError::EmptyUpload(_) => "FILE_EMPTY",
            FmError::SizeLimit { .. } => "UPLOAD_FILES_SIZE_LIMIT",
            FmError::Config(_) => "CONFIG_ERROR",
            FmError::CreateDirectory(_) => "UNABLE_TO_CREATE_DIRECTORY",
            FmError::MoveDirectory(_) => "ERROR_MOVING_DIRECTORY",
            FmError::MoveFile(_) => "ERROR_MOVING_FILE",
            FmError::RenameDirectory { .. } => "ERROR_RENAMING_DIRECTORY",
            FmError::RenameFile { .. } => "ERROR_RENAMING_FILE",
            FmError::CopyDirectory { .. } => "ERROR_COPYING_DIRECTORY",
            FmError::CopyFile { .. } => "ERROR_COPYING_FILE",
            FmError::Io(_) => "IO_ERROR",
            FmError::Server(_) => "ERROR_SERVER",
        }
    }

    /// Positional arguments for client-side message formatting
    pub fn arguments(&self) -> Vec<String> {
        match self {
            FmError::InvalidPath(a)
            | FmError::NotFound(a)
            | FmError::DirectoryNotFound(a)
            | FmError::DirectoryEmpty(a)
            | FmError::ForbiddenDirectoryAction(a)
            | FmError::ForbiddenName(a)
            | FmError::Permission(a)
            | FmError::DirectoryAlreadyExists(a)
            | FmError::FileAlreadyExists(a)
            | FmError::EmptyUpload(a)
            | FmError::Config(a)
            | FmError::CreateDirectory(a)
            | FmError::MoveDirectory(a)
            | FmError::MoveFile(a)
            | FmError::Server(a) => vec![a.clone()],
            FmError::SizeLimit { name, limit } => vec![name.clone(), limit.to_string()],
            FmError::RenameDirectory { from, to } | FmError::RenameFile { from, to } => {
                vec![from.clone(), to.clone()]
            }
            FmError::CopyDirectory { name, target } | FmError::CopyFile { name, target } => {
                vec![name.clone(), target.clone()]
            }
            FmError::Io(e) => vec![e.to_string()],
            FmError::ReadOnly | FmError::RootImmutable => Vec::new(),
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.kind(),
            title: self.code(),
            arguments: self.arguments(),
        }
    }
}

/// Serialized form of an error inside a response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorKind,
    /// Concrete error code, finer than `code`
    pub title: &'static str,
    pub arguments: Vec<String>,
}

impl From<fm_fs::FsError> for FmError {
    fn from(e: fm_fs::FsError) -> Self {
        match e {
            fm_fs::FsError::NotFound(p) => FmError::NotFound(p),
            fm_fs::FsError::AccessDenied(p) => FmError::Permission(p),
            fm_fs::FsError::InvalidPath(p) => FmError::InvalidPath(p),
            fm_fs::FsError::AlreadyExists(p) => FmError::FileAlreadyExists(p),
            fm_fs::FsError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                FmError::Permission(e.to_string())
            }
            fm_fs::FsError::Io(e) => FmError::Io(e),
            fm_fs::FsError::Archive(msg) => FmError::Server(msg),
            fm_fs::FsError::Zip(e) => FmError::Server(e.to_string()),
        }
    }
}

impl From<image::ImageError> for FmError {
    fn from(e: image::ImageError) -> Self {
        FmError::Server(format!("Image processing failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, FmError>;
