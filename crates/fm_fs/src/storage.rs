//! Storage backends
//! The engine only talks to `Storage`; `LocalStorage` maps it onto a local directory.

use crate::{summarize_tree, FsError, Result, TreeSummary, VirtualPath};
use std::fs;
use std::io::{BufRead, BufReader, Seek};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Attributes of one stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStat {
    pub is_dir: bool,
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub readable: bool,
    pub writable: bool,
}

/// Immediate child of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Buffered, seekable reader over an entry's content
pub trait EntryReader: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> EntryReader for T {}

/// Backend capability set
///
/// Every method takes a VirtualPath, so implementations never see unconfined input.
pub trait Storage: Send + Sync {
    /// Host location of an entry (for diagnostics and local tooling)
    fn resolve(&self, path: &VirtualPath) -> PathBuf;

    /// Stat one entry, `NotFound` if absent
    fn read_entry(&self, path: &VirtualPath) -> Result<EntryStat>;

    /// Immediate children of a directory
    fn list_entries(&self, dir: &VirtualPath) -> Result<Vec<StorageEntry>>;

    /// Open a file for streaming reads
    fn open_entry(&self, path: &VirtualPath) -> Result<Box<dyn EntryReader>>;

    /// Read a whole file
    fn read_bytes(&self, path: &VirtualPath) -> Result<Vec<u8>>;

    /// Create or truncate a file with the given content
    fn write_entry(&self, path: &VirtualPath, data: &[u8]) -> Result<()>;

    /// Create a directory (and missing parents), `AlreadyExists` if present
    fn create_dir(&self, path: &VirtualPath) -> Result<()>;

    /// Move an entry, `AlreadyExists` if the target is taken
    fn move_entry(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()>;

    /// Copy a file or a directory tree, `AlreadyExists` if the target is taken
    fn copy_entry(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()>;

    /// Delete a file or a directory tree
    fn delete_entry(&self, path: &VirtualPath) -> Result<()>;

    /// Count files, folders and bytes below `path`
    fn summarize(&self, path: &VirtualPath) -> Result<TreeSummary>;

    fn exists(&self, path: &VirtualPath) -> bool {
        self.read_entry(path).is_ok()
    }
}

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (and create if missing) a storage root
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();

        if root.is_file() {
            return Err(FsError::InvalidPath(format!(
                "Storage root must be a directory: {}",
                root.display()
            )));
        }

        if !root.exists() {
            create_dir_with_mode(root)?;
            tracing::info!("Created storage root: {}", root.display());
        }

        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stat_path(&self, path: &VirtualPath, real: &Path) -> Result<fs::Metadata> {
        fs::metadata(real).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::AccessDenied(path.to_string()),
            _ => FsError::Io(e),
        })
    }
}

impl Storage for LocalStorage {
    fn resolve(&self, path: &VirtualPath) -> PathBuf {
        path.resolve_under(&self.root)
    }

    fn read_entry(&self, path: &VirtualPath) -> Result<EntryStat> {
        let real = self.resolve(path);
        let metadata = self.stat_path(path, &real)?;
        let (readable, writable) = access_flags(&metadata);

        Ok(EntryStat {
            is_dir: metadata.is_dir(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
            created: metadata.created().ok(),
            readable,
            writable,
        })
    }

    fn list_entries(&self, dir: &VirtualPath) -> Result<Vec<StorageEntry>> {
        let real = self.resolve(dir);
        let metadata = self.stat_path(dir, &real)?;
        if !metadata.is_dir() {
            return Err(FsError::InvalidPath(format!("Not a directory: {}", dir)));
        }

        let mut entries = Vec::new();

        for entry in fs::read_dir(&real)? {
            let entry = entry?;

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::debug!("Skipping non UTF-8 name in {}: {:?}", dir, raw);
                    continue;
                }
            };

            // Follows symlinks, so a link to a directory lists as a directory
            let is_dir = match fs::metadata(entry.path()) {
                Ok(m) => m.is_dir(),
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry {}{}: {}", dir.as_dir(), name, e);
                    continue;
                }
            };

            entries.push(StorageEntry { name, is_dir });
        }

        Ok(entries)
    }

    fn open_entry(&self, path: &VirtualPath) -> Result<Box<dyn EntryReader>> {
        let real = self.resolve(path);
        let file = fs::File::open(&real).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::AccessDenied(path.to_string()),
            _ => FsError::Io(e),
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn read_bytes(&self, path: &VirtualPath) -> Result<Vec<u8>> {
        let real = self.resolve(path);
        fs::read(&real).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::AccessDenied(path.to_string()),
            _ => FsError::Io(e),
        })
    }

    fn write_entry(&self, path: &VirtualPath, data: &[u8]) -> Result<()> {
        let real = self.resolve(path);
        fs::write(&real, data)?;
        tracing::debug!("Wrote {} bytes: {}", data.len(), real.display());
        Ok(())
    }

    fn create_dir(&self, path: &VirtualPath) -> Result<()> {
        let real = self.resolve(path);
        if real.exists() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        create_dir_with_mode(&real)?;
        tracing::debug!("Created directory: {}", real.display());
        Ok(())
    }

    fn move_entry(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()> {
        let source = self.resolve(from);
        let target = self.resolve(to);

        if !source.exists() {
            return Err(FsError::NotFound(from.to_string()));
        }
        if target.exists() {
            return Err(FsError::AlreadyExists(to.to_string()));
        }

        // Try rename first (fast, same filesystem)
        match fs::rename(&source, &target) {
            Ok(()) => {
                tracing::debug!("Moved: {} -> {}", source.display(), target.display());
                Ok(())
            }
            Err(e) if is_cross_device(&e) => {
                tracing::info!(
                    "Cross-filesystem move, using copy+delete: {} -> {}",
                    source.display(),
                    target.display()
                );
                if source.is_dir() {
                    copy_dir_recursive(&source, &target)?;
                    fs::remove_dir_all(&source)?;
                } else {
                    fs::copy(&source, &target)?;
                    fs::remove_file(&source)?;
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn copy_entry(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()> {
        let source = self.resolve(from);
        let target = self.resolve(to);

        if !source.exists() {
            return Err(FsError::NotFound(from.to_string()));
        }
        if target.exists() {
            return Err(FsError::AlreadyExists(to.to_string()));
        }

        if source.is_dir() {
            if to.starts_with(from) {
                return Err(FsError::InvalidPath(format!(
                    "Cannot copy {} into itself",
                    from
                )));
            }
            copy_dir_recursive(&source, &target)?;
        } else {
            fs::copy(&source, &target)?;
        }

        tracing::debug!("Copied: {} -> {}", source.display(), target.display());
        Ok(())
    }

    fn delete_entry(&self, path: &VirtualPath) -> Result<()> {
        let real = self.resolve(path);
        let metadata = self.stat_path(path, &real)?;

        if metadata.is_dir() {
            fs::remove_dir_all(&real)?;
        } else {
            fs::remove_file(&real)?;
        }

        tracing::debug!("Deleted: {}", real.display());
        Ok(())
    }

    fn summarize(&self, path: &VirtualPath) -> Result<TreeSummary> {
        let real = self.resolve(path);
        self.stat_path(path, &real)?;
        Ok(summarize_tree(&real))
    }
}

/// Unix: EXDEV = 18, Windows: ERROR_NOT_SAME_DEVICE = 17
fn is_cross_device(e: &std::io::Error) -> bool {
    match e.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}

/// rwxr-xr-x directories
#[cfg(unix)]
fn create_dir_with_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

/// Permission bits only; the effective user is not consulted
#[cfg(unix)]
fn access_flags(metadata: &fs::Metadata) -> (bool, bool) {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    (mode & 0o444 != 0, mode & 0o222 != 0)
}

#[cfg(not(unix))]
fn access_flags(metadata: &fs::Metadata) -> (bool, bool) {
    (true, !metadata.permissions().readonly())
}

/// Recursively copy a directory
fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !dst.exists() {
        create_dir_with_mode(dst)?;
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(dir.path().join("root")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_open_creates_root() {
        let (dir, storage) = storage();
        assert!(dir.path().join("root").is_dir());
        assert!(storage.read_entry(&VirtualPath::root()).unwrap().is_dir);
    }

    #[test]
    fn test_open_rejects_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(LocalStorage::open(&file), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn test_write_read_list() {
        let (_dir, storage) = storage();
        storage.create_dir(&vp("/docs/")).unwrap();
        storage.write_entry(&vp("/docs/a.txt"), b"hello").unwrap();

        let stat = storage.read_entry(&vp("/docs/a.txt")).unwrap();
        assert!(!stat.is_dir);
        assert_eq!(stat.len, 5);

        let mut content = String::new();
        storage
            .open_entry(&vp("/docs/a.txt"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");

        let entries = storage.list_entries(&vp("/")).unwrap();
        assert_eq!(
            entries,
            vec![StorageEntry {
                name: "docs".into(),
                is_dir: true
            }]
        );
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.read_entry(&vp("/nope.txt")),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete_entry(&vp("/nope.txt")),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_move_refuses_to_overwrite() {
        let (_dir, storage) = storage();
        storage.write_entry(&vp("/a.txt"), b"a").unwrap();
        storage.write_entry(&vp("/b.txt"), b"b").unwrap();

        assert!(matches!(
            storage.move_entry(&vp("/a.txt"), &vp("/b.txt")),
            Err(FsError::AlreadyExists(_))
        ));
        assert_eq!(storage.read_bytes(&vp("/b.txt")).unwrap(), b"b");

        storage.move_entry(&vp("/a.txt"), &vp("/c.txt")).unwrap();
        assert!(!storage.exists(&vp("/a.txt")));
        assert_eq!(storage.read_bytes(&vp("/c.txt")).unwrap(), b"a");
    }

    #[test]
    fn test_copy_tree() {
        let (_dir, storage) = storage();
        storage.create_dir(&vp("/src/nested/")).unwrap();
        storage.write_entry(&vp("/src/nested/x.txt"), b"x").unwrap();

        storage.copy_entry(&vp("/src/"), &vp("/dst/")).unwrap();
        assert_eq!(storage.read_bytes(&vp("/dst/nested/x.txt")).unwrap(), b"x");
        assert!(storage.exists(&vp("/src/nested/x.txt")));

        assert!(matches!(
            storage.copy_entry(&vp("/src/"), &vp("/src/nested/inner/")),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_create_dir_twice() {
        let (_dir, storage) = storage();
        storage.create_dir(&vp("/x/")).unwrap();
        assert!(matches!(
            storage.create_dir(&vp("/x/")),
            Err(FsError::AlreadyExists(_))
        ));
    }
}
