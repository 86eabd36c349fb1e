//! Entry descriptors

use crate::policy::ExtensionSet;
use crate::{FmError, Result};
use chrono::{DateTime, Utc};
use fm_fs::{EntryStat, Storage, VirtualPath};
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// Description of one file or folder as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub attributes: EntryAttributes,
}

impl EntryDescriptor {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAttributes {
    pub name: String,
    pub path: String,
    pub readable: bool,
    pub writable: bool,
    pub size: u64,
    /// 0 unless the entry is a decodable image
    pub width: u32,
    pub height: u32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Modification time in milliseconds since the epoch
    pub timestamp: i64,
}

/// Builds EntryDescriptors from storage attributes
#[derive(Debug, Clone)]
pub struct MetadataReader {
    images: ExtensionSet,
}

impl MetadataReader {
    pub fn new(images: ExtensionSet) -> Self {
        Self { images }
    }

    /// Describe the entry at `path`
    ///
    /// The path form must agree with the entry: directories are addressed with a
    /// trailing `/`, files without.
    pub fn describe<S: Storage + ?Sized>(
        &self,
        storage: &S,
        path: &VirtualPath,
    ) -> Result<EntryDescriptor> {
        let stat = storage.read_entry(path)?;

        if !path.is_root() && stat.is_dir != path.is_dir() {
            return Err(FmError::InvalidPath(path.to_string()));
        }

        self.describe_stat(storage, path, &stat)
    }

    /// Describe an entry whose attributes were already read
    pub fn describe_stat<S: Storage + ?Sized>(
        &self,
        storage: &S,
        path: &VirtualPath,
        stat: &EntryStat,
    ) -> Result<EntryDescriptor> {
        let name = path.name().unwrap_or("/").to_string();

        let is_image = !stat.is_dir && self.images.contains_name(&name);
        let (width, height) = if is_image && stat.readable && stat.len > 0 {
            self.image_dimensions(storage, path)
        } else {
            (0, 0)
        };

        let modified_time = stat.modified.unwrap_or(SystemTime::UNIX_EPOCH);
        let modified: DateTime<Utc> = modified_time.into();
        let created: DateTime<Utc> = stat.created.unwrap_or(modified_time).into();

        Ok(EntryDescriptor {
            id: path.to_string(),
            kind: if stat.is_dir {
                EntryKind::Folder
            } else {
                EntryKind::File
            },
            attributes: EntryAttributes {
                name,
                path: path.to_string(),
                readable: stat.readable,
                writable: stat.writable,
                size: if stat.is_dir { 0 } else { stat.len },
                width,
                height,
                created,
                modified,
                timestamp: modified.timestamp_millis(),
            },
        })
    }

    /// Header-only decode; failures degrade to 0x0
    fn image_dimensions<S: Storage + ?Sized>(&self, storage: &S, path: &VirtualPath) -> (u32, u32) {
        let result = storage
            .open_entry(path)
            .map_err(FmError::from)
            .and_then(|reader| {
                ImageReader::new(reader)
                    .with_guessed_format()
                    .map_err(FmError::from)
            })
            .and_then(|reader| reader.into_dimensions().map_err(FmError::from));

        match result {
            Ok(dimensions) => dimensions,
            Err(e) => {
                tracing::debug!("No dimensions for {}: {}", path, e);
                (0, 0)
            }
        }
    }
}

/// Content type guessed from the file extension
pub fn mime_for(name: &str) -> String {
    mime_guess::from_path(name).first_or_octet_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_fs::LocalStorage;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    fn setup() -> (tempfile::TempDir, LocalStorage, MetadataReader) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(dir.path()).unwrap();
        let reader = MetadataReader::new(ExtensionSet::new(["png", "jpg"]));
        (dir, storage, reader)
    }

    #[test]
    fn test_describe_file() {
        let (_dir, storage, reader) = setup();
        storage.write_entry(&vp("/notes.txt"), b"hello").unwrap();

        let descriptor = reader.describe(&storage, &vp("/notes.txt")).unwrap();
        assert_eq!(descriptor.kind, EntryKind::File);
        assert_eq!(descriptor.id, "/notes.txt");
        assert_eq!(descriptor.attributes.name, "notes.txt");
        assert_eq!(descriptor.attributes.size, 5);
        assert_eq!((descriptor.attributes.width, descriptor.attributes.height), (0, 0));
        assert!(descriptor.attributes.readable);
        assert_eq!(
            descriptor.attributes.timestamp,
            descriptor.attributes.modified.timestamp_millis()
        );
    }

    #[test]
    fn test_describe_image_dimensions() {
        let (_dir, storage, reader) = setup();
        let image = image::RgbImage::new(7, 3);
        image.save(storage.resolve(&vp("/pic.png"))).unwrap();

        let descriptor = reader.describe(&storage, &vp("/pic.png")).unwrap();
        assert_eq!((descriptor.attributes.width, descriptor.attributes.height), (7, 3));
    }

    #[test]
    fn test_broken_image_degrades_to_zero() {
        let (_dir, storage, reader) = setup();
        storage.write_entry(&vp("/fake.png"), b"not really a png").unwrap();

        let descriptor = reader.describe(&storage, &vp("/fake.png")).unwrap();
        assert_eq!((descriptor.attributes.width, descriptor.attributes.height), (0, 0));
    }

    #[test]
    fn test_form_must_match_entry() {
        let (_dir, storage, reader) = setup();
        storage.create_dir(&vp("/docs/")).unwrap();
        storage.write_entry(&vp("/a.txt"), b"a").unwrap();

        assert!(matches!(
            reader.describe(&storage, &vp("/docs")),
            Err(FmError::InvalidPath(_))
        ));
        assert!(matches!(
            reader.describe(&storage, &vp("/a.txt/")),
            Err(FmError::InvalidPath(_))
        ));
        assert!(matches!(
            reader.describe(&storage, &vp("/missing.txt")),
            Err(FmError::NotFound(_))
        ));

        let root = reader.describe(&storage, &VirtualPath::root()).unwrap();
        assert_eq!(root.kind, EntryKind::Folder);
        assert_eq!(root.attributes.name, "/");
    }

    #[test]
    fn test_describe_is_idempotent() {
        let (_dir, storage, reader) = setup();
        storage.write_entry(&vp("/same.txt"), b"same").unwrap();

        let first = reader.describe(&storage, &vp("/same.txt")).unwrap();
        let second = reader.describe(&storage, &vp("/same.txt")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("a.JPG"), "image/jpeg");
        assert_eq!(mime_for("b.png"), "image/png");
        assert_eq!(mime_for("notes.txt"), "text/plain");
        assert_eq!(mime_for("c.nosuchext"), "application/octet-stream");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }
}
