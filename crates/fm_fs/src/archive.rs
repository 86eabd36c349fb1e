//! Zip packing and unpacking

use crate::{FsError, Result, Storage, VirtualPath};
use std::io::{Cursor, Read, Seek, Write};
use std::path::PathBuf;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Largest member `read` will decompress when the caller sets no limit
pub const MAX_MEMBER_SIZE: u64 = 1 << 30;

/// Pack a directory tree into an in-memory zip
///
/// `include(name, is_dir)` decides per entry; excluded directories are not descended.
/// Entry names are relative to `dir`.
pub fn zip_tree<S, F>(storage: &S, dir: &VirtualPath, include: F) -> Result<Vec<u8>>
where
    S: Storage + ?Sized,
    F: Fn(&str, bool) -> bool,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_tree(storage, &dir.as_dir(), "", &include, &mut writer, options)?;

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

fn add_tree<S, F, W>(
    storage: &S,
    dir: &VirtualPath,
    prefix: &str,
    include: &F,
    writer: &mut ZipWriter<W>,
    options: SimpleFileOptions,
) -> Result<()>
where
    S: Storage + ?Sized,
    F: Fn(&str, bool) -> bool,
    W: Write + Seek,
{
    let mut entries = storage.list_entries(dir)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        if !include(&entry.name, entry.is_dir) {
            tracing::debug!("Excluded from archive: {}{}", dir, entry.name);
            continue;
        }

        let archive_name = format!("{}{}", prefix, entry.name);

        if entry.is_dir {
            let child = dir.join_dir(&entry.name)?;
            writer.add_directory(archive_name.as_str(), options)?;
            add_tree(
                storage,
                &child,
                &format!("{}/", archive_name),
                include,
                writer,
                options,
            )?;
        } else {
            let child = dir.join_file(&entry.name)?;
            let data = storage.read_bytes(&child)?;
            writer.start_file(archive_name.as_str(), options)?;
            writer.write_all(&data)?;
        }
    }

    Ok(())
}

/// One member of a zip archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    /// Name as stored in the archive
    pub raw_name: String,
    /// Confined relative path, `None` if the stored name would escape
    pub path: Option<PathBuf>,
    pub is_dir: bool,
    pub size: u64,
}

/// Read access to a zip archive
pub struct ArchiveReader<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn open(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader).map_err(|e| FsError::Archive(e.to_string()))?;
        Ok(Self { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// List every member without decompressing
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::with_capacity(self.archive.len());

        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| FsError::Archive(e.to_string()))?;

            entries.push(ArchiveEntry {
                index,
                raw_name: file.name().to_string(),
                path: file.enclosed_name(),
                is_dir: file.is_dir(),
                size: file.size(),
            });
        }

        Ok(entries)
    }

    /// Decompress one member, `None` when it is larger than `max_size`
    ///
    /// The declared size is only used to refuse early. The data itself is
    /// read through a cap, so a member lying about its size stays bounded.
    pub fn read(&mut self, index: usize, max_size: u64) -> Result<Option<Vec<u8>>> {
        let file = self
            .archive
            .by_index(index)
            .map_err(|e| FsError::Archive(e.to_string()))?;

        if file.size() > max_size {
            return Ok(None);
        }

        let mut buffer = Vec::new();
        file.take(max_size.saturating_add(1)).read_to_end(&mut buffer)?;
        if buffer.len() as u64 > max_size {
            return Ok(None);
        }
        Ok(Some(buffer))
    }
}
