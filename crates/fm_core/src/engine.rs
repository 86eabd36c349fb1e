//! File operation engine
//!
//! Every operation follows the same pipeline: validate the paths, authorize
//! against the policy, mutate the tree, bring the thumbnail cache in line and
//! describe the result. Validation and authorization errors are raised before
//! anything is written. Once the tree has changed, cache failures are only
//! logged.

use crate::config::{FmConfig, SizeLimit};
use crate::metadata::{mime_for, EntryDescriptor, MetadataReader};
use crate::policy::{extension_of, PolicyEvaluator};
use crate::thumbnail::ThumbnailCache;
use crate::{ErrorPayload, FmError, Result};
use fm_fs::{
    base_name, zip_tree, ArchiveReader, EntryStat, FsError, LocalStorage, NameNormalizer,
    Storage, TreeSummary, VirtualPath, MAX_MEMBER_SIZE,
};
use serde::Serialize;
use std::path::Component;

/// Which children a folder listing returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFilter {
    #[default]
    All,
    Images,
}

impl ListFilter {
    /// `"images"` restricts the listing, anything else lists everything
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some(p) if p.eq_ignore_ascii_case("images") => ListFilter::Images,
            _ => ListFilter::All,
        }
    }
}

/// One uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    /// Name as submitted by the client, possibly with a client-side directory
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedUpload {
    pub name: String,
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<EntryDescriptor>,
    pub rejected: Vec<RejectedUpload>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractReport {
    pub extracted: Vec<EntryDescriptor>,
    /// Archive member names that were not written
    pub skipped: Vec<String>,
}

/// Raw bytes handed to the transport
#[derive(Debug, Clone)]
pub struct FileContent {
    pub descriptor: EntryDescriptor,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditableContent {
    #[serde(flatten)]
    pub descriptor: EntryDescriptor,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: TreeSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiateData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: InitiateAttributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiateAttributes {
    pub config: ClientConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    pub security: ClientSecurity,
    pub upload: ClientUpload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSecurity {
    pub read_only: bool,
    pub extensions: ClientExtensions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientExtensions {
    pub policy: &'static str,
    pub restrictions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpload {
    /// Bytes, `None` when unlimited
    pub file_size_limit: Option<u64>,
}

/// The file manager
///
/// Holds only immutable state, so one instance can serve concurrent requests.
#[derive(Debug)]
pub struct FileManager<S: Storage = LocalStorage> {
    config: FmConfig,
    storage: S,
    policy: PolicyEvaluator,
    metadata: MetadataReader,
    thumbnails: ThumbnailCache,
    normalizer: NameNormalizer,
}

impl FileManager<LocalStorage> {
    /// Open the document root from the configuration (created if missing)
    pub fn new(config: FmConfig) -> Result<Self> {
        let storage = LocalStorage::open(config.document_root())?;
        Self::with_storage(config, storage)
    }
}

impl<S: Storage> FileManager<S> {
    pub fn with_storage(config: FmConfig, storage: S) -> Result<Self> {
        let policy = PolicyEvaluator::new(&config)?;
        let metadata = MetadataReader::new(policy.images().clone());
        let thumbnails = ThumbnailCache::open(&config)?;
        let normalizer = NameNormalizer::new(
            config.security.normalize_filename,
            config.security.chars_latin_only,
        );

        tracing::info!(
            "File manager ready: documents={}, thumbnails={}, read_only={}",
            storage.resolve(&VirtualPath::root()).display(),
            thumbnails.root().display(),
            policy.is_read_only()
        );

        Ok(Self {
            config,
            storage,
            policy,
            metadata,
            thumbnails,
            normalizer,
        })
    }

    pub fn config(&self) -> &FmConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn policy(&self) -> &PolicyEvaluator {
        &self.policy
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    // ========================================
    // Queries
    // ========================================

    pub fn initiate(&self) -> Result<InitiateData> {
        Ok(InitiateData {
            id: "/".to_string(),
            kind: "initiate",
            attributes: InitiateAttributes {
                config: ClientConfig {
                    security: ClientSecurity {
                        read_only: self.policy.is_read_only(),
                        extensions: ClientExtensions {
                            policy: self.policy.extension_policy().as_str(),
                            restrictions: self.policy.extensions().to_sorted_vec(),
                        },
                    },
                    upload: ClientUpload {
                        file_size_limit: self.size_limit()?,
                    },
                },
            },
        })
    }

    /// List a folder
    pub fn get_folder(&self, path: &str, filter: ListFilter) -> Result<Vec<EntryDescriptor>> {
        let dir = parse(path)?;
        let stat = match self.storage.read_entry(&dir) {
            Ok(stat) if stat.is_dir => stat,
            Ok(_) | Err(FsError::NotFound(_)) => {
                return Err(FmError::DirectoryNotFound(dir.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !dir.is_root() && !dir.is_dir() {
            return Err(FmError::InvalidPath(dir.to_string()));
        }
        require_readable(&dir, &stat)?;

        if let Some(name) = dir.name() {
            self.policy.check_restrictions(name, true)?;
        }

        let mut listing = Vec::new();

        for entry in self.storage.list_entries(&dir)? {
            if !self.policy.is_name_allowed(&entry.name, entry.is_dir) {
                continue;
            }
            if !entry.is_dir && filter == ListFilter::Images && !self.policy.is_image(&entry.name) {
                continue;
            }

            let child = match dir.join(&entry.name, entry.is_dir) {
                Ok(child) => child,
                Err(e) => {
                    tracing::debug!("Skipping unaddressable entry {:?}: {}", entry.name, e);
                    continue;
                }
            };

            match self.metadata.describe(&self.storage, &child) {
                Ok(descriptor) => listing.push(descriptor),
                Err(e) => tracing::debug!("Skipping {} during listing: {}", child, e),
            }
        }

        Ok(listing)
    }

    /// Describe one file
    pub fn get_file(&self, path: &str) -> Result<EntryDescriptor> {
        let (file, stat) = self.readable_file(path)?;
        self.metadata.describe_stat(&self.storage, &file, &stat)
    }

    /// Whole content of a file
    pub fn read_file(&self, path: &str) -> Result<FileContent> {
        let (file, stat) = self.readable_file(path)?;
        let descriptor = self.metadata.describe_stat(&self.storage, &file, &stat)?;
        let bytes = self.storage.read_bytes(&file)?;

        Ok(FileContent {
            file_name: descriptor.attributes.name.clone(),
            mime: mime_for(&descriptor.attributes.name),
            descriptor,
            bytes,
        })
    }

    /// File content, or a zip of a folder when folder downloads are enabled
    pub fn download(&self, path: &str) -> Result<FileContent> {
        let target = parse(path)?;
        if target.is_root() {
            return Err(FmError::RootImmutable);
        }

        let stat = self.storage.read_entry(&target)?;
        if !stat.is_dir {
            return self.read_file(path);
        }

        if !self.config.security.allow_folder_download {
            return Err(FmError::ForbiddenDirectoryAction(target.to_string()));
        }

        let dir = target.as_dir();
        let name = entry_name(&dir).to_string();
        self.policy.check_restrictions(&name, true)?;
        require_readable(&dir, &stat)?;

        if self.storage.list_entries(&dir)?.is_empty() {
            return Err(FmError::DirectoryEmpty(dir.to_string()));
        }

        let descriptor = self.metadata.describe_stat(&self.storage, &dir, &stat)?;
        let bytes = zip_tree(&self.storage, &dir, |child, is_dir| {
            self.policy.is_name_allowed(child, is_dir)
                && (is_dir || self.policy.is_extension_allowed(child))
        })?;

        tracing::info!("Packed folder download: {} ({} bytes)", dir, bytes.len());

        let file_name = format!("{}.zip", name);
        Ok(FileContent {
            descriptor,
            mime: mime_for(&file_name),
            file_name,
            bytes,
        })
    }

    /// Image bytes, or its thumbnail
    pub fn get_image(&self, path: &str, thumbnail: bool) -> Result<FileContent> {
        let (file, stat) = self.readable_file(path)?;
        let descriptor = self.metadata.describe_stat(&self.storage, &file, &stat)?;
        let name = descriptor.attributes.name.clone();

        if !thumbnail {
            return Ok(FileContent {
                file_name: name.clone(),
                mime: mime_for(&name),
                descriptor,
                bytes: self.storage.read_bytes(&file)?,
            });
        }

        if !self.policy.is_image(&name) {
            return Err(FmError::InvalidPath(file.to_string()));
        }

        let bytes = if self.config.images.thumbnail.enabled {
            let handle = self
                .thumbnails
                .get(&self.storage, &file, true)
                .ok_or_else(|| FmError::Server(format!("Thumbnail unavailable: {}", file)))?;
            self.thumbnails.read(&handle)?
        } else {
            self.thumbnails
                .render(&self.storage, &file)
                .map_err(|e| FmError::Server(format!("Thumbnail unavailable: {}: {}", file, e)))?
        };

        Ok(FileContent {
            file_name: name.clone(),
            mime: mime_for(&name),
            descriptor,
            bytes,
        })
    }

    /// Text content of an editable file
    pub fn edit_file(&self, path: &str) -> Result<EditableContent> {
        self.policy.assert_writable()?;

        let (file, stat) = self.readable_file(path)?;
        let name = entry_name(&file);
        if !self.policy.is_editable(name) {
            return Err(FmError::ForbiddenName(name.to_string()));
        }
        require_writable(&file, &stat)?;

        let descriptor = self.metadata.describe_stat(&self.storage, &file, &stat)?;
        let bytes = self.storage.read_bytes(&file)?;

        Ok(EditableContent {
            descriptor,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Count files, folders and bytes of the whole document root
    pub fn summarize(&self) -> Result<SummaryData> {
        let summary = self.storage.summarize(&VirtualPath::root())?;

        Ok(SummaryData {
            id: "/".to_string(),
            kind: "summary",
            attributes: summary,
        })
    }

    // ========================================
    // Mutations
    // ========================================

    /// Create `name` inside `parent`
    pub fn add_folder(&self, parent: &str, name: &str) -> Result<EntryDescriptor> {
        let normalized = self.normalizer.normalize(name);

        self.policy.assert_writable()?;
        let (parent, parent_stat) = self.target_dir(parent)?;
        require_writable(&parent, &parent_stat)?;

        if normalized.is_empty() {
            return Err(FmError::ForbiddenName(name.to_string()));
        }
        self.policy.check_restrictions(&normalized, true)?;

        let folder = parent.join_dir(&normalized)?;
        if self.storage.exists(&folder) {
            return Err(FmError::DirectoryAlreadyExists(folder.to_string()));
        }

        self.storage.create_dir(&folder).map_err(|e| match e {
            FsError::AlreadyExists(_) => FmError::DirectoryAlreadyExists(folder.to_string()),
            _ => FmError::CreateDirectory(folder.to_string()),
        })?;

        tracing::info!("Created folder: {}", folder);
        self.metadata.describe(&self.storage, &folder)
    }

    /// Rename an entry in place
    pub fn rename(&self, old: &str, new_name: &str) -> Result<EntryDescriptor> {
        self.policy.assert_writable()?;

        let source = parse(old)?;
        if source.is_root() {
            return Err(FmError::RootImmutable);
        }
        let stat = self.stat_entry(&source)?;
        require_writable(&source, &stat)?;

        let normalized = if stat.is_dir {
            self.normalizer.normalize(new_name)
        } else {
            self.normalizer.normalize_file_name(new_name)
        };
        if normalized.is_empty() {
            return Err(FmError::ForbiddenName(new_name.to_string()));
        }
        self.policy.check_restrictions(&normalized, stat.is_dir)?;

        let parent = source.parent().unwrap_or_else(VirtualPath::root);
        let target = parent.join(&normalized, stat.is_dir)?;

        if let Some(collision) = self.collision(&target) {
            return Err(collision);
        }

        self.storage
            .move_entry(&source, &target)
            .map_err(|e| match e {
                FsError::AlreadyExists(_) => already_exists(&target, stat.is_dir),
                _ if stat.is_dir => FmError::RenameDirectory {
                    from: source.to_string(),
                    to: target.to_string(),
                },
                _ => FmError::RenameFile {
                    from: source.to_string(),
                    to: target.to_string(),
                },
            })?;

        tracing::info!("Renamed: {} -> {}", source, target);
        log_cache_failure("relocate", &source, self.thumbnails.relocate(&source, &target));

        self.metadata.describe(&self.storage, &target)
    }

    /// Move an entry into another folder
    pub fn move_entry(&self, source: &str, target_dir: &str) -> Result<EntryDescriptor> {
        self.policy.assert_writable()?;

        let (source, stat, target) = self.transfer_paths(source, target_dir)?;

        self.storage
            .move_entry(&source, &target)
            .map_err(|e| match e {
                FsError::AlreadyExists(_) => already_exists(&target, stat.is_dir),
                _ if stat.is_dir => FmError::MoveDirectory(target.to_string()),
                _ => FmError::MoveFile(target.to_string()),
            })?;

        tracing::info!("Moved: {} -> {}", source, target);
        log_cache_failure("relocate", &source, self.thumbnails.relocate(&source, &target));

        self.metadata.describe(&self.storage, &target)
    }

    /// Copy an entry into another folder; thumbnails are not copied
    pub fn copy_entry(&self, source: &str, target_dir: &str) -> Result<EntryDescriptor> {
        self.policy.assert_writable()?;

        let (source, stat, target) = self.transfer_paths(source, target_dir)?;
        let name = entry_name(&source).to_string();
        let target_parent = target.parent().unwrap_or_else(VirtualPath::root).to_string();

        self.storage
            .copy_entry(&source, &target)
            .map_err(|e| match e {
                FsError::AlreadyExists(_) => already_exists(&target, stat.is_dir),
                _ if stat.is_dir => FmError::CopyDirectory {
                    name: name.clone(),
                    target: target_parent.clone(),
                },
                _ => FmError::CopyFile {
                    name: name.clone(),
                    target: target_parent.clone(),
                },
            })?;

        tracing::info!("Copied: {} -> {}", source, target);
        self.metadata.describe(&self.storage, &target)
    }

    /// Delete a file or a whole folder
    pub fn delete(&self, path: &str) -> Result<EntryDescriptor> {
        self.policy.assert_writable()?;

        let requested = parse(path)?;
        if requested.is_root() {
            return Err(FmError::RootImmutable);
        }

        let stat = self.storage.read_entry(&requested)?;
        let target = if stat.is_dir {
            requested.as_dir()
        } else {
            requested.as_file()
        };

        self.policy.check_restrictions(entry_name(&target), stat.is_dir)?;
        require_writable(&target, &stat)?;

        let descriptor = self.metadata.describe_stat(&self.storage, &target, &stat)?;
        self.storage.delete_entry(&target)?;

        tracing::info!("Deleted: {}", target);
        log_cache_failure("purge", &target, self.thumbnails.purge(&target));

        Ok(descriptor)
    }

    /// Store uploaded files in `dir`, skipping and reporting rejected items
    pub fn upload(&self, dir: &str, items: Vec<UploadItem>) -> Result<UploadReport> {
        self.policy.assert_writable()?;

        let (dir, dir_stat) = self.target_dir(dir)?;
        require_writable(&dir, &dir_stat)?;
        let limit = self.size_limit()?;

        let mut report = UploadReport::default();

        for item in items {
            let stored = self
                .store_upload(&dir, &item, limit)
                .and_then(|path| self.metadata.describe(&self.storage, &path));

            match stored {
                Ok(descriptor) => report.uploaded.push(descriptor),
                Err(e) => {
                    tracing::warn!("Rejected upload {:?} into {}: {}", item.name, dir, e);
                    report.rejected.push(RejectedUpload {
                        name: item.name,
                        error: e.payload(),
                    });
                }
            }
        }

        tracing::info!(
            "Upload into {}: {} stored, {} rejected",
            dir,
            report.uploaded.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Replace a file with uploaded content, possibly under a new name
    pub fn replace(&self, path: &str, item: UploadItem) -> Result<EntryDescriptor> {
        self.policy.assert_writable()?;

        let old = parse(path)?;
        let stat = self.storage.read_entry(&old)?;
        if stat.is_dir || old.is_dir() {
            return Err(FmError::ForbiddenDirectoryAction(old.to_string()));
        }
        self.policy.check_restrictions(entry_name(&old), false)?;

        let parent = old.parent().unwrap_or_else(VirtualPath::root);
        let parent_stat = self.storage.read_entry(&parent)?;
        require_writable(&parent, &parent_stat)?;

        let limit = self.size_limit()?;
        let new = self.store_upload(&parent, &item, limit)?;
        // The old content is gone from here on, even if its file lingers
        log_cache_failure("purge", &old, self.thumbnails.purge(&old));

        if new != old {
            self.storage.delete_entry(&old)?;
        }

        tracing::info!("Replaced: {} -> {}", old, new);

        self.metadata.describe(&self.storage, &new)
    }

    /// Overwrite an editable file with new text
    pub fn save_file(&self, path: &str, content: &str) -> Result<EntryDescriptor> {
        self.policy.assert_writable()?;

        let file = parse(path)?;
        if file.is_dir() {
            return Err(FmError::ForbiddenDirectoryAction(file.to_string()));
        }
        let stat = self.storage.read_entry(&file)?;
        if stat.is_dir {
            return Err(FmError::ForbiddenDirectoryAction(file.to_string()));
        }

        let name = entry_name(&file);
        self.policy.check_restrictions(name, false)?;
        if !self.policy.is_editable(name) {
            return Err(FmError::ForbiddenName(name.to_string()));
        }
        require_writable(&file, &stat)?;

        self.storage.write_entry(&file, content.as_bytes())?;

        tracing::info!("Saved: {} ({} bytes)", file, content.len());
        log_cache_failure("purge", &file, self.thumbnails.purge(&file));

        self.metadata.describe(&self.storage, &file)
    }

    /// Unpack a zip archive into `target_dir`
    ///
    /// Members that would escape, fail the policy, exceed the size limit or
    /// collide with existing entries are skipped and reported. Without a
    /// configured limit, members are capped at `MAX_MEMBER_SIZE`.
    pub fn extract(&self, source: &str, target_dir: &str) -> Result<ExtractReport> {
        self.policy.assert_writable()?;

        let (archive, _) = self.readable_file(source)?;
        if extension_of(entry_name(&archive)) != "zip" {
            return Err(FmError::InvalidPath(archive.to_string()));
        }

        let (target, target_stat) = self.target_dir(target_dir)?;
        require_writable(&target, &target_stat)?;
        let max_size = self.size_limit()?.unwrap_or(MAX_MEMBER_SIZE);

        let mut reader = ArchiveReader::open(self.storage.open_entry(&archive)?)?;
        let mut report = ExtractReport::default();

        for entry in reader.entries()? {
            let destination = entry
                .path
                .as_deref()
                .and_then(|relative| self.archive_destination(&target, relative, entry.is_dir));

            let destination = match destination {
                Some(destination) => destination,
                None => {
                    tracing::warn!("Skipping archive member {:?}", entry.raw_name);
                    report.skipped.push(entry.raw_name);
                    continue;
                }
            };

            if entry.is_dir {
                match self.ensure_dir(&destination) {
                    Ok(true) => report
                        .extracted
                        .push(self.metadata.describe(&self.storage, &destination)?),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Skipping archive member {:?}: {}", entry.raw_name, e);
                        report.skipped.push(entry.raw_name);
                    }
                }
                continue;
            }

            let too_large = entry.size > max_size;
            if too_large || self.storage.exists(&destination) {
                tracing::warn!("Skipping archive member {:?}", entry.raw_name);
                report.skipped.push(entry.raw_name);
                continue;
            }

            if let Some(parent) = destination.parent() {
                if let Err(e) = self.ensure_dir(&parent) {
                    tracing::warn!("Skipping archive member {:?}: {}", entry.raw_name, e);
                    report.skipped.push(entry.raw_name);
                    continue;
                }
            }

            let data = match reader.read(entry.index, max_size) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    tracing::warn!("Archive member larger than declared: {:?}", entry.raw_name);
                    report.skipped.push(entry.raw_name);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Unreadable archive member {:?}: {}", entry.raw_name, e);
                    report.skipped.push(entry.raw_name);
                    continue;
                }
            };

            self.storage.write_entry(&destination, &data)?;
            log_cache_failure("purge", &destination, self.thumbnails.purge(&destination));
            report
                .extracted
                .push(self.metadata.describe(&self.storage, &destination)?);
        }

        tracing::info!(
            "Extracted {} into {}: {} written, {} skipped",
            archive,
            target,
            report.extracted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    // ========================================
    // Helpers
    // ========================================

    fn size_limit(&self) -> Result<Option<u64>> {
        self.config
            .upload
            .file_size_limit
            .as_ref()
            .map(SizeLimit::to_bytes)
            .transpose()
    }

    /// Stat an entry and check that the path form agrees with it
    fn stat_entry(&self, path: &VirtualPath) -> Result<EntryStat> {
        let stat = self.storage.read_entry(path)?;
        if !path.is_root() && stat.is_dir != path.is_dir() {
            return Err(FmError::InvalidPath(path.to_string()));
        }
        Ok(stat)
    }

    /// An existing, permitted, readable file
    fn readable_file(&self, path: &str) -> Result<(VirtualPath, EntryStat)> {
        let file = parse(path)?;
        if file.is_dir() {
            return Err(FmError::ForbiddenDirectoryAction(file.to_string()));
        }

        let stat = self.storage.read_entry(&file)?;
        if stat.is_dir {
            return Err(FmError::ForbiddenDirectoryAction(file.to_string()));
        }

        self.policy.check_restrictions(entry_name(&file), false)?;
        require_readable(&file, &stat)?;
        Ok((file, stat))
    }

    /// An existing directory used as a destination, in directory form
    fn target_dir(&self, path: &str) -> Result<(VirtualPath, EntryStat)> {
        let dir = parse(path)?.as_dir();
        match self.storage.read_entry(&dir) {
            Ok(stat) if stat.is_dir => Ok((dir, stat)),
            Ok(_) | Err(FsError::NotFound(_)) => Err(FmError::DirectoryNotFound(dir.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Shared validation of move and copy, returns (source, source stat, destination)
    fn transfer_paths(
        &self,
        source: &str,
        target_dir: &str,
    ) -> Result<(VirtualPath, EntryStat, VirtualPath)> {
        let (target_dir, target_stat) = self.target_dir(target_dir)?;

        let source = parse(source)?;
        if source.is_root() {
            return Err(FmError::RootImmutable);
        }
        let stat = self.stat_entry(&source)?;

        require_readable(&source, &stat)?;
        require_writable(&target_dir, &target_stat)?;

        let name = entry_name(&source);
        self.policy.check_restrictions(name, stat.is_dir)?;

        let destination = target_dir.join(name, stat.is_dir)?;
        if stat.is_dir && target_dir.starts_with(&source) {
            return Err(FmError::InvalidPath(destination.to_string()));
        }
        if let Some(collision) = self.collision(&destination) {
            return Err(collision);
        }

        Ok((source, stat, destination))
    }

    /// Already-exists error for whatever occupies `path`, if anything
    fn collision(&self, path: &VirtualPath) -> Option<FmError> {
        let occupant = self.storage.read_entry(path).ok()?;
        let path = if occupant.is_dir {
            path.as_dir()
        } else {
            path.as_file()
        };
        Some(already_exists(&path, occupant.is_dir))
    }

    /// Validate an uploaded item and write it into `dir`
    fn store_upload(
        &self,
        dir: &VirtualPath,
        item: &UploadItem,
        limit: Option<u64>,
    ) -> Result<VirtualPath> {
        if item.content.is_empty() {
            return Err(FmError::EmptyUpload(item.name.clone()));
        }

        let name = self.normalizer.normalize_file_name(base_name(&item.name));
        if name.is_empty() {
            return Err(FmError::ForbiddenName(item.name.clone()));
        }
        self.policy.check_restrictions(&name, false)?;

        if let Some(limit) = limit {
            if item.content.len() as u64 > limit {
                return Err(FmError::SizeLimit { name, limit });
            }
        }

        let target = dir.join_file(&name)?;
        let overwritten = match self.storage.read_entry(&target) {
            Ok(stat) if stat.is_dir => {
                return Err(FmError::DirectoryAlreadyExists(target.as_dir().to_string()))
            }
            Ok(_) => true,
            Err(_) => false,
        };

        self.storage.write_entry(&target, &item.content)?;

        if overwritten {
            log_cache_failure("purge", &target, self.thumbnails.purge(&target));
        }

        tracing::debug!("Stored upload: {} ({} bytes)", target, item.content.len());
        Ok(target)
    }

    /// Confined and policy-checked destination of an archive member
    fn archive_destination(
        &self,
        target: &VirtualPath,
        relative: &std::path::Path,
        is_dir: bool,
    ) -> Option<VirtualPath> {
        let segments: Vec<&str> = relative
            .components()
            .map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Option<_>>()?;

        let (last, parents) = segments.split_last()?;
        let mut destination = target.clone();

        for segment in parents {
            let name = self.normalizer.normalize(segment);
            if name.is_empty() || self.policy.check_restrictions(&name, true).is_err() {
                return None;
            }
            destination = destination.join_dir(&name).ok()?;
        }

        let name = if is_dir {
            self.normalizer.normalize(last)
        } else {
            self.normalizer.normalize_file_name(last)
        };
        if name.is_empty() || self.policy.check_restrictions(&name, is_dir).is_err() {
            return None;
        }

        destination.join(&name, is_dir).ok()
    }

    /// Create a directory (and parents) if missing, true when something was created
    fn ensure_dir(&self, dir: &VirtualPath) -> Result<bool> {
        match self.storage.read_entry(dir) {
            Ok(stat) if stat.is_dir => return Ok(false),
            Ok(_) => return Err(FmError::FileAlreadyExists(dir.as_file().to_string())),
            Err(_) => {}
        }

        match self.storage.create_dir(dir) {
            Ok(()) => Ok(true),
            Err(FsError::AlreadyExists(_)) => Ok(false),
            Err(_) => Err(FmError::CreateDirectory(dir.to_string())),
        }
    }
}

fn parse(path: &str) -> Result<VirtualPath> {
    Ok(VirtualPath::parse(path)?)
}

fn entry_name(path: &VirtualPath) -> &str {
    path.name().unwrap_or("/")
}

fn already_exists(path: &VirtualPath, is_dir: bool) -> FmError {
    if is_dir {
        FmError::DirectoryAlreadyExists(path.to_string())
    } else {
        FmError::FileAlreadyExists(path.to_string())
    }
}

fn require_readable(path: &VirtualPath, stat: &EntryStat) -> Result<()> {
    if !stat.readable {
        return Err(FmError::Permission(path.to_string()));
    }
    Ok(())
}

fn require_writable(path: &VirtualPath, stat: &EntryStat) -> Result<()> {
    if !stat.writable {
        return Err(FmError::Permission(path.to_string()));
    }
    Ok(())
}

/// The primary mutation already happened; a stale cache is not worth failing it
fn log_cache_failure(action: &str, path: &VirtualPath, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!("Thumbnail {} failed for {}: {}", action, path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(configure: impl FnOnce(&mut FmConfig)) -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FmConfig::default();
        config.storage.server_root = dir.path().to_path_buf();
        configure(&mut config);
        let manager = FileManager::new(config).unwrap();
        (dir, manager)
    }

    fn upload(name: &str, content: &[u8]) -> UploadItem {
        UploadItem {
            name: name.to_string(),
            content: content.to_vec(),
        }
    }

    /// Local storage whose deletes always fail
    #[derive(Debug)]
    struct StickyStorage(LocalStorage);

    impl Storage for StickyStorage {
        fn resolve(&self, path: &VirtualPath) -> std::path::PathBuf {
            self.0.resolve(path)
        }
        fn read_entry(&self, path: &VirtualPath) -> fm_fs::Result<EntryStat> {
            self.0.read_entry(path)
        }
        fn list_entries(&self, dir: &VirtualPath) -> fm_fs::Result<Vec<fm_fs::StorageEntry>> {
            self.0.list_entries(dir)
        }
        fn open_entry(&self, path: &VirtualPath) -> fm_fs::Result<Box<dyn fm_fs::EntryReader>> {
            self.0.open_entry(path)
        }
        fn read_bytes(&self, path: &VirtualPath) -> fm_fs::Result<Vec<u8>> {
            self.0.read_bytes(path)
        }
        fn write_entry(&self, path: &VirtualPath, data: &[u8]) -> fm_fs::Result<()> {
            self.0.write_entry(path, data)
        }
        fn create_dir(&self, path: &VirtualPath) -> fm_fs::Result<()> {
            self.0.create_dir(path)
        }
        fn move_entry(&self, from: &VirtualPath, to: &VirtualPath) -> fm_fs::Result<()> {
            self.0.move_entry(from, to)
        }
        fn copy_entry(&self, from: &VirtualPath, to: &VirtualPath) -> fm_fs::Result<()> {
            self.0.copy_entry(from, to)
        }
        fn delete_entry(&self, path: &VirtualPath) -> fm_fs::Result<()> {
            Err(FsError::AccessDenied(path.to_string()))
        }
        fn summarize(&self, path: &VirtualPath) -> fm_fs::Result<TreeSummary> {
            self.0.summarize(path)
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(width, height)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_failed_replace_still_purges_old_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FmConfig::default();
        config.storage.server_root = dir.path().to_path_buf();
        let storage = StickyStorage(LocalStorage::open(config.document_root()).unwrap());
        let fm = FileManager::with_storage(config, storage).unwrap();

        fm.upload("/", vec![upload("pic.png", &png(200, 100))]).unwrap();
        fm.get_image("/pic.png", true).unwrap();
        let old = VirtualPath::parse("/pic.png").unwrap();
        assert!(fm.thumbnails().exists(&old));

        assert!(fm.replace("/pic.png", upload("new.png", &png(10, 10))).is_err());
        assert!(!fm.thumbnails().exists(&old));
        assert!(fm.get_file("/new.png").is_ok());
    }

    #[test]
    fn test_list_filter_param() {
        assert_eq!(ListFilter::from_param(Some("images")), ListFilter::Images);
        assert_eq!(ListFilter::from_param(Some("IMAGES")), ListFilter::Images);
        assert_eq!(ListFilter::from_param(Some("files")), ListFilter::All);
        assert_eq!(ListFilter::from_param(None), ListFilter::All);
    }

    #[test]
    fn test_initiate() {
        let (_dir, fm) = manager(|c| {
            c.security.read_only = true;
            c.upload.file_size_limit = Some(SizeLimit::Text("1K".into()));
        });

        let data = serde_json::to_value(fm.initiate().unwrap()).unwrap();
        assert_eq!(data["type"], "initiate");
        assert_eq!(data["attributes"]["config"]["security"]["readOnly"], true);
        assert_eq!(
            data["attributes"]["config"]["security"]["extensions"]["policy"],
            "ALLOW_LIST"
        );
        assert_eq!(data["attributes"]["config"]["upload"]["fileSizeLimit"], 1024);
    }

    #[test]
    fn test_add_folder_normalizes_and_rejects_duplicates() {
        let (_dir, fm) = manager(|_| {});

        let created = fm.add_folder("/", "holiday photos").unwrap();
        assert_eq!(created.id, "/holiday_photos/");

        assert!(matches!(
            fm.add_folder("/", "holiday photos"),
            Err(FmError::DirectoryAlreadyExists(_))
        ));
        assert!(matches!(
            fm.add_folder("/", ".secret"),
            Err(FmError::ForbiddenName(_))
        ));
        assert!(matches!(
            fm.add_folder("/missing/", "x"),
            Err(FmError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_latin_only_empty_name_is_forbidden() {
        let (_dir, fm) = manager(|c| c.security.chars_latin_only = true);
        let err = fm.add_folder("/", "日本").unwrap_err();
        assert!(matches!(err, FmError::ForbiddenName(ref name) if name == "日本"));
    }

    #[test]
    fn test_rename_file_and_collision() {
        let (_dir, fm) = manager(|_| {});
        fm.upload("/", vec![upload("a.txt", b"a"), upload("b.txt", b"b")])
            .unwrap();

        let renamed = fm.rename("/a.txt", "c.txt").unwrap();
        assert_eq!(renamed.id, "/c.txt");

        assert!(matches!(
            fm.rename("/c.txt", "b.txt"),
            Err(FmError::FileAlreadyExists(_))
        ));
        assert!(matches!(
            fm.rename("/c.txt", "c.exe"),
            Err(FmError::ForbiddenName(_))
        ));
        assert!(matches!(fm.rename("/", "x"), Err(FmError::RootImmutable)));
    }

    #[test]
    fn test_move_directory_into_itself() {
        let (_dir, fm) = manager(|_| {});
        fm.add_folder("/", "outer").unwrap();
        fm.add_folder("/outer/", "inner").unwrap();

        assert!(matches!(
            fm.move_entry("/outer/", "/outer/inner/"),
            Err(FmError::InvalidPath(_))
        ));
        assert!(matches!(
            fm.copy_entry("/outer/", "/outer/"),
            Err(FmError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_copy_keeps_source() {
        let (_dir, fm) = manager(|_| {});
        fm.add_folder("/", "dst").unwrap();
        fm.upload("/", vec![upload("a.txt", b"a")]).unwrap();

        let copied = fm.copy_entry("/a.txt", "/dst/").unwrap();
        assert_eq!(copied.id, "/dst/a.txt");
        assert!(fm.get_file("/a.txt").is_ok());

        assert!(matches!(
            fm.copy_entry("/a.txt", "/dst/"),
            Err(FmError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn test_get_file_rejects_directories() {
        let (_dir, fm) = manager(|_| {});
        fm.add_folder("/", "docs").unwrap();

        assert!(matches!(
            fm.get_file("/docs/"),
            Err(FmError::ForbiddenDirectoryAction(_))
        ));
        assert!(matches!(
            fm.get_file("/docs"),
            Err(FmError::ForbiddenDirectoryAction(_))
        ));
        assert!(matches!(fm.get_file("/none.txt"), Err(FmError::NotFound(_))));
    }

    #[test]
    fn test_upload_skips_and_reports() {
        let (_dir, fm) = manager(|c| {
            c.upload.file_size_limit = Some(SizeLimit::Bytes(4));
        });

        let report = fm
            .upload(
                "/",
                vec![
                    upload("ok.txt", b"1234"),
                    upload("big.txt", b"12345"),
                    upload("virus.exe", b"x"),
                    upload("empty.txt", b""),
                    upload("C:\\Users\\me\\my notes.txt", b"hi"),
                ],
            )
            .unwrap();

        let stored: Vec<_> = report.uploaded.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(stored, vec!["/ok.txt", "/my_notes.txt"]);

        let codes: Vec<_> = report.rejected.iter().map(|r| r.error.title).collect();
        assert_eq!(
            codes,
            vec!["UPLOAD_FILES_SIZE_LIMIT", "FORBIDDEN_NAME", "FILE_EMPTY"]
        );
    }

    #[test]
    fn test_malformed_size_limit_fails_before_writing() {
        let (dir, fm) = manager(|c| {
            c.upload.file_size_limit = Some(SizeLimit::Text("lots".into()));
        });

        assert!(matches!(
            fm.upload("/", vec![upload("a.txt", b"a")]),
            Err(FmError::Config(_))
        ));
        assert!(!dir.path().join("userfiles/a.txt").exists());
    }

    #[test]
    fn test_replace_under_new_name() {
        let (_dir, fm) = manager(|_| {});
        fm.upload("/", vec![upload("old.txt", b"old")]).unwrap();

        let replaced = fm.replace("/old.txt", upload("new.txt", b"new")).unwrap();
        assert_eq!(replaced.id, "/new.txt");
        assert!(matches!(fm.get_file("/old.txt"), Err(FmError::NotFound(_))));
        assert_eq!(fm.read_file("/new.txt").unwrap().bytes, b"new");

        let same = fm.replace("/new.txt", upload("new.txt", b"newer")).unwrap();
        assert_eq!(same.attributes.size, 5);
    }

    #[test]
    fn test_edit_and_save() {
        let (_dir, fm) = manager(|_| {});
        fm.upload("/", vec![upload("notes.md", b"# title")]).unwrap();

        let editable = fm.edit_file("/notes.md").unwrap();
        assert_eq!(editable.content, "# title");

        let saved = fm.save_file("/notes.md", "# changed\n").unwrap();
        assert_eq!(saved.attributes.size, 10);
        assert_eq!(fm.edit_file("/notes.md").unwrap().content, "# changed\n");

        fm.upload("/", vec![upload("doc.pdf", b"%PDF")]).unwrap();
        assert!(matches!(
            fm.edit_file("/doc.pdf"),
            Err(FmError::ForbiddenName(_))
        ));
    }

    #[test]
    fn test_download_folder_requires_switch() {
        let (_dir, fm) = manager(|_| {});
        fm.add_folder("/", "docs").unwrap();
        fm.upload("/docs/", vec![upload("a.txt", b"a")]).unwrap();

        assert!(matches!(
            fm.download("/docs/"),
            Err(FmError::ForbiddenDirectoryAction(_))
        ));
        assert!(matches!(fm.download("/"), Err(FmError::RootImmutable)));

        let file = fm.download("/docs/a.txt").unwrap();
        assert_eq!(file.mime, "text/plain");
        assert_eq!(file.bytes, b"a");
    }

    #[test]
    fn test_download_folder_as_zip() {
        let (_dir, fm) = manager(|c| c.security.allow_folder_download = true);
        fm.add_folder("/", "docs").unwrap();
        fm.add_folder("/", "empty").unwrap();
        fm.upload("/docs/", vec![upload("a.txt", b"alpha")]).unwrap();

        let zip = fm.download("/docs").unwrap();
        assert_eq!(zip.file_name, "docs.zip");
        assert_eq!(zip.mime, "application/zip");

        let mut reader = ArchiveReader::open(std::io::Cursor::new(zip.bytes)).unwrap();
        let entries = reader.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(reader.read(entries[0].index, u64::MAX).unwrap().unwrap(), b"alpha");

        assert!(matches!(
            fm.download("/empty/"),
            Err(FmError::DirectoryEmpty(_))
        ));
    }

    #[test]
    fn test_summarize_counts_root() {
        let (_dir, fm) = manager(|_| {});
        fm.add_folder("/", "a").unwrap();
        fm.upload("/a/", vec![upload("x.txt", b"xyz")]).unwrap();

        let summary = fm.summarize().unwrap();
        assert_eq!(summary.kind, "summary");
        assert_eq!(
            summary.attributes,
            TreeSummary {
                files: 1,
                folders: 2,
                size: 3
            }
        );
    }
}
