//! File manager configuration

use crate::{FmError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main file manager configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FmConfig {
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub upload: UploadConfig,
    pub images: ImagesConfig,
    pub edit: EditConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory; the thumbnail directory lives below it too
    pub server_root: PathBuf,
    /// Document root, relative to `server_root`
    pub file_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            server_root: PathBuf::from("."),
            file_root: PathBuf::from("userfiles"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub read_only: bool,
    pub allow_folder_download: bool,
    pub normalize_filename: bool,
    pub chars_latin_only: bool,
    pub extensions: ExtensionsConfig,
    pub patterns: PatternsConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_folder_download: false,
            normalize_filename: true,
            chars_latin_only: false,
            extensions: ExtensionsConfig::default(),
            patterns: PatternsConfig::default(),
        }
    }
}

/// Whether a list names what is permitted or what is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListPolicy {
    #[serde(rename = "ALLOW_LIST")]
    AllowList,
    #[serde(rename = "DISALLOW_LIST")]
    DisallowList,
}

impl ListPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ListPolicy::AllowList => "ALLOW_LIST",
            ListPolicy::DisallowList => "DISALLOW_LIST",
        }
    }

    /// Apply the policy to a membership test
    pub fn permits(self, listed: bool) -> bool {
        match self {
            ListPolicy::AllowList => listed,
            ListPolicy::DisallowList => !listed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub policy: ListPolicy,
    /// Lower-case extensions without the dot; `""` stands for "no extension"
    pub restrictions: Vec<String>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            policy: ListPolicy::AllowList,
            restrictions: strings(&[
                "", "jpg", "jpe", "jpeg", "gif", "png", "svg", "txt", "pdf", "odp", "ods", "odt",
                "rtf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "ogv", "avi", "mkv",
                "mp4", "webm", "m4v", "ogg", "mp3", "wav", "zip", "md",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    pub policy: ListPolicy,
    /// Regexes matched against the whole file name
    pub file: Vec<String>,
    /// Regexes matched against the whole folder name
    pub folder: Vec<String>,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            policy: ListPolicy::DisallowList,
            file: strings(&[r"\..*", r"Thumbs\.db"]),
            folder: strings(&[r"\..*", "_thumbs"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes, or a string with a K/M/G suffix; unset means unlimited
    pub file_size_limit: Option<SizeLimit>,
}

/// Upload size limit as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeLimit {
    Bytes(u64),
    Text(String),
}

impl SizeLimit {
    /// Resolve to a byte count
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            SizeLimit::Bytes(n) => Ok(*n),
            SizeLimit::Text(text) => parse_size(text),
        }
    }
}

/// Parse `"512"`, `"64K"`, `"10M"`, `"2G"` (case-insensitive, optional `B`)
pub fn parse_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    let upper = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, multiplier) = match upper.chars().last() {
        Some('K') => (&upper[..upper.len() - 1], 1024),
        Some('M') => (&upper[..upper.len() - 1], 1024 * 1024),
        Some('G') => (&upper[..upper.len() - 1], 1024 * 1024 * 1024),
        _ => (upper, 1),
    };

    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| FmError::Config(format!("Invalid upload size limit: {:?}", text)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub extensions: Vec<String>,
    pub thumbnail: ThumbnailConfig,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            extensions: strings(&["jpg", "jpeg", "gif", "png", "webp", "bmp"]),
            thumbnail: ThumbnailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    /// Relative to `storage.server_root`
    pub dir: PathBuf,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("_thumbs"),
            max_width: 64,
            max_height: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    pub extensions: Vec<String>,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            extensions: strings(&[
                "txt", "md", "csv", "json", "html", "css", "js", "xml", "log",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl FmConfig {
    /// Load configuration from a TOML file, defaults if it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&content)?;
            tracing::info!("Configuration loaded from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FmError::Config(e.to_string()))
    }

    /// Default configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "FileManager", "FileManager")
            .map(|dirs| dirs.config_dir().join("filemanager.toml"))
            .unwrap_or_else(|| PathBuf::from("./filemanager.toml"))
    }

    /// Merge per-instance string options over this configuration
    ///
    /// Keys are dotted paths (`security.read_only`, `images.thumbnail.max_width`).
    /// Values are coerced to the type the key already has: booleans and integers
    /// are parsed, lists are split on `,`. Unknown keys are rejected.
    pub fn with_options(&self, options: &BTreeMap<String, String>) -> Result<Self> {
        if options.is_empty() {
            return Ok(self.clone());
        }

        let mut tree =
            toml::Value::try_from(self).map_err(|e| FmError::Config(e.to_string()))?;

        for (key, raw) in options {
            let slot = lookup_mut(&mut tree, key)
                .ok_or_else(|| FmError::Config(format!("Unknown option: {}", key)))?;
            *slot = coerce_option(key, slot, raw)?;
        }

        tree.try_into()
            .map_err(|e: toml::de::Error| FmError::Config(e.to_string()))
    }

    pub fn document_root(&self) -> PathBuf {
        self.storage.server_root.join(&self.storage.file_root)
    }

    pub fn thumbnail_root(&self) -> PathBuf {
        self.storage.server_root.join(&self.images.thumbnail.dir)
    }
}

fn lookup_mut<'a>(tree: &'a mut toml::Value, key: &str) -> Option<&'a mut toml::Value> {
    let mut node = tree;
    let mut parts = key.split('.').peekable();

    while let Some(part) = parts.next() {
        let table = node.as_table_mut()?;
        if parts.peek().is_none() {
            // Unset optional values are absent from the serialized tree
            if !table.contains_key(part) && is_known_optional(key) {
                table.insert(part.to_string(), toml::Value::String(String::new()));
            }
            return table.get_mut(part);
        }
        node = table.get_mut(part)?;
    }

    None
}

fn is_known_optional(key: &str) -> bool {
    key == "upload.file_size_limit"
}

fn coerce_option(key: &str, current: &toml::Value, raw: &str) -> Result<toml::Value> {
    let invalid = || FmError::Config(format!("Invalid value for {}: {:?}", key, raw));

    let value = match current {
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.trim().parse().map_err(|_| invalid())?),
        toml::Value::Integer(_) => toml::Value::Integer(raw.trim().parse().map_err(|_| invalid())?),
        toml::Value::Array(_) => toml::Value::Array(
            raw.split(',')
                .map(|item| toml::Value::String(item.trim().to_string()))
                .collect(),
        ),
        toml::Value::Table(_) => return Err(invalid()),
        _ => match raw.trim().parse::<i64>() {
            Ok(n) if is_known_optional(key) => toml::Value::Integer(n),
            _ => toml::Value::String(raw.to_string()),
        },
    };

    Ok(value)
}
