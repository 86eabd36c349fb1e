//! VirtualPath - root-relative paths confined to the document root

use crate::{FsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A path as seen by file manager clients
///
/// Invariants (enforced by `parse`):
/// - always starts with `/`
/// - directories end with `/`
/// - no empty, `.` or `..` segments
/// - every segment is a plain file name on the host platform
///
/// Because no segment can climb or re-root the path, joining a VirtualPath onto
/// any base directory always stays inside that directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath {
    raw: String,
}

impl VirtualPath {
    /// The document root itself
    pub fn root() -> Self {
        Self { raw: "/".to_string() }
    }

    /// Normalize and validate caller input
    ///
    /// Repeated separators and `.` segments are collapsed, a missing leading `/`
    /// is added. `..` segments, backslashes and NUL bytes are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(FsError::InvalidPath("empty path".into()));
        }
        if input.contains('\0') || input.contains('\\') {
            return Err(FsError::InvalidPath(input.to_string()));
        }

        let trailing = input.ends_with('/');
        let mut segments = Vec::new();

        for segment in input.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(FsError::InvalidPath(input.to_string())),
                name => {
                    validate_name(name)?;
                    segments.push(name);
                }
            }
        }

        if segments.is_empty() {
            return Ok(Self::root());
        }

        let mut raw = String::with_capacity(input.len() + 2);
        for segment in &segments {
            raw.push('/');
            raw.push_str(segment);
        }
        if trailing {
            raw.push('/');
        }

        Ok(Self { raw })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_root(&self) -> bool {
        self.raw == "/"
    }

    /// Whether the path is in directory form (trailing `/`)
    pub fn is_dir(&self) -> bool {
        self.raw.ends_with('/')
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.raw.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, `None` for the root
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Parent directory (in directory form), `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        let trimmed = self.raw.trim_end_matches('/');
        let cut = trimmed.rfind('/').unwrap_or(0);
        Some(Self {
            raw: trimmed[..=cut].to_string(),
        })
    }

    /// Same path in directory form
    pub fn as_dir(&self) -> Self {
        if self.is_dir() {
            self.clone()
        } else {
            Self {
                raw: format!("{}/", self.raw),
            }
        }
    }

    /// Same path in file form (the root stays `/`)
    pub fn as_file(&self) -> Self {
        if self.is_root() {
            return self.clone();
        }
        Self {
            raw: self.raw.trim_end_matches('/').to_string(),
        }
    }

    /// Append one name below this directory
    pub fn join(&self, name: &str, is_dir: bool) -> Result<Self> {
        validate_name(name)?;

        let mut raw = self.as_dir().raw;
        raw.push_str(name);
        if is_dir {
            raw.push('/');
        }
        Ok(Self { raw })
    }

    pub fn join_file(&self, name: &str) -> Result<Self> {
        self.join(name, false)
    }

    pub fn join_dir(&self, name: &str) -> Result<Self> {
        self.join(name, true)
    }

    /// Segment-wise prefix test (`/a/b` is inside `/a/`, `/ab` is not)
    pub fn starts_with(&self, other: &VirtualPath) -> bool {
        let mut mine = self.segments();
        other.segments().all(|segment| mine.next() == Some(segment))
    }

    /// Relative host path built from the segments
    pub fn to_relative(&self) -> PathBuf {
        self.segments().collect()
    }

    /// Host path of this entry below `base`
    pub fn resolve_under(&self, base: &Path) -> PathBuf {
        base.join(self.to_relative())
    }
}

/// Check that `name` is a single plain path component
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidPath(name.to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(FsError::InvalidPath(name.to_string()));
    }

    // Catches drive prefixes and other platform-specific root components
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(FsError::InvalidPath(name.to_string())),
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = FsError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for VirtualPath {
    type Error = FsError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<VirtualPath> for String {
    fn from(path: VirtualPath) -> Self {
        path.raw
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_separators() {
        assert_eq!(VirtualPath::parse("//a///b/").unwrap().as_str(), "/a/b/");
        assert_eq!(VirtualPath::parse("a/./b.txt").unwrap().as_str(), "/a/b.txt");
        assert_eq!(VirtualPath::parse("/").unwrap(), VirtualPath::root());
        assert_eq!(VirtualPath::parse("///").unwrap(), VirtualPath::root());
    }

    #[test]
    fn test_rejects_traversal() {
        for input in ["", "/../etc/passwd", "/a/../../b", "..", "/a/..", "/a\\..\\b", "/a\0b"] {
            assert!(VirtualPath::parse(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_dotted_names_are_not_traversal() {
        let path = VirtualPath::parse("/a..b/..c/file..txt").unwrap();
        assert_eq!(path.as_str(), "/a..b/..c/file..txt");
    }

    #[test]
    fn test_resolution_stays_under_root() {
        let root = Path::new("/srv/files");
        let inputs = [
            "/docs/a.txt",
            "docs//b/",
            "/./x",
            "/%2e%2e/secret",
            "/....//x",
            "/etc/passwd",
        ];

        for input in inputs {
            let path = VirtualPath::parse(input).unwrap();
            let resolved = path.resolve_under(root);
            assert!(resolved.starts_with(root), "{} escaped to {:?}", input, resolved);
            assert!(resolved
                .components()
                .all(|c| !matches!(c, Component::ParentDir)));
        }
    }

    #[test]
    fn test_parent_and_name() {
        let file = VirtualPath::parse("/a/b/c.jpg").unwrap();
        assert_eq!(file.name(), Some("c.jpg"));
        assert_eq!(file.parent().unwrap().as_str(), "/a/b/");

        let dir = VirtualPath::parse("/a/b/").unwrap();
        assert_eq!(dir.name(), Some("b"));
        assert_eq!(dir.parent().unwrap().as_str(), "/a/");

        let top = VirtualPath::parse("/a").unwrap();
        assert_eq!(top.parent().unwrap(), VirtualPath::root());
        assert!(VirtualPath::root().parent().is_none());
        assert!(VirtualPath::root().name().is_none());
    }

    #[test]
    fn test_join() {
        let dir = VirtualPath::parse("/photos").unwrap();
        assert_eq!(dir.join_file("x.png").unwrap().as_str(), "/photos/x.png");
        assert_eq!(dir.join_dir("2024").unwrap().as_str(), "/photos/2024/");
        assert!(dir.join_file("../x").is_err());
        assert!(dir.join_file("a/b").is_err());
        assert!(dir.join_file("").is_err());
    }

    #[test]
    fn test_starts_with_is_segment_wise() {
        let a = VirtualPath::parse("/a/").unwrap();
        assert!(VirtualPath::parse("/a/b").unwrap().starts_with(&a));
        assert!(VirtualPath::parse("/a").unwrap().starts_with(&a));
        assert!(!VirtualPath::parse("/ab").unwrap().starts_with(&a));
        assert!(a.starts_with(&VirtualPath::root()));
    }

    #[test]
    fn test_dir_and_file_forms() {
        let path = VirtualPath::parse("/a/b").unwrap();
        assert!(!path.is_dir());
        assert_eq!(path.as_dir().as_str(), "/a/b/");
        assert_eq!(path.as_dir().as_file(), path);
        assert_eq!(VirtualPath::root().as_file(), VirtualPath::root());
    }
}
