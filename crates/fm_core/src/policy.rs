//! Name policy: extension lists, name patterns and read-only mode

use crate::config::{FmConfig, ListPolicy};
use crate::{FmError, Result};
use regex::RegexSet;
use std::collections::HashSet;

/// Lower-cased extension set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet(HashSet<String>);

impl ExtensionSet {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            items
                .into_iter()
                .map(|s| s.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        )
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(&extension.to_lowercase())
    }

    /// Test the extension of a file name
    pub fn contains_name(&self, name: &str) -> bool {
        self.contains(&extension_of(name))
    }

    /// Sorted entries, for reporting
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut items: Vec<_> = self.0.iter().cloned().collect();
        items.sort();
        items
    }
}

/// Substring after the last `.`, lower-cased, empty if there is none
pub fn extension_of(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Compiled patterns of one list, each anchored to the whole name
#[derive(Debug, Clone)]
struct PatternList {
    set: RegexSet,
}

impl PatternList {
    fn compile(patterns: &[String], what: &str) -> Result<Self> {
        let anchored: Vec<String> = patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| format!("^(?:{})$", p))
            .collect();

        let set = RegexSet::new(&anchored).map_err(|e| {
            FmError::Config(format!("Invalid {} pattern: {}", what, e))
        })?;
        Ok(Self { set })
    }

    fn matches(&self, name: &str) -> bool {
        self.set.is_match(name)
    }
}

/// Decides which names are permitted and whether mutation is allowed
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    read_only: bool,
    extension_policy: ListPolicy,
    extensions: ExtensionSet,
    pattern_policy: ListPolicy,
    file_patterns: PatternList,
    folder_patterns: PatternList,
    images: ExtensionSet,
    editable: ExtensionSet,
}

impl PolicyEvaluator {
    /// Compile the policy; malformed patterns fail with `Config`
    pub fn new(config: &FmConfig) -> Result<Self> {
        let security = &config.security;

        Ok(Self {
            read_only: security.read_only,
            extension_policy: security.extensions.policy,
            extensions: ExtensionSet::new(&security.extensions.restrictions),
            pattern_policy: security.patterns.policy,
            file_patterns: PatternList::compile(&security.patterns.file, "file")?,
            folder_patterns: PatternList::compile(&security.patterns.folder, "folder")?,
            images: ExtensionSet::new(&config.images.extensions),
            editable: ExtensionSet::new(&config.edit.extensions),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_extension_allowed(&self, name: &str) -> bool {
        self.extension_policy
            .permits(self.extensions.contains_name(name))
    }

    pub fn is_name_allowed(&self, name: &str, is_dir: bool) -> bool {
        let patterns = if is_dir {
            &self.folder_patterns
        } else {
            &self.file_patterns
        };
        self.pattern_policy.permits(patterns.matches(name))
    }

    pub fn assert_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(FmError::ReadOnly);
        }
        Ok(())
    }

    /// Extension check (files only) and pattern check
    pub fn check_restrictions(&self, name: &str, is_dir: bool) -> Result<()> {
        if !is_dir && !self.is_extension_allowed(name) {
            return Err(FmError::ForbiddenName(name.to_string()));
        }
        if !self.is_name_allowed(name, is_dir) {
            return Err(FmError::ForbiddenName(name.to_string()));
        }
        Ok(())
    }

    pub fn is_image(&self, name: &str) -> bool {
        self.images.contains_name(name)
    }

    pub fn is_editable(&self, name: &str) -> bool {
        self.editable.contains_name(name)
    }

    pub fn images(&self) -> &ExtensionSet {
        &self.images
    }

    pub fn extension_policy(&self) -> ListPolicy {
        self.extension_policy
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }
}
