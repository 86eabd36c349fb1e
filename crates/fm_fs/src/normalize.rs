//! Normalization of user-supplied file and folder names

use unicode_normalization::UnicodeNormalization;

/// Name normalization switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NameNormalizer {
    /// Replace whitespace with `_` and decompose Unicode (NFD)
    pub normalize_filename: bool,
    /// After decomposition, drop everything except ASCII word characters and `-`
    pub chars_latin_only: bool,
}

impl NameNormalizer {
    pub fn new(normalize_filename: bool, chars_latin_only: bool) -> Self {
        Self {
            normalize_filename,
            chars_latin_only,
        }
    }

    /// Normalize a whole name (folders, renamed entries)
    pub fn normalize(&self, input: &str) -> String {
        if !self.normalize_filename {
            return input.to_string();
        }

        let mut result = String::with_capacity(input.len());
        for c in input.nfd() {
            if c.is_whitespace() || c.is_control() {
                result.push('_');
            } else if !self.chars_latin_only || is_latin_word_char(c) {
                result.push(c);
            }
        }

        result
    }

    /// Normalize a file name, keeping its extension out of the latin-only filter
    pub fn normalize_file_name(&self, input: &str) -> String {
        let (stem, extension) = split_extension(input);
        let stem = self.normalize(stem);

        match extension {
            Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
            _ => stem,
        }
    }
}

/// `\w` in the ASCII sense, plus `-`
fn is_latin_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Split `name` at its last dot
///
/// A leading dot does not start an extension here, so `.profile` has none.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}

/// Strip any client-side directory from an uploaded file name
pub fn base_name(submitted: &str) -> &str {
    submitted
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(submitted)
}
