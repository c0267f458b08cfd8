//! Share-name and file-extension exclusion

use std::collections::HashSet;

/// Lower-cased extension of a file name, without the leading dot
///
/// Only the last segment counts: `archive.TAR.GZ` yields `gz`. A name with
/// no dot yields an empty extension.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) => name[idx + 1..].to_lowercase(),
        None => String::new(),
    }
}

/// Canonical form of a configured extension: trimmed, lower-cased, no dot
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    ext.strip_prefix('.').unwrap_or(ext).to_lowercase()
}

/// Immutable exclusion sets for one run
///
/// Share names are compared exactly as given; extensions are compared
/// lower-cased.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    shares: HashSet<String>,
    extensions: HashSet<String>,
}

impl ExclusionFilter {
    pub fn new<S, E>(shares: S, extensions: E) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            shares: shares.into_iter().map(Into::into).collect(),
            extensions: extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .collect(),
        }
    }

    /// Check if a share should be skipped entirely
    pub fn should_skip_share(&self, name: &str) -> bool {
        self.shares.contains(name)
    }

    /// Check if a file with this extension should be skipped
    pub fn should_skip_file(&self, extension: &str) -> bool {
        if self.extensions.is_empty() {
            return false;
        }
        self.extensions.contains(&extension.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty() && self.extensions.is_empty()
    }
}
