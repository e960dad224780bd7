//! Identity labels and their filesystem-safe normal form.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
    #[error("identity label is empty")]
    Empty,
    #[error("identity label {0:?} has no usable characters")]
    NothingLeft(String),
    #[error("identity label {0:?} is not a valid directory name")]
    NotADirectoryName(String),
}

/// Collapse every non-word character to `_`, squash runs of `_` and trim
/// leading/trailing `_`.
///
/// Word characters are Unicode alphanumerics and `_`. Case is preserved.
/// The function is idempotent.
pub fn normalize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_alphanumeric() || c == '_' { c } else { '_' };
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// A validated identity label, used as both the store key and the corpus
/// directory name.
///
/// New labels are normalised by [`IdentityLabel::parse`]; labels read back
/// from the store go through [`IdentityLabel::existing`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityLabel(String);

impl IdentityLabel {
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LabelError::Empty);
        }
        let normalized = normalize_label(trimmed);
        if normalized.is_empty() {
            return Err(LabelError::NothingLeft(trimmed.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Reuse a label already present in the store, verbatim.
    ///
    /// Corpus directories created before normalisation keep their names, so
    /// the stored label is the directory key and must not be normalised
    /// again. Only labels that cannot name a single directory are rejected.
    pub fn existing(stored: &str) -> Result<Self, LabelError> {
        if stored.trim().is_empty() {
            return Err(LabelError::Empty);
        }
        if stored == "." || stored == ".." || stored.contains(['/', '\\', '\0']) {
            return Err(LabelError::NotADirectoryName(stored.to_string()));
        }
        Ok(Self(stored.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
