use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::utils::command;

const SHORT_REVISION_LEN: usize = 7;
/// Docker caps tags at 128 characters.
const MAX_TAG_LEN: usize = 128;

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Image tag identifying one build's artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VersionLabel(String);

impl VersionLabel {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::validation_invalid_argument(
                "version",
                "Version label cannot be empty",
                None,
                None,
            ));
        }
        let leads_ok = value
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if !leads_ok || !value.chars().all(is_tag_char) || value.len() > MAX_TAG_LEN {
            return Err(Error::validation_invalid_argument(
                "version",
                "Version label must be a valid image tag: [A-Za-z0-9_][A-Za-z0-9_.-]*, at most 128 characters",
                Some(value),
                None,
            ));
        }
        Ok(Self(value))
    }

    /// `<build counter>-<short revision>`, the label CI stamps on every image.
    pub fn from_build(build_number: u64, revision: &str) -> Result<Self> {
        let revision = revision.trim();
        if revision.is_empty() {
            return Err(Error::validation_invalid_argument(
                "revision",
                "Revision hash cannot be empty",
                None,
                None,
            ));
        }
        let short: String = revision.chars().take(SHORT_REVISION_LEN).collect();
        Self::new(format!("{}-{}", build_number, short))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VersionLabel {
    fn default() -> Self {
        Self("latest".to_string())
    }
}

impl FromStr for VersionLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Revision of the checked-out working tree.
pub fn current_revision() -> Result<String> {
    command::run("git", &["rev-parse", "HEAD"], "git rev-parse")
}
