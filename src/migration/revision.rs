//! Revision extraction
//!
//! The migration tool only reports its state as human-readable text. Everything
//! that depends on the shape of that text lives here; the rest of the crate sees
//! a [`RevisionSet`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static REVISION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)Revision ID: (.*)$").expect("revision pattern is valid"));

/// A single optional revision identifier: the scripts' head or the database's
/// applied revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionSet(Option<String>);

impl RevisionSet {
    pub fn new(revision: Option<String>) -> Self {
        Self(revision)
    }

    pub fn absent() -> Self {
        Self(None)
    }

    pub fn revision(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    /// Both absent, or both present and equal
    pub fn is_in_sync_with(&self, other: &RevisionSet) -> bool {
        self.0 == other.0
    }
}

impl fmt::Display for RevisionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(revision) => f.write_str(revision),
            None => f.write_str("<none>"),
        }
    }
}

/// Return the value of the first `Revision ID: <value>` line in `text`.
///
/// Later matches are ignored. A blank value is an empty revision, not an absent one.
pub fn extract_revision(text: &str) -> RevisionSet {
    let revision = REVISION_ID
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().trim().to_string());

    RevisionSet(revision)
}
