// SPDX-License-Identifier: Apache-2.0

//! Unit-of-work identifiers.
//!
//! Subject and session ids are stored without their `sub-` / `ses-` prefixes
//! and rendered with them. Ordering is the natural sort of the original
//! strings, so `sub-2` sorts before `sub-10`.

use std::cmp::Ordering;
use std::fmt;

/// Directory prefix for subjects in a BIDS dataset.
pub const SUBJECT_PREFIX: &str = "sub-";

/// Directory prefix for sessions in a BIDS dataset.
pub const SESSION_PREFIX: &str = "ses-";

/// The atomic scheduling granularity: a subject, or a (subject, session)
/// pair when the pipeline is session-aware.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId {
    subject: String,
    session: Option<String>,
}

fn strip(raw: &str, prefix: &str) -> String {
    raw.strip_prefix(prefix).unwrap_or(raw).to_owned()
}

impl UnitId {
    /// Creates a subject-level unit. The id may carry the `sub-` prefix.
    #[must_use]
    pub fn subject(raw: &str) -> Self {
        Self {
            subject: strip(raw.trim(), SUBJECT_PREFIX),
            session: None,
        }
    }

    /// Creates a (subject, session) unit. Both ids may carry their prefixes.
    #[must_use]
    pub fn with_session(subject: &str, session: &str) -> Self {
        Self {
            subject: strip(subject.trim(), SUBJECT_PREFIX),
            session: Some(strip(session.trim(), SESSION_PREFIX)),
        }
    }

    /// Parses a rendered label such as `sub-001`, `sub-001_ses-01`, or a
    /// bare `001`.
    #[must_use]
    pub fn parse_label(label: &str) -> Self {
        match label.split_once("_ses-") {
            Some((subject, session)) => Self::with_session(subject, session),
            None => Self::subject(label),
        }
    }

    /// The subject id without the `sub-` prefix.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject
    }

    /// The session id without the `ses-` prefix, if this unit is
    /// session-scoped.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// The rendered form, e.g. `sub-001` or `sub-001_ses-01`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.session {
            Some(session) => format!("{SUBJECT_PREFIX}{}_{SESSION_PREFIX}{session}", self.subject),
            None => format!("{SUBJECT_PREFIX}{}", self.subject),
        }
    }

    /// The subject directory name, e.g. `sub-001`, regardless of session.
    #[must_use]
    pub fn subject_dir(&self) -> String {
        format!("{SUBJECT_PREFIX}{}", self.subject)
    }

    /// The session directory name, e.g. `ses-01`, when session-scoped.
    #[must_use]
    pub fn session_dir(&self) -> Option<String> {
        self.session
            .as_ref()
            .map(|session| format!("{SESSION_PREFIX}{session}"))
    }

    /// The prefix-free form used in marker and log file names, e.g. `001`
    /// or `001_01`.
    #[must_use]
    pub fn bare(&self) -> String {
        match &self.session {
            Some(session) => format!("{}_{session}", self.subject),
            None => self.subject.clone(),
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Ord for UnitId {
    fn cmp(&self, other: &Self) -> Ordering {
        natord::compare(&self.subject, &other.subject).then_with(|| {
            match (&self.session, &other.session) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => natord::compare(a, b),
            }
        })
    }
}

impl PartialOrd for UnitId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
