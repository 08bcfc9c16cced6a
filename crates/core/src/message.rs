//! User-visible diagnostics as values.
//!
//! The control socket never writes to a sink directly; it produces [`Message`]
//! values that travel through the notification queue so the embedding
//! application decides where they end up. Tests assert on the exact wording.

use std::fmt;

/// Severity of a user-visible message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Severity {
    /// Progress and success notices.
    Status,
    /// Failures shown to the user.
    Error,
}

impl Severity {
    /// Returns the lowercase label used when rendering the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user-visible diagnostic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Message severity.
    pub severity: Severity,
    /// Rendered text, already localization-free.
    pub text: String,
}

impl Message {
    /// Creates a status message.
    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Status,
            text: text.into(),
        }
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.text)
    }
}
