//! Remote path handling.

use std::fmt;

use thiserror::Error;

/// Error returned when parsing a [`RemotePath`] fails.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PathParseError {
    /// The input did not start with `/`.
    #[error("remote path '{0}' is not absolute")]
    NotAbsolute(String),
    /// A segment was `.` or `..`.
    #[error("remote path '{0}' contains a relative segment")]
    RelativeSegment(String),
}

/// An absolute, normalized path on the remote server.
///
/// Stored as its segments; empty segments collapse during parsing, so
/// `/a//b/` and `/a/b` compare equal. Relative segments are rejected; the
/// control socket only ever works with resolved paths.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RemotePath {
    segments: Vec<String>,
}

impl RemotePath {
    /// The root directory `/`.
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses an absolute path.
    pub fn parse(input: &str) -> Result<Self, PathParseError> {
        if !input.starts_with('/') {
            return Err(PathParseError::NotAbsolute(input.to_owned()));
        }
        let mut segments = Vec::new();
        for segment in input.split('/') {
            match segment {
                "" => continue,
                "." | ".." => return Err(PathParseError::RelativeSegment(input.to_owned())),
                other => segments.push(other.to_owned()),
            }
        }
        Ok(Self { segments })
    }

    /// Returns `true` for the root directory.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the last segment, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the parent directory; `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns a child of this directory.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_owned());
        Self { segments }
    }

    /// Returns `true` if `self` is an ancestor of `other`.
    ///
    /// With `allow_equal`, a path counts as its own ancestor.
    #[must_use]
    pub fn is_parent_of(&self, other: &Self, allow_equal: bool) -> bool {
        if self.segments.len() > other.segments.len() {
            return false;
        }
        if self.segments.len() == other.segments.len() && !allow_equal {
            return false;
        }
        self.segments
            .iter()
            .zip(&other.segments)
            .all(|(a, b)| a == b)
    }

    /// Renders the path as a string.
    #[must_use]
    pub fn path(&self) -> String {
        if self.segments.is_empty() {
            "/".to_owned()
        } else {
            let mut out = String::new();
            for segment in &self.segments {
                out.push('/');
                out.push_str(segment);
            }
            out
        }
    }

    /// Renders a file inside this directory, for user-visible messages.
    #[must_use]
    pub fn format_filename(&self, name: &str) -> String {
        if self.segments.is_empty() {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path())
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let path = RemotePath::parse("/a//b/").unwrap();
        assert_eq!(path.path(), "/a/b");
        assert_eq!(path, RemotePath::parse("/a/b").unwrap());
    }

    #[test]
    fn rejects_relative_input() {
        assert!(matches!(
            RemotePath::parse("a/b"),
            Err(PathParseError::NotAbsolute(_))
        ));
        assert!(matches!(
            RemotePath::parse("/a/../b"),
            Err(PathParseError::RelativeSegment(_))
        ));
    }

    #[test]
    fn parent_and_join_round_trip() {
        let path = RemotePath::parse("/pub/incoming").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.path(), "/pub");
        assert_eq!(parent.join("incoming"), path);
        assert!(RemotePath::root().parent().is_none());
    }

    #[test]
    fn ancestor_checks() {
        let a = RemotePath::parse("/a").unwrap();
        let ab = RemotePath::parse("/a/b").unwrap();
        assert!(a.is_parent_of(&ab, false));
        assert!(!ab.is_parent_of(&a, false));
        assert!(!a.is_parent_of(&a, false));
        assert!(a.is_parent_of(&a, true));
        assert!(RemotePath::root().is_parent_of(&ab, false));
    }

    #[test]
    fn formats_filenames() {
        let path = RemotePath::parse("/pub").unwrap();
        assert_eq!(path.format_filename("x.txt"), "/pub/x.txt");
        assert_eq!(RemotePath::root().format_filename("x"), "/x");
    }
}
