//! Repository paths.
//!
//! A [`RepoPath`] is a forward-slash-separated relative path. It never
//! contains `.` or `..` components, empty components, a leading or
//! trailing slash, or a platform volume prefix. Platform paths are
//! normalised to this form on ingress.

use std::path::Component;
use thiserror::Error;

/// Errors from path validation and normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path violates a [`RepoPath`] invariant.
    #[error("invalid path {path:?}: {reason}")]
    Invalid {
        /// The offending path text.
        path: String,
        /// Which invariant failed.
        reason: &'static str,
    },
}

fn invalid(path: &str, reason: &'static str) -> PathError {
    PathError::Invalid { path: path.to_string(), reason }
}

/// A validated repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoPath(String);

impl RepoPath {
    /// Validate `path` as a repository path.
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        if path.is_empty() {
            return Err(invalid(&path, "empty"));
        }
        if path.starts_with('/') {
            return Err(invalid(&path, "absolute"));
        }
        if path.ends_with('/') {
            return Err(invalid(&path, "trailing slash"));
        }
        if path.contains('\\') {
            return Err(invalid(&path, "backslash separator"));
        }
        if path.contains('\0') {
            return Err(invalid(&path, "NUL byte"));
        }
        for component in path.split('/') {
            match component {
                "" => return Err(invalid(&path, "redundant separator")),
                "." | ".." => return Err(invalid(&path, "relative component")),
                c if c.contains(':') => return Err(invalid(&path, "volume prefix")),
                _ => {}
            }
        }
        Ok(Self(path))
    }

    /// Normalise a platform path on ingress. `.` components are
    /// dropped; anything absolute, prefixed, or parent-relative is
    /// rejected.
    pub fn from_platform(path: &std::path::Path) -> Result<Self, PathError> {
        let display = path.display().to_string();
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(c) => match c.to_str() {
                    Some(c) => components.push(c),
                    None => return Err(invalid(&display, "not valid unicode")),
                },
                Component::CurDir => {}
                Component::ParentDir => return Err(invalid(&display, "relative component")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid(&display, "absolute"))
                }
            }
        }
        Self::new(components.join("/"))
    }

    /// The path text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().expect("validated paths are non-empty")
    }

    /// The parent path, or `None` at the top level.
    pub fn parent(&self) -> Option<RepoPath> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Append a single component.
    pub fn join(&self, component: &str) -> Result<RepoPath, PathError> {
        if component.contains('/') {
            return Err(invalid(component, "not a single component"));
        }
        Self::new(format!("{}/{component}", self.0))
    }
}

impl std::fmt::Display for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RepoPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_relative_paths() {
        for p in ["a", "a/b", "a/b/c.txt", "with space/x", ".hidden/file"] {
            assert!(RepoPath::new(p).is_ok(), "{p}");
        }
    }

    #[test]
    fn rejects_invalid_paths() {
        for p in ["", "/abs", "a/", "a//b", "./a", "a/./b", "../a", "a/..", "C:/x", "a\\b"] {
            assert!(RepoPath::new(p).is_err(), "{p}");
        }
    }

    #[test]
    fn platform_normalisation() {
        let p = RepoPath::from_platform(std::path::Path::new("a/./b/c")).unwrap();
        assert_eq!(p.as_str(), "a/b/c");
        assert!(RepoPath::from_platform(std::path::Path::new("/abs")).is_err());
        assert!(RepoPath::from_platform(std::path::Path::new("a/../b")).is_err());
    }

    #[test]
    fn parent_and_file_name() {
        let p = RepoPath::new("a/b/c.txt").unwrap();
        assert_eq!(p.file_name(), "c.txt");
        let parent = p.parent().unwrap();
        assert_eq!(parent.as_str(), "a/b");
        assert_eq!(parent.parent().unwrap().as_str(), "a");
        assert!(parent.parent().unwrap().parent().is_none());
    }

    #[test]
    fn join_component() {
        let p = RepoPath::new("a").unwrap();
        assert_eq!(p.join("b").unwrap().as_str(), "a/b");
        assert!(p.join("..").is_err());
        assert!(p.join("x/y").is_err());
    }
}
