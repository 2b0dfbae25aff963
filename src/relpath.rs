//! Validated folder-relative paths and personal-directory name mangling
//!
//! Every file a folder tracks is addressed by a relative path: UTF-8,
//! forward-slash separated, no leading slash, no empty components, no `.` or
//! `..`. Personal-directory entries are flat, so a relative path is mangled
//! into a single directory-entry name by percent-escaping `/` and anything
//! outside a conservative printable-ASCII set. The mangling is bijective and
//! stable.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Result type for path operations
pub type RelPathResult<T> = Result<T, RelPathError>;

/// Errors from path validation, resolution, and demangling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelPathError {
    #[error("invalid relative path {path:?}: {reason}")]
    Invalid { path: String, reason: &'static str },

    #[error("path {0:?} escapes the folder root")]
    EscapesRoot(String),

    #[error("invalid mangled name {0:?}")]
    Demangle(String),
}

/// A validated folder-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath(String);

impl RelativePath {
    /// Validate and wrap a relative path string.
    pub fn new(s: impl Into<String>) -> RelPathResult<Self> {
        let s = s.into();
        let invalid = |reason| RelPathError::Invalid {
            path: s.clone(),
            reason,
        };

        if s.is_empty() {
            return Err(invalid("empty path"));
        }
        if s.starts_with('/') {
            return Err(invalid("leading slash"));
        }
        if s.ends_with('/') {
            return Err(invalid("trailing slash"));
        }
        if s.chars().any(|c| c.is_control()) {
            return Err(invalid("control character"));
        }
        for component in s.split('/') {
            if component.is_empty() {
                return Err(invalid("empty component"));
            }
            if component == "." || component == ".." {
                return Err(invalid("dot component"));
            }
        }
        Ok(Self(s))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The on-disk location of this path under `root`.
    pub fn fs_path(&self, root: &Path) -> PathBuf {
        let mut p = root.to_path_buf();
        for component in self.0.split('/') {
            p.push(component);
        }
        p
    }

    /// Resolve this path under `root`, rejecting symlinks that escape it.
    ///
    /// The deepest existing ancestor of the target is canonicalized and must
    /// stay inside the canonicalized root. The target itself, if it exists
    /// and is a symlink, must also resolve inside the root.
    pub fn resolve_within(&self, root: &Path) -> RelPathResult<PathBuf> {
        let escape = || RelPathError::EscapesRoot(self.0.clone());

        let canonical_root = root.canonicalize().map_err(|_| escape())?;
        let target = self.fs_path(root);

        // Find the deepest ancestor that exists and canonicalize it.
        let mut ancestor = target.as_path();
        let resolved_ancestor = loop {
            match ancestor.canonicalize() {
                Ok(resolved) => break resolved,
                Err(_) => {
                    ancestor = ancestor.parent().ok_or_else(|| escape())?;
                }
            }
        };
        if !resolved_ancestor.starts_with(&canonical_root) {
            return Err(escape());
        }

        Ok(target)
    }

    /// Mangle into a single personal-directory entry name.
    ///
    /// Characters in `[A-Za-z0-9._-]` pass through; everything else
    /// (including `/` and `%`) is escaped as `%xx` per UTF-8 byte.
    pub fn mangle(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'_' || byte == b'-' {
                out.push(byte as char);
            } else {
                out.push('%');
                out.push_str(&format!("{:02x}", byte));
            }
        }
        out
    }

    /// Invert [`RelativePath::mangle`].
    pub fn demangle(name: &str) -> RelPathResult<Self> {
        let err = || RelPathError::Demangle(name.to_string());

        let mut bytes = Vec::with_capacity(name.len());
        let mut chars = name.bytes();
        while let Some(b) = chars.next() {
            if b == b'%' {
                let hi = chars.next().ok_or_else(|| err())?;
                let lo = chars.next().ok_or_else(|| err())?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex).map_err(|_| err())?;
                bytes.push(u8::from_str_radix(hex, 16).map_err(|_| err())?);
            } else if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-' {
                bytes.push(b);
            } else {
                return Err(err());
            }
        }
        let s = String::from_utf8(bytes).map_err(|_| err())?;
        RelativePath::new(s).map_err(|_| err())
    }

    /// The sibling path a conflicting version from `participant` is written
    /// to: `<path>.conflict-<participant>`.
    pub fn conflict_sibling(&self, participant: &str) -> RelativePath {
        // The suffix only appends safe characters to a valid path.
        RelativePath(format!("{}.conflict-{}", self.0, participant))
    }

    /// Whether this path is a conflict sibling produced by the engine.
    pub fn is_conflict_marker(&self) -> bool {
        self.0
            .rsplit('/')
            .next()
            .map(|name| name.contains(".conflict-"))
            .unwrap_or(false)
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RelativePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RelativePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RelativePath::new(s).map_err(serde::de::Error::custom)
    }
}
