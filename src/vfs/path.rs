//! Normalized virtual paths.

use std::fmt;
use std::ops::Add;

/// An immutable, normalized path inside a virtual filesystem.
///
/// Empty segments and `.` are dropped, `..` removes the previous segment.
/// At the root `..` is discarded; in a relative path with nothing left to
/// remove it is kept so the path can still be resolved later. Both `/` and
/// `\` are accepted as separators on input; `/` is used on output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path {
    absolute: bool,
    segments: Vec<String>,
}

impl Path {
    /// The root directory, `/`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// Parse and normalize `s`.
    pub fn new(s: &str) -> Self {
        let mut path = Self {
            absolute: s.starts_with(['/', '\\']),
            segments: Vec::new(),
        };
        path.push_all(s);
        path
    }

    fn push_all(&mut self, s: &str) {
        for seg in s.split(['/', '\\']) {
            match seg {
                "" | "." => {}
                ".." => {
                    if self.segments.last().is_some_and(|last| last != "..") {
                        self.segments.pop();
                    } else if !self.absolute {
                        self.segments.push(seg.to_owned());
                    }
                }
                _ => self.segments.push(seg.to_owned()),
            }
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path with its last segment removed.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            absolute: self.absolute,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append `rel` (which may hold several segments) to this path.
    pub fn join(&self, rel: &str) -> Path {
        let mut out = self.clone();
        out.push_all(rel);
        out
    }

    /// Resolve `other` against this path: absolute paths win, relative paths
    /// are appended.
    pub fn resolve(&self, other: &Path) -> Path {
        if other.absolute {
            return other.clone();
        }
        let mut out = self.clone();
        for seg in &other.segments {
            out.push_all(seg);
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        } else if self.segments.is_empty() {
            return write!(f, ".");
        }
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Add<&str> for &Path {
    type Output = Path;

    fn add(self, rel: &str) -> Path {
        self.join(rel)
    }
}
