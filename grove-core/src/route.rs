//! Normalized hierarchical routes addressing items and files

use crate::GroveError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::Path;

/// Placeholder substituted for runs of whitespace
const WHITESPACE_PLACEHOLDER: char = '+';

/// An immutable, normalized route such as `docs/getting+started`.
///
/// The root route has the empty string as its value and level 0.
/// Two routes are equal iff their normalized values are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Route {
    value: String,
}

impl Route {
    /// The root route (level 0)
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize an arbitrary request path into a route.
    /// An empty path yields the root route.
    pub fn new(path: &str) -> Self {
        Self {
            value: normalize(path),
        }
    }

    /// Route for an item whose document lives at `path`: strips the
    /// repository root and the trailing file name.
    pub fn from_file_path(root: &Path, path: &Path) -> crate::Result<Self> {
        let relative = relative_to(root, path)?;
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self::new(&parent.to_string_lossy()))
    }

    /// Route for an item backed by the directory `dir`
    pub fn from_directory(root: &Path, dir: &Path) -> crate::Result<Self> {
        let relative = relative_to(root, dir)?;
        Ok(Self::new(&relative.to_string_lossy()))
    }

    /// Route of a file relative to the repository root, file name included
    pub fn from_relative_path(root: &Path, path: &Path) -> crate::Result<Self> {
        Self::from_directory(root, path)
    }

    /// Canonical string form, used as map key
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Path components; empty for the root route
    pub fn components(&self) -> Vec<&str> {
        if self.value.is_empty() {
            Vec::new()
        } else {
            self.value.split('/').collect()
        }
    }

    /// Number of components
    pub fn level(&self) -> usize {
        if self.value.is_empty() {
            0
        } else {
            self.value.split('/').count()
        }
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    /// Last component, `None` for the root route
    pub fn name(&self) -> Option<&str> {
        if self.value.is_empty() {
            return None;
        }
        self.value.rsplit('/').next()
    }

    /// The route with the last component removed; `None` at the root
    pub fn parent(&self) -> Option<Route> {
        if self.value.is_empty() {
            return None;
        }
        let parent = match self.value.rfind('/') {
            Some(pos) => &self.value[..pos],
            None => "",
        };
        Some(Self {
            value: parent.to_string(),
        })
    }

    /// Append one component
    pub fn join(&self, component: &str) -> Route {
        if self.value.is_empty() {
            Self::new(component)
        } else {
            Self::new(&format!("{}/{}", self.value, component))
        }
    }

    /// True iff `self` is exactly `other` plus one trailing component
    pub fn is_child_of(&self, other: &Route) -> bool {
        self.parent().as_ref() == Some(other)
    }

    /// True iff `other` is exactly `self` plus one trailing component
    pub fn is_parent_of(&self, other: &Route) -> bool {
        other.is_child_of(self)
    }

    /// True when `self` equals `ancestor` or lies anywhere below it
    pub fn is_descendant_of(&self, ancestor: &Route) -> bool {
        if ancestor.value.is_empty() || self.value == ancestor.value {
            return true;
        }
        self.value.len() > ancestor.value.len()
            && self.value.starts_with(&ancestor.value)
            && self.value.as_bytes()[ancestor.value.len()] == b'/'
    }

    /// Suffix/equality test used to resolve relative links against routes,
    /// e.g. `files/image.png` matches `docs/post/files/image.png`.
    pub fn is_match(&self, candidate: &str) -> bool {
        let candidate = normalize(candidate);
        if candidate.is_empty() {
            return self.value.is_empty();
        }
        if self.value == candidate {
            return true;
        }
        self.value.len() > candidate.len()
            && self.value.ends_with(&candidate)
            && self.value.as_bytes()[self.value.len() - candidate.len() - 1] == b'/'
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.value)
    }
}

impl From<String> for Route {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.value
    }
}

/// Normalize a raw path into canonical route form.
///
/// Rules, in order: trim whitespace, backslashes become slashes, repeated
/// slashes collapse, leading/trailing slashes are stripped, and runs of
/// whitespace collapse into a single `+`.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim().replace('\\', "/");

    let mut collapsed = String::with_capacity(trimmed.len());
    let mut prev_slash = false;
    for c in trimmed.chars() {
        if c == '/' {
            if !prev_slash {
                collapsed.push(c);
            }
            prev_slash = true;
        } else {
            collapsed.push(c);
            prev_slash = false;
        }
    }

    let stripped = collapsed.trim_matches('/');

    let mut out = String::with_capacity(stripped.len());
    let mut in_whitespace = false;
    for c in stripped.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push(WHITESPACE_PLACEHOLDER);
            }
            in_whitespace = true;
        } else {
            out.push(c);
            in_whitespace = false;
        }
    }
    out
}

fn relative_to<'a>(root: &Path, path: &'a Path) -> crate::Result<&'a Path> {
    path.strip_prefix(root).map_err(|_| {
        GroveError::InvalidPath(format!(
            "{} is not inside {}",
            path.display(),
            root.display()
        ))
    })
}
