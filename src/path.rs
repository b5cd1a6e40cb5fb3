//! Virtual path handling shared by [`crate::rename_store`] and [`crate::resolver`].
//!
//! A [`VirtualPath`] is a `\`-delimited sequence of name components, matching
//! the wire shape used throughout the original MergeFS source tree. Root is
//! the empty component list.

use std::fmt;

/// Path separator used by virtual and real paths alike.
pub const SEPARATOR: char = '\\';

/// A parsed `\`-delimited path. Stores components in their originally
/// supplied casing; comparisons go through [`CaseFold`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualPath {
    components: Vec<String>,
}

impl VirtualPath {
    /// The root path (no components).
    pub fn root() -> Self {
        Self { components: Vec::new() }
    }

    /// Parses a raw `\`-delimited path, dropping empty components so that
    /// leading/trailing/adjacent separators are tolerated the way a real
    /// filesystem bridge would normalize them before handing the core a path.
    pub fn parse(raw: &str) -> Self {
        let components =
            raw.split(SEPARATOR).filter(|c| !c.is_empty()).map(str::to_owned).collect();
        Self { components }
    }

    pub fn from_components<I: IntoIterator<Item = String>>(components: I) -> Self {
        Self { components: components.into_iter().collect() }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// The final name component, or `None` at the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// The path with its last component removed, or `None` at the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.components.is_empty() {
            return None;
        }
        Some(VirtualPath { components: self.components[..self.components.len() - 1].to_vec() })
    }

    pub fn join(&self, name: &str) -> VirtualPath {
        let mut components = self.components.clone();
        components.push(name.to_owned());
        VirtualPath { components }
    }

    /// True if `self` is `other`, or a descendant of `other`.
    pub fn starts_with(&self, other: &VirtualPath, case_sensitive: bool) -> bool {
        if other.components.len() > self.components.len() {
            return false;
        }
        self.components
            .iter()
            .zip(other.components.iter())
            .all(|(a, b)| component_eq(a, b, case_sensitive))
    }

    /// The remainder of `self` below `ancestor`, panicking if `self` does not
    /// start with `ancestor` (callers are expected to check first).
    pub fn strip_prefix(&self, ancestor: &VirtualPath) -> VirtualPath {
        VirtualPath { components: self.components[ancestor.components.len()..].to_vec() }
    }

    pub fn eq_under(&self, other: &VirtualPath, case_sensitive: bool) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| component_eq(a, b, case_sensitive))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "{SEPARATOR}");
        }
        for component in &self.components {
            write!(f, "{SEPARATOR}{component}")?;
        }
        Ok(())
    }
}

fn component_eq(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_empty_components() {
        let p = VirtualPath::parse(r"\A\\B\C\");
        assert_eq!(p.components(), &["A", "B", "C"]);
    }

    #[test]
    fn root_is_empty() {
        assert!(VirtualPath::root().is_root());
        assert_eq!(VirtualPath::parse("").to_string(), r"\");
    }

    #[test]
    fn starts_with_respects_case_flag() {
        let a = VirtualPath::parse(r"\Foo\Bar");
        let b = VirtualPath::parse(r"\foo");
        assert!(a.starts_with(&b, false));
        assert!(!a.starts_with(&b, true));
    }

    #[test]
    fn strip_prefix_returns_remainder() {
        let full = VirtualPath::parse(r"\A\B\C");
        let prefix = VirtualPath::parse(r"\A\B");
        assert_eq!(full.strip_prefix(&prefix).to_string(), r"\C");
    }

    #[test]
    fn parent_of_root_is_none() {
        assert!(VirtualPath::root().parent().is_none());
    }
}
