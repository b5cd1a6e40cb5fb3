//! Bidirectional path-trie journal mapping virtual paths to real paths
//! (spec §3, §4.1). Grounded directly on `original_source/LibMergeFS/RenameStore.hpp`
//! (`PathTrieTree`, `Result`, `FindLongestMatch`, `MoveNode`).
//!
//! Two [`PathTrieNode`] trees are kept: a forward tree (virtual -> real) and
//! a reverse tree (real -> virtual). A node is either *interior* (exists only
//! to host descendants) or *valid* (carries a payload naming the path on the
//! other side). The only I/O-free errors this module raises are
//! [`CompositeError::AlreadyExists`], [`CompositeError::NotExists`], and
//! [`CompositeError::InvalidRename`].

use std::collections::HashMap;

use crate::error::CompositeError;
use crate::path::VirtualPath;

fn fold_component(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_owned()
    } else {
        name.to_lowercase()
    }
}

/// A node in one of the two trees backing a [`RenameStore`].
#[derive(Debug, Default, Clone)]
struct PathTrieNode {
    /// Keyed by case-folded component name; the tuple's `String` preserves
    /// the casing the component was first inserted with.
    children: HashMap<String, (String, PathTrieNode)>,
    valid: bool,
    payload: Option<VirtualPath>,
}

impl PathTrieNode {
    fn child(&self, name: &str, case_sensitive: bool) -> Option<&PathTrieNode> {
        self.children.get(&fold_component(name, case_sensitive)).map(|(_, n)| n)
    }

    fn child_or_insert(&mut self, name: &str, case_sensitive: bool) -> &mut PathTrieNode {
        let key = fold_component(name, case_sensitive);
        &mut self
            .children
            .entry(key)
            .or_insert_with(|| (name.to_owned(), PathTrieNode::default()))
            .1
    }

    fn get<'a>(&'a self, components: &[String], case_sensitive: bool) -> Option<&'a PathTrieNode> {
        let mut node = self;
        for c in components {
            node = node.child(c, case_sensitive)?;
        }
        Some(node)
    }

    fn ensure(&mut self, components: &[String], case_sensitive: bool) -> &mut PathTrieNode {
        let mut node = self;
        for c in components {
            node = node.child_or_insert(c, case_sensitive);
        }
        node
    }

    /// The deepest valid node on the path to `components`, along with how
    /// many components were consumed to reach it (spec: "longest valid
    /// ancestor match wins").
    fn longest_valid_ancestor<'a>(
        &'a self,
        components: &[String],
        case_sensitive: bool,
    ) -> Option<(usize, &'a PathTrieNode)> {
        let mut node = self;
        let mut best = if node.valid { Some((0, node)) } else { None };
        for (i, c) in components.iter().enumerate() {
            match node.child(c, case_sensitive) {
                Some(next) => {
                    node = next;
                    if node.valid {
                        best = Some((i + 1, node));
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Invalidates the node at `components` (if any), returning whether it
    /// had been valid, and prunes any interior nodes left without valid
    /// descendants along the way back up.
    fn remove_and_prune(&mut self, components: &[String], case_sensitive: bool) -> bool {
        if components.is_empty() {
            let had = self.valid;
            self.valid = false;
            self.payload = None;
            return had;
        }
        let key = fold_component(&components[0], case_sensitive);
        let Some((_, child)) = self.children.get_mut(&key) else {
            return false;
        };
        let removed = child.remove_and_prune(&components[1..], case_sensitive);
        if !child.valid && child.children.is_empty() {
            self.children.remove(&key);
        }
        removed
    }

    fn collect_valid(&self, prefix: &mut Vec<String>, out: &mut Vec<(Vec<String>, VirtualPath)>) {
        if self.valid {
            if let Some(payload) = &self.payload {
                out.push((prefix.clone(), payload.clone()));
            }
        }
        for (display_name, child) in self.children.values() {
            prefix.push(display_name.clone());
            child.collect_valid(prefix, out);
            prefix.pop();
        }
    }

    fn list_immediate_children(&self) -> Vec<(String, bool, Option<VirtualPath>)> {
        self.children
            .values()
            .map(|(name, node)| (name.clone(), node.valid, node.payload.clone()))
            .collect()
    }
}

/// Bidirectional rename/deletion journal (spec §4.1).
#[derive(Debug, Clone)]
pub struct RenameStore {
    case_sensitive: bool,
    forward: PathTrieNode,
    reverse: PathTrieNode,
}

impl RenameStore {
    pub fn new(case_sensitive: bool) -> Self {
        Self { case_sensitive, forward: PathTrieNode::default(), reverse: PathTrieNode::default() }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Inserts `v -> r` in the forward tree and `r -> v` in the reverse tree.
    pub fn add_entry(&mut self, v: &VirtualPath, r: &VirtualPath) -> Result<(), CompositeError> {
        if self.node_is_valid(&self.forward, v) {
            return Err(CompositeError::AlreadyExists);
        }
        if self.node_is_valid(&self.reverse, r) {
            return Err(CompositeError::AlreadyExists);
        }
        let fwd = self.forward.ensure(v.components(), self.case_sensitive);
        fwd.valid = true;
        fwd.payload = Some(r.clone());
        let rev = self.reverse.ensure(r.components(), self.case_sensitive);
        rev.valid = true;
        rev.payload = Some(v.clone());
        Ok(())
    }

    fn node_is_valid(&self, tree: &PathTrieNode, path: &VirtualPath) -> bool {
        tree.get(path.components(), self.case_sensitive).map(|n| n.valid).unwrap_or(false)
    }

    /// Longest-ancestor-match resolution (spec §4.1), with a shadow check:
    /// if the ancestor-derived candidate has itself been claimed by a more
    /// specific (nested) rename recorded in the reverse tree, the candidate
    /// is stale and `None` is returned instead (spec scenario 5).
    pub fn resolve(&self, v: &VirtualPath) -> Option<VirtualPath> {
        let (depth, node) = self.forward.longest_valid_ancestor(v.components(), self.case_sensitive)?;
        let base = node.payload.clone()?;
        let remainder = &v.components()[depth..];
        if remainder.is_empty() {
            return Some(base);
        }
        let candidate = remainder.iter().fold(base, |acc, c| acc.join(c));
        if self.node_is_valid(&self.reverse, &candidate) {
            return None;
        }
        Some(candidate)
    }

    /// `Some(true)` if `v` is covered by the forward tree (directly or via an
    /// ancestor); `Some(false)` if `v`, read as a real path, has been
    /// recorded as moved away; `None` if the store has no opinion and the
    /// caller should defer to the source stack.
    pub fn exists(&self, v: &VirtualPath) -> Option<bool> {
        if self.resolve(v).is_some() {
            return Some(true);
        }
        if self.node_is_valid(&self.reverse, v) {
            return Some(false);
        }
        None
    }

    /// Atomically relocates the subtree rooted at `src` to `dst` in both
    /// trees (spec §4.1).
    pub fn rename(&mut self, src: &VirtualPath, dst: &VirtualPath) -> Result<(), CompositeError> {
        if src.eq_under(dst, self.case_sensitive) {
            return Err(CompositeError::InvalidRename { reason: "self-rename" });
        }
        if dst.starts_with(src, self.case_sensitive) {
            return Err(CompositeError::InvalidRename {
                reason: "destination is a descendant of source",
            });
        }
        if self.exists(src) == Some(false) {
            return Err(CompositeError::NotExists);
        }
        if self.node_is_valid(&self.forward, dst) {
            return Err(CompositeError::AlreadyExists);
        }

        let mut nested = Vec::new();
        if let Some(node) = self.forward.get(src.components(), self.case_sensitive) {
            node.collect_valid(&mut Vec::new(), &mut nested);
        }
        if !nested.iter().any(|(suffix, _)| suffix.is_empty()) {
            let effective_real = self.resolve(src).unwrap_or_else(|| src.clone());
            nested.push((Vec::new(), effective_real));
        }

        for (suffix, _) in &nested {
            let old_virtual = suffix.iter().fold(src.clone(), |acc, c| acc.join(c));
            self.remove_entry(&old_virtual);
        }
        for (suffix, real) in nested {
            let new_virtual = suffix.iter().fold(dst.clone(), |acc, c| acc.join(c));
            self.add_entry(&new_virtual, &real)?;
        }
        Ok(())
    }

    /// Invalidates both the forward entry at `v` and its reverse counterpart.
    pub fn remove_entry(&mut self, v: &VirtualPath) -> bool {
        let real = match self.forward.get(v.components(), self.case_sensitive) {
            Some(n) if n.valid => n.payload.clone(),
            _ => return false,
        };
        self.forward.remove_and_prune(v.components(), self.case_sensitive);
        if let Some(real) = real {
            self.reverse.remove_and_prune(real.components(), self.case_sensitive);
        }
        true
    }

    /// Immediate children of `v` in the forward tree: `(name, real_override)`.
    /// `real_override` is `Some` only for children with their own valid
    /// entry; interior-only children (whose overrides live deeper) are
    /// still listed, with `None`, so callers know to keep descending.
    pub fn list_forward_children(&self, v: &VirtualPath) -> Vec<(String, Option<VirtualPath>)> {
        let Some(node) = self.forward.get(v.components(), self.case_sensitive) else {
            return Vec::new();
        };
        node.list_immediate_children()
            .into_iter()
            .map(|(name, valid, payload)| (name, if valid { payload } else { None }))
            .collect()
    }

    /// True if the real path `r` has been claimed (moved elsewhere) by the
    /// reverse tree, exactly or via an ancestor. Used by the resolver to
    /// suppress identity-mapped listing entries that have moved away.
    pub fn is_moved_away(&self, r: &VirtualPath) -> bool {
        self.reverse.longest_valid_ancestor(r.components(), self.case_sensitive).is_some()
    }

    /// All valid forward entries, for metadata persistence.
    pub fn entries(&self) -> Vec<(VirtualPath, VirtualPath)> {
        let mut raw = Vec::new();
        self.forward.collect_valid(&mut Vec::new(), &mut raw);
        raw.into_iter()
            .map(|(suffix, real)| {
                let virt = suffix.iter().fold(VirtualPath::root(), |acc, c| acc.join(c));
                (virt, real)
            })
            .collect()
    }
}
