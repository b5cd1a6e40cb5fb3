//! Virtual-path -> (source, real-path) translation per operation class
//! (§4.3). Grounded on the original `MergeFSMC/MountManager.cpp`
//! top-to-bottom source-stack iteration idiom, expressed with the teacher's
//! per-operation async method shape from `src/vfs.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{CompositeError, Result};
use crate::path::VirtualPath;
use crate::rename_store::RenameStore;
use crate::source::{FileAttr, SourceMount};

/// The class of operation being resolved; determines which sources are
/// consulted and in what order (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Metadata,
    Read,
    Enumerate,
    Write,
    CreateNew,
    Delete,
}

/// A virtual path's folded form, used as the tombstone-set key so lookups
/// respect the mount's case-sensitivity flag without needing `Hash` on
/// [`VirtualPath`] itself.
pub fn tombstone_key(path: &VirtualPath, case_sensitive: bool) -> String {
    if case_sensitive {
        path.to_string()
    } else {
        path.to_string().to_lowercase()
    }
}

fn fold_name(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_owned()
    } else {
        name.to_lowercase()
    }
}

/// Outcome of resolving a path for a read/metadata operation.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub source_rank: usize,
    pub real_path: VirtualPath,
    pub attr: FileAttr,
}

/// Outcome of resolving a path for a write operation.
#[derive(Debug, Clone)]
pub struct WriteTarget {
    pub real_path: VirtualPath,
    /// Set when the path is currently owned by a lower source and must be
    /// materialized into source 0 before the write proceeds (§4.4).
    pub needs_copy_up: Option<usize>,
}

/// One merged entry in a directory enumeration.
#[derive(Debug, Clone)]
pub struct EnumeratedEntry {
    pub name: String,
    pub source_rank: usize,
    pub attr: FileAttr,
}

/// Translates virtual paths against a [`RenameStore`] and a source stack.
/// Holds no state of its own beyond borrows; one is constructed per
/// operation by [`crate::composite_mount::CompositeMount`].
pub struct Resolver<'a> {
    rename_store: &'a RenameStore,
    sources: &'a [Arc<dyn SourceMount>],
    tombstones: &'a HashSet<String>,
    case_sensitive: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        rename_store: &'a RenameStore,
        sources: &'a [Arc<dyn SourceMount>],
        tombstones: &'a HashSet<String>,
        case_sensitive: bool,
    ) -> Self {
        Self { rename_store, sources, tombstones, case_sensitive }
    }

    /// Step 1: ancestor-aware translation; falls back to identity when the
    /// `RenameStore` has no opinion.
    pub fn translate(&self, v: &VirtualPath) -> VirtualPath {
        self.rename_store.resolve(v).unwrap_or_else(|| v.clone())
    }

    pub fn is_tombstoned(&self, v: &VirtualPath) -> bool {
        self.tombstones.contains(&tombstone_key(v, self.case_sensitive))
    }

    /// Steps 1-2: used for both `Metadata` and `Read` operation classes,
    /// which share the same top-to-bottom first-success rule.
    pub async fn resolve_entry(&self, v: &VirtualPath) -> Result<ResolvedEntry> {
        if self.is_tombstoned(v) {
            return Err(CompositeError::NotExists);
        }
        let real = self.translate(v);
        for (rank, source) in self.sources.iter().enumerate() {
            match source.get_file_info(&real).await {
                Ok(attr) => return Ok(ResolvedEntry { source_rank: rank, real_path: real, attr }),
                Err(CompositeError::NotExists) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CompositeError::NotExists)
    }

    /// Step 3: enumerate `v`, merging children from every source. Names are
    /// merged case-fold-or-literal; the first source to expose a name wins
    /// for metadata (shadowing, §8). Renamed-in entries (forward-tree
    /// direct children of `v`) are injected; names moved away by a nested
    /// rename, or tombstoned, are suppressed.
    pub async fn enumerate(&self, v: &VirtualPath) -> Result<Vec<EnumeratedEntry>> {
        if self.is_tombstoned(v) {
            return Err(CompositeError::NotExists);
        }
        let real_dir = self.translate(v);
        let mut merged: Vec<(String, EnumeratedEntry)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (rank, source) in self.sources.iter().enumerate() {
            let Ok(children) = source.list_files(&real_dir).await else {
                continue;
            };
            for entry in children {
                let child_virtual = v.join(&entry.name);
                if self.is_tombstoned(&child_virtual) {
                    continue;
                }
                let child_real = real_dir.join(&entry.name);
                // A name that the reverse tree says moved away from this
                // exact real location is stale unless the rename landed
                // right back on the same (virtual, real) pair.
                if self.rename_store.is_moved_away(&child_real)
                    && self.rename_store.resolve(&child_virtual).as_ref() != Some(&child_real)
                {
                    continue;
                }
                let key = fold_name(&entry.name, self.case_sensitive);
                if seen.insert(key.clone()) {
                    merged.push((
                        key,
                        EnumeratedEntry { name: entry.name, source_rank: rank, attr: entry.attr },
                    ));
                }
            }
        }

        for (name, real_override) in self.rename_store.list_forward_children(v) {
            let Some(real_target) = real_override else { continue };
            let child_virtual = v.join(&name);
            if self.is_tombstoned(&child_virtual) {
                continue;
            }
            for (rank, source) in self.sources.iter().enumerate() {
                if let Ok(attr) = source.get_file_info(&real_target).await {
                    let key = fold_name(&name, self.case_sensitive);
                    merged.retain(|(k, _)| k != &key);
                    merged.push((key, EnumeratedEntry { name: name.clone(), source_rank: rank, attr }));
                    break;
                }
            }
        }

        Ok(merged.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Step 4: writes always target source 0; reports whether a lower
    /// source currently owns the file (copy-up required first).
    pub async fn resolve_for_write(&self, v: &VirtualPath) -> Result<WriteTarget> {
        if self.is_tombstoned(v) {
            return Err(CompositeError::NotExists);
        }
        let real = self.translate(v);
        let top = self.sources.first().ok_or(CompositeError::Internal("empty source stack".into()))?;
        if top.get_file_info(&real).await.is_ok() {
            return Ok(WriteTarget { real_path: real, needs_copy_up: None });
        }
        for (rank, source) in self.sources.iter().enumerate().skip(1) {
            if source.get_file_info(&real).await.is_ok() {
                return Ok(WriteTarget { real_path: real, needs_copy_up: Some(rank) });
            }
        }
        Err(CompositeError::NotExists)
    }

    /// Step 5: create-new targets source 0; fails if any source already
    /// exposes `v`, unless it is currently tombstoned (caller clears it).
    pub async fn resolve_for_create(&self, v: &VirtualPath) -> Result<VirtualPath> {
        let real = self.translate(v);
        if !self.is_tombstoned(v) {
            for source in self.sources.iter() {
                if source.get_file_info(&real).await.is_ok() {
                    return Err(CompositeError::AlreadyExists);
                }
            }
        }
        Ok(real)
    }

    /// Step 6: determines whether `v` lives only at source 0 (direct
    /// delete) or also/only below it (tombstone + RenameStore cleanup).
    pub async fn resolve_for_delete(&self, v: &VirtualPath) -> Result<(ResolvedEntry, bool)> {
        let entry = self.resolve_entry(v).await?;
        let only_at_top = entry.source_rank == 0
            && {
                let mut found_lower = false;
                for source in self.sources.iter().skip(1) {
                    if source.get_file_info(&entry.real_path).await.is_ok() {
                        found_lower = true;
                        break;
                    }
                }
                !found_lower
            };
        Ok((entry, only_at_top))
    }
}
