//! Orchestrates a single mount: open handles, directory union, lifecycle
//! (§4.5). Concurrency shape — a `RwLock` guarding the `RenameStore` and
//! tombstones, a mutex-guarded open-file table — is grounded on the
//! teacher's `examples/shadow_fs/fs/shadow.rs::ShadowFS` use of
//! `tokio::sync::Mutex` around its own id/path state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::copy_up::CopyUpEngine;
use crate::error::{CompositeError, Result};
use crate::metadata_store::{MetadataStore, Record};
use crate::path::VirtualPath;
use crate::rename_store::RenameStore;
use crate::resolver::{tombstone_key, EnumeratedEntry, Resolver};
use crate::source::{AccessMode, Disposition, FileAttr, FileKind, ShareMode, SourceHandle, SourceMount, VolumeInfo};

/// Mount lifecycle state (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Created,
    Initializing,
    Running,
    Unmounting,
    Destroyed,
    Failed,
}

/// Opaque handle returned by [`CompositeMount::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

struct OpenFileEntry {
    source_rank: usize,
    source_handle: SourceHandle,
}

/// A live composite mount: an ordered source stack plus the RenameStore
/// and tombstone journal that virtualize a namespace distinct from any one
/// of them.
pub struct CompositeMount {
    case_sensitive: bool,
    writable: bool,
    defer_copy_enabled: bool,
    sources: Vec<Arc<dyn SourceMount>>,
    rename_store: RwLock<RenameStore>,
    // Keyed by the case-folded tombstone key so lookups respect
    // `case_sensitive`; the value keeps the original casing for
    // persistence (§4.6).
    tombstones: RwLock<HashMap<String, VirtualPath>>,
    copy_up_markers: RwLock<HashMap<String, VirtualPath>>,
    metadata: MetadataStore,
    open_files: Mutex<HashMap<u64, OpenFileEntry>>,
    next_handle: AtomicU64,
    state: RwLock<MountState>,
    volume_override: Option<VolumeInfo>,
}

impl CompositeMount {
    pub fn new(
        sources: Vec<Arc<dyn SourceMount>>,
        case_sensitive: bool,
        writable: bool,
        defer_copy_enabled: bool,
        metadata: MetadataStore,
        volume_override: Option<VolumeInfo>,
    ) -> Self {
        Self {
            case_sensitive,
            writable,
            defer_copy_enabled,
            sources,
            rename_store: RwLock::new(RenameStore::new(case_sensitive)),
            tombstones: RwLock::new(HashMap::new()),
            copy_up_markers: RwLock::new(HashMap::new()),
            metadata,
            open_files: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            state: RwLock::new(MountState::Created),
            volume_override,
        }
    }

    pub async fn state(&self) -> MountState {
        *self.state.read().await
    }

    /// `Unmounting`/`Destroyed` mean an operation raced a normal unmount —
    /// that is exactly what §7's `Cancelled` variant is for. Any other
    /// non-`Running` state (a caller reaching the mount before `start`
    /// finished, or after it failed) is an invariant violation instead.
    fn ensure_running_sync(state: MountState) -> Result<()> {
        match state {
            MountState::Running => Ok(()),
            MountState::Unmounting | MountState::Destroyed => Err(CompositeError::Cancelled),
            _ => Err(CompositeError::Internal(format!("mount is not running (state: {state:?})"))),
        }
    }

    /// `Created -> Initializing -> Running`: replays the metadata log so
    /// the union view reflects every durable rename/tombstone/copy-up
    /// record from the previous session (§4.6).
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        *self.state.write().await = MountState::Initializing;
        match self.replay_metadata().await {
            Ok(()) => {
                *self.state.write().await = MountState::Running;
                info!("mount is running");
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = MountState::Failed;
                warn!(error = %e, "mount failed to initialize");
                Err(e)
            }
        }
    }

    async fn replay_metadata(&self) -> Result<()> {
        let records = self.metadata.load().await?;
        let mut rename_store = self.rename_store.write().await;
        let mut tombstones = self.tombstones.write().await;
        let mut markers = self.copy_up_markers.write().await;
        for record in records {
            match record {
                Record::Rename { virtual_path, real_path } => {
                    rename_store.add_entry(&virtual_path, &real_path)?;
                }
                Record::Tombstone { virtual_path } => {
                    let key = tombstone_key(&virtual_path, self.case_sensitive);
                    tombstones.insert(key, virtual_path);
                }
                Record::CopyUpMarker { virtual_path } => {
                    let key = tombstone_key(&virtual_path, self.case_sensitive);
                    markers.insert(key, virtual_path);
                }
            }
        }
        Ok(())
    }

    /// Snapshots current state and durably flushes it (§4.6: after every
    /// successful rename/add_entry/remove_entry/tombstone/copy-up).
    async fn persist(&self) -> Result<()> {
        let rename_store = self.rename_store.read().await;
        let tombstones = self.tombstones.read().await;
        let markers = self.copy_up_markers.read().await;
        let mut records: Vec<Record> = rename_store
            .entries()
            .into_iter()
            .map(|(virtual_path, real_path)| Record::Rename { virtual_path, real_path })
            .collect();
        records.extend(
            tombstones.values().map(|virtual_path| Record::Tombstone { virtual_path: virtual_path.clone() }),
        );
        records.extend(
            markers.values().map(|virtual_path| Record::CopyUpMarker { virtual_path: virtual_path.clone() }),
        );
        self.metadata.flush(&records).await
    }

    #[instrument(skip(self))]
    pub async fn get_attr(&self, v: &VirtualPath) -> Result<FileAttr> {
        Self::ensure_running_sync(self.state().await)?;
        let rename_store = self.rename_store.read().await;
        let tombstones = self.tombstones.read().await;
        let keys = tombstone_key_set(&tombstones);
        let resolver = Resolver::new(&rename_store, &self.sources, &keys, self.case_sensitive);
        Ok(resolver.resolve_entry(v).await?.attr)
    }

    pub async fn list_dir(&self, v: &VirtualPath) -> Result<Vec<EnumeratedEntry>> {
        Self::ensure_running_sync(self.state().await)?;
        let rename_store = self.rename_store.read().await;
        let tombstones = self.tombstones.read().await;
        let keys = tombstone_key_set(&tombstones);
        let resolver = Resolver::new(&rename_store, &self.sources, &keys, self.case_sensitive);
        resolver.enumerate(v).await
    }

    #[instrument(skip(self))]
    pub async fn open(
        &self,
        v: &VirtualPath,
        access: AccessMode,
        share: ShareMode,
        disposition: Disposition,
    ) -> Result<FileHandle> {
        Self::ensure_running_sync(self.state().await)?;
        let wants_mutation = access.allows_write()
            || matches!(
                disposition,
                Disposition::CreateNew | Disposition::CreateAlways | Disposition::OpenAlways | Disposition::TruncateExisting
            );
        if wants_mutation && !self.writable {
            return Err(CompositeError::AccessDenied);
        }

        let (real_path, source_rank, needs_copy_up, created_new) = {
            let rename_store = self.rename_store.read().await;
            let tombstones = self.tombstones.read().await;
            let keys = tombstone_key_set(&tombstones);
            let resolver = Resolver::new(&rename_store, &self.sources, &keys, self.case_sensitive);
            if matches!(disposition, Disposition::CreateNew) {
                let real = resolver.resolve_for_create(v).await?;
                (real, 0usize, None, true)
            } else if wants_mutation {
                match resolver.resolve_for_write(v).await {
                    Ok(target) => (target.real_path, 0usize, target.needs_copy_up, false),
                    // `CreateAlways`/`OpenAlways` are Win32's "create if
                    // missing, open if present" dispositions: a miss here
                    // means "create", not "fail".
                    Err(CompositeError::NotExists)
                        if matches!(disposition, Disposition::CreateAlways | Disposition::OpenAlways) =>
                    {
                        let real = resolver.resolve_for_create(v).await?;
                        (real, 0usize, None, true)
                    }
                    Err(e) => return Err(e),
                }
            } else {
                let entry = resolver.resolve_entry(v).await?;
                (entry.real_path, entry.source_rank, None, false)
            }
        };

        if let Some(src_rank) = needs_copy_up {
            if self.defer_copy_enabled && matches!(disposition, Disposition::TruncateExisting) {
                debug!(path = %v, "deferring copy-up for truncate-on-open");
            } else {
                CopyUpEngine::copy_up(&self.sources, src_rank, &real_path).await?;
                let key = tombstone_key(v, self.case_sensitive);
                self.copy_up_markers.write().await.insert(key, v.clone());
                self.persist().await?;
            }
        }

        if created_new {
            self.tombstones.write().await.remove(&tombstone_key(v, self.case_sensitive));
        }

        let source_handle = self.sources[source_rank].open(&real_path, access, share, disposition).await?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open_files.lock().await.insert(id, OpenFileEntry { source_rank, source_handle });
        Ok(FileHandle(id))
    }

    pub async fn close(&self, handle: FileHandle) -> Result<()> {
        let entry = self
            .open_files
            .lock()
            .await
            .remove(&handle.0)
            .ok_or_else(|| CompositeError::Internal("unknown file handle".into()))?;
        self.sources[entry.source_rank].close(entry.source_handle).await
    }

    pub async fn read(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let (rank, source_handle) = {
            let files = self.open_files.lock().await;
            let entry = files.get(&handle.0).ok_or_else(|| CompositeError::Internal("unknown file handle".into()))?;
            (entry.source_rank, entry.source_handle)
        };
        self.sources[rank].read(source_handle, offset, buf).await
    }

    pub async fn write(&self, handle: FileHandle, offset: u64, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(CompositeError::AccessDenied);
        }
        let (rank, source_handle) = {
            let files = self.open_files.lock().await;
            let entry = files.get(&handle.0).ok_or_else(|| CompositeError::Internal("unknown file handle".into()))?;
            (entry.source_rank, entry.source_handle)
        };
        if rank != 0 {
            return Err(CompositeError::AccessDenied);
        }
        self.sources[rank].write(source_handle, offset, data).await
    }

    #[instrument(skip(self))]
    pub async fn create_dir(&self, v: &VirtualPath) -> Result<()> {
        Self::ensure_running_sync(self.state().await)?;
        if !self.writable {
            return Err(CompositeError::AccessDenied);
        }
        let real = {
            let rename_store = self.rename_store.read().await;
            let tombstones = self.tombstones.read().await;
            let keys = tombstone_key_set(&tombstones);
            let resolver = Resolver::new(&rename_store, &self.sources, &keys, self.case_sensitive);
            resolver.resolve_for_create(v).await?
        };
        self.sources[0].create_dir(&real).await?;
        self.tombstones.write().await.remove(&tombstone_key(v, self.case_sensitive));
        self.persist().await
    }

    /// Atomically moves `src` to `dst`, updating the RenameStore and
    /// persisting the change (§4.1, §4.5).
    #[instrument(skip(self))]
    pub async fn rename(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<()> {
        Self::ensure_running_sync(self.state().await)?;
        if !self.writable {
            return Err(CompositeError::AccessDenied);
        }
        {
            let tombstones = self.tombstones.read().await;
            if tombstones.contains_key(&tombstone_key(src, self.case_sensitive)) {
                return Err(CompositeError::NotExists);
            }
        }
        let mut rename_store = self.rename_store.write().await;
        rename_store.rename(src, dst)?;
        drop(rename_store);
        self.persist().await
    }

    /// Directory deletion requires emptiness at the **union** view (§4.3
    /// step 6); files below source 0 are hidden with a tombstone rather
    /// than deleted, since lower layers are immutable.
    #[instrument(skip(self))]
    pub async fn delete(&self, v: &VirtualPath) -> Result<()> {
        Self::ensure_running_sync(self.state().await)?;
        if !self.writable {
            return Err(CompositeError::AccessDenied);
        }
        let (entry, only_at_top) = {
            let rename_store = self.rename_store.read().await;
            let tombstones = self.tombstones.read().await;
            let keys = tombstone_key_set(&tombstones);
            let resolver = Resolver::new(&rename_store, &self.sources, &keys, self.case_sensitive);
            if entry_is_directory(&resolver, v).await? {
                let children = resolver.enumerate(v).await?;
                if !children.is_empty() {
                    // Not empty at the union view; the fixed error taxonomy
                    // (§7) has no dedicated variant, so this is reported
                    // the same way denying a mutation on policy grounds is.
                    return Err(CompositeError::AccessDenied);
                }
            }
            resolver.resolve_for_delete(v).await?
        };

        if only_at_top {
            self.sources[0].delete(&entry.real_path).await?;
        } else {
            let key = tombstone_key(v, self.case_sensitive);
            self.tombstones.write().await.insert(key, v.clone());
        }
        self.rename_store.write().await.remove_entry(v);
        self.persist().await
    }

    /// `Running -> Unmounting -> Destroyed`. `safe` drains open handles
    /// before the final flush; otherwise outstanding handles are dropped.
    #[instrument(skip(self))]
    pub async fn unmount(&self, safe: bool) -> Result<()> {
        *self.state.write().await = MountState::Unmounting;
        if safe {
            let mut files = self.open_files.lock().await;
            for (_, entry) in files.drain() {
                let _ = self.sources[entry.source_rank].close(entry.source_handle).await;
            }
        }
        self.persist().await?;
        *self.state.write().await = MountState::Destroyed;
        info!("mount destroyed");
        Ok(())
    }

    pub fn volume_info(&self) -> VolumeInfo {
        self.volume_override.clone().unwrap_or_else(|| self.sources[0].volume_info())
    }
}

async fn entry_is_directory(resolver: &Resolver<'_>, v: &VirtualPath) -> Result<bool> {
    Ok(matches!(resolver.resolve_entry(v).await?.attr.kind, FileKind::Directory))
}

fn tombstone_key_set(map: &HashMap<String, VirtualPath>) -> HashSet<String> {
    map.keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::memory::MemorySource;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s)
    }

    async fn two_layer_mount(tmp: &std::path::Path) -> CompositeMount {
        let top = Arc::new(MemorySource::new(true));
        let bottom = MemorySource::new(false);
        bottom.seed_file(&vp(r"\lower.txt"), b"from lower".to_vec()).await;
        let sources: Vec<Arc<dyn SourceMount>> = vec![top, Arc::new(bottom)];
        let metadata = MetadataStore::new(tmp.to_path_buf(), ".mergefs.meta".to_owned());
        let mount = CompositeMount::new(sources, true, true, false, metadata, None);
        mount.start().await.unwrap();
        mount
    }

    #[tokio::test]
    async fn reads_through_to_lower_source() {
        let dir = tempfile::tempdir().unwrap();
        let mount = two_layer_mount(dir.path()).await;
        let attr = mount.get_attr(&vp(r"\lower.txt")).await.unwrap();
        assert_eq!(attr.size, 10);
    }

    #[tokio::test]
    async fn write_triggers_copy_up_to_top_source() {
        let dir = tempfile::tempdir().unwrap();
        let mount = two_layer_mount(dir.path()).await;
        let handle = mount
            .open(&vp(r"\lower.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::OpenExisting)
            .await
            .unwrap();
        mount.write(handle, 0, b"UPDATED!!!").await.unwrap();
        mount.close(handle).await.unwrap();

        let attr = mount.get_attr(&vp(r"\lower.txt")).await.unwrap();
        assert_eq!(attr.size, 10);
        let read_handle = mount
            .open(&vp(r"\lower.txt"), AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenExisting)
            .await
            .unwrap();
        let mut buf = [0u8; 10];
        mount.read(read_handle, 0, &mut buf).await.unwrap();
        assert_eq!(&buf, b"UPDATED!!!");
    }

    #[tokio::test]
    async fn rename_is_durable_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mount = two_layer_mount(dir.path()).await;
            mount.rename(&vp(r"\lower.txt"), &vp(r"\renamed.txt")).await.unwrap();
        }
        let mount = two_layer_mount(dir.path()).await;
        assert_eq!(mount.get_attr(&vp(r"\renamed.txt")).await.unwrap().size, 10);
        assert_eq!(mount.get_attr(&vp(r"\lower.txt")).await.unwrap_err(), CompositeError::NotExists);
    }

    #[tokio::test]
    async fn delete_of_lower_only_file_tombstones_instead_of_removing() {
        let dir = tempfile::tempdir().unwrap();
        let mount = two_layer_mount(dir.path()).await;
        mount.delete(&vp(r"\lower.txt")).await.unwrap();
        assert_eq!(mount.get_attr(&vp(r"\lower.txt")).await.unwrap_err(), CompositeError::NotExists);
        let entries = mount.list_dir(&vp(r"\")).await.unwrap();
        assert!(entries.iter().all(|e| e.name != "lower.txt"));
    }

    #[tokio::test]
    async fn create_dir_then_delete_requires_emptiness() {
        let dir = tempfile::tempdir().unwrap();
        let mount = two_layer_mount(dir.path()).await;
        mount.create_dir(&vp(r"\sub")).await.unwrap();
        let handle = mount
            .open(&vp(r"\sub\child.txt"), AccessMode::WriteOnly, ShareMode::default(), Disposition::CreateNew)
            .await
            .unwrap();
        mount.close(handle).await.unwrap();

        assert_eq!(mount.delete(&vp(r"\sub")).await.unwrap_err(), CompositeError::AccessDenied);
        mount.delete(&vp(r"\sub\child.txt")).await.unwrap();
        mount.delete(&vp(r"\sub")).await.unwrap();
    }
}
