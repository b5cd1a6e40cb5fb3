//! Process-wide mount table (§4.7): tracks every live [`CompositeMount`],
//! keyed by an opaque id and by mount point, so a bridge layer can look
//! one up by either without holding its own bookkeeping. Singleton storage
//! via `OnceLock` follows the §9 design note against hidden thread-locals:
//! the only global state is this one table, and it is reached through an
//! explicit `init`/`uninit` pair rather than constructed implicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;

use crate::composite_mount::CompositeMount;
use crate::config::MountConfig;
use crate::error::{CompositeError, Result};
use crate::metadata_store::MetadataStore;
use crate::source::VolumeInfo;
use crate::sources::passthrough::PassthroughSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountId(pub u64);

/// A snapshot row for `MountRegistry::list` / CLI `status` output.
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub id: MountId,
    pub mount_point: String,
    pub writable: bool,
    pub source_count: usize,
}

struct MountRecord {
    mount: Arc<CompositeMount>,
    mount_point: String,
    writable: bool,
    source_count: usize,
}

struct RegistryState {
    mounts: HashMap<u64, MountRecord>,
    by_mount_point: HashMap<String, u64>,
    next_id: AtomicU64,
}

impl RegistryState {
    fn new() -> Self {
        Self { mounts: HashMap::new(), by_mount_point: HashMap::new(), next_id: AtomicU64::new(1) }
    }
}

static REGISTRY: OnceLock<RwLock<RegistryState>> = OnceLock::new();

/// Installs the process-wide table. Idempotent: a second call is a no-op,
/// matching the "init may be called once per process, and uninit releases
/// it" lifecycle in §4.7.
pub fn init() {
    REGISTRY.get_or_init(|| RwLock::new(RegistryState::new()));
}

fn state() -> &'static RwLock<RegistryState> {
    REGISTRY.get_or_init(|| RwLock::new(RegistryState::new()))
}

/// Tears down every live mount, unmounting each one (best-effort) before
/// dropping the table's contents.
pub async fn uninit() {
    let mut guard = state().write().await;
    for (_, record) in guard.mounts.drain() {
        let _ = record.mount.unmount(true).await;
    }
    guard.by_mount_point.clear();
}

/// Builds the source stack named by `config`, constructs and starts a
/// [`CompositeMount`], and registers it under a fresh [`MountId`]. Fails
/// with [`CompositeError::AlreadyExists`] if the mount point is already in
/// use (§9 open-question decision — no dedicated taxonomy entry exists for
/// this condition, so the closest fit is reused; see `DESIGN.md`).
pub async fn add(config: MountConfig) -> Result<MountId> {
    let mut guard = state().write().await;
    if guard.by_mount_point.contains_key(&config.mount_point) {
        return Err(CompositeError::AlreadyExists);
    }

    if config.sources.is_empty() {
        return Err(CompositeError::Internal("mount config has no sources".into()));
    }
    let source_count = config.sources.len();
    let metadata_root = config.sources[0].root.clone();
    let sources = config
        .sources
        .iter()
        .map(|s| Arc::new(PassthroughSource::new(s.root.clone(), s.writable)) as Arc<dyn crate::source::SourceMount>)
        .collect();

    let volume_override = build_volume_override(&config);
    let metadata = MetadataStore::new(metadata_root, config.metadata_filename.clone());
    let mount = Arc::new(CompositeMount::new(
        sources,
        config.case_sensitive,
        config.writable,
        config.defer_copy_enabled,
        metadata,
        volume_override,
    ));
    mount.start().await?;

    let id = guard.next_id.fetch_add(1, Ordering::Relaxed);
    guard.by_mount_point.insert(config.mount_point.clone(), id);
    guard.mounts.insert(
        id,
        MountRecord { mount, mount_point: config.mount_point, writable: config.writable, source_count },
    );
    Ok(MountId(id))
}

fn build_volume_override(config: &MountConfig) -> Option<VolumeInfo> {
    let o = &config.volume_info;
    if o.name.is_none() && o.serial.is_none() && o.fs_name.is_none() {
        return None;
    }
    Some(VolumeInfo {
        name: o.name.clone().unwrap_or_else(|| "mergefs".to_owned()),
        serial: o.serial.unwrap_or(0),
        max_component_length: 255,
        fs_name: o.fs_name.clone().unwrap_or_else(|| "mergefs".to_owned()),
        total_bytes: 0,
        free_bytes: 0,
    })
}

/// Unmounts and removes a mount by id. `safe` is forwarded to
/// [`CompositeMount::unmount`].
pub async fn remove(id: MountId, safe: bool) -> Result<()> {
    let mut guard = state().write().await;
    let record = guard.mounts.remove(&id.0).ok_or(CompositeError::NotExists)?;
    guard.by_mount_point.remove(&record.mount_point);
    record.mount.unmount(safe).await
}

pub async fn get(id: MountId) -> Result<Arc<CompositeMount>> {
    let guard = state().read().await;
    guard.mounts.get(&id.0).map(|r| r.mount.clone()).ok_or(CompositeError::NotExists)
}

pub async fn find_by_mount_point(mount_point: &str) -> Option<MountId> {
    let guard = state().read().await;
    guard.by_mount_point.get(mount_point).copied().map(MountId)
}

/// Snapshot of a single mount, for CLI `status` output.
pub async fn info(id: MountId) -> Result<MountInfo> {
    let guard = state().read().await;
    let record = guard.mounts.get(&id.0).ok_or(CompositeError::NotExists)?;
    Ok(MountInfo {
        id,
        mount_point: record.mount_point.clone(),
        writable: record.writable,
        source_count: record.source_count,
    })
}

/// Names the `SourceMount` implementations this crate carries in-process.
/// There is no dynamic plugin loader (source-plugin implementations are out
/// of scope, per §1); this exists so a CLI `status`-style surface has
/// something to report under the name `list_plugins` from §4.7.
pub fn list_plugins() -> &'static [&'static str] {
    &["passthrough", "memory"]
}

pub async fn list() -> Vec<MountInfo> {
    let guard = state().read().await;
    guard
        .mounts
        .iter()
        .map(|(id, record)| MountInfo {
            id: MountId(*id),
            mount_point: record.mount_point.clone(),
            writable: record.writable,
            source_count: record.source_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::config::{SourceConfig, VolumeInfoOverride};

    fn config_for(dir: &std::path::Path, mount_point: &str) -> MountConfig {
        MountConfig {
            mount_point: mount_point.to_owned(),
            metadata_filename: ".mergefs.meta".to_owned(),
            writable: true,
            defer_copy_enabled: false,
            case_sensitive: true,
            sources: vec![SourceConfig { root: PathBuf::from(dir), writable: true }],
            volume_info: VolumeInfoOverride::default(),
        }
    }

    #[tokio::test]
    async fn add_then_list_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let id = add(config_for(dir.path(), r"T:\")).await.unwrap();
        let mounts = list().await;
        assert!(mounts.iter().any(|m| m.id == id));
        remove(id, true).await.unwrap();
        assert!(list().await.iter().all(|m| m.id != id));
    }

    #[tokio::test]
    async fn duplicate_mount_point_is_rejected() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let id = add(config_for(dir_a.path(), r"U:\")).await.unwrap();
        assert_eq!(add(config_for(dir_b.path(), r"U:\")).await.unwrap_err(), CompositeError::AlreadyExists);
        remove(id, true).await.unwrap();
    }
}
