//! In-memory [`SourceMount`], grounded on
//! `examples/in_memory/filesystem.rs::InMemoryVfs`: a single lock-guarded
//! node table keyed by path, synthetic attributes minted on creation. Used
//! by tests as a stand-in lower layer (e.g. an archive-shaped read-only
//! source) and by `demos/mirror_mount` to avoid touching the host
//! filesystem for the "no prior entries" side of the stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::buffer::Buffer;
use crate::error::{CompositeError, Result};
use crate::path::VirtualPath;
use crate::source::{
    AccessMode, Disposition, FileAttr, FileKind, FileTime, PortationContext, SetAttrs, SetTimes,
    ShareMode, SourceHandle, SourceMount, VolumeInfo,
};

#[derive(Clone)]
enum NodeKind {
    File(Vec<u8>),
    Directory,
}

#[derive(Clone)]
struct Node {
    kind: NodeKind,
    readonly: bool,
    mtime: FileTime,
}

struct OpenHandle {
    key: String,
}

/// A [`SourceMount`] whose entire namespace lives in a `HashMap`.
pub struct MemorySource {
    writable: bool,
    nodes: RwLock<HashMap<String, Node>>,
    open: RwLock<HashMap<u64, OpenHandle>>,
    next_handle: AtomicU64,
}

fn now() -> FileTime {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    FileTime { seconds: d.as_secs() as i64, nanos: d.subsec_nanos() }
}

fn key_of(path: &VirtualPath) -> String {
    path.to_string()
}

impl MemorySource {
    pub fn new(writable: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            key_of(&VirtualPath::root()),
            Node { kind: NodeKind::Directory, readonly: false, mtime: now() },
        );
        Self { writable, nodes: RwLock::new(nodes), open: RwLock::new(HashMap::new()), next_handle: AtomicU64::new(1) }
    }

    /// Seeds a file directly, for test setup that wants a lower source
    /// pre-populated without going through `create_file`/`write`.
    pub async fn seed_file(&self, path: &VirtualPath, data: Vec<u8>) {
        self.nodes.write().await.insert(
            key_of(path),
            Node { kind: NodeKind::File(data), readonly: false, mtime: now() },
        );
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(CompositeError::AccessDenied)
        }
    }

    fn attr_for(node: &Node) -> FileAttr {
        let (kind, size) = match &node.kind {
            NodeKind::File(data) => (FileKind::File, data.len() as u64),
            NodeKind::Directory => (FileKind::Directory, 0),
        };
        FileAttr { kind, size, readonly: node.readonly, atime: node.mtime, mtime: node.mtime, ctime: node.mtime }
    }
}

#[async_trait]
impl SourceMount for MemorySource {
    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn get_file_info(&self, path: &VirtualPath) -> Result<FileAttr> {
        let nodes = self.nodes.read().await;
        let node = nodes.get(&key_of(path)).ok_or(CompositeError::NotExists)?;
        Ok(Self::attr_for(node))
    }

    async fn list_files(&self, dir: &VirtualPath) -> Result<Vec<crate::source::DirEntry>> {
        let nodes = self.nodes.read().await;
        if !matches!(nodes.get(&key_of(dir)).map(|n| &n.kind), Some(NodeKind::Directory)) {
            return Err(CompositeError::NotExists);
        }
        let mut entries = Vec::new();
        for (key, node) in nodes.iter() {
            let candidate = VirtualPath::parse(key);
            if candidate.parent().as_ref() == Some(dir) {
                entries.push(crate::source::DirEntry {
                    name: candidate.file_name().unwrap_or_default().to_owned(),
                    attr: Self::attr_for(node),
                });
            }
        }
        Ok(entries)
    }

    async fn open(
        &self,
        path: &VirtualPath,
        access: AccessMode,
        _share: ShareMode,
        disposition: Disposition,
    ) -> Result<SourceHandle> {
        if access.allows_write() {
            self.check_writable()?;
        }
        let key = key_of(path);
        let mut nodes = self.nodes.write().await;
        match disposition {
            Disposition::CreateNew => {
                self.check_writable()?;
                if nodes.contains_key(&key) {
                    return Err(CompositeError::AlreadyExists);
                }
                nodes.insert(key.clone(), Node { kind: NodeKind::File(Vec::new()), readonly: false, mtime: now() });
            }
            Disposition::CreateAlways => {
                self.check_writable()?;
                nodes.insert(key.clone(), Node { kind: NodeKind::File(Vec::new()), readonly: false, mtime: now() });
            }
            Disposition::OpenExisting => {
                if !nodes.contains_key(&key) {
                    return Err(CompositeError::NotExists);
                }
            }
            Disposition::OpenAlways => {
                self.check_writable()?;
                nodes.entry(key.clone()).or_insert(Node { kind: NodeKind::File(Vec::new()), readonly: false, mtime: now() });
            }
            Disposition::TruncateExisting => {
                self.check_writable()?;
                let node = nodes.get_mut(&key).ok_or(CompositeError::NotExists)?;
                node.kind = NodeKind::File(Vec::new());
            }
        }
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open.write().await.insert(id, OpenHandle { key });
        Ok(SourceHandle(id))
    }

    async fn close(&self, handle: SourceHandle) -> Result<()> {
        self.open.write().await.remove(&handle.0);
        Ok(())
    }

    async fn read(&self, handle: SourceHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let key = {
            let open = self.open.read().await;
            open.get(&handle.0).ok_or_else(|| CompositeError::Internal("unknown source handle".into()))?.key.clone()
        };
        let nodes = self.nodes.read().await;
        let node = nodes.get(&key).ok_or(CompositeError::NotExists)?;
        let NodeKind::File(data) = &node.kind else {
            return Err(CompositeError::AccessDenied);
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    async fn write(&self, handle: SourceHandle, offset: u64, data: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let key = {
            let open = self.open.read().await;
            open.get(&handle.0).ok_or_else(|| CompositeError::Internal("unknown source handle".into()))?.key.clone()
        };
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&key).ok_or(CompositeError::NotExists)?;
        let NodeKind::File(existing) = &mut node.kind else {
            return Err(CompositeError::AccessDenied);
        };
        let offset = offset as usize;
        let end = offset + data.len();
        if existing.len() < end {
            existing.resize(end, 0);
        }
        existing[offset..end].copy_from_slice(data);
        node.mtime = now();
        Ok(data.len())
    }

    async fn set_times(&self, path: &VirtualPath, times: SetTimes) -> Result<()> {
        self.check_writable()?;
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&key_of(path)).ok_or(CompositeError::NotExists)?;
        if let Some(mtime) = times.mtime {
            node.mtime = mtime;
        }
        Ok(())
    }

    async fn set_attrs(&self, path: &VirtualPath, attrs: SetAttrs) -> Result<()> {
        self.check_writable()?;
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&key_of(path)).ok_or(CompositeError::NotExists)?;
        if let Some(readonly) = attrs.readonly {
            node.readonly = readonly;
        }
        Ok(())
    }

    async fn set_size(&self, path: &VirtualPath, size: u64) -> Result<()> {
        self.check_writable()?;
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&key_of(path)).ok_or(CompositeError::NotExists)?;
        let NodeKind::File(data) = &mut node.kind else {
            return Err(CompositeError::AccessDenied);
        };
        data.resize(size as usize, 0);
        Ok(())
    }

    async fn create_file(&self, path: &VirtualPath) -> Result<()> {
        self.check_writable()?;
        let mut nodes = self.nodes.write().await;
        let key = key_of(path);
        if nodes.contains_key(&key) {
            return Err(CompositeError::AlreadyExists);
        }
        nodes.insert(key, Node { kind: NodeKind::File(Vec::new()), readonly: false, mtime: now() });
        Ok(())
    }

    async fn create_dir(&self, path: &VirtualPath) -> Result<()> {
        self.check_writable()?;
        let mut nodes = self.nodes.write().await;
        let key = key_of(path);
        if nodes.contains_key(&key) {
            return Err(CompositeError::AlreadyExists);
        }
        nodes.insert(key, Node { kind: NodeKind::Directory, readonly: false, mtime: now() });
        Ok(())
    }

    async fn delete(&self, path: &VirtualPath) -> Result<()> {
        self.check_writable()?;
        let mut nodes = self.nodes.write().await;
        let key = key_of(path);
        if nodes.remove(&key).is_none() {
            return Err(CompositeError::NotExists);
        }
        Ok(())
    }

    async fn export_start(&self, path: &VirtualPath) -> Result<PortationContext> {
        let size = self.get_file_info(path).await?.size;
        let handle = self.open(path, AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenExisting).await?;
        Ok(PortationContext { handle, total_size: size, bytes_done: 0 })
    }

    async fn export_data(&self, ctx: &mut PortationContext, buf: &mut Buffer) -> Result<usize> {
        if ctx.is_complete() {
            return Ok(0);
        }
        let want = (ctx.remaining() as usize).min(buf.len());
        let n = self.read(ctx.handle, ctx.bytes_done, &mut buf[..want]).await?;
        ctx.bytes_done += n as u64;
        Ok(n)
    }

    async fn export_finish(&self, ctx: PortationContext, _success: bool) -> Result<()> {
        self.close(ctx.handle).await
    }

    fn volume_info(&self) -> VolumeInfo {
        VolumeInfo {
            name: "memory".to_owned(),
            serial: 0,
            max_component_length: 255,
            fs_name: "memfs".to_owned(),
            total_bytes: 0,
            free_bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_file_is_readable() {
        let source = MemorySource::new(true);
        source.seed_file(&VirtualPath::parse(r"\a.txt"), b"hello".to_vec()).await;
        let attr = source.get_file_info(&VirtualPath::parse(r"\a.txt")).await.unwrap();
        assert_eq!(attr.size, 5);
        let handle = source
            .open(&VirtualPath::parse(r"\a.txt"), AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenExisting)
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        let n = source.read(handle, 0, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn read_only_source_rejects_writes() {
        let source = MemorySource::new(false);
        assert_eq!(source.create_file(&VirtualPath::parse(r"\x")).await, Err(CompositeError::AccessDenied));
    }
}
