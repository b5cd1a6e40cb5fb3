//! `SourceMount` trait: the contract every backing namespace (real
//! directory, archive, synthetic view) must satisfy to participate in a
//! mount's source stack (§4.2). Shaped directly on the teacher's
//! `vfs::Vfs` trait — same `#[async_trait]` surface, same attribute/time
//! simplification, same "opaque handle correlated by the implementation"
//! pattern — generalized from NFSv3 procedures to the smaller capability
//! set a composite mount actually needs.

use async_trait::async_trait;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::path::VirtualPath;

/// Opaque per-source correlation id for an open file or export stream.
/// Mirrors `vfs::FileHandle`: the core never interprets the value, only
/// hands it back to the source that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(pub u64);

/// POSIX-ish file kind, trimmed to what enumeration and metadata actually
/// need to distinguish.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

/// Timestamp, matching the precision the teacher's `vfs::FileTime` uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct FileTime {
    pub seconds: i64,
    pub nanos: u32,
}

/// Attributes returned by `get_file_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttr {
    pub kind: FileKind,
    pub size: u64,
    pub readonly: bool,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub ctime: FileTime,
}

/// One entry produced by `list_files`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub attr: FileAttr,
}

/// Access mode requested by `open`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn allows_read(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// Sharing permitted while a handle is open.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShareMode {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

/// How `open` should treat an existing/missing file, matching Win32
/// `CreateFile` dispositions (the natural vocabulary for a composite
/// filesystem whose original design targets a Windows bridge).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Disposition {
    CreateNew,
    CreateAlways,
    OpenExisting,
    OpenAlways,
    TruncateExisting,
}

/// Partial timestamp update for `set_times`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct SetTimes {
    pub atime: Option<FileTime>,
    pub mtime: Option<FileTime>,
}

/// Partial attribute update for `set_attrs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct SetAttrs {
    pub readonly: Option<bool>,
}

/// Static + dynamic volume information (§6 volume-info override table).
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    pub name: String,
    pub serial: u32,
    pub max_component_length: u32,
    pub fs_name: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Per-copy-up streaming state handed between `export_start`,
/// `export_data`, and `export_finish` (§3 `PortationContext`, §4.4,
/// §9 "source-exporter / destination-writer split").
pub struct PortationContext {
    pub handle: SourceHandle,
    pub total_size: u64,
    pub bytes_done: u64,
}

impl PortationContext {
    pub fn is_complete(&self) -> bool {
        self.bytes_done >= self.total_size
    }

    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.bytes_done)
    }
}

/// The contract a backing namespace implements (§4.2). Read-only sources
/// must fail every mutating method with [`crate::error::CompositeError::AccessDenied`].
#[async_trait]
pub trait SourceMount: Send + Sync {
    /// Whether this source accepts mutation at all; `Resolver` consults
    /// this before routing writes, but implementations must still enforce
    /// it defensively in every mutating method.
    fn is_writable(&self) -> bool;

    async fn get_file_info(&self, path: &VirtualPath) -> Result<FileAttr>;

    async fn list_files(&self, dir: &VirtualPath) -> Result<Vec<DirEntry>>;

    async fn open(
        &self,
        path: &VirtualPath,
        access: AccessMode,
        share: ShareMode,
        disposition: Disposition,
    ) -> Result<SourceHandle>;

    async fn close(&self, handle: SourceHandle) -> Result<()>;

    async fn read(&self, handle: SourceHandle, offset: u64, buf: &mut [u8]) -> Result<usize>;

    async fn write(&self, handle: SourceHandle, offset: u64, data: &[u8]) -> Result<usize>;

    async fn set_times(&self, path: &VirtualPath, times: SetTimes) -> Result<()>;

    async fn set_attrs(&self, path: &VirtualPath, attrs: SetAttrs) -> Result<()>;

    async fn set_size(&self, path: &VirtualPath, size: u64) -> Result<()>;

    async fn create_file(&self, path: &VirtualPath) -> Result<()>;

    async fn create_dir(&self, path: &VirtualPath) -> Result<()>;

    async fn delete(&self, path: &VirtualPath) -> Result<()>;

    /// Begins a streamed export of `path` for copy-up. Sources that can
    /// only stream forward (archives) rely on the caller writing strictly
    /// in offset order (§9).
    async fn export_start(&self, path: &VirtualPath) -> Result<PortationContext>;

    /// Fills as much of `buf` as the source can produce in one step,
    /// returning the number of bytes written into it. Returns `0` once
    /// `ctx.is_complete()`.
    async fn export_data(&self, ctx: &mut PortationContext, buf: &mut Buffer) -> Result<usize>;

    async fn export_finish(&self, ctx: PortationContext, success: bool) -> Result<()>;

    fn volume_info(&self) -> VolumeInfo;
}
