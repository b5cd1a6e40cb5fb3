//! Real-directory backed [`SourceMount`]. Grounded on
//! `examples/shadow_fs/fs/shadow.rs::ShadowFS`: a canonicalized root,
//! `tokio::fs` for every I/O operation, and an opaque `u64` handle
//! correlating open files the way `ShadowFS::encode_handle`/`decode_handle`
//! correlate NFS file handles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::buffer::Buffer;
use crate::error::{map_io_error, CompositeError, Result};
use crate::path::VirtualPath;
use crate::source::{
    AccessMode, Disposition, FileAttr, FileKind, FileTime, PortationContext, SetAttrs, SetTimes,
    ShareMode, SourceHandle, SourceMount, VolumeInfo,
};

struct OpenFile {
    file: fs::File,
}

/// A [`SourceMount`] backed by a real directory on the host filesystem.
pub struct PassthroughSource {
    root: PathBuf,
    writable: bool,
    open_files: Mutex<HashMap<u64, OpenFile>>,
    next_handle: AtomicU64,
}

impl PassthroughSource {
    /// Roots the source at `root`, canonicalizing it the way `ShadowFS::new`
    /// does so relative mount configuration doesn't depend on the process's
    /// current directory.
    pub fn new(root: PathBuf, writable: bool) -> Self {
        let canonical = root.canonicalize().unwrap_or(root);
        Self {
            root: canonical,
            writable,
            open_files: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn real_path(&self, path: &VirtualPath) -> PathBuf {
        let mut buf = self.root.clone();
        for component in path.components() {
            buf.push(component);
        }
        buf
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(CompositeError::AccessDenied)
        }
    }

    async fn file_for(&self, handle: SourceHandle) -> Result<fs::File> {
        let guard = self.open_files.lock().await;
        let open = guard
            .get(&handle.0)
            .ok_or_else(|| CompositeError::Internal("unknown source handle".into()))?;
        open.file.try_clone().await.map_err(map_io_error)
    }
}

fn systemtime_to_file_time(t: std::io::Result<SystemTime>) -> FileTime {
    let t = t.unwrap_or(UNIX_EPOCH);
    let duration = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    FileTime { seconds: duration.as_secs() as i64, nanos: duration.subsec_nanos() }
}

fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
    let kind = if meta.is_dir() {
        FileKind::Directory
    } else if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else {
        FileKind::File
    };
    FileAttr {
        kind,
        size: meta.len(),
        readonly: meta.permissions().readonly(),
        atime: systemtime_to_file_time(meta.accessed()),
        mtime: systemtime_to_file_time(meta.modified()),
        ctime: systemtime_to_file_time(meta.created()),
    }
}

#[async_trait]
impl SourceMount for PassthroughSource {
    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn get_file_info(&self, path: &VirtualPath) -> Result<FileAttr> {
        let meta = fs::symlink_metadata(self.real_path(path)).await.map_err(map_io_error)?;
        Ok(metadata_to_attr(&meta))
    }

    async fn list_files(&self, dir: &VirtualPath) -> Result<Vec<crate::source::DirEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(self.real_path(dir)).await.map_err(map_io_error)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(map_io_error)? {
            let meta = entry.metadata().await.map_err(map_io_error)?;
            entries.push(crate::source::DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                attr: metadata_to_attr(&meta),
            });
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
        let mut options = fs::OpenOptions::new();
        options.read(access.allows_read()).write(access.allows_write());
        match disposition {
            Disposition::CreateNew => {
                self.check_writable()?;
                options.create_new(true);
            }
            Disposition::CreateAlways => {
                self.check_writable()?;
                options.create(true).truncate(true);
            }
            Disposition::OpenExisting => {}
            Disposition::OpenAlways => {
                self.check_writable()?;
                options.create(true);
            }
            Disposition::TruncateExisting => {
                self.check_writable()?;
                options.truncate(true);
            }
        }
        let file = options.open(self.real_path(path)).await.map_err(map_io_error)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open_files.lock().await.insert(id, OpenFile { file });
        Ok(SourceHandle(id))
    }

    async fn close(&self, handle: SourceHandle) -> Result<()> {
        self.open_files.lock().await.remove(&handle.0);
        Ok(())
    }

    async fn read(&self, handle: SourceHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file_for(handle).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(map_io_error)?;
        let mut total = 0;
        loop {
            let n = file.read(&mut buf[total..]).await.map_err(map_io_error)?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        Ok(total)
    }

    async fn write(&self, handle: SourceHandle, offset: u64, data: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let mut file = self.file_for(handle).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(map_io_error)?;
        file.write_all(data).await.map_err(map_io_error)?;
        Ok(data.len())
    }

    async fn set_times(&self, path: &VirtualPath, times: SetTimes) -> Result<()> {
        self.check_writable()?;
        if let Some(mtime) = times.mtime {
            let real = self.real_path(path);
            let epoch = UNIX_EPOCH
                + std::time::Duration::new(mtime.seconds.max(0) as u64, mtime.nanos);
            tokio::task::spawn_blocking(move || {
                let file = std::fs::File::options().write(true).open(&real)?;
                file.set_modified(epoch)
            })
            .await
            .map_err(|e| CompositeError::Internal(e.to_string()))?
            .map_err(map_io_error)?;
        }
        Ok(())
    }

    async fn set_attrs(&self, path: &VirtualPath, attrs: SetAttrs) -> Result<()> {
        self.check_writable()?;
        if let Some(readonly) = attrs.readonly {
            let real = self.real_path(path);
            let mut perms = fs::metadata(&real).await.map_err(map_io_error)?.permissions();
            perms.set_readonly(readonly);
            fs::set_permissions(&real, perms).await.map_err(map_io_error)?;
        }
        Ok(())
    }

    async fn set_size(&self, path: &VirtualPath, size: u64) -> Result<()> {
        self.check_writable()?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.real_path(path))
            .await
            .map_err(map_io_error)?;
        file.set_len(size).await.map_err(map_io_error)
    }

    async fn create_file(&self, path: &VirtualPath) -> Result<()> {
        self.check_writable()?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.real_path(path))
            .await
            .map_err(map_io_error)?;
        Ok(())
    }

    async fn create_dir(&self, path: &VirtualPath) -> Result<()> {
        self.check_writable()?;
        fs::create_dir(self.real_path(path)).await.map_err(map_io_error)
    }

    async fn delete(&self, path: &VirtualPath) -> Result<()> {
        self.check_writable()?;
        let real = self.real_path(path);
        let meta = fs::symlink_metadata(&real).await.map_err(map_io_error)?;
        if meta.is_dir() {
            fs::remove_dir(&real).await.map_err(map_io_error)
        } else {
            fs::remove_file(&real).await.map_err(map_io_error)
        }
    }

    async fn export_start(&self, path: &VirtualPath) -> Result<PortationContext> {
        let meta = fs::symlink_metadata(self.real_path(path)).await.map_err(map_io_error)?;
        let handle = self.open(path, AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenExisting).await?;
        Ok(PortationContext { handle, total_size: meta.len(), bytes_done: 0 })
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
            name: self.root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            serial: 0,
            max_component_length: 255,
            fs_name: "passthrough".to_owned(),
            total_bytes: 0,
            free_bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);

        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::CreateNew)
            .await
            .unwrap();
        source.write(handle, 0, b"hello").await.unwrap();
        source.close(handle).await.unwrap();

        let attr = source.get_file_info(&vp(r"\a.txt")).await.unwrap();
        assert_eq!(attr.size, 5);
        assert!(matches!(attr.kind, FileKind::File));

        let read_handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenExisting)
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        let n = source.read(read_handle, 0, &mut buf).await.unwrap();
        source.close(read_handle).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn create_new_fails_if_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);
        source.create_file(&vp(r"\a.txt")).await.unwrap();

        let err = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::CreateNew)
            .await
            .unwrap_err();
        assert_eq!(err, CompositeError::AlreadyExists);
    }

    #[tokio::test]
    async fn open_existing_fails_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);
        let err = source
            .open(&vp(r"\missing.txt"), AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenExisting)
            .await
            .unwrap_err();
        assert_eq!(err, CompositeError::NotExists);
    }

    #[tokio::test]
    async fn create_always_truncates_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);
        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::CreateNew)
            .await
            .unwrap();
        source.write(handle, 0, b"original").await.unwrap();
        source.close(handle).await.unwrap();

        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::CreateAlways)
            .await
            .unwrap();
        source.close(handle).await.unwrap();

        let attr = source.get_file_info(&vp(r"\a.txt")).await.unwrap();
        assert_eq!(attr.size, 0);
    }

    #[tokio::test]
    async fn open_always_creates_when_missing_and_opens_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);

        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::OpenAlways)
            .await
            .unwrap();
        source.write(handle, 0, b"seed").await.unwrap();
        source.close(handle).await.unwrap();

        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadOnly, ShareMode::default(), Disposition::OpenAlways)
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        source.read(handle, 0, &mut buf).await.unwrap();
        source.close(handle).await.unwrap();
        assert_eq!(&buf, b"seed");
    }

    #[tokio::test]
    async fn truncate_existing_empties_a_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);
        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::CreateNew)
            .await
            .unwrap();
        source.write(handle, 0, b"content").await.unwrap();
        source.close(handle).await.unwrap();

        let handle = source
            .open(&vp(r"\a.txt"), AccessMode::ReadWrite, ShareMode::default(), Disposition::TruncateExisting)
            .await
            .unwrap();
        source.close(handle).await.unwrap();

        let attr = source.get_file_info(&vp(r"\a.txt")).await.unwrap();
        assert_eq!(attr.size, 0);
    }

    #[tokio::test]
    async fn delete_and_create_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), true);

        source.create_dir(&vp(r"\sub")).await.unwrap();
        let attr = source.get_file_info(&vp(r"\sub")).await.unwrap();
        assert!(matches!(attr.kind, FileKind::Directory));

        source.delete(&vp(r"\sub")).await.unwrap();
        assert_eq!(source.get_file_info(&vp(r"\sub")).await.unwrap_err(), CompositeError::NotExists);
    }

    #[tokio::test]
    async fn read_only_source_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let source = PassthroughSource::new(dir.path().to_path_buf(), false);
        assert_eq!(source.create_file(&vp(r"\b.txt")).await, Err(CompositeError::AccessDenied));
    }
}
