//! Eager copy-up: materializes a lower-source file into source 0 before a
//! write proceeds (§4.4). The exporter/importer split (`PortationContext`)
//! exists because some sources only stream forward (§9); this engine writes
//! strictly in offset order to respect that.

use std::sync::Arc;

use crate::buffer::{Buffer, DEFAULT_CHUNK_SIZE};
use crate::error::{CompositeError, Result};
use crate::path::VirtualPath;
use crate::source::{AccessMode, Disposition, SetAttrs, SetTimes, ShareMode, SourceMount};

pub struct CopyUpEngine;

impl CopyUpEngine {
    /// Copies `real_path` from `sources[src_rank]` into `sources[0]`.
    /// A no-op if `src_rank` is already 0, or if source 0 already has a
    /// file with matching size and mtime (idempotency, §4.4 step 6).
    pub async fn copy_up(
        sources: &[Arc<dyn SourceMount>],
        src_rank: usize,
        real_path: &VirtualPath,
    ) -> Result<()> {
        if src_rank == 0 {
            return Ok(());
        }
        let top = sources.first().ok_or(CompositeError::Internal("empty source stack".into()))?;
        let lower = sources.get(src_rank).ok_or(CompositeError::Internal("invalid source rank".into()))?;

        if let (Ok(top_attr), Ok(lower_attr)) =
            (top.get_file_info(real_path).await, lower.get_file_info(real_path).await)
        {
            if top_attr.size == lower_attr.size && top_attr.mtime == lower_attr.mtime {
                return Ok(());
            }
        }

        if let Some(parent) = real_path.parent() {
            Self::ensure_dir_chain(top, &parent).await?;
        }

        let mut export_ctx = lower.export_start(real_path).await?;

        let create = top.create_file(real_path).await;
        if let Err(e) = create {
            if e != CompositeError::AlreadyExists {
                let _ = lower.export_finish(export_ctx, false).await;
                return Err(e);
            }
        }

        let handle = match top
            .open(real_path, AccessMode::WriteOnly, ShareMode::default(), Disposition::TruncateExisting)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                let _ = lower.export_finish(export_ctx, false).await;
                return Err(e);
            }
        };

        let mut buffer = Buffer::for_chunk_size(DEFAULT_CHUNK_SIZE);
        let mut offset = 0u64;
        let copy_result: Result<()> = async {
            loop {
                let n = lower.export_data(&mut export_ctx, &mut buffer).await?;
                if n == 0 {
                    break;
                }
                top.write(handle, offset, &buffer[..n]).await?;
                offset += n as u64;
            }
            Ok(())
        }
        .await;

        if let Err(e) = copy_result {
            let _ = top.close(handle).await;
            let _ = top.delete(real_path).await;
            let _ = lower.export_finish(export_ctx, false).await;
            return Err(e);
        }

        top.close(handle).await?;

        if let Ok(attr) = lower.get_file_info(real_path).await {
            let _ = top
                .set_times(real_path, SetTimes { atime: Some(attr.atime), mtime: Some(attr.mtime) })
                .await;
            let _ = top.set_attrs(real_path, SetAttrs { readonly: Some(attr.readonly) }).await;
        }

        lower.export_finish(export_ctx, true).await
    }

    /// Creates every missing ancestor of `dir` at source 0. `dir` is
    /// already a real (rename-translated) path, so no new `RenameStore`
    /// entries are needed here: whatever rename produced this translation
    /// already covers the ancestor chain.
    async fn ensure_dir_chain(top: &Arc<dyn SourceMount>, dir: &VirtualPath) -> Result<()> {
        let mut ancestors = Vec::new();
        let mut cursor = Some(dir.clone());
        while let Some(current) = cursor {
            if current.is_root() {
                break;
            }
            ancestors.push(current.clone());
            cursor = current.parent();
        }
        ancestors.reverse();
        for ancestor in ancestors {
            if top.get_file_info(&ancestor).await.is_ok() {
                continue;
            }
            match top.create_dir(&ancestor).await {
                Ok(()) | Err(CompositeError::AlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
