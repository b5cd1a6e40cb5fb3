//! TOML-sourced mount configuration (§6 "Mount configuration" table).
//! Grounded on the teacher's unused `serde`/`toml` dependencies, wired up
//! for their evident purpose: a file a mounting tool hands to
//! [`crate::registry::MountRegistry::add`].

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{map_io_error, CompositeError, Result};

/// One entry in `sources[]`: an ordered layer of the source stack, source 0
/// being the sole writable layer (§4.2).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub writable: bool,
}

/// Static volume-info overrides a mount can present instead of forwarding
/// source 0's own values verbatim (§6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeInfoOverride {
    pub name: Option<String>,
    pub serial: Option<u32>,
    #[serde(rename = "fsName")]
    pub fs_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    #[serde(rename = "mountPoint")]
    pub mount_point: String,
    #[serde(default = "default_metadata_filename", rename = "metadataFilename")]
    pub metadata_filename: String,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default = "default_true", rename = "deferCopyEnabled")]
    pub defer_copy_enabled: bool,
    #[serde(default, rename = "caseSensitive")]
    pub case_sensitive: bool,
    pub sources: Vec<SourceConfig>,
    #[serde(default, rename = "volumeInfo")]
    pub volume_info: VolumeInfoOverride,
}

fn default_metadata_filename() -> String {
    ".mergefs.meta".to_owned()
}

fn default_true() -> bool {
    true
}

/// Parses `path` as a [`MountConfig`] and resolves every relative path it
/// names (each source's `root`) against `path`'s own parent directory. The
/// process working directory is never touched, so mounts loaded from
/// different configuration files never interfere with each other.
pub async fn load_mount_config(path: &Path) -> Result<MountConfig> {
    let raw = tokio::fs::read_to_string(path).await.map_err(map_io_error)?;
    let mut config: MountConfig = toml::from_str(&raw)
        .map_err(|e| CompositeError::MetadataCorrupt(format!("invalid mount config: {e}")))?;

    if config.sources.is_empty() {
        return Err(CompositeError::MetadataCorrupt("mount config has no sources".into()));
    }
    if !config.writable && config.sources.iter().any(|s| s.writable) {
        return Err(CompositeError::MetadataCorrupt(
            "a source may only be writable=true if the mount itself is writable".into(),
        ));
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for source in &mut config.sources {
        if source.root.is_relative() {
            source.root = base.join(&source.root);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_and_resolves_relative_source_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mount.toml");
        tokio::fs::write(
            &config_path,
            r#"
mountPoint = "M:\\"
writable = true

[[sources]]
root = "layer0"
writable = true

[[sources]]
root = "layer1"
"#,
        )
        .await
        .unwrap();

        let config = load_mount_config(&config_path).await.unwrap();
        assert_eq!(config.mount_point, r"M:\");
        assert_eq!(config.case_sensitive, false);
        assert!(config.defer_copy_enabled);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].root, dir.path().join("layer0"));
        assert!(config.sources[0].writable);
        assert!(!config.sources[1].writable);
    }

    #[tokio::test]
    async fn rejects_empty_source_list() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mount.toml");
        tokio::fs::write(&config_path, "mountPoint = \"M:\\\\\"\nsources = []\n").await.unwrap();
        assert!(load_mount_config(&config_path).await.is_err());
    }
}
