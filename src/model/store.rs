//! Snapshot stores.
//!
//! A store keeps one snapshot of the serialized variables per version and
//! knows which one is the newest.

use crate::codec::{DType, SerializedVariable, VarData};
use crate::core::{Error, Hash256, ModelVersion, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Versioned snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `vars` under `version` and make it the newest snapshot.
    async fn save(&self, version: &ModelVersion, vars: &[SerializedVariable]) -> Result<()>;

    async fn load(&self, version: &ModelVersion) -> Result<Vec<SerializedVariable>>;

    /// All stored versions, oldest first.
    async fn list(&self) -> Result<Vec<ModelVersion>>;

    /// The newest snapshot, if any.
    async fn last(&self) -> Result<Option<ModelVersion>>;
}

const META_FILE: &str = "meta.json";
const DATA_FILE: &str = "data.bin";
const CURRENT_FILE: &str = "current";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct VarMeta {
    shape: Vec<usize>,
    dtype: DType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotMeta {
    meta: Vec<VarMeta>,
    /// Start of variable i within `data.bin`.
    byte_offsets: Vec<usize>,
    /// SHA3-256 of `data.bin`, hex encoded.
    digest: String,
}

/// Directory layout:
///
/// ```text
/// <root>/<version>/meta.json
/// <root>/<version>/data.bin
/// <root>/current
/// ```
///
/// `data.bin` is every variable's bytes back to back. `current` holds the
/// newest version name and is replaced atomically on each save.
#[derive(Clone, Debug)]
pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, version: &ModelVersion) -> Result<PathBuf> {
        let name = version.as_str();
        if name.is_empty() || name == CURRENT_FILE || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::Snapshot(format!("invalid version name {name:?}")));
        }
        Ok(self.root.join(name))
    }

    async fn read_current(&self) -> Result<Option<ModelVersion>> {
        match tokio::fs::read_to_string(self.root.join(CURRENT_FILE)).await {
            Ok(name) => Ok(Some(ModelVersion::new(name.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotStore for FlatFileStore {
    async fn save(&self, version: &ModelVersion, vars: &[SerializedVariable]) -> Result<()> {
        let dir = self.version_dir(version)?;
        tokio::fs::create_dir_all(&dir).await?;

        let mut data = Vec::with_capacity(vars.iter().map(|v| v.data.len()).sum());
        let mut meta = Vec::with_capacity(vars.len());
        let mut byte_offsets = Vec::with_capacity(vars.len());
        for var in vars {
            var.validate()?;
            byte_offsets.push(data.len());
            data.extend_from_slice(var.data.as_bytes());
            meta.push(VarMeta {
                shape: var.shape.clone(),
                dtype: var.dtype,
            });
        }

        let snapshot = SnapshotMeta {
            meta,
            byte_offsets,
            digest: Hash256::digest(&data).to_hex(),
        };

        tokio::fs::write(dir.join(DATA_FILE), &data).await?;
        tokio::fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&snapshot)?).await?;

        let tmp = self.root.join(format!(".{CURRENT_FILE}.{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, version.as_str()).await?;
        tokio::fs::rename(&tmp, self.root.join(CURRENT_FILE)).await?;

        tracing::debug!(version = %version, dir = %dir.display(), bytes = data.len(), "saved snapshot");
        Ok(())
    }

    async fn load(&self, version: &ModelVersion) -> Result<Vec<SerializedVariable>> {
        let dir = self.version_dir(version)?;
        let corrupt = |reason: String| Error::CorruptSnapshot {
            version: version.to_string(),
            reason,
        };

        let meta_bytes = match tokio::fs::read(dir.join(META_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Snapshot(format!("no snapshot for version {version}")))
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: SnapshotMeta = serde_json::from_slice(&meta_bytes)?;
        let data = tokio::fs::read(dir.join(DATA_FILE)).await?;

        let digest = Hash256::digest(&data).to_hex();
        if digest != snapshot.digest {
            return Err(corrupt(format!(
                "data digest {digest} does not match recorded {}",
                snapshot.digest
            )));
        }
        if snapshot.meta.len() != snapshot.byte_offsets.len() {
            return Err(corrupt(format!(
                "{} variables but {} offsets",
                snapshot.meta.len(),
                snapshot.byte_offsets.len()
            )));
        }

        let mut vars = Vec::with_capacity(snapshot.meta.len());
        for (i, (meta, &start)) in snapshot.meta.iter().zip(&snapshot.byte_offsets).enumerate() {
            let end = snapshot
                .byte_offsets
                .get(i + 1)
                .copied()
                .unwrap_or(data.len());
            if start > end || end > data.len() {
                return Err(corrupt(format!("offset {start}..{end} of variable {i} out of range")));
            }
            let var = SerializedVariable {
                dtype: meta.dtype,
                shape: meta.shape.clone(),
                data: VarData(data[start..end].to_vec()),
            };
            var.validate().map_err(|e| corrupt(e.to_string()))?;
            vars.push(var);
        }
        Ok(vars)
    }

    async fn list(&self) -> Result<Vec<ModelVersion>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(META_FILE)).await? {
                versions.push(ModelVersion::new(entry.file_name().to_string_lossy()));
            }
        }
        versions.sort_by_key(version_order);
        Ok(versions)
    }

    async fn last(&self) -> Result<Option<ModelVersion>> {
        if let Some(current) = self.read_current().await? {
            let dir = self.version_dir(&current)?;
            if tokio::fs::try_exists(dir.join(META_FILE)).await? {
                return Ok(Some(current));
            }
            tracing::warn!(version = %current, "current pointer names a missing snapshot");
        }
        Ok(self.list().await?.pop())
    }
}

/// Numeric versions sort numerically, after any non-numeric ones.
fn version_order(version: &ModelVersion) -> (Option<u128>, ModelVersion) {
    (version.as_str().parse().ok(), version.clone())
}

/// Keeps snapshots in memory, in save order.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<Vec<(ModelVersion, Vec<SerializedVariable>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store already holding one snapshot.
    pub fn seeded(version: impl Into<ModelVersion>, vars: Vec<SerializedVariable>) -> Self {
        Self {
            snapshots: RwLock::new(vec![(version.into(), vars)]),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, version: &ModelVersion, vars: &[SerializedVariable]) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.retain(|(v, _)| v != version);
        snapshots.push((version.clone(), vars.to_vec()));
        Ok(())
    }

    async fn load(&self, version: &ModelVersion) -> Result<Vec<SerializedVariable>> {
        self.snapshots
            .read()
            .await
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, vars)| vars.clone())
            .ok_or_else(|| Error::Snapshot(format!("no snapshot for version {version}")))
    }

    async fn list(&self) -> Result<Vec<ModelVersion>> {
        Ok(self.snapshots.read().await.iter().map(|(v, _)| v.clone()).collect())
    }

    async fn last(&self) -> Result<Option<ModelVersion>> {
        Ok(self.snapshots.read().await.last().map(|(v, _)| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{serialize, Tensor};

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("fedsync-store-{}", uuid::Uuid::new_v4()))
    }

    fn sample_vars() -> Vec<SerializedVariable> {
        vec![
            serialize(&Tensor::from_f32(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap()),
            serialize(&Tensor::from_i32(&[3], vec![7, 8, 9]).unwrap()),
            serialize(&Tensor::from_bool(&[1], vec![true]).unwrap()),
        ]
    }

    #[tokio::test]
    async fn test_flat_store_roundtrip() {
        let root = temp_root();
        let store = FlatFileStore::new(&root);
        let vars = sample_vars();

        store.save(&ModelVersion::from("1000"), &vars).await.unwrap();
        store.save(&ModelVersion::from("2000"), &vars[..1]).await.unwrap();

        assert_eq!(store.load(&ModelVersion::from("1000")).await.unwrap(), vars);
        assert_eq!(
            store.list().await.unwrap(),
            vec![ModelVersion::from("1000"), ModelVersion::from("2000")]
        );
        assert_eq!(store.last().await.unwrap(), Some(ModelVersion::from("2000")));

        let meta: serde_json::Value = serde_json::from_slice(
            &std::fs::read(root.join("1000").join(META_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(meta["byteOffsets"], serde_json::json!([0, 16, 28]));
        assert_eq!(meta["meta"][1]["dtype"], "int32");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_flat_store_detects_corruption() {
        let root = temp_root();
        let store = FlatFileStore::new(&root);
        let version = ModelVersion::from("1");
        store.save(&version, &sample_vars()).await.unwrap();

        let data_path = root.join("1").join(DATA_FILE);
        let mut data = std::fs::read(&data_path).unwrap();
        data[0] ^= 0xff;
        std::fs::write(&data_path, data).unwrap();

        assert!(matches!(
            store.load(&version).await,
            Err(Error::CorruptSnapshot { .. })
        ));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_flat_store_empty() {
        let store = FlatFileStore::new(temp_root());
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.last().await.unwrap().is_none());
        assert!(matches!(
            store.load(&ModelVersion::from("9")).await,
            Err(Error::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn test_flat_store_rejects_path_versions() {
        let store = FlatFileStore::new(temp_root());
        let result = store.save(&ModelVersion::from("../escape"), &[]).await;
        assert!(matches!(result, Err(Error::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::seeded("initial", sample_vars());
        assert_eq!(store.last().await.unwrap(), Some(ModelVersion::from("initial")));

        store.save(&ModelVersion::from("5"), &[]).await.unwrap();
        assert_eq!(store.last().await.unwrap(), Some(ModelVersion::from("5")));
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(
            store.load(&ModelVersion::from("initial")).await.unwrap(),
            sample_vars()
        );
    }
}
