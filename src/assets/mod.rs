use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Key under which a camera image is kept: `<area>/<date>/<file>`
pub fn asset_key(area_id: &Uuid, date: NaiveDate, file_name: &str) -> String {
    format!("{}/{}/{}", area_id, date.format("%Y-%m-%d"), file_name)
}

/// Last path segment of an image reference as written by the camera
pub fn file_name_of(reference: &str) -> &str {
    reference
        .rsplit(|c| c == '/' || c == '\\')
        .find(|s| !s.is_empty())
        .unwrap_or(reference)
}

/// Storage for fetched camera images
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Save `bytes` under `key` and return its location
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<String>;

    async fn fetch(&self, key: &str) -> Result<Vec<u8>>;

    /// Location recorded in the event log for `key`
    fn locate(&self, key: &str) -> String;
}

/// Asset store on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::AssetResolution(format!("Invalid asset key: {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

/// `X.jpg` -> `X.jpg.part`, distinct for every target name
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial image
        let tmp = part_path(&path);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Stored asset {} ({} bytes)", path.display(), bytes.len());
        Ok(self.locate(key))
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Asset {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, key: &str) -> String {
        self.root.join(key).to_string_lossy().into_owned()
    }
}
