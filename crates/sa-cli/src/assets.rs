//! Asset source backed by a directory of JSON hierarchy descriptions.
//!
//! A reference `chair.glb` resolves to `<dir>/chair.glb.json`, which holds a
//! serialized [`Asset`].

use sa_core::{Asset, AssetError, AssetSource};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct DirAssetSource {
    dir: PathBuf,
}

impl DirAssetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, reference: &str) -> Option<PathBuf> {
        // References are plain file names; anything that walks out of the
        // directory is treated as missing.
        let name = Path::new(reference).file_name()?;
        if name != reference {
            return None;
        }
        let mut file = name.to_os_string();
        file.push(".json");
        Some(self.dir.join(file))
    }
}

impl AssetSource for DirAssetSource {
    async fn load(&self, reference: &str) -> Result<Asset, AssetError> {
        let path = self
            .path_for(reference)
            .ok_or_else(|| AssetError::NotFound(reference.to_string()))?;
        log::trace!("reading {}", path.display());

        let text = tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AssetError::NotFound(reference.to_string()),
            _ => AssetError::Io {
                reference: reference.to_string(),
                message: e.to_string(),
            },
        })?;
        serde_json::from_str(&text).map_err(|e| AssetError::Malformed {
            reference: reference.to_string(),
            message: e.to_string(),
        })
    }
}
