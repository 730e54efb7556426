use anyhow::{Context, Result};
use log::{debug, warn};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Run scoped directory holding fetched manifests.
#[derive(Clone, Debug)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("couldn't create scratch directory {}", root.display()))?;
        let root = std::path::absolute(root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master_playlist(&self, asset: &str) -> PathBuf {
        self.root.join(format!("index_{}.m3u8", asset))
    }

    pub fn variant_playlist(&self, asset: &str, width: u32, height: u32) -> PathBuf {
        self.root
            .join(format!("index_{}_{}x{}.m3u8", asset, width, height))
    }

    pub fn dash_manifest(&self, asset: &str) -> PathBuf {
        self.root.join(format!("index_{}.mpd", asset))
    }

    pub fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)?;
        debug!("Cached {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    /// Remove everything inside the scratch directory, keeping the directory itself.
    pub fn purge(&self) -> Result<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Couldn't remove {}: {}", path.display(), e),
            }
        }

        debug!(
            "Purged {} entries from {}",
            removed,
            self.root.display()
        );
        Ok(removed)
    }
}
