use crate::error::Result;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Badge image bytes on disk, one file per content hash.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.path(hash).is_file()
    }

    /// Writes the bytes and syncs them to disk before returning.
    /// Content addressing makes a rewrite of an existing hash a no-op.
    pub fn write(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(hash);
        if path.is_file() {
            return Ok(());
        }

        // write under a temporary name so readers never observe a partial file
        let tmp = self.dir.join(format!(".{}.part", hash));
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(hash))?)
    }

    /// Byte-stream access for consumers serving the images.
    pub fn open_blob(&self, hash: &str) -> Result<File> {
        Ok(File::open(self.path(hash))?)
    }
}
