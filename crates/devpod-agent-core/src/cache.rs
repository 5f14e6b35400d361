//! On-disk binary cache: `<base>/devpod-linux-<arch>`, written atomically so
//! concurrent readers never observe a partial or chmod-less file.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::arch::{binary_file_name, Arch};

/// Directory permissions applied to a freshly-created cache directory.
pub const CACHE_DIR_MODE: u32 = 0o750;
/// File permissions applied to a completed cache entry.
pub const CACHE_FILE_MODE: u32 = 0o755;

#[derive(Clone, Debug)]
pub struct BinaryCache {
    dir: PathBuf,
}

impl BinaryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, arch: Arch) -> PathBuf {
        self.dir.join(binary_file_name(arch))
    }

    /// Ensures the cache directory exists with [`CACHE_DIR_MODE`]. Callers
    /// that cannot create it should degrade to pass-through rather than
    /// fail.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        set_mode(&self.dir, CACHE_DIR_MODE).await
    }

    /// Opens the cached entry for `arch` if present.
    pub async fn open(&self, arch: Arch) -> io::Result<Option<fs::File>> {
        match fs::File::open(self.path(arch)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically writes `contents` to the cache entry for `arch`: a temp
    /// file in the same directory is populated, chmod'd, synced, then
    /// renamed over the canonical path.
    pub async fn set(&self, arch: Arch, contents: &[u8]) -> io::Result<()> {
        let mut writer = self.begin_write(arch).await?;
        writer.write_all(contents).await?;
        writer.finish().await
    }

    /// Opens a temp-file writer for streaming a cache entry into place,
    /// used by the HTTP source's tee-while-streaming path.
    pub async fn begin_write(&self, arch: Arch) -> io::Result<CacheWriter> {
        self.ensure_dir().await?;
        let file_name = format!("devpod-{}.tmp", uniquifier());
        let temp_path = self.dir.join(file_name);
        let file = fs::File::create(&temp_path).await?;
        Ok(CacheWriter {
            temp_path,
            final_path: self.path(arch),
            file: Some(file),
        })
    }
}

/// A temp file being populated ahead of an atomic rename into the cache.
pub struct CacheWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    file: Option<fs::File>,
}

impl CacheWriter {
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file
            .as_mut()
            .expect("write after finish/abort")
            .write_all(buf)
            .await
    }

    /// Chmods, syncs, and renames the temp file into its final canonical
    /// path. Consumes `self` so it cannot be written to afterward.
    pub async fn finish(mut self) -> io::Result<()> {
        let file = self.file.take().expect("finish called twice");
        file.sync_all().await?;
        drop(file);
        set_mode(&self.temp_path, CACHE_FILE_MODE).await?;
        fs::rename(&self.temp_path, &self.final_path).await
    }

    /// Removes the temp file without publishing it, used when the upstream
    /// stream fails mid-transfer.
    pub async fn abort(mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.temp_path).await;
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn uniquifier() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let n: u64 = rng.gen();
    format!("{n:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_open_round_trips_contents() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        cache.set(Arch::Amd64, b"binary-bytes").await.unwrap();

        let mut file = cache.open(Arch::Amd64).await.unwrap().expect("entry present");
        let mut out = Vec::new();
        use tokio::io::AsyncReadExt;
        file.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"binary-bytes");
    }

    #[tokio::test]
    async fn missing_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        assert!(cache.open(Arch::Arm64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_temp_files_remain_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        let mut writer = cache.begin_write(Arch::Amd64).await.unwrap();
        writer.write_all(b"chunk-one").await.unwrap();
        writer.write_all(b"chunk-two").await.unwrap();
        writer.finish().await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["devpod-linux-amd64"]);
    }

    #[tokio::test]
    async fn abort_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        let mut writer = cache.begin_write(Arch::Amd64).await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        writer.abort().await;

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
