//! SSH host key material at `~/.devpod/keys`, generated on first use.
//!
//! Key generation is racy if two tasks provision an empty keys directory
//! concurrently, so [`KeyStore`] guards it with an explicit lock rather than
//! a `static`: callers share one instance (wrapped in an `Arc` if shared
//! across tasks).

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("failed to create keys directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read host key seed at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write host key seed at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("host key seed at {path} is corrupt (expected 32 bytes, got {len})")]
    CorruptSeed { path: PathBuf, len: usize },
    #[error("ed25519 key generation failed")]
    GenerationFailed,
}

const SEED_FILE_NAME: &str = "host_ed25519_seed";

/// Owns the `~/.devpod/keys` directory and the mutex guarding key
/// generation. One instance should be shared (behind an `Arc`) across every
/// task that might need the host key, rather than each task racing to
/// generate its own.
pub struct KeyStore {
    keys_dir: PathBuf,
    lock: Mutex<()>,
}

impl KeyStore {
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// The conventional `~/.devpod/keys` location.
    pub fn default_dir() -> PathBuf {
        dirs_home().join(".devpod").join("keys")
    }

    /// Returns the daemon's host key pair, generating and persisting one on
    /// first use. Guarded end-to-end by [`Self::lock`] so two tasks racing
    /// to provision the same fresh `~/.devpod/keys` never both generate (and
    /// one silently overwrite the other's) a key.
    pub async fn host_key(&self) -> Result<russh_keys::key::KeyPair, KeyStoreError> {
        let _guard = self.lock.lock().await;

        let seed_path = self.keys_dir.join(SEED_FILE_NAME);
        match tokio::fs::read(&seed_path).await {
            Ok(bytes) => seed_to_keypair(&seed_path, bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.generate_and_persist(&seed_path).await
            }
            Err(source) => Err(KeyStoreError::Read {
                path: seed_path,
                source,
            }),
        }
    }

    async fn generate_and_persist(
        &self,
        seed_path: &std::path::Path,
    ) -> Result<russh_keys::key::KeyPair, KeyStoreError> {
        tokio::fs::create_dir_all(&self.keys_dir)
            .await
            .map_err(|source| KeyStoreError::CreateDir {
                path: self.keys_dir.clone(),
                source,
            })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(
                &self.keys_dir,
                std::fs::Permissions::from_mode(0o700),
            )
            .await;
        }

        let key_pair =
            russh_keys::key::KeyPair::generate_ed25519().ok_or(KeyStoreError::GenerationFailed)?;
        let seed = match &key_pair {
            russh_keys::key::KeyPair::Ed25519(signing_key) => signing_key.to_bytes(),
            #[allow(unreachable_patterns)]
            _ => return Err(KeyStoreError::GenerationFailed),
        };

        let temp_path = self.keys_dir.join(format!("{SEED_FILE_NAME}.tmp"));
        let mut file =
            tokio::fs::File::create(&temp_path)
                .await
                .map_err(|source| KeyStoreError::Write {
                    path: temp_path.clone(),
                    source,
                })?;
        file.write_all(&seed)
            .await
            .map_err(|source| KeyStoreError::Write {
                path: temp_path.clone(),
                source,
            })?;
        file.sync_all()
            .await
            .map_err(|source| KeyStoreError::Write {
                path: temp_path.clone(),
                source,
            })?;
        drop(file);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await;
        }
        tokio::fs::rename(&temp_path, seed_path)
            .await
            .map_err(|source| KeyStoreError::Write {
                path: seed_path.to_path_buf(),
                source,
            })?;

        Ok(key_pair)
    }
}

fn seed_to_keypair(
    path: &std::path::Path,
    bytes: Vec<u8>,
) -> Result<russh_keys::key::KeyPair, KeyStoreError> {
    if bytes.len() != 32 {
        return Err(KeyStoreError::CorruptSeed {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes);
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    Ok(russh_keys::key::KeyPair::Ed25519(signing_key))
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519_bytes(pair: &russh_keys::key::KeyPair) -> [u8; 32] {
        match pair {
            russh_keys::key::KeyPair::Ed25519(signing_key) => signing_key.to_bytes(),
            #[allow(unreachable_patterns)]
            _ => panic!("expected an Ed25519 key pair"),
        }
    }

    #[tokio::test]
    async fn generates_once_then_reuses_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        let first = store.host_key().await.unwrap();
        let second = store.host_key().await.unwrap();

        assert_eq!(ed25519_bytes(&first), ed25519_bytes(&second));
    }

    #[tokio::test]
    async fn seed_file_has_restrictive_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        store.host_key().await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(dir.path().join(SEED_FILE_NAME)).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn corrupt_seed_is_reported_rather_than_silently_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SEED_FILE_NAME), b"too-short")
            .await
            .unwrap();
        let store = KeyStore::new(dir.path());
        let err = store.host_key().await.unwrap_err();
        assert!(matches!(err, KeyStoreError::CorruptSeed { .. }));
    }
}
