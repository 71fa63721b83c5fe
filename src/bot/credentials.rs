//! Credential material storage.
//!
//! Private keys uploaded through the chat are written to ephemeral files so
//! the SSH library can load them from disk; passwords are kept in memory.
//! Either way the material lives exactly as long as the owning session.
//!
//! # File Safety
//!
//! Key files are created by `tempfile` with `O_EXCL`, mode `0600` and a random
//! name, so concurrent users can never collide or predict each other's paths.
//! The backing [`TempPath`] deletes the file when dropped, which covers exit
//! paths that never reach an explicit [`CredentialMaterial::release`].

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, info};

use super::auth::{AuthStrategy, KeyAuth, PasswordAuth};
use super::error::BotError;
use super::types::{AuthKind, UserId};

/// Longest file extension carried over from an uploaded key's file name.
const MAX_EXTENSION_LEN: usize = 16;

/// An uploaded private key persisted to an ephemeral file.
pub struct KeyFile {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl KeyFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file has been released.
    pub fn is_released(&self) -> bool {
        self.temp.is_none()
    }

    fn release(&mut self) {
        if let Some(temp) = self.temp.take() {
            match temp.close() {
                Ok(()) => debug!("Removed key file {:?}", self.path),
                // Best effort: the file may already be gone
                Err(e) => debug!("Could not remove key file {:?}: {}", self.path, e),
            }
        }
    }
}

impl fmt::Debug for KeyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFile")
            .field("path", &self.path)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A password held in memory for the lifetime of one session.
pub struct Secret(Option<String>);

impl Secret {
    pub fn expose(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "Secret(<redacted>)"),
            None => write!(f, "Secret(<released>)"),
        }
    }
}

/// Authentication material supplied by a chat user.
#[derive(Debug)]
pub enum CredentialMaterial {
    Key(KeyFile),
    Password(Secret),
}

impl CredentialMaterial {
    pub fn kind(&self) -> AuthKind {
        match self {
            CredentialMaterial::Key(_) => AuthKind::Key,
            CredentialMaterial::Password(_) => AuthKind::Password,
        }
    }

    /// Path of the backing key file, if this is key material.
    pub fn key_path(&self) -> Option<&Path> {
        match self {
            CredentialMaterial::Key(key) => Some(key.path()),
            CredentialMaterial::Password(_) => None,
        }
    }

    pub fn is_released(&self) -> bool {
        match self {
            CredentialMaterial::Key(key) => key.is_released(),
            CredentialMaterial::Password(secret) => secret.0.is_none(),
        }
    }

    /// Produce the authentication strategy used to connect with this material.
    pub fn auth_strategy(&self) -> Result<Box<dyn AuthStrategy>, BotError> {
        if self.is_released() {
            return Err(BotError::NoActiveSession);
        }

        Ok(match self {
            CredentialMaterial::Key(key) => Box::new(KeyAuth::new(key.path())),
            CredentialMaterial::Password(secret) => {
                Box::new(PasswordAuth::new(secret.expose().unwrap_or_default()))
            }
        })
    }

    /// Release the material: delete the key file or drop the secret.
    ///
    /// Deletion failures are swallowed. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        match self {
            CredentialMaterial::Key(key) => key.release(),
            CredentialMaterial::Password(secret) => {
                secret.0 = None;
            }
        }
    }
}

/// Writes and tracks credential material for chat users.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    /// Directory for key files; the system temp dir when `None`
    dir: Option<PathBuf>,
}

impl CredentialStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Persist uploaded private key bytes to a fresh ephemeral file.
    ///
    /// `extension` (e.g. `".pem"`) is kept as the file suffix when present.
    pub fn store_key(
        &self,
        user_id: UserId,
        bytes: &[u8],
        extension: Option<&str>,
    ) -> Result<CredentialMaterial, BotError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".sshkey-");
        if let Some(ext) = extension {
            builder.suffix(ext);
        }

        let created = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = created.map_err(|e| BotError::CredentialStorage(e.to_string()))?;

        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| BotError::CredentialStorage(e.to_string()))?;

        let temp = file.into_temp_path();
        let path = temp.to_path_buf();
        info!("Stored {} byte key file for user {}", bytes.len(), user_id);

        Ok(CredentialMaterial::Key(KeyFile {
            path,
            temp: Some(temp),
        }))
    }

    /// Hold a password for the duration of the user's session.
    pub fn store_password(&self, user_id: UserId, secret: impl Into<String>) -> CredentialMaterial {
        debug!("Stored password for user {}", user_id);
        CredentialMaterial::Password(Secret(Some(secret.into())))
    }
}

/// Extract a file suffix such as `".pem"` from an uploaded file name.
///
/// Names without an extension, dot-files like `.pem`, and extensions that are
/// not short and alphanumeric yield `None`.
pub fn extension_of(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(format!(".{}", ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::new(Some(dir.path().to_path_buf()))
    }

    mod key_material {
        use super::*;

        #[test]
        fn test_key_bytes_round_trip_until_release() {
            let dir = tempfile::tempdir().unwrap();
            let store = store_in(&dir);

            let mut material = store
                .store_key(UserId(1), b"PRIVATEKEY", Some(".pem"))
                .unwrap();
            let path = material.key_path().unwrap().to_path_buf();

            assert_eq!(std::fs::read(&path).unwrap(), b"PRIVATEKEY");
            assert_eq!(material.kind(), AuthKind::Key);

            material.release();
            assert!(!path.exists());
            assert!(material.is_released());
        }

        #[test]
        fn test_extension_is_preserved() {
            let dir = tempfile::tempdir().unwrap();
            let material = store_in(&dir)
                .store_key(UserId(1), b"k", Some(".pem"))
                .unwrap();
            let name = material.key_path().unwrap().file_name().unwrap();
            assert!(name.to_string_lossy().ends_with(".pem"));
        }

        #[test]
        fn test_no_extension() {
            let dir = tempfile::tempdir().unwrap();
            let material = store_in(&dir).store_key(UserId(1), b"k", None).unwrap();
            assert!(material.key_path().unwrap().extension().is_none());
        }

        #[test]
        fn test_concurrent_users_get_distinct_files() {
            let dir = tempfile::tempdir().unwrap();
            let store = store_in(&dir);
            let a = store.store_key(UserId(1), b"alice", Some(".pem")).unwrap();
            let b = store.store_key(UserId(2), b"bob", Some(".pem")).unwrap();

            assert_ne!(a.key_path(), b.key_path());
            assert_eq!(std::fs::read(a.key_path().unwrap()).unwrap(), b"alice");
            assert_eq!(std::fs::read(b.key_path().unwrap()).unwrap(), b"bob");
        }

        #[test]
        fn test_release_twice_is_noop() {
            let dir = tempfile::tempdir().unwrap();
            let mut material = store_in(&dir).store_key(UserId(1), b"k", None).unwrap();
            let path = material.key_path().unwrap().to_path_buf();

            material.release();
            material.release();
            assert!(!path.exists());
        }

        #[test]
        fn test_release_tolerates_externally_deleted_file() {
            let dir = tempfile::tempdir().unwrap();
            let mut material = store_in(&dir).store_key(UserId(1), b"k", None).unwrap();
            std::fs::remove_file(material.key_path().unwrap()).unwrap();

            material.release();
            assert!(material.is_released());
        }

        #[test]
        fn test_drop_without_release_removes_file() {
            let dir = tempfile::tempdir().unwrap();
            let material = store_in(&dir).store_key(UserId(1), b"k", None).unwrap();
            let path = material.key_path().unwrap().to_path_buf();

            drop(material);
            assert!(!path.exists());
        }

        #[test]
        fn test_missing_directory_is_storage_error() {
            let store = CredentialStore::new(Some(PathBuf::from("/nonexistent/dir/for/keys")));
            let err = store.store_key(UserId(1), b"k", None).unwrap_err();
            assert!(matches!(err, BotError::CredentialStorage(_)));
        }
    }

    mod password_material {
        use super::*;

        #[test]
        fn test_password_kind_and_strategy() {
            let material = CredentialStore::default().store_password(UserId(1), "hunter2");
            assert_eq!(material.kind(), AuthKind::Password);
            assert!(material.key_path().is_none());
            assert_eq!(material.auth_strategy().unwrap().name(), "password");
        }

        #[test]
        fn test_debug_redacts_secret() {
            let material = CredentialStore::default().store_password(UserId(1), "hunter2");
            let debug = format!("{:?}", material);
            assert!(!debug.contains("hunter2"));
            assert!(debug.contains("redacted"));
        }

        #[test]
        fn test_release_twice_is_noop() {
            let mut material = CredentialStore::default().store_password(UserId(1), "pw");
            material.release();
            material.release();
            assert!(material.is_released());
            assert!(material.auth_strategy().is_err());
        }
    }

    mod extensions {
        use super::*;

        #[test]
        fn test_extension_of() {
            assert_eq!(extension_of("id_rsa.pem"), Some(".pem".to_string()));
            assert_eq!(extension_of("key.tar.gz"), Some(".gz".to_string()));
            assert_eq!(extension_of("id_ed25519"), None);
            assert_eq!(extension_of(".pem"), None);
            assert_eq!(extension_of("weird.p$m"), None);
        }
    }
}
