use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Credential;
use crate::oauth_flow::{CredentialProvider, OAuthFlowError};

const CACHE_DIR: &str = ".credentials";
const CACHE_FILENAME: &str = "sheets.googleapis.com-sheetlog.json";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("home directory is unavailable for the credential cache")]
    MissingHomeDir,
    #[error("credential cache path has no parent directory: {0}")]
    MissingCacheDir(PathBuf),
    #[error("failed to create credential cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("authorization flow failed: {0}")]
    Provider(#[from] OAuthFlowError),
    #[error("failed to encode credential: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to persist credential to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `~/.credentials/sheets.googleapis.com-sheetlog.json`
pub fn default_cache_path() -> Result<PathBuf, CredentialError> {
    let home = dirs::home_dir().ok_or(CredentialError::MissingHomeDir)?;
    Ok(home.join(CACHE_DIR).join(CACHE_FILENAME))
}

/// Process-owned access token with an on-disk copy.
///
/// The disk copy is trusted as-is across restarts: expiry is not checked
/// here, so a stale token shows up later as an authorization failure from
/// the ledger rather than as an error from `obtain`.
pub struct CredentialCache {
    path: PathBuf,
    scope: String,
    provider: Arc<dyn CredentialProvider>,
    current: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(
        path: impl Into<PathBuf>,
        scope: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            path: path.into(),
            scope: scope.into(),
            provider,
            current: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn obtain(&self) -> Result<Credential, CredentialError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref() {
            return Ok(credential.clone());
        }

        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| CredentialError::MissingCacheDir(self.path.clone()))?;
        ensure_private_dir(dir)?;

        let credential = match read_cached(&self.path) {
            Some(credential) => {
                debug!(path = %self.path.display(), "using cached credential");
                credential
            }
            None => {
                info!("no usable cached credential, starting authorization flow");
                let credential = self.provider.authorize(&self.scope).await?;
                write_cached(&self.path, &credential)?;
                info!(path = %self.path.display(), "saved credential file");
                credential
            }
        };
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Removes the on-disk copy; a missing file is not an error.
    pub fn remove(path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn read_cached(path: &Path) -> Option<Credential> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "credential cache unreadable");
            return None;
        }
    };
    match serde_json::from_slice::<Credential>(&raw) {
        Ok(credential) => Some(credential),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "credential cache unparsable");
            None
        }
    }
}

fn write_cached(path: &Path, credential: &Credential) -> Result<(), CredentialError> {
    let payload = serde_json::to_vec(credential)?;
    let persist_err = |source| CredentialError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(persist_err)?;
    file.write_all(&payload).map_err(persist_err)?;
    file.sync_all().map_err(persist_err)?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(persist_err)?;
    }
    Ok(())
}

fn ensure_private_dir(dir: &Path) -> Result<(), CredentialError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| CredentialError::CacheDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        scopes: std::sync::Mutex<Vec<String>>,
    }

    impl CountingProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                scopes: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn authorize(&self, scope: &str) -> Result<Credential, OAuthFlowError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.scopes.lock().unwrap().push(scope.to_string());
            Ok(Credential {
                access_token: format!("token-{n}"),
                token_type: Some("Bearer".into()),
                refresh_token: Some("refresh".into()),
                expiry: None,
            })
        }
    }

    struct AbortingProvider;

    #[async_trait]
    impl CredentialProvider for AbortingProvider {
        async fn authorize(&self, _scope: &str) -> Result<Credential, OAuthFlowError> {
            Err(OAuthFlowError::Cancelled)
        }
    }

    #[tokio::test]
    async fn cache_miss_invokes_provider_once_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials").join("token.json");
        let provider = CountingProvider::new();

        let cache = CredentialCache::new(&path, "scope-a", provider.clone());
        let first = cache.obtain().await.unwrap();
        let again = cache.obtain().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.scopes.lock().unwrap().as_slice(), ["scope-a"]);
        assert!(path.exists());

        // A fresh cache over the same file stands in for a process restart.
        let restarted = CredentialCache::new(&path, "scope-a", provider.clone());
        let reloaded = restarted.obtain().await.unwrap();
        assert_eq!(reloaded.access_token, "token-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparsable_cache_file_triggers_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, b"{not json").unwrap();
        let provider = CountingProvider::new();

        let cache = CredentialCache::new(&path, "scope", provider.clone());
        let credential = cache.obtain().await.unwrap();

        assert_eq!(credential.access_token, "token-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let stored: Credential = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, credential);
    }

    #[tokio::test]
    async fn aborted_flow_is_credential_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let cache = CredentialCache::new(&path, "scope", Arc::new(AbortingProvider));

        let err = cache.obtain().await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Provider(OAuthFlowError::Cancelled)
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn uncreatable_cache_dir_is_credential_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let path = blocker.join("token.json");
        let provider = CountingProvider::new();
        let cache = CredentialCache::new(&path, "scope", provider.clone());

        let err = cache.obtain().await.unwrap_err();
        assert!(matches!(err, CredentialError::CacheDir { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_dir_and_file_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join(".credentials");
        let path = cache_dir.join("token.json");
        let cache = CredentialCache::new(&path, "scope", CountingProvider::new());
        cache.obtain().await.unwrap();

        let dir_mode = fs::metadata(&cache_dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn remove_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        CredentialCache::remove(&path).unwrap();
        fs::write(&path, b"{}").unwrap();
        CredentialCache::remove(&path).unwrap();
        assert!(!path.exists());
    }
}
