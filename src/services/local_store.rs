use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::secrets::SecretStore;
use crate::auth::token::TokenPair;
use crate::utils::error::{StoreError, StoreResult};

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Token pair kept as `key=value` lines in a local file.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    /// Renders the record. An absent refresh token is written as an empty value.
    pub fn render(tokens: &TokenPair) -> String {
        format!(
            "{}={}\n{}={}\n",
            ACCESS_TOKEN_KEY,
            tokens.access_token,
            REFRESH_TOKEN_KEY,
            tokens.refresh_token.as_deref().unwrap_or_default()
        )
    }

    /// Parses a record. Values are split at the first `=` only.
    pub fn parse(content: &str) -> StoreResult<TokenPair> {
        let mut access_token = None;
        let mut refresh_token = None;

        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                ACCESS_TOKEN_KEY => access_token = Some(value.to_string()),
                REFRESH_TOKEN_KEY => refresh_token = Some(value.to_string()),
                _ => {}
            }
        }

        let access_token = access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StoreError::Corrupt(format!("no {} entry", ACCESS_TOKEN_KEY)))?;

        Ok(TokenPair::new(access_token, refresh_token.filter(|t| !t.is_empty())))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".token".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_atomically(&self, content: &str) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }

        let tmp = self.temp_path();
        let tmp_display = tmp.display().to_string();

        // A leftover temp file would keep its old mode; start from a fresh one.
        match fs::remove_file(&tmp).await {
            Ok(()) => debug!(path = %tmp_display, "[SecretStore] Removed stale temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&tmp_display, e)),
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp_display, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StoreError::io(&tmp_display, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp_display, e))?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| StoreError::io(&tmp_display, e))?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(self.display_path(), e));
        }

        Ok(())
    }
}

impl SecretStore for LocalFileStore {
    fn describe(&self) -> String {
        format!("local file {}", self.display_path())
    }

    async fn load(&self) -> StoreResult<Option<TokenPair>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.display_path(), "[SecretStore] Token file not found");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(self.display_path(), e)),
        };

        Self::parse(&content).map(Some)
    }

    async fn save(&self, tokens: &TokenPair) -> StoreResult<()> {
        self.write_atomically(&Self::render(tokens)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_in(dir: &tempfile::TempDir) -> LocalFileStore {
        LocalFileStore::new(dir.path().join(".tokens").join(".token"))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let pair = TokenPair::new("a", Some("b".to_string()));

        store.save(&pair).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(pair));
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&TokenPair::new("test_access_token", Some("test_refresh_token".to_string())))
            .await
            .unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, "accessToken=test_access_token\nrefreshToken=test_refresh_token\n");
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&dir).load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&TokenPair::new("00D!AQ=x", None)).await.unwrap();

        let first = store.load().await.unwrap().unwrap();
        store.save(&first).await.unwrap();
        let after_one = std::fs::read_to_string(store.path()).unwrap();

        let second = store.load().await.unwrap().unwrap();
        store.save(&second).await.unwrap();
        let after_two = std::fs::read_to_string(store.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(after_one, after_two);
        assert_eq!(second, TokenPair::new("00D!AQ=x", None));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "garbage\nrefreshToken=b\n").unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_order() {
        let pair = LocalFileStore::parse("refreshToken = r \r\n\naccessToken= a\nother=1\n").unwrap();
        assert_eq!(pair, TokenPair::new("a", Some("r".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&TokenPair::new("a", None)).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_temp_file_does_not_widen_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.temp_path(), "accessToken=stale\n").unwrap();
        std::fs::set_permissions(store.temp_path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&TokenPair::new("fresh", None)).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().await.unwrap(), Some(TokenPair::new("fresh", None)));
        assert!(!store.temp_path().exists());
    }
}
