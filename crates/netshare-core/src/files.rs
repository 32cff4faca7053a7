//! File Access Controller: opaque access tokens over groups of local files.
//!
//! A token maps file ids to source paths.  Read cursors are opened lazily on
//! the first `read` or `seek` of a file and kept until end-of-file, an
//! explicit close, or token removal.  Tokens created with an idle timeout are
//! removed by a background sweep once no call has touched them for that long;
//! every such expiry is reported exactly once on the channel returned by
//! [`FileAccessController::new`].

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default period of the idle-timeout sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Default cap on the bytes returned by one [`FileAccessController::read`].
pub const DEFAULT_MAX_READ_SIZE: usize = 1024 * 1024;

/// Errors returned by [`FileAccessController`] operations.
#[derive(Debug, Error)]
pub enum FileAccessError {
    /// The token never existed, was deleted, or expired.  Callers treat this
    /// as "already cleaned up".
    #[error("access token {0} not found")]
    TokenNotFound(Uuid),

    /// The token exists but does not cover this file id.
    #[error("file {file_id} is not part of token {token}")]
    FileNotInGroup { token: Uuid, file_id: Uuid },

    /// Opening, reading, or seeking the source file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct FileAccessConfig {
    pub sweep_interval: Duration,
    /// Requests for more bytes than this are served this many.
    pub max_read_size: usize,
}

impl Default for FileAccessConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_read_size: DEFAULT_MAX_READ_SIZE,
        }
    }
}

#[derive(Debug)]
struct TokenState {
    files: HashMap<Uuid, PathBuf>,
    idle_timeout: Option<Duration>,
    last_activity: Instant,
    streams: HashMap<Uuid, File>,
}

impl TokenState {
    fn is_expired(&self, now: Instant) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| now.duration_since(self.last_activity) >= timeout)
    }

    /// Returns the open cursor for `file_id`, opening it if needed.
    async fn stream(&mut self, token: Uuid, file_id: Uuid) -> Result<&mut File, FileAccessError> {
        if !self.streams.contains_key(&file_id) {
            let path = self
                .files
                .get(&file_id)
                .ok_or(FileAccessError::FileNotInGroup { token, file_id })?;
            let file = File::open(path).await.map_err(|source| FileAccessError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(%token, %file_id, path = %path.display(), "opened read stream");
            self.streams.insert(file_id, file);
        }
        self.streams
            .get_mut(&file_id)
            .ok_or(FileAccessError::FileNotInGroup { token, file_id })
    }

    fn io_error(&self, file_id: Uuid, source: std::io::Error) -> FileAccessError {
        FileAccessError::Io {
            path: self.files.get(&file_id).cloned().unwrap_or_default(),
            source,
        }
    }
}

type TokenTable = Arc<Mutex<HashMap<Uuid, Arc<Mutex<TokenState>>>>>;

/// Issues access tokens and serves reads against them.
pub struct FileAccessController {
    tokens: TokenTable,
    sweeper: JoinHandle<()>,
    max_read_size: usize,
}

impl FileAccessController {
    /// Creates the controller and starts its sweep task.
    ///
    /// Returns the controller and a receiver that yields the id of every
    /// token removed because of its idle timeout.  Explicit
    /// [`delete_token`](Self::delete_token) calls are not reported.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: FileAccessConfig) -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let tokens: TokenTable = Arc::new(Mutex::new(HashMap::new()));
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&tokens),
            config.sweep_interval,
            closed_tx,
        ));
        let controller = Self {
            tokens,
            sweeper,
            max_read_size: config.max_read_size.max(1),
        };
        (controller, closed_rx)
    }

    /// Registers `files` under a new token.
    ///
    /// `idle_timeout` of `None` means the token lives until deleted.
    pub async fn create_token(
        &self,
        files: HashMap<Uuid, PathBuf>,
        idle_timeout: Option<Duration>,
    ) -> Uuid {
        let token = Uuid::new_v4();
        let count = files.len();
        let state = TokenState {
            files,
            idle_timeout,
            last_activity: Instant::now(),
            streams: HashMap::new(),
        };
        self.tokens
            .lock()
            .await
            .insert(token, Arc::new(Mutex::new(state)));
        info!(%token, files = count, ?idle_timeout, "access token created");
        token
    }

    /// Reads up to `len` bytes from the current position of `file_id`.
    ///
    /// `len` is capped at [`FileAccessConfig::max_read_size`].  A result
    /// shorter than the capped length means end-of-file was reached; the
    /// cursor for that file is released, and a later read starts over from
    /// the beginning.
    ///
    /// # Errors
    ///
    /// [`FileAccessError::TokenNotFound`], [`FileAccessError::FileNotInGroup`],
    /// or [`FileAccessError::Io`].  An I/O error also releases the cursor.
    pub async fn read(&self, token: Uuid, file_id: Uuid, len: usize) -> Result<Vec<u8>, FileAccessError> {
        let entry = self.entry(token).await?;
        let mut state = entry.lock().await;
        state.last_activity = Instant::now();

        let len = len.min(self.max_read_size);
        let stream = state.stream(token, file_id).await?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        let mut failure = None;
        while filled < len {
            match stream.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            state.streams.remove(&file_id);
            return Err(state.io_error(file_id, e));
        }
        buf.truncate(filled);
        if filled < len {
            debug!(%token, %file_id, "end of file reached, releasing stream");
            state.streams.remove(&file_id);
        }
        Ok(buf)
    }

    /// Moves the cursor of `file_id` and returns the new position.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub async fn seek(&self, token: Uuid, file_id: Uuid, pos: SeekFrom) -> Result<u64, FileAccessError> {
        let entry = self.entry(token).await?;
        let mut state = entry.lock().await;
        state.last_activity = Instant::now();

        let stream = state.stream(token, file_id).await?;
        match stream.seek(pos).await {
            Ok(position) => Ok(position),
            Err(e) => {
                state.streams.remove(&file_id);
                Err(state.io_error(file_id, e))
            }
        }
    }

    /// Releases the cursor of one file.  The token and other cursors stay.
    ///
    /// # Errors
    ///
    /// [`FileAccessError::TokenNotFound`] if the token is gone.
    pub async fn close_stream(&self, token: Uuid, file_id: Uuid) -> Result<(), FileAccessError> {
        let entry = self.entry(token).await?;
        let mut state = entry.lock().await;
        state.last_activity = Instant::now();
        if state.streams.remove(&file_id).is_some() {
            debug!(%token, %file_id, "read stream closed on request");
        }
        Ok(())
    }

    /// Removes a token and closes all its cursors.  Returns `false` if the
    /// token did not exist.
    pub async fn delete_token(&self, token: Uuid) -> bool {
        let removed = self.tokens.lock().await.remove(&token).is_some();
        if removed {
            info!(%token, "access token deleted");
        }
        removed
    }

    pub async fn has_token(&self, token: Uuid) -> bool {
        self.tokens.lock().await.contains_key(&token)
    }

    pub async fn token_count(&self) -> usize {
        self.tokens.lock().await.len()
    }

    async fn entry(&self, token: Uuid) -> Result<Arc<Mutex<TokenState>>, FileAccessError> {
        self.tokens
            .lock()
            .await
            .get(&token)
            .cloned()
            .ok_or(FileAccessError::TokenNotFound(token))
    }
}

impl Drop for FileAccessController {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

async fn sweep_loop(tokens: TokenTable, interval: Duration, closed_tx: mpsc::UnboundedSender<Uuid>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let expired: Vec<Uuid> = {
            let mut table = tokens.lock().await;
            let expired: Vec<Uuid> = table
                .iter()
                // A token whose lock is held is mid-call, hence not idle.
                .filter(|(_, state)| state.try_lock().is_ok_and(|s| s.is_expired(now)))
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                table.remove(id);
            }
            expired
        };

        for token in expired {
            info!(%token, "access token expired after idle timeout");
            if closed_tx.send(token).is_err() {
                warn!(%token, "nobody is listening for token expiry");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fast_config() -> FileAccessConfig {
        FileAccessConfig {
            sweep_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_read_streams_file_in_pieces_and_reports_eof_with_short_read() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let file_id = Uuid::new_v4();
        let path = write_file(dir.path(), "a.txt", b"hello world");
        let (controller, _closed) = FileAccessController::new(fast_config());
        let token = controller
            .create_token(HashMap::from([(file_id, path)]), None)
            .await;

        // Act
        let first = controller.read(token, file_id, 5).await.unwrap();
        let second = controller.read(token, file_id, 100).await.unwrap();

        // Assert
        assert_eq!(first, b"hello");
        assert_eq!(second, b" world");
        assert!(controller.has_token(token).await, "EOF must not invalidate the token");
    }

    #[tokio::test]
    async fn test_oversized_read_request_is_capped_and_keeps_cursor() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let file_id = Uuid::new_v4();
        let path = write_file(dir.path(), "big", &[7u8; 40]);
        let (controller, _closed) = FileAccessController::new(FileAccessConfig {
            max_read_size: 16,
            ..fast_config()
        });
        let token = controller
            .create_token(HashMap::from([(file_id, path)]), None)
            .await;

        // Act
        let first = controller.read(token, file_id, u32::MAX as usize).await.unwrap();
        let second = controller.read(token, file_id, u32::MAX as usize).await.unwrap();
        let third = controller.read(token, file_id, u32::MAX as usize).await.unwrap();
        let after_eof = controller.read(token, file_id, 4).await.unwrap();

        // Assert
        assert_eq!((first.len(), second.len(), third.len()), (16, 16, 8));
        assert_eq!(after_eof.len(), 4, "the short read released the cursor");
    }

    #[tokio::test]
    async fn test_seek_positions_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let file_id = Uuid::new_v4();
        let path = write_file(dir.path(), "digits", b"0123456789");
        let (controller, _closed) = FileAccessController::new(fast_config());
        let token = controller
            .create_token(HashMap::from([(file_id, path)]), None)
            .await;

        let pos = controller.seek(token, file_id, SeekFrom::End(-3)).await.unwrap();
        let tail = controller.read(token, file_id, 3).await.unwrap();

        assert_eq!(pos, 7);
        assert_eq!(tail, b"789");
    }

    #[tokio::test]
    async fn test_close_stream_restarts_file_and_keeps_other_streams() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let files = HashMap::from([
            (a, write_file(dir.path(), "a", b"aaaa")),
            (b, write_file(dir.path(), "b", b"bbbb")),
        ]);
        let (controller, _closed) = FileAccessController::new(fast_config());
        let token = controller.create_token(files, None).await;
        controller.read(token, a, 2).await.unwrap();
        controller.read(token, b, 2).await.unwrap();

        // Act
        controller.close_stream(token, a).await.unwrap();

        // Assert
        assert_eq!(controller.read(token, a, 2).await.unwrap(), b"aa");
        assert_eq!(controller.read(token, b, 2).await.unwrap(), b"bb");
    }

    #[tokio::test]
    async fn test_unknown_file_id_is_rejected() {
        let (controller, _closed) = FileAccessController::new(fast_config());
        let token = controller.create_token(HashMap::new(), None).await;

        let result = controller.read(token, Uuid::new_v4(), 1).await;

        assert!(matches!(result, Err(FileAccessError::FileNotInGroup { .. })));
    }

    #[tokio::test]
    async fn test_missing_source_file_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_id = Uuid::new_v4();
        let (controller, _closed) = FileAccessController::new(fast_config());
        let token = controller
            .create_token(HashMap::from([(file_id, dir.path().join("gone"))]), None)
            .await;

        let result = controller.read(token, file_id, 1).await;

        assert!(matches!(result, Err(FileAccessError::Io { .. })));
    }

    #[tokio::test]
    async fn test_idle_token_expires_and_notifies_exactly_once() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let files = HashMap::from([
            (a, write_file(dir.path(), "a", b"first file")),
            (b, write_file(dir.path(), "b", b"second file")),
        ]);
        let (controller, mut closed) = FileAccessController::new(fast_config());
        let token = controller
            .create_token(files, Some(Duration::from_millis(100)))
            .await;

        // Act
        controller.read(token, a, 4).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Assert
        assert!(!controller.has_token(token).await);
        assert_eq!(closed.try_recv().ok(), Some(token));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(closed.try_recv().is_err(), "expiry must be reported once");
        assert!(matches!(
            controller.read(token, a, 4).await,
            Err(FileAccessError::TokenNotFound(t)) if t == token
        ));
    }

    #[tokio::test]
    async fn test_activity_keeps_token_alive() {
        let dir = tempfile::tempdir().unwrap();
        let file_id = Uuid::new_v4();
        let path = write_file(dir.path(), "f", &[1u8; 64]);
        let (controller, _closed) = FileAccessController::new(fast_config());
        let token = controller
            .create_token(HashMap::from([(file_id, path)]), Some(Duration::from_millis(100)))
            .await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            controller.seek(token, file_id, SeekFrom::Start(0)).await.unwrap();
        }

        assert!(controller.has_token(token).await);
    }

    #[tokio::test]
    async fn test_explicit_delete_is_not_reported_as_expiry() {
        let (controller, mut closed) = FileAccessController::new(fast_config());
        let token = controller
            .create_token(HashMap::new(), Some(Duration::from_millis(30)))
            .await;

        assert!(controller.delete_token(token).await);
        assert!(!controller.delete_token(token).await);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(closed.try_recv().is_err());
        assert_eq!(controller.token_count().await, 0);
    }
}
