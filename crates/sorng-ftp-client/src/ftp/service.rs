//! High-level facade: one control session per call.
//!
//! Every operation connects, secures, logs in, runs, then closes the
//! session through `finish` before handing back the result. Callers that
//! want to chain commands on one connection use `open_session()` and own
//! the returned session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::ftp::error::FtpResult;
use crate::ftp::logging::{FtpLogSink, ProtocolLogger};
use crate::ftp::progress::ProgressTracker;
use crate::ftp::session::{FtpSession, SessionHooks};
use crate::ftp::types::*;

/// Sessions opened and closed by one service.
#[derive(Debug, Default)]
pub struct SessionStats {
    opened: AtomicU64,
    closed: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            opened: self.opened.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsSnapshot {
    pub opened: u64,
    pub closed: u64,
}

impl SessionStatsSnapshot {
    /// Sessions currently open.
    pub fn in_flight(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

pub struct FtpService {
    config: Arc<FtpConnectionConfig>,
    log_sink: Option<Arc<dyn FtpLogSink>>,
    progress: RwLock<Option<Arc<ProgressTracker>>>,
    stats: Arc<SessionStats>,
}

impl FtpService {
    pub fn new(config: FtpConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            log_sink: None,
            progress: RwLock::new(None),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Build a service from a JSON connection config.
    pub fn from_json(json: &str) -> FtpResult<Self> {
        Ok(Self::new(FtpConnectionConfig::from_json(json)?))
    }

    /// Route verbose protocol traces to `sink`.
    pub fn with_log_sink(mut self, sink: Arc<dyn FtpLogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }

    pub fn session_stats(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }

    // ─── Progress ────────────────────────────────────────────────

    /// Report every chunk of every following transfer to `tracker`.
    pub fn track_progress(&self, tracker: ProgressTracker) {
        let mut slot = self.progress.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Arc::new(tracker));
    }

    pub fn clear_progress(&self) {
        let mut slot = self.progress.write().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    fn hooks(&self) -> SessionHooks {
        let progress = self
            .progress
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        SessionHooks {
            log: ProtocolLogger::new(self.config.verbose, self.log_sink.clone()),
            progress,
            stats: Some(self.stats.clone()),
        }
    }

    // ─── Sessions ────────────────────────────────────────────────

    /// Open a logged-in session the caller keeps and closes.
    pub async fn open_session(&self) -> FtpResult<FtpSession> {
        debug!("FTP session to {} ({:?})", self.config.address(), self.config.secure);
        FtpSession::open(self.config.clone(), self.hooks()).await
    }

    // ─── Operations ──────────────────────────────────────────────

    pub async fn list(&self, path: Option<&str>) -> FtpResult<Vec<FtpEntry>> {
        let mut session = self.open_session().await?;
        let result = session.list(path).await;
        finish(session, result).await
    }

    /// Download `remote` into `sink`, starting at byte `start_at`.
    pub async fn download_to<W>(&self, sink: &mut W, remote: &str, start_at: u64) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut session = self.open_session().await?;
        let result = session.download(remote, sink, start_at).await;
        finish(session, result).await
    }

    pub async fn download_to_path(&self, local: &Path, remote: &str, start_at: u64) -> FtpResult<u64> {
        let mut session = self.open_session().await?;
        let result = session.download_to_path(remote, local, start_at).await;
        finish(session, result).await
    }

    /// Download the plain files of `remote_dir` (or the login directory).
    pub async fn download_to_dir(
        &self,
        local_dir: &Path,
        remote_dir: Option<&str>,
    ) -> FtpResult<Vec<PathBuf>> {
        let mut session = self.open_session().await?;
        let result = session.download_to_dir(local_dir, remote_dir).await;
        finish(session, result).await
    }

    pub async fn upload_from<R>(&self, source: &mut R, remote: &str) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut session = self.open_session().await?;
        let result = session.upload(source, remote).await;
        finish(session, result).await
    }

    pub async fn upload_from_path(&self, local: &Path, remote: &str) -> FtpResult<u64> {
        let mut session = self.open_session().await?;
        let result = session.upload_from_path(local, remote).await;
        finish(session, result).await
    }

    pub async fn append_from<R>(&self, source: &mut R, remote: &str) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut session = self.open_session().await?;
        let result = session.append(source, remote).await;
        finish(session, result).await
    }

    /// Delete `path`; with `ignore_error_codes` a server refusal is not an error.
    pub async fn remove(&self, path: &str, ignore_error_codes: bool) -> FtpResult<FtpReply> {
        let mut session = self.open_session().await?;
        let result = session.remove(path, ignore_error_codes).await;
        finish(session, result).await
    }

    pub async fn size(&self, path: &str) -> FtpResult<u64> {
        let mut session = self.open_session().await?;
        let result = session.size(path).await;
        finish(session, result).await
    }

    pub async fn last_modified(&self, path: &str) -> FtpResult<DateTime<Utc>> {
        let mut session = self.open_session().await?;
        let result = session.last_modified(path).await;
        finish(session, result).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> FtpResult<()> {
        let mut session = self.open_session().await?;
        let result = session.rename(from, to).await;
        finish(session, result).await
    }

    /// Server FEAT capabilities.
    pub async fn features(&self) -> FtpResult<ServerFeatures> {
        let session = self.open_session().await?;
        let features = session.features().clone();
        finish(session, Ok(features)).await
    }
}

/// Close the session, then hand back the operation's result.
async fn finish<T>(mut session: FtpSession, result: FtpResult<T>) -> FtpResult<T> {
    session.close().await;
    result
}
