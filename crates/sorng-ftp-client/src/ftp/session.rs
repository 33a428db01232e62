//! Control session: owns the control connection and its state machine.
//!
//! Lifecycle: `connect()` (greeting, implicit TLS) → `secure_if_requested()`
//! (AUTH TLS) → `authenticate()` → `prepare()` (FEAT, TYPE I, PBSZ/PROT) →
//! commands and transfers → `close()`.
//!
//! `open()` runs the whole sequence and closes the half-open session when
//! any step fails.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use uuid::Uuid;

use crate::ftp::connection::{connect_tcp, FtpStream};
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::logging::ProtocolLogger;
use crate::ftp::progress::ProgressTracker;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::service::SessionStats;
use crate::ftp::tls::{upgrade_to_tls, TlsContext};
use crate::ftp::types::*;

/// Upper bound for the QUIT exchange and socket shutdown during `close()`.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

const MLST_FACTS: &str = "type;size;modify;unix.mode;unix.owner;unix.group;";

/// Observers a session reports to.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub log: ProtocolLogger,
    pub progress: Option<Arc<ProgressTracker>>,
    pub stats: Option<Arc<SessionStats>>,
}

/// One control connection to an FTP server.
pub struct FtpSession {
    id: String,
    codec: Option<FtpCodec>,
    config: Arc<FtpConnectionConfig>,
    state: SessionState,
    tls: Option<TlsContext>,
    features: ServerFeatures,
    hooks: SessionHooks,
}

impl FtpSession {
    /// Connect, secure, log in and prepare a session.
    pub async fn open(config: Arc<FtpConnectionConfig>, hooks: SessionHooks) -> FtpResult<Self> {
        let mut session = Self::connect(config, hooks).await?;
        match session.login().await {
            Ok(()) => Ok(session),
            Err(e) => {
                let e = session.tag(e);
                session.close().await;
                Err(e)
            }
        }
    }

    async fn login(&mut self) -> FtpResult<()> {
        self.secure_if_requested().await?;
        let config = self.config.clone();
        self.authenticate(&config.user, &config.password).await?;
        self.prepare().await
    }

    /// Open the control connection and read the server greeting.
    pub async fn connect(config: Arc<FtpConnectionConfig>, hooks: SessionHooks) -> FtpResult<Self> {
        config.validate()?;
        let id = Uuid::new_v4().to_string();
        let limit = config.timeout();

        let tcp = connect_tcp((config.host.as_str(), config.port), limit)
            .await
            .map_err(|e| {
                FtpError::connection_failed(format!("Cannot connect to {}: {}", config.address(), e))
                    .with_session(id.clone())
            })?;

        let log = hooks.log.for_session(&id);
        log.event(&format!("Connected to {}", config.address()));
        if let Some(ref stats) = hooks.stats {
            stats.record_opened();
        }

        let mut session = Self {
            codec: Some(FtpCodec::new(FtpStream::Plain(tcp), log.clone(), limit)),
            hooks: SessionHooks { log, ..hooks },
            id,
            config,
            state: SessionState::Disconnected,
            tls: None,
            features: ServerFeatures::default(),
        };

        match session.greet().await {
            Ok(()) => Ok(session),
            Err(e) => {
                let e = session.tag(e);
                session.close().await;
                Err(e)
            }
        }
    }

    async fn greet(&mut self) -> FtpResult<()> {
        if self.config.secure == FtpSecurityMode::Implicit {
            let ctx = TlsContext::from_config(&self.config).await?;
            self.upgrade(ctx).await?;
        }

        let as_connect_error = |e: FtpError| match e.kind {
            FtpErrorKind::ProtocolError => FtpError {
                kind: FtpErrorKind::ConnectionFailed,
                message: format!("No greeting: {}", e.message),
                ..e
            },
            _ => e,
        };

        let mut greeting = self.codec()?.read_reply().await.map_err(as_connect_error)?;
        while greeting.code == 120 {
            debug!("[{}] Server not ready yet: {}", self.id, greeting.message());
            greeting = self.codec()?.read_reply().await.map_err(as_connect_error)?;
        }
        if !greeting.is_completion() {
            return Err(FtpError::connection_failed(format!(
                "Server refused connection: {}",
                greeting.message()
            ))
            .with_code(greeting.code));
        }
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Explicit FTPS: `AUTH TLS` and upgrade the control channel.
    pub async fn secure_if_requested(&mut self) -> FtpResult<()> {
        if self.config.secure != FtpSecurityMode::Explicit || self.is_secure() {
            return Ok(());
        }
        let ctx = TlsContext::from_config(&self.config).await?;
        let reply = self.send_command("AUTH TLS").await?;
        if !reply.is_completion() {
            return Err(FtpError::tls_failed(format!("AUTH TLS rejected: {}", reply.message()))
                .with_code(reply.code));
        }
        self.upgrade(ctx).await
    }

    async fn upgrade(&mut self, ctx: TlsContext) -> FtpResult<()> {
        let codec = self
            .codec
            .take()
            .ok_or_else(|| FtpError::protocol_error("Session is closed"))?;
        let log = codec.logger().clone();
        let limit = self.config.timeout();
        let stream = upgrade_to_tls(codec.into_stream()?, &ctx, limit).await?;
        log.event("Control connection secured with TLS");
        self.codec = Some(FtpCodec::new(stream, log, limit));
        self.tls = Some(ctx);
        Ok(())
    }

    /// `USER` / `PASS` login.
    pub async fn authenticate(&mut self, user: &str, password: &str) -> FtpResult<()> {
        let mut reply = self.send_command(&format!("USER {}", user)).await?;
        if matches!(reply.code, 331 | 332) {
            reply = self.send_command(&format!("PASS {}", password)).await?;
        }
        match reply.code {
            230 | 202 => {
                self.state = SessionState::Authenticated;
                info!("[{}] Logged in to {} as {}", self.id, self.config.host, user);
                Ok(())
            }
            332 => Err(FtpError::auth_failed("Server requires an account (ACCT)").with_code(332)),
            code => Err(FtpError::auth_failed(format!("Login rejected: {}", reply.message()))
                .with_code(code)),
        }
    }

    /// Negotiate features, binary mode and (when secured) data protection.
    pub async fn prepare(&mut self) -> FtpResult<()> {
        let feat = self.send_command("FEAT").await?;
        self.features = ServerFeatures::from_reply(&feat);

        self.expect_completion("TYPE I").await?;
        self.tolerate("STRU F").await?;
        if self.features.supports("UTF8") {
            self.tolerate("OPTS UTF8 ON").await?;
        }
        if self.features.supports("MLST") {
            self.tolerate(&format!("OPTS MLST {}", MLST_FACTS)).await?;
        }

        if self.is_secure() {
            for cmd in ["PBSZ 0", "PROT P"] {
                let reply = self.send_command(cmd).await?;
                if !reply.is_completion() {
                    return Err(FtpError::tls_failed(format!(
                        "{} rejected: {}",
                        cmd,
                        reply.message()
                    ))
                    .with_code(reply.code));
                }
            }
        }
        Ok(())
    }

    /// Send a command whose rejection is not fatal.
    async fn tolerate(&mut self, cmd: &str) -> FtpResult<()> {
        let reply = self.send_command(cmd).await?;
        if reply.is_negative() {
            debug!("[{}] Ignoring rejected {}: {} {}", self.id, cmd, reply.code, reply.message());
        }
        Ok(())
    }

    // ─── Commands ────────────────────────────────────────────────

    /// Send one command and return its reply, whatever the code.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        let result = self.codec()?.execute(cmd).await;
        self.check_fatal(result)
    }

    /// Read the next reply without sending anything.
    pub async fn read_reply(&mut self) -> FtpResult<FtpReply> {
        let result = self.codec()?.read_reply().await;
        self.check_fatal(result)
    }

    /// Send a command and require a 2xx reply.
    pub async fn expect_completion(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        let reply = self.send_command(cmd).await?;
        if !reply.is_completion() {
            return Err(FtpError::from_reply(reply.code, &reply.message()));
        }
        Ok(reply)
    }

    /// A broken control channel cannot be resynchronised; drop it.
    pub(crate) fn check_fatal<T>(&mut self, result: FtpResult<T>) -> FtpResult<T> {
        if let Err(ref e) = result {
            if e.kind == FtpErrorKind::ProtocolError || e.kind == FtpErrorKind::IoError {
                debug!("[{}] Control channel unusable: {}", self.id, e);
                self.codec = None;
            }
        }
        result.map_err(|e| self.tag(e))
    }

    /// Current remote working directory.
    pub async fn pwd(&mut self) -> FtpResult<String> {
        let reply = self.expect_completion("PWD").await?;
        parse_pwd(&reply.message())
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.expect_completion(&format!("CWD {}", path)).await?;
        Ok(())
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }

    pub fn features(&self) -> &ServerFeatures {
        &self.features
    }

    /// Whether the control channel is TLS protected.
    pub fn is_secure(&self) -> bool {
        self.codec.as_ref().map(|c| c.stream().is_tls()).unwrap_or(false)
    }

    /// Remote address of the control connection.
    pub fn peer_addr(&self) -> FtpResult<SocketAddr> {
        let codec = self
            .codec
            .as_ref()
            .ok_or_else(|| FtpError::protocol_error("Session is closed"))?;
        codec
            .stream()
            .peer_addr()
            .map_err(|e| FtpError::protocol_error(format!("No peer address: {}", e)))
    }

    pub(crate) fn tls_context(&self) -> Option<&TlsContext> {
        self.tls.as_ref()
    }

    pub(crate) fn progress(&self) -> Option<Arc<ProgressTracker>> {
        self.hooks.progress.clone()
    }

    pub(crate) fn logger(&self) -> &ProtocolLogger {
        &self.hooks.log
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != SessionState::Closed {
            self.state = state;
        }
    }

    pub(crate) fn codec(&mut self) -> FtpResult<&mut FtpCodec> {
        self.codec
            .as_mut()
            .ok_or_else(|| FtpError::protocol_error("Session is closed"))
    }

    pub(crate) fn tag(&self, e: FtpError) -> FtpError {
        if e.session_id.is_some() {
            e
        } else {
            e.with_session(self.id.clone())
        }
    }

    // ─── Teardown ────────────────────────────────────────────────

    /// Best-effort `QUIT` and socket shutdown. Idempotent; never fails.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(mut codec) = self.codec.take() {
            match tokio::time::timeout(CLOSE_WAIT, codec.execute("QUIT")).await {
                Ok(Ok(reply)) => debug!("[{}] QUIT → {}", self.id, reply.code),
                Ok(Err(e)) => debug!("[{}] QUIT failed: {}", self.id, e),
                Err(_) => debug!("[{}] QUIT timed out", self.id),
            }
            if tokio::time::timeout(CLOSE_WAIT, codec.shutdown()).await.is_err() {
                debug!("[{}] Control shutdown timed out", self.id);
            }
        }
        self.mark_closed();
        self.hooks.log.event("Session closed");
    }

    fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        if let Some(ref stats) = self.hooks.stats {
            stats.record_closed();
        }
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            debug!("[{}] Session dropped without close", self.id);
            self.mark_closed();
        }
    }
}

/// Parse `257 "/some/path"` into the path string (`""` is an escaped quote).
fn parse_pwd(text: &str) -> FtpResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))?;
    let mut path = String::new();
    let mut chars = text[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
                continue;
            }
            return Ok(path);
        }
        path.push(c);
    }
    Err(FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pwd_parsing() {
        assert_eq!(parse_pwd(r#""/home/user" is current directory"#).unwrap(), "/home/user");
        assert_eq!(parse_pwd(r#""/a ""quoted"" dir" created"#).unwrap(), r#"/a "quoted" dir"#);
        assert!(parse_pwd("no quotes").is_err());
        assert!(parse_pwd(r#""/unterminated"#).is_err());
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut cfg = FtpConnectionConfig::new("127.0.0.1", port);
        cfg.timeout_ms = 2_000;
        let err = FtpSession::open(Arc::new(cfg), SessionHooks::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, FtpErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn empty_host_is_invalid_config() {
        let cfg = FtpConnectionConfig::new("", 21);
        let err = FtpSession::connect(Arc::new(cfg), SessionHooks::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, FtpErrorKind::InvalidConfig);
    }
}
