//! File-level operations: list, download, upload, append, delete, etc.
//!
//! Every data operation follows the same transaction: negotiate a passive
//! channel, send the command while the data handshake completes, stream
//! the bytes, then require a 2xx closing reply on the control channel.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::ftp::connection::{io_timeout, FtpStream};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::listing::{self, mlsd, ListingFormat, ListingStyle};
use crate::ftp::progress::TransferReporter;
use crate::ftp::session::FtpSession;
use crate::ftp::transfer::open_passive;
use crate::ftp::types::*;

/// Chunk size for streaming transfers (64 KiB).
const CHUNK: usize = 65_536;

type DataHandshake = Pin<Box<dyn Future<Output = FtpResult<FtpStream>> + Send>>;

impl FtpSession {
    // ─── LIST / MLSD ─────────────────────────────────────────────

    /// List a directory (the working directory when `path` is `None`).
    ///
    /// Tries each listing command in turn; any 4xx/5xx reply moves on to
    /// the next one.
    pub async fn list(&mut self, path: Option<&str>) -> FtpResult<Vec<FtpEntry>> {
        let candidates: Vec<String> = match self.config().list_commands {
            Some(ref cmds) if !cmds.is_empty() => cmds.clone(),
            _ => {
                let mut cmds = Vec::with_capacity(3);
                // RFC 3659 servers advertise MLST; MLSD comes with it.
                if self.features().supports("MLST") || self.features().supports("MLSD") {
                    cmds.push("MLSD".to_string());
                }
                cmds.push("LIST -a".to_string());
                cmds.push("LIST".to_string());
                cmds
            }
        };

        let mut last_err = None;
        for cmd in candidates {
            let full = match path {
                Some(p) if !p.is_empty() => format!("{} {}", cmd, p),
                _ => cmd.clone(),
            };
            match self.list_body(&full, path.unwrap_or(".")).await {
                Ok(body) => return self.parse_body(&cmd, &body),
                Err(e) if matches!(e.code, Some(400..=599)) => {
                    debug!("[{}] {} rejected ({}), trying next listing command", self.id(), cmd, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| FtpError::invalid_config("No listing command configured")))
    }

    async fn list_body(&mut self, command: &str, name: &str) -> FtpResult<String> {
        let mut body = Vec::new();
        let reporter = self
            .progress()
            .map(|t| t.begin(name, TransferKind::List, None, 0));
        self.receive(command, None, &mut body, reporter).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn parse_body(&self, command: &str, body: &str) -> FtpResult<Vec<FtpEntry>> {
        let style = if command.trim().to_ascii_uppercase().starts_with("MLSD") {
            ListingStyle::Forced(ListingFormat::Mlsd)
        } else {
            ListingStyle::Auto
        };
        if self.config().strict_listing {
            listing::parse_listing_strict(body, style).map_err(|e| self.tag(e))
        } else {
            Ok(listing::parse_listing(body, style))
        }
    }

    // ─── DOWNLOAD (RETR) ─────────────────────────────────────────

    /// Stream a remote file into `sink`, starting at byte `start_at`.
    pub async fn download<W>(&mut self, remote: &str, sink: &mut W, start_at: u64) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.download_sized(remote, sink, start_at, None).await
    }

    async fn download_sized<W>(
        &mut self,
        remote: &str,
        sink: &mut W,
        start_at: u64,
        total: Option<u64>,
    ) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let restart = (start_at > 0).then_some(start_at);
        let reporter = self
            .progress()
            .map(|t| t.begin(remote, TransferKind::Download, total, start_at));
        self.receive(&format!("RETR {}", remote), restart, sink, reporter)
            .await
    }

    /// Download into a local file. With `start_at > 0` the existing file
    /// is kept and written from that offset on.
    pub async fn download_to_path(
        &mut self,
        remote: &str,
        local: &Path,
        start_at: u64,
    ) -> FtpResult<u64> {
        let mut file = open_local_target(local, start_at).await?;
        self.download(remote, &mut file, start_at).await
    }

    /// Download every plain file of `remote_dir` (default: the working
    /// directory) into `local_dir`. Not recursive.
    pub async fn download_to_dir(
        &mut self,
        local_dir: &Path,
        remote_dir: Option<&str>,
    ) -> FtpResult<Vec<PathBuf>> {
        let original = match remote_dir {
            Some(dir) => {
                let pwd = self.pwd().await?;
                self.cwd(dir).await?;
                Some(pwd)
            }
            None => None,
        };

        let result = self.download_listed(local_dir).await;

        if let Some(pwd) = original {
            if let Err(e) = self.cwd(&pwd).await {
                if result.is_ok() {
                    return Err(e);
                }
                warn!("[{}] Could not return to {}: {}", self.id(), pwd, e);
            }
        }
        result
    }

    async fn download_listed(&mut self, local_dir: &Path) -> FtpResult<Vec<PathBuf>> {
        fs::create_dir_all(local_dir).await?;
        let entries = self.list(None).await?;

        let mut saved = Vec::new();
        for entry in entries.iter().filter(|e| e.is_file()) {
            if !is_plain_file_name(&entry.name) {
                warn!("[{}] Skipping unsafe remote name '{}'", self.id(), entry.name);
                continue;
            }
            let target = local_dir.join(&entry.name);
            let mut file = fs::File::create(&target).await?;
            self.download_sized(&entry.name, &mut file, 0, Some(entry.size))
                .await?;
            saved.push(target);
        }
        Ok(saved)
    }

    // ─── UPLOAD (STOR / APPE) ────────────────────────────────────

    /// Upload `source` to `remote`, replacing any existing file.
    pub async fn upload<R>(&mut self, source: &mut R, remote: &str) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store("STOR", source, remote, None).await
    }

    /// Append `source` to `remote` (created if missing).
    pub async fn append<R>(&mut self, source: &mut R, remote: &str) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store("APPE", source, remote, None).await
    }

    /// Upload a local file; its length is the progress total.
    pub async fn upload_from_path(&mut self, local: &Path, remote: &str) -> FtpResult<u64> {
        let mut file = fs::File::open(local).await?;
        let len = file.metadata().await?.len();
        self.store("STOR", &mut file, remote, Some(len)).await
    }

    async fn store<R>(
        &mut self,
        verb: &str,
        source: &mut R,
        remote: &str,
        total: Option<u64>,
    ) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let reporter = self
            .progress()
            .map(|t| t.begin(remote, TransferKind::Upload, total, 0));
        self.send(&format!("{} {}", verb, remote), source, reporter)
            .await
    }

    // ─── DELE / SIZE / MDTM / RNFR+RNTO ──────────────────────────

    /// Delete a remote file. With `ignore_error_codes` a 4xx/5xx reply is
    /// returned instead of raised.
    pub async fn remove(&mut self, path: &str, ignore_error_codes: bool) -> FtpResult<FtpReply> {
        let reply = self.send_command(&format!("DELE {}", path)).await?;
        if reply.is_completion() || (ignore_error_codes && reply.is_negative()) {
            if reply.is_negative() {
                debug!("[{}] Ignoring DELE failure: {} {}", self.id(), reply.code, reply.message());
            }
            return Ok(reply);
        }
        Err(self.tag(FtpError::from_reply(reply.code, &reply.message())))
    }

    /// Size of a remote file in bytes (RFC 3659 SIZE).
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let reply = self.expect_completion(&format!("SIZE {}", path)).await?;
        let text = reply.message();
        text.trim()
            .parse::<u64>()
            .map_err(|_| self.tag(FtpError::protocol_error(format!("Cannot parse SIZE: {}", text))))
    }

    /// Modification time of a remote file (RFC 3659 MDTM).
    pub async fn last_modified(&mut self, path: &str) -> FtpResult<DateTime<Utc>> {
        let reply = self.expect_completion(&format!("MDTM {}", path)).await?;
        let text = reply.message();
        mlsd::parse_fact_time(&text)
            .ok_or_else(|| self.tag(FtpError::protocol_error(format!("Cannot parse MDTM: {}", text))))
    }

    /// Rename or move a remote file.
    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let reply = self.send_command(&format!("RNFR {}", from)).await?;
        if !reply.is_intermediate() {
            return Err(self.tag(FtpError::from_reply(reply.code, &reply.message())));
        }
        self.expect_completion(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    // ─── Data-channel transaction ────────────────────────────────

    /// Run `command` and copy the data channel into `sink`.
    async fn receive<W>(
        &mut self,
        command: &str,
        restart: Option<u64>,
        sink: &mut W,
        mut reporter: Option<TransferReporter>,
    ) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (mut data, first) = self.open_transfer(command, restart).await?;
        let limit = self.config().timeout();
        let pumped = pump(&mut data, sink, &mut reporter, limit).await;
        drop(data);
        self.finish_transfer(first, pumped).await
    }

    /// Run `command` and copy `source` into the data channel.
    async fn send<R>(
        &mut self,
        command: &str,
        source: &mut R,
        mut reporter: Option<TransferReporter>,
    ) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (mut data, first) = self.open_transfer(command, None).await?;
        let limit = self.config().timeout();
        let mut pumped = pump(source, &mut data, &mut reporter, limit).await;
        if pumped.is_ok() {
            // EOF (and TLS close_notify) tells the server the file is complete.
            if let Err(e) = io_timeout(limit, data.shutdown()).await {
                pumped = Err(FtpError::transfer_failed(format!("Closing data connection: {}", e)));
            }
        }
        drop(data);
        self.finish_transfer(first, pumped).await
    }

    /// Negotiate the data channel and send the transfer command.
    ///
    /// The command's first reply and the data handshake are awaited
    /// together: some servers only start the data TLS handshake once the
    /// command has arrived.
    async fn open_transfer(
        &mut self,
        command: &str,
        restart: Option<u64>,
    ) -> FtpResult<(FtpStream, FtpReply)> {
        let pending = open_passive(self).await?;

        if let Some(offset) = restart {
            let reply = self.send_command(&format!("REST {}", offset)).await?;
            if !reply.is_intermediate() {
                return Err(self.tag(FtpError::from_reply(reply.code, &reply.message())));
            }
        }

        self.set_state(SessionState::Transferring);
        let mut handshake: DataHandshake = Box::pin(pending.establish());
        let mut data = None;
        let reply = match self.codec() {
            Ok(codec) => {
                let exec = codec.execute(command);
                tokio::pin!(exec);
                loop {
                    tokio::select! {
                        res = &mut handshake, if data.is_none() => data = Some(res),
                        reply = &mut exec => break reply,
                    }
                }
            }
            Err(e) => Err(e),
        };

        let reply = match self.check_fatal(reply) {
            Ok(reply) => reply,
            Err(e) => {
                self.set_state(SessionState::Authenticated);
                return Err(e);
            }
        };
        if reply.is_negative() {
            self.set_state(SessionState::Authenticated);
            return Err(self.tag(FtpError::from_reply(reply.code, &reply.message())));
        }

        let stream = match data {
            Some(res) => res,
            None => handshake.await,
        };
        match stream {
            Ok(stream) => Ok((stream, reply)),
            Err(e) => {
                // Let the server report the failed transfer before giving up.
                if reply.is_preliminary() {
                    if let Ok(closing) = self.read_reply().await {
                        debug!("[{}] After data failure: {} {}", self.id(), closing.code, closing.message());
                    }
                }
                self.set_state(SessionState::Authenticated);
                Err(self.tag(e))
            }
        }
    }

    /// Read the closing reply (unless the first one already was) and
    /// combine it with the outcome of the data copy.
    async fn finish_transfer(&mut self, first: FtpReply, pumped: FtpResult<u64>) -> FtpResult<u64> {
        let closing = if first.is_preliminary() {
            self.read_reply().await
        } else {
            Ok(first)
        };
        self.set_state(SessionState::Authenticated);

        let transferred = pumped.map_err(|e| self.tag(e))?;
        let closing = closing?;
        if !closing.is_completion() {
            return Err(self.tag(FtpError::from_reply(closing.code, &closing.message())));
        }
        Ok(transferred)
    }
}

/// Copy `reader` into `writer` chunk by chunk, reporting progress.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    reporter: &mut Option<TransferReporter>,
    limit: Option<Duration>,
) -> FtpResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = io_timeout(limit, reader.read(&mut buf))
            .await
            .map_err(|e| FtpError::transfer_failed(format!("Read failed after {} bytes: {}", total, e)))?;
        if n == 0 {
            break;
        }
        io_timeout(limit, writer.write_all(&buf[..n]))
            .await
            .map_err(|e| FtpError::transfer_failed(format!("Write failed after {} bytes: {}", total, e)))?;
        total += n as u64;
        if let Some(r) = reporter.as_mut() {
            r.advance(n as u64);
        }
    }
    io_timeout(limit, writer.flush())
        .await
        .map_err(|e| FtpError::transfer_failed(format!("Flush failed: {}", e)))?;
    Ok(total)
}

/// Local download target: truncated for a fresh download, positioned at
/// `start_at` when resuming.
async fn open_local_target(local: &Path, start_at: u64) -> FtpResult<fs::File> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    if start_at == 0 {
        return Ok(fs::File::create(local).await?);
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(local)
        .await?;
    file.seek(SeekFrom::Start(start_at)).await?;
    Ok(file)
}

/// A listing name that stays inside the target directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
