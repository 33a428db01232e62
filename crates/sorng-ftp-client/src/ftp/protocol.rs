//! FTP command/reply codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Buffering control-channel bytes until whole lines arrive
//! - Assembling single-line and multi-line replies
//!
//! ```text
//! 220-Welcome to my FTP server
//! 220-This is line 2
//! 220 End of greeting
//! ```

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::ftp::connection::{io_timeout, FtpStream};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::logging::ProtocolLogger;
use crate::ftp::types::FtpReply;

const READ_CHUNK: usize = 4096;

// ─── Reply decoder ───────────────────────────────────────────────────

/// Incremental, side-effect free reply parser.
///
/// Bytes may arrive in arbitrary pieces; `next_reply` only yields a reply
/// once its closing `<code><space>` line is complete.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    buf: Vec<u8>,
    partial: Option<PartialReply>,
}

#[derive(Debug)]
struct PartialReply {
    code: u16,
    lines: Vec<String>,
    raw: Vec<String>,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True while bytes or an unfinished multi-line reply are pending.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty() || self.partial.is_some()
    }

    /// Next complete reply, or `None` until more bytes are fed.
    pub fn next_reply(&mut self) -> Option<FtpResult<FtpReply>> {
        while let Some(line) = self.take_line() {
            match self.push_line(line) {
                Ok(Some(reply)) => return Some(Ok(reply)),
                Ok(None) => continue,
                Err(e) => {
                    self.partial = None;
                    return Some(Err(e));
                }
            }
        }
        None
    }

    /// Lazily drain every reply that is complete so far.
    pub fn replies(&mut self) -> impl Iterator<Item = FtpResult<FtpReply>> + '_ {
        std::iter::from_fn(move || self.next_reply())
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn push_line(&mut self, line: String) -> FtpResult<Option<FtpReply>> {
        let Some(partial) = self.partial.as_mut() else {
            if line.trim().is_empty() {
                return Ok(None);
            }
            let code = parse_code(&line)
                .ok_or_else(|| FtpError::protocol_error(format!("Reply without code: '{}'", line)))?;
            return match line.as_bytes().get(3).copied() {
                None | Some(b' ') => Ok(Some(FtpReply {
                    code,
                    lines: vec![text_after_code(&line)],
                    raw: line,
                })),
                Some(b'-') => {
                    self.partial = Some(PartialReply {
                        code,
                        lines: vec![text_after_code(&line)],
                        raw: vec![line],
                    });
                    Ok(None)
                }
                Some(_) => Err(FtpError::protocol_error(format!(
                    "Malformed reply line: '{}'",
                    line
                ))),
            };
        };

        let sep = line.as_bytes().get(3).copied();
        match (parse_code(&line), sep) {
            (Some(code), None | Some(b' ')) if code == partial.code => {
                partial.lines.push(text_after_code(&line));
                partial.raw.push(line);
                let done = self.partial.take().map(|p| FtpReply {
                    code: p.code,
                    lines: p.lines,
                    raw: p.raw.join("\n"),
                });
                Ok(done)
            }
            (Some(code), Some(b' ')) => Err(FtpError::protocol_error(format!(
                "Reply code mismatch: multi-line reply {} closed by {}",
                partial.code, code
            ))
            .with_code(code)),
            (Some(code), Some(b'-')) if code == partial.code => {
                partial.lines.push(text_after_code(&line));
                partial.raw.push(line);
                Ok(None)
            }
            _ => {
                partial.lines.push(line.clone());
                partial.raw.push(line);
                Ok(None)
            }
        }
    }
}

/// Three ASCII digits forming a code in 100..=599.
fn parse_code(line: &str) -> Option<u16> {
    let digits = line.as_bytes().get(..3)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = digits
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    (100..600).contains(&code).then_some(code)
}

fn text_after_code(line: &str) -> String {
    line.get(4..).unwrap_or("").to_string()
}

// ─── Codec ───────────────────────────────────────────────────────────

/// Command/reply exchange over an owned control stream.
pub struct FtpCodec {
    stream: FtpStream,
    decoder: ReplyDecoder,
    logger: ProtocolLogger,
    timeout: Option<Duration>,
}

impl FtpCodec {
    pub fn new(stream: FtpStream, logger: ProtocolLogger, timeout: Option<Duration>) -> Self {
        Self {
            stream,
            decoder: ReplyDecoder::new(),
            logger,
            timeout,
        }
    }

    pub fn stream(&self) -> &FtpStream {
        &self.stream
    }

    pub fn logger(&self) -> &ProtocolLogger {
        &self.logger
    }

    /// Give the stream back (for a TLS upgrade). Fails if the server sent
    /// bytes that would be lost.
    pub fn into_stream(self) -> FtpResult<FtpStream> {
        if self.decoder.has_pending() {
            return Err(FtpError::protocol_error(
                "Unexpected data on control channel before TLS upgrade",
            ));
        }
        Ok(self.stream)
    }

    /// Send a raw FTP command (CRLF is appended here).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        if cmd.contains('\r') || cmd.contains('\n') {
            return Err(FtpError::invalid_config(
                "FTP command arguments must not contain line breaks",
            ));
        }
        self.logger.command(cmd);
        let line = format!("{}\r\n", cmd);
        io_timeout(self.timeout, async {
            self.stream.write_all(line.as_bytes()).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|e| FtpError::protocol_error(format!("Failed to send command: {}", e)))
    }

    /// Read the next complete reply from the control channel.
    pub async fn read_reply(&mut self) -> FtpResult<FtpReply> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(reply) = self.decoder.next_reply() {
                let reply = reply?;
                for line in reply.raw.lines() {
                    self.logger.reply(line);
                }
                return Ok(reply);
            }

            let n = io_timeout(self.timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|e| FtpError::protocol_error(format!("Failed to read reply: {}", e)))?;
            if n == 0 {
                let detail = if self.decoder.has_pending() {
                    "Server closed connection mid-reply"
                } else {
                    "Server closed connection"
                };
                return Err(FtpError::protocol_error(detail));
            }
            self.decoder.feed(&chunk[..n]);
        }
    }

    /// Send a command and return the reply.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.send_command(cmd).await?;
        self.read_reply().await
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = io_timeout(self.timeout, self.stream.shutdown()).await {
            log::debug!("Control stream shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;

    fn decode_all(input: &[u8]) -> Vec<FtpResult<FtpReply>> {
        let mut dec = ReplyDecoder::new();
        dec.feed(input);
        dec.replies().collect()
    }

    #[test]
    fn single_line_reply() {
        let replies = decode_all(b"200 Command okay.\r\n");
        assert_eq!(replies.len(), 1);
        let r = replies[0].as_ref().unwrap();
        assert_eq!(r.code, 200);
        assert_eq!(r.lines, vec!["Command okay."]);
        assert_eq!(r.raw, "200 Command okay.");
    }

    #[test]
    fn multi_line_reply_keeps_every_line() {
        let input = b"220-Welcome\r\n220-Second line\r\n plain continuation\r\n220 Ready\r\n";
        let replies = decode_all(input);
        assert_eq!(replies.len(), 1);
        let r = replies[0].as_ref().unwrap();
        assert_eq!(r.code, 220);
        assert_eq!(
            r.lines,
            vec!["Welcome", "Second line", " plain continuation", "Ready"]
        );
        assert_eq!(r.message(), "Welcome\nSecond line\n plain continuation\nReady");
    }

    #[test]
    fn reply_split_across_reads() {
        let input: &[u8] = b"211-Features:\r\n MLSD\r\n SIZE\r\n211 End\r\n150 Opening\r\n";
        let whole: Vec<_> = decode_all(input).into_iter().map(Result::unwrap).collect();

        for split in 1..input.len() {
            let mut dec = ReplyDecoder::new();
            let mut got = Vec::new();
            dec.feed(&input[..split]);
            got.extend(dec.replies().map(Result::unwrap));
            dec.feed(&input[split..]);
            got.extend(dec.replies().map(Result::unwrap));
            assert_eq!(got, whole, "split at {}", split);
        }
        assert_eq!(whole.len(), 2);
        assert_eq!(whole[1].code, 150);
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut dec = ReplyDecoder::new();
        dec.feed(b"230 Logged");
        assert!(dec.next_reply().is_none());
        assert!(dec.has_pending());
        dec.feed(b" in\n");
        let r = dec.next_reply().unwrap().unwrap();
        assert_eq!(r.lines, vec!["Logged in"]);
        assert!(!dec.has_pending());
    }

    #[test]
    fn code_only_line_is_complete() {
        let r = decode_all(b"200\r\n").remove(0).unwrap();
        assert_eq!(r.code, 200);
        assert_eq!(r.lines, vec![""]);
    }

    #[test]
    fn missing_code_is_protocol_error() {
        let err = decode_all(b"hello there\r\n").remove(0).unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ProtocolError);
        let err = decode_all(b"099 too low\r\n").remove(0).unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ProtocolError);
        let err = decode_all(b"200x bad separator\r\n").remove(0).unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ProtocolError);
    }

    #[test]
    fn mismatched_closing_code_is_protocol_error() {
        let mut results = decode_all(b"220-Hello\r\n221 Bye\r\n200 OK\r\n");
        let err = results.remove(0).unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::ProtocolError);
        // The decoder recovers at the next reply.
        assert_eq!(results.remove(0).unwrap().code, 200);
    }

    #[test]
    fn blank_lines_between_replies_are_ignored() {
        let replies: Vec<_> = decode_all(b"\r\n200 A\r\n\r\n331 B\r\n")
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(replies.iter().map(|r| r.code).collect::<Vec<_>>(), vec![200, 331]);
    }

    #[test]
    fn bare_lf_terminators_are_accepted() {
        let r = decode_all(b"250-a\n250 b\n").remove(0).unwrap();
        assert_eq!(r.lines, vec!["a", "b"]);
    }
}
