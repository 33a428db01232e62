//! Shared types for the FTP crate.

use crate::ftp::error::{FtpError, FtpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

// ─── Connection / Session ────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FtpSecurityMode {
    /// Plain-text FTP.
    #[default]
    None,
    /// Explicit FTPS: starts plain then upgrades via AUTH TLS.
    Explicit,
    /// Implicit FTPS: TLS from the first byte.
    Implicit,
}

/// Accepts `true` / `false` as well as the mode names, so configs written
/// for the `secure: boolean | "implicit"` shape keep loading.
impl<'de> Deserialize<'de> for FtpSecurityMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Self::Explicit),
            Raw::Flag(false) => Ok(Self::None),
            Raw::Name(name) => match name.to_ascii_lowercase().as_str() {
                "none" | "off" | "false" => Ok(Self::None),
                "explicit" | "true" => Ok(Self::Explicit),
                "implicit" => Ok(Self::Implicit),
                other => Err(serde::de::Error::custom(format!(
                    "unknown FTP security mode '{}'",
                    other
                ))),
            },
        }
    }
}

/// How the passive data port is requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PassiveMode {
    /// EPSV first, PASV when the server refuses or garbles EPSV.
    #[default]
    Auto,
    /// EPSV only.
    Extended,
    /// PASV only.
    Classic,
}

/// TLS knobs for FTPS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FtpTlsOptions {
    /// Accept self-signed / untrusted certificates.
    pub accept_invalid_certs: bool,
    /// Extra PEM bundle trusted in addition to the native roots.
    pub ca_cert_path: Option<String>,
    /// Name used for SNI and certificate verification instead of `host`.
    pub server_name: Option<String>,
}

/// Configuration for a single FTP connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FtpConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub secure: FtpSecurityMode,
    pub secure_options: FtpTlsOptions,
    /// Trace raw protocol lines to the log sink.
    pub verbose: bool,
    /// Timeout in milliseconds for every connect / read / write, 0 disables it.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    pub passive_mode: PassiveMode,
    /// Listing commands to try in order instead of the built-in list.
    pub list_commands: Option<Vec<String>>,
    /// Fail listings on unparseable lines instead of skipping them.
    pub strict_listing: bool,
}

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

impl Default for FtpConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 21,
            user: "anonymous".into(),
            password: "guest".into(),
            secure: FtpSecurityMode::None,
            secure_options: FtpTlsOptions::default(),
            verbose: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            passive_mode: PassiveMode::Auto,
            list_commands: None,
            strict_listing: false,
        }
    }
}

impl FtpConnectionConfig {
    /// Plain-FTP config for `host:port` with every other field defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Load a config from its JSON (camelCase) representation.
    pub fn from_json(json: &str) -> FtpResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FtpError::invalid_config(format!("Invalid FTP config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.host.trim().is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        let has_line_break = |s: &str| s.contains('\r') || s.contains('\n');
        if has_line_break(&self.host) || has_line_break(&self.user) || has_line_break(&self.password)
        {
            return Err(FtpError::invalid_config(
                "Host, user and password must not contain line breaks",
            ));
        }
        Ok(())
    }

    /// Effective I/O timeout; `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Control-session lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Transferring,
    Closed,
}

// ─── FTP Reply ───────────────────────────────────────────────────────

/// A single FTP reply (may be multi-line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpReply {
    pub code: u16,
    /// Message text of every line, code prefixes removed.
    pub lines: Vec<String>,
    /// Lines as received, joined with `\n`.
    pub raw: String,
}

impl FtpReply {
    /// Message lines joined with `\n`.
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Positive preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Positive completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Positive intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Transient (4xx) or permanent (5xx) negative reply.
    pub fn is_negative(&self) -> bool {
        self.code >= 400
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One entry from a directory listing (parsed from LIST or MLSD output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Timestamp text exactly as listed.
    pub modified_raw: Option<String>,
    /// Unix symbolic permissions, e.g. `-rw-r--r--`.
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
    /// MLSD fact map with lower-cased keys (e.g. "type" → "file").
    #[serde(default)]
    pub facts: HashMap<String, String>,
}

impl FtpEntry {
    pub fn new(name: impl Into<String>, kind: FtpEntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: 0,
            modified: None,
            modified_raw: None,
            permissions: None,
            owner: None,
            group: None,
            link_target: None,
            facts: HashMap::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FtpEntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FtpEntryKind::Directory
    }
}

// ─── Transfer ────────────────────────────────────────────────────────

/// What a data-channel operation is moving.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferKind {
    List,
    Download,
    Upload,
}

/// Live progress snapshot, delivered once per transferred chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    /// Remote path (or listing target) of the current transfer.
    pub name: String,
    pub kind: TransferKind,
    /// Bytes moved so far by the current transfer.
    pub transferred_bytes: u64,
    /// Resume position the transfer started from (`REST`), 0 otherwise.
    pub offset: u64,
    /// Bytes moved by every transfer since the tracker was installed.
    pub bytes_overall: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<f32>,
    pub speed_bps: u64,
}

// ─── Server Capabilities ─────────────────────────────────────────────

/// Parsed FEAT reply: upper-cased feature name → parameter text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub entries: BTreeMap<String, String>,
}

impl ServerFeatures {
    /// Build from the lines of a 211 FEAT reply.
    pub fn from_reply(reply: &FtpReply) -> Self {
        let mut entries = BTreeMap::new();
        if !reply.is_completion() || reply.lines.len() < 2 {
            return Self { entries };
        }
        // First and last lines are the "Features:" / "End" banners.
        for line in &reply.lines[1..reply.lines.len() - 1] {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, params) = line.split_once(' ').unwrap_or((line, ""));
            entries.insert(name.to_ascii_uppercase(), params.trim().to_string());
        }
        Self { entries }
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.entries.contains_key(&feature.to_ascii_uppercase())
    }

    pub fn params(&self, feature: &str) -> Option<&str> {
        self.entries
            .get(&feature.to_ascii_uppercase())
            .map(String::as_str)
    }
}
