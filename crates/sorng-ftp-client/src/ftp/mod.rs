//! # sorng-ftp-client: FTP/FTPS client core
//!
//! Implements the parts of RFC 959 and its extensions needed for
//! one-shot file operations:
//! - **RFC 2228 / 4217**: AUTH TLS, PBSZ/PROT, implicit FTPS
//! - **RFC 2389**: FEAT negotiation
//! - **RFC 2428**: EPSV
//! - **RFC 3659**: MLSD, SIZE, MDTM, REST STREAM
//!
//! Architecture:
//! - `types`: config, replies, listing entries, progress, session state
//! - `error`: FTP-specific error type
//! - `logging`: injectable protocol-trace sink
//! - `protocol`: reply decoder + command/reply codec
//! - `connection`: plain / TLS stream and TCP connect
//! - `tls`: rustls connector and stream upgrade
//! - `session`: control session state machine (login, TLS, teardown)
//! - `transfer`: passive data-channel negotiation
//! - `listing`: MLSD / Unix / DOS listing grammars
//! - `file_ops`: list, download, upload, remove, size and friends
//! - `progress`: per-chunk transfer progress observer
//! - `service`: one-session-per-call facade

pub mod types;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod connection;
pub mod tls;
pub mod session;
pub mod transfer;
pub mod listing;
pub mod file_ops;
pub mod progress;
pub mod service;

pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use logging::FtpLogSink;
pub use listing::{parse_listing, parse_listing_strict, ListingFormat, ListingStyle};
pub use progress::ProgressTracker;
pub use session::{FtpSession, SessionHooks};
pub use service::{FtpService, SessionStats, SessionStatsSnapshot};
