//! # SortOfRemote NG – FTP client core
//!
//! Self-contained FTP / FTPS client used by the file-transfer panels:
//!   • Control session with login, explicit / implicit TLS and FEAT probing
//!   • Incremental multi-line reply decoding
//!   • Passive (EPSV / PASV) data channels with TLS session resumption
//!   • MLSD, Unix `ls -l` and DOS listing parsers with auto-detection
//!   • Streaming upload / download with REST offsets and progress callbacks
//!   • One-session-per-call facade (`FtpService`)

pub mod ftp;

pub use ftp::*;
