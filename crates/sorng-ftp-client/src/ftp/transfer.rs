//! Passive data-channel negotiation (RFC 959 PASV, RFC 2428 EPSV).
//!
//! The server opens a port, the client connects. When the control channel
//! is secured the data connection is TLS-wrapped with the control
//! channel's connector, so the server sees a resumed TLS session.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use tokio::net::TcpStream;

use crate::ftp::connection::{connect_tcp, FtpStream};
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::session::FtpSession;
use crate::ftp::tls::TlsContext;
use crate::ftp::types::PassiveMode;

lazy_static! {
    static ref EPSV_PORT: Regex = Regex::new(r"\|\|\|(\d+)\|").unwrap();
    static ref PASV_ADDR: Regex =
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})").unwrap();
}

/// A connected data socket whose TLS handshake (if any) is still pending.
pub struct PendingDataChannel {
    tcp: TcpStream,
    tls: Option<TlsContext>,
    timeout: Option<Duration>,
}

impl PendingDataChannel {
    /// Finish the data connection, wrapping it in TLS when the control
    /// channel is secured.
    pub async fn establish(self) -> FtpResult<FtpStream> {
        match self.tls {
            Some(ctx) => ctx
                .wrap(self.tcp, self.timeout, "Data")
                .await
                .map_err(|e| FtpError::data_channel(e.message)),
            None => Ok(FtpStream::Plain(self.tcp)),
        }
    }
}

/// Negotiate a passive port and connect to it.
pub async fn open_passive(session: &mut FtpSession) -> FtpResult<PendingDataChannel> {
    let target = match session.config().passive_mode {
        PassiveMode::Extended => epsv(session).await?,
        PassiveMode::Classic => pasv(session).await?,
        PassiveMode::Auto => match epsv(session).await {
            Ok(target) => target,
            Err(e) if e.kind == FtpErrorKind::DataChannelFailed => {
                debug!("[{}] EPSV unusable ({}), trying PASV", session.id(), e.message);
                pasv(session).await?
            }
            Err(e) => return Err(e),
        },
    };

    session.logger().event(&format!("Opening data connection to {}", target));
    let limit = session.config().timeout();
    let tcp = connect_tcp(target, limit).await.map_err(|e| {
        session.tag(FtpError::data_channel(format!(
            "Cannot open data connection to {}: {}",
            target, e
        )))
    })?;

    Ok(PendingDataChannel {
        tcp,
        tls: session.tls_context().cloned(),
        timeout: limit,
    })
}

async fn epsv(session: &mut FtpSession) -> FtpResult<SocketAddr> {
    let reply = session.send_command("EPSV").await?;
    if !reply.is_completion() {
        return Err(FtpError::data_channel(format!("EPSV rejected: {}", reply.message()))
            .with_code(reply.code));
    }
    let port = parse_epsv_reply(&reply.message())?;
    Ok(SocketAddr::new(session.peer_addr()?.ip(), port))
}

async fn pasv(session: &mut FtpSession) -> FtpResult<SocketAddr> {
    let reply = session.send_command("PASV").await?;
    if !reply.is_completion() {
        return Err(FtpError::data_channel(format!("PASV rejected: {}", reply.message()))
            .with_code(reply.code));
    }
    let advertised = parse_pasv_reply(&reply.message())?;
    Ok(resolve_pasv_target(advertised, session.peer_addr()?.ip()))
}

/// Port from `229 Entering Extended Passive Mode (|||port|)`.
fn parse_epsv_reply(text: &str) -> FtpResult<u16> {
    let caps = EPSV_PORT
        .captures(text)
        .ok_or_else(|| FtpError::data_channel(format!("Cannot parse EPSV reply: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| FtpError::data_channel(format!("EPSV port out of range: {}", text)))
}

/// Address from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv_reply(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_ADDR
        .captures(text)
        .ok_or_else(|| FtpError::data_channel(format!("Cannot parse PASV reply: {}", text)))?;

    let mut nums = [0u8; 6];
    for (i, slot) in nums.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse::<u8>()
            .map_err(|_| FtpError::data_channel(format!("PASV number out of range: {}", text)))?;
    }

    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Servers behind NAT often advertise their internal address; reach the
/// data port through the control connection's address instead.
fn resolve_pasv_target(advertised: SocketAddr, control_ip: IpAddr) -> SocketAddr {
    let ip = advertised.ip();
    if ip.is_unspecified() || (is_private(ip) && !is_private(control_ip)) {
        SocketAddr::new(control_ip, advertised.port())
    } else {
        advertised
    }
}

fn is_private(ip: IpAddr) -> bool {
    let private_v4 = |v4: Ipv4Addr| v4.is_private() || v4.is_loopback() || v4.is_link_local();
    match ip {
        IpAddr::V4(v4) => private_v4(v4),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().map(private_v4).unwrap_or(false),
    }
}
