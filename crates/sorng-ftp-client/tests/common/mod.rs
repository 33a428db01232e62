//! In-process scripted FTP server for integration tests.
//!
//! Plain FTP only. Files live in memory keyed by absolute path; every
//! received command line is recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use sorng_ftp_client::FtpConnectionConfig;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStyle {
    Unix,
    Dos,
}

#[derive(Debug, Clone)]
pub struct MockOptions {
    pub list_style: ListStyle,
    /// Advertise MLST and answer MLSD.
    pub mlsd: bool,
    pub epsv: bool,
    /// Sent verbatim instead of a real PASV reply.
    pub pasv_reply: Option<String>,
    /// Answer `LIST -a` with 501.
    pub reject_list_flags: bool,
    /// Sent verbatim instead of running MLSD.
    pub fail_mlsd: Option<String>,
    /// RETR sends this many bytes, drops the data socket and replies 426.
    pub abort_retr: Option<usize>,
    /// EPSV/PASV advertise a port nobody listens on.
    pub dead_pasv_port: bool,
    /// On this verb, send the first line of a multi-line reply and hang up.
    pub hang_up_after: Option<String>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            list_style: ListStyle::Unix,
            mlsd: false,
            epsv: true,
            pasv_reply: None,
            reject_list_flags: false,
            fail_mlsd: None,
            abort_retr: None,
            dead_pasv_port: false,
            hang_up_after: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub commands: Vec<String>,
    pub data_connections: usize,
    pub control_connections: usize,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(opts: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut initial = MockState::default();
        initial.dirs.insert("/".to_string());
        let state = Arc::new(Mutex::new(initial));
        let opts = Arc::new(opts);

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                shared.lock().unwrap().control_connections += 1;
                let state = shared.clone();
                let opts = opts.clone();
                tokio::spawn(async move {
                    let _ = serve(sock, opts, state).await;
                });
            }
        });

        Self { addr, state }
    }

    /// Client config pointing at this server.
    pub fn config(&self) -> FtpConnectionConfig {
        let mut cfg = FtpConnectionConfig::new("127.0.0.1", self.addr.port());
        cfg.user = USER.to_string();
        cfg.password = PASSWORD.to_string();
        cfg.timeout_ms = 5_000;
        cfg
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.insert(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn has_command(&self, prefix: &str) -> bool {
        self.commands().iter().any(|c| c.starts_with(prefix))
    }

    pub fn data_connections(&self) -> usize {
        self.state.lock().unwrap().data_connections
    }

    pub fn control_connections(&self) -> usize {
        self.state.lock().unwrap().control_connections
    }
}

/// A server that accepts connections and never says anything.
pub async fn silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });
    addr
}

/// Deterministic non-repeating-ish test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn reply(w: &mut OwnedWriteHalf, text: &str) -> io::Result<()> {
    w.write_all(format!("{}\r\n", text).as_bytes()).await
}

async fn serve(sock: TcpStream, opts: Arc<MockOptions>, state: Arc<Mutex<MockState>>) -> io::Result<()> {
    let (read, mut write) = sock.into_split();
    let mut lines = BufReader::new(read).lines();
    write
        .write_all(b"220-Mock FTP server\r\n220 Ready\r\n")
        .await?;

    let mut cwd = "/".to_string();
    let mut passive: Option<TcpListener> = None;
    let mut rest: usize = 0;
    let mut rename_from: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end_matches('\r').to_string();
        state.lock().unwrap().commands.push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        if opts.hang_up_after.as_deref() == Some(verb.as_str()) {
            write.write_all(b"211-Partial reply\r\n").await?;
            return Ok(());
        }

        match verb.as_str() {
            "USER" => reply(&mut write, "331 Password required").await?,
            "PASS" => {
                if arg == PASSWORD {
                    reply(&mut write, "230 Logged in").await?
                } else {
                    reply(&mut write, "530 Login incorrect").await?
                }
            }
            "FEAT" => {
                let mut feat = String::from("211-Features:\r\n SIZE\r\n MDTM\r\n UTF8\r\n REST STREAM\r\n");
                if opts.epsv {
                    feat.push_str(" EPSV\r\n");
                }
                if opts.mlsd {
                    feat.push_str(" MLST type*;size*;modify*;\r\n");
                }
                feat.push_str("211 End\r\n");
                write.write_all(feat.as_bytes()).await?;
            }
            "TYPE" | "STRU" | "OPTS" => reply(&mut write, "200 OK").await?,
            "PWD" => reply(&mut write, &format!("257 \"{}\" is current directory", cwd)).await?,
            "CWD" => {
                let target = resolve(&cwd, &arg);
                if state.lock().unwrap().dirs.contains(&target) {
                    cwd = target;
                    reply(&mut write, "250 Directory changed").await?
                } else {
                    reply(&mut write, "550 No such directory").await?
                }
            }
            "EPSV" => {
                if opts.epsv {
                    let port = open_passive(&opts, &mut passive).await?;
                    reply(&mut write, &format!("229 Entering Extended Passive Mode (|||{}|)", port)).await?
                } else {
                    reply(&mut write, "502 EPSV not implemented").await?
                }
            }
            "PASV" => match opts.pasv_reply {
                Some(ref canned) => reply(&mut write, canned).await?,
                None => {
                    let port = open_passive(&opts, &mut passive).await?;
                    reply(
                        &mut write,
                        &format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256),
                    )
                    .await?
                }
            },
            "REST" => match arg.parse::<usize>() {
                Ok(n) => {
                    rest = n;
                    reply(&mut write, &format!("350 Restarting at {}", n)).await?
                }
                Err(_) => reply(&mut write, "501 Bad offset").await?,
            },
            "LIST" | "MLSD" => {
                let has_flags = arg.split_whitespace().any(|t| t.starts_with('-'));
                if verb == "LIST" && has_flags && opts.reject_list_flags {
                    passive = None;
                    reply(&mut write, "501 Options not supported").await?;
                    continue;
                }
                if let (true, Some(canned)) = (verb == "MLSD", opts.fail_mlsd.as_deref()) {
                    passive = None;
                    reply(&mut write, canned).await?;
                    continue;
                }
                if verb == "MLSD" && !opts.mlsd {
                    passive = None;
                    reply(&mut write, "500 Unknown command").await?;
                    continue;
                }
                let path: Vec<&str> = arg.split_whitespace().filter(|t| !t.starts_with('-')).collect();
                let dir = if path.is_empty() { cwd.clone() } else { resolve(&cwd, &path.join(" ")) };
                if !state.lock().unwrap().dirs.contains(&dir) {
                    passive = None;
                    reply(&mut write, "550 No such directory").await?;
                    continue;
                }
                let Some(listener) = passive.take() else {
                    reply(&mut write, "425 Use PASV or EPSV first").await?;
                    continue;
                };
                reply(&mut write, "150 Here comes the listing").await?;
                let mut data = accept(listener, &state).await?;
                let body = listing(&state.lock().unwrap(), &dir, verb == "MLSD", opts.list_style);
                data.write_all(body.as_bytes()).await?;
                data.shutdown().await?;
                drop(data);
                reply(&mut write, "226 Transfer complete").await?
            }
            "RETR" => {
                let path = resolve(&cwd, &arg);
                let content = state.lock().unwrap().files.get(&path).cloned();
                let offset = std::mem::take(&mut rest);
                let Some(content) = content else {
                    passive = None;
                    reply(&mut write, "550 No such file").await?;
                    continue;
                };
                let Some(listener) = passive.take() else {
                    reply(&mut write, "425 Use PASV or EPSV first").await?;
                    continue;
                };
                reply(&mut write, "150 Opening BINARY mode data connection").await?;
                let mut data = accept(listener, &state).await?;
                if let Some(cut) = opts.abort_retr {
                    data.write_all(&content[..cut.min(content.len())]).await?;
                    drop(data);
                    reply(&mut write, "426 Connection closed; transfer aborted").await?;
                    continue;
                }
                data.write_all(&content[offset.min(content.len())..]).await?;
                data.shutdown().await?;
                drop(data);
                reply(&mut write, "226 Transfer complete").await?
            }
            "STOR" | "APPE" => {
                let path = resolve(&cwd, &arg);
                let Some(listener) = passive.take() else {
                    reply(&mut write, "425 Use PASV or EPSV first").await?;
                    continue;
                };
                reply(&mut write, "150 Ok to send data").await?;
                let mut data = accept(listener, &state).await?;
                let mut received = Vec::new();
                data.read_to_end(&mut received).await?;
                {
                    let mut st = state.lock().unwrap();
                    let entry = st.files.entry(path).or_default();
                    if verb == "STOR" {
                        *entry = received;
                    } else {
                        entry.extend_from_slice(&received);
                    }
                }
                reply(&mut write, "226 Transfer complete").await?
            }
            "DELE" => {
                let path = resolve(&cwd, &arg);
                if state.lock().unwrap().files.remove(&path).is_some() {
                    reply(&mut write, "250 Deleted").await?
                } else {
                    reply(&mut write, "550 No such file").await?
                }
            }
            "SIZE" => {
                let path = resolve(&cwd, &arg);
                let len = state.lock().unwrap().files.get(&path).map(Vec::len);
                match len {
                    Some(n) => reply(&mut write, &format!("213 {}", n)).await?,
                    None => reply(&mut write, "550 No such file").await?,
                }
            }
            "MDTM" => {
                let path = resolve(&cwd, &arg);
                if state.lock().unwrap().files.contains_key(&path) {
                    reply(&mut write, "213 20240102030405").await?
                } else {
                    reply(&mut write, "550 No such file").await?
                }
            }
            "RNFR" => {
                let path = resolve(&cwd, &arg);
                if state.lock().unwrap().files.contains_key(&path) {
                    rename_from = Some(path);
                    reply(&mut write, "350 Ready for RNTO").await?
                } else {
                    reply(&mut write, "550 No such file").await?
                }
            }
            "RNTO" => match rename_from.take() {
                Some(from) => {
                    let to = resolve(&cwd, &arg);
                    {
                        let mut st = state.lock().unwrap();
                        if let Some(content) = st.files.remove(&from) {
                            st.files.insert(to, content);
                        }
                    }
                    reply(&mut write, "250 Renamed").await?
                }
                None => reply(&mut write, "503 RNFR first").await?,
            },
            "QUIT" => {
                reply(&mut write, "221 Goodbye").await?;
                break;
            }
            _ => reply(&mut write, "502 Command not implemented").await?,
        }
    }
    Ok(())
}

/// Bind a passive listener and return its port. With `dead_pasv_port`
/// the listener is closed again before the port is announced.
async fn open_passive(opts: &MockOptions, passive: &mut Option<TcpListener>) -> io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    if opts.dead_pasv_port {
        drop(listener);
        *passive = None;
    } else {
        *passive = Some(listener);
    }
    Ok(port)
}

async fn accept(listener: TcpListener, state: &Mutex<MockState>) -> io::Result<TcpStream> {
    let (sock, _) = listener.accept().await?;
    state.lock().unwrap().data_connections += 1;
    Ok(sock)
}

fn resolve(cwd: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else if cwd == "/" {
        format!("/{}", arg)
    } else {
        format!("{}/{}", cwd, arg)
    };
    if joined.len() > 1 {
        joined.trim_end_matches('/').to_string()
    } else {
        joined
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", path),
    }
}

fn listing(state: &MockState, dir: &str, mlsd: bool, style: ListStyle) -> String {
    let mut out = String::new();
    if !mlsd && style == ListStyle::Unix {
        out.push_str("total 8\r\n");
    }
    for sub in state.dirs.iter().filter(|d| d.as_str() != "/") {
        let (parent, name) = split_path(sub);
        if parent != dir {
            continue;
        }
        let line = match (mlsd, style) {
            (true, _) => format!("type=dir;modify=20240101120000; {}", name),
            (false, ListStyle::Unix) => format!("drwxr-xr-x 2 ftp ftp 4096 Jan  1  2024 {}", name),
            (false, ListStyle::Dos) => format!("01-01-24  12:00PM       <DIR>          {}", name),
        };
        out.push_str(&line);
        out.push_str("\r\n");
    }
    for (path, content) in &state.files {
        let (parent, name) = split_path(path);
        if parent != dir {
            continue;
        }
        let line = match (mlsd, style) {
            (true, _) => format!("type=file;size={};modify=20240101120000; {}", content.len(), name),
            (false, ListStyle::Unix) => {
                format!("-rw-r--r-- 1 ftp ftp {} Jan  1  2024 {}", content.len(), name)
            }
            (false, ListStyle::Dos) => format!("01-01-24  12:00PM {:>20} {}", content.len(), name),
        };
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}
