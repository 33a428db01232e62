//! Protocol tracing.
//!
//! Raw control lines always go to the `log` facade at trace level. With
//! `verbose` set they are additionally written at debug level to the
//! injected [`FtpLogSink`], or to `log::debug!` when no sink is installed.

use log::Level;
use std::fmt;
use std::sync::Arc;

/// Destination for verbose protocol traces.
pub trait FtpLogSink: Send + Sync {
    fn write(&self, level: Level, message: &str);
}

impl<F> FtpLogSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn write(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// Per-session tracer handed down to the codec.
#[derive(Clone, Default)]
pub struct ProtocolLogger {
    verbose: bool,
    sink: Option<Arc<dyn FtpLogSink>>,
    session_id: String,
}

impl fmt::Debug for ProtocolLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolLogger")
            .field("verbose", &self.verbose)
            .field("sink", &self.sink.is_some())
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl ProtocolLogger {
    pub fn new(verbose: bool, sink: Option<Arc<dyn FtpLogSink>>) -> Self {
        Self {
            verbose,
            sink,
            session_id: String::new(),
        }
    }

    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            ..self.clone()
        }
    }

    /// Outgoing command line.
    pub fn command(&self, cmd: &str) {
        self.trace(&format!("> {}", mask_secret(cmd)));
    }

    /// Incoming reply line.
    pub fn reply(&self, line: &str) {
        self.trace(&format!("< {}", line));
    }

    /// Free-form protocol event (connects, TLS upgrades, passive targets).
    pub fn event(&self, msg: &str) {
        self.trace(msg);
    }

    fn trace(&self, line: &str) {
        log::trace!("[{}] {}", self.session_id, line);
        if !self.verbose {
            return;
        }
        match &self.sink {
            Some(sink) => sink.write(Level::Debug, line),
            None => log::debug!("[{}] {}", self.session_id, line),
        }
    }
}

/// Hide the argument of `PASS` (and `ACCT`) in traces.
fn mask_secret(cmd: &str) -> String {
    let upper = cmd.get(..5).map(|p| p.to_ascii_uppercase());
    match upper.as_deref() {
        Some("PASS ") | Some("ACCT ") => format!("{} ###", &cmd[..4]),
        _ => cmd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn masks_password() {
        assert_eq!(mask_secret("PASS hunter2"), "PASS ###");
        assert_eq!(mask_secret("pass hunter2"), "pass ###");
        assert_eq!(mask_secret("USER bob"), "USER bob");
        assert_eq!(mask_secret("PWD"), "PWD");
    }

    #[test]
    fn sink_receives_lines_only_when_verbose() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let captured = seen.clone();
        let sink: Arc<dyn FtpLogSink> = Arc::new(move |_level: Level, msg: &str| {
            captured.lock().unwrap().push(msg.to_string());
        });

        let quiet = ProtocolLogger::new(false, Some(sink.clone()));
        quiet.command("USER bob");
        assert!(seen.lock().unwrap().is_empty());

        let loud = ProtocolLogger::new(true, Some(sink)).for_session("s1");
        loud.command("PASS secret");
        loud.reply("230 Logged in");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["> PASS ###".to_string(), "< 230 Logged in".to_string()]
        );
    }
}
