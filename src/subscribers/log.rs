//! # Line-oriented logging subscriber.
//!
//! [`LogWriter`] renders each event as one line and writes it to a
//! configurable sink (stdout by default), filtered by [`LogLevel`].
//!
//! ## Output format
//! ```text
//! [info] listening addr=127.0.0.1:6789
//! [debug] conn-accepted conn=3 peer=127.0.0.1:51844
//! [warn] handshake-failed peer=10.0.0.9:40100 err="received corrupt message"
//! [info] drain-started live=2
//! [error] handover-failed err="successor exited before takeover"
//! ```

use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Severity threshold for [`LogWriter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Maps an event kind to the level it is logged at.
fn level_of(kind: EventKind) -> LogLevel {
    match kind {
        EventKind::ConnAccepted | EventKind::ConnClosed => LogLevel::Debug,
        EventKind::StopRequested
        | EventKind::RestartRequested
        | EventKind::Listening
        | EventKind::DrainStarted
        | EventKind::Drained
        | EventKind::HandoverStarted
        | EventKind::HandoverCompleted => LogLevel::Info,
        EventKind::ForceStopRequested
        | EventKind::AcceptFailed
        | EventKind::RemoteDenied
        | EventKind::HandshakeFailed
        | EventKind::DrainTimedOut
        | EventKind::SubscriberOverflow
        | EventKind::EventsLagged => LogLevel::Warn,
        EventKind::HandlerFailed | EventKind::HandoverFailed | EventKind::SubscriberPanicked => {
            LogLevel::Error
        }
    }
}

fn tag_of(kind: EventKind) -> &'static str {
    match kind {
        EventKind::StopRequested => "stop-requested",
        EventKind::ForceStopRequested => "force-stop-requested",
        EventKind::RestartRequested => "restart-requested",
        EventKind::Listening => "listening",
        EventKind::AcceptFailed => "accept-failed",
        EventKind::ConnAccepted => "conn-accepted",
        EventKind::ConnClosed => "conn-closed",
        EventKind::HandlerFailed => "handler-failed",
        EventKind::RemoteDenied => "remote-denied",
        EventKind::HandshakeFailed => "handshake-failed",
        EventKind::DrainStarted => "drain-started",
        EventKind::Drained => "drained",
        EventKind::DrainTimedOut => "drain-timed-out",
        EventKind::HandoverStarted => "handover-started",
        EventKind::HandoverCompleted => "handover-completed",
        EventKind::HandoverFailed => "handover-failed",
        EventKind::SubscriberOverflow => "subscriber-overflow",
        EventKind::SubscriberPanicked => "subscriber-panicked",
        EventKind::EventsLagged => "events-lagged",
    }
}

/// Line-oriented log subscriber with a level threshold.
pub struct LogWriter {
    min: LogLevel,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl LogWriter {
    /// Logs to stdout at the given threshold.
    pub fn stdout(min: LogLevel) -> Self {
        Self::with_sink(min, Box::new(std::io::stdout()))
    }

    /// Logs to an arbitrary line-oriented writer.
    pub fn with_sink(min: LogLevel, sink: Box<dyn Write + Send>) -> Self {
        Self {
            min,
            sink: Mutex::new(sink),
        }
    }

    fn render(e: &Event) -> String {
        let mut line = format!("[{}] {}", level_of(e.kind).as_str(), tag_of(e.kind));
        if let Some(addr) = &e.addr {
            line.push_str(&format!(" addr={addr}"));
        }
        if let Some(id) = e.conn {
            line.push_str(&format!(" conn={id}"));
        }
        if let Some(peer) = &e.peer {
            line.push_str(&format!(" peer={peer}"));
        }
        if let Some(pid) = e.pid {
            line.push_str(&format!(" pid={pid}"));
        }
        if let Some(count) = e.count {
            line.push_str(&format!(" live={count}"));
        }
        if let Some(err) = &e.error {
            line.push_str(&format!(" err={err:?}"));
        }
        line
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::stdout(LogLevel::Info)
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        if level_of(e.kind) < self.min {
            return;
        }
        let line = Self::render(e);
        if let Ok(mut sink) = self.sink.lock() {
            let _ = writeln!(sink, "{line}");
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_correctly() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Fatal);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn renders_metadata_in_order() {
        let ev = Event::now(EventKind::HandlerFailed)
            .with_conn(12)
            .with_peer("127.0.0.1:9100")
            .with_error("broken pipe");
        let line = LogWriter::render(&ev);
        assert_eq!(
            line,
            "[error] handler-failed conn=12 peer=127.0.0.1:9100 err=\"broken pipe\""
        );
    }

    #[tokio::test]
    async fn threshold_filters_low_levels() {
        use std::sync::{Arc, Mutex as StdMutex};

        #[derive(Clone)]
        struct Shared(Arc<StdMutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = Shared(Arc::new(StdMutex::new(Vec::new())));
        let writer = LogWriter::with_sink(LogLevel::Warn, Box::new(buf.clone()));

        writer.on_event(&Event::now(EventKind::ConnAccepted)).await;
        writer.on_event(&Event::now(EventKind::RemoteDenied)).await;

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(!out.contains("conn-accepted"));
        assert!(out.contains("remote-denied"));
    }
}
