//! Handover-path tests: descriptor inheritance and the takeover sequence.
//!
//! A real restart crosses an exec boundary, which a test process cannot
//! do to itself; these tests exercise the same machinery in-process. The
//! successor side is simulated by duplicating the listening descriptor
//! (exactly what inheritance across exec produces: a second descriptor
//! for the same open socket) and the readiness signal by rewriting the
//! PID file the way a successor would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use connvisor::{
    BindAddress, ConnError, Event, EventKind, HandlerFn, HandlerRef, Listener, ListenerKind,
    PeerAddr, PidFile, ServerConfig, Stream, Subscribe, Supervisor,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("connvisor-ho-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn echo_handler() -> HandlerRef {
    HandlerFn::arc(
        |stream: Stream, _peer: PeerAddr, _ctx: CancellationToken| async move {
            let (read, mut write) = tokio::io::split(stream);
            let mut lines = BufReader::new(read).lines();
            while let Some(line) = lines.next_line().await? {
                write.write_all(line.as_bytes()).await?;
                write.write_all(b"\n").await?;
            }
            Ok::<_, ConnError>(())
        },
    )
}

struct Probe(mpsc::UnboundedSender<Event>);

#[async_trait]
impl Subscribe for Probe {
    async fn on_event(&self, event: &Event) {
        let _ = self.0.send(event.clone());
    }

    fn name(&self) -> &'static str {
        "probe"
    }
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<Event>,
    kind: EventKind,
    within: Duration,
) -> Event {
    tokio::time::timeout(within, async {
        loop {
            let ev = events.recv().await.expect("event stream closed");
            if ev.kind == kind {
                return ev;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
}

async fn echo_once(addr: std::net::SocketAddr, payload: &str) {
    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    client.write_all(payload.as_bytes()).await.unwrap();
    client.write_all(b"\n").await.unwrap();
    let (read, _) = client.split();
    let line = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
    assert_eq!(line, payload);
}

#[tokio::test]
async fn inherited_descriptor_serves_clients() {
    use std::os::fd::IntoRawFd;

    let bound = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = bound.local_addr().unwrap();
    let fd = bound.into_raw_fd();

    let bind = BindAddress::Tcp(addr);
    let listener = Listener::inherit(fd, ListenerKind::Tcp, &bind).unwrap();

    let mut cfg = ServerConfig::new(bind);
    cfg.pid_path = scratch_dir("inherit").join("inherit.pid");

    let (tx, mut events) = mpsc::unbounded_channel();
    let probe: Arc<dyn Subscribe> = Arc::new(Probe(tx));
    let sup = Arc::new(Supervisor::new(cfg, echo_handler(), vec![probe]));
    let ctl = sup.control();

    let task = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.run_with(listener).await })
    };
    wait_for(&mut events, EventKind::Listening, Duration::from_secs(1)).await;

    echo_once(addr, "inherited and serving").await;

    ctl.stop();
    assert!(task.await.unwrap().is_ok());
}

/// The full predecessor-side sequence, with the successor simulated by a
/// duplicated descriptor and a PID-file rewrite:
///
/// 1. predecessor serves; the socket's open description is also held by
///    the duplicate (as it would be by an exec'd successor)
/// 2. restart requested; predecessor spawns its (stand-in) successor and
///    keeps accepting
/// 3. the PID file changes; predecessor confirms, drains and exits
///    without removing the file
/// 4. a client connecting after the predecessor is gone still reaches the
///    socket, and a listener built around the duplicate serves it
#[tokio::test]
async fn handover_keeps_the_socket_accepting() {
    let dir = scratch_dir("takeover");
    let pid_path = dir.join("takeover.pid");

    let bind: BindAddress = "tcp://127.0.0.1:0".parse().unwrap();
    let listener = Listener::bind(&bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bind = BindAddress::Tcp(addr);

    // The successor's copy of the descriptor, exactly as inheritance
    // across exec would produce it.
    let successor_fd = unsafe { libc::dup(listener.raw_fd()) };
    assert!(successor_fd >= 0);

    let mut cfg = ServerConfig::new(bind.clone());
    cfg.pid_path = pid_path.clone();
    cfg.start_command = vec!["sleep".to_string(), "5".to_string()];
    cfg.handover_timeout = Duration::from_secs(3);

    let (tx, mut events) = mpsc::unbounded_channel();
    let probe: Arc<dyn Subscribe> = Arc::new(Probe(tx));
    let sup = Arc::new(Supervisor::new(cfg, echo_handler(), vec![probe]));
    let ctl = sup.control();

    let task = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.run_with(listener).await })
    };
    wait_for(&mut events, EventKind::Listening, Duration::from_secs(1)).await;
    assert_eq!(PidFile::read(&pid_path), Some(std::process::id()));

    ctl.restart();
    wait_for(&mut events, EventKind::HandoverStarted, Duration::from_secs(1)).await;

    // Still serving while the successor comes up.
    echo_once(addr, "predecessor still serving").await;

    // The "successor" takes over: it rewrites the PID file with its PID.
    std::fs::write(&pid_path, "99999\n").unwrap();

    let completed =
        wait_for(&mut events, EventKind::HandoverCompleted, Duration::from_secs(2)).await;
    assert_eq!(completed.pid, Some(99999));

    assert!(task.await.unwrap().is_ok());

    // The predecessor left the successor's PID file in place.
    assert_eq!(PidFile::read(&pid_path), Some(99999));

    // The socket never closed: a connect after the predecessor exited
    // lands in the backlog of the still-open description.
    let mut pending = tokio::net::TcpStream::connect(addr).await.unwrap();
    pending.write_all(b"no accept lost\n").await.unwrap();

    // The successor builds its listener around the inherited descriptor
    // and serves the pending client.
    let successor = Listener::inherit(successor_fd, ListenerKind::Tcp, &bind).unwrap();
    let mut cfg = ServerConfig::new(bind);
    cfg.pid_path = dir.join("successor.pid");

    let (tx, mut events) = mpsc::unbounded_channel();
    let probe: Arc<dyn Subscribe> = Arc::new(Probe(tx));
    let sup = Arc::new(Supervisor::new(cfg, echo_handler(), vec![probe]));
    let ctl = sup.control();
    let task = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.run_with(successor).await })
    };
    wait_for(&mut events, EventKind::Listening, Duration::from_secs(1)).await;

    let (read, _) = pending.split();
    let line = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
    assert_eq!(line, "no accept lost");

    drop(pending);
    ctl.stop();
    assert!(task.await.unwrap().is_ok());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn unix_handover_does_not_unlink_the_path() {
    let dir = scratch_dir("unix-takeover");
    let sock = dir.join("echo.sock");
    let pid_path = dir.join("echo.pid");

    let bind = BindAddress::Unix(sock.clone());
    let listener = Listener::bind(&bind).await.unwrap();

    let mut cfg = ServerConfig::new(bind);
    cfg.pid_path = pid_path.clone();
    cfg.start_command = vec!["sleep".to_string(), "5".to_string()];
    cfg.handover_timeout = Duration::from_secs(3);

    let (tx, mut events) = mpsc::unbounded_channel();
    let probe: Arc<dyn Subscribe> = Arc::new(Probe(tx));
    let sup = Arc::new(Supervisor::new(cfg, echo_handler(), vec![probe]));
    let ctl = sup.control();
    let task = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.run_with(listener).await })
    };
    wait_for(&mut events, EventKind::Listening, Duration::from_secs(1)).await;

    ctl.restart();
    wait_for(&mut events, EventKind::HandoverStarted, Duration::from_secs(1)).await;
    std::fs::write(&pid_path, "99999\n").unwrap();
    wait_for(&mut events, EventKind::HandoverCompleted, Duration::from_secs(2)).await;

    assert!(task.await.unwrap().is_ok());

    // A handover is not a pure shutdown: the successor keeps using the
    // socket path, so the predecessor must leave it alone.
    assert!(sock.exists(), "socket path unlinked during handover");
    assert_eq!(PidFile::read(&pid_path), Some(99999));

    let _ = std::fs::remove_dir_all(&dir);
}
