//! Echo-line server with graceful stop and zero-downtime restart.
//!
//! ```text
//! cargo run --example echo_server -- tcp://127.0.0.1:6789
//!
//! printf 'hello world!\n' | nc 127.0.0.1 6789
//! kill -TERM $(cat echo_server.pid)   # drain and exit
//! kill -USR1 $(cat echo_server.pid)   # hand the socket to a fresh process
//! ```
//!
//! The restart path re-execs this same program image (the default
//! `start_command` is the current argv), so the successor binds nothing:
//! it adopts the listening descriptor from the handover environment.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use connvisor::{ConnError, HandlerFn, PeerAddr, ServerConfig, Stream, Supervisor};

#[tokio::main]
async fn main() {
    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:6789".to_string());

    let mut cfg = match bind.parse() {
        Ok(addr) => ServerConfig::new(addr),
        Err(e) => {
            eprintln!("echo_server: {e}");
            std::process::exit(2);
        }
    };
    cfg.pid_path = "./echo_server.pid".into();

    let echo = HandlerFn::arc(
        |stream: Stream, _peer: PeerAddr, ctx: CancellationToken| async move {
            let (read, mut write) = tokio::io::split(stream);
            let mut lines = BufReader::new(read).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line? {
                        Some(line) => {
                            write.write_all(line.as_bytes()).await?;
                            write.write_all(b"\n").await?;
                        }
                        None => break,
                    },
                    () = ctx.cancelled() => break,
                }
            }
            Ok::<_, ConnError>(())
        },
    );

    if let Err(e) = Supervisor::with_logging(cfg, echo).run().await {
        eprintln!("echo_server: {e}");
        std::process::exit(1);
    }
}
