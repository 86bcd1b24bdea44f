//! TLS listener parity: the handshake completes before the handler sees
//! bytes, failed handshakes never reach the handler, and the lifecycle
//! behaves exactly as it does for plain TCP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use connvisor::{
    BindAddress, ConnError, Event, EventKind, HandlerFn, HandlerRef, Listener, PeerAddr,
    ServerConfig, Stream, Subscribe, Supervisor, TlsSettings,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("connvisor-tls-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a throwaway self-signed certificate pair and returns its paths.
fn self_signed_material(dir: &PathBuf) -> (PathBuf, PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.cert.pem()).unwrap();
    std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
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

/// Accepts any server certificate; the tests own both ends.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer,
        _intermediates: &[rustls::pki_types::CertificateDer],
        _server_name: &rustls::pki_types::ServerName,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// A TLS 1.2 client connector with peer verification disabled, matching
/// the classic test client.
fn tls12_connector() -> tokio_rustls::TlsConnector {
    let config = rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

struct TlsHarness {
    supervisor: Arc<Supervisor>,
    events: mpsc::UnboundedReceiver<Event>,
    task: tokio::task::JoinHandle<Result<(), connvisor::ServeError>>,
    addr: std::net::SocketAddr,
}

async fn start_tls(tag: &str) -> TlsHarness {
    let dir = scratch_dir(tag);
    let (cert, key) = self_signed_material(&dir);

    let bind = BindAddress::Tls(
        "127.0.0.1:0".parse().unwrap(),
        TlsSettings::new(cert, key),
    );
    let listener = Listener::bind(&bind).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut cfg = ServerConfig::new(bind);
    cfg.pid_path = dir.join(format!("{tag}.pid"));
    cfg.handshake_timeout = Duration::from_secs(2);

    let (tx, mut events) = mpsc::unbounded_channel();
    let probe: Arc<dyn Subscribe> = Arc::new(Probe(tx));
    let supervisor = Arc::new(Supervisor::new(cfg, echo_handler(), vec![probe]));

    let task = {
        let sup = Arc::clone(&supervisor);
        tokio::spawn(async move { sup.run_with(listener).await })
    };
    wait_for(&mut events, EventKind::Listening, Duration::from_secs(1)).await;

    TlsHarness {
        supervisor,
        events,
        task,
        addr,
    }
}

#[tokio::test]
async fn tls_echo_round_trip() {
    let harness = start_tls("echo").await;

    let tcp = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    let domain = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut stream = tls12_connector().connect(domain, tcp).await.unwrap();

    stream.write_all(b"hello world!\n").await.unwrap();
    let (read, _) = tokio::io::split(stream);
    let line = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
    assert_eq!(line, "hello world!");

    harness.supervisor.control().stop();
    assert!(harness.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn failed_handshake_is_contained() {
    let mut harness = start_tls("handshake").await;

    // A plaintext client cannot complete the handshake; the connection is
    // closed before the handler runs and accepting continues.
    let mut plain = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    plain.write_all(b"this is not a client hello\n").await.unwrap();

    wait_for(
        &mut harness.events,
        EventKind::HandshakeFailed,
        Duration::from_secs(3),
    )
    .await;

    // The listener is still healthy for a real TLS client.
    let tcp = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    let domain = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut stream = tls12_connector().connect(domain, tcp).await.unwrap();
    stream.write_all(b"after the bad client\n").await.unwrap();
    let (read, _) = tokio::io::split(stream);
    let line = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
    assert_eq!(line, "after the bad client");

    harness.supervisor.control().stop();
    assert!(harness.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn tls_graceful_stop_drains_active_session() {
    let harness = start_tls("drain").await;

    let tcp = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    let domain = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut stream = tls12_connector().connect(domain, tcp).await.unwrap();

    harness.supervisor.control().stop();

    // The established session survives the stop and completes its echo.
    stream.write_all(b"draining\n").await.unwrap();
    let (read, _) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    assert_eq!(line, "draining");

    drop(lines);
    assert!(harness.task.await.unwrap().is_ok());
}
