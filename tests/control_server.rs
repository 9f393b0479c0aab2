//! TCP round trips against the control server.

use async_trait::async_trait;
use callisto_daq::core::ControlActions;
use callisto_daq::network::ControlServer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<&'static str>>,
    hdf5: bool,
}

impl Recorder {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControlActions for Recorder {
    async fn start(&self) {
        self.record("start");
    }

    async fn stop(&self) {
        self.record("stop");
    }

    async fn overview_once(&self) {
        self.record("overview");
    }

    async fn overview_continuous(&self) -> bool {
        self.record("overview-continuous");
        self.hdf5
    }

    async fn overview_off(&self) {
        self.record("overview-off");
    }
}

async fn start_server(
    actions: Arc<Recorder>,
) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let server = ControlServer::bind("127.0.0.1:0", "e-Callisto TEST", actions, shutdown.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    (addr, shutdown, tokio::spawn(server.run()))
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut banner = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut banner))
            .await
            .unwrap()
            .unwrap();
        (Self { reader, writer }, banner)
    }

    /// Sends one line and reads the reply up to its blank line.
    async fn command(&mut self, line: &str) -> String {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();

        let mut reply = String::new();
        while !reply.ends_with("\n\n") {
            let n = timeout(Duration::from_secs(2), self.reader.read_line(&mut reply))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed, partial reply {:?}", reply);
        }
        reply
    }
}

#[tokio::test]
async fn banner_and_commands_round_trip() {
    let actions = Arc::new(Recorder::default());
    let (addr, shutdown, server) = start_server(actions.clone()).await;

    let (mut client, banner) = Client::connect(addr).await;
    assert_eq!(banner, "e-Callisto TEST\n");

    assert_eq!(client.command("").await, "OK\n\n");
    assert_eq!(client.command("START").await, "OK starting new FITS file\n\n");
    assert_eq!(client.command("  overview  ").await, "OK starting spectral overview\n\n");
    assert_eq!(
        client.command("overview-cont").await,
        "ERROR HDF5 backend unavailable (install python3-h5py)\n\n"
    );
    assert_eq!(
        client.command("overview-off").await,
        "OK stopping continuous spectral overview\n\n"
    );
    assert_eq!(client.command("get").await, "ERROR no data (yet)\n\n");
    assert_eq!(
        client.command("Frobnicate").await,
        "ERROR unrecognized command (frobnicate)\n\n"
    );
    assert_eq!(client.command("stop").await, "OK stopping\n\n");

    assert_eq!(
        actions.calls(),
        vec!["start", "overview", "overview-continuous", "overview-off", "stop"]
    );

    shutdown.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn quit_closes_the_connection() {
    let actions = Arc::new(Recorder::default());
    let (addr, shutdown, server) = start_server(actions.clone()).await;

    let (mut client, _) = Client::connect(addr).await;
    client.writer.write_all(b"quit\r\n").await.unwrap();

    let mut rest = Vec::new();
    let n = timeout(Duration::from_secs(2), client.reader.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(actions.calls().is_empty());

    shutdown.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn clients_are_served_concurrently() {
    let actions = Arc::new(Recorder {
        hdf5: true,
        ..Default::default()
    });
    let (addr, shutdown, server) = start_server(actions.clone()).await;

    let (mut first, _) = Client::connect(addr).await;
    let (mut second, _) = Client::connect(addr).await;

    assert_eq!(
        second.command("overview-continuous").await,
        "OK starting continuous spectral overview in HDF5 (window=filetime)\n\n"
    );
    assert_eq!(first.command("start").await, "OK starting new FITS file\n\n");

    shutdown.cancel();
    timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_line_gets_one_error_and_runs_nothing() {
    let actions = Arc::new(Recorder::default());
    let (addr, shutdown, server) = start_server(actions.clone()).await;

    let (mut client, _) = Client::connect(addr).await;
    // a valid command past the line limit must not be executed
    let line = format!("{}stop", "x".repeat(1024));
    assert_eq!(client.command(&line).await, "ERROR command line too long\n\n");

    // the connection stays in sync: the next reply belongs to the next line
    assert_eq!(client.command("get").await, "ERROR no data (yet)\n\n");
    assert!(actions.calls().is_empty());

    shutdown.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn line_at_the_limit_is_still_a_command() {
    let actions = Arc::new(Recorder::default());
    let (addr, shutdown, server) = start_server(actions.clone()).await;

    let (mut client, _) = Client::connect(addr).await;
    // 1019 spaces + "stop" + '\n' is exactly 1024 bytes
    let line = format!("{}stop", " ".repeat(1019));
    assert_eq!(client.command(&line).await, "OK stopping\n\n");
    assert_eq!(actions.calls(), vec!["stop"]);

    shutdown.cancel();
    server.await.unwrap();
}
