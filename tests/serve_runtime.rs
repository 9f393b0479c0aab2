//! Whole-process run: control server, daemon and mock receiver together.

mod common;

use callisto_daq::daemon::serve_with;
use callisto_daq::scheduler::SystemClock;
use common::{data_span, files_with_extension, new_mock_serial, test_config, wait_for, MockConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("control server did not come up on port {}", port);
}

async fn read_reply<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> String {
    let mut reply = String::new();
    while !reply.ends_with("\n\n") {
        let n = timeout(Duration::from_secs(3), reader.read_line(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed after {:?}", reply);
    }
    reply
}

#[tokio::test]
async fn records_on_network_command_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut config = test_config(dir.path());
    config.application.name = "e-Callisto TEST".to_string();
    config.control.bind_address = "127.0.0.1".to_string();
    config.control.net_port = port;

    let (serial, mut device) = new_mock_serial();
    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(serve_with(
        config,
        Arc::new(MockConnector::new(vec![serial])),
        Arc::new(SystemClock),
        shutdown.clone(),
    ));

    let (read_half, mut writer) = connect(port).await.into_split();
    let mut reader = BufReader::new(read_half);
    let mut banner = String::new();
    reader.read_line(&mut banner).await.unwrap();
    assert_eq!(banner, "e-Callisto TEST\n");

    let receiver = tokio::spawn(async move {
        device.answer_handshake().await;
        device
    });
    writer.write_all(b"start\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "OK starting new FITS file\n\n");
    let device = receiver.await.unwrap();

    device.send(data_span(&[5, 6, 7, 8]).as_bytes());
    let data_dir = dir.path().join("data");
    assert!(wait_for(|| !files_with_extension(&data_dir, "fits").is_empty()).await);

    writer.write_all(b"stop\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "OK stopping\n\n");

    shutdown.cancel();
    timeout(Duration::from_secs(10), daemon)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn autostart_failure_keeps_serving_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.scheduler.autostart = true;

    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(serve_with(
        config,
        Arc::new(MockConnector::new(Vec::new())),
        Arc::new(SystemClock),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!daemon.is_finished());

    shutdown.cancel();
    timeout(Duration::from_secs(10), daemon)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(files_with_extension(&dir.path().join("data"), "fits").is_empty());
}
