//! End-to-end tests over a real TCP socket: builder, TCP transport with
//! telnet refusal, IO task, controller and facade against a scripted
//! server.

use std::time::Duration;

use qtpro::models::{qt_300, qt_600};
use qtpro::{ConnectionState, DeviceEvent, Error, QtProBuilder};
use qtpro_test_harness::MockTcpServer;

const IAC_DO_ECHO: &[u8] = &[255, 253, 1];
const IAC_WONT_ECHO: [u8; 3] = [255, 252, 1];

#[tokio::test]
async fn get_and_set_over_tcp() {
    let mut server = MockTcpServer::new().await.unwrap();
    server.greet(IAC_DO_ECHO);
    server.expect(b"\r", b"{NAK}\r\n");
    server.expect(b"CZGET,MAXM1\r", b"{CZGET,MAXM1=12}\r\n");
    server.expect(b"CZSET,MAXM1=14\r", b"{ACK,MAXM1=14}\r\n");
    server.expect(b"CSGET,FIRM\r", b"{CSGET,FIRM=6.7.2}\r\n");
    server.start();

    let qt = QtProBuilder::new(qt_300())
        .address("127.0.0.1")
        .port(server.port())
        .reconnect(false)
        .build()
        .await
        .unwrap();
    assert_eq!(qt.address(), server.addr());
    qt.wait_ready(Duration::from_secs(5)).await.unwrap();

    let max = qt.get_zone_param(1, "masking_max").await.unwrap();
    assert_eq!(max.as_deref(), Some("12"));
    assert!(qt.set_zone_param(1, "masking_max", "14").await.unwrap());
    let firmware = qt.get_system_param("firmware_version").await.unwrap();
    assert_eq!(firmware.as_deref(), Some("6.7.2"));

    qt.close().await;
    assert_eq!(qt.state(), ConnectionState::Disconnected);

    let report = server.wait().await.unwrap();
    assert!(report.telnet_replies.contains(&IAC_WONT_ECHO));
    assert!(report.trailing.is_empty());
}

#[tokio::test]
async fn get_all_zone_over_tcp() {
    let mut server = MockTcpServer::new().await.unwrap();
    server.expect(b"\r", b"{NAK}\r\n");
    server.expect(
        b"ALZONE4\r",
        b"{ALZONE4=ZNAM4=Open Plan,MAXM4=20,MINM4=6,MLVL4=14,MENA4=1,XXXX4=9}\r\n",
    );
    server.start();

    let qt = QtProBuilder::new(qt_600())
        .address("127.0.0.1")
        .port(server.port())
        .reconnect(false)
        .build()
        .await
        .unwrap();
    qt.wait_ready(Duration::from_secs(5)).await.unwrap();

    let all = qt.get_all_zone_params(4).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all["zone_name"], "Open Plan");
    assert_eq!(all["masking_level"], "14");
    assert_eq!(all["masking_enabled"], "1");

    qt.close().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn server_hang_up_without_reconnect() {
    let mut server = MockTcpServer::new().await.unwrap();
    server.expect(b"\r", b"{NAK}\r\n");
    server.hang_up_when_done();
    server.start();

    let qt = QtProBuilder::new(qt_300())
        .address("127.0.0.1")
        .port(server.port())
        .reconnect(false)
        .build()
        .await
        .unwrap();
    let mut events = qt.subscribe();

    let disconnected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(DeviceEvent::Disconnected) => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await;
    assert!(disconnected.is_ok(), "no Disconnected event after hang-up");
    assert_eq!(qt.state(), ConnectionState::Disconnected);

    assert!(matches!(
        qt.get_system_param("ip_address").await,
        Err(Error::ConnectionClosed)
    ));
    server.wait().await.unwrap();
}

#[tokio::test]
async fn connect_refused_reports_error() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let server = MockTcpServer::new().await.unwrap();
        server.port()
    };

    let qt = QtProBuilder::new(qt_300())
        .address("127.0.0.1")
        .port(port)
        .reconnect(false)
        .connect_timeout(Duration::from_secs(2))
        .build()
        .await
        .unwrap();
    let mut events = qt.subscribe();

    let saw_error = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(DeviceEvent::Error { .. }) => return true,
                Ok(DeviceEvent::Disconnected) => return false,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_error);
    assert!(qt.wait_ready(Duration::from_millis(100)).await.is_err());
}
