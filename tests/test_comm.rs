// Integration tests for Comm module
// This file should be run with cargo test --test test_comm

#[path = "../src/env.rs"]
mod env;

#[path = "../src/comm/mod.rs"]
mod comm;

#[path = "../src/executor/mod.rs"]
mod executor;

#[path = "../src/dispatch.rs"]
mod dispatch;

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

// Message types (must match protocol)
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum MsgType {
    Request = 0x01,
    RequestAck = 0x02,
    Response = 0x03,
}

// Test helper: encode a request packet
fn encode_request(seq: u32, tool: &str, arguments: serde_json::Value) -> Vec<u8> {
    use rmp_serde::encode::Serializer;
    use serde::Serialize;

    #[derive(Serialize)]
    struct RequestPayload<'a> {
        tool: &'a str,
        arguments: serde_json::Value,
    }

    let payload = RequestPayload { tool, arguments };
    let mut packet = vec![MsgType::Request as u8];
    packet.extend_from_slice(&seq.to_be_bytes());
    let mut ser = Serializer::new(&mut packet).with_struct_map();
    payload.serialize(&mut ser).unwrap();
    packet
}

// Test helper: decode response payload
fn decode_response(data: &[u8]) -> (u32, String, bool) {
    use rmp_serde::decode::Deserializer;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct ResponsePayload {
        content: String,
        is_error: bool,
    }

    let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let mut de = Deserializer::new(&data[5..]);
    let resp: ResponsePayload = Deserialize::deserialize(&mut de).unwrap();
    (seq, resp.content, resp.is_error)
}

use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn test_config() -> comm::CommConfig {
    comm::CommConfig {
        listen_addr: "127.0.0.1".to_string(),
        listen_port: 0,
        ..Default::default()
    }
}

async fn start(config: comm::CommConfig) -> (SocketAddr, mpsc::Receiver<comm::ToolRequest>) {
    let (comm, loop_rx) = comm::Comm::new(config).await.unwrap();
    let comm_addr = comm.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = comm.run().await;
    });

    (comm_addr, loop_rx)
}

async fn connect(addr: SocketAddr) -> UdpSocket {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(addr).await.unwrap();
    client
}

/// Receive one packet, returning its raw bytes
async fn recv(client: &UdpSocket, wait: Duration) -> Vec<u8> {
    let mut buf = vec![0u8; 70000];
    let len = tokio::time::timeout(wait, client.recv(&mut buf))
        .await
        .expect("timed out waiting for packet")
        .unwrap();
    buf.truncate(len);
    buf
}

async fn expect_ack(client: &UdpSocket, seq: u32) {
    let packet = recv(client, Duration::from_secs(1)).await;
    assert_eq!(packet[0], MsgType::RequestAck as u8);
    assert_eq!(packet.len(), 5);
    assert_eq!(u32::from_be_bytes([packet[1], packet[2], packet[3], packet[4]]), seq);
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_normal_request_response() {
        init_tracing();

        let (comm_addr, mut loop_rx) = start(test_config()).await;

        let mock_handle = tokio::spawn(async move {
            let req = loop_rx.recv().await.unwrap();
            assert_eq!(req.tool, "read_file");
            assert_eq!(req.arguments["file_path"], "notes.txt");
            req.reply
                .send(comm::ToolResponse::new("Buy milk".to_string()))
                .ok();
        });

        let client = connect(comm_addr).await;
        client
            .send(&encode_request(1, "read_file", json!({"file_path": "notes.txt"})))
            .await
            .unwrap();

        expect_ack(&client, 1).await;

        let packet = recv(&client, Duration::from_secs(1)).await;
        assert_eq!(packet[0], MsgType::Response as u8);
        let (seq, content, is_error) = decode_response(&packet);
        assert_eq!(seq, 1);
        assert_eq!(content, "Buy milk");
        assert!(!is_error);

        mock_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_request_dedup() {
        init_tracing();

        let (comm_addr, mut loop_rx) = start(test_config()).await;

        // Hold the reply until released so the duplicate arrives mid-processing
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (count_tx, mut count_rx) = mpsc::channel::<String>(10);
        tokio::spawn(async move {
            let mut release_rx = Some(release_rx);
            while let Some(req) = loop_rx.recv().await {
                let _ = count_tx.send(req.tool.clone()).await;
                if let Some(rx) = release_rx.take() {
                    let _ = rx.await;
                }
                let _ = req.reply.send(comm::ToolResponse::new("ok".to_string()));
            }
        });

        let client = connect(comm_addr).await;
        let packet = encode_request(1, "list_files", json!({}));
        client.send(&packet).await.unwrap();
        expect_ack(&client, 1).await;

        // In flight: duplicate gets another ACK
        client.send(&packet).await.unwrap();
        expect_ack(&client, 1).await;

        release_tx.send(()).unwrap();
        let response = recv(&client, Duration::from_secs(1)).await;
        assert_eq!(response[0], MsgType::Response as u8);

        // Completed: duplicate gets the cached response
        client.send(&packet).await.unwrap();
        let cached = recv(&client, Duration::from_secs(1)).await;
        assert_eq!(cached, response);

        let mut received = Vec::new();
        while let Ok(Some(tool)) =
            tokio::time::timeout(Duration::from_millis(100), count_rx.recv()).await
        {
            received.push(tool);
        }
        assert_eq!(received.len(), 1, "Expected 1 request, got {:?}", received);
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_others() {
        init_tracing();

        let (comm_addr, mut loop_rx) = start(test_config()).await;

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(req) = loop_rx.recv().await {
                if req.tool == "slow" {
                    held.push(req);
                } else {
                    let _ = req.reply.send(comm::ToolResponse::new(req.tool.clone()));
                }
            }
        });

        let client = connect(comm_addr).await;
        client.send(&encode_request(1, "slow", json!({}))).await.unwrap();
        expect_ack(&client, 1).await;

        client.send(&encode_request(2, "fast", json!({}))).await.unwrap();
        expect_ack(&client, 2).await;

        let packet = recv(&client, Duration::from_secs(1)).await;
        let (seq, content, _) = decode_response(&packet);
        assert_eq!(seq, 2);
        assert_eq!(content, "fast");
    }

    #[tokio::test]
    async fn test_oversized_response_becomes_error() {
        init_tracing();

        let config = comm::CommConfig {
            max_payload_bytes: 1000,
            ..test_config()
        };
        let (comm_addr, mut loop_rx) = start(config).await;

        tokio::spawn(async move {
            if let Some(req) = loop_rx.recv().await {
                let _ = req.reply.send(comm::ToolResponse::new("x".repeat(5000)));
            }
        });

        let client = connect(comm_addr).await;
        client.send(&encode_request(9, "read_file", json!({"file_path": "big"}))).await.unwrap();
        expect_ack(&client, 9).await;

        let packet = recv(&client, Duration::from_secs(1)).await;
        let (seq, content, is_error) = decode_response(&packet);
        assert_eq!(seq, 9);
        assert!(is_error);
        assert!(content.starts_with("Response too large"), "{content}");
    }

    #[tokio::test]
    async fn test_response_timeout() {
        init_tracing();

        let config = comm::CommConfig {
            response_timeout_secs: 1,
            ..test_config()
        };
        let (comm_addr, mut loop_rx) = start(config).await;

        // Never replies but keeps the sender alive
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(req) = loop_rx.recv().await {
                held.push(req);
            }
        });

        let client = connect(comm_addr).await;
        client.send(&encode_request(3, "run_command", json!({"command": "sleep 60"}))).await.unwrap();
        expect_ack(&client, 3).await;

        let packet = recv(&client, Duration::from_secs(3)).await;
        let (seq, content, is_error) = decode_response(&packet);
        assert_eq!(seq, 3);
        assert!(is_error);
        assert_eq!(content, "Response timeout");
    }

    #[tokio::test]
    async fn test_malformed_packets_are_ignored() {
        init_tracing();

        let (comm_addr, mut loop_rx) = start(test_config()).await;
        tokio::spawn(async move {
            while let Some(req) = loop_rx.recv().await {
                let _ = req.reply.send(comm::ToolResponse::new("alive".to_string()));
            }
        });

        let client = connect(comm_addr).await;

        // Empty, truncated, REQUEST_ACK from client, undecodable payload
        client.send(&[]).await.unwrap();
        client.send(&[0x01, 0x00]).await.unwrap();
        let mut ack = vec![MsgType::RequestAck as u8];
        ack.extend_from_slice(&1u32.to_be_bytes());
        client.send(&ack).await.unwrap();
        let mut garbage = vec![MsgType::Request as u8];
        garbage.extend_from_slice(&5u32.to_be_bytes());
        garbage.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        client.send(&garbage).await.unwrap();

        // Server still answers, with nothing queued ahead of this request
        client.send(&encode_request(6, "list_tools", json!({}))).await.unwrap();
        expect_ack(&client, 6).await;
        let (seq, content, _) = decode_response(&recv(&client, Duration::from_secs(1)).await);
        assert_eq!(seq, 6);
        assert_eq!(content, "alive");
    }

    #[tokio::test]
    async fn test_end_to_end_tool_calls() {
        init_tracing();

        let dir = tempfile::tempdir().unwrap();
        let executor_config = executor::ExecutorConfig {
            base_dir: dir.path().to_path_buf(),
            tools_toml_path: dir.path().join("missing-tools.toml"),
            ..Default::default()
        };
        let executor = std::sync::Arc::new(executor::Executor::new(executor_config));

        let (comm_addr, mut loop_rx) = start(test_config()).await;
        tokio::spawn(async move {
            let mut dispatcher = dispatch::Dispatcher::new(executor);
            while let Some(req) = loop_rx.recv().await {
                dispatcher.dispatch(req);
            }
        });

        let client = connect(comm_addr).await;

        client
            .send(&encode_request(
                1,
                "write_file",
                json!({"file_path": "todo.txt", "content": "Buy milk\nCall Alice\n"}),
            ))
            .await
            .unwrap();
        expect_ack(&client, 1).await;
        let (_, _, is_error) = decode_response(&recv(&client, Duration::from_secs(2)).await);
        assert!(!is_error);

        client
            .send(&encode_request(2, "run_command", json!({"command": "wc -l < todo.txt"})))
            .await
            .unwrap();
        expect_ack(&client, 2).await;
        let (seq, content, is_error) = decode_response(&recv(&client, Duration::from_secs(5)).await);
        assert_eq!(seq, 2);
        assert!(!is_error, "{content}");
        let result: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "2");
        assert_eq!(result["exit_code"], 0);
        assert_eq!(result["timed_out"], false);

        client.send(&encode_request(3, "no_such_tool", json!({}))).await.unwrap();
        expect_ack(&client, 3).await;
        let (_, content, is_error) = decode_response(&recv(&client, Duration::from_secs(2)).await);
        assert!(is_error);
        assert!(content.contains("no_such_tool"));
    }

    #[tokio::test]
    async fn test_client_timeout_no_server() {
        init_tracing();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect("127.0.0.1:19999").await.unwrap();

        let _ = client.send(&encode_request(1, "list_tools", json!({}))).await;

        let mut buf = [0u8; 1024];
        let result =
            tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        // Timeout, or ICMP port unreachable surfaced as an error
        assert!(!matches!(result, Ok(Ok(_))));
    }
}
