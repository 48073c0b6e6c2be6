use crate::comm::error::{CommError, Result};
use crate::comm::types::{MsgType, RequestPayload, ResponsePayload};
use rmp_serde::decode::Deserializer;
use rmp_serde::encode::Serializer;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Header size: type (1) + seq (4)
pub const HEADER_LEN: usize = 5;

/// Encode a packet with given type, sequence, and payload
pub fn encode_packet(msg_type: MsgType, seq: u32, payload: Option<&impl Serialize>) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN);

    buf.push(msg_type as u8);
    buf.extend_from_slice(&seq.to_be_bytes());

    if let Some(p) = payload {
        let mut ser = Serializer::new(&mut buf);
        p.serialize(&mut ser)
            .map_err(|e| CommError::Encode(e.to_string()))?;
    }

    Ok(buf)
}

/// Decode packet type and seq from raw bytes
pub fn decode_header(data: &[u8]) -> Result<(MsgType, u32)> {
    if data.len() < HEADER_LEN {
        return Err(CommError::Decode("packet too short".to_string()));
    }

    let msg_type = MsgType::try_from(data[0])
        .map_err(|byte| CommError::Decode(format!("unknown message type 0x{byte:02x}")))?;

    let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);

    Ok((msg_type, seq))
}

/// Decode request payload
pub fn decode_request_payload(data: &[u8]) -> Result<RequestPayload> {
    let mut de = Deserializer::new(Cursor::new(data));
    RequestPayload::deserialize(&mut de).map_err(|e| CommError::Decode(e.to_string()))
}

/// Decode response payload
pub fn decode_response_payload(data: &[u8]) -> Result<ResponsePayload> {
    let mut de = Deserializer::new(Cursor::new(data));
    ResponsePayload::deserialize(&mut de).map_err(|e| CommError::Decode(e.to_string()))
}

/// Encode request ack (no payload)
pub fn encode_request_ack(seq: u32) -> Result<Vec<u8>> {
    encode_packet(MsgType::RequestAck, seq, None::<&()>)
}

/// Encode request
pub fn encode_request(seq: u32, payload: &RequestPayload) -> Result<Vec<u8>> {
    encode_packet(MsgType::Request, seq, Some(payload))
}

/// Encode response
pub fn encode_response(seq: u32, payload: &ResponsePayload) -> Result<Vec<u8>> {
    encode_packet(MsgType::Response, seq, Some(payload))
}

/// Encode a response, replacing it with an error if it exceeds `max_payload_bytes`
pub fn encode_bounded_response(
    seq: u32,
    payload: &ResponsePayload,
    max_payload_bytes: usize,
) -> Result<Vec<u8>> {
    let packet = encode_response(seq, payload)?;
    let payload_len = packet.len() - HEADER_LEN;
    if payload_len <= max_payload_bytes {
        return Ok(packet);
    }

    let replacement = ResponsePayload {
        content: format!(
            "Response too large: {payload_len} bytes exceeds the {max_payload_bytes} byte limit; \
             narrow the request or lower max_lines"
        ),
        is_error: true,
    };
    encode_response(seq, &replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_encode_decode() {
        let payload = RequestPayload {
            tool: "run_command".to_string(),
            arguments: json!({"command": "echo hi", "timeout": 1.5, "stdin": "a\nb"}),
        };

        let packet = encode_request(1, &payload).unwrap();
        let (decoded_type, decoded_seq) = decode_header(&packet).unwrap();

        assert_eq!(decoded_type, MsgType::Request);
        assert_eq!(decoded_seq, 1);

        let decoded = decode_request_payload(&packet[HEADER_LEN..]).unwrap();
        assert_eq!(decoded.tool, "run_command");
        assert_eq!(decoded.arguments["command"], "echo hi");
        assert_eq!(decoded.arguments["timeout"], 1.5);
        assert_eq!(decoded.arguments["stdin"], "a\nb");
    }

    #[test]
    fn test_request_ack_no_payload() {
        let packet = encode_request_ack(42).unwrap();

        assert_eq!(packet.len(), HEADER_LEN);
        let (msg_type, seq) = decode_header(&packet).unwrap();
        assert_eq!(msg_type, MsgType::RequestAck);
        assert_eq!(seq, 42);
    }

    #[test]
    fn test_response_error_flag() {
        let payload = ResponsePayload {
            content: "Error: Unknown tool: nope".to_string(),
            is_error: true,
        };

        let packet = encode_response(7, &payload).unwrap();
        let decoded = decode_response_payload(&packet[HEADER_LEN..]).unwrap();

        assert!(decoded.is_error);
        assert_eq!(decoded.content, "Error: Unknown tool: nope");
    }

    #[test]
    fn test_oversized_response_replaced() {
        let payload = ResponsePayload {
            content: "x".repeat(2000),
            is_error: false,
        };

        let packet = encode_bounded_response(3, &payload, 1000).unwrap();
        let decoded = decode_response_payload(&packet[HEADER_LEN..]).unwrap();
        assert!(decoded.is_error);
        assert!(decoded.content.starts_with("Response too large"));

        let packet = encode_bounded_response(3, &payload, 4000).unwrap();
        let decoded = decode_response_payload(&packet[HEADER_LEN..]).unwrap();
        assert!(!decoded.is_error);
        assert_eq!(decoded.content.len(), 2000);
    }

    #[test]
    fn test_invalid_msg_type() {
        let mut packet = vec![0xFFu8];
        packet.extend_from_slice(&1u32.to_be_bytes());

        let result = decode_header(&packet);
        assert!(matches!(result, Err(CommError::Decode(_))));
    }

    #[test]
    fn test_truncated_packet() {
        assert!(decode_header(&[0x01, 0x00, 0x00]).is_err());
        assert!(decode_header(&[0x01, 0x00, 0x00, 0x00, 0x01]).is_ok());
    }

    #[test]
    fn test_seq_big_endian() {
        let packet = encode_request_ack(256).unwrap();
        assert_eq!(&packet[1..HEADER_LEN], &[0x00, 0x00, 0x01, 0x00]);

        let packet = encode_request_ack(u32::MAX).unwrap();
        let (_, seq) = decode_header(&packet).unwrap();
        assert_eq!(seq, u32::MAX);
    }

    #[test]
    fn test_missing_arguments_default_to_null() {
        #[derive(Serialize)]
        struct Bare<'a> {
            tool: &'a str,
        }

        let mut bytes = Vec::new();
        Bare { tool: "list_files" }
            .serialize(&mut rmp_serde::Serializer::new(&mut bytes).with_struct_map())
            .unwrap();

        let decoded = decode_request_payload(&bytes).unwrap();
        assert_eq!(decoded.tool, "list_files");
        assert!(decoded.arguments.is_null());
    }
}
