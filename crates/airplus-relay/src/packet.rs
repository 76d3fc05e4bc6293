//! Minimal MQTT 3.1.1 packet codec.
//!
//! Covers only the QoS-0 subset this broker speaks: CONNECT/CONNACK,
//! SUBSCRIBE/SUBACK, PUBLISH, PINGREQ/PINGRESP, DISCONNECT. This is not a
//! general MQTT implementation; authentication rides on the WebSocket
//! handshake headers, so CONNECT carries no username or password.

use thiserror::Error;

/// Packet codec error.
#[derive(Error, Debug)]
pub enum PacketError {
    /// Structurally invalid packet
    #[error("Malformed packet: {0}")]
    Malformed(String),

    /// Topic or string field was not valid UTF-8
    #[error("Invalid UTF-8 in string field")]
    InvalidString,
}

/// An MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect { client_id: String, keep_alive: u16 },
    ConnAck { session_present: bool, return_code: u8 },
    Subscribe { packet_id: u16, topic: String },
    SubAck { packet_id: u16, return_code: u8 },
    Publish { topic: String, payload: Vec<u8> },
    PingReq,
    PingResp,
    Disconnect,
    /// Packet types outside the QoS-0 subset; decoded for framing only.
    Unsupported(u8),
}

impl Packet {
    /// Encode the packet into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Connect {
                client_id,
                keep_alive,
            } => {
                let mut body = Vec::new();
                write_string(&mut body, "MQTT");
                body.push(0x04); // protocol level
                body.push(0x02); // clean session
                body.extend_from_slice(&keep_alive.to_be_bytes());
                write_string(&mut body, client_id);
                frame(0x10, body)
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => frame(0x20, vec![u8::from(*session_present), *return_code]),
            Packet::Subscribe { packet_id, topic } => {
                let mut body = Vec::new();
                body.extend_from_slice(&packet_id.to_be_bytes());
                write_string(&mut body, topic);
                body.push(0x00); // requested QoS 0
                frame(0x82, body)
            }
            Packet::SubAck {
                packet_id,
                return_code,
            } => {
                let mut body = Vec::new();
                body.extend_from_slice(&packet_id.to_be_bytes());
                body.push(*return_code);
                frame(0x90, body)
            }
            Packet::Publish { topic, payload } => {
                let mut body = Vec::new();
                write_string(&mut body, topic);
                body.extend_from_slice(payload);
                frame(0x30, body)
            }
            Packet::PingReq => vec![0xC0, 0x00],
            Packet::PingResp => vec![0xD0, 0x00],
            Packet::Disconnect => vec![0xE0, 0x00],
            // Inbound-only marker; never sent.
            Packet::Unsupported(_) => Vec::new(),
        }
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed, or `None` when
    /// the buffer does not yet hold a complete packet.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, PacketError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first = buf[0];
        let (remaining_len, header_len) = match decode_remaining_length(&buf[1..])? {
            Some(value) => value,
            None => return Ok(None),
        };
        let total = 1 + header_len + remaining_len;
        if buf.len() < total {
            return Ok(None);
        }

        let body = &buf[1 + header_len..total];
        let packet = match first >> 4 {
            0x2 => {
                if body.len() != 2 {
                    return Err(PacketError::Malformed("CONNACK body".into()));
                }
                Packet::ConnAck {
                    session_present: body[0] & 0x01 != 0,
                    return_code: body[1],
                }
            }
            0x9 => {
                if body.len() < 3 {
                    return Err(PacketError::Malformed("SUBACK body".into()));
                }
                Packet::SubAck {
                    packet_id: u16::from_be_bytes([body[0], body[1]]),
                    return_code: body[2],
                }
            }
            0x3 => {
                let qos = (first >> 1) & 0x03;
                let (topic, mut offset) = read_string(body)?;
                if qos > 0 {
                    // QoS > 0 carries a packet id we have no use for.
                    if body.len() < offset + 2 {
                        return Err(PacketError::Malformed("PUBLISH packet id".into()));
                    }
                    offset += 2;
                }
                Packet::Publish {
                    topic,
                    payload: body[offset..].to_vec(),
                }
            }
            0xC => Packet::PingReq,
            0xD => Packet::PingResp,
            0xE => Packet::Disconnect,
            other => Packet::Unsupported(other),
        };

        Ok(Some((packet, total)))
    }
}

fn frame(first_byte: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(first_byte);
    encode_remaining_length(&mut out, body.len());
    out.extend_from_slice(&body);
    out
}

fn encode_remaining_length(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode the variable-length remaining-length field.
///
/// Returns `(remaining_length, bytes_used)`, or `None` when the field is not
/// yet complete.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(PacketError::Malformed("remaining length too long".into()));
        }
        value += (*byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    Ok(None)
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn read_string(buf: &[u8]) -> Result<(String, usize), PacketError> {
    if buf.len() < 2 {
        return Err(PacketError::Malformed("string length".into()));
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return Err(PacketError::Malformed("string body".into()));
    }
    let value = std::str::from_utf8(&buf[2..2 + len])
        .map_err(|_| PacketError::InvalidString)?
        .to_string();
    Ok((value, 2 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_wire_format() {
        let packet = Packet::Connect {
            client_id: "cid".to_string(),
            keep_alive: 4,
        };
        let bytes = packet.encode();
        assert_eq!(
            bytes,
            vec![
                0x10, 15, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x02, // clean session
                0x00, 0x04, // keepalive
                0x00, 0x03, b'c', b'i', b'd', // client id
            ]
        );
    }

    #[test]
    fn test_connack_decode() {
        let bytes = [0x20, 0x02, 0x00, 0x00];
        let (packet, consumed) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(
            packet,
            Packet::ConnAck {
                session_present: false,
                return_code: 0
            }
        );

        let refused = [0x20, 0x02, 0x00, 0x05];
        let (packet, _) = Packet::decode(&refused).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::ConnAck {
                session_present: false,
                return_code: 5
            }
        );
    }

    #[test]
    fn test_publish_roundtrip() {
        let packet = Packet::Publish {
            topic: "da_ctrl/da-abc/from_ncp".to_string(),
            payload: br#"{"cn":"getPort"}"#.to_vec(),
        };
        let bytes = packet.encode();
        let (decoded, consumed) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_publish_qos1_skips_packet_id() {
        // 0x32 = PUBLISH QoS 1; body: topic "t", packet id 0x0001, payload "x"
        let bytes = [0x32, 0x06, 0x00, 0x01, b't', 0x00, 0x01, b'x'];
        let (packet, _) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::Publish {
                topic: "t".to_string(),
                payload: vec![b'x'],
            }
        );
    }

    #[test]
    fn test_subscribe_encode() {
        let packet = Packet::Subscribe {
            packet_id: 1,
            topic: "t".to_string(),
        };
        let bytes = packet.encode();
        assert_eq!(bytes, vec![0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b't', 0x00]);
    }

    #[test]
    fn test_suback_decode() {
        let bytes = [0x90, 0x03, 0x00, 0x01, 0x00];
        let (packet, _) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::SubAck {
                packet_id: 1,
                return_code: 0
            }
        );
    }

    #[test]
    fn test_incomplete_returns_none() {
        assert!(Packet::decode(&[0x30]).unwrap().is_none());
        // Header complete but body missing.
        assert!(Packet::decode(&[0x30, 0x10, 0x00]).unwrap().is_none());
    }

    #[test]
    fn test_multibyte_remaining_length() {
        let payload = vec![b'x'; 200];
        let packet = Packet::Publish {
            topic: "t".to_string(),
            payload,
        };
        let bytes = packet.encode();
        // 203-byte body takes a two-byte remaining length.
        assert_eq!(bytes[1] & 0x80, 0x80);
        let (decoded, consumed) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_two_packets_in_one_buffer() {
        let mut bytes = Packet::PingResp.encode();
        bytes.extend(
            Packet::Publish {
                topic: "t".to_string(),
                payload: vec![1, 2, 3],
            }
            .encode(),
        );

        let (first, consumed) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(first, Packet::PingResp);
        let (second, _) = Packet::decode(&bytes[consumed..]).unwrap().unwrap();
        assert!(matches!(second, Packet::Publish { .. }));
    }

    #[test]
    fn test_pings_and_disconnect() {
        assert_eq!(Packet::PingReq.encode(), vec![0xC0, 0x00]);
        assert_eq!(Packet::Disconnect.encode(), vec![0xE0, 0x00]);
        let (packet, _) = Packet::decode(&[0xD0, 0x00]).unwrap().unwrap();
        assert_eq!(packet, Packet::PingResp);
    }

    #[test]
    fn test_malformed_connack() {
        let bytes = [0x20, 0x01, 0x00];
        assert!(Packet::decode(&bytes).is_err());
    }
}
