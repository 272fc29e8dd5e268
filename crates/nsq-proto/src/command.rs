//! Encoders for the NSQ command set.
//!
//! Every function returns the exact bytes to write to the socket. Commands
//! are plain text lines (`COMMAND arg1 arg2\n`), sometimes followed by a
//! binary body prefixed with its length.

use crate::identify::IdentifyOptions;
use bytes::{BufMut, Bytes, BytesMut};

/// The four magic bytes a client sends immediately after connecting.
pub const MAGIC: &[u8] = b"  V2";

pub fn identify(options: &IdentifyOptions) -> Bytes {
    let body = serde_json::to_vec(options).expect("IdentifyOptions always serializes");
    with_body(b"IDENTIFY", &[], &body)
}

pub fn sub(topic: &str, channel: &str) -> Bytes {
    line(b"SUB", &[topic, channel])
}

pub fn pub_(topic: &str, body: &[u8]) -> Bytes {
    with_body(b"PUB", &[topic], body)
}

/// Multi-publish: one topic, many message bodies in a single command.
pub fn mpub(topic: &str, bodies: &[Bytes]) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(bodies.len() as u32);
    for body in bodies {
        payload.put_u32(body.len() as u32);
        payload.put_slice(body);
    }
    with_body(b"MPUB", &[topic], &payload)
}

pub fn rdy(count: u32) -> Bytes {
    line(b"RDY", &[&count.to_string()])
}

pub fn fin(message_id: &[u8; 16]) -> Bytes {
    line(b"FIN", &[&id_str(message_id)])
}

pub fn req(message_id: &[u8; 16], timeout_ms: u32) -> Bytes {
    line(b"REQ", &[&id_str(message_id), &timeout_ms.to_string()])
}

pub fn touch(message_id: &[u8; 16]) -> Bytes {
    line(b"TOUCH", &[&id_str(message_id)])
}

pub fn nop() -> Bytes {
    line(b"NOP", &[])
}

pub fn cls() -> Bytes {
    line(b"CLS", &[])
}

pub fn auth(secret: &[u8]) -> Bytes {
    with_body(b"AUTH", &[], secret)
}

/// Message ids are 16 ASCII bytes as nsqd assigns them; no decoding needed.
fn id_str(id: &[u8; 16]) -> String {
    String::from_utf8_lossy(id).to_string()
}

fn line(name: &[u8], args: &[&str]) -> Bytes {
    let mut buf = BytesMut::with_capacity(name.len() + 16);
    buf.put_slice(name);
    for arg in args {
        buf.put_u8(b' ');
        buf.put_slice(arg.as_bytes());
    }
    buf.put_u8(b'\n');
    buf.freeze()
}

fn with_body(name: &[u8], args: &[&str], body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(name.len() + body.len() + 16);
    buf.put_slice(name);
    for arg in args {
        buf.put_u8(b' ');
        buf.put_slice(arg.as_bytes());
    }
    buf.put_u8(b'\n');
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_command_is_a_plain_line() {
        let bytes = sub("events", "consumer-a");
        assert_eq!(bytes.as_ref(), b"SUB events consumer-a\n");
    }

    #[test]
    fn rdy_command_encodes_count() {
        assert_eq!(rdy(25).as_ref(), b"RDY 25\n");
    }

    #[test]
    fn fin_command_uses_raw_message_id() {
        let id = *b"0123456789abcdef";
        let bytes = fin(&id);
        assert_eq!(bytes.as_ref(), b"FIN 0123456789abcdef\n");
    }

    #[test]
    fn req_command_includes_timeout() {
        let id = *b"0123456789abcdef";
        let bytes = req(&id, 1000);
        assert_eq!(bytes.as_ref(), b"REQ 0123456789abcdef 1000\n");
    }

    #[test]
    fn pub_command_prefixes_body_length() {
        let bytes = pub_("events", b"hello");
        assert_eq!(&bytes[..11], b"PUB events\n");
        assert_eq!(&bytes[11..15], &5u32.to_be_bytes());
        assert_eq!(&bytes[15..], b"hello");
    }

    #[test]
    fn mpub_encodes_count_and_each_body() {
        let bodies = vec![Bytes::from_static(b"a"), Bytes::from_static(b"bb")];
        let bytes = mpub("events", &bodies);
        assert!(bytes.starts_with(b"MPUB events\n"));
    }

    #[test]
    fn nop_has_no_arguments() {
        assert_eq!(nop().as_ref(), b"NOP\n");
    }

    #[test]
    fn identify_embeds_json_body() {
        let options = IdentifyOptions::default();
        let bytes = identify(&options);
        assert!(bytes.starts_with(b"IDENTIFY\n"));
    }
}
