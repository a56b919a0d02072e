//! Service advertisement framing for smart HTTP discovery.

use bytes::{BufMut, Bytes, BytesMut};

/// pkt-line flush packet.
pub const FLUSH_PKT: &[u8] = b"0000";

/// Builds `<len>"# service=<name>\n"0000`, where `<len>` is the payload length
/// plus the four prefix bytes, written as exactly four lowercase hex digits.
pub fn encode_advertisement(service: &str) -> Bytes {
    let payload = format!("# service={service}\n");
    let prefix = format!("{:04x}", payload.len() + 4);

    let mut out = BytesMut::with_capacity(prefix.len() + payload.len() + FLUSH_PKT.len());
    out.put_slice(prefix.as_bytes());
    out.put_slice(payload.as_bytes());
    out.put_slice(FLUSH_PKT);
    out.freeze()
}
