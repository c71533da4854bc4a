// src/nat/stun/protocol.rs
//! Minimal STUN Binding codec (RFC 5389)
//!
//! Only what gathering needs: Binding Request encoding with FINGERPRINT,
//! Binding Response decoding of (XOR-)MAPPED-ADDRESS, ERROR-CODE reporting.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::{rngs::OsRng, RngCore};

use crate::nat::error::{NatError, NatResult};

/// Fixed magic cookie (RFC 5389 Section 6)
pub const MAGIC_COOKIE: u32 = 0x2112A442;
/// STUN header size in bytes
pub const HEADER_LEN: usize = 20;

/// Binding Request message type
pub const BINDING_REQUEST: u16 = 0x0001;
/// Binding Success Response message type
pub const BINDING_SUCCESS: u16 = 0x0101;
/// Binding Error Response message type
pub const BINDING_ERROR: u16 = 0x0111;

/// MAPPED-ADDRESS attribute (RFC 3489 servers)
pub const MAPPED_ADDRESS: u16 = 0x0001;
/// ERROR-CODE attribute
pub const ERROR_CODE: u16 = 0x0009;
/// XOR-MAPPED-ADDRESS attribute
pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// FINGERPRINT attribute
pub const FINGERPRINT: u16 = 0x8028;

const FINGERPRINT_XOR: u32 = 0x5354554e;
const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// 96-bit transaction id
pub type TransactionId = [u8; 12];

/// Random transaction id
pub fn new_transaction_id() -> TransactionId {
    let mut tid = [0u8; 12];
    OsRng.fill_bytes(&mut tid);
    tid
}

fn put_header(buf: &mut BytesMut, msg_type: u16, length: u16, tid: &TransactionId) {
    buf.put_u16(msg_type);
    buf.put_u16(length);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(tid);
}

/// Append FINGERPRINT. The header length must already account for it.
fn put_fingerprint(buf: &mut BytesMut) {
    let crc = crc32fast::hash(&buf[..]) ^ FINGERPRINT_XOR;
    buf.put_u16(FINGERPRINT);
    buf.put_u16(4);
    buf.put_u32(crc);
}

/// Binding Request carrying only a FINGERPRINT attribute
pub fn encode_binding_request(tid: &TransactionId) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 8);
    put_header(&mut buf, BINDING_REQUEST, 8, tid);
    put_fingerprint(&mut buf);
    buf.freeze()
}

/// Binding success response with XOR-MAPPED-ADDRESS and FINGERPRINT
pub fn encode_binding_success(tid: &TransactionId, mapped: SocketAddr) -> Bytes {
    let value = xor_address(mapped, tid);
    let length = (4 + value.len() + 8) as u16;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + length as usize);
    put_header(&mut buf, BINDING_SUCCESS, length, tid);
    buf.put_u16(XOR_MAPPED_ADDRESS);
    buf.put_u16(value.len() as u16);
    buf.put_slice(&value);
    put_fingerprint(&mut buf);
    buf.freeze()
}

fn xor_address(addr: SocketAddr, tid: &TransactionId) -> Vec<u8> {
    let mut value = Vec::with_capacity(20);
    value.push(0);
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&port.to_be_bytes());
            value.extend_from_slice(&(u32::from(ip) ^ MAGIC_COOKIE).to_be_bytes());
        }
        IpAddr::V6(ip) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&port.to_be_bytes());
            let mut octets = ip.octets();
            xor_ipv6(&mut octets, tid);
            value.extend_from_slice(&octets);
        }
    }
    value
}

fn xor_ipv6(octets: &mut [u8; 16], tid: &TransactionId) {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    for i in 0..4 {
        octets[i] ^= cookie[i];
    }
    for i in 0..12 {
        octets[i + 4] ^= tid[i];
    }
}

/// Validate the fixed header and return (type, body length, transaction id)
fn read_header(data: &[u8]) -> NatResult<(u16, usize, TransactionId)> {
    if data.len() < HEADER_LEN {
        return Err(NatError::stun("message shorter than header"));
    }

    let mut buf = &data[..HEADER_LEN];
    let msg_type = buf.get_u16();
    if msg_type & 0xC000 != 0 {
        return Err(NatError::stun("not a STUN message"));
    }

    let length = buf.get_u16() as usize;
    if buf.get_u32() != MAGIC_COOKIE {
        return Err(NatError::stun("invalid magic cookie"));
    }
    if length % 4 != 0 || data.len() < HEADER_LEN + length {
        return Err(NatError::stun("message length invalid"));
    }

    let mut tid = [0u8; 12];
    buf.copy_to_slice(&mut tid);
    Ok((msg_type, length, tid))
}

/// Transaction id of a well-formed STUN message
pub fn peek_transaction_id(data: &[u8]) -> Option<TransactionId> {
    read_header(data).ok().map(|(_, _, tid)| tid)
}

/// Transaction id of a Binding Request
pub fn decode_binding_request(data: &[u8]) -> NatResult<TransactionId> {
    let (msg_type, _, tid) = read_header(data)?;
    if msg_type != BINDING_REQUEST {
        return Err(NatError::stun(format!("unexpected message type 0x{:04x}", msg_type)));
    }
    Ok(tid)
}

/// Mapped address from a Binding Response for `expected`
pub fn decode_binding_response(data: &[u8], expected: &TransactionId) -> NatResult<SocketAddr> {
    let (msg_type, length, tid) = read_header(data)?;
    if tid != *expected {
        return Err(NatError::stun("transaction id mismatch"));
    }

    let total = HEADER_LEN + length;
    let mut offset = HEADER_LEN;
    let mut xor_mapped = None;
    let mut mapped = None;
    let mut error = None;

    while offset + 4 <= total {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let start = offset + 4;
        let end = start + attr_len;
        if end > total {
            return Err(NatError::stun(format!("attribute 0x{:04x} truncated", attr_type)));
        }
        let value = &data[start..end];

        match attr_type {
            XOR_MAPPED_ADDRESS => xor_mapped = Some(read_address(value, Some(&tid))?),
            MAPPED_ADDRESS => mapped = Some(read_address(value, None)?),
            ERROR_CODE => error = Some(read_error_code(value)),
            FINGERPRINT => {
                if value.len() != 4 {
                    return Err(NatError::stun("FINGERPRINT length invalid"));
                }
                let expected_crc = crc32fast::hash(&data[..offset]) ^ FINGERPRINT_XOR;
                if u32::from_be_bytes([value[0], value[1], value[2], value[3]]) != expected_crc {
                    return Err(NatError::stun("FINGERPRINT check failed"));
                }
            }
            _ => {}
        }

        offset = end + (4 - attr_len % 4) % 4;
    }

    match msg_type {
        BINDING_SUCCESS => xor_mapped
            .or(mapped)
            .ok_or_else(|| NatError::stun("no mapped address in response")),
        BINDING_ERROR => Err(NatError::stun(
            error.unwrap_or_else(|| "error response without ERROR-CODE".to_string()),
        )),
        other => Err(NatError::stun(format!("unexpected message type 0x{:04x}", other))),
    }
}

fn read_address(value: &[u8], tid: Option<&TransactionId>) -> NatResult<SocketAddr> {
    if value.len() < 8 {
        return Err(NatError::stun("address attribute too short"));
    }

    let mut buf = value;
    let _reserved = buf.get_u8();
    let family = buf.get_u8();
    let mut port = buf.get_u16();
    if tid.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match family {
        FAMILY_IPV4 => {
            let mut raw = buf.get_u32();
            if tid.is_some() {
                raw ^= MAGIC_COOKIE;
            }
            IpAddr::V4(Ipv4Addr::from(raw))
        }
        FAMILY_IPV6 => {
            if value.len() < 20 {
                return Err(NatError::stun("IPv6 address attribute too short"));
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            if let Some(tid) = tid {
                xor_ipv6(&mut octets, tid);
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(NatError::stun(format!("unknown address family {}", other))),
    };

    Ok(SocketAddr::new(ip, port))
}

fn read_error_code(value: &[u8]) -> String {
    if value.len() < 4 {
        return "malformed ERROR-CODE".to_string();
    }
    let code = (value[2] & 0x07) as u16 * 100 + value[3] as u16;
    let reason = String::from_utf8_lossy(&value[4..]);
    format!("error response {} {}", code, reason.trim_end_matches('\0'))
}
