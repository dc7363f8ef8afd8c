//! Frame encoding and decoding.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::CodecError;
use super::types::{Command, Message, MessageType};
use super::SignatureFactory;
use crate::constants::{LENGTH_PREFIX_LEN, MAX_FRAME_SIZE, WIRE_VERSION};
use crate::peer::{PeerAddress, PeerId, PeerSocketAddress};

const FLAG_UDP: u8 = 0x01;
const FLAG_KEEP_ALIVE: u8 = 0x02;
const FLAG_INTS: u8 = 0x04;
const FLAG_BUFFERS: u8 = 0x08;
const FLAG_DATA_MAP: u8 = 0x10;
const FLAG_SIGNATURE: u8 = 0x20;

const DESC_IPV6: u8 = 0x01;
const DESC_FW_TCP: u8 = 0x02;
const DESC_FW_UDP: u8 = 0x04;
const DESC_RELAYED: u8 = 0x08;

const ADDR_V4: u8 = 0;
const ADDR_V6: u8 = 1;

/// Encodes a message into a single frame body (no length prefix).
///
/// If `signer` is given the frame carries a detached signature over every
/// byte preceding the signature section; an already-present signature on
/// the message is reused as-is.
pub fn encode(msg: &Message, signer: Option<&dyn SignatureFactory>) -> Result<Bytes, CodecError> {
    let sign = msg.signature.is_some() || signer.is_some();

    let mut flags = 0u8;
    if msg.udp {
        flags |= FLAG_UDP;
    }
    if msg.keep_alive {
        flags |= FLAG_KEEP_ALIVE;
    }
    if !msg.ints.is_empty() {
        flags |= FLAG_INTS;
    }
    if !msg.buffers.is_empty() {
        flags |= FLAG_BUFFERS;
    }
    if !msg.data_map.is_empty() {
        flags |= FLAG_DATA_MAP;
    }
    if sign {
        flags |= FLAG_SIGNATURE;
    }

    let mut buf = BytesMut::with_capacity(128);
    buf.put_u8(msg.version);
    buf.put_u8(flags);
    buf.put_u8(msg.command.to_byte());
    buf.put_u8(msg.kind as u8);
    buf.put_u32(msg.message_id);
    put_descriptor(&mut buf, &msg.sender);
    put_descriptor(&mut buf, &msg.recipient);

    if !msg.ints.is_empty() {
        buf.put_u16(msg.ints.len() as u16);
        for v in &msg.ints {
            buf.put_u32(*v);
        }
    }
    if !msg.buffers.is_empty() {
        buf.put_u8(msg.buffers.len() as u8);
        for b in &msg.buffers {
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        }
    }
    if !msg.data_map.is_empty() {
        buf.put_u16(msg.data_map.len() as u16);
        for (key, value) in &msg.data_map {
            buf.put_slice(key.as_bytes());
            buf.put_u32(value.len() as u32);
            buf.put_slice(value);
        }
    }
    if sign {
        let signature = match &msg.signature {
            Some(sig) => sig.clone(),
            None => signer
                .ok_or_else(|| CodecError::Signature("no signature factory".into()))?
                .sign(&buf)?,
        };
        buf.put_u16(signature.len() as u16);
        buf.put_slice(&signature);
    }

    if buf.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(buf.len()));
    }
    Ok(buf.freeze())
}

/// Encodes a message with the TCP length prefix prepended.
pub fn encode_framed(
    msg: &Message,
    signer: Option<&dyn SignatureFactory>,
) -> Result<Bytes, CodecError> {
    let body = encode(msg, signer)?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decodes one complete frame body (a UDP datagram or a de-framed TCP frame).
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    let mut buf = frame;

    need(buf, 8)?;
    let version = buf.get_u8();
    if version != WIRE_VERSION {
        return Err(CodecError::BadVersion(version));
    }
    let flags = buf.get_u8();
    let command = Command::from_byte(buf.get_u8());
    let kind_byte = buf.get_u8();
    let kind = MessageType::from_byte(kind_byte).ok_or(CodecError::InvalidKind(kind_byte))?;
    let message_id = buf.get_u32();
    let sender = get_descriptor(&mut buf)?;
    let recipient = get_descriptor(&mut buf)?;

    let mut ints = Vec::new();
    if flags & FLAG_INTS != 0 {
        need(buf, 2)?;
        let n = buf.get_u16() as usize;
        need(buf, n * 4)?;
        for _ in 0..n {
            ints.push(buf.get_u32());
        }
    }

    let mut buffers = Vec::new();
    if flags & FLAG_BUFFERS != 0 {
        need(buf, 1)?;
        let n = buf.get_u8() as usize;
        for _ in 0..n {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            need(buf, len)?;
            buffers.push(Bytes::copy_from_slice(&buf[..len]));
            buf.advance(len);
        }
    }

    let mut data_map = BTreeMap::new();
    if flags & FLAG_DATA_MAP != 0 {
        need(buf, 2)?;
        let n = buf.get_u16() as usize;
        for _ in 0..n {
            need(buf, 24)?;
            let key = PeerId::from_bytes(&buf[..20]).ok_or(CodecError::Truncated { needed: 20 })?;
            buf.advance(20);
            let len = buf.get_u32() as usize;
            need(buf, len)?;
            data_map.insert(key, Bytes::copy_from_slice(&buf[..len]));
            buf.advance(len);
        }
    }

    let mut signature = None;
    if flags & FLAG_SIGNATURE != 0 {
        need(buf, 2)?;
        let len = buf.get_u16() as usize;
        need(buf, len)?;
        signature = Some(Bytes::copy_from_slice(&buf[..len]));
        buf.advance(len);
    }

    Ok(Message {
        message_id,
        version,
        sender,
        recipient,
        command,
        kind,
        udp: flags & FLAG_UDP != 0,
        keep_alive: flags & FLAG_KEEP_ALIVE != 0,
        ints,
        buffers,
        data_map,
        signature,
    })
}

/// Decodes a frame and verifies its detached signature.
pub fn decode_verified(
    frame: &[u8],
    factory: &dyn SignatureFactory,
) -> Result<Message, CodecError> {
    let msg = decode(frame)?;
    let signature = msg
        .signature
        .as_ref()
        .ok_or_else(|| CodecError::Signature("frame carries no signature".into()))?;
    // Signed prefix is the frame minus the signature section.
    let signed_len = frame.len() - 2 - signature.len();
    if !factory.verify(&frame[..signed_len], signature) {
        return Err(CodecError::Signature("verification failed".into()));
    }
    Ok(msg)
}

/// Cumulates inbound TCP bytes and yields complete frames.
///
/// Feed raw socket reads with [`StreamDecoder::extend`] and drain with
/// [`StreamDecoder::next_frame`] until it returns `None`.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: BytesMut,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_frame(&mut self) -> Result<Option<Message>, CodecError> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(len));
        }
        if self.buf.len() < LENGTH_PREFIX_LEN + len {
            return Ok(None);
        }
        self.buf.advance(LENGTH_PREFIX_LEN);
        let frame = self.buf.split_to(len);
        decode(&frame).map(Some)
    }
}

fn need(buf: &[u8], n: usize) -> Result<(), CodecError> {
    if buf.len() < n {
        Err(CodecError::Truncated {
            needed: n - buf.len(),
        })
    } else {
        Ok(())
    }
}

fn put_addr(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
        IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
    }
}

fn get_addr(buf: &mut &[u8], v6: bool) -> Result<IpAddr, CodecError> {
    if v6 {
        need(*buf, 16)?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&buf[..16]);
        buf.advance(16);
        Ok(IpAddr::V6(Ipv6Addr::from(octets)))
    } else {
        need(*buf, 4)?;
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&buf[..4]);
        buf.advance(4);
        Ok(IpAddr::V4(Ipv4Addr::from(octets)))
    }
}

fn put_descriptor(buf: &mut BytesMut, peer: &PeerAddress) {
    let mut flags = 0u8;
    if peer.addr.is_ipv6() {
        flags |= DESC_IPV6;
    }
    if peer.firewalled_tcp {
        flags |= DESC_FW_TCP;
    }
    if peer.firewalled_udp {
        flags |= DESC_FW_UDP;
    }
    if peer.relayed {
        flags |= DESC_RELAYED;
    }
    buf.put_slice(peer.id.as_bytes());
    buf.put_u8(flags);
    buf.put_u8(peer.relays.len() as u8);
    put_addr(buf, &peer.addr);
    buf.put_u16(peer.tcp_port);
    buf.put_u16(peer.udp_port);
    for relay in &peer.relays {
        buf.put_u8(if relay.addr.is_ipv6() { ADDR_V6 } else { ADDR_V4 });
        put_addr(buf, &relay.addr);
        buf.put_u16(relay.tcp_port);
        buf.put_u16(relay.udp_port);
    }
}

fn get_descriptor(buf: &mut &[u8]) -> Result<PeerAddress, CodecError> {
    need(*buf, 22)?;
    let id = PeerId::from_bytes(&buf[..20]).ok_or(CodecError::Truncated { needed: 20 })?;
    buf.advance(20);
    let flags = buf.get_u8();
    let relay_count = buf.get_u8() as usize;
    let addr = get_addr(buf, flags & DESC_IPV6 != 0)?;
    need(*buf, 4)?;
    let tcp_port = buf.get_u16();
    let udp_port = buf.get_u16();

    let mut relays = Vec::with_capacity(relay_count);
    for _ in 0..relay_count {
        need(*buf, 1)?;
        let addr_kind = buf.get_u8();
        let relay_addr = match addr_kind {
            ADDR_V4 => get_addr(buf, false)?,
            ADDR_V6 => get_addr(buf, true)?,
            other => return Err(CodecError::InvalidAddressKind(other)),
        };
        need(*buf, 4)?;
        let relay_tcp = buf.get_u16();
        let relay_udp = buf.get_u16();
        relays.push(PeerSocketAddress::new(relay_addr, relay_tcp, relay_udp));
    }

    let mut peer = PeerAddress::new(id, addr, tcp_port, udp_port);
    peer.firewalled_tcp = flags & DESC_FW_TCP != 0;
    peer.firewalled_udp = flags & DESC_FW_UDP != 0;
    peer.relayed = flags & DESC_RELAYED != 0;
    peer.relays = relays;
    Ok(peer)
}
