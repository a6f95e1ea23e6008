use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};

use crate::error::{OfpError, Result};
use crate::openflow0x01::MsgCode;

pub const OFP_HEADER_LENGTH: usize = 8;

/// Transaction id. Replies carry the xid of the request they answer.
pub type Xid = u32;

pub const OPENFLOW_0_01_VERSION: u8 = 0x01;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: Xid,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: Xid) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        OFP_HEADER_LENGTH
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) -> Result<()> {
        bytes.write_u8(header.version)?;
        bytes.write_u8(header.typ)?;
        bytes.write_u16::<BigEndian>(header.length)?;
        bytes.write_u32::<BigEndian>(header.xid)?;
        Ok(())
    }

    /// Parse the header at the start of `buf`. Only the eight header bytes are
    /// examined; the declared length is not checked against `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < OFP_HEADER_LENGTH {
            return Err(OfpError::malformed(format!(
                "{} bytes is too short for an OpenFlow header",
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        Ok(OfpHeader {
            version: bytes.read_u8()?,
            typ: bytes.read_u8()?,
            length: bytes.read_u16::<BigEndian>()?,
            xid: bytes.read_u32::<BigEndian>()?,
        })
    }

    /// Declared length of the message starting at `buf`, once enough bytes of
    /// the header have arrived to know it.
    pub fn peek_length(buf: &[u8]) -> Option<usize> {
        if buf.len() < 4 {
            None
        } else {
            Some(((buf[2] as usize) << 8) | buf[3] as usize)
        }
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the raw message type byte.
    pub fn type_byte(&self) -> u8 {
        self.typ
    }

    /// Return the OpenFlow message type code of a header.
    pub fn type_code(&self) -> Result<MsgCode> {
        MsgCode::of_int(self.typ)
            .ok_or_else(|| OfpError::malformed(format!("unknown message type {}", self.typ)))
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> Xid {
        self.xid
    }
}

/// Splits a byte stream into whole OpenFlow messages using the header's
/// length prefix. Reads may deliver several messages at once or a single
/// message in pieces.
#[derive(Debug, Default)]
pub struct MessageFramer {
    rd: BytesMut,
}

impl MessageFramer {
    pub fn new() -> MessageFramer {
        MessageFramer { rd: BytesMut::new() }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.rd.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.rd.len()
    }

    /// Return the next complete message, header included, or `None` if more
    /// bytes are needed. A declared length shorter than the header can never be
    /// framed; the bare header is returned so the decoder can reject it.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let length = OfpHeader::peek_length(&self.rd)?;
        let length = if length < OFP_HEADER_LENGTH {
            OFP_HEADER_LENGTH
        } else {
            length
        };
        if self.rd.len() < length {
            self.rd.reserve(length - self.rd.len());
            return None;
        }
        Some(self.rd.split_to(length).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_bytes(xid: u8) -> Vec<u8> {
        vec![0x01, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, xid]
    }

    #[test]
    fn header_parse_and_marshal_agree() {
        let mut bytes = vec![];
        OfpHeader::marshal(&mut bytes, OfpHeader::new(1, 10, 0x0102, 0xdeadbeef)).unwrap();
        assert_eq!(bytes, vec![1, 10, 0x01, 0x02, 0xde, 0xad, 0xbe, 0xef]);

        let header = OfpHeader::parse(&bytes).unwrap();
        assert_eq!(header.version(), 1);
        assert_eq!(header.length(), 0x0102);
        assert_eq!(header.xid(), 0xdeadbeef);
        assert_eq!(header.type_code().unwrap(), MsgCode::PacketIn);
    }

    #[test]
    fn header_rejects_short_buffer() {
        match OfpHeader::parse(&[1, 0, 0]) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("expected malformed header, got {:?}", other),
        }
    }

    #[test]
    fn framer_splits_concatenated_messages() {
        let mut framer = MessageFramer::new();
        let mut data = hello_bytes(1);
        data.extend(hello_bytes(2));
        framer.extend(&data);

        let first = framer.next_frame().unwrap();
        let second = framer.next_frame().unwrap();
        assert_eq!(&first[..], &hello_bytes(1)[..]);
        assert_eq!(&second[..], &hello_bytes(2)[..]);
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn framer_waits_for_split_message() {
        let mut framer = MessageFramer::new();
        let data = vec![0x01, 0x02, 0x00, 0x0c, 0, 0, 0, 7, 0xaa, 0xbb, 0xcc, 0xdd];
        framer.extend(&data[..3]);
        assert!(framer.next_frame().is_none());
        framer.extend(&data[3..10]);
        assert!(framer.next_frame().is_none());
        framer.extend(&data[10..]);
        let frame = framer.next_frame().unwrap();
        assert_eq!(&frame[..], &data[..]);
    }

    #[test]
    fn framer_hands_over_impossible_length() {
        let mut framer = MessageFramer::new();
        framer.extend(&[0x01, 0x00, 0x00, 0x04, 0, 0, 0, 0, 0xff]);
        let frame = framer.next_frame().unwrap();
        assert_eq!(frame.len(), OFP_HEADER_LENGTH);
        assert_eq!(OfpHeader::parse(&frame).unwrap().length(), 4);
        assert_eq!(framer.buffered(), 1);
    }
}
