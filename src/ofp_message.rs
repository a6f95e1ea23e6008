use crate::error::{OfpError, Result};
use crate::ofp_header::{OfpHeader, Xid, OFP_HEADER_LENGTH};

/// OpenFlow Message
///
/// Version-agnostic API for handling OpenFlow messages at the byte-buffer level.
pub trait OfpMessage: Sized {
    /// Return the byte-size of an `OfpMessage`.
    fn size_of(msg: &Self) -> usize;
    /// Create an `OfpHeader` for the given transaction id and OpenFlow message.
    fn header_of(xid: Xid, msg: &Self) -> Result<OfpHeader>;
    /// Return a marshaled buffer containing an OpenFlow header and the message `msg`.
    fn marshal(xid: Xid, msg: Self) -> Result<Vec<u8>>;
    /// Returns a pair `(u32, OfpMessage)` of the transaction id and OpenFlow message parsed from
    /// the given OpenFlow header `header`, and message body `buf`.
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Self)>;

    /// Decode the message at the start of `buf`, returning its header, the
    /// message and the number of bytes it occupied. Trailing bytes belong to
    /// the next message and are left alone.
    fn decode(buf: &[u8]) -> Result<(OfpHeader, Self, usize)> {
        let header = OfpHeader::parse(buf)?;
        let length = header.length();
        if length < OFP_HEADER_LENGTH {
            return Err(OfpError::malformed(format!(
                "declared length {} is shorter than the header",
                length
            )));
        }
        if length > buf.len() {
            return Err(OfpError::malformed(format!(
                "declared length {} exceeds the {} bytes available",
                length,
                buf.len()
            )));
        }
        let (_, msg) = Self::parse(&header, &buf[OFP_HEADER_LENGTH..length])?;
        Ok((header, msg, length))
    }
}
