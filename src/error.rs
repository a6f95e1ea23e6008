use std::io;

use thiserror::Error;

use crate::ofp_header::Xid;

/// Errors raised by the codec, the switch sessions and the MAC table.
///
/// Every variant is local to one session (or, for `TableFull`, to the table
/// itself); none of them is fatal to the controller process.
#[derive(Debug, Error)]
pub enum OfpError {
    /// Framing or field violation found while decoding.
    #[error("Malformed OpenFlow message: {0}")]
    MalformedMessage(String),
    /// Well-formed message that is not valid in the session's current state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Unsupported OpenFlow version: {0}")]
    UnsupportedVersion(u8),
    /// A known OpenFlow 1.0 type code this controller does not model.
    #[error("Unsupported OpenFlow message code {code} (xid {xid})")]
    UnsupportedMessage { code: u8, xid: Xid },
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("MAC table is full ({0} entries)")]
    TableFull(usize),
    #[error("No switch connected with datapath id {0:#018x}")]
    UnknownDatapath(u64),
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

impl OfpError {
    pub(crate) fn malformed<S: Into<String>>(reason: S) -> OfpError {
        OfpError::MalformedMessage(reason.into())
    }

    /// Reads from an in-memory cursor only fail when the buffer runs out, which
    /// on the decode path means a truncated structure.
    pub(crate) fn truncated_to_malformed(self, what: &str) -> OfpError {
        match self {
            OfpError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                OfpError::MalformedMessage(format!("truncated {}", what))
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OfpError>;
