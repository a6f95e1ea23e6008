use std::io::{BufRead, Cursor, Read};

use byteorder::WriteBytesExt;

use crate::error::Result;

/// Declares a fieldless enum mirroring an OpenFlow wire constant set, with
/// checked conversions to and from the on-wire integer.
macro_rules! wire_enum {
    ($(#[$meta:meta])* pub enum $name:ident : $repr:ty {
        $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)*
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Map an on-wire value to its variant.
            pub fn of_int(value: $repr) -> Option<$name> {
                match value {
                    $(v if v == $value => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// On-wire value of the variant.
            pub fn to_int(self) -> $repr {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }
    };
}

pub fn write_padding_bytes(bytes: &mut Vec<u8>, count: usize) -> Result<()> {
    for _ in 0..count {
        bytes.write_u8(0)?;
    }
    Ok(())
}

pub fn skip_padding_bytes(bytes: &mut Cursor<&[u8]>, count: usize) {
    bytes.consume(count);
}

/// Write `s` into a NUL-padded field of exactly `capacity` bytes. The last
/// byte is always NUL, so longer strings are cut.
pub fn write_fixed_size_string(bytes: &mut Vec<u8>, s: &str, capacity: usize) -> Result<()> {
    let raw = s.as_bytes();
    let len = raw.len().min(capacity.saturating_sub(1));
    bytes.extend_from_slice(&raw[..len]);
    write_padding_bytes(bytes, capacity - len)
}

pub fn read_fixed_size_string(bytes: &mut Cursor<&[u8]>, capacity: usize) -> Result<String> {
    let mut arr = vec![0; capacity];
    bytes.read_exact(&mut arr)?;
    let end = arr.iter().position(|&b| b == 0).unwrap_or(capacity);
    Ok(String::from_utf8_lossy(&arr[..end]).into_owned())
}

/// Bytes left unread in `bytes`.
pub fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    let len = bytes.get_ref().len() as u64;
    len.saturating_sub(bytes.position()) as usize
}

/// Take everything left in `bytes`.
pub fn read_rest(bytes: &mut Cursor<&[u8]>) -> Vec<u8> {
    let start = (bytes.position() as usize).min(bytes.get_ref().len());
    let rest = bytes.get_ref()[start..].to_vec();
    bytes.set_position(bytes.get_ref().len() as u64);
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_size_string_is_nul_padded() {
        let mut bytes = vec![];
        write_fixed_size_string(&mut bytes, "eth0", 16).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..5], b"eth0\0");

        let mut cursor = Cursor::new(&bytes[..]);
        assert_eq!(read_fixed_size_string(&mut cursor, 16).unwrap(), "eth0");
        assert_eq!(remaining(&cursor), 0);
    }

    #[test]
    fn fixed_size_string_truncates() {
        let mut bytes = vec![];
        write_fixed_size_string(&mut bytes, "abcdefgh", 4).unwrap();
        assert_eq!(bytes, b"abc\0".to_vec());
    }
}
