use std::fmt;
use std::io::{BufRead, Cursor, Read};
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{OfpError, Result};
use crate::ofp_utils::remaining;

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == MacAddr::BROADCAST
    }

    /// Group bit set; broadcast included.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    pub(crate) fn read(bytes: &mut Cursor<&[u8]>) -> Result<MacAddr> {
        let mut arr = [0; 6];
        bytes.read_exact(&mut arr)?;
        Ok(MacAddr(arr))
    }
}

impl From<u64> for MacAddr {
    /// Lower 48 bits, most significant byte first.
    fn from(addr: u64) -> MacAddr {
        let mut arr = [0; 6];
        for (i, b) in arr.iter_mut().enumerate() {
            *b = ((addr >> (8 * (5 - i))) & 0xff) as u8;
        }
        MacAddr(arr)
    }
}

impl From<MacAddr> for u64 {
    fn from(addr: MacAddr) -> u64 {
        addr.0.iter().fold(0, |acc, &b| (acc << 8) | b as u64)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = OfpError;

    fn from_str(s: &str) -> Result<MacAddr> {
        let mut arr = [0; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for b in arr.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| OfpError::malformed(format!("bad MAC address {:?}", s)))?;
            *b = u8::from_str_radix(part, 16)
                .map_err(|_| OfpError::malformed(format!("bad MAC address {:?}", s)))?;
        }
        if parts.next().is_some() {
            return Err(OfpError::malformed(format!("bad MAC address {:?}", s)));
        }
        Ok(MacAddr(arr))
    }
}

const ETH_HEADER_LENGTH: usize = 14;
const IPV4_MIN_HEADER_LENGTH: usize = 20;
const ARP_IPV4_LENGTH: usize = 28;

#[repr(u16)]
enum EthTyp {
    EthTypIP = 0x0800,
    EthTypARP = 0x0806,
    EthTypVLAN = 0x8100,
}

/// The IPv4 fields the controller cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ip {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Ip> {
        if remaining(bytes) < IPV4_MIN_HEADER_LENGTH {
            return None;
        }
        let vhl = bytes.read_u8().ok()?;
        if (vhl >> 4) != 4 {
            return None;
        }
        let tos = bytes.read_u8().ok()?;
        // total length, ident, fragment, ttl
        bytes.consume(7);
        let proto = bytes.read_u8().ok()?;
        bytes.consume(2);
        let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        Some(Ip {
            tos,
            proto,
            src,
            dst,
        })
    }
}

/// Address resolution protocol (ARP) packet payload, Ethernet/IPv4 only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arp {
    Query(MacAddr, Ipv4Addr, Ipv4Addr),
    Reply(MacAddr, Ipv4Addr, MacAddr, Ipv4Addr),
}

impl Arp {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Arp> {
        if remaining(bytes) < ARP_IPV4_LENGTH {
            return None;
        }
        // hardware type, protocol type, address lengths
        bytes.consume(6);
        let oper = bytes.read_u16::<BigEndian>().ok()?;
        let sha = MacAddr::read(bytes).ok()?;
        let spa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let tha = MacAddr::read(bytes).ok()?;
        let tpa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        match oper {
            0x0001 => Some(Arp::Query(sha, spa, tpa)),
            0x0002 => Some(Arp::Reply(sha, spa, tha, tpa)),
            _ => None,
        }
    }

    fn sender_ip(&self) -> Ipv4Addr {
        match *self {
            Arp::Query(_, spa, _) | Arp::Reply(_, spa, _, _) => spa,
        }
    }
}

/// Represents a packet at the network protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    Unparsable(u16),
}

/// Ethernet view of a frame carried in a packet-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: u8,
    pub dl_typ: u16,
    pub nw: Nw,
}

impl Packet {
    /// Parse the link-layer header and, when present, the IPv4 or ARP header.
    /// Fails only when the frame is too short to hold an Ethernet header.
    pub fn parse(buf: &[u8]) -> Result<Packet> {
        if buf.len() < ETH_HEADER_LENGTH {
            return Err(OfpError::malformed(format!(
                "{}-byte frame has no Ethernet header",
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        let dl_dst = MacAddr::read(&mut bytes)?;
        let dl_src = MacAddr::read(&mut bytes)?;
        let typ = bytes.read_u16::<BigEndian>()?;
        let (dl_vlan, dl_vlan_pcp, dl_typ) = if typ == EthTyp::EthTypVLAN as u16 {
            let tci = bytes.read_u16::<BigEndian>()?;
            let typ = bytes.read_u16::<BigEndian>()?;
            (Some(tci & 0xfff), (tci >> 13) as u8, typ)
        } else {
            (None, 0, typ)
        };
        let nw = match dl_typ {
            t if t == EthTyp::EthTypIP as u16 => {
                Ip::parse(&mut bytes).map_or(Nw::Unparsable(dl_typ), Nw::Ip)
            }
            t if t == EthTyp::EthTypARP as u16 => {
                Arp::parse(&mut bytes).map_or(Nw::Unparsable(dl_typ), Nw::Arp)
            }
            _ => Nw::Unparsable(dl_typ),
        };
        Ok(Packet {
            dl_src,
            dl_dst,
            dl_vlan,
            dl_vlan_pcp,
            dl_typ,
            nw,
        })
    }

    /// IPv4 address of the sender, from the IP source or the ARP sender field.
    pub fn src_ip(&self) -> Option<Ipv4Addr> {
        match self.nw {
            Nw::Ip(ref ip) => Some(ip.src),
            Nw::Arp(ref arp) => Some(arp.sender_ip()),
            Nw::Unparsable(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an Ethernet frame, optionally carrying an ARP request from `ip`.
    pub fn ethernet_frame(dst: MacAddr, src: MacAddr, arp_from: Option<Ipv4Addr>) -> Vec<u8> {
        let mut frame = vec![];
        frame.extend_from_slice(&dst.0);
        frame.extend_from_slice(&src.0);
        match arp_from {
            Some(ip) => {
                frame.extend_from_slice(&[0x08, 0x06]);
                frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
                frame.extend_from_slice(&src.0);
                frame.extend_from_slice(&ip.octets());
                frame.extend_from_slice(&[0; 6]);
                frame.extend_from_slice(&[10, 0, 0, 254]);
            }
            None => {
                frame.extend_from_slice(&[0x88, 0xb5]);
                frame.extend_from_slice(b"payload");
            }
        }
        frame
    }

    #[test]
    fn mac_addr_text_and_int_forms() {
        let mac: MacAddr = "00:1b:21:3a:4f:09".parse().unwrap();
        assert_eq!(mac.to_string(), "00:1b:21:3a:4f:09");
        assert_eq!(u64::from(mac), 0x001b_213a_4f09);
        assert_eq!(MacAddr::from(0x001b_213a_4f09u64), mac);
        assert!("00:1b:21".parse::<MacAddr>().is_err());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(!mac.is_multicast());
    }

    #[test]
    fn parse_arp_frame() {
        let src = MacAddr([0, 0, 0, 0, 0, 0xaa]);
        let frame = ethernet_frame(MacAddr::BROADCAST, src, Some(Ipv4Addr::new(10, 0, 0, 1)));
        let pk = Packet::parse(&frame).unwrap();
        assert_eq!(pk.dl_src, src);
        assert!(pk.dl_dst.is_broadcast());
        assert_eq!(pk.dl_typ, 0x0806);
        assert_eq!(pk.src_ip(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn parse_vlan_tagged_frame() {
        let mut frame = vec![];
        frame.extend_from_slice(&[2, 0, 0, 0, 0, 2]);
        frame.extend_from_slice(&[2, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&[0x81, 0x00, 0xa0, 0x0a, 0x88, 0xb5]);
        let pk = Packet::parse(&frame).unwrap();
        assert_eq!(pk.dl_vlan, Some(10));
        assert_eq!(pk.dl_vlan_pcp, 5);
        assert_eq!(pk.nw, Nw::Unparsable(0x88b5));
        assert_eq!(pk.src_ip(), None);
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(Packet::parse(&[0; 10]).is_err());
    }
}
