use std::io::Cursor;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{pack_bits, test_bit};
use crate::error::{OfpError, Result};
use crate::ofp_utils::{
    read_fixed_size_string, read_rest, remaining, skip_padding_bytes, write_fixed_size_string,
    write_padding_bytes,
};
use crate::packet::MacAddr;

wire_enum! {
    /// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
    pub enum MsgCode: u8 {
        Hello = 0,
        Error = 1,
        EchoReq = 2,
        EchoResp = 3,
        Vendor = 4,
        FeaturesReq = 5,
        FeaturesResp = 6,
        GetConfigReq = 7,
        GetConfigResp = 8,
        SetConfig = 9,
        PacketIn = 10,
        FlowRemoved = 11,
        PortStatus = 12,
        PacketOut = 13,
        FlowMod = 14,
        PortMod = 15,
        StatsReq = 16,
        StatsResp = 17,
        BarrierReq = 18,
        BarrierResp = 19,
        QueueGetConfigReq = 20,
        QueueGetConfigResp = 21,
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(msg: &Self) -> usize;
    /// Parse a message body.
    fn parse(buf: &[u8]) -> Result<Self>;
    /// Marshal a message body into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<()>;
}

const OFP_MATCH_LENGTH: usize = 40;
const OFP_PHY_PORT_LENGTH: usize = 48;
const OFP_ETH_ALEN: usize = 6;
const OFP_MAX_PORT_NAME_LEN: usize = 16;
const OFP_MAX_TABLE_NAME_LEN: usize = 32;
const DESC_STR_LEN: usize = 256;
const SERIAL_NUM_LEN: usize = 32;
const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// Table id addressing every table of a datapath in stats requests.
pub const ALL_TABLES: u8 = 0xff;

/// An IPv4 network: address plus number of significant leading bits (1 to 32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Prefix {
    pub addr: Ipv4Addr,
    pub len: u8,
}

impl Ipv4Prefix {
    pub fn host(addr: Ipv4Addr) -> Ipv4Prefix {
        Ipv4Prefix { addr, len: 32 }
    }

    /// OpenFlow 1.0 encodes prefixes as a count of wildcarded low bits.
    fn wildcard_bits(prefix: &Option<Ipv4Prefix>) -> u32 {
        match *prefix {
            Some(p) if p.len > 0 => 32 - p.len.min(32) as u32,
            _ => 32,
        }
    }

    fn of_wildcard_bits(addr: u32, bits: u32) -> Option<Ipv4Prefix> {
        if bits >= 32 {
            None
        } else {
            Some(Ipv4Prefix {
                addr: Ipv4Addr::from(addr),
                len: (32 - bits) as u8,
            })
        }
    }
}

mod wildcards {
    pub const IN_PORT: u32 = 0;
    pub const DL_VLAN: u32 = 1;
    pub const DL_SRC: u32 = 2;
    pub const DL_DST: u32 = 3;
    pub const DL_TYPE: u32 = 4;
    pub const NW_PROTO: u32 = 5;
    pub const TP_SRC: u32 = 6;
    pub const TP_DST: u32 = 7;
    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_DST_SHIFT: u32 = 14;
    pub const NW_ADDR_MASK: u32 = 0x3f;
    pub const DL_VLAN_PCP: u32 = 20;
    pub const NW_TOS: u32 = 21;
}

/// Fields to match against flows. `None` means the field is wildcarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_typ: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Prefix>,
    pub nw_dst: Option<Ipv4Prefix>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    /// A pattern matching every packet.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    fn wildcards_of_pattern(m: &Pattern) -> u32 {
        use self::wildcards::*;
        let flags = pack_bits(&[
            m.in_port.is_none(),
            m.dl_vlan.is_none(),
            m.dl_src.is_none(),
            m.dl_dst.is_none(),
            m.dl_typ.is_none(),
            m.nw_proto.is_none(),
            m.tp_src.is_none(),
            m.tp_dst.is_none(),
        ]);
        flags
            | Ipv4Prefix::wildcard_bits(&m.nw_src) << NW_SRC_SHIFT
            | Ipv4Prefix::wildcard_bits(&m.nw_dst) << NW_DST_SHIFT
            | (m.dl_vlan_pcp.is_none() as u32) << DL_VLAN_PCP
            | (m.nw_tos.is_none() as u32) << NW_TOS
    }

    fn marshal(p: Pattern, bytes: &mut Vec<u8>) -> Result<()> {
        let w = Pattern::wildcards_of_pattern(&p);
        bytes.write_u32::<BigEndian>(w)?;
        bytes.write_u16::<BigEndian>(p.in_port.unwrap_or(0))?;
        bytes.extend_from_slice(&p.dl_src.unwrap_or_default().0);
        bytes.extend_from_slice(&p.dl_dst.unwrap_or_default().0);
        bytes.write_u16::<BigEndian>(p.dl_vlan.unwrap_or(0))?;
        bytes.write_u8(p.dl_vlan_pcp.unwrap_or(0))?;
        write_padding_bytes(bytes, 1)?;
        bytes.write_u16::<BigEndian>(p.dl_typ.unwrap_or(0))?;
        bytes.write_u8(p.nw_tos.unwrap_or(0))?;
        bytes.write_u8(p.nw_proto.unwrap_or(0))?;
        write_padding_bytes(bytes, 2)?;
        bytes.write_u32::<BigEndian>(p.nw_src.map_or(0, |n| u32::from(n.addr)))?;
        bytes.write_u32::<BigEndian>(p.nw_dst.map_or(0, |n| u32::from(n.addr)))?;
        bytes.write_u16::<BigEndian>(p.tp_src.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(p.tp_dst.unwrap_or(0))?;
        Ok(())
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern> {
        use self::wildcards::*;
        let w = bytes.read_u32::<BigEndian>()?;
        let when = |bit: u32| !test_bit(bit, w);
        let in_port = bytes.read_u16::<BigEndian>()?;
        let dl_src = MacAddr::read(bytes)?;
        let dl_dst = MacAddr::read(bytes)?;
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = bytes.read_u8()?;
        skip_padding_bytes(bytes, 1);
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        let nw_tos = bytes.read_u8()?;
        let nw_proto = bytes.read_u8()?;
        skip_padding_bytes(bytes, 2);
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        Ok(Pattern {
            in_port: Some(in_port).filter(|_| when(IN_PORT)),
            dl_src: Some(dl_src).filter(|_| when(DL_SRC)),
            dl_dst: Some(dl_dst).filter(|_| when(DL_DST)),
            dl_vlan: Some(dl_vlan).filter(|_| when(DL_VLAN)),
            dl_vlan_pcp: Some(dl_vlan_pcp).filter(|_| when(DL_VLAN_PCP)),
            dl_typ: Some(dl_typ).filter(|_| when(DL_TYPE)),
            nw_tos: Some(nw_tos).filter(|_| when(NW_TOS)),
            nw_proto: Some(nw_proto).filter(|_| when(NW_PROTO)),
            nw_src: Ipv4Prefix::of_wildcard_bits(nw_src, (w >> NW_SRC_SHIFT) & NW_ADDR_MASK),
            nw_dst: Ipv4Prefix::of_wildcard_bits(nw_dst, (w >> NW_DST_SHIFT) & NW_ADDR_MASK),
            tp_src: Some(tp_src).filter(|_| when(TP_SRC)),
            tp_dst: Some(tp_dst).filter(|_| when(TP_DST)),
        })
    }
}

/// Port behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    /// Send to the controller, with at most this many bytes of the packet.
    Controller(u16),
    Local,
}

/// Reserved OpenFlow 1.0 port numbers.
#[repr(u16)]
pub enum OfpPort {
    OFPPMax = 0xff00,
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

impl PseudoPort {
    fn of_int(p: u16) -> Result<Option<PseudoPort>> {
        if (OfpPort::OFPPNone as u16) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, len: u16) -> Result<PseudoPort> {
        let port = match p {
            p if p == (OfpPort::OFPPInPort as u16) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u16) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u16) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u16) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u16) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u16) => PseudoPort::Controller(len),
            p if p == (OfpPort::OFPPLocal as u16) => PseudoPort::Local,
            p if p <= (OfpPort::OFPPMax as u16) => PseudoPort::PhysicalPort(p),
            p => return Err(OfpError::malformed(format!("unsupported port number {:#06x}", p))),
        };
        Ok(port)
    }

    fn to_int(pp: PseudoPort) -> u16 {
        match pp {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u16,
            PseudoPort::Table => OfpPort::OFPPTable as u16,
            PseudoPort::Normal => OfpPort::OFPPNormal as u16,
            PseudoPort::Flood => OfpPort::OFPPFlood as u16,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u16,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u16,
            PseudoPort::Local => OfpPort::OFPPLocal as u16,
        }
    }

    fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(PseudoPort::to_int(pp))?;
        Ok(())
    }

    fn marshal_opt(pp: Option<PseudoPort>, bytes: &mut Vec<u8>) -> Result<()> {
        match pp {
            None => bytes.write_u16::<BigEndian>(OfpPort::OFPPNone as u16)?,
            Some(pp) => PseudoPort::marshal(pp, bytes)?,
        }
        Ok(())
    }
}

/// Actions associated with flows and packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
    SetVlanVid(u16),
    SetVlanPcp(u8),
    StripVlan,
    SetDlSrc(MacAddr),
    SetDlDst(MacAddr),
    SetNwSrc(Ipv4Addr),
    SetNwDst(Ipv4Addr),
    SetNwTos(u8),
    SetTpSrc(u16),
    SetTpDst(u16),
    Enqueue(PseudoPort, u32),
}

wire_enum! {
    pub enum OfpActionType: u16 {
        OFPATOutput = 0,
        OFPATSetVlanVId = 1,
        OFPATSetVlanPCP = 2,
        OFPATStripVlan = 3,
        OFPATSetDlSrc = 4,
        OFPATSetDlDst = 5,
        OFPATSetNwSrc = 6,
        OFPATSetNwDst = 7,
        OFPATSetNwTos = 8,
        OFPATSetTpSrc = 9,
        OFPATSetTpDst = 10,
        OFPATEnqueue = 11,
    }
}

impl Action {
    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
            Action::SetVlanVid(_) => OfpActionType::OFPATSetVlanVId,
            Action::SetVlanPcp(_) => OfpActionType::OFPATSetVlanPCP,
            Action::StripVlan => OfpActionType::OFPATStripVlan,
            Action::SetDlSrc(_) => OfpActionType::OFPATSetDlSrc,
            Action::SetDlDst(_) => OfpActionType::OFPATSetDlDst,
            Action::SetNwSrc(_) => OfpActionType::OFPATSetNwSrc,
            Action::SetNwDst(_) => OfpActionType::OFPATSetNwDst,
            Action::SetNwTos(_) => OfpActionType::OFPATSetNwTos,
            Action::SetTpSrc(_) => OfpActionType::OFPATSetTpSrc,
            Action::SetTpDst(_) => OfpActionType::OFPATSetTpDst,
            Action::Enqueue(_, _) => OfpActionType::OFPATEnqueue,
        }
    }

    /// On-wire size, header included.
    fn size_of(a: &Action) -> usize {
        match *a {
            Action::SetDlSrc(_) | Action::SetDlDst(_) | Action::Enqueue(_, _) => 16,
            _ => 8,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(typ: OfpActionType, bytes: &mut Cursor<&[u8]>) -> Result<Action> {
        let action = match typ {
            OfpActionType::OFPATOutput => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                let len = bytes.read_u16::<BigEndian>()?;
                Action::Output(PseudoPort::make(port_code, len)?)
            }
            OfpActionType::OFPATSetVlanVId => Action::SetVlanVid(bytes.read_u16::<BigEndian>()?),
            OfpActionType::OFPATSetVlanPCP => Action::SetVlanPcp(bytes.read_u8()?),
            OfpActionType::OFPATStripVlan => Action::StripVlan,
            OfpActionType::OFPATSetDlSrc => Action::SetDlSrc(MacAddr::read(bytes)?),
            OfpActionType::OFPATSetDlDst => Action::SetDlDst(MacAddr::read(bytes)?),
            OfpActionType::OFPATSetNwSrc => {
                Action::SetNwSrc(Ipv4Addr::from(bytes.read_u32::<BigEndian>()?))
            }
            OfpActionType::OFPATSetNwDst => {
                Action::SetNwDst(Ipv4Addr::from(bytes.read_u32::<BigEndian>()?))
            }
            OfpActionType::OFPATSetNwTos => Action::SetNwTos(bytes.read_u8()?),
            OfpActionType::OFPATSetTpSrc => Action::SetTpSrc(bytes.read_u16::<BigEndian>()?),
            OfpActionType::OFPATSetTpDst => Action::SetTpDst(bytes.read_u16::<BigEndian>()?),
            OfpActionType::OFPATEnqueue => {
                let port = PseudoPort::make(bytes.read_u16::<BigEndian>()?, 0)?;
                skip_padding_bytes(bytes, 6);
                Action::Enqueue(port, bytes.read_u32::<BigEndian>()?)
            }
        };
        Ok(action)
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Action>> {
        let mut actions = vec![];
        let mut offset = 0;
        while offset < buf.len() {
            if buf.len() - offset < 8 {
                return Err(OfpError::malformed("truncated action header"));
            }
            let mut bytes = Cursor::new(&buf[offset..]);
            let code = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 8 || len % 8 != 0 || len > buf.len() - offset {
                return Err(OfpError::malformed(format!("bad action length {}", len)));
            }
            let typ = OfpActionType::of_int(code)
                .ok_or_else(|| OfpError::malformed(format!("unsupported action type {}", code)))?;
            let mut body = Cursor::new(&buf[offset + 4..offset + len]);
            actions.push(Action::parse(typ, &mut body)?);
            offset += len;
        }
        Ok(actions)
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(Action::type_code(&act).to_int())?;
        bytes.write_u16::<BigEndian>(Action::size_of(&act) as u16)?;
        match act {
            Action::Output(pp) => {
                PseudoPort::marshal(pp, bytes)?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })?;
            }
            Action::SetVlanVid(vid) => {
                bytes.write_u16::<BigEndian>(vid)?;
                write_padding_bytes(bytes, 2)?;
            }
            Action::SetVlanPcp(pcp) => {
                bytes.write_u8(pcp)?;
                write_padding_bytes(bytes, 3)?;
            }
            Action::StripVlan => write_padding_bytes(bytes, 4)?,
            Action::SetDlSrc(mac) | Action::SetDlDst(mac) => {
                bytes.extend_from_slice(&mac.0);
                write_padding_bytes(bytes, 6)?;
            }
            Action::SetNwSrc(ip) | Action::SetNwDst(ip) => {
                bytes.write_u32::<BigEndian>(u32::from(ip))?;
            }
            Action::SetNwTos(tos) => {
                bytes.write_u8(tos)?;
                write_padding_bytes(bytes, 3)?;
            }
            Action::SetTpSrc(port) | Action::SetTpDst(port) => {
                bytes.write_u16::<BigEndian>(port)?;
                write_padding_bytes(bytes, 2)?;
            }
            Action::Enqueue(pp, queue_id) => {
                PseudoPort::marshal(pp, bytes)?;
                write_padding_bytes(bytes, 6)?;
                bytes.write_u32::<BigEndian>(queue_id)?;
            }
        }
        Ok(())
    }

    fn marshal_sequence(actions: Vec<Action>, bytes: &mut Vec<u8>) -> Result<()> {
        for act in actions {
            Action::marshal(act, bytes)?;
        }
        Ok(())
    }
}

/// How long before a flow entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d),
            table_stats: test_bit(1, d),
            port_stats: test_bit(2, d),
            stp: test_bit(3, d),
            ip_reasm: test_bit(5, d),
            queue_stats: test_bit(6, d),
            arp_match_ip: test_bit(7, d),
        }
    }

    fn to_int(c: &Capabilities) -> u32 {
        // bit 4 is reserved
        pack_bits(&[
            c.flow_stats,
            c.table_stats,
            c.port_stats,
            c.stp,
            false,
            c.ip_reasm,
            c.queue_stats,
            c.arp_match_ip,
        ])
    }
}

/// Actions supported by the datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupportedActions {
    pub output: bool,
    pub set_vlan_id: bool,
    pub set_vlan_pcp: bool,
    pub strip_vlan: bool,
    pub set_dl_src: bool,
    pub set_dl_dst: bool,
    pub set_nw_src: bool,
    pub set_nw_dst: bool,
    pub set_nw_tos: bool,
    pub set_tp_src: bool,
    pub set_tp_dst: bool,
    pub enqueue: bool,
}

impl SupportedActions {
    fn of_int(d: u32) -> SupportedActions {
        SupportedActions {
            output: test_bit(0, d),
            set_vlan_id: test_bit(1, d),
            set_vlan_pcp: test_bit(2, d),
            strip_vlan: test_bit(3, d),
            set_dl_src: test_bit(4, d),
            set_dl_dst: test_bit(5, d),
            set_nw_src: test_bit(6, d),
            set_nw_dst: test_bit(7, d),
            set_nw_tos: test_bit(8, d),
            set_tp_src: test_bit(9, d),
            set_tp_dst: test_bit(10, d),
            enqueue: test_bit(11, d),
        }
    }

    fn to_int(a: &SupportedActions) -> u32 {
        pack_bits(&[
            a.output,
            a.set_vlan_id,
            a.set_vlan_pcp,
            a.strip_vlan,
            a.set_dl_src,
            a.set_dl_dst,
            a.set_nw_src,
            a.set_nw_dst,
            a.set_nw_tos,
            a.set_tp_src,
            a.set_tp_dst,
            a.enqueue,
        ])
    }
}

/// Switch features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    pub supported_actions: SupportedActions,
    pub ports: Vec<PortDesc>,
}

const OFP_SWITCH_FEATURES_LENGTH: usize = 24;

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        OFP_SWITCH_FEATURES_LENGTH + sf.ports.len() * OFP_PHY_PORT_LENGTH
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures> {
        if buf.len() < OFP_SWITCH_FEATURES_LENGTH
            || (buf.len() - OFP_SWITCH_FEATURES_LENGTH) % OFP_PHY_PORT_LENGTH != 0
        {
            return Err(OfpError::malformed(format!(
                "features reply body of {} bytes",
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        skip_padding_bytes(&mut bytes, 3);
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let supported_actions = SupportedActions::of_int(bytes.read_u32::<BigEndian>()?);
        let num_ports = remaining(&bytes) / OFP_PHY_PORT_LENGTH;
        let mut ports = Vec::with_capacity(num_ports);
        for _ in 0..num_ports {
            ports.push(PortDesc::parse(&mut bytes)?);
        }
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_capabilities,
            supported_actions,
            ports,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        write_padding_bytes(bytes, 3)?;
        bytes.write_u32::<BigEndian>(Capabilities::to_int(&sf.supported_capabilities))?;
        bytes.write_u32::<BigEndian>(SupportedActions::to_int(&sf.supported_actions))?;
        for port in sf.ports {
            PortDesc::marshal(port, bytes)?;
        }
        Ok(())
    }
}

wire_enum! {
    /// Type of modification to perform on a flow table.
    pub enum FlowModCmd: u16 {
        AddFlow = 0,
        ModFlow = 1,
        ModStrictFlow = 2,
        DeleteFlow = 3,
        DeleteStrictFlow = 4,
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

const OFP_FLOW_MOD_FIXED_LENGTH: usize = 24;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        pack_bits(&[notify_when_removed, check_overlap]) as u16
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        test_bit(1, flags as u32)
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        test_bit(0, flags as u32)
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        OFP_MATCH_LENGTH + OFP_FLOW_MOD_FIXED_LENGTH + Action::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod> {
        let fixed = OFP_MATCH_LENGTH + OFP_FLOW_MOD_FIXED_LENGTH;
        if buf.len() < fixed {
            return Err(OfpError::malformed("truncated flow mod"));
        }
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        let command = FlowModCmd::of_int(code)
            .ok_or_else(|| OfpError::malformed(format!("unknown flow mod command {}", code)))?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let actions = Action::parse_sequence(&buf[fixed..])?;
        Ok(FlowMod {
            command,
            pattern,
            priority: prio,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: Some(buffer_id).filter(|&id| id != OFP_NO_BUFFER),
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<()> {
        if fm.actions.contains(&Action::Output(PseudoPort::Table)) {
            return Err(OfpError::ProtocolViolation(
                "OFPPTable not allowed in installed flow.".to_string(),
            ));
        }
        Pattern::marshal(fm.pattern, bytes)?;
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u16::<BigEndian>(fm.command.to_int())?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        PseudoPort::marshal_opt(fm.out_port, bytes)?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(
            fm.check_overlap,
            fm.notify_when_removed,
        ))?;
        Action::marshal_sequence(fm.actions, bytes)
    }
}

/// The data associated with a packet received by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        Payload::bytes(payload).len()
    }

    pub fn bytes(payload: &Payload) -> &[u8] {
        match *payload {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    fn buffer_id(payload: &Payload) -> u32 {
        match *payload {
            Payload::Buffered(id, _) => id,
            Payload::NotBuffered(_) => OFP_NO_BUFFER,
        }
    }

    fn of_buffer_id(buffer_id: u32, data: Vec<u8>) -> Payload {
        if buffer_id == OFP_NO_BUFFER {
            Payload::NotBuffered(data)
        } else {
            Payload::Buffered(buffer_id, data)
        }
    }
}

wire_enum! {
    /// The reason a packet arrives at the controller.
    pub enum PacketInReason: u8 {
        NoMatch = 0,
        ExplicitSend = 1,
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

const OFP_PACKET_IN_FIXED_LENGTH: usize = 10;

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        OFP_PACKET_IN_FIXED_LENGTH + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn> {
        if buf.len() < OFP_PACKET_IN_FIXED_LENGTH {
            return Err(OfpError::malformed("truncated packet in"));
        }
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u8()?;
        let reason = PacketInReason::of_int(code)
            .ok_or_else(|| OfpError::malformed(format!("unknown packet in reason {}", code)))?;
        skip_padding_bytes(&mut bytes, 1);
        Ok(PacketIn {
            input_payload: Payload::of_buffer_id(buf_id, read_rest(&mut bytes)),
            total_len,
            port,
            reason,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<BigEndian>(Payload::buffer_id(&pi.input_payload))?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u16::<BigEndian>(pi.port)?;
        bytes.write_u8(pi.reason.to_int())?;
        write_padding_bytes(bytes, 1)?;
        bytes.extend_from_slice(Payload::bytes(&pi.input_payload));
        Ok(())
    }
}

/// Send a packet out of the datapath.
///
/// A buffered payload is referenced by its buffer id only; its bytes are not
/// sent back to the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

const OFP_PACKET_OUT_FIXED_LENGTH: usize = 8;

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data = match po.output_payload {
            Payload::Buffered(_, _) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        OFP_PACKET_OUT_FIXED_LENGTH + Action::size_of_sequence(&po.apply_actions) + data
    }

    fn parse(buf: &[u8]) -> Result<PacketOut> {
        if buf.len() < OFP_PACKET_OUT_FIXED_LENGTH {
            return Err(OfpError::malformed("truncated packet out"));
        }
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        let actions_end = OFP_PACKET_OUT_FIXED_LENGTH + actions_len;
        if actions_end > buf.len() {
            return Err(OfpError::malformed(format!(
                "packet out actions length {} exceeds message",
                actions_len
            )));
        }
        let apply_actions = Action::parse_sequence(&buf[OFP_PACKET_OUT_FIXED_LENGTH..actions_end])?;
        let data = buf[actions_end..].to_vec();
        Ok(PacketOut {
            output_payload: Payload::of_buffer_id(buf_id, data),
            port_id: Some(in_port).filter(|&p| p != OfpPort::OFPPNone as u16),
            apply_actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<BigEndian>(Payload::buffer_id(&po.output_payload))?;
        bytes.write_u16::<BigEndian>(po.port_id.unwrap_or(OfpPort::OFPPNone as u16))?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        Action::marshal_sequence(po.apply_actions, bytes)?;
        if let Payload::NotBuffered(data) = po.output_payload {
            bytes.extend_from_slice(&data);
        }
        Ok(())
    }
}

wire_enum! {
    /// Why a flow entry left the flow table.
    pub enum FlowRemovedReason: u8 {
        IdleTimeout = 0,
        HardTimeout = 1,
        Delete = 2,
    }
}

/// Flow removed (datapath -> controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    pub pattern: Pattern,
    pub cookie: u64,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: Timeout,
    pub packet_count: u64,
    pub byte_count: u64,
}

const OFP_FLOW_REMOVED_LENGTH: usize = 80;

impl MessageType for FlowRemoved {
    fn size_of(_: &FlowRemoved) -> usize {
        OFP_FLOW_REMOVED_LENGTH
    }

    fn parse(buf: &[u8]) -> Result<FlowRemoved> {
        if buf.len() != OFP_FLOW_REMOVED_LENGTH {
            return Err(OfpError::malformed(format!(
                "flow removed body of {} bytes",
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u8()?;
        let reason = FlowRemovedReason::of_int(code)
            .ok_or_else(|| OfpError::malformed(format!("unknown flow removed reason {}", code)))?;
        skip_padding_bytes(&mut bytes, 1);
        let duration_sec = bytes.read_u32::<BigEndian>()?;
        let duration_nsec = bytes.read_u32::<BigEndian>()?;
        let idle_timeout = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        skip_padding_bytes(&mut bytes, 2);
        let packet_count = bytes.read_u64::<BigEndian>()?;
        let byte_count = bytes.read_u64::<BigEndian>()?;
        Ok(FlowRemoved {
            pattern,
            cookie,
            priority,
            reason,
            duration_sec,
            duration_nsec,
            idle_timeout,
            packet_count,
            byte_count,
        })
    }

    fn marshal(fr: FlowRemoved, bytes: &mut Vec<u8>) -> Result<()> {
        Pattern::marshal(fr.pattern, bytes)?;
        bytes.write_u64::<BigEndian>(fr.cookie)?;
        bytes.write_u16::<BigEndian>(fr.priority)?;
        bytes.write_u8(fr.reason.to_int())?;
        write_padding_bytes(bytes, 1)?;
        bytes.write_u32::<BigEndian>(fr.duration_sec)?;
        bytes.write_u32::<BigEndian>(fr.duration_nsec)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fr.idle_timeout))?;
        write_padding_bytes(bytes, 2)?;
        bytes.write_u64::<BigEndian>(fr.packet_count)?;
        bytes.write_u64::<BigEndian>(fr.byte_count)?;
        Ok(())
    }
}

wire_enum! {
    /// STP state of a port.
    pub enum StpState: u32 {
        Listen = 0,
        Learn = 1 << 8,
        Forward = 2 << 8,
        Block = 3 << 8,
    }
}

const OFPPS_STP_MASK: u32 = 3 << 8;

/// Current state of a physical port. Not configurable by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortState {
    pub down: bool,
    pub stp_state: StpState,
}

impl PortState {
    fn of_int(d: u32) -> PortState {
        PortState {
            down: test_bit(0, d),
            // the two-bit mask always lands on a variant
            stp_state: StpState::of_int(d & OFPPS_STP_MASK).unwrap_or(StpState::Listen),
        }
    }

    fn to_int(s: &PortState) -> u32 {
        pack_bits(&[s.down]) | s.stp_state.to_int()
    }
}

/// Features of physical ports available in a datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFeatures {
    pub f_10mbhd: bool,
    pub f_10mbfd: bool,
    pub f_100mbhd: bool,
    pub f_100mbfd: bool,
    pub f_1gbhd: bool,
    pub f_1gbfd: bool,
    pub f_10gbfd: bool,
    pub copper: bool,
    pub fiber: bool,
    pub autoneg: bool,
    pub pause: bool,
    pub pause_asym: bool,
}

impl PortFeatures {
    fn of_int(d: u32) -> PortFeatures {
        PortFeatures {
            f_10mbhd: test_bit(0, d),
            f_10mbfd: test_bit(1, d),
            f_100mbhd: test_bit(2, d),
            f_100mbfd: test_bit(3, d),
            f_1gbhd: test_bit(4, d),
            f_1gbfd: test_bit(5, d),
            f_10gbfd: test_bit(6, d),
            copper: test_bit(7, d),
            fiber: test_bit(8, d),
            autoneg: test_bit(9, d),
            pause: test_bit(10, d),
            pause_asym: test_bit(11, d),
        }
    }

    fn to_int(f: &PortFeatures) -> u32 {
        pack_bits(&[
            f.f_10mbhd,
            f.f_10mbfd,
            f.f_100mbhd,
            f.f_100mbfd,
            f.f_1gbhd,
            f.f_1gbfd,
            f.f_10gbfd,
            f.copper,
            f.fiber,
            f.autoneg,
            f.pause,
            f.pause_asym,
        ])
    }
}

/// Flags to indicate behavior of the physical port.
///
/// These flags are used both to describe the current configuration of a physical port,
/// and to configure a port's behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortConfig {
    pub down: bool,
    pub no_stp: bool,
    pub no_recv: bool,
    pub no_recv_stp: bool,
    pub no_flood: bool,
    pub no_fwd: bool,
    pub no_packet_in: bool,
}

impl PortConfig {
    fn of_int(d: u32) -> PortConfig {
        PortConfig {
            down: test_bit(0, d),
            no_stp: test_bit(1, d),
            no_recv: test_bit(2, d),
            no_recv_stp: test_bit(3, d),
            no_flood: test_bit(4, d),
            no_fwd: test_bit(5, d),
            no_packet_in: test_bit(6, d),
        }
    }

    fn to_int(c: &PortConfig) -> u32 {
        pack_bits(&[
            c.down,
            c.no_stp,
            c.no_recv,
            c.no_recv_stp,
            c.no_flood,
            c.no_fwd,
            c.no_packet_in,
        ])
    }
}

/// Description of a physical port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: PortConfig,
    pub state: PortState,
    pub curr: PortFeatures,
    pub advertised: PortFeatures,
    pub supported: PortFeatures,
    pub peer: PortFeatures,
}

impl PortDesc {
    /// A port administratively or physically down carries no traffic.
    pub fn is_down(&self) -> bool {
        self.config.down || self.state.down
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortDesc> {
        let port_no = bytes.read_u16::<BigEndian>()?;
        let hw_addr = MacAddr::read(bytes)?;
        let name = read_fixed_size_string(bytes, OFP_MAX_PORT_NAME_LEN)?;
        let config = PortConfig::of_int(bytes.read_u32::<BigEndian>()?);
        let state = PortState::of_int(bytes.read_u32::<BigEndian>()?);
        let curr = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let advertised = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let supported = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let peer = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        Ok(PortDesc {
            port_no,
            hw_addr,
            name,
            config,
            state,
            curr,
            advertised,
            supported,
            peer,
        })
    }

    fn marshal(pd: PortDesc, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(pd.port_no)?;
        bytes.extend_from_slice(&pd.hw_addr.0[..OFP_ETH_ALEN]);
        write_fixed_size_string(bytes, &pd.name, OFP_MAX_PORT_NAME_LEN)?;
        bytes.write_u32::<BigEndian>(PortConfig::to_int(&pd.config))?;
        bytes.write_u32::<BigEndian>(PortState::to_int(&pd.state))?;
        bytes.write_u32::<BigEndian>(PortFeatures::to_int(&pd.curr))?;
        bytes.write_u32::<BigEndian>(PortFeatures::to_int(&pd.advertised))?;
        bytes.write_u32::<BigEndian>(PortFeatures::to_int(&pd.supported))?;
        bytes.write_u32::<BigEndian>(PortFeatures::to_int(&pd.peer))?;
        Ok(())
    }
}

wire_enum! {
    /// What changed about a physical port.
    pub enum PortReason: u8 {
        PortAdd = 0,
        PortDelete = 1,
        PortModify = 2,
    }
}

/// A physical port has changed in the datapath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

impl MessageType for PortStatus {
    fn size_of(_: &PortStatus) -> usize {
        8 + OFP_PHY_PORT_LENGTH
    }

    fn parse(buf: &[u8]) -> Result<PortStatus> {
        if buf.len() != 8 + OFP_PHY_PORT_LENGTH {
            return Err(OfpError::malformed(format!(
                "port status body of {} bytes",
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        let code = bytes.read_u8()?;
        let reason = PortReason::of_int(code)
            .ok_or_else(|| OfpError::malformed(format!("unknown port status reason {}", code)))?;
        skip_padding_bytes(&mut bytes, 7);
        let desc = PortDesc::parse(&mut bytes)?;
        Ok(PortStatus { reason, desc })
    }

    fn marshal(ps: PortStatus, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(ps.reason.to_int())?;
        write_padding_bytes(bytes, 7)?;
        PortDesc::marshal(ps.desc, bytes)
    }
}

wire_enum! {
    pub enum HelloFailed: u16 {
        Incompatible = 0,
        EPerm = 1,
    }
}

wire_enum! {
    pub enum BadRequest: u16 {
        BadVersion = 0,
        BadType = 1,
        BadStat = 2,
        BadVendor = 3,
        BadSubType = 4,
        EPerm = 5,
        BadLen = 6,
        BufferEmpty = 7,
        BufferUnknown = 8,
    }
}

wire_enum! {
    pub enum BadAction: u16 {
        BadType = 0,
        BadLen = 1,
        BadVendor = 2,
        BadVendorType = 3,
        BadOutPort = 4,
        BadArgument = 5,
        EPerm = 6,
        TooMany = 7,
        BadQueue = 8,
    }
}

wire_enum! {
    pub enum FlowModFailed: u16 {
        AllTablesFull = 0,
        Overlap = 1,
        EPerm = 2,
        BadEmergTimeout = 3,
        BadCommand = 4,
        Unsupported = 5,
    }
}

wire_enum! {
    pub enum PortModFailed: u16 {
        BadPort = 0,
        BadHwAddr = 1,
    }
}

wire_enum! {
    pub enum QueueOpFailed: u16 {
        BadPort = 0,
        BadQueue = 1,
        EPerm = 2,
    }
}

/// Error type and code carried by an OpenFlow ERROR message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    HelloFailed(HelloFailed),
    BadRequest(BadRequest),
    BadAction(BadAction),
    FlowModFailed(FlowModFailed),
    PortModFailed(PortModFailed),
    QueueOpFailed(QueueOpFailed),
}

impl ErrorType {
    fn of_int(typ: u16, code: u16) -> Option<ErrorType> {
        match typ {
            0 => HelloFailed::of_int(code).map(ErrorType::HelloFailed),
            1 => BadRequest::of_int(code).map(ErrorType::BadRequest),
            2 => BadAction::of_int(code).map(ErrorType::BadAction),
            3 => FlowModFailed::of_int(code).map(ErrorType::FlowModFailed),
            4 => PortModFailed::of_int(code).map(ErrorType::PortModFailed),
            5 => QueueOpFailed::of_int(code).map(ErrorType::QueueOpFailed),
            _ => None,
        }
    }

    fn to_int(t: ErrorType) -> (u16, u16) {
        match t {
            ErrorType::HelloFailed(c) => (0, c.to_int()),
            ErrorType::BadRequest(c) => (1, c.to_int()),
            ErrorType::BadAction(c) => (2, c.to_int()),
            ErrorType::FlowModFailed(c) => (3, c.to_int()),
            ErrorType::PortModFailed(c) => (4, c.to_int()),
            ErrorType::QueueOpFailed(c) => (5, c.to_int()),
        }
    }
}

/// An OpenFlow ERROR message: what went wrong and (part of) the message that
/// caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: ErrorType,
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg> {
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        let typ = ErrorType::of_int(typ, code)
            .ok_or_else(|| OfpError::malformed(format!("unknown error {}/{}", typ, code)))?;
        Ok(ErrorMsg {
            typ,
            data: read_rest(&mut bytes),
        })
    }

    fn marshal(err: ErrorMsg, bytes: &mut Vec<u8>) -> Result<()> {
        let (typ, code) = ErrorType::to_int(err.typ);
        bytes.write_u16::<BigEndian>(typ)?;
        bytes.write_u16::<BigEndian>(code)?;
        bytes.extend_from_slice(&err.data);
        Ok(())
    }
}

wire_enum! {
    /// Type of a stats request or reply.
    pub enum StatsReqType: u16 {
        Desc = 0,
        Flow = 1,
        Aggregate = 2,
        Table = 3,
        Port = 4,
    }
}

/// Reply flag: more parts follow under the same xid.
const OFPSF_REPLY_MORE: u16 = 1;

const OFP_FLOW_STATS_REQUEST_LENGTH: usize = OFP_MATCH_LENGTH + 4;
const OFP_PORT_STATS_REQUEST_LENGTH: usize = 8;

/// Body of a STATS_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsReqBody {
    Desc,
    Flow {
        pattern: Pattern,
        table_id: u8,
        out_port: Option<PseudoPort>,
    },
    Aggregate {
        pattern: Pattern,
        table_id: u8,
        out_port: Option<PseudoPort>,
    },
    Table,
    /// `None` asks for every port.
    Port { port_no: Option<u16> },
}

impl StatsReqBody {
    pub fn req_type(&self) -> StatsReqType {
        match *self {
            StatsReqBody::Desc => StatsReqType::Desc,
            StatsReqBody::Flow { .. } => StatsReqType::Flow,
            StatsReqBody::Aggregate { .. } => StatsReqType::Aggregate,
            StatsReqBody::Table => StatsReqType::Table,
            StatsReqBody::Port { .. } => StatsReqType::Port,
        }
    }

    fn parse_flow_request(bytes: &mut Cursor<&[u8]>) -> Result<(Pattern, u8, Option<PseudoPort>)> {
        let pattern = Pattern::parse(bytes)?;
        let table_id = bytes.read_u8()?;
        skip_padding_bytes(bytes, 1);
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        Ok((pattern, table_id, out_port))
    }

    fn marshal_flow_request(
        pattern: Pattern,
        table_id: u8,
        out_port: Option<PseudoPort>,
        bytes: &mut Vec<u8>,
    ) -> Result<()> {
        Pattern::marshal(pattern, bytes)?;
        bytes.write_u8(table_id)?;
        write_padding_bytes(bytes, 1)?;
        PseudoPort::marshal_opt(out_port, bytes)
    }
}

fn parse_stats_type(bytes: &mut Cursor<&[u8]>) -> Result<StatsReqType> {
    let code = bytes.read_u16::<BigEndian>()?;
    StatsReqType::of_int(code)
        .ok_or_else(|| OfpError::malformed(format!("unsupported stats type {}", code)))
}

fn expect_body_length(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        Err(OfpError::malformed(format!(
            "{} stats body of {} bytes, expected {}",
            what, actual, expected
        )))
    } else {
        Ok(())
    }
}

impl MessageType for StatsReqBody {
    fn size_of(body: &StatsReqBody) -> usize {
        4 + match *body {
            StatsReqBody::Desc | StatsReqBody::Table => 0,
            StatsReqBody::Flow { .. } | StatsReqBody::Aggregate { .. } => {
                OFP_FLOW_STATS_REQUEST_LENGTH
            }
            StatsReqBody::Port { .. } => OFP_PORT_STATS_REQUEST_LENGTH,
        }
    }

    fn parse(buf: &[u8]) -> Result<StatsReqBody> {
        let mut bytes = Cursor::new(buf);
        let typ = parse_stats_type(&mut bytes)?;
        skip_padding_bytes(&mut bytes, 2);
        let body_len = buf.len().saturating_sub(4);
        let body = match typ {
            StatsReqType::Desc => {
                expect_body_length("desc", body_len, 0)?;
                StatsReqBody::Desc
            }
            StatsReqType::Table => {
                expect_body_length("table", body_len, 0)?;
                StatsReqBody::Table
            }
            StatsReqType::Flow => {
                expect_body_length("flow", body_len, OFP_FLOW_STATS_REQUEST_LENGTH)?;
                let (pattern, table_id, out_port) = StatsReqBody::parse_flow_request(&mut bytes)?;
                StatsReqBody::Flow {
                    pattern,
                    table_id,
                    out_port,
                }
            }
            StatsReqType::Aggregate => {
                expect_body_length("aggregate", body_len, OFP_FLOW_STATS_REQUEST_LENGTH)?;
                let (pattern, table_id, out_port) = StatsReqBody::parse_flow_request(&mut bytes)?;
                StatsReqBody::Aggregate {
                    pattern,
                    table_id,
                    out_port,
                }
            }
            StatsReqType::Port => {
                expect_body_length("port", body_len, OFP_PORT_STATS_REQUEST_LENGTH)?;
                let port_no = bytes.read_u16::<BigEndian>()?;
                StatsReqBody::Port {
                    port_no: Some(port_no).filter(|&p| p != OfpPort::OFPPNone as u16),
                }
            }
        };
        Ok(body)
    }

    fn marshal(body: StatsReqBody, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(body.req_type().to_int())?;
        bytes.write_u16::<BigEndian>(0)?;
        match body {
            StatsReqBody::Desc | StatsReqBody::Table => Ok(()),
            StatsReqBody::Flow {
                pattern,
                table_id,
                out_port,
            }
            | StatsReqBody::Aggregate {
                pattern,
                table_id,
                out_port,
            } => StatsReqBody::marshal_flow_request(pattern, table_id, out_port, bytes),
            StatsReqBody::Port { port_no } => {
                bytes.write_u16::<BigEndian>(port_no.unwrap_or(OfpPort::OFPPNone as u16))?;
                write_padding_bytes(bytes, 6)
            }
        }
    }
}

/// Switch description strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescStats {
    pub mfr_desc: String,
    pub hw_desc: String,
    pub sw_desc: String,
    pub serial_num: String,
    pub dp_desc: String,
}

const OFP_DESC_STATS_LENGTH: usize = 4 * DESC_STR_LEN + SERIAL_NUM_LEN;

/// Statistics of one flow entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStats {
    pub table_id: u8,
    pub pattern: Pattern,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    pub actions: Vec<Action>,
}

const OFP_FLOW_STATS_FIXED_LENGTH: usize = 88;

impl FlowStats {
    fn size_of(fs: &FlowStats) -> usize {
        OFP_FLOW_STATS_FIXED_LENGTH + Action::size_of_sequence(&fs.actions)
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<FlowStats>> {
        let mut flows = vec![];
        let mut offset = 0;
        while offset < buf.len() {
            let mut bytes = Cursor::new(&buf[offset..]);
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < OFP_FLOW_STATS_FIXED_LENGTH || len > buf.len() - offset {
                return Err(OfpError::malformed(format!("bad flow stats length {}", len)));
            }
            let table_id = bytes.read_u8()?;
            skip_padding_bytes(&mut bytes, 1);
            let pattern = Pattern::parse(&mut bytes)?;
            let duration_sec = bytes.read_u32::<BigEndian>()?;
            let duration_nsec = bytes.read_u32::<BigEndian>()?;
            let priority = bytes.read_u16::<BigEndian>()?;
            let idle_timeout = bytes.read_u16::<BigEndian>()?;
            let hard_timeout = bytes.read_u16::<BigEndian>()?;
            skip_padding_bytes(&mut bytes, 6);
            let cookie = bytes.read_u64::<BigEndian>()?;
            let packet_count = bytes.read_u64::<BigEndian>()?;
            let byte_count = bytes.read_u64::<BigEndian>()?;
            let actions =
                Action::parse_sequence(&buf[offset + OFP_FLOW_STATS_FIXED_LENGTH..offset + len])?;
            flows.push(FlowStats {
                table_id,
                pattern,
                duration_sec,
                duration_nsec,
                priority,
                idle_timeout,
                hard_timeout,
                cookie,
                packet_count,
                byte_count,
                actions,
            });
            offset += len;
        }
        Ok(flows)
    }

    fn marshal(fs: FlowStats, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(FlowStats::size_of(&fs) as u16)?;
        bytes.write_u8(fs.table_id)?;
        write_padding_bytes(bytes, 1)?;
        Pattern::marshal(fs.pattern, bytes)?;
        bytes.write_u32::<BigEndian>(fs.duration_sec)?;
        bytes.write_u32::<BigEndian>(fs.duration_nsec)?;
        bytes.write_u16::<BigEndian>(fs.priority)?;
        bytes.write_u16::<BigEndian>(fs.idle_timeout)?;
        bytes.write_u16::<BigEndian>(fs.hard_timeout)?;
        write_padding_bytes(bytes, 6)?;
        bytes.write_u64::<BigEndian>(fs.cookie)?;
        bytes.write_u64::<BigEndian>(fs.packet_count)?;
        bytes.write_u64::<BigEndian>(fs.byte_count)?;
        Action::marshal_sequence(fs.actions, bytes)
    }
}

/// Totals over the flows matching an aggregate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregateStats {
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_count: u32,
}

const OFP_AGGREGATE_STATS_LENGTH: usize = 24;

/// Statistics of one flow table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub table_id: u8,
    pub name: String,
    pub wildcards: u32,
    pub max_entries: u32,
    pub active_count: u32,
    pub lookup_count: u64,
    pub matched_count: u64,
}

const OFP_TABLE_STATS_LENGTH: usize = 64;

/// Packet counters and byte counters for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStats {
    pub port_no: u16,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_frame_err: u64,
    pub rx_over_err: u64,
    pub rx_crc_err: u64,
    pub collisions: u64,
}

const OFP_PORT_STATS_LENGTH: usize = 104;

impl PortStats {
    fn counters(ps: &PortStats) -> [u64; 12] {
        [
            ps.rx_packets,
            ps.tx_packets,
            ps.rx_bytes,
            ps.tx_bytes,
            ps.rx_dropped,
            ps.tx_dropped,
            ps.rx_errors,
            ps.tx_errors,
            ps.rx_frame_err,
            ps.rx_over_err,
            ps.rx_crc_err,
            ps.collisions,
        ]
    }
}

/// Body of a STATS_REPLY part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsRespBody {
    Desc(DescStats),
    Flow(Vec<FlowStats>),
    Aggregate(AggregateStats),
    Table(Vec<TableStats>),
    Port(Vec<PortStats>),
}

impl StatsRespBody {
    pub fn resp_type(&self) -> StatsReqType {
        match *self {
            StatsRespBody::Desc(_) => StatsReqType::Desc,
            StatsRespBody::Flow(_) => StatsReqType::Flow,
            StatsRespBody::Aggregate(_) => StatsReqType::Aggregate,
            StatsRespBody::Table(_) => StatsReqType::Table,
            StatsRespBody::Port(_) => StatsReqType::Port,
        }
    }
}

/// One STATS_REPLY message. `more` is set on every part but the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsResp {
    pub more: bool,
    pub body: StatsRespBody,
}

fn fixed_records(what: &str, buf: &[u8], record: usize) -> Result<usize> {
    if buf.len() % record != 0 {
        Err(OfpError::malformed(format!(
            "{} stats body of {} bytes is not a multiple of {}",
            what,
            buf.len(),
            record
        )))
    } else {
        Ok(buf.len() / record)
    }
}

impl MessageType for StatsResp {
    fn size_of(sr: &StatsResp) -> usize {
        4 + match sr.body {
            StatsRespBody::Desc(_) => OFP_DESC_STATS_LENGTH,
            StatsRespBody::Flow(ref flows) => flows.iter().map(FlowStats::size_of).sum(),
            StatsRespBody::Aggregate(_) => OFP_AGGREGATE_STATS_LENGTH,
            StatsRespBody::Table(ref tables) => tables.len() * OFP_TABLE_STATS_LENGTH,
            StatsRespBody::Port(ref ports) => ports.len() * OFP_PORT_STATS_LENGTH,
        }
    }

    fn parse(buf: &[u8]) -> Result<StatsResp> {
        let mut bytes = Cursor::new(buf);
        let typ = parse_stats_type(&mut bytes)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let rest = &buf[4..];
        let body = match typ {
            StatsReqType::Desc => {
                expect_body_length("desc", rest.len(), OFP_DESC_STATS_LENGTH)?;
                StatsRespBody::Desc(DescStats {
                    mfr_desc: read_fixed_size_string(&mut bytes, DESC_STR_LEN)?,
                    hw_desc: read_fixed_size_string(&mut bytes, DESC_STR_LEN)?,
                    sw_desc: read_fixed_size_string(&mut bytes, DESC_STR_LEN)?,
                    serial_num: read_fixed_size_string(&mut bytes, SERIAL_NUM_LEN)?,
                    dp_desc: read_fixed_size_string(&mut bytes, DESC_STR_LEN)?,
                })
            }
            StatsReqType::Flow => StatsRespBody::Flow(FlowStats::parse_sequence(rest)?),
            StatsReqType::Aggregate => {
                expect_body_length("aggregate", rest.len(), OFP_AGGREGATE_STATS_LENGTH)?;
                let packet_count = bytes.read_u64::<BigEndian>()?;
                let byte_count = bytes.read_u64::<BigEndian>()?;
                let flow_count = bytes.read_u32::<BigEndian>()?;
                StatsRespBody::Aggregate(AggregateStats {
                    packet_count,
                    byte_count,
                    flow_count,
                })
            }
            StatsReqType::Table => {
                let n = fixed_records("table", rest, OFP_TABLE_STATS_LENGTH)?;
                let mut tables = Vec::with_capacity(n);
                for _ in 0..n {
                    let table_id = bytes.read_u8()?;
                    skip_padding_bytes(&mut bytes, 3);
                    tables.push(TableStats {
                        table_id,
                        name: read_fixed_size_string(&mut bytes, OFP_MAX_TABLE_NAME_LEN)?,
                        wildcards: bytes.read_u32::<BigEndian>()?,
                        max_entries: bytes.read_u32::<BigEndian>()?,
                        active_count: bytes.read_u32::<BigEndian>()?,
                        lookup_count: bytes.read_u64::<BigEndian>()?,
                        matched_count: bytes.read_u64::<BigEndian>()?,
                    });
                }
                StatsRespBody::Table(tables)
            }
            StatsReqType::Port => {
                let n = fixed_records("port", rest, OFP_PORT_STATS_LENGTH)?;
                let mut ports = Vec::with_capacity(n);
                for _ in 0..n {
                    let port_no = bytes.read_u16::<BigEndian>()?;
                    skip_padding_bytes(&mut bytes, 6);
                    let mut c = [0u64; 12];
                    for counter in c.iter_mut() {
                        *counter = bytes.read_u64::<BigEndian>()?;
                    }
                    ports.push(PortStats {
                        port_no,
                        rx_packets: c[0],
                        tx_packets: c[1],
                        rx_bytes: c[2],
                        tx_bytes: c[3],
                        rx_dropped: c[4],
                        tx_dropped: c[5],
                        rx_errors: c[6],
                        tx_errors: c[7],
                        rx_frame_err: c[8],
                        rx_over_err: c[9],
                        rx_crc_err: c[10],
                        collisions: c[11],
                    });
                }
                StatsRespBody::Port(ports)
            }
        };
        Ok(StatsResp {
            more: flags & OFPSF_REPLY_MORE != 0,
            body,
        })
    }

    fn marshal(sr: StatsResp, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(sr.body.resp_type().to_int())?;
        bytes.write_u16::<BigEndian>(if sr.more { OFPSF_REPLY_MORE } else { 0 })?;
        match sr.body {
            StatsRespBody::Desc(desc) => {
                write_fixed_size_string(bytes, &desc.mfr_desc, DESC_STR_LEN)?;
                write_fixed_size_string(bytes, &desc.hw_desc, DESC_STR_LEN)?;
                write_fixed_size_string(bytes, &desc.sw_desc, DESC_STR_LEN)?;
                write_fixed_size_string(bytes, &desc.serial_num, SERIAL_NUM_LEN)?;
                write_fixed_size_string(bytes, &desc.dp_desc, DESC_STR_LEN)?;
            }
            StatsRespBody::Flow(flows) => {
                for flow in flows {
                    FlowStats::marshal(flow, bytes)?;
                }
            }
            StatsRespBody::Aggregate(agg) => {
                bytes.write_u64::<BigEndian>(agg.packet_count)?;
                bytes.write_u64::<BigEndian>(agg.byte_count)?;
                bytes.write_u32::<BigEndian>(agg.flow_count)?;
                write_padding_bytes(bytes, 4)?;
            }
            StatsRespBody::Table(tables) => {
                for t in tables {
                    bytes.write_u8(t.table_id)?;
                    write_padding_bytes(bytes, 3)?;
                    write_fixed_size_string(bytes, &t.name, OFP_MAX_TABLE_NAME_LEN)?;
                    bytes.write_u32::<BigEndian>(t.wildcards)?;
                    bytes.write_u32::<BigEndian>(t.max_entries)?;
                    bytes.write_u32::<BigEndian>(t.active_count)?;
                    bytes.write_u64::<BigEndian>(t.lookup_count)?;
                    bytes.write_u64::<BigEndian>(t.matched_count)?;
                }
            }
            StatsRespBody::Port(ports) => {
                for p in ports {
                    bytes.write_u16::<BigEndian>(p.port_no)?;
                    write_padding_bytes(bytes, 6)?;
                    for counter in PortStats::counters(&p).iter() {
                        bytes.write_u64::<BigEndian>(*counter)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::{OfpHeader, Xid, OFP_HEADER_LENGTH, OPENFLOW_0_01_VERSION};
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        FlowRemoved(FlowRemoved),
        PortStatus(PortStatus),
        PacketOut(PacketOut),
        BarrierRequest,
        BarrierReply,
        StatsRequest(StatsReqBody),
        StatsReply(StatsResp),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        pub fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::FlowRemoved(_) => MsgCode::FlowRemoved,
                Message::PortStatus(_) => MsgCode::PortStatus,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::StatsRequest(_) => MsgCode::StatsReq,
                Message::StatsReply(_) => MsgCode::StatsResp,
            }
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<()> {
            match msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply => Ok(()),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::Error(err) => ErrorMsg::marshal(err, bytes),
                Message::FeaturesReply(feats) => SwitchFeatures::marshal(feats, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::FlowRemoved(removed) => FlowRemoved::marshal(removed, bytes),
                Message::PortStatus(sts) => PortStatus::marshal(sts, bytes),
                Message::PacketOut(po) => PacketOut::marshal(po, bytes),
                Message::StatsRequest(req) => StatsReqBody::marshal(req, bytes),
                Message::StatsReply(resp) => StatsResp::marshal(resp, bytes),
            }
        }

        fn parse_body(header: &OfpHeader, buf: &[u8]) -> Result<Message> {
            let code = header.type_code()?;
            if code != MsgCode::Hello && header.version() != OPENFLOW_0_01_VERSION {
                return Err(OfpError::UnsupportedVersion(header.version()));
            }
            let msg = match code {
                // Hello elements of later versions are ignored.
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::FlowRemoved => Message::FlowRemoved(FlowRemoved::parse(buf)?),
                MsgCode::PortStatus => Message::PortStatus(PortStatus::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::StatsReq => Message::StatsRequest(StatsReqBody::parse(buf)?),
                MsgCode::StatsResp => Message::StatsReply(StatsResp::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                MsgCode::Vendor
                | MsgCode::GetConfigReq
                | MsgCode::GetConfigResp
                | MsgCode::SetConfig
                | MsgCode::PortMod
                | MsgCode::QueueGetConfigReq
                | MsgCode::QueueGetConfigResp => {
                    return Err(OfpError::UnsupportedMessage {
                        code: code.to_int(),
                        xid: header.xid(),
                    })
                }
            };
            Ok(msg)
        }
    }

    impl OfpMessage for Message {
        /// Return the byte-size of a `Message`.
        fn size_of(msg: &Message) -> usize {
            OFP_HEADER_LENGTH
                + match *msg {
                    Message::Hello
                    | Message::FeaturesReq
                    | Message::BarrierRequest
                    | Message::BarrierReply => 0,
                    Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                    Message::Error(ref err) => ErrorMsg::size_of(err),
                    Message::FeaturesReply(ref feats) => SwitchFeatures::size_of(feats),
                    Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                    Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                    Message::FlowRemoved(ref removed) => FlowRemoved::size_of(removed),
                    Message::PortStatus(ref ps) => PortStatus::size_of(ps),
                    Message::PacketOut(ref po) => PacketOut::size_of(po),
                    Message::StatsRequest(ref req) => StatsReqBody::size_of(req),
                    Message::StatsReply(ref resp) => StatsResp::size_of(resp),
                }
        }

        /// Create an `OfpHeader` for the given `xid` and `msg`.
        fn header_of(xid: Xid, msg: &Message) -> Result<OfpHeader> {
            let sizeof_buf = Self::size_of(msg);
            if sizeof_buf > u16::MAX as usize {
                return Err(OfpError::malformed(format!(
                    "{:?} message of {} bytes does not fit the length field",
                    Self::msg_code_of_message(msg),
                    sizeof_buf
                )));
            }
            Ok(OfpHeader::new(
                OPENFLOW_0_01_VERSION,
                Self::msg_code_of_message(msg).to_int(),
                sizeof_buf as u16,
                xid,
            ))
        }

        /// Returns a `u8` buffer containing a marshaled OpenFlow header and the message `msg`.
        fn marshal(xid: Xid, msg: Message) -> Result<Vec<u8>> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            if bytes.len() != hdr.length() {
                return Err(OfpError::malformed(format!(
                    "encoded {} bytes for a declared length of {}",
                    bytes.len(),
                    hdr.length()
                )));
            }
            Ok(bytes)
        }

        /// Returns a pair `(u32, Message)` of the transaction id and OpenFlow message parsed from
        /// the given OpenFlow header `header`, and buffer `buf`.
        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Message)> {
            let msg = Message::parse_body(header, buf)
                .map_err(|e| e.truncated_to_malformed("message body"))?;
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Parse the Ethernet frame carried by a packet-in payload.
    pub fn parse_payload(p: &Payload) -> Result<crate::packet::Packet> {
        crate::packet::Packet::parse(Payload::bytes(p))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::message::*;
    use super::*;
    use crate::ofp_header::{OfpHeader, Xid, OFP_HEADER_LENGTH};
    use crate::ofp_message::OfpMessage;

    const TEST_XID: Xid = 0x0102_0304;

    fn verify_header(header: &OfpHeader, data: &[u8]) {
        assert_eq!(header.version(), 1);
        assert_eq!(header.xid(), TEST_XID);
        assert_eq!(header.length(), data.len());
    }

    /// Encode, check the framing invariants, decode, and hand back the result.
    fn round_trip(msg: Message) -> Message {
        let size = Message::size_of(&msg);
        let data = Message::marshal(TEST_XID, msg).unwrap();
        assert_eq!(data.len(), size);
        let (header, decoded, consumed) = Message::decode(&data).unwrap();
        verify_header(&header, &data);
        assert_eq!(consumed, data.len());
        decoded
    }

    fn assert_round_trip(msg: Message) {
        assert_eq!(round_trip(msg.clone()), msg);
    }

    fn port_desc(port_no: u16) -> PortDesc {
        PortDesc {
            port_no,
            hw_addr: MacAddr([0x02, 0, 0, 0, 0, port_no as u8]),
            name: format!("eth{}", port_no),
            config: PortConfig {
                no_flood: port_no % 2 == 0,
                ..PortConfig::default()
            },
            state: PortState {
                down: false,
                stp_state: StpState::Forward,
            },
            curr: PortFeatures {
                f_1gbfd: true,
                copper: true,
                ..PortFeatures::default()
            },
            advertised: PortFeatures::default(),
            supported: PortFeatures {
                autoneg: true,
                ..PortFeatures::default()
            },
            peer: PortFeatures::default(),
        }
    }

    fn full_pattern() -> Pattern {
        Pattern {
            in_port: Some(3),
            dl_src: Some(MacAddr([0, 0, 0, 0, 0, 0xaa])),
            dl_dst: Some(MacAddr([0, 0, 0, 0, 0, 0xbb])),
            dl_vlan: Some(10),
            dl_vlan_pcp: Some(5),
            dl_typ: Some(0x0800),
            nw_tos: Some(0x10),
            nw_proto: Some(6),
            nw_src: Some(Ipv4Prefix {
                addr: Ipv4Addr::new(10, 0, 0, 0),
                len: 24,
            }),
            nw_dst: Some(Ipv4Prefix::host(Ipv4Addr::new(10, 0, 1, 7))),
            tp_src: Some(49152),
            tp_dst: Some(80),
        }
    }

    fn every_action() -> Vec<Action> {
        vec![
            Action::SetVlanVid(42),
            Action::SetVlanPcp(3),
            Action::StripVlan,
            Action::SetDlSrc(MacAddr([1, 2, 3, 4, 5, 6])),
            Action::SetDlDst(MacAddr([6, 5, 4, 3, 2, 1])),
            Action::SetNwSrc(Ipv4Addr::new(192, 168, 0, 1)),
            Action::SetNwDst(Ipv4Addr::new(192, 168, 0, 2)),
            Action::SetNwTos(0x20),
            Action::SetTpSrc(1000),
            Action::SetTpDst(2000),
            Action::Enqueue(PseudoPort::PhysicalPort(2), 7),
            Action::Output(PseudoPort::Controller(128)),
            Action::Output(PseudoPort::PhysicalPort(1)),
        ]
    }

    #[test]
    fn test_hello_and_empty_bodies() {
        assert_round_trip(Message::Hello);
        assert_round_trip(Message::FeaturesReq);
        assert_round_trip(Message::BarrierRequest);
        assert_round_trip(Message::BarrierReply);

        let data = Message::marshal(TEST_XID, Message::Hello).unwrap();
        assert_eq!(data, vec![0x01, 0x00, 0x00, 0x08, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_echo_payload_sizes() {
        assert_round_trip(Message::EchoRequest(vec![]));
        assert_round_trip(Message::EchoReply(vec![0xde, 0xad]));
        assert_round_trip(Message::EchoRequest(vec![0x5a; 60_000]));
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        match Message::marshal(TEST_XID, Message::EchoRequest(vec![0; 70_000])) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should refuse to wrap the length field, got {:?}", other),
        }
    }

    #[test]
    fn test_length_field_boundary() {
        let largest = Message::EchoReply(vec![0xa5; 65_535 - OFP_HEADER_LENGTH]);
        let data = Message::marshal(TEST_XID, largest.clone()).unwrap();
        assert_eq!(data.len(), 65_535);
        assert_eq!(&data[2..4], &[0xff, 0xff]);
        assert_round_trip(largest);

        match Message::marshal(TEST_XID, Message::EchoReply(vec![0; 65_536 - OFP_HEADER_LENGTH])) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should refuse a 65536-byte message, got {:?}", other),
        }
    }

    #[test]
    fn test_features_reply() {
        let feats = SwitchFeatures {
            datapath_id: 0x0000_0000_0000_00a1,
            num_buffers: 256,
            num_tables: 2,
            supported_capabilities: Capabilities {
                flow_stats: true,
                port_stats: true,
                arp_match_ip: true,
                ..Capabilities::default()
            },
            supported_actions: SupportedActions {
                output: true,
                set_dl_dst: true,
                enqueue: true,
                ..SupportedActions::default()
            },
            ports: vec![port_desc(1), port_desc(2), port_desc(3)],
        };
        assert_round_trip(Message::FeaturesReply(feats));
    }

    #[test]
    fn test_flow_mod_with_every_action() {
        let mut fm = add_flow(0x8000, full_pattern(), every_action());
        fm.cookie = 0xfeed;
        fm.idle_timeout = Timeout::ExpiresAfter(10);
        fm.hard_timeout = Timeout::ExpiresAfter(30);
        fm.notify_when_removed = true;
        fm.apply_to_packet = Some(99);
        fm.out_port = Some(PseudoPort::PhysicalPort(4));
        assert_round_trip(Message::FlowMod(fm));
    }

    #[test]
    fn test_flow_mod_rejects_table_output() {
        let fm = add_flow(1, Pattern::match_all(), vec![Action::Output(PseudoPort::Table)]);
        match Message::marshal(TEST_XID, Message::FlowMod(fm)) {
            Err(OfpError::ProtocolViolation(_)) => {}
            other => panic!("Should reject OFPP_TABLE, got {:?}", other),
        }
    }

    #[test]
    fn test_match_all_wildcards() {
        let mut bytes = vec![];
        Pattern::marshal(Pattern::match_all(), &mut bytes).unwrap();
        assert_eq!(bytes.len(), OFP_MATCH_LENGTH);
        assert_eq!(Pattern::parse(&mut Cursor::new(&bytes[..])).unwrap(), Pattern::match_all());

        // canonical OFPFW_ALL sets every nw wildcard bit
        let mut all = vec![0x00, 0x3f, 0xff, 0xff];
        all.extend_from_slice(&[0; OFP_MATCH_LENGTH - 4]);
        assert_eq!(Pattern::parse(&mut Cursor::new(&all[..])).unwrap(), Pattern::match_all());
    }

    #[test]
    fn test_packet_in() {
        assert_round_trip(Message::PacketIn(PacketIn {
            input_payload: Payload::Buffered(7, vec![1, 2, 3, 4, 5]),
            total_len: 5,
            port: 2,
            reason: PacketInReason::NoMatch,
        }));
        assert_round_trip(Message::PacketIn(PacketIn {
            input_payload: Payload::NotBuffered(vec![]),
            total_len: 0,
            port: 1,
            reason: PacketInReason::ExplicitSend,
        }));
    }

    #[test]
    fn test_packet_out() {
        assert_round_trip(Message::PacketOut(PacketOut {
            output_payload: Payload::NotBuffered(vec![0xab; 64]),
            port_id: Some(3),
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        }));

        let buffered = Message::PacketOut(PacketOut {
            output_payload: Payload::Buffered(12, vec![0xab; 64]),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(1))],
        });
        match round_trip(buffered) {
            Message::PacketOut(po) => {
                assert_eq!(po.output_payload, Payload::Buffered(12, vec![]));
                assert_eq!(po.port_id, None);
            }
            other => panic!("Should be a PacketOut message, got {:?}", other),
        }
    }

    #[test]
    fn test_flow_removed_and_port_status() {
        assert_round_trip(Message::FlowRemoved(FlowRemoved {
            pattern: full_pattern(),
            cookie: 3,
            priority: 0x8000,
            reason: FlowRemovedReason::IdleTimeout,
            duration_sec: 12,
            duration_nsec: 500,
            idle_timeout: Timeout::ExpiresAfter(10),
            packet_count: 100,
            byte_count: 6400,
        }));
        assert_round_trip(Message::PortStatus(PortStatus {
            reason: PortReason::PortModify,
            desc: PortDesc {
                state: PortState {
                    down: true,
                    stp_state: StpState::Block,
                },
                ..port_desc(5)
            },
        }));
    }

    #[test]
    fn test_error_types() {
        let errors = vec![
            ErrorType::HelloFailed(HelloFailed::Incompatible),
            ErrorType::BadRequest(BadRequest::BadLen),
            ErrorType::BadAction(BadAction::BadOutPort),
            ErrorType::FlowModFailed(FlowModFailed::AllTablesFull),
            ErrorType::PortModFailed(PortModFailed::BadHwAddr),
            ErrorType::QueueOpFailed(QueueOpFailed::BadQueue),
        ];
        for typ in errors {
            assert_round_trip(Message::Error(ErrorMsg {
                typ,
                data: vec![1, 0, 0, 8, 0, 0, 0, 9],
            }));
        }
    }

    #[test]
    fn test_stats_requests() {
        assert_round_trip(Message::StatsRequest(StatsReqBody::Desc));
        assert_round_trip(Message::StatsRequest(StatsReqBody::Table));
        assert_round_trip(Message::StatsRequest(StatsReqBody::Flow {
            pattern: full_pattern(),
            table_id: ALL_TABLES,
            out_port: None,
        }));
        assert_round_trip(Message::StatsRequest(StatsReqBody::Aggregate {
            pattern: Pattern::match_all(),
            table_id: 0,
            out_port: Some(PseudoPort::PhysicalPort(2)),
        }));
        assert_round_trip(Message::StatsRequest(StatsReqBody::Port { port_no: None }));
        assert_round_trip(Message::StatsRequest(StatsReqBody::Port { port_no: Some(1) }));
    }

    #[test]
    fn test_stats_replies() {
        assert_round_trip(Message::StatsReply(StatsResp {
            more: false,
            body: StatsRespBody::Desc(DescStats {
                mfr_desc: "Nicira, Inc.".to_string(),
                hw_desc: "Open vSwitch".to_string(),
                sw_desc: "2.17.0".to_string(),
                serial_num: "None".to_string(),
                dp_desc: "s1".to_string(),
            }),
        }));
        assert_round_trip(Message::StatsReply(StatsResp {
            more: true,
            body: StatsRespBody::Flow(vec![
                FlowStats {
                    table_id: 0,
                    pattern: full_pattern(),
                    duration_sec: 4,
                    duration_nsec: 0,
                    priority: 0x8000,
                    idle_timeout: 10,
                    hard_timeout: 30,
                    cookie: 0,
                    packet_count: 3,
                    byte_count: 180,
                    actions: vec![Action::Output(PseudoPort::PhysicalPort(1))],
                },
                FlowStats {
                    table_id: 0,
                    pattern: Pattern::match_all(),
                    duration_sec: 9,
                    duration_nsec: 1,
                    priority: 0,
                    idle_timeout: 0,
                    hard_timeout: 0,
                    cookie: 1,
                    packet_count: 0,
                    byte_count: 0,
                    actions: vec![],
                },
            ]),
        }));
        assert_round_trip(Message::StatsReply(StatsResp {
            more: false,
            body: StatsRespBody::Aggregate(AggregateStats {
                packet_count: 10,
                byte_count: 640,
                flow_count: 2,
            }),
        }));
        assert_round_trip(Message::StatsReply(StatsResp {
            more: false,
            body: StatsRespBody::Table(vec![TableStats {
                table_id: 0,
                name: "classifier".to_string(),
                wildcards: 0x3fffff,
                max_entries: 1_000_000,
                active_count: 2,
                lookup_count: 50,
                matched_count: 48,
            }]),
        }));
        assert_round_trip(Message::StatsReply(StatsResp {
            more: false,
            body: StatsRespBody::Port(vec![
                PortStats {
                    port_no: 1,
                    rx_packets: 5,
                    tx_bytes: 300,
                    collisions: 1,
                    ..PortStats::default()
                },
                PortStats {
                    port_no: 2,
                    ..PortStats::default()
                },
            ]),
        }));
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut data = Message::marshal(TEST_XID, Message::EchoRequest(vec![7; 4])).unwrap();
        data.extend(Message::marshal(TEST_XID, Message::Hello).unwrap());
        let (_, msg, consumed) = Message::decode(&data).unwrap();
        assert_eq!(msg, Message::EchoRequest(vec![7; 4]));
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let data = vec![0x01, 0x02, 0x00, 0x20, 0, 0, 0, 1, 0xaa];
        match Message::decode(&data) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should be malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_code() {
        let data = vec![0x01, 0x42, 0x00, 0x08, 0, 0, 0, 1];
        match Message::decode(&data) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should be malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_version_checks() {
        // HELLO is accepted at any version; the session negotiates.
        let hello = vec![0x04, 0x00, 0x00, 0x10, 0, 0, 0, 1, 0, 1, 0, 8, 0, 0, 0, 0x10];
        match Message::decode(&hello) {
            Ok((header, Message::Hello, 16)) => assert_eq!(header.version(), 4),
            other => panic!("Should be a Hello message, got {:?}", other),
        }

        let echo = vec![0x04, 0x02, 0x00, 0x08, 0, 0, 0, 1];
        match Message::decode(&echo) {
            Err(OfpError::UnsupportedVersion(4)) => {}
            other => panic!("Should be an unsupported version, got {:?}", other),
        }
    }

    #[test]
    fn test_unmodelled_message_type() {
        let set_config = vec![0x01, 0x09, 0x00, 0x0c, 0, 0, 0, 5, 0, 0, 0x00, 0x80];
        match Message::decode(&set_config) {
            Err(OfpError::UnsupportedMessage { code: 9, xid: 5 }) => {}
            other => panic!("Should be an unsupported message, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_structures() {
        // features reply with half a port
        let mut feats = Message::marshal(
            TEST_XID,
            Message::FeaturesReply(SwitchFeatures {
                datapath_id: 1,
                num_buffers: 0,
                num_tables: 1,
                supported_capabilities: Capabilities::default(),
                supported_actions: SupportedActions::default(),
                ports: vec![port_desc(1)],
            }),
        )
        .unwrap();
        feats.truncate(feats.len() - 24);
        feats[3] = feats.len() as u8;
        match Message::decode(&feats) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should be malformed, got {:?}", other),
        }

        // packet in body shorter than its fixed part
        let pkt_in = vec![0x01, 0x0a, 0x00, 0x0c, 0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff];
        match Message::decode(&pkt_in) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should be malformed, got {:?}", other),
        }

        // error message with no type/code
        let err = vec![0x01, 0x01, 0x00, 0x0a, 0, 0, 0, 1, 0, 1];
        match Message::decode(&err) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should be malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_action_length() {
        let po = PacketOut {
            output_payload: Payload::NotBuffered(vec![]),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        };
        let mut data = Message::marshal(TEST_XID, Message::PacketOut(po)).unwrap();
        // action header length field: 8 -> 6
        data[8 + 8 + 3] = 6;
        match Message::decode(&data) {
            Err(OfpError::MalformedMessage(_)) => {}
            other => panic!("Should be malformed, got {:?}", other),
        }
    }
}
