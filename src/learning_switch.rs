use std::sync::Arc;

use log::{debug, info, warn};

use crate::mac_table::MacTable;
use crate::openflow0x01::message::{add_flow, parse_payload, Message};
use crate::openflow0x01::{
    Action, PacketIn, PacketOut, Pattern, PortReason, PortStatus, PseudoPort, Timeout,
};
use crate::packet::{MacAddr, Packet};

/// Timeouts and priority of the flows the learning switch installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicy {
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
}

impl Default for FlowPolicy {
    fn default() -> FlowPolicy {
        FlowPolicy {
            idle_timeout: 10,
            hard_timeout: 30,
            priority: 0x8000,
        }
    }
}

fn timeout_of_secs(secs: u16) -> Timeout {
    match secs {
        0 => Timeout::Permanent,
        s => Timeout::ExpiresAfter(s),
    }
}

/// What to do with a packet sent to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Flood,
    Forward(u16),
    Drop,
}

/// Implements L2 learning switch functionality. Switches forward packets to the
/// learning controller, which will examine the packet and learn the source-port
/// mapping. If the controller already knows the destination location, it pushes
/// a flow entry down to the switch that matches traffic to the packet's
/// destination.
///
/// Abstractly, a learning switch can be thought of in terms of two logically
/// distinct components.
///
///  - A _Learning Module_ that builds a map from host MAC addresses to the
///    switch port on which they are connected. Here that map is the shared
///    `MacTable`, keyed per datapath.
///
///  - A _Routing Module_ that performs traffic routing. If the switch receives
///    a packet which the learning module has learned of the destination location,
///    it forwards the packet directly on the associated port. If the location of
///    the destination is unknown, it floods the packet out all ports.
#[derive(Clone)]
pub struct LearningSwitch {
    known_hosts: Arc<MacTable>,
    policy: FlowPolicy,
}

impl LearningSwitch {
    pub fn new(known_hosts: Arc<MacTable>, policy: FlowPolicy) -> LearningSwitch {
        LearningSwitch {
            known_hosts,
            policy,
        }
    }

    pub fn table(&self) -> &Arc<MacTable> {
        &self.known_hosts
    }

    pub fn policy(&self) -> FlowPolicy {
        self.policy
    }

    fn learning_packet_in(&self, sw: u64, port: u16, pk: &Packet) {
        self.known_hosts.learn(sw, pk.dl_src, port, pk.src_ip());
    }

    /// Routing decision for a frame from `src` to `dst` received on `in_port`.
    /// Reads the table only.
    pub fn decide(&self, sw: u64, in_port: u16, src: MacAddr, dst: MacAddr) -> Decision {
        if src == dst {
            return Decision::Drop;
        }
        if dst.is_multicast() {
            return Decision::Flood;
        }
        match self.known_hosts.lookup(sw, dst) {
            Some(entry) if entry.port != in_port => Decision::Forward(entry.port),
            _ => Decision::Flood,
        }
    }

    fn flow_to(&self, dst: MacAddr, out_port: u16) -> Message {
        let mut pattern = Pattern::match_all();
        pattern.dl_dst = Some(dst);
        let actions = vec![Action::Output(PseudoPort::PhysicalPort(out_port))];
        let mut flow = add_flow(self.policy.priority, pattern, actions);
        flow.idle_timeout = timeout_of_secs(self.policy.idle_timeout);
        flow.hard_timeout = timeout_of_secs(self.policy.hard_timeout);
        flow.notify_when_removed = true;
        Message::FlowMod(flow)
    }

    /// Learn from a PACKET_IN and return the messages to send back to the
    /// switch, in order.
    pub fn packet_in(&self, sw: u64, pkt: &PacketIn) -> Vec<Message> {
        let pk = match parse_payload(&pkt.input_payload) {
            Ok(pk) => pk,
            Err(e) => {
                debug!("Dropping packet-in from {:#x} port {}: {}", sw, pkt.port, e);
                return vec![];
            }
        };
        self.learning_packet_in(sw, pkt.port, &pk);

        let packet_out = |actions: Vec<Action>| {
            Message::PacketOut(PacketOut {
                output_payload: pkt.input_payload.clone(),
                port_id: Some(pkt.port),
                apply_actions: actions,
            })
        };
        match self.decide(sw, pkt.port, pk.dl_src, pk.dl_dst) {
            Decision::Drop => {
                debug!("Dropping self-addressed frame from {}", pk.dl_src);
                vec![]
            }
            Decision::Forward(out_port) => {
                info!(
                    "Installing rule on {:#x} for {} via port {}.",
                    sw, pk.dl_dst, out_port
                );
                vec![
                    self.flow_to(pk.dl_dst, out_port),
                    packet_out(vec![Action::Output(PseudoPort::PhysicalPort(out_port))]),
                ]
            }
            Decision::Flood => {
                debug!("Flooding to {} on {:#x}", pk.dl_dst, sw);
                vec![packet_out(vec![Action::Output(PseudoPort::Flood)])]
            }
        }
    }

    /// Forget hosts behind a port that went away or came back.
    pub fn port_status(&self, sw: u64, status: &PortStatus) {
        let stale = match status.reason {
            PortReason::PortDelete | PortReason::PortAdd => true,
            PortReason::PortModify => status.desc.is_down(),
        };
        if stale {
            let purged = self.known_hosts.remove_port(sw, status.desc.port_no);
            if purged > 0 {
                info!(
                    "Port {} of {:#x} changed ({:?}), forgot {} hosts",
                    status.desc.port_no, sw, status.reason, purged
                );
            }
        }
    }

    /// A datapath completed its handshake. Whatever was learned for it before
    /// describes a previous connection.
    pub fn switch_connected(&self, sw: u64) {
        let purged = self.known_hosts.remove_datapath(sw);
        if purged > 0 {
            warn!("Datapath {:#x} reconnected, forgot {} stale hosts", sw, purged);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::openflow0x01::{
        FlowMod, Payload, PacketInReason, PortConfig, PortDesc, PortFeatures, PortState, StpState,
    };
    use crate::packet::tests::ethernet_frame;

    const A: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xaa]);
    const B: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xbb]);

    fn switch() -> LearningSwitch {
        LearningSwitch::new(Arc::new(MacTable::new(1024, 1)), FlowPolicy::default())
    }

    fn packet_in(port: u16, frame: Vec<u8>, buffer: Option<u32>) -> PacketIn {
        PacketIn {
            total_len: frame.len() as u16,
            input_payload: match buffer {
                Some(id) => Payload::Buffered(id, frame),
                None => Payload::NotBuffered(frame),
            },
            port,
            reason: PacketInReason::NoMatch,
        }
    }

    fn verify_flood(msg: &Message, in_port: u16) {
        match *msg {
            Message::PacketOut(ref po) => {
                assert_eq!(po.port_id, Some(in_port));
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::Flood)]);
            }
            ref other => panic!("Should be a flooding PacketOut, got {:?}", other),
        }
    }

    fn port_desc(port_no: u16, down: bool) -> PortDesc {
        PortDesc {
            port_no,
            hw_addr: MacAddr([2, 0, 0, 0, 0, 1]),
            name: "s1-eth2".to_string(),
            config: PortConfig::default(),
            state: PortState {
                down,
                stp_state: StpState::Listen,
            },
            curr: PortFeatures::default(),
            advertised: PortFeatures::default(),
            supported: PortFeatures::default(),
            peer: PortFeatures::default(),
        }
    }

    #[test]
    fn unknown_destination_floods_without_flow() {
        let sw = switch();
        let out = sw.packet_in(1, &packet_in(1, ethernet_frame(B, A, None), None));
        assert_eq!(out.len(), 1);
        verify_flood(&out[0], 1);
        assert_eq!(sw.table().lookup(1, A).unwrap().port, 1);
    }

    #[test]
    fn known_destination_installs_flow_then_forwards() {
        let sw = switch();
        sw.packet_in(1, &packet_in(1, ethernet_frame(B, A, None), None));
        let out = sw.packet_in(1, &packet_in(2, ethernet_frame(A, B, None), Some(77)));
        assert_eq!(out.len(), 2);
        match out[0] {
            Message::FlowMod(FlowMod {
                ref pattern,
                ref actions,
                priority,
                idle_timeout,
                hard_timeout,
                notify_when_removed,
                ..
            }) => {
                assert_eq!(pattern.dl_dst, Some(A));
                assert_eq!(pattern.dl_src, None);
                assert_eq!(actions, &vec![Action::Output(PseudoPort::PhysicalPort(1))]);
                assert_eq!(priority, 0x8000);
                assert_eq!(idle_timeout, Timeout::ExpiresAfter(10));
                assert_eq!(hard_timeout, Timeout::ExpiresAfter(30));
                assert!(notify_when_removed);
            }
            ref other => panic!("Should be a FlowMod message, got {:?}", other),
        }
        match out[1] {
            Message::PacketOut(ref po) => {
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(1))]);
                match po.output_payload {
                    Payload::Buffered(77, _) => {}
                    ref other => panic!("Should replay buffer 77, got {:?}", other),
                }
            }
            ref other => panic!("Should be a PacketOut message, got {:?}", other),
        }
    }

    #[test]
    fn destination_on_ingress_port_floods() {
        let sw = switch();
        sw.table().learn(1, B, 3, None);
        let out = sw.packet_in(1, &packet_in(3, ethernet_frame(B, A, None), None));
        assert_eq!(out.len(), 1);
        verify_flood(&out[0], 3);
    }

    #[test]
    fn broadcast_floods_and_records_ip() {
        let sw = switch();
        sw.table().learn(1, MacAddr::BROADCAST, 4, None);
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let out = sw.packet_in(1, &packet_in(2, ethernet_frame(MacAddr::BROADCAST, A, Some(ip)), None));
        verify_flood(&out[0], 2);
        assert_eq!(sw.table().lookup(1, A).unwrap().ip, Some(ip));
    }

    #[test]
    fn self_addressed_frame_is_dropped_but_learned() {
        let sw = switch();
        let out = sw.packet_in(1, &packet_in(2, ethernet_frame(A, A, None), None));
        assert!(out.is_empty());
        assert!(sw.table().lookup(1, A).is_some());
    }

    #[test]
    fn runt_frame_is_ignored() {
        let sw = switch();
        let out = sw.packet_in(1, &packet_in(2, vec![0; 6], None));
        assert!(out.is_empty());
        assert!(sw.table().is_empty());
    }

    #[test]
    fn decide_is_deterministic() {
        let sw = switch();
        sw.table().learn(7, B, 5, None);
        let first = sw.decide(7, 1, A, B);
        for _ in 0..10 {
            assert_eq!(sw.decide(7, 1, A, B), first);
        }
        assert_eq!(first, Decision::Forward(5));
        assert_eq!(sw.decide(8, 1, A, B), Decision::Flood);
    }

    #[test]
    fn tables_are_per_datapath() {
        let sw = switch();
        sw.packet_in(1, &packet_in(1, ethernet_frame(B, A, None), None));
        let out = sw.packet_in(2, &packet_in(2, ethernet_frame(A, B, None), None));
        assert_eq!(out.len(), 1);
        verify_flood(&out[0], 2);
    }

    #[test]
    fn port_down_forgets_hosts() {
        let sw = switch();
        sw.table().learn(1, A, 2, None);
        sw.table().learn(1, B, 3, None);
        sw.port_status(
            1,
            &PortStatus {
                reason: PortReason::PortModify,
                desc: port_desc(2, false),
            },
        );
        assert_eq!(sw.table().len(), 2);
        sw.port_status(
            1,
            &PortStatus {
                reason: PortReason::PortModify,
                desc: port_desc(2, true),
            },
        );
        assert!(sw.table().lookup(1, A).is_none());
        sw.port_status(
            1,
            &PortStatus {
                reason: PortReason::PortDelete,
                desc: port_desc(3, false),
            },
        );
        assert!(sw.table().is_empty());
    }

    #[test]
    fn reconnect_forgets_datapath() {
        let sw = switch();
        sw.table().learn(1, A, 2, None);
        sw.table().learn(2, B, 2, None);
        sw.switch_connected(1);
        assert!(sw.table().lookup(1, A).is_none());
        assert!(sw.table().lookup(2, B).is_some());
    }
}
