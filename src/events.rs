use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use log::trace;

use crate::mac_table::{ListFilter, MacEntry};
use crate::ofp_header::Xid;
use crate::openflow0x01::{
    ErrorMsg, FlowMod, FlowRemoved, PacketIn, PacketOut, PortStatus, StatsReqBody, StatsRespBody,
    SwitchFeatures,
};

/// Something that happened on a switch connection. Every event names the
/// datapath it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    SwitchConnected(u64, SwitchFeatures),
    SwitchDisconnected(u64),
    PacketIn(u64, PacketIn),
    PortStatus(u64, PortStatus),
    FlowRemoved(u64, FlowRemoved),
    /// All parts of a (possibly multipart) stats reply, in arrival order.
    StatsReply(u64, Xid, Vec<StatsRespBody>),
    SwitchError(u64, Xid, ErrorMsg),
    BarrierReply(u64, Xid),
}

impl ControllerEvent {
    pub fn dpid(&self) -> u64 {
        match *self {
            ControllerEvent::SwitchConnected(dpid, _)
            | ControllerEvent::SwitchDisconnected(dpid)
            | ControllerEvent::PacketIn(dpid, _)
            | ControllerEvent::PortStatus(dpid, _)
            | ControllerEvent::FlowRemoved(dpid, _)
            | ControllerEvent::StatsReply(dpid, _, _)
            | ControllerEvent::SwitchError(dpid, _, _)
            | ControllerEvent::BarrierReply(dpid, _) => dpid,
        }
    }
}

/// Requests from applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InstallFlow(u64, FlowMod),
    SendPacketOut(u64, PacketOut),
    QueryMacTable(ListFilter),
    RequestStats(u64, StatsReqBody),
    Barrier(u64),
}

impl Command {
    /// Datapath the command is addressed to, if any.
    pub fn dpid(&self) -> Option<u64> {
        match *self {
            Command::InstallFlow(dpid, _)
            | Command::SendPacketOut(dpid, _)
            | Command::RequestStats(dpid, _)
            | Command::Barrier(dpid) => Some(dpid),
            Command::QueryMacTable(_) => None,
        }
    }
}

/// Outcome of `Controller::submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Handed to the switch's session; replies arrive as events.
    Queued,
    MacTable(Vec<MacEntry>),
}

/// Fan-out of controller events to any number of subscribers. A subscriber
/// that dropped its receiver is forgotten on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Arc<ControllerEvent>>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn subscribe(&self) -> Receiver<Arc<ControllerEvent>> {
        let (tx, rx) = channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ControllerEvent) {
        let event = Arc::new(event);
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(Arc::clone(&event)).is_ok());
        trace!("Published {:?} to {} subscribers", event, subscribers.len());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Arc<ControllerEvent>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_each_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(ControllerEvent::BarrierReply(3, 9));
        assert_eq!(*a.recv().unwrap(), ControllerEvent::BarrierReply(3, 9));
        assert_eq!(b.recv().unwrap().dpid(), 3);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(ControllerEvent::SwitchDisconnected(1));
        assert_eq!(bus.lock().len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
