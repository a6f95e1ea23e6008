use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{OfpError, Result};
use crate::events::{Command, CommandReply, ControllerEvent, EventBus};
use crate::learning_switch::LearningSwitch;
use crate::mac_table::MacTable;
use crate::ofp_header::{MessageFramer, Xid};
use crate::ofp_message::OfpMessage;
use crate::ofp_session::{Dispatch, SwitchSession};
use crate::openflow0x01::message::Message;

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller.
pub trait OfpController {
    /// OpenFlow message type supporting the same protocol version as the controller.
    type Message: OfpMessage;

    /// Send a message to the node at the other end of `writer`.
    fn send_message<W: Write>(xid: Xid, message: Self::Message, writer: &mut W) -> Result<()>;
    /// Perform handshake and begin loop reading incoming messages from client stream.
    fn handle_client_connected(&self, stream: TcpStream);
}

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Mailbox of a session that completed its handshake.
struct SwitchHandle {
    session_id: u64,
    mailbox: Sender<Message>,
}

/// OpenFlow 1.0 controller running the learning switch on every connected
/// datapath. Each switch connection is served by its own thread; the MAC
/// table is the only state they share.
pub struct Controller {
    config: ControllerConfig,
    learning: LearningSwitch,
    events: EventBus,
    switches: Mutex<HashMap<u64, SwitchHandle>>,
    next_session_id: AtomicU64,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Controller {
        let table = Arc::new(MacTable::new(
            config.mac_table_capacity,
            config.eviction_batch,
        ));
        Controller {
            learning: LearningSwitch::new(table, config.flow_policy),
            config,
            events: EventBus::new(),
            switches: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mac_table(&self) -> &Arc<MacTable> {
        self.learning.table()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<Arc<ControllerEvent>> {
        self.events.subscribe()
    }

    /// Datapaths with an established session.
    pub fn connected_switches(&self) -> Vec<u64> {
        let mut dpids: Vec<u64> = self.switches().keys().copied().collect();
        dpids.sort_unstable();
        dpids
    }

    fn switches(&self) -> MutexGuard<'_, HashMap<u64, SwitchHandle>> {
        self.switches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Carry out an application request. Messages for a switch are queued on
    /// its session, which assigns the xid; replies come back as events.
    pub fn submit(&self, command: Command) -> Result<CommandReply> {
        let (dpid, message) = match command {
            Command::QueryMacTable(filter) => {
                let entries = self.mac_table().list(filter).collect();
                return Ok(CommandReply::MacTable(entries));
            }
            Command::InstallFlow(dpid, flow) => (dpid, Message::FlowMod(flow)),
            Command::SendPacketOut(dpid, packet) => (dpid, Message::PacketOut(packet)),
            Command::RequestStats(dpid, body) => (dpid, Message::StatsRequest(body)),
            Command::Barrier(dpid) => (dpid, Message::BarrierRequest),
        };
        // refuse what could never be put on the wire
        Message::marshal(0, message.clone())?;

        let mut switches = self.switches();
        let handle = switches
            .get(&dpid)
            .ok_or(OfpError::UnknownDatapath(dpid))?;
        if handle.mailbox.send(message).is_err() {
            switches.remove(&dpid);
            return Err(OfpError::ConnectionClosed);
        }
        Ok(CommandReply::Queued)
    }

    /// Accept switch connections until the listener fails.
    pub fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Listening for switches on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let name = match stream.peer_addr() {
                        Ok(peer) => format!("switch-{}", peer),
                        Err(_) => "switch".to_string(),
                    };
                    let controller = Arc::clone(&self);
                    thread::Builder::new()
                        .name(name)
                        .spawn(move || controller.handle_client_connected(stream))?;
                }
                Err(e) => warn!("Connection failed: {}", e),
            }
        }
        Ok(())
    }

    fn register(&self, dpid: u64, session_id: u64, mailbox: Sender<Message>) {
        let previous = self.switches().insert(
            dpid,
            SwitchHandle {
                session_id,
                mailbox,
            },
        );
        if previous.is_some() {
            warn!("Datapath {:#x} reconnected, replacing its old session", dpid);
        }
    }

    /// Remove the mailbox of `session_id`, unless a newer session of the same
    /// datapath already took its place. Returns whether the datapath is gone.
    fn unregister(&self, dpid: u64, session_id: u64) -> bool {
        let mut switches = self.switches();
        if switches.get(&dpid).map(|h| h.session_id) == Some(session_id) {
            switches.remove(&dpid);
            true
        } else {
            false
        }
    }

    fn flush<W: Write>(session: &mut SwitchSession, writer: &mut W) -> Result<()> {
        for (xid, msg) in session.drain_outbox() {
            Controller::send_message(xid, msg, writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Hand a decoded message to the learning switch and the subscribers.
    fn dispatch(
        &self,
        session: &mut SwitchSession,
        session_id: u64,
        mailbox: &Sender<Message>,
        d: Dispatch,
    ) {
        if let Dispatch::Connected(feats) = d {
            let dpid = feats.datapath_id;
            self.learning.switch_connected(dpid);
            self.register(dpid, session_id, mailbox.clone());
            self.events
                .publish(ControllerEvent::SwitchConnected(dpid, feats));
            return;
        }
        let dpid = match session.datapath_id() {
            Some(dpid) => dpid,
            None => {
                debug!("Dropping {:?} from a switch without a datapath id", d);
                return;
            }
        };
        let event = match d {
            Dispatch::PacketIn(pkt) => {
                for msg in self.learning.packet_in(dpid, &pkt) {
                    session.send(msg);
                }
                ControllerEvent::PacketIn(dpid, pkt)
            }
            Dispatch::PortStatus(sts) => {
                self.learning.port_status(dpid, &sts);
                ControllerEvent::PortStatus(dpid, sts)
            }
            Dispatch::FlowRemoved(removed) => ControllerEvent::FlowRemoved(dpid, removed),
            Dispatch::Stats(xid, parts) => ControllerEvent::StatsReply(dpid, xid, parts),
            Dispatch::Error(xid, err) => ControllerEvent::SwitchError(dpid, xid, err),
            Dispatch::BarrierReply(xid) => ControllerEvent::BarrierReply(dpid, xid),
            Dispatch::Connected(_) => return,
        };
        self.events.publish(event);
    }

    /// Run one switch connection until it closes or fails.
    fn serve(
        &self,
        session: &mut SwitchSession,
        session_id: u64,
        stream: &mut TcpStream,
    ) -> Result<()> {
        stream.set_read_timeout(Some(self.config.poll_interval))?;
        // a peer that stops reading must not stall the timers forever
        stream.set_write_timeout(Some(self.config.handshake_timeout))?;
        stream.set_nodelay(true)?;

        let (mailbox, commands) = channel();
        let mut framer = MessageFramer::new();
        let mut buf = vec![0; READ_BUFFER_SIZE];
        session.start(Instant::now());

        loop {
            Controller::flush(session, stream)?;
            if !session.is_open() {
                return Ok(());
            }

            match stream.read(&mut buf) {
                Ok(0) if framer.buffered() > 0 => {
                    return Err(OfpError::malformed(format!(
                        "connection closed with {} bytes of a message pending",
                        framer.buffered()
                    )))
                }
                Ok(0) => return Err(OfpError::ConnectionClosed),
                Ok(n) => framer.extend(&buf[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }

            while let Some(frame) = framer.next_frame() {
                if let Some(d) = session.handle_frame(Instant::now(), &frame)? {
                    self.dispatch(session, session_id, &mailbox, d);
                }
            }

            while let Ok(msg) = commands.try_recv() {
                session.send(msg);
            }
            session.poll_timers(Instant::now())?;
        }
    }
}

impl OfpController for Controller {
    type Message = Message;

    fn send_message<W: Write>(xid: Xid, message: Message, writer: &mut W) -> Result<()> {
        let raw_msg = Message::marshal(xid, message)?;
        writer.write_all(&raw_msg)?;
        Ok(())
    }

    fn handle_client_connected(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown peer".to_string(), |a| a.to_string());
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        info!("Switch connected from {}", peer);

        let mut session = SwitchSession::new(self.config.session(), Instant::now());
        let result = self.serve(&mut session, session_id, &mut stream);

        // Best effort: an ERROR reply may still be queued for the peer.
        session.close();
        if let Err(e) = Controller::flush(&mut session, &mut stream) {
            debug!("Could not flush to {}: {}", peer, e);
        }
        let _ = stream.shutdown(Shutdown::Both);
        let dpid = session.datapath_id();
        session.finish();

        match result {
            Ok(()) | Err(OfpError::ConnectionClosed) => info!("Switch {} disconnected", peer),
            Err(ref e @ OfpError::Io(_)) => warn!("Switch {} connection failed: {}", peer, e),
            Err(e) => error!("Switch {} dropped: {}", peer, e),
        }
        if let Some(dpid) = dpid {
            if self.unregister(dpid, session_id) {
                self.events.publish(ControllerEvent::SwitchDisconnected(dpid));
            } else {
                debug!("Datapath {:#x} already served by a newer session", dpid);
            }
        }
    }
}
