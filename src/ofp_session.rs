use std::cmp;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{OfpError, Result};
use crate::ofp_header::{OfpHeader, Xid, OPENFLOW_0_01_VERSION};
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{
    BadRequest, ErrorMsg, ErrorType, FlowRemoved, HelloFailed, PacketIn, PortStatus,
    StatsRespBody, SwitchFeatures,
};

/// Bytes of an offending message echoed back in an ERROR reply.
const ERROR_DATA_LIMIT: usize = 64;

/// Handshake and liveness state of a switch connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HelloSent,
    FeaturesPending,
    Established,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub echo_interval: Duration,
    pub max_missed_echoes: u32,
    /// How long a stats or barrier request may wait for its reply.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_secs(10),
            echo_interval: Duration::from_secs(5),
            max_missed_echoes: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Features,
    Echo,
    Stats,
    Barrier,
}

impl RequestKind {
    /// Requests whose replies the session correlates by xid.
    fn of_message(msg: &Message) -> Option<RequestKind> {
        match *msg {
            Message::FeaturesReq => Some(RequestKind::Features),
            Message::EchoRequest(_) => Some(RequestKind::Echo),
            Message::StatsRequest(_) => Some(RequestKind::Stats),
            Message::BarrierRequest => Some(RequestKind::Barrier),
            _ => None,
        }
    }

    /// Requests made on behalf of applications. Handshake and echo requests
    /// are bounded by their own timers.
    fn expires(self) -> bool {
        matches!(self, RequestKind::Stats | RequestKind::Barrier)
    }
}

#[derive(Debug)]
struct Pending {
    kind: RequestKind,
    sent_at: Instant,
    parts: Vec<StatsRespBody>,
}

/// What a received message means to the rest of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Connected(SwitchFeatures),
    PacketIn(PacketIn),
    PortStatus(PortStatus),
    FlowRemoved(FlowRemoved),
    Stats(Xid, Vec<StatsRespBody>),
    Error(Xid, ErrorMsg),
    BarrierReply(Xid),
}

/// Protocol state of one switch connection, free of any I/O.
///
/// The owner feeds it received frames and the passage of time, and sends
/// whatever accumulates in the outbox. Every method takes the current time
/// explicitly so timeouts can be driven deterministically.
pub struct SwitchSession {
    config: SessionConfig,
    state: SessionState,
    version: Option<u8>,
    features: Option<SwitchFeatures>,
    last_seen: Instant,
    /// Latest time handed in by the owner.
    clock: Instant,
    handshake_deadline: Option<Instant>,
    echo_sent_at: Option<Instant>,
    missed_echoes: u32,
    outstanding: HashMap<Xid, Pending>,
    next_xid: Xid,
    outbox: VecDeque<(Xid, Message)>,
}

impl SwitchSession {
    pub fn new(config: SessionConfig, now: Instant) -> SwitchSession {
        SwitchSession {
            config,
            state: SessionState::Connecting,
            version: None,
            features: None,
            last_seen: now,
            clock: now,
            handshake_deadline: None,
            echo_sent_at: None,
            missed_echoes: 0,
            outstanding: HashMap::new(),
            next_xid: 1,
            outbox: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, SessionState::Closing | SessionState::Closed)
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn features(&self) -> Option<&SwitchFeatures> {
        self.features.as_ref()
    }

    pub fn datapath_id(&self) -> Option<u64> {
        self.features.as_ref().map(|f| f.datapath_id)
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Number of requests still waiting for a reply.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn fresh_xid(&mut self) -> Xid {
        let xid = self.next_xid;
        self.next_xid = cmp::max(self.next_xid.wrapping_add(1), 1);
        xid
    }

    /// Queue `msg` under a fresh xid, remembering it when a reply is expected.
    pub fn send(&mut self, msg: Message) -> Xid {
        let xid = self.fresh_xid();
        if let Some(kind) = RequestKind::of_message(&msg) {
            self.outstanding.insert(
                xid,
                Pending {
                    kind,
                    sent_at: self.clock,
                    parts: vec![],
                },
            );
        }
        self.outbox.push_back((xid, msg));
        xid
    }

    fn reply(&mut self, xid: Xid, msg: Message) {
        self.outbox.push_back((xid, msg));
    }

    /// Messages waiting to go out, in the order they were queued.
    pub fn drain_outbox(&mut self) -> Vec<(Xid, Message)> {
        self.outbox.drain(..).collect()
    }

    /// The connection is up: say HELLO and start the handshake clock.
    pub fn start(&mut self, now: Instant) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.clock = now;
        self.send(Message::Hello);
        self.handshake_deadline = Some(now + self.config.handshake_timeout);
        self.last_seen = now;
        self.state = SessionState::HelloSent;
    }

    /// Begin an orderly shutdown.
    pub fn close(&mut self) {
        if self.is_open() {
            self.state = SessionState::Closing;
        }
    }

    /// The connection is gone. Pending requests will never be answered.
    pub fn finish(&mut self) {
        self.state = SessionState::Closed;
        self.outstanding.clear();
        self.echo_sent_at = None;
    }

    /// Fail with `err` after queueing an ERROR reply for the peer.
    fn fail(&mut self, xid: Xid, typ: ErrorType, data: Vec<u8>, err: OfpError) -> OfpError {
        warn!("Closing switch session: {}", err);
        self.reply(xid, Message::Error(ErrorMsg { typ, data }));
        self.state = SessionState::Closing;
        err
    }

    fn error_data(frame: &[u8]) -> Vec<u8> {
        frame[..cmp::min(frame.len(), ERROR_DATA_LIMIT)].to_vec()
    }

    /// Decode and act on one complete frame.
    pub fn handle_frame(&mut self, now: Instant, frame: &[u8]) -> Result<Option<Dispatch>> {
        if !self.is_open() {
            return Ok(None);
        }
        match Message::decode(frame) {
            Ok((header, msg, _)) => self.handle_message(now, &header, msg, frame),
            Err(e) => self.reject(e, frame),
        }
    }

    fn reject(&mut self, err: OfpError, frame: &[u8]) -> Result<Option<Dispatch>> {
        let header = OfpHeader::parse(frame).ok();
        let xid = header.map_or(0, |h| h.xid());
        let data = SwitchSession::error_data(frame);
        match err {
            OfpError::UnsupportedMessage { code, xid } => {
                info!("Switch sent unsupported message type {} (xid {})", code, xid);
                self.reply(
                    xid,
                    Message::Error(ErrorMsg {
                        typ: ErrorType::BadRequest(BadRequest::BadType),
                        data,
                    }),
                );
                Ok(None)
            }
            OfpError::UnsupportedVersion(_) => {
                let typ = ErrorType::BadRequest(BadRequest::BadVersion);
                Err(self.fail(xid, typ, data, err))
            }
            OfpError::MalformedMessage(_) => {
                let unknown_type = header.map_or(false, |h| h.type_code().is_err());
                let code = if unknown_type {
                    BadRequest::BadType
                } else {
                    BadRequest::BadLen
                };
                Err(self.fail(xid, ErrorType::BadRequest(code), data, err))
            }
            other => {
                self.state = SessionState::Closing;
                Err(other)
            }
        }
    }

    fn take_pending(&mut self, xid: Xid, kind: RequestKind) -> Option<Pending> {
        match self.outstanding.get(&xid) {
            Some(p) if p.kind == kind => self.outstanding.remove(&xid),
            _ => None,
        }
    }

    fn handle_message(
        &mut self,
        now: Instant,
        header: &OfpHeader,
        msg: Message,
        frame: &[u8],
    ) -> Result<Option<Dispatch>> {
        let xid = header.xid();
        self.last_seen = now;
        self.clock = now;
        match msg {
            Message::EchoRequest(data) => {
                self.reply(xid, Message::EchoReply(data));
                Ok(None)
            }
            Message::Hello => self.hello(xid, header.version()),
            Message::FeaturesReply(feats) => {
                if self.state != SessionState::FeaturesPending {
                    debug!("Ignoring FEATURES_REPLY (xid {}) in state {:?}", xid, self.state);
                    return Ok(None);
                }
                if self.take_pending(xid, RequestKind::Features).is_none() {
                    warn!("Dropping FEATURES_REPLY with unexpected xid {}", xid);
                    return Ok(None);
                }
                info!(
                    "Switch {:#018x} connected: {} ports, {} buffers, {} tables",
                    feats.datapath_id,
                    feats.ports.len(),
                    feats.num_buffers,
                    feats.num_tables
                );
                self.features = Some(feats.clone());
                self.handshake_deadline = None;
                self.state = SessionState::Established;
                Ok(Some(Dispatch::Connected(feats)))
            }
            Message::EchoReply(_) => {
                if self.take_pending(xid, RequestKind::Echo).is_some() {
                    self.outstanding.retain(|_, p| p.kind != RequestKind::Echo);
                    self.echo_sent_at = None;
                    self.missed_echoes = 0;
                } else {
                    debug!("Dropping unexpected ECHO_REPLY (xid {})", xid);
                }
                Ok(None)
            }
            Message::Error(err) => {
                if let ErrorType::HelloFailed(code) = err.typ {
                    self.state = SessionState::Closing;
                    return Err(OfpError::ProtocolViolation(format!(
                        "switch refused the handshake: {:?}",
                        code
                    )));
                }
                match self.outstanding.remove(&xid) {
                    Some(_) => {
                        warn!("Switch reported {:?} for xid {}", err.typ, xid);
                        Ok(Some(Dispatch::Error(xid, err)))
                    }
                    None => {
                        warn!("Dropping unexpected ERROR {:?} (xid {})", err.typ, xid);
                        Ok(None)
                    }
                }
            }
            Message::StatsReply(resp) => {
                let done = match self.outstanding.get_mut(&xid) {
                    Some(p) if p.kind == RequestKind::Stats => {
                        p.parts.push(resp.body);
                        !resp.more
                    }
                    _ => {
                        warn!("Dropping unexpected STATS_REPLY (xid {})", xid);
                        return Ok(None);
                    }
                };
                if !done {
                    return Ok(None);
                }
                let parts = self.outstanding.remove(&xid).map_or(vec![], |p| p.parts);
                Ok(Some(Dispatch::Stats(xid, parts)))
            }
            Message::BarrierReply => match self.take_pending(xid, RequestKind::Barrier) {
                Some(_) => Ok(Some(Dispatch::BarrierReply(xid))),
                None => {
                    warn!("Dropping unexpected BARRIER_REPLY (xid {})", xid);
                    Ok(None)
                }
            },
            Message::PacketIn(_) | Message::PortStatus(_) | Message::FlowRemoved(_)
                if self.state != SessionState::Established =>
            {
                debug!(
                    "Dropping {:?} received before the handshake completed",
                    Message::msg_code_of_message(&msg)
                );
                Ok(None)
            }
            Message::PacketIn(pkt) => Ok(Some(Dispatch::PacketIn(pkt))),
            Message::PortStatus(sts) => Ok(Some(Dispatch::PortStatus(sts))),
            Message::FlowRemoved(removed) => Ok(Some(Dispatch::FlowRemoved(removed))),
            Message::FeaturesReq
            | Message::FlowMod(_)
            | Message::PacketOut(_)
            | Message::StatsRequest(_)
            | Message::BarrierRequest => {
                let err = OfpError::ProtocolViolation(format!(
                    "switch sent controller-only message {:?}",
                    Message::msg_code_of_message(&msg)
                ));
                let typ = ErrorType::BadRequest(BadRequest::BadType);
                Err(self.fail(xid, typ, SwitchSession::error_data(frame), err))
            }
        }
    }

    fn hello(&mut self, xid: Xid, peer_version: u8) -> Result<Option<Dispatch>> {
        if self.state != SessionState::HelloSent {
            debug!("Ignoring HELLO in state {:?}", self.state);
            return Ok(None);
        }
        if peer_version == 0 {
            let typ = ErrorType::HelloFailed(HelloFailed::Incompatible);
            let data = b"OpenFlow 1.0 required".to_vec();
            return Err(self.fail(xid, typ, data, OfpError::UnsupportedVersion(peer_version)));
        }
        let version = cmp::min(OPENFLOW_0_01_VERSION, peer_version);
        debug!("Negotiated OpenFlow version {:#04x}", version);
        self.version = Some(version);
        self.send(Message::FeaturesReq);
        self.state = SessionState::FeaturesPending;
        Ok(None)
    }

    /// Enforce the handshake deadline, keep the connection probed and give up
    /// on requests the switch never answered.
    pub fn poll_timers(&mut self, now: Instant) -> Result<()> {
        self.clock = cmp::max(self.clock, now);
        match self.state {
            SessionState::Connecting | SessionState::Closing | SessionState::Closed => Ok(()),
            SessionState::HelloSent | SessionState::FeaturesPending => {
                match self.handshake_deadline {
                    Some(deadline) if now >= deadline => {
                        self.state = SessionState::Closing;
                        Err(OfpError::Timeout("handshake"))
                    }
                    _ => Ok(()),
                }
            }
            SessionState::Established => {
                self.expire_requests(now);
                self.keepalive(now)
            }
        }
    }

    fn expire_requests(&mut self, now: Instant) {
        let timeout = self.config.request_timeout;
        self.outstanding.retain(|xid, p| {
            let expired =
                p.kind.expires() && now.saturating_duration_since(p.sent_at) >= timeout;
            if expired {
                warn!("Switch never answered {:?} request (xid {})", p.kind, xid);
            }
            !expired
        });
    }

    fn keepalive(&mut self, now: Instant) -> Result<()> {
        let interval = self.config.echo_interval;
        match self.echo_sent_at {
            None => {
                if now.saturating_duration_since(self.last_seen) >= interval {
                    self.probe(now);
                }
                Ok(())
            }
            Some(sent_at) if now.saturating_duration_since(sent_at) >= interval => {
                self.missed_echoes += 1;
                if self.missed_echoes > self.config.max_missed_echoes {
                    self.state = SessionState::Closing;
                    return Err(OfpError::Timeout("ECHO_REPLY"));
                }
                debug!("Switch missed {} echo replies", self.missed_echoes);
                self.probe(now);
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn probe(&mut self, now: Instant) {
        self.send(Message::EchoRequest(vec![]));
        self.echo_sent_at = Some(now);
    }
}
