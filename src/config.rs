use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::learning_switch::FlowPolicy;
use crate::ofp_session::SessionConfig;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:6633";

/// Everything the controller needs to run. `Default` gives the values a
/// freshly started controller uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub listen: SocketAddr,
    pub echo_interval: Duration,
    pub max_missed_echoes: u32,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub mac_table_capacity: usize,
    pub eviction_batch: usize,
    pub flow_policy: FlowPolicy,
    /// Longest a session blocks on its socket before checking timers and its
    /// mailbox.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 6633)),
            echo_interval: Duration::from_secs(5),
            max_missed_echoes: 3,
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            mac_table_capacity: 4096,
            eviction_batch: 1,
            flow_policy: FlowPolicy::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ControllerConfig {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: self.handshake_timeout,
            echo_interval: self.echo_interval,
            max_missed_echoes: self.max_missed_echoes,
            request_timeout: self.request_timeout,
        }
    }
}

/// OpenFlow 1.0 L2 learning controller
#[derive(Parser, Debug)]
#[command(name = "rust_ofp_l2_controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "OpenFlow 1.0 controller running a shared L2 learning switch", long_about = None)]
pub struct ControllerArgs {
    /// Address to accept switch connections on
    #[arg(short = 'l', long, default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Seconds of silence before a switch is probed with ECHO_REQUEST
    #[arg(long, default_value = "5")]
    pub echo_interval: u64,

    /// Unanswered echo intervals tolerated before the switch is dropped
    #[arg(long, default_value = "3")]
    pub max_missed_echoes: u32,

    /// Seconds a switch gets to complete HELLO and FEATURES
    #[arg(long, default_value = "10")]
    pub handshake_timeout: u64,

    /// Seconds a stats or barrier request waits for its reply
    #[arg(long, default_value = "30")]
    pub request_timeout: u64,

    /// Maximum number of learned hosts across all switches
    #[arg(short = 'c', long, default_value = "4096")]
    pub mac_table_capacity: usize,

    /// Entries evicted at once when the MAC table is full
    #[arg(long, default_value = "1")]
    pub eviction_batch: usize,

    /// Idle timeout (seconds) of installed flows, 0 for none
    #[arg(long, default_value = "10")]
    pub flow_idle_timeout: u16,

    /// Hard timeout (seconds) of installed flows, 0 for none
    #[arg(long, default_value = "30")]
    pub flow_hard_timeout: u16,

    /// Priority of installed flows
    #[arg(long, default_value = "32768")]
    pub flow_priority: u16,

    /// Socket poll interval in milliseconds
    #[arg(long, default_value = "100")]
    pub poll_interval_ms: u64,
}

impl From<ControllerArgs> for ControllerConfig {
    fn from(args: ControllerArgs) -> ControllerConfig {
        ControllerConfig {
            listen: args.listen,
            echo_interval: Duration::from_secs(args.echo_interval),
            max_missed_echoes: args.max_missed_echoes,
            handshake_timeout: Duration::from_secs(args.handshake_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            mac_table_capacity: args.mac_table_capacity,
            eviction_batch: args.eviction_batch,
            flow_policy: FlowPolicy {
                idle_timeout: args.flow_idle_timeout,
                hard_timeout: args.flow_hard_timeout,
                priority: args.flow_priority,
            },
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
        }
    }
}
