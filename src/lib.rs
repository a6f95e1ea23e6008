//! OpenFlow 1.0 switch sessions and a shared L2 MAC-learning controller.

#[macro_use]
mod ofp_utils;

mod bits;
pub mod config;
pub mod error;
pub mod events;
pub mod learning_switch;
pub mod mac_table;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod ofp_session;
pub mod openflow0x01;
pub mod packet;

pub use crate::config::{ControllerArgs, ControllerConfig};
pub use crate::error::{OfpError, Result};
pub use crate::events::{Command, CommandReply, ControllerEvent};
pub use crate::ofp_controller::{Controller, OfpController};
