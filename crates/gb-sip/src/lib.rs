//! `gb-sip`: the constrained SIP/2.0 message engine and per-device dialog
//! state machine for a GB28181 surveillance gateway.
//!
//! This crate never speaks UDP and never negotiates authentication; it
//! understands exactly REGISTER, MESSAGE, INVITE, ACK, BYE and the
//! responses a GB28181 video device sends back.

pub mod builder;
pub mod connection;
pub mod dialog;
pub mod error;
pub mod message;
pub mod parser;
pub mod sdp;
pub mod types;

pub use dialog::{DialogEvent, DialogState};
pub use error::{Error, Result};
pub use message::{Message, StartLine};
pub use types::{Addr, CSeq, Contact, Method, Transport, Via};
