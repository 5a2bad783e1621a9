//! `gb-session`: the per-device session controller that composes a SIP
//! dialog, a media connection, and a muxer bridge behind a three-state
//! session lifecycle, plus the process-wide registry.

pub mod error;
pub mod registry;
pub mod session;
pub mod ssrc;

pub use error::{Error, Result};
pub use registry::{PendingConn, Registry};
pub use session::{Session, SessionConfig, SessionState, SessionStats};
