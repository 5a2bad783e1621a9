//! The process-wide resource map: sessions keyed by device-id and by
//! SSRC, plus an anonymous slot for freshly accepted connections that
//! haven't bound to a session yet. The registry owns the primary
//! reference; cross-references are weak-by-lookup.
//!
//! Modeled on `session-core-v2/src/adapters/dialog_adapter.rs`'s
//! DashMap-of-handles pattern, generalized to a two-key lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gb_ps::MediaConnectionHandle;
use gb_sip::connection::SipConnectionHandle;

use crate::session::Session;

/// A freshly accepted connection not yet bound to a `Session`.
pub enum PendingConn {
    Sip(SipConnectionHandle),
    Media(MediaConnectionHandle),
}

static NEXT_ANON_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
pub struct Registry {
    by_device_id: DashMap<String, Arc<Session>>,
    by_ssrc: DashMap<u32, Arc<Session>>,
    anonymous: DashMap<u64, PendingConn>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_with_id(&self, device_id: String, session: Arc<Session>) {
        self.by_device_id.insert(device_id, session);
    }

    pub fn add_with_fast_id(&self, ssrc: u32, session: Arc<Session>) {
        self.by_ssrc.insert(ssrc, session);
    }

    pub fn find_by_id(&self, device_id: &str) -> Option<Arc<Session>> {
        self.by_device_id.get(device_id).map(|e| Arc::clone(e.value()))
    }

    pub fn find_by_fast_id(&self, ssrc: u32) -> Option<Arc<Session>> {
        self.by_ssrc.get(&ssrc).map(|e| Arc::clone(e.value()))
    }

    pub fn ssrc_taken(&self, ssrc: u32) -> bool {
        self.by_ssrc.contains_key(&ssrc)
    }

    pub fn remove_by_id(&self, device_id: &str) {
        self.by_device_id.remove(device_id);
    }

    pub fn remove_by_fast_id(&self, ssrc: u32) {
        self.by_ssrc.remove(&ssrc);
    }

    /// Park a bare, not-yet-bound connection under a fresh anonymous key.
    /// Returns that key so the caller can remove it once the connection
    /// either binds to a session or closes.
    pub fn add_anonymous(&self, conn: PendingConn) -> u64 {
        let id = NEXT_ANON_ID.fetch_add(1, Ordering::Relaxed);
        self.anonymous.insert(id, conn);
        id
    }

    pub fn remove_anonymous(&self, id: u64) -> Option<PendingConn> {
        self.anonymous.remove(&id).map(|(_, v)| v)
    }

    pub fn session_count(&self) -> usize {
        self.by_device_id.len()
    }

    /// Snapshot of every live session, for the periodic tick driver to
    /// iterate without holding the map locked.
    pub fn sessions_snapshot(&self) -> Vec<Arc<Session>> {
        self.by_device_id.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
