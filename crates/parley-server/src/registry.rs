//! Session registry
//!
//! Tracks every live NPLT session. Registration is the only place the
//! connection cap is enforced, so a rejected connection never gets a session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use parley_common::SessionId;

use crate::session::Session;

/// Registry of connected sessions
#[derive(Debug)]
pub struct Registry {
    sessions: DashMap<SessionId, Arc<Session>>,
    max_clients: usize,
    /// Serializes the check-then-insert of registration
    admission: Mutex<()>,
    stats: RegistryStats,
}

/// Counters for the registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub total_accepted: AtomicU64,
    pub total_rejected: AtomicU64,
    pub total_timed_out: AtomicU64,
    pub total_errored: AtomicU64,
}

/// Point-in-time copy of the registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub active: usize,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_timed_out: u64,
    pub total_errored: u64,
}

impl Registry {
    pub fn new(max_clients: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            max_clients,
            admission: Mutex::new(()),
            stats: RegistryStats::default(),
        })
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Admit a session unless the cap is reached
    pub fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let _admission = self.admission.lock();
        if self.sessions.len() >= self.max_clients {
            self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RegistryError::CapacityReached(self.max_clients));
        }
        if self.sessions.contains_key(&session.id()) {
            return Err(RegistryError::AlreadyRegistered(session.id()));
        }

        tracing::info!(session = %session.id(), peer = %session.peer(), "Session registered");
        self.sessions.insert(session.id(), session);
        self.stats.total_accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a session; a no-op if it is already gone
    pub fn unregister(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if removed.is_some() {
            tracing::info!(session = %id, "Session unregistered");
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Snapshot of the live sessions; entries may disappear right after
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn record_timeout(&self) {
        self.stats.total_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.stats.total_errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            active: self.sessions.len(),
            total_accepted: self.stats.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.stats.total_rejected.load(Ordering::Relaxed),
            total_timed_out: self.stats.total_timed_out.load(Ordering::Relaxed),
            total_errored: self.stats.total_errored.load(Ordering::Relaxed),
        }
    }
}

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection limit of {0} reached")]
    CapacityReached(usize),

    #[error("Session {0} already registered")]
    AlreadyRegistered(SessionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<Session> {
        let (session, _rx) = Session::new(
            "127.0.0.1:1234".parse().unwrap(),
            SessionId::new(),
            "m".into(),
        );
        Arc::new(session)
    }

    #[test]
    fn test_capacity_enforced() {
        let registry = Registry::new(2);
        registry.register(session()).unwrap();
        registry.register(session()).unwrap();

        let err = registry.register(session()).unwrap_err();
        assert_eq!(err, RegistryError::CapacityReached(2));
        assert_eq!(registry.len(), 2);

        let stats = registry.stats();
        assert_eq!(stats.total_accepted, 2);
        assert_eq!(stats.total_rejected, 1);
    }

    #[test]
    fn test_unregister_frees_slot() {
        let registry = Registry::new(1);
        let s = session();
        registry.register(s.clone()).unwrap();
        assert!(registry.unregister(&s.id()).is_some());
        assert!(registry.unregister(&s.id()).is_none());
        registry.register(session()).unwrap();
    }

    #[test]
    fn test_concurrent_registration_respects_cap() {
        let registry = Registry::new(8);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register(session()).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 8);
        assert_eq!(registry.len(), 8);
    }
}
