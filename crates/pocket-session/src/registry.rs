//! The membership registry: the single source of truth for who is in the
//! session.
//!
//! # Concurrency
//!
//! Every method takes `&self`. Members live in a sharded concurrent map, so
//! connection handlers and the relay loop can share one `Arc<Registry>`
//! without an outer lock. Iteration always goes through
//! [`snapshot`](Registry::snapshot), which copies records out and releases
//! each shard immediately; broadcasting to a snapshot never holds up joins
//! or leaves.
//!
//! A second map indexes members by audio address so the relay can resolve
//! a datagram's sender without scanning. It is only written while the
//! member's own entry is locked (or right after it is removed), which keeps
//! the two maps in step. Lock order is always members → index.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pocket_protocol::ParticipantId;

use crate::{Participant, SessionError};

/// Concurrent table of current session members.
#[derive(Debug)]
pub struct Registry {
    members: DashMap<ParticipantId, Participant>,
    audio_index: DashMap<SocketAddr, ParticipantId>,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry. The first id handed out is `P-1`.
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            audio_index: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out a fresh id. Ids are never reused, even after removal.
    pub fn next_id(&self) -> ParticipantId {
        ParticipantId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts a participant iff its id is not registered yet.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyRegistered`] if the id is present.
    /// - [`SessionError::AddressInUse`] if the record carries an audio
    ///   address another member owns.
    pub fn add(&self, participant: Participant) -> Result<(), SessionError> {
        let id = participant.id;
        match self.members.entry(id) {
            Entry::Occupied(_) => Err(SessionError::AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                if let Some(addr) = participant.audio_addr {
                    self.claim_addr(id, addr)?;
                }
                slot.insert(participant);
                tracing::debug!(participant_id = %id, "participant registered");
                Ok(())
            }
        }
    }

    /// Removes a participant. `Some` means a record was present, which is
    /// what makes leave notifications fire exactly once.
    pub fn remove(&self, id: ParticipantId) -> Option<Participant> {
        let (_, participant) = self.members.remove(&id)?;
        if let Some(addr) = participant.audio_addr {
            self.audio_index.remove_if(&addr, |_, owner| *owner == id);
        }
        tracing::debug!(participant_id = %id, "participant removed");
        Some(participant)
    }

    /// Returns a copy of one participant's record.
    pub fn get(&self, id: ParticipantId) -> Option<Participant> {
        self.members.get(&id).map(|entry| entry.value().clone())
    }

    /// Copies out every current member, ordered by id.
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut members: Vec<Participant> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by_key(|p| p.id);
        members
    }

    /// Number of current members.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sets (or replaces) where a participant receives audio.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if the participant isn't registered.
    /// - [`SessionError::AddressInUse`] if another member owns `addr`.
    pub fn set_audio_addr(
        &self,
        id: ParticipantId,
        addr: SocketAddr,
    ) -> Result<(), SessionError> {
        let mut entry = self
            .members
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;

        self.claim_addr(id, addr)?;

        if let Some(old) = entry.audio_addr.replace(addr) {
            if old != addr {
                self.audio_index.remove_if(&old, |_, owner| *owner == id);
            }
        }
        tracing::debug!(participant_id = %id, %addr, "audio address set");
        Ok(())
    }

    /// Resolves a datagram source address to the member that owns it.
    pub fn find_by_audio_addr(&self, addr: SocketAddr) -> Option<Participant> {
        let id = *self.audio_index.get(&addr)?;
        self.get(id)
    }

    fn claim_addr(
        &self,
        id: ParticipantId,
        addr: SocketAddr,
    ) -> Result<(), SessionError> {
        match self.audio_index.entry(addr) {
            Entry::Occupied(owner) if *owner.get() != id => {
                Err(SessionError::AddressInUse(addr))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::ControlLink;

    fn member(registry: &Registry, name: &str) -> Participant {
        let (link, _rx) = ControlLink::new(CancellationToken::new());
        Participant::new(registry.next_id(), name, link)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    // =====================================================================
    // next_id()
    // =====================================================================

    #[test]
    fn test_next_id_never_repeats_after_removal() {
        let registry = Registry::new();
        let mut seen = HashSet::new();

        for _ in 0..50 {
            let p = member(&registry, "x");
            let id = p.id;
            registry.add(p).unwrap();
            registry.remove(id).unwrap();
            assert!(seen.insert(id), "id {id} was handed out twice");
        }
    }

    #[test]
    fn test_next_id_unique_across_threads() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..200).map(|_| registry.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 1600);
    }

    // =====================================================================
    // add() / remove() / get() / count()
    // =====================================================================

    #[test]
    fn test_add_then_get_returns_record() {
        let registry = Registry::new();
        let p = member(&registry, "Alice");
        let id = p.id;

        registry.add(p).unwrap();

        let got = registry.get(id).expect("should be registered");
        assert_eq!(got.display_name, "Alice");
        assert_eq!(got.audio_addr, None);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_add_duplicate_id_returns_error() {
        let registry = Registry::new();
        let p = member(&registry, "Alice");
        let dup = p.clone();
        registry.add(p).unwrap();

        let result = registry.add(dup);

        assert!(matches!(result, Err(SessionError::AlreadyRegistered(_))));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_remove_signals_presence_once() {
        let registry = Registry::new();
        let p = member(&registry, "Alice");
        let id = p.id;
        registry.add(p).unwrap();

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none(), "second remove must be a no-op");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let registry = Registry::new();
        assert!(registry.get(ParticipantId(99)).is_none());
    }

    // =====================================================================
    // snapshot()
    // =====================================================================

    #[test]
    fn test_snapshot_is_ordered_and_detached() {
        let registry = Registry::new();
        let a = member(&registry, "A");
        let b = member(&registry, "B");
        let (a_id, b_id) = (a.id, b.id);
        registry.add(b).unwrap();
        registry.add(a).unwrap();

        let snap = registry.snapshot();
        registry.remove(a_id);

        // The snapshot keeps what was there when it was taken.
        let ids: Vec<_> = snap.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a_id, b_id]);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_snapshot_while_mutating_from_other_threads() {
        let registry = Arc::new(Registry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let p = member(&registry, "w");
                    let id = p.id;
                    registry.add(p).unwrap();
                    registry.remove(id);
                }
            })
        };

        for _ in 0..500 {
            for p in registry.snapshot() {
                assert_eq!(p.display_name, "w");
            }
        }
        writer.join().unwrap();
        assert!(registry.is_empty());
    }

    // =====================================================================
    // set_audio_addr() / find_by_audio_addr()
    // =====================================================================

    #[test]
    fn test_set_audio_addr_then_find_resolves_member() {
        let registry = Registry::new();
        let p = member(&registry, "Alice");
        let id = p.id;
        registry.add(p).unwrap();

        registry.set_audio_addr(id, addr(5000)).unwrap();

        let found = registry.find_by_audio_addr(addr(5000)).expect("resolved");
        assert_eq!(found.id, id);
        assert_eq!(found.audio_addr, Some(addr(5000)));
        assert!(registry.find_by_audio_addr(addr(5001)).is_none());
    }

    #[test]
    fn test_set_audio_addr_unknown_returns_not_found() {
        let registry = Registry::new();
        let result = registry.set_audio_addr(ParticipantId(5), addr(5000));
        assert!(matches!(result, Err(SessionError::NotFound(ParticipantId(5)))));
        assert!(registry.find_by_audio_addr(addr(5000)).is_none());
    }

    #[test]
    fn test_set_audio_addr_taken_by_other_returns_in_use() {
        let registry = Registry::new();
        let a = member(&registry, "A");
        let b = member(&registry, "B");
        let (a_id, b_id) = (a.id, b.id);
        registry.add(a).unwrap();
        registry.add(b).unwrap();
        registry.set_audio_addr(a_id, addr(5000)).unwrap();

        let result = registry.set_audio_addr(b_id, addr(5000));

        assert!(matches!(result, Err(SessionError::AddressInUse(_))));
        assert_eq!(registry.find_by_audio_addr(addr(5000)).unwrap().id, a_id);
        assert_eq!(registry.get(b_id).unwrap().audio_addr, None);
    }

    #[test]
    fn test_set_audio_addr_replacement_frees_old_address() {
        let registry = Registry::new();
        let p = member(&registry, "A");
        let id = p.id;
        registry.add(p).unwrap();
        registry.set_audio_addr(id, addr(5000)).unwrap();

        registry.set_audio_addr(id, addr(6000)).unwrap();

        assert!(registry.find_by_audio_addr(addr(5000)).is_none());
        assert_eq!(registry.find_by_audio_addr(addr(6000)).unwrap().id, id);
    }

    #[test]
    fn test_set_audio_addr_same_address_twice_is_ok() {
        let registry = Registry::new();
        let p = member(&registry, "A");
        let id = p.id;
        registry.add(p).unwrap();

        registry.set_audio_addr(id, addr(5000)).unwrap();
        registry.set_audio_addr(id, addr(5000)).unwrap();

        assert_eq!(registry.find_by_audio_addr(addr(5000)).unwrap().id, id);
    }

    #[test]
    fn test_remove_frees_audio_address() {
        let registry = Registry::new();
        let a = member(&registry, "A");
        let b = member(&registry, "B");
        let (a_id, b_id) = (a.id, b.id);
        registry.add(a).unwrap();
        registry.add(b).unwrap();
        registry.set_audio_addr(a_id, addr(5000)).unwrap();

        registry.remove(a_id);

        assert!(registry.find_by_audio_addr(addr(5000)).is_none());
        // The address can now be claimed by someone else.
        registry.set_audio_addr(b_id, addr(5000)).unwrap();
        assert_eq!(registry.find_by_audio_addr(addr(5000)).unwrap().id, b_id);
    }

    #[test]
    fn test_add_with_audio_addr_indexes_it() {
        let registry = Registry::new();
        let mut p = member(&registry, "A");
        p.audio_addr = Some(addr(7000));
        let id = p.id;

        registry.add(p).unwrap();

        assert_eq!(registry.find_by_audio_addr(addr(7000)).unwrap().id, id);
    }
}
