//! In-memory correlation store for call sessions.
//!
//! The store maps a call id to its [`CallSession`]. Each entry sits behind its
//! own mutex so callbacks for different calls never contend, while callbacks
//! for the same call apply their events one at a time through
//! [`CallSession::apply`].
//!
//! Lock order is always map, then entry. No lock is held across an `.await`:
//! every operation here is a short synchronous critical section, which is why
//! `std::sync` locks are used instead of `tokio::sync` ones.
//!
//! Entries expire a fixed TTL after creation. Expiry is checked lazily on every
//! access and eagerly by [`CallStore::sweep`], which the background task calls.
//! A delivered session keeps its slot until it expires, so a late or retried
//! callback for the same call is refused instead of starting the call over.

use callrelay_types::{
    CallEvent, CallSession, CallStatus, FailureStage, ReplyRecord, TransitionError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Attempts `apply_or_create` makes when its entry is superseded mid-flight.
const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No session holds the call id (never created, deleted, superseded, or
    /// expired).
    #[error("no active session for call {0}")]
    NotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Outcome of asking the store for a reply to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPoll {
    /// The reply was ready; the session is now delivered.
    Ready(ReplyRecord),
    /// The session exists but has not reached `READY_TO_SPEAK`.
    Pending(CallStatus),
    /// Processing failed at the given stage.
    Failed(Option<FailureStage>),
    /// No live session for this call.
    Missing,
}

#[derive(Debug)]
enum Held {
    Live(CallSession),
    /// Reply handed out. Every event is refused until the entry expires.
    Delivered(CallSession),
    /// Deleted, superseded or expired. Anyone still holding the `Arc` sees
    /// the call as gone.
    Vacant,
}

#[derive(Debug)]
struct Entry {
    held: Held,
    expires_at: Instant,
}

impl Entry {
    fn expire(&mut self, now: Instant) {
        if now < self.expires_at {
            return;
        }
        match std::mem::replace(&mut self.held, Held::Vacant) {
            Held::Live(expired) => tracing::info!(
                call_id = %expired.call_id,
                status = %expired.status(),
                "call session expired"
            ),
            Held::Delivered(_) | Held::Vacant => {}
        }
    }

    /// The session callbacks may still advance.
    fn live_session(&mut self, now: Instant) -> Option<&mut CallSession> {
        self.expire(now);
        match &mut self.held {
            Held::Live(session) => Some(session),
            _ => None,
        }
    }

    /// The session occupying the call id, live or delivered.
    fn held_session(&mut self, now: Instant) -> Option<&mut CallSession> {
        self.expire(now);
        match &mut self.held {
            Held::Live(session) | Held::Delivered(session) => Some(session),
            Held::Vacant => None,
        }
    }

    fn is_vacant(&self) -> bool {
        matches!(self.held, Held::Vacant)
    }

    fn retire(&mut self) {
        if let Held::Live(session) = std::mem::replace(&mut self.held, Held::Vacant) {
            self.held = Held::Delivered(session);
        }
    }
}

type Slot = Arc<Mutex<Entry>>;

/// Concurrency-safe map of call id → session with per-entry expiry.
#[derive(Clone, Debug)]
pub struct CallStore {
    entries: Arc<RwLock<HashMap<String, Slot>>>,
    ttl: Duration,
}

impl CallStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `session`, superseding any session already held for its call,
    /// delivered ones included.
    ///
    /// Returns the status of the superseded session, if one was live.
    pub fn put(&self, session: CallSession) -> Option<CallStatus> {
        let call_id = session.call_id.clone();
        let fresh = self.new_slot(session);

        let mut entries = self.write_entries();
        let previous = entries.insert(call_id, fresh)?;
        let mut old = lock_entry(&previous);
        let superseded = old.live_session(Instant::now()).map(|s| s.status());
        old.held = Held::Vacant;
        superseded
    }

    /// Returns a snapshot of the live session for `call_id`.
    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        let slot = self.slot(call_id)?;
        let mut entry = lock_entry(&slot);
        let snapshot = entry.live_session(Instant::now()).map(|s| s.clone());
        let vacant = entry.is_vacant();
        drop(entry);
        if vacant {
            self.remove_if_same(call_id, &slot);
        }
        snapshot
    }

    /// Removes the session for `call_id`. Returns `true` if a live one existed.
    pub fn delete(&self, call_id: &str) -> bool {
        let removed = self.write_entries().remove(call_id);
        match removed {
            Some(slot) => {
                let mut entry = lock_entry(&slot);
                let was_live = entry.live_session(Instant::now()).is_some();
                entry.held = Held::Vacant;
                was_live
            }
            None => false,
        }
    }

    /// Applies `event` to the session for `call_id`.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when no session holds the call id,
    /// `StoreError::Transition` when the session rejects the event (a
    /// delivered session rejects all of them).
    pub fn apply(&self, call_id: &str, event: CallEvent) -> Result<CallSession, StoreError> {
        let slot = self
            .slot(call_id)
            .ok_or_else(|| StoreError::NotFound(call_id.to_string()))?;
        let mut entry = lock_entry(&slot);
        let result = entry
            .held_session(Instant::now())
            .map(|session| session.apply(event).map(|_| session.clone()));
        drop(entry);
        match result {
            Some(applied) => Ok(applied?),
            None => {
                self.remove_if_same(call_id, &slot);
                Err(StoreError::NotFound(call_id.to_string()))
            }
        }
    }

    /// Like [`apply`](Self::apply), but first creates an `AWAITING_RECORDING`
    /// session when the call has none.
    ///
    /// Used by callbacks that may be the first to mention a call. A call whose
    /// reply was already delivered is not recreated.
    ///
    /// # Errors
    ///
    /// `StoreError::Transition` when the session rejects the event, or
    /// `StoreError::NotFound` if the entry kept being superseded.
    pub fn apply_or_create(
        &self,
        call_id: &str,
        caller_number: &str,
        event: CallEvent,
    ) -> Result<CallSession, StoreError> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let slot = self.slot_or_insert(call_id, caller_number);
            let mut entry = lock_entry(&slot);
            if let Some(session) = entry.held_session(Instant::now()) {
                session.apply(event)?;
                return Ok(session.clone());
            }
            // Superseded or expired between lookup and lock; start over.
        }
        Err(StoreError::NotFound(call_id.to_string()))
    }

    /// Takes the reply for `call_id` if it is ready to speak.
    ///
    /// A ready session is marked delivered in the same critical section, so
    /// each reply is handed out exactly once.
    pub fn take_reply(&self, call_id: &str) -> ReplyPoll {
        let Some(slot) = self.slot(call_id) else {
            return ReplyPoll::Missing;
        };

        let (poll, vacant) = {
            let mut entry = lock_entry(&slot);
            let poll = match entry.live_session(Instant::now()) {
                None => ReplyPoll::Missing,
                Some(session) => match session.status() {
                    CallStatus::ReadyToSpeak => deliver(session),
                    CallStatus::Failed => ReplyPoll::Failed(session.failure()),
                    other => ReplyPoll::Pending(other),
                },
            };
            if matches!(poll, ReplyPoll::Ready(_)) {
                entry.retire();
            }
            (poll, entry.is_vacant())
        };

        if vacant {
            self.remove_if_same(call_id, &slot);
        }
        poll
    }

    /// Returns the ready reply for `call_id` without delivering it.
    pub fn peek_reply(&self, call_id: &str) -> Option<ReplyRecord> {
        let slot = self.slot(call_id)?;
        let mut entry = lock_entry(&slot);
        let session = entry.live_session(Instant::now())?;
        let reply = session.ready_reply()?.to_string();
        Some(record(session, reply))
    }

    /// Evicts expired and orphaned entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, slot| lock_entry(slot).held_session(now).is_some());
        before - entries.len()
    }

    /// Number of entries currently held, including delivered ones and any not
    /// yet swept.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn new_slot(&self, session: CallSession) -> Slot {
        Arc::new(Mutex::new(Entry {
            held: Held::Live(session),
            expires_at: Instant::now() + self.ttl,
        }))
    }

    fn slot(&self, call_id: &str) -> Option<Slot> {
        self.read_entries().get(call_id).cloned()
    }

    fn slot_or_insert(&self, call_id: &str, caller_number: &str) -> Slot {
        if let Some(slot) = self.slot(call_id) {
            if lock_entry(&slot).held_session(Instant::now()).is_some() {
                return slot;
            }
        }

        let mut entries = self.write_entries();
        if let Some(existing) = entries.get(call_id) {
            if lock_entry(existing).held_session(Instant::now()).is_some() {
                return existing.clone();
            }
        }
        tracing::debug!(call_id, "creating call session from callback");
        let fresh = self.new_slot(CallSession::new(call_id, caller_number));
        entries.insert(call_id.to_string(), fresh.clone());
        fresh
    }

    /// Removes `call_id` only if it still maps to `slot`; a newer session put
    /// under the same id in the meantime is left alone.
    fn remove_if_same(&self, call_id: &str, slot: &Slot) {
        let mut entries = self.write_entries();
        if entries
            .get(call_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            entries.remove(call_id);
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::error!("call store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::error!("call store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn lock_entry(slot: &Slot) -> MutexGuard<'_, Entry> {
    slot.lock().unwrap_or_else(|poisoned| {
        tracing::error!("call session lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn deliver(session: &mut CallSession) -> ReplyPoll {
    let Some(reply) = session.ready_reply().map(str::to_string) else {
        return ReplyPoll::Pending(session.status());
    };
    if let Err(e) = session.apply(CallEvent::Delivered) {
        tracing::error!(error = %e, "ready session refused delivery");
        return ReplyPoll::Pending(session.status());
    }
    ReplyPoll::Ready(record(session, reply))
}

fn record(session: &CallSession, reply: String) -> ReplyRecord {
    ReplyRecord {
        call_id: session.call_id.clone(),
        caller_number: session.caller_number.clone(),
        reply,
        turn: session.turn,
    }
}
