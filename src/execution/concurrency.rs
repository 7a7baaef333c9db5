//! Concurrency groups - at most one run per key, newest wins

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Ticket queue of one group; runs are admitted strictly in ticket order
#[derive(Default)]
struct GroupQueue {
    state: Mutex<QueueState>,
    turn: Notify,
}

#[derive(Default)]
struct QueueState {
    next_ticket: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
}

impl GroupQueue {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self) -> u64 {
        let mut state = self.state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    /// Give up `ticket`, whether it was admitted or is still waiting
    fn finish(&self, ticket: u64) {
        let mut state = self.state();
        if ticket != state.serving {
            state.abandoned.insert(ticket);
            return;
        }
        state.serving += 1;
        loop {
            let serving = state.serving;
            if !state.abandoned.remove(&serving) {
                break;
            }
            state.serving += 1;
        }
        drop(state);
        self.turn.notify_waiters();
    }
}

/// Place in a group queue; leaves the queue when dropped
struct Ticket {
    queue: Arc<GroupQueue>,
    number: u64,
}

impl Ticket {
    async fn admitted(&self) {
        loop {
            // Register before checking so a release in between is not missed
            let turn = self.queue.turn.notified();
            if self.queue.state().serving == self.number {
                return;
            }
            turn.await;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.queue.finish(self.number);
    }
}

struct Slot {
    queue: Arc<GroupQueue>,

    /// Most recent run to join the group
    latest: Option<(Uuid, CancellationToken)>,
}

/// Keyed registry of in-flight runs
#[derive(Clone, Default)]
pub struct ConcurrencyRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl ConcurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the group `key` as run `run_id`
    ///
    /// The run's place in the queue is fixed here, so runs execute in the
    /// order they joined no matter when they start waiting. With
    /// `cancel_in_progress`, the previous latest run of the group has its
    /// token cancelled before this returns. The returned entry must be awaited
    /// with [`GroupEntry::wait`] before the run may execute.
    pub fn enter(
        &self,
        key: &str,
        run_id: Uuid,
        token: CancellationToken,
        cancel_in_progress: bool,
    ) -> GroupEntry {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            queue: Arc::new(GroupQueue::default()),
            latest: None,
        });

        let mut superseded = None;
        if let Some((previous, previous_token)) = slot.latest.take() {
            if cancel_in_progress {
                info!("Run {} supersedes run {} in group '{}'", run_id, previous, key);
                previous_token.cancel();
                superseded = Some(previous);
            } else {
                debug!("Run {} queued behind run {} in group '{}'", run_id, previous, key);
            }
        }
        slot.latest = Some((run_id, token));

        GroupEntry {
            ticket: Ticket {
                number: slot.queue.issue(),
                queue: Arc::clone(&slot.queue),
            },
            superseded,
            registration: Registration {
                registry: self.clone(),
                key: key.to_string(),
            },
        }
    }

    /// Run id of the most recent run in a group
    pub fn latest(&self, key: &str) -> Option<Uuid> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(key)
            .and_then(|slot| slot.latest.as_ref().map(|(id, _)| *id))
    }

    /// Number of groups with a run queued or in flight
    pub fn active_groups(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.len()
    }

    fn leave(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Tickets hold the queue; the slot goes once no run holds one
        let idle = slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(&slot.queue) == 1);
        if idle {
            slots.remove(key);
        }
    }
}

/// Drops the group's slot once no run is left in it
struct Registration {
    registry: ConcurrencyRegistry,
    key: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.leave(&self.key);
    }
}

/// A run that joined a group but does not hold it yet
///
/// Field order matters: the ticket is released before the registration
/// checks whether the group is idle.
pub struct GroupEntry {
    ticket: Ticket,
    superseded: Option<Uuid>,
    registration: Registration,
}

impl GroupEntry {
    /// Run cancelled by joining, if any
    pub fn superseded(&self) -> Option<Uuid> {
        self.superseded
    }

    /// Wait until every run that joined the group earlier has finished
    pub async fn wait(self) -> RunPermit {
        self.ticket.admitted().await;
        RunPermit {
            _ticket: self.ticket,
            registration: self.registration,
        }
    }
}

/// Exclusive hold on a concurrency group
pub struct RunPermit {
    _ticket: Ticket,
    registration: Registration,
}

impl RunPermit {
    pub fn key(&self) -> &str {
        &self.registration.key
    }
}
