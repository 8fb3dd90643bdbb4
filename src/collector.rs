//! Ordered collection of per-request outcomes.
//!
//! Requests finish in any order; the collector puts each outcome in the slot of its input position
//! and hands back the full list once every slot is filled. Recording a position twice, or a
//! position outside the batch, is a bug in the caller and panics.

use crate::Outcome;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// Fail-fast: the batch was given up on and late outcomes are dropped.
    Abandoned,
    Collected,
}

struct Slots<T, E> {
    outcomes: Vec<Option<Outcome<T, E>>>,
    remaining: usize,
    phase: Phase,
}

/// Write-once result slots, one per batch position.
pub struct ResultCollector<T, E> {
    slots: Mutex<Slots<T, E>>,
    complete: Notify,
}

impl<T, E> std::fmt::Debug for ResultCollector<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        f.debug_struct("ResultCollector")
            .field("len", &slots.outcomes.len())
            .field("remaining", &slots.remaining)
            .finish()
    }
}

impl<T, E> ResultCollector<T, E> {
    /// Collector for a batch of `len` requests.
    pub fn new(len: usize) -> Self {
        let mut outcomes = Vec::with_capacity(len);
        outcomes.resize_with(len, || None);
        Self {
            slots: Mutex::new(Slots { outcomes, remaining: len, phase: Phase::Open }),
            complete: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T, E>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Batch size.
    pub fn len(&self) -> usize {
        self.lock().outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions still waiting for an outcome.
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    /// Store the outcome for `position`.
    ///
    /// # Panics
    ///
    /// If `position` is out of range or was already recorded.
    pub fn record(&self, position: usize, outcome: Outcome<T, E>) {
        let mut slots = self.lock();
        match slots.phase {
            Phase::Open => {}
            Phase::Abandoned => return,
            Phase::Collected => panic!("record({}) after the batch was collected", position),
        }
        let len = slots.outcomes.len();
        let slot = slots
            .outcomes
            .get_mut(position)
            .unwrap_or_else(|| panic!("position {} out of range for batch of {}", position, len));
        assert!(slot.is_none(), "position {} recorded twice", position);
        *slot = Some(outcome);
        slots.remaining -= 1;
        if slots.remaining == 0 {
            // stores a permit if nobody is waiting yet
            self.complete.notify_one();
        }
    }

    /// Remove a recorded outcome and abandon the batch: later records are dropped and the batch
    /// can no longer be awaited.
    pub fn take(&self, position: usize) -> Option<Outcome<T, E>> {
        let mut slots = self.lock();
        slots.phase = Phase::Abandoned;
        slots.outcomes.get_mut(position).and_then(Option::take)
    }

    /// Wait until every position is recorded, then return outcomes in input order.
    ///
    /// # Panics
    ///
    /// If called a second time, or after [`take`](Self::take).
    pub async fn await_all(&self) -> Vec<Outcome<T, E>> {
        while self.remaining() > 0 {
            self.complete.notified().await;
        }
        let mut slots = self.lock();
        assert_eq!(slots.phase, Phase::Open, "batch outcomes already collected");
        slots.phase = Phase::Collected;
        std::mem::take(&mut slots.outcomes)
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.unwrap_or_else(|| panic!("position {} was never recorded", position))
            })
            .collect()
    }
}
