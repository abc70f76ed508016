//! Primary-side bookkeeping for live workers

use super::WorkerId;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// What the primary knows about one worker
pub(super) struct Slot {
    /// Encoded lines bound for the worker's stdin; `None` once closed
    input: Option<mpsc::UnboundedSender<String>>,
    kill: Option<oneshot::Sender<()>>,
    /// `initialize_worker` succeeded; only initialized workers get work
    pub initialized: bool,
    /// Last reported busy state
    pub busy: bool,
    /// The last pull for this worker found nothing to do
    pub starved: bool,
    /// Messages sent that the worker has not reported `done` for
    pub outstanding: usize,
}

impl Slot {
    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }
}

#[derive(Default)]
pub(super) struct Pool {
    slots: BTreeMap<WorkerId, Slot>,
}

impl Pool {
    pub fn insert(
        &mut self,
        id: WorkerId,
        input: mpsc::UnboundedSender<String>,
        kill: oneshot::Sender<()>,
    ) {
        self.slots.insert(
            id,
            Slot {
                input: Some(input),
                kill: Some(kill),
                initialized: false,
                busy: false,
                starved: false,
                outstanding: 0,
            },
        );
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<Slot> {
        self.slots.remove(&id)
    }

    pub fn get(&self, id: WorkerId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut Slot> {
        self.slots.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.slots.keys().copied().collect()
    }

    /// Workers still accepting input
    pub fn open_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_open()).count()
    }

    /// Queues a line for a worker; returns false when its input is closed
    pub fn write_line(&mut self, id: WorkerId, line: String) -> bool {
        let Some(slot) = self.slots.get_mut(&id) else {
            return false;
        };
        let Some(input) = &slot.input else {
            return false;
        };

        if input.send(line).is_err() {
            slot.input = None;
            return false;
        }
        slot.outstanding += 1;
        true
    }

    /// The initialized, open worker with the least outstanding work
    ///
    /// Workers that are not busy are preferred over busy ones.
    pub fn least_loaded(&self) -> Option<WorkerId> {
        self.slots
            .iter()
            .filter(|(_, s)| s.initialized && s.is_open())
            .min_by_key(|(_, s)| (s.busy, s.outstanding))
            .map(|(id, _)| *id)
    }

    /// Initialized, open workers
    pub fn initialized_ids(&self) -> Vec<WorkerId> {
        self.slots
            .iter()
            .filter(|(_, s)| s.initialized && s.is_open())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Closes a worker's stdin so it drains and exits
    pub fn close_input(&mut self, id: WorkerId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.input = None;
        }
    }

    pub fn close_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.input = None;
        }
    }

    pub fn kill(&mut self, id: WorkerId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.input = None;
            if let Some(kill) = slot.kill.take() {
                let _ = kill.send(());
            }
        }
    }

    /// True when every worker is initialized, starved and has nothing outstanding
    pub fn is_idle(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .values()
                .all(|s| s.initialized && s.starved && s.outstanding == 0)
    }
}
