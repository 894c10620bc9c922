use std::collections::{HashMap, HashSet};

use super::worker::WorkerHandle;
use crate::model::EntityPair;

/// Running workers keyed by the entity pair each one owns. At most one worker per pair.
///
/// Workers cancelled by reconciliation stay tracked as stopping until their task ends, since an
/// in-flight aggregation still commits. A pair must not be started again while its previous
/// worker is stopping.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<EntityPair, WorkerHandle>,
    stopping: HashMap<EntityPair, WorkerHandle>,
    closed: bool,
}

impl WorkerRegistry {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, pair: &EntityPair) -> bool {
        self.workers.contains_key(pair)
    }

    pub fn pairs(&self) -> HashSet<EntityPair> {
        self.workers.keys().cloned().collect()
    }

    pub fn nr_stopping(&self) -> usize {
        self.stopping.len()
    }

    /// Once closed, the registry belongs to shutdown and no more workers may be registered.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Registers the handle unless a worker for the pair is already running or stopping, or the
    /// registry is closed. A rejected handle is returned to the caller.
    pub fn register(&mut self, handle: WorkerHandle) -> Result<(), WorkerHandle> {
        if self.closed || self.contains(handle.pair()) || self.stopping.contains_key(handle.pair()) {
            return Err(handle);
        }

        self.workers.insert(handle.pair().clone(), handle);
        Ok(())
    }

    /// Drops handles whose worker task has already ended, so the pair can be started again.
    /// Returns the running pairs whose worker ended without being cancelled.
    pub fn remove_finished(&mut self) -> Vec<EntityPair> {
        self.stopping.retain(|_, handle| !handle.is_finished());

        let finished: Vec<_> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(pair, _)| pair.clone())
            .collect();

        for pair in finished.iter() {
            self.workers.remove(pair);
        }
        finished
    }

    /// Cancels the pair's worker and keeps its handle as stopping.
    pub fn retire(&mut self, pair: &EntityPair) -> bool {
        match self.workers.remove(pair) {
            Some(handle) => {
                handle.cancel();
                self.stopping.insert(pair.clone(), handle);
                true
            },
            None => false,
        }
    }

    /// Takes the handle of a worker still stopping for the pair, so the caller can wait for it.
    pub fn take_stopping(&mut self, pair: &EntityPair) -> Option<WorkerHandle> {
        self.stopping.remove(pair)
    }

    /// Closes the registry and hands back every running and stopping worker.
    pub fn close(&mut self) -> Vec<WorkerHandle> {
        self.closed = true;
        self.workers
            .drain()
            .chain(self.stopping.drain())
            .map(|(_, handle)| handle)
            .collect()
    }
}
