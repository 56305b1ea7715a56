use super::RenewalRequest;
use crate::VaultError;
use std::collections::HashMap;
use tokio::time::Instant;

pub(crate) struct HeapEntry {
    pub(crate) request: RenewalRequest,
    /// `None` means nothing is scheduled; such entries sort after everything else.
    pub(crate) next: Option<Instant>,
}

/// Binary min-heap over renewal entries, indexed by id.
///
/// `positions[id]` is always the index of that id's entry in `entries`, which
/// lets `update` and `remove` fix a single entry in O(log n).
#[derive(Default)]
pub(crate) struct RenewalHeap {
    entries: Vec<HeapEntry>,
    positions: HashMap<String, usize>,
}

fn earlier(a: Option<Instant>, b: Option<Instant>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

impl RenewalHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&HeapEntry> {
        self.positions.get(id).map(|&pos| &self.entries[pos])
    }

    /// Mutable access to a tracked request; the schedule key stays untouched.
    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut RenewalRequest> {
        let pos = *self.positions.get(id)?;
        Some(&mut self.entries[pos].request)
    }

    pub(crate) fn peek(&self) -> Option<&HeapEntry> {
        self.entries.first()
    }

    pub(crate) fn push(
        &mut self,
        request: RenewalRequest,
        next: Option<Instant>,
    ) -> Result<(), VaultError> {
        if self.positions.contains_key(&request.id) {
            return Err(VaultError::AlreadyTracked { id: request.log_id() });
        }

        let pos = self.entries.len();
        self.positions.insert(request.id.clone(), pos);
        self.entries.push(HeapEntry { request, next });
        self.sift_up(pos);
        Ok(())
    }

    pub(crate) fn update(
        &mut self,
        request: RenewalRequest,
        next: Option<Instant>,
    ) -> Result<(), VaultError> {
        let Some(&pos) = self.positions.get(&request.id) else {
            return Err(VaultError::NotTracked { id: request.log_id() });
        };

        self.entries[pos] = HeapEntry { request, next };
        self.fix(pos);
        Ok(())
    }

    /// Move an entry to a new instant, keeping its current request.
    pub(crate) fn reschedule(&mut self, id: &str, next: Option<Instant>) -> Result<(), VaultError> {
        let Some(&pos) = self.positions.get(id) else {
            return Err(VaultError::NotTracked { id: id.to_string() });
        };

        self.entries[pos].next = next;
        self.fix(pos);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &str) -> Result<RenewalRequest, VaultError> {
        let Some(&pos) = self.positions.get(id) else {
            return Err(VaultError::NotTracked { id: id.to_string() });
        };

        let last = self.entries.len() - 1;
        if pos != last {
            self.swap(pos, last);
        }
        let removed = self.entries.pop().map(|entry| entry.request);
        self.positions.remove(id);
        if pos < self.entries.len() {
            self.fix(pos);
        }

        removed.ok_or_else(|| VaultError::NotTracked { id: id.to_string() })
    }

    fn less(&self, i: usize, j: usize) -> bool {
        earlier(self.entries[i].next, self.entries[j].next)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        if let Some(p) = self.positions.get_mut(&self.entries[i].request.id) {
            *p = i;
        }
        if let Some(p) = self.positions.get_mut(&self.entries[j].request.id) {
            *p = j;
        }
    }

    fn fix(&mut self, pos: usize) {
        if !self.sift_down(pos) {
            self.sift_up(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    /// Returns whether the entry moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.entries.len();
        let mut pos = start;
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, pos) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
        pos > start
    }
}
