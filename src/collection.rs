use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::message::{MessageRecord, MessageRef};
use crate::pipeline::Trigger;
use crate::sort::OrderingPolicy;

/// Result of a bulk removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removal {
    pub removed: usize,
    /// How many of the removed records were selected.
    pub selected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Insertion {
    pub inserted: usize,
    /// Batch entries whose reference was already present.
    pub refreshed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rename {
    Renamed,
    Missing,
    /// The new uid already names another record in this folder.
    Taken,
}

struct Inner {
    records: Vec<MessageRecord>,
    policy: OrderingPolicy,
}

/// The message records of one view, kept in comparator order.
///
/// Cloning gives another handle to the same records. Every operation holds
/// the lock only for the in-memory work; inserts, removals and resorts then
/// fire the regrouping trigger.
#[derive(Clone)]
pub struct SortedCollection {
    inner: Arc<Mutex<Inner>>,
    trigger: Trigger,
}

impl Default for SortedCollection {
    fn default() -> Self {
        Self::new(OrderingPolicy::default())
    }
}

impl SortedCollection {
    pub fn new(policy: OrderingPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: Vec::new(),
                policy,
            })),
            trigger: Trigger::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep the collection locked until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.lock()
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.lock().policy
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn contains(&self, reference: &MessageRef) -> bool {
        self.lock()
            .records
            .iter()
            .any(|r| r.reference() == reference)
    }

    /// Consistent copy of the records in their current order.
    pub fn snapshot(&self) -> Vec<MessageRecord> {
        self.lock().records.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().records.iter().filter(|r| r.is_unread()).count()
    }

    /// Binary-search insert of a batch. A reference that is already present
    /// is refreshed in place instead, keeping its selection, and the records
    /// are re-sorted before the lock is released.
    pub fn insert_all(&self, records: Vec<MessageRecord>) -> Insertion {
        let insertion = {
            let mut inner = self.lock();
            let policy = inner.policy;
            let mut known: HashSet<MessageRef> =
                inner.records.iter().map(|r| r.reference().clone()).collect();
            let mut insertion = Insertion::default();
            for record in records {
                if !known.insert(record.reference().clone()) {
                    if let Some(existing) = inner
                        .records
                        .iter_mut()
                        .find(|r| r.reference() == record.reference())
                    {
                        let selected = existing.selected;
                        *existing = record;
                        existing.selected = selected;
                        insertion.refreshed += 1;
                    }
                    continue;
                }
                let idx = inner
                    .records
                    .partition_point(|r| policy.compare(r, &record) != Ordering::Greater);
                inner.records.insert(idx, record);
                insertion.inserted += 1;
            }
            if insertion.refreshed > 0 {
                inner.records.sort_by(|a, b| policy.compare(a, b));
            }
            insertion
        };
        if insertion.inserted > 0 || insertion.refreshed > 0 {
            self.trigger.fire();
        }
        insertion
    }

    pub fn remove_all(&self, references: &[MessageRef]) -> Removal {
        let removal = {
            let doomed: HashSet<&MessageRef> = references.iter().collect();
            let mut inner = self.lock();
            let mut removal = Removal::default();
            inner.records.retain(|r| {
                if doomed.contains(r.reference()) {
                    removal.removed += 1;
                    if r.selected {
                        removal.selected += 1;
                    }
                    false
                } else {
                    true
                }
            });
            removal
        };
        if removal.removed > 0 {
            self.trigger.fire();
        }
        removal
    }

    pub fn clear(&self) {
        self.lock().records.clear();
        self.trigger.fire();
    }

    /// Adopt `policy` and re-sort everything under it.
    pub fn resort(&self, policy: OrderingPolicy) {
        {
            let mut inner = self.lock();
            inner.policy = policy;
            inner.records.sort_by(|a, b| policy.compare(a, b));
        }
        self.trigger.fire();
    }

    pub fn resort_current(&self) {
        let policy = self.policy();
        self.resort(policy);
    }

    /// Apply `f` to the record with this reference. Does not reorder.
    pub fn update<F>(&self, reference: &MessageRef, f: F) -> bool
    where
        F: FnOnce(&mut MessageRecord),
    {
        let mut inner = self.lock();
        match inner.records.iter_mut().find(|r| r.reference() == reference) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// In-place uid change. Position and selection are kept. Refused when
    /// the new reference is already in the collection.
    pub fn rename_uid(&self, reference: &MessageRef, new_uid: &str) -> Rename {
        let renamed = {
            let mut inner = self.lock();
            let target = MessageRef::new(&reference.account, &reference.folder, new_uid);
            if inner.records.iter().any(|r| r.reference() == &target) {
                return Rename::Taken;
            }
            match inner.records.iter_mut().find(|r| r.reference() == reference) {
                Some(record) => {
                    record.rename_uid(new_uid.to_string());
                    true
                }
                None => false,
            }
        };
        if renamed {
            self.trigger.fire();
            Rename::Renamed
        } else {
            Rename::Missing
        }
    }

    /// Returns how many records actually changed state.
    pub fn set_selected(&self, references: &[MessageRef], selected: bool) -> usize {
        let targets: HashSet<&MessageRef> = references.iter().collect();
        let mut inner = self.lock();
        let mut changed = 0;
        for record in inner.records.iter_mut() {
            if record.selected != selected && targets.contains(record.reference()) {
                record.selected = selected;
                changed += 1;
            }
        }
        changed
    }

    /// Returns the number of selected records afterwards.
    pub fn set_all_selected(&self, selected: bool) -> usize {
        let mut inner = self.lock();
        for record in inner.records.iter_mut() {
            record.selected = selected;
        }
        if selected {
            inner.records.len()
        } else {
            0
        }
    }

    pub fn selected_refs(&self) -> Vec<MessageRef> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.selected)
            .map(|r| r.reference().clone())
            .collect()
    }

    pub fn any_selected(&self, pred: impl Fn(&MessageRecord) -> bool) -> bool {
        self.lock().records.iter().any(|r| r.selected && pred(r))
    }

    /// Apply `f` to every selected record and return their references.
    pub fn update_selected(&self, f: impl Fn(&mut MessageRecord)) -> Vec<MessageRef> {
        let mut inner = self.lock();
        let mut touched = Vec::new();
        for record in inner.records.iter_mut().filter(|r| r.selected) {
            f(record);
            touched.push(record.reference().clone());
        }
        touched
    }
}
