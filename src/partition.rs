//! Equivalence partitioning of records.
//!
//! Each record is bucketed under the first key spec, in priority order, for
//! which it has a usable key. Records sharing the same `(spec, key)` pair form
//! one class; records without any usable key are singletons. Classes come out
//! in first-seen order and members keep input order, so the result is a pure
//! function of the input sequence.

use std::collections::HashMap;
use std::thread;

use crate::key::{ClassKey, KeySpecList, Placeholders};
use crate::record::Record;
use crate::field::RecordKind;

/// One equivalence class: indices into the partitioned slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClass {
    /// The key that grouped the class, `None` for keyless singletons.
    pub key: Option<ClassKey>,
    /// Member indices, ascending.
    pub members: Vec<usize>,
}

impl EquivalenceClass {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Index of the first member by input order.
    #[must_use]
    pub fn representative(&self) -> Option<usize> {
        self.members.first().copied()
    }
}

/// Partitions records into equivalence classes under a key spec list.
#[derive(Debug, Clone)]
pub struct EquivalencePartitioner {
    specs: KeySpecList,
    placeholders: Placeholders,
}

impl EquivalencePartitioner {
    #[must_use]
    pub fn new(specs: KeySpecList) -> Self {
        Self {
            specs,
            placeholders: Placeholders::default(),
        }
    }

    /// Partitioner over the default matching rules for `kind`.
    #[must_use]
    pub fn default_for(kind: RecordKind) -> Self {
        Self::new(KeySpecList::default_for(kind))
    }

    #[must_use]
    pub fn with_placeholders(mut self, placeholders: Placeholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    #[must_use]
    pub fn specs(&self) -> &KeySpecList {
        &self.specs
    }

    #[must_use]
    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    /// Bucketing key for one record.
    #[must_use]
    pub fn key_for(&self, record: &Record) -> Option<ClassKey> {
        self.specs.first_key(record, &self.placeholders)
    }

    /// Partitions `records` sequentially.
    #[must_use]
    pub fn partition(&self, records: &[Record]) -> Vec<EquivalenceClass> {
        let keys: Vec<Option<ClassKey>> = records.iter().map(|r| self.key_for(r)).collect();
        bucket(keys)
    }

    /// Same result as [`partition`](Self::partition); keys are computed on
    /// up to `workers` scoped threads and bucketed in input order.
    #[must_use]
    pub fn partition_parallel(&self, records: &[Record], workers: usize) -> Vec<EquivalenceClass> {
        let workers = workers.max(1);
        if workers == 1 || records.len() < workers * 2 {
            return self.partition(records);
        }

        let chunk_size = records.len().div_ceil(workers);
        let keys: Vec<Option<ClassKey>> = thread::scope(|scope| {
            let handles: Vec<_> = records
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk.iter().map(|r| self.key_for(r)).collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut keys = Vec::with_capacity(records.len());
            for handle in handles {
                match handle.join() {
                    Ok(part) => keys.extend(part),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            keys
        });
        bucket(keys)
    }
}

fn bucket(keys: Vec<Option<ClassKey>>) -> Vec<EquivalenceClass> {
    let mut classes: Vec<EquivalenceClass> = Vec::new();
    let mut by_key: HashMap<ClassKey, usize> = HashMap::new();

    for (idx, key) in keys.into_iter().enumerate() {
        match key {
            Some(key) => {
                if let Some(&class_idx) = by_key.get(&key) {
                    classes[class_idx].members.push(idx);
                } else {
                    by_key.insert(key.clone(), classes.len());
                    classes.push(EquivalenceClass {
                        key: Some(key),
                        members: vec![idx],
                    });
                }
            }
            None => classes.push(EquivalenceClass {
                key: None,
                members: vec![idx],
            }),
        }
    }

    classes
}
