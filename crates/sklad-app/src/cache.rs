// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use time::OffsetDateTime;

use crate::error::RequestError;
use crate::model::{EntityKind, Page};
use crate::query::{QueryKey, QueryScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Invalidated(EntityKind),
}

/// Permission to fetch one key, stamped with the generation it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: QueryKey,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Superseded,
}

#[derive(Debug, Default)]
struct Entry {
    data: Option<Arc<Page>>,
    error: Option<RequestError>,
    generation: u64,
    fetching: bool,
    stale: bool,
    updated_at: Option<OffsetDateTime>,
}

/// Results of list and lookup fetches, keyed by query identity.
#[derive(Debug, Default)]
pub struct QueryStore {
    entries: HashMap<QueryKey, Entry>,
    subscribers: Vec<(EntityKind, Sender<CacheEvent>)>,
    /// Generations come from one counter so an evicted and re-created key never
    /// reuses a generation an outstanding ticket still carries.
    last_generation: u64,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn entry_mut(&mut self, key: &QueryKey) -> &mut Entry {
        if !self.entries.contains_key(key) {
            let generation = self.next_generation();
            self.entries.insert(
                key.clone(),
                Entry {
                    generation,
                    ..Entry::default()
                },
            );
        }
        self.entries.entry(key.clone()).or_default()
    }

    /// Hands out a ticket when the key needs a fetch and none is running.
    pub fn ensure(&mut self, key: &QueryKey) -> Option<FetchTicket> {
        let entry = self.entry_mut(key);
        let needs_fetch = (entry.data.is_none() && entry.error.is_none()) || entry.stale;
        if !needs_fetch || entry.fetching {
            return None;
        }
        entry.fetching = true;
        Some(FetchTicket {
            key: key.clone(),
            generation: entry.generation,
        })
    }

    /// Starts a fetch even when cached data is fresh or an error is recorded.
    pub fn refetch(&mut self, key: &QueryKey) -> Option<FetchTicket> {
        let entry = self.entry_mut(key);
        if entry.fetching {
            return None;
        }
        entry.stale = true;
        self.ensure(key)
    }

    pub fn resolve(
        &mut self,
        ticket: FetchTicket,
        result: Result<Page, RequestError>,
    ) -> Resolution {
        let Some(entry) = self.entries.get_mut(&ticket.key) else {
            tracing::debug!(entity = ?ticket.key.entity, "dropping result for evicted key");
            return Resolution::Superseded;
        };
        if entry.generation != ticket.generation {
            tracing::debug!(
                entity = ?ticket.key.entity,
                ticket = ticket.generation,
                current = entry.generation,
                "dropping superseded fetch result"
            );
            return Resolution::Superseded;
        }

        entry.fetching = false;
        entry.stale = false;
        match result {
            Ok(page) => {
                entry.data = Some(Arc::new(page));
                entry.error = None;
                entry.updated_at = Some(OffsetDateTime::now_utc());
            }
            Err(err) => {
                entry.error = Some(err);
            }
        }
        Resolution::Applied
    }

    /// Marks every cached result of `entity` stale and tells subscribers.
    pub fn invalidate(&mut self, entity: EntityKind) -> usize {
        let mut touched = 0;
        let mut generation = self.last_generation;
        for (key, entry) in &mut self.entries {
            if key.entity != entity {
                continue;
            }
            generation += 1;
            entry.generation = generation;
            entry.stale = true;
            entry.fetching = false;
            touched += 1;
        }
        self.last_generation = generation;
        self.subscribers.retain(|(subscribed, sender)| {
            *subscribed != entity || sender.send(CacheEvent::Invalidated(entity)).is_ok()
        });
        tracing::debug!(?entity, entries = touched, "invalidated cached queries");
        touched
    }

    pub fn subscribe(&mut self, entity: EntityKind) -> Receiver<CacheEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push((entity, tx));
        rx
    }

    pub fn get(&self, key: &QueryKey) -> Option<Arc<Page>> {
        self.entries.get(key).and_then(|entry| entry.data.clone())
    }

    pub fn error(&self, key: &QueryKey) -> Option<&RequestError> {
        self.entries.get(key).and_then(|entry| entry.error.as_ref())
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.fetching)
    }

    pub fn updated_at(&self, key: &QueryKey) -> Option<OffsetDateTime> {
        self.entries.get(key).and_then(|entry| entry.updated_at)
    }

    /// Drops cached pages of `entity` other than `keep`. Lookup collections stay.
    ///
    /// A result arriving later for a dropped key resolves as superseded.
    pub fn retain_pages(&mut self, entity: EntityKind, keep: &[&QueryKey]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            key.entity != entity || matches!(key.scope, QueryScope::All) || keep.contains(&key)
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySnapshot {
    pub page: Option<Arc<Page>>,
    pub is_loading: bool,
    pub is_refetching: bool,
    pub is_error: bool,
    pub error: Option<RequestError>,
}

impl QuerySnapshot {
    pub fn total_row_count(&self) -> u64 {
        self.page.as_ref().map_or(0, |page| page.total_row_count)
    }
}

/// One table's view of the store, keeping the previous page visible while the next loads.
#[derive(Debug, Clone)]
pub struct QueryObserver {
    key: QueryKey,
    placeholder: Option<QueryKey>,
}

impl QueryObserver {
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            placeholder: None,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn placeholder(&self) -> Option<&QueryKey> {
        self.placeholder.as_ref()
    }

    pub fn set_key(&mut self, key: QueryKey) -> bool {
        if key == self.key {
            return false;
        }
        let previous = std::mem::replace(&mut self.key, key);
        // An unresolved placeholder means `previous` never loaded either.
        if self.placeholder.is_none() {
            self.placeholder = Some(previous);
        }
        true
    }

    pub fn snapshot(&mut self, store: &QueryStore) -> QuerySnapshot {
        let current = store.get(&self.key);
        let error = store.error(&self.key).cloned();
        let fetching = store.is_fetching(&self.key);

        if current.is_some() {
            self.placeholder = None;
        }
        let fallback = match (&current, &self.placeholder) {
            (None, Some(placeholder)) => store.get(placeholder),
            _ => None,
        };
        let has_current = current.is_some();
        let page = current.or(fallback);

        QuerySnapshot {
            is_loading: page.is_none() && error.is_none(),
            is_refetching: page.is_some() && (fetching || !has_current && error.is_none()),
            is_error: error.is_some(),
            error,
            page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheEvent, QueryObserver, QueryStore, Resolution};
    use crate::{Descriptor, EntityKind, Page, QueryKey, RequestError};

    fn key(page_index: u32) -> QueryKey {
        let mut descriptor = Descriptor::default();
        descriptor.pagination.page_index = page_index;
        QueryKey::page(EntityKind::Warehouse, descriptor)
    }

    fn key_for(entity: EntityKind) -> QueryKey {
        QueryKey::page(entity, Descriptor::default())
    }

    fn page(total: u64) -> Page {
        Page {
            rows: Vec::new(),
            total_row_count: total,
        }
    }

    #[test]
    fn ensure_issues_one_ticket_until_resolved() {
        let mut store = QueryStore::new();
        let ticket = store.ensure(&key(0)).expect("first ensure fetches");
        assert!(store.ensure(&key(0)).is_none());
        assert_eq!(store.resolve(ticket, Ok(page(3))), Resolution::Applied);
        assert!(store.ensure(&key(0)).is_none());
        assert_eq!(store.get(&key(0)).map(|page| page.total_row_count), Some(3));
        assert!(store.updated_at(&key(0)).is_some());
    }

    #[test]
    fn superseded_result_never_overwrites_newer_state() {
        let mut store = QueryStore::new();
        let old = store.ensure(&key(0)).expect("ticket");
        store.invalidate(EntityKind::Warehouse);
        let fresh = store.ensure(&key(0)).expect("stale entry refetches");

        assert_eq!(store.resolve(fresh, Ok(page(5))), Resolution::Applied);
        assert_eq!(store.resolve(old, Ok(page(1))), Resolution::Superseded);
        assert_eq!(store.get(&key(0)).map(|page| page.total_row_count), Some(5));
    }

    #[test]
    fn evicted_key_never_accepts_its_old_ticket() {
        let mut store = QueryStore::new();
        let old = store.ensure(&key(0)).expect("ticket");
        store.invalidate(EntityKind::Warehouse);
        assert_eq!(store.retain_pages(EntityKind::Warehouse, &[]), 1);

        let fresh = store.ensure(&key(0)).expect("re-created entry fetches");
        assert_ne!(fresh.generation, old.generation);
        assert_eq!(store.resolve(fresh, Ok(page(5))), Resolution::Applied);
        assert_eq!(store.resolve(old, Ok(page(1))), Resolution::Superseded);
        assert_eq!(store.get(&key(0)).map(|page| page.total_row_count), Some(5));
    }

    #[test]
    fn retain_pages_keeps_current_pages_and_lookups() {
        let mut store = QueryStore::new();
        let lookup = QueryKey::all(EntityKind::Warehouse);
        let products = key_for(EntityKind::Product);
        for key in [key(0), key(1), key(2), lookup.clone(), products.clone()] {
            let ticket = store.ensure(&key).expect("ticket");
            store.resolve(ticket, Ok(page(3)));
        }

        let dropped = store.retain_pages(EntityKind::Warehouse, &[&key(2), &key(1)]);
        assert_eq!(dropped, 1);
        assert!(store.get(&key(0)).is_none());
        assert!(store.get(&key(1)).is_some());
        assert!(store.get(&key(2)).is_some());
        assert!(store.get(&lookup).is_some());
        assert!(store.get(&products).is_some());
    }

    #[test]
    fn failure_keeps_previous_data_and_does_not_retry() {
        let mut store = QueryStore::new();
        let ticket = store.ensure(&key(0)).expect("ticket");
        store.resolve(ticket, Ok(page(2)));
        store.invalidate(EntityKind::Warehouse);
        let ticket = store.ensure(&key(0)).expect("ticket");
        store.resolve(
            ticket,
            Err(RequestError::Server {
                status: 500,
                message: None,
            }),
        );

        assert!(store.ensure(&key(0)).is_none());
        assert_eq!(store.get(&key(0)).map(|page| page.total_row_count), Some(2));
        assert!(store.error(&key(0)).is_some());
        assert!(store.refetch(&key(0)).is_some());
    }

    #[test]
    fn invalidation_reaches_every_subscriber_of_the_entity() {
        let mut store = QueryStore::new();
        let first = store.subscribe(EntityKind::Warehouse);
        let second = store.subscribe(EntityKind::Warehouse);
        let other = store.subscribe(EntityKind::Product);

        store.invalidate(EntityKind::Warehouse);
        assert_eq!(
            first.try_recv(),
            Ok(CacheEvent::Invalidated(EntityKind::Warehouse))
        );
        assert_eq!(
            second.try_recv(),
            Ok(CacheEvent::Invalidated(EntityKind::Warehouse))
        );
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn invalidation_leaves_other_entities_alone() {
        let mut store = QueryStore::new();
        let products = QueryKey::all(EntityKind::Product);
        let ticket = store.ensure(&products).expect("ticket");
        store.resolve(ticket, Ok(page(1)));
        assert_eq!(store.invalidate(EntityKind::Warehouse), 0);
        assert!(store.ensure(&products).is_none());
    }

    #[test]
    fn observer_keeps_previous_page_while_next_loads() {
        let mut store = QueryStore::new();
        let mut observer = QueryObserver::new(key(0));
        let snapshot = observer.snapshot(&store);
        assert!(snapshot.is_loading);

        let ticket = store.ensure(&key(0)).expect("ticket");
        store.resolve(ticket, Ok(page(30)));

        observer.set_key(key(1));
        let next = store.ensure(&key(1)).expect("ticket");
        let snapshot = observer.snapshot(&store);
        assert!(!snapshot.is_loading);
        assert!(snapshot.is_refetching);
        assert_eq!(snapshot.total_row_count(), 30);

        store.resolve(next, Ok(page(31)));
        let snapshot = observer.snapshot(&store);
        assert!(!snapshot.is_refetching);
        assert_eq!(snapshot.total_row_count(), 31);
    }

    #[test]
    fn observer_reports_error_without_losing_data() {
        let mut store = QueryStore::new();
        let mut observer = QueryObserver::new(key(0));
        let ticket = store.ensure(&key(0)).expect("ticket");
        store.resolve(ticket, Ok(page(4)));
        let ticket = store.refetch(&key(0)).expect("ticket");
        store.resolve(ticket, Err(RequestError::network("refused")));

        let snapshot = observer.snapshot(&store);
        assert!(snapshot.is_error);
        assert_eq!(snapshot.total_row_count(), 4);
        assert!(!snapshot.is_loading);
    }
}
