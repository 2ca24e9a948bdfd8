// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use url::Url;

use crate::model::EntityKind;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const PAGE_SIZE_CHOICES: [u32; 4] = [10, 25, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pagination {
    pub page_index: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn start(self) -> u64 {
        u64::from(self.page_index) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SortSpec {
    pub id: String,
    pub desc: bool,
}

/// Per-column filter values keyed by wire field id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ColumnFilters(BTreeMap<String, String>);

impl ColumnFilters {
    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(id, value)| (id.as_str(), value.as_str()))
    }

    fn set(&mut self, id: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            return self.0.remove(id).is_some();
        }
        self.0.insert(id.to_owned(), value.to_owned()).as_deref() != Some(value)
    }

    fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id).is_some()
    }
}

impl Serialize for ColumnFilters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            id: &'a str,
            value: &'a str,
        }

        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (id, value) in &self.0 {
            seq.serialize_element(&Entry { id, value })?;
        }
        seq.end()
    }
}

/// Everything that identifies one server-side page of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub pagination: Pagination,
    pub sorting: Vec<SortSpec>,
    pub filters: ColumnFilters,
    global_filter: String,
}

impl Descriptor {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            pagination: Pagination {
                page_index: 0,
                page_size: page_size.max(1),
            },
            ..Self::default()
        }
    }

    pub fn global_filter(&self) -> &str {
        &self.global_filter
    }

    /// Stores the search text; whitespace-only text means no search.
    pub fn set_global_filter(&mut self, text: &str) -> bool {
        let normalized = if text.trim().is_empty() { "" } else { text };
        if self.global_filter == normalized {
            return false;
        }
        self.global_filter = normalized.to_owned();
        self.pagination.page_index = 0;
        true
    }

    pub fn set_filter(&mut self, id: &str, value: &str) -> bool {
        let changed = self.filters.set(id, value);
        if changed {
            self.pagination.page_index = 0;
        }
        changed
    }

    pub fn clear_filter(&mut self, id: &str) -> bool {
        let changed = self.filters.remove(id);
        if changed {
            self.pagination.page_index = 0;
        }
        changed
    }

    pub fn clear_all_filters(&mut self) -> bool {
        let changed = !self.filters.is_empty() || !self.global_filter.is_empty();
        self.filters = ColumnFilters::default();
        self.global_filter.clear();
        if changed {
            self.pagination.page_index = 0;
        }
        changed
    }

    pub fn set_page_size(&mut self, page_size: u32) -> bool {
        let page_size = page_size.max(1);
        if self.pagination.page_size == page_size {
            return false;
        }
        self.pagination = Pagination {
            page_index: 0,
            page_size,
        };
        true
    }

    /// Rotates through the standard page sizes.
    pub fn cycle_page_size(&mut self) {
        let current = self.pagination.page_size;
        let next = PAGE_SIZE_CHOICES
            .iter()
            .copied()
            .find(|size| *size > current)
            .unwrap_or(PAGE_SIZE_CHOICES[0]);
        self.set_page_size(next);
    }

    /// Single-column sort toggle: ascending, then descending, then off.
    pub fn cycle_sort(&mut self, id: &str) {
        match self.sorting.iter().position(|spec| spec.id == id) {
            Some(index) if !self.sorting[index].desc => self.sorting[index].desc = true,
            Some(index) => {
                self.sorting.remove(index);
            }
            None => {
                self.sorting.clear();
                self.sorting.push(SortSpec {
                    id: id.to_owned(),
                    desc: false,
                });
            }
        }
    }

    /// Adds a secondary sort key without disturbing the existing ones.
    pub fn push_sort(&mut self, id: &str, desc: bool) {
        self.sorting.retain(|spec| spec.id != id);
        self.sorting.push(SortSpec {
            id: id.to_owned(),
            desc,
        });
    }

    pub fn sort_for(&self, id: &str) -> Option<&SortSpec> {
        self.sorting.iter().find(|spec| spec.id == id)
    }

    pub fn next_page(&mut self, total_row_count: u64) -> bool {
        let last = page_count(total_row_count, self.pagination.page_size) - 1;
        if self.pagination.page_index >= last {
            return false;
        }
        self.pagination.page_index += 1;
        true
    }

    pub fn prev_page(&mut self) -> bool {
        if self.pagination.page_index == 0 {
            return false;
        }
        self.pagination.page_index -= 1;
        true
    }

    /// Pulls the page index back after the total shrank below it.
    pub fn clamp_page(&mut self, total_row_count: u64) -> bool {
        let last = page_count(total_row_count, self.pagination.page_size) - 1;
        if self.pagination.page_index <= last {
            return false;
        }
        self.pagination.page_index = last;
        true
    }
}

/// Number of pages for a total; an empty table still has one page.
pub fn page_count(total_row_count: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total_row_count.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Collection URL with the descriptor encoded as query parameters.
pub fn build_request(base: &Url, descriptor: &Descriptor) -> Url {
    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("start", &descriptor.pagination.start().to_string());
        pairs.append_pair("size", &descriptor.pagination.page_size.to_string());
        pairs.append_pair("filters", &to_json(&descriptor.filters));
        pairs.append_pair("sorting", &to_json(&descriptor.sorting));
        if !descriptor.global_filter.trim().is_empty() {
            pairs.append_pair("globalFilter", &format!("%{}%", descriptor.global_filter));
        }
    }
    url
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryScope {
    Page(Descriptor),
    /// The whole unpaginated collection, used for lookups.
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub entity: EntityKind,
    pub scope: QueryScope,
}

impl QueryKey {
    pub fn page(entity: EntityKind, descriptor: Descriptor) -> Self {
        Self {
            entity,
            scope: QueryScope::Page(descriptor),
        }
    }

    pub fn all(entity: EntityKind) -> Self {
        Self {
            entity,
            scope: QueryScope::All,
        }
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        match &self.scope {
            QueryScope::Page(descriptor) => Some(descriptor),
            QueryScope::All => None,
        }
    }
}
