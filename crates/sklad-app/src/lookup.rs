// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::model::{EntityKind, Page};

pub const MISSING_LABEL: &str = "N/A";

/// Id/label pairs of one collection, in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    entries: Vec<(i64, String)>,
}

impl Lookup {
    pub fn from_page(page: &Page) -> Self {
        Self {
            entries: page
                .rows
                .iter()
                .map(|row| (row.id(), row.lookup_label()))
                .collect(),
        }
    }

    pub fn resolve(&self, id: i64) -> &str {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map_or(MISSING_LABEL, |(_, label)| label.as_str())
    }

    pub fn resolve_opt(&self, id: Option<i64>) -> &str {
        id.map_or(MISSING_LABEL, |id| self.resolve(id))
    }

    pub fn entries(&self) -> &[(i64, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next choice after `current` for a select input, wrapping around.
    /// Optional selects pass through "none" between the last and first entry.
    pub fn cycle(&self, current: Option<i64>, forward: bool, optional: bool) -> Option<i64> {
        let mut choices: Vec<Option<i64>> = self.entries.iter().map(|(id, _)| Some(*id)).collect();
        if optional || choices.is_empty() {
            choices.insert(0, None);
        }
        let position = choices.iter().position(|choice| *choice == current);
        let next = match (position, forward) {
            (Some(index), true) => (index + 1) % choices.len(),
            (Some(index), false) => (index + choices.len() - 1) % choices.len(),
            (None, true) => 0,
            (None, false) => choices.len() - 1,
        };
        choices[next]
    }
}

/// Lookups a table of `entity` needs, resolved from cached pages.
#[derive(Debug, Clone, Default)]
pub struct LookupSet {
    lookups: Vec<(EntityKind, Lookup)>,
}

impl LookupSet {
    pub fn insert(&mut self, kind: EntityKind, lookup: Lookup) {
        match self.lookups.iter_mut().find(|(existing, _)| *existing == kind) {
            Some((_, slot)) => *slot = lookup,
            None => self.lookups.push((kind, lookup)),
        }
    }

    pub fn get(&self, kind: EntityKind) -> Option<&Lookup> {
        self.lookups
            .iter()
            .find(|(existing, _)| *existing == kind)
            .map(|(_, lookup)| lookup)
    }

    pub fn label(&self, kind: EntityKind, id: i64) -> &str {
        self.get(kind).map_or(MISSING_LABEL, |lookup| lookup.resolve(id))
    }
}

#[cfg(test)]
mod tests {
    use super::{Lookup, LookupSet, MISSING_LABEL};
    use crate::{EntityKind, Page, Record};
    use serde_json::json;

    fn employees() -> Lookup {
        let rows = [
            json!({"employee_id": 1, "first_name": "Anna", "last_name": "Petrova", "position_id": 1, "warehouse_id": 1}),
            json!({"employee_id": 2, "first_name": "Ivan", "last_name": "Sidorov", "position_id": 1, "warehouse_id": 1}),
        ]
        .into_iter()
        .map(|value| Record::decode(EntityKind::Employee, value).expect("employee decodes"))
        .collect();
        Lookup::from_page(&Page::collection(rows))
    }

    #[test]
    fn resolves_labels_and_falls_back_to_na() {
        let lookup = employees();
        assert_eq!(lookup.resolve(2), "Sidorov Ivan");
        assert_eq!(lookup.resolve(99), MISSING_LABEL);
        assert_eq!(lookup.resolve_opt(None), "N/A");
    }

    #[test]
    fn cycle_wraps_and_offers_none_for_optional_selects() {
        let lookup = employees();
        assert_eq!(lookup.cycle(None, true, false), Some(1));
        assert_eq!(lookup.cycle(Some(2), true, false), Some(1));
        assert_eq!(lookup.cycle(Some(2), true, true), None);
        assert_eq!(lookup.cycle(None, false, true), Some(2));
        assert_eq!(Lookup::default().cycle(None, true, false), None);
    }

    #[test]
    fn missing_collection_labels_as_na() {
        let mut set = LookupSet::default();
        assert_eq!(set.label(EntityKind::Employee, 1), MISSING_LABEL);
        set.insert(EntityKind::Employee, employees());
        assert_eq!(set.label(EntityKind::Employee, 1), "Petrova Anna");
    }
}
