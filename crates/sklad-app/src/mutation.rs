// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::ids::{IncomeId, OutcomeId, ProductId};
use crate::model::{
    EntityFields, EntityKind, IncomeFields, IncomeItemFields, OutcomeFields, OutcomeItemFields,
    Record,
};
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteHeader {
    Income(IncomeFields),
    Outcome(OutcomeFields),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub price: Money,
}

impl NoteLine {
    pub fn subtotal(&self) -> Option<Money> {
        self.price.times(self.quantity)
    }
}

/// A note header and the lines to create under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDraft {
    pub header: NoteHeader,
    pub lines: Vec<NoteLine>,
}

impl NoteDraft {
    pub fn kind(&self) -> EntityKind {
        match self.header {
            NoteHeader::Income(_) => EntityKind::Income,
            NoteHeader::Outcome(_) => EntityKind::Outcome,
        }
    }

    pub fn line_kind(&self) -> EntityKind {
        match self.header {
            NoteHeader::Income(_) => EntityKind::IncomeItem,
            NoteHeader::Outcome(_) => EntityKind::OutcomeItem,
        }
    }

    /// `None` when a subtotal or the sum does not fit.
    pub fn total(&self) -> Option<Money> {
        self.lines
            .iter()
            .try_fold(Money::ZERO, |total, line| total.checked_add(line.subtotal()?))
    }

    pub fn header_fields(&self) -> EntityFields {
        match &self.header {
            NoteHeader::Income(fields) => EntityFields::Income(fields.clone()),
            NoteHeader::Outcome(fields) => EntityFields::Outcome(fields.clone()),
        }
    }

    /// Line bodies pointing at the header the server created.
    pub fn line_fields(&self, header_id: i64) -> Vec<EntityFields> {
        self.lines
            .iter()
            .map(|line| match self.header {
                NoteHeader::Income(_) => EntityFields::IncomeItem(IncomeItemFields {
                    income_id: IncomeId::new(header_id),
                    product_id: line.product_id,
                    quantity: line.quantity,
                    price: line.price,
                }),
                NoteHeader::Outcome(_) => EntityFields::OutcomeItem(OutcomeItemFields {
                    outcome_id: OutcomeId::new(header_id),
                    product_id: line.product_id,
                    quantity: line.quantity,
                    price: line.price,
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(EntityFields),
    Update { id: i64, fields: EntityFields },
    Delete { entity: EntityKind, id: i64 },
    CreateNote(NoteDraft),
}

/// The row a mutation is about; creates share one slot per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowTarget {
    New(EntityKind),
    Existing(EntityKind, i64),
}

impl RowTarget {
    pub fn entity(self) -> EntityKind {
        match self {
            Self::New(entity) | Self::Existing(entity, _) => entity,
        }
    }
}

impl Mutation {
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::Create(fields) | Self::Update { fields, .. } => fields.kind(),
            Self::Delete { entity, .. } => *entity,
            Self::CreateNote(note) => note.kind(),
        }
    }

    pub fn target(&self) -> RowTarget {
        match self {
            Self::Create(_) | Self::CreateNote(_) => RowTarget::New(self.entity()),
            Self::Update { id, .. } | Self::Delete { id, .. } => {
                RowTarget::Existing(self.entity(), *id)
            }
        }
    }

    /// Every collection whose cached lists this mutation changes.
    pub fn affected(&self) -> Vec<EntityKind> {
        match self {
            Self::CreateNote(note) => vec![note.kind(), note.line_kind()],
            _ => vec![self.entity()],
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create(_) | Self::CreateNote(_) => "created",
            Self::Update { .. } => "saved",
            Self::Delete { .. } => "deleted",
        }
    }
}

/// What happened on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Created(Record),
    Updated(Record),
    Deleted { entity: EntityKind, id: i64 },
    NoteCreated { header: Record, lines: Vec<Record> },
}

impl MutationOutcome {
    pub fn record_id(&self) -> i64 {
        match self {
            Self::Created(record) | Self::Updated(record) => record.id(),
            Self::Deleted { id, .. } => *id,
            Self::NoteCreated { header, .. } => header.id(),
        }
    }
}

/// What to do with a note header whose lines could not all be created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompensationPolicy {
    /// Keep the header and report which line failed.
    #[default]
    Leave,
    /// Delete the header again, best effort.
    DeleteHeader,
}

/// Rows with a request in flight. A second submit for the same row is refused.
#[derive(Debug, Default)]
pub struct PendingMutations {
    targets: HashSet<RowTarget>,
}

impl PendingMutations {
    pub fn begin(&mut self, target: RowTarget) -> bool {
        self.targets.insert(target)
    }

    pub fn finish(&mut self, target: RowTarget) -> bool {
        self.targets.remove(&target)
    }

    pub fn is_pending(&self, target: RowTarget) -> bool {
        self.targets.contains(&target)
    }

    pub fn any_for(&self, entity: EntityKind) -> bool {
        self.targets.iter().any(|target| target.entity() == entity)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
