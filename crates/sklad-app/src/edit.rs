// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::error::MutationError;
use crate::forms::{AnyForm, FormOutput};
use crate::model::{EntityKind, Record};
use crate::mutation::{Mutation, RowTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMode {
    Viewing,
    Editing { row_id: i64, form: AnyForm },
    Creating { form: AnyForm },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveBlocked {
    /// Validation failed; errors are on the form.
    Invalid,
    /// A request for this row is already in flight.
    Pending,
    NothingOpen,
}

/// Inline edit state of one table: at most one row open at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    entity: EntityKind,
    mode: RowMode,
    confirm_delete: Option<i64>,
    /// Target of the save this session is waiting on.
    in_flight: Option<RowTarget>,
    /// Saves dropped by `cancel` whose results are still to arrive.
    abandoned: Vec<RowTarget>,
    last_error: Option<String>,
}

impl EditSession {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            mode: RowMode::Viewing,
            confirm_delete: None,
            in_flight: None,
            abandoned: Vec::new(),
            last_error: None,
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn mode(&self) -> &RowMode {
        &self.mode
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.mode, RowMode::Viewing)
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn form(&self) -> Option<&AnyForm> {
        match &self.mode {
            RowMode::Editing { form, .. } | RowMode::Creating { form } => Some(form),
            RowMode::Viewing => None,
        }
    }

    pub fn form_mut(&mut self) -> Option<&mut AnyForm> {
        match &mut self.mode {
            RowMode::Editing { form, .. } | RowMode::Creating { form } => Some(form),
            RowMode::Viewing => None,
        }
    }

    pub fn editing_row(&self) -> Option<i64> {
        match self.mode {
            RowMode::Editing { row_id, .. } => Some(row_id),
            _ => None,
        }
    }

    pub fn begin_edit(&mut self, record: &Record) -> bool {
        if self.is_open() || record.kind() != self.entity {
            return false;
        }
        self.mode = RowMode::Editing {
            row_id: record.id(),
            form: AnyForm::edit(record),
        };
        self.last_error = None;
        true
    }

    pub fn begin_create(&mut self) -> bool {
        if self.is_open() {
            return false;
        }
        self.mode = RowMode::Creating {
            form: AnyForm::create(self.entity),
        };
        self.last_error = None;
        true
    }

    /// Drops the draft. A request already sent still completes.
    pub fn cancel(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.mode = RowMode::Viewing;
        if let Some(target) = self.in_flight.take() {
            self.abandoned.push(target);
        }
        self.last_error = None;
        true
    }

    /// Validates the open form into the mutation to dispatch.
    pub fn save(&mut self) -> Result<Mutation, SaveBlocked> {
        if self.in_flight.is_some() {
            return Err(SaveBlocked::Pending);
        }
        let mutation = match &mut self.mode {
            RowMode::Viewing => return Err(SaveBlocked::NothingOpen),
            RowMode::Editing { row_id, form } => match form.submit() {
                Some(FormOutput::Fields(fields)) => Mutation::Update {
                    id: *row_id,
                    fields,
                },
                Some(FormOutput::Note(note)) => Mutation::CreateNote(note),
                None => return Err(SaveBlocked::Invalid),
            },
            RowMode::Creating { form } => match form.submit() {
                Some(FormOutput::Fields(fields)) => Mutation::Create(fields),
                Some(FormOutput::Note(note)) => Mutation::CreateNote(note),
                None => return Err(SaveBlocked::Invalid),
            },
        };
        self.in_flight = Some(mutation.target());
        self.last_error = None;
        Ok(mutation)
    }

    /// Reopens the form for editing after the dispatcher refused the save.
    pub fn refuse_submit(&mut self, reason: impl Into<String>) {
        if self.is_open() {
            self.in_flight = None;
            self.last_error = Some(reason.into());
        }
    }

    pub fn request_delete(&mut self, row_id: i64) -> bool {
        if self.is_open() {
            return false;
        }
        self.confirm_delete = Some(row_id);
        true
    }

    pub fn pending_delete(&self) -> Option<i64> {
        self.confirm_delete
    }

    /// The confirmed delete, or `None` when nothing awaited confirmation.
    pub fn confirm_delete(&mut self) -> Option<Mutation> {
        self.confirm_delete.take().map(|id| Mutation::Delete {
            entity: self.entity,
            id,
        })
    }

    pub fn dismiss_delete(&mut self) -> bool {
        self.confirm_delete.take().is_some()
    }

    /// Closes the row on success; keeps it open with the error otherwise.
    ///
    /// Results of saves abandoned by `cancel` and of other rows leave the
    /// current draft alone.
    pub fn mutation_finished(
        &mut self,
        target: RowTarget,
        result: Result<(), &MutationError>,
    ) {
        if let Some(index) = self.abandoned.iter().position(|pending| *pending == target) {
            self.abandoned.remove(index);
            return;
        }
        if self.in_flight != Some(target) {
            return;
        }
        self.in_flight = None;
        match result {
            Ok(()) => {
                self.mode = RowMode::Viewing;
                self.last_error = None;
            }
            // A half-created note must not be resubmitted as a whole.
            Err(err) if matches!(err, MutationError::OrphanedHeader { .. }) => {
                self.mode = RowMode::Viewing;
                self.last_error = Some(err.user_message());
            }
            Err(err) => self.last_error = Some(err.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EditSession, RowMode, SaveBlocked};
    use crate::{
        EntityKind, Mutation, MutationError, ProductField, Record, RequestError, RowTarget,
    };
    use serde_json::json;

    fn product() -> Record {
        Record::decode(
            EntityKind::Product,
            json!({"product_id": 5, "product_name": "Bolt", "article": "12345678", "price": 1, "unit": "pcs"}),
        )
        .expect("product decodes")
    }

    fn type_name(session: &mut EditSession, name: &str) {
        let form = session.form_mut().expect("open form");
        for value in [name, "1 Main St"] {
            form.set_focused_value(value.to_owned());
            form.focus_next();
        }
    }

    #[test]
    fn only_one_row_may_be_open() {
        let mut session = EditSession::new(EntityKind::Product);
        assert!(session.begin_edit(&product()));
        assert!(!session.begin_create());
        assert!(!session.request_delete(5));
        assert!(session.cancel());
        assert!(session.begin_create());
    }

    #[test]
    fn invalid_create_never_produces_a_mutation() {
        let mut session = EditSession::new(EntityKind::Product);
        session.begin_create();
        assert_eq!(session.save(), Err(SaveBlocked::Invalid));
        let RowMode::Creating { form } = session.mode() else {
            panic!("create row should stay open");
        };
        assert!(form.has_errors());
        assert!(!session.is_submitting());
    }

    #[test]
    fn saving_an_edit_yields_update_and_blocks_double_submit() {
        let mut session = EditSession::new(EntityKind::Product);
        session.begin_edit(&product());
        let Ok(Mutation::Update { id, .. }) = session.save() else {
            panic!("expected update");
        };
        assert_eq!(id, 5);
        assert_eq!(session.save(), Err(SaveBlocked::Pending));
    }

    #[test]
    fn failed_mutation_keeps_the_row_open() {
        let mut session = EditSession::new(EntityKind::Product);
        session.begin_edit(&product());
        let mutation = session.save().expect("valid");
        let err = MutationError::Request(RequestError::Server {
            status: 409,
            message: Some("article taken".into()),
        });
        session.mutation_finished(mutation.target(), Err(&err));
        assert_eq!(session.editing_row(), Some(5));
        assert_eq!(session.last_error(), Some("article taken"));
        assert!(session.save().is_ok());

        session.mutation_finished(mutation.target(), Ok(()));
        assert!(!session.is_open());
    }

    #[test]
    fn results_for_other_rows_are_ignored() {
        let mut session = EditSession::new(EntityKind::Product);
        session.begin_edit(&product());
        session.save().expect("valid");
        session.mutation_finished(RowTarget::Existing(EntityKind::Product, 6), Ok(()));
        assert!(session.is_open());
        assert!(session.is_submitting());
    }

    #[test]
    fn cancelled_create_result_leaves_the_next_draft_alone() {
        let mut session = EditSession::new(EntityKind::Warehouse);
        session.begin_create();
        type_name(&mut session, "Central");
        let first = session.save().expect("valid warehouse");
        assert!(session.cancel());

        session.begin_create();
        type_name(&mut session, "Half typed");
        session.mutation_finished(first.target(), Ok(()));
        assert!(session.is_open(), "late result closed the new draft");
        assert!(!session.is_submitting());
        assert_eq!(session.last_error(), None);

        let err = MutationError::Request(RequestError::network("refused"));
        let second = session.save().expect("second draft saves");
        session.mutation_finished(second.target(), Err(&err));
        assert!(session.is_open());
        assert!(session.last_error().is_some());
    }

    #[test]
    fn cancelled_create_failure_is_not_shown_on_the_next_draft() {
        let mut session = EditSession::new(EntityKind::Warehouse);
        session.begin_create();
        type_name(&mut session, "Central");
        let first = session.save().expect("valid warehouse");
        session.cancel();
        session.begin_create();

        let err = MutationError::Request(RequestError::Server {
            status: 409,
            message: Some("name already taken".into()),
        });
        session.mutation_finished(first.target(), Err(&err));
        assert_eq!(session.last_error(), None);
        assert!(session.is_open());
    }

    #[test]
    fn delete_requires_confirmation() {
        let mut session = EditSession::new(EntityKind::Position);
        assert_eq!(session.confirm_delete(), None);
        session.request_delete(3);
        assert!(session.dismiss_delete());
        assert_eq!(session.confirm_delete(), None);
        session.request_delete(3);
        assert_eq!(
            session.confirm_delete(),
            Some(Mutation::Delete {
                entity: EntityKind::Position,
                id: 3
            })
        );
    }

    #[test]
    fn editing_focus_clears_field_error() {
        let mut session = EditSession::new(EntityKind::Product);
        session.begin_create();
        let _ = session.save();
        let form = session.form_mut().expect("open form");
        let crate::AnyForm::Product(form) = form else {
            panic!("expected product form");
        };
        assert!(form.errors().get(ProductField::ProductName).is_some());
        form.focus(ProductField::ProductName);
        assert!(form.errors().get(ProductField::ProductName).is_none());
    }
}
