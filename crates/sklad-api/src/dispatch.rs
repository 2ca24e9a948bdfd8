// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use sklad_app::{
    CompensationPolicy, EntityKind, Mutation, MutationError, MutationOutcome, NoteDraft,
    PendingMutations, QueryKey, QueryStore, RequestError, Resolution, RowTarget,
};

use crate::Client;

impl Client {
    /// Sends one mutation. Note creation is a header POST followed by one POST per line.
    pub fn perform(
        &self,
        mutation: &Mutation,
        policy: CompensationPolicy,
    ) -> Result<MutationOutcome, MutationError> {
        match mutation {
            Mutation::Create(fields) => Ok(MutationOutcome::Created(self.create(fields)?)),
            Mutation::Update { id, fields } => {
                Ok(MutationOutcome::Updated(self.update(*id, fields)?))
            }
            Mutation::Delete { entity, id } => {
                self.delete(*entity, *id)?;
                Ok(MutationOutcome::Deleted {
                    entity: *entity,
                    id: *id,
                })
            }
            Mutation::CreateNote(note) => self.create_note(note, policy),
        }
    }

    fn create_note(
        &self,
        note: &NoteDraft,
        policy: CompensationPolicy,
    ) -> Result<MutationOutcome, MutationError> {
        let header = self.create(&note.header_fields())?;
        let header_id = header.id();

        let mut lines = Vec::with_capacity(note.lines.len());
        for fields in note.line_fields(header_id) {
            match self.create(&fields) {
                Ok(line) => lines.push(line),
                Err(source) => {
                    let compensated = self.compensate(note.kind(), header_id, policy);
                    tracing::warn!(
                        entity = ?note.kind(),
                        header_id,
                        lines_created = lines.len(),
                        compensated,
                        error = %source,
                        "note line failed after its header was created"
                    );
                    return Err(MutationError::OrphanedHeader {
                        header_id,
                        lines_created: lines.len(),
                        source,
                        compensated,
                    });
                }
            }
        }
        Ok(MutationOutcome::NoteCreated { header, lines })
    }

    fn compensate(&self, entity: EntityKind, header_id: i64, policy: CompensationPolicy) -> bool {
        match policy {
            CompensationPolicy::Leave => false,
            CompensationPolicy::DeleteHeader => match self.delete(entity, header_id) {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(?entity, header_id, %error, "could not delete orphaned note header");
                    false
                }
            },
        }
    }
}

/// Tracks in-flight mutations and turns their results into cache invalidations.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: PendingMutations,
    policy: CompensationPolicy,
}

impl Dispatcher {
    pub fn new(policy: CompensationPolicy) -> Self {
        Self {
            pending: PendingMutations::default(),
            policy,
        }
    }

    pub fn policy(&self) -> CompensationPolicy {
        self.policy
    }

    /// Claims the mutation's row. `None` while a request for that row is in flight.
    pub fn begin(&mut self, mutation: &Mutation) -> Option<RowTarget> {
        let target = mutation.target();
        if !self.pending.begin(target) {
            tracing::debug!(?target, "refusing duplicate submit");
            return None;
        }
        Some(target)
    }

    pub fn is_pending(&self, target: RowTarget) -> bool {
        self.pending.is_pending(target)
    }

    /// Releases the row and invalidates what the server changed.
    /// Returns the invalidated collections.
    pub fn apply(
        &mut self,
        store: &mut QueryStore,
        mutation: &Mutation,
        result: &Result<MutationOutcome, MutationError>,
    ) -> Vec<EntityKind> {
        self.pending.finish(mutation.target());
        let changed = match result {
            Ok(_) => mutation.affected(),
            // The header exists server-side unless it was deleted again.
            Err(MutationError::OrphanedHeader { .. }) => mutation.affected(),
            Err(MutationError::Request(_)) => Vec::new(),
        };
        for entity in &changed {
            store.invalidate(*entity);
        }
        changed
    }

    /// Claims, performs and applies on the calling thread.
    /// `None` when the row already has a request in flight.
    pub fn run(
        &mut self,
        client: &Client,
        store: &mut QueryStore,
        mutation: &Mutation,
    ) -> Option<Result<MutationOutcome, MutationError>> {
        self.begin(mutation)?;
        let result = client.perform(mutation, self.policy);
        self.apply(store, mutation, &result);
        Some(result)
    }
}

/// Fetches `key` when the store hands out a ticket for it.
pub fn fetch_into(store: &mut QueryStore, client: &Client, key: &QueryKey) -> Option<Resolution> {
    let ticket = store.ensure(key)?;
    let result: Result<_, RequestError> = client.fetch(&ticket.key);
    Some(store.resolve(ticket, result))
}
