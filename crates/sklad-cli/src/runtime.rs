// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use sklad_api::Client;
use sklad_app::{
    CompensationPolicy, FetchTicket, Mutation, MutationError, MutationOutcome, Page, QueryKey,
    ReportKind, ReportParams, ReportRows, RequestError, TabKind,
};
use sklad_local::Preferences;
use sklad_tui::InternalEvent;
use std::sync::mpsc::Sender;
use std::thread;

/// Talks to the inventory API over HTTP and keeps UI preferences on disk.
///
/// Requests run on short-lived worker threads so the render loop never blocks
/// on the network; results come back through the event channel.
pub struct ApiRuntime {
    client: Client,
    preferences: Preferences,
}

impl ApiRuntime {
    pub fn new(client: Client, preferences: Preferences) -> Self {
        Self {
            client,
            preferences,
        }
    }
}

impl sklad_tui::AppRuntime for ApiRuntime {
    fn fetch(&mut self, key: &QueryKey) -> Result<Page, RequestError> {
        self.client.fetch(key)
    }

    fn mutate(
        &mut self,
        mutation: &Mutation,
        policy: CompensationPolicy,
    ) -> Result<MutationOutcome, MutationError> {
        self.client.perform(mutation, policy)
    }

    fn generate_report(
        &mut self,
        kind: ReportKind,
        params: &ReportParams,
    ) -> Result<ReportRows, RequestError> {
        self.client.generate_report(kind, params)
    }

    fn save_last_tab(&mut self, tab: TabKind) -> Result<()> {
        self.preferences.put_last_tab(tab)
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket, tx: Sender<InternalEvent>) -> Result<()> {
        let client = self.client.clone();
        let name = format!("sklad-fetch-{}", ticket.key.entity.label());
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                tracing::debug!(key = ?ticket.key, generation = ticket.generation, "fetch started");
                let result = client.fetch(&ticket.key);
                if let Err(error) = &result {
                    tracing::warn!(key = ?ticket.key, %error, "fetch failed");
                }
                if tx.send(InternalEvent::FetchCompleted { ticket, result }).is_err() {
                    tracing::debug!("fetch finished after the UI closed");
                }
            })
            .context("spawn fetch worker")?;
        Ok(())
    }

    fn spawn_mutation(
        &mut self,
        mutation: Mutation,
        policy: CompensationPolicy,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let client = self.client.clone();
        thread::Builder::new()
            .name("sklad-mutation".to_owned())
            .spawn(move || {
                let result = client.perform(&mutation, policy);
                match &result {
                    Ok(outcome) => tracing::debug!(
                        entity = mutation.entity().label(),
                        id = outcome.record_id(),
                        verb = mutation.verb(),
                        "mutation answered"
                    ),
                    Err(error) => tracing::warn!(
                        entity = mutation.entity().label(),
                        %error,
                        "mutation failed"
                    ),
                }
                if tx
                    .send(InternalEvent::MutationCompleted { mutation, result })
                    .is_err()
                {
                    tracing::debug!("mutation finished after the UI closed");
                }
            })
            .context("spawn mutation worker")?;
        Ok(())
    }

    fn spawn_report(
        &mut self,
        request_id: u64,
        kind: ReportKind,
        params: ReportParams,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let client = self.client.clone();
        thread::Builder::new()
            .name("sklad-report".to_owned())
            .spawn(move || {
                let result = client.generate_report(kind, &params);
                if let Err(error) = &result {
                    tracing::warn!(report = kind.label(), %error, "report failed");
                }
                if tx
                    .send(InternalEvent::ReportCompleted { request_id, result })
                    .is_err()
                {
                    tracing::debug!("report finished after the UI closed");
                }
            })
            .context("spawn report worker")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ApiRuntime;
    use anyhow::Result;
    use sklad_api::Client;
    use sklad_app::{
        CompensationPolicy, Descriptor, EntityKind, FetchTicket, Mutation, MutationOutcome,
        QueryKey, ReportKind, ReportParams, ReportRows, TabKind,
    };
    use sklad_local::Preferences;
    use sklad_testkit::FakeApi;
    use sklad_tui::{AppRuntime, InternalEvent};
    use std::sync::mpsc;
    use std::time::Duration;

    fn runtime(api: &FakeApi) -> Result<ApiRuntime> {
        let client = Client::new(api.base_url(), Duration::from_secs(5))?;
        Ok(ApiRuntime::new(client, Preferences::open_memory()?))
    }

    #[test]
    fn fetch_reads_a_page_from_the_api() -> Result<()> {
        let api = FakeApi::with_demo_data(7)?;
        let mut runtime = runtime(&api)?;
        let key = QueryKey::page(EntityKind::Warehouse, Descriptor::with_page_size(2));
        let page = runtime.fetch(&key)?;
        assert!(page.rows.len() <= 2);
        assert_eq!(
            page.total_row_count,
            api.rows(EntityKind::Warehouse).len() as u64
        );
        Ok(())
    }

    #[test]
    fn spawned_fetch_reports_back_through_the_channel() -> Result<()> {
        let api = FakeApi::with_demo_data(7)?;
        let mut runtime = runtime(&api)?;
        let (tx, rx) = mpsc::channel();
        let ticket = FetchTicket {
            key: QueryKey::all(EntityKind::Product),
            generation: 3,
        };
        runtime.spawn_fetch(ticket, tx)?;

        match rx.recv_timeout(Duration::from_secs(5))? {
            InternalEvent::FetchCompleted { ticket, result } => {
                assert_eq!(ticket.generation, 3);
                let page = result?;
                assert_eq!(page.rows.len(), api.rows(EntityKind::Product).len());
            }
            other => panic!("unexpected event {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn spawned_delete_removes_the_row() -> Result<()> {
        let api = FakeApi::with_demo_data(7)?;
        let mut runtime = runtime(&api)?;
        let page = runtime.fetch(&QueryKey::all(EntityKind::Position))?;
        let target = page.rows.first().expect("demo positions").id();
        let before = api.rows(EntityKind::Position).len();

        let (tx, rx) = mpsc::channel();
        runtime.spawn_mutation(
            Mutation::Delete {
                entity: EntityKind::Position,
                id: target,
            },
            CompensationPolicy::Leave,
            tx,
        )?;

        match rx.recv_timeout(Duration::from_secs(5))? {
            InternalEvent::MutationCompleted { result, .. } => {
                assert!(matches!(result?, MutationOutcome::Deleted { id, .. } if id == target));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(api.rows(EntityKind::Position).len(), before - 1);
        Ok(())
    }

    #[test]
    fn spawned_report_returns_inventory_rows() -> Result<()> {
        let api = FakeApi::with_demo_data(7)?;
        let mut runtime = runtime(&api)?;
        let (tx, rx) = mpsc::channel();
        runtime.spawn_report(
            9,
            ReportKind::Inventory,
            ReportParams::for_kind(ReportKind::Inventory),
            tx,
        )?;

        match rx.recv_timeout(Duration::from_secs(5))? {
            InternalEvent::ReportCompleted { request_id, result } => {
                assert_eq!(request_id, 9);
                assert!(matches!(result?, ReportRows::Inventory(_)));
            }
            other => panic!("unexpected event {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unreachable_server_surfaces_a_network_error() -> Result<()> {
        let api = FakeApi::start()?;
        let base_url = api.base_url().to_owned();
        drop(api);
        let client = Client::new(&base_url, Duration::from_millis(300))?;
        let mut runtime = ApiRuntime::new(client, Preferences::open_memory()?);
        let error = runtime
            .fetch(&QueryKey::all(EntityKind::Warehouse))
            .expect_err("stopped server should not answer");
        assert!(error.to_string().contains("cannot reach"), "{error}");
        Ok(())
    }

    #[test]
    fn last_tab_is_persisted() -> Result<()> {
        let api = FakeApi::start()?;
        let mut runtime = runtime(&api)?;
        runtime.save_last_tab(TabKind::Reports)?;
        assert_eq!(runtime.preferences.last_tab()?, Some(TabKind::Reports));
        Ok(())
    }
}
