// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs};
use sklad_api::Dispatcher;
use sklad_app::{
    AnyForm, AppCommand, AppEvent, AppMode, AppState, CacheEvent, Column, CompensationPolicy,
    DEFAULT_PAGE_SIZE, Descriptor, EditSession, EntityKind, FetchTicket, FieldInput, FieldView,
    Lookup, LookupSet, MISSING_LABEL, Money, MoneyError, Mutation, MutationError,
    MutationOutcome, Page, QueryKey, QueryObserver, QuerySnapshot, QueryStore, REMAINING_LABEL,
    Record, ReportKind, ReportParams, ReportRows, ReportState, RequestError, SaveBlocked, TabKind,
    WarehouseId, cell, columns, iso_date, page_count,
};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::Date;

const SORT_ASC: &str = "▲";
const SORT_DESC: &str = "▼";
const FILTER_MARK: &str = "*";
const DATE_RANGE_SEPARATOR: &str = "..";

/// Side effects the UI needs from the outside world.
///
/// The blocking methods do the work; the `spawn_*` methods report completion
/// through the internal channel. Their default implementations run inline,
/// which is what tests want; the real runtime moves them onto worker threads.
pub trait AppRuntime {
    fn fetch(&mut self, key: &QueryKey) -> Result<Page, RequestError>;
    fn mutate(
        &mut self,
        mutation: &Mutation,
        policy: CompensationPolicy,
    ) -> Result<MutationOutcome, MutationError>;
    fn generate_report(
        &mut self,
        kind: ReportKind,
        params: &ReportParams,
    ) -> Result<ReportRows, RequestError>;
    fn save_last_tab(&mut self, tab: TabKind) -> anyhow::Result<()>;

    fn spawn_fetch(&mut self, ticket: FetchTicket, tx: Sender<InternalEvent>) -> anyhow::Result<()> {
        let result = self.fetch(&ticket.key);
        tx.send(InternalEvent::FetchCompleted { ticket, result })
            .map_err(|_| anyhow::anyhow!("fetch event channel closed"))
    }

    fn spawn_mutation(
        &mut self,
        mutation: Mutation,
        policy: CompensationPolicy,
        tx: Sender<InternalEvent>,
    ) -> anyhow::Result<()> {
        let result = self.mutate(&mutation, policy);
        tx.send(InternalEvent::MutationCompleted { mutation, result })
            .map_err(|_| anyhow::anyhow!("mutation event channel closed"))
    }

    fn spawn_report(
        &mut self,
        request_id: u64,
        kind: ReportKind,
        params: ReportParams,
        tx: Sender<InternalEvent>,
    ) -> anyhow::Result<()> {
        let result = self.generate_report(kind, &params);
        tx.send(InternalEvent::ReportCompleted { request_id, result })
            .map_err(|_| anyhow::anyhow!("report event channel closed"))
    }
}

#[derive(Debug)]
pub enum InternalEvent {
    ClearStatus {
        token: u64,
    },
    FetchCompleted {
        ticket: FetchTicket,
        result: Result<Page, RequestError>,
    },
    MutationCompleted {
        mutation: Mutation,
        result: Result<MutationOutcome, MutationError>,
    },
    ReportCompleted {
        request_id: u64,
        result: Result<ReportRows, RequestError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    pub page_size: u32,
    pub compensation: CompensationPolicy,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            compensation: CompensationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableCommand {
    MoveRow(isize),
    MoveCol(isize),
    FirstRow,
    LastRow,
    CycleSort,
    AddSort,
    NextPage,
    PrevPage,
    CyclePageSize,
    ClearFilters,
    Search,
    Filter,
    Create,
    Edit,
    Delete,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportCommand {
    Kind(ReportKind),
    CycleWarehouse,
    CycleSort,
    ToggleGroupBy,
    DateRange,
    Generate,
}

/// One entity table: its query identity, cached view and inline edit state.
struct TableView {
    entity: EntityKind,
    descriptor: Descriptor,
    observer: QueryObserver,
    snapshot: QuerySnapshot,
    session: EditSession,
    lookups: LookupSet,
    invalidations: Vec<Receiver<CacheEvent>>,
    selected_row: usize,
    selected_col: usize,
}

impl TableView {
    fn new(entity: EntityKind, page_size: u32, store: &mut QueryStore) -> Self {
        let descriptor = Descriptor::with_page_size(page_size);
        let invalidations = std::iter::once(entity)
            .chain(lookup_kinds(entity))
            .map(|kind| store.subscribe(kind))
            .collect();
        Self {
            entity,
            observer: QueryObserver::new(QueryKey::page(entity, descriptor.clone())),
            descriptor,
            snapshot: QuerySnapshot::default(),
            session: EditSession::new(entity),
            lookups: LookupSet::default(),
            invalidations,
            selected_row: 0,
            selected_col: 0,
        }
    }

    fn keys(&self) -> Vec<QueryKey> {
        std::iter::once(self.observer.key().clone())
            .chain(lookup_kinds(self.entity).into_iter().map(QueryKey::all))
            .collect()
    }

    /// Points the observer at the current descriptor. True when the identity changed.
    fn descriptor_changed(&mut self) -> bool {
        let changed = self
            .observer
            .set_key(QueryKey::page(self.entity, self.descriptor.clone()));
        if changed {
            self.selected_row = 0;
        }
        changed
    }

    /// Refreshes the snapshot. True when rows went away and the page moved back.
    fn sync(&mut self, store: &QueryStore) -> bool {
        self.snapshot = self.observer.snapshot(store);
        for kind in lookup_kinds(self.entity) {
            if let Some(page) = store.get(&QueryKey::all(kind)) {
                self.lookups.insert(kind, Lookup::from_page(&page));
            }
        }
        let rows = self.rows().len();
        self.selected_row = self.selected_row.min(rows.saturating_sub(1));
        self.selected_col = self
            .selected_col
            .min(columns(self.entity).len().saturating_sub(1));

        let total = self.snapshot.page.as_ref().map(|page| page.total_row_count);
        total.is_some_and(|total| self.descriptor.clamp_page(total)) && self.descriptor_changed()
    }

    /// Cache keys this table still shows or falls back to.
    fn live_keys(&self) -> Vec<&QueryKey> {
        std::iter::once(self.observer.key())
            .chain(self.observer.placeholder())
            .collect()
    }

    fn drain_invalidations(&mut self) -> bool {
        let mut any = false;
        for receiver in &self.invalidations {
            while receiver.try_recv().is_ok() {
                any = true;
            }
        }
        any
    }

    fn rows(&self) -> &[Record] {
        self.snapshot
            .page
            .as_deref()
            .map(|page| page.rows.as_slice())
            .unwrap_or_default()
    }

    fn selected_record(&self) -> Option<&Record> {
        self.rows().get(self.selected_row)
    }

    fn selected_column(&self) -> &'static Column {
        let all = columns(self.entity);
        &all[self.selected_col.min(all.len() - 1)]
    }

    fn total_row_count(&self) -> u64 {
        self.snapshot.total_row_count()
    }
}

/// Collections a table and its create form resolve labels from.
fn lookup_kinds(entity: EntityKind) -> Vec<EntityKind> {
    let mut kinds = entity.lookups().to_vec();
    if let Some(line_kind) = entity.line_kind() {
        for kind in line_kind.lookups() {
            if *kind != entity && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
    }
    kinds
}

struct ReportView {
    state: ReportState,
    warehouses: Lookup,
    invalidations: Receiver<CacheEvent>,
}

impl ReportView {
    fn new(store: &mut QueryStore) -> Self {
        Self {
            state: ReportState::default(),
            warehouses: Lookup::default(),
            invalidations: store.subscribe(EntityKind::Warehouse),
        }
    }

    fn sync(&mut self, store: &QueryStore) {
        if let Some(page) = store.get(&QueryKey::all(EntityKind::Warehouse)) {
            self.warehouses = Lookup::from_page(&page);
        }
    }

    fn drain_invalidations(&mut self) -> bool {
        let mut any = false;
        while self.invalidations.try_recv().is_ok() {
            any = true;
        }
        any
    }
}

struct ViewData {
    store: QueryStore,
    dispatcher: Dispatcher,
    tables: Vec<TableView>,
    reports: ReportView,
    input: String,
    status_token: u64,
}

impl ViewData {
    fn new(options: ViewOptions) -> Self {
        let mut store = QueryStore::new();
        let tables = EntityKind::ALL
            .into_iter()
            .map(|entity| TableView::new(entity, options.page_size, &mut store))
            .collect();
        let reports = ReportView::new(&mut store);
        Self {
            store,
            dispatcher: Dispatcher::new(options.compensation),
            tables,
            reports,
            input: String::new(),
            status_token: 0,
        }
    }

    fn table(&self, entity: EntityKind) -> Option<&TableView> {
        self.tables.iter().find(|table| table.entity == entity)
    }
}

fn table_mut(tables: &mut [TableView], entity: EntityKind) -> Option<&mut TableView> {
    tables.iter_mut().find(|table| table.entity == entity)
}

pub fn run_app<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    options: ViewOptions,
) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::new(options);
    let (internal_tx, internal_rx) = mpsc::channel();
    request_fetches(state, &mut view_data, runtime, &internal_tx);

    let mut result = Ok(());
    loop {
        process_internal_events(state, &mut view_data, runtime, &internal_tx, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if has_event {
            match event::read().context("read event") {
                Ok(Event::Key(key)) => {
                    if handle_key_event(state, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<R: AppRuntime>(
    state: &mut AppState,
    view_data: &mut ViewData,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    let mut resolved = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                state.dispatch(AppCommand::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::FetchCompleted { ticket, result } => {
                if let Err(error) = &result {
                    tracing::warn!(entity = ?ticket.key.entity, %error, "fetch failed");
                }
                view_data.store.resolve(ticket, result);
                resolved = true;
            }
            InternalEvent::MutationCompleted { mutation, result } => {
                complete_mutation(state, view_data, tx, mutation, result);
            }
            InternalEvent::ReportCompleted { request_id, result } => {
                let applied = view_data.reports.state.finish(request_id, result);
                if applied && let Some(error) = view_data.reports.state.error() {
                    let message = format!("report failed: {}", error.user_message());
                    emit_status(state, view_data, tx, message);
                }
            }
        }
    }

    let invalidated = drain_invalidations(view_data, state.active_tab);
    if invalidated || resolved || sync_views(view_data) {
        request_fetches(state, view_data, runtime, tx);
    }
}

/// Empties every subscription; true when the active tab's data went stale.
fn drain_invalidations(view_data: &mut ViewData, active: TabKind) -> bool {
    let mut active_stale = false;
    for table in &mut view_data.tables {
        let stale = table.drain_invalidations();
        active_stale |= stale && active == TabKind::Entity(table.entity);
    }
    let reports_stale = view_data.reports.drain_invalidations();
    active_stale || (reports_stale && active == TabKind::Reports)
}

/// True when a table moved to another page and needs a fetch.
fn sync_views(view_data: &mut ViewData) -> bool {
    let mut moved = false;
    for table in &mut view_data.tables {
        moved |= table.sync(&view_data.store);
        let evicted = view_data.store.retain_pages(table.entity, &table.live_keys());
        if evicted > 0 {
            tracing::debug!(entity = ?table.entity, evicted, "dropped pages no table shows");
        }
    }
    view_data.reports.sync(&view_data.store);
    moved
}

/// Starts a fetch for every key the active tab shows that lacks fresh data.
fn request_fetches<R: AppRuntime>(
    state: &AppState,
    view_data: &mut ViewData,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
) {
    loop {
        let keys = match state.active_tab {
            TabKind::Entity(entity) => {
                view_data.table(entity).map(TableView::keys).unwrap_or_default()
            }
            TabKind::Reports => vec![QueryKey::all(EntityKind::Warehouse)],
        };
        for key in keys {
            if let Some(ticket) = view_data.store.ensure(&key) {
                start_fetch(&mut view_data.store, runtime, tx, ticket);
            }
        }
        if !sync_views(view_data) {
            break;
        }
    }
}

fn start_fetch<R: AppRuntime>(
    store: &mut QueryStore,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    ticket: FetchTicket,
) {
    tracing::debug!(entity = ?ticket.key.entity, "starting fetch");
    if let Err(error) = runtime.spawn_fetch(ticket.clone(), tx.clone()) {
        tracing::warn!(%error, "could not start fetch");
        store.resolve(ticket, Err(RequestError::network(error.to_string())));
    }
}

fn start_mutation<R: AppRuntime>(
    state: &mut AppState,
    view_data: &mut ViewData,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    mutation: Mutation,
) {
    let policy = view_data.dispatcher.policy();
    if let Err(error) = runtime.spawn_mutation(mutation.clone(), policy, tx.clone()) {
        tracing::warn!(%error, "could not start mutation");
        let result = Err(MutationError::Request(RequestError::network(error.to_string())));
        complete_mutation(state, view_data, tx, mutation, result);
    }
}

fn complete_mutation(
    state: &mut AppState,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    mutation: Mutation,
    result: Result<MutationOutcome, MutationError>,
) {
    let entity = mutation.entity();
    view_data
        .dispatcher
        .apply(&mut view_data.store, &mutation, &result);

    let mut form_closed = false;
    if let Some(table) = table_mut(&mut view_data.tables, entity) {
        table
            .session
            .mutation_finished(mutation.target(), result.as_ref().map(|_| ()));
        form_closed = !table.session.is_open();
    }

    let message = match &result {
        Ok(outcome) => {
            tracing::info!(
                ?entity,
                id = outcome.record_id(),
                verb = mutation.verb(),
                "mutation applied"
            );
            format!("{} #{} {}", entity.label(), outcome.record_id(), mutation.verb())
        }
        Err(error) => {
            tracing::warn!(?entity, %error, "mutation failed");
            error.user_message()
        }
    };

    if state.mode == AppMode::Form && state.active_tab == TabKind::Entity(entity) && form_closed {
        state.dispatch(AppCommand::ExitToNav);
    }
    emit_status(state, view_data, tx, message);
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    state.dispatch(AppCommand::SetStatus(message.into()));
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn handle_key_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match state.mode {
        AppMode::Nav => handle_nav_key(state, runtime, view_data, internal_tx, key),
        AppMode::Search | AppMode::Filter => {
            handle_input_key(state, runtime, view_data, internal_tx, key);
            false
        }
        AppMode::Form => {
            handle_form_key(state, runtime, view_data, internal_tx, key);
            false
        }
        AppMode::ConfirmDelete => {
            handle_confirm_key(state, runtime, view_data, internal_tx, key);
            false
        }
    }
}

fn handle_nav_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    let tab_command = match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Tab | KeyCode::Char('f') => Some(AppCommand::NextTab),
        KeyCode::BackTab | KeyCode::Char('b') => Some(AppCommand::PrevTab),
        _ => None,
    };
    if let Some(command) = tab_command {
        let events = state.dispatch(command);
        for event in events {
            if let AppEvent::TabChanged(tab) = event {
                on_tab_changed(state, runtime, view_data, internal_tx, tab);
            }
        }
        return false;
    }

    match state.active_tab {
        TabKind::Entity(entity) => {
            if let Some(command) = table_command_for_key(key) {
                apply_table_command(state, runtime, view_data, internal_tx, entity, command);
            }
        }
        TabKind::Reports => {
            if let Some(command) = report_command_for_key(key) {
                apply_report_command(state, runtime, view_data, internal_tx, command);
            }
        }
    }
    false
}

fn on_tab_changed<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    tab: TabKind,
) {
    tracing::info!(tab = tab.as_str(), "tab selected");
    if let Err(error) = runtime.save_last_tab(tab) {
        tracing::warn!(%error, "could not persist last tab");
    }
    request_fetches(state, view_data, runtime, internal_tx);
}

fn table_command_for_key(key: KeyEvent) -> Option<TableCommand> {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => Some(TableCommand::MoveRow(1)),
        KeyCode::Char('k') | KeyCode::Up => Some(TableCommand::MoveRow(-1)),
        KeyCode::Char('l') | KeyCode::Right => Some(TableCommand::MoveCol(1)),
        KeyCode::Char('h') | KeyCode::Left => Some(TableCommand::MoveCol(-1)),
        KeyCode::Char('g') | KeyCode::Home => Some(TableCommand::FirstRow),
        KeyCode::Char('G') | KeyCode::End => Some(TableCommand::LastRow),
        KeyCode::Char('s') => Some(TableCommand::CycleSort),
        KeyCode::Char('S') => Some(TableCommand::AddSort),
        KeyCode::Char(']') | KeyCode::PageDown => Some(TableCommand::NextPage),
        KeyCode::Char('[') | KeyCode::PageUp => Some(TableCommand::PrevPage),
        KeyCode::Char('p') => Some(TableCommand::CyclePageSize),
        KeyCode::Char('c') => Some(TableCommand::ClearFilters),
        KeyCode::Char('/') => Some(TableCommand::Search),
        KeyCode::Char('F') => Some(TableCommand::Filter),
        KeyCode::Char('a') => Some(TableCommand::Create),
        KeyCode::Char('e') | KeyCode::Enter => Some(TableCommand::Edit),
        KeyCode::Char('d') => Some(TableCommand::Delete),
        KeyCode::Char('r') => Some(TableCommand::Refresh),
        _ => None,
    }
}

fn apply_table_command<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    entity: EntityKind,
    command: TableCommand,
) {
    let Some(table) = table_mut(&mut view_data.tables, entity) else {
        return;
    };

    let mut refetch = false;
    let mut status = None;
    match command {
        TableCommand::MoveRow(delta) => {
            let last = table.rows().len().saturating_sub(1);
            table.selected_row = table.selected_row.saturating_add_signed(delta).min(last);
        }
        TableCommand::MoveCol(delta) => {
            let last = columns(entity).len().saturating_sub(1);
            table.selected_col = table.selected_col.saturating_add_signed(delta).min(last);
        }
        TableCommand::FirstRow => table.selected_row = 0,
        TableCommand::LastRow => table.selected_row = table.rows().len().saturating_sub(1),
        TableCommand::CycleSort => {
            let id = table.selected_column().id;
            table.descriptor.cycle_sort(id);
            refetch = table.descriptor_changed();
        }
        TableCommand::AddSort => {
            let id = table.selected_column().id;
            let desc = table.descriptor.sort_for(id).is_some_and(|spec| !spec.desc);
            table.descriptor.push_sort(id, desc);
            refetch = table.descriptor_changed();
        }
        TableCommand::NextPage => {
            let total = table.total_row_count();
            refetch = table.descriptor.next_page(total) && table.descriptor_changed();
        }
        TableCommand::PrevPage => {
            refetch = table.descriptor.prev_page() && table.descriptor_changed();
        }
        TableCommand::CyclePageSize => {
            table.descriptor.cycle_page_size();
            refetch = table.descriptor_changed();
            status = Some(format!(
                "page size {}",
                table.descriptor.pagination.page_size
            ));
        }
        TableCommand::ClearFilters => {
            let cleared = table.descriptor.clear_all_filters();
            let search_cleared = table.descriptor.set_global_filter("");
            refetch = (cleared || search_cleared) && table.descriptor_changed();
        }
        TableCommand::Search => {
            view_data.input = table.descriptor.global_filter().to_owned();
            state.dispatch(AppCommand::OpenSearch);
        }
        TableCommand::Filter => {
            let id = table.selected_column().id;
            view_data.input = table.descriptor.filters.get(id).unwrap_or_default().to_owned();
            state.dispatch(AppCommand::OpenFilter);
        }
        TableCommand::Create => {
            if table.session.begin_create() {
                state.dispatch(AppCommand::OpenForm);
            }
        }
        TableCommand::Edit => match table.selected_record().cloned() {
            Some(record) => {
                if table.session.begin_edit(&record) {
                    state.dispatch(AppCommand::OpenForm);
                }
            }
            None => status = Some("no row selected".to_owned()),
        },
        TableCommand::Delete => match table.selected_record().map(Record::id) {
            Some(row_id) => {
                if table.session.request_delete(row_id) {
                    state.dispatch(AppCommand::AskDelete);
                }
            }
            None => status = Some("no row selected".to_owned()),
        },
        TableCommand::Refresh => {
            let key = table.observer.key().clone();
            if let Some(ticket) = view_data.store.refetch(&key) {
                start_fetch(&mut view_data.store, runtime, internal_tx, ticket);
            }
            refetch = sync_views(view_data);
        }
    }

    if refetch {
        request_fetches(state, view_data, runtime, internal_tx);
    }
    if let Some(message) = status {
        emit_status(state, view_data, internal_tx, message);
    }
}

fn handle_input_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Esc => {
            view_data.input.clear();
            state.dispatch(AppCommand::ExitToNav);
        }
        KeyCode::Enter => {
            let input = std::mem::take(&mut view_data.input);
            let mode = state.mode;
            state.dispatch(AppCommand::ExitToNav);
            apply_input(state, runtime, view_data, internal_tx, mode, &input);
        }
        KeyCode::Backspace => {
            view_data.input.pop();
        }
        KeyCode::Char(ch) => view_data.input.push(ch),
        _ => {}
    }
}

fn apply_input<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    mode: AppMode,
    input: &str,
) {
    let entity = match state.active_tab {
        TabKind::Entity(entity) => entity,
        TabKind::Reports => {
            match parse_date_range(input) {
                Ok((from, to)) => view_data.reports.state.set_date_range(from, to),
                Err(message) => emit_status(state, view_data, internal_tx, message),
            }
            return;
        }
    };
    let Some(table) = table_mut(&mut view_data.tables, entity) else {
        return;
    };

    let changed = match mode {
        AppMode::Search => table.descriptor.set_global_filter(input),
        AppMode::Filter => {
            let id = table.selected_column().id;
            if input.trim().is_empty() {
                table.descriptor.clear_filter(id)
            } else {
                table.descriptor.set_filter(id, input)
            }
        }
        _ => false,
    };
    if changed && table.descriptor_changed() {
        request_fetches(state, view_data, runtime, internal_tx);
    }
}

/// Parses `FROM..TO` where either side may be blank. Blank input clears the range.
fn parse_date_range(input: &str) -> Result<(Option<Date>, Option<Date>), String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok((None, None));
    }
    let (from, to) = trimmed
        .split_once(DATE_RANGE_SEPARATOR)
        .unwrap_or((trimmed, ""));
    let parse = |raw: &str| -> Result<Option<Date>, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        iso_date::parse(raw)
            .map(Some)
            .map_err(|_| format!("invalid date {raw:?}; use YYYY-MM-DD"))
    };
    Ok((parse(from)?, parse(to)?))
}

fn handle_form_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let TabKind::Entity(entity) = state.active_tab else {
        state.dispatch(AppCommand::ExitToNav);
        return;
    };
    if key.code == KeyCode::Enter {
        save_form(state, runtime, view_data, internal_tx, entity);
        return;
    }
    let Some(table) = table_mut(&mut view_data.tables, entity) else {
        return;
    };
    if key.code == KeyCode::Esc {
        table.session.cancel();
        state.dispatch(AppCommand::ExitToNav);
        return;
    }

    let lookups = &table.lookups;
    let Some(form) = table.session.form_mut() else {
        state.dispatch(AppCommand::ExitToNav);
        return;
    };
    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('l') if control => {
            form.add_line();
        }
        KeyCode::Char('x') if control => {
            form.remove_line();
        }
        KeyCode::Tab | KeyCode::Down => form.focus_next(),
        KeyCode::BackTab | KeyCode::Up => form.focus_prev(),
        KeyCode::Left => cycle_lookup(form, lookups, false),
        KeyCode::Right => cycle_lookup(form, lookups, true),
        KeyCode::Backspace => form.pop_char(),
        KeyCode::Char(ch) => {
            let is_lookup = form
                .focused_field()
                .is_some_and(|field| field.input.lookup().is_some());
            if !is_lookup {
                form.push_char(ch);
            }
        }
        _ => {}
    }
}

fn cycle_lookup(form: &mut AnyForm, lookups: &LookupSet, forward: bool) {
    let Some(field) = form.focused_field() else {
        return;
    };
    let Some(kind) = field.input.lookup() else {
        return;
    };
    let optional = matches!(field.input, FieldInput::OptionalLookup(_));
    let current = field.value.trim().parse::<i64>().ok();
    let empty = Lookup::default();
    let lookup = lookups.get(kind).unwrap_or(&empty);
    let next = lookup.cycle(current, forward, optional);
    form.set_focused_value(next.map(|id| id.to_string()).unwrap_or_default());
}

fn save_form<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    entity: EntityKind,
) {
    let Some(table) = table_mut(&mut view_data.tables, entity) else {
        return;
    };
    let mutation = match table.session.save() {
        Ok(mutation) => mutation,
        Err(SaveBlocked::Invalid) => {
            emit_status(state, view_data, internal_tx, "fix the highlighted fields");
            return;
        }
        Err(SaveBlocked::Pending) => {
            emit_status(state, view_data, internal_tx, "save already in flight");
            return;
        }
        Err(SaveBlocked::NothingOpen) => {
            state.dispatch(AppCommand::ExitToNav);
            return;
        }
    };

    if view_data.dispatcher.begin(&mutation).is_none() {
        let reason = "a request for this row is still in flight";
        table.session.refuse_submit(reason);
        emit_status(state, view_data, internal_tx, reason);
        return;
    }
    emit_status(state, view_data, internal_tx, "saving...");
    start_mutation(state, view_data, runtime, internal_tx, mutation);
}

fn handle_confirm_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let TabKind::Entity(entity) = state.active_tab else {
        state.dispatch(AppCommand::ExitToNav);
        return;
    };
    let Some(table) = table_mut(&mut view_data.tables, entity) else {
        return;
    };
    match key.code {
        KeyCode::Char('y') => {
            let mutation = table.session.confirm_delete();
            state.dispatch(AppCommand::ExitToNav);
            let Some(mutation) = mutation else {
                return;
            };
            if view_data.dispatcher.begin(&mutation).is_none() {
                emit_status(state, view_data, internal_tx, "delete already in flight");
                return;
            }
            emit_status(state, view_data, internal_tx, "deleting...");
            start_mutation(state, view_data, runtime, internal_tx, mutation);
        }
        KeyCode::Char('n') | KeyCode::Esc => {
            table.session.dismiss_delete();
            state.dispatch(AppCommand::ExitToNav);
            state.dispatch(AppCommand::ClearStatus);
        }
        _ => {}
    }
}

fn report_command_for_key(key: KeyEvent) -> Option<ReportCommand> {
    match key.code {
        KeyCode::Char('1') => Some(ReportCommand::Kind(ReportKind::Inventory)),
        KeyCode::Char('2') => Some(ReportCommand::Kind(ReportKind::Revenue)),
        KeyCode::Char('3') => Some(ReportCommand::Kind(ReportKind::Cost)),
        KeyCode::Char('w') => Some(ReportCommand::CycleWarehouse),
        KeyCode::Char('o') => Some(ReportCommand::CycleSort),
        KeyCode::Char('g') => Some(ReportCommand::ToggleGroupBy),
        KeyCode::Char('/') => Some(ReportCommand::DateRange),
        KeyCode::Enter | KeyCode::Char('r') => Some(ReportCommand::Generate),
        _ => None,
    }
}

fn apply_report_command<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    command: ReportCommand,
) {
    let reports = &mut view_data.reports;
    match command {
        ReportCommand::Kind(kind) => {
            reports.state.set_kind(kind);
        }
        ReportCommand::CycleWarehouse => {
            let current = reports.state.params().warehouse_id.map(WarehouseId::get);
            let next = reports.warehouses.cycle(current, true, true);
            reports.state.set_warehouse(next.map(WarehouseId::new));
        }
        ReportCommand::CycleSort => reports.state.cycle_sort(),
        ReportCommand::ToggleGroupBy => {
            if !reports.state.toggle_group_by() {
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    "grouping applies to the inventory report only",
                );
            }
        }
        ReportCommand::DateRange => {
            if !reports.state.kind().has_date_range() {
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    "the inventory report has no date range",
                );
                return;
            }
            let params = reports.state.params();
            view_data.input = format_date_range(params.date_from, params.date_to);
            state.dispatch(AppCommand::OpenFilter);
        }
        ReportCommand::Generate => match reports.state.begin() {
            Ok((request_id, params)) => {
                let kind = reports.state.kind();
                tracing::info!(report = kind.label(), request_id, "generating report");
                if let Err(error) =
                    runtime.spawn_report(request_id, kind, params, internal_tx.clone())
                {
                    tracing::warn!(%error, "could not start report");
                    reports
                        .state
                        .finish(request_id, Err(RequestError::network(error.to_string())));
                }
            }
            Err(error) => emit_status(state, view_data, internal_tx, error.to_string()),
        },
    }
}

fn format_date_range(from: Option<Date>, to: Option<Date>) -> String {
    if from.is_none() && to.is_none() {
        return String::new();
    }
    format!(
        "{}{DATE_RANGE_SEPARATOR}{}",
        from.map(iso_date::format).unwrap_or_default(),
        to.map(iso_date::format).unwrap_or_default()
    )
}

fn render(frame: &mut ratatui::Frame<'_>, state: &AppState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let selected = TabKind::ALL
        .iter()
        .position(|tab| *tab == state.active_tab)
        .unwrap_or(0);
    let tab_titles = TabKind::ALL
        .iter()
        .map(|tab| tab.label())
        .collect::<Vec<&str>>();
    let tabs = Tabs::new(tab_titles)
        .block(Block::default().title("sklad").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(selected);
    frame.render_widget(tabs, layout[0]);

    match state.active_tab {
        TabKind::Entity(entity) => {
            if let Some(table) = view_data.table(entity) {
                render_table(frame, layout[1], table);
                if state.mode == AppMode::Form {
                    render_form(frame, table);
                }
            }
        }
        TabKind::Reports => render_reports(frame, layout[1], &view_data.reports),
    }

    let status_widget = Paragraph::new(status_text(state, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status_widget, layout[2]);
}

fn render_table(frame: &mut ratatui::Frame<'_>, area: Rect, table: &TableView) {
    let table_area = match error_banner(table) {
        Some(banner) => {
            let split = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(1), Constraint::Min(1)])
                .split(area);
            let widget = Paragraph::new(banner).style(
                Style::default()
                    .fg(Color::White)
                    .bg(Color::Red)
                    .add_modifier(Modifier::BOLD),
            );
            frame.render_widget(widget, split[0]);
            split[1]
        }
        None => area,
    };

    let all_columns = columns(table.entity);
    let widths = vec![Constraint::Min(6); all_columns.len().max(1)];

    let header = Row::new(all_columns.iter().map(|column| {
        Cell::from(header_label(&table.descriptor, column)).style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
    }));

    let rows = table.rows().iter().enumerate().map(|(row_index, record)| {
        let selected_row = row_index == table.selected_row;
        let cells = row_texts(table, record)
            .into_iter()
            .enumerate()
            .map(|(column_index, text)| {
                let mut style = Style::default();
                if selected_row {
                    style = style.bg(Color::DarkGray);
                }
                if selected_row && column_index == table.selected_col {
                    style = Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD);
                }
                Cell::from(text).style(style)
            })
            .collect::<Vec<_>>();
        Row::new(cells)
    });

    let widget = Table::new(rows, widths).header(header).block(
        Block::default()
            .borders(Borders::ALL)
            .title(table_title(table)),
    );
    frame.render_widget(widget, table_area);
}

fn render_form(frame: &mut ratatui::Frame<'_>, table: &TableView) {
    let Some(form) = table.session.form() else {
        return;
    };
    let area = centered_rect(60, 70, frame.area());
    frame.render_widget(Clear, area);

    let focused = form.focused();
    let mut lines = form
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let marker = if index == focused { "> " } else { "  " };
            let text = format!(
                "{marker}{}: {}",
                field.label,
                field_display(field, &table.lookups)
            );
            let mut spans = vec![Span::styled(
                text,
                if index == focused {
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                },
            )];
            if let Some(error) = &field.error {
                spans.push(Span::styled(
                    format!("  {error}"),
                    Style::default().fg(Color::Red),
                ));
            }
            Line::from(spans)
        })
        .collect::<Vec<_>>();

    match form.running_total() {
        Some(Ok(total)) => {
            lines.push(Line::from(""));
            lines.push(Line::from(format!("total: {}", total.display_rub())));
        }
        Some(Err(error)) => {
            lines.push(Line::from(""));
            lines.push(Line::styled(
                format!("total: {error}"),
                Style::default().fg(Color::Red),
            ));
        }
        None => {}
    }
    if let Some(error) = table.session.last_error() {
        lines.push(Line::from(""));
        lines.push(Line::styled(
            error.to_owned(),
            Style::default().fg(Color::Red),
        ));
    }

    let widget = Paragraph::new(lines).block(
        Block::default()
            .title(form_title(&table.session))
            .borders(Borders::ALL)
            .style(Style::default().fg(Color::White)),
    );
    frame.render_widget(widget, area);
}

fn render_reports(frame: &mut ratatui::Frame<'_>, area: Rect, reports: &ReportView) {
    let split = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    let (headers, body) = match reports.state.rows() {
        Some(rows) => report_table(rows),
        None => (report_headers(reports.state.kind()), Vec::new()),
    };
    let widths = vec![Constraint::Min(8); headers.len()];
    let header = Row::new(headers.iter().map(|label| {
        Cell::from(*label).style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
    }));
    let widget = Table::new(body.into_iter().map(Row::new), widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(report_title(reports)),
        );
    frame.render_widget(widget, split[0]);

    let footer = match (reports.state.error(), reports.state.grand_total()) {
        (Some(error), _) => Paragraph::new(error.user_message()).style(Style::default().fg(Color::Red)),
        (None, Some(Ok(total))) => Paragraph::new(grand_total_text(Ok(total))),
        (None, Some(Err(error))) => Paragraph::new(grand_total_text(Err(error)))
            .style(Style::default().fg(Color::Red)),
        (None, None) => Paragraph::new(String::new()),
    };
    frame.render_widget(footer, split[1]);
}

fn table_title(table: &TableView) -> String {
    let total = table.total_row_count();
    let pagination = table.descriptor.pagination;
    let mut title = format!(
        "{} · page {}/{} · {} rows",
        TabKind::Entity(table.entity).label(),
        pagination.page_index + 1,
        page_count(total, pagination.page_size).max(1),
        total
    );
    let search = table.descriptor.global_filter();
    if !search.is_empty() {
        title.push_str(&format!(" · search: {search}"));
    }
    if !table.descriptor.filters.is_empty() {
        title.push_str(&format!(" · {} filter(s)", table.descriptor.filters.len()));
    }
    if table.snapshot.is_loading {
        title.push_str(" · loading");
    } else if table.snapshot.is_refetching {
        title.push_str(" · refreshing");
    }
    title
}

fn header_label(descriptor: &Descriptor, column: &Column) -> String {
    let mut label = column.label.to_owned();
    if let Some(position) = descriptor
        .sorting
        .iter()
        .position(|spec| spec.id == column.id)
    {
        let marker = if descriptor.sorting[position].desc {
            SORT_DESC
        } else {
            SORT_ASC
        };
        label.push(' ');
        label.push_str(marker);
        if descriptor.sorting.len() > 1 {
            label.push_str(&(position + 1).to_string());
        }
    }
    if descriptor.filters.get(column.id).is_some() {
        label.push_str(FILTER_MARK);
    }
    label
}

fn row_texts(table: &TableView, record: &Record) -> Vec<String> {
    columns(table.entity)
        .iter()
        .map(|column| match cell(record, column) {
            sklad_app::Cell::Text(text) => text,
            sklad_app::Cell::Ref(kind, Some(id)) => table.lookups.label(kind, id).to_owned(),
            sklad_app::Cell::Ref(_, None) => MISSING_LABEL.to_owned(),
        })
        .collect()
}

fn error_banner(table: &TableView) -> Option<String> {
    let error = table.snapshot.error.as_ref()?;
    let message = error.user_message();
    Some(if table.snapshot.page.is_some() {
        format!("{message} -- showing last loaded rows, r to retry")
    } else {
        format!("{message} -- r to retry")
    })
}

fn form_title(session: &EditSession) -> String {
    let label = session.entity().label();
    match session.editing_row() {
        Some(row_id) => format!("edit {label} #{row_id}"),
        None => format!("new {label}"),
    }
}

fn field_display(field: &FieldView, lookups: &LookupSet) -> String {
    let Some(kind) = field.input.lookup() else {
        return field.value.clone();
    };
    match field.value.trim().parse::<i64>() {
        Ok(id) => format!("{} (#{id})", lookups.label(kind, id)),
        Err(_) if matches!(field.input, FieldInput::OptionalLookup(_)) => "none".to_owned(),
        Err(_) => "choose with ←/→".to_owned(),
    }
}

fn report_title(reports: &ReportView) -> String {
    let state = &reports.state;
    let params = state.params();
    let warehouse = params
        .warehouse_id
        .map_or("all", |id| reports.warehouses.resolve(id.get()));
    let mut title = format!("{} report · warehouse: {warehouse}", state.kind().label());
    if state.kind().has_date_range() {
        let range = format_date_range(params.date_from, params.date_to);
        if !range.is_empty() {
            title.push_str(&format!(" · {range}"));
        }
    }
    if let Some(group_by) = params.group_by {
        title.push_str(&format!(" · group by: {}", group_by.label()));
    }
    title.push_str(&format!(" · sort: {}", params.sort_by.label()));
    if state.is_loading() {
        title.push_str(" · loading");
    }
    title
}

fn report_headers(kind: ReportKind) -> Vec<&'static str> {
    match kind {
        ReportKind::Inventory => vec!["Warehouse", "Product", REMAINING_LABEL],
        ReportKind::Revenue | ReportKind::Cost => {
            vec!["Date", "Warehouse", "Product", "Qty", "Total"]
        }
    }
}

fn report_table(rows: &ReportRows) -> (Vec<&'static str>, Vec<Vec<String>>) {
    match rows {
        ReportRows::Inventory(rows) => (
            report_headers(ReportKind::Inventory),
            rows.iter()
                .map(|row| {
                    vec![
                        row.warehouse_name.clone().unwrap_or_else(|| "all".to_owned()),
                        row.product_name.clone().unwrap_or_else(|| "all".to_owned()),
                        row.remaining.to_string(),
                    ]
                })
                .collect(),
        ),
        ReportRows::Money(rows) => (
            report_headers(ReportKind::Revenue),
            rows.iter()
                .map(|row| {
                    vec![
                        row.date.map(iso_date::format).unwrap_or_default(),
                        row.warehouse_name
                            .clone()
                            .unwrap_or_else(|| MISSING_LABEL.to_owned()),
                        row.product_name.clone(),
                        row.quantity.to_string(),
                        row.total.display_rub(),
                    ]
                })
                .collect(),
        ),
    }
}

fn grand_total_text(total: Result<Money, MoneyError>) -> String {
    match total {
        Ok(total) => format!("grand total: {}", total.display_rub()),
        Err(error) => format!("grand total: {error}"),
    }
}

fn status_text(state: &AppState, view_data: &ViewData) -> String {
    let mode = mode_label(state.mode);
    match state.mode {
        AppMode::Search => return format!("{mode} | search: {}_ | enter apply | esc cancel", view_data.input),
        AppMode::Filter => {
            let prompt = match state.active_tab {
                TabKind::Reports => "dates (FROM..TO)".to_owned(),
                TabKind::Entity(entity) => view_data
                    .table(entity)
                    .map_or_else(String::new, |table| {
                        format!("filter {}", table.selected_column().label)
                    }),
            };
            return format!("{mode} | {prompt}: {}_ | enter apply | esc cancel", view_data.input);
        }
        _ => {}
    }

    let hints = match (state.mode, state.active_tab) {
        (AppMode::Form, _) => "tab/⇧tab field | ←/→ choose | ctrl+l/ctrl+x line | enter save | esc cancel",
        (AppMode::ConfirmDelete, _) => "y confirm | n cancel",
        (_, TabKind::Reports) => "1/2/3 kind | w warehouse | / dates | g group | o sort | enter run | f/b tab | q",
        (_, TabKind::Entity(_)) => "j/k/h/l | s/S sort | / search | F filter | c clear | [/] page | p size | a/e/d | r | f/b tab | q",
    };
    match &state.status_line {
        Some(status) => format!("{mode} | {status} | {hints}"),
        None => format!("{mode} | {hints}"),
    }
}

fn mode_label(mode: AppMode) -> &'static str {
    match mode {
        AppMode::Nav => "NAV",
        AppMode::Search => "SEARCH",
        AppMode::Filter => "FILTER",
        AppMode::Form => "FORM",
        AppMode::ConfirmDelete => "DELETE",
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        AppRuntime, InternalEvent, ViewData, ViewOptions, grand_total_text, handle_key_event,
        header_label, lookup_kinds, parse_date_range, process_internal_events, report_table,
        report_title, request_fetches, row_texts, status_text, table_title,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use sklad_app::{
        AppMode, AppState, CompensationPolicy, Descriptor, EntityKind, Money, MoneyError, MoneyRow,
        Mutation, MutationError, MutationOutcome, Page, ProductId, QueryKey, Record, ReportKind,
        ReportParams, ReportRows, RequestError, TabKind, columns,
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::mpsc::{self, Receiver, Sender};
    use time::macros::date;

    #[derive(Debug, Default)]
    struct TestRuntime {
        rows: BTreeMap<EntityKind, Vec<Record>>,
        fetches: Vec<QueryKey>,
        mutations: Vec<Mutation>,
        mutation_error: Option<MutationError>,
        report_rows: Option<ReportRows>,
        reports: Vec<(ReportKind, ReportParams)>,
        saved_tabs: Vec<TabKind>,
        next_id: i64,
    }

    impl TestRuntime {
        fn with_rows(mut self, kind: EntityKind, rows: Vec<serde_json::Value>) -> Self {
            let records = rows
                .into_iter()
                .map(|value| Record::decode(kind, value).expect("fixture decodes"))
                .collect();
            self.rows.insert(kind, records);
            self
        }

        fn fetch_count(&self, entity: EntityKind) -> usize {
            self.fetches
                .iter()
                .filter(|key| key.entity == entity && key.descriptor().is_some())
                .count()
        }
    }

    impl AppRuntime for TestRuntime {
        fn fetch(&mut self, key: &QueryKey) -> Result<Page, RequestError> {
            self.fetches.push(key.clone());
            let rows = self.rows.get(&key.entity).cloned().unwrap_or_default();
            let Some(descriptor) = key.descriptor() else {
                return Ok(Page::collection(rows));
            };
            let size = descriptor.pagination.page_size as usize;
            let start = descriptor.pagination.page_index as usize * size;
            Ok(Page {
                total_row_count: rows.len() as u64,
                rows: rows.into_iter().skip(start).take(size).collect(),
            })
        }

        fn mutate(
            &mut self,
            mutation: &Mutation,
            _policy: CompensationPolicy,
        ) -> Result<MutationOutcome, MutationError> {
            self.mutations.push(mutation.clone());
            if let Some(error) = self.mutation_error.take() {
                return Err(error);
            }
            match mutation {
                Mutation::Create(fields) => {
                    self.next_id += 1;
                    let record = fields.clone().into_record(100 + self.next_id);
                    self.rows
                        .entry(fields.kind())
                        .or_default()
                        .push(record.clone());
                    Ok(MutationOutcome::Created(record))
                }
                Mutation::Update { id, fields } => {
                    Ok(MutationOutcome::Updated(fields.clone().into_record(*id)))
                }
                Mutation::Delete { entity, id } => {
                    if let Some(rows) = self.rows.get_mut(entity) {
                        rows.retain(|row| row.id() != *id);
                    }
                    Ok(MutationOutcome::Deleted {
                        entity: *entity,
                        id: *id,
                    })
                }
                Mutation::CreateNote(note) => Ok(MutationOutcome::NoteCreated {
                    header: note.header_fields().into_record(1),
                    lines: Vec::new(),
                }),
            }
        }

        fn generate_report(
            &mut self,
            kind: ReportKind,
            params: &ReportParams,
        ) -> Result<ReportRows, RequestError> {
            self.reports.push((kind, params.clone()));
            Ok(self
                .report_rows
                .clone()
                .unwrap_or(ReportRows::Money(Vec::new())))
        }

        fn save_last_tab(&mut self, tab: TabKind) -> anyhow::Result<()> {
            self.saved_tabs.push(tab);
            Ok(())
        }
    }

    struct Harness {
        state: AppState,
        runtime: TestRuntime,
        view: ViewData,
        tx: Sender<InternalEvent>,
        rx: Receiver<InternalEvent>,
    }

    impl Harness {
        fn new(tab: TabKind, runtime: TestRuntime) -> Self {
            Self::with_options(tab, runtime, ViewOptions::default())
        }

        fn with_options(tab: TabKind, runtime: TestRuntime, options: ViewOptions) -> Self {
            let (tx, rx) = mpsc::channel();
            let mut harness = Self {
                state: AppState::with_tab(tab),
                runtime,
                view: ViewData::new(options),
                tx,
                rx,
            };
            request_fetches(
                &harness.state,
                &mut harness.view,
                &mut harness.runtime,
                &harness.tx,
            );
            harness.pump();
            harness
        }

        fn pump(&mut self) {
            for _ in 0..4 {
                process_internal_events(
                    &mut self.state,
                    &mut self.view,
                    &mut self.runtime,
                    &self.tx,
                    &self.rx,
                );
            }
        }

        fn press_with(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
            let quit = handle_key_event(
                &mut self.state,
                &mut self.runtime,
                &mut self.view,
                &self.tx,
                KeyEvent::new(code, modifiers),
            );
            self.pump();
            quit
        }

        fn press(&mut self, code: KeyCode) -> bool {
            self.press_with(code, KeyModifiers::NONE)
        }

        fn type_text(&mut self, text: &str) {
            for ch in text.chars() {
                self.press(KeyCode::Char(ch));
            }
        }

        fn table(&self, entity: EntityKind) -> &super::TableView {
            self.view.table(entity).expect("every entity has a table")
        }
    }

    fn warehouses() -> TestRuntime {
        TestRuntime::default()
            .with_rows(
                EntityKind::Warehouse,
                vec![
                    json!({"warehouse_id": 1, "name": "North", "address": "2 Pier Rd", "manager_id": 1}),
                    json!({"warehouse_id": 2, "name": "South", "address": "9 Dock St"}),
                ],
            )
            .with_rows(
                EntityKind::Employee,
                vec![json!({"employee_id": 1, "first_name": "Anna", "last_name": "Petrova", "position_id": 1, "warehouse_id": 1})],
            )
    }

    #[test]
    fn startup_fetches_page_and_lookups_then_resolves_labels() {
        let harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        assert_eq!(harness.runtime.fetch_count(EntityKind::Warehouse), 1);
        assert!(
            harness
                .runtime
                .fetches
                .contains(&QueryKey::all(EntityKind::Employee))
        );

        let table = harness.table(EntityKind::Warehouse);
        let rows = table.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(row_texts(table, &rows[0])[3], "Petrova Anna");
        assert_eq!(row_texts(table, &rows[1])[3], "N/A");
        assert_eq!(table_title(table), "warehouses · page 1/1 · 2 rows");
    }

    #[test]
    fn tab_switch_persists_choice_and_loads_the_new_table() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        harness.press(KeyCode::Char('f'));
        assert_eq!(harness.state.active_tab, TabKind::ALL[1]);
        assert_eq!(harness.runtime.saved_tabs, vec![TabKind::ALL[1]]);
        assert_eq!(harness.runtime.fetch_count(EntityKind::Employee), 1);

        harness.press(KeyCode::Char('b'));
        assert_eq!(
            harness.runtime.fetch_count(EntityKind::Warehouse),
            1,
            "returning to a fresh table reuses the cache"
        );
    }

    #[test]
    fn search_updates_descriptor_and_refetches() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        harness.press(KeyCode::Char('/'));
        assert_eq!(harness.state.mode, AppMode::Search);
        harness.type_text("nor");
        assert!(status_text(&harness.state, &harness.view).contains("search: nor_"));
        harness.press(KeyCode::Enter);

        assert_eq!(harness.state.mode, AppMode::Nav);
        let table = harness.table(EntityKind::Warehouse);
        assert_eq!(table.descriptor.global_filter(), "nor");
        let last = harness.runtime.fetches.last().expect("a fetch ran");
        assert_eq!(
            last.descriptor().map(Descriptor::global_filter),
            Some("nor")
        );
        assert_eq!(harness.runtime.fetch_count(EntityKind::Warehouse), 2);
    }

    #[test]
    fn column_filter_marks_header() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        harness.press(KeyCode::Char('l'));
        harness.press(KeyCode::Char('F'));
        harness.type_text("North");
        harness.press(KeyCode::Enter);

        let table = harness.table(EntityKind::Warehouse);
        assert_eq!(table.descriptor.filters.get("name"), Some("North"));
        assert_eq!(
            header_label(&table.descriptor, &columns(EntityKind::Warehouse)[1]),
            "Name*"
        );
    }

    #[test]
    fn sort_markers_show_direction_and_priority() {
        let mut descriptor = Descriptor::default();
        let cols = columns(EntityKind::Product);
        descriptor.cycle_sort(cols[1].id);
        assert_eq!(header_label(&descriptor, &cols[1]), "Product ▲");
        descriptor.push_sort(cols[3].id, true);
        assert_eq!(header_label(&descriptor, &cols[1]), "Product ▲1");
        assert_eq!(header_label(&descriptor, &cols[3]), "Price ▼2");
    }

    #[test]
    fn invalid_create_never_reaches_the_runtime() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Product), TestRuntime::default());
        harness.press(KeyCode::Char('a'));
        assert_eq!(harness.state.mode, AppMode::Form);
        harness.press(KeyCode::Enter);

        assert!(harness.runtime.mutations.is_empty());
        assert_eq!(harness.state.mode, AppMode::Form);
        let table = harness.table(EntityKind::Product);
        let form = table.session.form().expect("form stays open");
        assert!(form.has_errors());
        assert_eq!(
            harness.state.status_line.as_deref(),
            Some("fix the highlighted fields")
        );
    }

    #[test]
    fn created_warehouse_closes_form_and_refetches_list() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        harness.press(KeyCode::Char('a'));
        harness.type_text("Central");
        harness.press(KeyCode::Tab);
        harness.type_text("1 Main St");
        harness.press(KeyCode::Enter);

        assert_eq!(harness.runtime.mutations.len(), 1);
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert_eq!(
            harness.state.status_line.as_deref(),
            Some("warehouse #101 created")
        );
        assert_eq!(harness.runtime.fetch_count(EntityKind::Warehouse), 2);

        let table = harness.table(EntityKind::Warehouse);
        let created = table
            .rows()
            .iter()
            .find(|row| row.id() == 101)
            .expect("new row is listed");
        assert_eq!(row_texts(table, created)[3], "N/A");
    }

    #[test]
    fn manager_select_cycles_through_lookup_and_none() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        harness.press(KeyCode::Char('a'));
        harness.press(KeyCode::Tab);
        harness.press(KeyCode::Tab);
        harness.press(KeyCode::Right);

        let table = harness.table(EntityKind::Warehouse);
        let field = table
            .session
            .form()
            .and_then(|form| form.focused_field())
            .expect("manager focused");
        assert_eq!(field.label, "manager");
        assert_eq!(field.value, "1");
        assert_eq!(
            super::field_display(&field, &table.lookups),
            "Petrova Anna (#1)"
        );

        harness.press(KeyCode::Right);
        let field = harness
            .table(EntityKind::Warehouse)
            .session
            .form()
            .and_then(|form| form.focused_field())
            .expect("manager focused");
        assert_eq!(field.value, "");
    }

    #[test]
    fn failed_save_keeps_form_open_with_server_message() {
        let mut runtime = warehouses();
        runtime.mutation_error = Some(MutationError::Request(RequestError::Server {
            status: 409,
            message: Some("name already taken".into()),
        }));
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), runtime);
        harness.press(KeyCode::Char('a'));
        harness.type_text("North");
        harness.press(KeyCode::Tab);
        harness.type_text("2 Pier Rd");
        harness.press(KeyCode::Enter);

        assert_eq!(harness.state.mode, AppMode::Form);
        let session = &harness.table(EntityKind::Warehouse).session;
        assert!(session.is_open());
        assert!(!session.is_submitting());
        assert_eq!(session.last_error(), Some("name already taken"));
        assert_eq!(harness.runtime.fetch_count(EntityKind::Warehouse), 1);
    }

    #[test]
    fn delete_waits_for_confirmation() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        harness.press(KeyCode::Char('j'));
        harness.press(KeyCode::Char('d'));
        assert_eq!(harness.state.mode, AppMode::ConfirmDelete);
        harness.press(KeyCode::Char('n'));
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert!(harness.runtime.mutations.is_empty());

        harness.press(KeyCode::Char('d'));
        harness.press(KeyCode::Char('y'));
        assert_eq!(
            harness.runtime.mutations,
            vec![Mutation::Delete {
                entity: EntityKind::Warehouse,
                id: 2,
            }]
        );
        let table = harness.table(EntityKind::Warehouse);
        assert!(table.rows().iter().all(|row| row.id() != 2));
    }

    fn numbered_warehouses(count: i64) -> TestRuntime {
        let rows = (1..=count)
            .map(|id| json!({"warehouse_id": id, "name": format!("Store {id}"), "address": "1 Quay"}))
            .collect();
        TestRuntime::default().with_rows(EntityKind::Warehouse, rows)
    }

    fn small_pages() -> ViewOptions {
        ViewOptions {
            page_size: 2,
            ..ViewOptions::default()
        }
    }

    #[test]
    fn deleting_the_only_row_on_the_last_page_moves_back_a_page() {
        let mut harness = Harness::with_options(
            TabKind::Entity(EntityKind::Warehouse),
            numbered_warehouses(5),
            small_pages(),
        );
        harness.press(KeyCode::Char(']'));
        harness.press(KeyCode::Char(']'));
        harness.pump();
        let table = harness.table(EntityKind::Warehouse);
        assert_eq!(table.descriptor.pagination.page_index, 2);
        assert_eq!(table_title(table), "warehouses · page 3/3 · 5 rows");

        harness.press(KeyCode::Char('d'));
        harness.press(KeyCode::Char('y'));
        harness.pump();

        let table = harness.table(EntityKind::Warehouse);
        assert_eq!(table.descriptor.pagination.page_index, 1);
        assert_eq!(table_title(table), "warehouses · page 2/2 · 4 rows");
        assert_eq!(
            table.rows().iter().map(|row| row.id()).collect::<Vec<_>>(),
            vec![3, 4]
        );
    }

    #[test]
    fn paging_away_drops_pages_no_table_shows() {
        let mut harness = Harness::with_options(
            TabKind::Entity(EntityKind::Warehouse),
            numbered_warehouses(5),
            small_pages(),
        );
        let first = harness.table(EntityKind::Warehouse).observer.key().clone();
        harness.press(KeyCode::Char(']'));
        harness.pump();
        harness.press(KeyCode::Char(']'));
        harness.pump();

        assert!(harness.view.store.get(&first).is_none());
        assert_eq!(harness.runtime.fetch_count(EntityKind::Warehouse), 3);

        harness.press(KeyCode::Char('['));
        harness.press(KeyCode::Char('['));
        harness.pump();
        assert_eq!(harness.runtime.fetch_count(EntityKind::Warehouse), 5);
        assert!(harness.view.store.get(&first).is_some());
    }

    #[test]
    fn note_tables_load_line_product_lookup() {
        assert_eq!(
            lookup_kinds(EntityKind::Income),
            vec![
                EntityKind::Warehouse,
                EntityKind::Supplier,
                EntityKind::Employee,
                EntityKind::Product,
            ]
        );
        assert_eq!(lookup_kinds(EntityKind::Product), Vec::new());
    }

    #[test]
    fn note_form_adds_and_removes_lines() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Outcome), TestRuntime::default());
        harness.press(KeyCode::Char('a'));
        let count = |harness: &Harness| {
            harness
                .table(EntityKind::Outcome)
                .session
                .form()
                .map_or(0, |form| form.fields().len())
        };
        let before = count(&harness);
        harness.press_with(KeyCode::Char('l'), KeyModifiers::CONTROL);
        assert_eq!(count(&harness), before + 3);
        harness.press_with(KeyCode::Char('x'), KeyModifiers::CONTROL);
        assert_eq!(count(&harness), before);
    }

    #[test]
    fn revenue_report_renders_grand_total() {
        let mut runtime = TestRuntime::default();
        runtime.report_rows = Some(ReportRows::Money(
            [5_000, 7_000, 3_000]
                .into_iter()
                .enumerate()
                .map(|(index, kopecks)| MoneyRow {
                    date: Some(date!(2026 - 02 - 01)),
                    warehouse_id: None,
                    warehouse_name: Some("North".into()),
                    product_id: ProductId::new(index as i64 + 1),
                    product_name: format!("Item {index}"),
                    quantity: 1,
                    total: Money::from_kopecks(kopecks),
                })
                .collect(),
        ));
        let mut harness = Harness::new(TabKind::Reports, runtime);
        harness.press(KeyCode::Char('2'));
        harness.press(KeyCode::Enter);

        assert_eq!(harness.runtime.reports.len(), 1);
        assert_eq!(harness.runtime.reports[0].0, ReportKind::Revenue);
        let state = &harness.view.reports.state;
        assert_eq!(state.rows().map(ReportRows::len), Some(3));
        let total = state.grand_total().expect("money report has a total");
        assert_eq!(grand_total_text(total), "grand total: 150.00₽");
        assert_eq!(
            grand_total_text(Err(MoneyError::Overflow)),
            "grand total: amount is too large"
        );
    }

    #[test]
    fn inventory_report_shows_remaining_column() {
        let (headers, rows) = report_table(&ReportRows::Inventory(Vec::new()));
        assert_eq!(headers, vec!["Warehouse", "Product", "Остаток"]);
        assert!(rows.is_empty());
    }

    #[test]
    fn report_warehouse_cycles_from_lookup() {
        let mut harness = Harness::new(TabKind::Reports, warehouses());
        harness.press(KeyCode::Char('w'));
        assert!(report_title(&harness.view.reports).contains("warehouse: North"));
        harness.press(KeyCode::Char('w'));
        harness.press(KeyCode::Char('w'));
        assert!(report_title(&harness.view.reports).contains("warehouse: all"));
    }

    #[test]
    fn inverted_date_range_is_rejected_before_any_request() {
        let mut harness = Harness::new(TabKind::Reports, TestRuntime::default());
        harness.press(KeyCode::Char('3'));
        harness.press(KeyCode::Char('/'));
        harness.type_text("2026-03-01..2026-02-01");
        harness.press(KeyCode::Enter);
        harness.press(KeyCode::Enter);

        assert!(harness.runtime.reports.is_empty());
        let status = harness.state.status_line.clone().unwrap_or_default();
        assert!(status.contains("after"), "{status}");
    }

    #[test]
    fn date_range_parsing() {
        assert_eq!(parse_date_range("  "), Ok((None, None)));
        assert_eq!(
            parse_date_range("2026-01-01.."),
            Ok((Some(date!(2026 - 01 - 01)), None))
        );
        assert_eq!(
            parse_date_range("..2026-02-01"),
            Ok((None, Some(date!(2026 - 02 - 01))))
        );
        assert!(parse_date_range("01/02/2026").is_err());
    }

    #[test]
    fn stale_status_clear_is_ignored() {
        let mut harness = Harness::new(TabKind::Reports, TestRuntime::default());
        harness.press(KeyCode::Char('2'));
        harness.press(KeyCode::Char('g'));
        let token = harness.view.status_token;
        assert!(token >= 1);

        harness
            .tx
            .send(InternalEvent::ClearStatus { token: token - 1 })
            .expect("send");
        harness.pump();
        assert!(harness.state.status_line.is_some());

        harness
            .tx
            .send(InternalEvent::ClearStatus { token })
            .expect("send");
        harness.pump();
        assert_eq!(harness.state.status_line, None);
    }

    #[test]
    fn quit_keys() {
        let mut harness = Harness::new(TabKind::Entity(EntityKind::Warehouse), warehouses());
        assert!(harness.press(KeyCode::Char('q')));
        assert!(harness.press_with(KeyCode::Char('c'), KeyModifiers::CONTROL));
    }
}
