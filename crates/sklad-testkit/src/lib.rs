// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod reports;
mod seed;

pub use seed::{Dataset, InventoryFaker};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use sklad_app::{EntityKind, ReportKind, ReportParams};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Method, Request, Response, Server};
use url::Url;

/// One request the fake server answered, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
struct Failure {
    method: String,
    path: String,
    status: u16,
    body: String,
}

#[derive(Debug, Default)]
struct FakeState {
    collections: BTreeMap<EntityKind, Vec<Value>>,
    failures: Vec<Failure>,
    log: Vec<RecordedRequest>,
}

impl FakeState {
    fn rows(&self, kind: EntityKind) -> &[Value] {
        self.collections.get(&kind).map_or(&[], Vec::as_slice)
    }

    fn next_id(&self, kind: EntityKind) -> i64 {
        self.rows(kind)
            .iter()
            .filter_map(|row| row.get(kind.id_field()).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn insert(&mut self, kind: EntityKind, mut row: Value) -> i64 {
        let id = match row.get(kind.id_field()).and_then(Value::as_i64) {
            Some(id) => id,
            None => self.next_id(kind),
        };
        if let Some(object) = row.as_object_mut() {
            object.insert(kind.id_field().to_owned(), json!(id));
        }
        self.collections.entry(kind).or_default().push(row);
        id
    }

    fn position(&self, kind: EntityKind, id: i64) -> Option<usize> {
        self.rows(kind)
            .iter()
            .position(|row| row.get(kind.id_field()).and_then(Value::as_i64) == Some(id))
    }

    fn take_failure(&mut self, method: &str, path: &str) -> Option<Failure> {
        let index = self
            .failures
            .iter()
            .position(|failure| failure.method == method && failure.path == path)?;
        Some(self.failures.remove(index))
    }
}

/// In-process stand-in for the inventory REST API, served over loopback HTTP.
pub struct FakeApi {
    base_url: String,
    state: Arc<Mutex<FakeState>>,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl FakeApi {
    pub fn start() -> Result<Self> {
        Self::start_on("127.0.0.1:0")
    }

    pub fn start_on(addr: &str) -> Result<Self> {
        let server = Server::http(addr).map_err(|error| anyhow!("start fake API on {addr}: {error}"))?;
        let local = server
            .server_addr()
            .to_ip()
            .context("fake API is not bound to an IP address")?;
        let server = Arc::new(server);
        let state = Arc::new(Mutex::new(FakeState::default()));

        let handle = {
            let server = Arc::clone(&server);
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("sklad-fake-api".to_owned())
                .spawn(move || {
                    for request in server.incoming_requests() {
                        handle_request(&state, request);
                    }
                })
                .context("spawn fake API thread")?
        };

        Ok(Self {
            base_url: format!("http://{local}"),
            state,
            server,
            handle: Some(handle),
        })
    }

    /// Starts a server preloaded with a deterministic dataset.
    pub fn with_demo_data(seed: u64) -> Result<Self> {
        let api = Self::start()?;
        api.load(&InventoryFaker::new(seed).dataset());
        Ok(api)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn load(&self, dataset: &Dataset) {
        let mut state = self.lock();
        for (kind, row) in &dataset.rows {
            state.insert(*kind, row.clone());
        }
    }

    /// Adds a row, assigning the next id when it has none.
    pub fn insert(&self, kind: EntityKind, row: Value) -> i64 {
        self.lock().insert(kind, row)
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<Value> {
        self.lock().rows(kind).to_vec()
    }

    /// Makes the next `method path` request answer `status` with a JSON message.
    pub fn fail_next(&self, method: &str, path: &str, status: u16, message: &str) {
        let body = json!({ "message": message }).to_string();
        self.fail_next_raw(method, path, status, &body);
    }

    pub fn fail_next_raw(&self, method: &str, path: &str, status: u16, body: &str) {
        self.lock().failures.push(Failure {
            method: method.to_ascii_uppercase(),
            path: path.to_owned(),
            status,
            body: body.to_owned(),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().log.len()
    }

    pub fn clear_requests(&self) {
        self.lock().log.clear();
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FakeApi {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn temp_state_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("state.db");
    Ok((dir, path))
}

type Reply = Response<Cursor<Vec<u8>>>;

fn json_reply(status: u16, body: &Value) -> Reply {
    let mut response = Response::from_string(body.to_string()).with_status_code(status);
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        response = response.with_header(header);
    }
    response
}

fn message_reply(status: u16, message: &str) -> Reply {
    json_reply(status, &json!({ "message": message }))
}

fn handle_request(state: &Mutex<FakeState>, mut request: Request) {
    let mut body = String::new();
    let _ = request.as_reader().read_to_string(&mut body);
    let method = request.method().as_str().to_ascii_uppercase();
    let parsed = Url::parse(&format!("http://fake{}", request.url()));

    let reply = match parsed {
        Ok(url) => {
            let recorded = RecordedRequest {
                method: method.clone(),
                path: url.path().to_owned(),
                query: url.query_pairs().into_owned().collect(),
                body,
            };
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.log.push(recorded.clone());
            match state.take_failure(&recorded.method, &recorded.path) {
                Some(failure) => {
                    let is_json = failure.body_is_json();
                    let mut response =
                        Response::from_string(failure.body).with_status_code(failure.status);
                    if is_json
                        && let Ok(header) = Header::from_bytes("Content-Type", "application/json")
                    {
                        response = response.with_header(header);
                    }
                    response
                }
                None => route(&mut state, request.method(), &recorded),
            }
        }
        Err(_) => message_reply(400, "malformed request target"),
    };
    let _ = request.respond(reply);
}

impl Failure {
    fn body_is_json(&self) -> bool {
        serde_json::from_str::<Value>(&self.body).is_ok()
    }
}

fn route(state: &mut FakeState, method: &Method, request: &RecordedRequest) -> Reply {
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    match (method, segments.as_slice()) {
        (Method::Post, [name]) if name.ends_with("-report") => {
            match ReportKind::ALL.into_iter().find(|kind| kind.endpoint() == *name) {
                Some(kind) => report(state, kind, &request.body),
                None => message_reply(404, "unknown report"),
            }
        }
        (_, [endpoint, rest @ ..]) => {
            let Some(kind) = EntityKind::parse(endpoint) else {
                return message_reply(404, "not found");
            };
            match (method, rest) {
                (Method::Get, []) if request.param("start").is_some() => list_page(state, kind, request),
                (Method::Get, []) => json_reply(200, &Value::Array(state.rows(kind).to_vec())),
                (Method::Post, []) => create(state, kind, &request.body),
                (Method::Get, [id]) => with_id(id, |id| match state.position(kind, id) {
                    Some(index) => json_reply(200, &state.rows(kind)[index]),
                    None => message_reply(404, "record not found"),
                }),
                (Method::Put, [id]) => with_id(id, |id| update(state, kind, id, &request.body)),
                (Method::Delete, [id]) => with_id(id, |id| delete(state, kind, id)),
                _ => message_reply(405, "method not allowed"),
            }
        }
        _ => message_reply(404, "not found"),
    }
}

fn with_id(raw: &str, handler: impl FnOnce(i64) -> Reply) -> Reply {
    match raw.parse::<i64>() {
        Ok(id) => handler(id),
        Err(_) => message_reply(400, "id must be numeric"),
    }
}

#[derive(Debug, Deserialize)]
struct FilterParam {
    id: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct SortParam {
    id: String,
    #[serde(default)]
    desc: bool,
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn compare(left: &Value, right: &Value) -> Ordering {
    match (left.as_f64(), right.as_f64()) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => text_of(left).cmp(&text_of(right)),
    }
}

fn list_page(state: &FakeState, kind: EntityKind, request: &RecordedRequest) -> Reply {
    let parse_num = |name: &str| request.param(name).and_then(|raw| raw.parse::<usize>().ok());
    let (Some(start), Some(size)) = (parse_num("start"), parse_num("size")) else {
        return message_reply(400, "start and size must be non-negative integers");
    };
    let filters: Vec<FilterParam> =
        match serde_json::from_str(request.param("filters").unwrap_or("[]")) {
            Ok(filters) => filters,
            Err(_) => return message_reply(400, "filters must be a JSON array"),
        };
    let sorting: Vec<SortParam> =
        match serde_json::from_str(request.param("sorting").unwrap_or("[]")) {
            Ok(sorting) => sorting,
            Err(_) => return message_reply(400, "sorting must be a JSON array"),
        };
    let search = request
        .param("globalFilter")
        .map(|raw| raw.trim_matches('%').to_lowercase())
        .filter(|needle| !needle.is_empty());

    let mut rows: Vec<Value> = state
        .rows(kind)
        .iter()
        .filter(|row| {
            filters.iter().all(|filter| {
                let needle = text_of(&filter.value).to_lowercase();
                text_of(&row[filter.id.as_str()])
                    .to_lowercase()
                    .contains(&needle)
            })
        })
        .filter(|row| match (&search, row.as_object()) {
            (Some(needle), Some(object)) => object
                .values()
                .any(|value| text_of(value).to_lowercase().contains(needle)),
            _ => true,
        })
        .cloned()
        .collect();

    rows.sort_by(|left, right| {
        sorting
            .iter()
            .map(|spec| {
                let ordering = compare(&left[spec.id.as_str()], &right[spec.id.as_str()]);
                if spec.desc { ordering.reverse() } else { ordering }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let total = rows.len();
    let data: Vec<Value> = rows.into_iter().skip(start).take(size).collect();
    json_reply(200, &json!({ "data": data, "meta": { "totalRowCount": total } }))
}

fn create(state: &mut FakeState, kind: EntityKind, body: &str) -> Reply {
    let Ok(mut row) = serde_json::from_str::<Value>(body) else {
        return message_reply(400, "body must be JSON");
    };
    let Some(object) = row.as_object_mut() else {
        return message_reply(400, "body must be a JSON object");
    };
    object.remove(kind.id_field());
    let id = state.next_id(kind);
    state.insert(kind, row);
    match state.position(kind, id) {
        Some(index) => json_reply(201, &state.rows(kind)[index]),
        None => message_reply(500, "insert failed"),
    }
}

fn update(state: &mut FakeState, kind: EntityKind, id: i64, body: &str) -> Reply {
    let Some(index) = state.position(kind, id) else {
        return message_reply(404, "record not found");
    };
    let Ok(mut row) = serde_json::from_str::<Value>(body) else {
        return message_reply(400, "body must be JSON");
    };
    let Some(object) = row.as_object_mut() else {
        return message_reply(400, "body must be a JSON object");
    };
    object.insert(kind.id_field().to_owned(), json!(id));
    let reply = json_reply(200, &row);
    if let Some(rows) = state.collections.get_mut(&kind) {
        rows[index] = row;
    }
    reply
}

fn delete(state: &mut FakeState, kind: EntityKind, id: i64) -> Reply {
    let Some(index) = state.position(kind, id) else {
        return message_reply(404, "record not found");
    };
    if let Some(rows) = state.collections.get_mut(&kind) {
        rows.remove(index);
    }
    json_reply(200, &json!({ "success": true }))
}

fn report(state: &FakeState, kind: ReportKind, body: &str) -> Reply {
    let params = match serde_json::from_str::<ReportParams>(body) {
        Ok(params) => params,
        Err(error) => return message_reply(400, &format!("invalid report parameters: {error}")),
    };
    match reports::build(&state.collections, kind, &params) {
        Ok(rows) => json_reply(200, &Value::Array(rows)),
        Err(message) => message_reply(400, &message),
    }
}
