// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod dispatch;

pub use dispatch::{Dispatcher, fetch_into};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sklad_app::{
    Descriptor, EntityFields, EntityKind, Page, QueryKey, QueryScope, Record, ReportKind,
    ReportParams, ReportRows, RequestError, build_request,
};
use std::time::Duration;
use url::Url;

/// Blocking client for the inventory REST API.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("api.base_url must not be empty");
        }
        let parsed = Url::parse(trimmed)
            .with_context(|| format!("parse api.base_url {trimmed:?} -- use a full http:// URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "api.base_url scheme {:?} is not supported -- use http or https",
                parsed.scheme()
            );
        }
        if parsed.cannot_be_a_base() {
            bail!("api.base_url {trimmed:?} cannot carry a path");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url: parsed,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `<base>/<segments...>`, keeping any path prefix of the base URL.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn collection_url(&self, entity: EntityKind) -> Url {
        self.url(&[entity.endpoint()])
    }

    fn row_url(&self, entity: EntityKind, id: i64) -> Url {
        self.url(&[entity.endpoint(), &id.to_string()])
    }

    fn send(&self, request: RequestBuilder, method: &str, url: &Url) -> Result<Response, RequestError> {
        tracing::debug!(method, %url, "inventory request");
        let response = request.send().map_err(|error| {
            let err = connection_error(self.base_url(), self.timeout, error);
            tracing::warn!(method, %url, error = %err, "inventory request failed");
            err
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let err = clean_error_response(status, &body);
            tracing::warn!(method, %url, status = status.as_u16(), error = %err, "inventory API rejected request");
            return Err(err);
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RequestError> {
        let response = self.send(self.http.get(url.clone()), "GET", &url)?;
        decode_body(response)
    }

    /// One page of `entity` as described by `descriptor`.
    pub fn fetch_page(&self, entity: EntityKind, descriptor: &Descriptor) -> Result<Page, RequestError> {
        let url = build_request(&self.collection_url(entity), descriptor);
        let envelope: PageEnvelope = self.get_json(url)?;
        let rows = decode_rows(entity, envelope.data)?;
        Ok(Page {
            rows,
            total_row_count: envelope.meta.total_row_count,
        })
    }

    /// The whole collection, unpaginated. Used to populate lookups.
    pub fn fetch_all(&self, entity: EntityKind) -> Result<Page, RequestError> {
        let body: CollectionBody = self.get_json(self.collection_url(entity))?;
        let values = match body {
            CollectionBody::Bare(values) => values,
            CollectionBody::Wrapped { data } => data,
        };
        Ok(Page::collection(decode_rows(entity, values)?))
    }

    pub fn fetch(&self, key: &QueryKey) -> Result<Page, RequestError> {
        match &key.scope {
            QueryScope::Page(descriptor) => self.fetch_page(key.entity, descriptor),
            QueryScope::All => self.fetch_all(key.entity),
        }
    }

    /// POSTs `fields` and returns the stored row with its generated id.
    pub fn create(&self, fields: &EntityFields) -> Result<Record, RequestError> {
        let entity = fields.kind();
        let body = fields.to_json().map_err(encode_error)?;
        let url = self.collection_url(entity);
        let response = self.send(self.http.post(url.clone()).json(&body), "POST", &url)?;
        let value: Value = decode_body(response)?;
        stored_record(fields, value)
    }

    /// PUTs the full row, id included.
    pub fn update(&self, id: i64, fields: &EntityFields) -> Result<Record, RequestError> {
        let entity = fields.kind();
        let record = fields.clone().into_record(id);
        let body = record.to_json().map_err(encode_error)?;
        let url = self.row_url(entity, id);
        let response = self.send(self.http.put(url.clone()).json(&body), "PUT", &url)?;
        let value: Value = decode_body(response)?;
        Ok(Record::decode(entity, value).unwrap_or(record))
    }

    pub fn delete(&self, entity: EntityKind, id: i64) -> Result<(), RequestError> {
        let url = self.row_url(entity, id);
        self.send(self.http.delete(url.clone()), "DELETE", &url)?;
        Ok(())
    }

    pub fn generate_report(
        &self,
        kind: ReportKind,
        params: &ReportParams,
    ) -> Result<ReportRows, RequestError> {
        let body = params.for_request(kind);
        let url = self.url(&[kind.endpoint()]);
        let response = self.send(self.http.post(url.clone()).json(&body), "POST", &url)?;
        let value: Value = decode_body(response)?;
        ReportRows::decode(kind, value)
            .map_err(|error| RequestError::decode(format!("{} report: {error}", kind.label())))
    }

    /// Fetches a one-row page to prove the API answers the list contract.
    pub fn ping(&self) -> Result<()> {
        self.fetch_page(EntityKind::Warehouse, &Descriptor::with_page_size(1))
            .map_err(|error| anyhow!("{error} -- check [api].base_url"))?;
        Ok(())
    }
}

fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    response
        .json()
        .map_err(|error| RequestError::decode(error.to_string()))
}

fn decode_record(entity: EntityKind, value: Value) -> Result<Record, RequestError> {
    Record::decode(entity, value)
        .map_err(|error| RequestError::decode(format!("{} row: {error}", entity.label())))
}

fn decode_rows(entity: EntityKind, values: Vec<Value>) -> Result<Vec<Record>, RequestError> {
    values
        .into_iter()
        .map(|value| decode_record(entity, value))
        .collect()
}

/// Servers that echo only the id still yield a full row.
fn stored_record(fields: &EntityFields, value: Value) -> Result<Record, RequestError> {
    let entity = fields.kind();
    if let Ok(record) = Record::decode(entity, value.clone()) {
        return Ok(record);
    }
    let id = value
        .get(entity.id_field())
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            RequestError::decode(format!(
                "created {} has no {}",
                entity.label(),
                entity.id_field()
            ))
        })?;
    Ok(fields.clone().into_record(id))
}

fn encode_error(error: serde_json::Error) -> RequestError {
    RequestError::decode(format!("encode request body: {error}"))
}

fn connection_error(base_url: &str, timeout: Duration, error: reqwest::Error) -> RequestError {
    if error.is_timeout() {
        return RequestError::network(format!(
            "{base_url} did not answer within {}ms -- raise [api].timeout or check the server",
            timeout.as_millis()
        ));
    }
    RequestError::network(format!(
        "cannot reach {base_url} -- check [api].base_url and that the server is running ({error})"
    ))
}

fn clean_error_response(status: StatusCode, body: &str) -> RequestError {
    let status = status.as_u16();
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body) {
        let message = match (parsed.message, parsed.error) {
            (Some(message), _) if !message.trim().is_empty() => Some(message),
            (_, Some(ErrorField::Text(message))) if !message.trim().is_empty() => Some(message),
            (_, Some(ErrorField::Body { message })) if !message.trim().is_empty() => Some(message),
            _ => None,
        };
        if message.is_some() {
            return RequestError::Server { status, message };
        }
    }

    let body = body.trim();
    if !body.is_empty() && body.len() < 100 && !body.contains('{') {
        return RequestError::Server {
            status,
            message: Some(body.to_owned()),
        };
    }

    RequestError::Server {
        status,
        message: None,
    }
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    data: Vec<Value>,
    meta: PageMeta,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    #[serde(rename = "totalRowCount")]
    total_row_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CollectionBody {
    Bare(Vec<Value>),
    Wrapped { data: Vec<Value> },
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<ErrorField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Body { message: String },
}

#[cfg(test)]
mod tests {
    use super::{Client, clean_error_response};
    use reqwest::StatusCode;
    use sklad_app::{EntityKind, RequestError};
    use std::time::Duration;

    fn server(status: u16, message: Option<&str>) -> RequestError {
        RequestError::Server {
            status,
            message: message.map(str::to_owned),
        }
    }

    #[test]
    fn error_messages_come_from_known_envelopes() {
        assert_eq!(
            clean_error_response(StatusCode::CONFLICT, r#"{"message":"article taken"}"#),
            server(409, Some("article taken"))
        );
        assert_eq!(
            clean_error_response(StatusCode::BAD_REQUEST, r#"{"error":"bad inn"}"#),
            server(400, Some("bad inn"))
        );
        assert_eq!(
            clean_error_response(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"quantity must be positive"}}"#
            ),
            server(400, Some("quantity must be positive"))
        );
    }

    #[test]
    fn short_plain_bodies_are_kept_and_noise_is_dropped() {
        assert_eq!(
            clean_error_response(StatusCode::BAD_GATEWAY, "upstream down\n"),
            server(502, Some("upstream down"))
        );
        assert_eq!(
            clean_error_response(StatusCode::INTERNAL_SERVER_ERROR, r#"{"stack":"..."}"#),
            server(500, None)
        );
        assert_eq!(
            clean_error_response(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(200)),
            server(500, None)
        );
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let client =
            Client::new("http://localhost:8080/api/", Duration::from_secs(1)).expect("client");
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(
            client.row_url(EntityKind::IncomeItem, 4).as_str(),
            "http://localhost:8080/api/income-items/4"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for bad in ["", "localhost:8080", "ftp://host", "mailto:someone@example.com"] {
            assert!(
                Client::new(bad, Duration::from_secs(1)).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }
}
