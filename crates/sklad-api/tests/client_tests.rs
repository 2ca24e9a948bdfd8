// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow};
use sklad_api::Client;
use sklad_app::{Descriptor, EntityKind, RequestError};
use std::io::Read;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid content type header")
}

#[test]
fn unreachable_server_is_a_network_error_with_remediation() {
    let client =
        Client::new("http://127.0.0.1:1", Duration::from_millis(50)).expect("client should initialize");

    let error = client
        .fetch_all(EntityKind::Position)
        .expect_err("fetch should fail for unreachable endpoint");
    let RequestError::Network { message } = &error else {
        panic!("expected network error, got {error:?}");
    };
    assert!(message.contains("[api]"), "{message}");
    assert_eq!(error.user_message(), "inventory API unreachable");
}

#[test]
fn fetch_page_sends_the_query_contract() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/api", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        let url = request.url().to_owned();
        let response = Response::from_string(
            r#"{"data":[{"position_id":3,"position_name":"Loader","salary":"420.50"}],"meta":{"totalRowCount":31}}"#,
        )
        .with_status_code(200)
        .with_header(json_header());
        request.respond(response).expect("response should succeed");
        url
    });

    let client = Client::new(&addr, Duration::from_secs(1))?;
    let mut descriptor = Descriptor::with_page_size(10);
    descriptor.set_global_filter("load");
    descriptor.pagination.page_index = 2;
    descriptor.push_sort("salary", true);
    let page = client.fetch_page(EntityKind::Position, &descriptor)?;

    assert_eq!(page.total_row_count, 31);
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].id(), 3);

    let url = handle.join().expect("server thread should join");
    assert!(url.starts_with("/api/positions?start=20&size=10"), "{url}");
    assert!(url.contains("globalFilter=%25load%25"), "{url}");
    assert!(url.contains("sorting=%5B%7B%22id%22%3A%22salary%22%2C%22desc%22%3Atrue%7D%5D"), "{url}");
    Ok(())
}

#[test]
fn server_message_survives_a_rejected_create() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let mut request = server.recv().expect("request expected");
        assert_eq!(request.url(), "/products");
        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .expect("body should read");
        let response = Response::from_string(r#"{"message":"article already exists"}"#)
            .with_status_code(409)
            .with_header(json_header());
        request.respond(response).expect("response should succeed");
        body
    });

    let client = Client::new(&addr, Duration::from_secs(1))?;
    let fields = sklad_app::EntityFields::Product(sklad_app::ProductFields {
        product_name: "Bolt".into(),
        article: "12345678".into(),
        price: sklad_app::Money::from_kopecks(150),
        unit: "pcs".into(),
    });
    let error = client.create(&fields).expect_err("create should be rejected");
    assert_eq!(
        error,
        RequestError::Server {
            status: 409,
            message: Some("article already exists".into()),
        }
    );

    let body: serde_json::Value = serde_json::from_str(&handle.join().expect("join"))?;
    assert!(body.get("product_id").is_none(), "create body carries no id: {body}");
    assert_eq!(body["price"], serde_json::json!(1.5));
    Ok(())
}

#[test]
fn create_accepts_a_response_with_only_the_id() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        let response = Response::from_string(r#"{"position_id":12}"#)
            .with_status_code(201)
            .with_header(json_header());
        request.respond(response).expect("response should succeed");
    });

    let client = Client::new(&addr, Duration::from_secs(1))?;
    let fields = sklad_app::EntityFields::Position(sklad_app::PositionFields {
        position_name: "Clerk".into(),
        salary: sklad_app::Money::from_kopecks(10_000),
    });
    let record = client.create(&fields)?;
    assert_eq!(record.id(), 12);
    assert_eq!(record.fields(), fields);

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn malformed_page_is_a_decode_error() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        let response = Response::from_string(r#"{"rows":[]}"#)
            .with_status_code(200)
            .with_header(json_header());
        request.respond(response).expect("response should succeed");
    });

    let client = Client::new(&addr, Duration::from_secs(1))?;
    let error = client
        .fetch_page(EntityKind::Warehouse, &Descriptor::default())
        .expect_err("missing envelope should fail");
    assert!(matches!(error, RequestError::Decode { .. }), "{error:?}");

    handle.join().expect("server thread should join");
    Ok(())
}
