use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use envconfig::Envconfig;
use http_body_util::BodyExt;
use tower::ServiceExt;

use loader_worker::config::Config;
use loader_worker::definitions::{build_dispatcher, load_definitions};
use loader_worker::handlers::{app, EventPostResponse};

const DEFINITIONS: &str = r#"[
    {
        "name": "bank",
        "pattern": "^bank/.*\\.csv$",
        "encoding": "shift_jis",
        "skip_leading_rows": 1,
        "columns": [0, 2],
        "skip_if_empty": 0,
        "numeric_columns": [2],
        "batch_size": 2,
        "concurrency_limit": 2,
        "destination": "bank.csv"
    },
    {
        "name": "everything",
        "pattern": "\\.csv$",
        "encoding": "shift_jis",
        "destination": "raw.csv"
    }
]"#;

struct Fixture {
    _dir: tempfile::TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let destination = dir.path().join("destination");
        std::fs::create_dir_all(source.join("uploads/bank")).unwrap();
        std::fs::create_dir_all(&destination).unwrap();

        let handlers_path = dir.path().join("handlers.json");
        std::fs::write(&handlers_path, DEFINITIONS).unwrap();

        let env = HashMap::from([
            (
                "HANDLERS_PATH".to_owned(),
                handlers_path.to_string_lossy().into_owned(),
            ),
            (
                "SOURCE_ROOT".to_owned(),
                source.to_string_lossy().into_owned(),
            ),
            (
                "DESTINATION_ROOT".to_owned(),
                destination.to_string_lossy().into_owned(),
            ),
            ("MAX_CONCURRENT_BATCHES".to_owned(), "2".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        Self { _dir: dir, config }
    }

    fn write_source(&self, name: &str, data: &[u8]) {
        let path = std::path::Path::new(&self.config.source_root)
            .join("uploads")
            .join(name);
        std::fs::write(path, data).unwrap();
    }

    fn read_destination(&self, name: &str) -> String {
        std::fs::read_to_string(std::path::Path::new(&self.config.destination_root).join(name))
            .unwrap()
    }

    fn router(&self) -> axum::Router {
        let definitions = load_definitions(&self.config.handlers_path).unwrap();
        let dispatcher = build_dispatcher(&self.config, definitions).unwrap();
        app(Arc::new(dispatcher), None)
    }
}

fn event_request(name: &str) -> Request<Body> {
    let body = serde_json::json!({
        "bucket": "uploads",
        "name": name,
        "timeCreated": "2020-11-21T09:30:00Z",
    });

    Request::builder()
        .method("POST")
        .uri("/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn post_response(response: axum::response::Response) -> EventPostResponse {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Encode ASCII text, swapping `@` for "テスト" in Shift_JIS.
fn shift_jis(text: &str) -> Vec<u8> {
    let mut data = Vec::new();
    for byte in text.bytes() {
        match byte {
            b'@' => data.extend_from_slice(&[0x83, 0x65, 0x83, 0x58, 0x83, 0x67]),
            other => data.push(other),
        }
    }
    data
}

#[tokio::test]
async fn test_event_is_loaded_by_every_matching_handler() {
    let fixture = Fixture::new();
    fixture.write_source(
        "bank/2020-11.csv",
        &shift_jis(
            "date,memo,amount\n\
             2020/11/01,@,\"1,234\"\n\
             ,subtotal,\"1,234\"\n\
             2020/11/02,@,-500\n\
             2020/11/03,@,\"12,000\"\n",
        ),
    );

    let response = fixture
        .router()
        .oneshot(event_request("bank/2020-11.csv"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(post_response(response).await.error, None);
    assert_eq!(
        fixture.read_destination("bank.csv"),
        "2020/11/01,1234\n2020/11/02,-500\n2020/11/03,12000\n"
    );

    let raw = fixture.read_destination("raw.csv");
    assert_eq!(raw.lines().count(), 5);
    assert!(raw.starts_with("date,memo,amount\n2020/11/01,テスト,\"1,234\"\n"));
}

#[tokio::test]
async fn test_failures_of_one_handler_are_reported() {
    let fixture = Fixture::new();
    fixture.write_source("bank/short.csv", b"date,memo\n2020/11/01,memo\n");

    let response = fixture
        .router()
        .oneshot(event_request("bank/short.csv"))
        .await
        .unwrap();

    // The bank handler needs an amount column; the catch-all handler still loads.
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = post_response(response).await.error.unwrap();
    assert!(error.contains("bank handler failed"), "{error}");
    assert!(error.contains("no column 2 in a row of 2 fields"), "{error}");
    assert_eq!(
        fixture.read_destination("raw.csv"),
        "date,memo\n2020/11/01,memo\n"
    );
}

#[tokio::test]
async fn test_events_cannot_read_outside_the_source_root() {
    let fixture = Fixture::new();
    std::fs::write(fixture._dir.path().join("secret.csv"), "top,secret\n").unwrap();

    let response = fixture
        .router()
        .oneshot(event_request("../../secret.csv"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = post_response(response).await.error.unwrap();
    assert!(error.contains("everything handler failed"), "{error}");
    assert!(error.contains("refusing to read"), "{error}");
    assert!(!std::path::Path::new(&fixture.config.destination_root)
        .join("raw.csv")
        .exists());
}
