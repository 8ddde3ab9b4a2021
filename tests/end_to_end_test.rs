mod fixtures;

use fastapi_reflect::mux::memory::{MemoryMux, MemoryRequest};
use fastapi_reflect::prelude::*;
use fastapi_reflect::reflect::DataKind;
use fastapi_reflect::route::{HttpMethod, ParamBinding};
use fastapi_reflect::Error;
use fixtures::{notes_router, ClipboardRouter, ThingRouter};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

fn clipboard_app() -> App {
    init_logging(&Default::default());
    let mut app = App::new(AppConfig::default());
    app.include_group(Arc::new(ClipboardRouter::default())).unwrap();
    app.init().unwrap();
    app
}

fn mounted(app: &App) -> MemoryMux {
    let mut mux = MemoryMux::new();
    app.mount(&mut mux).unwrap();
    mux
}

#[test]
fn test_clipboard_route_table() {
    let app = clipboard_app();
    let routes = app.routes();
    assert_eq!(routes.len(), 2);

    let get = routes.iter().find(|r| r.method == HttpMethod::Get).unwrap();
    assert_eq!(get.url, "/api/clipboard");
    assert_eq!(get.query_fields.len(), 2);
    let day = &get.query_fields[0];
    assert_eq!(day.name, "day");
    assert_eq!(day.kind, DataKind::String);
    assert!(!day.is_time());
    assert!(get.query_fields[1].is_time());
    assert_eq!(get.response.identity, "clipboard.Clipboard");
    assert!(get.request.is_none());

    let post = routes.iter().find(|r| r.method == HttpMethod::Post).unwrap();
    assert_eq!(post.url, "/api/clipboard");
    assert_eq!(post.request.as_ref().unwrap().identity, "clipboard.Clipboard");
    assert_eq!(post.response.kind, DataKind::Integer);
    assert_eq!(post.bindings, vec![ParamBinding::Body]);
    assert_eq!(post.summary, "Save a clip");
    assert_eq!(post.tags, vec!["ClipboardRouter"]);
}

#[test]
fn test_clipboard_round_trip() {
    let app = clipboard_app();
    let mux = mounted(&app);

    let saved = mux.handle(
        MemoryRequest::new(HttpMethod::Post, "/api/clipboard").json(&json!({"text": "hello", "day": "mon"})),
    );
    assert_eq!(saved.status, 200);
    assert_eq!(saved.json().unwrap(), json!(1));

    let found = mux.handle(
        MemoryRequest::new(HttpMethod::Get, "/api/clipboard")
            .query("day", "mon")
            .query("at", "2024-01-02T03:04:05Z"),
    );
    assert_eq!(found.status, 200);
    assert_eq!(found.json().unwrap()["text"], json!("hello"));

    let missing = mux.handle(
        MemoryRequest::new(HttpMethod::Get, "/api/clipboard?day=tue&at=2024-01-02T03:04:05Z"),
    );
    assert_eq!(missing.status, 200);
    assert_eq!(missing.json().unwrap(), serde_json::Value::Null);
}

#[test]
fn test_required_body_field_is_rejected() {
    let app = clipboard_app();
    let mux = mounted(&app);

    let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/api/clipboard").json(&json!({"day": "mon"})));
    assert_eq!(response.status, 422);
    let detail = &response.json().unwrap()["detail"][0];
    assert_eq!(detail["loc"], json!(["body", "text"]));
    assert_eq!(detail["type"], json!("value_error.missing"));

    let after = mux.handle(
        MemoryRequest::new(HttpMethod::Get, "/api/clipboard")
            .query("day", "mon")
            .query("at", "2024-01-02T03:04:05Z"),
    );
    assert_eq!(after.json().unwrap(), serde_json::Value::Null);
}

#[derive(Deserialize)]
struct Crate8 {
    n: u8,
    mark: char,
}

impl Model for Crate8 {
    fn shape() -> TypeShape {
        TypeShape::named("crates", "Crate8")
            .field::<u8>("N", r#"json:"n""#)
            .field::<char>("Mark", r#"json:"mark""#)
    }
}

fn pack(_ctx: &mut Context, crate8: Crate8) -> Result<String, HandlerError> {
    Ok(format!("{}{}", crate8.mark, crate8.n))
}

#[test]
fn test_body_errors_keep_field_path() {
    let mut app = App::new(AppConfig::default());
    app.include_router(Router::new("/crates").post("/", pack));
    app.init().unwrap();
    let mux = mounted(&app);

    let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/crates").json(&json!({"n": 300, "mark": "x"})));
    assert_eq!(response.status, 422);
    let detail = &response.json().unwrap()["detail"][0];
    assert_eq!(detail["loc"], json!(["body", "n"]));
    assert_eq!(detail["type"], json!("value_error.number.not_le"));

    // passes structural validation, fails typed decoding
    let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/crates").json(&json!({"n": 3, "mark": "xy"})));
    assert_eq!(response.status, 422);
    let detail = &response.json().unwrap()["detail"][0];
    assert_eq!(detail["loc"], json!(["body", "mark"]));
    assert_eq!(detail["type"], json!("type_error"));

    let ok = mux.handle(MemoryRequest::new(HttpMethod::Post, "/crates").json(&json!({"n": 3, "mark": "x"})));
    assert_eq!(ok.json().unwrap(), json!("x3"));
}

#[test]
fn test_malformed_body() {
    let app = clipboard_app();
    let mux = mounted(&app);

    let response = mux.handle(MemoryRequest::new(HttpMethod::Post, "/api/clipboard").body("{\"text\": "));
    assert_eq!(response.status, 422);
    assert_eq!(response.json().unwrap()["detail"][0]["loc"][0], json!("body"));
}

#[test]
fn test_struct_query_expansion() {
    let mut app = App::new(AppConfig::default());
    app.include_router(notes_router());
    app.init().unwrap();

    let list = app.routes().iter().find(|r| r.url == "/notes").unwrap();
    let names: Vec<&str> = list.query_fields.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["keyword", "page"]);
    assert!(list.query_fields[0].required);

    let mux = mounted(&app);
    let response = mux.handle(MemoryRequest::new(HttpMethod::Get, "/notes?keyword=rust&page=2"));
    assert_eq!(response.status, 200);
    let notes = response.json().unwrap();
    assert_eq!(notes.as_array().unwrap().len(), 3);
    assert_eq!(notes[0], json!({"id": 20, "title": "rust 0"}));

    let response = mux.handle(MemoryRequest::new(HttpMethod::Get, "/notes?page=2"));
    assert_eq!(response.status, 422);
    assert_eq!(response.json().unwrap()["detail"][0]["loc"], json!(["query", "keyword"]));

    let response = mux.handle(MemoryRequest::new(HttpMethod::Get, "/notes?keyword=rust&page=101"));
    assert_eq!(response.status, 422);
    assert_eq!(response.json().unwrap()["detail"][0]["loc"], json!(["query", "page"]));
}

#[test]
fn test_path_field_and_handler_error() {
    let mut app = App::new(AppConfig::default());
    app.include_router(notes_router());
    app.init().unwrap();
    let mux = mounted(&app);

    let found = mux.handle(MemoryRequest::new(HttpMethod::Get, "/notes/7"));
    assert_eq!(found.status, 200);
    assert_eq!(found.json().unwrap(), json!({"id": 7, "title": "found"}));

    let bad = mux.handle(MemoryRequest::new(HttpMethod::Get, "/notes/seven"));
    assert_eq!(bad.status, 404);
    assert_eq!(bad.json().unwrap(), json!({"detail": "note not found"}));
}

#[test]
#[should_panic(expected = "PostCreateThing")]
fn test_post_without_struct_body_panics() {
    let mut app = App::new(AppConfig::default());
    let _ = app.include_group(Arc::new(ThingRouter));
}

#[test]
fn test_duplicate_route_across_routers() {
    let mut app = App::new(AppConfig::default());
    app.include_router(notes_router());
    app.include_router(Router::new("/").get("/notes/:id", fixtures::get_note));

    let err = app.init().unwrap_err();
    assert!(matches!(err, Error::DuplicateRoute(ref id) if id == "GET|/notes/:id"));
}

#[test]
fn test_contexts_return_to_pool() {
    let app = clipboard_app();
    let mux = mounted(&app);

    for _ in 0..3 {
        mux.handle(MemoryRequest::new(HttpMethod::Post, "/api/clipboard").json(&json!({"text": "x"})));
    }
    assert_eq!(app.idle_contexts(), 1);

    app.shutdown();
    assert!(app.root_token().is_cancelled());
}
