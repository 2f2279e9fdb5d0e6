use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use lodestore::adapter::{to_envelope, LocalAdapter};
use lodestore::engine::{CollectionCache, Persistence};
use lodestore::sdk::Store;
use lodestore::{Datastore, Error, Options, Verb};

fn embedded_options(dir: &std::path::Path) -> Options {
    Options::default()
        .storage_path(dir)
        .auto_save_interval_ms(0)
}

#[tokio::test]
async fn test_embedded_lifecycle_survives_reopen() {
    let dir = tempdir().unwrap();

    {
        let store = Store::open(embedded_options(dir.path())).await.unwrap();
        let tasks = store.collection("tasks").unwrap();

        let report = tasks
            .insert_many(vec![
                json!({"id": "t1", "title": "write", "done": false}),
                json!({"title": "review", "done": false}),
            ])
            .await
            .unwrap();
        assert_eq!(report.inserted_count, 2);

        tasks
            .update(json!({"done": false}), json!({"$set": {"done": true}}), json!({}))
            .await
            .unwrap();
        store.shutdown().await;
    }

    // A fresh store over the same directory sees the flushed state.
    let store = Store::open(embedded_options(dir.path())).await.unwrap();
    let tasks = store.collection("tasks").unwrap();
    assert_eq!(tasks.count(json!({"done": true})).await.unwrap(), 2);

    let t1 = tasks.find_by_id("t1").await.unwrap().unwrap();
    assert_eq!(t1["title"], json!("write"));
    assert!(t1["createdAt"].is_string());
    assert!(t1["updatedAt"].as_str().unwrap() >= t1["createdAt"].as_str().unwrap());
}

#[tokio::test]
async fn test_collection_file_is_line_oriented_json() {
    let dir = tempdir().unwrap();
    let store = Store::open(embedded_options(dir.path())).await.unwrap();
    let items = store.collection("items").unwrap();
    items
        .insert_many(vec![json!({"id": "a", "z": 1, "b": 2}), json!({"id": "b"})])
        .await
        .unwrap();
    store.shutdown().await;

    let raw = std::fs::read_to_string(dir.path().join("items.json")).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.first(), Some(&"["));
    assert_eq!(lines.last(), Some(&"]"));
    assert_eq!(lines.len(), 4);
    // Canonical order: id, then lexicographic fields, then timestamps.
    assert!(lines[1].starts_with("{\"id\":\"a\",\"b\":2,\"z\":1,\"createdAt\":"));
    let parsed: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_autosave_persists_without_explicit_flush() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        Options::default()
            .storage_path(dir.path())
            .auto_save_interval_ms(50),
    )
    .await
    .unwrap();

    store
        .collection("notes")
        .unwrap()
        .insert(json!({"id": "n1", "text": "hello"}))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let raw = std::fs::read_to_string(dir.path().join("notes.json")).unwrap();
    let parsed: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_filters_and_updates_end_to_end() {
    let dir = tempdir().unwrap();
    let store = Store::open(embedded_options(dir.path())).await.unwrap();
    let users = store.collection("users").unwrap();

    users
        .insert_many(vec![
            json!({"id": "u1", "name": "Ada", "age": 36, "tags": ["math"]}),
            json!({"id": "u2", "name": "Grace", "age": 45, "tags": ["navy", "math"]}),
            json!({"id": "u3", "name": "Alan", "age": 41}),
        ])
        .await
        .unwrap();

    let report = users
        .find(
            json!({"$or": [{"age": {"$gte": 45}}, {"name": {"$regex": "^a", "$options": "i"}}]}),
            json!({"sort": {"age": -1}, "fields": {"name": 1}}),
        )
        .await
        .unwrap();
    let names: Vec<&str> = report
        .documents
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Grace", "Alan", "Ada"]);

    let doc = users
        .update_by_id_returning("u3", json!({"$addToSet": {"tags": {"$each": ["logic", "logic"]}}}))
        .await
        .unwrap();
    assert_eq!(doc["tags"], json!(["logic"]));

    assert!(matches!(
        users.delete(json!({})).await.unwrap_err(),
        Error::EmptyDeleteFilter
    ));
    let deleted = users.delete(json!({"tags": "math"})).await.unwrap();
    assert_eq!(deleted.deleted_count, 2);
    assert_eq!(users.count(json!({})).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Remote mode against an in-process stub listener.
// ---------------------------------------------------------------------------

async fn handle_http(mut socket: TcpStream, adapter: Arc<LocalAdapter>) -> std::io::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let mut parts = line.split_whitespace();
        let verb = match parts.next() {
            Some("GET") => Verb::Get,
            Some("POST") => Verb::Post,
            Some("PATCH") => Verb::Patch,
            Some("DELETE") => Verb::Delete,
            _ => break,
        };
        let path = parts.next().unwrap_or("/").to_string();

        let mut content_length = 0usize;
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((name, value)) = trimmed.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        let payload: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

        let envelope = to_envelope(adapter.execute(verb, &path, payload).await);
        let response_body = envelope.to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            response_body.len(),
            response_body
        );
        writer.write_all(response.as_bytes()).await?;
    }
    Ok(())
}

async fn spawn_stub_server(dir: &std::path::Path) -> String {
    let adapter = Arc::new(LocalAdapter::new(Arc::new(CollectionCache::new(
        Persistence::new(dir),
    ))));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                let _ = handle_http(socket, adapter).await;
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_remote_mode_speaks_the_same_operation_set() {
    let dir = tempdir().unwrap();
    let url = spawn_stub_server(dir.path()).await;

    let store = Store::open(Options::default().database_url(url)).await.unwrap();
    let books = store.collection("books").unwrap();

    let report = books
        .insert_many(vec![
            json!({"id": "b1", "title": "SICP", "year": 1985}),
            json!({"id": "b2", "title": "TAPL", "year": 2002}),
        ])
        .await
        .unwrap();
    assert_eq!(report.inserted_count, 2);
    assert_eq!(report.inserted_ids.as_deref(), Some(&["b1".to_string(), "b2".to_string()][..]));

    let found = books
        .find(json!({"year": {"$gt": 1990}}), json!({"limit": 10}))
        .await
        .unwrap();
    assert_eq!(found.documents.len(), 1);
    assert_eq!(found.documents[0]["title"], json!("TAPL"));
    assert_eq!(found.pagination.as_ref().unwrap().total_documents, 1);

    // Errors travel through the envelope with their kind intact.
    assert!(matches!(
        books.update_by_id("missing", json!({"$set": {"x": 1}})).await.unwrap_err(),
        Error::NotFound(_)
    ));

    let count = books.count(json!({})).await.unwrap();
    assert_eq!(count, 2);

    let dropped = books.drop().await.unwrap();
    assert!(dropped.dropped);
    assert_eq!(books.count(json!({})).await.unwrap(), 0);
}

#[tokio::test]
async fn test_remote_client_reconnects_between_requests() {
    let dir = tempdir().unwrap();
    let url = spawn_stub_server(dir.path()).await;

    let store = Store::open(Options::default().database_url(url)).await.unwrap();
    let items = store.collection("items").unwrap();

    // Back-to-back requests over the pooled keep-alive connections.
    for i in 0..10 {
        items.insert(json!({"id": format!("i{i}")})).await.unwrap();
    }
    assert_eq!(items.count(json!({})).await.unwrap(), 10);
}
