//! Two replicas in one process, synced over real HTTP on localhost.

use axum::{routing::post, Router};
use kvass_core::{Entry, MAX_COUNTER};
use kvass_proto::{Endpoint, EndpointScheme, EntryBatch, SyncCipher};
use kvass_store::{MemoryStore, SqliteStore, Store};
use kvass_sync::{SyncClient, SyncClientConfig, SyncError, SyncServer};
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

async fn spawn_server<S: Store + 'static>(store: Arc<S>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(SyncServer::new(store).serve(listener));
    Url::parse(&format!("http://{addr}/")).unwrap()
}

fn client(remote: &Url) -> SyncClient {
    SyncClient::new(
        EndpointScheme::new(remote.clone()),
        &SyncClientConfig::default(),
    )
    .unwrap()
}

fn share_key<A: Store, B: Store>(from: &A, to: &B) {
    let key = from.state().encryption_key;
    to.update_state(|state| state.encryption_key = key).unwrap();
}

#[tokio::test]
async fn push_delivers_pending_entries() {
    let server = Arc::new(MemoryStore::new());
    let local = MemoryStore::new();
    share_key(&*server, &local);
    let url = spawn_server(Arc::clone(&server)).await;

    local.set("foo", b"bar".to_vec()).unwrap();
    let report = client(&url).push(&local).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.cleared, 1);

    let stored = server.get("foo").unwrap().unwrap();
    assert_eq!(stored.value, b"bar");
    assert_eq!(stored.process_id, local.state().process_id);
    assert!(!stored.needs_push);

    assert!(local.pending_updates().unwrap().is_empty());
    assert_eq!(client(&url).push(&local).await.unwrap().sent, 0);
}

#[tokio::test]
async fn pull_fetches_remote_entries() {
    let server = Arc::new(MemoryStore::new());
    let local = MemoryStore::new();
    share_key(&*server, &local);
    let url = spawn_server(Arc::clone(&server)).await;

    let written = server.set("k", b"from server".to_vec()).unwrap();

    let report = client(&url).pull(&local).await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(report.remote_counter, written.counter);

    let entry = local.get("k").unwrap().unwrap();
    assert_eq!(entry.value, b"from server");
    assert!(!entry.needs_push);
    assert!(local.pending_updates().unwrap().is_empty());

    // Replaying the newest entry is harmless
    client(&url).pull(&local).await.unwrap();
    assert_eq!(local.get("k").unwrap().unwrap().value, b"from server");
}

#[tokio::test]
async fn large_value_does_not_block_other_keys() {
    let server = Arc::new(MemoryStore::new());
    let local = MemoryStore::new();
    share_key(&*server, &local);
    let url = spawn_server(Arc::clone(&server)).await;

    let big = vec![b'x'; 3 * 1024 * 1024];
    local.set("big", big.clone()).unwrap();
    local.set("small", b"v".to_vec()).unwrap();

    let report = client(&url).push(&local).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(server.get("big").unwrap().unwrap().value, big);
    assert_eq!(server.get("small").unwrap().unwrap().value, b"v");
    assert!(local.pending_updates().unwrap().is_empty());

    let reader = MemoryStore::new();
    share_key(&*server, &reader);
    client(&url).pull(&reader).await.unwrap();
    assert_eq!(reader.get("big").unwrap().unwrap().value.len(), big.len());
}

/// Serve a fixed pull answer, the way a misbehaving remote would.
async fn spawn_fixed_pull(key: &str, entries: Vec<Entry>) -> Url {
    let cipher = SyncCipher::from_hex(key).unwrap();
    let body = cipher
        .encrypt(&EntryBatch::new(entries).to_json().unwrap())
        .unwrap();
    let app = Router::new().route(
        Endpoint::Pull.route(),
        post(move || {
            let body = body.clone();
            async move { body }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

#[tokio::test]
async fn pull_skips_unstorable_counters_and_moves_on() {
    let local = SqliteStore::in_memory().unwrap();
    let remote_pid = local.state().process_id.wrapping_add(1).max(1);
    let entry = |key: &str, counter: u64| Entry {
        key: key.to_string(),
        value: b"r".to_vec(),
        url_token: format!("tok-{key}"),
        timestamp_micros: 1,
        process_id: remote_pid,
        counter,
        needs_push: false,
    };
    let url = spawn_fixed_pull(
        &local.state().encryption_key,
        vec![entry("normal", 5), entry("huge", u64::MAX)],
    )
    .await;

    let report = client(&url).pull(&local).await.unwrap();
    assert_eq!(report.received, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.remote_counter, MAX_COUNTER);
    assert_eq!(local.get("normal").unwrap().unwrap().value, b"r");
    assert!(local.get("huge").unwrap().is_none());

    let again = client(&url).pull(&local).await.unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(local.state().remote_counter, MAX_COUNTER);
}

#[tokio::test]
async fn pull_excludes_own_updates() {
    let server = Arc::new(MemoryStore::new());
    let a = MemoryStore::new();
    let b = MemoryStore::new();
    share_key(&*server, &a);
    share_key(&*server, &b);
    let url = spawn_server(Arc::clone(&server)).await;

    a.set("from-a", b"1".to_vec()).unwrap();
    b.set("from-b", b"2".to_vec()).unwrap();
    client(&url).push(&a).await.unwrap();
    client(&url).push(&b).await.unwrap();

    let report = client(&url).pull(&a).await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(a.get("from-b").unwrap().unwrap().value, b"2");
    assert_eq!(
        a.get("from-a").unwrap().unwrap().process_id,
        a.state().process_id
    );
}

#[tokio::test]
async fn peers_converge_on_higher_counter() {
    let a = Arc::new(MemoryStore::new());
    let b = Arc::new(MemoryStore::new());
    share_key(&*a, &*b);
    let a_url = spawn_server(Arc::clone(&a)).await;
    let b_url = spawn_server(Arc::clone(&b)).await;

    let v1 = a.set("k", b"v1".to_vec()).unwrap();
    for i in 0..3 {
        b.set(&format!("other{i}"), b"x".to_vec()).unwrap();
    }
    let v2 = b.set("k", b"v2".to_vec()).unwrap();
    assert!(v2.counter > v1.counter);

    client(&b_url).push(&*a).await.unwrap();
    client(&a_url).push(&*b).await.unwrap();

    for store in [&a, &b] {
        assert_eq!(store.get("k").unwrap().unwrap().value, b"v2");
        assert_eq!(store.get("other2").unwrap().unwrap().value, b"x");
    }
}

#[tokio::test]
async fn peers_converge_in_either_order() {
    let a = Arc::new(MemoryStore::new());
    let b = Arc::new(MemoryStore::new());
    share_key(&*a, &*b);
    let a_url = spawn_server(Arc::clone(&a)).await;
    let b_url = spawn_server(Arc::clone(&b)).await;

    a.set("k", b"v1".to_vec()).unwrap();
    for i in 0..3 {
        b.set(&format!("other{i}"), b"x".to_vec()).unwrap();
    }
    b.set("k", b"v2".to_vec()).unwrap();

    client(&a_url).push(&*b).await.unwrap();
    client(&b_url).push(&*a).await.unwrap();

    assert_eq!(a.get("k").unwrap().unwrap().value, b"v2");
    assert_eq!(b.get("k").unwrap().unwrap().value, b"v2");
}

#[tokio::test]
async fn wrong_key_is_rejected_without_mutation() {
    let server = Arc::new(MemoryStore::new());
    let local = MemoryStore::new();
    let url = spawn_server(Arc::clone(&server)).await;
    assert_ne!(
        server.state().encryption_key,
        local.state().encryption_key
    );

    local.set("k", b"v".to_vec()).unwrap();
    let before = server.state();

    match client(&url).push(&local).await {
        Err(SyncError::Status { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected a 400, got {other:?}"),
    }
    assert!(server.get("k").unwrap().is_none());
    assert_eq!(server.state(), before);
    assert_eq!(local.pending_updates().unwrap().len(), 1);

    assert!(matches!(
        client(&url).pull(&local).await,
        Err(SyncError::Status { status: 400, .. })
    ));
}

#[tokio::test]
async fn tombstones_propagate() {
    let server = Arc::new(MemoryStore::new());
    let writer = MemoryStore::new();
    let reader = MemoryStore::new();
    share_key(&*server, &writer);
    share_key(&*server, &reader);
    let url = spawn_server(Arc::clone(&server)).await;

    writer.set("gone", b"soon".to_vec()).unwrap();
    client(&url).push(&writer).await.unwrap();
    client(&url).pull(&reader).await.unwrap();
    assert_eq!(reader.get("gone").unwrap().unwrap().value, b"soon");

    writer.delete("gone").unwrap();
    client(&url).push(&writer).await.unwrap();
    client(&url).pull(&reader).await.unwrap();

    assert!(server.get("gone").unwrap().unwrap().is_tombstone());
    assert!(reader.get("gone").unwrap().unwrap().is_tombstone());
    assert_eq!(reader.keys().count(), 0);
}

#[tokio::test]
async fn share_links_serve_raw_values() {
    let server = Arc::new(MemoryStore::new());
    let url = spawn_server(Arc::clone(&server)).await;
    let scheme = EndpointScheme::new(url.clone());
    let http = reqwest::Client::new();

    let page = server.set("page.html", b"<b>hi</b>".to_vec()).unwrap();
    let response = http
        .get(scheme.share_url(&page.url_token).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/html; charset=utf-8"
    );
    assert_eq!(&response.bytes().await.unwrap()[..], b"<b>hi</b>");

    let unknown = http
        .get(scheme.share_url("no-such-token").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 404);

    let missing = http
        .get(url.join("get").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 400);

    server.delete("page.html").unwrap();
    let deleted = http
        .get(scheme.share_url(&page.url_token).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status().as_u16(), 410);
}

#[tokio::test]
async fn pushed_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kvass.sqlite");

    let server = Arc::new(MemoryStore::new());
    let url = spawn_server(Arc::clone(&server)).await;

    {
        let local = SqliteStore::open(&path).unwrap();
        share_key(&*server, &local);
        local.set("a", b"1".to_vec()).unwrap();
        local.set("b", b"2".to_vec()).unwrap();
        client(&url).push(&local).await.unwrap();
        local.set("c", b"3".to_vec()).unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    let pending: Vec<String> = reopened
        .pending_updates()
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(pending, ["c"]);

    client(&url).push(&reopened).await.unwrap();
    assert_eq!(server.keys().count(), 3);
}
