//! End-to-end dispatcher behavior over a wired harness: read-after-write,
//! offline write capture and replay, pass-through gating, and the envelope
//! contract.

mod common;

use common::Harness;
use proxy_agent::connection::models::{ConnectionEvent, ConnectionState};
use serde_json::{Value, json};

fn as_json(envelope: &proxy_agent::dispatcher::envelope::Envelope) -> Value {
    serde_json::to_value(envelope).unwrap()
}

#[tokio::test(start_paused = true)]
async fn read_after_write_while_connected() {
    let harness = Harness::new(Vec::new());
    harness.upstream.set_reachable(true);

    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;

    let write = harness
        .dispatcher
        .handle_call(
            "set_memory",
            json!({"name": "ctx", "content": "hello", "project": "proj"}),
        )
        .await;
    let write = as_json(&write);
    assert_eq!(write["data"]["success"], json!(true));
    assert_eq!(write["_metadata"]["source"], json!("live"));
    assert_eq!(write["_metadata"]["status"], json!("connected"));
    assert!(write["data"].get("queued").is_none());

    let read = harness
        .dispatcher
        .handle_call("get_memory", json!({"name": "ctx", "project": "proj"}))
        .await;
    let read = as_json(&read);
    assert_eq!(read["data"]["name"], json!("ctx"));
    assert_eq!(read["data"]["project"], json!("proj"));
    assert_eq!(read["data"]["content"], json!("hello"));
    assert_eq!(read["_metadata"]["source"], json!("cache"));
    assert_eq!(read["_metadata"]["age_seconds"], json!(0));

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn offline_write_queues_then_replays_on_reconnect() {
    let harness = Harness::new(Vec::new());

    // Unreachable upstream parks the supervisor in Reconnecting.
    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Reconnecting { .. })
        })
        .await;
    assert_eq!(harness.supervisor.state(), ConnectionState::Reconnecting);

    let args = json!({
        "docType": "workflow",
        "name": "feat",
        "content": "# Feature workflow",
    });
    let write = harness.dispatcher.handle_call("create_document", args.clone()).await;
    let write = as_json(&write);
    assert_eq!(write["data"]["success"], json!(true));
    assert_eq!(write["data"]["queued"], json!(true));
    assert!(
        write["_metadata"]["warning"]
            .as_str()
            .unwrap()
            .starts_with("Operation queued")
    );
    assert_eq!(harness.queue.pending_count().await.unwrap(), 1);

    // The local view is already updated, in the critical tier.
    let cached = harness
        .cache
        .get_document("workflow", "feat", "")
        .await
        .unwrap()
        .unwrap();
    assert!(cached.is_critical);

    // Upstream returns: replay drains the queue with the original
    // arguments, exactly once.
    harness.upstream.set_reachable(true);
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;
    harness.wait_for_drained_queue().await;

    let replayed = harness.upstream.calls_for("create_document");
    assert_eq!(replayed, vec![args]);

    let stats = harness.cache.stats().await.unwrap();
    assert_eq!(stats.critical_count, 1);

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn pass_through_is_rejected_offline_without_touching_upstream() {
    let harness = Harness::new(Vec::new());

    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Reconnecting { .. })
        })
        .await;

    let envelope = harness
        .dispatcher
        .handle_call("search_codebase", json!({"query": "fn main"}))
        .await;
    let envelope = as_json(&envelope);

    assert_eq!(envelope["error"]["code"], json!("OFFLINE"));
    assert_eq!(envelope["_metadata"]["status"], json!("reconnecting"));
    assert_eq!(harness.upstream.total_calls(), 0);

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn pass_through_forwards_while_connected() {
    let harness = Harness::new(Vec::new());
    harness.upstream.set_reachable(true);
    harness
        .upstream
        .respond_with("search_codebase", json!({"matches": ["src/main.rs"]}));

    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;

    let envelope = harness
        .dispatcher
        .handle_call("search_codebase", json!({"query": "fn main"}))
        .await;
    let envelope = as_json(&envelope);

    assert_eq!(envelope["data"]["matches"], json!(["src/main.rs"]));
    assert_eq!(envelope["_metadata"]["source"], json!("live"));

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn read_miss_while_connected_fetches_and_primes_the_cache() {
    let harness = Harness::new(Vec::new());
    harness.upstream.set_reachable(true);
    harness.upstream.respond_with(
        "get_document",
        json!({"content": "style guide", "metadata": {"rev": 3}}),
    );

    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;

    let key = json!({"docType": "rule", "name": "WRITING-STYLE"});
    let first = as_json(&harness.dispatcher.handle_call("get_document", key.clone()).await);
    assert_eq!(first["_metadata"]["source"], json!("live"));
    assert_eq!(first["data"]["content"], json!("style guide"));
    assert_eq!(first["data"]["metadata"]["rev"], json!(3));

    // Second read is a cache hit; the upstream is not consulted again.
    let second = as_json(&harness.dispatcher.handle_call("get_document", key.clone()).await);
    assert_eq!(second["_metadata"]["source"], json!("cache"));
    assert_eq!(second["data"]["metadata"]["rev"], json!(3));
    assert_eq!(harness.upstream.calls_for("get_document").len(), 1);

    // Push invalidation drops the row; the next read goes upstream again.
    proxy_agent::invalidation::listener::handle_event(
        &harness.cache,
        "document:invalidate",
        r#"{"type": "document", "docType": "rule", "name": "WRITING-STYLE"}"#,
    )
    .await;

    let third = as_json(&harness.dispatcher.handle_call("get_document", key).await);
    assert_eq!(third["_metadata"]["source"], json!("live"));
    assert_eq!(harness.upstream.calls_for("get_document").len(), 2);

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn cached_reads_survive_disconnection() {
    let harness = Harness::new(Vec::new());
    harness.upstream.set_reachable(true);

    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;

    harness
        .dispatcher
        .handle_call("set_memory", json!({"name": "ctx", "content": "kept"}))
        .await;

    // Drop the link and let the supervisor notice.
    harness.upstream.set_reachable(false);
    harness.supervisor.record_failure("link down").await;
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Reconnecting { .. })
        })
        .await;

    let read = as_json(
        &harness
            .dispatcher
            .handle_call("get_memory", json!({"name": "ctx"}))
            .await,
    );
    assert_eq!(read["data"]["content"], json!("kept"));
    assert_eq!(read["_metadata"]["source"], json!("cache"));
    assert_eq!(read["_metadata"]["status"], json!("reconnecting"));

    // A missing key while disconnected is a structured UNAVAILABLE.
    let miss = as_json(
        &harness
            .dispatcher
            .handle_call("get_workflow", json!({"name": "nope"}))
            .await,
    );
    assert_eq!(miss["error"]["code"], json!("UNAVAILABLE"));
    assert!(
        miss["error"]["suggestions"]
            .as_array()
            .unwrap()
            .len()
            >= 3
    );

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn every_envelope_carries_a_status() {
    let harness = Harness::new(Vec::new());

    // Never started: state is Disconnected. Exercise every routing class
    // plus the failure paths.
    let calls: Vec<(&str, Value)> = vec![
        ("get_memory", json!({"name": "missing"})),
        ("get_document", json!({"docType": "frd", "name": "missing"})),
        ("get_workflow", json!({"name": "missing"})),
        ("set_memory", json!({"name": "m", "content": "c"})),
        ("delete_document", json!({"docType": "frd", "name": "m"})),
        ("search_codebase", json!({})),
        ("completely_unknown_tool", json!({})),
        ("get_document", json!({"wrong": "shape"})),
    ];

    for (tool, args) in calls {
        let envelope = as_json(&harness.dispatcher.handle_call(tool, args).await);
        let status = envelope["_metadata"]["status"].as_str().unwrap_or_default();
        assert_eq!(status, "disconnected", "tool {tool} must carry status");
        assert!(
            envelope.get("data").is_some() || envelope.get("error").is_some(),
            "tool {tool} must carry data or error"
        );
    }

    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn malformed_write_arguments_become_tool_errors() {
    let harness = Harness::new(Vec::new());

    let envelope = as_json(
        &harness
            .dispatcher
            .handle_call("create_document", json!({"name": "no content"}))
            .await,
    );
    assert_eq!(envelope["error"]["code"], json!("TOOL_ERROR"));

    // Nothing was cached or queued.
    assert_eq!(harness.cache.stats().await.unwrap().total_count, 0);
    assert_eq!(harness.queue.pending_count().await.unwrap(), 0);

    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn list_tools_is_stable_across_states() {
    let harness = Harness::new(Vec::new());

    let offline_view = harness.dispatcher.list_tools();

    harness.upstream.set_reachable(true);
    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;

    assert_eq!(offline_view, harness.dispatcher.list_tools());

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn preload_sweep_primes_critical_kinds_on_connect() {
    let harness = Harness::new(vec!["workflow".to_owned()]);
    harness.upstream.set_reachable(true);
    harness.upstream.respond_with(
        "list_documents",
        json!({"documents": [
            {"name": "release", "content": "# Release", "project": ""},
            {"name": "hotfix", "content": "# Hotfix", "metadata": {"owner": "ops"}},
        ]}),
    );

    let mut events = harness.supervisor.subscribe();
    harness.supervisor.start();
    harness
        .wait_for_event(&mut events, |e| {
            matches!(e, ConnectionEvent::Connected { .. })
        })
        .await;

    // The sweep runs as a background task; poll until both rows land.
    tokio::time::timeout(std::time::Duration::from_secs(30), async {
        loop {
            if harness.cache.stats().await.unwrap().critical_count == 2 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("preload sweep never landed");

    let row = harness
        .cache
        .get_document("workflow", "hotfix", "")
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_critical);
    assert_eq!(row.metadata.as_deref(), Some(r#"{"owner":"ops"}"#));

    harness.supervisor.stop().await;
    harness.cancel.cancel();
}
