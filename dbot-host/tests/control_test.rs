//! Integration tests for [`dbot_host::ControlPlane`].
//!
//! Covers: reply routing (requester vs broadcast), the app.edit flow, bulk failure reporting, the
//! gate serialising mutating commands, read-only queries and server shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{journal, tracer, Fixture, RecordingSink};
use dbot_host::{ConfigStore, ControlPlane, Request, Status, Target};
use serde_json::json;

fn control(fx: &Fixture) -> (ControlPlane, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    (ControlPlane::new(fx.manager.clone(), sink.clone()), sink)
}

/// **Test: Unknown app ids get an error reply sent only to the requester.**
#[tokio::test]
async fn test_unknown_app_is_requester_error() {
    let fx = Fixture::new(json!({"app_configs": [tracer("present")]})).await;
    let (control, sink) = control(&fx);

    control.handle(Request::for_app("app.start", "ghost")).await;

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    let (target, reply) = &replies[0];
    assert_eq!(*target, Target::Requester);
    assert_eq!(reply.event, "app_start");
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.message, "App with ID ghost not found!");
}

/// **Test: An unknown command is answered with an error.**
#[tokio::test]
async fn test_unknown_command() {
    let fx = Fixture::new(json!({"app_configs": []})).await;
    let (control, sink) = control(&fx);

    control.handle(Request::new("apps.explode")).await;

    let replies = sink.take();
    assert_eq!(replies[0].1.status, Status::Error);
    assert_eq!(replies[0].1.event, "apps.explode");
}

/// **Test: Identical edit warns without writing or reloading.**
///
/// **Setup:** A booted tracer app whose only stored argument is `label = "same"`.
/// **Action:** app.edit with `{"label": "same", "delay_ms": 0}` (same values, defaults explicit).
/// **Expected:** Warning "Nothing has changed"; file bytes, instance and module generation unchanged.
#[tokio::test]
async fn test_identical_edit_is_a_warning() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "same", "module": "tracer", "token": "s", "arguments": {"label": "same"}}
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;
    let before = fx.manager.get("same").await.unwrap();
    let file_before = fx.read_file();
    let generation = fx.manager.registry().generation("tracer");

    control
        .handle(
            Request::for_app("app.edit", "same").with_config(json!({"label": "same", "delay_ms": 0})),
        )
        .await;

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].1.status, Status::Warning);
    assert_eq!(replies[0].1.message, "Nothing has changed");
    assert_eq!(fx.read_file(), file_before);
    assert!(Arc::ptr_eq(&before, &fx.manager.get("same").await.unwrap()));
    assert_eq!(fx.manager.registry().generation("tracer"), generation);
}

/// **Test: A real edit persists the non-default arguments and reloads the app.**
#[tokio::test]
async fn test_edit_persists_and_reloads() {
    let fx = Fixture::new(json!({"app_configs": [tracer("edit")]})).await;
    let (control, sink) = control(&fx);
    control.boot().await;
    fx.manager.start("edit").await.unwrap();
    let before = fx.manager.get("edit").await.unwrap();

    control
        .handle(
            Request::for_app("app.edit", "edit")
                .with_config(json!({"label": "tracer", "numbers": [1, 2]})),
        )
        .await;

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    let (target, reply) = &replies[0];
    assert_eq!(*target, Target::Broadcast);
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.message, "App edit edited and reloaded");
    assert_eq!(reply.data["new_config"], json!({"numbers": [1, 2]}));
    assert_eq!(reply.data["old_config"], json!({}));
    assert_eq!(reply.data["app_update"]["running"], json!(true));

    let after = fx.manager.get("edit").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.running());

    let on_disk: serde_json::Value = serde_json::from_str(&fx.read_file()).unwrap();
    assert_eq!(on_disk["app_configs"][0]["arguments"], json!({"numbers": [1, 2]}));
    assert!(fx.read_file().contains("\n  \"app_configs\""));
    assert_eq!(
        fx.store.app_config("edit").await.unwrap().arguments["numbers"],
        json!([1, 2])
    );
}

/// **Test: Invalid edits are rejected before anything is written.**
#[tokio::test]
async fn test_edit_validation_error() {
    let fx = Fixture::new(json!({"app_configs": [tracer("val")]})).await;
    let (control, sink) = control(&fx);
    control.boot().await;
    let file_before = fx.read_file();

    control
        .handle(Request::for_app("app.edit", "val").with_config(json!({"delay_ms": "soon"})))
        .await;
    control.handle(Request::for_app("app.edit", "val")).await;

    let replies = sink.take();
    assert_eq!(replies[0].0, Target::Requester);
    assert!(replies[0]
        .1
        .message
        .starts_with("Config validation error:"));
    assert_eq!(replies[1].1.message, "\"config\" not set!");
    assert_eq!(fx.read_file(), file_before);
}

/// **Test: Bulk start reports each failing target and ends with a warning summary.**
#[tokio::test]
async fn test_bulk_start_reports_failures() {
    let fx = Fixture::new(json!({"app_configs": [
        tracer("ok-1"),
        {"id": "bad", "module": "tracer", "token": "bad-token"},
        tracer("ok-2")
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;

    control.handle(Request::new("apps.start")).await;

    let replies = sink.take();
    assert_eq!(replies.len(), 2);
    let (target, error) = &replies[0];
    assert_eq!(*target, Target::Requester);
    assert_eq!(error.status, Status::Error);
    assert!(error.message.starts_with("bad: "));
    let (target, summary) = &replies[1];
    assert_eq!(*target, Target::Broadcast);
    assert_eq!(summary.status, Status::Warning);
    assert_eq!(summary.data["apps_update"].as_array().unwrap().len(), 3);
    assert!(fx.manager.get("ok-1").await.unwrap().running());
    assert!(fx.manager.get("ok-2").await.unwrap().running());
}

/// **Test: Bulk pause with no failures is a broadcast success.**
#[tokio::test]
async fn test_bulk_pause_success() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "p1", "module": "tracer", "token": "a", "auto_start": true}
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;

    control.handle(Request::new("apps.pause")).await;

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, Target::Broadcast);
    assert_eq!(replies[0].1.status, Status::Success);
    assert_eq!(replies[0].1.message, "Apps paused");
    assert!(!fx.manager.get("p1").await.unwrap().running());
}

/// **Test: Mutating commands run strictly one after another.**
///
/// **Setup:** Two initialized tracer apps whose on_start hook sleeps 50 ms.
/// **Action:** Issue app.start for both concurrently.
/// **Expected:** The journal shows one start finishing before the other begins.
#[tokio::test]
async fn test_gate_serialises_mutating_commands() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "gate-a", "module": "tracer", "token": "a", "arguments": {"delay_ms": 50}},
        {"id": "gate-b", "module": "tracer", "token": "b", "arguments": {"delay_ms": 50}}
    ]}))
    .await;
    let (control, _sink) = control(&fx);
    control.boot().await;

    tokio::join!(
        control.handle(Request::for_app("app.start", "gate-a")),
        control.handle(Request::for_app("app.start", "gate-b")),
    );

    let lines = journal("gate-");
    assert_eq!(lines.len(), 4);
    let first = lines[0].trim_end_matches(":start:begin").to_string();
    assert_eq!(lines[1], format!("{}:start:end", first));
    assert!(lines[2].ends_with(":start:begin") && !lines[2].starts_with(&first));
    assert!(lines[3].ends_with(":start:end"));
}

/// **Test: Read-only queries answer the requester and do not wait for the gate.**
#[tokio::test]
async fn test_read_only_queries() {
    let fx = Fixture::new(json!({"app_configs": [tracer("read"), tracer("other")]})).await;
    let (control, sink) = control(&fx);
    control.boot().await;

    control.handle(Request::new("apps.config")).await;
    control.handle(Request::for_app("app.config", "read")).await;
    control.handle(Request::for_app("app.schema", "read")).await;
    control.handle(Request::new("connect")).await;

    let replies = sink.take();
    assert!(replies.iter().all(|(target, _)| *target == Target::Requester));
    assert_eq!(replies[0].1.event, "all_app_configs");
    assert_eq!(replies[0].1.data["apps_update"][0]["id"], "other");
    assert_eq!(replies[1].1.event, "single_app_config");
    assert_eq!(replies[1].1.data["app_update"]["type"], "Tracer[Responder]");
    assert_eq!(replies[2].1.event, "app_schema");
    assert!(replies[2].1.data["schema"]["properties"]["label"].is_object());
    assert_eq!(replies[3].1.message, "Connection established");
}

/// **Test: app.reload reloads one app and broadcasts its info.**
#[tokio::test]
async fn test_app_reload() {
    let fx = Fixture::new(json!({"app_configs": [tracer("rl")]})).await;
    let (control, sink) = control(&fx);
    control.boot().await;
    let before = fx.manager.get("rl").await.unwrap();

    control.handle(Request::for_app("app.reload", "rl")).await;

    let replies = sink.take();
    assert_eq!(replies[0].1.message, "App rl reloaded");
    assert_eq!(replies[0].0, Target::Broadcast);
    assert!(!Arc::ptr_eq(&before, &fx.manager.get("rl").await.unwrap()));
}

/// **Test: server.shutdown destroys every app and cancels the shutdown token.**
#[tokio::test]
async fn test_server_shutdown() {
    let fx = Fixture::new(json!({"app_configs": [tracer("s1"), tracer("s2")]})).await;
    let (control, sink) = control(&fx);
    control.boot().await;
    let token = control.shutdown_token();

    control.handle(Request::new("server.shutdown")).await;

    assert!(token.is_cancelled());
    assert!(fx.manager.is_empty().await);
    let replies = sink.take();
    assert_eq!(replies.last().unwrap().1.event, "shutdown");
}

/// **Test: Handled commands land in the activity journal.**
#[tokio::test]
async fn test_activity_journal() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "act", "module": "tracer", "token": "a", "auto_start": true}
    ]}))
    .await;
    let (control, _sink) = control(&fx);
    control.boot().await;

    control.handle(Request::for_app("app.pause", "act")).await;
    control.handle(Request::for_app("app.pause", "nobody")).await;

    let activity = control.recent_activity();
    assert_eq!(activity.len(), 3);
    assert_eq!(activity[0].text, "auto start - appId: act");
    assert_eq!(activity[1].text, "app.pause - appId: act");
    assert_eq!(activity[1].status, Status::Success);
    assert_eq!(activity[2].status, Status::Error);
    assert!(activity[2].text.ends_with("App with ID nobody not found!"));
}

/// **Test: An edit that breaks a type rule is rejected before anything changes.**
///
/// **Setup:** A booted echo app with `max_length = 10`.
/// **Action:** app.edit with `{"max_length": 0}` (well-formed, but the type forbids zero).
/// **Expected:** Config validation error to the requester; file and live instance unchanged.
#[tokio::test]
async fn test_edit_rejected_by_type_rule() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "echo-e", "module": "echo", "token": "e", "arguments": {"max_length": 10}}
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;
    let before = fx.manager.get("echo-e").await.unwrap();
    let file_before = fx.read_file();

    control
        .handle(Request::for_app("app.edit", "echo-e").with_config(json!({"max_length": 0})))
        .await;

    let replies = sink.take();
    assert_eq!(replies.len(), 1);
    let (target, reply) = &replies[0];
    assert_eq!(*target, Target::Requester);
    assert_eq!(reply.status, Status::Error);
    assert!(reply.message.starts_with("Config validation error:"));
    assert!(reply.message.contains("max_length must be positive"));
    assert_eq!(fx.read_file(), file_before);
    assert!(Arc::ptr_eq(&before, &fx.manager.get("echo-e").await.unwrap()));
    assert_eq!(
        fx.store.app_config("echo-e").await.unwrap().arguments["max_length"],
        json!(10)
    );
}

/// **Test: A command queued behind a reload acts on the reloaded instance.**
///
/// **Setup:** `q-x` running; `q-y` whose on_start sleeps 200 ms.
/// **Action:** apps.start holds the gate; app.reload q-x queues, then app.pause q-x queues.
/// **Expected:** The live `q-x` (the reloaded one) ends up paused and the reply says so.
#[tokio::test]
async fn test_queued_command_sees_reloaded_instance() {
    let fx = Fixture::new(json!({"app_configs": [
        tracer("q-x"),
        {"id": "q-y", "module": "tracer", "token": "y", "arguments": {"delay_ms": 200}}
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;
    fx.manager.start("q-x").await.unwrap();
    let before = fx.manager.get("q-x").await.unwrap();

    tokio::join!(
        control.handle(Request::new("apps.start")),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            control.handle(Request::for_app("app.reload", "q-x")).await;
        },
        async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            control.handle(Request::for_app("app.pause", "q-x")).await;
        },
    );

    let live = fx.manager.get("q-x").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &live));
    assert!(live.initialized() && !live.running());

    let replies = sink.take();
    let (target, pause) = replies
        .iter()
        .find(|(_, reply)| reply.event == "app_pause")
        .unwrap();
    assert_eq!(*target, Target::Broadcast);
    assert_eq!(pause.status, Status::Success);
    assert_eq!(pause.message, "App q-x paused");
    assert_eq!(pause.data["app_update"]["running"], json!(false));
}

/// **Test: Read-only queries answer while a gated command is still running.**
///
/// **Setup:** `ro-slow` whose on_start sleeps 200 ms, plus `ro-other`.
/// **Action:** app.start ro-slow; 20 ms later app.schema ro-slow and app.config ro-other.
/// **Expected:** Both read-only replies arrive before the start finishes.
#[tokio::test]
async fn test_read_only_queries_skip_the_gate() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "ro-slow", "module": "tracer", "token": "s", "arguments": {"delay_ms": 200}},
        tracer("ro-other")
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;

    let ((), journal_during) = tokio::join!(
        control.handle(Request::for_app("app.start", "ro-slow")),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            control.handle(Request::for_app("app.schema", "ro-slow")).await;
            control.handle(Request::for_app("app.config", "ro-other")).await;
            journal("ro-slow")
        },
    );

    assert_eq!(journal_during, vec!["ro-slow:start:begin".to_string()]);
    let events: Vec<String> = sink.take().into_iter().map(|(_, reply)| reply.event).collect();
    assert_eq!(events, vec!["app_schema", "single_app_config", "app_start"]);
    assert_eq!(journal("ro-slow").len(), 2);
}

/// **Test: The connect reply carries the activity journal.**
#[tokio::test]
async fn test_connect_includes_activity() {
    let fx = Fixture::new(json!({"app_configs": [
        {"id": "hello", "module": "tracer", "token": "h", "auto_start": true}
    ]}))
    .await;
    let (control, sink) = control(&fx);
    control.boot().await;

    control.handle(Request::new("connect")).await;

    let replies = sink.take();
    let activity = &replies[0].1.data["activity"];
    assert_eq!(activity[0]["text"], "auto start - appId: hello");
    assert_eq!(activity[0]["status"], "success");
}
