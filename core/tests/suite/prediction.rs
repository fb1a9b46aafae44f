#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use core_test_support::FakeHost;
use core_test_support::ScriptedModel;
use core_test_support::wait_until;
use foresight_core::ForesightErr;
use foresight_core::Prediction;
use foresight_core::PredictionController;
use foresight_core::PredictionState;
use foresight_core::history::BufferEdit;
use foresight_core::history::ChangeHistory;
use foresight_core::host::Decoration;
use foresight_core::host::Host;
use foresight_core::host::Point;
use foresight_core::model::ModelClient;
use foresight_core::prediction::PredictionSettings;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

const BUFFER: i64 = 1;

struct Harness {
    host: Arc<FakeHost>,
    model: Arc<ScriptedModel>,
    history: Arc<Mutex<ChangeHistory>>,
    controller: Arc<PredictionController>,
}

fn harness(lines: &[&str], settings: PredictionSettings) -> Harness {
    let host = Arc::new(FakeHost::new());
    host.open(BUFFER, "src/math.ts", lines);
    let model = Arc::new(ScriptedModel::new());
    let history = Arc::new(Mutex::new(ChangeHistory::default()));
    let dyn_host: Arc<dyn Host> = host.clone();
    let dyn_model: Arc<dyn ModelClient> = model.clone();
    let controller = Arc::new(PredictionController::new(
        dyn_host,
        dyn_model,
        Arc::clone(&history),
        settings,
    ));
    Harness {
        host,
        model,
        history,
        controller,
    }
}

fn proposal(find: &str, replace: &str) -> Value {
    json!({ "find": find, "replace": replace })
}

fn is_displaying(state: &PredictionState) -> bool {
    matches!(state, PredictionState::DisplayingProposedEdit { .. })
}

#[tokio::test]
async fn trigger_preview_accept_round_trip() {
    let h = harness(
        &["function add(a, b) {", "  return a + b", "}"],
        PredictionSettings::default(),
    );
    h.host.place_cursor(0, 2);
    h.model.reply(proposal(
        "function add(a, b) {",
        "function add(a: number, b: number) {",
    ));

    h.controller.trigger().await.unwrap();

    assert!(is_displaying(&h.controller.state()));
    let prompt = &h.model.requests()[0].prompt;
    assert!(prompt.contains("```src/math.ts\nfu█nction add(a, b) {"), "{prompt}");
    assert!(!h.host.decorations(BUFFER).is_empty());
    assert!(
        h.host
            .decorations(BUFFER)
            .iter()
            .all(|d| !matches!(d, Decoration::Pending { .. }))
    );
    assert_eq!(vec![(BUFFER, true)], h.host.listener_installs());
    assert_eq!(vec![BUFFER, BUFFER], h.host.live_listeners());
    assert_eq!(vec![true], h.host.active_flags());
    // The buffer itself is untouched while previewing.
    assert_eq!(0, h.host.writes());

    h.controller.accept().await.unwrap();

    assert_eq!(PredictionState::Idle, h.controller.state());
    assert_eq!(
        vec![
            "function add(a: number, b: number) {".to_string(),
            "  return a + b".to_string(),
            "}".to_string(),
        ],
        h.host.lines(BUFFER)
    );
    assert_eq!(Point::new(0, 36), h.host.cursor_position());
    assert!(h.host.decorated_buffers().is_empty());
    assert!(h.host.live_listeners().is_empty());
    assert_eq!(vec![true, false], h.host.active_flags());
    assert_eq!(1, h.host.namespaces_created());
}

#[tokio::test]
async fn trigger_while_displaying_accepts() {
    let h = harness(&["let total = 0"], PredictionSettings::default());
    h.model.reply(proposal("0", "0;"));

    h.controller.trigger().await.unwrap();
    assert!(is_displaying(&h.controller.state()));

    h.controller.trigger().await.unwrap();

    assert_eq!(PredictionState::Idle, h.controller.state());
    assert_eq!(vec!["let total = 0;".to_string()], h.host.lines(BUFFER));
    assert_eq!(1, h.model.calls());
}

#[tokio::test]
async fn only_one_request_is_in_flight() {
    let h = harness(&["const x = 1"], PredictionSettings::default());
    let reply = h.model.defer();

    let first = tokio::spawn({
        let controller = Arc::clone(&h.controller);
        async move { controller.trigger().await }
    });
    wait_until(|| !h.host.decorations(BUFFER).is_empty()).await;

    assert_matches!(
        h.controller.state(),
        PredictionState::AwaitingReply { request_id: 1, .. }
    );
    assert_eq!(
        vec![Decoration::Pending {
            row: 0,
            text: "⋯".to_string(),
        }],
        h.host.decorations(BUFFER)
    );

    // A second trigger and a dismissal are both ignored while waiting.
    h.controller.trigger().await.unwrap();
    h.controller.dismiss(None).await.unwrap();
    assert_eq!(1, h.model.calls());
    assert_matches!(h.controller.state(), PredictionState::AwaitingReply { .. });

    reply
        .send(Some(proposal("const x = 1", "const x = 42")))
        .unwrap();
    first.await.unwrap().unwrap();

    assert!(is_displaying(&h.controller.state()));
    assert_eq!(
        vec![
            Decoration::Strikethrough {
                start: Point::new(0, 10),
                end: Point::new(0, 11),
            },
            Decoration::Ghost {
                at: Point::new(0, 11),
                lines: vec!["42".to_string()],
            },
        ],
        h.host.decorations(BUFFER)
    );
}

#[tokio::test]
async fn stale_replies_are_ignored() {
    let h = harness(&["const x = 1"], PredictionSettings::default());
    let reply = h.model.defer();

    let first = tokio::spawn({
        let controller = Arc::clone(&h.controller);
        async move { controller.trigger().await }
    });
    wait_until(|| h.model.calls() == 1).await;

    let stale = Prediction {
        find: "const".to_string(),
        replace: "let".to_string(),
    };
    h.controller.complete(7, Ok(Some(stale.clone()))).await.unwrap();
    assert_matches!(h.controller.state(), PredictionState::AwaitingReply { .. });

    reply.send(Some(proposal("1", "2"))).unwrap();
    first.await.unwrap().unwrap();
    let displayed = h.controller.state();

    h.controller.complete(1, Ok(Some(stale))).await.unwrap();
    assert_eq!(displayed, h.controller.state());
}

#[tokio::test]
async fn edits_after_the_snapshot_block_accept() {
    let h = harness(&["a", "b"], PredictionSettings::default());
    h.model.reply(proposal("b", "c"));
    h.controller.trigger().await.unwrap();

    h.host.user_edit(BUFFER, &["a", "X"]);

    assert_matches!(
        h.controller.accept().await,
        Err(ForesightErr::ContextChanged)
    );
    assert_eq!(PredictionState::Idle, h.controller.state());
    assert_eq!(0, h.host.writes());
    assert_eq!(vec!["a".to_string(), "X".to_string()], h.host.lines(BUFFER));
    assert!(h.host.live_listeners().is_empty());
    assert!(h.host.decorated_buffers().is_empty());
}

#[tokio::test]
async fn find_with_cursor_marker_falls_back_to_plain_text() {
    let h = harness(&["let x = fo;"], PredictionSettings::default());
    h.host.place_cursor(0, 10);
    h.model.reply(proposal("let x = fo█;", "let x = foo();"));

    h.controller.trigger().await.unwrap();
    h.controller.accept().await.unwrap();

    assert_eq!(vec!["let x = foo();".to_string()], h.host.lines(BUFFER));
    assert_eq!(Point::new(0, 14), h.host.cursor_position());
}

#[tokio::test]
async fn cursor_stays_put_when_another_buffer_is_current() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.reply(proposal("1", "2"));
    h.controller.trigger().await.unwrap();

    h.host.open(2, "other.ts", &["unrelated"]);
    h.host.place_cursor(0, 3);
    h.controller.accept().await.unwrap();

    assert_eq!(vec!["x = 2".to_string()], h.host.lines(BUFFER));
    assert_eq!(Point::new(0, 3), h.host.cursor_position());
}

#[tokio::test]
async fn dismissal_from_another_buffer_is_ignored() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.reply(proposal("1", "2"));
    h.controller.trigger().await.unwrap();

    h.controller.dismiss(Some(2)).await.unwrap();
    assert!(is_displaying(&h.controller.state()));
    assert_eq!(vec![BUFFER, BUFFER], h.host.live_listeners());
    assert_eq!(vec![BUFFER], h.host.decorated_buffers());

    h.controller.dismiss(Some(BUFFER)).await.unwrap();
    assert_eq!(PredictionState::Idle, h.controller.state());
    assert!(h.host.live_listeners().is_empty());
    assert!(h.host.decorated_buffers().is_empty());
    assert_eq!(vec![true, false], h.host.active_flags());
    assert_eq!(vec!["x = 1".to_string()], h.host.lines(BUFFER));
}

#[tokio::test]
async fn dismissal_without_a_buffer_tears_down() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.reply(proposal("1", "2"));
    h.controller.trigger().await.unwrap();

    h.controller.dismiss(None).await.unwrap();

    assert_eq!(PredictionState::Idle, h.controller.state());
    assert!(h.host.live_listeners().is_empty());
}

#[tokio::test]
async fn insert_mode_skips_the_mode_change_listener() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.host.set_mode("i");
    h.model.reply(proposal("1", "2"));

    h.controller.trigger().await.unwrap();

    assert_eq!(vec![(BUFFER, false)], h.host.listener_installs());
    assert_eq!(vec![BUFFER], h.host.live_listeners());
}

#[tokio::test]
async fn reply_without_tool_call_returns_to_idle() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.reply_without_tool_call();

    assert_matches!(
        h.controller.trigger().await,
        Err(ForesightErr::NoStructuredResult)
    );
    assert_eq!(PredictionState::Idle, h.controller.state());
    assert!(h.host.decorated_buffers().is_empty());
    assert!(h.host.active_flags().is_empty());
}

#[tokio::test]
async fn unknown_find_text_returns_to_idle() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.reply(proposal("y = 1", "y = 2"));

    assert_matches!(
        h.controller.trigger().await,
        Err(ForesightErr::FindNotFound)
    );
    assert_eq!(PredictionState::Idle, h.controller.state());
    assert!(h.host.decorated_buffers().is_empty());
}

#[tokio::test]
async fn malformed_tool_input_is_rejected() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.reply(json!({ "find": 1 }));

    assert_matches!(
        h.controller.trigger().await,
        Err(ForesightErr::InvalidModelOutput(_))
    );
    assert_eq!(PredictionState::Idle, h.controller.state());
}

#[tokio::test]
async fn model_failure_returns_to_idle() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.model.fail("connection reset");

    assert_matches!(h.controller.trigger().await, Err(ForesightErr::Io(_)));
    assert_eq!(PredictionState::Idle, h.controller.state());

    // The controller is usable again afterwards.
    h.model.reply(proposal("1", "2"));
    h.controller.trigger().await.unwrap();
    assert!(is_displaying(&h.controller.state()));
}

#[tokio::test]
async fn slow_model_times_out() {
    let h = harness(
        &["x = 1"],
        PredictionSettings {
            timeout: Some(Duration::from_millis(50)),
            ..PredictionSettings::default()
        },
    );
    let _reply = h.model.defer();

    assert_matches!(
        h.controller.trigger().await,
        Err(ForesightErr::ModelTimeout(50))
    );
    assert_eq!(PredictionState::Idle, h.controller.state());
    assert!(h.host.decorated_buffers().is_empty());
}

#[tokio::test]
async fn recent_edits_are_included_in_the_prompt() {
    let h = harness(&["x = 1"], PredictionSettings::default());
    h.history.lock().unwrap().add(BufferEdit {
        file_path: "src/util.ts".to_string(),
        start_line: 4,
        end_line: 4,
        start_col: 0,
        end_col: 5,
        old_text: "var y".to_string(),
        new_text: "let y".to_string(),
    });
    h.model.reply_without_tool_call();

    let _ = h.controller.trigger().await;

    let prompt = &h.model.requests()[0].prompt;
    assert!(
        prompt.starts_with("## Recent edits\n\nsrc/util.ts:5-5\n-var y\n+let y\n"),
        "{prompt}"
    );
    assert!(prompt.contains("## Current file"));
}

#[tokio::test]
async fn context_window_is_clipped_around_the_cursor() {
    let lines: Vec<String> = (0..40).map(|i| format!("line {i}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let h = harness(&refs, PredictionSettings::default());
    h.host.place_cursor(20, 0);
    h.model.reply(proposal("line 20", "line twenty"));

    h.controller.trigger().await.unwrap();

    let PredictionState::DisplayingProposedEdit { context, .. } = h.controller.state() else {
        panic!("expected a displayed prediction");
    };
    assert_eq!(10, context.start_line);
    assert_eq!(39, context.end_line);
    assert_eq!(10, context.cursor_row);
    assert_eq!(40, context.line_count);

    h.controller.accept().await.unwrap();
    assert_eq!("line twenty", h.host.lines(BUFFER)[20]);
    assert_eq!("line 9", h.host.lines(BUFFER)[9]);
    assert_eq!(Point::new(20, 11), h.host.cursor_position());
}

#[tokio::test]
async fn accept_without_a_preview_does_nothing() {
    let h = harness(&["x = 1"], PredictionSettings::default());

    h.controller.accept().await.unwrap();
    h.controller.dismiss(None).await.unwrap();

    assert_eq!(PredictionState::Idle, h.controller.state());
    assert_eq!(0, h.host.writes());
    assert_eq!(0, h.model.calls());
}
