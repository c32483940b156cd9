use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use shell_capture::{CaptureConfig, CaptureEngine, CaptureError, HandleId, INVALID_HANDLE_ID};

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

fn wait_complete(engine: &CaptureEngine, id: HandleId) {
    let complete = engine
        .wait_for_completion(id, COMPLETION_TIMEOUT)
        .expect("handle should exist while waiting");
    assert!(complete, "handle {id} did not complete in time");
}

fn wait_for_lines(engine: &CaptureEngine, id: HandleId, at_least: usize) {
    let deadline = Instant::now() + COMPLETION_TIMEOUT;
    while Instant::now() < deadline {
        let stats = engine.query().stats(id).expect("handle should exist");
        if stats.line_count >= at_least {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }

    panic!("handle {id} never reached {at_least} lines");
}

#[test]
fn echo_hello_world_end_to_end() {
    let engine = CaptureEngine::default();

    let id = engine
        .run_with_capture("echo Hello World")
        .expect("echo should spawn");
    wait_complete(&engine, id);

    let stats = engine.query().stats(id).expect("stats should succeed");
    assert_eq!(stats.line_count, 1);
    assert!(stats.complete);
    assert_eq!(stats.exit_code, Some(0));
    assert!(stats.ended_at.is_some());

    let matches = engine.query().search(id, "Hello").expect("search");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].line_number, 1);

    assert_eq!(engine.query().tail(id, 5).expect("tail"), "Hello World");
}

#[test]
fn exit_code_is_recorded() {
    let engine = CaptureEngine::default();

    let id = engine.run_with_capture("exit 7").expect("exit should spawn");
    wait_complete(&engine, id);

    let stats = engine.query().stats(id).expect("stats should succeed");
    assert!(stats.complete);
    assert_eq!(stats.exit_code, Some(7));
    assert_eq!(stats.line_count, 0);
}

#[cfg(unix)]
#[test]
fn signal_termination_maps_to_shell_convention() {
    let engine = CaptureEngine::default();

    let id = engine
        .run_with_capture("kill -9 $$")
        .expect("command should spawn");
    wait_complete(&engine, id);

    assert_eq!(engine.query().stats(id).expect("stats").exit_code, Some(137));
}

#[test]
fn stdout_lines_keep_their_order() {
    let engine = CaptureEngine::default();

    let id = engine
        .run_with_capture("printf 'L1\\nL2\\nL3\\nL4\\n'")
        .expect("printf should spawn");
    wait_complete(&engine, id);

    assert_eq!(
        engine.query().read_lines(id, 1, 4).expect("read"),
        "L1\nL2\nL3\nL4"
    );
    assert_eq!(
        engine.query().read_lines(id, 1, 10_000).expect("clamped read"),
        "L1\nL2\nL3\nL4"
    );
    assert_matches!(
        engine.query().read_lines(id, 0, 5),
        Err(CaptureError::RangeStart { .. })
    );
}

#[test]
fn stderr_lines_are_tagged() {
    let engine = CaptureEngine::new(CaptureConfig::default().with_stderr_prefix("[err] "));

    let id = engine
        .run_with_capture("echo out; echo problem 1>&2")
        .expect("command should spawn");
    wait_complete(&engine, id);

    let output = engine.query().tail(id, 10).expect("tail");
    let mut lines: Vec<_> = output.split('\n').collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["[err] problem", "out"]);
}

#[test]
fn blank_stderr_prefix_still_tags_stderr() {
    let config = CaptureConfig {
        stderr_prefix: String::new(),
        ..CaptureConfig::default()
    };
    let engine = CaptureEngine::new(config.with_stderr_prefix(""));

    let id = engine
        .run_with_capture("echo same; echo same 1>&2")
        .expect("command should spawn");
    wait_complete(&engine, id);

    let output = engine.query().tail(id, 10).expect("tail");
    let mut lines: Vec<_> = output.split('\n').collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["[stderr] same", "same"]);
}

#[test]
fn unterminated_final_line_is_captured() {
    let engine = CaptureEngine::default();

    let id = engine
        .run_with_capture("printf 'first\\nlast'")
        .expect("printf should spawn");
    wait_complete(&engine, id);

    assert_eq!(engine.query().tail(id, 2).expect("tail"), "first\nlast");
}

#[test]
fn concurrent_submissions_get_distinct_ids() {
    let engine = Arc::new(CaptureEngine::default());

    let submitters: Vec<_> = (0..16)
        .map(|index| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine
                    .run_with_capture(&format!("echo {index}"))
                    .expect("echo should spawn")
            })
        })
        .collect();

    let ids: Vec<HandleId> = submitters
        .into_iter()
        .map(|submitter| submitter.join().expect("submitter should not panic"))
        .collect();

    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(!unique.contains(&INVALID_HANDLE_ID));

    for id in ids {
        wait_complete(&engine, id);
    }
    assert_eq!(engine.list().len(), 16);
}

#[test]
fn handle_is_queryable_while_running() {
    let engine = CaptureEngine::default();

    let id = engine
        .run_with_capture("echo first; sleep 1; echo second")
        .expect("command should spawn");

    let early = engine
        .query()
        .stats(id)
        .expect("stats should succeed right after submission");
    assert_eq!(early.id, id);

    wait_for_lines(&engine, id, 1);
    assert_eq!(engine.query().read_lines(id, 1, 100).expect("read"), "first");
    assert!(!engine.query().stats(id).expect("stats").complete);

    wait_complete(&engine, id);
    let stats = engine.query().stats(id).expect("stats");
    assert_eq!(stats.line_count, 2);
    assert_eq!(stats.exit_code, Some(0));
    assert!(stats.duration >= Duration::from_millis(900));
}

#[test]
fn remove_is_single_shot() {
    let engine = CaptureEngine::default();
    let id = engine.run_with_capture("true").expect("true should spawn");
    wait_complete(&engine, id);

    engine.remove(id).expect("first remove should succeed");

    assert_matches!(engine.remove(id), Err(CaptureError::HandleNotFound { .. }));
    assert_matches!(
        engine.query().stats(id),
        Err(CaptureError::HandleNotFound { .. })
    );
    assert!(engine.list().is_empty());
}

#[test]
fn spawn_failure_is_reported_synchronously() {
    let engine = CaptureEngine::new(
        CaptureConfig::default().with_shell("/definitely/not/a/shell", "-c"),
    );

    let error = engine
        .run_with_capture("echo never")
        .expect_err("missing shell must fail");

    assert_matches!(error, CaptureError::Spawn { ref command, .. } if command == "echo never");
    assert!(engine.registry().is_empty());
}

#[test]
fn commands_run_in_configured_working_dir() {
    let workspace = tempfile::tempdir().expect("tempdir should be created");
    std::fs::write(workspace.path().join("marker.txt"), "present\n").expect("write marker");
    let engine = CaptureEngine::new(CaptureConfig::default().with_working_dir(workspace.path()));

    let id = engine
        .run_with_capture("cat marker.txt")
        .expect("cat should spawn");
    wait_complete(&engine, id);

    assert_eq!(engine.query().tail(id, 1).expect("tail"), "present");
}

#[test]
fn line_cap_keeps_head_and_counts_the_rest() {
    let engine = CaptureEngine::new(CaptureConfig::default().with_max_lines(Some(3)));

    let id = engine
        .run_with_capture("i=0; while [ $i -lt 10 ]; do echo $i; i=$((i+1)); done")
        .expect("loop should spawn");
    wait_complete(&engine, id);

    let stats = engine.query().stats(id).expect("stats");
    assert_eq!(stats.line_count, 3);
    assert_eq!(stats.dropped_lines, 7);
    assert_eq!(stats.exit_code, Some(0));
    assert_eq!(engine.query().read_lines(id, 1, 3).expect("read"), "0\n1\n2");
}

#[test]
fn stdin_is_closed_for_captured_commands() {
    let engine = CaptureEngine::default();

    let id = engine
        .run_with_capture("cat; echo done")
        .expect("cat should spawn");
    wait_complete(&engine, id);

    assert_eq!(engine.query().tail(id, 1).expect("tail"), "done");
}
