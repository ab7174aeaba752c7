//! Integration tests for the Session Manager.
//!
//! These tests drive `spawn_manager()` through `ManagerHandle` with real
//! child processes standing in for ffmpeg. A small `sh` script records the
//! destination argument and copies stdin into a temp directory.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use relay_core::{ConnectionId, SessionId};
use relayd::registry::{spawn_manager, EndReason, ManagerError, ManagerHandle, RelayEvent};
use relayd::transcoder::{ExitOutcome, TranscoderConfig, DESTINATION_PLACEHOLDER};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

// ============================================================================
// Test Helpers
// ============================================================================

const BASE_URL: &str = "rtmp://media.test/live";

/// Maximum time to wait for a process to produce output
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between output checks
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A transcoder that records its destination and copies stdin into `dir`.
///
/// One capture directory per session: `dir/<session>/destination` and
/// `dir/<session>/input`.
fn capture_config(dir: &Path) -> TranscoderConfig {
    let script = r#"
        out="$0/$(basename "$1")"
        mkdir -p "$out"
        printf '%s' "$1" > "$out/destination"
        exec cat > "$out/input"
    "#;
    TranscoderConfig::new(
        "sh",
        vec![
            "-c".to_string(),
            script.to_string(),
            dir.display().to_string(),
            DESTINATION_PLACEHOLDER.to_string(),
        ],
        BASE_URL,
    )
}

/// A transcoder that exits immediately with `code`.
fn exiting_config(code: i32) -> TranscoderConfig {
    TranscoderConfig::new("sh", vec!["-c".to_string(), format!("exit {code}")], BASE_URL)
}

fn sid(id: &str) -> SessionId {
    SessionId::new(id)
}

async fn forward(handle: &ManagerHandle, id: &str, data: &'static [u8]) {
    handle
        .forward_chunk(sid(id), Bytes::from_static(data))
        .await
        .expect("forward should be queued");
}

/// Polls until `path` holds exactly `expected`.
async fn wait_for_contents(path: &Path, expected: &str) {
    let result = timeout(WAIT_TIMEOUT, async {
        loop {
            if let Ok(contents) = tokio::fs::read_to_string(path).await {
                if contents == expected {
                    return;
                }
            }
            sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    let actual = std::fs::read_to_string(path).unwrap_or_default();
    assert!(
        result.is_ok(),
        "{} never held {expected:?} (last: {actual:?})",
        path.display()
    );
}

/// Next event that is not a viewer count.
async fn next_lifecycle_event(rx: &mut broadcast::Receiver<RelayEvent>) -> RelayEvent {
    timeout(WAIT_TIMEOUT, async {
        loop {
            match rx.recv().await.expect("event channel open") {
                RelayEvent::ViewerCount { .. } => continue,
                event => return event,
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn next_count(rx: &mut broadcast::Receiver<RelayEvent>) -> (SessionId, usize) {
    timeout(WAIT_TIMEOUT, async {
        loop {
            if let RelayEvent::ViewerCount { session_id, count } =
                rx.recv().await.expect("event channel open")
            {
                return (session_id, count);
            }
        }
    })
    .await
    .expect("timed out waiting for viewer count")
}

// ============================================================================
// Transcoder Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_first_chunk_starts_publisher_for_session() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_manager(capture_config(dir.path()));

    forward(&handle, "s1", b"B1").await;

    wait_for_contents(&dir.path().join("s1/destination"), "rtmp://media.test/live/s1").await;
    wait_for_contents(&dir.path().join("s1/input"), "B1").await;

    let view = handle.get_session(sid("s1")).await.expect("session running");
    assert_eq!(view.destination, "rtmp://media.test/live/s1");
    assert_eq!(view.chunks_forwarded, 1);
    assert_eq!(view.bytes_forwarded, 2);
    assert!(view.pid.is_some());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chunks_reach_process_in_order() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_manager(capture_config(dir.path()));

    for chunk in ["one,", "two,", "three"] {
        handle
            .forward_chunk(sid("ordered"), Bytes::copy_from_slice(chunk.as_bytes()))
            .await
            .unwrap();
    }

    wait_for_contents(&dir.path().join("ordered/input"), "one,two,three").await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_chunks_share_one_process() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_manager(capture_config(dir.path()));
    let mut events = handle.subscribe();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { forward(&handle, "burst", b"x").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let sessions = handle.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].chunks_forwarded, 20);

    assert!(matches!(
        next_lifecycle_event(&mut events).await,
        RelayEvent::SessionStarted { .. }
    ));
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    wait_for_contents(&dir.path().join("burst/input"), &"x".repeat(20)).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_manager(capture_config(dir.path()));

    forward(&handle, "a", b"alpha").await;
    forward(&handle, "b", b"beta").await;

    wait_for_contents(&dir.path().join("a/input"), "alpha").await;
    wait_for_contents(&dir.path().join("b/input"), "beta").await;
    assert_eq!(handle.list_sessions().await.len(), 2);

    assert_eq!(handle.shutdown().await, Ok(2));
    assert!(handle.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_stop_then_next_chunk_starts_new_instance() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_manager(capture_config(dir.path()));
    let mut events = handle.subscribe();

    forward(&handle, "s1", b"first").await;
    let first = handle.get_session(sid("s1")).await.expect("running");

    assert_eq!(handle.stop(sid("s1")).await, Ok(true));
    assert!(handle.get_session(sid("s1")).await.is_none());

    // Stopping again is a no-op
    assert_eq!(handle.stop(sid("s1")).await, Ok(false));

    forward(&handle, "s1", b"second").await;
    let second = handle.get_session(sid("s1")).await.expect("running again");
    assert_ne!(first.instance, second.instance);

    assert_eq!(
        next_lifecycle_event(&mut events).await,
        RelayEvent::SessionStarted {
            session_id: sid("s1"),
            instance: first.instance
        }
    );
    assert_eq!(
        next_lifecycle_event(&mut events).await,
        RelayEvent::SessionEnded {
            session_id: sid("s1"),
            instance: first.instance,
            reason: EndReason::Stopped
        }
    );
    assert_eq!(
        next_lifecycle_event(&mut events).await,
        RelayEvent::SessionStarted {
            session_id: sid("s1"),
            instance: second.instance
        }
    );

    // The stopped instance's exit must not remove the new one
    sleep(Duration::from_millis(200)).await;
    let still = handle.get_session(sid("s1")).await.expect("new instance kept");
    assert_eq!(still.instance, second.instance);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_self_exit_removes_session() {
    let handle = spawn_manager(exiting_config(3));
    let mut events = handle.subscribe();

    forward(&handle, "s1", b"data").await;

    let started = next_lifecycle_event(&mut events).await;
    let instance = match started {
        RelayEvent::SessionStarted { instance, .. } => instance,
        other => panic!("expected SessionStarted, got {other:?}"),
    };

    assert_eq!(
        next_lifecycle_event(&mut events).await,
        RelayEvent::SessionEnded {
            session_id: sid("s1"),
            instance,
            reason: EndReason::Exited(ExitOutcome::Code(3))
        }
    );
    assert!(handle.get_session(sid("s1")).await.is_none());
}

#[tokio::test]
async fn test_write_failure_keeps_session_until_exit() {
    // Closes stdin right away and lingers so the exit comes later.
    let config = TranscoderConfig::new(
        "sh",
        vec!["-c".to_string(), "exec 0<&-; sleep 1".to_string()],
        BASE_URL,
    );
    let handle = spawn_manager(config);
    let mut events = handle.subscribe();
    let chunk = Bytes::from(vec![0u8; 64 * 1024]);

    handle.forward_chunk(sid("s1"), chunk.clone()).await.unwrap();
    let instance = match next_lifecycle_event(&mut events).await {
        RelayEvent::SessionStarted { instance, .. } => instance,
        other => panic!("expected SessionStarted, got {other:?}"),
    };

    let mut sent = 1;
    let mut saw_failure = false;
    for _ in 0..50 {
        let view = handle.get_session(sid("s1")).await.expect("session kept");
        assert_eq!(view.instance, instance);
        if view.chunks_forwarded < sent {
            saw_failure = true;
            break;
        }

        assert_eq!(handle.forward_chunk(sid("s1"), chunk.clone()).await, Ok(()));
        sent += 1;
        sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_failure, "writes should fail once stdin is closed");

    // Failed writes neither remove nor restart the process.
    assert_eq!(handle.forward_chunk(sid("s1"), chunk.clone()).await, Ok(()));
    let view = handle.get_session(sid("s1")).await.expect("session kept");
    assert_eq!(view.instance, instance);

    assert_eq!(
        next_lifecycle_event(&mut events).await,
        RelayEvent::SessionEnded {
            session_id: sid("s1"),
            instance,
            reason: EndReason::Exited(ExitOutcome::Code(0))
        }
    );
    assert!(handle.get_session(sid("s1")).await.is_none());
}

#[tokio::test]
async fn test_spawn_failure_records_nothing() {
    let handle = spawn_manager(TranscoderConfig::ffmpeg(
        "/nonexistent/relay-test-transcoder",
        BASE_URL,
    ));

    forward(&handle, "s1", b"data").await;
    forward(&handle, "s1", b"more").await;

    assert!(handle.list_sessions().await.is_empty());
    assert!(handle.is_connected());
}

#[tokio::test]
async fn test_empty_session_id_rejected() {
    let handle = spawn_manager(exiting_config(0));

    let result = handle
        .forward_chunk(SessionId::new(""), Bytes::from_static(b"data"))
        .await;
    assert_eq!(result, Err(ManagerError::InvalidSessionId));
    assert!(handle.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_empty_chunk_never_spawns() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_manager(capture_config(dir.path()));

    handle.forward_chunk(sid("s1"), Bytes::new()).await.unwrap();

    assert!(handle.list_sessions().await.is_empty());
    assert!(!dir.path().join("s1").exists());
}

// ============================================================================
// Viewer Presence Tests
// ============================================================================

#[tokio::test]
async fn test_viewer_counts() {
    let handle = spawn_manager(exiting_config(0));
    let mut events = handle.subscribe();

    let c1 = ConnectionId::new("c1");
    let c2 = ConnectionId::new("c2");

    assert_eq!(handle.join_viewer(sid("s1"), c1.clone()).await, Ok(1));
    assert_eq!(handle.join_viewer(sid("s1"), c2.clone()).await, Ok(2));
    assert_eq!(handle.leave_viewer(sid("s1"), c1.clone()).await, Ok(Some(1)));

    assert_eq!(next_count(&mut events).await, (sid("s1"), 1));
    assert_eq!(next_count(&mut events).await, (sid("s1"), 2));
    assert_eq!(next_count(&mut events).await, (sid("s1"), 1));

    // Non-member leave changes nothing and publishes nothing
    assert_eq!(handle.leave_viewer(sid("s1"), c1).await, Ok(None));
    assert!(events.try_recv().is_err());

    assert_eq!(handle.viewer_count(sid("s1")).await, 1);
}

#[tokio::test]
async fn test_disconnect_updates_every_watched_session() {
    let handle = spawn_manager(exiting_config(0));

    let c1 = ConnectionId::new("c1");
    let c2 = ConnectionId::new("c2");
    handle.join_viewer(sid("a"), c1.clone()).await.unwrap();
    handle.join_viewer(sid("b"), c1.clone()).await.unwrap();
    handle.join_viewer(sid("b"), c2).await.unwrap();

    let mut events = handle.subscribe();
    assert_eq!(handle.disconnect(c1.clone()).await, Ok(2));

    let mut counts = vec![next_count(&mut events).await, next_count(&mut events).await];
    counts.sort_by(|x, y| x.0.as_str().cmp(y.0.as_str()));
    assert_eq!(counts, vec![(sid("a"), 0), (sid("b"), 1)]);

    // Second disconnect is a no-op
    assert_eq!(handle.disconnect(c1).await, Ok(0));
    assert!(events.try_recv().is_err());
}
