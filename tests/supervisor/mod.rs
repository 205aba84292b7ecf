//! Supervisor tests against scripted workers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use pressy_supervisor::supervisor::{
    cancel_on_signal, Outcome, PressStateMachine, Supervisor, SupervisorError, WorkerState,
};
use pressy_supervisor::config::SupervisorConfig;
use pressy_supervisor::worker::{SpawnError, QUERY_LINE};

use crate::common::{fake_worker, input_file, logged_commands, scripted_script, scripted_worker};

/// Collects every percentage reported to the progress sink.
fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl FnMut(u8) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |percent| seen.lock().unwrap().push(percent)
    };
    (seen, sink)
}

fn assert_single_trailing_quit(commands: &[String]) {
    assert_eq!(commands.last().map(String::as_str), Some("quit"), "{commands:?}");
    assert_eq!(commands.iter().filter(|c| *c == "quit").count(), 1);
}

/// Deliver SIGTERM to this test process.
///
/// A tokio handler must already be registered, or the default action kills
/// the test binary.
#[cfg(unix)]
fn terminate_self() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(i32::try_from(std::process::id()).unwrap());
    kill(pid, Signal::SIGTERM).unwrap();
}

#[test]
fn test_all_supervisor_types_exported() {
    let machine = PressStateMachine::new();
    assert_eq!(machine.state(), WorkerState::Init);
    let _: fn() -> SupervisorError = || SupervisorError::Spawn(SpawnError::MissingPipe("stdin"));
    assert_eq!(Outcome::Succeeded.exit_code(), 0);
}

#[tokio::test]
async fn test_press_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");
    let (seen, sink) = recorder();

    let config = scripted_worker(&["ok run 0%", "ok run 50%", "ok done 100%"]);
    let mut supervisor = Supervisor::new(config).with_progress_sink(sink);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.progress, 100);
    assert!(report.exit_status.unwrap().success());
    assert_eq!(report.artifact, dir.path().join("pfam.dcp"));
    assert_eq!(*seen.lock().unwrap(), vec![0, 50, 100]);
    assert_eq!(supervisor.state(), WorkerState::Quit);
    assert_eq!(supervisor.outcome(), Some(Outcome::Succeeded));

    let commands = logged_commands(dir.path());
    assert_eq!(commands[0], "press pfam.hmm");
    assert!(commands[1..commands.len() - 1]
        .iter()
        .all(|c| c == QUERY_LINE));
    assert!(commands.len() >= 5);
    assert_single_trailing_quit(&commands);
}

#[tokio::test]
async fn test_first_done_only_confirms_start() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "small.hmm");
    let (seen, sink) = recorder();

    let config = scripted_worker(&["ok done 100%", "ok done 100%"]);
    let mut supervisor = Supervisor::new(config).with_progress_sink(sink);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(seen.lock().unwrap().last(), Some(&100));
    let queries = logged_commands(dir.path())
        .iter()
        .filter(|c| *c == QUERY_LINE)
        .count();
    assert!(queries >= 2);
}

#[tokio::test]
async fn test_progress_never_regresses() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");
    let (seen, sink) = recorder();

    let config = scripted_worker(&["ok run 80%", "ok run 40%", "ok run 90%", "ok done 100%"]);
    let mut supervisor = Supervisor::new(config).with_progress_sink(sink);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(*seen.lock().unwrap(), vec![80, 90, 100]);
}

#[tokio::test]
async fn test_worker_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "broken.hmm");
    let (seen, sink) = recorder();

    let config = scripted_worker(&["ok run 10%", "fail run 10%"]);
    let mut supervisor = Supervisor::new(config).with_progress_sink(sink);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.outcome.exit_code(), 3);
    assert_eq!(report.progress, 10);
    assert_eq!(*seen.lock().unwrap(), vec![10]);
    assert!(report.exit_status.is_some());
    assert_single_trailing_quit(&logged_commands(dir.path()));
}

#[tokio::test]
async fn test_garbage_status_line_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let mut supervisor = Supervisor::new(scripted_worker(&["garbage"]));
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Failed);
    assert_single_trailing_quit(&logged_commands(dir.path()));
}

#[tokio::test]
async fn test_unknown_ok_stage_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let mut supervisor = Supervisor::new(scripted_worker(&["ok fail 3%"]));
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Failed);
}

#[tokio::test]
async fn test_premature_exit_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let config = fake_worker(r#"IFS= read -r line; echo "$line" >> commands.log; exit 0"#);
    let mut supervisor = Supervisor::new(config);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Failed);
    assert!(report.exit_status.unwrap().success());
    assert_eq!(logged_commands(dir.path()), vec!["press pfam.hmm"]);
}

#[tokio::test]
async fn test_external_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let config = scripted_worker(&["ok run 5%"]);
    let mut supervisor = Supervisor::new(config).with_cancellation(cancel);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Cancelled);
    assert_eq!(report.outcome.exit_code(), 2);
    assert_eq!(report.progress, 5);
    assert!(report.exit_status.unwrap().success());
    assert_eq!(supervisor.state(), WorkerState::Quit);
    assert_single_trailing_quit(&logged_commands(dir.path()));
}

#[tokio::test]
async fn test_cancelled_before_start_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (seen, sink) = recorder();

    let mut supervisor = Supervisor::new(scripted_worker(&[]))
        .with_progress_sink(sink)
        .with_cancellation(cancel);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Cancelled);
    assert!(seen.lock().unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_ignoring_quit_is_terminated() {
    use std::os::unix::process::ExitStatusExt;

    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let script = format!("{}\nexec sleep 30", scripted_script(&["fail run 0%"], "break"));
    let mut supervisor = Supervisor::new(fake_worker(&script));

    let started = Instant::now();
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Failed);
    let status = report.exit_status.unwrap();
    assert!(!status.success());
    assert!(status.signal().is_some());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_stderr_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let mut config = fake_worker(&format!(
        "echo starting >&2\n{}",
        scripted_script(&["ok run 1%", "ok done 100%"], "exit 0")
    ));
    config.include_stderr = false;
    let mut supervisor = Supervisor::new(config);
    let report = supervisor.run(&input).await.unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
}

#[tokio::test]
async fn test_missing_worker_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let mut config = fake_worker("");
    config.executable_path = dir.path().join("no-such-pressy");
    let mut supervisor = Supervisor::new(config);
    let err = supervisor.run(&input).await.unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn(SpawnError::NotFound(_))));
    assert!(logged_commands(dir.path()).is_empty());
}

#[tokio::test]
async fn test_supervisor_reusable_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let first = input_file(dir.path(), "a.hmm");
    let second = input_file(dir.path(), "b.hmm");

    let mut supervisor = Supervisor::new(scripted_worker(&["ok run 50%", "ok done 100%"]));
    assert_eq!(
        supervisor.run(&first).await.unwrap().outcome,
        Outcome::Succeeded
    );
    assert_eq!(
        supervisor.run(&second).await.unwrap().outcome,
        Outcome::Succeeded
    );

    let presses: Vec<String> = logged_commands(dir.path())
        .into_iter()
        .filter(|c| c.starts_with("press"))
        .collect();
    assert_eq!(presses, vec!["press a.hmm", "press b.hmm"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_cancels_press() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path(), "pfam.hmm");

    let config = SupervisorConfig {
        handle_signals: true,
        ..scripted_worker(&["ok run 5%"])
    };
    let mut signalled = false;
    let sink = move |_percent: u8| {
        if !signalled {
            signalled = true;
            terminate_self();
        }
    };
    let mut supervisor = Supervisor::new(config).with_progress_sink(sink);

    let report = tokio::time::timeout(Duration::from_secs(10), supervisor.run(&input))
        .await
        .expect("SIGTERM should end the press")
        .unwrap();

    assert_eq!(report.outcome, Outcome::Cancelled);
    assert!(report.exit_status.is_some());
    assert_eq!(supervisor.state(), WorkerState::Quit);
    assert_single_trailing_quit(&logged_commands(dir.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_between_jobs_cancels_token() {
    let token = CancellationToken::new();
    let watcher = cancel_on_signal(token.clone());

    terminate_self();

    tokio::time::timeout(Duration::from_secs(5), token.cancelled())
        .await
        .expect("SIGTERM should cancel the token");
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_signal_task_ends_when_token_cancelled_elsewhere() {
    let token = CancellationToken::new();
    let watcher = cancel_on_signal(token.clone());
    token.cancel();

    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("task should end with the token")
        .unwrap();
}
