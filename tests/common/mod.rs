//! Scripted stand-ins for the pressy worker.

use std::path::Path;

use pressy_supervisor::config::SupervisorConfig;

/// File the fake workers append every received command to.
pub const COMMAND_LOG: &str = "commands.log";

/// Run `script` with `sh -c` in place of the real worker.
pub fn fake_worker(script: &str) -> SupervisorConfig {
    SupervisorConfig {
        worker_args: vec!["-c".to_string(), script.to_string()],
        poll_interval_ms: 10,
        shutdown_grace_ms: 300,
        handle_signals: false,
        ..SupervisorConfig::new("sh")
    }
}

/// A worker answering each `state` query with the next of `replies`, then
/// staying silent. Exits on `quit`.
pub fn scripted_worker(replies: &[&str]) -> SupervisorConfig {
    fake_worker(&scripted_script(replies, "exit 0"))
}

/// Script body for [`scripted_worker`] with a custom `quit` action.
pub fn scripted_script(replies: &[&str], on_quit: &str) -> String {
    let quoted: Vec<String> = replies.iter().map(|reply| format!("'{reply}'")).collect();
    format!(
        r#"set -- {replies}
while IFS= read -r line; do
  echo "$line" >> {log}
  case "$line" in
    state*) if [ $# -gt 0 ]; then echo "$1"; shift; fi ;;
    quit) {on_quit} ;;
  esac
done"#,
        replies = quoted.join(" "),
        log = COMMAND_LOG,
    )
}

/// Commands the fake worker logged in `dir`.
pub fn logged_commands(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(COMMAND_LOG))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Create an input file in `dir`.
pub fn input_file(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "HMMER3/f [3.1b2]\n//\n").unwrap();
    path
}
