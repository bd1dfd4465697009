//! Running plan commands on the local guest with a wall-clock budget.
//!
//! Stdout and stderr of the child go straight into one log file, so nothing is
//! buffered in memory and a backgrounded grandchild holding the stream open
//! cannot stall the caller. The log is capped after the child exits.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How a logged command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal it did not arm itself.
    Signaled,
    /// Killed after exceeding its budget.
    TimedOut,
}

impl Termination {
    pub fn success(self) -> bool {
        self == Termination::Exited(0)
    }
}

/// A finished command and the (possibly capped) log it left behind.
#[derive(Debug)]
pub struct LoggedRun {
    pub termination: Termination,
    pub log_path: PathBuf,
    /// Log contents after capping, lossily decoded.
    pub log: String,
    /// Bytes dropped from the end of the log.
    pub dropped_bytes: u64,
}

/// Run `cmd` with stdin closed and stdout/stderr appended to `log_path`.
///
/// A log larger than `log_limit` bytes is cut back to the limit and a notice
/// is appended.
pub fn run_logged(
    mut cmd: Command,
    timeout: Duration,
    log_path: &Path,
    log_limit: usize,
) -> Result<LoggedRun> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let log = File::create(log_path).with_context(|| format!("create {}", log_path.display()))?;
    let err_log = log.try_clone().context("share log handle")?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log));

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    let termination = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status
            .code()
            .map_or(Termination::Signaled, Termination::Exited),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            child.wait().context("reap killed command")?;
            Termination::TimedOut
        }
    };

    let dropped_bytes = cap_log(log_path, log_limit as u64, termination)?;
    let bytes = fs::read(log_path).with_context(|| format!("read {}", log_path.display()))?;
    debug!(?termination, log = %log_path.display(), dropped_bytes, "command finished");
    Ok(LoggedRun {
        termination,
        log_path: log_path.to_path_buf(),
        log: String::from_utf8_lossy(&bytes).into_owned(),
        dropped_bytes,
    })
}

fn cap_log(path: &Path, limit: u64, termination: Termination) -> Result<u64> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata().context("stat log")?.len();
    let dropped = len.saturating_sub(limit);
    if dropped > 0 {
        file.set_len(limit).context("truncate log")?;
        writeln!(file, "\n[log truncated, {dropped} bytes dropped]").context("annotate log")?;
    }
    if termination == Termination::TimedOut {
        writeln!(file, "\n[timed out]").context("annotate log")?;
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn both_streams_land_in_the_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/output.txt");
        let run = run_logged(
            sh("echo hello; echo oops >&2; exit 3"),
            Duration::from_secs(10),
            &path,
            1000,
        )
        .expect("run");
        assert_eq!(run.termination, Termination::Exited(3));
        assert_eq!(run.log, "hello\noops\n");
        assert_eq!(fs::read_to_string(&path).expect("log"), run.log);
    }

    #[test]
    fn oversized_log_is_capped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("output.txt");
        let run = run_logged(sh("printf 'abcdefghij'"), Duration::from_secs(10), &path, 4)
            .expect("run");
        assert!(run.termination.success());
        assert_eq!(run.dropped_bytes, 6);
        assert!(run.log.starts_with("abcd\n[log truncated, 6 bytes dropped]"));
    }

    #[test]
    fn slow_command_is_killed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("output.txt");
        let run = run_logged(
            sh("echo started; exec sleep 5"),
            Duration::from_millis(200),
            &path,
            100,
        )
        .expect("run");
        assert_eq!(run.termination, Termination::TimedOut);
        assert!(run.log.contains("[timed out]"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = run_logged(
            Command::new("/nonexistent/program"),
            Duration::from_secs(1),
            &temp.path().join("output.txt"),
            100,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn"));
    }
}
