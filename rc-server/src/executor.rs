//! Runs one shell command in a constrained subprocess and captures its
//! output, exit code, and (on POSIX) terminating signal.

use std::process::Stdio;
use std::time::Duration;

use rc_core::{Message, Response};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

#[cfg(unix)]
const SHELL_PREFIX: [&str; 2] = ["sh", "-c"];
#[cfg(windows)]
const SHELL_PREFIX: [&str; 2] = ["cmd", "/C"];

/// Build and run the subprocess described by `msg`, producing a [`Response`]
/// with the message's `id` already stamped in.
///
/// Never returns an `Err` — spawn failures and timeouts are represented as
/// `exitCode = -1` responses, matching the wire contract: every queued
/// message gets exactly one response.
pub async fn run(msg: &Message) -> Response {
    let mut command = TokioCommand::new(SHELL_PREFIX[0]);
    command
        .arg(SHELL_PREFIX[1])
        .arg(&msg.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if !msg.options.cwd.is_empty() {
        command.current_dir(&msg.options.cwd);
    }
    for (key, value) in &msg.options.env {
        command.env(key, value);
    }

    #[cfg(unix)]
    {
        command.process_group(0);
    }

    let response = if msg.options.timeout > 0 {
        run_with_timeout(command, Duration::from_millis(msg.options.timeout)).await
    } else {
        run_to_completion(command).await
    };

    response.with_id(msg.id)
}

async fn run_to_completion(mut command: TokioCommand) -> Response {
    match command.output().await {
        Ok(output) => Response {
            id: String::new(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            signal: terminating_signal(&output.status),
        },
        Err(e) => spawn_failure(e),
    }
}

async fn run_with_timeout(mut command: TokioCommand, duration: Duration) -> Response {
    command.kill_on_drop(true);
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return spawn_failure(e),
    };

    let mut stdout_pipe = child.stdout.take().expect("stdout piped at spawn");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped at spawn");
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let run = async {
        let (_, _, status) = tokio::join!(
            stdout_pipe.read_to_end(&mut stdout_buf),
            stderr_pipe.read_to_end(&mut stderr_buf),
            child.wait(),
        );
        status
    };

    match timeout(duration, run).await {
        Ok(Ok(status)) => Response {
            id: String::new(),
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code: status.code().unwrap_or(-1),
            signal: terminating_signal(&status),
        },
        Ok(Err(e)) => spawn_failure(e),
        Err(_elapsed) => {
            kill_process_group(&child);
            Response {
                id: String::new(),
                stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                exit_code: -1,
                signal: None,
            }
        }
    }
}

/// Send `SIGKILL` to the child's process group so expiry takes the whole
/// tree down, not just the direct child (which may itself be `sh`).
#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(windows)]
fn kill_process_group(_child: &tokio::process::Child) {}

fn spawn_failure(e: std::io::Error) -> Response {
    Response {
        id: String::new(),
        stdout: String::new(),
        stderr: e.to_string(),
        exit_code: -1,
        signal: None,
    }
}

#[cfg(unix)]
fn terminating_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| {
        nix::sys::signal::Signal::try_from(sig)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| sig.to_string())
    })
}

#[cfg(windows)]
fn terminating_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::MessageOptions;
    use std::collections::BTreeMap;

    fn msg(id: u32, command: &str, options: MessageOptions) -> Message {
        Message::new(id, command, options)
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let resp = run(&msg(
            1,
            "echo 'hello'; echo \"world\"",
            MessageOptions::default(),
        ))
        .await;
        assert_eq!(resp.stdout, "hello\nworld\n");
        assert_eq!(resp.stderr, "");
        assert_eq!(resp.exit_code, 0);
        assert_eq!(resp.id, "1");
    }

    #[tokio::test]
    async fn honors_environment() {
        let mut env = BTreeMap::new();
        env.insert("WORLD".to_string(), "mars".to_string());
        let resp = run(&msg(
            2,
            "echo 'hello'; echo $WORLD",
            MessageOptions {
                timeout: 0,
                cwd: String::new(),
                env,
            },
        ))
        .await;
        assert_eq!(resp.stdout, "hello\nmars\n");
    }

    #[tokio::test]
    async fn timeout_kills_and_returns_negative_one() {
        let resp = run(&msg(
            3,
            "echo partial; sleep 1; echo hello",
            MessageOptions {
                timeout: 100,
                cwd: String::new(),
                env: BTreeMap::new(),
            },
        ))
        .await;
        assert_eq!(resp.exit_code, -1);
        assert_eq!(resp.stdout, "partial\n");
    }

    #[tokio::test]
    async fn timeout_terminates_the_child_process() {
        let marker = std::env::temp_dir().join(format!("rc-executor-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);

        let resp = run(&msg(
            6,
            format!("sleep 0.1; sleep 2; touch {}", marker.to_string_lossy()).as_str(),
            MessageOptions {
                timeout: 150,
                cwd: String::new(),
                env: BTreeMap::new(),
            },
        ))
        .await;
        assert_eq!(resp.exit_code, -1);

        // If the process (or its child shell) survived the kill, it would
        // still create the marker file well within this window.
        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(
            !marker.exists(),
            "killed process kept running past the timeout"
        );
    }

    #[tokio::test]
    async fn honors_working_directory() {
        let resp = run(&msg(
            4,
            "pwd",
            MessageOptions {
                timeout: 0,
                cwd: "/tmp".to_string(),
                env: BTreeMap::new(),
            },
        ))
        .await;
        let expected = std::fs::canonicalize("/tmp").unwrap();
        assert_eq!(resp.stdout.trim_end(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn missing_binary_reports_nonzero_exit() {
        let resp = run(&msg(5, "foo hello world", MessageOptions::default())).await;
        assert_ne!(resp.exit_code, 0);
    }
}
