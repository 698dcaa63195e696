use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use log::warn;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::select;
use tokio::sync::{mpsc, Notify};

/// Output of a supervised child, delivered line by line plus a terminal
/// exit notification.
#[derive(Debug)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Always the last event for a process; carries the exit code when the
    /// OS reports one.
    Exited(Option<i32>),
}

/// Handle to a running child. The `Child` itself is owned by the pump task;
/// the handle only carries what callers need: the pid, the input channel
/// and a way to request a forced kill.
pub struct ProcessHandle {
    pid: u32,
    stdin: tokio::sync::Mutex<tokio::process::ChildStdin>,
    kill_notify: Arc<Notify>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Writes one line to the child's stdin. Fire-and-forget from the
    /// caller's perspective; there is no acknowledgement protocol.
    pub async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Requests a SIGKILL from the pump task. The exit event still flows
    /// through the normal channel.
    pub fn kill(&self) {
        self.kill_notify.notify_one();
    }
}

/// Spawns `program args…` in `working_dir` with piped stdio and a pump task
/// that forwards output lines and the exit status over `event_tx`.
///
/// The pump owns the `Child`: it `select!`s over stdout lines, stderr lines,
/// `wait()` and the kill notify. Stream arms are disarmed once they reach
/// EOF so a closed pipe cannot starve the exit arm.
pub fn spawn_pump(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
) -> std::io::Result<ProcessHandle> {
    let mut process = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let pid = process.id().unwrap_or(0);
    let stdin = process.stdin.take().expect("child stdin is piped");
    let stdout = process.stdout.take().expect("child stdout is piped");
    let stderr = process.stderr.take().expect("child stderr is piped");

    let kill_notify = Arc::new(Notify::new());

    tokio::spawn({
        let kill_notify = kill_notify.clone();
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        async move {
            let mut stdout_open = true;
            let mut stderr_open = true;
            loop {
                select! {
                    line = stdout.next_line(), if stdout_open => {
                        match line {
                            Ok(Some(line)) => {
                                let _ = event_tx.send(ProcessEvent::Stdout(line));
                            }
                            _ => stdout_open = false,
                        }
                    }
                    line = stderr.next_line(), if stderr_open => {
                        match line {
                            Ok(Some(line)) => {
                                let _ = event_tx.send(ProcessEvent::Stderr(line));
                            }
                            _ => stderr_open = false,
                        }
                    }
                    status = process.wait() => {
                        let code = status.ok().and_then(|s| s.code());
                        let _ = event_tx.send(ProcessEvent::Exited(code));
                        break;
                    }
                    _ = kill_notify.notified() => {
                        if let Err(err) = process.kill().await {
                            warn!("could not kill process (pid={}): {}", pid, err);
                        }
                        let code = process.wait().await.ok().and_then(|s| s.code());
                        let _ = event_tx.send(ProcessEvent::Exited(code));
                        break;
                    }
                }
            }
        }
    });

    Ok(ProcessHandle {
        pid,
        stdin: tokio::sync::Mutex::new(stdin),
        kill_notify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: mpsc::UnboundedReceiver<ProcessEvent>) -> (Vec<String>, Option<i32>) {
        let mut lines = Vec::new();
        let mut code = None;
        while let Some(event) = rx.recv().await {
            match event {
                ProcessEvent::Stdout(line) => lines.push(line),
                ProcessEvent::Stderr(line) => lines.push(format!("[STDERR] {}", line)),
                ProcessEvent::Exited(c) => {
                    code = c;
                    break;
                }
            }
        }
        (lines, code)
    }

    #[tokio::test]
    async fn lines_then_exit_event() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let _handle = spawn_pump(
            "sh",
            &["-c", "echo one; echo two >&2; echo three; exit 3"],
            dir.path(),
            tx,
        )
        .unwrap();

        let (lines, code) = drain(rx).await;
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"three".to_string()));
        assert!(lines.contains(&"[STDERR] two".to_string()));
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn stdin_reaches_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_pump("sh", &["-c", "read line; echo \"got:$line\""], dir.path(), tx)
            .unwrap();

        handle.write_line("ping").await.unwrap();
        let (lines, code) = drain(rx).await;
        assert!(lines.contains(&"got:ping".to_string()));
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn kill_terminates_without_a_code() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_pump("sh", &["-c", "sleep 600"], dir.path(), tx).unwrap();

        handle.kill();
        let (_, code) = drain(rx).await;
        // killed by signal, so no exit code on unix
        assert_eq!(code, None);
    }
}
