use std::process::Stdio;

use log::{debug, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use fleet_protocol::MonitorSample;

/// Number of whitespace-separated fields in a valid `pidstat -h -r -u -d -s`
/// sample line; anything else is a header or a partial line.
const PIDSTAT_FIELDS: usize = 21;
/// Leading identifying columns (time, uid, pid, %usr offset) stripped from
/// each sample before it is forwarded.
const LEADING_COLUMNS: usize = 4;

/// Handle to a running `pidstat` subprocess.
pub struct MonitorHandle {
    pid: u32,
}

impl MonitorHandle {
    /// Stops the sampler with SIGTERM; it also dies on its own when the
    /// observed process exits.
    pub fn stop(&self) {
        if let Err(err) = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            debug!("pidstat (pid={}) already gone: {}", self.pid, err);
        }
    }
}

/// Extracts a sample from one line of pidstat output, or `None` for
/// comments, headers and malformed lines.
pub fn parse_sample(line: &str) -> Option<MonitorSample> {
    if line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != PIDSTAT_FIELDS {
        return None;
    }
    let trimmed = fields[LEADING_COLUMNS..PIDSTAT_FIELDS - 1]
        .iter()
        .map(|s| s.to_string())
        .collect();
    Some(MonitorSample(trimmed))
}

/// Launches `pidstat` against `target_pid`, sampling cpu, memory and disk
/// every 5 seconds, and forwards parsed samples over `sample_tx`. The
/// reader task ends when pidstat exits or its stdout closes.
pub fn spawn_monitor(
    target_pid: u32,
    sample_tx: mpsc::UnboundedSender<MonitorSample>,
) -> std::io::Result<MonitorHandle> {
    let mut process = Command::new("pidstat")
        .args([
            "-h",
            "-r",
            "-u",
            "-d",
            "-s",
            "5",
            "-p",
            &target_pid.to_string(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let pid = process.id().unwrap_or(0);
    let stdout = process.stdout.take().expect("pidstat stdout is piped");

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(sample) = parse_sample(&line) {
                if sample_tx.send(sample).is_err() {
                    break;
                }
            }
        }
        if let Err(err) = process.wait().await {
            warn!("pidstat (pid={}) wait failed: {}", pid, err);
        }
        debug!("pidstat (pid={}) finished", pid);
    });

    Ok(MonitorHandle { pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // 21 columns: time uid pid %usr %system %guest %wait %CPU CPU minflt/s
    // majflt/s VSZ RSS %MEM StkSize StkRef kB_rd/s kB_wr/s kB_ccwr/s iodelay
    // Command
    const SAMPLE: &str = "11:30:05 1000 12345 1.00 0.50 0.00 0.00 1.50 2 \
                          1.20 0.00 215340 98764 1.21 132 48 0.00 0.00 0.00 0 java";

    #[test]
    fn comments_and_headers_are_dropped() {
        assert_eq!(parse_sample("# Time UID PID %usr %system ..."), None);
        assert_eq!(parse_sample(""), None);
        assert_eq!(parse_sample("Linux 6.1.0 (host) 03/02/19 _x86_64_"), None);
    }

    #[test]
    fn wrong_field_count_is_dropped() {
        assert_eq!(parse_sample("11:30:05 1000 12345 1.00"), None);
    }

    #[test]
    fn sample_line_is_trimmed_to_sixteen_fields() {
        let sample = parse_sample(SAMPLE).unwrap();
        assert_eq!(sample.0.len(), 16);
        // leading time/uid/pid/%usr columns are gone
        assert_eq!(sample.0[0], "0.50");
        // trailing command column is gone
        assert!(!sample.0.contains(&"java".to_string()));
    }
}
