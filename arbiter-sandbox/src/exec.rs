//! Child-process execution: the jailed path through nsjail (+ the chroot
//! helper) and the host-side prlimit path used to apply file capabilities.

use crate::nsjail;
use crate::runroot::RunRoot;
use crate::RLimits;

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error};

/// How one child ended. Spawn/wait failures are `Err` on the call itself and
/// surface as Internal Error upstream; everything here is attributable to
/// the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

impl RunStatus {
    pub fn success(self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    fn from_exit(status: ExitStatus) -> RunStatus {
        use std::os::unix::process::ExitStatusExt;
        match status.code() {
            Some(code) => RunStatus::Exited(code),
            None => RunStatus::Signaled(status.signal().unwrap_or(0)),
        }
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub status: RunStatus,
}

/// Executes `argv` inside the run-root under nsjail, optionally through the
/// chroot-entry helper. Stdout/stderr are captured up to the output cap; a
/// `deadline` elapsing kills the child and reports `TimedOut` with whatever
/// was captured so far.
pub async fn run_in_chroot(
    rr: &RunRoot,
    workdir: &str,
    argv: &[String],
    stdin: &str,
    rlim: &RLimits,
    use_chroot_runner: bool,
    deadline: Option<Duration>,
) -> Result<RunResult> {
    anyhow::ensure!(!argv.is_empty(), "no argv provided");

    let nsjail_bin = nsjail::nsjail_path();
    let config = nsjail::nsjail_config_path().context("failed to prepare nsjail config")?;
    let workdir = if workdir.trim().is_empty() {
        rr.work_dir()
    } else {
        workdir
    };

    let cmd = nsjail::build_command(
        &nsjail_bin,
        config,
        rr,
        workdir,
        argv,
        rlim,
        use_chroot_runner,
    );
    debug!(bin = %cmd.bin.display(), args = ?cmd.args, "spawning nsjail");

    let result = spawn_captured(cmd, stdin, rlim.output_limit, deadline).await?;
    if !result.status.success() {
        error!(status = ?result.status, stderr = %result.stderr, "nsjail/chroot-run failed");
    }
    Ok(result)
}

/// Executes `argv` on the host, wrapped in a prlimit invocation carrying the
/// rlimit vector. Only used to apply file capabilities to fresh binaries.
/// Returns captured stdout; a non-success child is an error carrying the
/// combined diagnostics.
pub async fn run_on_host(
    workdir: &str,
    argv: &[String],
    stdin: &str,
    rlim: &RLimits,
) -> Result<String> {
    anyhow::ensure!(!argv.is_empty(), "no argv provided");

    let mut cmd = arbiter_utils::os_cmd::OsCmd::new("/usr/bin/prlimit");
    if rlim.cpu_secs > 0 {
        cmd.arg(format!("--cpu={}", rlim.cpu_secs));
    }
    if rlim.as_bytes > 0 {
        cmd.arg(format!("--as={}", rlim.as_bytes));
    }
    if rlim.fsize_bytes > 0 {
        cmd.arg(format!("--fsize={}", rlim.fsize_bytes));
    }
    if rlim.nproc > 0 {
        cmd.arg(format!("--nproc={}", rlim.nproc));
    }
    if rlim.nofile > 0 {
        cmd.arg(format!("--nofile={}", rlim.nofile));
    }
    cmd.arg("--");
    cmd.args(argv.iter().cloned());
    cmd.add_env("PATH", "/usr/bin:/bin");
    cmd.add_env("HOME", "/tmp");
    cmd.add_env("TMPDIR", "/tmp");
    cmd.add_env("LANG", "C.UTF-8");

    let workdir = if workdir.is_empty() { "/" } else { workdir };
    let mut tokio_cmd = cmd.into_tokio_command();
    tokio_cmd.current_dir(workdir);

    let result = spawn_captured_cmd(tokio_cmd, stdin, rlim.output_limit, None).await?;
    match result.status {
        RunStatus::Exited(0) => Ok(result.stdout),
        status => {
            let diagnostics = crate::capture::combine_output(&result.stdout, &result.stderr);
            anyhow::bail!("host command failed: status = {status:?}, output = {diagnostics}")
        }
    }
}

async fn spawn_captured(
    cmd: arbiter_utils::os_cmd::OsCmd,
    stdin: &str,
    output_limit: usize,
    deadline: Option<Duration>,
) -> Result<RunResult> {
    spawn_captured_cmd(cmd.into_tokio_command(), stdin, output_limit, deadline).await
}

async fn spawn_captured_cmd(
    mut cmd: tokio::process::Command,
    stdin: &str,
    output_limit: usize,
    deadline: Option<Duration>,
) -> Result<RunResult> {
    cmd.stdin(if stdin.is_empty() {
        Stdio::null()
    } else {
        Stdio::piped()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn child process")?;

    if !stdin.is_empty() {
        let mut child_stdin = child.stdin.take().context("child stdin unavailable")?;
        let payload = stdin.as_bytes().to_vec();
        tokio::spawn(async move {
            let _ = child_stdin.write_all(&payload).await;
            let _ = child_stdin.shutdown().await;
        });
    }

    let stdout_buf = CappedBuffer::new(output_limit);
    let stderr_buf = CappedBuffer::new(output_limit);
    let stdout_task = drain(child.stdout.take(), stdout_buf.clone());
    let stderr_task = drain(child.stderr.take(), stderr_buf.clone());

    let status = match deadline {
        Some(limit) => match time::timeout(limit, child.wait()).await {
            Ok(status) => RunStatus::from_exit(status.context("failed to wait child process")?),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                RunStatus::TimedOut
            }
        },
        None => RunStatus::from_exit(child.wait().await.context("failed to wait child process")?),
    };

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    Ok(RunResult {
        stdout: stdout_buf.into_string(),
        stderr: stderr_buf.into_string().trim().to_owned(),
        status,
    })
}

fn drain<R>(stream: Option<R>, buf: CappedBuffer) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(mut stream) = stream {
            let mut chunk = [0u8; 8192];
            while let Ok(n) = stream.read(&mut chunk).await {
                if n == 0 {
                    break;
                }
                buf.write(&chunk[..n]);
            }
        }
    })
}

/// Byte-capped capture buffer. Stdout and stderr drainers run concurrently,
/// so writes go through a lock; bytes past the cap are discarded.
#[derive(Clone)]
pub struct CappedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
    max: usize,
}

impl CappedBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            max,
        }
    }

    pub fn write(&self, chunk: &[u8]) {
        let mut buf = self.inner.lock().unwrap();
        if self.max == 0 {
            buf.extend_from_slice(chunk);
            return;
        }
        let remain = self.max.saturating_sub(buf.len());
        if remain > 0 {
            let take = remain.min(chunk.len());
            buf.extend_from_slice(&chunk[..take]);
        }
    }

    pub fn into_string(self) -> String {
        let buf = self.inner.lock().unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_buffer_discards_excess() {
        let buf = CappedBuffer::new(5);
        buf.write(b"abc");
        buf.write(b"defgh");
        assert_eq!(buf.into_string(), "abcde");
    }

    #[test]
    fn uncapped_buffer_keeps_everything() {
        let buf = CappedBuffer::new(0);
        buf.write(b"abc");
        buf.write(b"def");
        assert_eq!(buf.into_string(), "abcdef");
    }

    #[test]
    fn capped_buffer_is_shared_between_clones() {
        let buf = CappedBuffer::new(16);
        let writer = buf.clone();
        writer.write(b"one");
        buf.write(b"+two");
        assert_eq!(buf.into_string(), "one+two");
    }

    #[tokio::test]
    async fn captures_child_output() {
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2");
        let result = spawn_captured_cmd(cmd, "", 1024, None).await.unwrap();
        assert_eq!(result.status, RunStatus::Exited(0));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err");
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg("exit 3");
        let result = spawn_captured_cmd(cmd, "", 1024, None).await.unwrap();
        assert_eq!(result.status, RunStatus::Exited(3));
        assert!(!result.status.success());
    }

    #[tokio::test]
    async fn forwards_stdin() {
        let cmd = tokio::process::Command::new("/bin/cat");
        let result = spawn_captured_cmd(cmd, "hello", 1024, None).await.unwrap();
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn deadline_kills_and_reports_timeout() {
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg("echo early; exec sleep 5");
        let started = std::time::Instant::now();
        let result = spawn_captured_cmd(cmd, "", 1024, Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.stdout, "early\n");
    }
}
