//! The Go execution helper. Runs as its own process: the Go toolchain needs
//! a build sandbox with writable caches (and the build-phase trust
//! boundary), while the produced binary runs in a second root without the
//! sensitive mount. One JSON verdict goes to stdout.

use crate::judge::{evaluate_tests, run_compile, EvalParams, ExecEnv};
use crate::limits;

use arbiter_protocol::{Mode, RunResponse, TestCase, Verdict};
use arbiter_sandbox::capture::{clip_for_log, reset_dir};
use arbiter_sandbox::runroot::copy_file;
use arbiter_sandbox::{run_on_host, RLimits, RunRoot, RunRootOptions};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

const COMPILE_TIMEOUT: Duration = Duration::from_secs(2);
const COMPILE_LOG_CLIP: usize = 4096;
const DEFAULT_EXEC_LIMIT_MS: u64 = 1000;
const DEFAULT_GLOBAL_TIMEOUT_MS: u64 = 30_000;

/// The test manifest handed to the helper on disk.
#[derive(Debug, Serialize, Deserialize)]
pub struct HelperPayload {
    #[serde(default)]
    pub mode: String,
    pub tests: Vec<TestCase>,
}

/// Everything the helper needs for one compile-and-judge cycle.
#[derive(Debug)]
pub struct HelperRequest {
    pub code: String,
    pub mode: String,
    pub global_timeout_ms: u64,
    pub output_limit: usize,
    pub sandbox_env: String,
    pub tests: Vec<TestCase>,
}

/// Compiles the code and judges it against the tests. Never panics out: any
/// internal failure collapses to an `Internal Error` verdict.
pub async fn execute(req: HelperRequest) -> RunResponse {
    let mode = Mode::from_label(&req.mode);
    let resp = match run(&req, mode).await {
        Ok(resp) => resp,
        Err(err) => {
            error!(%err, "go helper failed");
            RunResponse::verdict(Verdict::InternalError)
        }
    };
    if mode.reveals_expected() {
        resp
    } else {
        redact(resp)
    }
}

async fn run(req: &HelperRequest, mode: Mode) -> Result<RunResponse> {
    // Sanity probe: without a working /dev/null nothing below can run.
    fs::File::open("/dev/null").context("/dev/null unavailable")?;

    if req.tests.is_empty() {
        return Ok(RunResponse::verdict(Verdict::UnknownChallenge));
    }

    let env_dir = req.sandbox_env.trim();
    if !env_dir.is_empty() {
        std::env::set_var("SANDBOX_ENVS_DIR", env_dir);
    }

    let global_timeout_ms = if req.global_timeout_ms > 0 {
        req.global_timeout_ms
    } else {
        crate::config::env_u64("RUNNER_GLOBAL_TIMEOUT_MS", DEFAULT_GLOBAL_TIMEOUT_MS)
    };
    let output_limit = if req.output_limit > 0 {
        req.output_limit
    } else {
        limits::output_limit()
    };
    let global_deadline = Instant::now() + Duration::from_millis(global_timeout_ms);

    // Build phase: the toolchain caches live under the run-root's own
    // writable temp.
    let build_rr = RunRoot::prepare_with_options(
        "go",
        RunRootOptions {
            for_go_builder: true,
            ..RunRootOptions::default()
        },
    )
    .await
    .context("failed to prepare Go build sandbox")?;

    reset_dir(&build_rr.workspace_host().join(".runner"), 0o755)
        .context("failed to prepare build capture dir")?;
    fs::write(build_rr.workspace_host().join("code.go"), &req.code)
        .context("failed to write Go source")?;

    for cache in ["go-build-cache", "go-mod-cache"] {
        let dir = build_rr.tmp_host().join(cache);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to prepare go cache dir: {}", dir.display()))?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o777))?;
    }

    let ws = build_rr.workspace_dir();
    let compile_argv = vec![
        "env".to_owned(),
        "GOCACHE=/tmp/go-build-cache".to_owned(),
        "GOMODCACHE=/tmp/go-mod-cache".to_owned(),
        "/usr/bin/go".to_owned(),
        "build".to_owned(),
        "-o".to_owned(),
        format!("{ws}/code"),
        format!("{ws}/code.go"),
    ];
    let build_env = ExecEnv {
        rr: &build_rr,
        workdir: ws,
        shell_path: "/bin/sh",
        use_chroot_runner: true,
    };
    let budget = global_deadline
        .saturating_duration_since(Instant::now())
        .min(COMPILE_TIMEOUT);
    let outcome = run_compile(
        &build_env,
        &compile_argv,
        &limits::compile_limits(output_limit),
        output_limit,
        budget,
    )
    .await?;
    if !outcome.ok {
        if outcome.timed_out {
            warn!(timeout = ?COMPILE_TIMEOUT, "go compile deadline exceeded");
        }
        error!(
            diagnostics = %clip_for_log(&outcome.diagnostics, COMPILE_LOG_CLIP),
            "go compile failed"
        );
        let resp = RunResponse {
            output: outcome.diagnostics,
            ..RunResponse::verdict(Verdict::CompileError)
        };
        return Ok(resp);
    }

    let built = build_rr.workspace_host().join("code");
    anyhow::ensure!(built.is_file(), "compiled binary missing");

    // Run phase: a fresh root without the sensitive mount.
    let run_rr = RunRoot::prepare_with_options(
        "go",
        RunRootOptions {
            for_c_builder: true,
            ..RunRootOptions::default()
        },
    )
    .await
    .context("failed to prepare Go run sandbox")?;

    let binary = run_rr.workspace_host().join("code");
    copy_file(&built, &binary, 0o755).context("failed to copy Go binary into run sandbox")?;
    run_on_host(
        "",
        &[
            "/usr/sbin/setcap".to_owned(),
            "cap_sys_chroot+ep".to_owned(),
            binary.display().to_string(),
        ],
        "",
        &RLimits {
            output_limit: 4096,
            ..RLimits::default()
        },
    )
    .await
    .context("failed to apply capability to Go binary")?;
    reset_dir(&run_rr.workspace_host().join(".runner"), 0o755)
        .context("failed to prepare run capture dir")?;

    let run_lim = limits::run_limits(
        DEFAULT_EXEC_LIMIT_MS,
        global_timeout_ms,
        output_limit,
        1024,
    );
    let argv = vec![run_rr.inside_path(&binary)];
    let run_env = ExecEnv {
        rr: &run_rr,
        workdir: run_rr.workspace_dir(),
        shell_path: "/env/bin/sh",
        use_chroot_runner: false,
    };
    let params = EvalParams {
        mode,
        exec_limit_ms: DEFAULT_EXEC_LIMIT_MS,
        global_deadline,
        output_limit,
    };
    let resp = evaluate_tests(&run_env, &argv, &run_lim, &req.tests, &params).await?;
    Ok(resp.normalize_failed_index())
}

fn redact(mut resp: RunResponse) -> RunResponse {
    resp.output.clear();
    resp.expected.clear();
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_mode_defaults_to_judge() {
        let payload: HelperPayload =
            serde_json::from_str(r#"{"tests":[{"input":"","output":"hi"}]}"#).unwrap();
        assert!(payload.mode.is_empty());
        assert_eq!(Mode::from_label(&payload.mode), Mode::Judge);
        assert!(!payload.tests[0].is_sample);
    }

    #[test]
    fn redact_strips_outputs() {
        let resp = RunResponse {
            output: "secret".to_owned(),
            expected: "secret".to_owned(),
            ..RunResponse::verdict(Verdict::WrongAnswer)
        };
        let resp = redact(resp);
        assert!(resp.output.is_empty());
        assert!(resp.expected.is_empty());
    }
}
