//! C is the security-critical path: the compiler runs in a build root where
//! the sensitive file is visible, the produced binary then runs in a second
//! root that never mounts it.

use super::{map_tool_path, shell_path};
use crate::app::App;
use crate::judge::{evaluate_tests, run_compile, EvalParams, ExecEnv};
use crate::limits;

use arbiter_protocol::{Mode, RunRequest, RunResponse, TestCase, Verdict};
use arbiter_sandbox::capture::reset_dir;
use arbiter_sandbox::runroot::copy_file;
use arbiter_sandbox::{run_on_host, RunRoot, RunRootOptions};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

/// In-chroot workspace view during the build phase (no chroot runner, so the
/// template projection prefixes the path).
const BUILD_WORKSPACE: &str = "/env/workspace";

pub async fn execute_two_stage(
    req: &RunRequest,
    mode: Mode,
    tests: &[TestCase],
) -> Result<RunResponse> {
    let config = &App::get().config;
    let output_limit = limits::output_limit();
    let global_deadline = Instant::now() + Duration::from_millis(config.global_timeout_ms);

    // Build phase: the compile sandbox carries the sensitive file at both
    // of its views.
    let build_rr = RunRoot::prepare_with_options(
        "c",
        RunRootOptions {
            flag_destinations: vec!["/flag2".to_owned(), "/env/flag2".to_owned()],
            ..RunRootOptions::default()
        },
    )
    .await
    .context("failed to prepare C build sandbox")?;

    fs::write(build_rr.workspace_host().join("code.c"), &req.code)
        .context("failed to write C source")?;
    reset_dir(&build_rr.workspace_host().join(".runner"), 0o755)
        .context("failed to prepare compile capture dir")?;

    let compile_lim = limits::compile_limits(output_limit);
    let compile_argv = vec![
        map_tool_path("/usr/bin/gcc", false),
        format!("{BUILD_WORKSPACE}/code.c"),
        "-O2".to_owned(),
        "-pipe".to_owned(),
        "-static".to_owned(),
        "-s".to_owned(),
        "-lm".to_owned(),
        "-o".to_owned(),
        format!("{BUILD_WORKSPACE}/code"),
    ];
    let build_env = ExecEnv {
        rr: &build_rr,
        workdir: BUILD_WORKSPACE,
        shell_path: shell_path(false),
        use_chroot_runner: false,
    };
    let budget = global_deadline.saturating_duration_since(Instant::now());
    let outcome = run_compile(&build_env, &compile_argv, &compile_lim, output_limit, budget).await?;
    if !outcome.ok {
        let resp = RunResponse {
            output: outcome.diagnostics,
            ..RunResponse::verdict(Verdict::CompileError)
        };
        return Ok(resp.sanitize(req));
    }

    let built = build_rr.workspace_host().join("code");
    fs::set_permissions(&built, fs::Permissions::from_mode(0o755))
        .context("compiled binary missing")?;

    // Run phase: a fresh root without the sensitive mount.
    let run_rr = RunRoot::prepare_with_options(
        "c",
        RunRootOptions {
            for_c_builder: true,
            ..RunRootOptions::default()
        },
    )
    .await
    .context("failed to prepare C run sandbox")?;

    reset_dir(&run_rr.workspace_host().join(".runner"), 0o755)
        .context("failed to prepare run capture dir")?;
    let binary = run_rr.workspace_host().join("code");
    copy_file(&built, &binary, 0o755).context("failed to copy C binary into run sandbox")?;
    run_on_host(
        "",
        &[
            "/usr/sbin/setcap".to_owned(),
            "cap_sys_chroot+ep".to_owned(),
            binary.display().to_string(),
        ],
        "",
        &compile_lim,
    )
    .await
    .context("failed to apply capability to C binary")?;

    let run_lim = limits::run_limits(
        config.exec_limit_ms,
        config.global_timeout_ms,
        output_limit,
        256,
    );
    let argv = vec![run_rr.inside_path(&binary)];
    let run_env = ExecEnv {
        rr: &run_rr,
        workdir: run_rr.workspace_dir(),
        shell_path: shell_path(false),
        use_chroot_runner: false,
    };
    let params = EvalParams {
        mode,
        exec_limit_ms: config.exec_limit_ms,
        global_deadline,
        output_limit,
    };
    let resp = evaluate_tests(&run_env, &argv, &run_lim, tests, &params).await?;
    Ok(resp.normalize_failed_index().sanitize(req))
}
