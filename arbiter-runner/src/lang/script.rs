//! Interpreted languages: a single run-root, the source written into the
//! workspace, the interpreter as argv[0].

use super::{map_tool_path, shell_path};
use crate::app::App;
use crate::judge::{evaluate_tests, EvalParams, ExecEnv};
use crate::limits;

use arbiter_protocol::{Language, Mode, RunRequest, RunResponse, SandboxVariant, TestCase};
use arbiter_sandbox::capture::reset_dir;
use arbiter_sandbox::RunRoot;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

pub async fn execute(
    req: &RunRequest,
    language: Language,
    mode: Mode,
    variant: SandboxVariant,
    tests: &[TestCase],
) -> Result<RunResponse> {
    let interpreter = match language {
        Language::Python => "/usr/bin/python3",
        Language::Ruby => "/usr/bin/ruby",
        _ => anyhow::bail!("not an interpreted language: {language}"),
    };

    let config = &App::get().config;
    let use_chroot_runner = variant.uses_chroot_runner();

    let rr = RunRoot::prepare(language.as_str()).await?;

    let src = rr.workspace_host().join(language.source_name());
    fs::write(&src, &req.code).context("failed to write source")?;
    fs::set_permissions(&src, fs::Permissions::from_mode(0o644))?;
    reset_dir(&rr.workspace_host().join(".runner"), 0o755)
        .context("failed to prepare capture dir")?;

    let output_limit = limits::output_limit();
    let run_lim = limits::run_limits(
        config.exec_limit_ms,
        config.global_timeout_ms,
        output_limit,
        256,
    );
    let argv = vec![
        map_tool_path(interpreter, use_chroot_runner),
        rr.inside_path(&src),
    ];

    let env = ExecEnv {
        rr: &rr,
        workdir: rr.workspace_dir(),
        shell_path: shell_path(use_chroot_runner),
        use_chroot_runner,
    };
    let params = EvalParams {
        mode,
        exec_limit_ms: config.exec_limit_ms,
        global_deadline: Instant::now() + Duration::from_millis(config.global_timeout_ms),
        output_limit,
    };
    let resp = evaluate_tests(&env, &argv, &run_lim, tests, &params).await?;
    Ok(resp.normalize_failed_index().sanitize(req))
}
