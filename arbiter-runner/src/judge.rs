//! The verdict loop: drives one prepared sandbox through a list of test
//! cases under per-test and global deadlines, comparing trimmed stdout
//! against trimmed expected output.

use std::time::{Duration, Instant};

use anyhow::Result;
use arbiter_protocol::{Mode, RunResponse, TestCase, Verdict};
use arbiter_sandbox::capture::{
    build_capture_command, capture_paths, combine_output, read_file_limited, remove_files,
};
use arbiter_sandbox::{run_in_chroot, RLimits, RunRoot, RunStatus};
use tracing::warn;

/// One prepared sandbox plus the invocation mode it expects.
pub struct ExecEnv<'a> {
    pub rr: &'a RunRoot,
    /// Working directory as seen by the jailed process.
    pub workdir: &'a str,
    /// Shell used for the capture wrapper (`/bin/sh` under the chroot
    /// runner, the `/env` projection without it).
    pub shell_path: &'a str,
    pub use_chroot_runner: bool,
}

pub struct EvalParams {
    pub mode: Mode,
    pub exec_limit_ms: u64,
    pub global_deadline: Instant,
    pub output_limit: usize,
}

/// Runs `argv` against every test in order, returning the first failure.
/// The response carries full output/expected values; callers redact
/// according to mode before anything leaves the process.
pub async fn evaluate_tests(
    env: &ExecEnv<'_>,
    argv: &[String],
    run_lim: &RLimits,
    tests: &[TestCase],
    params: &EvalParams,
) -> Result<RunResponse> {
    let mut total_ms: u64 = 0;
    let mut last_stdout = String::new();

    for (i, tc) in tests.iter().enumerate() {
        let now = Instant::now();
        if now >= params.global_deadline {
            return Ok(failure(
                Verdict::TimeLimitExceeded,
                String::new(),
                tc.output.clone(),
                total_ms,
                i,
            ));
        }
        let budget = params.global_deadline - now;
        let deadline = budget.min(Duration::from_millis(params.exec_limit_ms));

        let paths = capture_paths(
            env.rr.workspace_host(),
            env.workdir,
            &format!("test-{i}"),
        );
        remove_files([paths.stdout_host.as_path(), paths.stderr_host.as_path()]);
        let run_cmd = build_capture_command(argv, &paths.stdout_inside, &paths.stderr_inside);
        let shell_argv = vec![
            env.shell_path.to_owned(),
            "-c".to_owned(),
            run_cmd,
        ];

        let started = Instant::now();
        let result = run_in_chroot(
            env.rr,
            env.workdir,
            &shell_argv,
            &tc.input,
            run_lim,
            env.use_chroot_runner,
            Some(deadline),
        )
        .await?;
        total_ms += started.elapsed().as_millis() as u64;

        let run_stdout = read_file_limited(&paths.stdout_host, params.output_limit)?;
        let run_stderr = read_file_limited(&paths.stderr_host, params.output_limit)?;
        remove_files([paths.stdout_host.as_path(), paths.stderr_host.as_path()]);

        let trimmed = run_stdout.trim().to_owned();
        let mut combined = combine_output(&run_stdout, &run_stderr);
        if combined.is_empty() {
            combined = combine_output(&result.stdout, &result.stderr);
        }

        match result.status {
            RunStatus::TimedOut => {
                return Ok(failure(
                    Verdict::TimeLimitExceeded,
                    combined,
                    tc.output.clone(),
                    total_ms,
                    i,
                ));
            }
            RunStatus::Exited(0) => {}
            RunStatus::Exited(_) | RunStatus::Signaled(_) => {
                warn!(status = ?result.status, output = %combined, "runtime error");
                return Ok(failure(
                    Verdict::RuntimeError,
                    combined,
                    tc.output.clone(),
                    total_ms,
                    i,
                ));
            }
        }

        let mismatch = if params.mode == Mode::Single {
            // Ad-hoc runs only compare when the caller supplied a `want`.
            !tc.output.trim().is_empty() && !outputs_match(&trimmed, &tc.output)
        } else {
            !outputs_match(&trimmed, &tc.output)
        };
        if mismatch {
            return Ok(failure(
                Verdict::WrongAnswer,
                trimmed,
                tc.output.clone(),
                total_ms,
                i,
            ));
        }

        last_stdout = trimmed;
        if let Err(err) = env.rr.reset_tmp() {
            warn!(%err, "failed to reset sandbox tmp");
        }
    }

    let mut resp = RunResponse::verdict(Verdict::Success);
    resp.duration_ms = total_ms;
    if params.mode.reveals_expected() {
        resp.output = last_stdout;
    }
    Ok(resp)
}

fn failure(
    result: Verdict,
    output: String,
    expected: String,
    duration_ms: u64,
    index: usize,
) -> RunResponse {
    RunResponse {
        result,
        output,
        duration_ms,
        failed_index: index as i32,
        expected,
    }
}

pub struct CompileOutcome {
    pub ok: bool,
    pub timed_out: bool,
    pub diagnostics: String,
}

/// Runs a compile command under the capture wrapper and folds the
/// diagnostics: capture files first, the executor's own buffers as a
/// fallback.
pub async fn run_compile(
    env: &ExecEnv<'_>,
    compile_argv: &[String],
    lim: &RLimits,
    output_limit: usize,
    deadline: Duration,
) -> Result<CompileOutcome> {
    let paths = capture_paths(env.rr.workspace_host(), env.workdir, "compile");
    remove_files([paths.stdout_host.as_path(), paths.stderr_host.as_path()]);
    let compile_cmd = build_capture_command(compile_argv, &paths.stdout_inside, &paths.stderr_inside);
    let shell_argv = vec![
        env.shell_path.to_owned(),
        "-c".to_owned(),
        compile_cmd,
    ];

    let result = run_in_chroot(
        env.rr,
        env.workdir,
        &shell_argv,
        "",
        lim,
        env.use_chroot_runner,
        Some(deadline),
    )
    .await?;

    let stdout = read_file_limited(&paths.stdout_host, output_limit)?;
    let stderr = read_file_limited(&paths.stderr_host, output_limit)?;
    remove_files([paths.stdout_host.as_path(), paths.stderr_host.as_path()]);

    let mut diagnostics = combine_output(&stdout, &stderr);
    if diagnostics.is_empty() {
        diagnostics = combine_output(&result.stdout, &result.stderr);
    }

    Ok(CompileOutcome {
        ok: result.status.success(),
        timed_out: result.status == RunStatus::TimedOut,
        diagnostics,
    })
}

/// Comparison used by the loop, exposed for tests: leading and trailing
/// whitespace is insignificant, interior whitespace is significant.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

#[cfg(test)]
mod tests {
    use super::outputs_match;

    #[test]
    fn trims_both_ends_only() {
        assert!(outputs_match("hi\n", "hi"));
        assert!(outputs_match("  1 2\n", "1 2"));
        assert!(!outputs_match("1  2", "1 2"));
        assert!(!outputs_match("a\nb", "a b"));
        assert!(outputs_match("\n\n", ""));
    }
}
