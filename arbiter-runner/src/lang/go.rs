//! Client side of the Go toolchain helper: the code and the test manifest
//! travel through a scratch directory, the verdict comes back as the last
//! JSON object on the helper's output.

use crate::app::App;
use crate::config::env_u64;
use crate::gohelper::HelperPayload;
use crate::limits;

use arbiter_protocol::{Mode, RunRequest, RunResponse, TestCase, Verdict};
use arbiter_sandbox::capture::clip_for_log;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::error;

const HELPER_TIMEOUT_GRACE_MS: u64 = 3000;
const HELPER_LOG_CLIP: usize = 4096;

pub async fn execute_via_helper(
    req: &RunRequest,
    mode: Mode,
    tests: &[TestCase],
) -> Result<RunResponse> {
    let config = &App::get().config;
    let global_timeout_ms = env_u64("RUNNER_GLOBAL_TIMEOUT_MS", 30_000);
    let output_limit = limits::output_limit();

    let job_dir = tempfile::Builder::new()
        .prefix("gohelper-")
        .tempdir()
        .context("failed to create helper job dir")?;

    let code_path = job_dir.path().join("code.go");
    fs::write(&code_path, &req.code).context("failed to write helper code file")?;
    fs::set_permissions(&code_path, fs::Permissions::from_mode(0o600))?;

    let payload = HelperPayload {
        mode: mode.as_str().to_owned(),
        tests: tests.to_vec(),
    };
    let tests_path = job_dir.path().join("tests.json");
    fs::write(&tests_path, serde_json::to_vec(&payload)?)
        .context("failed to write helper tests file")?;
    fs::set_permissions(&tests_path, fs::Permissions::from_mode(0o600))?;

    let mut cmd = tokio::process::Command::new(&config.go_helper_path);
    cmd.arg("--mode").arg(mode.as_str());
    cmd.arg("--global-timeout").arg(global_timeout_ms.to_string());
    cmd.arg("--output-limit").arg(output_limit.to_string());
    cmd.arg("--code-file").arg(&code_path);
    cmd.arg("--tests-file").arg(&tests_path);
    if let Ok(env_dir) = std::env::var("SANDBOX_ENVS_DIR") {
        if !env_dir.trim().is_empty() {
            cmd.arg("--sandbox-env").arg(env_dir.trim());
        }
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let wait = Duration::from_millis(global_timeout_ms + HELPER_TIMEOUT_GRACE_MS);
    let output = match tokio::time::timeout(wait, cmd.output()).await {
        Ok(output) => output.context("failed to run go helper")?,
        Err(_) => {
            error!("go helper timed out waiting for completion");
            return Ok(RunResponse::verdict(Verdict::InternalError).sanitize(req));
        }
    };

    // Helper logs land on stderr, the verdict on stdout; fold them so the
    // verdict is the trailing JSON object either way.
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let raw = format!("{stderr}\n{stdout}");

    if !output.status.success() {
        error!(
            status = ?output.status,
            output = %clip_for_log(&raw, HELPER_LOG_CLIP),
            "go helper failed"
        );
        if raw.trim().is_empty() {
            return Ok(RunResponse::verdict(Verdict::InternalError).sanitize(req));
        }
    }

    let resp = match parse_helper_response(&raw) {
        Ok(resp) => resp,
        Err(err) => {
            error!(%err, payload = %clip_for_log(&raw, HELPER_LOG_CLIP), "failed to parse helper output");
            return Ok(RunResponse::verdict(Verdict::InternalError).sanitize(req));
        }
    };
    Ok(resp.normalize_failed_index().sanitize(req))
}

/// Extracts the helper's verdict, tolerating log noise around the JSON
/// object: a clean parse first, then the last brace-delimited suffix, then a
/// bottom-up widening window of lines.
pub fn parse_helper_response(raw: &str) -> Result<RunResponse> {
    let trimmed = raw.trim();
    anyhow::ensure!(!trimmed.is_empty(), "empty helper output");

    if let Ok(resp) = serde_json::from_str::<RunResponse>(trimmed) {
        return Ok(resp);
    }
    if let Some(idx) = trimmed.rfind('{') {
        if let Ok(resp) = serde_json::from_str::<RunResponse>(&trimmed[idx..]) {
            return Ok(resp);
        }
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    for i in (0..lines.len()).rev() {
        let candidate = lines[i..].join("\n");
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        if let Ok(resp) = serde_json::from_str::<RunResponse>(candidate) {
            return Ok(resp);
        }
    }
    anyhow::bail!("no JSON payload detected")
}

#[cfg(test)]
mod tests {
    use super::parse_helper_response;
    use arbiter_protocol::Verdict;

    #[test]
    fn clean_json_parses() {
        let resp = parse_helper_response(r#"{"result":"Success","duration_ms":5}"#).unwrap();
        assert_eq!(resp.result, Verdict::Success);
        assert_eq!(resp.duration_ms, 5);
        assert_eq!(resp.failed_index, -1);
    }

    #[test]
    fn leading_noise_is_tolerated() {
        let raw = "go helper: compile cache warmed\nsome warning\n{\"result\":\"Compile Error\",\"output\":\"undefined: fmt\"}";
        let resp = parse_helper_response(raw).unwrap();
        assert_eq!(resp.result, Verdict::CompileError);
        assert_eq!(resp.output, "undefined: fmt");
    }

    #[test]
    fn last_json_object_wins() {
        let raw = "{\"result\":\"Success\"}\n{\"result\":\"Wrong Answer\",\"failed_index\":1}";
        let resp = parse_helper_response(raw).unwrap();
        assert_eq!(resp.result, Verdict::WrongAnswer);
        assert_eq!(resp.failed_index, 1);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_helper_response("").is_err());
        assert!(parse_helper_response("no json here").is_err());
    }
}
