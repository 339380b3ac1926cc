//! Per-language execution strategies: C compiles in one sandbox and runs in
//! another, Python and Ruby interpret in a single sandbox, Go is delegated
//! to the out-of-process helper.

pub mod c;
pub mod go;
pub mod script;

use crate::app::App;

use arbiter_protocol::{Language, RunRequest, RunResponse, SandboxVariant, TestCase, Verdict};

use anyhow::Result;
use tracing::error;

/// Entry point for one run request. Internal failures never leak detail:
/// they are logged here and collapse to `Internal Error`.
pub async fn execute(req: RunRequest) -> RunResponse {
    match dispatch(&req).await {
        Ok(resp) => resp,
        Err(err) => {
            error!(%err, language = %req.language, "execution failed");
            RunResponse::verdict(Verdict::InternalError).sanitize(&req)
        }
    }
}

async fn dispatch(req: &RunRequest) -> Result<RunResponse> {
    let Some(variant) = req.sandbox_variant() else {
        return Ok(RunResponse::verdict(Verdict::UnsupportedSandboxMode));
    };
    let Some(language) = Language::parse(&req.language) else {
        return Ok(RunResponse::verdict(Verdict::UnsupportedLanguage));
    };

    // Unknown challenges short-circuit before any sandbox is built.
    let mode = req.resolved_mode();
    let tests = match req.challenge() {
        Some(name) => {
            let tests = App::get().store.runner_tests(name, mode).await?;
            if tests.is_empty() {
                return Ok(RunResponse::verdict(Verdict::UnknownChallenge).sanitize(req));
            }
            tests
        }
        None => vec![TestCase {
            input: req.input.clone(),
            output: req.want.clone(),
            is_sample: true,
        }],
    };

    match language {
        Language::Go => {
            if variant != SandboxVariant::Default {
                return Ok(RunResponse::verdict(Verdict::UnsupportedSandboxMode));
            }
            go::execute_via_helper(req, mode, &tests).await
        }
        Language::C => c::execute_two_stage(req, mode, &tests).await,
        Language::Python | Language::Ruby => {
            script::execute(req, language, mode, variant, &tests).await
        }
    }
}

/// Absolute tool paths resolve through the template's `/env` projection when
/// the chroot runner is not in play.
pub(crate) fn map_tool_path(path: &str, use_chroot_runner: bool) -> String {
    if use_chroot_runner || !path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/env{path}")
    }
}

pub(crate) fn shell_path(use_chroot_runner: bool) -> &'static str {
    if use_chroot_runner {
        "/bin/sh"
    } else {
        "/env/bin/sh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_paths_gain_env_prefix_without_chroot_runner() {
        assert_eq!(map_tool_path("/usr/bin/gcc", true), "/usr/bin/gcc");
        assert_eq!(map_tool_path("/usr/bin/gcc", false), "/env/usr/bin/gcc");
        assert_eq!(map_tool_path("gcc", false), "gcc");
    }

    #[test]
    fn shell_follows_runner_mode() {
        assert_eq!(shell_path(true), "/bin/sh");
        assert_eq!(shell_path(false), "/env/bin/sh");
    }
}
