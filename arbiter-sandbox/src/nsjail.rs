//! Invocation plumbing for the external namespace jail. The embedded policy
//! file is materialised to a temp file on first use; every run passes it
//! together with the chroot path, the computed bind mounts and the rlimit
//! flags.

use crate::runroot::RunRoot;
use crate::{env_trimmed, RLimits};

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use arbiter_utils::math::roundup_div;
use arbiter_utils::os_cmd::OsCmd;
use once_cell::sync::OnceCell;

const NSJAIL_CONFIG: &str = include_str!("../nsjail.cfg");

const DEFAULT_NSJAIL_PATH: &str = "/usr/bin/nsjail";

const MIB: u64 = 1024 * 1024;

pub fn nsjail_path() -> PathBuf {
    env_trimmed("NSJAIL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_NSJAIL_PATH))
}

/// Writes the embedded config once and reuses the path for the process
/// lifetime.
pub fn nsjail_config_path() -> Result<&'static Path> {
    static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();
    let path = CONFIG_PATH.get_or_try_init(|| -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("nsjail-config-")
            .suffix(".cfg")
            .tempfile()
            .context("failed to create nsjail config file")?;
        std::fs::write(file.path(), NSJAIL_CONFIG)
            .context("failed to write nsjail config file")?;
        let (_, path) = file.keep().context("failed to persist nsjail config file")?;
        Ok(path)
    })?;
    Ok(path.as_path())
}

/// `PATH` seen by the jailed process. Without the chroot runner the process
/// stays at the nsjail root, so the template's tool dirs are reached through
/// their `/env` projections.
pub fn path_env(use_chroot_runner: bool) -> &'static str {
    if use_chroot_runner {
        "/.runner:/usr/local/bin:/usr/bin:/bin"
    } else {
        "/.runner:/env/usr/local/bin:/env/usr/bin:/env/bin:/usr/local/bin:/usr/bin:/bin"
    }
}

/// Builds the full nsjail argument vector for one run.
pub fn build_command(
    nsjail: &Path,
    config: &Path,
    rr: &RunRoot,
    workdir: &str,
    argv: &[String],
    rlim: &RLimits,
    use_chroot_runner: bool,
) -> OsCmd {
    let mut cmd = OsCmd::new(nsjail);

    let inner_workdir = normalize_inner_workdir(workdir);
    let cwd = if use_chroot_runner {
        "/".to_owned()
    } else {
        inner_workdir.clone()
    };

    cmd.arg("--config").arg(config);
    cmd.arg("--chroot").arg(rr.root());
    cmd.arg("--cwd").arg(&cwd);
    cmd.arg("--keep_caps");
    cmd.arg("--cap").arg("CAP_SYS_CHROOT");
    cmd.arg("--disable_no_new_privs");

    let path_env = path_env(use_chroot_runner);
    for (key, value) in [
        ("PATH", path_env),
        ("HOME", "/tmp"),
        ("TMPDIR", "/tmp"),
        ("LANG", "C.UTF-8"),
    ] {
        cmd.arg("--env").arg(format!("{key}={value}"));
        cmd.add_env(key, value);
    }

    if rlim.cpu_secs > 0 {
        cmd.arg("--rlimit_cpu").arg(rlim.cpu_secs.to_string());
    }
    if rlim.as_bytes > 0 {
        cmd.arg("--rlimit_as")
            .arg(roundup_div(rlim.as_bytes, MIB).to_string());
    }
    if rlim.fsize_bytes > 0 {
        cmd.arg("--rlimit_fsize")
            .arg(roundup_div(rlim.fsize_bytes, MIB).to_string());
    }
    if rlim.nproc > 0 {
        cmd.arg("--rlimit_nproc").arg(rlim.nproc.to_string());
    }
    if rlim.nofile > 0 {
        cmd.arg("--rlimit_nofile").arg(rlim.nofile.to_string());
    }

    if !use_chroot_runner {
        // Absolute tool paths must resolve at the nsjail root: project the
        // template's tool dirs to root level.
        for sub in ["bin", "lib", "lib64", "usr", "etc"] {
            let host = rr.env_root().join(sub);
            if host.is_dir() {
                let dest = rr.root().join(sub);
                let _ = crate::runroot::ensure_dir_with_perm(&dest, 0o755);
                cmd.arg("--bindmount_ro")
                    .arg(format!("{}:/{}", host.display(), sub));
            }
        }
    }

    for m in rr.mounts() {
        let option = if m.read_only {
            "--bindmount_ro"
        } else {
            "--bindmount"
        };
        let dest = inside_dest(rr.root(), &m.target);
        cmd.arg(option)
            .arg(format!("{}:{}", m.host.display(), dest));
    }

    cmd.arg("--");
    if use_chroot_runner {
        cmd.arg(rr.chroot_bin());
        cmd.arg(rr.work_dir());
        cmd.arg(&inner_workdir);
        cmd.arg("--");
    }
    cmd.args(argv.iter().cloned());
    cmd
}

/// Target path as seen at the nsjail root: the run-root prefix stripped and
/// re-anchored at `/`.
pub fn inside_dest(root: &Path, target: &Path) -> String {
    match target.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => "/".to_owned(),
        Ok(rel) => format!("/{}", rel.display()),
        Err(_) => target.display().to_string(),
    }
}

fn normalize_inner_workdir(workdir: &str) -> String {
    let trimmed = workdir.trim();
    if trimmed.is_empty() {
        return "/".to_owned();
    }
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runroot::{BindMount, RunRoot};

    fn args_of(cmd: &OsCmd) -> Vec<String> {
        cmd.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn fake_runroot() -> RunRoot {
        let root = PathBuf::from("/tmp/runroots/runroot-x");
        let mounts = vec![
            BindMount {
                host: PathBuf::from("/opt/sandbox-envs/c/usr"),
                target: root.join("env/usr"),
                read_only: true,
            },
            BindMount {
                host: root.join("workspace"),
                target: root.join("env/workspace"),
                read_only: false,
            },
        ];
        RunRoot::fake(root, PathBuf::from("/nonexistent-template"), mounts)
    }

    #[test]
    fn chroot_runner_vector_wraps_argv() {
        let rr = fake_runroot();
        let cmd = build_command(
            Path::new("/usr/bin/nsjail"),
            Path::new("/tmp/nsjail.cfg"),
            &rr,
            "/workspace",
            &["/workspace/code".to_owned()],
            &RLimits {
                cpu_secs: 2,
                as_bytes: 256 * MIB,
                fsize_bytes: 16 * MIB,
                nproc: 64,
                nofile: 128,
                output_limit: 65536,
            },
            true,
        );
        let args = args_of(&cmd);

        let chroot_pos = args.iter().position(|a| a == "--chroot").unwrap();
        assert_eq!(args[chroot_pos + 1], "/tmp/runroots/runroot-x");

        let cwd_pos = args.iter().position(|a| a == "--cwd").unwrap();
        assert_eq!(args[cwd_pos + 1], "/");

        assert!(args.contains(&"--keep_caps".to_owned()));
        assert!(args.contains(&"CAP_SYS_CHROOT".to_owned()));
        assert!(args.contains(&"--disable_no_new_privs".to_owned()));

        // rlimits converted to nsjail units
        let as_pos = args.iter().position(|a| a == "--rlimit_as").unwrap();
        assert_eq!(args[as_pos + 1], "256");

        // mounts appear with destinations re-anchored at /
        let ro_pos = args.iter().position(|a| a == "--bindmount_ro").unwrap();
        assert_eq!(args[ro_pos + 1], "/opt/sandbox-envs/c/usr:/env/usr");
        let rw_pos = args.iter().position(|a| a == "--bindmount").unwrap();
        assert_eq!(
            args[rw_pos + 1],
            "/tmp/runroots/runroot-x/workspace:/env/workspace"
        );

        // helper wraps the argv after the separator
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(
            &args[sep + 1..],
            &[
                "/.runner/chroot-run".to_owned(),
                "/env".to_owned(),
                "/workspace".to_owned(),
                "--".to_owned(),
                "/workspace/code".to_owned(),
            ]
        );
    }

    #[test]
    fn direct_vector_sets_cwd_and_skips_helper() {
        let rr = fake_runroot();
        let cmd = build_command(
            Path::new("/usr/bin/nsjail"),
            Path::new("/tmp/nsjail.cfg"),
            &rr,
            "/env/workspace",
            &["/env/bin/sh".to_owned(), "-c".to_owned(), "true".to_owned()],
            &RLimits::default(),
            false,
        );
        let args = args_of(&cmd);

        let cwd_pos = args.iter().position(|a| a == "--cwd").unwrap();
        assert_eq!(args[cwd_pos + 1], "/env/workspace");

        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "/env/bin/sh");
    }

    #[test]
    fn direct_vector_projects_template_tool_dirs() {
        let template = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(template.path().join("bin")).unwrap();
        std::fs::create_dir_all(template.path().join("usr")).unwrap();

        let root = tempfile::tempdir().unwrap();
        let rr = RunRoot::fake(
            root.path().to_owned(),
            template.path().to_owned(),
            Vec::new(),
        );
        let cmd = build_command(
            Path::new("/usr/bin/nsjail"),
            Path::new("/tmp/nsjail.cfg"),
            &rr,
            "/workspace",
            &["/workspace/code".to_owned()],
            &RLimits::default(),
            false,
        );
        let args = args_of(&cmd);

        let bin_pair = format!("{}:/bin", template.path().join("bin").display());
        let usr_pair = format!("{}:/usr", template.path().join("usr").display());
        assert!(args.contains(&bin_pair));
        assert!(args.contains(&usr_pair));
        // lib/lib64/etc are absent from this template and must not appear
        assert!(!args.iter().any(|a| a.ends_with(":/lib")));
    }

    #[test]
    fn empty_workdir_resolves_to_root() {
        assert_eq!(normalize_inner_workdir(""), "/");
        assert_eq!(normalize_inner_workdir("workspace"), "/workspace");
        assert_eq!(normalize_inner_workdir("/env"), "/env");
    }

    #[test]
    fn path_env_differs_by_mode() {
        assert!(path_env(true).starts_with("/.runner:/usr/local/bin"));
        assert!(path_env(false).contains("/env/usr/bin"));
    }

    #[test]
    fn inside_dest_strips_root() {
        let root = Path::new("/tmp/rr");
        assert_eq!(inside_dest(root, Path::new("/tmp/rr/env/usr")), "/env/usr");
        assert_eq!(inside_dest(root, Path::new("/tmp/rr")), "/");
        assert_eq!(inside_dest(root, Path::new("/elsewhere")), "/elsewhere");
    }
}
