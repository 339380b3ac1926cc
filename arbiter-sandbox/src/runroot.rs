//! Ephemeral per-run root filesystems. A run-root is a throwaway directory
//! tree: the per-language template is projected into it with read-only bind
//! mounts, the workspace and a sticky temp are the only writable paths, and
//! a copy of the chroot-entry helper (with its file capability) is installed
//! under `/.runner`.

use crate::{env_trimmed, exec, RLimits};

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context as _, Result};
use tempfile::TempDir;
use tracing::{info, warn};

/// Installed path of the chroot-entry helper on the host.
pub const CHROOT_RUN_PATH: &str = "/usr/local/bin/chroot-run";

const DEFAULT_ENVS_DIR: &str = "/opt/sandbox-envs";

/// Template entries that never become mounts: these exist per run-root (or
/// are owned by the jail) rather than being shared from the template.
const SKIP_TOP_LEVEL: &[&str] = &["tmp", "dev", "proc", "sys", "run", "work", "mnt", "media"];

const DEVICE_PATHS: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/urandom",
    "/dev/random",
    "/dev/tty",
];

/// Host file whose visibility marks the trust boundary: build phases may see
/// it, the C runtime phase must not.
const SENSITIVE_FILE: &str = "/flag2";

/// One bind mount of the run-root, `target` being the host-side path under
/// the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: PathBuf,
    pub target: PathBuf,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunRootOptions {
    /// Go build phase: the sensitive file is additionally projected into the
    /// workspace so toolchain-driven reads exercise the boundary.
    pub for_go_builder: bool,
    /// C runtime phase: the sensitive file is never mounted.
    pub for_c_builder: bool,
    /// Explicit in-root destinations for the sensitive file.
    pub flag_destinations: Vec<String>,
}

pub struct RunRoot {
    dir: Option<TempDir>,
    root: PathBuf,
    workspace_host: PathBuf,
    tmp_host: PathBuf,
    env_root: PathBuf,
    chroot_bin: String,
    mounts: Vec<BindMount>,
    keep: bool,
}

impl RunRoot {
    /// Builds a run-root for `language` with default options.
    pub async fn prepare(language: &str) -> Result<RunRoot> {
        Self::prepare_with_options(language, RunRootOptions::default()).await
    }

    /// Builds a run-root by projecting the language template with bind
    /// mounts instead of copying it.
    pub async fn prepare_with_options(language: &str, opts: RunRootOptions) -> Result<RunRoot> {
        let env_root = resolve_template_root(language)?;

        let runroots_dir = runroot_parent_dir();
        fs::create_dir_all(&runroots_dir)
            .with_context(|| format!("failed to create run-root dir: {}", runroots_dir.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("runroot-")
            .tempdir_in(&runroots_dir)
            .context("failed to create run-root")?;
        let root = dir.path().to_owned();

        let work_host = root.join("env");
        let workspace_host = root.join("workspace");
        let tmp_host = root.join("tmp");

        ensure_dir_with_perm(&work_host, 0o755)?;
        ensure_dir_with_perm(&workspace_host, 0o755)?;
        ensure_dir_with_perm(&tmp_host, 0o1777)?;
        ensure_dir_with_perm(&work_host.join("dev"), 0o755)?;
        ensure_dir_with_perm(&work_host.join("proc"), 0o755)?;

        let mut mounts = build_env_mounts(&work_host, &env_root)
            .context("failed to prepare template mounts")?;

        // The workspace appears both at /workspace and /env/workspace, the
        // sticky temp at /env/tmp; all three bind the same writable dirs.
        mounts.push(BindMount {
            host: workspace_host.clone(),
            target: workspace_host.clone(),
            read_only: false,
        });
        let env_workspace = work_host.join("workspace");
        ensure_dir_with_perm(&env_workspace, 0o755)?;
        mounts.push(BindMount {
            host: workspace_host.clone(),
            target: env_workspace,
            read_only: false,
        });
        let env_tmp = work_host.join("tmp");
        ensure_dir_with_perm(&env_tmp, 0o1777)?;
        mounts.push(BindMount {
            host: tmp_host.clone(),
            target: env_tmp,
            read_only: false,
        });

        mounts.extend(build_device_mounts(&work_host));

        if !opts.for_c_builder {
            match fs::metadata(SENSITIVE_FILE) {
                Ok(meta) => {
                    let destinations =
                        resolve_flag_destinations(&opts.flag_destinations, opts.for_go_builder, "/workspace");
                    for dest in destinations {
                        let target = root.join(dest.strip_prefix("/").unwrap_or(&dest));
                        ensure_placeholder(&target, meta.is_dir(), meta.permissions().mode() & 0o777)?;
                        mounts.push(BindMount {
                            host: PathBuf::from(SENSITIVE_FILE),
                            target,
                            read_only: true,
                        });
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).context("failed to stat sensitive file");
                }
            }
        }

        let mounts = dedupe_and_sort_mounts(mounts);

        let runner_dir = root.join(".runner");
        ensure_dir_with_perm(&runner_dir, 0o755)?;
        let helper_name = Path::new(CHROOT_RUN_PATH)
            .file_name()
            .context("invalid chroot helper path")?;
        let helper_copy = runner_dir.join(helper_name);
        copy_file(Path::new(CHROOT_RUN_PATH), &helper_copy, 0o755)
            .context("failed to install chroot helper")?;
        fs::set_permissions(&helper_copy, fs::Permissions::from_mode(0o755))?;
        exec::run_on_host(
            "",
            &[
                "/usr/sbin/setcap".to_owned(),
                "cap_sys_chroot+ep".to_owned(),
                helper_copy.display().to_string(),
            ],
            "",
            &RLimits {
                output_limit: 4096,
                ..RLimits::default()
            },
        )
        .await
        .context("failed to apply chroot capability to helper")?;

        let keep = env_trimmed("SANDBOX_KEEP_RUNROOT")
            .map(|v| v.eq_ignore_ascii_case("1"))
            .unwrap_or(false);
        if keep {
            info!(path = %root.display(), "keeping runroot");
        }

        Ok(RunRoot {
            dir: Some(dir),
            root,
            workspace_host,
            tmp_host,
            env_root,
            chroot_bin: format!("/.runner/{}", helper_name.to_string_lossy()),
            mounts,
            keep,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chroot destination handed to the helper: the template subtree.
    pub fn work_dir(&self) -> &str {
        "/env"
    }

    /// Writable work area as seen inside the chroot.
    pub fn workspace_dir(&self) -> &str {
        "/workspace"
    }

    pub fn workspace_rel(&self) -> &str {
        "/workspace"
    }

    pub fn workspace_host(&self) -> &Path {
        &self.workspace_host
    }

    pub fn tmp_host(&self) -> &Path {
        &self.tmp_host
    }

    pub fn env_root(&self) -> &Path {
        &self.env_root
    }

    /// In-root path of the installed chroot-entry helper.
    pub fn chroot_bin(&self) -> &str {
        &self.chroot_bin
    }

    /// The computed bind-mount list: deduplicated, deterministically sorted.
    pub fn mounts(&self) -> &[BindMount] {
        &self.mounts
    }

    /// Maps a host path under the workspace to its in-chroot view.
    pub fn inside_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.workspace_host) {
            Ok(rel) if rel.as_os_str().is_empty() => self.workspace_rel().to_owned(),
            Ok(rel) => format!("{}/{}", self.workspace_rel(), rel.display()),
            Err(_) => path.display().to_string(),
        }
    }

    /// Clears the writable temp between test cases, restoring the sticky bit.
    pub fn reset_tmp(&self) -> Result<()> {
        clear_directory(&self.tmp_host)?;
        fs::set_permissions(&self.tmp_host, fs::Permissions::from_mode(0o1777))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fake(root: PathBuf, env_root: PathBuf, mounts: Vec<BindMount>) -> RunRoot {
        let workspace_host = root.join("workspace");
        let tmp_host = root.join("tmp");
        RunRoot {
            dir: None,
            root,
            workspace_host,
            tmp_host,
            env_root,
            chroot_bin: "/.runner/chroot-run".to_owned(),
            mounts,
            keep: true,
        }
    }
}

impl Drop for RunRoot {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                let path = dir.keep();
                warn!(path = %path.display(), "runroot retained");
            }
        }
    }
}

fn resolve_template_root(language: &str) -> Result<PathBuf> {
    let base = env_trimmed("SANDBOX_ENVS_DIR").unwrap_or_else(|| DEFAULT_ENVS_DIR.to_owned());
    let mut env_root = Path::new(&base).join(language);
    if let Ok(real) = fs::canonicalize(&env_root) {
        env_root = real;
    }
    let meta = fs::metadata(&env_root)
        .with_context(|| format!("runtime environment not found: {}", env_root.display()))?;
    anyhow::ensure!(
        meta.is_dir(),
        "runtime environment not found: {}",
        env_root.display()
    );
    for critical in ["usr/bin/gcc", "usr/bin/python3", "bin/sh"] {
        let path = env_root.join(critical);
        anyhow::ensure!(
            path.exists(),
            "runtime environment incomplete: missing {}",
            path.display()
        );
    }
    Ok(env_root)
}

fn runroot_parent_dir() -> PathBuf {
    match env_trimmed("SANDBOX_RUNROOT_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::temp_dir().join("sandbox-runroots"),
    }
}

/// Projects the template's top level into `root`: symlinks are replicated
/// verbatim, files and directories become placeholders plus read-only binds.
pub fn build_env_mounts(root: &Path, env_root: &Path) -> Result<Vec<BindMount>> {
    let mut names: Vec<String> = fs::read_dir(env_root)
        .with_context(|| format!("failed to read template: {}", env_root.display()))?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_>>()?;
    names.sort();

    let mut mounts = Vec::with_capacity(names.len());
    for name in names {
        if SKIP_TOP_LEVEL.contains(&name.as_str()) {
            continue;
        }
        let host = env_root.join(&name);
        let target = root.join(&name);
        let meta = fs::symlink_metadata(&host)?;

        if meta.file_type().is_symlink() {
            let link = fs::read_link(&host)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let _ = fs::remove_file(&target);
            symlink(&link, &target)?;
            continue;
        }

        ensure_placeholder(&target, meta.is_dir(), meta.permissions().mode() & 0o7777)?;
        mounts.push(BindMount {
            host,
            target,
            read_only: true,
        });
    }
    Ok(mounts)
}

/// Device nodes present on the host are bound writable under `root/dev`.
pub fn build_device_mounts(root: &Path) -> Vec<BindMount> {
    let mut mounts = Vec::with_capacity(DEVICE_PATHS.len());
    for host in DEVICE_PATHS {
        if fs::metadata(host).is_err() {
            continue;
        }
        let target = root.join(host.trim_start_matches('/'));
        if let Err(err) = ensure_placeholder(&target, false, 0o666) {
            warn!(target = %target.display(), %err, "failed to prepare device mount");
            continue;
        }
        mounts.push(BindMount {
            host: PathBuf::from(*host),
            target,
            read_only: false,
        });
    }
    mounts
}

/// Cleans, roots and deduplicates the sensitive-file destinations. Go build
/// roots additionally receive the file inside the workspace views.
pub fn resolve_flag_destinations(
    requested: &[String],
    for_go_builder: bool,
    workspace_rel: &str,
) -> Vec<PathBuf> {
    let mut raw: Vec<String> = if requested.is_empty() {
        vec![SENSITIVE_FILE.to_owned()]
    } else {
        requested.to_vec()
    };
    if for_go_builder {
        let ws = workspace_rel.trim_start_matches('/');
        raw.push(format!("/{ws}/flag2"));
        raw.push(format!("/env/{ws}/flag2"));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for dest in raw {
        let cleaned = clean_absolute(&dest);
        let Some(cleaned) = cleaned else { continue };
        if seen.insert(cleaned.clone()) {
            out.push(cleaned);
        }
    }
    out
}

fn clean_absolute(path: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(p) => parts.push(p.to_str()?),
            Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(PathBuf::from(format!("/{}", parts.join("/"))))
    }
}

/// Drops duplicate `host -> target` pairs and orders the list so mount
/// sequencing is reproducible: by target, then host, writable before
/// read-only.
pub fn dedupe_and_sort_mounts(mounts: Vec<BindMount>) -> Vec<BindMount> {
    let mut seen = HashSet::with_capacity(mounts.len());
    let mut out: Vec<BindMount> = mounts
        .into_iter()
        .filter(|m| seen.insert((m.host.clone(), m.target.clone())))
        .collect();
    out.sort_by(|a, b| {
        a.target
            .cmp(&b.target)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.read_only.cmp(&b.read_only))
    });
    out
}

pub fn ensure_dir_with_perm(path: &Path, mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Creates the mount target ahead of the bind: a directory, or an empty file
/// when the source is a regular file. Existing entries are left alone.
pub fn ensure_placeholder(path: &Path, is_dir: bool, mode: u32) -> io::Result<()> {
    if is_dir {
        return ensure_dir_with_perm(path, mode);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(path).is_err() {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .mode(mode)
            .open(path)?;
    }
    Ok(())
}

/// Copies a regular file, creating parent directories. An unreadable source
/// degrades to an empty destination so the mount target still exists.
pub fn copy_file(src: &Path, dst: &Path, mode: u32) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::copy(src, dst) {
        Ok(_) => {
            fs::set_permissions(dst, fs::Permissions::from_mode(mode))?;
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(mode)
                .open(dst)?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn clear_directory(path: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return ensure_dir_with_perm(path, 0o1777);
        }
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let p = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&p)?;
        } else {
            fs::remove_file(&p)?;
        }
    }
    Ok(())
}
