//! Capture-file plumbing shared by the compile and run phases: the child's
//! stdout/stderr are redirected by the in-chroot shell into files under the
//! workspace, which the host reads back afterwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Host-side and in-chroot views of one phase's capture files.
#[derive(Debug, Clone)]
pub struct CapturePaths {
    pub stdout_host: PathBuf,
    pub stderr_host: PathBuf,
    pub stdout_inside: String,
    pub stderr_inside: String,
}

pub fn capture_paths(host_work: &Path, workdir: &str, base: &str) -> CapturePaths {
    CapturePaths {
        stdout_host: host_work.join(".runner").join(format!("{base}.stdout")),
        stderr_host: host_work.join(".runner").join(format!("{base}.stderr")),
        stdout_inside: format!("{workdir}/.runner/{base}.stdout"),
        stderr_inside: format!("{workdir}/.runner/{base}.stderr"),
    }
}

/// Shell line that clears stale captures and execs the target with its
/// streams redirected. Runs under `sh -c`.
pub fn build_capture_command(argv: &[String], stdout_inside: &str, stderr_inside: &str) -> String {
    format!(
        "rm -f {out} {err} && exec {cmd} > {out} 2> {err}",
        out = shell_quote(stdout_inside),
        err = shell_quote(stderr_inside),
        cmd = join_shell_args(argv),
    )
}

pub fn join_shell_args(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_owned();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Reads at most `limit` bytes; a missing file reads as empty.
pub fn read_file_limited(path: &Path, limit: usize) -> io::Result<String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err),
    };
    let data = if limit > 0 && data.len() > limit {
        &data[..limit]
    } else {
        &data[..]
    };
    Ok(String::from_utf8_lossy(data).into_owned())
}

pub fn remove_files<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for p in paths {
        let _ = fs::remove_file(p);
    }
}

/// Recreates `path` empty with the given mode.
pub fn reset_dir(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// stdout and stderr folded into one trimmed diagnostic blob.
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    let s = stdout.trim();
    let t = stderr.trim();
    if s.is_empty() {
        return t.to_owned();
    }
    if t.is_empty() {
        return s.to_owned();
    }
    format!("{s}\n{t}")
}

pub fn clip_for_log(s: &str, limit: usize) -> String {
    if limit == 0 || s.len() <= limit {
        return s.to_owned();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated {} bytes)", &s[..end], s.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn capture_command_shape() {
        let argv = vec!["/workspace/code".to_owned(), "arg with space".to_owned()];
        let cmd = build_capture_command(&argv, "/ws/.runner/t.stdout", "/ws/.runner/t.stderr");
        assert_eq!(
            cmd,
            "rm -f '/ws/.runner/t.stdout' '/ws/.runner/t.stderr' && \
exec '/workspace/code' 'arg with space' > '/ws/.runner/t.stdout' 2> '/ws/.runner/t.stderr'"
        );
    }

    #[test]
    fn capture_paths_host_and_inside_views() {
        let paths = capture_paths(Path::new("/srv/rr/workspace"), "/workspace", "test-3");
        assert_eq!(
            paths.stdout_host,
            Path::new("/srv/rr/workspace/.runner/test-3.stdout")
        );
        assert_eq!(paths.stderr_inside, "/workspace/.runner/test-3.stderr");
    }

    #[test]
    fn missing_capture_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = read_file_limited(&dir.path().join("absent"), 64).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn read_back_is_limited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        fs::write(&path, "x".repeat(100)).unwrap();
        assert_eq!(read_file_limited(&path, 10).unwrap().len(), 10);
        assert_eq!(read_file_limited(&path, 0).unwrap().len(), 100);
    }

    #[test]
    fn combine_output_trims_and_joins() {
        assert_eq!(combine_output("  a\n", ""), "a");
        assert_eq!(combine_output("", " b "), "b");
        assert_eq!(combine_output("a\n", "b\n"), "a\nb");
    }

    #[test]
    fn clip_marks_truncation() {
        assert_eq!(clip_for_log("short", 10), "short");
        let clipped = clip_for_log(&"y".repeat(32), 8);
        assert!(clipped.starts_with("yyyyyyyy... (truncated 24 bytes)"));
    }
}
