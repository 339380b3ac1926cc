//! Minimal privileged helper: `chroot-run <newroot> <workdir> -- <cmd>
//! [args...]`. Carries `cap_sys_chroot` as a file capability so the jail
//! wrapper itself needs no ambient privilege. Exit codes are contractual:
//! 97 usage, 98 unexpected argument, 100 missing command, 101-104 for the
//! individual chdir/chroot phases, 127 exec failure.

use std::env;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{self, Command};

use nix::unistd;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        let prog = Path::new(&args[0])
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chroot-run".to_owned());
        eprintln!("usage: {prog} <newroot> <workdir> -- <cmd> [args...]");
        process::exit(97);
    }
    let newroot = &args[1];
    let workdir = &args[2];

    let mut idx = 3;
    while idx < args.len() && args[idx] != "--" {
        eprintln!("unexpected argument: {}", args[idx]);
        process::exit(98);
    }
    idx += 1;
    if idx >= args.len() {
        eprintln!("missing command");
        process::exit(100);
    }

    if let Err(err) = unistd::chdir(Path::new(newroot)) {
        eprintln!("chdir(newroot): {err}");
        process::exit(101);
    }

    let rel_work = normalize_workdir(workdir);
    let rel_work = rel_work.trim_start_matches('/');
    if !rel_work.is_empty() {
        if let Err(err) = unistd::chdir(Path::new(rel_work)) {
            eprintln!("chdir(workdir={rel_work}): {err}");
            process::exit(102);
        }
    }

    if let Err(err) = unistd::chroot(Path::new(newroot)) {
        eprintln!("chroot: {err}");
        process::exit(103);
    }

    if rel_work.is_empty() {
        if let Err(err) = unistd::chdir(Path::new("/")) {
            eprintln!("chdir(/): {err}");
            process::exit(104);
        }
    }

    let err = Command::new(&args[idx]).args(&args[idx + 1..]).exec();
    eprintln!("exec: {err}");
    process::exit(127);
}

/// Lexically cleans the workdir and anchors it at `/`; empty and `.` both
/// mean the root.
fn normalize_workdir(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_workdir;

    #[test]
    fn workdir_is_cleaned_and_rooted() {
        assert_eq!(normalize_workdir(""), "/");
        assert_eq!(normalize_workdir("."), "/");
        assert_eq!(normalize_workdir("/"), "/");
        assert_eq!(normalize_workdir("workspace"), "/workspace");
        assert_eq!(normalize_workdir("/env/./workspace"), "/env/workspace");
        assert_eq!(normalize_workdir("/env/../workspace"), "/workspace");
        assert_eq!(normalize_workdir("/../.."), "/");
    }
}
