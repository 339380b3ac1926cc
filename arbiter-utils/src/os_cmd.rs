use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

/// Argument-vector builder for child processes that are spawned with an
/// explicit environment (the jail wrapper and the host-side prlimit shim).
pub struct OsCmd {
    pub bin: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<OsString>,
}

impl OsCmd {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(&mut self, a: impl Into<OsString>) -> &mut Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, A>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        for a in items {
            self.arg(a);
        }
        self
    }

    pub fn arg_if(&mut self, cond: bool, a: impl Into<OsString>) -> &mut Self {
        if cond {
            self.arg(a)
        } else {
            self
        }
    }

    pub fn add_env(&mut self, k: impl Into<OsString>, v: impl AsRef<OsStr>) -> &mut Self {
        let mut e: OsString = k.into();
        e.push(OsStr::from_bytes(b"="));
        e.push(v.as_ref());
        self.env.push(e);
        self
    }

    /// Converts into a tokio command with a cleared environment, so that the
    /// child sees exactly the `env` entries collected here.
    pub fn into_tokio_command(self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.args(&self.args);
        cmd.env_clear();
        for e in &self.env {
            let bytes = e.as_bytes();
            match bytes.iter().position(|&b| b == b'=') {
                Some(pos) => {
                    cmd.env(
                        OsStr::from_bytes(&bytes[..pos]),
                        OsStr::from_bytes(&bytes[pos + 1..]),
                    );
                }
                None => {
                    cmd.env(e, "");
                }
            };
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_args_and_env() {
        let mut cmd = OsCmd::new("/usr/bin/env");
        cmd.arg("--config").arg("/tmp/x.cfg");
        cmd.arg_if(false, "--never");
        cmd.args(["--", "/bin/true"]);
        cmd.add_env("PATH", "/usr/bin:/bin");

        assert_eq!(cmd.bin, PathBuf::from("/usr/bin/env"));
        assert_eq!(cmd.args.len(), 4);
        assert_eq!(cmd.env, vec![OsString::from("PATH=/usr/bin:/bin")]);
    }
}
