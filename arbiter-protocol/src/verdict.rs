use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal and transient judgement outcomes. These exact strings are the
/// only results ever returned to clients or written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Success,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Compile Error")]
    CompileError,
    #[serde(rename = "Internal Error")]
    InternalError,
    #[serde(rename = "Unknown challenge")]
    UnknownChallenge,
    #[serde(rename = "Unsupported language")]
    UnsupportedLanguage,
    #[serde(rename = "Unsupported sandbox mode")]
    UnsupportedSandboxMode,
    Pending,
    Running,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Success => "Success",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::CompileError => "Compile Error",
            Verdict::InternalError => "Internal Error",
            Verdict::UnknownChallenge => "Unknown challenge",
            Verdict::UnsupportedLanguage => "Unsupported language",
            Verdict::UnsupportedSandboxMode => "Unsupported sandbox mode",
            Verdict::Pending => "Pending",
            Verdict::Running => "Running",
        }
    }

    /// Verdicts that carry a meaningful `failed_index`. Every other verdict
    /// reports -1.
    pub fn has_failed_index(self) -> bool {
        matches!(
            self,
            Verdict::WrongAnswer | Verdict::RuntimeError | Verdict::TimeLimitExceeded
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Go,
    Python,
    Ruby,
}

impl Language {
    /// Exact lowercase names as accepted by the runner.
    pub fn parse(s: &str) -> Option<Language> {
        match s {
            "c" => Some(Language::C),
            "go" => Some(Language::Go),
            "python" => Some(Language::Python),
            "ruby" => Some(Language::Ruby),
            _ => None,
        }
    }

    /// Form used by the submission dispatcher: trimmed and lower-cased, but
    /// still only the canonical names.
    pub fn normalize(s: &str) -> Option<Language> {
        Language::parse(&s.trim().to_ascii_lowercase())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Go => "go",
            Language::Python => "python",
            Language::Ruby => "ruby",
        }
    }

    /// Name of the source file written into the workspace.
    pub fn source_name(self) -> &'static str {
        match self {
            Language::C => "code.c",
            Language::Go => "code.go",
            Language::Python => "code.py",
            Language::Ruby => "code.rb",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation mode. Requests without a challenge are always `Single`;
/// requests with a challenge default to `Judge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Judge,
    Sample,
    Single,
}

impl Mode {
    pub fn from_request(mode: &str, has_challenge: bool) -> Mode {
        if !has_challenge {
            return Mode::Single;
        }
        match mode.trim().to_ascii_lowercase().as_str() {
            "sample" => Mode::Sample,
            _ => Mode::Judge,
        }
    }

    /// Parses a bare mode label (as carried in the helper manifest), where
    /// anything unrecognised means judge.
    pub fn from_label(s: &str) -> Mode {
        match s.trim().to_ascii_lowercase().as_str() {
            "sample" => Mode::Sample,
            "single" => Mode::Single,
            _ => Mode::Judge,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Judge => "judge",
            Mode::Sample => "sample",
            Mode::Single => "single",
        }
    }

    /// Sample and single runs reveal outputs and expected values to aid
    /// debugging; judge runs never do.
    pub fn reveals_expected(self) -> bool {
        matches!(self, Mode::Sample | Mode::Single)
    }
}

/// Which isolation stack wraps the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxVariant {
    Default,
    NsjailOnly,
}

impl SandboxVariant {
    pub fn parse(s: &str) -> Option<SandboxVariant> {
        match s.trim() {
            "" | "default" => Some(SandboxVariant::Default),
            "nsjail_only" => Some(SandboxVariant::NsjailOnly),
            _ => None,
        }
    }

    pub fn uses_chroot_runner(self) -> bool {
        matches!(self, SandboxVariant::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_strings_are_stable() {
        assert_eq!(Verdict::WrongAnswer.to_string(), "Wrong Answer");
        assert_eq!(Verdict::UnknownChallenge.to_string(), "Unknown challenge");
        assert_eq!(
            serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap(),
            "\"Time Limit Exceeded\""
        );
        let v: Verdict = serde_json::from_str("\"Compile Error\"").unwrap();
        assert_eq!(v, Verdict::CompileError);
    }

    #[test]
    fn failed_index_applies_to_failures_only() {
        assert!(Verdict::WrongAnswer.has_failed_index());
        assert!(Verdict::RuntimeError.has_failed_index());
        assert!(Verdict::TimeLimitExceeded.has_failed_index());
        assert!(!Verdict::Success.has_failed_index());
        assert!(!Verdict::CompileError.has_failed_index());
        assert!(!Verdict::InternalError.has_failed_index());
    }

    #[test]
    fn language_exact_names() {
        assert_eq!(Language::parse("python"), Some(Language::Python));
        assert_eq!(Language::parse("Python"), None);
        assert_eq!(Language::parse("rust"), None);
    }

    #[test]
    fn normalize_trims_and_lowercases_canonical_names_only() {
        assert_eq!(Language::normalize(" Go "), Some(Language::Go));
        assert_eq!(Language::normalize("PYTHON"), Some(Language::Python));
        assert_eq!(Language::normalize("ruby"), Some(Language::Ruby));
        assert_eq!(Language::normalize("golang"), None);
        assert_eq!(Language::normalize("py"), None);
        assert_eq!(Language::normalize("rb"), None);
        assert_eq!(Language::normalize("perl"), None);
    }

    #[test]
    fn mode_defaults() {
        assert_eq!(Mode::from_request("", false), Mode::Single);
        assert_eq!(Mode::from_request("sample", false), Mode::Single);
        assert_eq!(Mode::from_request("", true), Mode::Judge);
        assert_eq!(Mode::from_request("SAMPLE", true), Mode::Sample);
        assert_eq!(Mode::from_request("judge", true), Mode::Judge);
    }

    #[test]
    fn mode_labels() {
        assert_eq!(Mode::from_label("sample"), Mode::Sample);
        assert_eq!(Mode::from_label("single"), Mode::Single);
        assert_eq!(Mode::from_label(""), Mode::Judge);
        assert_eq!(Mode::from_label("anything"), Mode::Judge);
    }

    #[test]
    fn sandbox_variant_parsing() {
        assert_eq!(SandboxVariant::parse(""), Some(SandboxVariant::Default));
        assert_eq!(
            SandboxVariant::parse("nsjail_only"),
            Some(SandboxVariant::NsjailOnly)
        );
        assert_eq!(SandboxVariant::parse("chroot"), None);
    }
}
