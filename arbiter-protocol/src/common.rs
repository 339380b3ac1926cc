use crate::verdict::{Mode, SandboxVariant, Verdict};

use serde::{Deserialize, Serialize};

/// Body of `POST /run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub language: String,
    pub code: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub want: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub challenge: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

impl RunRequest {
    /// Trimmed challenge name, `None` when the request is an ad-hoc run.
    pub fn challenge(&self) -> Option<&str> {
        let name = self.challenge.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    pub fn resolved_mode(&self) -> Mode {
        Mode::from_request(&self.mode, self.challenge().is_some())
    }

    pub fn sandbox_variant(&self) -> Option<SandboxVariant> {
        SandboxVariant::parse(&self.sandbox)
    }
}

/// Body of the `POST /run` response and of the Go helper's stdout verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub result: Verdict,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default = "no_failed_index")]
    pub failed_index: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expected: String,
}

fn no_failed_index() -> i32 {
    -1
}

impl RunResponse {
    /// A response carrying only a verdict.
    pub fn verdict(result: Verdict) -> Self {
        Self {
            result,
            output: String::new(),
            duration_ms: 0,
            failed_index: -1,
            expected: String::new(),
        }
    }

    /// Forces `failed_index` to -1 unless the verdict is WA/RE/TLE.
    pub fn normalize_failed_index(mut self) -> Self {
        if !self.result.has_failed_index() {
            self.failed_index = -1;
        }
        self
    }

    /// Strips `output` and `expected` from challenge responses unless the
    /// caller asked for sample mode. Ad-hoc runs pass through untouched.
    pub fn sanitize(mut self, req: &RunRequest) -> Self {
        if req.challenge().is_none() {
            return self;
        }
        if req.resolved_mode() != Mode::Sample {
            self.output.clear();
            self.expected.clear();
        }
        self
    }
}

/// One test case as stored per challenge and as shipped to the Go helper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,

    #[serde(default)]
    pub is_sample: bool,
}

/// Visible input/output pair of `GET /challenge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePair {
    pub input: String,
    pub output: String,
}

/// Body of `GET /challenge?name=...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeMeta {
    pub name: String,
    pub description: String,
    pub samples: Vec<SamplePair>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> RunResponse {
        RunResponse {
            result: Verdict::WrongAnswer,
            output: "1".to_owned(),
            duration_ms: 12,
            failed_index: 0,
            expected: "2".to_owned(),
        }
    }

    #[test]
    fn judge_mode_hides_outputs() {
        let req = RunRequest {
            challenge: "sum".to_owned(),
            mode: "judge".to_owned(),
            ..RunRequest::default()
        };
        let resp = response().sanitize(&req);
        assert_eq!(resp.result, Verdict::WrongAnswer);
        assert!(resp.output.is_empty());
        assert!(resp.expected.is_empty());
        assert_eq!(resp.failed_index, 0);
    }

    #[test]
    fn sample_mode_reveals_outputs() {
        let req = RunRequest {
            challenge: "sum".to_owned(),
            mode: "sample".to_owned(),
            ..RunRequest::default()
        };
        let resp = response().sanitize(&req);
        assert_eq!(resp.output, "1");
        assert_eq!(resp.expected, "2");
    }

    #[test]
    fn adhoc_runs_are_untouched() {
        let req = RunRequest::default();
        let resp = response().sanitize(&req);
        assert_eq!(resp.output, "1");
        assert_eq!(resp.expected, "2");
    }

    #[test]
    fn failed_index_normalization() {
        let resp = RunResponse {
            result: Verdict::CompileError,
            failed_index: 0,
            ..RunResponse::verdict(Verdict::CompileError)
        };
        assert_eq!(resp.normalize_failed_index().failed_index, -1);

        let resp = RunResponse {
            failed_index: 3,
            ..RunResponse::verdict(Verdict::TimeLimitExceeded)
        };
        assert_eq!(resp.normalize_failed_index().failed_index, 3);
    }

    #[test]
    fn failed_index_is_always_serialized() {
        let body = serde_json::to_string(&RunResponse::verdict(Verdict::Success)).unwrap();
        assert!(body.contains("\"failed_index\":-1"));
        assert!(!body.contains("\"output\""));
    }

    #[test]
    fn missing_failed_index_defaults_to_minus_one() {
        let resp: RunResponse = serde_json::from_str(r#"{"result":"Success"}"#).unwrap();
        assert_eq!(resp.failed_index, -1);
    }

    #[test]
    fn minimal_request_body_deserializes() {
        let req: RunRequest =
            serde_json::from_str(r#"{"language":"python","code":"print(1)"}"#).unwrap();
        assert_eq!(req.language, "python");
        assert!(req.challenge().is_none());
        assert_eq!(req.resolved_mode(), Mode::Single);
        assert_eq!(req.sandbox_variant(), Some(SandboxVariant::Default));
    }

    #[test]
    fn whitespace_challenge_counts_as_absent() {
        let req = RunRequest {
            challenge: "   ".to_owned(),
            ..RunRequest::default()
        };
        assert!(req.challenge().is_none());
        assert_eq!(req.resolved_mode(), Mode::Single);
    }
}
