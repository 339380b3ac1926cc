use arbiter_protocol::{Language, RunRequest, RunResponse};

use std::time::Duration;

use anyhow::{Context as _, Result};

/// HTTP client for the runner service.
#[derive(Clone)]
pub struct RunnerClient {
    http: reqwest::Client,
    base_url: String,
}

impl RunnerClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<RunnerClient> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build runner http client")?;
        Ok(RunnerClient {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Judges one submission against the full test set.
    pub async fn judge(
        &self,
        language: Language,
        challenge: &str,
        code: &str,
    ) -> Result<RunResponse> {
        let req = RunRequest {
            language: language.as_str().to_owned(),
            code: code.to_owned(),
            challenge: challenge.to_owned(),
            mode: "judge".to_owned(),
            ..RunRequest::default()
        };
        let resp = self
            .http
            .post(format!("{}/run", self.base_url))
            .json(&req)
            .send()
            .await
            .context("runner request failed")?;
        let resp: RunResponse = resp.json().await.context("runner response decode failed")?;
        Ok(resp)
    }
}
