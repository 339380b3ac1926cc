//! The claim/judge/write-back loop. Workers compete for `Pending` rows via
//! `FOR UPDATE SKIP LOCKED`, which guarantees at-most-once assignment; the
//! `result = 'Pending'` guard on the transition to `Running` keeps a row
//! from being claimed twice even under lock escalation.

use crate::runner_client::RunnerClient;

use arbiter_protocol::{Language, RunResponse, Verdict};

use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::time::sleep;
use tracing::{error, info, warn};

const IDLE_SLEEP: Duration = Duration::from_millis(200);
const ERROR_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PendingJob {
    pub id: i64,
    pub user_id: i64,
    pub challenge: String,
    pub language: String,
    pub code: String,
}

/// What gets written back to the submission row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeOutcome {
    pub result: Verdict,
    pub duration_ms: i64,
    pub failed_index: i32,
    pub last_output: String,
    pub expected: String,
}

pub async fn worker_loop(worker_id: usize, pool: PgPool, client: RunnerClient) {
    info!(worker_id, "submission worker started");
    loop {
        let job = match claim_next_pending(&pool).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                sleep(IDLE_SLEEP).await;
                continue;
            }
            Err(err) => {
                error!(worker_id, %err, "claim failed");
                sleep(ERROR_SLEEP).await;
                continue;
            }
        };

        let outcome = judge_submission(&client, &job).await;
        if let Err(err) = write_outcome(&pool, job.id, &outcome).await {
            error!(worker_id, submission = job.id, %err, "failed to update submission");
        }
        if outcome.result == Verdict::Success {
            if let Err(err) = ensure_solve(&pool, job.user_id, &job.challenge).await {
                warn!(worker_id, submission = job.id, %err, "failed to record solve");
            }
        }
    }
}

/// Atomically claims the oldest pending submission and marks it running.
pub async fn claim_next_pending(pool: &PgPool) -> Result<Option<PendingJob>> {
    let mut tx = pool.begin().await.context("failed to begin claim tx")?;

    let row = sqlx::query(
        "SELECT id, user_id, challenge, language, code \
         FROM submissions \
         WHERE result = 'Pending' \
         ORDER BY created_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .fetch_optional(&mut *tx)
    .await
    .context("failed to select pending submission")?;
    let Some(row) = row else {
        return Ok(None);
    };

    let job = PendingJob {
        id: row.get(0),
        user_id: row.get(1),
        challenge: row.get(2),
        language: row.get(3),
        code: row.get(4),
    };

    sqlx::query("UPDATE submissions SET result = 'Running' WHERE id = $1 AND result = 'Pending'")
        .bind(job.id)
        .execute(&mut *tx)
        .await
        .context("failed to mark submission running")?;
    tx.commit().await.context("failed to commit claim tx")?;

    Ok(Some(job))
}

async fn judge_submission(client: &RunnerClient, job: &PendingJob) -> JudgeOutcome {
    let Some(language) = Language::normalize(&job.language) else {
        warn!(submission = job.id, language = %job.language, "unsupported language");
        return JudgeOutcome {
            result: Verdict::UnsupportedLanguage,
            duration_ms: 0,
            failed_index: -1,
            last_output: String::new(),
            expected: String::new(),
        };
    };

    match client.judge(language, &job.challenge, &job.code).await {
        Ok(resp) => outcome_from_response(resp),
        Err(err) => {
            error!(submission = job.id, %err, "runner call failed");
            transport_failure()
        }
    }
}

/// Runner transport or decode failures count against the submission as a
/// runtime error with zeroed metadata.
pub fn transport_failure() -> JudgeOutcome {
    JudgeOutcome {
        result: Verdict::RuntimeError,
        duration_ms: 0,
        failed_index: -1,
        last_output: String::new(),
        expected: String::new(),
    }
}

pub fn outcome_from_response(resp: RunResponse) -> JudgeOutcome {
    let resp = resp.normalize_failed_index();
    JudgeOutcome {
        result: resp.result,
        duration_ms: resp.duration_ms as i64,
        failed_index: resp.failed_index,
        last_output: resp.output,
        expected: resp.expected,
    }
}

async fn write_outcome(pool: &PgPool, id: i64, outcome: &JudgeOutcome) -> Result<()> {
    sqlx::query(
        "UPDATE submissions \
         SET result = $1, duration_ms = $2, fail_case_index = $3, \
             last_output = $4, expected_output = $5 \
         WHERE id = $6",
    )
    .bind(outcome.result.as_str())
    .bind(outcome.duration_ms)
    .bind(outcome.failed_index)
    .bind(&outcome.last_output)
    .bind(&outcome.expected)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records a first solve; repeats are absorbed by the unique constraint.
async fn ensure_solve(pool: &PgPool, user_id: i64, challenge: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO solves (user_id, challenge, created_at) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, challenge) DO NOTHING",
    )
    .bind(user_id)
    .bind(challenge)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_map_onto_row_updates() {
        let resp = RunResponse {
            result: Verdict::WrongAnswer,
            output: "1".to_owned(),
            duration_ms: 37,
            failed_index: 2,
            expected: "2".to_owned(),
        };
        let outcome = outcome_from_response(resp);
        assert_eq!(outcome.result, Verdict::WrongAnswer);
        assert_eq!(outcome.duration_ms, 37);
        assert_eq!(outcome.failed_index, 2);
        assert_eq!(outcome.last_output, "1");
        assert_eq!(outcome.expected, "2");
    }

    #[test]
    fn failed_index_is_scrubbed_for_terminal_success() {
        let resp = RunResponse {
            failed_index: 0,
            ..RunResponse::verdict(Verdict::Success)
        };
        assert_eq!(outcome_from_response(resp).failed_index, -1);

        let resp = RunResponse {
            failed_index: 0,
            ..RunResponse::verdict(Verdict::CompileError)
        };
        assert_eq!(outcome_from_response(resp).failed_index, -1);
    }

    #[test]
    fn transport_failures_zero_the_metadata() {
        let outcome = transport_failure();
        assert_eq!(outcome.result, Verdict::RuntimeError);
        assert_eq!(outcome.duration_ms, 0);
        assert_eq!(outcome.failed_index, -1);
        assert!(outcome.last_output.is_empty());
    }
}
