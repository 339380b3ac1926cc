//! Challenge/test-case access. The runner connects with a read-only role;
//! the startup seeding path is the single write it performs.

use crate::seed::SeedChallenge;

use arbiter_protocol::{ChallengeMeta, Mode, SamplePair, TestCase};

use anyhow::{Context as _, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Store> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Store { pool })
    }

    /// Test cases for one evaluation. Sample mode returns only the sample
    /// cases (falling back to the first hidden case so every challenge has
    /// something visible); judge mode returns samples followed by hidden
    /// cases, each ordered by `idx`.
    pub async fn runner_tests(&self, challenge: &str, mode: Mode) -> Result<Vec<TestCase>> {
        let mut tests = self.sample_cases(challenge).await?;

        if mode == Mode::Sample {
            if tests.is_empty() {
                if let Some(first) = self.first_judge_case(challenge).await? {
                    tests.push(first);
                }
            }
            return Ok(tests);
        }

        let rows = sqlx::query(
            "SELECT input, output FROM judge_cases WHERE challenge = $1 ORDER BY idx ASC",
        )
        .bind(challenge)
        .fetch_all(&self.pool)
        .await
        .context("failed to query judge cases")?;
        for row in rows {
            tests.push(TestCase {
                input: row.get(0),
                output: row.get(1),
                is_sample: false,
            });
        }
        Ok(tests)
    }

    /// Description plus visible samples; `None` for unknown names.
    pub async fn challenge_meta(&self, name: &str) -> Result<Option<ChallengeMeta>> {
        let description: Option<String> =
            sqlx::query_scalar("SELECT description FROM challenges WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .context("failed to query challenge")?;
        let Some(description) = description else {
            return Ok(None);
        };

        let mut samples: Vec<SamplePair> = self
            .sample_cases(name)
            .await?
            .into_iter()
            .map(|tc| SamplePair {
                input: tc.input,
                output: tc.output,
            })
            .collect();
        if samples.is_empty() {
            if let Some(first) = self.first_judge_case(name).await? {
                samples.push(SamplePair {
                    input: first.input,
                    output: first.output,
                });
            }
        }

        Ok(Some(ChallengeMeta {
            name: name.to_owned(),
            description,
            samples,
        }))
    }

    async fn sample_cases(&self, challenge: &str) -> Result<Vec<TestCase>> {
        let rows = sqlx::query(
            "SELECT input, output FROM sample_cases WHERE challenge = $1 ORDER BY idx ASC",
        )
        .bind(challenge)
        .fetch_all(&self.pool)
        .await
        .context("failed to query sample cases")?;
        Ok(rows
            .into_iter()
            .map(|row| TestCase {
                input: row.get(0),
                output: row.get(1),
                is_sample: true,
            })
            .collect())
    }

    async fn first_judge_case(&self, challenge: &str) -> Result<Option<TestCase>> {
        let row = sqlx::query(
            "SELECT input, output FROM judge_cases WHERE challenge = $1 ORDER BY idx ASC LIMIT 1",
        )
        .bind(challenge)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query first judge case")?;
        Ok(row.map(|row| TestCase {
            input: row.get(0),
            output: row.get(1),
            is_sample: true,
        }))
    }

    /// Replaces the stored cases of every seed challenge in one transaction.
    /// Seeding the same data twice leaves the tables unchanged.
    pub async fn seed_challenges(&self, seeds: &[SeedChallenge]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin seed tx")?;

        for seed in seeds {
            let derived = seed.derive_cases()?;

            sqlx::query(
                "INSERT INTO challenges (name, description, points, is_public) \
                 VALUES ($1, $2, $3, TRUE) \
                 ON CONFLICT (name) DO UPDATE SET \
                   description = EXCLUDED.description, \
                   points = EXCLUDED.points, \
                   is_public = EXCLUDED.is_public",
            )
            .bind(&derived.name)
            .bind(&derived.description)
            .bind(derived.points)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to upsert challenge {}", derived.name))?;

            sqlx::query("DELETE FROM sample_cases WHERE challenge = $1")
                .bind(&derived.name)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM judge_cases WHERE challenge = $1")
                .bind(&derived.name)
                .execute(&mut *tx)
                .await?;

            for (idx, case) in derived.samples.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO sample_cases (challenge, idx, input, output) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(&derived.name)
                .bind(idx as i32)
                .bind(&case.input)
                .bind(&case.output)
                .execute(&mut *tx)
                .await?;
            }
            for (idx, case) in derived.judges.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO judge_cases (challenge, idx, input, output) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(&derived.name)
                .bind(idx as i32)
                .bind(&case.input)
                .bind(&case.output)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await.context("failed to commit seed tx")?;
        info!(count = seeds.len(), "loaded built-in challenges");
        Ok(())
    }
}
