//! Built-in challenges, embedded at build time and upserted at startup.

use anyhow::Result;
use serde::Deserialize;

pub const EMBEDDED_CHALLENGES: &str = include_str!("../challenges.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTest {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub sample: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedChallenge {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub tests: Vec<SeedTest>,
}

/// The reshaped form that lands in the store: explicit sample rows plus the
/// full judge sequence.
#[derive(Debug, PartialEq, Eq)]
pub struct DerivedCases {
    pub name: String,
    pub description: String,
    pub points: i32,
    pub samples: Vec<DerivedCase>,
    pub judges: Vec<DerivedCase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedCase {
    pub input: String,
    pub output: String,
}

pub fn parse_seed_challenges(data: &str) -> Result<Vec<SeedChallenge>> {
    let data = data.trim();
    anyhow::ensure!(!data.is_empty(), "seed data is empty");
    let items: Vec<SeedChallenge> = serde_yaml::from_str(data)?;
    Ok(items)
}

impl SeedChallenge {
    /// Reshapes the test list: trailing CR/LF stripped, all-blank cases
    /// dropped, marked samples promoted into the sample table (the first
    /// test stands in when nothing is marked), and every case copied into
    /// the judge sequence when no hidden cases exist.
    pub fn derive_cases(&self) -> Result<DerivedCases> {
        let name = self.name.trim();
        anyhow::ensure!(!name.is_empty(), "challenge name is empty");
        let description = self.description.trim();
        anyhow::ensure!(!description.is_empty(), "challenge description is empty");
        let points = if self.points > 0 { self.points } else { 100 };

        let mut samples = Vec::new();
        let mut judges = Vec::new();
        for t in &self.tests {
            let case = DerivedCase {
                input: trim_case(&t.input),
                output: trim_case(&t.output),
            };
            if case.input.trim().is_empty() && case.output.trim().is_empty() {
                continue;
            }
            if t.sample {
                samples.push(case);
            } else {
                judges.push(case);
            }
        }

        if samples.is_empty() {
            if let Some(first) = self.tests.first() {
                samples.push(DerivedCase {
                    input: trim_case(&first.input),
                    output: trim_case(&first.output),
                });
            }
        }
        if judges.is_empty() {
            judges = self
                .tests
                .iter()
                .map(|t| DerivedCase {
                    input: trim_case(&t.input),
                    output: trim_case(&t.output),
                })
                .collect();
        }

        Ok(DerivedCases {
            name: name.to_owned(),
            description: description.to_owned(),
            points,
            samples,
            judges,
        })
    }
}

fn trim_case(s: &str) -> String {
    s.trim_end_matches(['\r', '\n']).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(tests: Vec<SeedTest>) -> SeedChallenge {
        SeedChallenge {
            name: "sum".to_owned(),
            description: "add two numbers".to_owned(),
            points: 0,
            tests,
        }
    }

    fn test(input: &str, output: &str, sample: bool) -> SeedTest {
        SeedTest {
            input: input.to_owned(),
            output: output.to_owned(),
            sample,
        }
    }

    #[test]
    fn embedded_seed_data_parses() {
        let seeds = parse_seed_challenges(EMBEDDED_CHALLENGES).unwrap();
        assert!(!seeds.is_empty());
        for seed in &seeds {
            let derived = seed.derive_cases().unwrap();
            assert!(!derived.samples.is_empty());
            assert!(!derived.judges.is_empty());
        }
    }

    #[test]
    fn marked_samples_are_promoted() {
        let derived = seed(vec![
            test("1 2\n", "3\n", true),
            test("5 7", "12", false),
        ])
        .derive_cases()
        .unwrap();
        assert_eq!(derived.samples.len(), 1);
        assert_eq!(derived.samples[0].input, "1 2");
        assert_eq!(derived.judges.len(), 1);
        assert_eq!(derived.judges[0].output, "12");
        assert_eq!(derived.points, 100);
    }

    #[test]
    fn first_test_stands_in_when_nothing_is_marked() {
        let derived = seed(vec![test("a", "b", false), test("c", "d", false)])
            .derive_cases()
            .unwrap();
        assert_eq!(derived.samples.len(), 1);
        assert_eq!(derived.samples[0].input, "a");
        assert_eq!(derived.judges.len(), 2);
    }

    #[test]
    fn all_sample_tests_still_fill_the_judge_sequence() {
        let derived = seed(vec![test("a", "b", true), test("c", "d", true)])
            .derive_cases()
            .unwrap();
        assert_eq!(derived.samples.len(), 2);
        assert_eq!(derived.judges.len(), 2);
    }

    #[test]
    fn blank_cases_are_dropped() {
        let derived = seed(vec![test("\r\n", "\n", false), test("x", "y", false)])
            .derive_cases()
            .unwrap();
        assert_eq!(derived.judges.len(), 1);
        assert_eq!(derived.judges[0].input, "x");
    }

    #[test]
    fn derivation_is_idempotent() {
        let challenge = seed(vec![test("1 2\n", "3\r\n", true), test("5 7", "12", false)]);
        let once = challenge.derive_cases().unwrap();
        let twice = challenge.derive_cases().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn blank_name_or_description_is_rejected() {
        let mut challenge = seed(vec![test("a", "b", false)]);
        challenge.name = "  ".to_owned();
        assert!(challenge.derive_cases().is_err());
    }
}
