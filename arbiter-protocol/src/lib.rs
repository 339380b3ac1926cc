#![deny(clippy::all)]

//! Wire types shared between the runner service, the Go helper process and
//! the submission dispatcher.

mod common;
mod verdict;

pub use self::common::{ChallengeMeta, RunRequest, RunResponse, SamplePair, TestCase};
pub use self::verdict::{Language, Mode, SandboxVariant, Verdict};
