#![deny(clippy::all)]

//! The submission dispatcher: claims pending submissions from the store in
//! FIFO order under row locks, judges them through the runner service, and
//! writes verdicts (and first solves) back.

pub mod config;
pub mod runner_client;
pub mod worker;

pub use self::config::Config;
