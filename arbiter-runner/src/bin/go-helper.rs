//! Out-of-process Go execution helper. Reads the source and the JSON test
//! manifest from disk, compiles and judges inside its own pair of
//! sandboxes, and prints exactly one JSON verdict on stdout.

use arbiter_runner::gohelper::{self, HelperPayload, HelperRequest};

use arbiter_protocol::{RunResponse, Verdict};
use arbiter_utils::tracing::setup_tracing;

use std::fs;
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "go-helper")]
struct Opt {
    /// Execution mode (judge/sample/single); the manifest's mode is the
    /// fallback.
    #[structopt(long)]
    mode: Option<String>,

    /// Global timeout in milliseconds (0 = environment default).
    #[structopt(long, default_value = "0")]
    global_timeout: u64,

    /// Output capture limit in bytes (0 = environment default).
    #[structopt(long, default_value = "0")]
    output_limit: usize,

    /// Path to the Go source file.
    #[structopt(long)]
    code_file: Option<PathBuf>,

    /// Path to the JSON test manifest.
    #[structopt(long)]
    tests_file: Option<PathBuf>,

    /// Sandbox environments root.
    #[structopt(long, default_value = "")]
    sandbox_env: String,
}

#[tokio::main]
async fn main() {
    setup_tracing();
    let opt = Opt::from_args();

    let (Some(code_file), Some(tests_file)) = (&opt.code_file, &opt.tests_file) else {
        fatal_json("missing --code-file or --tests-file");
    };

    let code = match fs::read_to_string(code_file) {
        Ok(code) => code,
        Err(err) => fatal_json(&format!("failed to read code file: {err}")),
    };
    let manifest = match fs::read(tests_file) {
        Ok(data) => data,
        Err(err) => fatal_json(&format!("failed to read tests file: {err}")),
    };
    let payload: HelperPayload = match serde_json::from_slice(&manifest) {
        Ok(payload) => payload,
        Err(err) => fatal_json(&format!("failed to decode tests: {err}")),
    };
    if payload.tests.is_empty() {
        fatal_json("no tests provided");
    }

    let mode = match opt.mode.as_deref() {
        Some(mode) if !mode.is_empty() => mode.to_owned(),
        _ => payload.mode.clone(),
    };
    let req = HelperRequest {
        code,
        mode,
        global_timeout_ms: opt.global_timeout,
        output_limit: opt.output_limit,
        sandbox_env: opt.sandbox_env,
        tests: payload.tests,
    };

    let resp = gohelper::execute(req).await;
    match serde_json::to_string(&resp) {
        Ok(body) => println!("{body}"),
        Err(err) => {
            eprintln!("go helper: failed to encode response: {err}");
            process::exit(1);
        }
    }
}

fn fatal_json(msg: &str) -> ! {
    eprintln!("go helper: {msg}");
    let resp = RunResponse {
        output: msg.to_owned(),
        ..RunResponse::verdict(Verdict::InternalError)
    };
    if let Ok(body) = serde_json::to_string(&resp) {
        println!("{body}");
    }
    process::exit(1);
}
