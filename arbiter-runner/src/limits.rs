//! Per-run rlimit vectors. Compile and run phases carry different budgets;
//! both can be overridden through `RUN_LIMIT_*` variables, re-read on every
//! request.

use crate::config::{env_u64, env_usize};

use arbiter_sandbox::RLimits;
use arbiter_utils::math::roundup_div;

const MIB: u64 = 1024 * 1024;

pub fn output_limit() -> usize {
    env_usize("RUN_LIMIT_OUTPUT_BYTES", 65_536)
}

pub fn compile_limits(output_limit: usize) -> RLimits {
    RLimits {
        cpu_secs: env_u64("RUN_LIMIT_COMPILE_CPU_SEC", 15),
        as_bytes: env_u64("RUN_LIMIT_COMPILE_AS_MB", 512) * MIB,
        fsize_bytes: env_u64("RUN_LIMIT_COMPILE_FSIZE_MB", 64) * MIB,
        nproc: env_u64("RUN_LIMIT_COMPILE_NPROC", 128) as u32,
        nofile: env_u64("RUN_LIMIT_COMPILE_NOFILE", 512) as u32,
        output_limit,
    }
}

/// Run-phase limits. CPU is derived from the per-test deadline unless pinned
/// by the environment; `default_as_mb` differs per language (Go binaries get
/// a larger address space).
pub fn run_limits(
    exec_limit_ms: u64,
    global_limit_ms: u64,
    output_limit: usize,
    default_as_mb: u64,
) -> RLimits {
    RLimits {
        cpu_secs: env_u64(
            "RUN_LIMIT_CPU_SEC",
            exec_cpu_secs(exec_limit_ms, global_limit_ms),
        ),
        as_bytes: env_u64("RUN_LIMIT_AS_MB", default_as_mb) * MIB,
        fsize_bytes: env_u64("RUN_LIMIT_FSIZE_MB", 16) * MIB,
        nproc: env_u64("RUN_LIMIT_NPROC", 64) as u32,
        nofile: env_u64("RUN_LIMIT_NOFILE", 128) as u32,
        output_limit,
    }
}

/// CPU seconds for one test: the deadline rounded up plus one second of
/// grace, clamped by the whole-evaluation budget.
pub fn exec_cpu_secs(exec_limit_ms: u64, global_limit_ms: u64) -> u64 {
    let mut cpu = roundup_div(exec_limit_ms, 1000) + 1;
    let max_cpu = global_limit_ms / 1000;
    if max_cpu > 0 && cpu > max_cpu {
        cpu = max_cpu;
    }
    cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_derivation_rounds_up_and_clamps() {
        assert_eq!(exec_cpu_secs(1000, 5000), 2);
        assert_eq!(exec_cpu_secs(1001, 5000), 3);
        assert_eq!(exec_cpu_secs(1000, 1000), 1);
        assert_eq!(exec_cpu_secs(9000, 5000), 5);
        // a sub-second global budget cannot clamp
        assert_eq!(exec_cpu_secs(1000, 500), 2);
    }

    #[test]
    fn compile_defaults() {
        let lim = compile_limits(65_536);
        assert_eq!(lim.cpu_secs, 15);
        assert_eq!(lim.as_bytes, 512 * MIB);
        assert_eq!(lim.fsize_bytes, 64 * MIB);
        assert_eq!(lim.nproc, 128);
        assert_eq!(lim.nofile, 512);
        assert_eq!(lim.output_limit, 65_536);
    }

    #[test]
    fn run_defaults_differ_by_language_budget() {
        let c = run_limits(1000, 5000, 65_536, 256);
        assert_eq!(c.cpu_secs, 2);
        assert_eq!(c.as_bytes, 256 * MIB);
        assert_eq!(c.fsize_bytes, 16 * MIB);

        let go = run_limits(1000, 30_000, 65_536, 1024);
        assert_eq!(go.as_bytes, 1024 * MIB);
        assert_eq!(go.nproc, 64);
        assert_eq!(go.nofile, 128);
    }
}
