// main.rs -- vadd-harness binary.
//
// USAGE
//   vadd-harness <xclbin>
//   vadd-harness kernels/krnl_vadd.wgsl
//   vadd-harness --backend emu any-file
//
// Logging goes to stderr; set RUST_LOG=debug for adapter lists and
// per-stage timings.

use std::io;
use std::process::ExitCode;

use vadd_harness::cli;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut connect = cli::default_connect;
    cli::run_cli(
        std::env::args_os(),
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
        &mut connect,
    )
    .into()
}
