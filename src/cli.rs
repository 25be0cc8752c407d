// cli.rs -- Process-level contract, without the process.
//
// `run_cli` owns everything between argv and the exit status: parsing,
// usage errors, backend selection, the run itself, and the PASSED/FAILED
// report. It writes to caller-supplied sinks and builds the accelerator
// through a caller-supplied `Connect`, so tests can drive it with the
// emulator and capture every byte of output.
//
// Exit status:
//   SUCCESS -- the run completed and verified
//   FAILURE -- usage error, configuration error, runtime error, or mismatch
//
// On a usage error the connector is never called: no device is touched.

use std::io::Write;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use crate::config::{self, Args, BackendChoice, ConfigError};
use crate::harness::{self, HarnessConfig, HarnessError, RunReport, Stage};
use crate::verify::Verdict;

/// How the process should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliStatus {
    Success,
    Failure,
}

impl From<CliStatus> for ExitCode {
    fn from(status: CliStatus) -> Self {
        match status {
            CliStatus::Success => ExitCode::SUCCESS,
            CliStatus::Failure => ExitCode::FAILURE,
        }
    }
}

/// Builds and runs the accelerator for a resolved backend.
///
/// Implementations pick a concrete `Accelerator`, call [`harness::run`] on
/// it and hand back the outcome. `main.rs` maps each `BackendChoice` to a
/// real runtime; tests plug in the emulator.
pub trait Connect {
    fn connect_and_run(
        &mut self,
        backend: BackendChoice,
        config: &HarnessConfig,
    ) -> Result<RunReport, HarnessError>;
}

impl<F> Connect for F
where
    F: FnMut(BackendChoice, &HarnessConfig) -> Result<RunReport, HarnessError>,
{
    fn connect_and_run(
        &mut self,
        backend: BackendChoice,
        config: &HarnessConfig,
    ) -> Result<RunReport, HarnessError> {
        self(backend, config)
    }
}

/// Run the harness as the binary would.
///
/// `args` includes the program name. Results go to `out`; diagnostics go to
/// `err`.
pub fn run_cli<I, T>(
    args: I,
    out: &mut dyn Write,
    err: &mut dyn Write,
    connect: &mut dyn Connect,
) -> CliStatus
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    // Write failures on the report sinks are not actionable; the exit
    // status still carries the outcome.
    let args = match Args::try_parse_from(args) {
        Ok(args) => args,
        Err(e) => return usage_error(e, out, err),
    };

    let config = match HarnessConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            let _ = writeln!(err, "Error: {e}");
            let _ = writeln!(out, "{}", Args::command().render_usage());
            return CliStatus::Failure;
        }
    };

    let backend = match config::resolve_backend(&config) {
        Ok(backend) => backend,
        // An unreadable image is the same failure `load_kernel` would report.
        Err(ConfigError::Image(source)) => {
            let e = HarnessError::Runtime { stage: Stage::LoadKernel, source };
            let _ = writeln!(err, "Error: {e}");
            let _ = writeln!(out, "TEST FAILED");
            return CliStatus::Failure;
        }
        Err(e) => {
            let _ = writeln!(err, "Error: {e}");
            return CliStatus::Failure;
        }
    };
    log::info!("backend: {backend}");

    match connect.connect_and_run(backend, &config) {
        Ok(report) => report_outcome(&report, out),
        Err(e) => {
            let _ = writeln!(err, "Error: {e}");
            let _ = writeln!(out, "TEST FAILED");
            CliStatus::Failure
        }
    }
}

fn usage_error(e: clap::Error, out: &mut dyn Write, err: &mut dyn Write) -> CliStatus {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = write!(out, "{e}");
            CliStatus::Success
        }
        _ => {
            log::debug!("argument error: {:?}", e.kind());
            let _ = write!(err, "{e}");
            let _ = writeln!(out, "{}", Args::command().render_usage());
            CliStatus::Failure
        }
    }
}

fn report_outcome(report: &RunReport, out: &mut dyn Write) -> CliStatus {
    if let Verdict::Failed(mismatch) = report.verdict {
        let _ = writeln!(out, "Error: Result mismatch");
        let _ = writeln!(out, "{mismatch}");
    }
    let _ = writeln!(out, "TEST {}", report.verdict);
    log::debug!("total time {:?}", report.timings.total());
    if report.passed() {
        CliStatus::Success
    } else {
        CliStatus::Failure
    }
}

/// The stock [`Connect`]: build the runtime named by `backend` and run.
pub fn default_connect(
    backend: BackendChoice,
    config: &HarnessConfig,
) -> Result<RunReport, HarnessError> {
    match backend {
        BackendChoice::Emu => harness::run(&mut crate::emu::Emulator::new(), config),
        BackendChoice::Wgpu => harness::run(&mut crate::gpu::GpuAccelerator::new(), config),
        BackendChoice::Opencl => run_opencl(config),
        // resolve_backend never yields Auto.
        BackendChoice::Auto => Err(HarnessError::Runtime {
            stage: Stage::SelectDevice,
            source: crate::runtime::RuntimeError::NoDevice,
        }),
    }
}

#[cfg(feature = "opencl")]
fn run_opencl(config: &HarnessConfig) -> Result<RunReport, HarnessError> {
    harness::run(&mut crate::opencl::OpenClAccelerator::new(), config)
}

#[cfg(not(feature = "opencl"))]
fn run_opencl(_config: &HarnessConfig) -> Result<RunReport, HarnessError> {
    Err(HarnessError::Runtime {
        stage: Stage::SelectDevice,
        source: crate::runtime::RuntimeError::backend(
            "opencl",
            "this build has no OpenCL support; rebuild with `--features opencl`",
        ),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn never_connect(_: BackendChoice, _: &HarnessConfig) -> Result<RunReport, HarnessError> {
        panic!("connector must not be called");
    }

    #[test]
    fn test_missing_argument_prints_usage() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = run_cli(["vadd-harness"], &mut out, &mut err, &mut never_connect);
        assert_eq!(code, CliStatus::Failure);
        assert!(String::from_utf8_lossy(&out).contains("Usage: vadd-harness"));
    }

    #[test]
    fn test_help_succeeds() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = run_cli(["vadd-harness", "--help"], &mut out, &mut err, &mut never_connect);
        assert_eq!(code, CliStatus::Success);
        assert!(String::from_utf8_lossy(&out).contains("--kernel"));
    }

    #[test]
    #[cfg(not(feature = "opencl"))]
    fn test_opencl_without_feature_is_an_error() {
        let config = HarnessConfig::new("vadd.xclbin");
        let err = default_connect(BackendChoice::Opencl, &config).unwrap_err();
        assert!(err.to_string().contains("--features opencl"));
    }
}
