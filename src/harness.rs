// harness.rs -- The verification run.
//
// One straight-line, blocking sequence against any `Accelerator`:
//
//   1. populate A = B = 0..N
//   2. select device
//   3. load kernel from the image
//   4. create device buffers, migrate A and B in ONE batch
//   5. bind (A, B, Result, N) positionally
//   6. run, wait
//   7. migrate Result back, wait
//   8. compare against A + B, stop at the first mismatch
//   9. report
//
// A collaborator failure at any step aborts the run immediately; the error
// carries the `Stage` it happened in so the CLI can say where it died.
// There is no retry anywhere.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::buffer::{BufferAccess, Element, InputBuffer, ResultBuffer};
use crate::config::BackendChoice;
use crate::runtime::{Accelerator, KernelArg, RuntimeError, SelectedDevice};
use crate::verify::{self, Verdict};

/// Kernel name compiled into the reference image.
pub const DEFAULT_KERNEL: &str = "krnl_vadd";

/// Element count of each vector.
pub const DEFAULT_LEN: usize = 4096;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything one run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Hardware image passed to the runtime's loader.
    pub image: PathBuf,
    pub kernel_name: String,
    /// Elements per vector. Also passed to the kernel as its size argument.
    pub len: usize,
    pub backend: BackendChoice,
}

impl HarnessConfig {
    /// The defaults for `image`: `krnl_vadd`, 4096 elements, backend chosen
    /// from the image.
    pub fn new(image: impl Into<PathBuf>) -> Self {
        HarnessConfig {
            image: image.into(),
            kernel_name: DEFAULT_KERNEL.to_string(),
            len: DEFAULT_LEN,
            backend: BackendChoice::Auto,
        }
    }
}

// ---------------------------------------------------------------------------
// Stages and errors
// ---------------------------------------------------------------------------

/// Steps of the run that talk to the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SelectDevice,
    LoadKernel,
    CreateBuffers,
    MigrateToDevice,
    Run,
    MigrateToHost,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::SelectDevice => "device selection",
            Stage::LoadKernel => "kernel load",
            Stage::CreateBuffers => "buffer allocation",
            Stage::MigrateToDevice => "host-to-device migration",
            Stage::Run => "kernel execution",
            Stage::MigrateToHost => "device-to-host migration",
        };
        f.write_str(s)
    }
}

/// A run aborted by the accelerator runtime.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("{stage}: {source}")]
    Runtime {
        stage: Stage,
        #[source]
        source: RuntimeError,
    },

    /// The size argument does not fit the kernel's 32-bit signed scalar.
    #[error("vector length {0} does not fit a 32-bit kernel argument")]
    LengthTooLarge(usize),
}

impl HarnessError {
    /// The stage that failed, if the runtime was involved.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            HarnessError::Runtime { stage, .. } => Some(*stage),
            HarnessError::LengthTooLarge(_) => None,
        }
    }
}

/// Attach a stage to a runtime result.
trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, HarnessError>;
}

impl<T> AtStage<T> for Result<T, RuntimeError> {
    fn at(self, stage: Stage) -> Result<T, HarnessError> {
        self.map_err(|source| HarnessError::Runtime { stage, source })
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Wall time spent in each blocking stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub select_device: Duration,
    pub load_kernel: Duration,
    pub migrate_to_device: Duration,
    pub run: Duration,
    pub migrate_to_host: Duration,
    pub verify: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.select_device
            + self.load_kernel
            + self.migrate_to_device
            + self.run
            + self.migrate_to_host
            + self.verify
    }
}

/// Result of a run that reached verification.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub device: SelectedDevice,
    pub verdict: Verdict,
    pub timings: StageTimings,
    /// What the device returned.
    pub result: ResultBuffer,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

// ---------------------------------------------------------------------------
// The run
// ---------------------------------------------------------------------------

/// Execute the nine-step verification against `acc`.
///
/// Returns `Ok` whenever the device produced a result, even a wrong one;
/// check [`RunReport::verdict`]. Returns `Err` only when the runtime itself
/// failed.
pub fn run<A: Accelerator>(acc: &mut A, config: &HarnessConfig) -> Result<RunReport, HarnessError> {
    let n = config.len;
    let n_arg = Element::try_from(n).map_err(|_| HarnessError::LengthTooLarge(n))?;
    let mut timings = StageTimings::default();

    // 1. Inputs.
    let a = InputBuffer::sequence(n);
    let b = InputBuffer::sequence(n);
    let mut result = ResultBuffer::zeroed(n);

    // 2. Device.
    log::info!("selecting accelerator device");
    let t = Instant::now();
    let device = acc.select_device().at(Stage::SelectDevice)?;
    timings.select_device = t.elapsed();
    log::info!("device: {device}");
    for candidate in &device.candidates {
        log::debug!("  candidate: {candidate}");
    }

    // 3. Kernel.
    log::info!("loading kernel `{}` from {}", config.kernel_name, config.image.display());
    let t = Instant::now();
    let kernel = acc
        .load_kernel(&config.kernel_name, &config.image)
        .at(Stage::LoadKernel)?;
    timings.load_kernel = t.elapsed();

    // 4. Buffers + batched host → device.
    let buf_a = acc
        .create_buffer(a.as_slice(), BufferAccess::ReadOnly)
        .at(Stage::CreateBuffers)?;
    let buf_b = acc
        .create_buffer(b.as_slice(), BufferAccess::ReadOnly)
        .at(Stage::CreateBuffers)?;
    let buf_result = acc
        .create_buffer(result.as_slice(), BufferAccess::WriteOnly)
        .at(Stage::CreateBuffers)?;

    let t = Instant::now();
    acc.migrate_to_device(&[&buf_a, &buf_b]).at(Stage::MigrateToDevice)?;
    timings.migrate_to_device = t.elapsed();

    // 5 + 6. Bind in fixed order and run.
    let args = [
        KernelArg::Buffer(&buf_a),
        KernelArg::Buffer(&buf_b),
        KernelArg::Buffer(&buf_result),
        KernelArg::Scalar(n_arg),
    ];
    log::info!("running `{}` over {n} elements", config.kernel_name);
    let t = Instant::now();
    acc.run(&kernel, &args).at(Stage::Run)?;
    timings.run = t.elapsed();

    // 7. Device → host.
    let t = Instant::now();
    acc.migrate_to_host(&buf_result, result.as_mut_slice())
        .at(Stage::MigrateToHost)?;
    timings.migrate_to_host = t.elapsed();

    // 8. Verify.
    let t = Instant::now();
    let verdict = verify::check(a.as_slice(), b.as_slice(), result.as_slice());
    timings.verify = t.elapsed();

    log::debug!(
        "timings: select {:?}, load {:?}, h2d {:?}, run {:?}, d2h {:?}, verify {:?}",
        timings.select_device,
        timings.load_kernel,
        timings.migrate_to_device,
        timings.run,
        timings.migrate_to_host,
        timings.verify,
    );

    // 9. Report.
    Ok(RunReport { device, verdict, timings, result })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
