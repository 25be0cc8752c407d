// config.rs -- Command-line configuration.
//
// `Args` is the clap surface; `HarnessConfig` (in harness.rs) is what the
// run consumes. The conversion is where semantic validation lives, so the
// parser only has to care about syntax.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::harness::{HarnessConfig, DEFAULT_KERNEL, DEFAULT_LEN};
use crate::image::{self, ImageKind};
use crate::runtime::RuntimeError;

/// Which accelerator runtime to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Pick from the image: xclbin → opencl, .wgsl → wgpu.
    Auto,
    /// FPGA through OpenCL (requires the `opencl` feature).
    Opencl,
    /// GPU through wgpu; the image is a WGSL module.
    Wgpu,
    /// In-process software emulator.
    Emu,
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendChoice::Auto => "auto",
            BackendChoice::Opencl => "opencl",
            BackendChoice::Wgpu => "wgpu",
            BackendChoice::Emu => "emu",
        };
        f.write_str(s)
    }
}

/// Run a vector-add kernel on an accelerator and verify the result.
#[derive(Parser, Debug)]
#[command(name = "vadd-harness", version, about, long_about = None)]
pub struct Args {
    /// Hardware image: an xclbin for FPGA, or a WGSL module for wgpu
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Name of the kernel inside the image
    #[arg(short, long, default_value = DEFAULT_KERNEL)]
    pub kernel: String,

    /// Number of elements per vector
    #[arg(short = 'n', long, default_value_t = DEFAULT_LEN)]
    pub len: usize,

    /// Accelerator runtime
    #[arg(short, long, value_enum, default_value_t = BackendChoice::Auto)]
    pub backend: BackendChoice,
}

/// Invalid configuration that parsed fine.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("vector length must be at least 1")]
    EmptyVectors,

    #[error("kernel name must not be empty")]
    EmptyKernelName,

    #[error("cannot pick a backend for {} ({kind} image); pass --backend", .image.display())]
    AmbiguousBackend { image: PathBuf, kind: ImageKind },

    #[error(transparent)]
    Image(#[from] RuntimeError),
}

impl TryFrom<Args> for HarnessConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, ConfigError> {
        if args.len == 0 {
            return Err(ConfigError::EmptyVectors);
        }
        if args.kernel.trim().is_empty() {
            return Err(ConfigError::EmptyKernelName);
        }
        Ok(HarnessConfig {
            image: args.image,
            kernel_name: args.kernel,
            len: args.len,
            backend: args.backend,
        })
    }
}

/// Turn `Auto` into a concrete backend by looking at the image.
///
/// Explicit choices are returned unchanged without touching the file.
pub fn resolve_backend(config: &HarnessConfig) -> Result<BackendChoice, ConfigError> {
    if config.backend != BackendChoice::Auto {
        return Ok(config.backend);
    }
    match image::sniff_file(&config.image)? {
        ImageKind::Xclbin => Ok(BackendChoice::Opencl),
        ImageKind::Wgsl => Ok(BackendChoice::Wgpu),
        kind @ ImageKind::Unknown => Err(ConfigError::AmbiguousBackend {
            image: config.image.clone(),
            kind,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_clap_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["vadd-harness", "vadd.xclbin"]).unwrap();
        let config = HarnessConfig::try_from(args).unwrap();
        assert_eq!(config, HarnessConfig::new("vadd.xclbin"));
        assert_eq!(config.kernel_name, "krnl_vadd");
        assert_eq!(config.len, 4096);
    }

    #[test]
    fn test_options() {
        let args = Args::try_parse_from([
            "vadd-harness", "k.wgsl", "--kernel", "main", "-n", "64", "--backend", "wgpu",
        ])
        .unwrap();
        let config = HarnessConfig::try_from(args).unwrap();
        assert_eq!(config.kernel_name, "main");
        assert_eq!(config.len, 64);
        assert_eq!(config.backend, BackendChoice::Wgpu);
    }

    #[test]
    fn test_positional_count_enforced() {
        assert!(Args::try_parse_from(["vadd-harness"]).is_err());
        assert!(Args::try_parse_from(["vadd-harness", "a", "b"]).is_err());
    }

    #[test]
    fn test_zero_length_rejected() {
        let args = Args::try_parse_from(["vadd-harness", "x", "--len", "0"]).unwrap();
        assert!(matches!(HarnessConfig::try_from(args), Err(ConfigError::EmptyVectors)));
    }

    #[test]
    fn test_resolve_backend_from_image() {
        let mut xclbin = tempfile::NamedTempFile::new().unwrap();
        xclbin.write_all(image::XCLBIN_MAGIC).unwrap();
        let config = HarnessConfig::new(xclbin.path());
        assert_eq!(resolve_backend(&config).unwrap(), BackendChoice::Opencl);

        let wgsl = tempfile::Builder::new().suffix(".wgsl").tempfile().unwrap();
        let config = HarnessConfig::new(wgsl.path());
        assert_eq!(resolve_backend(&config).unwrap(), BackendChoice::Wgpu);

        let other = tempfile::NamedTempFile::new().unwrap();
        let config = HarnessConfig::new(other.path());
        assert!(matches!(resolve_backend(&config), Err(ConfigError::AmbiguousBackend { .. })));
    }

    #[test]
    fn test_explicit_backend_skips_image() {
        let config = HarnessConfig {
            backend: BackendChoice::Emu,
            ..HarnessConfig::new("/does/not/exist")
        };
        assert_eq!(resolve_backend(&config).unwrap(), BackendChoice::Emu);
    }
}
