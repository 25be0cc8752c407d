// runtime.rs -- The accelerator runtime as a capability.
//
// Everything device-side (platform discovery, image loading, buffer
// migration, kernel dispatch) belongs to a vendor runtime the harness does
// not control. The harness only ever talks to it through `Accelerator`, so
// the verification logic runs unchanged against:
//
//   opencl::OpenClAccelerator -- FPGA through an OpenCL ICD (feature-gated)
//   gpu::GpuAccelerator       -- any wgpu adapter, WGSL kernels
//   emu::Emulator             -- in-process software model used in tests
//
// Buffers and kernels are associated types rather than trait objects: each
// backend has its own handle representation (an `ocl::Buffer`, a
// `wgpu::Buffer`, an index into a Vec) and the harness never needs to mix
// them.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::buffer::{BufferAccess, Element};

// ---------------------------------------------------------------------------
// Device discovery result
// ---------------------------------------------------------------------------

/// The device picked by [`Accelerator::select_device`], plus everything
/// that was considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    /// Short backend name: "opencl", "wgpu", "emu".
    pub backend: &'static str,
    pub name: String,
    /// Every device discovery saw, in enumeration order. Includes `name`.
    pub candidates: Vec<String>,
}

impl fmt::Display for SelectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({} candidate{})",
            self.name,
            self.backend,
            self.candidates.len(),
            if self.candidates.len() == 1 { "" } else { "s" }
        )
    }
}

// ---------------------------------------------------------------------------
// Kernel arguments
// ---------------------------------------------------------------------------

/// One positional kernel argument.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Scalar(Element),
}

// Manual impls: a derive would demand `B: Clone`, but only the reference
// is copied.
impl<B> Clone for KernelArg<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for KernelArg<'_, B> {}

impl<B> KernelArg<'_, B> {
    pub fn is_buffer(&self) -> bool {
        matches!(self, KernelArg::Buffer(_))
    }
}

// ---------------------------------------------------------------------------
// The capability
// ---------------------------------------------------------------------------

/// A heterogeneous-computing runtime able to run one named kernel.
///
/// Call order is `select_device` first, then anything else. Every other
/// method returns [`RuntimeError::DeviceNotSelected`] when called too early.
/// `run` and `migrate_to_host` block until the device reports completion.
pub trait Accelerator {
    /// Device-resident buffer handle.
    type Buffer;
    /// A kernel bound to the selected device.
    type Kernel;

    fn select_device(&mut self) -> Result<SelectedDevice, RuntimeError>;

    /// Load `image` and bind the kernel called `name` from it.
    fn load_kernel(&mut self, name: &str, image: &Path) -> Result<Self::Kernel, RuntimeError>;

    /// Allocate a device buffer backed by the contents of `host`.
    ///
    /// No data moves yet; the device copy is only guaranteed current after
    /// [`migrate_to_device`](Accelerator::migrate_to_device).
    fn create_buffer(
        &mut self,
        host: &[Element],
        access: BufferAccess,
    ) -> Result<Self::Buffer, RuntimeError>;

    /// Move the host contents of `buffers` to device memory in one batch.
    fn migrate_to_device(&mut self, buffers: &[&Self::Buffer]) -> Result<(), RuntimeError>;

    /// Bind `args` positionally and execute `kernel` once.
    fn run(
        &mut self,
        kernel: &Self::Kernel,
        args: &[KernelArg<'_, Self::Buffer>],
    ) -> Result<(), RuntimeError>;

    /// Copy the device contents of `buffer` into `out`.
    fn migrate_to_host(
        &mut self,
        buffer: &Self::Buffer,
        out: &mut [Element],
    ) -> Result<(), RuntimeError>;
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors signalled by an accelerator runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no accelerator device found")]
    NoDevice,

    #[error("no device selected; select_device must run first")]
    DeviceNotSelected,

    #[error("failed to read hardware image {}: {source}", .path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hardware image {} is not a valid {expected} image", .path.display())]
    UnsupportedImage { path: PathBuf, expected: &'static str },

    #[error("kernel `{name}` not found in {}", .image.display())]
    KernelNotFound { name: String, image: PathBuf },

    #[error("kernel `{kernel}` rejected its arguments: {reason}")]
    BadArguments { kernel: String, reason: String },

    #[error("unknown buffer handle {0}")]
    UnknownBuffer(usize),

    #[error("length mismatch: device buffer holds {device} elements, host expects {host}")]
    LengthMismatch { device: usize, host: usize },

    #[error("{backend} runtime error: {message}")]
    Backend { backend: &'static str, message: String },
}

impl RuntimeError {
    pub(crate) fn backend(backend: &'static str, message: impl fmt::Display) -> Self {
        RuntimeError::Backend { backend, message: message.to_string() }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_device_display() {
        let dev = SelectedDevice {
            backend: "emu",
            name: "vadd-emu".into(),
            candidates: vec!["vadd-emu".into()],
        };
        assert_eq!(dev.to_string(), "vadd-emu [emu] (1 candidate)");
    }

    #[test]
    fn test_kernel_arg_copy_without_clone_bound() {
        struct Opaque;
        let buf = Opaque;
        let arg = KernelArg::Buffer(&buf);
        let copy = arg;
        assert!(arg.is_buffer() && copy.is_buffer());
        assert!(!KernelArg::<Opaque>::Scalar(3).is_buffer());
    }

    #[test]
    fn test_error_messages() {
        let e = RuntimeError::KernelNotFound {
            name: "krnl_vadd".into(),
            image: PathBuf::from("a.xclbin"),
        };
        assert_eq!(e.to_string(), "kernel `krnl_vadd` not found in a.xclbin");

        let e = RuntimeError::backend("wgpu", "lost device");
        assert_eq!(e.to_string(), "wgpu runtime error: lost device");
    }
}
