// emu.rs -- Software accelerator.
//
// A complete in-process `Accelerator` with no hardware behind it. Used by
// the test suite and by `--backend emu` to exercise the harness end to end.
//
// MEMORY MODEL
// ─────────────
// Every buffer has two copies:
//
//   host   -- snapshot of the slice passed to `create_buffer`
//   device -- what kernels see; starts zeroed
//
// `migrate_to_device` copies host → device, `migrate_to_host` returns the
// device copy. A harness that forgets a migration therefore computes on
// zeros or reads zeros, exactly as it would on a non-unified FPGA card.
//
// OBSERVABILITY
// ──────────────
// Each call is appended to a log of `EmuCall`s, including the shape of the
// argument list passed to `run`. Tests assert on the log to check call
// order and argument binding without needing a kernel that can tell.
//
// FAULT INJECTION
// ────────────────
// `fail_on(op)` makes the next call of that operation return a backend
// error. `with_kernel(name, f)` registers a kernel body, so a test can
// install a deliberately wrong adder.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::{BufferAccess, Element};
use crate::runtime::{Accelerator, KernelArg, RuntimeError, SelectedDevice};

/// Name reported by the emulated device.
pub const EMU_DEVICE_NAME: &str = "vadd-emu";

/// Name of the built-in vector-add kernel.
pub const VADD_KERNEL: &str = "krnl_vadd";

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Buffer handle: index into the emulator's buffer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmuBuffer(pub usize);

/// Kernel handle.
#[derive(Clone)]
pub struct EmuKernel {
    name: String,
    body: KernelFn,
}

impl fmt::Debug for EmuKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmuKernel").field("name", &self.name).finish()
    }
}

/// Argument as seen by an emulated kernel body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuArg {
    Buffer(EmuBuffer),
    Scalar(Element),
}

/// Device memory as seen by an emulated kernel body.
pub struct DeviceMemory<'a> {
    buffers: &'a mut [EmuSlot],
}

impl DeviceMemory<'_> {
    pub fn read(&self, buf: EmuBuffer) -> Result<&[Element], RuntimeError> {
        self.buffers
            .get(buf.0)
            .map(|slot| slot.device.as_slice())
            .ok_or(RuntimeError::UnknownBuffer(buf.0))
    }

    pub fn write(&mut self, buf: EmuBuffer) -> Result<&mut [Element], RuntimeError> {
        self.buffers
            .get_mut(buf.0)
            .map(|slot| slot.device.as_mut_slice())
            .ok_or(RuntimeError::UnknownBuffer(buf.0))
    }
}

/// A kernel body. Receives device memory and the positional arguments.
pub type KernelFn = fn(&mut DeviceMemory<'_>, &[EmuArg]) -> Result<(), RuntimeError>;

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// Operation kinds, used for the call log and for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmuOp {
    SelectDevice,
    LoadKernel,
    CreateBuffer,
    MigrateToDevice,
    Run,
    MigrateToHost,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmuCall {
    SelectDevice,
    LoadKernel { name: String, image: PathBuf },
    CreateBuffer { buffer: EmuBuffer, len: usize, access: BufferAccess },
    MigrateToDevice { buffers: Vec<EmuBuffer> },
    Run { kernel: String, args: Vec<EmuArg> },
    MigrateToHost { buffer: EmuBuffer },
}

impl EmuCall {
    pub fn op(&self) -> EmuOp {
        match self {
            EmuCall::SelectDevice => EmuOp::SelectDevice,
            EmuCall::LoadKernel { .. } => EmuOp::LoadKernel,
            EmuCall::CreateBuffer { .. } => EmuOp::CreateBuffer,
            EmuCall::MigrateToDevice { .. } => EmuOp::MigrateToDevice,
            EmuCall::Run { .. } => EmuOp::Run,
            EmuCall::MigrateToHost { .. } => EmuOp::MigrateToHost,
        }
    }
}

// ---------------------------------------------------------------------------
// Emulator
// ---------------------------------------------------------------------------

struct EmuSlot {
    host: Vec<Element>,
    device: Vec<Element>,
    access: BufferAccess,
}

/// The software accelerator.
pub struct Emulator {
    selected: bool,
    kernels: HashMap<String, KernelFn>,
    buffers: Vec<EmuSlot>,
    calls: Vec<EmuCall>,
    faults: Vec<EmuOp>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// An emulator with the built-in `krnl_vadd` kernel registered.
    pub fn new() -> Self {
        let mut kernels: HashMap<String, KernelFn> = HashMap::new();
        kernels.insert(VADD_KERNEL.to_string(), vadd);
        Emulator {
            selected: false,
            kernels,
            buffers: Vec::new(),
            calls: Vec::new(),
            faults: Vec::new(),
        }
    }

    /// Register (or replace) a kernel body under `name`.
    pub fn with_kernel(mut self, name: &str, body: KernelFn) -> Self {
        self.kernels.insert(name.to_string(), body);
        self
    }

    /// Make the next call of `op` fail with a backend error.
    pub fn fail_on(mut self, op: EmuOp) -> Self {
        self.faults.push(op);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> &[EmuCall] {
        &self.calls
    }

    /// `true` until the first call of any kind.
    pub fn untouched(&self) -> bool {
        self.calls.is_empty()
    }

    /// Host copy of a buffer, as snapshotted at creation.
    pub fn host_contents(&self, buf: EmuBuffer) -> Option<&[Element]> {
        self.buffers.get(buf.0).map(|s| s.host.as_slice())
    }

    /// Device copy of a buffer.
    pub fn device_contents(&self, buf: EmuBuffer) -> Option<&[Element]> {
        self.buffers.get(buf.0).map(|s| s.device.as_slice())
    }

    fn record(&mut self, call: EmuCall) -> Result<(), RuntimeError> {
        let op = call.op();
        self.calls.push(call);
        if let Some(pos) = self.faults.iter().position(|&f| f == op) {
            self.faults.remove(pos);
            return Err(RuntimeError::backend("emu", format!("injected failure in {op:?}")));
        }
        Ok(())
    }

    fn require_device(&self) -> Result<(), RuntimeError> {
        if self.selected {
            Ok(())
        } else {
            Err(RuntimeError::DeviceNotSelected)
        }
    }

    fn slot(&self, buf: &EmuBuffer) -> Result<&EmuSlot, RuntimeError> {
        self.buffers.get(buf.0).ok_or(RuntimeError::UnknownBuffer(buf.0))
    }
}

impl Accelerator for Emulator {
    type Buffer = EmuBuffer;
    type Kernel = EmuKernel;

    fn select_device(&mut self) -> Result<SelectedDevice, RuntimeError> {
        self.record(EmuCall::SelectDevice)?;
        self.selected = true;
        Ok(SelectedDevice {
            backend: "emu",
            name: EMU_DEVICE_NAME.to_string(),
            candidates: vec![EMU_DEVICE_NAME.to_string()],
        })
    }

    fn load_kernel(&mut self, name: &str, image: &Path) -> Result<EmuKernel, RuntimeError> {
        self.require_device()?;
        self.record(EmuCall::LoadKernel {
            name: name.to_string(),
            image: image.to_path_buf(),
        })?;

        // The image content is irrelevant here, but it must be readable.
        fs::metadata(image).map_err(|source| RuntimeError::ImageRead {
            path: image.to_path_buf(),
            source,
        })?;

        let body = *self.kernels.get(name).ok_or_else(|| RuntimeError::KernelNotFound {
            name: name.to_string(),
            image: image.to_path_buf(),
        })?;
        Ok(EmuKernel { name: name.to_string(), body })
    }

    fn create_buffer(
        &mut self,
        host: &[Element],
        access: BufferAccess,
    ) -> Result<EmuBuffer, RuntimeError> {
        self.require_device()?;
        let buffer = EmuBuffer(self.buffers.len());
        self.record(EmuCall::CreateBuffer { buffer, len: host.len(), access })?;
        self.buffers.push(EmuSlot {
            host: host.to_vec(),
            device: vec![0; host.len()],
            access,
        });
        Ok(buffer)
    }

    fn migrate_to_device(&mut self, buffers: &[&EmuBuffer]) -> Result<(), RuntimeError> {
        self.require_device()?;
        self.record(EmuCall::MigrateToDevice {
            buffers: buffers.iter().map(|&&b| b).collect(),
        })?;
        for buf in buffers {
            let slot = self
                .buffers
                .get_mut(buf.0)
                .ok_or(RuntimeError::UnknownBuffer(buf.0))?;
            slot.device.copy_from_slice(&slot.host);
        }
        Ok(())
    }

    fn run(&mut self, kernel: &EmuKernel, args: &[KernelArg<'_, EmuBuffer>]) -> Result<(), RuntimeError> {
        self.require_device()?;
        let args: Vec<EmuArg> = args
            .iter()
            .map(|a| match a {
                KernelArg::Buffer(b) => EmuArg::Buffer(**b),
                KernelArg::Scalar(v) => EmuArg::Scalar(*v),
            })
            .collect();
        self.record(EmuCall::Run { kernel: kernel.name.clone(), args: args.clone() })?;

        for arg in &args {
            if let EmuArg::Buffer(b) = arg {
                self.slot(b)?;
            }
        }
        let mut mem = DeviceMemory { buffers: self.buffers.as_mut_slice() };
        (kernel.body)(&mut mem, &args)
    }

    fn migrate_to_host(&mut self, buffer: &EmuBuffer, out: &mut [Element]) -> Result<(), RuntimeError> {
        self.require_device()?;
        self.record(EmuCall::MigrateToHost { buffer: *buffer })?;
        let slot = self.slot(buffer)?;
        if slot.device.len() != out.len() {
            return Err(RuntimeError::LengthMismatch { device: slot.device.len(), host: out.len() });
        }
        if slot.access == BufferAccess::ReadOnly {
            log::warn!("reading back read-only buffer {}", buffer.0);
        }
        out.copy_from_slice(&slot.device);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in kernels
// ---------------------------------------------------------------------------

/// `krnl_vadd(in1, in2, out, size)`: `out[i] = in1[i] + in2[i]` for i < size.
pub fn vadd(mem: &mut DeviceMemory<'_>, args: &[EmuArg]) -> Result<(), RuntimeError> {
    let (a, b, out, n) = vadd_args(args)?;
    let sum: Vec<Element> = {
        let a = mem.read(a)?;
        let b = mem.read(b)?;
        check_len(a.len(), n)?;
        check_len(b.len(), n)?;
        a[..n].iter().zip(&b[..n]).map(|(&x, &y)| x.wrapping_add(y)).collect()
    };
    let out = mem.write(out)?;
    check_len(out.len(), n)?;
    out[..n].copy_from_slice(&sum);
    Ok(())
}

/// Destructure the `(in1, in2, out, size)` signature shared by vadd-style
/// kernels.
pub fn vadd_args(args: &[EmuArg]) -> Result<(EmuBuffer, EmuBuffer, EmuBuffer, usize), RuntimeError> {
    match *args {
        [EmuArg::Buffer(a), EmuArg::Buffer(b), EmuArg::Buffer(out), EmuArg::Scalar(n)] => {
            let n = usize::try_from(n).map_err(|_| RuntimeError::BadArguments {
                kernel: VADD_KERNEL.to_string(),
                reason: format!("negative size {n}"),
            })?;
            Ok((a, b, out, n))
        }
        _ => Err(RuntimeError::BadArguments {
            kernel: VADD_KERNEL.to_string(),
            reason: format!("expected (buffer, buffer, buffer, scalar), got {args:?}"),
        }),
    }
}

fn check_len(have: usize, want: usize) -> Result<(), RuntimeError> {
    if have < want {
        Err(RuntimeError::LengthMismatch { device: have, host: want })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
