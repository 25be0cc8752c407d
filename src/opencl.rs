// opencl.rs -- FPGA accelerator through OpenCL.
//
// Drives an FPGA card through its vendor OpenCL ICD using the `ocl` crate.
// The hardware image is a prebuilt `xclbin`; it is handed to the runtime as
// a program binary, never compiled here.
//
// Built only with `--features opencl`: linking needs an OpenCL ICD loader
// on the build machine.

use std::path::Path;

use ocl::{flags, Buffer, Context, Device, Platform, Program, Queue};

use crate::buffer::{BufferAccess, Element};
use crate::image::{HardwareImage, ImageKind};
use crate::runtime::{Accelerator, KernelArg, RuntimeError, SelectedDevice};

/// Platform name fragment preferred during discovery.
pub const PREFERRED_PLATFORM: &str = "Xilinx";

impl From<ocl::Error> for RuntimeError {
    fn from(e: ocl::Error) -> Self {
        RuntimeError::backend("opencl", e)
    }
}

fn core_err(e: ocl::core::Error) -> RuntimeError {
    RuntimeError::backend("opencl", e)
}

/// Selected device, context, and in-order command queue.
struct ClContext {
    device: Device,
    context: Context,
    queue: Queue,
}

/// A device buffer with the host slice it was created from.
pub struct ClBuffer {
    buffer: Buffer<Element>,
    len: usize,
}

impl ClBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A program loaded from a binary image, plus the kernel name inside it.
pub struct ClKernel {
    program: Program,
    name: String,
}

/// OpenCL implementation of [`Accelerator`].
#[derive(Default)]
pub struct OpenClAccelerator {
    ctx: Option<ClContext>,
}

impl OpenClAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn ctx(&self) -> Result<&ClContext, RuntimeError> {
        self.ctx.as_ref().ok_or(RuntimeError::DeviceNotSelected)
    }

    /// Enqueue one migration of `buffers` and wait for it.
    fn migrate(&self, buffers: &[&ClBuffer], flags: ocl::core::MemMigrationFlags) -> Result<(), RuntimeError> {
        let ctx = self.ctx()?;
        let mems: Vec<ocl::core::Mem> = buffers
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| b.buffer.as_core().clone())
            .collect();
        if mems.is_empty() {
            return Ok(());
        }
        ocl::core::enqueue_migrate_mem_objects(
            ctx.queue.as_core(),
            &mems,
            flags,
            None::<&ocl::core::Event>,
            None::<&mut ocl::core::Event>,
        )
        .map_err(core_err)?;
        ctx.queue.finish()?;
        Ok(())
    }
}

/// Pick the preferred platform index from a list of platform names.
pub fn pick_platform(names: &[String]) -> Option<usize> {
    names
        .iter()
        .position(|n| n.contains(PREFERRED_PLATFORM))
        .or(if names.is_empty() { None } else { Some(0) })
}

impl Accelerator for OpenClAccelerator {
    type Buffer = ClBuffer;
    type Kernel = ClKernel;

    fn select_device(&mut self) -> Result<SelectedDevice, RuntimeError> {
        let platforms = Platform::list();
        let names: Vec<String> = platforms
            .iter()
            .map(|p| p.name().unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        for name in &names {
            log::debug!("OpenCL platform: {name}");
        }
        let chosen = pick_platform(&names).ok_or(RuntimeError::NoDevice)?;
        if !names[chosen].contains(PREFERRED_PLATFORM) {
            log::warn!("no {PREFERRED_PLATFORM} platform; using {}", names[chosen]);
        }
        let platform = platforms[chosen];

        let all = Device::list_all(platform)?;
        let accelerators = Device::list(platform, Some(flags::DEVICE_TYPE_ACCELERATOR))
            .unwrap_or_default();
        let device = accelerators
            .first()
            .or_else(|| all.first())
            .copied()
            .ok_or(RuntimeError::NoDevice)?;

        let context = Context::builder().platform(platform).devices(device).build()?;
        let queue = Queue::new(&context, device, None)?;

        let name = device.name()?;
        let candidates = all
            .iter()
            .map(|d| d.name().unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        self.ctx = Some(ClContext { device, context, queue });

        Ok(SelectedDevice { backend: "opencl", name, candidates })
    }

    fn load_kernel(&mut self, name: &str, image: &Path) -> Result<ClKernel, RuntimeError> {
        let ctx = self.ctx()?;
        let image = HardwareImage::load(image)?;
        if image.kind() != ImageKind::Xclbin {
            return Err(RuntimeError::UnsupportedImage {
                path: image.path().to_path_buf(),
                expected: "xclbin",
            });
        }
        log::info!("loading {} ({} bytes)", image.path().display(), image.bytes().len());

        let bins: [&[u8]; 1] = [image.bytes()];
        let program = Program::builder()
            .devices(ctx.device)
            .binaries(&bins)
            .build(&ctx.context)?;

        // Probe the name now so a typo fails at load, not at launch.
        ocl::core::create_kernel(program.as_core(), name).map_err(|_| RuntimeError::KernelNotFound {
            name: name.to_string(),
            image: image.path().to_path_buf(),
        })?;

        Ok(ClKernel { program, name: name.to_string() })
    }

    fn create_buffer(&mut self, host: &[Element], access: BufferAccess) -> Result<ClBuffer, RuntimeError> {
        let ctx = self.ctx()?;
        let mem_flags = match access {
            BufferAccess::ReadOnly => flags::MEM_READ_ONLY,
            BufferAccess::WriteOnly => flags::MEM_WRITE_ONLY,
            BufferAccess::ReadWrite => flags::MEM_READ_WRITE,
        };
        // OpenCL forbids zero-length buffers.
        let zero = [0 as Element];
        let init = if host.is_empty() { &zero[..] } else { host };
        let buffer = Buffer::<Element>::builder()
            .queue(ctx.queue.clone())
            .flags(mem_flags)
            .len(init.len())
            .copy_host_slice(init)
            .build()?;
        Ok(ClBuffer { buffer, len: host.len() })
    }

    fn migrate_to_device(&mut self, buffers: &[&ClBuffer]) -> Result<(), RuntimeError> {
        self.migrate(buffers, ocl::core::MemMigrationFlags::empty())
    }

    fn run(&mut self, kernel: &ClKernel, args: &[KernelArg<'_, ClBuffer>]) -> Result<(), RuntimeError> {
        let ctx = self.ctx()?;
        let mut builder = ocl::Kernel::builder();
        builder
            .program(&kernel.program)
            .name(&kernel.name)
            .queue(ctx.queue.clone())
            // A single work-item task: the FPGA kernel loops internally.
            .global_work_size(1);
        for arg in args {
            match arg {
                KernelArg::Buffer(b) => {
                    builder.arg(&b.buffer);
                }
                KernelArg::Scalar(v) => {
                    builder.arg(v);
                }
            }
        }
        let k = builder.build().map_err(|e| RuntimeError::BadArguments {
            kernel: kernel.name.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: every argument is bound above and outlives the enqueue;
        // `finish` blocks until the kernel has stopped touching them.
        unsafe {
            k.enq()?;
        }
        ctx.queue.finish()?;
        Ok(())
    }

    fn migrate_to_host(&mut self, buffer: &ClBuffer, out: &mut [Element]) -> Result<(), RuntimeError> {
        if buffer.len() != out.len() {
            return Err(RuntimeError::LengthMismatch { device: buffer.len(), host: out.len() });
        }
        self.migrate(&[buffer], ocl::core::MemMigrationFlags::MIGRATE_MEM_OBJECT_HOST)?;
        if out.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx()?;
        buffer.buffer.read(out).enq()?;
        ctx.queue.finish()?;
        Ok(())
    }
}
