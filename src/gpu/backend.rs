// gpu/backend.rs -- `Accelerator` on top of wgpu.
//
// Mapping of the capability onto wgpu objects:
//
//   select_device     → GpuDevice::new() (adapter ranking, device + queue)
//   load_kernel       → WGSL module + compute pipeline, auto layout
//   create_buffer     → STORAGE | COPY_DST | COPY_SRC buffer, host snapshot
//   migrate_to_device → queue.write_buffer per buffer, ONE submit, wait
//   run               → bind group from positional args, dispatch, wait
//   migrate_to_host   → copy into a MAP_READ staging buffer, map, wait
//
// ERROR CAPTURE
// ─────────────
// wgpu reports validation failures (bad WGSL, unknown entry point, binding
// mismatches) through the device's uncaptured-error handler, which panics by
// default. Every call that can fail validation is bracketed with
// `push_error_scope(Validation)` / `pop_error_scope()` so those failures
// come back as `RuntimeError`s and abort the run cleanly.
//
// BLOCKING
// ────────
// `device.poll(Maintain::Wait)` after each submit is the suspension point:
// it returns once the GPU has drained the queue.

use wgpu::util::DeviceExt;

use crate::buffer::{BufferAccess, Element};
use crate::gpu::device::GpuDevice;
use crate::image::{HardwareImage, ImageKind};
use crate::runtime::{Accelerator, KernelArg, RuntimeError, SelectedDevice};

/// Invocations per workgroup. WGSL kernels must declare
/// `@workgroup_size(64)`.
pub const WORKGROUP_WIDTH: u32 = 64;

const ELEMENT_BYTES: u64 = std::mem::size_of::<Element>() as u64;

// ---------------------------------------------------------------------------
// Uniform params (must match a WGSL `var<uniform> x: i32` binding)
// ---------------------------------------------------------------------------

/// A scalar argument, padded to the 16-byte uniform granule.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ScalarUniform {
    value: i32,
    _pad: [i32; 3],
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// A device buffer plus the host contents it was created from.
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    host: Vec<Element>,
}

impl GpuBuffer {
    /// Length in elements.
    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }
}

/// A compiled compute pipeline for one entry point.
pub struct GpuKernel {
    name: String,
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

// ---------------------------------------------------------------------------
// GpuAccelerator
// ---------------------------------------------------------------------------

/// wgpu implementation of [`Accelerator`].
#[derive(Default)]
pub struct GpuAccelerator {
    gpu: Option<GpuDevice>,
}

impl GpuAccelerator {
    /// An accelerator with no device yet; `select_device` opens one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already opened device. `select_device` then reuses it.
    pub fn with_device(gpu: GpuDevice) -> Self {
        GpuAccelerator { gpu: Some(gpu) }
    }

    fn gpu(&self) -> Result<&GpuDevice, RuntimeError> {
        self.gpu.as_ref().ok_or(RuntimeError::DeviceNotSelected)
    }
}

impl Accelerator for GpuAccelerator {
    type Buffer = GpuBuffer;
    type Kernel = GpuKernel;

    fn select_device(&mut self) -> Result<SelectedDevice, RuntimeError> {
        if self.gpu.is_none() {
            self.gpu = Some(GpuDevice::new()?);
        }
        let gpu = self.gpu()?;
        Ok(SelectedDevice {
            backend: "wgpu",
            name: gpu.adapter_info.to_string(),
            candidates: gpu.candidates.iter().map(|c| c.to_string()).collect(),
        })
    }

    fn load_kernel(&mut self, name: &str, image: &std::path::Path) -> Result<GpuKernel, RuntimeError> {
        let gpu = self.gpu()?;
        let image = HardwareImage::load(image)?;
        if image.kind() != ImageKind::Wgsl {
            log::warn!("{} does not look like WGSL ({}); trying anyway", image.path().display(), image.kind());
        }
        let source = image.as_text()?;
        if !declares_function(source, name) {
            return Err(RuntimeError::KernelNotFound {
                name: name.to_string(),
                image: image.path().to_path_buf(),
            });
        }

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            // Auto layout: bindings are derived from the shader itself.
            layout: None,
            module: &module,
            entry_point: name,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        let bgl = pipeline.get_bind_group_layout(0);
        if let Some(e) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(RuntimeError::backend("wgpu", format!("kernel `{name}`: {e}")));
        }

        log::debug!("compiled `{name}` from {}", image.path().display());
        Ok(GpuKernel { name: name.to_string(), pipeline, bgl })
    }

    fn create_buffer(&mut self, host: &[Element], _access: BufferAccess) -> Result<GpuBuffer, RuntimeError> {
        let gpu = self.gpu()?;
        // Read/write access is declared by the WGSL binding, not the buffer.
        // Zero-sized storage bindings are invalid; keep at least one element.
        let size = (host.len() as u64).max(1) * ELEMENT_BYTES;
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuBuffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(GpuBuffer { buffer, host: host.to_vec() })
    }

    fn migrate_to_device(&mut self, buffers: &[&GpuBuffer]) -> Result<(), RuntimeError> {
        let gpu = self.gpu()?;
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        for buf in buffers.iter().filter(|b| !b.is_empty()) {
            gpu.queue.write_buffer(&buf.buffer, 0, bytemuck::cast_slice(&buf.host));
        }
        // One submit flushes every staged write as a single batch.
        gpu.queue.submit(std::iter::empty());
        gpu.device.poll(wgpu::Maintain::Wait);
        scope_result(gpu, "host-to-device copy")
    }

    fn run(&mut self, kernel: &GpuKernel, args: &[KernelArg<'_, GpuBuffer>]) -> Result<(), RuntimeError> {
        let gpu = self.gpu()?;

        let work_items = args
            .iter()
            .filter_map(|a| match a {
                KernelArg::Buffer(b) => Some(b.len()),
                KernelArg::Scalar(_) => None,
            })
            .max()
            .unwrap_or(1);
        let groups = dispatch_size(work_items);
        let max_groups = gpu.device.limits().max_compute_workgroups_per_dimension;
        if groups > max_groups {
            return Err(RuntimeError::BadArguments {
                kernel: kernel.name.clone(),
                reason: format!("{work_items} work items need {groups} workgroups, limit is {max_groups}"),
            });
        }

        // Uniforms must outlive the bind group entries that borrow them.
        let uniforms: Vec<Option<wgpu::Buffer>> = args
            .iter()
            .map(|a| match a {
                KernelArg::Scalar(v) => Some(gpu.device.create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some("GpuKernel scalar"),
                        contents: bytemuck::bytes_of(&ScalarUniform { value: *v, _pad: [0; 3] }),
                        usage: wgpu::BufferUsages::UNIFORM,
                    },
                )),
                KernelArg::Buffer(_) => None,
            })
            .collect();

        let entries: Vec<wgpu::BindGroupEntry<'_>> = args
            .iter()
            .zip(&uniforms)
            .enumerate()
            .filter_map(|(i, (arg, uniform))| {
                let resource = match (arg, uniform) {
                    (KernelArg::Buffer(b), _) => b.buffer.as_entire_binding(),
                    (KernelArg::Scalar(_), Some(u)) => u.as_entire_binding(),
                    (KernelArg::Scalar(_), None) => return None,
                };
                Some(wgpu::BindGroupEntry { binding: i as u32, resource })
            })
            .collect();

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuKernel BG"),
            layout: &kernel.bgl,
            entries: &entries,
        });

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuKernel dispatch") },
        );
        {
            let mut pass = encoder.begin_compute_pass(
                &wgpu::ComputePassDescriptor { label: Some(kernel.name.as_str()), timestamp_writes: None },
            );
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);

        scope_result(gpu, &kernel.name).map_err(|e| RuntimeError::BadArguments {
            kernel: kernel.name.clone(),
            reason: e.to_string(),
        })
    }

    fn migrate_to_host(&mut self, buffer: &GpuBuffer, out: &mut [Element]) -> Result<(), RuntimeError> {
        let gpu = self.gpu()?;
        if buffer.len() != out.len() {
            return Err(RuntimeError::LengthMismatch { device: buffer.len(), host: out.len() });
        }
        if out.is_empty() {
            return Ok(());
        }
        let size = out.len() as u64 * ELEMENT_BYTES;

        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuBuffer readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuBuffer readback") },
        );
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &readback, 0, size);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        // map_async is callback based; poll(Wait) blocks until it fires.
        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RuntimeError::backend("wgpu", "readback callback never fired"))?
            .map_err(|e| RuntimeError::backend("wgpu", format!("readback map failed: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice_mut::<Element, u8>(out).copy_from_slice(&mapped);
        }
        readback.unmap();
        Ok(())
    }
}

/// Pop the innermost error scope and turn a captured error into
/// `RuntimeError`.
fn scope_result(gpu: &GpuDevice, what: &str) -> Result<(), RuntimeError> {
    match pollster::block_on(gpu.device.pop_error_scope()) {
        None => Ok(()),
        Some(e) => Err(RuntimeError::backend("wgpu", format!("{what}: {e}"))),
    }
}

/// Workgroups needed to cover `work_items` invocations (ceiling division).
pub fn dispatch_size(work_items: usize) -> u32 {
    let groups = work_items.div_ceil(WORKGROUP_WIDTH as usize).max(1);
    u32::try_from(groups).unwrap_or(u32::MAX)
}

/// Does `source` declare a function called `name`?
///
/// A token-level check (`fn`, name, `(`), enough to tell "wrong kernel
/// name" apart from "broken shader" before handing the module to wgpu.
pub fn declares_function(source: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    source.match_indices("fn").any(|(at, _)| {
        let before_ok = source[..at].chars().next_back().map_or(true, |c| !is_ident(c));
        let rest = &source[at + 2..];
        let after_kw = rest.trim_start();
        if !before_ok || after_kw.len() == rest.len() {
            return false;
        }
        after_kw
            .strip_prefix(name)
            .map(|tail| tail.trim_start().starts_with('('))
            .unwrap_or(false)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{self, HarnessConfig};

    const VADD_WGSL: &str = include_str!("../../kernels/krnl_vadd.wgsl");

    #[test]
    fn test_dispatch_size() {
        assert_eq!(dispatch_size(4096), 64);
        assert_eq!(dispatch_size(4097), 65);
        assert_eq!(dispatch_size(1), 1);
        assert_eq!(dispatch_size(0), 1);
    }

    #[test]
    fn test_declares_function() {
        assert!(declares_function(VADD_WGSL, "krnl_vadd"));
        assert!(declares_function("fn  k (x: u32) {}", "k"));
        assert!(!declares_function(VADD_WGSL, "krnl_vmul"));
        // Prefix of a longer name is not a match.
        assert!(!declares_function("fn krnl_vadd2() {}", "krnl_vadd"));
        // `fn` inside an identifier is not the keyword.
        assert!(!declares_function("let myfn k() = 0;", "k"));
    }

    #[test]
    fn test_scalar_uniform_is_16_bytes() {
        assert_eq!(std::mem::size_of::<ScalarUniform>(), 16);
    }

    #[test]
    fn test_calls_before_select_rejected() {
        let mut acc = GpuAccelerator::new();
        let err = acc.create_buffer(&[1], BufferAccess::ReadOnly).err();
        assert!(matches!(err, Some(RuntimeError::DeviceNotSelected)));
    }

    // ---- Real-device tests ---------------------------------------------------

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_vadd_on_gpu_matches_cpu() {
        let image = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/krnl_vadd.wgsl");
        let mut acc = GpuAccelerator::new();
        let report = harness::run(&mut acc, &HarnessConfig::new(image)).expect("GPU run");
        eprintln!("[test] {}", report.device);
        assert!(report.passed(), "verdict: {:?}", report.verdict);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_unaligned_length_on_gpu() {
        let image = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/krnl_vadd.wgsl");
        let config = HarnessConfig { len: 1000, ..HarnessConfig::new(image) };
        let report = harness::run(&mut GpuAccelerator::new(), &config).expect("GPU run");
        assert!(report.passed());
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_unknown_entry_point_on_gpu() {
        let image = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/krnl_vadd.wgsl");
        let mut acc = GpuAccelerator::new();
        acc.select_device().expect("GPU");
        let err = acc.load_kernel("krnl_vmul", std::path::Path::new(image)).err();
        assert!(matches!(err, Some(RuntimeError::KernelNotFound { .. })));
    }
}
