// gpu/mod.rs -- wgpu accelerator backend.
//
// Runs the same harness on any GPU wgpu can reach. The "hardware image" is
// a WGSL module and the kernel name is its compute entry point, so
// `kernels/krnl_vadd.wgsl` plays the role the xclbin plays on an FPGA card.
//
// Binding contract for WGSL kernels:
//
//   positional argument i  →  @group(0) @binding(i)
//   buffer argument        →  var<storage, read> or var<storage, read_write>
//   scalar argument        →  var<uniform> of one i32 (16-byte padded)
//   workgroup size         →  @workgroup_size(64)
//
// The kernel must guard `gid.x` against its size argument; the last
// workgroup overhangs whenever the length is not a multiple of 64.

pub mod backend;
pub mod device;

pub use backend::{GpuAccelerator, GpuBuffer, GpuKernel, WORKGROUP_WIDTH};
pub use device::{AdapterInfo, GpuDevice, GpuError};
