// vadd-harness: host-side verification of a vector-add accelerator kernel.
//
// Stages A = B = 0..N on a device, runs a prebuilt `krnl_vadd` image,
// reads the result back and checks it element by element against a CPU
// sum. The device runtime sits behind `runtime::Accelerator`:
//
//   opencl -- FPGA xclbin through an OpenCL ICD (feature "opencl")
//   gpu    -- WGSL kernel on any wgpu adapter
//   emu    -- in-process software model, used by the test suite

pub mod buffer;
pub mod verify;
pub mod runtime;
pub mod image;
pub mod harness;
pub mod config;
pub mod cli;
pub mod emu;
pub mod gpu;

#[cfg(feature = "opencl")]
pub mod opencl;
