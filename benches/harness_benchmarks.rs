// benches/harness_benchmarks.rs -- Verification and end-to-end run costs.
//
//   cargo bench --bench harness_benchmarks
//
// The emulator group needs no hardware. The wgpu group is skipped with a
// note when no adapter is available.
//
// Criterion measures wall time, so the wgpu numbers include buffer
// creation, bind group setup, submit and the blocking readback. Warmup is
// raised for that group since some drivers compile pipelines lazily.

use std::path::PathBuf;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use vadd_harness::buffer::InputBuffer;
use vadd_harness::config::BackendChoice;
use vadd_harness::emu::Emulator;
use vadd_harness::gpu::{GpuAccelerator, GpuDevice};
use vadd_harness::harness::{self, HarnessConfig};
use vadd_harness::verify;

const LENGTHS: [usize; 3] = [4096, 65_536, 1 << 20];

fn wgsl_image() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/krnl_vadd.wgsl"))
}

fn config(len: usize, backend: BackendChoice) -> HarnessConfig {
    HarnessConfig { len, backend, ..HarnessConfig::new(wgsl_image()) }
}

// ============================================================
// CPU reference check
// ============================================================

fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");
    for len in LENGTHS {
        let a = InputBuffer::sequence(len);
        let b = InputBuffer::sequence(len);
        let expected = verify::reference_sum(a.as_slice(), b.as_slice());
        group.bench_with_input(BenchmarkId::new("check", len), &len, |bench, _| {
            bench.iter(|| verify::check(black_box(a.as_slice()), b.as_slice(), &expected))
        });
    }
    group.finish();
}

// ============================================================
// Full harness, emulated
// ============================================================

fn bench_emu_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("harness_emu");
    for len in LENGTHS {
        let config = config(len, BackendChoice::Emu);
        group.bench_with_input(BenchmarkId::from_parameter(len), &config, |bench, config| {
            bench.iter(|| {
                let report = harness::run(&mut Emulator::new(), config).expect("emulated run");
                assert!(report.passed());
            })
        });
    }
    group.finish();
}

// ============================================================
// Full harness, wgpu
// ============================================================

fn bench_wgpu_run(c: &mut Criterion) {
    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("skipping harness_wgpu: {e}");
            return;
        }
    };
    // One device for every iteration; only the per-run work is measured.
    let mut acc = GpuAccelerator::with_device(gpu);

    let mut group = c.benchmark_group("harness_wgpu");
    group.warm_up_time(Duration::from_secs(2));
    for len in LENGTHS {
        let config = config(len, BackendChoice::Wgpu);
        group.bench_with_input(BenchmarkId::from_parameter(len), &config, |bench, config| {
            bench.iter(|| {
                let report = harness::run(&mut acc, config).expect("wgpu run");
                assert!(report.passed());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_verify, bench_emu_run, bench_wgpu_run);
criterion_main!(benches);
