//! End-to-end latency of the JIT pipeline.
//!
//! Measures each stage separately:
//! 1. Parse + static checks of a module
//! 2. Specialization (trace to KIR) and PTX emission, uncached
//! 3. Cached launch of a vector add over the reference executor
//! 4. Blocked matmul launch

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tessel::{Arg, ArgKey, ConstValue, DType, Device, LaunchOptions, Module, Signature};

const SOURCE: &str = include_str!("../demos/vector_add.tsl");
const MATMUL: &str = include_str!("../demos/matmul.tsl");

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_and_check", |b| {
        b.iter(|| Module::parse(black_box(SOURCE)).unwrap())
    });
}

fn bench_compile(c: &mut Criterion) {
    let sig = Signature::new(vec![
        ArgKey::ptr(DType::F32),
        ArgKey::ptr(DType::F32),
        ArgKey::ptr(DType::F32),
        ArgKey::int(DType::I32),
    ])
    .with_const("BLOCK", 1024i64);
    let mut round = 0u64;
    c.bench_function("compile_vector_add", |b| {
        b.iter(|| {
            // A fresh source per iteration defeats the cache.
            round += 1;
            let src = format!("{}\n# {}\n", SOURCE, round);
            let kernel = Module::parse(&src).unwrap().kernel("vector_add").unwrap();
            kernel.compile(&sig, &LaunchOptions::num_warps(4)).unwrap()
        })
    });
}

fn bench_launch(c: &mut Criterion) {
    let n = 1usize << 14;
    let device = Device::new();
    let x = device.upload(&vec![1.0f32; n]);
    let y = device.upload(&vec![2.0f32; n]);
    let z = device.zeros(DType::F32, n);
    let kernel = Module::parse(SOURCE).unwrap().kernel("vector_add").unwrap();
    let args = [Arg::from(&z), Arg::from(&x), Arg::from(&y), Arg::int(n as i64)];
    let consts = [("BLOCK", ConstValue::from(1024i64))];
    let opts = LaunchOptions::default();
    let grid = (n / 1024) as u32;

    let mut group = c.benchmark_group("launch");
    group.bench_function("vector_add_16k", |b| {
        b.iter(|| kernel.launch(&device, grid, black_box(&args), &consts, &opts).unwrap())
    });

    let (m, k) = (64usize, 32usize);
    let a = device.upload(&vec![half::f16::from_f32(0.5); m * k]);
    let bm = device.upload(&vec![half::f16::from_f32(0.25); k * m]);
    let out = device.zeros(DType::F32, m * m);
    let mm = Module::parse(MATMUL).unwrap().kernel("matmul").unwrap();
    let mm_args = [
        Arg::from(&out),
        Arg::from(&a),
        Arg::from(&bm),
        Arg::int(m as i64),
        Arg::int(k as i64),
        Arg::int(m as i64),
    ];
    let mm_consts = [
        ("BLOCK_M", ConstValue::from(32i64)),
        ("BLOCK_N", ConstValue::from(32i64)),
        ("BLOCK_K", ConstValue::from(16i64)),
    ];
    group.bench_function("matmul_64x32x64", |b| {
        b.iter(|| mm.launch(&device, (2u32, 2u32), black_box(&mm_args), &mm_consts, &opts).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_compile, bench_launch);
criterion_main!(benches);
