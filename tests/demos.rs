//! The shipped demo kernels parse and compute what they claim.

use half::f16;
use tessel::testing::{first_mismatch, to_f64, Tolerance};
use tessel::{Arg, ConstValue, DType, Device, LaunchOptions, Module};

const VECTOR_ADD: &str = include_str!("../demos/vector_add.tsl");
const MATMUL: &str = include_str!("../demos/matmul.tsl");
const SOFTMAX: &str = include_str!("../demos/softmax.tsl");

#[test]
fn test_demos_parse() {
    for (src, kernel) in [(VECTOR_ADD, "vector_add"), (MATMUL, "matmul"), (SOFTMAX, "softmax")] {
        let module = Module::parse(src).unwrap_or_else(|e| panic!("{}: {}", kernel, e));
        assert_eq!(module.kernel_names(), vec![kernel]);
    }
}

#[test]
fn test_vector_add_with_ragged_tail() {
    let n = 1000usize;
    let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let y: Vec<f32> = (0..n).map(|i| (n - i) as f32 * 0.5).collect();
    let device = Device::new();
    let dx = device.upload(&x);
    let dy = device.upload(&y);
    let dz = device.zeros(DType::F32, n);
    Module::parse(VECTOR_ADD)
        .unwrap()
        .kernel("vector_add")
        .unwrap()
        .launch(
            &device,
            4u32,
            &[Arg::from(&dz), Arg::from(&dx), Arg::from(&dy), Arg::int(n as i64)],
            &[("BLOCK", ConstValue::from(256i64))],
            &LaunchOptions::default(),
        )
        .unwrap();
    let want: Vec<f32> = x.iter().zip(&y).map(|(a, b)| a + b).collect();
    assert_eq!(device.download::<f32>(&dz).unwrap(), want);
}

#[test]
fn test_blocked_matmul_with_partial_tiles() {
    let (m, k, n) = (40usize, 24usize, 48usize);
    let a: Vec<f16> = (0..m * k)
        .map(|i| f16::from_f32((i % 9) as f32 * 0.25 - 1.0))
        .collect();
    let b: Vec<f16> = (0..k * n)
        .map(|i| f16::from_f32((i % 5) as f32 * 0.5 - 1.0))
        .collect();
    let mut want = vec![0.0f64; m * n];
    for i in 0..m {
        for j in 0..n {
            want[i * n + j] = (0..k).map(|p| a[i * k + p].to_f64() * b[p * n + j].to_f64()).sum();
        }
    }

    let device = Device::new();
    let da = device.upload(&a);
    let db = device.upload(&b);
    let dc = device.zeros(DType::F32, m * n);
    Module::parse(MATMUL)
        .unwrap()
        .kernel("matmul")
        .unwrap()
        .launch(
            &device,
            (2u32, 2u32),
            &[
                Arg::from(&dc),
                Arg::from(&da),
                Arg::from(&db),
                Arg::int(m as i64),
                Arg::int(k as i64),
                Arg::int(n as i64),
            ],
            &[
                ("BLOCK_M", ConstValue::from(32i64)),
                ("BLOCK_N", ConstValue::from(32i64)),
                ("BLOCK_K", ConstValue::from(16i64)),
            ],
            &LaunchOptions::default(),
        )
        .unwrap();
    let got = to_f64(&device.download::<f32>(&dc).unwrap());
    assert_eq!(first_mismatch(&got, &want, Tolerance::rtol(0.01).with_atol(1e-3)), None);
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let (rows, cols) = (3usize, 100usize);
    let x: Vec<f32> = (0..rows * cols).map(|i| ((i * 13 % 17) as f32 - 8.0) * 0.3).collect();
    let device = Device::new();
    let dx = device.upload(&x);
    let dy = device.zeros(DType::F32, rows * cols);
    Module::parse(SOFTMAX)
        .unwrap()
        .kernel("softmax")
        .unwrap()
        .launch(
            &device,
            rows as u32,
            &[Arg::from(&dy), Arg::from(&dx), Arg::int(cols as i64), Arg::int(cols as i64)],
            &[("BLOCK", ConstValue::from(128i64))],
            &LaunchOptions::default(),
        )
        .unwrap();

    let mut want = Vec::with_capacity(rows * cols);
    for row in x.chunks(cols) {
        let top = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
        let e: Vec<f64> = row.iter().map(|&v| (v as f64 - top).exp()).collect();
        let total: f64 = e.iter().sum();
        want.extend(e.iter().map(|v| v / total));
    }
    let got = to_f64(&device.download::<f32>(&dy).unwrap());
    assert_eq!(first_mismatch(&got, &want, Tolerance::rtol(1e-4).with_atol(1e-6)), None);
}
