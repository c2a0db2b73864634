//! Error classification at parse, specialization and launch time.

use std::io::Write;

use tessel::{Arg, ConstValue, DType, Device, Error, ErrorKind, LaunchOptions, Module};

fn launch_err(src: &str, args_of: impl Fn(&Device) -> Vec<Arg>, consts: &[(&str, ConstValue)]) -> Error {
    let module = Module::parse(src).expect("module");
    let name = module.kernel_names()[0].to_string();
    let kernel = module.kernel(&name).unwrap();
    let device = Device::new();
    let args = args_of(&device);
    match kernel.launch(&device, 1u32, &args, consts, &LaunchOptions::default()) {
        Ok(_) => panic!("expected {} to fail", name),
        Err(e) => e,
    }
}

fn f32_buffers(n: usize) -> impl Fn(&Device) -> Vec<Arg> {
    move |d| (0..n).map(|_| Arg::from(&d.zeros(DType::F32, 64))).collect()
}

#[test]
fn test_syntax_error() {
    let err = Module::parse("kernel k(X) { let = 3 }").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Syntax));
    assert!(!err.diagnostics().is_empty());
}

#[test]
fn test_checked_at_parse_time() {
    let err = Module::parse("fn f(x) { return g(x) }\nfn g(x) { return f(x) }\n").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Value));
    let err = Module::parse("kernel k(X) { launch_all(X) }").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Name));
}

#[test]
fn test_undefined_name() {
    let err = launch_err("kernel k(X) { store(X, y) }", f32_buffers(1), &[]);
    assert_eq!(err.kind(), Some(ErrorKind::Name));
}

#[test]
fn test_type_errors() {
    let err = launch_err("kernel k(X) { store(X, load(X) & 1) }", f32_buffers(1), &[]);
    assert_eq!(err.kind(), Some(ErrorKind::Type));
    let err = launch_err(
        "kernel k(X) { let y = load(X).to(bfloat16, bitcast=True) }",
        |d| vec![Arg::from(&d.zeros(DType::I16, 4))],
        &[],
    );
    assert_eq!(err.kind(), Some(ErrorKind::Type));
}

#[test]
fn test_shape_errors() {
    let err = launch_err(
        "kernel k(X) { let y = load(X + arange(0, 16)) + load(X + arange(0, 32)) }",
        f32_buffers(1),
        &[],
    );
    assert_eq!(err.kind(), Some(ErrorKind::Shape));
    let err = launch_err(
        "kernel k(X) { store(X, load(X + arange(0, 16))) }",
        f32_buffers(1),
        &[],
    );
    assert_eq!(err.kind(), Some(ErrorKind::Shape));
}

#[test]
fn test_value_errors() {
    let err = launch_err("kernel k(X) { let r = arange(0, 24) }", f32_buffers(1), &[]);
    assert_eq!(err.kind(), Some(ErrorKind::Value));
    let err = launch_err(
        "kernel k(X, const N) { let r = arange(0, N) }",
        f32_buffers(1),
        &[],
    );
    assert_eq!(err.kind(), Some(ErrorKind::Value));
    let err = launch_err(
        "kernel k(X, const N) { let r = 8 // N }",
        f32_buffers(1),
        &[("N", 0i64.into())],
    );
    assert_eq!(err.kind(), Some(ErrorKind::Value));
}

#[test]
fn test_diagnostics_point_into_the_source() {
    let src = "kernel k(X) { store(X, missing) }";
    let err = launch_err(src, f32_buffers(1), &[]);
    let diag = &err.diagnostics()[0];
    assert!(diag.to_string().starts_with("NameError: "), "{}", diag);
    assert_eq!(&src[diag.span.start as usize..diag.span.end as usize], "missing");
}

#[test]
fn test_argument_mismatch_is_a_launch_error() {
    let module = Module::parse("kernel k(X) { pass }").unwrap();
    let kernel = module.kernel("k").unwrap();
    let device = Device::new();
    let f = device.zeros(DType::F32, 4);
    let i = device.zeros(DType::I32, 4);
    let compiled = kernel
        .launch(&device, 1u32, &[Arg::from(&f)], &[], &LaunchOptions::default())
        .unwrap();
    let err = compiled
        .run(&device, &tessel::Grid::from(1u32), &[Arg::from(&i)])
        .unwrap_err();
    assert!(matches!(err, Error::Launch(_)), "{}", err);
}

#[test]
fn test_bad_grid_is_a_launch_error() {
    let module = Module::parse("kernel k(X) { pass }").unwrap();
    let kernel = module.kernel("k").unwrap();
    let device = Device::new();
    let x = device.zeros(DType::F32, 4);
    let err = kernel
        .launch(&device, 0u32, &[Arg::from(&x)], &[], &LaunchOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
    let err = kernel
        .launch(&device, (1u32, 1u32), &[Arg::from(&x)], &[], &LaunchOptions::num_warps(5))
        .unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
}

#[test]
fn test_out_of_bounds_access_faults() {
    let src = "
kernel oob(X) {
    let off = arange(0, 1024)
    store(X + off, load(X + off) + 1)
}
";
    let module = Module::parse(src).unwrap();
    let device = Device::new();
    let x = device.upload(&[7.0f32; 16]);
    let err = module
        .kernel("oob")
        .unwrap()
        .launch(&device, 1u32, &[Arg::from(&x)], &[], &LaunchOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Fault(_)), "{}", err);
    assert_eq!(device.download::<f32>(&x).unwrap(), vec![7.0; 16]);
}

#[test]
fn test_download_dtype_mismatch() {
    let device = Device::new();
    let x = device.upload(&[1i32, 2]);
    assert!(matches!(device.download::<f32>(&x), Err(Error::Launch(_))));
}

#[test]
fn test_module_from_path() {
    let mut file = tempfile::Builder::new().suffix(".tsl").tempfile().unwrap();
    writeln!(file, "kernel fill(X) {{ store(X + arange(0, 4), 3) }}").unwrap();
    let module = Module::from_path(file.path()).unwrap();
    assert_eq!(module.kernel_names(), vec!["fill"]);

    let device = Device::new();
    let x = device.zeros(DType::I32, 4);
    module
        .kernel("fill")
        .unwrap()
        .launch(&device, 1u32, &[Arg::from(&x)], &[], &LaunchOptions::default())
        .unwrap();
    assert_eq!(device.download::<i32>(&x).unwrap(), vec![3; 4]);

    let missing = file.path().with_extension("missing");
    assert!(matches!(Module::from_path(missing), Err(Error::Io(_))));
}
