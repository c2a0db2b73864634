use super::*;
use crate::diagnostic::ErrorKind;

fn trace(source: &str, kernel: &str, sig: &Signature) -> Result<KernelIr, Vec<Diagnostic>> {
    let file = crate::parse_source(source).expect("parse failed");
    trace_kernel(&file, kernel, sig)
}

fn ir_text(source: &str, kernel: &str, sig: &Signature) -> String {
    match trace(source, kernel, sig) {
        Ok(ir) => ir.to_string(),
        Err(errs) => panic!("trace failed: {:?}", errs),
    }
}

fn err_kind(source: &str, kernel: &str, sig: &Signature) -> ErrorKind {
    match trace(source, kernel, sig) {
        Ok(ir) => panic!("expected an error, got:\n{}", ir),
        Err(errs) => errs[0].kind,
    }
}

fn ptrs(dtypes: &[DType]) -> Signature {
    Signature::new(dtypes.iter().map(|d| ArgKey::ptr(*d)).collect())
}

const ADD: &str = "
kernel add(Z, X, Y, const SIZE) {
    let off = arange(0, SIZE)
    store(Z + off, load(X + off) + load(Y + off))
}
";

#[test]
fn test_vector_add() {
    let sig = ptrs(&[DType::F32, DType::F32, DType::F32]).with_const("SIZE", 128i64);
    let text = ir_text(ADD, "add", &sig);
    assert!(text.contains("arange 0..128 : int32[128]"));
    assert!(text.contains("store"));
    assert!(text.contains("add"));
}

#[test]
fn test_missing_constant_is_value_error() {
    let sig = ptrs(&[DType::F32, DType::F32, DType::F32]);
    assert_eq!(err_kind(ADD, "add", &sig), ErrorKind::Value);
}

#[test]
fn test_unknown_constant_is_name_error() {
    let sig = ptrs(&[DType::F32, DType::F32, DType::F32])
        .with_const("SIZE", 128i64)
        .with_const("BLOCK", 4i64);
    assert_eq!(err_kind(ADD, "add", &sig), ErrorKind::Name);
}

#[test]
fn test_unknown_kernel_is_name_error() {
    assert_eq!(err_kind(ADD, "mul", &Signature::default()), ErrorKind::Name);
}

#[test]
fn test_int_arg_equal_to_one_becomes_constant() {
    let src = "
kernel scale(Z, n) {
    store(Z, n * 3)
}
";
    let one = Signature::new(vec![ArgKey::ptr(DType::I32), ArgKey::int_value(DType::I32, 1)]);
    let ir = trace(src, "scale", &one).unwrap();
    assert_eq!(ir.params.len(), 1);
    let many = Signature::new(vec![ArgKey::ptr(DType::I32), ArgKey::int_value(DType::I32, 32)]);
    let ir = trace(src, "scale", &many).unwrap();
    assert_eq!(ir.params.len(), 2);
    assert_eq!(ir.params[1].divisibility, 16);
}

#[test]
fn test_weak_literals_keep_block_dtype() {
    let src = "
kernel k(Z, X) {
    let x = load(X + arange(0, 16))
    store(Z + arange(0, 16), x * 2 + 0.5)
}
";
    let ir = trace(src, "k", &ptrs(&[DType::F16, DType::F16])).unwrap();
    let text = ir.to_string();
    // No widening cast: the literals were materialized as float16.
    assert!(!text.contains("= cast"), "{}", text);
}

#[test]
fn test_int_literal_promotes_to_float_block() {
    let src = "
kernel k(Z) {
    let x = arange(0, 16)
    store(Z + x, x + 1.5)
}
";
    let ir = trace(src, "k", &ptrs(&[DType::F32])).unwrap();
    let has_f32_add = ir.types.iter().any(|t| t.to_string() == "float32[16]");
    assert!(has_f32_add);
}

#[test]
fn test_constant_folding() {
    let src = "
kernel k(Z, const N) {
    let off = arange(0, N // 2 * 2)
    store(Z + off, off)
}
";
    let sig = ptrs(&[DType::I32]).with_const("N", 64i64);
    assert!(ir_text(src, "k", &sig).contains("arange 0..64"));
}

#[test]
fn test_constant_division_by_zero() {
    let src = "kernel k(const N) { let x = 4 % N }";
    let sig = Signature::default().with_const("N", 0i64);
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Value);
}

#[test]
fn test_helpers_inline_with_tuples_and_defaults() {
    let src = "
fn triple(a, b) {
    return (a + b, a - b, a * b)
}

fn answer(value = 10) {
    return value
}

kernel k(Z) {
    let x = arange(0, 8)
    let (s, d, p) = triple(x, answer())
    store(Z + x, s + d + p)
}
";
    let text = ir_text(src, "k", &ptrs(&[DType::I32]));
    assert!(text.contains("mul"));
    assert!(text.contains("sub"));
}

#[test]
fn test_keyword_arguments_to_helpers() {
    let src = "
fn pick(a, b = 0) {
    return a - b
}

kernel k(Z) {
    store(Z, pick(b = 1, a = 5))
}
";
    assert!(trace(src, "k", &ptrs(&[DType::I32])).is_ok());
}

#[test]
fn test_unexpected_keyword_is_name_error() {
    let src = "kernel k(X) { let x = load(X, mask_=None) }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::F32])), ErrorKind::Name);
}

#[test]
fn test_too_many_arguments_is_type_error() {
    let src = "kernel k(X) { let x = exp(1.0, 2.0) }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::F32])), ErrorKind::Type);
}

#[test]
fn test_const_param_needs_constant() {
    let src = "
fn block(const N) {
    return arange(0, N)
}

kernel k(X) {
    let n = load(X)
    let b = block(n)
}
";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::I32])), ErrorKind::Value);
}

#[test]
fn test_undefined_variable() {
    let src = "kernel k(X) { store(X, y) }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::I32])), ErrorKind::Name);
}

#[test]
fn test_assign_without_let() {
    let src = "kernel k(X) { y = 3 }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::I32])), ErrorKind::Name);
}

#[test]
fn test_cache_modifiers() {
    let src = "
kernel k(Z, X, const CACHE) {
    let off = arange(0, 128)
    store(Z + off, load(X + off, cache_modifier=CACHE))
}
";
    let sig = ptrs(&[DType::F32, DType::F32]).with_const("CACHE", ".cg");
    assert!(ir_text(src, "k", &sig).contains("load.cg"));
    let sig = ptrs(&[DType::F32, DType::F32]).with_const("CACHE", ".cs");
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Value);
}

#[test]
fn test_masked_load_with_other() {
    let src = "
kernel k(Z, X, n) {
    let off = arange(0, 128)
    let x = load(X + off, mask=off < n, other=0)
    store(Z + off, x, mask=off < n)
}
";
    let sig = Signature::new(vec![
        ArgKey::ptr(DType::F32),
        ArgKey::ptr(DType::F32),
        ArgKey::int_value(DType::I32, 64),
    ]);
    let text = ir_text(src, "k", &sig);
    assert!(text.contains("cmp.lt"));
    assert!(!text.contains("other=_"));
}

#[test]
fn test_other_without_mask_is_value_error() {
    let src = "kernel k(X) { let x = load(X + arange(0, 16), other=1) }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::F32])), ErrorKind::Value);
}

#[test]
fn test_non_bool_mask_is_value_error() {
    let src = "kernel k(X) { let off = arange(0, 16); let x = load(X + off, mask=off) }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::F32])), ErrorKind::Value);
}

#[test]
fn test_reductions() {
    let src = "
kernel k(Z, X) {
    let off = arange(0, 32)
    let x = load(X + off[:, None] * 16 + arange(0, 16)[None, :])
    store(Z + off, sum(x, axis=1))
    store(Z, max(x))
}
";
    let text = ir_text(src, "k", &ptrs(&[DType::I32, DType::I32]));
    assert!(text.contains("reduce.sum"));
    assert!(text.contains("reduce.max"));
}

#[test]
fn test_runtime_reduction_axis_is_shape_error() {
    let src = "kernel k(X, a) { let x = load(X + arange(0, 16)); let s = sum(x, axis=a) }";
    let sig = Signature::new(vec![ArgKey::ptr(DType::F32), ArgKey::int(DType::I32)]);
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Shape);
}

#[test]
fn test_broadcast_mismatch_is_shape_error() {
    let src = "kernel k() { let x = arange(0, 16) + arange(0, 32) }";
    assert_eq!(err_kind(src, "k", &Signature::default()), ErrorKind::Shape);
}

#[test]
fn test_bitwise_on_float_is_type_error() {
    let src = "kernel k(X) { let x = load(X) & 1 }";
    assert_eq!(err_kind(src, "k", &ptrs(&[DType::F32])), ErrorKind::Type);
}

#[test]
fn test_arange_rules() {
    let src = "kernel k() { let x = arange(0, 24) }";
    assert_eq!(err_kind(src, "k", &Signature::default()), ErrorKind::Value);
    let src = "kernel k(n) { let x = arange(0, n) }";
    let sig = Signature::new(vec![ArgKey::int(DType::I32)]);
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Value);
}

#[test]
fn test_static_if_and_unrolled_loop() {
    let src = "
kernel k(Z, const FLAG) {
    let acc = zeros(16, float32)
    for i in range(0, 4) {
        if FLAG {
            acc += i
        } else {
            acc -= i
        }
    }
    store(Z + arange(0, 16), acc)
}
";
    let sig = ptrs(&[DType::F32]).with_const("FLAG", true);
    let text = ir_text(src, "k", &sig);
    assert!(!text.contains("for "));
    assert!(!text.contains("if "));
}

#[test]
fn test_runtime_loop_with_carried_accumulator() {
    let src = "
kernel k(Z, X, n) {
    let off = arange(0, 16)
    let acc = 0
    for i in range(0, n) {
        acc += load(X + i * 16 + off)
    }
    store(Z + off, acc)
}
";
    let sig = Signature::new(vec![
        ArgKey::ptr(DType::F32),
        ArgKey::ptr(DType::F32),
        ArgKey::int(DType::I32),
    ]);
    let ir = trace(src, "k", &sig).unwrap();
    let text = ir.to_string();
    assert!(text.contains("for %"), "{}", text);
    assert!(text.contains("yield"));
    // The weak `0` was retyped to the accumulated block type.
    assert!(text.contains("iter("));
    assert!(ir.types.iter().any(|t| t.to_string() == "float32[16]"));
}

#[test]
fn test_loop_carried_type_change_is_type_error() {
    let src = "
kernel k(X, n) {
    let acc = load(X)
    for i in range(0, n) {
        acc = acc.to(float64)
    }
}
";
    let sig = Signature::new(vec![ArgKey::ptr(DType::F32), ArgKey::int(DType::I32)]);
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Type);
}

#[test]
fn test_runtime_if_merges_values() {
    let src = "
kernel k(Z, n) {
    let x = 1
    if n > 4 {
        x = n * 2
    } else {
        x = 7
    }
    store(Z, x)
}
";
    let sig = Signature::new(vec![ArgKey::ptr(DType::I32), ArgKey::int(DType::I32)]);
    let text = ir_text(src, "k", &sig);
    assert!(text.contains("if %"), "{}", text);
    assert!(text.contains("yield"));
}

#[test]
fn test_runtime_if_type_mismatch() {
    let src = "
kernel k(n) {
    let x = n
    if n > 4 {
        x = 0.5
    }
}
";
    let sig = Signature::new(vec![ArgKey::int(DType::I32)]);
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Type);
}

#[test]
fn test_block_condition_is_shape_error() {
    let src = "kernel k() { if arange(0, 4) > 1 { pass } }";
    assert_eq!(err_kind(src, "k", &Signature::default()), ErrorKind::Shape);
}

#[test]
fn test_return_inside_runtime_if() {
    let src = "
fn f(n) {
    if n > 0 {
        return 1
    }
    return 0
}

kernel k(n) {
    let x = f(n)
}
";
    let sig = Signature::new(vec![ArgKey::int(DType::I32)]);
    assert_eq!(err_kind(src, "k", &sig), ErrorKind::Value);
}

#[test]
fn test_kernel_cannot_return_value() {
    let src = "kernel k() { return 1 }";
    assert_eq!(err_kind(src, "k", &Signature::default()), ErrorKind::Value);
}

#[test]
fn test_dtype_attributes_and_casts() {
    let src = "
kernel k(Z, X) {
    let off = arange(0, 16)
    let x = load(X + off)
    let y = x.to(Z.dtype.element_ty, bitcast=True)
    store(Z + off, y)
}
";
    let text = ir_text(src, "k", &ptrs(&[DType::U32, DType::I32]));
    assert!(text.contains("bitcast"));
    assert_eq!(
        err_kind(src, "k", &ptrs(&[DType::I16, DType::I32])),
        ErrorKind::Value
    );
}

#[test]
fn test_dot_and_where() {
    let src = "
kernel k(Z, A, B) {
    let m = arange(0, 16)
    let n = arange(0, 16)
    let a = load(A + m[:, None] * 16 + n[None, :])
    let b = load(B + m[:, None] * 16 + n[None, :])
    let c = dot(a, b)
    let c = where(c > 0, c, 0)
    store(Z + m[:, None] * 16 + n[None, :], c)
}
";
    let text = ir_text(src, "k", &ptrs(&[DType::F32, DType::F16, DType::F16]));
    assert!(text.contains("dot"));
    assert!(text.contains("select"));
}

#[test]
fn test_atomics() {
    let src = "
kernel k(Z, X) {
    let x = load(X + arange(0, 16))
    let old = atomic_max(Z + arange(0, 16), x)
}
";
    assert!(trace(src, "k", &ptrs(&[DType::I32, DType::I32])).is_ok());
    assert_eq!(
        err_kind(src, "k", &ptrs(&[DType::F16, DType::F16])),
        ErrorKind::Type
    );
}

#[test]
fn test_range_outside_for() {
    let src = "kernel k() { let r = range(0, 4) }";
    assert_eq!(err_kind(src, "k", &Signature::default()), ErrorKind::Type);
}

#[test]
fn test_deterministic_ir() {
    let sig = ptrs(&[DType::F32, DType::F32, DType::F32]).with_const("SIZE", 256i64);
    assert_eq!(ir_text(ADD, "add", &sig), ir_text(ADD, "add", &sig));
}
