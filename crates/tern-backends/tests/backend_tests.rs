// Backend tests — Interpreter and CPU agree, CPU bundles land on disk

use tern_backends::cpu::{read_weights, Instruction};
use tern_backends::{create_backend, Backend, BackendKind, CpuBackend, CpuConfig};
use tern_core::{ElemKind, Error, Tensor};
use tern_graph::{optimize, CompilationMode, Context, Module};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() <= tol, "mismatch at {}: {} vs {} (tol={})", i, x, y, tol);
    }
}

/// `out = sigmoid(relu(x @ w + b))`, plus `t = transpose(x)`.
fn mlp_module(kind: ElemKind) -> Module {
    let mut m = Module::new();
    let x = m.create_placeholder(kind, (2, 3), "x", false).unwrap();
    let out = m.create_placeholder(kind, (2, 2), "out", false).unwrap();
    let t = m.create_placeholder(kind, (3, 2), "t", false).unwrap();

    let w = Tensor::from_f64_slice(&[0.5, -1.0, 1.5, 0.25, -0.5, 2.0], (3, 2), kind).unwrap();
    let b = Tensor::from_f64_slice(&[0.1, -0.2, 0.3, -0.4], (2, 2), kind).unwrap();

    let f = m.create_function("mlp").unwrap();
    let xv = f.input(&x).unwrap();
    let wv = f.constant("w", w);
    let bv = f.constant("b", b);
    let mm = f.matmul("mm", xv, wv).unwrap();
    let s = f.add("s", mm, bv).unwrap();
    let r = f.relu("r", s).unwrap();
    let y = f.sigmoid("y", r).unwrap();
    f.save("ret", y, &out).unwrap();
    let tv = f.transpose("tv", xv).unwrap();
    f.save("ret_t", tv, &t).unwrap();
    m
}

fn run_on(kind: BackendKind, module: &mut Module, input: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let backend = create_backend(kind);
    let f = module.function_mut("mlp").unwrap();
    optimize(f, CompilationMode::Infer).unwrap();
    let compiled = backend
        .compile(module.function("mlp").unwrap(), CompilationMode::Infer)
        .unwrap();

    let x = module.placeholder_by_name("x").unwrap().clone();
    let out = module.placeholder_by_name("out").unwrap().clone();
    let t = module.placeholder_by_name("t").unwrap().clone();
    let mut ctx = Context::new();
    ctx.insert(&x, Tensor::from_f64_slice(input, (2, 3), x.elem_kind()).unwrap());
    compiled.execute(&mut ctx).unwrap();
    (
        ctx.get(&out).unwrap().to_f64_vec(),
        ctx.get(&t).unwrap().to_f64_vec(),
    )
}

// Agreement

#[test]
fn test_cpu_matches_interpreter() {
    init_logging();
    let input = [1.0, -2.0, 0.5, 3.0, 0.0, -1.0];
    for kind in [ElemKind::Float, ElemKind::Double] {
        let (a_out, a_t) = run_on(BackendKind::Interpreter, &mut mlp_module(kind), &input);
        let (b_out, b_t) = run_on(BackendKind::Cpu, &mut mlp_module(kind), &input);
        assert_close(&a_out, &b_out, 1e-6);
        assert_eq!(a_t, b_t);
        assert_eq!(a_t, vec![1.0, 3.0, -2.0, 0.0, 0.5, -1.0]);
    }
}

#[test]
fn test_parallel_kernels_match_serial() {
    let input = [1.0, -2.0, 0.5, 3.0, 0.0, -1.0];
    let mut m1 = mlp_module(ElemKind::Double);
    let mut m2 = mlp_module(ElemKind::Double);
    for m in [&mut m1, &mut m2] {
        optimize(m.function_mut("mlp").unwrap(), CompilationMode::Infer).unwrap();
    }
    let serial = CpuBackend::new();
    let parallel = CpuBackend::with_config(CpuConfig::default().with_parallel_threshold(1));

    let mut results = Vec::new();
    for (backend, m) in [(&serial, &m1), (&parallel, &m2)] {
        let compiled = backend
            .compile(m.function("mlp").unwrap(), CompilationMode::Infer)
            .unwrap();
        let x = m.placeholder_by_name("x").unwrap();
        let out = m.placeholder_by_name("out").unwrap();
        let mut ctx = Context::new();
        ctx.insert(x, Tensor::from_f64_slice(&input, (2, 3), ElemKind::Double).unwrap());
        compiled.execute(&mut ctx).unwrap();
        results.push(ctx.get(out).unwrap().to_f64_vec());
    }
    assert_eq!(results[0], results[1]);
}

#[test]
fn test_integer_graph_on_interpreter() {
    let mut m = Module::new();
    let a = m.create_placeholder(ElemKind::Int32, 3, "a", false).unwrap();
    let b = m.create_placeholder(ElemKind::Int32, 3, "b", false).unwrap();
    let out = m.create_placeholder(ElemKind::Int32, 3, "out", false).unwrap();
    let f = m.create_function("idiv").unwrap();
    let av = f.input(&a).unwrap();
    let bv = f.input(&b).unwrap();
    let q = f.div("q", av, bv).unwrap();
    f.save("ret", q, &out).unwrap();

    let interp = create_backend(BackendKind::Interpreter);
    let compiled = interp.compile(m.function("idiv").unwrap(), CompilationMode::Infer).unwrap();
    let mut ctx = Context::new();
    ctx.insert(&a, Tensor::from_slice(&[7i32, -7, 9], 3).unwrap());
    ctx.insert(&b, Tensor::from_slice(&[2i32, 2, 3], 3).unwrap());
    compiled.execute(&mut ctx).unwrap();
    assert_eq!(ctx.get(&out).unwrap().to_vec::<i32>().unwrap(), vec![3, -3, 3]);

    let cpu = create_backend(BackendKind::Cpu);
    let err = cpu.compile(m.function("idiv").unwrap(), CompilationMode::Infer).unwrap_err();
    assert!(matches!(err, Error::BackendCompile { .. }));
}

// Context semantics

#[test]
fn test_output_written_into_bound_tensor() {
    for kind in [BackendKind::Interpreter, BackendKind::Cpu] {
        let mut m = mlp_module(ElemKind::Float);
        optimize(m.function_mut("mlp").unwrap(), CompilationMode::Infer).unwrap();
        let compiled = create_backend(kind)
            .compile(m.function("mlp").unwrap(), CompilationMode::Infer)
            .unwrap();

        let x = m.placeholder_by_name("x").unwrap();
        let out = m.placeholder_by_name("out").unwrap();
        let mut ctx = Context::new();
        ctx.insert(x, Tensor::from_f64_slice(&[1.0; 6], (2, 3), ElemKind::Float).unwrap());
        let handle = ctx.allocate(out).unwrap();
        compiled.execute(&mut ctx).unwrap();
        assert!(ctx.get(out).unwrap().shares_storage_with(&handle));
        assert!(handle.to_f64_vec().iter().all(|&v| v > 0.5));
    }
}

/// Runs `w <- -w; out <- w + w` with `w` bound to [1, 2]; returns (w, out).
fn run_update_step(kind: BackendKind) -> (Vec<f64>, Vec<f64>) {
    let mut m = Module::new();
    let w = m.create_placeholder(ElemKind::Float, 2, "w", true).unwrap();
    let out = m.create_placeholder(ElemKind::Float, 2, "out", false).unwrap();
    let f = m.create_function("step").unwrap();
    let wv = f.input(&w).unwrap();
    let n = f.neg("n", wv).unwrap();
    f.save("update", n, &w).unwrap();
    let s = f.add("s", wv, wv).unwrap();
    f.save("ret", s, &out).unwrap();
    optimize(f, CompilationMode::Infer).unwrap();

    let compiled = create_backend(kind)
        .compile(m.function("step").unwrap(), CompilationMode::Infer)
        .unwrap();
    let mut ctx = Context::new();
    let bound = Tensor::from_f64_slice(&[1.0, 2.0], 2, ElemKind::Float).unwrap();
    ctx.insert(&w, bound.clone());
    compiled.execute(&mut ctx).unwrap();
    assert!(ctx.get(&w).unwrap().shares_storage_with(&bound));
    (bound.to_f64_vec(), ctx.get(&out).unwrap().to_f64_vec())
}

#[test]
fn test_save_into_read_placeholder_sees_old_value() {
    init_logging();
    let interp = run_update_step(BackendKind::Interpreter);
    let cpu = run_update_step(BackendKind::Cpu);
    assert_eq!(interp, cpu);
    assert_eq!(interp.0, vec![-1.0, -2.0]);
    assert_eq!(interp.1, vec![2.0, 4.0]);
}

#[test]
fn test_same_tensor_bound_as_input_and_output() {
    for kind in [BackendKind::Interpreter, BackendKind::Cpu] {
        let mut m = Module::new();
        let x = m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
        let y = m.create_placeholder(ElemKind::Float, 2, "y", false).unwrap();
        let f = m.create_function("f").unwrap();
        let xv = f.input(&x).unwrap();
        let e = f.exp("e", xv).unwrap();
        f.save("ret", e, &y).unwrap();
        // Reads `x` again after the save into `y`.
        let xv2 = f.input(&x).unwrap();
        let r = f.relu("r", xv2).unwrap();
        f.save("ret_x", r, &x).unwrap();

        let compiled = create_backend(kind)
            .compile(m.function("f").unwrap(), CompilationMode::Infer)
            .unwrap();
        let shared = Tensor::from_f64_slice(&[0.0, -1.0], 2, ElemKind::Float).unwrap();
        let mut ctx = Context::new();
        ctx.insert(&x, shared.clone());
        ctx.insert(&y, shared.clone());
        compiled.execute(&mut ctx).unwrap();
        // Both saves land in the shared storage; the later one wins.
        assert_eq!(shared.to_f64_vec(), vec![0.0, 0.0], "{kind}");
    }
}

#[test]
fn test_missing_input_is_execution_error() {
    let mut m = mlp_module(ElemKind::Float);
    optimize(m.function_mut("mlp").unwrap(), CompilationMode::Infer).unwrap();
    let compiled = CpuBackend::new()
        .compile(m.function("mlp").unwrap(), CompilationMode::Infer)
        .unwrap();
    let mut ctx = Context::new();
    let err = compiled.execute(&mut ctx).unwrap_err();
    assert!(matches!(err, Error::Execution { ref function, .. } if function.as_str() == "mlp"));
}

// Plan

#[test]
fn test_cpu_plan_frees_and_fuses() {
    let mut m = mlp_module(ElemKind::Float);
    optimize(m.function_mut("mlp").unwrap(), CompilationMode::Infer).unwrap();
    let plan = tern_backends::cpu::Plan::compile(m.function("mlp").unwrap()).unwrap();
    assert_eq!(plan.stats.num_fused, 1);
    assert!(plan.stats.num_frees > 0);
    assert!(plan
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::MatMul { m: 2, k: 3, n: 2, .. })));

    let compiled = CpuBackend::new()
        .compile(m.function("mlp").unwrap(), CompilationMode::Infer)
        .unwrap();
    let text = compiled.dump();
    assert!(text.contains("=== cpu: mlp ==="), "{text}");
    assert!(text.contains("add_relu"), "{text}");
}

// Bundles

#[test]
fn test_cpu_bundle_files() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut m = mlp_module(ElemKind::Float);
    optimize(m.function_mut("mlp").unwrap(), CompilationMode::Infer).unwrap();

    let backend = CpuBackend::new();
    assert!(backend.supports_bundles());
    let info = backend
        .save_bundle(m.function("mlp").unwrap(), CompilationMode::Infer, dir.path(), "tiny_mlp")
        .unwrap();

    let header = std::fs::read_to_string(dir.path().join("tiny_mlp.h")).unwrap();
    assert!(header.contains(
        "int tiny_mlp(uint8_t *constantWeight, uint8_t *mutableWeight, uint8_t *activations);"
    ));
    assert!(header.contains("#define TINY_MLP_MEM_ALIGN 64"));
    assert!(header.contains("#define TINY_MLP_x 0"));

    let plan = std::fs::read_to_string(&info.plan_path).unwrap();
    assert_eq!(plan.lines().next(), Some("entry tiny_mlp"));

    let (wh, region) = read_weights(&info.weights_path).unwrap();
    assert_eq!(wh.network, "tiny_mlp");
    assert_eq!(wh.constants.len(), 2);
    assert_eq!(region.len(), wh.constant_mem_size);
    assert_eq!(info.constant_mem_size, wh.constant_mem_size);
    for entry in &wh.constants {
        assert_eq!(entry.offset % 64, 0);
    }
    let w = wh.constants.iter().find(|e| e.name == "w").unwrap();
    assert_eq!(w.dims, vec![3, 2]);
    assert_eq!(w.elem_kind, "float");
    let first = f32::from_le_bytes(region[w.offset..w.offset + 4].try_into().unwrap());
    assert_eq!(first, 0.5);

    let raw: serde_json::Value = {
        let bytes = std::fs::read(&info.weights_path).unwrap();
        let len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        serde_json::from_slice(&bytes[8..8 + len]).unwrap()
    };
    assert_eq!(raw["alignment"], 64);
}

#[test]
fn test_bundle_rejects_bad_names_and_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let m = mlp_module(ElemKind::Float);
    let f = m.function("mlp").unwrap();

    let err = CpuBackend::new()
        .save(f, CompilationMode::Infer, dir.path(), "not-a-symbol")
        .unwrap_err();
    assert!(matches!(err, Error::Bundle { .. }));

    let err = create_backend(BackendKind::Interpreter)
        .save(f, CompilationMode::Infer, dir.path(), "net")
        .unwrap_err();
    assert!(matches!(err, Error::BundleUnsupported { .. }));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_failed_bundle_write_leaves_no_files() {
    let dir = tempfile::tempdir().unwrap();
    // A directory squats on the weights file name.
    std::fs::create_dir(dir.path().join("mynet.weights")).unwrap();
    let mut m = mlp_module(ElemKind::Float);
    optimize(m.function_mut("mlp").unwrap(), CompilationMode::Infer).unwrap();

    let err = CpuBackend::new()
        .save(m.function("mlp").unwrap(), CompilationMode::Infer, dir.path(), "mynet")
        .unwrap_err();
    match err {
        Error::Bundle { ref network, ref reason } => {
            assert_eq!(network, "mynet");
            assert!(reason.contains("mynet.weights"), "{reason}");
        }
        other => panic!("expected a bundle error, got {other:?}"),
    }

    let mut left: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, vec!["mynet.weights".to_string()]);
    assert!(dir.path().join("mynet.weights").is_dir());
}
