// Graph tests — Builders, verification, printing and optimizer behaviour

use std::collections::HashMap;

use tern_core::{ElemKind, Error, Tensor};
use tern_graph::{optimize, CompilationMode, Function, Module, Op, OpKind, PlaceholderId};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn float(data: &[f64], shape: impl Into<tern_core::Shape>) -> Tensor {
    Tensor::from_f64_slice(data, shape, ElemKind::Float).unwrap()
}

/// Evaluate `f` node by node; returns the saved values by placeholder.
fn eval(f: &Function, inputs: &HashMap<PlaceholderId, Tensor>) -> HashMap<PlaceholderId, Tensor> {
    let mut values: Vec<Tensor> = Vec::with_capacity(f.len());
    let mut saved = HashMap::new();
    for node in f.nodes() {
        let value = match &node.op {
            Op::Input(ph) => inputs[&ph.id()].clone(),
            Op::Save(ph) => {
                let v = values[node.inputs[0].0].clone();
                saved.insert(ph.id(), v.clone());
                v
            }
            op => {
                let args: Vec<&Tensor> = node.inputs.iter().map(|id| &values[id.0]).collect();
                op.evaluate(&args, &node.ty).unwrap()
            }
        };
        values.push(value);
    }
    saved
}

#[test]
fn test_builder_type_checks() {
    let mut m = Module::new();
    let a = m.create_placeholder(ElemKind::Float, (2, 3), "a", false).unwrap();
    let b = m.create_placeholder(ElemKind::Float, (4, 2), "b", false).unwrap();
    let i = m.create_placeholder(ElemKind::Int32, (2, 3), "i", false).unwrap();
    let f = m.create_function("f").unwrap();
    let av = f.input(&a).unwrap();
    let bv = f.input(&b).unwrap();
    let iv = f.input(&i).unwrap();

    assert!(matches!(f.add("bad", av, bv), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(f.add("bad", av, iv), Err(Error::ElemKindMismatch { .. })));
    assert!(matches!(
        f.matmul("bad", av, av),
        Err(Error::MatmulShapeMismatch { m: 2, k1: 3, k2: 2, n: 3 })
    ));
    assert!(matches!(f.reshape("bad", av, 5), Err(Error::ElementCountMismatch { .. })));

    let ba = f.matmul("ba", bv, av).unwrap();
    assert_eq!(f.ty(ba).unwrap().dims(), &[4, 3]);
    let t = f.transpose("t", ba).unwrap();
    assert_eq!(f.ty(t).unwrap().dims(), &[3, 4]);
    let r = f.reshape("r", t, (2, 6)).unwrap();
    assert_eq!(f.ty(r).unwrap().dims(), &[2, 6]);
    f.verify().unwrap();
}

#[test]
fn test_save_rules() {
    let mut m = Module::new();
    let x = m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
    let out = m.create_placeholder(ElemKind::Float, 2, "out", false).unwrap();
    let wide = m.create_placeholder(ElemKind::Float, 3, "wide", false).unwrap();
    let f = m.create_function("f").unwrap();
    let xv = f.input(&x).unwrap();

    assert!(matches!(f.save("bad", xv, &wide), Err(Error::ShapeMismatch { .. })));
    f.save("ret", xv, &out).unwrap();
    assert!(f.save("again", xv, &out).is_err());
    assert_eq!(f.output_placeholders().len(), 1);
    assert_eq!(f.input_placeholders()[0].name(), "x");
}

#[test]
fn test_dump_lists_every_node() {
    let mut m = Module::new();
    let x = m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
    let out = m.create_placeholder(ElemKind::Float, 2, "out", false).unwrap();
    let f = m.create_function("show").unwrap();
    let xv = f.input(&x).unwrap();
    let s = f.add("s", xv, xv).unwrap();
    f.save("ret", s, &out).unwrap();

    let text = f.dump();
    assert!(text.starts_with("function show {\n"));
    assert!(text.contains("%0 = input @x"));
    assert!(text.contains("%1 = add %0, %0"));
    assert!(text.contains("%2 = save %1 -> @out"));
    assert!(text.ends_with('}'));
}

#[test]
fn test_erase_function() {
    let mut m = Module::new();
    m.create_function("f").unwrap();
    m.create_function("g").unwrap();
    assert!(matches!(m.create_function("f"), Err(Error::DuplicateName { .. })));

    let f = m.erase_function("f").unwrap();
    assert_eq!(f.name(), "f");
    assert_eq!(m.functions().len(), 1);
    assert!(matches!(m.erase_function("f"), Err(Error::UnknownFunction { .. })));
}

#[test]
fn test_optimize_preserves_results() {
    init_logging();
    let mut m = Module::new();
    let x = m.create_placeholder(ElemKind::Float, (2, 2), "x", false).unwrap();
    let out = m.create_placeholder(ElemKind::Float, (2, 2), "out", false).unwrap();
    let f = m.create_function("net").unwrap();
    let xv = f.input(&x).unwrap();
    let xv2 = f.input(&x).unwrap();
    let c1 = f.constant("c1", float(&[1.0, 2.0, 3.0, 4.0], (2, 2)));
    let c2 = f.constant("c2", float(&[-3.0, -3.0, -3.0, -3.0], (2, 2)));
    let bias = f.add("bias", c1, c2).unwrap();
    let mm = f.matmul("mm", xv, xv2).unwrap();
    let s = f.add("s", mm, bias).unwrap();
    let r = f.relu("r", s).unwrap();
    f.tanh("dead", r).unwrap();
    f.save("ret", r, &out).unwrap();

    let reference = f.clone();
    let stats = optimize(f, CompilationMode::Infer).unwrap();
    assert_eq!(stats.folded, 1);
    assert_eq!(stats.merged, 1);
    assert_eq!(stats.fused, 1);
    assert!(stats.removed >= 1);
    assert_eq!(f.count_kind(OpKind::Tanh), 0);
    assert_eq!(f.count_kind(OpKind::AddRelu), 1);
    f.verify().unwrap();

    let inputs = HashMap::from([(x.id(), float(&[1.0, -1.0, 0.5, 2.0], (2, 2)))]);
    let want = eval(&reference, &inputs);
    let got = eval(f, &inputs);
    assert!(got[&out.id()].approx_eq(&want[&out.id()], 1e-6));
}

#[test]
fn test_optimize_is_idempotent() {
    let mut m = Module::new();
    let x = m.create_placeholder(ElemKind::Double, 3, "x", false).unwrap();
    let out = m.create_placeholder(ElemKind::Double, 3, "out", false).unwrap();
    let f = m.create_function("f").unwrap();
    let xv = f.input(&x).unwrap();
    let e = f.exp("e", xv).unwrap();
    let n = f.neg("n", e).unwrap();
    f.save("ret", n, &out).unwrap();

    optimize(f, CompilationMode::Infer).unwrap();
    let once = f.dump();
    let stats = optimize(f, CompilationMode::Infer).unwrap();
    assert_eq!(stats, Default::default());
    assert_eq!(f.dump(), once);
}

#[test]
fn test_optimize_drops_unsaved_function() {
    let mut m = Module::new();
    let x = m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
    let f = m.create_function("f").unwrap();
    let xv = f.input(&x).unwrap();
    f.relu("r", xv).unwrap();
    // Nothing is saved: every node is dead.
    let stats = optimize(f, CompilationMode::Train).unwrap();
    assert_eq!(stats.removed, 2);
    assert!(f.is_empty());
}
