// Interpreter — Reference backend that walks the graph on every run
//
// Compilation only checks support and keeps a private copy of the optimized
// function. Each execution evaluates nodes in order (the node list is
// already topological) into a value table indexed by node id, reading
// placeholders from the context. Saves are collected during the walk and
// written back into the context once every node has run, so a function that
// saves into a placeholder it also reads still sees the value it was given.

use tern_core::{ElemKind, Error, Result, Tensor};
use tern_graph::{CompilationMode, Context, Function, Op, OpKind, Placeholder};

use crate::backend::{
    check_supported, load_input, store_output, Backend, BackendKind, CompiledFunction,
};

/// Portable backend supporting every operation except integer matmul.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterBackend;

impl InterpreterBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for InterpreterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn is_op_supported(&self, op: OpKind, elem: ElemKind) -> bool {
        !(op == OpKind::MatMul && !elem.is_float())
    }

    fn compile(
        &self,
        function: &Function,
        mode: CompilationMode,
    ) -> Result<Box<dyn CompiledFunction>> {
        check_supported(self, function)?;
        log::debug!(
            "interpreter: compiled '{}' ({} nodes, {})",
            function.name(),
            function.len(),
            mode
        );
        Ok(Box::new(InterpretedFunction {
            function: function.clone(),
        }))
    }
}

/// An optimized function, evaluated node by node per run.
#[derive(Debug)]
pub struct InterpretedFunction {
    function: Function,
}

impl InterpretedFunction {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let mut values: Vec<Option<Tensor>> = vec![None; self.function.len()];
        let mut saves: Vec<(&Placeholder, Tensor)> = Vec::new();
        for (i, node) in self.function.nodes().iter().enumerate() {
            log::trace!(
                "interpreter: {} %{} {} ({})",
                self.function.name(),
                i,
                node.kind(),
                node.name
            );
            let result = match &node.op {
                Op::Input(ph) => load_input(ctx, ph)?,
                Op::Save(ph) => {
                    let value = value_at(&values, node.inputs[0].0, &node.name)?;
                    // Input handles share storage with bindings the flush may overwrite.
                    saves.push((ph, value.duplicate()?));
                    continue;
                }
                op => {
                    let args = node
                        .inputs
                        .iter()
                        .map(|id| value_at(&values, id.0, &node.name))
                        .collect::<Result<Vec<_>>>()?;
                    op.evaluate(&args, &node.ty)?
                }
            };
            values[i] = Some(result);
        }

        for (ph, value) in saves {
            store_output(ctx, ph, &value)?;
        }
        Ok(())
    }
}

impl CompiledFunction for InterpretedFunction {
    fn name(&self) -> &str {
        self.function.name()
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        self.run(ctx).map_err(|e| e.in_execution(self.function.name()))
    }

    fn dump(&self) -> String {
        self.function.dump()
    }
}

fn value_at<'a>(values: &'a [Option<Tensor>], idx: usize, node_name: &str) -> Result<&'a Tensor> {
    values.get(idx).and_then(|v| v.as_ref()).ok_or_else(|| {
        Error::msg(format!(
            "node '{}' reads value %{} which has not been computed",
            node_name, idx
        ))
    })
}
