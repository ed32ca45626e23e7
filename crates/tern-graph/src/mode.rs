use std::fmt;

/// What a function is being compiled for.
///
/// The optimizer and every backend receive the mode. Inference allows
/// rewrites that merge operations; training keeps each operation distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompilationMode {
    #[default]
    Infer,
    Train,
}

impl CompilationMode {
    pub fn is_training(&self) -> bool {
        matches!(self, CompilationMode::Train)
    }
}

impl fmt::Display for CompilationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilationMode::Infer => f.write_str("infer"),
            CompilationMode::Train => f.write_str("train"),
        }
    }
}
