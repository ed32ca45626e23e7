use crate::elem::ElemKind;
use crate::shape::Shape;

/// All errors that can occur within tern.
///
/// One enum covers the whole stack: tensor arithmetic, graph construction,
/// backend compilation, execution and the engine's registry and binding
/// helpers. Every variant carries the identifier it failed on so callers can
/// report it without extra bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ── Engine / registry ──
    /// A compiled function was requested by a name that is not registered,
    /// or the nameless form was used while nothing is compiled.
    /// An empty name means the nameless form found nothing.
    #[error(
        "no compiled function {}",
        if name.is_empty() { "is registered".to_string() } else { format!("named '{name}'") }
    )]
    NoSuchFunction { name: String },

    /// The nameless form was used while several functions are compiled.
    #[error(
        "{} compiled functions are registered ({}), a name is required",
        names.len(),
        names.join(", ")
    )]
    AmbiguousFunction { names: Vec<String> },

    /// The optimizer or the backend rejected a function.
    #[error("failed to compile '{function}': {reason}")]
    BackendCompile { function: String, reason: String },

    /// The backend failed while running a compiled function.
    #[error("execution of '{function}' failed: {source}")]
    Execution {
        function: String,
        #[source]
        source: Box<Error>,
    },

    /// `save` was called on a backend that cannot emit bundles.
    #[error("backend '{backend}' cannot export standalone bundles")]
    BundleUnsupported { backend: String },

    /// Bundle export failed after the backend accepted the request.
    #[error("bundle '{network}' could not be written: {reason}")]
    Bundle { network: String, reason: String },

    // ── Graph / binding ──
    /// A placeholder name is not declared in the module.
    #[error("unknown placeholder '{name}'")]
    UnknownPlaceholder { name: String },

    /// A function name is not declared in the module.
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    /// A function or placeholder name is already taken in the module.
    #[error("name '{name}' is already used in module")]
    DuplicateName { name: String },

    /// Two parallel lists (placeholders and tensors) differ in length.
    #[error("{what}: {expected} placeholders but {got} tensors")]
    ArityMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// `run_batch` inputs do not share a compatible leading dimension.
    #[error("batch shape mismatch for placeholder '{placeholder}': {reason}")]
    BatchShapeMismatch { placeholder: String, reason: String },

    /// A placeholder read by a compiled function has no tensor in the context.
    #[error("placeholder '{name}' is not bound in the context")]
    UnboundPlaceholder { name: String },

    // ── Tensor ──
    /// Shape mismatch between two values.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Element kind mismatch between two values.
    #[error("element kind mismatch: expected {expected}, got {got}")]
    ElemKindMismatch { expected: ElemKind, got: ElemKind },

    /// Operation requires a specific rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when creating from a slice or reshaping.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication dimension mismatch.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Wrap this error as a runtime failure of `function`.
    pub fn in_execution(self, function: impl Into<String>) -> Self {
        match self {
            e @ Error::Execution { .. } => e,
            e => Error::Execution {
                function: function.into(),
                source: Box::new(e),
            },
        }
    }

    /// Wrap this error as a compilation failure of `function`.
    pub fn in_compile(self, function: impl Into<String>) -> Self {
        match self {
            e @ Error::BackendCompile { .. } => e,
            e => Error::BackendCompile {
                function: function.into(),
                reason: e.to_string(),
            },
        }
    }
}

/// Convenience Result type used throughout tern.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
