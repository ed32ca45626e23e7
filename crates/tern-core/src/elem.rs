use std::fmt;

// ElemKind — Element kinds a tensor can hold
//
// Every tensor and every placeholder carries an ElemKind. The kind decides
// the element size in bundles and how a computed f64 value is coerced back
// into the tensor's value domain:
//
//   Float  — 32-bit IEEE float, the default for activations and weights
//   Double — 64-bit IEEE float
//   Int8   — signed byte, saturating
//   Int32  — signed 32-bit integer, saturating
//   Index  — unsigned size type, used for labels and gather indices
//
// Storage is always f64 internally; the kind only narrows the values that
// can live in it. Backends ask support questions per (op kind, elem kind).

/// Enum of all supported element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElemKind {
    Float,
    Double,
    Int8,
    Int32,
    Index,
}

impl ElemKind {
    /// All kinds, in declaration order.
    pub const ALL: [ElemKind; 5] = [
        ElemKind::Float,
        ElemKind::Double,
        ElemKind::Int8,
        ElemKind::Int32,
        ElemKind::Index,
    ];

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElemKind::Float => 4,
            ElemKind::Double => 8,
            ElemKind::Int8 => 1,
            ElemKind::Int32 => 4,
            ElemKind::Index => 8,
        }
    }

    /// Whether this kind is a floating-point kind.
    pub fn is_float(&self) -> bool {
        matches!(self, ElemKind::Float | ElemKind::Double)
    }

    /// Coerce an f64 into this kind's value domain.
    ///
    /// Integer kinds round to nearest and saturate at their bounds; `Index`
    /// never goes below zero. NaN becomes zero for integer kinds.
    pub fn coerce(&self, v: f64) -> f64 {
        match self {
            ElemKind::Float => v as f32 as f64,
            ElemKind::Double => v,
            ElemKind::Int8 => saturate(v, i8::MIN as f64, i8::MAX as f64),
            ElemKind::Int32 => saturate(v, i32::MIN as f64, i32::MAX as f64),
            ElemKind::Index => saturate(v, 0.0, u64::MAX as f64),
        }
    }

    /// Encode one (already coerced) value as little-endian bytes.
    pub fn encode_le(&self, v: f64, out: &mut Vec<u8>) {
        match self {
            ElemKind::Float => out.extend_from_slice(&(v as f32).to_le_bytes()),
            ElemKind::Double => out.extend_from_slice(&v.to_le_bytes()),
            ElemKind::Int8 => out.extend_from_slice(&(v as i8).to_le_bytes()),
            ElemKind::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            ElemKind::Index => out.extend_from_slice(&(v as u64).to_le_bytes()),
        }
    }

    /// Short lowercase name, also accepted by `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElemKind::Float => "float",
            ElemKind::Double => "double",
            ElemKind::Int8 => "i8",
            ElemKind::Int32 => "i32",
            ElemKind::Index => "index",
        }
    }
}

fn saturate(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.round().clamp(lo, hi)
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ElemKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        ElemKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::Error::msg(format!("unknown element kind '{s}'")))
    }
}

// WithElemKind — Bridge from Rust scalar types to ElemKind
//
// Lets callers build tensors from typed slices:
//
//   let t = Tensor::from_slice(&[1.0f32, 2.0, 3.0], 3)?;
//
// and read them back with `to_vec::<f32>()`.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait WithElemKind:
    Copy + Send + Sync + 'static + num_traits::NumCast + num_traits::Zero + fmt::Debug
{
    /// The corresponding ElemKind variant.
    const KIND: ElemKind;

    /// Convert this value to f64.
    fn to_f64(self) -> f64 {
        num_traits::cast::<Self, f64>(self).unwrap_or(0.0)
    }

    /// Create a value of this type from f64, coercing into range first.
    fn from_f64(v: f64) -> Self {
        num_traits::cast::<f64, Self>(Self::KIND.coerce(v)).unwrap_or_else(Self::zero)
    }
}

impl WithElemKind for f32 {
    const KIND: ElemKind = ElemKind::Float;
}

impl WithElemKind for f64 {
    const KIND: ElemKind = ElemKind::Double;
}

impl WithElemKind for i8 {
    const KIND: ElemKind = ElemKind::Int8;
}

impl WithElemKind for i32 {
    const KIND: ElemKind = ElemKind::Int32;
}

impl WithElemKind for u64 {
    const KIND: ElemKind = ElemKind::Index;
}
