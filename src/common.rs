use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Display;

pub type DimSize = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, enum_iterator::Sequence)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(clap::ValueEnum)]
pub enum ElementType {
    #[value(name = "f8e4m3fnuz")]
    F8E4M3Fnuz,
    #[value(name = "f8e5m2fnuz")]
    F8E5M2Fnuz,
    I8,
    F16,
    Bf16,
    F32,
    I32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DispatchKind {
    Contraction,
    Conv,
    Attention,
}

/// A tensor operand's static shape and element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ShapedType {
    pub shape: Vec<DimSize>,
    pub element_type: ElementType,
}

/// Iteration-space indices of each contraction dimension group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ContractionDimensions {
    pub batch: Vec<usize>,
    pub m: Vec<usize>,
    pub n: Vec<usize>,
    pub k: Vec<usize>,
}

/// Sizes of each contraction dimension group, in the same order as [ContractionDimensions].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ContractionSizes {
    pub m: Vec<DimSize>,
    pub n: Vec<DimSize>,
    pub k: Vec<DimSize>,
    pub b: Vec<DimSize>,
}

/// The shape of one of the two matmuls an attention op decomposes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct MatmulShapeType {
    pub m: DimSize,
    pub n: DimSize,
    pub k: DimSize,
    pub lhs_type: ElementType,
    pub rhs_type: ElementType,
    pub acc_type: ElementType,
}

/// Per-session context threaded through candidate generation.
///
/// Carries the log target generator messages are emitted under, so a caller
/// tuning several dispatches can tell their logs apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunerContext {
    log_target: Cow<'static, str>,
}

impl ElementType {
    pub fn bitwidth(&self) -> u32 {
        match self {
            ElementType::F8E4M3Fnuz | ElementType::F8E5M2Fnuz | ElementType::I8 => 8,
            ElementType::F16 | ElementType::Bf16 => 16,
            ElementType::F32 | ElementType::I32 => 32,
        }
    }

    /// The bytes required to represent a value of this type.
    pub fn size(&self) -> i64 {
        i64::from(self.bitwidth() / 8)
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::F8E4M3Fnuz => write!(f, "f8E4M3FNUZ"),
            ElementType::F8E5M2Fnuz => write!(f, "f8E5M2FNUZ"),
            ElementType::I8 => write!(f, "i8"),
            ElementType::F16 => write!(f, "f16"),
            ElementType::Bf16 => write!(f, "bf16"),
            ElementType::F32 => write!(f, "f32"),
            ElementType::I32 => write!(f, "i32"),
        }
    }
}

impl Display for DispatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchKind::Contraction => write!(f, "contraction"),
            DispatchKind::Conv => write!(f, "conv"),
            DispatchKind::Attention => write!(f, "attention"),
        }
    }
}

impl ShapedType {
    pub fn new(shape: Vec<DimSize>, element_type: ElementType) -> Self {
        ShapedType {
            shape,
            element_type,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn bitwidth(&self) -> u32 {
        self.element_type.bitwidth()
    }
}

impl ContractionDimensions {
    /// The number of loops in the iteration space.
    pub fn num_loops(&self) -> usize {
        self.batch.len() + self.m.len() + self.n.len() + self.k.len()
    }
}

impl TunerContext {
    pub fn new(log_target: impl Into<Cow<'static, str>>) -> Self {
        TunerContext {
            log_target: log_target.into(),
        }
    }

    pub fn log_target(&self) -> &str {
        &self.log_target
    }
}

impl Default for TunerContext {
    fn default() -> Self {
        TunerContext::new("gputune")
    }
}
