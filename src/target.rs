use crate::common::{DimSize, ElementType};

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A hardware matrix-multiply-accumulate instruction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, enum_iterator::Sequence,
)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[allow(non_camel_case_types)]
pub enum MmaIntrinsic {
    MfmaF32_16x16x4F32,
    MfmaF32_16x16x16F16,
    MfmaF32_32x32x8F16,
    MfmaF32_16x16x16Bf16,
    MfmaF32_32x32x8Bf16,
    MfmaF32_16x16x32F8E4M3Fnuz,
    MfmaF32_32x32x16F8E4M3Fnuz,
    MfmaI32_16x16x32I8,
    MfmaI32_32x32x16I8,
    WmmaF32_16x16x16F16,
    WmmaF16_16x16x16F16,
    WmmaI32_16x16x16I8,
}

/// Capabilities of a GPU architecture that candidate generation depends on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetInfo {
    pub arch: String,
    pub mma_intrinsics: Vec<MmaIntrinsic>,
    pub subgroup_size_choices: Vec<u32>,
    pub simds_per_workgroup: u32,
    pub max_workgroup_threads: u32,
    pub max_workgroup_memory_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetId {
    Gfx942,
    Gfx1100,
}

impl MmaIntrinsic {
    pub fn mnk_shape(&self) -> (DimSize, DimSize, DimSize) {
        match self {
            MmaIntrinsic::MfmaF32_16x16x4F32 => (16, 16, 4),
            MmaIntrinsic::MfmaF32_16x16x16F16
            | MmaIntrinsic::MfmaF32_16x16x16Bf16
            | MmaIntrinsic::WmmaF32_16x16x16F16
            | MmaIntrinsic::WmmaF16_16x16x16F16
            | MmaIntrinsic::WmmaI32_16x16x16I8 => (16, 16, 16),
            MmaIntrinsic::MfmaF32_32x32x8F16 | MmaIntrinsic::MfmaF32_32x32x8Bf16 => (32, 32, 8),
            MmaIntrinsic::MfmaF32_16x16x32F8E4M3Fnuz | MmaIntrinsic::MfmaI32_16x16x32I8 => {
                (16, 16, 32)
            }
            MmaIntrinsic::MfmaF32_32x32x16F8E4M3Fnuz | MmaIntrinsic::MfmaI32_32x32x16I8 => {
                (32, 32, 16)
            }
        }
    }

    /// The `(lhs, rhs, acc)` element types.
    pub fn operand_types(&self) -> (ElementType, ElementType, ElementType) {
        use ElementType::*;
        match self {
            MmaIntrinsic::MfmaF32_16x16x4F32 => (F32, F32, F32),
            MmaIntrinsic::MfmaF32_16x16x16F16
            | MmaIntrinsic::MfmaF32_32x32x8F16
            | MmaIntrinsic::WmmaF32_16x16x16F16 => (F16, F16, F32),
            MmaIntrinsic::MfmaF32_16x16x16Bf16 | MmaIntrinsic::MfmaF32_32x32x8Bf16 => {
                (Bf16, Bf16, F32)
            }
            MmaIntrinsic::MfmaF32_16x16x32F8E4M3Fnuz | MmaIntrinsic::MfmaF32_32x32x16F8E4M3Fnuz => {
                (F8E4M3Fnuz, F8E4M3Fnuz, F32)
            }
            MmaIntrinsic::MfmaI32_16x16x32I8
            | MmaIntrinsic::MfmaI32_32x32x16I8
            | MmaIntrinsic::WmmaI32_16x16x16I8 => (I8, I8, I32),
            MmaIntrinsic::WmmaF16_16x16x16F16 => (F16, F16, F16),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MmaIntrinsic::MfmaF32_16x16x4F32 => "MFMA_F32_16x16x4_F32",
            MmaIntrinsic::MfmaF32_16x16x16F16 => "MFMA_F32_16x16x16_F16",
            MmaIntrinsic::MfmaF32_32x32x8F16 => "MFMA_F32_32x32x8_F16",
            MmaIntrinsic::MfmaF32_16x16x16Bf16 => "MFMA_F32_16x16x16_BF16",
            MmaIntrinsic::MfmaF32_32x32x8Bf16 => "MFMA_F32_32x32x8_BF16",
            MmaIntrinsic::MfmaF32_16x16x32F8E4M3Fnuz => "MFMA_F32_16x16x32_F8E4M3FNUZ",
            MmaIntrinsic::MfmaF32_32x32x16F8E4M3Fnuz => "MFMA_F32_32x32x16_F8E4M3FNUZ",
            MmaIntrinsic::MfmaI32_16x16x32I8 => "MFMA_I32_16x16x32_I8",
            MmaIntrinsic::MfmaI32_32x32x16I8 => "MFMA_I32_32x32x16_I8",
            MmaIntrinsic::WmmaF32_16x16x16F16 => "WMMA_F32_16x16x16_F16",
            MmaIntrinsic::WmmaF16_16x16x16F16 => "WMMA_F16_16x16x16_F16",
            MmaIntrinsic::WmmaI32_16x16x16I8 => "WMMA_I32_16x16x16_I8",
        }
    }

    fn accepts(&self, lhs: ElementType, rhs: ElementType, acc: ElementType) -> bool {
        self.operand_types() == (lhs, rhs, acc)
    }
}

impl Display for MmaIntrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Filters `available` down to the intrinsics that take `lhs` and `rhs` operands and
/// accumulate into `acc`.
pub fn compatible_intrinsics(
    lhs: ElementType,
    rhs: ElementType,
    acc: ElementType,
    available: &[MmaIntrinsic],
) -> Vec<MmaIntrinsic> {
    available
        .iter()
        .copied()
        .filter(|i| i.accepts(lhs, rhs, acc))
        .collect()
}

/// Looks up the intrinsic with exactly the given shape and operand types.
pub fn find_mma_intrinsic(
    acc: ElementType,
    m: DimSize,
    n: DimSize,
    k: DimSize,
    lhs: ElementType,
    rhs: ElementType,
    available: &[MmaIntrinsic],
) -> Option<MmaIntrinsic> {
    available
        .iter()
        .copied()
        .find(|i| i.mnk_shape() == (m, n, k) && i.accepts(lhs, rhs, acc))
}

impl TargetInfo {
    /// CDNA3 (MI300-series).
    pub fn gfx942() -> Self {
        TargetInfo {
            arch: String::from("gfx942"),
            mma_intrinsics: vec![
                MmaIntrinsic::MfmaF32_16x16x4F32,
                MmaIntrinsic::MfmaF32_16x16x16F16,
                MmaIntrinsic::MfmaF32_32x32x8F16,
                MmaIntrinsic::MfmaF32_16x16x16Bf16,
                MmaIntrinsic::MfmaF32_32x32x8Bf16,
                MmaIntrinsic::MfmaF32_16x16x32F8E4M3Fnuz,
                MmaIntrinsic::MfmaF32_32x32x16F8E4M3Fnuz,
                MmaIntrinsic::MfmaI32_16x16x32I8,
                MmaIntrinsic::MfmaI32_32x32x16I8,
            ],
            subgroup_size_choices: vec![64],
            simds_per_workgroup: 4,
            max_workgroup_threads: 1024,
            max_workgroup_memory_bytes: 65536,
        }
    }

    /// RDNA3.
    pub fn gfx1100() -> Self {
        TargetInfo {
            arch: String::from("gfx1100"),
            mma_intrinsics: vec![
                MmaIntrinsic::WmmaF32_16x16x16F16,
                MmaIntrinsic::WmmaF16_16x16x16F16,
                MmaIntrinsic::WmmaI32_16x16x16I8,
            ],
            subgroup_size_choices: vec![32, 64],
            simds_per_workgroup: 2,
            max_workgroup_threads: 1024,
            max_workgroup_memory_bytes: 65536,
        }
    }
}

impl TargetId {
    pub fn target_info(&self) -> TargetInfo {
        match self {
            TargetId::Gfx942 => TargetInfo::gfx942(),
            TargetId::Gfx1100 => TargetInfo::gfx1100(),
        }
    }
}
