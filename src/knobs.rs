use serde::{Deserialize, Serialize};
use std::mem::discriminant;

/// The solved scalar knobs of a contraction-like candidate.
///
/// `m`, `n` and `k` are the (flattened) problem sizes. For tile-and-fuse
/// candidates `subgroup_m` and `subgroup_n` count intrinsics per subgroup;
/// vector distribution leaves them 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ContractionKnobs {
    pub m: i64,
    pub n: i64,
    pub k: i64,
    pub tile_m: i64,
    pub tile_n: i64,
    pub tile_k: i64,
    pub wg_x: i64,
    pub wg_y: i64,
    pub wg_z: i64,
    pub subgroup_m_cnt: i64,
    pub subgroup_n_cnt: i64,
    pub intrinsic_mn: i64,
    pub intrinsic_k: i64,
    pub subgroup_m: i64,
    pub subgroup_n: i64,
    pub subgroup_k: i64,
}

/// A candidate's knobs, tagged by the pipeline that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum KnobAssignment {
    VectorDistributeContraction(ContractionKnobs),
    TileAndFuseContraction(ContractionKnobs),
}

impl KnobAssignment {
    pub fn contraction(&self) -> &ContractionKnobs {
        match self {
            KnobAssignment::VectorDistributeContraction(knobs)
            | KnobAssignment::TileAndFuseContraction(knobs) => knobs,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            KnobAssignment::VectorDistributeContraction(_) => "VectorDistributeContraction",
            KnobAssignment::TileAndFuseContraction(_) => "TileAndFuseContraction",
        }
    }

    pub fn same_variant(&self, other: &KnobAssignment) -> bool {
        discriminant(self) == discriminant(other)
    }
}
