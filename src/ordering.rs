use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt::{self, Display};

use crate::knobs::{ContractionKnobs, KnobAssignment};
use crate::target::TargetInfo;
use crate::utils::{arith_intensity, is_mult_simd_num, is_pow2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum CandidateOrderKind {
    #[value(name = "no-sort")]
    NoSort,
    Shuffle,
    Heuristic,
}

/// A lexicographically compared sort key. Smaller keys rank first.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey(pub SmallVec<[f64; 3]>);

pub type KeyFn<'a> = &'a dyn Fn(&KnobAssignment) -> SortKey;

impl Display for CandidateOrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateOrderKind::NoSort => write!(f, "no-sort"),
            CandidateOrderKind::Shuffle => write!(f, "shuffle"),
            CandidateOrderKind::Heuristic => write!(f, "heuristic"),
        }
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl From<(bool, bool, f64)> for SortKey {
    fn from((a, b, c): (bool, bool, f64)) -> Self {
        SortKey(SmallVec::from_buf([f64::from(u8::from(a)), f64::from(u8::from(b)), c]))
    }
}

impl From<i64> for SortKey {
    fn from(value: i64) -> Self {
        SortKey(smallvec::smallvec![value as f64])
    }
}

impl From<f64> for SortKey {
    fn from(value: f64) -> Self {
        SortKey(smallvec::smallvec![value])
    }
}

/// Prefers power-of-two reduction tiles, then subgroup counts filling every
/// SIMD, then lower intrinsic arithmetic intensity.
pub fn vector_distribute_contraction_sort_key(
    knob: &ContractionKnobs,
    simds_per_workgroup: u32,
) -> SortKey {
    SortKey::from((
        !is_pow2(knob.tile_k),
        !is_mult_simd_num(knob.subgroup_m_cnt * knob.subgroup_n_cnt, simds_per_workgroup),
        arith_intensity(knob.intrinsic_mn, knob.intrinsic_mn, knob.intrinsic_k),
    ))
}

/// The built-in sort key for a knob variant, if there is one.
pub fn default_sort_key(knob: &KnobAssignment, target: &TargetInfo) -> Option<SortKey> {
    match knob {
        KnobAssignment::VectorDistributeContraction(k) => Some(
            vector_distribute_contraction_sort_key(k, target.simds_per_workgroup),
        ),
        KnobAssignment::TileAndFuseContraction(_) => None,
    }
}

/// Returns the order candidates should be tried in, as indices into `knobs`.
///
/// `key_fn` overrides the built-in key for the variant of the first knob.
/// Knobs without a key sort after all others. Shuffling draws from the thread
/// RNG; use [reorder_assignments_with_rng] for a reproducible order.
pub fn reorder_assignments(
    knobs: &[Option<KnobAssignment>],
    strategy: CandidateOrderKind,
    key_fn: Option<KeyFn<'_>>,
    target: &TargetInfo,
) -> Vec<usize> {
    reorder_assignments_with_rng(knobs, strategy, key_fn, target, &mut thread_rng())
}

pub fn reorder_assignments_with_rng<R: Rng + ?Sized>(
    knobs: &[Option<KnobAssignment>],
    strategy: CandidateOrderKind,
    key_fn: Option<KeyFn<'_>>,
    target: &TargetInfo,
    rng: &mut R,
) -> Vec<usize> {
    debug!("Selected candidate ordering strategy: {strategy}");

    let mut order = (0..knobs.len()).collect::<Vec<_>>();
    if knobs.is_empty() {
        return order;
    }

    match strategy {
        CandidateOrderKind::NoSort => order,
        CandidateOrderKind::Shuffle => {
            order.shuffle(rng);
            order
        }
        CandidateOrderKind::Heuristic => {
            let first = knobs[0].as_ref();
            let keys = match (key_fn, first) {
                (Some(key_fn), _) => knobs
                    .iter()
                    .map(|k| k.as_ref().map(key_fn))
                    .collect::<Vec<_>>(),
                (None, Some(first)) if default_sort_key(first, target).is_some() => {
                    debug!("Selected sort key for {}", first.variant_name());
                    knobs
                        .iter()
                        .map(|k| {
                            k.as_ref()
                                .filter(|k| k.same_variant(first))
                                .and_then(|k| default_sort_key(k, target))
                        })
                        .collect()
                }
                _ => {
                    warn!(
                        "No sort key defined for knob type {}.",
                        first.map_or("None", |k| k.variant_name())
                    );
                    return order;
                }
            };
            // Stable, so equal keys keep their generation order.
            order.sort_by(|&a, &b| match (&keys[a], &keys[b]) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
            order
        }
    }
}

/// Moves `items` into the order given by a permutation of their indices.
pub fn apply_permutation<T>(items: Vec<T>, order: &[usize]) -> Vec<T> {
    assert_eq!(items.len(), order.len(), "permutation length mismatch");
    let mut slots = items.into_iter().map(Some).collect::<Vec<_>>();
    order
        .iter()
        .map(|&i| slots[i].take().expect("index repeated in permutation"))
        .collect()
}
