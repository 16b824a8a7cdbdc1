//! Integer constraint systems describing the legal tuning configurations of a
//! dispatch for each lowering pipeline.

use itertools::Itertools;
use std::fmt;

use crate::common::{ContractionSizes, DimSize, ElementType};
use crate::expr::{Constraint, Expr, Var};
use crate::generator::GenerateError;
use crate::opinfo::AttentionOpInfo;
use crate::solver::{ConstraintSolver, Domain, Model};
use crate::target::{compatible_intrinsics, MmaIntrinsic, TargetInfo};
use crate::utils::factors;

/// Workgroup tiles are never larger than this along any dimension.
pub const MAX_TILE_SIZE: DimSize = 512;
/// The most subgroups or intrinsic tiles along a single dimension.
pub const MAX_TILE_COUNT: i64 = 32;
/// Subgroup counts tried when the number of subgroups is left free.
pub const FREE_SUBGROUP_RANGE: (i64, i64) = (1, 10);

/// Variable declarations and constraints, independent of any solver.
///
/// Variables are declared in the order a solver should branch on them:
/// choices with few candidates first, then tile sizes, then quantities derived
/// from both.
#[derive(Debug, Clone, Default)]
pub struct ConstraintModel {
    names: Vec<String>,
    domains: Vec<Domain>,
    constraints: Vec<Constraint>,
}

/// The operands of a contraction-like problem, after any pipeline adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionProblem {
    pub sizes: ContractionSizes,
    pub lhs_type: ElementType,
    pub rhs_type: ElementType,
    pub res_type: ElementType,
}

#[derive(Debug, Clone)]
pub struct ContractionVars {
    pub subgroup_size: Var,
    pub intrinsic_mn: Var,
    pub intrinsic_k: Var,
    pub sg_m_cnt: Var,
    pub sg_n_cnt: Var,
    pub subgroup_m: Vec<Var>,
    pub subgroup_n: Vec<Var>,
    pub m: Vec<Var>,
    pub n: Vec<Var>,
    pub k: Vec<Var>,
    pub wg: [Var; 3],
}

#[derive(Debug, Clone)]
pub struct AttentionVars {
    pub subgroup_size: Var,
    pub qk_intrinsic_mn: Var,
    pub qk_intrinsic_k: Var,
    pub pv_intrinsic_mn: Var,
    pub pv_intrinsic_k: Var,
    pub sg_m_cnt: Var,
    pub sg_n_cnt: Var,
    pub m: Var,
    pub n: Var,
    pub k: Var,
    /// 1 if the QK result layout can feed the PV matmul directly, else 0.
    pub can_reuse_qk_output_for_pv_input: Var,
}

impl ConstraintModel {
    pub fn var(&mut self, name: impl Into<String>, domain: Domain) -> Var {
        let var = Var(self.names.len() as u32);
        self.names.push(name.into());
        self.domains.push(domain);
        var
    }

    pub fn require(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Declares every variable and adds every constraint to a fresh `solver`.
    pub fn load_into<S: ConstraintSolver + ?Sized>(&self, solver: &mut S) {
        for (i, (name, domain)) in self.names.iter().zip(&self.domains).enumerate() {
            let var = solver.new_var(name, domain.clone());
            assert_eq!(var, Var(i as u32), "solver already had variables");
        }
        for constraint in &self.constraints {
            solver.add_constraint(constraint.clone());
        }
    }

    /// Returns `true` if the assignment in `model` lies in every domain and
    /// satisfies every constraint.
    pub fn is_satisfied_by(&self, model: &Model) -> bool {
        let lookup = model.lookup();
        model.values().len() == self.domains.len()
            && self
                .domains
                .iter()
                .zip(model.values())
                .all(|(d, v)| d.contains(*v))
            && self.constraints.iter().all(|c| c.holds(&lookup))
    }
}

impl fmt::Display for ConstraintModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.constraints
                .iter()
                .map(|c| c.with_names(&self.names))
                .join(", ")
        )
    }
}

impl ContractionProblem {
    /// The sizes of the innermost M, N and K dimensions.
    fn trailing_sizes(&self) -> (DimSize, DimSize, DimSize) {
        let last = |sizes: &[DimSize]| sizes.last().copied().expect("empty dimension group");
        (
            last(&self.sizes.m),
            last(&self.sizes.n),
            last(&self.sizes.k),
        )
    }
}

/// Square intrinsics able to compute `lhs x rhs -> acc`, or an error if there
/// are none.
fn square_intrinsics(
    target: &TargetInfo,
    lhs: ElementType,
    rhs: ElementType,
    acc: ElementType,
) -> Result<Vec<MmaIntrinsic>, GenerateError> {
    let intrinsics = compatible_intrinsics(lhs, rhs, acc, &target.mma_intrinsics)
        .into_iter()
        .filter(|i| {
            let (m, n, _) = i.mnk_shape();
            m == n
        })
        .collect::<Vec<_>>();
    if intrinsics.is_empty() {
        return Err(GenerateError::NoCompatibleIntrinsic {
            arch: target.arch.clone(),
            lhs,
            rhs,
            acc,
        });
    }
    Ok(intrinsics)
}

/// Declares `mn` and `k` variables constrained to the shape of one of `intrinsics`.
fn declare_intrinsic(
    model: &mut ConstraintModel,
    prefix: &str,
    intrinsics: &[MmaIntrinsic],
) -> (Var, Var) {
    let mn = model.var(
        format!("{prefix}intrinsic_mn"),
        Domain::values(intrinsics.iter().map(|i| i.mnk_shape().0)),
    );
    let k = model.var(
        format!("{prefix}intrinsic_k"),
        Domain::values(intrinsics.iter().map(|i| i.mnk_shape().2)),
    );
    model.require(Constraint::any(intrinsics.iter().map(|i| {
        let (m, _, ik) = i.mnk_shape();
        Constraint::all([Constraint::eq(mn, m), Constraint::eq(k, ik)])
    })));
    (mn, k)
}

/// Declares the subgroup counts along M and N. With `num_subgroups` of 0, their
/// product may be anything in [FREE_SUBGROUP_RANGE].
fn declare_subgroup_counts(model: &mut ConstraintModel, num_subgroups: u32) -> (Var, Var) {
    let sg_m_cnt = model.var("sg_m_cnt", Domain::range(1, MAX_TILE_COUNT));
    let sg_n_cnt = model.var("sg_n_cnt", Domain::range(1, MAX_TILE_COUNT));
    if num_subgroups > 0 {
        let num_subgroups = i64::from(num_subgroups);
        model.require(Constraint::divides(sg_m_cnt, num_subgroups));
        model.require(Constraint::eq(
            sg_n_cnt,
            Expr::from(num_subgroups).floor_div(sg_m_cnt),
        ));
    } else {
        let (lo, hi) = FREE_SUBGROUP_RANGE;
        model.require(Constraint::ge(sg_m_cnt * sg_n_cnt, lo));
        model.require(Constraint::le(sg_m_cnt * sg_n_cnt, hi));
    }
    (sg_m_cnt, sg_n_cnt)
}

fn declare_group(
    model: &mut ConstraintModel,
    prefix: &str,
    len: usize,
    mut trailing_domain: impl FnMut() -> Domain,
    leading_value: i64,
) -> Vec<Var> {
    (0..len)
        .map(|i| {
            let domain = if i + 1 == len {
                trailing_domain()
            } else {
                Domain::values([leading_value])
            };
            model.var(format!("{prefix}{i}"), domain)
        })
        .collect()
}

/// `size` rounded up to a multiple of the value of `extent`.
fn padded(size: DimSize, extent: Var) -> Expr {
    ((extent + (size - 1)).floor_div(extent)) * extent
}

fn last(vars: &[Var]) -> Var {
    *vars.last().expect("empty dimension group")
}

/// Constraints for contraction-like dispatches lowered with vector distribution.
///
/// Tile sizes are in elements. Subgroup tile variables are unused and pinned to 0.
pub fn vector_distribute_contraction(
    problem: &ContractionProblem,
    target: &TargetInfo,
    num_subgroups: u32,
) -> Result<(ConstraintModel, ContractionVars), GenerateError> {
    let intrinsics = square_intrinsics(
        target,
        problem.lhs_type,
        problem.rhs_type,
        problem.res_type,
    )?;
    let (m_size, n_size, k_size) = problem.trailing_sizes();
    let max_threads = i64::from(target.max_workgroup_threads);

    let mut model = ConstraintModel::default();
    let subgroup_size = model.var(
        "subgroup_size",
        Domain::values(target.subgroup_size_choices.iter().map(|&s| i64::from(s))),
    );
    let (imn, ik) = declare_intrinsic(&mut model, "", &intrinsics);
    let (sg_m_cnt, sg_n_cnt) = declare_subgroup_counts(&mut model, num_subgroups);
    let subgroup_m = declare_group(&mut model, "subgroup_m", problem.sizes.m.len(), || Domain::values([0]), 0);
    let subgroup_n = declare_group(&mut model, "subgroup_n", problem.sizes.n.len(), || Domain::values([0]), 0);
    let m = declare_group(
        &mut model,
        "m",
        problem.sizes.m.len(),
        || Domain::range(1, m_size.min(MAX_TILE_SIZE)),
        1,
    );
    let n = declare_group(
        &mut model,
        "n",
        problem.sizes.n.len(),
        || Domain::range(1, n_size.min(MAX_TILE_SIZE)),
        1,
    );
    let k = declare_group(
        &mut model,
        "k",
        problem.sizes.k.len(),
        || Domain::range(1, k_size.min(MAX_TILE_SIZE)),
        1,
    );
    let wg = [
        model.var("wg_x", Domain::range(1, max_threads)),
        model.var("wg_y", Domain::range(1, max_threads)),
        model.var("wg_z", Domain::range(1, 1)),
    ];
    let (tm, tn, tk) = (last(&m), last(&n), last(&k));

    for &v in subgroup_m.iter().chain(&subgroup_n) {
        model.require(Constraint::eq(v, 0));
    }

    // Tiles are whole multiples of the intrinsic, split evenly across subgroups.
    model.require(Constraint::ge(tm, imn));
    model.require(Constraint::divides(sg_m_cnt * imn, tm));
    model.require(Constraint::le(Expr::from(tm).floor_div(sg_m_cnt * imn), MAX_TILE_COUNT));
    model.require(Constraint::divides(imn, m_size).implies(Constraint::divides(tm, m_size)));

    model.require(Constraint::ge(tn, imn));
    model.require(Constraint::divides(sg_n_cnt * imn, tn));
    model.require(Constraint::le(Expr::from(tn).floor_div(sg_n_cnt * imn), MAX_TILE_COUNT));
    model.require(Constraint::divides(imn, n_size).implies(Constraint::divides(tn, n_size)));

    model.require(Constraint::ge(tk, ik));
    model.require(Constraint::divides(ik, tk));
    model.require(Constraint::le(Expr::from(tk).floor_div(ik), MAX_TILE_COUNT));
    model.require(Constraint::divides(imn, tk));
    model.require(Constraint::divides(ik, k_size).implies(Constraint::divides(tk, k_size)));

    let [wg_x, wg_y, wg_z] = wg;
    model.require(Constraint::eq(wg_x, subgroup_size * sg_n_cnt));
    model.require(Constraint::eq(wg_y, sg_m_cnt));
    model.require(Constraint::eq(wg_z, 1));
    let threads = wg_x * wg_y * wg_z;
    model.require(Constraint::le(threads.clone(), max_threads));
    model.require(Constraint::any([
        Constraint::le(wg_x, tn),
        Constraint::le(wg_x, tm),
    ]));
    // Operand tiles are copied to shared memory cooperatively by every thread.
    model.require(Constraint::divides(threads.clone(), tk * tn));
    model.require(Constraint::divides(threads, tk * tm));

    model.require(Constraint::le(
        tm * tk * problem.lhs_type.size() + tk * tn * problem.rhs_type.size(),
        i64::from(target.max_workgroup_memory_bytes),
    ));

    Ok((
        model,
        ContractionVars {
            subgroup_size,
            intrinsic_mn: imn,
            intrinsic_k: ik,
            sg_m_cnt,
            sg_n_cnt,
            subgroup_m,
            subgroup_n,
            m,
            n,
            k,
            wg,
        },
    ))
}

/// Constraints for contraction-like dispatches lowered with tile-and-fuse.
///
/// Problem sizes are padded up to intrinsic multiples. Workgroup tiles are in
/// elements, the reduction tile counts intrinsic K steps, and subgroup tiles
/// count intrinsics.
pub fn tile_and_fuse_contraction(
    problem: &ContractionProblem,
    target: &TargetInfo,
    num_subgroups: u32,
) -> Result<(ConstraintModel, ContractionVars), GenerateError> {
    let intrinsics = square_intrinsics(
        target,
        problem.lhs_type,
        problem.rhs_type,
        problem.res_type,
    )?;
    let (m_size, n_size, k_size) = problem.trailing_sizes();
    let min_ik = intrinsics
        .iter()
        .map(|i| i.mnk_shape().2)
        .min()
        .unwrap_or(1);
    let max_threads = i64::from(target.max_workgroup_threads);

    let mut model = ConstraintModel::default();
    let subgroup_size = model.var(
        "subgroup_size",
        Domain::values(target.subgroup_size_choices.iter().map(|&s| i64::from(s))),
    );
    let (imn, ik) = declare_intrinsic(&mut model, "", &intrinsics);
    let (sg_m_cnt, sg_n_cnt) = declare_subgroup_counts(&mut model, num_subgroups);
    let subgroup_m = declare_group(
        &mut model,
        "subgroup_m",
        problem.sizes.m.len(),
        || Domain::range(1, MAX_TILE_COUNT),
        1,
    );
    let subgroup_n = declare_group(
        &mut model,
        "subgroup_n",
        problem.sizes.n.len(),
        || Domain::range(1, MAX_TILE_COUNT),
        1,
    );
    let m = declare_group(&mut model, "m", problem.sizes.m.len(), || Domain::range(1, MAX_TILE_SIZE), 1);
    let n = declare_group(&mut model, "n", problem.sizes.n.len(), || Domain::range(1, MAX_TILE_SIZE), 1);
    let k = declare_group(
        &mut model,
        "k",
        problem.sizes.k.len(),
        || Domain::range(1, divrem::DivCeil::div_ceil(k_size, min_ik).max(1)),
        1,
    );
    let wg = [
        model.var("wg_x", Domain::range(1, max_threads)),
        model.var("wg_y", Domain::range(1, 1)),
        model.var("wg_z", Domain::range(1, 1)),
    ];
    let (tm, tn, tk) = (last(&m), last(&n), last(&k));
    let (sg_m, sg_n) = (last(&subgroup_m), last(&subgroup_n));

    let m_padded = padded(m_size, imn);
    let n_padded = padded(n_size, imn);
    let k_padded = padded(k_size, ik);

    model.require(Constraint::eq(tm, sg_m_cnt * sg_m * imn));
    model.require(Constraint::le(tm, m_padded.clone()));
    model.require(Constraint::divides(tm, m_padded));

    model.require(Constraint::eq(tn, sg_n_cnt * sg_n * imn));
    model.require(Constraint::le(tn, n_padded.clone()));
    model.require(Constraint::divides(tn, n_padded));

    model.require(Constraint::le(tk * ik, k_padded.clone()));
    model.require(Constraint::divides(tk * ik, k_padded));

    let [wg_x, wg_y, wg_z] = wg;
    model.require(Constraint::eq(wg_x, sg_m_cnt * sg_n_cnt * subgroup_size));
    model.require(Constraint::eq(wg_y, 1));
    model.require(Constraint::eq(wg_z, 1));
    model.require(Constraint::le(wg_x, max_threads));

    model.require(Constraint::le(
        tm * tk * ik * problem.lhs_type.size() + tk * ik * tn * problem.rhs_type.size(),
        i64::from(target.max_workgroup_memory_bytes),
    ));

    Ok((
        model,
        ContractionVars {
            subgroup_size,
            intrinsic_mn: imn,
            intrinsic_k: ik,
            sg_m_cnt,
            sg_n_cnt,
            subgroup_m,
            subgroup_n,
            m,
            n,
            k,
            wg,
        },
    ))
}

/// Constraints for attention lowered with vector distribution.
///
/// The problem is the pair of matmuls `S = Q·Kᵀ` and `O = P·V`. `m` tiles the
/// query sequence, `n` the head dimension of the result, and `k` the key
/// sequence.
pub fn vector_distribute_attention(
    op: &AttentionOpInfo,
    target: &TargetInfo,
    num_subgroups: u32,
) -> Result<(ConstraintModel, AttentionVars), GenerateError> {
    let qk = &op.qk_matmul;
    let pv = &op.pv_matmul;
    let qk_intrinsics = square_intrinsics(target, qk.lhs_type, qk.rhs_type, qk.acc_type)?;
    let pv_intrinsics = square_intrinsics(target, pv.lhs_type, pv.rhs_type, pv.acc_type)?;
    let (m_size, k1_size, k2_size, n_size) = (qk.m, qk.k, qk.n, pv.n);

    let tile_domain = |size: DimSize| {
        let size = usize::try_from(size).unwrap_or(0);
        Domain::values(
            factors(size)
                .into_iter()
                .map(|f| f as i64)
                .filter(|&f| f <= MAX_TILE_SIZE),
        )
    };

    let mut model = ConstraintModel::default();
    let subgroup_size = model.var(
        "subgroup_size",
        Domain::values(target.subgroup_size_choices.iter().map(|&s| i64::from(s))),
    );
    let (qk_mn, qk_k) = declare_intrinsic(&mut model, "qk_", &qk_intrinsics);
    let (pv_mn, pv_k) = declare_intrinsic(&mut model, "pv_", &pv_intrinsics);
    let (sg_m_cnt, sg_n_cnt) = declare_subgroup_counts(&mut model, num_subgroups);
    let m = model.var("m_tile", tile_domain(m_size));
    let n = model.var("n_tile", tile_domain(n_size));
    let k = model.var("k_tile", tile_domain(k2_size));
    let can_reuse = model.var("can_reuse_qk_output_for_pv_input", Domain::values([0, 1]));

    model.require(Constraint::divides(m, m_size));
    model.require(Constraint::divides(sg_m_cnt * qk_mn, m));
    model.require(Constraint::divides(sg_m_cnt * pv_mn, m));
    model.require(Constraint::divides(n, n_size));
    model.require(Constraint::divides(sg_n_cnt * pv_mn, n));
    model.require(Constraint::divides(k, k2_size));
    model.require(Constraint::divides(qk_mn, k));
    model.require(Constraint::divides(pv_k, k));
    model.require(Constraint::divides(qk_k, k1_size));

    model.require(Constraint::le(
        sg_m_cnt * sg_n_cnt * subgroup_size,
        i64::from(target.max_workgroup_threads),
    ));
    // Q, K and V tiles all stay resident in shared memory.
    model.require(Constraint::le(
        m * (k1_size * op.query_type.size())
            + k * (k1_size * op.key_type.size())
            + k * n * op.value_type.size(),
        i64::from(target.max_workgroup_memory_bytes),
    ));

    let layouts_match = Constraint::all([
        Constraint::eq(qk_mn, pv_mn),
        Constraint::eq(qk_k, pv_k),
    ]);
    if op.transposed_v {
        model.require(Constraint::eq(can_reuse, 0));
    } else {
        model.require(Constraint::eq(can_reuse, 1).iff(layouts_match));
    }

    Ok((
        model,
        AttentionVars {
            subgroup_size,
            qk_intrinsic_mn: qk_mn,
            qk_intrinsic_k: qk_k,
            pv_intrinsic_mn: pv_mn,
            pv_intrinsic_k: pv_k,
            sg_m_cnt,
            sg_n_cnt,
            m,
            n,
            k,
            can_reuse_qk_output_for_pv_input: can_reuse,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opinfo::AttentionShape;
    use crate::solver::FiniteDomainSolver;
    use ElementType::*;

    fn matmul_problem(m: DimSize, n: DimSize, k: DimSize, lhs: ElementType, acc: ElementType) -> ContractionProblem {
        ContractionProblem {
            sizes: ContractionSizes {
                m: vec![m],
                n: vec![n],
                k: vec![k],
                b: vec![],
            },
            lhs_type: lhs,
            rhs_type: lhs,
            res_type: acc,
        }
    }

    fn solve_all(model: &ConstraintModel, limit: usize) -> Vec<Model> {
        let mut solver = FiniteDomainSolver::new();
        model.load_into(&mut solver);
        let mut models = vec![];
        while models.len() < limit {
            let Some(m) = solver.check_and_get_model() else {
                break;
            };
            solver.exclude(&m);
            models.push(m);
        }
        models
    }

    #[test]
    fn test_vector_distribute_small_matmul() {
        let target = TargetInfo::gfx942();
        let (model, vars) =
            vector_distribute_contraction(&matmul_problem(64, 64, 64, F16, F32), &target, 4)
                .unwrap();
        let models = solve_all(&model, 100);
        assert_eq!(models.len(), 9);
        for m in &models {
            assert!(model.is_satisfied_by(m));
            assert_eq!((m[vars.sg_m_cnt], m[vars.sg_n_cnt]), (4, 1));
            assert_eq!((m[vars.intrinsic_mn], m[vars.intrinsic_k]), (16, 16));
            assert_eq!(m[last(&vars.m)], 64);
            assert_eq!(m[vars.wg[0]], 64);
            assert_eq!(m[vars.wg[1]], 4);
            assert_eq!(m[vars.subgroup_m[0]], 0);
        }
    }

    #[test]
    fn test_free_subgroup_count() {
        let target = TargetInfo::gfx942();
        let (model, vars) =
            vector_distribute_contraction(&matmul_problem(256, 256, 128, F16, F32), &target, 0)
                .unwrap();
        let models = solve_all(&model, 2000);
        assert!(!models.is_empty());
        assert!(models.iter().any(|m| m[vars.sg_m_cnt] * m[vars.sg_n_cnt] != 4));
        for m in &models {
            let count = m[vars.sg_m_cnt] * m[vars.sg_n_cnt];
            assert!((1..=10).contains(&count));
        }
    }

    #[test]
    fn test_incompatible_types_are_unsupported() {
        let target = TargetInfo::gfx942();
        let err = vector_distribute_contraction(&matmul_problem(64, 64, 64, F16, F16), &target, 4)
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_tile_and_fuse_pads_unaligned_sizes() {
        let target = TargetInfo::gfx942();
        // 100 is not a multiple of any intrinsic extent.
        let (model, vars) =
            tile_and_fuse_contraction(&matmul_problem(100, 64, 100, F16, F32), &target, 4)
                .unwrap();
        let models = solve_all(&model, 200);
        assert!(!models.is_empty());
        for m in &models {
            assert!(model.is_satisfied_by(m));
            let (imn, ik) = (m[vars.intrinsic_mn], m[vars.intrinsic_k]);
            let tm = m[last(&vars.m)];
            let m_padded = (100 + imn - 1) / imn * imn;
            assert_eq!(m_padded % tm, 0);
            assert_eq!(tm, m[vars.sg_m_cnt] * m[last(&vars.subgroup_m)] * imn);
            let k_padded = (100 + ik - 1) / ik * ik;
            assert_eq!(k_padded % (m[last(&vars.k)] * ik), 0);
            assert_eq!(m[vars.wg[0]], 4 * 64);
        }
    }

    #[test]
    fn test_multi_dimensional_groups_pin_leading_tiles() {
        let target = TargetInfo::gfx942();
        let problem = ContractionProblem {
            sizes: ContractionSizes {
                m: vec![2, 32, 64],
                n: vec![128],
                k: vec![144],
                b: vec![],
            },
            lhs_type: F16,
            rhs_type: F16,
            res_type: F32,
        };
        let (model, vars) = tile_and_fuse_contraction(&problem, &target, 4).unwrap();
        let models = solve_all(&model, 50);
        assert!(!models.is_empty());
        for m in &models {
            assert_eq!(m[vars.m[0]], 1);
            assert_eq!(m[vars.m[1]], 1);
            assert_eq!(m[vars.subgroup_m[0]], 1);
        }
    }

    fn attention(transposed_v: bool) -> AttentionOpInfo {
        AttentionOpInfo::new(
            &AttentionShape {
                batch: vec![2],
                m: vec![1024],
                k1: vec![64],
                k2: vec![1024],
                n: vec![64],
            },
            F16,
            F16,
            F16,
            F32,
            false,
            transposed_v,
        )
    }

    #[test]
    fn test_attention_reuse_flag_tracks_layouts() {
        let target = TargetInfo::gfx942();
        let (model, vars) = vector_distribute_attention(&attention(false), &target, 4).unwrap();
        let models = solve_all(&model, 500);
        assert!(!models.is_empty());
        for m in &models {
            assert!(model.is_satisfied_by(m));
            let same = m[vars.qk_intrinsic_mn] == m[vars.pv_intrinsic_mn]
                && m[vars.qk_intrinsic_k] == m[vars.pv_intrinsic_k];
            assert_eq!(m[vars.can_reuse_qk_output_for_pv_input], i64::from(same));
            assert_eq!(1024 % m[vars.m], 0);
            assert_eq!(m[vars.k] % m[vars.qk_intrinsic_mn], 0);
        }
    }

    #[test]
    fn test_transposed_v_never_reuses() {
        let target = TargetInfo::gfx942();
        let (model, vars) = vector_distribute_attention(&attention(true), &target, 4).unwrap();
        let models = solve_all(&model, 100);
        assert!(!models.is_empty());
        assert!(models
            .iter()
            .all(|m| m[vars.can_reuse_qk_output_for_pv_input] == 0));
    }
}
