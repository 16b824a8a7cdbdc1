use enum_dispatch::enum_dispatch;
use itertools::iproduct;
use log::{debug, info, trace};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Display};

use crate::common::{
    ContractionDimensions, ContractionSizes, DimSize, DispatchKind, ElementType, TunerContext,
};
use crate::compilation::{
    CompilationInfo, Configuration, DecompositionConfig, LoweringConfig, PipelineOptions,
    PipelineOptionsSearchSpace, SubgroupBasis, TranslationInfo, TuningConfiguration,
};
use crate::constraints::{
    tile_and_fuse_contraction, vector_distribute_attention, vector_distribute_contraction,
    AttentionVars, ConstraintModel, ContractionProblem, ContractionVars,
};
use crate::expr::Var;
use crate::knobs::{ContractionKnobs, KnobAssignment};
use crate::opinfo::{AttentionOpInfo, ContractionOpInfo, ConvolutionOpInfo, OpInfo};
use crate::ordering::{apply_permutation, reorder_assignments_with_rng, CandidateOrderKind};
use crate::solver::{ConstraintSolver, FiniteDomainSolver, Model};
use crate::target::{find_mma_intrinsic, MmaIntrinsic, TargetInfo};

/// The codegen lowering pipeline a candidate is generated for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum,
)]
pub enum CodegenPipeline {
    VectorDistribute,
    TileAndFuse,
}

/// Options shaping the candidate search space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Subgroups per workgroup. 0 lets the count vary.
    pub num_subgroups: u32,
    /// Each candidate is emitted once per entry.
    pub allowed_waves_per_eu: Vec<u32>,
    pub pipeline_options_search_space: PipelineOptionsSearchSpace,
}

#[derive(thiserror::Error, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum GenerateError {
    #[error("No constraint generator for {kind} dispatches on the {pipeline} pipeline")]
    UnsupportedPipeline {
        kind: DispatchKind,
        pipeline: CodegenPipeline,
    },
    #[error("Unsupported dispatch: {0}")]
    UnsupportedDispatch(String),
    #[error("{arch} has no intrinsic computing {lhs} x {rhs} -> {acc}")]
    NoCompatibleIntrinsic {
        arch: String,
        lhs: ElementType,
        rhs: ElementType,
        acc: ElementType,
    },
    #[error("No intrinsic of shape {m}x{n}x{k} computing {lhs} x {rhs} -> {acc}")]
    NoMatchingIntrinsic {
        m: DimSize,
        n: DimSize,
        k: DimSize,
        lhs: ElementType,
        rhs: ElementType,
        acc: ElementType,
    },
}

#[enum_dispatch]
pub trait ConstraintGenerator {
    /// Builds the constraint system for this dispatch, or fails if `pipeline`
    /// cannot lower it.
    fn constraint_system(
        &self,
        ctx: &TunerContext,
        target: &TargetInfo,
        pipeline: CodegenPipeline,
        options: &GeneratorOptions,
    ) -> Result<ConstraintSystem, GenerateError>;

    /// Returns a lazy sequence of candidates, each a list of configurations to
    /// be applied together.
    fn generate_solutions(
        &self,
        ctx: &TunerContext,
        target: &TargetInfo,
        pipeline: CodegenPipeline,
        options: &GeneratorOptions,
    ) -> Result<SolutionIter, GenerateError> {
        Ok(self
            .constraint_system(ctx, target, pipeline, options)?
            .solve_with(FiniteDomainSolver::new()))
    }
}

#[derive(Debug, Clone)]
pub struct ContractionConstraintGenerator {
    pub op_info: ContractionOpInfo,
}

#[derive(Debug, Clone)]
pub struct ConvolutionConstraintGenerator {
    pub op_info: ConvolutionOpInfo,
}

#[derive(Debug, Clone)]
pub struct AttentionConstraintGenerator {
    pub op_info: AttentionOpInfo,
}

#[derive(Debug, Clone)]
#[enum_dispatch(ConstraintGenerator)]
pub enum OpConstraintGenerator {
    Contraction(ContractionConstraintGenerator),
    Convolution(ConvolutionConstraintGenerator),
    Attention(AttentionConstraintGenerator),
}

/// A constraint model paired with the rules for turning its models into
/// candidates.
#[derive(Debug)]
pub struct ConstraintSystem {
    model: ConstraintModel,
    emitter: Emitter,
    log_target: String,
}

/// Enumerates candidates by repeatedly solving, blocking each solved
/// assignment before its candidates are handed out.
///
/// A failure to derive a candidate from a solution is yielded once, after
/// which the sequence ends.
pub struct SolutionIter<S = FiniteDomainSolver> {
    solver: S,
    emitter: Emitter,
    pending: VecDeque<Vec<TuningConfiguration>>,
    error: Option<GenerateError>,
    done: bool,
    solutions_found: usize,
    log_target: String,
}

#[derive(Debug, Clone)]
enum Emitter {
    Contraction(ContractionEmitter),
    Attention(AttentionEmitter),
}

#[derive(Debug, Clone)]
struct ContractionEmitter {
    pipeline: CodegenPipeline,
    dims: ContractionDimensions,
    problem: ContractionProblem,
    vars: ContractionVars,
    intrinsics: Vec<MmaIntrinsic>,
    pipeline_options: Vec<PipelineOptions>,
    waves_per_eu: Vec<u32>,
}

#[derive(Debug, Clone)]
struct AttentionEmitter {
    op_info: AttentionOpInfo,
    vars: AttentionVars,
    intrinsics: Vec<MmaIntrinsic>,
    search_space: PipelineOptionsSearchSpace,
    waves_per_eu: Vec<u32>,
}

impl Display for CodegenPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenPipeline::VectorDistribute => write!(f, "LLVMGPUVectorDistribute"),
            CodegenPipeline::TileAndFuse => write!(f, "LLVMGPUTileAndFuse"),
        }
    }
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            num_subgroups: 4,
            allowed_waves_per_eu: vec![2],
            pipeline_options_search_space: PipelineOptionsSearchSpace::default(),
        }
    }
}

impl GenerateError {
    /// Returns `true` if the dispatch should be skipped rather than treated as
    /// a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            GenerateError::UnsupportedPipeline { .. }
                | GenerateError::UnsupportedDispatch(_)
                | GenerateError::NoCompatibleIntrinsic { .. }
        )
    }
}

impl From<OpInfo> for OpConstraintGenerator {
    fn from(op_info: OpInfo) -> Self {
        match op_info {
            OpInfo::Contraction(op_info) => ContractionConstraintGenerator { op_info }.into(),
            OpInfo::Convolution(op_info) => ConvolutionConstraintGenerator { op_info }.into(),
            OpInfo::Attention(op_info) => AttentionConstraintGenerator { op_info }.into(),
        }
    }
}

/// Rewrites a convolution bound for tile-and-fuse as an implicit GEMM: its K
/// dimensions collapse into a single dimension spanning their product, and the
/// IGEMM pipeline option is forced on. Other dispatches are left unchanged.
pub fn adjust_problem_size_for_pipeline(
    dims: &mut ContractionDimensions,
    sizes: &mut ContractionSizes,
    kind: DispatchKind,
    search_space: &mut PipelineOptionsSearchSpace,
    pipeline: CodegenPipeline,
) {
    if pipeline != CodegenPipeline::TileAndFuse || kind != DispatchKind::Conv {
        return;
    }
    search_space.use_igemm_convolution = vec![Some(true)];
    dims.k.truncate(1);
    sizes.k = vec![sizes.k.iter().product()];
}

#[allow(clippy::too_many_arguments)]
fn contraction_system(
    ctx: &TunerContext,
    target: &TargetInfo,
    pipeline: CodegenPipeline,
    options: &GeneratorOptions,
    kind: DispatchKind,
    dims: &ContractionDimensions,
    sizes: &ContractionSizes,
    (lhs_type, rhs_type, res_type): (ElementType, ElementType, ElementType),
) -> Result<ConstraintSystem, GenerateError> {
    let mut dims = dims.clone();
    let mut sizes = sizes.clone();
    let mut search_space = options.pipeline_options_search_space.clone();
    adjust_problem_size_for_pipeline(&mut dims, &mut sizes, kind, &mut search_space, pipeline);
    debug!(target: ctx.log_target(), "{:?},{:?},{:?}", sizes.m, sizes.n, sizes.k);

    let problem = ContractionProblem {
        sizes,
        lhs_type,
        rhs_type,
        res_type,
    };
    let (model, vars) = match pipeline {
        CodegenPipeline::VectorDistribute => {
            vector_distribute_contraction(&problem, target, options.num_subgroups)?
        }
        CodegenPipeline::TileAndFuse => {
            tile_and_fuse_contraction(&problem, target, options.num_subgroups)?
        }
    };
    debug!(target: ctx.log_target(), "Initial constraints: {model}");

    Ok(ConstraintSystem {
        model,
        emitter: Emitter::Contraction(ContractionEmitter {
            pipeline,
            dims,
            problem,
            vars,
            intrinsics: target.mma_intrinsics.clone(),
            pipeline_options: search_space.combinations(),
            waves_per_eu: options.allowed_waves_per_eu.clone(),
        }),
        log_target: ctx.log_target().to_string(),
    })
}

impl ConstraintGenerator for ContractionConstraintGenerator {
    fn constraint_system(
        &self,
        ctx: &TunerContext,
        target: &TargetInfo,
        pipeline: CodegenPipeline,
        options: &GeneratorOptions,
    ) -> Result<ConstraintSystem, GenerateError> {
        let op = &self.op_info;
        contraction_system(
            ctx,
            target,
            pipeline,
            options,
            DispatchKind::Contraction,
            &op.dims,
            &op.matmul_size,
            (
                op.lhs_type.element_type,
                op.rhs_type.element_type,
                op.res_type.element_type,
            ),
        )
    }
}

impl ConstraintGenerator for ConvolutionConstraintGenerator {
    fn constraint_system(
        &self,
        ctx: &TunerContext,
        target: &TargetInfo,
        pipeline: CodegenPipeline,
        options: &GeneratorOptions,
    ) -> Result<ConstraintSystem, GenerateError> {
        let op = &self.op_info;
        if !op.has_supported_layout() {
            return Err(GenerateError::UnsupportedDispatch(format!(
                "{:?} convolution layout",
                op.layout
            )));
        }
        contraction_system(
            ctx,
            target,
            pipeline,
            options,
            DispatchKind::Conv,
            &op.dims,
            &op.matmul_size,
            (
                op.lhs_type.element_type,
                op.rhs_type.element_type,
                op.res_type.element_type,
            ),
        )
    }
}

impl ConstraintGenerator for AttentionConstraintGenerator {
    fn constraint_system(
        &self,
        ctx: &TunerContext,
        target: &TargetInfo,
        pipeline: CodegenPipeline,
        options: &GeneratorOptions,
    ) -> Result<ConstraintSystem, GenerateError> {
        if pipeline != CodegenPipeline::VectorDistribute {
            return Err(GenerateError::UnsupportedPipeline {
                kind: DispatchKind::Attention,
                pipeline,
            });
        }
        let (model, vars) = vector_distribute_attention(&self.op_info, target, options.num_subgroups)?;
        debug!(target: ctx.log_target(), "Initial constraints: {model}");

        Ok(ConstraintSystem {
            model,
            emitter: Emitter::Attention(AttentionEmitter {
                op_info: self.op_info.clone(),
                vars,
                intrinsics: target.mma_intrinsics.clone(),
                search_space: options.pipeline_options_search_space.clone(),
                waves_per_eu: options.allowed_waves_per_eu.clone(),
            }),
            log_target: ctx.log_target().to_string(),
        })
    }
}

impl ConstraintSystem {
    pub fn model(&self) -> &ConstraintModel {
        &self.model
    }

    /// Loads the system into `solver`, which must have no variables yet.
    pub fn solve_with<S: ConstraintSolver>(self, mut solver: S) -> SolutionIter<S> {
        self.model.load_into(&mut solver);
        SolutionIter {
            solver,
            emitter: self.emitter,
            pending: VecDeque::new(),
            error: None,
            done: false,
            solutions_found: 0,
            log_target: self.log_target,
        }
    }
}

impl<S: ConstraintSolver> SolutionIter<S> {
    /// Returns `true` if another call to `next` will yield an item.
    ///
    /// May solve for the next assignment.
    pub fn has_more(&mut self) -> bool {
        self.fill();
        !self.pending.is_empty() || self.error.is_some()
    }

    pub fn solutions_found(&self) -> usize {
        self.solutions_found
    }

    fn fill(&mut self) {
        while self.pending.is_empty() && self.error.is_none() && !self.done {
            let Some(model) = self.solver.check_and_get_model() else {
                debug!(
                    target: self.log_target.as_str(),
                    "Constraints exhausted after {} solutions", self.solutions_found
                );
                self.done = true;
                return;
            };
            trace!(
                target: self.log_target.as_str(),
                "Solution #{}: {:?}", self.solutions_found, model.values()
            );
            let emitted = self.emitter.emit(&model);
            self.solver.exclude(&model);
            self.solutions_found += 1;
            match emitted {
                Ok(candidates) => self.pending.extend(candidates),
                Err(e) => self.error = Some(e),
            }
        }
    }
}

impl<S: ConstraintSolver> Iterator for SolutionIter<S> {
    type Item = Result<Vec<TuningConfiguration>, GenerateError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fill();
        if let Some(candidate) = self.pending.pop_front() {
            return Some(Ok(candidate));
        }
        let error = self.error.take()?;
        self.done = true;
        Some(Err(error))
    }
}

impl Emitter {
    fn emit(&self, model: &Model) -> Result<Vec<Vec<TuningConfiguration>>, GenerateError> {
        match self {
            Emitter::Contraction(e) => e.emit(model),
            Emitter::Attention(e) => e.emit(model),
        }
    }
}

fn lookup_intrinsic(
    (m, n, k): (DimSize, DimSize, DimSize),
    (lhs, rhs, acc): (ElementType, ElementType, ElementType),
    available: &[MmaIntrinsic],
) -> Result<MmaIntrinsic, GenerateError> {
    find_mma_intrinsic(acc, m, n, k, lhs, rhs, available).ok_or(
        GenerateError::NoMatchingIntrinsic {
            m,
            n,
            k,
            lhs,
            rhs,
            acc,
        },
    )
}

fn set_tile_sizes(tiles: &mut [i64], dims: &[usize], sizes: impl IntoIterator<Item = i64>) {
    for (&d, size) in dims.iter().zip(sizes) {
        tiles[d] = size;
    }
}

impl ContractionEmitter {
    fn emit(&self, model: &Model) -> Result<Vec<Vec<TuningConfiguration>>, GenerateError> {
        let dims = &self.dims;
        let sizes = &self.problem.sizes;
        let vars = &self.vars;
        let tile_and_fuse = self.pipeline == CodegenPipeline::TileAndFuse;

        let (imn, ik) = (model[vars.intrinsic_mn], model[vars.intrinsic_k]);
        let mma = lookup_intrinsic(
            (imn, imn, ik),
            (
                self.problem.lhs_type,
                self.problem.rhs_type,
                self.problem.res_type,
            ),
            &self.intrinsics,
        )?;
        let (_, _, mma_k) = mma.mnk_shape();

        let num_loops = dims.num_loops();
        let values = |vs: &[Var]| vs.iter().map(|&v| model[v]).collect::<Vec<_>>();
        let batch_ones = vec![1; dims.batch.len()];

        let mut workgroup = vec![0; num_loops];
        set_tile_sizes(&mut workgroup, &dims.m, values(&vars.m));
        set_tile_sizes(&mut workgroup, &dims.n, values(&vars.n));
        set_tile_sizes(&mut workgroup, &dims.batch, batch_ones.iter().copied());

        let mut subgroup = vec![0; num_loops];
        set_tile_sizes(&mut subgroup, &dims.m, values(&vars.subgroup_m));
        set_tile_sizes(&mut subgroup, &dims.n, values(&vars.subgroup_n));
        set_tile_sizes(&mut subgroup, &dims.batch, batch_ones.iter().copied());

        let mut reduction = vec![0; num_loops];
        set_tile_sizes(&mut reduction, &dims.k, values(&vars.k));

        let trailing = |s: &[DimSize]| s.last().copied().unwrap_or(1);
        let required_padding = [
            (trailing(&sizes.m), imn),
            (trailing(&sizes.n), imn),
            (trailing(&sizes.k), ik),
        ]
        .iter()
        .any(|&(size, extent)| size % extent != 0);

        // Padded outputs must also be promoted.
        let (promote_operands, padding) = if required_padding {
            let padding = dims
                .m
                .iter()
                .chain(&dims.n)
                .map(|&d| workgroup[d])
                .chain(dims.k.iter().map(|&d| reduction[d] * mma_k))
                .collect::<Vec<_>>();
            (vec![0, 1, 2], Some(padding))
        } else {
            (vec![0, 1], None)
        };

        let (sg_m_cnt, sg_n_cnt) = (model[vars.sg_m_cnt], model[vars.sg_n_cnt]);
        let mut basis_counts = vec![1; num_loops];
        let m_dim = *dims.m.last().expect("no M dimensions");
        let n_dim = *dims.n.last().expect("no N dimensions");
        let k_dim = *dims.k.last().expect("no K dimensions");
        basis_counts[m_dim] = sg_m_cnt;
        basis_counts[n_dim] = sg_n_cnt;

        let wg = vars.wg.map(|v| model[v]);
        let knobs = ContractionKnobs {
            m: sizes.m.iter().product(),
            n: sizes.n.iter().product(),
            k: sizes.k.iter().product(),
            tile_m: workgroup[m_dim],
            tile_n: workgroup[n_dim],
            tile_k: if tile_and_fuse {
                reduction[k_dim] * ik
            } else {
                reduction[k_dim]
            },
            wg_x: wg[0],
            wg_y: wg[1],
            wg_z: wg[2],
            subgroup_m_cnt: sg_m_cnt,
            subgroup_n_cnt: sg_n_cnt,
            intrinsic_mn: imn,
            intrinsic_k: ik,
            subgroup_m: subgroup[m_dim],
            subgroup_n: subgroup[n_dim],
            subgroup_k: subgroup[k_dim],
        };
        let knob_assignment = if tile_and_fuse {
            KnobAssignment::TileAndFuseContraction(knobs)
        } else {
            KnobAssignment::VectorDistributeContraction(knobs)
        };

        let lowering_config = LoweringConfig {
            mma_kind: Some(mma),
            workgroup,
            reduction,
            subgroup: tile_and_fuse.then_some(subgroup),
            subgroup_basis: Some(SubgroupBasis {
                counts: basis_counts,
                mapping: (0..num_loops).collect(),
            }),
            promote_operands,
            padding,
        };

        Ok(iproduct!(self.pipeline_options.iter(), self.waves_per_eu.iter())
            .map(|(&pipeline_options, &waves_per_eu)| {
                vec![TuningConfiguration {
                    configuration: Configuration::CompilationInfo(CompilationInfo {
                        lowering_config: lowering_config.clone(),
                        translation_info: TranslationInfo {
                            pipeline: self.pipeline,
                            workgroup_size: wg,
                            subgroup_size: model[vars.subgroup_size],
                            pipeline_options,
                            waves_per_eu,
                        },
                    }),
                    knob_assignment: Some(knob_assignment.clone()),
                }]
            })
            .collect())
    }
}

impl AttentionEmitter {
    fn emit(&self, model: &Model) -> Result<Vec<Vec<TuningConfiguration>>, GenerateError> {
        let op = &self.op_info;
        let vars = &self.vars;
        let qk = &op.qk_matmul;
        let pv = &op.pv_matmul;

        let (qk_mn, qk_k) = (model[vars.qk_intrinsic_mn], model[vars.qk_intrinsic_k]);
        let qk_mma = lookup_intrinsic(
            (qk_mn, qk_mn, qk_k),
            (qk.lhs_type, qk.rhs_type, qk.acc_type),
            &self.intrinsics,
        )?;
        let (pv_mn, pv_k) = (model[vars.pv_intrinsic_mn], model[vars.pv_intrinsic_k]);
        let pv_mma = lookup_intrinsic(
            (pv_mn, pv_mn, pv_k),
            (pv.lhs_type, pv.rhs_type, pv.acc_type),
            &self.intrinsics,
        )?;

        let rank = op.domain_rank;
        let leading = |dims: &[usize]| dims[..dims.len().saturating_sub(1)].to_vec();
        let m_dim = *op.m_dims.last().expect("no M dimensions");
        let n_dim = *op.n_dims.last().expect("no N dimensions");
        let k2_dim = *op.k2_dims.last().expect("no K2 dimensions");

        let mut workgroup = vec![0; rank];
        let mut reduction = vec![0; rank];
        for d in op
            .batch_dims
            .iter()
            .chain(&leading(&op.m_dims))
            .chain(&leading(&op.n_dims))
        {
            workgroup[*d] = 1;
        }
        for d in leading(&op.k2_dims) {
            reduction[d] = 1;
        }
        workgroup[m_dim] = model[vars.m];
        workgroup[n_dim] = model[vars.n];
        reduction[k2_dim] = model[vars.k];

        let (sg_m_cnt, sg_n_cnt) = (model[vars.sg_m_cnt], model[vars.sg_n_cnt]);
        let mut counts = vec![1; rank];
        counts[m_dim] = sg_m_cnt;
        counts[n_dim] = sg_n_cnt;
        let mapping = (0..rank).collect::<Vec<_>>();
        let mapping_without = |excluded: &[usize]| {
            mapping
                .iter()
                .copied()
                .filter(|i| !excluded.contains(i))
                .collect::<Vec<_>>()
        };

        let decomposition = DecompositionConfig {
            qk: LoweringConfig {
                mma_kind: Some(qk_mma),
                subgroup_basis: Some(SubgroupBasis {
                    counts: counts.clone(),
                    mapping: mapping_without(&op.n_dims),
                }),
                promote_operands: vec![0, 1],
                ..LoweringConfig::default()
            },
            pv: LoweringConfig {
                mma_kind: Some(pv_mma),
                subgroup_basis: Some(SubgroupBasis {
                    counts: counts.clone(),
                    mapping: mapping_without(&op.k1_dims),
                }),
                promote_operands: vec![1],
                ..LoweringConfig::default()
            },
        };

        let subgroup_size = model[vars.subgroup_size];
        let workgroup_size = [sg_m_cnt * sg_n_cnt * subgroup_size, 1, 1];
        let lowering_config = LoweringConfig {
            mma_kind: None,
            workgroup,
            reduction,
            subgroup: None,
            subgroup_basis: Some(SubgroupBasis { counts, mapping }),
            promote_operands: vec![0, 1, 2],
            padding: None,
        };

        // Prefetching needs the QK output to be directly consumable by PV.
        let layouts_match = model[vars.can_reuse_qk_output_for_pv_input] == 1;
        let search_space = PipelineOptionsSearchSpace {
            prefetch_shared_memory: vec![Some(layouts_match)],
            ..self.search_space.clone()
        };

        Ok(
            iproduct!(search_space.combinations(), self.waves_per_eu.iter())
                .map(|(pipeline_options, &waves_per_eu)| {
                    vec![
                        TuningConfiguration {
                            configuration: Configuration::CompilationInfo(CompilationInfo {
                                lowering_config: lowering_config.clone(),
                                translation_info: TranslationInfo {
                                    pipeline: CodegenPipeline::VectorDistribute,
                                    workgroup_size,
                                    subgroup_size,
                                    pipeline_options,
                                    waves_per_eu,
                                },
                            }),
                            knob_assignment: None,
                        },
                        TuningConfiguration {
                            configuration: Configuration::DecompositionConfig(
                                decomposition.clone(),
                            ),
                            knob_assignment: None,
                        },
                    ]
                })
                .collect(),
        )
    }
}

/// Generates up to `limit` candidates for a dispatch and orders them by `strategy`.
///
/// Dispatches no generator supports yield no candidates.
#[allow(clippy::too_many_arguments)]
pub fn generate_candidates<R: Rng + ?Sized>(
    ctx: &TunerContext,
    op_info: &OpInfo,
    target: &TargetInfo,
    pipeline: CodegenPipeline,
    options: &GeneratorOptions,
    strategy: CandidateOrderKind,
    limit: usize,
    rng: &mut R,
) -> Result<Vec<Vec<TuningConfiguration>>, GenerateError> {
    let generator = OpConstraintGenerator::from(op_info.clone());
    let solutions = match generator.generate_solutions(ctx, target, pipeline, options) {
        Ok(solutions) => solutions,
        Err(e) if e.is_unsupported() => {
            info!(target: ctx.log_target(), "Skipping {} dispatch: {e}", op_info.kind());
            return Ok(vec![]);
        }
        Err(e) => return Err(e),
    };
    let candidates = solutions.take(limit).collect::<Result<Vec<_>, _>>()?;
    info!(
        target: ctx.log_target(),
        "Generated {} {} candidates", candidates.len(), op_info.kind()
    );

    let knobs = candidates
        .iter()
        .map(|c| c.first().and_then(|t| t.knob_assignment.clone()))
        .collect::<Vec<_>>();
    let order = reorder_assignments_with_rng(&knobs, strategy, None, target, rng);
    Ok(apply_permutation(candidates, &order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ShapedType;
    use crate::opinfo::{AttentionShape, Conv2dShape, ConvLayout};
    use crate::expr::Constraint;
    use crate::solver::Domain;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use ElementType::*;

    fn drain(
        generator: &impl ConstraintGenerator,
        target: &TargetInfo,
        pipeline: CodegenPipeline,
        options: &GeneratorOptions,
    ) -> Vec<Vec<TuningConfiguration>> {
        generator
            .generate_solutions(&TunerContext::default(), target, pipeline, options)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn compilation_info(candidate: &[TuningConfiguration]) -> &CompilationInfo {
        candidate[0].compilation_info().unwrap()
    }

    fn small_matmul() -> ContractionConstraintGenerator {
        ContractionConstraintGenerator {
            op_info: ContractionOpInfo::matmul(64, 64, 64, F16, F16, F32),
        }
    }

    fn conv() -> ConvolutionOpInfo {
        ConvolutionOpInfo::nhwc_hwcf(
            &Conv2dShape {
                batch: 2,
                output_height: 34,
                output_width: 64,
                output_channels: 320,
                filter_height: 3,
                filter_width: 3,
                input_channels: 16,
                strides: [1, 1],
                dilations: [1, 1],
            },
            F16,
            F16,
            F32,
        )
    }

    #[test]
    fn test_vector_distribute_matmul_candidates() {
        let target = TargetInfo::gfx942();
        let candidates = drain(
            &small_matmul(),
            &target,
            CodegenPipeline::VectorDistribute,
            &GeneratorOptions::default(),
        );
        assert_eq!(candidates.len(), 9);

        let mut seen = HashSet::new();
        for candidate in &candidates {
            assert_eq!(candidate.len(), 1);
            assert_eq!(candidate[0].name(), "compilation_info");
            let info = compilation_info(candidate);
            let config = &info.lowering_config;
            assert_eq!(config.mma_kind, Some(MmaIntrinsic::MfmaF32_16x16x16F16));
            assert_eq!(config.workgroup[0], 64);
            assert_eq!(config.workgroup[2], 0);
            assert_eq!(config.reduction[..2], [0, 0]);
            assert_eq!(config.promote_operands, vec![0, 1]);
            assert_eq!(config.padding, None);
            assert_eq!(config.subgroup, None);
            let basis = config.subgroup_basis.as_ref().unwrap();
            assert_eq!(basis.counts, vec![4, 1, 1]);
            assert_eq!(basis.mapping, vec![0, 1, 2]);
            assert_eq!(info.translation_info.workgroup_size, [64, 4, 1]);
            assert_eq!(info.translation_info.subgroup_size, 64);
            assert_eq!(info.translation_info.waves_per_eu, 2);

            let Some(KnobAssignment::VectorDistributeContraction(knobs)) =
                &candidate[0].knob_assignment
            else {
                panic!("expected vector distribute knobs");
            };
            assert_eq!((knobs.m, knobs.n, knobs.k), (64, 64, 64));
            assert_eq!(knobs.tile_m, 64);
            assert_eq!(knobs.tile_n, config.workgroup[1]);
            assert_eq!(knobs.tile_k, config.reduction[2]);
            assert!(seen.insert((knobs.tile_n, knobs.tile_k)));
        }
    }

    #[test]
    fn test_one_candidate_per_option_combination() {
        let target = TargetInfo::gfx942();
        let options = GeneratorOptions {
            allowed_waves_per_eu: vec![1, 2, 4],
            pipeline_options_search_space: PipelineOptionsSearchSpace {
                prefetch_shared_memory: vec![Some(true), Some(false)],
                ..Default::default()
            },
            ..Default::default()
        };
        let candidates = drain(
            &small_matmul(),
            &target,
            CodegenPipeline::VectorDistribute,
            &options,
        );
        assert_eq!(candidates.len(), 9 * 6);
        let first_six = candidates[..6]
            .iter()
            .map(|c| {
                let ti = &compilation_info(c).translation_info;
                (ti.pipeline_options.prefetch_shared_memory, ti.waves_per_eu)
            })
            .collect::<Vec<_>>();
        assert_eq!(
            first_six,
            vec![
                (Some(true), 1),
                (Some(true), 2),
                (Some(true), 4),
                (Some(false), 1),
                (Some(false), 2),
                (Some(false), 4),
            ]
        );
    }

    #[test]
    fn test_unaligned_matmul_is_padded() {
        let target = TargetInfo::gfx942();
        let generator = ContractionConstraintGenerator {
            op_info: ContractionOpInfo::matmul(100, 128, 64, F16, F16, F32),
        };
        let mut solutions = generator
            .generate_solutions(
                &TunerContext::default(),
                &target,
                CodegenPipeline::TileAndFuse,
                &GeneratorOptions::default(),
            )
            .unwrap();
        assert!(solutions.has_more());
        let candidate = solutions.next().unwrap().unwrap();
        let config = &compilation_info(&candidate).lowering_config;
        assert_eq!(config.promote_operands, vec![0, 1, 2]);
        let padding = config.padding.as_ref().unwrap();
        let Some(KnobAssignment::TileAndFuseContraction(knobs)) = &candidate[0].knob_assignment
        else {
            panic!("expected tile-and-fuse knobs");
        };
        assert_eq!(
            padding,
            &vec![config.workgroup[0], config.workgroup[1], knobs.tile_k]
        );
        assert!(config.subgroup.is_some());
    }

    #[test]
    fn test_vector_distribute_padding_scales_reduction_by_intrinsic_k() {
        let target = TargetInfo::gfx942();
        let generator = ContractionConstraintGenerator {
            op_info: ContractionOpInfo::matmul(100, 128, 64, F16, F16, F32),
        };
        let candidates = generator
            .generate_solutions(
                &TunerContext::default(),
                &target,
                CodegenPipeline::VectorDistribute,
                &GeneratorOptions::default(),
            )
            .unwrap()
            .take(10)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(!candidates.is_empty());
        for candidate in &candidates {
            let config = &compilation_info(candidate).lowering_config;
            let (_, _, mma_k) = config.mma_kind.unwrap().mnk_shape();
            assert_eq!(config.promote_operands, vec![0, 1, 2]);
            assert_eq!(
                config.padding.as_ref().unwrap(),
                &vec![
                    config.workgroup[0],
                    config.workgroup[1],
                    config.reduction[2] * mma_k
                ]
            );
        }
    }

    #[test]
    fn test_tile_and_fuse_conv_uses_igemm() {
        let target = TargetInfo::gfx942();
        let generator = ConvolutionConstraintGenerator { op_info: conv() };
        let candidates = generator
            .generate_solutions(
                &TunerContext::default(),
                &target,
                CodegenPipeline::TileAndFuse,
                &GeneratorOptions::default(),
            )
            .unwrap()
            .take(20)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(!candidates.is_empty());
        for candidate in &candidates {
            let info = compilation_info(candidate);
            assert_eq!(
                info.translation_info.pipeline_options.use_igemm_convolution,
                Some(true)
            );
            // One K dimension remains after flattening.
            let config = &info.lowering_config;
            assert_eq!(config.reduction.len(), 5);
            assert_eq!(config.workgroup[..2], [1, 1]);
            let knobs = candidate[0].knob_assignment.as_ref().unwrap().contraction();
            assert_eq!(knobs.k, 3 * 3 * 16);
        }
        // The descriptor itself is left untouched.
        assert_eq!(generator.op_info.dims.k, vec![4, 5, 6]);
    }

    #[test]
    fn test_adjust_only_applies_to_tile_and_fuse_conv() {
        let mut dims = conv().dims;
        let mut sizes = conv().matmul_size;
        let mut space = PipelineOptionsSearchSpace::default();
        adjust_problem_size_for_pipeline(
            &mut dims,
            &mut sizes,
            DispatchKind::Conv,
            &mut space,
            CodegenPipeline::VectorDistribute,
        );
        assert_eq!(dims.k, vec![4, 5, 6]);
        adjust_problem_size_for_pipeline(
            &mut dims,
            &mut sizes,
            DispatchKind::Conv,
            &mut space,
            CodegenPipeline::TileAndFuse,
        );
        assert_eq!(dims.k, vec![4]);
        assert_eq!(sizes.k, vec![144]);
        assert_eq!(space.use_igemm_convolution, vec![Some(true)]);
    }

    #[test]
    fn test_unsupported_conv_layout() {
        let mut op_info = conv();
        op_info.layout = ConvLayout::NchwFchw;
        let err = ConvolutionConstraintGenerator { op_info }
            .generate_solutions(
                &TunerContext::default(),
                &TargetInfo::gfx942(),
                CodegenPipeline::VectorDistribute,
                &GeneratorOptions::default(),
            )
            .err()
            .unwrap();
        assert!(err.is_unsupported());
    }

    fn attention() -> AttentionOpInfo {
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
            false,
        )
    }

    #[test]
    fn test_attention_candidates_pair_configs() {
        let target = TargetInfo::gfx942();
        let generator = OpConstraintGenerator::from(OpInfo::Attention(attention()));
        let candidates = generator
            .generate_solutions(
                &TunerContext::default(),
                &target,
                CodegenPipeline::VectorDistribute,
                &GeneratorOptions::default(),
            )
            .unwrap()
            .take(50)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(candidates.len(), 50);
        for candidate in &candidates {
            let names = candidate.iter().map(|c| c.name()).collect::<Vec<_>>();
            assert_eq!(names, vec!["compilation_info", "decomposition_config"]);
            assert!(candidate.iter().all(|c| c.knob_assignment.is_none()));

            let info = compilation_info(candidate);
            let Configuration::DecompositionConfig(decomposition) = &candidate[1].configuration
            else {
                panic!("expected a decomposition config");
            };
            let qk = decomposition.qk.mma_kind.unwrap();
            let pv = decomposition.pv.mma_kind.unwrap();
            let prefetch = info.translation_info.pipeline_options.prefetch_shared_memory;
            assert_eq!(prefetch, Some(qk.mnk_shape() == pv.mnk_shape()));

            let config = &info.lowering_config;
            assert_eq!(config.workgroup[0], 1);
            assert_eq!(config.workgroup[2..4], [0, 0]);
            assert_eq!(config.reduction[2], 0);
            assert_eq!(config.promote_operands, vec![0, 1, 2]);
            let basis = config.subgroup_basis.as_ref().unwrap();
            assert_eq!(
                info.translation_info.workgroup_size[0],
                basis.counts.iter().product::<i64>() * 64
            );
            assert_eq!(
                decomposition.qk.subgroup_basis.as_ref().unwrap().mapping,
                vec![0, 1, 2, 3]
            );
            assert_eq!(
                decomposition.pv.subgroup_basis.as_ref().unwrap().mapping,
                vec![0, 1, 3, 4]
            );
        }
    }

    #[test]
    fn test_attention_requires_vector_distribute() {
        let err = AttentionConstraintGenerator {
            op_info: attention(),
        }
        .generate_solutions(
            &TunerContext::default(),
            &TargetInfo::gfx942(),
            CodegenPipeline::TileAndFuse,
            &GeneratorOptions::default(),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            GenerateError::UnsupportedPipeline {
                kind: DispatchKind::Attention,
                pipeline: CodegenPipeline::TileAndFuse,
            }
        );
    }

    #[test]
    fn test_missing_intrinsic_ends_enumeration() {
        // The constraints are built for gfx942 but candidates are derived against
        // a target lacking the solved intrinsic.
        let target = TargetInfo::gfx942();
        let mut system = small_matmul()
            .constraint_system(
                &TunerContext::default(),
                &target,
                CodegenPipeline::VectorDistribute,
                &GeneratorOptions::default(),
            )
            .unwrap();
        if let Emitter::Contraction(e) = &mut system.emitter {
            e.intrinsics.clear();
        }
        let mut solutions = system.solve_with(FiniteDomainSolver::new());
        assert!(matches!(
            solutions.next(),
            Some(Err(GenerateError::NoMatchingIntrinsic { m: 16, n: 16, k: 16, .. }))
        ));
        assert!(!solutions.has_more());
        assert!(solutions.next().is_none());
        assert_eq!(solutions.solutions_found(), 1);
    }

    /// Records every exclusion so emitted assignments can be checked.
    struct RecordingSolver {
        inner: FiniteDomainSolver,
        excluded: Vec<Model>,
    }

    impl ConstraintSolver for RecordingSolver {
        fn new_var(&mut self, name: &str, domain: Domain) -> Var {
            self.inner.new_var(name, domain)
        }

        fn add_constraint(&mut self, constraint: Constraint) {
            self.inner.add_constraint(constraint)
        }

        fn check_and_get_model(&mut self) -> Option<Model> {
            self.inner.check_and_get_model()
        }

        fn exclude(&mut self, model: &Model) {
            self.excluded.push(model.clone());
            self.inner.exclude(model)
        }
    }

    #[test]
    fn test_every_solution_is_valid_and_distinct() {
        let target = TargetInfo::gfx942();
        let generator = ContractionConstraintGenerator {
            op_info: ContractionOpInfo::batch_matmul(4, 256, 128, 512, F16, F16, F32),
        };
        let system = generator
            .constraint_system(
                &TunerContext::default(),
                &target,
                CodegenPipeline::VectorDistribute,
                &GeneratorOptions::default(),
            )
            .unwrap();
        let model = system.model().clone();
        let mut solver = RecordingSolver {
            inner: FiniteDomainSolver::new(),
            excluded: vec![],
        };
        let count = system.solve_with(&mut solver).count();
        assert!(count > 0);
        assert_eq!(count, solver.excluded.len());
        let distinct = solver.excluded.iter().collect::<HashSet<_>>();
        assert_eq!(distinct.len(), solver.excluded.len());
        assert!(solver.excluded.iter().all(|m| model.is_satisfied_by(m)));
    }

    #[test]
    fn test_generate_candidates_ranks_and_limits() {
        let target = TargetInfo::gfx942();
        let op_info = OpInfo::Contraction(ContractionOpInfo::matmul(512, 512, 256, F16, F16, F32));
        let mut rng = StdRng::seed_from_u64(0);
        let candidates = generate_candidates(
            &TunerContext::default(),
            &op_info,
            &target,
            CodegenPipeline::VectorDistribute,
            &GeneratorOptions::default(),
            CandidateOrderKind::Heuristic,
            30,
            &mut rng,
        )
        .unwrap();
        assert_eq!(candidates.len(), 30);
        let keys = candidates
            .iter()
            .map(|c| {
                let k = c[0].knob_assignment.as_ref().unwrap().contraction();
                !crate::utils::is_pow2(k.tile_k)
            })
            .collect::<Vec<_>>();
        // Power-of-two reduction tiles come first.
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_generate_candidates_skips_unsupported() {
        let target = TargetInfo::gfx942();
        let op_info = OpInfo::Contraction(ContractionOpInfo::new(
            ContractionDimensions {
                batch: vec![],
                m: vec![0],
                n: vec![1],
                k: vec![2],
            },
            ContractionSizes {
                m: vec![64],
                n: vec![64],
                k: vec![64],
                b: vec![],
            },
            ShapedType::new(vec![64, 64], I8),
            ShapedType::new(vec![64, 64], I8),
            ShapedType::new(vec![64, 64], F32),
        ));
        let mut rng = StdRng::seed_from_u64(0);
        let candidates = generate_candidates(
            &TunerContext::new("skip_test"),
            &op_info,
            &target,
            CodegenPipeline::VectorDistribute,
            &GeneratorOptions::default(),
            CandidateOrderKind::NoSort,
            10,
            &mut rng,
        )
        .unwrap();
        assert!(candidates.is_empty());
    }
}
