//! Compiler-facing configuration values and their attribute syntax.

use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::generator::CodegenPipeline;
use crate::knobs::KnobAssignment;
use crate::target::MmaIntrinsic;
use crate::utils::Bracketed;

/// How subgroups are laid out over the iteration space: `counts[d]` subgroups
/// along each dimension, permuted by `mapping`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SubgroupBasis {
    pub counts: Vec<i64>,
    pub mapping: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LoweringConfig {
    pub mma_kind: Option<MmaIntrinsic>,
    pub workgroup: Vec<i64>,
    pub reduction: Vec<i64>,
    pub subgroup: Option<Vec<i64>>,
    pub subgroup_basis: Option<SubgroupBasis>,
    pub promote_operands: Vec<usize>,
    pub padding: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PipelineOptions {
    pub prefetch_shared_memory: Option<bool>,
    pub no_reduce_shared_memory_bank_conflicts: Option<bool>,
    pub use_igemm_convolution: Option<bool>,
}

/// The values each pipeline option is tried with. `None` leaves the option
/// to the compiler's default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PipelineOptionsSearchSpace {
    pub prefetch_shared_memory: Vec<Option<bool>>,
    pub no_reduce_shared_memory_bank_conflicts: Vec<Option<bool>>,
    pub use_igemm_convolution: Vec<Option<bool>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TranslationInfo {
    pub pipeline: CodegenPipeline,
    pub workgroup_size: [i64; 3],
    pub subgroup_size: i64,
    pub pipeline_options: PipelineOptions,
    pub waves_per_eu: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct CompilationInfo {
    pub lowering_config: LoweringConfig,
    pub translation_info: TranslationInfo,
}

/// Lowering configs for the two matmuls an attention op is decomposed into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DecompositionConfig {
    pub qk: LoweringConfig,
    pub pv: LoweringConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Configuration {
    CompilationInfo(CompilationInfo),
    DecompositionConfig(DecompositionConfig),
}

/// One named entry of a tuning candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TuningConfiguration {
    pub configuration: Configuration,
    pub knob_assignment: Option<KnobAssignment>,
}

impl Default for PipelineOptionsSearchSpace {
    fn default() -> Self {
        PipelineOptionsSearchSpace {
            prefetch_shared_memory: vec![None],
            no_reduce_shared_memory_bank_conflicts: vec![None],
            use_igemm_convolution: vec![None],
        }
    }
}

impl PipelineOptionsSearchSpace {
    /// Every combination of option values, varying the last option fastest.
    pub fn combinations(&self) -> Vec<PipelineOptions> {
        iproduct!(
            self.prefetch_shared_memory.iter(),
            self.no_reduce_shared_memory_bank_conflicts.iter(),
            self.use_igemm_convolution.iter()
        )
        .map(|(&prefetch, &no_reduce, &igemm)| PipelineOptions {
            prefetch_shared_memory: prefetch,
            no_reduce_shared_memory_bank_conflicts: no_reduce,
            use_igemm_convolution: igemm,
        })
        .collect()
    }
}

impl Configuration {
    pub fn name(&self) -> &'static str {
        match self {
            Configuration::CompilationInfo(_) => "compilation_info",
            Configuration::DecompositionConfig(_) => "decomposition_config",
        }
    }
}

impl TuningConfiguration {
    pub fn name(&self) -> &'static str {
        self.configuration.name()
    }

    pub fn compilation_info(&self) -> Option<&CompilationInfo> {
        match &self.configuration {
            Configuration::CompilationInfo(info) => Some(info),
            Configuration::DecompositionConfig(_) => None,
        }
    }
}

/// Writes `{key = value, ...}` with entries in the order given.
struct Dict<'a>(Vec<(&'a str, String)>);

impl Display for Dict<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key} = {value}")?;
        }
        write!(f, "}}")
    }
}

impl LoweringConfig {
    fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![];
        if let Some(mma) = &self.mma_kind {
            entries.push(("mma_kind", format!("#iree_gpu.mma_layout<{mma}>")));
        }
        if let Some(padding) = &self.padding {
            entries.push(("padding", Bracketed(padding).to_string()));
        }
        if !self.promote_operands.is_empty() {
            entries.push(("promote_operands", Bracketed(&self.promote_operands).to_string()));
        }
        if !self.reduction.is_empty() {
            entries.push(("reduction", Bracketed(&self.reduction).to_string()));
        }
        if let Some(subgroup) = &self.subgroup {
            entries.push(("subgroup", Bracketed(subgroup).to_string()));
        }
        if let Some(basis) = &self.subgroup_basis {
            entries.push((
                "subgroup_basis",
                format!(
                    "[{}, {}]",
                    Bracketed(&basis.counts),
                    Bracketed(&basis.mapping)
                ),
            ));
        }
        if !self.workgroup.is_empty() {
            entries.push(("workgroup", Bracketed(&self.workgroup).to_string()));
        }
        entries
    }
}

impl Display for LoweringConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#iree_gpu.lowering_config<{}>", Dict(self.entries()))
    }
}

impl Display for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("prefetch_shared_memory", self.prefetch_shared_memory),
            (
                "no_reduce_shared_memory_bank_conflicts",
                self.no_reduce_shared_memory_bank_conflicts,
            ),
            ("use_igemm_convolution", self.use_igemm_convolution),
        ];
        write!(f, "#iree_gpu.pipeline_options<")?;
        let mut first = true;
        for (name, value) in fields {
            let Some(value) = value else {
                continue;
            };
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name} = {value}")?;
        }
        write!(f, ">")
    }
}

impl Display for TranslationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs = Dict(vec![
            ("gpu_pipeline_options", self.pipeline_options.to_string()),
            (
                "llvm_func_attrs",
                format!("{{\"amdgpu-waves-per-eu\" = \"{}\"}}", self.waves_per_eu),
            ),
        ]);
        write!(
            f,
            "#iree_codegen.translation_info<pipeline = {} workgroup_size = {} subgroup_size = {}, {}>",
            self.pipeline,
            Bracketed(&self.workgroup_size),
            self.subgroup_size,
            attrs
        )
    }
}

impl Display for CompilationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#iree_codegen.compilation_info<lowering_config = {}, translation_info = {}>",
            self.lowering_config, self.translation_info
        )
    }
}

impl Display for DecompositionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{pv_attrs = {{attention_pv_matmul, lowering_config = {}}}, \
             qk_attrs = {{attention_qk_matmul, lowering_config = {}}}}}",
            self.pv, self.qk
        )
    }
}

impl Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Configuration::CompilationInfo(info) => info.fmt(f),
            Configuration::DecompositionConfig(config) => config.fmt(f),
        }
    }
}
