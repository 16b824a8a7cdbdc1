use anyhow::Result;
use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use gputune::common::{DimSize, ElementType, TunerContext};
use gputune::compilation::PipelineOptionsSearchSpace;
use gputune::generator::{generate_candidates, CodegenPipeline, GeneratorOptions};
use gputune::opinfo::{
    AttentionOpInfo, AttentionShape, Conv2dShape, ContractionOpInfo, ConvolutionOpInfo, OpInfo,
};
use gputune::ordering::CandidateOrderKind;
use gputune::pprint::{pprint, PrintMode};
use gputune::target::TargetId;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target architecture
    #[arg(long, value_enum, default_value_t = TargetId::Gfx942)]
    target: TargetId,

    /// Codegen pipeline to generate candidates for
    #[arg(long, value_enum, default_value_t = CodegenPipeline::VectorDistribute)]
    pipeline: CodegenPipeline,

    /// Candidate ordering strategy
    #[arg(long, value_enum, default_value_t = CandidateOrderKind::Heuristic)]
    order: CandidateOrderKind,

    /// Subgroups per workgroup; 0 lets the count vary
    #[arg(long, default_value = "4")]
    num_subgroups: u32,

    /// Values of the amdgpu-waves-per-eu attribute to emit
    #[arg(long, default_value = "2", value_delimiter = ',')]
    waves_per_eu: Vec<u32>,

    /// Values of prefetch_shared_memory to try; unset leaves the compiler default
    #[arg(long, value_delimiter = ',')]
    prefetch_shared_memory: Vec<bool>,

    /// Maximum number of candidates to generate
    #[arg(long, short = 'n', default_value = "20")]
    num_candidates: usize,

    /// Seed for the shuffle ordering
    #[arg(long)]
    seed: Option<u64>,

    /// Print mode
    #[arg(long, value_enum, default_value_t = PrintMode::Summary)]
    print_mode: PrintMode,

    #[command(subcommand)]
    dispatch: Dispatch,
}

#[derive(clap::Args, Clone, Copy)]
struct OperandTypes {
    #[arg(long, value_enum, default_value_t = ElementType::F16)]
    lhs_type: ElementType,
    #[arg(long, value_enum, default_value_t = ElementType::F16)]
    rhs_type: ElementType,
    #[arg(long, value_enum, default_value_t = ElementType::F32)]
    res_type: ElementType,
}

#[derive(clap::Subcommand)]
enum Dispatch {
    #[command(about = "Tune a (batch) matrix multiplication")]
    Matmul {
        #[arg(long, short)]
        batch: Option<DimSize>,
        m: DimSize,
        n: DimSize,
        k: DimSize,
        #[command(flatten)]
        types: OperandTypes,
    },
    #[command(about = "Tune an NHWC x HWCF 2-D convolution")]
    Conv {
        #[arg(long, short, default_value = "1")]
        batch: DimSize,
        #[arg(long, default_value = "64")]
        channels: DimSize,
        #[arg(long, default_value = "64")]
        filters: DimSize,
        #[arg(long, default_value = "3")]
        filters_size: DimSize,
        #[arg(long, default_value = "1")]
        stride: DimSize,
        #[arg(long, default_value = "1")]
        dilation: DimSize,
        /// Output height and width
        size: DimSize,
        #[command(flatten)]
        types: OperandTypes,
    },
    #[command(about = "Tune an attention op")]
    Attention {
        #[arg(long, short, default_value = "1")]
        batch: DimSize,
        m: DimSize,
        k1: DimSize,
        k2: DimSize,
        n: DimSize,
        #[arg(long, value_enum, default_value_t = ElementType::F16)]
        input_type: ElementType,
        #[arg(long, value_enum, default_value_t = ElementType::F32)]
        output_type: ElementType,
        #[arg(long)]
        transposed_k: bool,
        #[arg(long)]
        transposed_v: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let op_info = op_info(&args.dispatch);
    let target = args.target.target_info();

    let mut search_space = PipelineOptionsSearchSpace::default();
    if !args.prefetch_shared_memory.is_empty() {
        search_space.prefetch_shared_memory =
            args.prefetch_shared_memory.iter().copied().map(Some).collect();
    }
    let options = GeneratorOptions {
        num_subgroups: args.num_subgroups,
        allowed_waves_per_eu: args.waves_per_eu.clone(),
        pipeline_options_search_space: search_space,
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let candidates = generate_candidates(
        &TunerContext::default(),
        &op_info,
        &target,
        args.pipeline,
        &options,
        args.order,
        args.num_candidates,
        &mut rng,
    )?;
    info!(
        "{} candidates for {} on {} ordered by {}",
        candidates.len(),
        op_info.kind(),
        target.arch,
        args.order
    );

    if candidates.is_empty() {
        println!("No configuration generated.");
        return Ok(());
    }
    pprint(&candidates, args.print_mode);
    Ok(())
}

fn op_info(dispatch: &Dispatch) -> OpInfo {
    match dispatch {
        Dispatch::Matmul {
            batch,
            m,
            n,
            k,
            types,
        } => {
            let OperandTypes {
                lhs_type,
                rhs_type,
                res_type,
            } = *types;
            let contraction = match batch {
                Some(b) => {
                    ContractionOpInfo::batch_matmul(*b, *m, *n, *k, lhs_type, rhs_type, res_type)
                }
                None => ContractionOpInfo::matmul(*m, *n, *k, lhs_type, rhs_type, res_type),
            };
            contraction.into()
        }
        Dispatch::Conv {
            batch,
            channels,
            filters,
            filters_size,
            stride,
            dilation,
            size,
            types,
        } => {
            let shape = Conv2dShape {
                batch: *batch,
                output_height: *size,
                output_width: *size,
                output_channels: *filters,
                filter_height: *filters_size,
                filter_width: *filters_size,
                input_channels: *channels,
                strides: [*stride; 2],
                dilations: [*dilation; 2],
            };
            ConvolutionOpInfo::nhwc_hwcf(&shape, types.lhs_type, types.rhs_type, types.res_type)
                .into()
        }
        Dispatch::Attention {
            batch,
            m,
            k1,
            k2,
            n,
            input_type,
            output_type,
            transposed_k,
            transposed_v,
        } => {
            let shape = AttentionShape {
                batch: vec![*batch],
                m: vec![*m],
                k1: vec![*k1],
                k2: vec![*k2],
                n: vec![*n],
            };
            AttentionOpInfo::new(
                &shape,
                *input_type,
                *input_type,
                *input_type,
                *output_type,
                *transposed_k,
                *transposed_v,
            )
            .into()
        }
    }
}
