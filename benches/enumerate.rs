use iai_callgrind::{black_box, main};

use gputune::common::{ElementType, TunerContext};
use gputune::generator::{
    CodegenPipeline, ConstraintGenerator, ContractionConstraintGenerator, GeneratorOptions,
};
use gputune::knobs::KnobAssignment;
use gputune::opinfo::ContractionOpInfo;
use gputune::ordering::{reorder_assignments, CandidateOrderKind};
use gputune::target::TargetInfo;

fn matmul_generator(m: i64, n: i64, k: i64) -> ContractionConstraintGenerator {
    ContractionConstraintGenerator {
        op_info: ContractionOpInfo::matmul(
            m,
            n,
            k,
            ElementType::F16,
            ElementType::F16,
            ElementType::F32,
        ),
    }
}

#[inline(never)]
#[export_name = "gputune_bench_enumerate::drain"]
fn drain(generator: &ContractionConstraintGenerator, pipeline: CodegenPipeline) -> usize {
    generator
        .generate_solutions(
            &TunerContext::default(),
            &TargetInfo::gfx942(),
            pipeline,
            &GeneratorOptions::default(),
        )
        .unwrap()
        .map(|c| c.unwrap())
        .count()
}

#[inline(never)]
fn enumerate_vector_distribute_64() {
    black_box(drain(
        &matmul_generator(64, 64, 64),
        CodegenPipeline::VectorDistribute,
    ));
}

#[inline(never)]
fn enumerate_tile_and_fuse_100x256x512() {
    black_box(drain(
        &matmul_generator(100, 256, 512),
        CodegenPipeline::TileAndFuse,
    ));
}

#[inline(never)]
fn order_first_200_vector_distribute() {
    let generator = matmul_generator(2048, 1280, 1280);
    let knobs = generator
        .generate_solutions(
            &TunerContext::default(),
            &TargetInfo::gfx942(),
            CodegenPipeline::VectorDistribute,
            &GeneratorOptions::default(),
        )
        .unwrap()
        .take(200)
        .map(|c| c.unwrap()[0].knob_assignment.clone())
        .collect::<Vec<_>>();
    black_box(order(&knobs));
}

#[inline(never)]
#[export_name = "gputune_bench_enumerate::order"]
fn order(knobs: &[Option<KnobAssignment>]) -> Vec<usize> {
    reorder_assignments(
        knobs,
        CandidateOrderKind::Heuristic,
        None,
        &TargetInfo::gfx942(),
    )
}

main!(
    callgrind_args = "toggle-collect=gputune_bench_enumerate::drain",
        "toggle-collect=gputune_bench_enumerate::order",
        "--simulate-wb=no", "--simulate-hwpref=yes",
        "--I1=32768,8,64", "--D1=32768,8,64", "--LL=8388608,16,64";
    functions = enumerate_vector_distribute_64,
        enumerate_tile_and_fuse_100x256x512,
        order_first_200_vector_distribute
);
