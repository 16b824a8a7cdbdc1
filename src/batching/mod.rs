//! Batching of LLM inference requests onto a fixed-size model invocation.

mod basic;
mod chunked;

pub use basic::BasicScheduler;
pub use chunked::ChunkScheduler;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// One request's pending unit of work.
///
/// Prefill requests split into chunks carry one task per chunk, all with the
/// same `request_id` and gap-free `chunk_id`s starting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LlmTaskInput {
    pub request_id: String,
    pub chunk_id: usize,
    pub tokens: Vec<i64>,
    pub start_position: usize,
    pub page_ids: Vec<i64>,
}

/// The tasks of one model invocation, padded out to the scheduler's batch
/// size.
#[derive(Debug, Clone, Copy)]
pub struct LlmBatch<'a> {
    tasks: &'a [LlmTaskInput],
    batch_size: NonZeroUsize,
    block_stride: NonZeroUsize,
    chunk_block_size: Option<NonZeroUsize>,
}

/// A scheduler pulls batches of scheduled tasks through an invocation
/// function until no work remains.
///
/// All tasks must be scheduled before [Scheduler::run] is called.
pub trait Scheduler {
    type Cache: ?Sized;
    type Output;

    fn schedule_task(&mut self, task: LlmTaskInput);

    fn has_pending_tasks(&self) -> bool;

    /// Removes and returns at most `batch_size` tasks to run next.
    fn next_batch(&mut self) -> Vec<LlmTaskInput>;

    fn batch<'a>(&self, tasks: &'a [LlmTaskInput]) -> LlmBatch<'a>;

    fn invoke(&mut self, batch: &LlmBatch<'_>, cache: &mut Self::Cache) -> Self::Output;

    /// Stores the selection for a task which just completed.
    fn record<S>(
        &self,
        selections: &mut IndexMap<String, Vec<S>>,
        task: &LlmTaskInput,
        selection: S,
    );

    /// Runs every scheduled task, returning the selections of each request in
    /// the order its tasks were run.
    ///
    /// `selection_fn` receives the raw invocation output and the logit
    /// position of each batch row, and returns one selection per row.
    fn run<S, F>(&mut self, mut selection_fn: F, cache: &mut Self::Cache) -> IndexMap<String, Vec<S>>
    where
        F: FnMut(Self::Output, &[usize]) -> Vec<S>,
    {
        let mut selections = IndexMap::new();
        while self.has_pending_tasks() {
            let tasks = self.next_batch();
            assert!(
                !tasks.is_empty(),
                "scheduler reported pending tasks but produced an empty batch"
            );
            let batch = self.batch(&tasks);
            debug!(
                "Invoking batch of {} tasks with sequence stride {}",
                tasks.len(),
                batch.seq_stride()
            );
            let output = self.invoke(&batch, cache);
            let selected = selection_fn(output, &batch.logit_positions());
            assert!(
                selected.len() >= tasks.len(),
                "selection returned {} values for {} tasks",
                selected.len(),
                tasks.len()
            );
            for (task, selection) in tasks.iter().zip(selected) {
                self.record(&mut selections, task, selection);
            }
        }
        selections
    }
}

impl LlmTaskInput {
    pub fn new(request_id: impl Into<String>, tokens: Vec<i64>) -> Self {
        LlmTaskInput {
            request_id: request_id.into(),
            chunk_id: 0,
            tokens,
            start_position: 0,
            page_ids: vec![],
        }
    }

    pub fn chunk(
        request_id: impl Into<String>,
        chunk_id: usize,
        tokens: Vec<i64>,
        start_position: usize,
    ) -> Self {
        LlmTaskInput {
            chunk_id,
            start_position,
            ..LlmTaskInput::new(request_id, tokens)
        }
    }
}

impl<'a> LlmBatch<'a> {
    pub fn new(
        tasks: &'a [LlmTaskInput],
        batch_size: NonZeroUsize,
        block_stride: NonZeroUsize,
        chunk_block_size: Option<NonZeroUsize>,
    ) -> Self {
        assert!(
            tasks.len() <= batch_size.get(),
            "{} tasks exceed batch size {batch_size}",
            tasks.len()
        );
        LlmBatch {
            tasks,
            batch_size,
            block_stride,
            chunk_block_size,
        }
    }

    pub fn tasks(&self) -> &'a [LlmTaskInput] {
        self.tasks
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    /// The padded sequence length of each row: one chunk for chunked
    /// prefill, otherwise the longest task rounded up to a whole block.
    pub fn seq_stride(&self) -> usize {
        if let Some(chunk_blocks) = self.chunk_block_size {
            return chunk_blocks.get() * self.block_stride.get();
        }
        let longest = self.tasks.iter().map(|t| t.tokens.len()).max().unwrap_or(0);
        longest.div_ceil(self.block_stride.get()).max(1) * self.block_stride.get()
    }

    /// Row-major `batch_size x seq_stride` token ids, zero padded.
    pub fn token_rows(&self) -> Vec<i64> {
        let stride = self.seq_stride();
        let mut rows = vec![0; self.batch_size() * stride];
        for (row, task) in rows.chunks_exact_mut(stride).zip(self.tasks) {
            assert!(
                task.tokens.len() <= stride,
                "request {} chunk {} has {} tokens, more than the stride {stride}",
                task.request_id,
                task.chunk_id,
                task.tokens.len()
            );
            row[..task.tokens.len()].copy_from_slice(&task.tokens);
        }
        rows
    }

    pub fn seq_lens(&self) -> Vec<usize> {
        self.padded(|t| t.start_position + t.tokens.len())
    }

    pub fn start_positions(&self) -> Vec<usize> {
        self.padded(|t| t.start_position)
    }

    /// Row-major page table wide enough for the task with the most pages.
    pub fn page_table(&self) -> Vec<i64> {
        let width = self.tasks.iter().map(|t| t.page_ids.len()).max().unwrap_or(0);
        let mut table = vec![0; self.batch_size() * width];
        if width == 0 {
            return table;
        }
        for (row, task) in table.chunks_exact_mut(width).zip(self.tasks) {
            row[..task.page_ids.len()].copy_from_slice(&task.page_ids);
        }
        table
    }

    /// Where in each row the logits for the next token are read.
    pub fn logit_positions(&self) -> Vec<usize> {
        self.padded(|t| t.tokens.len().saturating_sub(1))
    }

    fn padded(&self, f: impl Fn(&LlmTaskInput) -> usize) -> Vec<usize> {
        let mut values = self.tasks.iter().map(f).collect::<Vec<_>>();
        values.resize(self.batch_size(), 0);
        values
    }
}
