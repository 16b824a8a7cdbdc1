use indexmap::IndexMap;
use log::trace;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::num::NonZeroUsize;

use super::{LlmBatch, LlmTaskInput, Scheduler};

/// Schedules chunked prefill so that a request's chunks run one at a time and
/// in chunk order, while chunks of other requests fill the rest of a batch.
///
/// The first task seen for a request is immediately ready. Later tasks wait in
/// a per-request list ordered by chunk id; each time a request's chunk is
/// pulled into a batch, its lowest waiting chunk becomes ready. A request
/// therefore never has more than one chunk ready or in flight.
pub struct ChunkScheduler<C: ?Sized, O, F> {
    batch_size: NonZeroUsize,
    block_stride: NonZeroUsize,
    chunk_block_size: NonZeroUsize,
    invocation_fn: F,
    pending: IndexMap<String, VecDeque<LlmTaskInput>>,
    ready: VecDeque<LlmTaskInput>,
    _phantom: PhantomData<fn(&mut C) -> O>,
}

impl<C, O, F> ChunkScheduler<C, O, F>
where
    C: ?Sized,
    F: FnMut(&LlmBatch<'_>, &mut C) -> O,
{
    pub fn new(
        batch_size: NonZeroUsize,
        block_stride: NonZeroUsize,
        chunk_block_size: NonZeroUsize,
        invocation_fn: F,
    ) -> Self {
        ChunkScheduler {
            batch_size,
            block_stride,
            chunk_block_size,
            invocation_fn,
            pending: IndexMap::new(),
            ready: VecDeque::new(),
            _phantom: PhantomData,
        }
    }

    pub fn ready_tasks(&self) -> impl Iterator<Item = &LlmTaskInput> {
        self.ready.iter()
    }
}

impl<C, O, F> Scheduler for ChunkScheduler<C, O, F>
where
    C: ?Sized,
    F: FnMut(&LlmBatch<'_>, &mut C) -> O,
{
    type Cache = C;
    type Output = O;

    fn schedule_task(&mut self, task: LlmTaskInput) {
        let Some(waiting) = self.pending.get_mut(&task.request_id) else {
            self.pending.insert(task.request_id.clone(), VecDeque::new());
            self.ready.push_back(task);
            return;
        };
        let idx = waiting.partition_point(|t| t.chunk_id <= task.chunk_id);
        waiting.insert(idx, task);
    }

    fn has_pending_tasks(&self) -> bool {
        !self.ready.is_empty() || !self.pending.is_empty()
    }

    fn next_batch(&mut self) -> Vec<LlmTaskInput> {
        let take = self.batch_size.get().min(self.ready.len());
        let batch = self.ready.drain(..take).collect::<Vec<_>>();
        for task in &batch {
            let waiting = self
                .pending
                .get_mut(&task.request_id)
                .expect("ready task has no pending entry");
            match waiting.pop_front() {
                Some(next) => {
                    trace!(
                        "Request {} chunk {} is ready",
                        next.request_id,
                        next.chunk_id
                    );
                    self.ready.push_back(next);
                }
                None => {
                    self.pending.shift_remove(&task.request_id);
                }
            }
        }
        batch
    }

    fn batch<'a>(&self, tasks: &'a [LlmTaskInput]) -> LlmBatch<'a> {
        LlmBatch::new(
            tasks,
            self.batch_size,
            self.block_stride,
            Some(self.chunk_block_size),
        )
    }

    fn invoke(&mut self, batch: &LlmBatch<'_>, cache: &mut C) -> O {
        (self.invocation_fn)(batch, cache)
    }

    fn record<S>(
        &self,
        selections: &mut IndexMap<String, Vec<S>>,
        task: &LlmTaskInput,
        selection: S,
    ) {
        let results = selections.entry(task.request_id.clone()).or_default();
        assert_eq!(
            task.chunk_id,
            results.len(),
            "out-of-order chunks for request {}",
            task.request_id
        );
        results.push(selection);
    }
}
