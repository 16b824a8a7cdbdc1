use indexmap::IndexMap;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::num::NonZeroUsize;

use super::{LlmBatch, LlmTaskInput, Scheduler};

/// Runs tasks first-in first-out, `batch_size` at a time. Each request is
/// expected to have a single task.
pub struct BasicScheduler<C: ?Sized, O, F> {
    batch_size: NonZeroUsize,
    block_stride: NonZeroUsize,
    invocation_fn: F,
    pending: VecDeque<LlmTaskInput>,
    _phantom: PhantomData<fn(&mut C) -> O>,
}

impl<C, O, F> BasicScheduler<C, O, F>
where
    C: ?Sized,
    F: FnMut(&LlmBatch<'_>, &mut C) -> O,
{
    pub fn new(batch_size: NonZeroUsize, block_stride: NonZeroUsize, invocation_fn: F) -> Self {
        BasicScheduler {
            batch_size,
            block_stride,
            invocation_fn,
            pending: VecDeque::new(),
            _phantom: PhantomData,
        }
    }
}

impl<C, O, F> Scheduler for BasicScheduler<C, O, F>
where
    C: ?Sized,
    F: FnMut(&LlmBatch<'_>, &mut C) -> O,
{
    type Cache = C;
    type Output = O;

    fn schedule_task(&mut self, task: LlmTaskInput) {
        self.pending.push_back(task);
    }

    fn has_pending_tasks(&self) -> bool {
        !self.pending.is_empty()
    }

    fn next_batch(&mut self) -> Vec<LlmTaskInput> {
        let take = self.batch_size.get().min(self.pending.len());
        self.pending.drain(..take).collect()
    }

    fn batch<'a>(&self, tasks: &'a [LlmTaskInput]) -> LlmBatch<'a> {
        LlmBatch::new(tasks, self.batch_size, self.block_stride, None)
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
        selections.insert(task.request_id.clone(), vec![selection]);
    }
}
