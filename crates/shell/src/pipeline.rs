//! Bounded hand-off of built layer trees from the UI context to the raster
//! context.
//!
//! A producer first reserves a slot with [`LayerTreePipeline::produce`] and
//! later fills it through the returned continuation. Dropping an unfilled
//! continuation releases the slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use compositor::LayerTree;

use crate::frame_timing::FrameTimingsRecorder;

pub const PIPELINE_DEPTH: usize = 2;

pub struct LayerTreeItem {
    pub layer_tree: LayerTree,
    pub frame_timings_recorder: FrameTimingsRecorder,
}

impl LayerTreeItem {
    pub fn new(layer_tree: LayerTree, frame_timings_recorder: FrameTimingsRecorder) -> Self {
        Self {
            layer_tree,
            frame_timings_recorder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineProduceResult {
    pub success: bool,
    /// The pipeline was empty before this item, so nobody is draining it yet.
    pub is_first_item: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineConsumeResult {
    NoneAvailable,
    Done,
    MoreAvailable,
}

struct PipelineState {
    queue: VecDeque<LayerTreeItem>,
    free_slots: usize,
}

pub struct LayerTreePipeline {
    state: Mutex<PipelineState>,
}

impl Default for LayerTreePipeline {
    fn default() -> Self {
        Self::new(PIPELINE_DEPTH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContinuationKind {
    Back,
    FrontIfEmpty,
}

/// A reserved pipeline slot.
pub struct ProducerContinuation {
    pipeline: Arc<LayerTreePipeline>,
    kind: ContinuationKind,
    completed: bool,
}

impl ProducerContinuation {
    pub fn complete(mut self, item: LayerTreeItem) -> PipelineProduceResult {
        self.completed = true;
        match self.kind {
            ContinuationKind::Back => self.pipeline.commit(item),
            ContinuationKind::FrontIfEmpty => self.pipeline.commit_if_empty(item),
        }
    }
}

impl Drop for ProducerContinuation {
    fn drop(&mut self) {
        if !self.completed {
            self.pipeline.lock().free_slots += 1;
        }
    }
}

impl LayerTreePipeline {
    pub fn new(depth: usize) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                queue: VecDeque::with_capacity(depth),
                free_slots: depth,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a slot at the back, or `None` when the pipeline is full.
    pub fn produce(self: &Arc<Self>) -> Option<ProducerContinuation> {
        self.reserve(ContinuationKind::Back)
    }

    /// Reserves a slot for an item that is only accepted if the pipeline is
    /// still empty when it is committed. Used to push a frame back for
    /// resubmission without overtaking newer frames.
    pub fn produce_if_empty(self: &Arc<Self>) -> Option<ProducerContinuation> {
        self.reserve(ContinuationKind::FrontIfEmpty)
    }

    fn reserve(self: &Arc<Self>, kind: ContinuationKind) -> Option<ProducerContinuation> {
        let mut state = self.lock();
        if state.free_slots == 0 {
            return None;
        }
        state.free_slots -= 1;
        Some(ProducerContinuation {
            pipeline: Arc::clone(self),
            kind,
            completed: false,
        })
    }

    fn commit(&self, item: LayerTreeItem) -> PipelineProduceResult {
        let mut state = self.lock();
        let is_first_item = state.queue.is_empty();
        state.queue.push_back(item);
        PipelineProduceResult {
            success: true,
            is_first_item,
        }
    }

    fn commit_if_empty(&self, item: LayerTreeItem) -> PipelineProduceResult {
        let mut state = self.lock();
        if !state.queue.is_empty() {
            state.free_slots += 1;
            return PipelineProduceResult {
                success: false,
                is_first_item: false,
            };
        }
        state.queue.push_front(item);
        PipelineProduceResult {
            success: true,
            is_first_item: true,
        }
    }

    /// Hands the oldest item to `consumer`.
    pub fn consume(&self, consumer: impl FnOnce(LayerTreeItem)) -> PipelineConsumeResult {
        let (item, items_left) = {
            let mut state = self.lock();
            let Some(item) = state.queue.pop_front() else {
                return PipelineConsumeResult::NoneAvailable;
            };
            (item, state.queue.len())
        };
        consumer(item);
        self.lock().free_slots += 1;
        if items_left > 0 {
            PipelineConsumeResult::MoreAvailable
        } else {
            PipelineConsumeResult::Done
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
