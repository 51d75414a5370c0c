use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::message_loop::MessageLoop;
use crate::task_queues::{TaskQueueId, TaskQueues};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterThreadStatus {
    RemainsMerged,
    RemainsUnmerged,
    UnmergedNow,
}

pub type MergeUnmergeCallback = Box<dyn Fn() + Send + Sync>;

/// Temporarily folds the raster queue into the platform queue.
///
/// A merge is granted as a lease counted in frames. The rasterizer decrements it
/// once per frame and the queues separate again when it reaches zero. While
/// disabled, merging and unmerging are refused so a blocked platform thread can
/// never become responsible for raster work. When both ids name the same queue
/// the threads are statically merged and every operation is a no-op.
pub struct RasterThreadMerger {
    platform_queue_id: TaskQueueId,
    gpu_queue_id: TaskQueueId,
    task_queues: Arc<TaskQueues>,
    lease_term: Mutex<usize>,
    merged_condition: Condvar,
    merged: AtomicBool,
    enabled: AtomicBool,
    merge_unmerge_callback: Mutex<Option<MergeUnmergeCallback>>,
}

impl RasterThreadMerger {
    pub fn new(
        platform_queue_id: TaskQueueId,
        gpu_queue_id: TaskQueueId,
        task_queues: Arc<TaskQueues>,
    ) -> Self {
        Self {
            platform_queue_id,
            gpu_queue_id,
            task_queues,
            lease_term: Mutex::new(0),
            merged_condition: Condvar::new(),
            merged: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            merge_unmerge_callback: Mutex::new(None),
        }
    }

    pub fn platform_queue_id(&self) -> TaskQueueId {
        self.platform_queue_id
    }

    pub fn gpu_queue_id(&self) -> TaskQueueId {
        self.gpu_queue_id
    }

    pub fn task_queues_are_same(&self) -> bool {
        self.platform_queue_id == self.gpu_queue_id
    }

    fn lock_lease(&self) -> MutexGuard<'_, usize> {
        self.lease_term.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_merge_unmerge_callback(&self, callback: Option<MergeUnmergeCallback>) {
        *self
            .merge_unmerge_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn notify_merge_unmerge(&self) {
        let callback = self
            .merge_unmerge_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback();
        }
    }

    /// Merges the raster queue into the platform queue for `lease_term` frames.
    /// An existing merge has its lease refreshed instead. A zero lease is ignored.
    pub fn merge_with_lease(&self, lease_term: usize) {
        if lease_term == 0 || self.task_queues_are_same() || !self.is_enabled() {
            return;
        }
        let mut lease = self.lock_lease();
        if *lease > 0 {
            *lease = lease_term;
            self.merged_condition.notify_all();
            return;
        }
        let merged = self
            .task_queues
            .merge(self.platform_queue_id, self.gpu_queue_id);
        if !merged {
            tracing::error!(
                platform_queue = %self.platform_queue_id,
                raster_queue = %self.gpu_queue_id,
                "unable to merge the raster and platform threads"
            );
            return;
        }
        *lease = lease_term;
        self.merged.store(true, Ordering::Release);
        self.merged_condition.notify_all();
        drop(lease);
        tracing::debug!(lease_term, "raster thread merged into platform thread");
        self.notify_merge_unmerge();
    }

    /// Raises the remaining lease to `lease_term` if it is currently shorter.
    pub fn extend_lease_to(&self, lease_term: usize) {
        if self.task_queues_are_same() {
            return;
        }
        let mut lease = self.lock_lease();
        debug_assert!(*lease > 0, "extending the lease of unmerged threads");
        if *lease > 0 && lease_term > *lease {
            *lease = lease_term;
        }
    }

    /// Separates the queues immediately, unless disabled or statically merged.
    pub fn unmerge_now(&self) {
        let lease = self.lock_lease();
        self.unmerge_now_locked(lease);
    }

    fn unmerge_now_locked(&self, mut lease: MutexGuard<'_, usize>) {
        if !self.is_enabled() || self.task_queues_are_same() {
            return;
        }
        *lease = 0;
        self.merged.store(false, Ordering::Release);
        let unmerged = self
            .task_queues
            .unmerge(self.platform_queue_id, self.gpu_queue_id);
        drop(lease);
        if unmerged {
            tracing::debug!("raster thread unmerged from platform thread");
            self.notify_merge_unmerge();
        }
    }

    pub fn decrement_lease(&self) -> RasterThreadStatus {
        if self.task_queues_are_same() {
            return RasterThreadStatus::RemainsMerged;
        }
        let mut lease = self.lock_lease();
        if *lease == 0 {
            return RasterThreadStatus::RemainsUnmerged;
        }
        if !self.is_enabled() {
            return RasterThreadStatus::RemainsMerged;
        }
        *lease -= 1;
        if *lease == 0 {
            self.unmerge_now_locked(lease);
            return RasterThreadStatus::UnmergedNow;
        }
        RasterThreadStatus::RemainsMerged
    }

    pub fn is_merged(&self) -> bool {
        self.task_queues_are_same() || self.merged.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        let _lease = self.lock_lease();
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        let _lease = self.lock_lease();
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Blocks the platform thread until a merge is in effect.
    pub fn wait_until_merged(&self) {
        if self.task_queues_are_same() {
            return;
        }
        debug_assert!(self.is_on_platform_thread());
        let lease = self.lock_lease();
        let _merged = self
            .merged_condition
            .wait_while(lease, |lease| *lease == 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn is_on_platform_thread(&self) -> bool {
        MessageLoop::current_task_queue_id() == Some(self.platform_queue_id)
    }

    /// While merged, rasterization happens on the platform thread; otherwise anywhere else.
    pub fn is_on_rasterizing_thread(&self) -> bool {
        if self.is_merged() {
            self.is_on_platform_thread()
        } else {
            !self.is_on_platform_thread()
        }
    }
}
