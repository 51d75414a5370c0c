use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one task queue. Ids are unique across every registry in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskQueueId(u64);

impl TaskQueueId {
    fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskQueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

struct PendingTask {
    target_time: Instant,
    order: u64,
    task: Task,
}

impl PendingTask {
    fn sort_key(&self) -> (Instant, u64) {
        (self.target_time, self.order)
    }
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    // Reversed so the max-heap pops the earliest (target_time, order) first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.sort_key().cmp(&self.sort_key())
    }
}

#[derive(Default)]
struct QueueEntry {
    pending: BinaryHeap<PendingTask>,
    owner_of: HashSet<TaskQueueId>,
    subsumed_by: Option<TaskQueueId>,
    wakeup: Option<Sender<()>>,
}

impl QueueEntry {
    fn peek_key(&self) -> Option<(Instant, u64)> {
        self.pending.peek().map(PendingTask::sort_key)
    }
}

/// Registry of task queues and their merge relations.
///
/// A queue subsumed by another one stops being serviced by its own loop; the
/// owner's loop drains both queues in `(target_time, post order)` order.
pub struct TaskQueues {
    entries: Mutex<HashMap<TaskQueueId, QueueEntry>>,
    next_order: AtomicU64,
}

impl Default for TaskQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueues {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<TaskQueueId, QueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_queue(&self) -> TaskQueueId {
        let queue_id = TaskQueueId::next();
        self.lock_entries().insert(queue_id, QueueEntry::default());
        queue_id
    }

    /// Removes the queue and drops its pending tasks on the calling thread.
    pub fn dispose(&self, queue_id: TaskQueueId) {
        let removed = {
            let mut entries = self.lock_entries();
            let Some(removed) = entries.remove(&queue_id) else {
                return;
            };
            if let Some(owner) = removed.subsumed_by {
                if let Some(owner_entry) = entries.get_mut(&owner) {
                    owner_entry.owner_of.remove(&queue_id);
                }
            }
            for subsumed in &removed.owner_of {
                if let Some(subsumed_entry) = entries.get_mut(subsumed) {
                    subsumed_entry.subsumed_by = None;
                }
                wake_unlocked(&entries, *subsumed);
            }
            removed
        };
        drop(removed);
    }

    pub fn set_wakeup(&self, queue_id: TaskQueueId, wakeup: Sender<()>) {
        if let Some(entry) = self.lock_entries().get_mut(&queue_id) {
            entry.wakeup = Some(wakeup);
        }
    }

    pub fn register_task(&self, queue_id: TaskQueueId, task: Task, target_time: Instant) {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock_entries();
        let Some(entry) = entries.get_mut(&queue_id) else {
            drop(entries);
            tracing::debug!(%queue_id, "dropping task posted to a disposed queue");
            drop(task);
            return;
        };
        entry.pending.push(PendingTask {
            target_time,
            order,
            task,
        });
        let wake_id = entry.subsumed_by.unwrap_or(queue_id);
        wake_unlocked(&entries, wake_id);
    }

    pub fn has_pending_tasks(&self, queue_id: TaskQueueId) -> bool {
        let entries = self.lock_entries();
        next_key_unlocked(&entries, queue_id).is_some()
    }

    /// Earliest target time among the tasks this queue's loop services.
    pub fn next_wake_time(&self, queue_id: TaskQueueId) -> Option<Instant> {
        let entries = self.lock_entries();
        next_key_unlocked(&entries, queue_id).map(|(_, (target_time, _))| target_time)
    }

    /// Pops the next task whose target time is not after `now`.
    pub fn next_task_to_run(&self, queue_id: TaskQueueId, now: Instant) -> Option<Task> {
        let mut entries = self.lock_entries();
        let (source, (target_time, _)) = next_key_unlocked(&entries, queue_id)?;
        if target_time > now {
            return None;
        }
        entries
            .get_mut(&source)
            .and_then(|entry| entry.pending.pop())
            .map(|pending| pending.task)
    }

    pub fn merge(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> bool {
        if owner == subsumed {
            return true;
        }
        let mut entries = self.lock_entries();
        let (Some(owner_entry), Some(subsumed_entry)) = (entries.get(&owner), entries.get(&subsumed))
        else {
            return false;
        };
        if owner_entry.owner_of.contains(&subsumed) {
            return true;
        }
        if owner_entry.subsumed_by.is_some()
            || !subsumed_entry.owner_of.is_empty()
            || subsumed_entry.subsumed_by.is_some()
        {
            return false;
        }
        if let Some(owner_entry) = entries.get_mut(&owner) {
            owner_entry.owner_of.insert(subsumed);
        }
        if let Some(subsumed_entry) = entries.get_mut(&subsumed) {
            subsumed_entry.subsumed_by = Some(owner);
        }
        wake_unlocked(&entries, owner);
        true
    }

    pub fn unmerge(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> bool {
        let mut entries = self.lock_entries();
        let owns = entries
            .get_mut(&owner)
            .is_some_and(|owner_entry| owner_entry.owner_of.remove(&subsumed));
        if !owns {
            return false;
        }
        if let Some(subsumed_entry) = entries.get_mut(&subsumed) {
            subsumed_entry.subsumed_by = None;
        }
        wake_unlocked(&entries, owner);
        wake_unlocked(&entries, subsumed);
        true
    }

    pub fn owns(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> bool {
        self.lock_entries()
            .get(&owner)
            .is_some_and(|entry| entry.owner_of.contains(&subsumed))
    }

    pub fn runs_on_the_same_thread(&self, queue_a: TaskQueueId, queue_b: TaskQueueId) -> bool {
        queue_a == queue_b || self.owns(queue_a, queue_b) || self.owns(queue_b, queue_a)
    }
}

fn next_key_unlocked(
    entries: &HashMap<TaskQueueId, QueueEntry>,
    queue_id: TaskQueueId,
) -> Option<(TaskQueueId, (Instant, u64))> {
    let entry = entries.get(&queue_id)?;
    if entry.subsumed_by.is_some() {
        return None;
    }
    let mut best = entry.peek_key().map(|key| (queue_id, key));
    for subsumed in &entry.owner_of {
        let Some(key) = entries.get(subsumed).and_then(QueueEntry::peek_key) else {
            continue;
        };
        if best.is_none_or(|(_, best_key)| key < best_key) {
            best = Some((*subsumed, key));
        }
    }
    best
}

fn wake_unlocked(entries: &HashMap<TaskQueueId, QueueEntry>, queue_id: TaskQueueId) {
    let Some(wakeup) = entries.get(&queue_id).and_then(|entry| entry.wakeup.as_ref()) else {
        return;
    };
    match wakeup.try_send(()) {
        Ok(()) => {}
        Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => {}
    }
}
