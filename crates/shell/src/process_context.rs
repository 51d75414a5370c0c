//! State shared by every shell of a process.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use persistent_cache::PersistentCache;
use task_runner::TaskQueues;

use crate::settings::Settings;

pub struct ProcessContext {
    task_queues: Arc<TaskQueues>,
    persistent_cache: ArcSwap<PersistentCache>,
    running_shells: AtomicUsize,
}

impl ProcessContext {
    pub fn new(task_queues: Arc<TaskQueues>, persistent_cache: PersistentCache) -> Arc<Self> {
        Arc::new(Self {
            task_queues,
            persistent_cache: ArcSwap::from_pointee(persistent_cache),
            running_shells: AtomicUsize::new(0),
        })
    }

    /// Context whose persistent cache follows the cache flags of `settings`.
    pub fn from_settings(task_queues: Arc<TaskQueues>, settings: &Settings) -> Arc<Self> {
        let persistent_cache = PersistentCache::new(
            settings.cache_directory.as_deref(),
            settings.persistent_cache_read_only,
        );
        Self::new(task_queues, persistent_cache)
    }

    pub fn task_queues(&self) -> &Arc<TaskQueues> {
        &self.task_queues
    }

    pub fn persistent_cache(&self) -> Arc<PersistentCache> {
        self.persistent_cache.load_full()
    }

    /// Readers holding the previous cache keep it until they drop it.
    pub fn replace_persistent_cache(&self, persistent_cache: PersistentCache) {
        self.persistent_cache.store(Arc::new(persistent_cache));
    }

    pub fn is_instance_running(&self) -> bool {
        self.running_shells.load(Ordering::Acquire) > 0
    }

    pub fn running_shell_count(&self) -> usize {
        self.running_shells.load(Ordering::Acquire)
    }

    pub(crate) fn shell_started(&self) {
        self.running_shells.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn shell_stopped(&self) {
        let previous = self.running_shells.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "shell stopped more often than started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_follows_settings_and_can_be_swapped() {
        let directory = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            cache_directory: Some(directory.path().to_path_buf()),
            ..Settings::default()
        };
        let context = ProcessContext::from_settings(Arc::new(TaskQueues::new()), &settings);
        let original = context.persistent_cache();
        assert!(original.is_valid());
        assert!(!original.is_read_only());

        context.replace_persistent_cache(PersistentCache::new(None, true));
        assert!(!context.persistent_cache().is_valid());
        assert!(original.is_valid());
    }

    #[test]
    fn instance_running_tracks_live_shells() {
        let context = ProcessContext::new(Arc::new(TaskQueues::new()), PersistentCache::new(None, false));
        assert!(!context.is_instance_running());
        context.shell_started();
        context.shell_started();
        context.shell_stopped();
        assert!(context.is_instance_running());
        context.shell_stopped();
        assert_eq!(context.running_shell_count(), 0);
    }
}
