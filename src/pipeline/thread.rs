//! Long-lived processor threads: naming, CPU pinning, joining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// Per-processor thread configuration.
#[derive(Debug, Clone, Default)]
pub struct ThreadContext {
    name: Option<String>,
    core: Option<usize>,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the thread; defaults to `raceway-processor-N`.
    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pin the thread to a CPU core. Latency-critical consumers should own
    /// their core outright.
    pub fn pinned_at(mut self, core_id: usize) -> Self {
        self.core = Some(core_id);
        self
    }
}

/// A spawned processor thread that is joined on drop.
pub struct ManagedThread {
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl ManagedThread {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread to exit.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

static THREAD_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Builder for named, optionally pinned processor threads.
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    context: ThreadContext,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_context(context: ThreadContext) -> Self {
        Self { context }
    }

    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.context = self.context.named(name);
        self
    }

    pub fn pin_at_core(mut self, core_id: usize) -> Self {
        self.context = self.context.pinned_at(core_id);
        self
    }

    /// Spawn `f` on a new thread with the configured name and affinity.
    pub fn spawn<F>(self, f: F) -> std::io::Result<ManagedThread>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.context.name.unwrap_or_else(|| {
            format!(
                "raceway-processor-{}",
                THREAD_SEQ.fetch_add(1, Ordering::Relaxed)
            )
        });
        let core = self.context.core;
        let spawned_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            pin_current_thread(core, &spawned_name);
            f();
        })?;
        Ok(ManagedThread {
            handle: Some(handle),
            name,
        })
    }
}

fn pin_current_thread(core: Option<usize>, thread_name: &str) {
    let Some(core_id) = core else { return };
    if core_affinity::set_for_current(core_affinity::CoreId { id: core_id }) {
        tracing::debug!(thread = thread_name, core = core_id, "pinned to core");
    } else {
        tracing::warn!(
            thread = thread_name,
            core = core_id,
            "could not pin thread to core"
        );
    }
}

/// IDs of the CPU cores available for pinning.
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|core| core.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn spawned_thread_runs_and_joins() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let thread = ThreadBuilder::new()
            .thread_name("spawn-test")
            .spawn(move || flag.store(true, Ordering::Release))
            .unwrap();
        assert_eq!(thread.name(), "spawn-test");
        thread.join().unwrap();
        assert!(ran.load(Ordering::Acquire));
    }

    #[test]
    fn unnamed_threads_get_sequential_names() {
        let a = ThreadBuilder::new().spawn(|| {}).unwrap();
        let b = ThreadBuilder::new().spawn(|| {}).unwrap();
        assert_ne!(a.name(), b.name());
        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn pinning_to_an_available_core_works() {
        let cores = available_cores();
        if let Some(&core) = cores.first() {
            let thread = ThreadBuilder::new()
                .pin_at_core(core)
                .spawn(|| {})
                .unwrap();
            thread.join().unwrap();
        }
    }
}
