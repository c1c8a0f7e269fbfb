use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Registry-side view of one spawned CLI process.
/// Clones share the pid slot and the interrupt and reset flags with the run that owns the child.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    run_id: String,
    pid: Arc<Mutex<Option<u32>>>,
    interrupt: Arc<Notify>,
    discard_session: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn new(run_id: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            run_id: run_id.into(),
            pid: Arc::new(Mutex::new(pid)),
            interrupt: Arc::new(Notify::new()),
            discard_session: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Pid of the live child; `None` once it has been reaped.
    pub fn pid(&self) -> Option<u32> {
        *lock_pid(&self.pid)
    }

    /// Forget the pid after the child was waited on. Later interrupts never signal it.
    pub fn mark_exited(&self) {
        lock_pid(&self.pid).take();
    }

    /// Ask the process to stop: SIGINT where available, otherwise the owning run loop
    /// is woken and kills the child itself.
    pub fn interrupt(&self) {
        let pid = lock_pid(&self.pid);
        if !send_interrupt_signal(*pid) {
            self.interrupt.notify_one();
        }
    }

    /// Mark the run so it does not record its session id on exit.
    pub fn discard_session(&self) {
        self.discard_session.store(true, Ordering::Release);
    }

    pub fn session_discarded(&self) -> bool {
        self.discard_session.load(Ordering::Acquire)
    }

    pub(crate) async fn interrupted(&self) {
        self.interrupt.notified().await;
    }
}

fn lock_pid(pid: &Mutex<Option<u32>>) -> MutexGuard<'_, Option<u32>> {
    match pid.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(unix)]
fn send_interrupt_signal(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGINT) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(pid = raw, error = %err, "SIGINT delivery failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt_signal(_pid: Option<u32>) -> bool {
    false
}

/// Running CLI processes keyed by thread id.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    running: Mutex<HashMap<String, ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle`, returning whichever handle it replaced.
    /// The replaced process keeps running; callers that must not orphan a run use
    /// [`try_register`](Self::try_register).
    pub fn register(
        &self,
        thread_id: impl Into<String>,
        handle: ProcessHandle,
    ) -> Option<ProcessHandle> {
        self.lock().insert(thread_id.into(), handle)
    }

    /// Store `handle` only when no process is registered for the thread.
    pub fn try_register(
        &self,
        thread_id: impl Into<String>,
        handle: ProcessHandle,
    ) -> Result<(), ProcessHandle> {
        let mut running = self.lock();
        let thread_id = thread_id.into();
        if running.contains_key(&thread_id) {
            return Err(handle);
        }
        running.insert(thread_id, handle);
        Ok(())
    }

    /// Interrupt and forget the thread's process. Returns whether one was registered.
    pub fn abort(&self, thread_id: &str) -> bool {
        let Some(handle) = self.lock().remove(thread_id) else {
            return false;
        };
        tracing::debug!(thread_id, run_id = handle.run_id(), "interrupting claude run");
        handle.interrupt();
        true
    }

    /// Like [`abort`](Self::abort), additionally telling the run not to record its session.
    pub fn abort_and_discard_session(&self, thread_id: &str) -> bool {
        let Some(handle) = self.lock().remove(thread_id) else {
            return false;
        };
        handle.discard_session();
        handle.interrupt();
        true
    }

    /// Interrupt every tracked process. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<ProcessHandle> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in &drained {
            handle.interrupt();
        }
        drained.len()
    }

    /// Forget the thread's entry without signalling it.
    pub fn unregister(&self, thread_id: &str) {
        self.lock().remove(thread_id);
    }

    /// Forget the thread's entry only while it still belongs to `run_id`.
    pub fn unregister_run(&self, thread_id: &str, run_id: &str) -> bool {
        let mut running = self.lock();
        if running.get(thread_id).map(ProcessHandle::run_id) != Some(run_id) {
            return false;
        }
        running.remove(thread_id);
        true
    }

    pub fn is_running(&self, thread_id: &str) -> bool {
        self.lock().contains_key(thread_id)
    }

    pub fn running_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProcessHandle>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
