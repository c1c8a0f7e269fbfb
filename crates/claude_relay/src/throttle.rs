use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::chat::{ChatError, ChatFuture};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(1500);

/// The side effect a [`ThrottledUpdater`] rate-limits, e.g. "edit this chat message".
pub trait UpdateTarget: Send + Sync + 'static {
    fn update<'a>(&'a self, text: &'a str) -> ChatFuture<'a, Result<(), ChatError>>;
}

/// Rate-limited delivery of a growing text value.
///
/// `schedule` coalesces bursts: at most one delivery per interval, always carrying the latest
/// value, with failures logged and dropped. `flush` skips the throttle, discards whatever was
/// pending, and reports failure to the caller.
pub struct ThrottledUpdater {
    target: Arc<dyn UpdateTarget>,
    interval: Duration,
    state: Arc<Mutex<ThrottleState>>,
}

#[derive(Default)]
struct ThrottleState {
    pending: Option<String>,
    timer: Option<JoinHandle<()>>,
    last_update: Option<Instant>,
}

impl ThrottledUpdater {
    pub fn new(target: Arc<dyn UpdateTarget>, interval: Duration) -> Self {
        Self {
            target,
            interval,
            state: Arc::new(Mutex::new(ThrottleState::default())),
        }
    }

    pub fn with_default_interval(target: Arc<dyn UpdateTarget>) -> Self {
        Self::new(target, DEFAULT_UPDATE_INTERVAL)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record `text` as the latest value and arm the delivery timer if idle.
    /// Must be called inside a tokio runtime.
    pub fn schedule(&self, text: impl Into<String>) {
        let mut state = lock(&self.state);
        state.pending = Some(text.into());
        if state.timer.is_some() {
            return;
        }

        let delay = match state.last_update {
            Some(last) => self.interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        let task = tokio::spawn(deliver_pending(
            Arc::clone(&self.target),
            Arc::clone(&self.state),
            self.interval,
            delay,
        ));
        state.timer = Some(task);
    }

    /// Cancel any armed timer and deliver `text` now.
    pub async fn flush(&self, text: &str) -> Result<(), ChatError> {
        {
            let mut state = lock(&self.state);
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.pending = None;
        }

        self.target.update(text).await?;
        lock(&self.state).last_update = Some(Instant::now());
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }
}

impl Drop for ThrottledUpdater {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}

/// Timer body: wait out the throttle window, deliver the latest value, repeat while
/// new values arrived during delivery.
async fn deliver_pending(
    target: Arc<dyn UpdateTarget>,
    state: Arc<Mutex<ThrottleState>>,
    interval: Duration,
    mut delay: Duration,
) {
    loop {
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let text = {
            let mut guard = lock(&state);
            match guard.pending.take() {
                Some(text) => text,
                None => {
                    guard.timer = None;
                    return;
                }
            }
        };

        if let Err(err) = target.update(&text).await {
            tracing::debug!(error = %err, "intermediate message update failed");
        }

        let mut guard = lock(&state);
        guard.last_update = Some(Instant::now());
        if guard.pending.is_none() {
            guard.timer = None;
            return;
        }
        delay = interval;
    }
}

fn lock(state: &Mutex<ThrottleState>) -> MutexGuard<'_, ThrottleState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
