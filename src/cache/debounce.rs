//! Debounce unit.
//!
//! Delays a rapidly changing input until it has been quiet for a fixed
//! interval. Every raw value cancels the pending timer and starts a new one,
//! so only the last value of a burst is ever emitted. Settled values are
//! published on a `watch` channel; an emission that equals the current
//! settled value is suppressed.
//!
//! Timers are `spawn_local` tasks, so a debouncer must be used inside a
//! `tokio::task::LocalSet`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

type SettleHook<T> = Rc<dyn Fn(&T)>;

struct DebounceState<T> {
    latest: T,
    pending: Option<JoinHandle<()>>,
    generation: u64,
    on_settle: Option<SettleHook<T>>,
}

pub struct Debouncer<T> {
    label: &'static str,
    interval: Duration,
    state: Rc<RefCell<DebounceState<T>>>,
    settled: Rc<watch::Sender<T>>,
}

impl<T: Clone + PartialEq + 'static> Debouncer<T> {
    /// Create a debouncer whose settled value starts out as `initial`.
    ///
    /// `label` names the input in logs and metrics.
    pub fn new(label: &'static str, initial: T, interval: Duration) -> Self {
        let (settled, _) = watch::channel(initial.clone());
        Self {
            label,
            interval,
            state: Rc::new(RefCell::new(DebounceState {
                latest: initial,
                pending: None,
                generation: 0,
                on_settle: None,
            })),
            settled: Rc::new(settled),
        }
    }

    /// Run `hook` with every newly settled value.
    ///
    /// The hook runs after the settled value is published, outside any
    /// internal borrow, so it may read this debouncer.
    pub fn on_settle(&self, hook: impl Fn(&T) + 'static) {
        self.state.borrow_mut().on_settle = Some(Rc::new(hook));
    }

    /// Feed a raw value and restart the quiet window.
    pub fn observe(&self, value: T) {
        let generation = {
            let mut state = self.state.borrow_mut();
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.latest = value;
            state.generation += 1;
            state.generation
        };

        let state = Rc::clone(&self.state);
        let settled = Rc::clone(&self.settled);
        let label = self.label;
        let interval = self.interval;
        let timer = tokio::task::spawn_local(async move {
            tokio::time::sleep(interval).await;
            emit(label, &state, &settled, generation);
        });

        let mut state = self.state.borrow_mut();
        if state.generation == generation {
            state.pending = Some(timer);
        }
    }

    /// Settle the latest raw value now instead of waiting for the timer.
    pub fn flush(&self) {
        let generation = {
            let mut state = self.state.borrow_mut();
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.generation
        };
        emit(self.label, &self.state, &self.settled, generation);
    }

    /// Drop the pending emission, if any. The settled value is unchanged.
    pub fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;
    }

    /// The most recently settled value.
    pub fn settled(&self) -> T {
        self.settled.borrow().clone()
    }

    /// The most recent raw value, settled or not.
    pub fn latest(&self) -> T {
        self.state.borrow().latest.clone()
    }

    /// Whether an emission is scheduled.
    pub fn is_pending(&self) -> bool {
        self.state.borrow().pending.is_some()
    }

    /// Stream of settled values.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.settled.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.state.borrow_mut().pending.take() {
            pending.abort();
        }
    }
}

fn emit<T: Clone + PartialEq>(
    label: &'static str,
    state: &RefCell<DebounceState<T>>,
    settled: &watch::Sender<T>,
    generation: u64,
) {
    let (value, hook) = {
        let mut state = state.borrow_mut();
        if state.generation != generation {
            return;
        }
        state.pending = None;
        (state.latest.clone(), state.on_settle.clone())
    };

    let changed = settled.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value.clone();
            true
        }
    });
    if !changed {
        trace!(input = label, "Debounced value unchanged");
        return;
    }

    counter!("portal_query_debounce_emit_total", "input" => label).increment(1);
    trace!(input = label, "Debounced value settled");
    if let Some(hook) = hook {
        hook(&value);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::task::LocalSet;
    use tokio::time::{Instant, advance};

    use super::*;

    const QUIET: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn burst_emits_only_last_value_once() {
        LocalSet::new()
            .run_until(async {
                let debouncer = Debouncer::new("name", String::new(), QUIET);
                let emitted = Rc::new(RefCell::new(Vec::new()));
                let sink = Rc::clone(&emitted);
                debouncer.on_settle(move |value: &String| {
                    sink.borrow_mut().push((value.clone(), Instant::now()));
                });

                for input in ["r", "ri", "ric", "rick"] {
                    debouncer.observe(input.to_string());
                    advance(Duration::from_millis(50)).await;
                }
                let last_input = Instant::now() - Duration::from_millis(50);
                assert!(emitted.borrow().is_empty());

                tokio::time::sleep(QUIET).await;

                let emitted = emitted.borrow();
                assert_eq!(emitted.len(), 1);
                assert_eq!(emitted[0].0, "rick");
                assert!(emitted[0].1 - last_input >= QUIET);
                assert_eq!(debouncer.settled(), "rick");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_settled_value_emits_nothing() {
        LocalSet::new()
            .run_until(async {
                let debouncer = Debouncer::new("name", "rick".to_string(), QUIET);
                let emissions = Rc::new(Cell::new(0));
                let count = Rc::clone(&emissions);
                debouncer.on_settle(move |_| count.set(count.get() + 1));

                debouncer.observe("ricky".to_string());
                advance(Duration::from_millis(100)).await;
                debouncer.observe("rick".to_string());
                tokio::time::sleep(QUIET * 2).await;

                assert_eq!(emissions.get(), 0);
                assert!(!debouncer.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_emission() {
        LocalSet::new()
            .run_until(async {
                let debouncer = Debouncer::new("query", String::new(), QUIET);
                let mut settled = debouncer.subscribe();

                debouncer.observe("earth".to_string());
                assert!(debouncer.is_pending());
                debouncer.cancel();
                tokio::time::sleep(QUIET * 2).await;

                assert!(!settled.has_changed().unwrap_or(true));
                assert_eq!(debouncer.latest(), "earth");
                assert_eq!(debouncer.settled(), "");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_settles_immediately() {
        LocalSet::new()
            .run_until(async {
                let debouncer = Debouncer::new("query", String::new(), QUIET);
                debouncer.observe("citadel".to_string());
                debouncer.flush();

                assert_eq!(debouncer.settled(), "citadel");
                assert!(!debouncer.is_pending());
            })
            .await;
    }
}
