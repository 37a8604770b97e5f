//! Debounced async job runner. Bursts of `schedule()` calls collapse into a
//! single run after the delay; a run in progress blocks concurrent starts,
//! and a call landing mid-run defers exactly one follow-up run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct Debouncer(Arc<Inner>);

struct Inner {
    delay: Duration,
    job: Job,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    scheduled: bool,
    running: bool,
    deferred: bool,
}

impl Debouncer {
    pub fn new(delay: Duration, job: Job) -> Self { Self(Arc::new(Inner { delay, job, state: Mutex::new(State::default()) })) }

    /// True while a run is in progress.
    pub fn running(&self) -> bool { self.0.state.lock().unwrap().running }

    /// Request a run after the debounce delay.
    pub fn schedule(&self) {
        {
            let mut state = self.0.state.lock().unwrap();
            if state.running {
                state.deferred = true;
                return;
            }
            if state.scheduled {
                return;
            }
            state.scheduled = true;
        }
        let me = self.clone();
        crate::task::spawn(async move {
            tokio::time::sleep(me.0.delay).await;
            {
                let mut state = me.0.state.lock().unwrap();
                if !state.scheduled {
                    return; // cancelled by a direct run
                }
                state.scheduled = false;
                if state.running {
                    state.deferred = true;
                    return;
                }
                state.running = true;
            }
            me.run_and_settle().await;
        });
    }

    /// Run immediately, bypassing the delay. A run already in progress
    /// absorbs this call as a deferred follow-up.
    pub async fn run_now(&self) {
        {
            let mut state = self.0.state.lock().unwrap();
            if state.running {
                state.deferred = true;
                return;
            }
            state.scheduled = false;
            state.running = true;
        }
        self.run_and_settle().await;
    }

    async fn run_and_settle(&self) {
        (self.0.job)().await;
        let deferred = {
            let mut state = self.0.state.lock().unwrap();
            state.running = false;
            std::mem::take(&mut state.deferred)
        };
        if deferred {
            self.schedule();
        }
    }
}
