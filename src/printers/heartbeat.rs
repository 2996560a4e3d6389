// src/printers/heartbeat.rs - pausable periodic task
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub type TickFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    Running,
    Paused,
    Stopped,
}

/// Runs `tick` every `period` once started. Pausing keeps the timer alive so
/// the cadence is unchanged after a resume; `clear` ends the task.
pub struct Heartbeat {
    period: Duration,
    tick: TickFn,
    control: watch::Sender<Beat>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(period: Duration, tick: TickFn) -> Self {
        let (control, _) = watch::channel(Beat::Stopped);
        Self {
            period,
            tick,
            control,
            task: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        *self.control.borrow() == Beat::Running
    }

    /// Starts the timer, or resumes it if it is paused.
    pub fn start(&self) {
        self.control.send_replace(Beat::Running);
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let mut control = self.control.subscribe();
        let tick = self.tick.clone();
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if *control.borrow() == Beat::Running {
                            tick().await;
                        }
                    }
                    changed = control.changed() => {
                        if changed.is_err() || *control.borrow() == Beat::Stopped {
                            break;
                        }
                    }
                }
            }
        }));
    }

    pub fn pause(&self) {
        self.control.send_if_modified(|beat| {
            if *beat == Beat::Running {
                *beat = Beat::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.control.send_if_modified(|beat| {
            if *beat == Beat::Paused {
                *beat = Beat::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn clear(&self) {
        self.control.send_replace(Beat::Stopped);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(period_ms: u64) -> (Heartbeat, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let ticks = count.clone();
        let heartbeat = Heartbeat::new(
            Duration::from_millis(period_ms),
            Arc::new(move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                async {}.boxed()
            }),
        );
        (heartbeat, count)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_only_while_running() {
        let (heartbeat, count) = counting(100);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        heartbeat.start();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        heartbeat.pause();
        assert!(!heartbeat.is_running());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        heartbeat.resume();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);

        heartbeat.clear();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_without_pause_is_a_no_op() {
        let (heartbeat, count) = counting(100);
        heartbeat.resume();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!heartbeat.is_running());
    }
}
