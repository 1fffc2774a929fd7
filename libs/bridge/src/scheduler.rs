//! Poll Scheduler
//!
//! Drains server-initiated callbacks (e.g. credential refresh) with an
//! adaptive one-shot timer. Activity pins the interval to the floor; each
//! idle poll doubles it up to the ceiling. Polling never stops entirely.
//!
//! The timer runs on a dedicated thread fed by a channel. Every `arm` and
//! `cancel` bumps a generation counter, and a fired timer only polls if
//! its generation is still current once it holds the dispatch gate, so a
//! timer that fires while a request is in flight is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bridge_config::{commands, PollSettings};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

/// Adaptive poll interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current_ms: u64,
    floor_ms: u64,
    ceiling_ms: u64,
}

impl Backoff {
    pub fn new(floor_ms: u64, ceiling_ms: u64) -> Self {
        let floor_ms = floor_ms.max(1);
        Self {
            current_ms: floor_ms,
            floor_ms,
            ceiling_ms: ceiling_ms.max(floor_ms),
        }
    }

    pub fn from_settings(settings: &PollSettings) -> Self {
        Self::new(settings.floor_ms, settings.ceiling_ms)
    }

    /// Account for one completed exchange
    ///
    /// Anything other than an idle poll resets to the floor, including
    /// ordinary calls that carried no callback.
    pub fn record(&mut self, command: &str, carried_callback: bool) {
        if carried_callback || command != commands::CALLBACKS_POLL {
            self.current_ms = self.floor_ms;
        } else {
            self.current_ms = self.current_ms.saturating_mul(2).min(self.ceiling_ms);
        }
    }

    pub fn reset(&mut self) {
        self.current_ms = self.floor_ms;
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&PollSettings::default())
    }
}

/// Receiver of timer expiries
pub trait PollTarget: Send + Sync {
    /// Called on the scheduler thread when the timer armed with
    /// `generation` expires
    fn poll_tick(&self, generation: u64);
}

enum TimerCommand {
    Arm { generation: u64, delay: Duration },
    Cancel,
}

/// One-shot cancellable poll timer
pub struct PollScheduler {
    generation: AtomicU64,
    sender: Mutex<Option<Sender<TimerCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
}

impl PollScheduler {
    /// Scheduler that tracks generations but never fires
    pub fn disabled() -> Self {
        Self {
            generation: AtomicU64::new(0),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            worker_id: None,
        }
    }

    /// Spawn the timer thread; it exits once the scheduler is dropped or
    /// the target is gone
    pub fn spawn(target: Weak<dyn PollTarget>) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded();

        let worker = thread::Builder::new()
            .name("bridge-poll".to_string())
            .spawn(move || timer_loop(receiver, target))?;
        let worker_id = Some(worker.thread().id());

        Ok(Self {
            generation: AtomicU64::new(0),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Cancel any pending timer
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.send(TimerCommand::Cancel);
    }

    /// Arm the timer, replacing any pending one
    pub fn arm(&self, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(generation, delay_ms = delay.as_millis() as u64, "arming poll timer");
        self.send(TimerCommand::Arm { generation, delay });
    }

    /// Whether a timer armed with `generation` is still the live one
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Signal the timer thread to exit without waiting for it
    ///
    /// The thread finishes any tick in progress, then exits on its own.
    pub fn stop(&self) {
        self.sender.lock().take();
        self.worker.lock().take();
    }

    /// Stop the timer thread and wait for it, unless called from it
    ///
    /// Must not be called while holding anything a tick acquires; use
    /// [`PollScheduler::stop`] there.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        if self.worker_id == Some(thread::current().id()) {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("poll timer thread panicked");
            }
        }
    }

    fn send(&self, command: TimerCommand) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // Disconnected means the thread already exited with its target
            let _ = sender.send(command);
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        // Dropping the sender ends the loop; joining here could run on the
        // timer thread itself when it held the last reference
        self.sender.get_mut().take();
    }
}

fn timer_loop(receiver: Receiver<TimerCommand>, target: Weak<dyn PollTarget>) {
    debug!("poll timer thread started");
    let mut pending: Option<(Instant, u64)> = None;

    loop {
        let command = match pending {
            Some((deadline, _)) => receiver.recv_deadline(deadline),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(TimerCommand::Arm { generation, delay }) => {
                pending = Some((Instant::now() + delay, generation));
            }
            Ok(TimerCommand::Cancel) => pending = None,
            Err(RecvTimeoutError::Timeout) => {
                let Some((_, generation)) = pending.take() else {
                    continue;
                };
                match target.upgrade() {
                    Some(target) => target.poll_tick(generation),
                    None => break,
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("poll timer thread stopped");
}
