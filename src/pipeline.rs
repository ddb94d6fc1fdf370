//! Debounced regrouping.
//!
//! Mutations fire a [`Trigger`]. The scheduler task waits for the trigger to
//! go quiet for one cooldown, groups a snapshot of the collection on the
//! blocking pool and sends the result to the view's render channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collection::SortedCollection;
use crate::grouping::GroupingMode;
use crate::view::RenderMessage;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared "something changed" signal. Does nothing until a scheduler arms it.
#[derive(Clone, Default)]
pub struct Trigger {
    slot: Arc<Mutex<Option<UnboundedSender<()>>>>,
}

impl Trigger {
    /// Returns false when no scheduler is listening.
    pub fn fire(&self) -> bool {
        match lock(&self.slot).as_ref() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn arm(&self, tx: UnboundedSender<()>) {
        *lock(&self.slot) = Some(tx);
    }

    pub fn disarm(&self) {
        lock(&self.slot).take();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Idle,
    Scheduled,
    Running,
}

struct Scheduler {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

pub struct Pipeline {
    cooldown: Duration,
    collection: SortedCollection,
    trigger: Trigger,
    mode: Arc<Mutex<GroupingMode>>,
    render_tx: UnboundedSender<RenderMessage>,
    state: Arc<Mutex<PipelineState>>,
    generation: u64,
    scheduler: Option<Scheduler>,
}

impl Pipeline {
    pub fn new(
        collection: SortedCollection,
        mode: GroupingMode,
        cooldown: Duration,
        render_tx: UnboundedSender<RenderMessage>,
    ) -> Self {
        Self {
            cooldown,
            trigger: collection.trigger().clone(),
            collection,
            mode: Arc::new(Mutex::new(mode)),
            render_tx,
            state: Arc::new(Mutex::new(PipelineState::Stopped)),
            generation: 0,
            scheduler: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    /// Switch strategy; the next pass uses it.
    pub fn set_mode(&self, mode: GroupingMode) {
        *lock(&self.mode) = mode;
        self.trigger.fire();
    }

    pub fn trigger(&self) -> bool {
        self.trigger.fire()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Spawn a fresh scheduler. Must be called from within a tokio runtime.
    /// Returns the generation that tags this run's results.
    pub fn start(&mut self) -> u64 {
        self.stop();
        self.generation += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        *lock(&self.state) = PipelineState::Idle;

        let worker = Worker {
            rx,
            cooldown: self.cooldown,
            collection: self.collection.clone(),
            mode: self.mode.clone(),
            render_tx: self.render_tx.clone(),
            state: self.state.clone(),
            active: active.clone(),
            generation: self.generation,
        };
        let task = tokio::spawn(worker.run());
        self.trigger.arm(tx);
        self.scheduler = Some(Scheduler { task, active });
        debug!(generation = self.generation, "pipeline started");
        self.generation
    }

    /// Cancel any pending cooldown. A grouping already running on the
    /// blocking pool finishes, but its result is dropped.
    pub fn stop(&mut self) {
        self.trigger.disarm();
        if let Some(scheduler) = self.scheduler.take() {
            let mut state = lock(&self.state);
            scheduler.active.store(false, Ordering::Release);
            *state = PipelineState::Stopped;
            drop(state);
            scheduler.task.abort();
            debug!(generation = self.generation, "pipeline stopped");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    rx: UnboundedReceiver<()>,
    cooldown: Duration,
    collection: SortedCollection,
    mode: Arc<Mutex<GroupingMode>>,
    render_tx: UnboundedSender<RenderMessage>,
    state: Arc<Mutex<PipelineState>>,
    active: Arc<AtomicBool>,
    generation: u64,
}

impl Worker {
    async fn run(mut self) {
        while self.rx.recv().await.is_some() {
            self.set_state(PipelineState::Scheduled);
            if !self.cool_down().await {
                return;
            }
            loop {
                self.set_state(PipelineState::Running);
                self.run_pass().await;
                if !self.drain_owed() {
                    break;
                }
                self.set_state(PipelineState::Scheduled);
                if !self.cool_down().await {
                    return;
                }
            }
            self.set_state(PipelineState::Idle);
            self.send(RenderMessage::Settled {
                generation: self.generation,
            });
        }
    }

    /// Wait until no trigger arrives for a full cooldown. Every trigger
    /// restarts the wait. False if the trigger side went away.
    async fn cool_down(&mut self) -> bool {
        loop {
            tokio::select! {
                signal = self.rx.recv() => {
                    if signal.is_none() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(self.cooldown) => return true,
            }
        }
    }

    /// Triggers that arrived while a pass was running collapse into one.
    fn drain_owed(&mut self) -> bool {
        let mut owed = false;
        while self.rx.try_recv().is_ok() {
            owed = true;
        }
        owed
    }

    async fn run_pass(&self) {
        let collection = self.collection.clone();
        let mode = *lock(&self.mode);
        let started = Instant::now();

        let pass = tokio::task::spawn_blocking(move || {
            let records = collection.snapshot();
            (records.len(), mode.group(&records))
        });
        match pass.await {
            Ok((count, grouping)) => {
                debug!(
                    generation = self.generation,
                    records = count,
                    groups = grouping.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "grouping pass done"
                );
                self.send(RenderMessage::Grouped {
                    generation: self.generation,
                    grouping,
                });
            }
            Err(e) => warn!(generation = self.generation, "grouping pass failed: {e}"),
        }
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = lock(&self.state);
        if self.active.load(Ordering::Acquire) {
            *state = next;
        }
    }

    fn send(&self, message: RenderMessage) {
        if self.active.load(Ordering::Acquire) {
            let _ = self.render_tx.send(message);
        }
    }
}
