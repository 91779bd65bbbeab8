//! Speech dispatch: pipelined synthesis, strictly ordered playback.
//!
//! Every enqueued unit gets its own synthesis task straight away, so the
//! next sentence can be synthesized while the current one is playing. A
//! single worker drains the queue in FIFO order and awaits each unit's
//! synthesis before playing it; that await is the ordering barrier.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::core::ports::{Avatar, SpeechSynthesizer, SynthesisError};
use crate::schema::emotion::Emotion;
use crate::schema::screenplay::{ScreenplayUnit, Talk};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("speech dispatch needs a running tokio runtime")]
    NoRuntime,
    #[error("dispatcher is closed")]
    Closed,
    #[error("playback worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Synthesis throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Synthesis requests allowed in flight at once.
    pub max_concurrent_synthesis: usize,
    /// Minimum gap between the end of one synthesis and the start of the next.
    pub min_synthesis_interval_ms: u64,
}

impl DispatchConfig {
    pub fn min_synthesis_interval(&self) -> Duration {
        Duration::from_millis(self.min_synthesis_interval_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_synthesis: 1,
            min_synthesis_interval_ms: 1000,
        }
    }
}

pub type Hook = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks fired around a unit's playback.
#[derive(Default)]
pub struct PlaybackHooks {
    pub on_start: Option<Hook>,
    pub on_end: Option<Hook>,
}

impl PlaybackHooks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_start(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_start: Some(Box::new(f)),
            on_end: None,
        }
    }

    pub fn with_on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

/// Lifecycle of one queued unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Queued,
    Synthesizing,
    SynthesisFailed,
    Ready,
    Playing,
    Played,
    Skipped,
}

impl UnitState {
    pub fn is_final(&self) -> bool {
        matches!(self, UnitState::Played | UnitState::Skipped)
    }
}

/// Final state of each unit, in enqueue order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub states: Vec<UnitState>,
}

impl DispatchReport {
    pub fn played(&self) -> usize {
        self.count(UnitState::Played)
    }

    pub fn skipped(&self) -> usize {
        self.count(UnitState::Skipped)
    }

    fn count(&self, state: UnitState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }
}

/// A spawned task that is aborted when its handle is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

struct Pending {
    seq: u64,
    expression: Emotion,
    synthesis: AbortOnDrop<Result<Vec<u8>, SynthesisError>>,
    hooks: PlaybackHooks,
}

#[derive(Clone, Default)]
struct StateTable(Arc<StdMutex<Vec<UnitState>>>);

impl StateTable {
    fn lock(&self) -> MutexGuard<'_, Vec<UnitState>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self) -> u64 {
        let mut states = self.lock();
        states.push(UnitState::Queued);
        (states.len() - 1) as u64
    }

    fn set(&self, seq: u64, state: UnitState) {
        if let Some(slot) = self.lock().get_mut(seq as usize) {
            *slot = state;
        }
    }

    fn get(&self, seq: u64) -> Option<UnitState> {
        self.lock().get(seq as usize).copied()
    }

    fn snapshot(&self) -> Vec<UnitState> {
        self.lock().clone()
    }
}

/// Serializes playback of compiled units while overlapping synthesis.
///
/// Dropping the dispatcher aborts the worker and every synthesis task.
pub struct SpeechDispatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    runtime: Handle,
    queue: Option<mpsc::UnboundedSender<Pending>>,
    worker: Option<AbortOnDrop<()>>,
    permits: Arc<Semaphore>,
    last_synthesis: Arc<Mutex<Option<Instant>>>,
    interval: Duration,
    states: StateTable,
}

impl SpeechDispatcher {
    /// Spawn the playback worker on the current tokio runtime.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        avatar: Arc<dyn Avatar>,
        config: &DispatchConfig,
    ) -> Result<Self, DispatchError> {
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let states = StateTable::default();
        let worker = runtime.spawn(play_in_order(rx, avatar, states.clone()));

        Ok(Self {
            synthesizer,
            runtime,
            queue: Some(tx),
            worker: Some(AbortOnDrop(worker)),
            permits: Arc::new(Semaphore::new(config.max_concurrent_synthesis.max(1))),
            last_synthesis: Arc::new(Mutex::new(None)),
            interval: config.min_synthesis_interval(),
            states,
        })
    }

    /// Queue a unit for playback and start its synthesis. Returns the
    /// unit's sequence number.
    pub fn enqueue(&self, unit: ScreenplayUnit, hooks: PlaybackHooks) -> Result<u64, DispatchError> {
        let queue = self.queue.as_ref().ok_or(DispatchError::Closed)?;
        let seq = self.states.push();
        debug!("queued unit {seq}: {}", unit.talk.message);

        let synthesis = self.runtime.spawn(synthesize_paced(
            seq,
            unit.talk,
            Arc::clone(&self.synthesizer),
            Arc::clone(&self.permits),
            Arc::clone(&self.last_synthesis),
            self.interval,
            self.states.clone(),
        ));
        let pending = Pending {
            seq,
            expression: unit.expression,
            synthesis: AbortOnDrop(synthesis),
            hooks,
        };
        if queue.send(pending).is_err() {
            self.states.set(seq, UnitState::Skipped);
            return Err(DispatchError::Closed);
        }
        Ok(seq)
    }

    pub fn state(&self, seq: u64) -> Option<UnitState> {
        self.states.get(seq)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue and wait until every unit has been played or skipped.
    pub async fn finish(mut self) -> Result<DispatchReport, DispatchError> {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            worker.await?;
        }
        Ok(DispatchReport {
            states: self.states.snapshot(),
        })
    }

    /// Abort playback and all outstanding synthesis.
    pub fn cancel(self) {
        debug!("speech dispatch cancelled with {} unit(s) queued", self.len());
    }
}

async fn synthesize_paced(
    seq: u64,
    talk: Talk,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    permits: Arc<Semaphore>,
    last_synthesis: Arc<Mutex<Option<Instant>>>,
    interval: Duration,
    states: StateTable,
) -> Result<Vec<u8>, SynthesisError> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| SynthesisError::Request("synthesis queue closed".to_string()))?;

    if !interval.is_zero() {
        let last = last_synthesis.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + interval).await;
        }
    }

    states.set(seq, UnitState::Synthesizing);
    let result = match synthesizer.synthesize(&talk).await {
        Ok(payload) => payload.into_bytes(),
        Err(e) => Err(e),
    };
    *last_synthesis.lock().await = Some(Instant::now());

    states.set(
        seq,
        if result.is_ok() {
            UnitState::Ready
        } else {
            UnitState::SynthesisFailed
        },
    );
    result
}

async fn play_in_order(
    mut queue: mpsc::UnboundedReceiver<Pending>,
    avatar: Arc<dyn Avatar>,
    states: StateTable,
) {
    while let Some(pending) = queue.recv().await {
        let Pending {
            seq,
            expression,
            synthesis,
            hooks,
        } = pending;

        let audio = match synthesis.await {
            Ok(Ok(audio)) => audio,
            Ok(Err(e)) => {
                warn!("skipping unit {seq}: {e}");
                states.set(seq, UnitState::Skipped);
                continue;
            }
            Err(e) => {
                warn!("skipping unit {seq}: synthesis task ended early: {e}");
                states.set(seq, UnitState::Skipped);
                continue;
            }
        };

        if let Err(e) = avatar.apply_expression(expression).await {
            warn!("unit {seq}: {e}");
        }

        states.set(seq, UnitState::Playing);
        if let Some(on_start) = hooks.on_start {
            on_start();
        }
        match avatar.play_audio_with_lip_sync(&audio).await {
            Ok(()) => {
                states.set(seq, UnitState::Played);
                if let Some(on_end) = hooks.on_end {
                    on_end();
                }
            }
            Err(e) => {
                warn!("skipping unit {seq}: {e}");
                states.set(seq, UnitState::Skipped);
            }
        }
    }
    debug!("playback queue drained");
}
