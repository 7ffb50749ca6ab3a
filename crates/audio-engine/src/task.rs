//! The mixer task: the only writer of the master clock.
//!
//! Ticks at chunk cadence. Each tick it pulls one chunk's worth of samples
//! from every input (silence where an input has nothing), mixes them, and
//! pushes the result to the output queue.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use golive_common::clock::samples_to_ns;
use golive_common::queue::{BoundedQueue, PushOutcome};
use golive_media_model::{AudioChunk, MixerStats, SourceId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::convert::conform;
use crate::mixer::AudioMixer;

/// Chunks of audio an input may buffer before its oldest samples are dropped.
const MAX_BUFFERED_CHUNKS: usize = 8;

pub enum MixerCommand {
    AddInput {
        id: SourceId,
        queue: BoundedQueue<AudioChunk>,
    },
    RemoveInput {
        id: SourceId,
    },
}

struct MixerInput {
    queue: BoundedQueue<AudioChunk>,
    /// Converted samples not yet mixed.
    pending: VecDeque<f32>,
    underruns: u64,
}

impl MixerInput {
    fn new(queue: BoundedQueue<AudioChunk>) -> Self {
        Self {
            queue,
            pending: VecDeque::new(),
            underruns: 0,
        }
    }

    /// Exactly `frames` frames, padded with silence on underrun.
    fn take_chunk(&mut self, frames: usize, channels: u16, rate: u32) -> AudioChunk {
        while let Some(chunk) = self.queue.try_pop() {
            let samples = conform(
                chunk.samples(),
                chunk.channels(),
                chunk.sample_rate(),
                channels,
                rate,
            );
            self.pending.extend(samples);
        }

        let want = frames * channels as usize;
        let limit = want * MAX_BUFFERED_CHUNKS;
        if self.pending.len() > limit {
            let excess = self.pending.len() - limit;
            self.pending.drain(..excess);
        }

        let mut samples: Vec<f32> = self.pending.drain(..want.min(self.pending.len())).collect();
        if samples.len() < want {
            self.underruns += 1;
            samples.resize(want, 0.0);
        }
        AudioChunk::new(0, rate, channels, samples)
            .unwrap_or_else(|_| AudioChunk::silence(0, rate, channels, frames))
    }
}

/// Handle to a running mixer task.
pub struct MixerHandle {
    commands: mpsc::UnboundedSender<MixerCommand>,
    stats: Arc<Mutex<MixerStats>>,
    task: JoinHandle<()>,
}

impl MixerHandle {
    pub fn add_input(&self, id: SourceId, queue: BoundedQueue<AudioChunk>) {
        if self
            .commands
            .send(MixerCommand::AddInput { id, queue })
            .is_err()
        {
            tracing::debug!("Mixer task gone; input not added");
        }
    }

    pub fn remove_input(&self, id: SourceId) {
        let _ = self.commands.send(MixerCommand::RemoveInput { id });
    }

    pub fn stats(&self) -> MixerStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Wait for the task to exit after its stop flag is set, aborting after
    /// `grace`.
    pub async fn join(self, grace: Duration) {
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!("Mixer task did not exit in time; aborting");
            task.abort();
        }
    }
}

/// Spawn the mixer task.
///
/// Mixed chunks go to `output`, which is reject-new: a full output queue
/// drops the newest mix rather than blocking the clock.
pub fn spawn_mixer(
    mut mixer: AudioMixer,
    chunk_frames: usize,
    output: BoundedQueue<AudioChunk>,
    stop: Arc<AtomicBool>,
) -> MixerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stats = Arc::new(Mutex::new(MixerStats::default()));
    let shared_stats = stats.clone();
    let chunk_frames = chunk_frames.max(1);

    let task = tokio::spawn(async move {
        let rate = mixer.sample_rate();
        let channels = mixer.channels();
        let period = Duration::from_nanos(samples_to_ns(chunk_frames as u64, rate).max(1));
        let mut ticker = tokio::time::interval(period);
        let mut inputs: BTreeMap<SourceId, MixerInput> = BTreeMap::new();
        let mut rejected = 0u64;

        tracing::info!(
            sample_rate = rate,
            channels,
            chunk_frames,
            "Mixer task started"
        );

        while !stop.load(Ordering::SeqCst) {
            ticker.tick().await;

            while let Ok(cmd) = rx.try_recv() {
                match cmd {
                    MixerCommand::AddInput { id, queue } => {
                        tracing::debug!(source = %id, "Mixer input added");
                        inputs.insert(id, MixerInput::new(queue));
                    }
                    MixerCommand::RemoveInput { id } => {
                        if let Some(input) = inputs.remove(&id) {
                            tracing::debug!(source = %id, underruns = input.underruns, "Mixer input removed");
                        }
                    }
                }
            }

            let chunks: Vec<AudioChunk> = inputs
                .values_mut()
                .map(|input| input.take_chunk(chunk_frames, channels, rate))
                .collect();
            let mixed = if chunks.is_empty() {
                // Keep the clock moving at chunk cadence with no inputs.
                mixer.mix(&[AudioChunk::silence(0, rate, channels, chunk_frames)])
            } else {
                mixer.mix(&chunks)
            };

            if output.push(mixed) == PushOutcome::Rejected {
                rejected += 1;
                if rejected.is_power_of_two() {
                    tracing::warn!(rejected, "Mixed audio rejected by a full output queue");
                }
            }

            *shared_stats.lock().unwrap_or_else(|p| p.into_inner()) = mixer.stats();
        }

        tracing::info!(clock_ns = mixer.clock().now_ns(), "Mixer task stopped");
    });

    MixerHandle {
        commands: tx,
        stats,
        task,
    }
}
