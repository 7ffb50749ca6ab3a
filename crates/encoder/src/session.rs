//! A running encode session.
//!
//! Submissions go into bounded reject-new queues. One task per input stream
//! writes queued media into the backend; a retrieval task reads the muxed
//! output and forwards it as [`EncodedPacket`]s in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use golive_common::config::QueueConfig;
use golive_common::error::{GoliveError, GoliveResult};
use golive_common::queue::{BoundedQueue, OverflowPolicy, PushOutcome};
use golive_media_model::{AudioChunk, BackendFailure, BackendKind, EncodedPacket, EncoderHealth, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{EncoderControl, EncoderStreams};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The queue is at capacity; the item was not queued.
    Backpressured,
    Closed,
}

impl From<PushOutcome> for SubmitOutcome {
    fn from(outcome: PushOutcome) -> Self {
        match outcome {
            PushOutcome::Enqueued | PushOutcome::DroppedOldest => Self::Accepted,
            PushOutcome::Rejected => Self::Backpressured,
            PushOutcome::Closed => Self::Closed,
        }
    }
}

/// First failure observed by any session task.
#[derive(Debug, Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<String>>>);

impl FailureSlot {
    fn set(&self, message: String) {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            tracing::warn!(error = %message, "Encoder session failed");
            *slot = Some(message);
        }
    }

    fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Cloneable submission side of a session, for the render task.
#[derive(Debug, Clone)]
pub struct EncoderInput {
    video_queue: BoundedQueue<Frame>,
}

impl EncoderInput {
    /// Wrap an existing video queue, e.g. to drive a render loop without a
    /// backend behind it.
    pub fn new(video_queue: BoundedQueue<Frame>) -> Self {
        Self { video_queue }
    }

    pub fn submit_video(&self, frame: Frame) -> SubmitOutcome {
        self.video_queue.push(frame).into()
    }

    /// True while the video submission queue is at capacity.
    pub fn is_backpressured(&self) -> bool {
        self.video_queue.is_full()
    }

    pub fn queue_depth(&self) -> usize {
        self.video_queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.video_queue.capacity()
    }
}

pub struct EncoderSession {
    backend: BackendKind,
    failures: Vec<BackendFailure>,
    video_queue: BoundedQueue<Frame>,
    audio_queue: BoundedQueue<AudioChunk>,
    packets: Option<mpsc::Receiver<EncodedPacket>>,
    packets_out: Arc<AtomicU64>,
    failure: FailureSlot,
    control: Box<dyn EncoderControl>,
    video_task: JoinHandle<()>,
    audio_task: JoinHandle<()>,
    retrieval_task: JoinHandle<()>,
}

impl std::fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("backend", &self.backend)
            .field("failures", &self.failures)
            .field("video_queue", &self.video_queue)
            .finish()
    }
}

impl EncoderSession {
    /// Wire a started backend into queues and tasks.
    pub fn start(
        backend: BackendKind,
        failures: Vec<BackendFailure>,
        streams: EncoderStreams,
        queues: &QueueConfig,
    ) -> Self {
        let EncoderStreams {
            mut video,
            mut audio,
            mut output,
            control,
        } = streams;

        let video_queue: BoundedQueue<Frame> = BoundedQueue::new(queues.encoder_video_frames, OverflowPolicy::RejectNew)
            .with_name(format!("encoder-video-{backend}"));
        let audio_queue: BoundedQueue<AudioChunk> = BoundedQueue::new(queues.encoder_audio_chunks, OverflowPolicy::RejectNew)
            .with_name(format!("encoder-audio-{backend}"));
        let (packet_tx, packet_rx) = mpsc::channel(queues.output_packets.max(1));
        let failure = FailureSlot::default();
        let last_video_pts = Arc::new(AtomicU64::new(0));
        let packets_out = Arc::new(AtomicU64::new(0));

        let video_task = {
            let queue = video_queue.clone();
            let failure = failure.clone();
            let last_pts = last_video_pts.clone();
            tokio::spawn(async move {
                while let Some(frame) = queue.pop().await {
                    let frame = frame.into_rgba();
                    if let Err(e) = video.write_all(frame.data()).await {
                        failure.set(format!("Video submission failed: {e}"));
                        queue.close();
                        break;
                    }
                    last_pts.store(frame.pts_ns(), Ordering::Release);
                }
                let _ = video.shutdown().await;
                tracing::debug!("Encoder video submission task finished");
            })
        };

        let audio_task = {
            let queue = audio_queue.clone();
            let failure = failure.clone();
            tokio::spawn(async move {
                while let Some(chunk) = queue.pop().await {
                    if let Err(e) = audio.write_all(&chunk.to_le_bytes()).await {
                        failure.set(format!("Audio submission failed: {e}"));
                        queue.close();
                        break;
                    }
                }
                let _ = audio.shutdown().await;
                tracing::debug!("Encoder audio submission task finished");
            })
        };

        let retrieval_task = {
            let failure = failure.clone();
            let last_pts = last_video_pts.clone();
            let packets_out = packets_out.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; READ_CHUNK_BYTES];
                let mut seq = 0u64;
                loop {
                    match output.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            let packet =
                                EncodedPacket::new(seq, last_pts.load(Ordering::Acquire), buf[..n].to_vec());
                            seq += 1;
                            if packet_tx.send(packet).await.is_err() {
                                tracing::debug!("Packet receiver dropped; stopping retrieval");
                                break;
                            }
                            packets_out.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failure.set(format!("Reading encoder output failed: {e}"));
                            break;
                        }
                    }
                }
                tracing::debug!(packets = seq, "Encoder retrieval task finished");
            })
        };

        Self {
            backend,
            failures,
            video_queue,
            audio_queue,
            packets: Some(packet_rx),
            packets_out,
            failure,
            control,
            video_task,
            audio_task,
            retrieval_task,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Backends that failed before this one opened.
    pub fn failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    pub fn input(&self) -> EncoderInput {
        EncoderInput {
            video_queue: self.video_queue.clone(),
        }
    }

    pub fn submit_video(&self, frame: Frame) -> SubmitOutcome {
        self.video_queue.push(frame).into()
    }

    pub fn submit_audio(&self, chunk: AudioChunk) -> SubmitOutcome {
        self.audio_queue.push(chunk).into()
    }

    /// Queue the audio mixer pushes into directly.
    pub fn audio_queue(&self) -> BoundedQueue<AudioChunk> {
        self.audio_queue.clone()
    }

    /// True while the video submission queue is at capacity.
    pub fn is_backpressured(&self) -> bool {
        self.video_queue.is_full()
    }

    pub fn queue_depth(&self) -> usize {
        self.video_queue.len()
    }

    /// Hand the packet stream to its consumer. Only the first call gets it.
    pub fn take_packets(&mut self) -> Option<mpsc::Receiver<EncodedPacket>> {
        self.packets.take()
    }

    /// Next packet, for callers that did not take the stream.
    pub async fn next_packet(&mut self) -> Option<EncodedPacket> {
        match self.packets.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// The session's first failure, if any.
    pub fn failure(&self) -> Option<GoliveError> {
        self.failure.get().map(|message| {
            let diagnostics = self.control.diagnostics();
            if diagnostics.trim().is_empty() {
                GoliveError::encoder(message)
            } else {
                GoliveError::encoder(format!("{message}: {}", diagnostics.trim()))
            }
        })
    }

    pub fn health(&self) -> EncoderHealth {
        EncoderHealth {
            backend: Some(self.backend),
            failures: self.failures.clone(),
            queue_depth: self.video_queue.len(),
            queue_capacity: self.video_queue.capacity(),
            packets: self.packets_out.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting input, encode what is queued, and wait for the backend
    /// to flush its output. Everything is bounded by `grace`.
    pub async fn drain_and_close(mut self, grace: Duration) -> GoliveResult<()> {
        self.video_queue.close();
        self.audio_queue.close();

        let drained = tokio::time::timeout(grace, async {
            let _ = (&mut self.video_task).await;
            let _ = (&mut self.audio_task).await;
        })
        .await;
        if drained.is_err() {
            tracing::warn!(backend = %self.backend, "Encoder queues did not drain in time");
            self.video_task.abort();
            self.audio_task.abort();
        }

        let finished = self.control.finish(grace).await;

        if tokio::time::timeout(grace, &mut self.retrieval_task)
            .await
            .is_err()
        {
            self.retrieval_task.abort();
        }

        if let Some(err) = self.failure() {
            return Err(err);
        }
        finished?;
        tracing::info!(backend = %self.backend, "Encoder session closed");
        Ok(())
    }

    /// Tear down immediately, discarding queued media.
    pub async fn abort(mut self) {
        self.video_queue.close();
        self.audio_queue.close();
        self.video_task.abort();
        self.audio_task.abort();
        self.control.abort().await;
        self.retrieval_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::duplex;

    struct NoopControl;

    #[async_trait]
    impl EncoderControl for NoopControl {
        async fn finish(&mut self, _grace: Duration) -> GoliveResult<()> {
            Ok(())
        }
        async fn abort(&mut self) {}
        fn diagnostics(&self) -> String {
            String::new()
        }
    }

    fn queues(video: usize) -> QueueConfig {
        QueueConfig {
            encoder_video_frames: video,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_video_queue_applies_backpressure() {
        // The backend never reads its video input, so writes stall.
        let (video, _video_peer) = duplex(1);
        let (audio, _audio_peer) = duplex(1024);
        let (_out_peer, output) = duplex(1024);
        let streams = EncoderStreams {
            video: Box::new(video),
            audio: Box::new(audio),
            output: Box::new(output),
            control: Box::new(NoopControl),
        };
        let session = EncoderSession::start(BackendKind::Software, Vec::new(), streams, &queues(2));

        let mut outcomes = Vec::new();
        for i in 0..6 {
            outcomes.push(session.submit_video(Frame::solid(i, 8, 8, [0, 0, 0, 255])));
            tokio::task::yield_now().await;
        }
        assert!(outcomes.contains(&SubmitOutcome::Backpressured));
        assert!(session.queue_depth() <= 2);
        session.abort().await;
    }

    #[tokio::test]
    async fn test_packets_are_ordered_and_tagged() {
        let (video, mut video_peer) = duplex(64 * 1024);
        let (audio, _audio_peer) = duplex(1024);
        let (mut out_peer, output) = duplex(1024);
        let streams = EncoderStreams {
            video: Box::new(video),
            audio: Box::new(audio),
            output: Box::new(output),
            control: Box::new(NoopControl),
        };
        let mut session = EncoderSession::start(BackendKind::Software, Vec::new(), streams, &queues(4));

        session.submit_video(Frame::solid(40_000_000, 2, 2, [1, 2, 3, 4]));
        let mut frame_bytes = [0u8; 16];
        video_peer.read_exact(&mut frame_bytes).await.unwrap();
        assert_eq!(&frame_bytes[..4], &[1, 2, 3, 4]);

        out_peer.write_all(b"first").await.unwrap();
        let first = session.next_packet().await.unwrap();
        out_peer.write_all(b"second").await.unwrap();
        drop(out_peer);
        let second = session.next_packet().await.unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.data, b"first");
        assert_eq!(first.pts_ns, 40_000_000);
        assert!(session.next_packet().await.is_none());
        assert_eq!(session.health().packets, 2);
        session.drain_and_close(Duration::from_secs(1)).await.unwrap();
    }
}
