//! Output sink: connection state machine, reconnect backoff, write loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use golive_common::config::ReconnectPolicy;
use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::{ConnectionState, EncodedPacket, OutputHealth, OutputTarget};
use tokio::sync::{mpsc, watch};

use crate::transport::{FailurePolicy, PacketTransport, TransportRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The sink is reconnecting; the packet was discarded.
    Dropped,
}

/// Read-only view of a sink, usable after the sink moves into its task.
#[derive(Debug, Clone)]
pub struct SinkMonitor {
    state: watch::Receiver<ConnectionState>,
    health: Arc<Mutex<OutputHealth>>,
}

impl SinkMonitor {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn health(&self) -> OutputHealth {
        let mut health = self.health.lock().unwrap_or_else(|p| p.into_inner()).clone();
        health.state = self.state();
        health
    }
}

pub struct OutputSink {
    description: String,
    transport: Box<dyn PacketTransport>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    health: Arc<Mutex<OutputHealth>>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("target", &self.description)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl OutputSink {
    /// Build the transport for `target` and connect it.
    pub async fn open(
        target: &OutputTarget,
        registry: &TransportRegistry,
        policy: ReconnectPolicy,
    ) -> GoliveResult<Self> {
        let transport = registry.build(target)?;
        Self::open_with(target, transport, policy).await
    }

    /// Connect an already-built transport. Any failure, including the
    /// connect timeout, is `OutputUnreachable`.
    pub async fn open_with(
        target: &OutputTarget,
        mut transport: Box<dyn PacketTransport>,
        policy: ReconnectPolicy,
    ) -> GoliveResult<Self> {
        let description = target.describe();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        tracing::info!(output = %description, "Opening output");

        match tokio::time::timeout(policy.connect_timeout(), transport.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = transport.shutdown().await;
                return Err(GoliveError::output_unreachable(&description, e.to_string()));
            }
            Err(_) => {
                let _ = transport.shutdown().await;
                return Err(GoliveError::output_unreachable(
                    &description,
                    format!("no connection within {} ms", policy.connect_timeout_ms),
                ));
            }
        }

        state.send_replace(ConnectionState::Connected);
        let health = OutputHealth {
            target: description.clone(),
            state: ConnectionState::Connected,
            ..Default::default()
        };
        Ok(Self {
            description,
            transport,
            policy,
            state,
            health: Arc::new(Mutex::new(health)),
        })
    }

    pub fn monitor(&self) -> SinkMonitor {
        SinkMonitor {
            state: self.state.subscribe(),
            health: Arc::clone(&self.health),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(output = %self.description, from = ?previous, to = ?next, "Output state changed");
        }
    }

    fn with_health(&self, f: impl FnOnce(&mut OutputHealth)) {
        let mut health = self.health.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut health);
    }

    fn count_dropped(&self, packets: u64) {
        count_dropped(&self.health, packets);
    }

    /// Write one packet. While reconnecting the packet is dropped and counted.
    pub async fn write(&mut self, packet: &EncodedPacket) -> GoliveResult<WriteOutcome> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Reconnecting => {
                self.count_dropped(1);
                return Ok(WriteOutcome::Dropped);
            }
            ConnectionState::Connecting | ConnectionState::Closed => {
                return Err(GoliveError::invalid_state(format!(
                    "output {} is not connected",
                    self.description
                )));
            }
        }

        self.transport.send(packet).await?;
        self.with_health(|h| {
            h.packets_written += 1;
            h.bytes_written += packet.len() as u64;
        });
        tracing::trace!(seq = packet.seq, pts_ns = packet.pts_ns, "Packet written");
        Ok(WriteOutcome::Written)
    }

    /// Recover a dropped connection with exponential backoff.
    ///
    /// Packets arriving on `packets` while disconnected are discarded,
    /// including anything queued during a successful connect attempt.
    /// Returns `Ok(false)` when the packet stream ends or `stop` is raised
    /// before the connection comes back.
    pub async fn reconnect(
        &mut self,
        packets: &mut mpsc::Receiver<EncodedPacket>,
        stop: &AtomicBool,
        cause: String,
    ) -> GoliveResult<bool> {
        self.set_state(ConnectionState::Reconnecting);
        let _ = self.transport.shutdown().await;

        let mut last_error = cause;
        for attempt in 0..self.policy.max_attempts {
            let delay = self.policy.delay_for_attempt(attempt);
            tracing::warn!(
                output = %self.description,
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Output disconnected; retrying"
            );

            if !wait_dropping(delay, packets, stop, &self.health).await {
                self.set_state(ConnectionState::Closed);
                return Ok(false);
            }

            match tokio::time::timeout(self.policy.connect_timeout(), self.transport.connect()).await {
                Ok(Ok(())) => {
                    let mut stale = 0u64;
                    while packets.try_recv().is_ok() {
                        stale += 1;
                    }
                    self.count_dropped(stale);
                    self.with_health(|h| h.reconnects += 1);
                    self.set_state(ConnectionState::Connected);
                    return Ok(true);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    let _ = self.transport.shutdown().await;
                    last_error = format!("no connection within {} ms", self.policy.connect_timeout_ms);
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        Err(GoliveError::OutputDropped {
            attempts: self.policy.max_attempts,
            message: last_error,
        })
    }

    /// Flush and release the transport.
    pub async fn close(&mut self) -> GoliveResult<()> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        let result = self.transport.shutdown().await;
        self.set_state(ConnectionState::Closed);
        result
    }

    /// Drain `packets` into the transport until the stream ends.
    ///
    /// Reconnecting transports recover in place; a fatal transport error or
    /// an exhausted retry budget ends the loop with that error and nothing
    /// further is written.
    pub async fn run(
        mut self,
        mut packets: mpsc::Receiver<EncodedPacket>,
        stop: Arc<AtomicBool>,
    ) -> GoliveResult<OutputHealth> {
        while let Some(packet) = packets.recv().await {
            let err = match self.write(&packet).await {
                Ok(_) => continue,
                Err(e) => e,
            };

            match self.transport.failure_policy() {
                FailurePolicy::Fatal => {
                    tracing::error!(output = %self.description, seq = packet.seq, error = %err, "Output write failed");
                    self.set_state(ConnectionState::Closed);
                    let _ = self.transport.shutdown().await;
                    packets.close();
                    return Err(err);
                }
                FailurePolicy::Reconnect => {
                    self.count_dropped(1);
                    if !self.reconnect(&mut packets, &stop, err.to_string()).await? {
                        break;
                    }
                }
            }
        }

        self.close().await?;
        let health = self.monitor().health();
        tracing::info!(
            output = %self.description,
            packets = health.packets_written,
            bytes = health.bytes_written,
            dropped = health.packets_dropped,
            reconnects = health.reconnects,
            "Output closed"
        );
        Ok(health)
    }
}

fn count_dropped(health: &Mutex<OutputHealth>, packets: u64) {
    if packets > 0 {
        health.lock().unwrap_or_else(|p| p.into_inner()).packets_dropped += packets;
    }
}

/// Sleep for `delay`, discarding packets meanwhile. `false` means the caller
/// should give up.
async fn wait_dropping(
    delay: Duration,
    packets: &mut mpsc::Receiver<EncodedPacket>,
    stop: &AtomicBool,
    health: &Mutex<OutputHealth>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        tokio::select! {
            _ = &mut sleep => return true,
            packet = packets.recv() => match packet {
                Some(_) => count_dropped(health, 1),
                None => return false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport whose connects and sends fail on demand.
    #[derive(Clone, Default)]
    struct Scripted {
        connects: Arc<AtomicUsize>,
        fail_connects_from: Arc<AtomicUsize>,
        fail_sends: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl PacketTransport for Scripted {
        fn failure_policy(&self) -> FailurePolicy {
            FailurePolicy::Reconnect
        }

        async fn connect(&mut self) -> GoliveResult<()> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            let from = self.fail_connects_from.load(Ordering::SeqCst);
            if from != 0 && n >= from {
                return Err(GoliveError::transcoder("connection refused"));
            }
            Ok(())
        }

        async fn send(&mut self, packet: &EncodedPacket) -> GoliveResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(GoliveError::transcoder("broken pipe"));
            }
            self.sent.lock().unwrap().push(packet.seq);
            Ok(())
        }

        async fn shutdown(&mut self) -> GoliveResult<()> {
            Ok(())
        }
    }

    fn target() -> OutputTarget {
        OutputTarget::network("rtmp://ingest.example.com/live", Some("secret".into())).unwrap()
    }

    #[tokio::test]
    async fn test_write_counts_bytes() {
        let transport = Scripted::default();
        let mut sink = OutputSink::open_with(&target(), Box::new(transport.clone()), ReconnectPolicy::default())
            .await
            .unwrap();
        assert_eq!(sink.state(), ConnectionState::Connected);
        sink.write(&EncodedPacket::new(0, 0, vec![0; 188])).await.unwrap();

        let health = sink.monitor().health();
        assert_eq!(health.packets_written, 1);
        assert_eq!(health.bytes_written, 188);
        assert!(!health.target.contains("secret"));
    }

    #[tokio::test]
    async fn test_writes_while_reconnecting_are_dropped() {
        let transport = Scripted::default();
        let mut sink = OutputSink::open_with(&target(), Box::new(transport), ReconnectPolicy::default())
            .await
            .unwrap();
        sink.set_state(ConnectionState::Reconnecting);
        let outcome = sink.write(&EncodedPacket::new(1, 0, vec![1])).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Dropped);
        assert_eq!(sink.monitor().health().packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_writes() {
        let mut sink = OutputSink::open_with(&target(), Box::new(Scripted::default()), ReconnectPolicy::default())
            .await
            .unwrap();
        sink.close().await.unwrap();
        assert!(sink.write(&EncodedPacket::new(0, 0, vec![1])).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_stops_when_packets_end() {
        let transport = Scripted::default();
        transport.fail_connects_from.store(1, Ordering::SeqCst);
        let mut sink = OutputSink::open_with(&target(), Box::new(transport), ReconnectPolicy::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        drop(tx);
        let stop = AtomicBool::new(false);
        let resumed = sink.reconnect(&mut rx, &stop, "dropped".into()).await.unwrap();
        assert!(!resumed);
        assert_eq!(sink.state(), ConnectionState::Closed);
    }
}
