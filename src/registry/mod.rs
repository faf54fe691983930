// Stream registry & fan-out (C6) — the heart of the fabric
//
// Generalizes the source's `RtmpServerStatus.channels: HashMap<String,
// Arc<Mutex<RtmpChannelStatus>>>` (see `set_publisher`/`remove_publisher`)
// from RTMP-only publishers/players to any reader/writer that speaks
// `Packet`, so the same registry backs RTMP play, HTTP-FLV, and HLS
// ingestion. The per-channel message-passing (`Sender<RtmpSessionMessage>`)
// becomes a plain `mpsc::Receiver<Packet>` handed in by the caller, since
// this crate's fan-out doesn't need the teacher's richer session commands
// (pause, GOP cache, receive-audio/video toggles) — just packet delivery.

mod drop_policy;
mod stream;

pub use drop_policy::drop_packet;
pub use stream::{PublisherState, Stream, StreamSnapshot, SubscriberReceiver, SubscriberSnapshot};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::log::Logger;
use crate::log_debug;
use crate::packet::{Info, Packet};

struct RegistryInner {
    streams: Mutex<HashMap<String, Stream>>,
    config: RegistryConfig,
    grace_period: Duration,
    logger: Logger,
}

/// Handle to the shared stream map; cheap to clone, shares state
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

impl StreamRegistry {
    pub fn new(config: RegistryConfig, grace_period: Duration, logger: Logger) -> StreamRegistry {
        StreamRegistry {
            inner: Arc::new(RegistryInner {
                streams: Mutex::new(HashMap::new()),
                config,
                grace_period,
                logger,
            }),
        }
    }

    /// Attaches a publisher for `info.key`, displacing any existing one,
    /// and spawns the fan-out task that drains `incoming` for the lifetime
    /// of the publisher
    pub async fn handle_reader(&self, info: Info, incoming: mpsc::Receiver<Packet>) {
        {
            let mut streams = self.inner.streams.lock().await;
            let stream = streams
                .entry(info.key.clone())
                .or_insert_with(|| Stream::new(info.key.clone()));

            if stream.publisher.is_some() {
                let logger = &self.inner.logger;
                log_debug!(logger, format!("displacing existing publisher for '{}'", info.key));
            }

            stream.publisher = Some(PublisherState { info: info.clone() });
            stream.last_activity = Instant::now();
        }

        let registry = self.clone();
        tokio::spawn(async move {
            registry.run_publisher_loop(info, incoming).await;
        });
    }

    async fn run_publisher_loop(&self, info: Info, mut incoming: mpsc::Receiver<Packet>) {
        while let Some(packet) = incoming.recv().await {
            if !self.is_current_publisher(&info.key, info.uid).await {
                break;
            }
            self.fan_out(&info.key, packet).await;
        }

        self.remove_publisher(&info.key, info.uid).await;
    }

    async fn is_current_publisher(&self, key: &str, uid: u64) -> bool {
        let streams = self.inner.streams.lock().await;
        streams
            .get(key)
            .and_then(|s| s.publisher.as_ref())
            .map(|p| p.info.uid == uid)
            .unwrap_or(false)
    }

    async fn fan_out(&self, key: &str, packet: Packet) {
        let mut streams = self.inner.streams.lock().await;
        if let Some(stream) = streams.get_mut(key) {
            stream.fan_out(packet).await;
        }
    }

    /// Ends publication for `uid` on `key` if it is still the current
    /// publisher: closes every subscriber and starts the grace timer that
    /// deletes the stream entry if no new publisher arrives in time
    async fn remove_publisher(&self, key: &str, uid: u64) {
        {
            let mut streams = self.inner.streams.lock().await;
            if let Some(stream) = streams.get_mut(key) {
                if stream.publisher.as_ref().map(|p| p.info.uid) == Some(uid) {
                    stream.publisher = None;
                    stream.close_all_subscribers();
                    stream.last_activity = Instant::now();
                }
            }
        }

        let registry = self.clone();
        let key = key.to_string();
        let grace_period = self.inner.grace_period;

        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            registry.evict_if_still_unpublished(&key).await;
        });
    }

    async fn evict_if_still_unpublished(&self, key: &str) {
        let mut streams = self.inner.streams.lock().await;
        if let Some(stream) = streams.get(key) {
            if stream.publisher.is_none() {
                streams.remove(key);
            }
        }
    }

    /// Attaches a subscriber for `info.key`, creating a pending (publisher-less)
    /// stream entry if none exists yet
    pub async fn handle_writer(&self, info: Info) -> SubscriberReceiver {
        let mut streams = self.inner.streams.lock().await;
        let stream = streams
            .entry(info.key.clone())
            .or_insert_with(|| Stream::new(info.key.clone()));

        stream.attach_subscriber(info, self.inner.config.subscriber_queue_capacity)
    }

    /// Snapshot of every stream for the operational HTTP endpoint
    pub async fn get_streams(&self) -> Vec<StreamSnapshot> {
        let streams = self.inner.streams.lock().await;
        streams.values().map(|s| s.snapshot()).collect()
    }

    /// Removes any stream with no publisher and no subscribers whose last
    /// activity is older than `idle_after`; called by the periodic
    /// staleness sweep (C8)
    pub async fn sweep_idle(&self, idle_after: Duration) {
        let mut streams = self.inner.streams.lock().await;
        let now = Instant::now();
        streams.retain(|_, stream| {
            !(stream.is_empty() && now.duration_since(stream.last_activity) > idle_after)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogConfig, Logger};
    use crate::packet::InfoKind;
    use std::sync::Arc as StdArc;

    fn test_logger() -> Logger {
        Logger::new(LogConfig {
            prefix: "TEST".to_string(),
            error_enabled: false,
            warning_enabled: false,
            info_enabled: false,
            debug_enabled: false,
            trace_enabled: false,
        })
    }

    fn test_info(uid: u64, kind: InfoKind, key: &str) -> Info {
        Info::new(uid, kind, format!("rtmp://host/{}", key), key.to_string())
    }

    fn blank_packet(ts: u32) -> Packet {
        let mut p = Packet::new_metadata(0, 1, StdArc::new(vec![]));
        p.timestamp_ms = ts;
        p
    }

    #[tokio::test]
    async fn test_publish_then_subscribe_delivers_packets() {
        let registry = StreamRegistry::new(
            RegistryConfig::default(),
            Duration::from_secs(20),
            test_logger(),
        );

        let (tx, rx) = mpsc::channel(16);
        registry
            .handle_reader(test_info(1, InfoKind::Publisher, "live/test"), rx)
            .await;

        let subscriber = registry
            .handle_writer(test_info(2, InfoKind::Player, "live/test"))
            .await;

        tx.send(blank_packet(42)).await.unwrap();

        let received = subscriber.recv().await.unwrap();
        assert_eq!(received.timestamp_ms, 42);
    }

    #[tokio::test]
    async fn test_subscriber_before_publisher_waits_on_pending_stream() {
        let registry = StreamRegistry::new(
            RegistryConfig::default(),
            Duration::from_secs(20),
            test_logger(),
        );

        let subscriber = registry
            .handle_writer(test_info(2, InfoKind::Player, "live/test"))
            .await;

        let (tx, rx) = mpsc::channel(16);
        registry
            .handle_reader(test_info(1, InfoKind::Publisher, "live/test"), rx)
            .await;

        tx.send(blank_packet(7)).await.unwrap();

        let received = subscriber.recv().await.unwrap();
        assert_eq!(received.timestamp_ms, 7);
    }

    #[tokio::test]
    async fn test_publisher_disconnect_ends_subscriber_stream() {
        let registry = StreamRegistry::new(
            RegistryConfig::default(),
            Duration::from_secs(20),
            test_logger(),
        );

        let (tx, rx) = mpsc::channel(16);
        registry
            .handle_reader(test_info(1, InfoKind::Publisher, "live/test"), rx)
            .await;

        let subscriber = registry
            .handle_writer(test_info(2, InfoKind::Player, "live/test"))
            .await;

        drop(tx);

        assert!(subscriber.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_get_streams_reports_publisher_and_subscribers() {
        let registry = StreamRegistry::new(
            RegistryConfig::default(),
            Duration::from_secs(20),
            test_logger(),
        );

        let (_tx, rx) = mpsc::channel(16);
        registry
            .handle_reader(test_info(1, InfoKind::Publisher, "live/test"), rx)
            .await;

        let _subscriber = registry
            .handle_writer(test_info(2, InfoKind::Player, "live/test"))
            .await;

        let snapshots = registry.get_streams().await;
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].publisher.is_some());
        assert_eq!(snapshots[0].subscribers.len(), 1);
    }
}
