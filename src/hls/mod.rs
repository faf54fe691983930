// HLS segmenter (C7)
//
// Attaches to the stream registry the same way any other subscriber does
// (see `registry::StreamRegistry::handle_writer`) and feeds the resulting
// packet stream into a per-key `HlsSegmenter`. Lazily starts ingesting a
// key on its first `playlist`/`segment` lookup rather than eagerly on
// every publish, since nothing downstream of this crate binds an HTTP
// listener to drive that eagerly (see DESIGN.md).

mod aac;
mod avc;
mod playlist;
mod segmenter;
mod ts;

pub use segmenter::{HlsSegmenter, Segment};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::HlsConfig;
use crate::log::Logger;
use crate::log_debug;
use crate::packet::{Info, InfoKind};
use crate::registry::StreamRegistry;

struct HlsRegistryInner {
    config: HlsConfig,
    logger: Logger,
    stream_registry: StreamRegistry,
    segmenters: Mutex<HashMap<String, Arc<Mutex<HlsSegmenter>>>>,
    next_uid: Mutex<u64>,
}

/// Handle to every key's HLS segmenting state; cheap to clone, shares state
#[derive(Clone)]
pub struct HlsRegistry {
    inner: Arc<HlsRegistryInner>,
}

impl HlsRegistry {
    pub fn new(config: HlsConfig, stream_registry: StreamRegistry, logger: Logger) -> HlsRegistry {
        HlsRegistry {
            inner: Arc::new(HlsRegistryInner {
                config,
                logger,
                stream_registry,
                segmenters: Mutex::new(HashMap::new()),
                next_uid: Mutex::new(1),
            }),
        }
    }

    async fn ensure_ingesting(&self, key: &str) -> Arc<Mutex<HlsSegmenter>> {
        let mut segmenters = self.inner.segmenters.lock().await;
        if let Some(existing) = segmenters.get(key) {
            return existing.clone();
        }

        let segmenter = Arc::new(Mutex::new(HlsSegmenter::new(self.inner.config)));
        segmenters.insert(key.to_string(), segmenter.clone());
        drop(segmenters);

        let uid = {
            let mut next_uid = self.inner.next_uid.lock().await;
            let id = *next_uid;
            *next_uid += 1;
            id
        };

        let info = Info::new(uid, InfoKind::Player, format!("hls://{}", key), key.to_string());
        let subscriber = self.inner.stream_registry.handle_writer(info).await;

        let task_segmenter = segmenter.clone();
        let logger = self.inner.logger.make_child_logger(&format!("[HLS {}] ", key));

        tokio::spawn(async move {
            while let Some(packet) = subscriber.recv().await {
                let mut seg = task_segmenter.lock().await;
                if let Err(err) = seg.push(&packet) {
                    log_debug!(logger, format!("dropping packet: {}", err));
                }
            }
            log_debug!(logger, "ingest ended");
        });

        segmenter
    }

    /// Current playlist bytes for `key`, or `None` if no segment window
    /// exists yet (including when the key has never been published)
    pub async fn playlist(&self, key: &str) -> Option<Vec<u8>> {
        let segmenter = self.ensure_ingesting(key).await;
        let segmenter = segmenter.lock().await;
        segmenter.playlist_bytes()
    }

    /// Segment `seq` of `key`'s current window, or `None` if it was never
    /// produced or has already been evicted
    pub async fn segment(&self, key: &str, seq: u64) -> Option<Arc<Vec<u8>>> {
        let segmenter = self.ensure_ingesting(key).await;
        let segmenter = segmenter.lock().await;
        segmenter.segment_bytes(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogConfig, Logger};
    use crate::packet::{Packet, PacketHeader};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

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

    fn avc_seq_header() -> Packet {
        let sps = [0x67, 0x42, 0x00, 0x1e];
        let pps = [0x68, 0xce, 0x3c, 0x80];
        let mut record = vec![0x01, 0x42, 0x00, 0x1e, 0xff, 0xe1];
        record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        record.extend_from_slice(&sps);
        record.push(0x01);
        record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        record.extend_from_slice(&pps);

        let mut data = vec![0x17, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&record);

        Packet::new_video(
            0,
            1,
            StdArc::new(data),
            PacketHeader::Video { codec_id: 7, frame_type: 1, avc_packet_type: Some(0), composition_time: 0 },
        )
    }

    fn video_keyframe(timestamp_ms: u32) -> Packet {
        let nalu = [0x00, 0x00, 0x00, 0x02, 0x65, 0x88];
        let mut data = vec![0x17, 0x01, 0x00, 0x00, 0x00];
        data.extend_from_slice(&nalu);

        Packet::new_video(
            timestamp_ms,
            1,
            StdArc::new(data),
            PacketHeader::Video { codec_id: 7, frame_type: 1, avc_packet_type: Some(1), composition_time: 0 },
        )
    }

    #[tokio::test]
    async fn test_playlist_is_none_before_any_segment_closes() {
        let stream_registry = StreamRegistry::new(Default::default(), Duration::from_secs(5), test_logger());
        let hls = HlsRegistry::new(HlsConfig::default(), stream_registry, test_logger());

        assert!(hls.playlist("live/test").await.is_none());
    }

    #[tokio::test]
    async fn test_publisher_packets_flow_into_a_closed_segment() {
        let stream_registry = StreamRegistry::new(Default::default(), Duration::from_secs(5), test_logger());
        let mut config = HlsConfig::default();
        config.segment_target_seconds = 1;

        let hls = HlsRegistry::new(config, stream_registry.clone(), test_logger());

        let info = Info::new(1, InfoKind::Publisher, "rtmp://host/live/test".to_string(), "live/test".to_string());
        let (sender, receiver) = tokio::sync::mpsc::channel(16);
        stream_registry.handle_reader(info, receiver).await;

        // touch first so the HLS ingestor attaches before packets are sent
        assert!(hls.playlist("live/test").await.is_none());

        sender.send(avc_seq_header()).await.unwrap();
        sender.send(video_keyframe(0)).await.unwrap();
        sender.send(video_keyframe(1200)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(hls.playlist("live/test").await.is_some());
        assert!(hls.segment("live/test", 0).await.is_some());
    }
}
