// Per-key HLS segmenting state machine (C7)
//
// Mirrors the registry's own per-key state shape (one struct tracking
// everything needed to serve a key, guarded by the caller's lock) rather
// than introducing a second actor model: `HlsSegmenter` is plain,
// synchronous state driven by whoever owns the `Mutex` wrapping it (see
// `hls::HlsRegistry`).

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::HlsConfig;
use crate::error::HlsError;
use crate::packet::{Packet, PacketHeader};

use super::aac::AacConfig;
use super::avc::AvcDecoderConfig;
use super::playlist::{render_playlist, PlaylistSegment};
use super::ts::TsMuxer;

/// A finished, immutably-addressable TS segment
#[derive(Clone)]
pub struct Segment {
    pub seq: u64,
    pub duration_ms: u64,
    pub bytes: Arc<Vec<u8>>,
}

struct OpenSegment {
    muxer: TsMuxer,
    start_timestamp_ms: u32,
    max_timestamp_ms: u32,
}

pub struct HlsSegmenter {
    config: HlsConfig,
    avc_config: Option<AvcDecoderConfig>,
    aac_config: Option<AacConfig>,
    /// Retained for introspection; MPEG-TS has no standard carriage for
    /// AMF0 metadata without a private data PID, so it is never muxed
    last_metadata: Option<Arc<Vec<u8>>>,
    open: Option<OpenSegment>,
    window: VecDeque<Segment>,
    next_seq: u64,
}

impl HlsSegmenter {
    pub fn new(config: HlsConfig) -> HlsSegmenter {
        HlsSegmenter {
            config,
            avc_config: None,
            aac_config: None,
            last_metadata: None,
            open: None,
            window: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Feeds one packet from the stream's fan-out into the segmenter
    pub fn push(&mut self, packet: &Packet) -> Result<(), HlsError> {
        if packet.is_video {
            self.push_video(packet)
        } else if packet.is_audio {
            self.push_audio(packet)
        } else {
            self.last_metadata = Some(packet.data.clone());
            Ok(())
        }
    }

    fn push_video(&mut self, packet: &Packet) -> Result<(), HlsError> {
        let (avc_packet_type, frame_type, composition_time) = match packet.header {
            PacketHeader::Video {
                avc_packet_type,
                frame_type,
                composition_time,
                ..
            } => (avc_packet_type, frame_type, composition_time),
            _ => return Ok(()),
        };

        match avc_packet_type {
            Some(0) => {
                if packet.data.len() >= 5 {
                    self.avc_config = Some(AvcDecoderConfig::parse(&packet.data[5..])?);
                }
                Ok(())
            }
            Some(1) => {
                if self.avc_config.is_none() {
                    return Err(HlsError::MissingVideoBootstrap);
                }
                if packet.data.len() < 5 {
                    return Ok(());
                }

                let is_keyframe = frame_type == 1;
                self.maybe_cut(packet.timestamp_ms, is_keyframe);

                if self.open.is_none() {
                    if !is_keyframe {
                        return Ok(()); // can't open a segment mid-GOP
                    }
                    self.open_segment(packet.timestamp_ms);
                }

                let avc_config = self.avc_config.as_ref().ok_or(HlsError::MissingVideoBootstrap)?;
                let access_unit = avc_config.annex_b_access_unit(&packet.data[5..], is_keyframe);
                let pts_90k = ((packet.timestamp_ms as i64 + composition_time as i64).max(0) as u64) * 90;

                let open = self.open.as_mut().expect("segment opened above");
                open.muxer.write_video_access_unit(&access_unit, pts_90k, pts_90k);
                open.max_timestamp_ms = open.max_timestamp_ms.max(packet.timestamp_ms);

                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn push_audio(&mut self, packet: &Packet) -> Result<(), HlsError> {
        let aac_packet_type = match packet.header {
            PacketHeader::Audio { sound_format, aac_packet_type } if sound_format == 10 => aac_packet_type,
            _ => return Ok(()),
        };

        match aac_packet_type {
            Some(0) => {
                if packet.data.len() >= 2 {
                    self.aac_config = Some(AacConfig::parse(&packet.data[2..])?);
                }
                Ok(())
            }
            Some(1) => {
                let aac_config = *self.aac_config.as_ref().ok_or(HlsError::MissingAudioBootstrap)?;
                if packet.data.len() < 2 {
                    return Ok(());
                }

                if let Some(open) = self.open.as_mut() {
                    let framed = aac_config.frame(&packet.data[2..]);
                    let pts_90k = packet.timestamp_ms as u64 * 90;
                    open.muxer.write_audio_access_unit(&framed, pts_90k);
                    open.max_timestamp_ms = open.max_timestamp_ms.max(packet.timestamp_ms);
                }

                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn maybe_cut(&mut self, timestamp_ms: u32, is_keyframe: bool) {
        if !is_keyframe {
            return;
        }

        let target_ms = self.config.segment_target_seconds * 1000;

        if let Some(open) = &self.open {
            let elapsed = timestamp_ms.saturating_sub(open.start_timestamp_ms) as u64;
            if elapsed >= target_ms {
                self.close_segment();
            }
        }
    }

    fn open_segment(&mut self, timestamp_ms: u32) {
        let mut muxer = TsMuxer::new();
        muxer.write_psi();

        self.open = Some(OpenSegment {
            muxer,
            start_timestamp_ms: timestamp_ms,
            max_timestamp_ms: timestamp_ms,
        });
    }

    fn close_segment(&mut self) {
        if let Some(open) = self.open.take() {
            let duration_ms = open.max_timestamp_ms.saturating_sub(open.start_timestamp_ms) as u64;
            let seq = self.next_seq;
            self.next_seq += 1;

            self.window.push_back(Segment {
                seq,
                duration_ms,
                bytes: Arc::new(open.muxer.into_bytes()),
            });

            while self.window.len() > self.config.window_size {
                self.window.pop_front();
            }
        }
    }

    pub fn playlist_bytes(&self) -> Option<Vec<u8>> {
        if self.window.is_empty() {
            return None;
        }

        let entries: Vec<PlaylistSegment> = self
            .window
            .iter()
            .map(|s| PlaylistSegment { seq: s.seq, duration_ms: s.duration_ms })
            .collect();

        Some(render_playlist(&entries, self.config.segment_target_seconds))
    }

    pub fn segment_bytes(&self, seq: u64) -> Option<Arc<Vec<u8>>> {
        self.window.iter().find(|s| s.seq == seq).map(|s| s.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

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

    fn aac_seq_header() -> Packet {
        let data = vec![0xaf, 0x00, 0x12, 0x10];
        Packet::new_audio(
            0,
            1,
            StdArc::new(data),
            PacketHeader::Audio { sound_format: 10, aac_packet_type: Some(0) },
        )
    }

    fn video_frame(timestamp_ms: u32, is_keyframe: bool) -> Packet {
        let frame_type = if is_keyframe { 1 } else { 2 };
        let nalu = [0x00, 0x00, 0x00, 0x02, 0x65, 0x88];
        let mut data = vec![0x10 | frame_type, 0x01, 0x00, 0x00, 0x00];
        data.extend_from_slice(&nalu);

        Packet::new_video(
            timestamp_ms,
            1,
            StdArc::new(data),
            PacketHeader::Video { codec_id: 7, frame_type, avc_packet_type: Some(1), composition_time: 0 },
        )
    }

    #[test]
    fn test_video_before_bootstrap_is_rejected() {
        let mut segmenter = HlsSegmenter::new(HlsConfig::default());
        let err = segmenter.push(&video_frame(0, true)).unwrap_err();
        assert_eq!(err, HlsError::MissingVideoBootstrap);
    }

    #[test]
    fn test_non_keyframe_does_not_open_a_segment() {
        let mut segmenter = HlsSegmenter::new(HlsConfig::default());
        segmenter.push(&avc_seq_header()).unwrap();
        segmenter.push(&aac_seq_header()).unwrap();

        segmenter.push(&video_frame(0, false)).unwrap();
        assert!(segmenter.playlist_bytes().is_none());
    }

    #[test]
    fn test_segment_closes_on_keyframe_past_target_duration() {
        let mut config = HlsConfig::default();
        config.segment_target_seconds = 5;

        let mut segmenter = HlsSegmenter::new(config);
        segmenter.push(&avc_seq_header()).unwrap();
        segmenter.push(&aac_seq_header()).unwrap();

        segmenter.push(&video_frame(0, true)).unwrap();
        segmenter.push(&video_frame(2000, false)).unwrap();
        segmenter.push(&video_frame(5100, true)).unwrap();

        let playlist = String::from_utf8(segmenter.playlist_bytes().unwrap()).unwrap();
        assert!(playlist.contains("segment-0.ts"));
        assert!(segmenter.segment_bytes(0).is_some());
    }

    #[test]
    fn test_window_evicts_oldest_segment_past_capacity() {
        let mut config = HlsConfig::default();
        config.segment_target_seconds = 1;
        config.window_size = 2;

        let mut segmenter = HlsSegmenter::new(config);
        segmenter.push(&avc_seq_header()).unwrap();
        segmenter.push(&aac_seq_header()).unwrap();

        let mut ts = 0u32;
        for _ in 0..4 {
            segmenter.push(&video_frame(ts, true)).unwrap();
            ts += 1500;
        }
        segmenter.push(&video_frame(ts, true)).unwrap();

        assert!(segmenter.segment_bytes(0).is_none());
        assert!(segmenter.segment_bytes(2).is_some());
    }
}
