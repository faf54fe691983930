// Fabric packet model
//
// The unit that flows from a publisher's read path through the stream
// registry to every attached subscriber. Payloads are wrapped in `Arc` so
// the registry and every subscriber queue can hold the same allocation
// without copying or locking, mirroring the source's single writer / many
// readers packet ownership.

use std::sync::Arc;

/// Extra fields populated by the FLV demuxer (C4), discriminated by media
/// kind. `Metadata` carries no extra fields beyond the AMF0 body in
/// `Packet.data`.
#[derive(Clone, Debug, PartialEq)]
pub enum PacketHeader {
    Video {
        codec_id: u8,
        frame_type: u8,
        avc_packet_type: Option<u8>,
        composition_time: i32,
    },
    Audio {
        sound_format: u8,
        aac_packet_type: Option<u8>,
    },
    Metadata,
}

impl PacketHeader {
    /// True for an AVC or AAC sequence header (decoder bootstrap data that
    /// must be seen before any dependent frame can be decoded)
    pub fn is_seq(&self) -> bool {
        match self {
            PacketHeader::Video {
                avc_packet_type, ..
            } => *avc_packet_type == Some(0),
            PacketHeader::Audio { aac_packet_type, .. } => *aac_packet_type == Some(0),
            PacketHeader::Metadata => false,
        }
    }

    /// True for a video keyframe (`frame_type == 1`)
    pub fn is_key_frame(&self) -> bool {
        match self {
            PacketHeader::Video { frame_type, .. } => *frame_type == 1,
            _ => false,
        }
    }
}

/// A single audio, video, or metadata unit flowing through the fabric
#[derive(Clone, Debug)]
pub struct Packet {
    pub is_audio: bool,
    pub is_video: bool,
    pub is_metadata: bool,

    /// 32-bit FLV timestamp, monotonic per stream after rebasing (see `rwbase`)
    pub timestamp_ms: u32,

    /// Logical RTMP stream id (typically 1)
    pub stream_id: u32,

    /// Opaque FLV tag body: for audio/video, the codec-framed payload; for
    /// metadata, the AMF0 body. Never mutated after construction.
    pub data: Arc<Vec<u8>>,

    pub header: PacketHeader,
}

impl Packet {
    pub fn new_video(
        timestamp_ms: u32,
        stream_id: u32,
        data: Arc<Vec<u8>>,
        header: PacketHeader,
    ) -> Packet {
        Packet {
            is_audio: false,
            is_video: true,
            is_metadata: false,
            timestamp_ms,
            stream_id,
            data,
            header,
        }
    }

    pub fn new_audio(
        timestamp_ms: u32,
        stream_id: u32,
        data: Arc<Vec<u8>>,
        header: PacketHeader,
    ) -> Packet {
        Packet {
            is_audio: true,
            is_video: false,
            is_metadata: false,
            timestamp_ms,
            stream_id,
            data,
            header,
        }
    }

    pub fn new_metadata(timestamp_ms: u32, stream_id: u32, data: Arc<Vec<u8>>) -> Packet {
        Packet {
            is_audio: false,
            is_video: false,
            is_metadata: true,
            timestamp_ms,
            stream_id,
            data,
            header: PacketHeader::Metadata,
        }
    }

    pub fn is_seq(&self) -> bool {
        self.header.is_seq()
    }

    pub fn is_key_frame(&self) -> bool {
        self.header.is_key_frame()
    }
}

/// The role a session plays against the stream registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoKind {
    Publisher,
    Player,
}

/// Identifying metadata for a reader or writer attached to the registry
#[derive(Clone, Debug)]
pub struct Info {
    /// Server-generated session id (see `SessionIdGenerator`), never
    /// client-supplied
    pub uid: u64,

    pub kind: InfoKind,

    /// Full request URL (`tcUrl` + stream name for RTMP, request path for
    /// HTTP-FLV/HLS)
    pub url: String,

    /// Fan-out routing key: the URL path with any leading `/` stripped
    pub key: String,
}

impl Info {
    pub fn new(uid: u64, kind: InfoKind, url: String, key: String) -> Info {
        Info { uid, kind, url, key }
    }

    /// Strips a leading `/` from a URL path to derive the routing key
    pub fn key_from_path(path: &str) -> String {
        path.strip_prefix('/').unwrap_or(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_path_strips_leading_slash() {
        assert_eq!(Info::key_from_path("/live/test"), "live/test");
        assert_eq!(Info::key_from_path("live/test"), "live/test");
        assert_eq!(Info::key_from_path("/"), "");
    }

    #[test]
    fn test_video_sequence_header_predicate() {
        let header = PacketHeader::Video {
            codec_id: 7,
            frame_type: 1,
            avc_packet_type: Some(0),
            composition_time: 0,
        };
        assert!(header.is_seq());
        assert!(header.is_key_frame());
    }

    #[test]
    fn test_video_inter_frame_is_not_seq_or_key() {
        let header = PacketHeader::Video {
            codec_id: 7,
            frame_type: 2,
            avc_packet_type: Some(1),
            composition_time: 0,
        };
        assert!(!header.is_seq());
        assert!(!header.is_key_frame());
    }

    #[test]
    fn test_audio_aac_sequence_header_predicate() {
        let header = PacketHeader::Audio {
            sound_format: 10,
            aac_packet_type: Some(0),
        };
        assert!(header.is_seq());
        assert!(!header.is_key_frame());
    }
}
