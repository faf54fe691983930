// FLV tag demux/mux (C4)
//
// Demux classifies a raw audio/video tag payload the way the source's
// `handle_video`/`handle_audio` session handlers inspect the leading
// codec byte(s) before handing the packet to the fan-out. Mux emits the
// same framing the teacher's messages use on the wire, just as a
// standalone FLV byte stream instead of individual RTMP chunk messages.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::error::FlvError;
use crate::packet::{Packet, PacketHeader};

const FLV_TAG_TYPE_AUDIO: u8 = 8;
const FLV_TAG_TYPE_VIDEO: u8 = 9;
const FLV_TAG_TYPE_SCRIPT: u8 = 18;

/// Classifies a video tag payload and builds the corresponding `Packet`
///
/// `payload[0]` carries `frame_type` (high nibble) and `codec_id` (low
/// nibble). For AVC (`codec_id == 7`), `payload[1]` is the
/// `avc_packet_type` (0 = sequence header, 1 = NALU, 2 = end-of-sequence).
pub fn demux_video_tag(
    payload: &[u8],
    timestamp_ms: u32,
    stream_id: u32,
) -> Result<Packet, FlvError> {
    if payload.is_empty() {
        return Err(FlvError::PayloadTooShort);
    }

    let frame_type = (payload[0] >> 4) & 0x0f;
    let codec_id = payload[0] & 0x0f;

    let (avc_packet_type, composition_time) = if codec_id == 7 || codec_id == 12 {
        if payload.len() < 5 {
            return Err(FlvError::PayloadTooShort);
        }

        let avc_packet_type = payload[1];
        let composition_time = ((payload[2] as i32) << 16
            | (payload[3] as i32) << 8
            | payload[4] as i32)
            << 8
            >> 8; // sign-extend the 24-bit value

        (Some(avc_packet_type), composition_time)
    } else {
        (None, 0)
    };

    let header = PacketHeader::Video {
        codec_id,
        frame_type,
        avc_packet_type,
        composition_time,
    };

    Ok(Packet::new_video(
        timestamp_ms,
        stream_id,
        Arc::new(payload.to_vec()),
        header,
    ))
}

/// Classifies an audio tag payload and builds the corresponding `Packet`
///
/// `payload[0]` carries `sound_format` (high nibble), `sound_rate`,
/// `sound_size`, `sound_type` (low bits, not modeled beyond the format).
/// For AAC (`sound_format == 10`), `payload[1]` is the `aac_packet_type`
/// (0 = sequence header, 1 = raw frame).
pub fn demux_audio_tag(
    payload: &[u8],
    timestamp_ms: u32,
    stream_id: u32,
) -> Result<Packet, FlvError> {
    if payload.is_empty() {
        return Err(FlvError::PayloadTooShort);
    }

    let sound_format = (payload[0] >> 4) & 0x0f;

    let aac_packet_type = if sound_format == 10 {
        if payload.len() < 2 {
            return Err(FlvError::PayloadTooShort);
        }
        Some(payload[1])
    } else {
        None
    };

    let header = PacketHeader::Audio {
        sound_format,
        aac_packet_type,
    };

    Ok(Packet::new_audio(
        timestamp_ms,
        stream_id,
        Arc::new(payload.to_vec()),
        header,
    ))
}

/// Builds the 13-byte FLV file header: `FLV\x01\x05\0\0\0\x09` signature
/// plus the first (always-zero) previous-tag-size field
pub fn flv_header() -> Vec<u8> {
    vec![
        b'F', b'L', b'V', 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
    ]
}

/// Muxes a single packet into an FLV tag: header + payload + trailing
/// previous-tag-size footer
pub fn mux_tag(packet: &Packet) -> Vec<u8> {
    let tag_type = if packet.is_video {
        FLV_TAG_TYPE_VIDEO
    } else if packet.is_audio {
        FLV_TAG_TYPE_AUDIO
    } else {
        FLV_TAG_TYPE_SCRIPT
    };

    let data_size = packet.data.len() as u32;
    let ts = packet.timestamp_ms;

    let mut tag = Vec::with_capacity(11 + packet.data.len() + 4);

    tag.push(tag_type);

    let mut size_buf = [0u8; 3];
    BigEndian::write_u24(&mut size_buf, data_size);
    tag.extend_from_slice(&size_buf);

    let mut ts_buf = [0u8; 4];
    BigEndian::write_u32(&mut ts_buf, ts);
    tag.extend_from_slice(&ts_buf[1..4]); // lower 24 bits
    tag.push(ts_buf[0]); // timestamp extended (upper 8 bits)

    tag.extend_from_slice(&[0, 0, 0]); // stream id, always 0

    tag.extend_from_slice(&packet.data);

    tag.extend_from_slice(&((11 + packet.data.len()) as u32).to_be_bytes());

    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demux_avc_sequence_header() {
        let payload = vec![0x17, 0x00, 0x00, 0x00, 0x00, 0xaa, 0xbb];
        let packet = demux_video_tag(&payload, 0, 1).unwrap();
        assert!(packet.is_video);
        assert!(packet.is_seq());
        assert!(packet.is_key_frame());
    }

    #[test]
    fn test_demux_keyframe_nalu() {
        let payload = vec![0x17, 0x01, 0x00, 0x00, 0x00, 0xaa];
        let packet = demux_video_tag(&payload, 1000, 1).unwrap();
        assert!(!packet.is_seq());
        assert!(packet.is_key_frame());
    }

    #[test]
    fn test_demux_inter_frame() {
        let payload = vec![0x27, 0x01, 0x00, 0x00, 0x00, 0xaa];
        let packet = demux_video_tag(&payload, 1000, 1).unwrap();
        assert!(!packet.is_key_frame());
    }

    #[test]
    fn test_demux_aac_sequence_header() {
        let payload = vec![0xaf, 0x00, 0x12, 0x10];
        let packet = demux_audio_tag(&payload, 0, 1).unwrap();
        assert!(packet.is_audio);
        assert!(packet.is_seq());
    }

    #[test]
    fn test_demux_empty_payload_is_rejected() {
        assert_eq!(
            demux_video_tag(&[], 0, 1).unwrap_err(),
            FlvError::PayloadTooShort
        );
        assert_eq!(
            demux_audio_tag(&[], 0, 1).unwrap_err(),
            FlvError::PayloadTooShort
        );
    }

    #[test]
    fn test_mux_tag_round_trips_classification() {
        let payload = vec![0x17, 0x01, 0x00, 0x00, 0x00, 0xaa, 0xbb, 0xcc];
        let packet = demux_video_tag(&payload, 40, 1).unwrap();

        let tag = mux_tag(&packet);

        assert_eq!(tag[0], FLV_TAG_TYPE_VIDEO);

        let data_size = BigEndian::read_u24(&tag[1..4]);
        assert_eq!(data_size as usize, payload.len());

        let reconstructed_payload = &tag[11..11 + payload.len()];
        assert_eq!(reconstructed_payload, &payload[..]);

        let trailing_size = BigEndian::read_u32(&tag[tag.len() - 4..]);
        assert_eq!(trailing_size as usize, 11 + payload.len());
    }
}
