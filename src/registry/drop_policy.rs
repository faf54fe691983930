// Frame-aware queue shedding (C6)
//
// Applied once a subscriber's queue has backed up past 1000 packets. Rather
// than plain FIFO backpressure (the source's bounded `mpsc::Sender` would
// just block the publisher), this drains the oldest packets and rebuilds a
// minimal decodable suffix so a lagging subscriber can resync without a
// fresh handshake: keep the AVC/AAC bootstrap state, keep the next keyframe
// anchor, prefer dropping video over audio.

use std::collections::VecDeque;

use crate::packet::Packet;

/// Rebuilds `queue` in place, dropping non-essential packets from its front.
///
/// Only the first `capacity - 84` packets are inspected; anything beyond
/// that window is left untouched. After the rebuild, if the queue is still
/// longer than `capacity - 10`, additional video packets are dropped from
/// the front until it fits or no video remains to drop.
pub fn drop_packet(queue: &mut VecDeque<Packet>, capacity: usize) {
    let drain_window = capacity.saturating_sub(84).min(queue.len());
    let critically_full = queue.len() > capacity.saturating_sub(2);

    let mut kept: VecDeque<Packet> = VecDeque::with_capacity(drain_window);
    let mut dropped_one_audio = false;

    for _ in 0..drain_window {
        let packet = queue.pop_front().expect("drain_window bounded by queue.len()");

        if packet.is_audio {
            if critically_full && !dropped_one_audio {
                dropped_one_audio = true;
                continue;
            }
            kept.push_back(packet);
        } else if packet.is_video {
            if packet.is_seq() || packet.is_key_frame() {
                kept.push_back(packet);
            }
        } else {
            kept.push_back(packet);
        }
    }

    while let Some(packet) = kept.pop_back() {
        queue.push_front(packet);
    }

    let cap_minus_10 = capacity.saturating_sub(10);
    while queue.len() > cap_minus_10 {
        match queue.iter().position(|p| p.is_video) {
            Some(pos) => {
                queue.remove(pos);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketHeader;
    use std::sync::Arc;

    fn seq_header() -> Packet {
        Packet::new_video(
            0,
            1,
            Arc::new(vec![0]),
            PacketHeader::Video {
                codec_id: 7,
                frame_type: 1,
                avc_packet_type: Some(0),
                composition_time: 0,
            },
        )
    }

    fn keyframe(ts: u32) -> Packet {
        Packet::new_video(
            ts,
            1,
            Arc::new(vec![0]),
            PacketHeader::Video {
                codec_id: 7,
                frame_type: 1,
                avc_packet_type: Some(1),
                composition_time: 0,
            },
        )
    }

    fn inter_frame(ts: u32) -> Packet {
        Packet::new_video(
            ts,
            1,
            Arc::new(vec![0]),
            PacketHeader::Video {
                codec_id: 7,
                frame_type: 2,
                avc_packet_type: Some(1),
                composition_time: 0,
            },
        )
    }

    fn audio(ts: u32) -> Packet {
        Packet::new_audio(
            ts,
            1,
            Arc::new(vec![0]),
            PacketHeader::Audio {
                sound_format: 10,
                aac_packet_type: Some(1),
            },
        )
    }

    #[test]
    fn test_keeps_seq_header_and_keyframe_drops_inter_frames() {
        let mut queue: VecDeque<Packet> = VecDeque::new();
        queue.push_back(seq_header());
        for i in 0..50 {
            queue.push_back(inter_frame(i));
        }
        queue.push_back(keyframe(1000));
        queue.push_back(audio(1000));

        drop_packet(&mut queue, 1024);

        assert!(queue.iter().any(|p| p.is_seq()));
        assert!(queue.iter().any(|p| p.is_key_frame()));
        assert!(!queue
            .iter()
            .any(|p| p.is_video && !p.is_seq() && !p.is_key_frame()));
    }

    #[test]
    fn test_drops_one_audio_packet_when_critically_full() {
        let mut queue: VecDeque<Packet> = VecDeque::new();
        for i in 0..1023u32 {
            queue.push_back(audio(i));
        }

        let audio_before = queue.len();

        drop_packet(&mut queue, 1024);

        let audio_after = queue.iter().filter(|p| p.is_audio).count();
        assert_eq!(audio_before - audio_after, 1);
    }

    #[test]
    fn test_leaves_tail_beyond_drain_window_untouched() {
        let mut queue: VecDeque<Packet> = VecDeque::new();
        for i in 0..940u32 {
            queue.push_back(inter_frame(i));
        }
        queue.push_back(keyframe(9999));

        drop_packet(&mut queue, 1024);

        assert_eq!(queue.back().unwrap().timestamp_ms, 9999);
    }

    #[test]
    fn test_rebuilt_queue_never_exceeds_cap_minus_10() {
        let mut queue: VecDeque<Packet> = VecDeque::new();
        for i in 0..1023u32 {
            queue.push_back(keyframe(i));
        }

        drop_packet(&mut queue, 1024);

        assert!(queue.len() <= 1024 - 10);
    }
}
