// `.m3u8` playlist rendering (C7)

/// One window entry: a segment's sequence number and duration
pub struct PlaylistSegment {
    pub seq: u64,
    pub duration_ms: u64,
}

/// Renders the sliding-window playlist body for the given segments, which
/// must already be in ascending `seq` order
pub fn render_playlist(segments: &[PlaylistSegment], target_duration_seconds: u64) -> Vec<u8> {
    let target = segments
        .iter()
        .map(|s| (s.duration_ms as f64 / 1000.0).ceil() as u64)
        .max()
        .unwrap_or(target_duration_seconds)
        .max(target_duration_seconds);

    let media_sequence = segments.first().map(|s| s.seq).unwrap_or(0);

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target));
    out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", media_sequence));

    for segment in segments {
        out.push_str(&format!(
            "#EXTINF:{:.3},\nsegment-{}.ts\n",
            segment.duration_ms as f64 / 1000.0,
            segment.seq
        ));
    }

    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_playlist_uses_first_segment_as_media_sequence() {
        let segments = vec![
            PlaylistSegment { seq: 3, duration_ms: 5000 },
            PlaylistSegment { seq: 4, duration_ms: 4800 },
        ];

        let playlist = String::from_utf8(render_playlist(&segments, 5)).unwrap();

        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:3\n"));
        assert!(playlist.contains("segment-3.ts"));
        assert!(playlist.contains("segment-4.ts"));
    }

    #[test]
    fn test_render_playlist_target_duration_rounds_up() {
        let segments = vec![PlaylistSegment { seq: 0, duration_ms: 5200 }];
        let playlist = String::from_utf8(render_playlist(&segments, 5)).unwrap();
        assert!(playlist.contains("#EXT-X-TARGETDURATION:6\n"));
    }
}
