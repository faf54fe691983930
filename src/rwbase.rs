// Per-connection timing base (C8)
//
// Generalizes the source's `av.RWBaser`: a single `time.Now()` activity
// watermark plus per-kind timestamp tracking used to rebase a stream's
// timeline when a subscriber attaches mid-stream. `pre_time` becomes a
// `tokio::time::Instant` here, and the configured read/write timeouts are
// carried alongside it so the staleness sweep (C6) can check elapsed time
// against the right bound without a second type.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::packet::InfoKind;

/// Per-kind (audio/video/metadata) last-observed timestamp, used to
/// compute the rebase offset for a newly attached subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Audio,
    Video,
    Metadata,
}

pub struct RWBase {
    /// Timestamp rebase offset: subtracted from incoming timestamps so a
    /// subscriber that attaches mid-stream sees a timeline starting near 0
    base_ts: i64,

    last_ts_by_kind: HashMap<PacketKind, i64>,

    /// Last time this connection performed a read or write
    pre_time: Instant,

    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl RWBase {
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> RWBase {
        RWBase {
            base_ts: 0,
            last_ts_by_kind: HashMap::new(),
            pre_time: Instant::now(),
            read_timeout,
            write_timeout,
        }
    }

    /// Updates the activity watermark; called after every successful read
    /// or write
    pub fn set_pre_time(&mut self) {
        self.pre_time = Instant::now();
    }

    /// Records the last timestamp observed for a media kind
    pub fn rec_timestamp(&mut self, ts: i64, kind: PacketKind) {
        self.last_ts_by_kind.insert(kind, ts);
    }

    /// Current rebase offset
    pub fn base_timestamp(&self) -> i64 {
        self.base_ts
    }

    /// Sets the rebase offset to the last-seen timestamp of `kind`, so the
    /// next packet of that kind is seen as timestamp 0 by a subscriber
    /// attaching now
    pub fn rebase_to_last(&mut self, kind: PacketKind) {
        if let Some(ts) = self.last_ts_by_kind.get(&kind) {
            self.base_ts = *ts;
        }
    }

    /// True if no read/write has happened within `timeout` of the
    /// configured read or write timeout, depending on `kind`
    pub fn is_stale(&self, kind: InfoKind) -> bool {
        let timeout = match kind {
            InfoKind::Publisher => self.read_timeout,
            InfoKind::Player => self.write_timeout,
        };

        self.pre_time.elapsed() > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_rwbase_is_not_stale() {
        let base = RWBase::new(Duration::from_secs(10), Duration::from_secs(10));
        assert!(!base.is_stale(InfoKind::Publisher));
        assert!(!base.is_stale(InfoKind::Player));
    }

    #[test]
    fn test_rebase_tracks_last_timestamp_per_kind() {
        let mut base = RWBase::new(Duration::from_secs(10), Duration::from_secs(10));
        base.rec_timestamp(5000, PacketKind::Video);
        base.rec_timestamp(5020, PacketKind::Audio);

        base.rebase_to_last(PacketKind::Video);
        assert_eq!(base.base_timestamp(), 5000);

        base.rebase_to_last(PacketKind::Audio);
        assert_eq!(base.base_timestamp(), 5020);
    }
}
