// Per-connection state carried across the command exchange (C3)
//
// Generalizes the source's `RtmpSessionStatus` fields actually consulted by
// the command handlers (`app`, `objectEncoding`, assigned stream id) without
// the GOP cache / redis / control-key fields this crate has no use for.

use std::time::Duration;

use crate::rwbase::RWBase;

pub struct SessionContext {
    pub uid: u64,

    /// `app` argument from `connect`, e.g. "live"
    pub app: String,

    /// `tcUrl` argument from `connect`
    pub tc_url: String,

    /// `objectEncoding` from `connect`; `Some(3)` means the peer accepts AMF3
    pub object_encoding: Option<u32>,

    /// Stream id handed out by `createStream`, echoed on every subsequent
    /// media message addressed to this connection
    pub play_stream_id: u32,

    /// Chunk size this side uses when writing to the peer
    pub out_chunk_size: usize,

    /// Routing key of the stream currently being published or played, once
    /// known
    pub stream_key: Option<String>,

    pub rw: RWBase,
}

impl SessionContext {
    pub fn new(uid: u64, out_chunk_size: usize, read_timeout: Duration, write_timeout: Duration) -> SessionContext {
        SessionContext {
            uid,
            app: String::new(),
            tc_url: String::new(),
            object_encoding: None,
            play_stream_id: 1,
            out_chunk_size,
            stream_key: None,
            rw: RWBase::new(read_timeout, write_timeout),
        }
    }
}
