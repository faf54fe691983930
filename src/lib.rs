// Live streaming fabric: RTMP ingest, stream fan-out, HTTP-FLV and HLS egress
//
// See `SPEC_FULL.md` and `DESIGN.md` for the module map and grounding notes.

pub mod amf;
pub mod config;
pub mod error;
pub mod flv;
pub mod hls;
pub mod log;
pub mod packet;
pub mod registry;
pub mod rtmp;
pub mod rwbase;
pub mod server;
pub mod session;
pub mod session_id_generator;
pub mod utils;
