// AMF0 command handlers for the post-handshake exchange (C3)
//
// Grounded on the source's `session/commands/*.rs` family (`connect.rs`,
// `create_stream.rs`, `publish.rs`, `play.rs`): each function pulls its
// arguments out of a decoded `RtmpCommand` the same way (`get_argument`,
// falling back to a default when the peer omits an optional field) and
// builds the same reply messages. Collapsed into one module instead of one
// file per command since this crate's handlers carry no redis/callback
// side effects to separate out.

use super::context::SessionContext;
use crate::rtmp::{
    rtmp_make_chunk_size_set_message, rtmp_make_connect_response, rtmp_make_create_stream_response,
    rtmp_make_peer_bandwidth_set_message, rtmp_make_sample_access_message, rtmp_make_status_message,
    rtmp_make_window_ack, RtmpCommand, RTMP_PEER_BANDWIDTH, RTMP_PEER_BANDWIDTH_DYNAMIC, RTMP_WINDOW_ACK,
};

/// Builds the four messages sent in reply to `connect`: window-ack,
/// peer-bandwidth, chunk-size-set, then `_result`, in that order
pub fn connect_reply(cmd: &RtmpCommand, ctx: &mut SessionContext) -> Vec<Vec<u8>> {
    let trans_id = cmd
        .get_argument("transId")
        .map(|v| v.get_integer())
        .unwrap_or(0);

    ctx.object_encoding = cmd
        .get_argument("cmdObj")
        .and_then(|v| v.get_object_property("objectEncoding"))
        .map(|v| v.get_integer() as u32);

    ctx.app = cmd
        .get_argument("cmdObj")
        .and_then(|v| v.get_object_property("app"))
        .map(|v| v.get_string().to_string())
        .unwrap_or_default();

    ctx.tc_url = cmd
        .get_argument("cmdObj")
        .and_then(|v| v.get_object_property("tcUrl"))
        .map(|v| v.get_string().to_string())
        .unwrap_or_default();

    vec![
        rtmp_make_window_ack(RTMP_WINDOW_ACK),
        rtmp_make_peer_bandwidth_set_message(RTMP_PEER_BANDWIDTH, RTMP_PEER_BANDWIDTH_DYNAMIC),
        rtmp_make_chunk_size_set_message(ctx.out_chunk_size as u32),
        rtmp_make_connect_response(trans_id, ctx.object_encoding, ctx.out_chunk_size),
    ]
}

/// Builds the `_result` reply to `createStream`, always handing out stream
/// id 1 (this crate has no use for more than one stream per connection)
pub fn create_stream_reply(cmd: &RtmpCommand, ctx: &SessionContext) -> Vec<u8> {
    let trans_id = cmd
        .get_argument("transId")
        .map(|v| v.get_integer())
        .unwrap_or(0);

    rtmp_make_create_stream_response(trans_id, ctx.play_stream_id, ctx.out_chunk_size)
}

/// Extracts `(streamName, publishType)` from a `publish` command
pub fn publish_args(cmd: &RtmpCommand) -> (String, String) {
    let stream_name = cmd
        .get_argument("streamName")
        .map(|v| v.get_string().to_string())
        .unwrap_or_default();

    let publish_type = cmd
        .get_argument("type")
        .map(|v| v.get_string().to_string())
        .unwrap_or_else(|| "live".to_string());

    (stream_name, publish_type)
}

/// Extracts the stream name from a `play` command
pub fn play_stream_name(cmd: &RtmpCommand) -> String {
    cmd.get_argument("streamName")
        .map(|v| v.get_string().to_string())
        .unwrap_or_default()
}

/// Extracts the stream name from `FCPublish`/`FCUnpublish`/`FCSubscribe`/
/// `releaseStream`, all of which carry it as `streamName`
pub fn stream_name_arg(cmd: &RtmpCommand) -> String {
    cmd.get_argument("streamName")
        .map(|v| v.get_string().to_string())
        .unwrap_or_default()
}

/// Builds the messages sent once a `play` is accepted: `NetStream.Play.Start`
/// status, a sample-access message, and an empty `onMetaData`
pub fn play_start_messages(ctx: &SessionContext) -> Vec<Vec<u8>> {
    vec![
        rtmp_make_status_message(
            ctx.play_stream_id,
            "status".to_string(),
            "NetStream.Play.Start".to_string(),
            Some("Playback started.".to_string()),
            ctx.out_chunk_size,
        ),
        rtmp_make_sample_access_message(ctx.play_stream_id, ctx.out_chunk_size),
    ]
}

/// Builds the `NetStream.Publish.Start` status sent once a `publish` is
/// accepted
pub fn publish_start_message(ctx: &SessionContext) -> Vec<u8> {
    rtmp_make_status_message(
        ctx.play_stream_id,
        "status".to_string(),
        "NetStream.Publish.Start".to_string(),
        Some("Publishing.".to_string()),
        ctx.out_chunk_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AMF0Value;
    use std::collections::HashMap;
    use std::time::Duration;

    fn ctx() -> SessionContext {
        SessionContext::new(1, 4096, Duration::from_secs(10), Duration::from_secs(10))
    }

    #[test]
    fn test_connect_reply_extracts_app_and_tc_url() {
        let mut cmd = RtmpCommand::new("connect".to_string());
        cmd.set_argument("transId".to_string(), AMF0Value::Number { value: 1.0 });

        let mut cmd_obj = HashMap::new();
        cmd_obj.insert("app".to_string(), AMF0Value::String { value: "live".to_string() });
        cmd_obj.insert(
            "tcUrl".to_string(),
            AMF0Value::String { value: "rtmp://host/live".to_string() },
        );
        cmd.set_argument("cmdObj".to_string(), AMF0Value::Object { properties: cmd_obj });

        let mut c = ctx();
        let messages = connect_reply(&cmd, &mut c);

        assert_eq!(messages.len(), 4);
        assert_eq!(c.app, "live");
        assert_eq!(c.tc_url, "rtmp://host/live");
    }

    #[test]
    fn test_publish_args_defaults_type_to_live() {
        let mut cmd = RtmpCommand::new("publish".to_string());
        cmd.set_argument(
            "streamName".to_string(),
            AMF0Value::String { value: "test".to_string() },
        );

        let (name, kind) = publish_args(&cmd);
        assert_eq!(name, "test");
        assert_eq!(kind, "live");
    }

    #[test]
    fn test_play_stream_name_extracts_name() {
        let mut cmd = RtmpCommand::new("play".to_string());
        cmd.set_argument(
            "streamName".to_string(),
            AMF0Value::String { value: "test".to_string() },
        );

        assert_eq!(play_stream_name(&cmd), "test");
    }
}
