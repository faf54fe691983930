// RTMP connection state machine and driving loop (C3)
//
// Grounded on the source's `session::handle::handle_rtmp_session` (itself a
// stub that only comments `// Handshake`) plus `session/msg_handle.rs` for
// the post-handshake dispatch shape: decode one `RtmpPacket` at a time,
// branch on `packet_type`, and for `RTMP_TYPE_INVOKE` decode an
// `RtmpCommand` and match on its name. This crate narrows the command set
// to what §4.3 lists and routes media straight into the stream registry
// instead of the source's GOP-cache/redis-backed channel status.

mod commands;
mod context;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Mutex};

use crate::config::{RtmpServerConfig, TimingConfig};
use crate::error::SessionError;
use crate::flv::{demux_audio_tag, demux_video_tag};
use crate::log::Logger;
use crate::log_debug;
use crate::packet::{Info, InfoKind, Packet};
use crate::registry::StreamRegistry;
use crate::rtmp::{
    generate_s0_s1_s2, rtmp_build_metadata, rtmp_make_audio_codec_header_message,
    rtmp_make_metadata_message, rtmp_make_video_codec_header_message, ChunkReader, RtmpCommand,
    RtmpData, RTMP_SIG_SIZE, RTMP_TYPE_AUDIO, RTMP_TYPE_DATA, RTMP_TYPE_INVOKE,
    RTMP_TYPE_SET_CHUNK_SIZE, RTMP_TYPE_VIDEO, RTMP_VERSION,
};
use context::SessionContext;

use byteorder::{BigEndian, ByteOrder};

/// What this connection currently is to the stream registry, if anything
enum Role {
    None,
    Publisher { sender: mpsc::Sender<Packet> },
    Player { task: tokio::task::JoinHandle<()> },
}

/// Runs a single RTMP connection end to end: handshake, then command
/// exchange, then media relay, until the peer disconnects or a protocol
/// error occurs
pub async fn run_session<S>(
    uid: u64,
    stream: S,
    peer_url_prefix: String,
    rtmp_config: RtmpServerConfig,
    timing: TimingConfig,
    registry: StreamRegistry,
    logger: Logger,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, write_half) = split(stream);
    let write_half = Arc::new(Mutex::new(write_half));

    let read_timeout = Duration::from_secs(timing.read_timeout_seconds);
    let write_timeout = Duration::from_secs(timing.write_timeout_seconds);

    perform_handshake(&mut read_half, &write_half, read_timeout, write_timeout, &logger).await?;

    let mut ctx = SessionContext::new(uid, rtmp_config.out_chunk_size, read_timeout, write_timeout);
    let mut chunk_reader = ChunkReader::new(rtmp_config.chunk_size);
    let mut role = Role::None;

    loop {
        let packet = chunk_reader.read_packet(&mut read_half, read_timeout).await;

        let packet = match packet {
            Ok(p) => p,
            Err(err) => {
                log_debug!(logger, format!("session {} ending: {}", uid, err));
                break;
            }
        };

        ctx.rw.set_pre_time();

        match packet.header.packet_type {
            RTMP_TYPE_SET_CHUNK_SIZE => {
                if packet.payload.len() >= 4 {
                    let size = BigEndian::read_u32(&packet.payload[0..4]) as usize;
                    chunk_reader.set_chunk_size(size);
                }
            }
            RTMP_TYPE_INVOKE => {
                let cmd = RtmpCommand::decode(&packet.payload)?;
                handle_command(
                    &cmd,
                    &mut ctx,
                    &mut role,
                    &peer_url_prefix,
                    &registry,
                    &write_half,
                    write_timeout,
                    &logger,
                )
                .await?;
            }
            RTMP_TYPE_AUDIO => {
                if let Role::Publisher { sender } = &role {
                    let pkt = demux_audio_tag(&packet.payload, packet.header.timestamp as u32, packet.header.stream_id)?;
                    let _ = sender.send(pkt).await;
                }
            }
            RTMP_TYPE_VIDEO => {
                if let Role::Publisher { sender } = &role {
                    let pkt = demux_video_tag(&packet.payload, packet.header.timestamp as u32, packet.header.stream_id)?;
                    let _ = sender.send(pkt).await;
                }
            }
            RTMP_TYPE_DATA => {
                if let Role::Publisher { sender } = &role {
                    if let Ok(data) = RtmpData::decode(&packet.payload) {
                        let built = rtmp_build_metadata(&data);
                        let pkt = Packet::new_metadata(
                            packet.header.timestamp as u32,
                            packet.header.stream_id,
                            Arc::new(built),
                        );
                        let _ = sender.send(pkt).await;
                    }
                }
            }
            _ => {}
        }
    }

    if let Role::Player { task } = role {
        task.abort();
    }

    Ok(())
}

async fn perform_handshake<R, W>(
    read_half: &mut R,
    write_half: &Arc<Mutex<WriteHalf<W>>>,
    read_timeout: Duration,
    write_timeout: Duration,
    logger: &Logger,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut c0 = [0u8; 1];
    read_timeout_io(read_half, &mut c0, read_timeout).await?;

    if c0[0] != RTMP_VERSION {
        return Err(SessionError::Protocol(format!("unsupported RTMP version byte: {}", c0[0])));
    }

    let mut c1 = vec![0u8; RTMP_SIG_SIZE];
    read_timeout_io(read_half, &mut c1, read_timeout).await?;

    let response = generate_s0_s1_s2(&c1, logger)?;
    write_timeout_io(write_half, &response, write_timeout).await?;

    let mut c2 = vec![0u8; RTMP_SIG_SIZE];
    read_timeout_io(read_half, &mut c2, read_timeout).await?;

    Ok(())
}

async fn read_timeout_io<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), SessionError> {
    use tokio::io::AsyncReadExt;

    match tokio::time::timeout(timeout, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Protocol(format!("io error during handshake: {}", e))),
        Err(_) => Err(SessionError::Protocol("handshake read timed out".to_string())),
    }
}

async fn write_timeout_io<W: AsyncWrite + Unpin>(
    write_half: &Arc<Mutex<W>>,
    bytes: &[u8],
    timeout: Duration,
) -> Result<(), SessionError> {
    let mut w = write_half.lock().await;

    match tokio::time::timeout(timeout, w.write_all(bytes)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Protocol(format!("write error: {}", e))),
        Err(_) => Err(SessionError::Protocol("write timed out".to_string())),
    }
}

async fn handle_command<W>(
    cmd: &RtmpCommand,
    ctx: &mut SessionContext,
    role: &mut Role,
    peer_url_prefix: &str,
    registry: &StreamRegistry,
    write_half: &Arc<Mutex<WriteHalf<W>>>,
    write_timeout: Duration,
    logger: &Logger,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match cmd.cmd.as_str() {
        "connect" => {
            for message in commands::connect_reply(cmd, ctx) {
                write_timeout_io(write_half, &message, write_timeout).await?;
            }
        }
        "createStream" => {
            let message = commands::create_stream_reply(cmd, ctx);
            write_timeout_io(write_half, &message, write_timeout).await?;
        }
        "publish" => {
            let (stream_name, _publish_type) = commands::publish_args(cmd);
            let key = build_key(&ctx.app, &stream_name);
            let url = format!("{}/{}", peer_url_prefix, key);

            ctx.stream_key = Some(key.clone());

            let info = Info::new(ctx.uid, InfoKind::Publisher, url, key);
            let (sender, receiver) = mpsc::channel(1024);

            registry.handle_reader(info, receiver).await;
            *role = Role::Publisher { sender };

            let message = commands::publish_start_message(ctx);
            write_timeout_io(write_half, &message, write_timeout).await?;
        }
        "play" => {
            let stream_name = commands::play_stream_name(cmd);
            let key = build_key(&ctx.app, &stream_name);
            let url = format!("{}/{}", peer_url_prefix, key);

            ctx.stream_key = Some(key.clone());

            let info = Info::new(ctx.uid, InfoKind::Player, url, key);
            let subscriber = registry.handle_writer(info).await;

            for message in commands::play_start_messages(ctx) {
                write_timeout_io(write_half, &message, write_timeout).await?;
            }

            let write_half = write_half.clone();
            let play_stream_id = ctx.play_stream_id;
            let out_chunk_size = ctx.out_chunk_size;
            let logger = logger.make_child_logger("[PLAYER] ");

            let task = tokio::spawn(async move {
                while let Some(packet) = subscriber.recv().await {
                    let message = if packet.is_video {
                        rtmp_make_video_codec_header_message(
                            play_stream_id,
                            &packet.data,
                            packet.timestamp_ms as i64,
                            out_chunk_size,
                        )
                    } else if packet.is_audio {
                        rtmp_make_audio_codec_header_message(
                            play_stream_id,
                            &packet.data,
                            packet.timestamp_ms as i64,
                            out_chunk_size,
                        )
                    } else {
                        rtmp_make_metadata_message(
                            play_stream_id,
                            &packet.data,
                            packet.timestamp_ms as i64,
                            out_chunk_size,
                        )
                    };

                    if write_timeout_io(&write_half, &message, write_timeout).await.is_err() {
                        log_debug!(logger, "player write failed, ending relay");
                        break;
                    }
                }
            });

            *role = Role::Player { task };
        }
        "deleteStream" | "closeStream" => {
            if let Role::Player { task } = std::mem::replace(role, Role::None) {
                task.abort();
            }
        }
        "FCPublish" | "FCUnpublish" | "FCSubscribe" | "releaseStream" => {
            log_debug!(logger, format!("acknowledging {} for '{}'", cmd.cmd, commands::stream_name_arg(cmd)));
        }
        other => {
            log_debug!(logger, format!("ignoring unhandled command '{}'", other));
        }
    }

    Ok(())
}

/// Builds the fan-out routing key from `app` and the stream name given to
/// `publish`/`play`, e.g. `("live", "test") -> "live/test"`
fn build_key(app: &str, stream_name: &str) -> String {
    let app = app.trim_matches('/');
    let stream_name = stream_name.trim_matches('/');

    if app.is_empty() {
        stream_name.to_string()
    } else {
        format!("{}/{}", app, stream_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_key_joins_app_and_stream_name() {
        assert_eq!(build_key("live", "test"), "live/test");
        assert_eq!(build_key("/live/", "/test/"), "live/test");
        assert_eq!(build_key("", "test"), "test");
    }
}
