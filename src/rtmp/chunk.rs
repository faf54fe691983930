// RTMP chunk stream decoder (C1)
//
// The source's own `read_rtmp_chunk` never got past parsing the basic and
// message headers (it falls through right where the payload would be
// reassembled), so this is a clean-room decode path. It mirrors the encode
// side's header layout exactly — see
// `RtmpPacket::serialize_basic_header`/`serialize_chunk_message_header` —
// and wraps every blocking read in the same timeout the stub used.

use std::collections::HashMap;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ChunkError;

use super::{RtmpPacket, RtmpPacketHeader, RTMP_CHUNK_TYPE_0, RTMP_CHUNK_TYPE_1, RTMP_CHUNK_TYPE_2};

/// Partially-received message for one chunk stream id
struct InProgress {
    header: RtmpPacketHeader,
    payload: Vec<u8>,
    uses_extended_timestamp: bool,
}

/// Decoder-side state for one direction of an RTMP connection: the chunk
/// size currently in effect and, per chunk stream id, the last full header
/// (for delta-decoding fmt 1/2/3 chunks) plus any in-flight message.
pub struct ChunkReader {
    chunk_size: usize,
    prev_headers: HashMap<u32, RtmpPacketHeader>,
    in_progress: HashMap<u32, InProgress>,
}

impl ChunkReader {
    pub fn new(initial_chunk_size: usize) -> ChunkReader {
        ChunkReader {
            chunk_size: initial_chunk_size,
            prev_headers: HashMap::new(),
            in_progress: HashMap::new(),
        }
    }

    /// Applies a `Set Chunk Size` control message. Only affects chunks read
    /// after this call, never a message already being reassembled.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size;
    }

    /// Reads one complete RTMP message, reassembling it across as many
    /// chunks as needed, honoring `chunk_size` fragmentation and
    /// interleaving between chunk stream ids.
    pub async fn read_packet<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        timeout: Duration,
    ) -> Result<RtmpPacket, ChunkError> {
        loop {
            let (csid, fmt) = read_basic_header(reader, timeout).await?;

            if !self.in_progress.contains_key(&csid) {
                let header = self.read_message_header(reader, timeout, csid, fmt).await?;

                let uses_extended_timestamp = header.timestamp >= 0xffffff;

                let mut header = header;
                if uses_extended_timestamp {
                    header.timestamp = read_extended_timestamp(reader, timeout).await?;
                }

                self.in_progress.insert(
                    csid,
                    InProgress {
                        header: header.clone(),
                        payload: Vec::with_capacity(header.length),
                        uses_extended_timestamp,
                    },
                );

                self.prev_headers.insert(csid, header);
            } else {
                // continuation chunk: the extended timestamp field (if the
                // original header used one) is repeated on every fragment,
                // but the in-progress message keeps its already-resolved
                // timestamp
                let uses_extended_timestamp =
                    self.in_progress.get(&csid).unwrap().uses_extended_timestamp;

                if uses_extended_timestamp {
                    read_extended_timestamp(reader, timeout).await?;
                }
            }

            let remaining = {
                let entry = self.in_progress.get(&csid).unwrap();
                entry.header.length - entry.payload.len()
            };

            let to_read = remaining.min(self.chunk_size.max(1));

            if to_read > 0 {
                let mut buf = vec![0u8; to_read];
                read_timeout(reader, &mut buf, timeout).await?;

                let entry = self.in_progress.get_mut(&csid).unwrap();
                entry.payload.extend_from_slice(&buf);
            }

            let complete = {
                let entry = self.in_progress.get(&csid).unwrap();
                entry.payload.len() >= entry.header.length
            };

            if complete {
                let entry = self.in_progress.remove(&csid).unwrap();

                let mut packet = RtmpPacket::new_blank();
                packet.header = entry.header;
                packet.payload = entry.payload;
                packet.bytes = packet.payload.len();

                return Ok(packet);
            }
        }
    }

    async fn read_message_header<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        timeout: Duration,
        csid: u32,
        fmt: u32,
    ) -> Result<RtmpPacketHeader, ChunkError> {
        if fmt == RTMP_CHUNK_TYPE_0 {
            let mut buf = [0u8; 11];
            read_timeout(reader, &mut buf, timeout).await?;

            let timestamp = BigEndian::read_u24(&buf[0..3]) as i64;
            let length = BigEndian::read_u24(&buf[3..6]) as usize;
            let packet_type = buf[6] as u32;
            let stream_id = LittleEndian::read_u32(&buf[7..11]);

            return Ok(RtmpPacketHeader {
                timestamp,
                format: fmt,
                channel_id: csid,
                packet_type,
                stream_id,
                length,
            });
        }

        let prev = self
            .prev_headers
            .get(&csid)
            .cloned()
            .ok_or(ChunkError::MissingPreviousHeader(csid))?;

        if fmt == RTMP_CHUNK_TYPE_1 {
            let mut buf = [0u8; 7];
            read_timeout(reader, &mut buf, timeout).await?;

            let delta = BigEndian::read_u24(&buf[0..3]) as i64;
            let length = BigEndian::read_u24(&buf[3..6]) as usize;
            let packet_type = buf[6] as u32;

            return Ok(RtmpPacketHeader {
                timestamp: prev.timestamp + delta,
                format: fmt,
                channel_id: csid,
                packet_type,
                stream_id: prev.stream_id,
                length,
            });
        }

        if fmt == RTMP_CHUNK_TYPE_2 {
            let mut buf = [0u8; 3];
            read_timeout(reader, &mut buf, timeout).await?;

            let delta = BigEndian::read_u24(&buf) as i64;

            return Ok(RtmpPacketHeader {
                timestamp: prev.timestamp + delta,
                format: fmt,
                channel_id: csid,
                packet_type: prev.packet_type,
                stream_id: prev.stream_id,
                length: prev.length,
            });
        }

        // fmt 3: reuses the previous header verbatim (a fresh message using
        // the same values as before, e.g. repeated-delta audio chunks)
        Ok(prev)
    }
}

/// Reads the 1-, 2-, or 3-byte basic header and returns `(chunk_stream_id, fmt)`
async fn read_basic_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<(u32, u32), ChunkError> {
    let mut b0 = [0u8; 1];
    read_timeout(reader, &mut b0, timeout).await?;

    let fmt = (b0[0] >> 6) as u32;
    let low = (b0[0] & 0x3f) as u32;

    let csid = if low == 0 {
        let mut b1 = [0u8; 1];
        read_timeout(reader, &mut b1, timeout).await?;
        b1[0] as u32 + 64
    } else if low == 1 {
        let mut b = [0u8; 2];
        read_timeout(reader, &mut b, timeout).await?;
        (b[1] as u32) * 256 + (b[0] as u32) + 64
    } else {
        low
    };

    Ok((csid, fmt))
}

async fn read_extended_timestamp<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<i64, ChunkError> {
    let mut buf = [0u8; 4];
    read_timeout(reader, &mut buf, timeout).await?;
    Ok(BigEndian::read_u32(&buf) as i64)
}

async fn read_timeout<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), ChunkError> {
    match tokio::time::timeout(timeout, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(ChunkError::ConnectionClosed),
        Err(_) => Err(ChunkError::ReadTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn basic_header(fmt: u32, csid: u32) -> Vec<u8> {
        RtmpPacket::serialize_basic_header(fmt, csid)
    }

    #[tokio::test]
    async fn test_decodes_single_chunk_type_0_message() {
        let mut packet = RtmpPacket::new_blank();
        packet.header.format = RTMP_CHUNK_TYPE_0;
        packet.header.channel_id = 3;
        packet.header.packet_type = 20;
        packet.header.stream_id = 1;
        packet.payload = vec![1, 2, 3, 4];
        packet.header.length = packet.payload.len();

        let wire = packet.create_chunks(128);

        let mut cursor = Cursor::new(wire);
        let mut reader = ChunkReader::new(128);

        let decoded = reader
            .read_packet(&mut cursor, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
        assert_eq!(decoded.header.channel_id, 3);
        assert_eq!(decoded.header.packet_type, 20);
        assert_eq!(decoded.header.stream_id, 1);
    }

    #[tokio::test]
    async fn test_decodes_message_fragmented_across_chunk_size() {
        let mut packet = RtmpPacket::new_blank();
        packet.header.format = RTMP_CHUNK_TYPE_0;
        packet.header.channel_id = 5;
        packet.header.packet_type = 9;
        packet.header.stream_id = 1;
        packet.payload = (0u8..200).collect();
        packet.header.length = packet.payload.len();

        let wire = packet.create_chunks(64);

        let mut cursor = Cursor::new(wire);
        let mut reader = ChunkReader::new(64);

        let decoded = reader
            .read_packet(&mut cursor, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(decoded.payload.len(), 200);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[tokio::test]
    async fn test_type_3_chunk_without_prior_header_is_rejected() {
        let wire = basic_header(3, 7);

        let mut cursor = Cursor::new(wire);
        let mut reader = ChunkReader::new(128);

        let err = reader
            .read_packet(&mut cursor, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ChunkError::MissingPreviousHeader(7)));
    }

    #[tokio::test]
    async fn test_read_timeout_on_empty_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = ChunkReader::new(128);

        let err = reader
            .read_packet(&mut cursor, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, ChunkError::ConnectionClosed));
    }
}
