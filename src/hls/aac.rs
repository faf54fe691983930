// AAC bitstream helpers for TS muxing (C7)
//
// RTMP carries raw AAC frames (no ADTS framing) plus a two-byte
// AudioSpecificConfig in the sequence header. MPEG-TS expects every AAC
// access unit framed with a 7-byte ADTS header, so this recovers the
// sampling rate / channel count once from the sequence header and stamps
// it onto every subsequent raw frame.

use crate::error::HlsError;

const ADTS_HEADER_LEN: usize = 7;

/// Sampling-frequency table index as used by `AudioSpecificConfig` and ADTS
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Clone, Copy, Debug, Default)]
pub struct AacConfig {
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AacConfig {
    /// Parses the two-byte `AudioSpecificConfig` body of an AAC sequence
    /// header, i.e. `payload[2..]` of an `aac_packet_type == 0` audio tag
    pub fn parse(data: &[u8]) -> Result<AacConfig, HlsError> {
        if data.len() < 2 {
            return Err(HlsError::InvalidAacSequenceHeader);
        }

        let sampling_frequency_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
        let channel_configuration = (data[1] >> 3) & 0x0f;

        if sampling_frequency_index as usize >= SAMPLE_RATES.len() {
            return Err(HlsError::InvalidAacSequenceHeader);
        }

        Ok(AacConfig {
            sampling_frequency_index,
            channel_configuration,
        })
    }

    /// Builds the 7-byte ADTS header for one raw AAC frame of `frame_len`
    /// bytes (the header itself not included in `frame_len`)
    pub fn adts_header(&self, frame_len: usize) -> [u8; ADTS_HEADER_LEN] {
        let full_len = (frame_len + ADTS_HEADER_LEN) as u32;

        [
            0xff,
            0xf1,
            ((1 << 6) | (self.sampling_frequency_index << 2) | (self.channel_configuration >> 2)) as u8,
            (((self.channel_configuration & 0x03) << 6) | ((full_len >> 11) & 0x03) as u8) as u8,
            ((full_len >> 3) & 0xff) as u8,
            (((full_len & 0x07) << 5) as u8) | 0x1f,
            0xfc,
        ]
    }

    /// Frames one raw AAC access unit with its ADTS header
    pub fn frame(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ADTS_HEADER_LEN + raw.len());
        out.extend_from_slice(&self.adts_header(raw.len()));
        out.extend_from_slice(raw);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_44100_stereo() {
        // audioObjectType=2 (AAC LC), samplingFrequencyIndex=4 (44100), channels=2
        let config = AacConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.channel_configuration, 2);
        assert_eq!(SAMPLE_RATES[config.sampling_frequency_index as usize], 44100);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert_eq!(AacConfig::parse(&[0x12]).unwrap_err(), HlsError::InvalidAacSequenceHeader);
    }

    #[test]
    fn test_adts_header_encodes_frame_length() {
        let config = AacConfig::parse(&[0x12, 0x10]).unwrap();
        let framed = config.frame(&[0xaa; 100]);

        assert_eq!(framed.len(), ADTS_HEADER_LEN + 100);
        assert_eq!(framed[0], 0xff);
        assert_eq!(framed[1], 0xf1);

        let full_len = ((framed[3] as u32 & 0x03) << 11) | ((framed[4] as u32) << 3) | ((framed[5] as u32) >> 5);
        assert_eq!(full_len as usize, ADTS_HEADER_LEN + 100);
    }
}
