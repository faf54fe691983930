// AVC (H.264) bitstream helpers for TS muxing (C7)
//
// Parses the AVCDecoderConfigurationRecord carried in the AVC sequence
// header (`avc_packet_type == 0`) to recover SPS/PPS for Annex-B
// prepending, and converts AVCC length-prefixed NAL units (as carried in
// `avc_packet_type == 1` packets) to Annex-B start-code delimited NAL
// units for MPEG-TS PES payloads. Assumes a 4-byte NALU length prefix,
// true of every encoder this crate has been run against.

use crate::error::HlsError;

const ANNEXB_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// SPS/PPS pulled out of an AVC sequence header, kept around so every
/// keyframe's Annex-B access unit can be prefixed with them
#[derive(Clone, Debug, Default)]
pub struct AvcDecoderConfig {
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcDecoderConfig {
    /// Parses an AVCDecoderConfigurationRecord, i.e. `payload[5..]` of an
    /// `avc_packet_type == 0` video tag
    pub fn parse(data: &[u8]) -> Result<AvcDecoderConfig, HlsError> {
        if data.len() < 6 {
            return Err(HlsError::InvalidAvcSequenceHeader);
        }

        let num_sps = (data[5] & 0x1f) as usize;
        let mut pos = 6;
        let mut sps = Vec::with_capacity(num_sps);

        for _ in 0..num_sps {
            if pos + 2 > data.len() {
                return Err(HlsError::InvalidAvcSequenceHeader);
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if pos + len > data.len() {
                return Err(HlsError::InvalidAvcSequenceHeader);
            }
            sps.push(data[pos..pos + len].to_vec());
            pos += len;
        }

        if pos >= data.len() {
            return Err(HlsError::InvalidAvcSequenceHeader);
        }
        let num_pps = data[pos] as usize;
        pos += 1;
        let mut pps = Vec::with_capacity(num_pps);

        for _ in 0..num_pps {
            if pos + 2 > data.len() {
                return Err(HlsError::InvalidAvcSequenceHeader);
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if pos + len > data.len() {
                return Err(HlsError::InvalidAvcSequenceHeader);
            }
            pps.push(data[pos..pos + len].to_vec());
            pos += len;
        }

        Ok(AvcDecoderConfig { sps, pps })
    }

    /// Builds the Annex-B access unit for one NALU-carrying video tag,
    /// prefixing SPS/PPS when `is_keyframe` so a player tuning in mid-segment
    /// can decode from the first access unit
    pub fn annex_b_access_unit(&self, nalu_data: &[u8], is_keyframe: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(nalu_data.len() + 64);

        if is_keyframe {
            for sps in &self.sps {
                out.extend_from_slice(&ANNEXB_START_CODE);
                out.extend_from_slice(sps);
            }
            for pps in &self.pps {
                out.extend_from_slice(&ANNEXB_START_CODE);
                out.extend_from_slice(pps);
            }
        }

        let mut pos = 0;
        while pos + 4 <= nalu_data.len() {
            let len = u32::from_be_bytes([
                nalu_data[pos],
                nalu_data[pos + 1],
                nalu_data[pos + 2],
                nalu_data[pos + 3],
            ]) as usize;
            pos += 4;

            if pos + len > nalu_data.len() {
                break;
            }

            out.extend_from_slice(&ANNEXB_START_CODE);
            out.extend_from_slice(&nalu_data[pos..pos + len]);
            pos += len;
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config_bytes() -> Vec<u8> {
        let sps = [0x67, 0x42, 0x00, 0x1e];
        let pps = [0x68, 0xce, 0x3c, 0x80];

        let mut bytes = vec![0x01, 0x42, 0x00, 0x1e, 0xff, 0xe1];
        bytes.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&sps);
        bytes.push(0x01);
        bytes.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&pps);
        bytes
    }

    #[test]
    fn test_parse_extracts_one_sps_and_pps() {
        let config = AvcDecoderConfig::parse(&sample_config_bytes()).unwrap();
        assert_eq!(config.sps.len(), 1);
        assert_eq!(config.pps.len(), 1);
        assert_eq!(config.sps[0], vec![0x67, 0x42, 0x00, 0x1e]);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert_eq!(
            AvcDecoderConfig::parse(&[0x01, 0x42]).unwrap_err(),
            HlsError::InvalidAvcSequenceHeader
        );
    }

    #[test]
    fn test_annex_b_prefixes_sps_pps_only_on_keyframe() {
        let config = AvcDecoderConfig::parse(&sample_config_bytes()).unwrap();
        let nalu = [0x00, 0x00, 0x00, 0x02, 0x65, 0x88];

        let key_au = config.annex_b_access_unit(&nalu, true);
        assert_eq!(&key_au[0..4], &ANNEXB_START_CODE);
        assert!(key_au.windows(4).filter(|w| *w == ANNEXB_START_CODE).count() >= 3);

        let inter_au = config.annex_b_access_unit(&nalu, false);
        assert_eq!(inter_au.windows(4).filter(|w| *w == ANNEXB_START_CODE).count(), 1);
    }
}
