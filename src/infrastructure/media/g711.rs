//! G.711 μ-law (PCMU), the codec of the outbound audio track

use bytes::{BufMut, Bytes, BytesMut};

/// RTP payload type of PCMU
pub const PCMU_PAYLOAD_TYPE: u8 = 0;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

pub struct PcmuCodec;

impl PcmuCodec {
    pub fn encode(pcm: &[i16]) -> Bytes {
        let mut out = BytesMut::with_capacity(pcm.len());
        for &sample in pcm {
            out.put_u8(Self::encode_sample(sample));
        }
        out.freeze()
    }

    pub fn decode(ulaw: &[u8]) -> Vec<i16> {
        ulaw.iter().map(|&b| Self::decode_sample(b)).collect()
    }

    fn encode_sample(sample: i16) -> u8 {
        let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
        // widen first: i16::MIN has no positive counterpart
        let magnitude = (sample as i32).abs().min(CLIP) + BIAS;

        // Segment is the position of the highest set bit above bit 7
        let segment = (magnitude >> 7) as u8;
        let exponent = 7 - segment.leading_zeros() as u8;
        let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;

        !(sign | (exponent << 4) | mantissa)
    }

    fn decode_sample(byte: u8) -> i16 {
        let u = !byte;
        let exponent = ((u >> 4) & 0x07) as i32;
        let mantissa = (u & 0x0F) as i32;
        let magnitude = ((((mantissa << 3) + BIAS) << exponent) - BIAS) as i16;

        if u & 0x80 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_and_extremes() {
        assert_eq!(PcmuCodec::encode(&[0]).as_ref(), &[0xFF]);
        assert_eq!(PcmuCodec::decode(&[0xFF]), vec![0]);
        assert_eq!(PcmuCodec::decode(&[0x80]), vec![32124]);
        assert_eq!(PcmuCodec::decode(&[0x00]), vec![-32124]);

        // must not overflow on negation
        assert_eq!(PcmuCodec::encode(&[i16::MIN]).as_ref(), &[0x00]);
        assert_eq!(PcmuCodec::encode(&[i16::MAX]).as_ref(), &[0x80]);
    }

    #[test]
    fn test_quantization_error_is_bounded() {
        for sample in [-20000i16, -1000, -50, 50, 1000, 20000] {
            let decoded = PcmuCodec::decode(&PcmuCodec::encode(&[sample]))[0];
            let error = (decoded as i32 - sample as i32).abs();
            // step size grows with magnitude; 1/16 of the value plus bias is a safe ceiling
            assert!(error <= (sample as i32).abs() / 16 + 8, "{sample} -> {decoded}");
            assert_eq!(decoded.signum(), sample.signum());
        }
    }
}
