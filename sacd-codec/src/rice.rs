// Rice (Golomb-Rice) decoding as used for DST filter coefficients and
// probability table entries: an adaptive-order code with an explicit sign
// bit when the magnitude is non-zero.

use crate::bitstream::BitReader;

/// Decode one Rice-coded value with parameter `m`: a unary run-length of
/// leading 0-bits terminated by a 1, `m` literal low bits, and (if the
/// reconstructed magnitude is non-zero) a trailing sign bit.
pub fn rice_decode(reader: &mut BitReader<'_>, m: u32) -> i32 {
    let mut run_length: u32 = 0;
    while reader.get_bit() == 0 {
        run_length += 1;
        if reader.past_end() {
            break;
        }
    }

    let lsbs = if m > 0 { reader.get_uint(m) } else { 0 };
    let nr = (run_length << m) + lsbs;

    if nr == 0 {
        0
    }
    else if reader.get_bit() == 1 {
        -(nr as i32)
    }
    else {
        nr as i32
    }
}

#[cfg(test)]
mod tests {
    use super::rice_decode;
    use crate::bitstream::BitReader;

    fn encode(run: u32, m: u32, lsbs: u32, sign_bit: Option<u32>) -> Vec<u8> {
        let mut bits = Vec::new();
        for _ in 0..run {
            bits.push(0);
        }
        bits.push(1);
        for i in (0..m).rev() {
            bits.push((lsbs >> i) & 1);
        }
        if let Some(s) = sign_bit {
            bits.push(s);
        }

        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, b) in bits.iter().enumerate() {
            if *b == 1 {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bytes
    }

    #[test]
    fn decodes_zero() {
        let bytes = encode(0, 3, 0, None);
        let mut r = BitReader::new(&bytes);
        assert_eq!(rice_decode(&mut r, 3), 0);
    }

    #[test]
    fn decodes_positive_and_negative() {
        let bytes = encode(2, 3, 5, Some(0));
        let mut r = BitReader::new(&bytes);
        assert_eq!(rice_decode(&mut r, 3), (2 << 3) + 5);

        let bytes = encode(2, 3, 5, Some(1));
        let mut r = BitReader::new(&bytes);
        assert_eq!(rice_decode(&mut r, 3), -((2 << 3) + 5));
    }
}
