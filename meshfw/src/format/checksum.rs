// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Checksums used by the vendor header formats.

/// Compute the byte-wise sum (mod 256) and the XOR of all bytes in `data`.
/// The 16-byte `MH01` headers store these two values over their first 14
/// bytes.
pub fn byte_sum_xor(data: &[u8]) -> (u8, u8) {
    data.iter()
        .fold((0u8, 0u8), |(sum, xor), &b| (sum.wrapping_add(b), xor ^ b))
}

/// Sum `data` as little-endian 16-bit words with an end-around carry. When
/// adding a word wraps the sum, the sum is incremented once.
///
/// If `data` has an odd length, the final byte is treated as a word whose
/// upper half is zero. Callers that need to match what the device firmware
/// computes for odd lengths must pass the following byte along with the data.
///
/// With `inverted`, `0xffff - sum` is returned instead. Storing that value in
/// a header makes the word sum over the whole header equal `0xffff`.
pub fn sum16_carry(data: &[u8], inverted: bool) -> u16 {
    let mut sum = 0u16;

    for chunk in data.chunks(2) {
        let word = u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]);

        sum = sum.wrapping_add(word);
        if sum < word {
            sum = sum.wrapping_add(1);
        }
    }

    if inverted { 0xffff - sum } else { sum }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sum_xor_wraps() {
        assert_eq!(byte_sum_xor(&[]), (0, 0));
        assert_eq!(byte_sum_xor(&[0x01, 0x02, 0x04]), (0x07, 0x07));
        assert_eq!(byte_sum_xor(&[0xff, 0x02]), (0x01, 0xfd));
    }

    #[test]
    fn sum16_end_around_carry() {
        assert_eq!(sum16_carry(&[], false), 0);
        assert_eq!(sum16_carry(&[0x34, 0x12, 0x78, 0x56], false), 0x68ac);
        assert_eq!(sum16_carry(&[0xff, 0xff, 0x02, 0x00], false), 0x0002);
        assert_eq!(sum16_carry(&[0x01, 0x80, 0x01, 0x80], false), 0x0003);
        assert_eq!(sum16_carry(&[0xff, 0xff, 0xff, 0xff], false), 0xffff);
    }

    #[test]
    fn sum16_inverted() {
        assert_eq!(sum16_carry(&[0x34, 0x12, 0x78, 0x56], true), 0x9753);

        // Appending the inverted sum makes the total come out to 0xffff.
        let mut data = vec![0x34, 0x12, 0x78, 0x56];
        data.extend_from_slice(&sum16_carry(&data, true).to_le_bytes());
        assert_eq!(sum16_carry(&data, false), 0xffff);
    }

    #[test]
    fn sum16_odd_length() {
        assert_eq!(sum16_carry(&[0x01, 0x02, 0x03], false), 0x0204);
    }
}
