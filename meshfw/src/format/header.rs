// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use thiserror::Error;
use tracing::warn;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::checksum;

/// Magic value for [`RawHeader::magic`].
pub const HEADER_MAGIC: [u8; 4] = *b"MH01";

/// Size of a verification or encryption header.
pub const HEADER_SIZE: usize = 16;

/// Type tag stored after the length in a verification header (`00 01 00 00`).
const VERIFICATION_TAG: u32 = 0x0000_0100;

/// Type tag stored before the length in an encryption header (`21 00 00 00`).
/// The vendor's layout notes list `21 01 00 00` instead. Decoding ignores the
/// tag either way.
const ENCRYPTION_TAG: u32 = 0x0000_0021;

/// Marker stored in both header kinds.
const HEADER_MARKER: [u8; 2] = [0x2b, 0x1a];

/// Size of the ASCII IV line: 32 hex digits plus a line feed.
pub const IV_LINE_SIZE: usize = 33;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Header is truncated: {0} < {size} bytes", size = HEADER_SIZE)]
    Truncated(usize),
    #[error("Invalid header magic: {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("Payload too large for header: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("IV line is truncated: {0} < {size} bytes", size = IV_LINE_SIZE)]
    IvTruncated(usize),
    #[error("IV line is not valid hex")]
    IvNotHex(#[source] hex::FromHexError),
}

type Result<T> = std::result::Result<T, Error>;

/// Which of the two `MH01` header layouts a buffer uses. They differ only in
/// where the payload length is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderKind {
    /// Precedes data covered by a SHA-512 signature. Length at offset 4.
    Verification,
    /// Precedes the IV line and salted ciphertext. Length at offset 8.
    Encryption,
}

/// Raw on-disk layout for both header kinds.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    /// Magic value. This should be equal to [`HEADER_MAGIC`].
    magic: [u8; 4],
    /// Payload length for [`HeaderKind::Verification`], type tag otherwise.
    word_a: little_endian::U32,
    /// Type tag for [`HeaderKind::Verification`], payload length otherwise.
    word_b: little_endian::U32,
    /// Always [`HEADER_MARKER`].
    marker: [u8; 2],
    /// Sum of bytes 0-13.
    byte_sum: u8,
    /// XOR of bytes 0-13.
    byte_xor: u8,
}

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawHeader")
            .field("magic", &self.magic)
            .field("word_a", &format_args!("{:#010x}", self.word_a.get()))
            .field("word_b", &format_args!("{:#010x}", self.word_b.get()))
            .field("marker", &self.marker)
            .field("byte_sum", &format_args!("{:#04x}", self.byte_sum))
            .field("byte_xor", &format_args!("{:#04x}", self.byte_xor))
            .finish()
    }
}

/// Build a header of the given kind for a payload of `payload_len` bytes.
pub fn encode(kind: HeaderKind, payload_len: usize) -> Result<[u8; HEADER_SIZE]> {
    let len = u32::try_from(payload_len).map_err(|_| Error::PayloadTooLarge(payload_len))?;

    let (word_a, word_b) = match kind {
        HeaderKind::Verification => (len, VERIFICATION_TAG),
        HeaderKind::Encryption => (ENCRYPTION_TAG, len),
    };

    let mut raw = RawHeader {
        magic: HEADER_MAGIC,
        word_a: word_a.into(),
        word_b: word_b.into(),
        marker: HEADER_MARKER,
        byte_sum: 0,
        byte_xor: 0,
    };

    let (sum, xor) = checksum::byte_sum_xor(&raw.as_bytes()[..HEADER_SIZE - 2]);
    raw.byte_sum = sum;
    raw.byte_xor = xor;

    let mut buf = [0u8; HEADER_SIZE];
    buf.copy_from_slice(raw.as_bytes());

    Ok(buf)
}

/// Read the payload length from the header at the start of `buf`. Only the
/// magic is checked. The type tag, marker, and checksums are not validated.
pub fn decode_length(buf: &[u8], kind: HeaderKind) -> Result<usize> {
    let (raw, _) = RawHeader::read_from_prefix(buf).map_err(|_| Error::Truncated(buf.len()))?;

    if raw.magic != HEADER_MAGIC {
        return Err(Error::InvalidMagic(raw.magic));
    }

    let len = match kind {
        HeaderKind::Verification => raw.word_a.get(),
        HeaderKind::Encryption => raw.word_b.get(),
    };

    Ok(len as usize)
}

/// Render the IV as lowercase hex followed by a line feed.
pub fn encode_iv_line(iv: &[u8; 16]) -> [u8; IV_LINE_SIZE] {
    let mut buf = [0u8; IV_LINE_SIZE];
    // Cannot fail since the output size is exactly twice the input size.
    let _ = hex::encode_to_slice(iv, &mut buf[..IV_LINE_SIZE - 1]);
    buf[IV_LINE_SIZE - 1] = b'\n';

    buf
}

/// Parse the ASCII IV line at the start of `buf`.
pub fn decode_iv_line(buf: &[u8]) -> Result<[u8; 16]> {
    if buf.len() < IV_LINE_SIZE {
        return Err(Error::IvTruncated(buf.len()));
    }

    let mut iv = [0u8; 16];
    hex::decode_to_slice(&buf[..IV_LINE_SIZE - 1], &mut iv).map_err(Error::IvNotHex)?;

    if buf[IV_LINE_SIZE - 1] != b'\n' {
        warn!(
            "IV line is not terminated by a line feed: {:#04x}",
            buf[IV_LINE_SIZE - 1],
        );
    }

    Ok(iv)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn encode_verification() {
        let header = encode(HeaderKind::Verification, 100).unwrap();

        assert_eq!(
            header,
            [
                0x4d, 0x48, 0x30, 0x31, 0x64, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x2b,
                0x1a, 0xa0, 0x50,
            ],
        );
        assert_eq!(decode_length(&header, HeaderKind::Verification).unwrap(), 100);
    }

    #[test]
    fn encode_encryption() {
        let header = encode(HeaderKind::Encryption, 100).unwrap();

        assert_eq!(
            header,
            [
                0x4d, 0x48, 0x30, 0x31, 0x21, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x2b,
                0x1a, 0xc0, 0x70,
            ],
        );
        assert_eq!(decode_length(&header, HeaderKind::Encryption).unwrap(), 100);
    }

    #[test]
    fn checksum_pair_covers_first_14_bytes() {
        for kind in [HeaderKind::Verification, HeaderKind::Encryption] {
            for len in [0, 1, 0x1234_5678, u32::MAX as usize] {
                let header = encode(kind, len).unwrap();
                let (sum, xor) = checksum::byte_sum_xor(&header[..14]);

                assert_eq!(header[14], sum);
                assert_eq!(header[15], xor);
            }
        }
    }

    #[test]
    fn decode_rejects_bad_input() {
        let mut header = encode(HeaderKind::Verification, 1).unwrap();

        assert_matches!(
            decode_length(&header[..15], HeaderKind::Verification),
            Err(Error::Truncated(15))
        );

        header[3] = b'2';
        assert_matches!(
            decode_length(&header, HeaderKind::Verification),
            Err(Error::InvalidMagic(m)) if &m == b"MH02"
        );
    }

    #[test]
    fn encode_rejects_large_payload() {
        assert_matches!(
            encode(HeaderKind::Encryption, u32::MAX as usize + 1),
            Err(Error::PayloadTooLarge(_))
        );
    }

    #[test]
    fn iv_line() {
        let iv = [
            0x99, 0x38, 0x0c, 0x25, 0xae, 0xcc, 0x79, 0xd3, 0x9b, 0x14, 0x5a, 0xc0, 0x43, 0x53,
            0xbb, 0xe9,
        ];
        let line = encode_iv_line(&iv);

        assert_eq!(&line, b"99380c25aecc79d39b145ac04353bbe9\n");
        assert_eq!(decode_iv_line(&line).unwrap(), iv);

        assert_matches!(decode_iv_line(&line[..32]), Err(Error::IvTruncated(32)));

        let mut bad = line;
        bad[0] = b'x';
        assert_matches!(decode_iv_line(&bad), Err(Error::IvNotHex(_)));
    }
}
