// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! The three image transformations: repairing recovery image partition
//! headers, building a factory image, and unpacking a factory image back into
//! a recovery image.
//!
//! Factory image layout:
//!
//! ```text
//! VerificationHeader(len(block))
//! block:
//!     EncryptionHeader(len(container))
//!     "<32 hex digits of IV>\n"
//!     container:
//!         "Salted__" <8-byte salt>
//!         AES-128-CBC(
//!             VerificationHeader(len(recovery))
//!             recovery
//!             signature(recovery)
//!         )
//! signature(block)
//! ```

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    cipher,
    crypto::{self, SIGNATURE_LEN},
    device::{self, Device},
    format::{
        header::{self, HEADER_SIZE, HeaderKind, IV_LINE_SIZE},
        partition::{self, PARTITION_HEADER_SIZE, RepairedPartition},
    },
    util::{self, NumBytes, Span},
};

/// IV used for every factory image. The ASCII IV line in the image carries the
/// same value.
pub const FACTORY_IV: [u8; cipher::BLOCK_SIZE] = [
    0x99, 0x38, 0x0c, 0x25, 0xae, 0xcc, 0x79, 0xd3, 0x9b, 0x14, 0x5a, 0xc0, 0x43, 0x53, 0xbb, 0xe9,
];

/// Salt used by the vendor tooling. Using it makes factory images
/// reproducible.
pub const FACTORY_SALT: [u8; cipher::SALT_SIZE] = [0x65, 0xfc, 0x43, 0xbc, 0x67, 0xa3, 0x23, 0x35];

/// Smallest recovery image accepted when building a factory image.
pub const MIN_RECOVERY_SIZE: usize = 1024;

/// Broad failure category. The CLI exits with the same status for all of
/// them, but they are useful for diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Size,
    Io,
    Format,
    Crypto,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown device: {0:?}")]
    UnknownDevice(String),
    #[error("Input is too small for {operation}: {size:?} < {min:?}")]
    InputTooSmall {
        operation: Operation,
        size: NumBytes<u64>,
        min: NumBytes<u64>,
    },
    #[error("Invalid {0} span")]
    Span(&'static str, #[source] util::Error),
    #[error("Outer signature verification failed")]
    OuterSignature(#[source] crypto::Error),
    #[error("Inner signature verification failed")]
    InnerSignature(#[source] crypto::Error),
    #[error("Failed to write debug file: {0:?}")]
    DebugWrite(PathBuf, #[source] io::Error),
    #[error("Header error")]
    Header(#[from] header::Error),
    #[error("Partition error")]
    Partition(#[from] partition::Error),
    #[error("Cipher error")]
    Cipher(#[from] cipher::Error),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDevice(_) => ErrorKind::Argument,
            Self::InputTooSmall { .. } => ErrorKind::Size,
            Self::DebugWrite(..) => ErrorKind::Io,
            Self::Span(..) | Self::Header(_) | Self::Partition(_) => ErrorKind::Format,
            Self::OuterSignature(_) | Self::InnerSignature(_) | Self::Cipher(_) | Self::Crypto(_) => {
                ErrorKind::Crypto
            }
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Look up a device by name, failing with [`ErrorKind::Argument`].
pub fn lookup_device(name: &str) -> Result<&'static Device> {
    device::find(name).ok_or_else(|| Error::UnknownDevice(name.to_owned()))
}

/// Where the cipher salt for a new factory image comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaltMode {
    /// [`FACTORY_SALT`].
    #[default]
    Fixed,
    /// A fresh random salt.
    Random,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    /// Directory for intermediate buffers. Nothing is written if unset.
    pub debug_dir: Option<PathBuf>,
    pub salt: SaltMode,
}

impl PipelineConfig {
    fn write_debug_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let Some(dir) = &self.debug_dir else {
            return Ok(());
        };

        let path = dir.join(name);
        debug!("Writing {:?} to {path:?}", NumBytes(data.len()));

        fs::write(&path, data).map_err(|e| Error::DebugWrite(path, e))
    }

    pub fn debug_dir(&self) -> Option<&Path> {
        self.debug_dir.as_deref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    UpdateFirmwareHeader,
    CreateFactoryImage,
    DecryptFactoryImage,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UpdateFirmwareHeader => "UpdateFirmwareHeader",
            Self::CreateFactoryImage => "CreateFactoryImage",
            Self::DecryptFactoryImage => "DecryptFactoryImage",
        };

        f.write_str(name)
    }
}

impl Operation {
    pub const ALL: [Self; 3] = [
        Self::UpdateFirmwareHeader,
        Self::CreateFactoryImage,
        Self::DecryptFactoryImage,
    ];

    /// Smallest input file that the operation will accept.
    pub fn min_input_size(self) -> usize {
        match self {
            Self::UpdateFirmwareHeader => PARTITION_HEADER_SIZE,
            Self::CreateFactoryImage => MIN_RECOVERY_SIZE,
            Self::DecryptFactoryImage => 2 * (SIGNATURE_LEN + HEADER_SIZE) + MIN_RECOVERY_SIZE,
        }
    }

    /// One-line summary shown in the CLI help.
    pub fn description(self) -> &'static str {
        match self {
            Self::UpdateFirmwareHeader => "Fix partition header lengths and checksums",
            Self::CreateFactoryImage => "Encrypt and sign a recovery image",
            Self::DecryptFactoryImage => "Verify and decrypt a factory image",
        }
    }

    /// Reject inputs smaller than [`Self::min_input_size`].
    pub fn check_input_size(self, size: u64) -> Result<()> {
        let min = self.min_input_size() as u64;

        if size < min {
            return Err(Error::InputTooSmall {
                operation: self,
                size: NumBytes(size),
                min: NumBytes(min),
            });
        }

        Ok(())
    }

    /// Run the operation on `input` and return the output image.
    pub fn run(
        self,
        mut input: Vec<u8>,
        device: &Device,
        config: &PipelineConfig,
    ) -> Result<Vec<u8>> {
        self.check_input_size(input.len() as u64)?;

        match self {
            Self::UpdateFirmwareHeader => {
                repair_recovery_headers(&mut input, device)?;
                Ok(input)
            }
            Self::CreateFactoryImage => build_factory_image(&input, device, config),
            Self::DecryptFactoryImage => split_factory_image(&input, device),
        }
    }
}

/// Fix the payload length and checksums of every partition header in a
/// recovery image.
pub fn repair_recovery_headers(
    image: &mut [u8],
    device: &Device,
) -> Result<Vec<RepairedPartition>> {
    debug!("Repairing partition headers for {}", device.name);

    let repaired = partition::repair_headers(image, device.partition_magic.as_bytes())?;

    Ok(repaired)
}

/// Append `header`, `data`, and `signature` to `buf`.
fn push_signed(buf: &mut Vec<u8>, header: &[u8; HEADER_SIZE], data: &[u8], signature: &[u8]) {
    buf.reserve(HEADER_SIZE + data.len() + signature.len());
    buf.extend_from_slice(header);
    buf.extend_from_slice(data);
    buf.extend_from_slice(signature);
}

/// Sign, encrypt, and sign again a recovery image.
pub fn build_factory_image(
    recovery: &[u8],
    device: &Device,
    config: &PipelineConfig,
) -> Result<Vec<u8>> {
    debug!("Building factory image for {}", device.name);

    let key = device.signing_key()?;

    let inner_header = header::encode(HeaderKind::Verification, recovery.len())?;
    let inner_signature = crypto::sign(&key, recovery)?;
    config.write_debug_file("Sig1.bin", &inner_signature)?;

    let mut inner = Vec::new();
    push_signed(&mut inner, &inner_header, recovery, &inner_signature);
    config.write_debug_file("FW_and_Sig1.bin", &inner)?;

    let salt = match config.salt {
        SaltMode::Fixed => FACTORY_SALT,
        SaltMode::Random => cipher::random_salt(),
    };
    trace!("Using salt {}", hex::encode(salt));

    let container = cipher::encrypt(&inner, device.firmware_key.as_bytes(), &salt, &FACTORY_IV);
    config.write_debug_file("FWenc.bin", &container)?;

    let iv_line = header::encode_iv_line(&FACTORY_IV);
    config.write_debug_file("IV.bin", &iv_line)?;

    let mut block = Vec::with_capacity(HEADER_SIZE + IV_LINE_SIZE + container.len());
    block.extend_from_slice(&header::encode(HeaderKind::Encryption, container.len())?);
    block.extend_from_slice(&iv_line);
    block.extend_from_slice(&container);

    let outer_header = header::encode(HeaderKind::Verification, block.len())?;
    let outer_signature = crypto::sign(&key, &block)?;

    let mut image = Vec::new();
    push_signed(&mut image, &outer_header, &block, &outer_signature);
    trace!("Factory image is {:?}", NumBytes(image.len()));

    Ok(image)
}

/// Locate `(payload, signature)` following the verification header at the
/// start of `buf`.
fn signed_spans(buf: &[u8], name: &'static str) -> Result<(Span, Span)> {
    let len = header::decode_length(buf, HeaderKind::Verification)?;
    trace!("{name} payload is {:?}", NumBytes(len));

    let payload = Span::new(HEADER_SIZE, len, buf.len()).map_err(|e| Error::Span(name, e))?;
    let signature =
        Span::new(payload.end(), SIGNATURE_LEN, buf.len()).map_err(|e| Error::Span(name, e))?;

    if signature.end() != buf.len() {
        debug!(
            "Ignoring {:?} of trailing data after {name} signature",
            NumBytes(buf.len() - signature.end()),
        );
    }

    Ok((payload, signature))
}

/// Verify and decrypt a factory image, returning the recovery image.
pub fn split_factory_image(image: &[u8], device: &Device) -> Result<Vec<u8>> {
    debug!("Unpacking factory image for {}", device.name);

    let public_key = device.verifying_key()?;

    let (block_span, outer_sig_span) = signed_spans(image, "outer")?;
    let block = block_span.get(image);

    crypto::verify(&public_key, block, outer_sig_span.get(image))
        .map_err(Error::OuterSignature)?;
    debug!("Outer signature is valid");

    let container_len = header::decode_length(block, HeaderKind::Encryption)?;
    let iv_span =
        Span::new(HEADER_SIZE, IV_LINE_SIZE, block.len()).map_err(|e| Error::Span("IV", e))?;
    let container_span = Span::new(iv_span.end(), container_len, block.len())
        .map_err(|e| Error::Span("ciphertext", e))?;

    let iv = header::decode_iv_line(iv_span.get(block))?;
    trace!("IV: {}", hex::encode(iv));

    let inner = cipher::decrypt(
        container_span.get(block),
        device.firmware_key.as_bytes(),
        &iv,
    )?;
    debug!("Decrypted {:?}", NumBytes(inner.len()));

    let (recovery_span, inner_sig_span) = signed_spans(&inner, "inner")?;
    let recovery = recovery_span.get(&inner);

    crypto::verify(&public_key, recovery, inner_sig_span.get(&inner))
        .map_err(Error::InnerSignature)?;
    debug!("Inner signature is valid");

    Ok(recovery.to_vec())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn min_input_sizes() {
        assert_eq!(Operation::UpdateFirmwareHeader.min_input_size(), 80);
        assert_eq!(Operation::CreateFactoryImage.min_input_size(), 1024);
        assert_eq!(Operation::DecryptFactoryImage.min_input_size(), 1568);
    }

    #[test]
    fn size_gate() {
        let device = lookup_device("M32").unwrap();
        let config = PipelineConfig::default();

        let err = Operation::CreateFactoryImage
            .run(vec![0u8; 500], device, &config)
            .unwrap_err();
        assert_matches!(err, Error::InputTooSmall { .. });
        assert_eq!(err.kind(), ErrorKind::Size);

        Operation::CreateFactoryImage.check_input_size(1024).unwrap();
    }

    #[test]
    fn unknown_device() {
        let err = lookup_device("X99").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn truncated_factory_image() {
        let device = lookup_device("M30").unwrap();
        let recovery = vec![0x5au8; MIN_RECOVERY_SIZE];
        let image = build_factory_image(&recovery, device, &PipelineConfig::default()).unwrap();

        let err = split_factory_image(&image[..image.len() - 1], device).unwrap_err();
        assert_matches!(err, Error::Span("outer", _));
        assert_eq!(err.kind(), ErrorKind::Format);

        let mut bad_magic = image.clone();
        bad_magic[0] = b'X';
        let err = split_factory_image(&bad_magic, device).unwrap_err();
        assert_matches!(err, Error::Header(header::Error::InvalidMagic(_)));
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
