// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Partition headers in recovery images.
//!
//! A recovery image is a sequence of `(header, payload)` pairs with no index.
//! Partitions are located by scanning for the device's magic string, so a
//! payload that happens to contain the magic is treated as a partition
//! boundary. This matches what the vendor tooling does.

use std::fmt;

use bstr::ByteSlice;
use memchr::memmem;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{format::checksum, util::Span};

/// Size of [`RawPartitionHeader`].
pub const PARTITION_HEADER_SIZE: usize = 80;

/// Maximum number of partitions that are located in an image. Scanning stops
/// once this many headers have been found.
pub const MAX_PARTITIONS: usize = 16;

/// Offset of [`RawPartitionHeader::header_checksum`]. The header checksum
/// covers every byte before it.
const HEADER_CHECKSUM_OFFSET: usize = PARTITION_HEADER_SIZE - 2;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No partition headers with magic {0:?} found")]
    NoPartitions(String),
    #[error("Partition header is truncated: {0} < {size} bytes", size = PARTITION_HEADER_SIZE)]
    Truncated(usize),
    #[error("Partition #{index}: Header at {offset:#x} overlaps next header at {next:#x}")]
    OverlappingHeaders {
        index: usize,
        offset: usize,
        next: usize,
    },
    #[error("Partition #{index}: Payload too large: {len} bytes")]
    PayloadTooLarge { index: usize, len: usize },
    #[error("Partition #{index}: Invalid span")]
    InvalidSpan {
        index: usize,
        #[source]
        source: crate::util::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the partition header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawPartitionHeader {
    /// Device magic, eg. `DLK6E6010001`.
    magic: [u8; 12],
    /// Unused. Always zero.
    reserved1: [u8; 2],
    /// [`checksum::sum16_carry`] of the payload.
    data_checksum: little_endian::U16,
    /// Vendor constant (`00 .. 00 01 00`).
    unknown: [u8; 12],
    /// Vendor constant that differs between firmware builds.
    build_stamp: [u8; 4],
    /// Flash offset where erasing starts.
    erase_start: little_endian::U32,
    /// Number of bytes to erase.
    erase_length: little_endian::U32,
    /// Flash offset where writing starts.
    write_start: little_endian::U32,
    /// Number of bytes to write. This is the payload size.
    write_length: little_endian::U32,
    /// Zero padding.
    padding: [u8; 16],
    /// Firmware header ID (`BH`).
    header_id: little_endian::U16,
    /// Firmware header major version.
    major_version: little_endian::U16,
    /// Firmware header minor version.
    minor_version: little_endian::U16,
    /// Firmware SID.
    sid: little_endian::U16,
    /// Firmware image info type.
    image_info_type: little_endian::U16,
    /// Unused.
    reserved2: little_endian::U16,
    /// Must match the device's fmid.
    fmid: little_endian::U16,
    /// Inverted [`checksum::sum16_carry`] of all preceding header bytes.
    header_checksum: little_endian::U16,
}

impl fmt::Debug for RawPartitionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPartitionHeader")
            .field("magic", &self.magic.as_bstr())
            .field("reserved1", &hex::encode(self.reserved1))
            .field("data_checksum", &format_args!("{:#06x}", self.data_checksum.get()))
            .field("unknown", &hex::encode(self.unknown))
            .field("build_stamp", &hex::encode(self.build_stamp))
            .field("erase_start", &format_args!("{:#010x}", self.erase_start.get()))
            .field("erase_length", &format_args!("{:#010x}", self.erase_length.get()))
            .field("write_start", &format_args!("{:#010x}", self.write_start.get()))
            .field("write_length", &self.write_length.get())
            .field("padding", &hex::encode(self.padding))
            .field("header_id", &format_args!("{:#06x}", self.header_id.get()))
            .field("major_version", &self.major_version.get())
            .field("minor_version", &self.minor_version.get())
            .field("sid", &self.sid.get())
            .field("image_info_type", &self.image_info_type.get())
            .field("reserved2", &format_args!("{:#06x}", self.reserved2.get()))
            .field("fmid", &format_args!("{:#06x}", self.fmid.get()))
            .field("header_checksum", &format_args!("{:#06x}", self.header_checksum.get()))
            .finish()
    }
}

/// Decoded partition header fields. Vendor constants and padding are omitted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PartitionHeader {
    pub magic: [u8; 12],
    pub data_checksum: u16,
    pub erase_start: u32,
    pub erase_length: u32,
    pub write_start: u32,
    pub payload_len: u32,
    pub header_id: u16,
    pub major_version: u16,
    pub minor_version: u16,
    pub sid: u16,
    pub image_info_type: u16,
    pub fmid: u16,
    pub header_checksum: u16,
}

impl fmt::Debug for PartitionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionHeader")
            .field("magic", &self.magic.as_bstr())
            .field("data_checksum", &format_args!("{:#06x}", self.data_checksum))
            .field("erase_start", &format_args!("{:#010x}", self.erase_start))
            .field("erase_length", &format_args!("{:#010x}", self.erase_length))
            .field("write_start", &format_args!("{:#010x}", self.write_start))
            .field("payload_len", &self.payload_len)
            .field("header_id", &format_args!("{:#06x}", self.header_id))
            .field("major_version", &self.major_version)
            .field("minor_version", &self.minor_version)
            .field("sid", &self.sid)
            .field("image_info_type", &self.image_info_type)
            .field("fmid", &format_args!("{:#06x}", self.fmid))
            .field("header_checksum", &format_args!("{:#06x}", self.header_checksum))
            .finish()
    }
}

impl From<&RawPartitionHeader> for PartitionHeader {
    fn from(raw: &RawPartitionHeader) -> Self {
        Self {
            magic: raw.magic,
            data_checksum: raw.data_checksum.get(),
            erase_start: raw.erase_start.get(),
            erase_length: raw.erase_length.get(),
            write_start: raw.write_start.get(),
            payload_len: raw.write_length.get(),
            header_id: raw.header_id.get(),
            major_version: raw.major_version.get(),
            minor_version: raw.minor_version.get(),
            sid: raw.sid.get(),
            image_info_type: raw.image_info_type.get(),
            fmid: raw.fmid.get(),
            header_checksum: raw.header_checksum.get(),
        }
    }
}

impl PartitionHeader {
    /// Decode the partition header at the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (raw, _) = RawPartitionHeader::read_from_prefix(buf)
            .map_err(|_| Error::Truncated(buf.len()))?;

        Ok(Self::from(&raw))
    }
}

/// Summary of a partition after its header was repaired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepairedPartition {
    /// Offset of the partition header in the image.
    pub offset: usize,
    /// Payload size written to the header.
    pub payload_len: u32,
    /// Data checksum written to the header.
    pub data_checksum: u16,
    /// Header checksum written to the header.
    pub header_checksum: u16,
}

/// Find the offsets of up to [`MAX_PARTITIONS`] partition headers in `image`.
/// A header may only start where at least one byte follows a full header.
/// Matches are allowed to overlap.
pub fn find_headers(image: &[u8], magic: &[u8]) -> Vec<usize> {
    let mut offsets = vec![];

    if magic.is_empty() || image.len() <= PARTITION_HEADER_SIZE {
        return offsets;
    }

    let start_limit = image.len() - PARTITION_HEADER_SIZE;
    let window = &image[..(start_limit - 1 + magic.len()).min(image.len())];
    let finder = memmem::Finder::new(magic);
    let mut pos = 0;

    while let Some(n) = finder.find(&window[pos..]) {
        let offset = pos + n;
        info!("Found partition header at {offset:#010x}");
        offsets.push(offset);

        if offsets.len() == MAX_PARTITIONS {
            warn!("Reached maximum of {MAX_PARTITIONS} partitions, stopping search");
            break;
        }

        pos = offset + 1;
    }

    offsets
}

fn log_checksum_update(name: &str, index: usize, old: u16, new: u16) {
    if old == new {
        info!("Keeping {name} checksum in partition #{index}: {old:#06x}");
    } else {
        info!("Updating {name} checksum in partition #{index} from {old:#06x} to {new:#06x}");
    }
}

/// Rewrite the payload length and both checksums of every partition header
/// found in `image`. Each partition extends to the next header, or to the end
/// of the image for the last one. The checksums are always recomputed, so
/// repairing an already repaired image changes nothing.
pub fn repair_headers(image: &mut [u8], magic: &[u8]) -> Result<Vec<RepairedPartition>> {
    let offsets = find_headers(image, magic);
    if offsets.is_empty() {
        return Err(Error::NoPartitions(magic.as_bstr().to_string()));
    }

    let mut repaired = Vec::with_capacity(offsets.len());

    for (index, &offset) in offsets.iter().enumerate() {
        let end = offsets.get(index + 1).copied().unwrap_or(image.len());
        let payload_len = end
            .checked_sub(offset + PARTITION_HEADER_SIZE)
            .ok_or(Error::OverlappingHeaders {
                index,
                offset,
                next: end,
            })?;
        let payload_len_u32 =
            u32::try_from(payload_len).map_err(|_| Error::PayloadTooLarge {
                index,
                len: payload_len,
            })?;

        // For odd sizes, the final word's upper half is the byte following the
        // payload (the next header's first byte), if there is one.
        let checksum_len = if payload_len % 2 == 1 && end < image.len() {
            payload_len + 1
        } else {
            payload_len
        };

        let header_span = Span::new(offset, PARTITION_HEADER_SIZE, image.len())
            .map_err(|source| Error::InvalidSpan { index, source })?;
        let data_span = Span::new(header_span.end(), checksum_len, image.len())
            .map_err(|source| Error::InvalidSpan { index, source })?;

        let mut raw = RawPartitionHeader::read_from_bytes(header_span.get(image))
            .map_err(|_| Error::Truncated(header_span.len()))?;
        trace!("Partition #{index} before repair: {raw:?}");

        let old_len = raw.write_length.get();
        if old_len != payload_len_u32 {
            info!(
                "Updating data length in partition #{index} from {old_len} ({old_len:#010x}) \
                to {payload_len_u32} ({payload_len_u32:#010x})",
            );
            raw.write_length = payload_len_u32.into();
        }

        let data_checksum = checksum::sum16_carry(data_span.get(image), false);
        log_checksum_update("data", index, raw.data_checksum.get(), data_checksum);
        raw.data_checksum = data_checksum.into();

        let header_checksum =
            checksum::sum16_carry(&raw.as_bytes()[..HEADER_CHECKSUM_OFFSET], true);
        log_checksum_update("header", index, raw.header_checksum.get(), header_checksum);
        raw.header_checksum = header_checksum.into();

        header_span.get_mut(image).copy_from_slice(raw.as_bytes());

        debug!("Partition #{index}: {:?}", PartitionHeader::from(&raw));

        repaired.push(RepairedPartition {
            offset,
            payload_len: payload_len_u32,
            data_checksum,
            header_checksum,
        });
    }

    Ok(repaired)
}
