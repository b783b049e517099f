// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, ops::Range};

use num_traits::PrimInt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Span {offset}+{len} overflows")]
    Overflow { offset: usize, len: usize },
    #[error("Span {offset}..{end} exceeds buffer of {bound} bytes")]
    OutOfBounds {
        offset: usize,
        end: usize,
        bound: usize,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

/// An `(offset, length)` view into a buffer owned by someone else. The bounds
/// are checked once, when the span is created, against the length of the
/// buffer it will be applied to.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Span {
    offset: usize,
    len: usize,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.offset, self.offset + self.len)
    }
}

impl Span {
    /// Create a span that must fit within a buffer of `bound` bytes.
    pub fn new(offset: usize, len: usize, bound: usize) -> Result<Self> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::Overflow { offset, len })?;

        if end > bound {
            return Err(Error::OutOfBounds { offset, end, bound });
        }

        Ok(Self { offset, len })
    }

    pub fn len(self) -> usize {
        self.len
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Offset of the first byte after the span.
    pub fn end(self) -> usize {
        self.offset + self.len
    }

    pub fn range(self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Borrow the span from `buf`. `buf` must be the buffer (or one of at
    /// least the same length) that the span was validated against.
    pub fn get(self, buf: &[u8]) -> &[u8] {
        &buf[self.range()]
    }

    pub fn get_mut(self, buf: &mut [u8]) -> &mut [u8] {
        &mut buf[self.range()]
    }
}
