//! Zero-copy strided views over little-endian `u16` sample data.
//!
//! A view is a descriptor `(bytes, offset, stride, len)` into a record
//! buffer owned by the session. Nothing is copied until a caller asks for
//! a `Vec` explicitly.

use std::fmt;

use crate::parser::{self, SAMPLE_SIZE};

/// A one-dimensional run of `u16` values with a fixed byte stride.
#[derive(Clone, Copy)]
pub struct Samples<'a> {
    bytes: &'a [u8],
    offset: usize,
    stride: usize,
    len: usize,
}

impl<'a> Samples<'a> {
    /// Callers guarantee that all `len` elements lie within `bytes`.
    pub(crate) fn new(bytes: &'a [u8], offset: usize, stride: usize, len: usize) -> Self {
        debug_assert!(len == 0 || offset + (len - 1) * stride + SAMPLE_SIZE <= bytes.len());
        Self {
            bytes,
            offset,
            stride,
            len,
        }
    }

    pub(crate) fn contiguous(bytes: &'a [u8], offset: usize, len: usize) -> Self {
        Self::new(bytes, offset, SAMPLE_SIZE, len)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns element `index`, or `None` if out of range.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u16> {
        (index < self.len).then(|| self.at(index))
    }

    #[inline]
    fn at(&self, index: usize) -> u16 {
        parser::sample_at(self.bytes, self.offset, self.stride, index)
    }

    pub fn iter(&self) -> SamplesIter<'a> {
        SamplesIter {
            samples: *self,
            index: 0,
        }
    }

    /// Copies the values out.
    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().collect()
    }

    /// Byte distance between consecutive elements.
    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl<'a> IntoIterator for Samples<'a> {
    type Item = u16;
    type IntoIter = SamplesIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl PartialEq<[u16]> for Samples<'_> {
    fn eq(&self, other: &[u16]) -> bool {
        self.len == other.len() && self.iter().zip(other).all(|(a, &b)| a == b)
    }
}

impl fmt::Debug for Samples<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over a [`Samples`] view.
#[derive(Clone)]
pub struct SamplesIter<'a> {
    samples: Samples<'a>,
    index: usize,
}

impl Iterator for SamplesIter<'_> {
    type Item = u16;

    #[inline]
    fn next(&mut self) -> Option<u16> {
        let value = self.samples.get(self.index)?;
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.samples.len - self.index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for SamplesIter<'_> {}

/// A `rows x cols` matrix of `u16` samples; each row is contiguous and
/// consecutive rows are `row_stride` bytes apart.
#[derive(Clone, Copy)]
pub struct TraceMatrix<'a> {
    bytes: &'a [u8],
    offset: usize,
    row_stride: usize,
    rows: usize,
    cols: usize,
}

impl<'a> TraceMatrix<'a> {
    pub(crate) fn new(
        bytes: &'a [u8],
        offset: usize,
        row_stride: usize,
        rows: usize,
        cols: usize,
    ) -> Self {
        debug_assert!(
            rows == 0 || cols == 0 || offset + (rows - 1) * row_stride + cols * SAMPLE_SIZE <= bytes.len()
        );
        Self {
            bytes,
            offset,
            row_stride,
            rows,
            cols,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row(&self, index: usize) -> Option<Samples<'a>> {
        (index < self.rows).then(|| {
            Samples::contiguous(self.bytes, self.offset + index * self.row_stride, self.cols)
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u16> {
        self.row(row)?.get(col)
    }

    pub fn iter_rows(&self) -> impl ExactSizeIterator<Item = Samples<'a>> + 'a {
        let m = *self;
        (0..m.rows).map(move |i| {
            Samples::contiguous(m.bytes, m.offset + i * m.row_stride, m.cols)
        })
    }

    /// Copies the matrix out in row-major order.
    pub fn to_vec(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(self.rows * self.cols);
        for row in self.iter_rows() {
            out.extend(row);
        }
        out
    }
}

impl fmt::Debug for TraceMatrix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

/// Channel indices present in an event.
///
/// Full events carry every ADC channel in order; sparse events carry an
/// explicit list on the wire.
#[derive(Clone, Copy, Debug)]
pub enum TraceList<'a> {
    All(usize),
    Listed(Samples<'a>),
}

impl TraceList<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::All(n) => *n,
            Self::Listed(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// ADC channel number of the `index`-th trace.
    pub fn get(&self, index: usize) -> Option<u16> {
        match self {
            Self::All(n) => (index < *n).then_some(index as u16),
            Self::Listed(s) => s.get(index),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().collect()
    }
}
