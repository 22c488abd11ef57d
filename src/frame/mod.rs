//! Video frames and row-stride correction
//!
//! Platform capture surfaces hand out pixel rows padded to an alignment
//! boundary (`row_stride >= pixel_stride * width`). Everything downstream of a
//! capture source (pipeline, uploader, snapshot sink) expects tightly packed
//! rows, so frames are built here by copying the visible part of every row
//! into a pooled buffer.

pub mod pool;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::FrameError;
pub use pool::{create_shared_pool, FramePool, PooledBuffer, SharedFramePool};

/// Packed pixel layouts delivered by capture surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
    Rgb888,
}

impl PixelFormat {
    /// Bytes occupied by one pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => 4,
            PixelFormat::Rgb888 => 3,
        }
    }
}

/// Borrowed view of a platform image plane, possibly row-padded
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub pixel_stride: usize,
    pub format: PixelFormat,
}

impl<'a> ImageView<'a> {
    /// View over a tightly packed buffer
    pub fn packed(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Self {
        let pixel_stride = format.bytes_per_pixel();
        Self {
            data,
            width,
            height,
            row_stride: pixel_stride * width as usize,
            pixel_stride,
            format,
        }
    }
}

/// Bytes of padding at the end of each row.
pub fn row_padding(row_stride: usize, pixel_stride: usize, width: u32) -> Result<usize, FrameError> {
    let row_bytes = pixel_stride * width as usize;
    row_stride
        .checked_sub(row_bytes)
        .ok_or(FrameError::InvalidStride {
            row_stride,
            pixel_stride,
            width,
        })
}

/// Copy the visible pixels of `view` into `dst`, dropping row padding.
///
/// The last row is allowed to stop right after its visible pixels, which is
/// how most surfaces lay out their final row.
pub fn strip_padding(view: &ImageView<'_>, dst: &mut Vec<u8>) -> Result<(), FrameError> {
    if view.width == 0 || view.height == 0 {
        return Err(FrameError::Empty);
    }

    let padding = row_padding(view.row_stride, view.pixel_stride, view.width)?;
    let row_bytes = view.pixel_stride * view.width as usize;
    let height = view.height as usize;
    let expected = view.row_stride * (height - 1) + row_bytes;
    if view.data.len() < expected {
        return Err(FrameError::Truncated {
            expected,
            actual: view.data.len(),
        });
    }

    dst.clear();
    dst.reserve(row_bytes * height);

    if padding == 0 {
        dst.extend_from_slice(&view.data[..row_bytes * height]);
    } else {
        for row in 0..height {
            let start = row * view.row_stride;
            dst.extend_from_slice(&view.data[start..start + row_bytes]);
        }
    }

    Ok(())
}

/// A stride-corrected frame backed by a pooled buffer.
///
/// Dropping the frame returns its buffer to the pool. Consumers that need the
/// pixels past their `consume` call take a copy with [`Frame::to_bytes`].
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Always `pixel_stride * width` once the frame is built
    pub row_stride: usize,
    pub pixel_stride: usize,
    /// Per-source sequence number
    pub sequence: u64,
    /// Microseconds since the source started producing
    pub timestamp_us: u64,
    buffer: PooledBuffer,
}

impl Frame {
    /// Build a frame from a platform image, stripping row padding
    pub fn from_view(
        view: &ImageView<'_>,
        pool: &SharedFramePool,
        sequence: u64,
        timestamp_us: u64,
    ) -> Result<Self, FrameError> {
        let mut buffer = pool.acquire();
        strip_padding(view, buffer.as_mut_vec())?;

        Ok(Self {
            width: view.width,
            height: view.height,
            pixel_format: view.format,
            row_stride: view.pixel_stride * view.width as usize,
            pixel_stride: view.pixel_stride,
            sequence,
            timestamp_us,
            buffer,
        })
    }

    /// Tightly packed pixel data
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Padding left at the end of each row (zero for built frames)
    pub fn row_padding(&self) -> usize {
        self.row_stride - self.pixel_stride * self.width as usize
    }

    /// Copy the pixels out of the pooled buffer
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }

    /// Size of the pixel data in bytes
    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("row_stride", &self.row_stride)
            .field("sequence", &self.sequence)
            .field("size", &self.buffer.len())
            .finish()
    }
}

/// Hands out sequence numbers and timestamps for one source.
#[derive(Debug)]
pub struct FrameStamper {
    start: Instant,
    next_sequence: AtomicU64,
}

impl FrameStamper {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Next `(sequence, timestamp_us)` pair
    pub fn stamp(&self) -> (u64, u64) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp = self.start.elapsed().as_micros() as u64;
        (sequence, timestamp)
    }

    /// Number of frames stamped so far
    pub fn stamped(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }
}

impl Default for FrameStamper {
    fn default() -> Self {
        Self::new()
    }
}
