//! Stride arithmetic for the working buffer
//!
//! The working buffer holds one chunk as a 4-D array. Reads from the source
//! address it as (X, Y, Z-slot, Band) and writes to the destination address
//! the very same bytes as (X, Z, Y-slot, Band), which is just the line and
//! depth strides trading places.

/// The four byte strides of a buffer laid out as X, line, depth, band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStrides {
    pub pixel: usize,
    pub line: usize,
    pub depth: usize,
    pub band: usize,
}

impl BufferStrides {
    /// Compute strides for a nominal chunk shape
    ///
    /// `x_extent` elements make a line, `depth_extent` lines make a depth
    /// plane and `outer_extent` depth planes make a band. Always pass the
    /// nominal chunk sizes here, partial chunks only shrink the I/O window.
    pub fn new(
        element_size: usize,
        x_extent: usize,
        depth_extent: usize,
        outer_extent: usize,
    ) -> Self {
        let pixel = element_size;
        let line = x_extent * pixel;
        let depth = depth_extent * line;
        let band = outer_extent * depth;
        Self {
            pixel,
            line,
            depth,
            band,
        }
    }

    /// Total buffer size in bytes for `bands` bands
    pub fn buffer_len(&self, bands: usize) -> usize {
        self.band * bands
    }

    /// Orientation used to read source slices: rows are Y, slots are Z
    pub fn read_layout(&self) -> OrientedLayout {
        OrientedLayout {
            block: BlockLayout::new(self.pixel, self.line, self.band),
            slot_stride: self.depth,
        }
    }

    /// Orientation used to write destination slices: rows are Z, slots are Y
    pub fn write_layout(&self) -> OrientedLayout {
        OrientedLayout {
            block: BlockLayout::new(self.pixel, self.depth, self.band),
            slot_stride: self.line,
        }
    }
}

/// Strides of a banded 2-D block inside a caller buffer, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub pixel_stride: usize,
    pub line_stride: usize,
    pub band_stride: usize,
}

impl BlockLayout {
    pub fn new(pixel_stride: usize, line_stride: usize, band_stride: usize) -> Self {
        Self {
            pixel_stride,
            line_stride,
            band_stride,
        }
    }

    /// Densely packed layout: pixel interleaved lines, band sequential planes
    pub fn packed(element_size: usize, width: usize, height: usize) -> Self {
        let line = width * element_size;
        Self::new(element_size, line, line * height)
    }

    /// Byte offset of an element relative to the block origin
    pub fn offset(&self, col: usize, row: usize, band: usize) -> usize {
        band * self.band_stride + row * self.line_stride + col * self.pixel_stride
    }

    /// Number of buffer bytes touched by a `cols x rows x bands` access
    pub fn required_len(&self, cols: usize, rows: usize, bands: usize, element_size: usize) -> usize {
        if cols == 0 || rows == 0 || bands == 0 {
            return 0;
        }
        self.offset(cols - 1, rows - 1, bands - 1) + element_size
    }
}

/// A block layout plus the step between consecutive slots of the chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientedLayout {
    pub block: BlockLayout,
    pub slot_stride: usize,
}

impl OrientedLayout {
    /// Buffer offset of slot `index`
    pub fn slot_offset(&self, index: usize) -> usize {
        index * self.slot_stride
    }
}
