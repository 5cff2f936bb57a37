//! Core data types shared by the engine and the raster stores

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types a raster band can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
}

impl DataType {
    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Affine geo-transform, in the usual six coefficient order
///
/// `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Vertical resolution (coefficient 5)
    pub fn y_resolution(&self) -> f64 {
        self.0[5]
    }

    /// Copy of this transform with the vertical resolution multiplied by `factor`
    pub fn scale_y(&self, factor: f64) -> Self {
        let mut gt = self.0;
        gt[5] *= factor;
        Self(gt)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}

/// Band statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl Statistics {
    pub fn new(min: f64, max: f64, mean: f64, std_dev: f64) -> Self {
        Self {
            min,
            max,
            mean,
            std_dev,
        }
    }
}

/// A rectangular pixel window, in elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive end column
    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive end row
    pub fn y_end(&self) -> usize {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of elements covered by the window
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True if the window lies inside a raster of the given size
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.x_end() <= width && self.y_end() <= height
    }

    /// Overlap of two windows, if any
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let x_end = self.x_end().min(other.x_end());
        let y_end = self.y_end().min(other.y_end());
        if x < x_end && y < y_end {
            Some(Window::new(x, y, x_end - x, y_end - y))
        } else {
            None
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}
