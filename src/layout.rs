//! Volume description and chunk planning - how the volume is cut into bounded working blocks

use crate::error::{Result, TransposeError};
use crate::metadata::{lookup, ZSIZE};
use crate::store::RasterDataset;
use crate::strides::BufferStrides;
use crate::types::{DataType, GeoTransform, Statistics};
use std::fmt;

/// Everything the engine needs to know about a source volume
///
/// Band scalar metadata (no-data, statistics) is taken from the first band
/// only and later applied to every output band. That is a known
/// simplification, not a per-band mapping.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub x_size: usize,
    pub y_size: usize,
    pub z_size: usize,
    pub bands: usize,
    pub data_type: DataType,
    /// Native tile width
    pub tile_x: usize,
    /// Native tile height
    pub tile_y: usize,
    pub no_data: Option<f64>,
    pub statistics: Option<Statistics>,
    pub geo_transform: Option<GeoTransform>,
    pub projection: Option<String>,
    /// Image structure metadata, in store order
    pub metadata: Vec<(String, String)>,
}

impl VolumeDescriptor {
    /// Derive the descriptor from an opened source dataset
    ///
    /// Fails if the dataset does not advertise a positive `ZSIZE`.
    pub fn from_dataset(name: &str, dataset: &dyn RasterDataset) -> Result<Self> {
        let metadata = dataset.metadata();
        let z_size = match lookup(&metadata, ZSIZE) {
            Some(value) => value.trim().parse::<usize>().map_err(|_| {
                TransposeError::NotThreeDimensional(format!("{}: bad {} '{}'", name, ZSIZE, value))
            })?,
            None => return Err(TransposeError::NotThreeDimensional(name.to_string())),
        };
        if z_size == 0 {
            return Err(TransposeError::NotThreeDimensional(format!(
                "{}: {} is zero",
                name, ZSIZE
            )));
        }

        let (x_size, y_size) = dataset.size();
        let bands = dataset.band_count();
        if x_size == 0 || y_size == 0 || bands == 0 {
            return Err(TransposeError::InvalidFormat(format!(
                "{} has an empty extent: {}x{} with {} bands",
                name, x_size, y_size, bands
            )));
        }
        let (tile_x, tile_y) = dataset.block_size();

        Ok(Self {
            x_size,
            y_size,
            z_size,
            bands,
            data_type: dataset.data_type(),
            tile_x,
            tile_y,
            no_data: dataset.no_data(0),
            statistics: dataset.statistics(0),
            geo_transform: dataset.geo_transform(),
            projection: dataset.projection(),
            metadata,
        })
    }

    /// Extents in (X, Y, Z, Band) order
    pub fn extents(&self) -> [usize; 4] {
        [self.x_size, self.y_size, self.z_size, self.bands]
    }

    /// Total number of voxels across all bands
    pub fn total_voxels(&self) -> usize {
        self.extents().iter().product()
    }

    /// Geo-transform for the output slices
    ///
    /// The vertical resolution is scaled by Y/Z so the output rows cover the
    /// same vertical extent as the input rows did.
    pub fn output_geo_transform(&self) -> Option<GeoTransform> {
        self.geo_transform
            .map(|gt| gt.scale_y(self.y_size as f64 / self.z_size as f64))
    }

    /// Total volume size in bytes (uncompressed)
    pub fn total_size_bytes(&self) -> usize {
        self.total_voxels() * self.data_type.size_in_bytes()
    }

    /// Get a summary string of the volume
    pub fn summary(&self) -> String {
        format!(
            "{} x {} x {} volume, {} band(s) of {}, {}x{} tiles, {:.2} MB uncompressed",
            self.x_size,
            self.y_size,
            self.z_size,
            self.bands,
            self.data_type,
            self.tile_x,
            self.tile_y,
            self.total_size_bytes() as f64 / (1024.0 * 1024.0)
        )
    }
}

/// One step along an axis: absolute start and true extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: usize,
    pub len: usize,
}

impl ChunkRange {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Split `0..total` into steps of `step`, the last one holding the remainder
pub fn chunk_ranges(total: usize, step: usize) -> impl Iterator<Item = ChunkRange> {
    let step = step.max(1);
    (0..total).step_by(step).map(move |start| ChunkRange {
        start,
        len: step.min(total - start),
    })
}

/// Number of chunks needed to cover `total` with steps of `step`
pub fn chunk_count(total: usize, step: usize) -> usize {
    let step = step.max(1);
    (total + step - 1) / step
}

/// Working block shape: `bands x page_size x tile_y x tile_x` elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Output Y page size, also the Z chunk depth (`psz`)
    pub page_size: usize,
    /// Chunk width along X (`pszx`)
    pub tile_x: usize,
    /// Chunk height along Y (`pszy`)
    pub tile_y: usize,
    pub element_size: usize,
    pub bands: usize,
}

impl ChunkPlan {
    /// Build a plan from the source's native tiling and the resolved page size
    ///
    /// A chunk whose byte size does not fit in `usize` is an allocation
    /// failure, reported with the size saturated to `usize::MAX`.
    pub fn new(descriptor: &VolumeDescriptor, page_size: usize) -> Result<Self> {
        if page_size == 0 || descriptor.tile_x == 0 || descriptor.tile_y == 0 {
            return Err(TransposeError::InvalidFormat(format!(
                "chunk shape must be positive: page {}, tile {}x{}",
                page_size, descriptor.tile_x, descriptor.tile_y
            )));
        }
        let element_size = descriptor.data_type.size_in_bytes();

        // same order as the stride products, so no stride can overflow either
        [descriptor.tile_x, descriptor.tile_y, page_size, descriptor.bands]
            .iter()
            .try_fold(element_size, |bytes, &n| bytes.checked_mul(n))
            .ok_or(TransposeError::Allocation { bytes: usize::MAX })?;

        Ok(Self {
            page_size,
            tile_x: descriptor.tile_x,
            tile_y: descriptor.tile_y,
            element_size,
            bands: descriptor.bands,
        })
    }

    /// Strides of the working buffer, from the nominal chunk shape
    pub fn strides(&self) -> BufferStrides {
        BufferStrides::new(self.element_size, self.tile_x, self.tile_y, self.page_size)
    }

    /// Working buffer size in bytes
    pub fn buffer_len(&self) -> usize {
        self.strides().buffer_len(self.bands)
    }

    pub fn z_chunks(&self, z_size: usize) -> impl Iterator<Item = ChunkRange> {
        chunk_ranges(z_size, self.page_size)
    }

    pub fn y_chunks(&self, y_size: usize) -> impl Iterator<Item = ChunkRange> {
        chunk_ranges(y_size, self.tile_y)
    }

    pub fn x_chunks(&self, x_size: usize) -> impl Iterator<Item = ChunkRange> {
        chunk_ranges(x_size, self.tile_x)
    }

    /// Number of (Z, Y, X) chunks needed for a volume
    pub fn chunk_counts(&self, descriptor: &VolumeDescriptor) -> [usize; 3] {
        [
            chunk_count(descriptor.z_size, self.page_size),
            chunk_count(descriptor.y_size, self.tile_y),
            chunk_count(descriptor.x_size, self.tile_x),
        ]
    }
}

impl fmt::Display for ChunkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} x {} x {} chunk of {} byte elements",
            self.bands, self.page_size, self.tile_y, self.tile_x, self.element_size
        )
    }
}
