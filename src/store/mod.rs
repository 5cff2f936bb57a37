//! Raster store contract
//!
//! The transpose engine never touches storage directly. It opens and creates
//! datasets through a [`RasterStore`] picked from an explicit
//! [`StoreRegistry`], and moves pixels with strided block reads and writes on
//! [`RasterDataset`] handles.
//!
//! A 3-D dataset is a stack of 2-D banded slices. Each slice is opened on its
//! own under the name `"<dataset>:SLICE:<index>"`; opening the bare dataset
//! name opens slice 0.

pub mod directory;
pub mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

use crate::error::{Result, TransposeError};
use crate::strides::BlockLayout;
use crate::types::{DataType, GeoTransform, Statistics, Window};
use crate::options::CreationOptions;
use std::sync::Arc;

/// Separator between a dataset name and a slice index
pub const SLICE_SEPARATOR: &str = ":SLICE:";

/// Name of slice `index` of dataset `base`
pub fn slice_name(base: &str, index: usize) -> String {
    format!("{}{}{}", base, SLICE_SEPARATOR, index)
}

/// Split a name into the dataset name and an optional slice index
///
/// A suffix that does not parse as an index is kept as part of the name.
pub fn parse_slice_name(name: &str) -> (&str, Option<usize>) {
    match name.rsplit_once(SLICE_SEPARATOR) {
        Some((base, index)) => match index.parse::<usize>() {
            Ok(i) => (base, Some(i)),
            Err(_) => (name, None),
        },
        None => (name, None),
    }
}

/// Shape and type of a slice to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSpec {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub data_type: DataType,
}

impl CreateSpec {
    pub fn new(width: usize, height: usize, bands: usize, data_type: DataType) -> Self {
        Self {
            width,
            height,
            bands,
            data_type,
        }
    }
}

/// A storage driver for tiled rasters
pub trait RasterStore: Send + Sync {
    /// Short driver name, e.g. `"TILEDIR"`
    fn driver_name(&self) -> &str;

    /// True if this store recognizes `name` as one of its datasets
    fn identify(&self, name: &str) -> bool;

    /// Open an existing slice, or slice 0 for a bare dataset name
    fn open(&self, name: &str) -> Result<Box<dyn RasterDataset>>;

    /// Create a new slice
    fn create(
        &self,
        name: &str,
        spec: &CreateSpec,
        options: &CreationOptions,
    ) -> Result<Box<dyn RasterDataset>>;
}

/// An open slice handle
///
/// Bands are indexed from 0. Block buffers hold elements of the dataset's
/// own data type, every band of the window is transferred. Dropping a handle
/// releases it; [`RasterDataset::close`] does the same but reports failures.
pub trait RasterDataset {
    fn driver_name(&self) -> &str;

    /// Raster size as (width, height)
    fn size(&self) -> (usize, usize);

    fn band_count(&self) -> usize;

    fn data_type(&self) -> DataType;

    /// Native tile size as (width, height)
    fn block_size(&self) -> (usize, usize);

    /// Image structure metadata
    fn metadata(&self) -> Vec<(String, String)>;

    fn no_data(&self, band: usize) -> Option<f64>;

    fn set_no_data(&mut self, band: usize, value: f64) -> Result<()>;

    fn statistics(&self, band: usize) -> Option<Statistics>;

    fn set_statistics(&mut self, band: usize, stats: Statistics) -> Result<()>;

    fn geo_transform(&self) -> Option<GeoTransform>;

    fn set_geo_transform(&mut self, gt: GeoTransform) -> Result<()>;

    fn projection(&self) -> Option<String>;

    fn set_projection(&mut self, projection: &str) -> Result<()>;

    /// Read `window` of every band into `buffer`, addressed by `layout`
    fn read_block(&self, window: Window, buffer: &mut [u8], layout: &BlockLayout) -> Result<()>;

    /// Write `window` of every band from `buffer`, addressed by `layout`
    fn write_block(&mut self, window: Window, buffer: &[u8], layout: &BlockLayout) -> Result<()>;

    /// Flush and release the handle
    fn close(self: Box<Self>) -> Result<()>;
}

/// Explicit set of raster stores available to a run
#[derive(Default, Clone)]
pub struct StoreRegistry {
    stores: Vec<Arc<dyn RasterStore>>,
}

impl StoreRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the on-disk directory store
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DirectoryStore::new());
        registry
    }

    /// Add a store; later lookups see stores in registration order
    pub fn register<S: RasterStore + 'static>(&mut self, store: S) -> &mut Self {
        self.stores.push(Arc::new(store));
        self
    }

    /// Names of the registered drivers
    pub fn drivers(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.driver_name()).collect()
    }

    /// Look up a store by driver name
    pub fn driver(&self, name: &str) -> Result<Arc<dyn RasterStore>> {
        self.stores
            .iter()
            .find(|s| s.driver_name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| TransposeError::DriverNotFound(name.to_string()))
    }

    /// Open a dataset with the first store that recognizes it
    pub fn open(&self, name: &str) -> Result<Box<dyn RasterDataset>> {
        self.stores
            .iter()
            .find(|s| s.identify(name))
            .ok_or_else(|| TransposeError::NotFound(name.to_string()))?
            .open(name)
    }
}

/// Validate a block access against a raster and a caller buffer
pub(crate) fn check_block_access(
    window: Window,
    raster: (usize, usize),
    bands: usize,
    element_size: usize,
    layout: &BlockLayout,
    buffer_len: usize,
) -> Result<()> {
    if !window.fits_within(raster.0, raster.1) {
        return Err(TransposeError::OutOfBounds(format!(
            "window {} outside {}x{} raster",
            window, raster.0, raster.1
        )));
    }
    if layout.pixel_stride < element_size {
        return Err(TransposeError::OutOfBounds(format!(
            "pixel stride {} smaller than element size {}",
            layout.pixel_stride, element_size
        )));
    }
    let required = layout.required_len(window.width, window.height, bands, element_size);
    if required > buffer_len {
        return Err(TransposeError::OutOfBounds(format!(
            "window {} with {} bands needs {} buffer bytes, {} given",
            window, bands, required, buffer_len
        )));
    }
    Ok(())
}

/// Position of a row-major single band plane in raster coordinates
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlaneGeometry {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub element_size: usize,
}

impl PlaneGeometry {
    fn row_start(&self, x: usize, y: usize) -> usize {
        ((y - self.y0) * self.width + (x - self.x0)) * self.element_size
    }
}

/// Copy `rect` of one band plane into a strided block whose origin is `window`
pub(crate) fn copy_plane_to_block(
    plane: &[u8],
    geometry: PlaneGeometry,
    rect: Window,
    window: Window,
    block: &mut [u8],
    band_offset: usize,
    layout: &BlockLayout,
) {
    let e = geometry.element_size;
    let run = rect.width * e;
    for y in rect.y..rect.y_end() {
        let src = geometry.row_start(rect.x, y);
        let dst = band_offset + layout.offset(rect.x - window.x, y - window.y, 0);
        if layout.pixel_stride == e {
            block[dst..dst + run].copy_from_slice(&plane[src..src + run]);
        } else {
            for i in 0..rect.width {
                let d = dst + i * layout.pixel_stride;
                block[d..d + e].copy_from_slice(&plane[src + i * e..src + (i + 1) * e]);
            }
        }
    }
}

/// Copy `rect` of a strided block whose origin is `window` into one band plane
pub(crate) fn copy_block_to_plane(
    block: &[u8],
    band_offset: usize,
    layout: &BlockLayout,
    window: Window,
    rect: Window,
    plane: &mut [u8],
    geometry: PlaneGeometry,
) {
    let e = geometry.element_size;
    let run = rect.width * e;
    for y in rect.y..rect.y_end() {
        let dst = geometry.row_start(rect.x, y);
        let src = band_offset + layout.offset(rect.x - window.x, y - window.y, 0);
        if layout.pixel_stride == e {
            plane[dst..dst + run].copy_from_slice(&block[src..src + run]);
        } else {
            for i in 0..rect.width {
                let s = src + i * layout.pixel_stride;
                plane[dst + i * e..dst + (i + 1) * e].copy_from_slice(&block[s..s + e]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_names() {
        assert_eq!(slice_name("/data/cube", 12), "/data/cube:SLICE:12");
        assert_eq!(parse_slice_name("/data/cube:SLICE:12"), ("/data/cube", Some(12)));
        assert_eq!(parse_slice_name("/data/cube"), ("/data/cube", None));
        assert_eq!(parse_slice_name("odd:SLICE:x"), ("odd:SLICE:x", None));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = StoreRegistry::new();
        registry.register(MemoryStore::new());
        assert_eq!(registry.drivers(), vec![MemoryStore::DRIVER]);
        assert!(registry.driver("mem").is_ok());
        assert!(matches!(
            registry.driver("TILEDIR"),
            Err(TransposeError::DriverNotFound(_))
        ));
        assert!(matches!(
            registry.open("missing"),
            Err(TransposeError::NotFound(_))
        ));
    }

    #[test]
    fn test_check_block_access() {
        let layout = BlockLayout::packed(2, 4, 4);
        let window = Window::new(2, 2, 4, 4);
        assert!(check_block_access(window, (6, 6), 1, 2, &layout, 32).is_ok());
        assert!(check_block_access(window, (5, 6), 1, 2, &layout, 32).is_err());
        assert!(check_block_access(window, (6, 6), 2, 2, &layout, 32).is_err());
    }

    #[test]
    fn test_plane_block_copies() {
        // 4x3 plane of u8 at raster origin (2, 1)
        let plane: Vec<u8> = (0..12).collect();
        let geometry = PlaneGeometry {
            x0: 2,
            y0: 1,
            width: 4,
            element_size: 1,
        };
        let window = Window::new(3, 2, 2, 2);
        // pixel stride 2 leaves gaps between elements
        let layout = BlockLayout::new(2, 4, 8);
        let mut block = vec![0xffu8; 8];
        copy_plane_to_block(&plane, geometry, window, window, &mut block, 0, &layout);
        assert_eq!(block, vec![5, 0xff, 6, 0xff, 9, 0xff, 10, 0xff]);

        let mut restored = vec![0u8; 12];
        copy_block_to_plane(&block, 0, &layout, window, window, &mut restored, geometry);
        assert_eq!(restored[5], 5);
        assert_eq!(restored[10], 10);
        assert_eq!(restored[0], 0);
    }
}
