//! In-process raster store
//!
//! Slices live in memory as one row-major plane per band. The store is a
//! cheap handle around shared state, so a clone kept outside a registry can
//! inspect what a run did: open handle count, voxels moved, and injected
//! write failures.

use super::{
    check_block_access, copy_block_to_plane, copy_plane_to_block, parse_slice_name, CreateSpec,
    PlaneGeometry, RasterDataset, RasterStore,
};
use crate::error::{Result, TransposeError};
use crate::metadata::SliceManifest;
use crate::options::CreationOptions;
use crate::strides::BlockLayout;
use crate::types::{DataType, GeoTransform, Statistics, Window};
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct MemorySlice {
    manifest: SliceManifest,
    planes: Vec<Vec<u8>>,
}

#[derive(Default)]
struct Shared {
    volumes: RwLock<HashMap<String, BTreeMap<usize, Arc<RwLock<MemorySlice>>>>>,
    failing_writes: RwLock<HashSet<String>>,
    open_handles: AtomicUsize,
    voxels_read: AtomicUsize,
    voxels_written: AtomicUsize,
}

/// Raster store keeping every slice in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub const DRIVER: &'static str = "MEM";

    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently open
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Voxels (elements of every band) read through `read_block`
    pub fn voxels_read(&self) -> usize {
        self.shared.voxels_read.load(Ordering::SeqCst)
    }

    /// Voxels written through `write_block`
    pub fn voxels_written(&self) -> usize {
        self.shared.voxels_written.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.shared.voxels_read.store(0, Ordering::SeqCst);
        self.shared.voxels_written.store(0, Ordering::SeqCst);
    }

    /// Make every block write to slice `name` fail
    pub fn fail_writes_to(&self, name: impl Into<String>) {
        self.shared.failing_writes.write().insert(name.into());
    }

    /// Number of slices of dataset `base`
    pub fn slice_count(&self, base: &str) -> usize {
        self.shared
            .volumes
            .read()
            .get(base)
            .map_or(0, |slices| slices.len())
    }

    fn handle(&self, name: &str, slice: Arc<RwLock<MemorySlice>>) -> MemoryDataset {
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        let fail_writes = self.shared.failing_writes.read().contains(name);
        debug!("Opened {}", name);
        MemoryDataset {
            name: name.to_string(),
            slice,
            shared: Arc::clone(&self.shared),
            fail_writes,
        }
    }
}

impl RasterStore for MemoryStore {
    fn driver_name(&self) -> &str {
        Self::DRIVER
    }

    fn identify(&self, name: &str) -> bool {
        let (base, _) = parse_slice_name(name);
        self.shared.volumes.read().contains_key(base)
    }

    fn open(&self, name: &str) -> Result<Box<dyn RasterDataset>> {
        let (base, index) = parse_slice_name(name);
        let slice = self
            .shared
            .volumes
            .read()
            .get(base)
            .and_then(|slices| slices.get(&index.unwrap_or(0)))
            .cloned()
            .ok_or_else(|| TransposeError::NotFound(name.to_string()))?;
        Ok(Box::new(self.handle(name, slice)))
    }

    fn create(
        &self,
        name: &str,
        spec: &CreateSpec,
        options: &CreationOptions,
    ) -> Result<Box<dyn RasterDataset>> {
        let (base, index) = parse_slice_name(name);
        let index = index.unwrap_or(0);
        let manifest = SliceManifest::create(spec, index, options)?;
        let plane_len = spec.width * spec.height * spec.data_type.size_in_bytes();
        let slice = Arc::new(RwLock::new(MemorySlice {
            manifest,
            planes: vec![vec![0u8; plane_len]; spec.bands],
        }));

        let mut volumes = self.shared.volumes.write();
        let slices = volumes.entry(base.to_string()).or_default();
        // slice 0 starts a new dataset
        if index == 0 {
            slices.clear();
        }
        slices.insert(index, Arc::clone(&slice));
        drop(volumes);
        Ok(Box::new(self.handle(name, slice)))
    }
}

/// Handle on one in-memory slice
pub struct MemoryDataset {
    name: String,
    slice: Arc<RwLock<MemorySlice>>,
    shared: Arc<Shared>,
    fail_writes: bool,
}

impl RasterDataset for MemoryDataset {
    fn driver_name(&self) -> &str {
        MemoryStore::DRIVER
    }

    fn size(&self) -> (usize, usize) {
        let slice = self.slice.read();
        (slice.manifest.width, slice.manifest.height)
    }

    fn band_count(&self) -> usize {
        self.slice.read().manifest.bands
    }

    fn data_type(&self) -> DataType {
        self.slice.read().manifest.data_type
    }

    fn block_size(&self) -> (usize, usize) {
        let slice = self.slice.read();
        (slice.manifest.block_x, slice.manifest.block_y)
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.slice.read().manifest.image_structure()
    }

    fn no_data(&self, band: usize) -> Option<f64> {
        self.slice.read().manifest.no_data.get(band).copied().flatten()
    }

    fn set_no_data(&mut self, band: usize, value: f64) -> Result<()> {
        let mut slice = self.slice.write();
        slice.manifest.check_band(band)?;
        slice.manifest.no_data[band] = Some(value);
        Ok(())
    }

    fn statistics(&self, band: usize) -> Option<Statistics> {
        self.slice.read().manifest.statistics.get(band).copied().flatten()
    }

    fn set_statistics(&mut self, band: usize, stats: Statistics) -> Result<()> {
        let mut slice = self.slice.write();
        slice.manifest.check_band(band)?;
        slice.manifest.statistics[band] = Some(stats);
        Ok(())
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.slice.read().manifest.geo_transform
    }

    fn set_geo_transform(&mut self, gt: GeoTransform) -> Result<()> {
        self.slice.write().manifest.geo_transform = Some(gt);
        Ok(())
    }

    fn projection(&self) -> Option<String> {
        self.slice.read().manifest.projection.clone()
    }

    fn set_projection(&mut self, projection: &str) -> Result<()> {
        self.slice.write().manifest.projection = Some(projection.to_string());
        Ok(())
    }

    fn read_block(&self, window: Window, buffer: &mut [u8], layout: &BlockLayout) -> Result<()> {
        let slice = self.slice.read();
        let m = &slice.manifest;
        let e = m.data_type.size_in_bytes();
        check_block_access(window, (m.width, m.height), m.bands, e, layout, buffer.len())?;

        let geometry = PlaneGeometry {
            x0: 0,
            y0: 0,
            width: m.width,
            element_size: e,
        };
        for (band, plane) in slice.planes.iter().enumerate() {
            copy_plane_to_block(
                plane,
                geometry,
                window,
                window,
                buffer,
                band * layout.band_stride,
                layout,
            );
        }
        self.shared
            .voxels_read
            .fetch_add(window.area() * m.bands, Ordering::SeqCst);
        Ok(())
    }

    fn write_block(&mut self, window: Window, buffer: &[u8], layout: &BlockLayout) -> Result<()> {
        if self.fail_writes {
            return Err(TransposeError::Store(format!(
                "injected write failure on {}",
                self.name
            )));
        }

        let mut slice = self.slice.write();
        let MemorySlice { manifest, planes } = &mut *slice;
        let e = manifest.data_type.size_in_bytes();
        check_block_access(
            window,
            (manifest.width, manifest.height),
            manifest.bands,
            e,
            layout,
            buffer.len(),
        )?;

        let geometry = PlaneGeometry {
            x0: 0,
            y0: 0,
            width: manifest.width,
            element_size: e,
        };
        for (band, plane) in planes.iter_mut().enumerate() {
            copy_block_to_plane(
                buffer,
                band * layout.band_stride,
                layout,
                window,
                window,
                plane,
                geometry,
            );
        }
        manifest.touch();
        self.shared
            .voxels_written
            .fetch_add(window.area() * manifest.bands, Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for MemoryDataset {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
        debug!("Closed {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{lookup, ZSIZE};
    use crate::store::slice_name;

    fn options(pairs: &[(&str, &str)]) -> CreationOptions {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_slice_zero_starts_new_dataset() {
        let store = MemoryStore::new();
        let spec = CreateSpec::new(2, 2, 1, DataType::U8);
        for z in 0..4 {
            store
                .create(&slice_name("cube", z), &spec, &options(&[("ZSIZE", "4")]))
                .unwrap();
        }
        assert_eq!(store.slice_count("cube"), 4);

        store
            .create(&slice_name("cube", 0), &spec, &options(&[("ZSIZE", "1")]))
            .unwrap();
        assert_eq!(store.slice_count("cube"), 1);
        assert!(matches!(
            store.open(&slice_name("cube", 3)),
            Err(TransposeError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_open_and_release() {
        let store = MemoryStore::new();
        let spec = CreateSpec::new(6, 4, 2, DataType::U16);
        {
            let handle = store
                .create(&slice_name("cube", 1), &spec, &options(&[("ZSIZE", "3")]))
                .unwrap();
            assert_eq!(handle.size(), (6, 4));
            assert_eq!(store.open_handles(), 1);
        }
        assert_eq!(store.open_handles(), 0);

        assert!(store.identify("cube"));
        assert!(store.identify("cube:SLICE:1"));
        assert!(!store.identify("sphere"));
        // only slice 1 exists
        assert!(matches!(store.open("cube"), Err(TransposeError::NotFound(_))));

        let handle = store.open(&slice_name("cube", 1)).unwrap();
        assert_eq!(lookup(&handle.metadata(), ZSIZE), Some("3"));
        assert_eq!(handle.band_count(), 2);
        handle.close().unwrap();
        assert_eq!(store.open_handles(), 0);
        assert_eq!(store.slice_count("cube"), 1);
    }

    #[test]
    fn test_block_round_trip_with_gaps() {
        let store = MemoryStore::new();
        let spec = CreateSpec::new(5, 5, 2, DataType::U8);
        let mut handle = store.create("img", &spec, &CreationOptions::new()).unwrap();

        // 2x2 window, pixel stride 2, band stride 16
        let layout = BlockLayout::new(2, 4, 16);
        let mut block = vec![0u8; 32];
        for (i, v) in block.iter_mut().enumerate() {
            *v = i as u8;
        }
        let window = Window::new(3, 1, 2, 2);
        handle.write_block(window, &block, &layout).unwrap();

        let mut back = vec![0u8; 32];
        handle.read_block(window, &mut back, &layout).unwrap();
        for band in 0..2 {
            for row in 0..2 {
                for col in 0..2 {
                    let at = layout.offset(col, row, band);
                    assert_eq!(back[at], block[at]);
                }
            }
        }
        assert_eq!(store.voxels_written(), 8);
        assert_eq!(store.voxels_read(), 8);
    }

    #[test]
    fn test_block_outside_raster_rejected() {
        let store = MemoryStore::new();
        let spec = CreateSpec::new(4, 4, 1, DataType::U8);
        let handle = store.create("img", &spec, &CreationOptions::new()).unwrap();
        let layout = BlockLayout::packed(1, 4, 4);
        let mut buffer = vec![0u8; 16];
        assert!(matches!(
            handle.read_block(Window::new(2, 0, 4, 4), &mut buffer, &layout),
            Err(TransposeError::OutOfBounds(_))
        ));
        assert_eq!(store.voxels_read(), 0);
    }

    #[test]
    fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes_to("bad:SLICE:0");
        let spec = CreateSpec::new(2, 2, 1, DataType::U8);
        let mut handle = store
            .create("bad:SLICE:0", &spec, &CreationOptions::new())
            .unwrap();
        let layout = BlockLayout::packed(1, 2, 2);
        assert!(matches!(
            handle.write_block(Window::new(0, 0, 2, 2), &[0u8; 4], &layout),
            Err(TransposeError::Store(_))
        ));
    }

    #[test]
    fn test_band_metadata() {
        let store = MemoryStore::new();
        let spec = CreateSpec::new(2, 2, 2, DataType::F32);
        let mut handle = store.create("m", &spec, &CreationOptions::new()).unwrap();
        handle.set_no_data(1, -9999.0).unwrap();
        handle
            .set_statistics(0, Statistics::new(0.0, 1.0, 0.5, 0.1))
            .unwrap();
        assert_eq!(handle.no_data(0), None);
        assert_eq!(handle.no_data(1), Some(-9999.0));
        assert_eq!(handle.statistics(0).map(|s| s.max), Some(1.0));
        assert!(handle.set_no_data(2, 0.0).is_err());
    }
}
