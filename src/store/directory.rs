//! Directory backed raster store
//!
//! A dataset is a directory holding one sub-directory per slice:
//!
//! ```text
//! <dataset>/slice000000/manifest.json
//! <dataset>/slice000000/tiles/b0/r00000_c00000.tile
//! ```
//!
//! Every tile file is a full `block_x * block_y` element tile of one band,
//! encoded with the slice codec. Tiles never written read back as zeros.

use super::{
    check_block_access, copy_block_to_plane, copy_plane_to_block, parse_slice_name, CreateSpec,
    PlaneGeometry, RasterDataset, RasterStore,
};
use crate::compression::{get_codec, CompressionLevel, TileCodec};
use crate::error::{Result, TransposeError};
use crate::metadata::{ManifestVersion, SliceManifest};
use crate::options::CreationOptions;
use crate::strides::BlockLayout;
use crate::types::{DataType, GeoTransform, Statistics, Window};
use crate::utils::{parse_slice_dir_name, slice_dir_name, tile_path};
use bytes::Bytes;
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";

/// File access relative to one slice directory
struct SliceFiles {
    base_path: PathBuf,
}

impl SliceFiles {
    fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    /// Read a file, `None` if it does not exist
    fn read(&self, path: &str) -> Result<Option<Bytes>> {
        match fs::read(self.full_path(path)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TransposeError::Io(e)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        // Create parent directories if they don't exist
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, data)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.full_path(path).exists()
    }

    fn remove_dir(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.full_path(path)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(TransposeError::Io(e)),
            _ => Ok(()),
        }
    }
}

/// Raster store writing datasets as directories of compressed tiles
#[derive(Debug, Clone, Default)]
pub struct DirectoryStore {
    level: CompressionLevel,
}

impl DirectoryStore {
    pub const DRIVER: &'static str = "TILEDIR";

    pub fn new() -> Self {
        Self::default()
    }

    fn slice_files(base: &str, index: usize) -> SliceFiles {
        SliceFiles::new(Path::new(base).join(slice_dir_name(index)))
    }

    /// Remove the slice directories of `base` numbered `first` and above
    fn remove_slices_from(base: &str, first: usize) -> Result<()> {
        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(TransposeError::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            let index = entry.file_name().to_str().and_then(parse_slice_dir_name);
            if matches!(index, Some(i) if i >= first) {
                fs::remove_dir_all(entry.path())?;
                debug!("Removed stale slice {}", entry.path().display());
            }
        }
        Ok(())
    }
}

impl RasterStore for DirectoryStore {
    fn driver_name(&self) -> &str {
        Self::DRIVER
    }

    fn identify(&self, name: &str) -> bool {
        let (base, index) = parse_slice_name(name);
        Self::slice_files(base, index.unwrap_or(0)).exists(MANIFEST_FILE)
    }

    fn open(&self, name: &str) -> Result<Box<dyn RasterDataset>> {
        let (base, index) = parse_slice_name(name);
        let files = Self::slice_files(base, index.unwrap_or(0));
        let raw = files
            .read(MANIFEST_FILE)?
            .ok_or_else(|| TransposeError::NotFound(name.to_string()))?;
        let manifest: SliceManifest = serde_json::from_slice(&raw)
            .map_err(|e| TransposeError::Metadata(format!("{}: {}", name, e)))?;
        if !manifest.version.is_compatible(&ManifestVersion::CURRENT) {
            return Err(TransposeError::InvalidFormat(format!(
                "{}: manifest version {}.{} not supported",
                name, manifest.version.major, manifest.version.minor
            )));
        }

        debug!("Opened {} ({})", name, files.base_path.display());
        Ok(Box::new(DirectoryDataset::new(
            name,
            files,
            manifest,
            self.level,
            false,
        )))
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
        let files = Self::slice_files(base, index);

        // Creating over an existing slice replaces it, and slice 0 starts a
        // new dataset
        files.remove_dir("tiles")?;
        if index == 0 {
            Self::remove_slices_from(base, 1)?;
        }
        let mut dataset = DirectoryDataset::new(name, files, manifest, self.level, true);
        dataset.flush()?;

        debug!("Created {} ({}x{}x{} {})", name, spec.width, spec.height, spec.bands, spec.data_type);
        Ok(Box::new(dataset))
    }
}

/// Handle on one slice directory
pub struct DirectoryDataset {
    name: String,
    files: SliceFiles,
    manifest: SliceManifest,
    codec: Box<dyn TileCodec>,
    level: CompressionLevel,
    dirty: bool,
}

impl DirectoryDataset {
    fn new(
        name: &str,
        files: SliceFiles,
        manifest: SliceManifest,
        level: CompressionLevel,
        dirty: bool,
    ) -> Self {
        let codec = get_codec(manifest.compression);
        Self {
            name: name.to_string(),
            files,
            manifest,
            codec,
            level,
            dirty,
        }
    }

    /// Write the manifest if it changed
    fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.manifest.touch();
            let json = serde_json::to_vec_pretty(&self.manifest)?;
            self.files.write(MANIFEST_FILE, &json)?;
            self.dirty = false;
        }
        Ok(())
    }

    fn element_size(&self) -> usize {
        self.manifest.data_type.size_in_bytes()
    }

    fn tile_geometry(&self, col: usize, row: usize) -> PlaneGeometry {
        PlaneGeometry {
            x0: col * self.manifest.block_x,
            y0: row * self.manifest.block_y,
            width: self.manifest.block_x,
            element_size: self.element_size(),
        }
    }

    /// Tiles overlapping `window`, with the overlap, as (col, row, rect)
    fn tiles_in(&self, window: Window) -> Vec<(usize, usize, Window)> {
        let (bx, by) = (self.manifest.block_x, self.manifest.block_y);
        if window.is_empty() {
            return Vec::new();
        }
        let mut tiles = Vec::new();
        for row in window.y / by..=(window.y_end() - 1) / by {
            for col in window.x / bx..=(window.x_end() - 1) / bx {
                let tile = Window::new(col * bx, row * by, bx, by);
                if let Some(rect) = tile.intersect(&window) {
                    tiles.push((col, row, rect));
                }
            }
        }
        tiles
    }

    fn read_tile(&self, band: usize, col: usize, row: usize) -> Result<Option<Vec<u8>>> {
        match self.files.read(&tile_path(band, row, col))? {
            Some(data) => Ok(Some(self.codec.decode(&data, self.manifest.tile_bytes())?)),
            None => Ok(None),
        }
    }

    fn write_tile(&self, band: usize, col: usize, row: usize, tile: &[u8]) -> Result<()> {
        let encoded = self.codec.encode(tile, self.level)?;
        self.files.write(&tile_path(band, row, col), &encoded)
    }
}

impl RasterDataset for DirectoryDataset {
    fn driver_name(&self) -> &str {
        DirectoryStore::DRIVER
    }

    fn size(&self) -> (usize, usize) {
        (self.manifest.width, self.manifest.height)
    }

    fn band_count(&self) -> usize {
        self.manifest.bands
    }

    fn data_type(&self) -> DataType {
        self.manifest.data_type
    }

    fn block_size(&self) -> (usize, usize) {
        (self.manifest.block_x, self.manifest.block_y)
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.manifest.image_structure()
    }

    fn no_data(&self, band: usize) -> Option<f64> {
        self.manifest.no_data.get(band).copied().flatten()
    }

    fn set_no_data(&mut self, band: usize, value: f64) -> Result<()> {
        self.manifest.check_band(band)?;
        self.manifest.no_data[band] = Some(value);
        self.dirty = true;
        Ok(())
    }

    fn statistics(&self, band: usize) -> Option<Statistics> {
        self.manifest.statistics.get(band).copied().flatten()
    }

    fn set_statistics(&mut self, band: usize, stats: Statistics) -> Result<()> {
        self.manifest.check_band(band)?;
        self.manifest.statistics[band] = Some(stats);
        self.dirty = true;
        Ok(())
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.manifest.geo_transform
    }

    fn set_geo_transform(&mut self, gt: GeoTransform) -> Result<()> {
        self.manifest.geo_transform = Some(gt);
        self.dirty = true;
        Ok(())
    }

    fn projection(&self) -> Option<String> {
        self.manifest.projection.clone()
    }

    fn set_projection(&mut self, projection: &str) -> Result<()> {
        self.manifest.projection = Some(projection.to_string());
        self.dirty = true;
        Ok(())
    }

    fn read_block(&self, window: Window, buffer: &mut [u8], layout: &BlockLayout) -> Result<()> {
        let e = self.element_size();
        check_block_access(
            window,
            self.size(),
            self.manifest.bands,
            e,
            layout,
            buffer.len(),
        )?;

        let empty = vec![0u8; self.manifest.tile_bytes()];
        for (col, row, rect) in self.tiles_in(window) {
            let geometry = self.tile_geometry(col, row);
            for band in 0..self.manifest.bands {
                let tile = self.read_tile(band, col, row)?;
                copy_plane_to_block(
                    tile.as_deref().unwrap_or(&empty),
                    geometry,
                    rect,
                    window,
                    buffer,
                    band * layout.band_stride,
                    layout,
                );
            }
        }
        Ok(())
    }

    fn write_block(&mut self, window: Window, buffer: &[u8], layout: &BlockLayout) -> Result<()> {
        let e = self.element_size();
        check_block_access(
            window,
            self.size(),
            self.manifest.bands,
            e,
            layout,
            buffer.len(),
        )?;

        let (bx, by) = (self.manifest.block_x, self.manifest.block_y);
        for (col, row, rect) in self.tiles_in(window) {
            let geometry = self.tile_geometry(col, row);
            let whole_tile = rect.width == bx && rect.height == by;
            for band in 0..self.manifest.bands {
                let existing = if whole_tile {
                    None
                } else {
                    self.read_tile(band, col, row)?
                };
                let mut tile =
                    existing.unwrap_or_else(|| vec![0u8; self.manifest.tile_bytes()]);

                copy_block_to_plane(
                    buffer,
                    band * layout.band_stride,
                    layout,
                    window,
                    rect,
                    &mut tile,
                    geometry,
                );
                self.write_tile(band, col, row, &tile)?;
            }
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.flush()
    }
}

impl Drop for DirectoryDataset {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to write manifest of {}: {}", self.name, e);
        }
    }
}
