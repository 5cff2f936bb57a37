//! Chunked Y/Z transpose
//!
//! The volume is walked in chunks, Z outermost, then Y, then X. For each Z
//! chunk the source slices are opened once; for each Y chunk the matching
//! destination slices (one per source row) are created on the first Z chunk
//! and reopened on the following ones. Every X chunk
//! then fills the working buffer from the source slices and drains it into
//! the destination slices, with the two stride orientations of
//! [`BufferStrides`](crate::strides::BufferStrides) doing the actual swap.

use crate::config::TransposeConfig;
use crate::error::{Result, TransposeError};
use crate::layout::{ChunkPlan, ChunkRange, VolumeDescriptor};
use crate::options::CreationOptions;
use crate::store::{slice_name, CreateSpec, RasterDataset, RasterStore, StoreRegistry};
use crate::types::Window;
use crate::utils::format_bytes;
use log::{debug, info, log, Level};

/// What a finished run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransposeReport {
    pub z_chunks: usize,
    pub y_chunks: usize,
    pub x_chunks: usize,
    pub block_reads: usize,
    pub block_writes: usize,
    pub voxels_read: usize,
    pub voxels_written: usize,
    pub slices_created: usize,
    pub buffer_bytes: usize,
}

impl TransposeReport {
    pub fn summary(&self) -> String {
        format!(
            "{} slices written from {} x {} x {} chunks, {} voxels read, {} written, {} buffer",
            self.slices_created,
            self.z_chunks,
            self.y_chunks,
            self.x_chunks,
            self.voxels_read,
            self.voxels_written,
            format_bytes(self.buffer_bytes)
        )
    }
}

/// Slice handles scoped to one loop iteration
///
/// Dropping the set releases every handle, so an early return out of the
/// loop body cannot leak them.
struct SliceSet {
    handles: Vec<Box<dyn RasterDataset>>,
}

impl SliceSet {
    /// Open source slices `range` of dataset `base`
    fn open(store: &dyn RasterStore, base: &str, range: ChunkRange) -> Result<Self> {
        let mut handles = Vec::with_capacity(range.len);
        for index in range.start..range.end() {
            handles.push(store.open(&slice_name(base, index))?);
        }
        Ok(Self { handles })
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    /// Release all handles, reporting the first failure
    fn close(self) -> Result<()> {
        let mut result = Ok(());
        for handle in self.handles {
            if let Err(e) = handle.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Allocate the working buffer, failing instead of aborting
fn allocate_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| TransposeError::Allocation { bytes: len })?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// The transpose engine for one destination store and chunk plan
pub struct ChunkedTranspose<'a> {
    store: &'a dyn RasterStore,
    plan: ChunkPlan,
    options: CreationOptions,
    propagate_geo: bool,
    progress: Level,
}

impl<'a> ChunkedTranspose<'a> {
    pub fn new(store: &'a dyn RasterStore, plan: ChunkPlan, options: CreationOptions) -> Self {
        Self {
            store,
            plan,
            options,
            propagate_geo: false,
            progress: Level::Debug,
        }
    }

    /// Copy projection and the rescaled geo-transform to every output slice
    pub fn with_geo(mut self, propagate_geo: bool) -> Self {
        self.propagate_geo = propagate_geo;
        self
    }

    /// Report chunk progress at info level instead of debug
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.progress = if verbose { Level::Info } else { Level::Debug };
        self
    }

    /// Transpose dataset `source_name` into a new dataset `destination`
    ///
    /// Slices already written when an error surfaces stay on disk.
    pub fn transpose(
        &self,
        source: &VolumeDescriptor,
        source_name: &str,
        destination: &str,
    ) -> Result<TransposeReport> {
        let mut report = TransposeReport {
            buffer_bytes: self.plan.buffer_len(),
            ..Default::default()
        };
        let mut buffer = allocate_buffer(report.buffer_bytes)?;
        log!(self.progress, "Using a {} buffer", format_bytes(buffer.len()));

        let strides = self.plan.strides();
        let read = strides.read_layout();
        let write = strides.write_layout();

        for zc in self.plan.z_chunks(source.z_size) {
            report.z_chunks += 1;
            let sources = SliceSet::open(self.store, source_name, zc)?;

            for yc in self.plan.y_chunks(source.y_size) {
                report.y_chunks += 1;
                let first_pass = zc.start == 0;
                let mut targets = self.destination_slices(source, destination, yc, first_pass)?;
                if first_pass {
                    report.slices_created += targets.len();
                }

                for xc in self.plan.x_chunks(source.x_size) {
                    report.x_chunks += 1;
                    log!(
                        self.progress,
                        "Processing {},{},{}",
                        xc.start,
                        yc.start,
                        zc.start
                    );

                    let window = Window::new(xc.start, yc.start, xc.len, yc.len);
                    for (z, handle) in sources.handles.iter().enumerate() {
                        let offset = read.slot_offset(z);
                        handle.read_block(window, &mut buffer[offset..], &read.block)?;
                        report.block_reads += 1;
                        report.voxels_read += window.area() * source.bands;
                    }

                    let window = Window::new(xc.start, zc.start, xc.len, zc.len);
                    for (slot, handle) in targets.handles.iter_mut().enumerate() {
                        let offset = write.slot_offset(slot);
                        handle.write_block(window, &buffer[offset..], &write.block)?;
                        report.block_writes += 1;
                        report.voxels_written += window.area() * source.bands;
                    }
                }

                targets.close()?;
            }
            sources.close()?;
        }

        Ok(report)
    }

    /// Destination slices of Y chunk `range`
    ///
    /// The first Z chunk creates them and applies the band and geo metadata,
    /// later Z chunks reopen them to fill in their remaining rows.
    fn destination_slices(
        &self,
        source: &VolumeDescriptor,
        destination: &str,
        range: ChunkRange,
        create: bool,
    ) -> Result<SliceSet> {
        let spec = CreateSpec::new(source.x_size, source.z_size, source.bands, source.data_type);
        let geo_transform = source.output_geo_transform();
        let mut handles = Vec::with_capacity(range.len);

        for index in range.start..range.end() {
            let name = slice_name(destination, index);
            if !create {
                handles.push(self.store.open(&name)?);
                continue;
            }

            let mut handle = self.store.create(&name, &spec, &self.options)?;
            for band in 0..source.bands {
                if let Some(nd) = source.no_data {
                    handle.set_no_data(band, nd)?;
                }
                if let Some(stats) = source.statistics {
                    handle.set_statistics(band, stats)?;
                }
            }
            if self.propagate_geo {
                if let Some(projection) = &source.projection {
                    handle.set_projection(projection)?;
                }
                if let Some(gt) = geo_transform {
                    handle.set_geo_transform(gt)?;
                }
            }
            handles.push(handle);
        }
        Ok(SliceSet { handles })
    }
}

/// Run a complete transpose as configured
///
/// Resolves the driver, checks the source is a 3-D dataset of that driver,
/// derives the chunk plan and creation options and runs the engine.
pub fn transpose_volume(
    config: &TransposeConfig,
    registry: &StoreRegistry,
) -> Result<TransposeReport> {
    config.validate()?;
    let store = registry.driver(&config.driver)?;

    let source = registry.open(&config.source_path)?;
    if !source.driver_name().eq_ignore_ascii_case(store.driver_name()) {
        return Err(TransposeError::NotTiledRaster {
            path: config.source_path.clone(),
            expected: store.driver_name().to_string(),
            driver: source.driver_name().to_string(),
        });
    }
    let descriptor = VolumeDescriptor::from_dataset(&config.source_path, source.as_ref())?;
    source.close()?;
    info!("{}: {}", config.source_path, descriptor.summary());

    let plan = ChunkPlan::new(&descriptor, config.resolve_page_size(descriptor.tile_x))?;
    let options = CreationOptions::for_transpose(&descriptor, &plan);
    let level = if config.verbose { Level::Info } else { Level::Debug };
    for (key, value) in options.iter() {
        log!(level, "{}={}", key, value);
    }
    let [zn, yn, xn] = plan.chunk_counts(&descriptor);
    debug!("Chunk plan: {}, {} x {} x {} chunks", plan, zn, yn, xn);

    let report = ChunkedTranspose::new(store.as_ref(), plan, options)
        .with_geo(config.propagate_geo)
        .with_verbose(config.verbose)
        .transpose(&descriptor, &config.source_path, &config.destination_path)?;
    info!("{}: {}", config.destination_path, report.summary());
    Ok(report)
}
