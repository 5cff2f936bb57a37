//! End-to-end transposition through the on-disk directory store

use ndarray::{Array4, Axis};
use std::path::Path;
use tempfile::TempDir;
use volswap::metadata::lookup;
use volswap::store::slice_name;
use volswap::{
    transpose_volume, BlockLayout, CreateSpec, CreationOptions, DataType, DirectoryStore,
    GeoTransform, MemoryStore, RasterStore, Statistics, StoreRegistry, TransposeConfig,
    TransposeError, Window,
};

fn path_str(dir: &Path, name: &str) -> String {
    dir.join(name).to_str().unwrap().to_string()
}

/// Element types the helpers can move in and out of byte buffers
trait Sample: Copy {
    const TYPE: DataType;
    fn to_bytes(self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Self;
}

impl Sample for f32 {
    const TYPE: DataType = DataType::F32;
    fn to_bytes(self) -> Vec<u8> {
        self.to_ne_bytes().to_vec()
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        f32::from_ne_bytes(bytes.try_into().unwrap())
    }
}

impl Sample for f64 {
    const TYPE: DataType = DataType::F64;
    fn to_bytes(self) -> Vec<u8> {
        self.to_ne_bytes().to_vec()
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        f64::from_ne_bytes(bytes.try_into().unwrap())
    }
}

/// Write a (band, z, y, x) volume as a 3-D dataset
fn write_volume<T: Sample>(
    store: &DirectoryStore,
    base: &str,
    volume: &Array4<T>,
    tile: (usize, usize),
    extra: &[(&str, &str)],
) {
    let (bands, zs, ys, xs) = volume.dim();
    let e = T::TYPE.size_in_bytes();
    let spec = CreateSpec::new(xs, ys, bands, T::TYPE);
    let mut options: CreationOptions = extra.iter().copied().collect();
    options.set("BLOCKXSIZE", tile.0.to_string());
    options.set("BLOCKYSIZE", tile.1.to_string());
    options.set("ZSIZE", zs.to_string());

    let layout = BlockLayout::packed(e, xs, ys);
    for z in 0..zs {
        let bytes: Vec<u8> = volume
            .index_axis(Axis(1), z)
            .iter()
            .flat_map(|v| v.to_bytes())
            .collect();
        let mut handle = store.create(&slice_name(base, z), &spec, &options).unwrap();
        handle
            .write_block(Window::new(0, 0, xs, ys), &bytes, &layout)
            .unwrap();
        handle.close().unwrap();
    }
}

/// Read a 3-D dataset back as (band, slice, row, x)
fn read_volume<T: Sample>(store: &DirectoryStore, base: &str) -> Array4<T> {
    let first = store.open(base).unwrap();
    assert_eq!(first.data_type(), T::TYPE);
    let slices: usize = lookup(&first.metadata(), "ZSIZE").unwrap().parse().unwrap();
    let (xs, rows) = first.size();
    let bands = first.band_count();
    drop(first);

    let e = T::TYPE.size_in_bytes();
    let layout = BlockLayout::packed(e, xs, rows);
    let mut values = Vec::with_capacity(slices * bands * rows * xs);
    for s in 0..slices {
        let handle = store.open(&slice_name(base, s)).unwrap();
        let mut bytes = vec![0u8; bands * rows * xs * e];
        handle
            .read_block(Window::new(0, 0, xs, rows), &mut bytes, &layout)
            .unwrap();
        values.extend(bytes.chunks_exact(e).map(T::from_bytes));
    }
    Array4::from_shape_vec((slices, bands, rows, xs), values)
        .unwrap()
        .permuted_axes([1, 0, 2, 3])
}

fn sample_volume(bands: usize, zs: usize, ys: usize, xs: usize) -> Array4<f32> {
    Array4::from_shape_fn((bands, zs, ys, xs), |(b, z, y, x)| {
        (b * 100_000 + z * 1000 + y * 10 + x) as f32 * 0.5 - 7.25
    })
}

#[test]
fn test_transpose_matches_axis_permutation() {
    let temp_dir = TempDir::new().unwrap();
    let store = DirectoryStore::new();
    let source = path_str(temp_dir.path(), "cube");
    let target = path_str(temp_dir.path(), "cube_yz");

    let volume = sample_volume(2, 5, 7, 10);
    write_volume(&store, &source, &volume, (4, 3), &[("COMPRESS", "ZSTD")]);

    let config = TransposeConfig::new(&source, &target).with_page_size(2);
    let report = transpose_volume(&config, &StoreRegistry::with_defaults()).unwrap();
    assert_eq!(report.slices_created, 7);
    assert_eq!(report.voxels_read, volume.len());
    assert_eq!(report.voxels_written, volume.len());

    let out = store.open(&target).unwrap();
    assert_eq!(out.size(), (10, 5));
    assert_eq!(out.block_size(), (4, 2));
    drop(out);

    let expected = volume.view().permuted_axes([0, 2, 1, 3]);
    assert_eq!(read_volume::<f32>(&store, &target), expected);
}

#[test]
fn test_round_trip_restores_volume() {
    let temp_dir = TempDir::new().unwrap();
    let store = DirectoryStore::new();
    let source = path_str(temp_dir.path(), "a");
    let middle = path_str(temp_dir.path(), "b");
    let back = path_str(temp_dir.path(), "c");

    let volume = sample_volume(1, 9, 6, 5);
    write_volume(&store, &source, &volume, (2, 4), &[("COMPRESS", "DEFLATE")]);

    let registry = StoreRegistry::with_defaults();
    transpose_volume(&TransposeConfig::new(&source, &middle).with_page_size(4), &registry)
        .unwrap();
    transpose_volume(&TransposeConfig::new(&middle, &back).with_page_size(3), &registry)
        .unwrap();

    assert_eq!(read_volume::<f32>(&store, &back), volume);
}

#[test]
fn test_round_trip_eight_byte_elements() {
    let temp_dir = TempDir::new().unwrap();
    let store = DirectoryStore::new();
    let source = path_str(temp_dir.path(), "wide");
    let middle = path_str(temp_dir.path(), "wide_yz");
    let back = path_str(temp_dir.path(), "wide_back");

    let volume = Array4::from_shape_fn((3, 6, 5, 7), |(b, z, y, x)| {
        f64::from_bits(0x3ff0_0000_0000_0000 + ((b << 24) | (z << 16) | (y << 8) | x) as u64)
    });
    write_volume(&store, &source, &volume, (3, 2), &[("COMPRESS", "ZSTD")]);

    let registry = StoreRegistry::with_defaults();
    transpose_volume(&TransposeConfig::new(&source, &middle).with_page_size(4), &registry)
        .unwrap();
    let expected = volume.view().permuted_axes([0, 2, 1, 3]);
    assert_eq!(read_volume::<f64>(&store, &middle), expected);

    transpose_volume(&TransposeConfig::new(&middle, &back).with_page_size(5), &registry)
        .unwrap();
    assert_eq!(read_volume::<f64>(&store, &back), volume);
}

#[test]
fn test_metadata_and_options_propagate() {
    let temp_dir = TempDir::new().unwrap();
    let store = DirectoryStore::new();
    let source = path_str(temp_dir.path(), "meta");
    let target = path_str(temp_dir.path(), "meta_yz");

    let volume = sample_volume(2, 4, 6, 8);
    write_volume(
        &store,
        &source,
        &volume,
        (4, 4),
        &[
            ("COMPRESS", "RLE"),
            ("OPTIONS", "V1=ON GZ=ON"),
            ("QUALITY", "85"),
        ],
    );
    {
        let mut first = store.open(&source).unwrap();
        first.set_no_data(0, -9999.0).unwrap();
        first
            .set_statistics(0, Statistics::new(-7.25, 150_000.0, 42.0, 12.5))
            .unwrap();
        first
            .set_geo_transform(GeoTransform([500.0, 2.0, 0.0, 900.0, 0.0, -2.0]))
            .unwrap();
        first.set_projection("EPSG:32633").unwrap();
        first.close().unwrap();
    }

    let config = TransposeConfig::new(&source, &target)
        .with_geo(true)
        .with_verbose(true);
    transpose_volume(&config, &StoreRegistry::with_defaults()).unwrap();

    for y in 0..6 {
        let slice = store.open(&slice_name(&target, y)).unwrap();
        let md = slice.metadata();
        assert_eq!(lookup(&md, "COMPRESSION"), Some("RLE"));
        assert_eq!(lookup(&md, "V1"), Some("ON"));
        assert_eq!(lookup(&md, "GZ"), Some("ON"));
        assert_eq!(lookup(&md, "QUALITY"), Some("85"));
        assert_eq!(lookup(&md, "ZSIZE"), Some("6"));
        assert_eq!(lookup(&md, "ZSLICE"), Some(y.to_string().as_str()));

        for band in 0..2 {
            assert_eq!(slice.no_data(band), Some(-9999.0));
            assert_eq!(slice.statistics(band).map(|s| s.std_dev), Some(12.5));
        }
        assert_eq!(slice.geo_transform().unwrap().y_resolution(), -2.0 * 6.0 / 4.0);
        assert_eq!(slice.projection().as_deref(), Some("EPSG:32633"));
    }
}

#[test]
fn test_source_from_other_driver_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let target = path_str(temp_dir.path(), "never");

    let memory = MemoryStore::new();
    let mut options = CreationOptions::new();
    options.push("ZSIZE", "2");
    memory
        .create("mem_cube", &CreateSpec::new(4, 4, 1, DataType::U8), &options)
        .unwrap();

    let mut registry = StoreRegistry::with_defaults();
    registry.register(memory.clone());

    let err = transpose_volume(&TransposeConfig::new("mem_cube", &target), &registry).unwrap_err();
    assert!(matches!(err, TransposeError::NotTiledRaster { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(!Path::new(&target).exists());
    assert_eq!(memory.open_handles(), 0);
}

#[test]
fn test_flat_raster_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = DirectoryStore::new();
    let source = path_str(temp_dir.path(), "flat");
    let target = path_str(temp_dir.path(), "flat_yz");

    store
        .create(&source, &CreateSpec::new(8, 8, 1, DataType::U16), &CreationOptions::new())
        .unwrap()
        .close()
        .unwrap();

    let err = transpose_volume(
        &TransposeConfig::new(&source, &target),
        &StoreRegistry::with_defaults(),
    )
    .unwrap_err();
    assert!(matches!(err, TransposeError::NotThreeDimensional(_)));
    assert!(!Path::new(&target).exists());
}
