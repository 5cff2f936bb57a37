//! volswap - out-of-core Y/Z transposition of tiled raster volumes
//!
//! A volume is addressed as (X, Y, Z, Band) and stored as a stack of tiled
//! 2-D slices, one per Z index. Transposing swaps Y and Z: the output has one
//! slice per input row, each slice holding the input's Z samples as rows.
//! Neither Y nor Z needs to fit in memory; the working buffer holds a single
//! `bands x page x tile_y x tile_x` chunk.
//!
//! # Features
//!
//! - Bounded memory, independent of the volume extent
//! - Re-tiling of the output to a chosen page size
//! - No-data, statistics and optional geo-referencing carried to the output
//! - Pluggable storage through the [`RasterStore`] trait, with an on-disk
//!   directory store and an in-memory store included
//!
//! # Example
//!
//! ```rust,no_run
//! use volswap::{transpose_volume, StoreRegistry, TransposeConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = StoreRegistry::with_defaults();
//! let config = TransposeConfig::new("/data/cube", "/data/cube_yz").with_page_size(64);
//! let report = transpose_volume(&config, &registry)?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod options;
pub mod store;
pub mod strides;
pub mod types;
pub mod utils;

// Re-exports
pub use compression::{CompressionMethod, TileCodec};
pub use config::TransposeConfig;
pub use engine::{transpose_volume, ChunkedTranspose, TransposeReport};
pub use error::{Result, TransposeError};
pub use layout::{ChunkPlan, VolumeDescriptor};
pub use options::{classify, CreationOptions, OptionClass};
pub use store::{
    CreateSpec, DirectoryStore, MemoryStore, RasterDataset, RasterStore, StoreRegistry,
};
pub use strides::{BlockLayout, BufferStrides};
pub use types::{DataType, GeoTransform, Statistics, Window};

/// Version of volswap
pub const VOLSWAP_VERSION: &str = env!("CARGO_PKG_VERSION");
