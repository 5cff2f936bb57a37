//! Slice metadata: the manifest schema and the image structure keys

use crate::compression::CompressionMethod;
use crate::error::{Result, TransposeError};
use crate::options::CreationOptions;
use crate::store::CreateSpec;
use crate::types::{DataType, GeoTransform, Statistics};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Number of slices along the third axis
pub const ZSIZE: &str = "ZSIZE";
/// Index of a slice along the third axis
pub const ZSLICE: &str = "ZSLICE";
/// Codec reported in the image structure
pub const COMPRESSION: &str = "COMPRESSION";
/// Codec requested at creation time
pub const COMPRESS: &str = "COMPRESS";
pub const BLOCKXSIZE: &str = "BLOCKXSIZE";
pub const BLOCKYSIZE: &str = "BLOCKYSIZE";
/// Free-form option aggregate, space separated `KEY=VALUE` tokens
pub const OPTIONS: &str = "OPTIONS";

/// Tile edge used when creation options do not set one
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Creation options a store consumes itself instead of passing through
const CONSUMED_OPTIONS: &[&str] = &[COMPRESS, BLOCKXSIZE, BLOCKYSIZE, ZSIZE, OPTIONS];

/// Case-insensitive lookup in an ordered metadata list
pub fn lookup<'a>(metadata: &'a [(String, String)], key: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Manifest format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestVersion {
    pub major: u16,
    pub minor: u16,
}

impl ManifestVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for ManifestVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Complete description of one slice of a tiled dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceManifest {
    /// Format version
    pub version: ManifestVersion,

    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub data_type: DataType,

    /// Tile width
    pub block_x: usize,
    /// Tile height
    pub block_y: usize,

    /// Codec used for tiles
    pub compression: CompressionMethod,

    /// Number of slices in the dataset, absent for plain 2-D rasters
    pub zsize: Option<usize>,

    /// Index of this slice
    pub zslice: usize,

    /// Per band no-data value
    pub no_data: Vec<Option<f64>>,

    /// Per band statistics
    pub statistics: Vec<Option<Statistics>>,

    pub geo_transform: Option<GeoTransform>,
    pub projection: Option<String>,

    /// Creation options as given, in order
    pub options: Vec<(String, String)>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl SliceManifest {
    /// Build the manifest of a new slice from its shape and creation options
    pub fn create(spec: &CreateSpec, zslice: usize, options: &CreationOptions) -> Result<Self> {
        if spec.width == 0 || spec.height == 0 || spec.bands == 0 {
            return Err(TransposeError::InvalidFormat(format!(
                "cannot create a {}x{} raster with {} bands",
                spec.width, spec.height, spec.bands
            )));
        }

        let block_x = parse_size(options, BLOCKXSIZE)?
            .unwrap_or(DEFAULT_BLOCK_SIZE)
            .min(spec.width);
        let block_y = parse_size(options, BLOCKYSIZE)?
            .unwrap_or(DEFAULT_BLOCK_SIZE)
            .min(spec.height);
        if block_x == 0 || block_y == 0 {
            return Err(TransposeError::Metadata(
                "block size must be positive".to_string(),
            ));
        }

        let zsize = parse_size(options, ZSIZE)?;
        if let Some(z) = zsize {
            if zslice >= z {
                return Err(TransposeError::OutOfBounds(format!(
                    "slice {} of a dataset with {} {}",
                    zslice, ZSIZE, z
                )));
            }
        }

        let compression = match options.get(COMPRESS) {
            Some(name) => name.parse().unwrap_or_else(|_| {
                warn!("Unsupported codec {}, storing tiles uncompressed", name);
                CompressionMethod::None
            }),
            None => CompressionMethod::None,
        };

        let now = Utc::now();
        Ok(Self {
            version: ManifestVersion::default(),
            width: spec.width,
            height: spec.height,
            bands: spec.bands,
            data_type: spec.data_type,
            block_x,
            block_y,
            compression,
            zsize,
            zslice,
            no_data: vec![None; spec.bands],
            statistics: vec![None; spec.bands],
            geo_transform: None,
            projection: None,
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            created_at: now,
            modified_at: now,
        })
    }

    /// Image structure metadata as a store reports it
    ///
    /// The codec comes first, then every free-form token, then the creation
    /// options the store did not consume, then the slice geometry.
    pub fn image_structure(&self) -> Vec<(String, String)> {
        let mut md = vec![(COMPRESSION.to_string(), self.compression.to_string())];

        if let Some(free) = lookup(&self.options, OPTIONS) {
            for token in free.split_whitespace() {
                let (k, v) = token.split_once('=').unwrap_or((token, "ON"));
                md.push((k.to_string(), v.to_string()));
            }
        }

        md.extend(
            self.options
                .iter()
                .filter(|(k, _)| !CONSUMED_OPTIONS.iter().any(|c| k.eq_ignore_ascii_case(c)))
                .cloned(),
        );

        if let Some(z) = self.zsize {
            md.push((ZSIZE.to_string(), z.to_string()));
            md.push((ZSLICE.to_string(), self.zslice.to_string()));
        }
        md
    }

    /// Size in bytes of one full tile of one band
    pub fn tile_bytes(&self) -> usize {
        self.block_x * self.block_y * self.data_type.size_in_bytes()
    }

    /// Check a band index
    pub fn check_band(&self, band: usize) -> Result<()> {
        if band < self.bands {
            Ok(())
        } else {
            Err(TransposeError::OutOfBounds(format!(
                "band {} of {}",
                band, self.bands
            )))
        }
    }

    /// Update modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

fn parse_size(options: &CreationOptions, key: &str) -> Result<Option<usize>> {
    options
        .get(key)
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| TransposeError::Metadata(format!("{}={} is not a size", key, v)))
        })
        .transpose()
}
