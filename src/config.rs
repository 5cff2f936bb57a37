//! Resolved run configuration

use crate::error::{Result, TransposeError};
use crate::store::DirectoryStore;
use serde::{Deserialize, Serialize};

/// Everything a transpose run needs, already parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransposeConfig {
    /// Source dataset name
    pub source_path: String,

    /// Destination dataset name, slices are created beneath it
    pub destination_path: String,

    /// Output Y page size, see [`TransposeConfig::resolve_page_size`]
    #[serde(default)]
    pub output_page_size: Option<usize>,

    /// Log per-chunk progress
    #[serde(default)]
    pub verbose: bool,

    /// Copy projection and the rescaled geo-transform to the output
    #[serde(default)]
    pub propagate_geo: bool,

    /// Driver used for the source check and for creating the output
    #[serde(default = "default_driver")]
    pub driver: String,
}

fn default_driver() -> String {
    DirectoryStore::DRIVER.to_string()
}

impl TransposeConfig {
    pub fn new(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            output_page_size: None,
            verbose: false,
            propagate_geo: false,
            driver: default_driver(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.output_page_size = Some(page_size);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_geo(mut self, propagate_geo: bool) -> Self {
        self.propagate_geo = propagate_geo;
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.source_path.trim().is_empty() || self.destination_path.trim().is_empty() {
            return Err(TransposeError::Usage(
                "both an input and an output dataset are required".to_string(),
            ));
        }
        if self.source_path == self.destination_path {
            return Err(TransposeError::Usage(
                "input and output must be different datasets".to_string(),
            ));
        }
        if self.output_page_size == Some(0) {
            return Err(TransposeError::Usage(
                "output page size must be positive".to_string(),
            ));
        }
        if self.driver.trim().is_empty() {
            return Err(TransposeError::Usage("driver name is empty".to_string()));
        }
        Ok(())
    }

    /// Output Y page size for a source with the given native tile width
    ///
    /// Without an explicit page size the tile width is used, which keeps
    /// output tiling identical to what earlier versions of this tool wrote.
    pub fn resolve_page_size(&self, native_tile_width: usize) -> usize {
        self.output_page_size.unwrap_or(native_tile_width)
    }
}
