//! Command line arguments
//!
//! `volswap [-z N] [-v] [-g] INPUT OUTPUT`, turned into a [`TransposeConfig`].

use crate::config::TransposeConfig;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "volswap")]
#[command(about = "Transpose a 3-D tiled raster by swapping its Y and Z axes")]
#[command(version)]
pub struct Args {
    /// Input dataset (3-D, with a ZSIZE)
    #[arg(value_name = "INPUT")]
    pub input: String,

    /// Output dataset
    #[arg(value_name = "OUTPUT")]
    pub output: String,

    /// Output Y page size (default: input tile width)
    #[arg(short = 'z', long = "page-size", value_name = "N",
          value_parser = clap::value_parser!(u32).range(1..))]
    pub page_size: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Copy the input projection and geo-transform, which will be wrong anyhow
    #[arg(short, long)]
    pub geo: bool,
}

impl Args {
    pub fn into_config(self) -> TransposeConfig {
        TransposeConfig {
            source_path: self.input,
            destination_path: self.output,
            output_page_size: self.page_size.map(|p| p as usize),
            verbose: self.verbose,
            propagate_geo: self.geo,
            ..TransposeConfig::new("", "")
        }
    }
}
