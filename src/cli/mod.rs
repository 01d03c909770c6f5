//! Command-line interface utilities
//!
//! No stability guaranties apply

use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::Args;
use log::{debug, info};
use miette::{Result, WrapErr};

use self::{
    config::{Config, ScanConfig},
    recon::{build_bundle, ReconOptions, ReconOutcome},
};
use crate::{
    error::{parse_int, Error},
    firmware_map::FirmwareMap,
    partition_table::ScanOptions,
};

pub mod config;
pub mod recon;
pub mod report;

/// Partition table discovery options
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Offset probed first, and preferred, when locating the partition table
    #[arg(long, value_name = "OFFSET", value_parser = parse_int)]
    pub table_offset: Option<usize>,
    /// Distance between offsets probed for a partition table
    #[arg(long, value_name = "STRIDE", value_parser = parse_int)]
    pub scan_stride: Option<usize>,
    /// Offsets at or past this value are not probed for a partition table
    #[arg(long, value_name = "LIMIT", value_parser = parse_int)]
    pub scan_limit: Option<usize>,
}

impl ScanArgs {
    /// Merge these options over the configured ones.
    pub fn scan_options(&self, config: &ScanConfig) -> Result<ScanOptions, Error> {
        ScanConfig {
            canonical_offset: self.table_offset.or(config.canonical_offset),
            stride: self.scan_stride.or(config.stride),
            limit: self.scan_limit.or(config.limit),
        }
        .scan_options()
    }
}

/// Print a map of the bootloader, partition table and application images
#[derive(Debug, Args)]
pub struct MapArgs {
    /// Flash dump to decode
    pub input: PathBuf,
    #[clap(flatten)]
    pub scan_args: ScanArgs,
    /// Maximum number of interesting strings to list
    #[arg(long, value_name = "COUNT")]
    pub strings: Option<usize>,
}

/// Split a flash dump into files for reverse engineering
#[derive(Debug, Args)]
pub struct ReconArgs {
    /// Flash dump to decode
    pub input: PathBuf,
    #[clap(flatten)]
    pub scan_args: ScanArgs,
    /// Output directory [default: <FILE stem>_recon]
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
    /// Path to an Xtensa `objdump`, searched for on `PATH` if omitted
    #[arg(long, value_name = "PATH", env = "ESPMAP_OBJDUMP")]
    pub objdump: Option<PathBuf>,
}

/// Read a flash dump and decode its firmware map.
pub fn load_dump(path: &Path, options: &ScanOptions) -> Result<(Vec<u8>, FirmwareMap)> {
    let data = fs::read(path).map_err(|e| Error::FileOpenError(path.to_path_buf(), e))?;
    debug!("Read {} bytes from {}", data.len(), path.display());

    let map = FirmwareMap::discover_with(&data, options);

    Ok((data, map))
}

pub fn map(args: MapArgs, config: &Config) -> Result<()> {
    let options = args.scan_args.scan_options(&config.scan)?;
    let (data, map) = load_dump(&args.input, &options)?;

    let mut report_config = config.report.clone();
    if let Some(limit) = args.strings {
        report_config.string_limit = limit;
    }

    print!(
        "{}",
        report::render(&args.input, &data, &map, &report_config)
    );

    Ok(())
}

pub fn recon(args: ReconArgs, config: &Config) -> Result<()> {
    let options = args.scan_args.scan_options(&config.scan)?;
    let (data, map) = load_dump(&args.input, &options)?;

    let out_dir = args
        .out_dir
        .unwrap_or_else(|| default_out_dir(&args.input));

    let mut recon_options = ReconOptions::new(out_dir, &config.recon);
    if args.objdump.is_some() {
        recon_options.objdump = args.objdump;
    }

    let summary = build_bundle(&args.input, &data, &map, &recon_options)
        .wrap_err("Failed to build the recon bundle")?;
    info!(
        "Wrote {} files to {}",
        summary.files.len(),
        recon_options.out_dir.display()
    );

    match summary.outcome {
        ReconOutcome::Complete => Ok(()),
        ReconOutcome::NoPartitionTable => Err(Error::NoPartitionTable.into()),
        ReconOutcome::NoAppImage => Err(Error::NoAppImage.into()),
    }
}

fn default_out_dir(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("firmware"));

    PathBuf::from(format!("{stem}_recon"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_configuration() {
        let config = ScanConfig {
            canonical_offset: Some(0x9000),
            stride: Some(0x800),
            limit: None,
        };
        let args = ScanArgs {
            table_offset: None,
            scan_stride: Some(0x2000),
            scan_limit: Some(0x1_0000),
        };

        assert_eq!(
            args.scan_options(&config).unwrap(),
            ScanOptions {
                canonical_offset: 0x9000,
                stride: 0x2000,
                scan_limit: 0x1_0000,
            }
        );
    }

    #[test]
    fn out_dir_is_named_after_the_input() {
        assert_eq!(
            default_out_dir(Path::new("dumps/radio.bin")),
            PathBuf::from("radio_recon")
        );
    }
}
