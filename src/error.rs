//! Library and application errors
//!
//! Decoding never fails with an error; malformed data simply decodes to
//! nothing. The errors here come from the layers around the decoders: reading
//! dumps, loading configuration and writing recon bundles.

use std::{io, num::ParseIntError, path::PathBuf, process::ExitStatus};

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by espmap
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to open file: {}", .0.display())]
    #[diagnostic(
        code(espmap::file_open_error),
        help("Ensure that the file exists and is readable")
    )]
    FileOpenError(PathBuf, #[source] io::Error),

    #[error("Failed to write {}", .0.display())]
    #[diagnostic(
        code(espmap::write_error),
        help("Ensure that the output directory is writable, or choose another with `--out-dir`")
    )]
    WriteError(PathBuf, #[source] io::Error),

    #[error(transparent)]
    #[diagnostic(code(espmap::io_error))]
    IoError(#[from] io::Error),

    #[error("Invalid configuration file {}: {message}", .path.display())]
    #[diagnostic(
        code(espmap::invalid_config),
        help("Valid sections are `[scan]`, `[report]` and `[recon]`")
    )]
    InvalidConfig { path: PathBuf, message: String },

    #[error("The partition table scan stride must be greater than zero")]
    #[diagnostic(code(espmap::invalid_scan_stride))]
    InvalidScanStride,

    #[error("No partition table found in the input")]
    #[diagnostic(
        code(espmap::no_partition_table),
        help("If the table was moved from 0x8000, try passing its location with `--table-offset`")
    )]
    NoPartitionTable,

    #[error("No application image could be decoded from any app partition")]
    #[diagnostic(
        code(espmap::no_app_image),
        help("The dump may be truncated; `espmap map` shows how much of each partition is present")
    )]
    NoAppImage,

    #[error("The firmware map does not describe the data it was given")]
    #[diagnostic(
        code(espmap::map_mismatch),
        help("Decode the map from the same buffer that is passed alongside it")
    )]
    MapMismatch,

    #[error("Disassembly of segment {segment} failed with {status}")]
    #[diagnostic(code(espmap::disassembler_failed))]
    DisassemblerFailed { segment: usize, status: ExitStatus },

    #[error("Failed to parse integer: {0}")]
    #[diagnostic(
        code(espmap::parse_int_error),
        help("Integers may be given in decimal, or in hexadecimal with a `0x` prefix")
    )]
    ParseIntError(#[from] ParseIntError),
}

/// Parse an integer in decimal, or hexadecimal with a `0x` prefix.
pub fn parse_int(input: &str) -> Result<usize, Error> {
    Ok(parse_int::parse::<usize>(input.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex() {
        assert_eq!(parse_int("4096").unwrap(), 4096);
        assert_eq!(parse_int("0x8000").unwrap(), 0x8000);
        assert_eq!(parse_int(" 0x40000 ").unwrap(), 0x4_0000);
        assert!(matches!(parse_int("0xZZ"), Err(Error::ParseIntError(_))));
        assert!(parse_int("").is_err());
    }
}
