//! Decode the contents of ESP32-family flash dumps
//!
//! A full flash dump contains a second-stage bootloader at offset zero, a
//! partition table (normally at `0x8000`) and one or more application images
//! inside the partitions it describes. [FirmwareMap::discover] finds all of
//! them; the lower level decoders in [image_format] and [partition_table] can
//! also be used on their own.
//!
//! ```no_run
//! let data = std::fs::read("flash_dump.bin")?;
//! let map = espmap::FirmwareMap::discover(&data);
//!
//! for (entry, image) in map.decoded_apps() {
//!     println!("{} @ {:#x}: {} segments", entry.label(), entry.offset(), image.segment_count());
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub use self::{
    error::Error,
    firmware_map::{AppImage, FirmwareMap, Presence},
    image_format::{decode_image, DecodedImage, DecodedSegment},
    partition_table::{
        decode_table, locate_table, locate_table_with, PartitionEntry, PartitionTable, ScanOptions,
    },
    targets::Chip,
};

#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod firmware_map;
pub mod image_format;
#[cfg(feature = "cli")]
pub mod logging;
pub mod partition_table;
pub mod strings;
pub mod targets;
