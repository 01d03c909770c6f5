//! Discovery of everything a flash dump contains
//!
//! A [FirmwareMap] ties the decoders together: the partition table is located
//! first, the bootloader is decoded from the start of the dump up to the table,
//! and every app partition is decoded within its declared span.

use log::debug;

use crate::{
    image_format::{decode_image, DecodedImage},
    partition_table::{locate_table_with, PartitionEntry, PartitionTable, ScanOptions},
};

/// Offset of the second-stage bootloader in a flash dump
pub const BOOTLOADER_OFFSET: usize = 0x0;

/// How much of a partition's declared span is present in the dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Full,
    Partial { available: u64 },
    Absent,
}

impl Presence {
    pub fn of(entry: &PartitionEntry, file_size: usize) -> Self {
        let file_size = file_size as u64;
        let offset = entry.offset() as u64;
        if offset >= file_size {
            return Presence::Absent;
        }

        let available = (file_size - offset).min(entry.size() as u64);
        if available == entry.size() as u64 {
            Presence::Full
        } else {
            Presence::Partial { available }
        }
    }
}

/// An app partition and the image decoded from it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppImage {
    entry: PartitionEntry,
    image: Option<DecodedImage>,
}

impl AppImage {
    pub fn entry(&self) -> &PartitionEntry {
        &self.entry
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        self.image.as_ref()
    }
}

/// Everything which could be decoded from a flash dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareMap {
    file_size: usize,
    bootloader: Option<DecodedImage>,
    partition_table: Option<PartitionTable>,
    app_images: Vec<AppImage>,
}

impl FirmwareMap {
    /// Decode `data` using the default partition table [ScanOptions].
    pub fn discover(data: &[u8]) -> Self {
        Self::discover_with(data, &ScanOptions::default())
    }

    /// Decode `data`, looking for the partition table as described by
    /// `options`.
    pub fn discover_with(data: &[u8], options: &ScanOptions) -> Self {
        let file_size = data.len();
        let partition_table = locate_table_with(data, options);

        let boot_limit = partition_table
            .as_ref()
            .map_or(file_size, |table| table.offset());
        let bootloader = decode_image(data, BOOTLOADER_OFFSET, Some(boot_limit));
        if bootloader.is_none() {
            debug!("No bootloader image below {boot_limit:#x}");
        }

        let app_images = partition_table
            .iter()
            .flat_map(|table| table.app_entries())
            .map(|entry| AppImage {
                entry: entry.clone(),
                image: decode_app_image(data, entry),
            })
            .collect();

        Self {
            file_size,
            bootloader,
            partition_table,
            app_images,
        }
    }

    /// Length of the dump the map was decoded from
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn bootloader(&self) -> Option<&DecodedImage> {
        self.bootloader.as_ref()
    }

    pub fn partition_table(&self) -> Option<&PartitionTable> {
        self.partition_table.as_ref()
    }

    /// App partitions in table order, whether or not an image was found
    pub fn app_images(&self) -> &[AppImage] {
        &self.app_images
    }

    /// Decoded application images only
    pub fn decoded_apps(&self) -> impl Iterator<Item = (&PartitionEntry, &DecodedImage)> {
        self.app_images
            .iter()
            .filter_map(|app| Some((&app.entry, app.image.as_ref()?)))
    }

    /// End of the flash layout declared by the partition table, or the dump
    /// length when there is no table
    pub fn flash_end(&self) -> u64 {
        self.partition_table
            .as_ref()
            .and_then(|table| table.entries().iter().map(PartitionEntry::end).max())
            .unwrap_or(self.file_size as u64)
    }

    /// Bytes of the declared flash layout which are missing from the dump
    pub fn missing_tail(&self) -> Option<u64> {
        self.flash_end()
            .checked_sub(self.file_size as u64)
            .filter(|&missing| missing > 0)
    }

    pub fn presence(&self, entry: &PartitionEntry) -> Presence {
        Presence::of(entry, self.file_size)
    }
}

fn decode_app_image(data: &[u8], entry: &PartitionEntry) -> Option<DecodedImage> {
    let offset = entry.offset() as usize;
    if offset >= data.len() {
        debug!("Partition '{}' at {offset:#x} is past the end of the dump", entry.label());
        return None;
    }

    let limit = data.len().min(entry.end().try_into().unwrap_or(usize::MAX));
    decode_image(data, offset, Some(limit))
}
