//! Names for the raw codes found in image headers
//!
//! Decoding keeps every code as the raw value stored in flash; these types only
//! exist to describe those values to a human.

use std::fmt::{self, Display, Formatter};

use strum::FromRepr;

/// Chips which can be identified by the `chip_id` field of the image header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, FromRepr)]
#[non_exhaustive]
#[repr(u16)]
#[doc(alias = "esp_chip_id_t")]
pub enum Chip {
    /// ESP32
    #[strum(serialize = "ESP32")]
    Esp32 = 0x0000,
    /// ESP32-S2
    #[strum(serialize = "ESP32-S2")]
    Esp32s2 = 0x0002,
    /// ESP32-C3, ESP8685
    #[strum(serialize = "ESP32-C3")]
    Esp32c3 = 0x0005,
    /// ESP32-H4
    #[strum(serialize = "ESP32-H4")]
    Esp32h4 = 0x0006,
    /// ESP32-S3
    #[strum(serialize = "ESP32-S3")]
    Esp32s3 = 0x0009,
    /// ESP32-C5
    #[strum(serialize = "ESP32-C5")]
    Esp32c5 = 0x000A,
    /// ESP32-C2, ESP8684
    #[strum(serialize = "ESP32-C2")]
    Esp32c2 = 0x000C,
    /// ESP32-C6
    #[strum(serialize = "ESP32-C6")]
    Esp32c6 = 0x000D,
    /// ESP32-H2
    #[strum(serialize = "ESP32-H2")]
    Esp32h2 = 0x0010,
    /// ESP32-P4
    #[strum(serialize = "ESP32-P4")]
    Esp32p4 = 0x0012,
}

impl Chip {
    pub fn from_id(id: u16) -> Option<Self> {
        Self::from_repr(id)
    }
}

/// Flash read modes, as encoded in the image header
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[doc(alias = "esp_image_spi_mode_t")]
pub enum FlashMode {
    /// Quad I/O (4 pins used for address & data)
    Qio = 0x00,
    /// Quad Output (4 pins used for data)
    Qout = 0x01,
    /// Dual I/O (2 pins used for address & data)
    Dio = 0x02,
    /// Dual Output (2 pins used for data)
    Dout = 0x03,
    FastRead = 0x04,
    SlowRead = 0x05,
}

/// Flash frequencies, as encoded in the low nibble of the flash config byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, FromRepr)]
#[repr(u8)]
#[doc(alias = "esp_image_spi_freq_t")]
pub enum FlashFrequency {
    #[strum(serialize = "40MHz")]
    _40Mhz = 0x0,
    #[strum(serialize = "26.7MHz")]
    _26Mhz = 0x1,
    #[strum(serialize = "20MHz")]
    _20Mhz = 0x2,
    #[strum(serialize = "80MHz")]
    _80Mhz = 0xF,
}

/// Flash sizes, as encoded in the high nibble of the flash config byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, FromRepr)]
#[repr(u8)]
#[doc(alias = "esp_image_flash_size_t")]
pub enum FlashSize {
    #[strum(serialize = "1MB")]
    _1Mb = 0x0,
    #[strum(serialize = "2MB")]
    _2Mb = 0x1,
    #[strum(serialize = "4MB")]
    _4Mb = 0x2,
    #[strum(serialize = "8MB")]
    _8Mb = 0x3,
    #[strum(serialize = "16MB")]
    _16Mb = 0x4,
    #[strum(serialize = "32MB")]
    _32Mb = 0x5,
    #[strum(serialize = "64MB")]
    _64Mb = 0x6,
    #[strum(serialize = "128MB")]
    _128Mb = 0x7,
}

/// A raw header code together with its name, if it has one.
///
/// Displays the name for known codes and `<prefix>_<hex>` otherwise, so
/// unknown values still show up in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Described<T> {
    prefix: &'static str,
    raw: u32,
    width: usize,
    known: Option<T>,
}

impl<T: Copy> Described<T> {
    pub fn known(&self) -> Option<T> {
        self.known
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }
}

impl<T: Display> Display for Described<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.known {
            Some(known) => write!(f, "{known}"),
            None => write!(f, "{}_{:#0width$x}", self.prefix, self.raw, width = self.width),
        }
    }
}

pub fn describe_chip(id: u16) -> Described<Chip> {
    Described {
        prefix: "chip_id",
        raw: id as u32,
        width: 6,
        known: Chip::from_id(id),
    }
}

pub fn describe_flash_mode(code: u8) -> Described<FlashMode> {
    Described {
        prefix: "mode",
        raw: code as u32,
        width: 4,
        known: FlashMode::from_repr(code),
    }
}

pub fn describe_flash_frequency(code: u8) -> Described<FlashFrequency> {
    Described {
        prefix: "speed",
        raw: code as u32,
        width: 0,
        known: FlashFrequency::from_repr(code),
    }
}

pub fn describe_flash_size(code: u8) -> Described<FlashSize> {
    Described {
        prefix: "size",
        raw: code as u32,
        width: 0,
        known: FlashSize::from_repr(code),
    }
}
