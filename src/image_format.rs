//! ESP application and bootloader image decoding
//!
//! Both the second-stage bootloader and every application partition hold an
//! image in the same layout: a 24 byte header, up to 16 load segments, a
//! checksum byte padded to a 16 byte boundary and, optionally, a SHA-256
//! digest of everything before it.
//!
//! [Documentation](https://docs.espressif.com/projects/esptool/en/latest/esp32/advanced-topics/firmware-image-format.html)

use std::mem::size_of;

use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use log::debug;
use sha2::{Digest, Sha256};

pub(crate) const ESP_MAGIC: u8 = 0xE9;
pub(crate) const ESP_CHECKSUM_MAGIC: u8 = 0xEF;
pub(crate) const MAX_SEGMENTS: u8 = 16;
pub(crate) const SHA256_LEN: usize = 32;

const HEADER_LEN: usize = size_of::<ImageHeader>();
const SEG_HEADER_LEN: usize = size_of::<SegmentHeader>();

/// Firmware header used by the ESP-IDF bootloader.
///
/// ## Header documentation:
/// * [Header](https://docs.espressif.com/projects/esptool/en/latest/esp32c3/advanced-topics/firmware-image-format.html#file-header)
/// * [Extended header](https://docs.espressif.com/projects/esptool/en/latest/esp32c3/advanced-topics/firmware-image-format.html#extended-file-header)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
#[doc(alias = "esp_image_header_t")]
struct ImageHeader {
    magic: u8,
    segment_count: u8,
    /// Flash read mode (esp_image_spi_mode_t)
    flash_mode: u8,
    /// ..4 bits are flash frequency (esp_image_spi_freq_t)
    /// 4.. bits are flash chip size (esp_image_flash_size_t)
    #[doc(alias = "spi_size")]
    #[doc(alias = "spi_speed")]
    flash_config: u8,
    entry: u32,

    // extended header part
    wp_pin: u8,
    clk_q_drv: u8,
    d_cs_drv: u8,
    gd_wp_drv: u8,
    chip_id: u16,
    min_rev: u8,
    min_chip_rev_full: u16,
    max_chip_rev_full: u16,
    reserved: [u8; 4],
    append_digest: u8,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
struct SegmentHeader {
    addr: u32,
    length: u32,
}

/// A load segment of a [DecodedImage]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedSegment {
    index: usize,
    header_offset: usize,
    data_offset: usize,
    load_addr: u32,
    size: u32,
}

impl DecodedSegment {
    /// Position of this segment within the image, starting at 0
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset of the 8 byte segment header in the source buffer
    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    /// Offset of the segment payload in the source buffer
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Address the payload is loaded to
    pub fn load_addr(&self) -> u32 {
        self.load_addr
    }

    /// Payload length in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Offset one past the last payload byte
    pub fn data_end(&self) -> usize {
        self.data_offset + self.size as usize
    }

    /// The payload bytes, borrowed from the buffer the segment was decoded from.
    ///
    /// Returns `None` if `data` is too short to hold the payload.
    pub fn data<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.data_offset..self.data_end())
    }
}

/// An executable image decoded from a flash dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    offset: usize,
    total_size: usize,
    entry_addr: u32,
    segment_count: u8,
    spi_mode: u8,
    spi_speed_code: u8,
    spi_size_code: u8,
    chip_id: u16,
    hash_appended: bool,
    checksum: u8,
    sha256: Option<[u8; SHA256_LEN]>,
    segments: Vec<DecodedSegment>,
}

impl DecodedImage {
    /// Offset of the image header in the source buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes from the header through the end of the trailer
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn entry_addr(&self) -> u32 {
        self.entry_addr
    }

    pub fn segment_count(&self) -> u8 {
        self.segment_count
    }

    /// Raw SPI flash mode code
    pub fn spi_mode(&self) -> u8 {
        self.spi_mode
    }

    /// Raw SPI flash frequency code (low nibble of the flash config byte)
    pub fn spi_speed_code(&self) -> u8 {
        self.spi_speed_code
    }

    /// Raw SPI flash size code (high nibble of the flash config byte)
    pub fn spi_size_code(&self) -> u8 {
        self.spi_size_code
    }

    pub fn chip_id(&self) -> u16 {
        self.chip_id
    }

    pub fn hash_appended(&self) -> bool {
        self.hash_appended
    }

    /// The stored checksum byte
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// The stored SHA-256 digest, present iff [DecodedImage::hash_appended]
    pub fn sha256(&self) -> Option<&[u8; SHA256_LEN]> {
        self.sha256.as_ref()
    }

    pub fn segments(&self) -> &[DecodedSegment] {
        &self.segments
    }

    /// Offset one past the last trailer byte
    pub fn end(&self) -> usize {
        self.offset + self.total_size
    }

    /// The whole image, borrowed from the buffer it was decoded from
    pub fn bytes<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.offset..self.end())
    }

    /// XOR of every segment payload byte, seeded with the checksum magic
    pub fn computed_checksum(&self, data: &[u8]) -> Option<u8> {
        self.segments
            .iter()
            .try_fold(ESP_CHECKSUM_MAGIC, |checksum, segment| {
                Some(update_checksum(segment.data(data)?, checksum))
            })
    }

    /// Compare the stored checksum against the segment payloads.
    ///
    /// Returns `None` if `data` does not hold every payload.
    pub fn checksum_valid(&self, data: &[u8]) -> Option<bool> {
        Some(self.computed_checksum(data)? == self.checksum)
    }

    /// Compare the appended digest against the image contents.
    ///
    /// Returns `None` for images without an appended digest, or if `data` does
    /// not hold the whole image.
    pub fn sha256_valid(&self, data: &[u8]) -> Option<bool> {
        let stored = self.sha256.as_ref()?;
        let hashed = data.get(self.offset..self.end() - SHA256_LEN)?;

        let computed = Sha256::digest(hashed);
        Some(computed.as_slice() == stored.as_slice())
    }
}

/// Decode the image whose header starts at `offset`.
///
/// Nothing past `limit` (the buffer length when `None`) is read. Returns
/// `None` if the bytes at `offset` are not a complete, well-formed image.
pub fn decode_image(data: &[u8], offset: usize, limit: Option<usize>) -> Option<DecodedImage> {
    let limit = limit.map_or(data.len(), |limit| limit.min(data.len()));

    let header_end = offset.checked_add(HEADER_LEN)?;
    if header_end > limit {
        return None;
    }

    let header: ImageHeader = pod_read_unaligned(&data[offset..header_end]);
    if header.magic != ESP_MAGIC {
        return None;
    }

    let segment_count = header.segment_count;
    if !(1..=MAX_SEGMENTS).contains(&segment_count) {
        debug!("Rejecting image at {offset:#x}: {segment_count} segments");
        return None;
    }

    let hash_appended = match header.append_digest {
        0 => false,
        1 => true,
        flag => {
            debug!("Rejecting image at {offset:#x}: hash flag {flag:#04x}");
            return None;
        }
    };

    let mut pos = header_end;
    let mut segments = Vec::with_capacity(segment_count as usize);
    for index in 0..segment_count as usize {
        let data_offset = pos.checked_add(SEG_HEADER_LEN)?;
        if data_offset > limit {
            return None;
        }

        let segment: SegmentHeader = pod_read_unaligned(&data[pos..data_offset]);
        let size = u32::from_le(segment.length);
        let data_end = data_offset.checked_add(size as usize)?;
        if data_end > limit {
            debug!("Rejecting image at {offset:#x}: segment {index} runs past {limit:#x}");
            return None;
        }

        segments.push(DecodedSegment {
            index,
            header_offset: pos,
            data_offset,
            load_addr: u32::from_le(segment.addr),
            size,
        });
        pos = data_end;
    }

    // The checksum occupies the last byte of the 16 byte block following the
    // segments.
    let checksum_pos = align_up(pos.checked_add(1)?, 16)? - 1;
    if checksum_pos >= limit {
        return None;
    }
    let checksum = data[checksum_pos];

    let mut end = checksum_pos + 1;
    let sha256 = if hash_appended {
        let hash_end = end.checked_add(SHA256_LEN)?;
        if hash_end > limit {
            return None;
        }
        let mut digest = [0u8; SHA256_LEN];
        digest.copy_from_slice(&data[end..hash_end]);
        end = hash_end;
        Some(digest)
    } else {
        None
    };

    Some(DecodedImage {
        offset,
        total_size: end - offset,
        entry_addr: u32::from_le(header.entry),
        segment_count,
        spi_mode: header.flash_mode,
        spi_speed_code: header.flash_config & 0x0F,
        spi_size_code: header.flash_config >> 4,
        chip_id: u16::from_le(header.chip_id),
        hash_appended,
        checksum,
        sha256,
        segments,
    })
}

fn align_up(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}

/// Update the checksum with the given data
fn update_checksum(data: &[u8], mut checksum: u8) -> u8 {
    for byte in data {
        checksum ^= *byte;
    }

    checksum
}
