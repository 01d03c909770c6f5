#![allow(dead_code)]

use md5::{Digest, Md5};
use sha2::Sha256;

pub const ESP32S3_ID: u16 = 0x0009;

pub const APP_TYPE: u8 = 0x00;
pub const DATA_TYPE: u8 = 0x01;

/// An ESP image with a valid checksum, optionally followed by its SHA-256.
pub fn image(entry: u32, segments: &[(u32, &[u8])], hash: bool) -> Vec<u8> {
    let mut data = vec![0u8; 24];
    data[0] = 0xE9;
    data[1] = segments.len() as u8;
    data[2] = 0x02; // DIO
    data[3] = 0x2F; // 4MB, 80MHz
    data[4..8].copy_from_slice(&entry.to_le_bytes());
    data[12..14].copy_from_slice(&ESP32S3_ID.to_le_bytes());
    data[23] = hash as u8;

    let mut checksum = 0xEF;
    for (addr, payload) in segments {
        data.extend_from_slice(&addr.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        checksum = payload.iter().fold(checksum, |acc, b| acc ^ b);
    }

    while data.len() % 16 != 15 {
        data.push(0);
    }
    data.push(checksum);

    if hash {
        let digest = Sha256::digest(&data);
        data.extend_from_slice(&digest);
    }

    data
}

/// A single 32 byte partition table entry.
pub fn partition(ty: u8, sub_type: u8, offset: u32, size: u32, label: &str) -> Vec<u8> {
    let mut record = vec![0xAA, 0x50, ty, sub_type];
    record.extend_from_slice(&offset.to_le_bytes());
    record.extend_from_slice(&size.to_le_bytes());

    let mut name = [0u8; 16];
    name[..label.len()].copy_from_slice(label.as_bytes());
    record.extend_from_slice(&name);
    record.extend_from_slice(&0u32.to_le_bytes());

    record
}

/// A partition table holding `entries`, an MD5 record and the end marker.
pub fn table(entries: &[Vec<u8>]) -> Vec<u8> {
    let records = entries.concat();

    let mut data = records.clone();
    data.extend_from_slice(&[0xEB, 0xEB]);
    data.extend_from_slice(&[0xFF; 14]);
    data.extend_from_slice(&Md5::digest(&records));
    data.extend_from_slice(&[0xFF; 32]);

    data
}

/// An erased flash dump which pieces can be written into.
#[derive(Debug, Default)]
pub struct Flash {
    data: Vec<u8>,
}

impl Flash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(mut self, offset: usize, bytes: &[u8]) -> Self {
        if self.data.len() < offset + bytes.len() {
            self.data.resize(offset + bytes.len(), 0xFF);
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Pad with erased flash up to `len`.
    pub fn pad_to(mut self, len: usize) -> Self {
        if self.data.len() < len {
            self.data.resize(len, 0xFF);
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

pub fn bootloader() -> Vec<u8> {
    image(
        0x403C_8000,
        &[(0x3FCE_3000, &[0x11; 32]), (0x403C_9000, &[0x22; 64])],
        false,
    )
}

pub fn application() -> Vec<u8> {
    let mut rodata = b"esp-idf: v5.1.2 Compiled Jan 12 2024 10:11:12 ".to_vec();
    rodata.extend_from_slice(b"\0\0Firmware Version 1.4.0\0");
    rodata.resize(96, 0);

    image(
        0x4037_5000,
        &[
            (0x3C02_0020, &rodata),
            (0x4037_0000, &[0x36, 0x41, 0x00, 0x1D, 0xF0, 0x00, 0x00, 0x00]),
            (0x4200_0020, &[0x36, 0x41, 0x00, 0x0C, 0x02, 0x1D, 0xF0, 0x00]),
        ],
        true,
    )
}

/// Bootloader at 0, a table at 0x8000 with `nvs` and a 64KiB `app0` at
/// 0x10000, and the application image.
pub fn merged_dump() -> Vec<u8> {
    Flash::new()
        .place(0x0, &bootloader())
        .place(
            0x8000,
            &table(&[
                partition(DATA_TYPE, 0x02, 0x9000, 0x6000, "nvs"),
                partition(APP_TYPE, 0x10, 0x1_0000, 0x1_0000, "app0"),
            ]),
        )
        .place(0x1_0000, &application())
        .build()
}
