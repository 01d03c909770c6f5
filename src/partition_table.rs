//! Binary partition table decoding and discovery
//!
//! A partition table is a run of 32 byte records. Each record is either a
//! partition entry, the MD5 record which carries a digest of the preceding
//! entries, or the all-`0xFF` end marker.
//!
//! For more information on the partition table format see:
//! <https://docs.espressif.com/projects/esp-idf/en/latest/esp32/api-guides/partition-tables.html>
//!
//! The table is conventionally written at [DEFAULT_TABLE_OFFSET], but the
//! bootloader can be built to look elsewhere, so [locate_table] probes every
//! sector in the first part of the dump and scores the tables it finds.

use std::{
    cmp::Reverse,
    fmt::{self, Display, Formatter},
    mem::size_of,
};

use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use log::debug;
use md5::{Digest, Md5};
use strum::FromRepr;

/// Offset of the partition table in a default ESP-IDF flash layout
pub const DEFAULT_TABLE_OFFSET: usize = 0x8000;
/// Distance between candidate table offsets; tables start on a flash sector
pub const DEFAULT_SCAN_STRIDE: usize = 0x1000;
/// Candidate table offsets are only taken from below this limit
pub const DEFAULT_SCAN_LIMIT: usize = 0x4_0000;

/// Most records a table can hold, including the MD5 record and end marker
pub const MAX_RECORDS: usize = 96;

const RECORD_LEN: usize = size_of::<PartitionRecord>();
const PARTITION_MAGIC: u16 = 0x50AA;
const MD5_MAGIC: u16 = 0xEBEB;
const END_MAGIC: u16 = 0xFFFF;
const LABEL_LEN: usize = 16;
const MD5_LEN: usize = 16;

const SCORE_CANONICAL_OFFSET: usize = 4;
const SCORE_HAS_APP: usize = 2;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
#[doc(alias = "esp_partition_info_t")]
struct PartitionRecord {
    magic: u16,
    ty: u8,
    sub_type: u8,
    offset: u32,
    size: u32,
    label: [u8; LABEL_LEN],
    flags: u32,
}

/// Partition types defined by ESP-IDF
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum CoreType {
    App = 0x00,
    Data = 0x01,
}

/// Subtypes of [CoreType::App] partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Factory,
    /// `ota_0` through `ota_15`
    Ota(u8),
    Test,
}

impl Display for AppType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AppType::Factory => write!(f, "factory"),
            AppType::Ota(slot) => write!(f, "ota_{slot}"),
            AppType::Test => write!(f, "test"),
        }
    }
}

impl AppType {
    pub fn from_u8(sub_type: u8) -> Option<Self> {
        match sub_type {
            0x00 => Some(Self::Factory),
            0x10..=0x1F => Some(Self::Ota(sub_type - 0x10)),
            0x20 => Some(Self::Test),
            _ => None,
        }
    }
}

/// Subtypes of [CoreType::Data] partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Ota = 0x00,
    Phy = 0x01,
    Nvs = 0x02,
    #[strum(serialize = "coredump")]
    CoreDump = 0x03,
    #[strum(serialize = "nvs_keys")]
    NvsKeys = 0x04,
    #[strum(serialize = "efuse")]
    EFuse = 0x05,
    Undefined = 0x06,
    #[strum(serialize = "esphttpd")]
    EspHttpd = 0x80,
    Fat = 0x81,
    Spiffs = 0x82,
    #[strum(serialize = "littlefs")]
    LittleFs = 0x83,
}

/// One entry of a [PartitionTable]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    index: usize,
    ty: u8,
    sub_type: u8,
    offset: u32,
    size: u32,
    label: String,
    flags: u32,
}

impl PartitionEntry {
    /// Position of the record within the table, starting at 0
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw partition type
    pub fn ty(&self) -> u8 {
        self.ty
    }

    /// Raw partition subtype
    pub fn sub_type(&self) -> u8 {
        self.sub_type
    }

    /// Absolute flash offset of the partition
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Offset one past the end of the partition
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_app(&self) -> bool {
        self.ty == CoreType::App as u8
    }

    /// Human readable partition type, e.g. `app` or `type_0x40`
    pub fn type_name(&self) -> String {
        match CoreType::from_repr(self.ty) {
            Some(ty) => ty.to_string(),
            None => format!("type_{:#04x}", self.ty),
        }
    }

    /// Human readable partition subtype, e.g. `ota_1` or `nvs`
    pub fn sub_type_name(&self) -> String {
        let known = match CoreType::from_repr(self.ty) {
            Some(CoreType::App) => AppType::from_u8(self.sub_type).map(|t| t.to_string()),
            Some(CoreType::Data) => DataType::from_repr(self.sub_type).map(|t| t.to_string()),
            None => None,
        };

        known.unwrap_or_else(|| match CoreType::from_repr(self.ty) {
            Some(ty) => format!("{ty}_{:#04x}", self.sub_type),
            None => format!("subtype_{:#04x}", self.sub_type),
        })
    }

    fn from_record(index: usize, record: &PartitionRecord) -> Self {
        Self {
            index,
            ty: record.ty,
            sub_type: record.sub_type,
            offset: u32::from_le(record.offset),
            size: u32::from_le(record.size),
            label: decode_label(&record.label),
            flags: u32::from_le(record.flags),
        }
    }
}

/// A partition table decoded from a flash dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    offset: usize,
    entries: Vec<PartitionEntry>,
    md5: Option<[u8; MD5_LEN]>,
}

impl PartitionTable {
    /// Offset of the first record in the source buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Entries in on-flash order
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    /// Digest carried by the MD5 record, if the table has one
    pub fn md5(&self) -> Option<&[u8; MD5_LEN]> {
        self.md5.as_ref()
    }

    pub fn find(&self, label: &str) -> Option<&PartitionEntry> {
        self.entries.iter().find(|entry| entry.label == label)
    }

    pub fn app_entries(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(|entry| entry.is_app())
    }

    /// Compare the MD5 record against the entry records it covers.
    ///
    /// Returns `None` for tables without an MD5 record, or if `data` does not
    /// hold the records.
    pub fn md5_valid(&self, data: &[u8]) -> Option<bool> {
        let stored = self.md5.as_ref()?;
        let end = self.offset.checked_add(self.entries.len() * RECORD_LEN)?;
        let records = data.get(self.offset..end)?;

        let computed = Md5::digest(records);
        Some(computed.as_slice() == stored.as_slice())
    }
}

/// Decode the partition table whose first record starts at `offset`.
///
/// Returns `None` unless the records form a complete table with at least one
/// entry, closed by the end marker or an MD5 record.
pub fn decode_table(data: &[u8], offset: usize) -> Option<PartitionTable> {
    if read_magic(data, offset)? != PARTITION_MAGIC {
        return None;
    }

    let mut entries = Vec::new();
    let mut md5 = None;

    let mut closed = false;
    for index in 0..MAX_RECORDS {
        let pos = offset.checked_add(index * RECORD_LEN)?;
        let raw = data.get(pos..pos.checked_add(RECORD_LEN)?)?;
        let record: PartitionRecord = pod_read_unaligned(raw);

        match u16::from_le(record.magic) {
            END_MAGIC => {
                closed = true;
                break;
            }
            MD5_MAGIC => {
                let mut digest = [0u8; MD5_LEN];
                digest.copy_from_slice(&raw[RECORD_LEN - MD5_LEN..]);
                md5 = Some(digest);
                closed = true;
                break;
            }
            PARTITION_MAGIC => {}
            _ => return None,
        }

        let entry = PartitionEntry::from_record(index, &record);
        if entry.size == 0 {
            return None;
        }
        entries.push(entry);
    }

    if !closed || entries.is_empty() {
        return None;
    }

    Some(PartitionTable {
        offset,
        entries,
        md5,
    })
}

/// Where [locate_table_with] looks for partition tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Offset which is probed first and favoured when scoring
    pub canonical_offset: usize,
    /// Distance between probed offsets
    pub stride: usize,
    /// Offsets at or past this value are not probed, apart from the canonical
    /// one
    pub scan_limit: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            canonical_offset: DEFAULT_TABLE_OFFSET,
            stride: DEFAULT_SCAN_STRIDE,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

impl ScanOptions {
    /// Offsets in the order they are probed: the canonical offset, followed by
    /// every aligned offset below the scan limit.
    pub fn candidate_offsets(&self, len: usize) -> impl Iterator<Item = usize> {
        let canonical = self.canonical_offset;

        std::iter::once(canonical).chain(
            (0..len.min(self.scan_limit))
                .step_by(self.stride.max(1))
                .filter(move |&offset| offset != canonical),
        )
    }
}

struct Candidate {
    scan_index: usize,
    score: usize,
    table: PartitionTable,
}

/// Find the most plausible partition table in `data` using the default
/// [ScanOptions].
pub fn locate_table(data: &[u8]) -> Option<PartitionTable> {
    locate_table_with(data, &ScanOptions::default())
}

/// Find the most plausible partition table in `data`.
///
/// Every table which decodes is scored by its number of entries, with a bonus
/// for sitting at the canonical offset and another for containing an app
/// partition. The highest score wins; on a tie the first table probed wins.
pub fn locate_table_with(data: &[u8], options: &ScanOptions) -> Option<PartitionTable> {
    let winner = options
        .candidate_offsets(data.len())
        .enumerate()
        .filter_map(|(scan_index, offset)| {
            let table = decode_table(data, offset)?;
            let score = table_score(&table, options);
            debug!(
                "Partition table candidate at {offset:#x}: {} entries, score {score}",
                table.entries.len()
            );

            Some(Candidate {
                scan_index,
                score,
                table,
            })
        })
        .min_by_key(|candidate| (Reverse(candidate.score), candidate.scan_index))?;

    debug!("Selected partition table at {:#x}", winner.table.offset);
    Some(winner.table)
}

fn table_score(table: &PartitionTable, options: &ScanOptions) -> usize {
    let mut score = table.entries.len();
    if table.offset == options.canonical_offset {
        score += SCORE_CANONICAL_OFFSET;
    }
    if table.app_entries().next().is_some() {
        score += SCORE_HAS_APP;
    }

    score
}

fn read_magic(data: &[u8], offset: usize) -> Option<u16> {
    let record = data.get(offset..offset.checked_add(RECORD_LEN)?)?;
    Some(u16::from_le_bytes([record[0], record[1]]))
}

/// Labels are NUL padded ASCII; anything else is replaced rather than rejected.
fn decode_label(raw: &[u8; LABEL_LEN]) -> String {
    raw.iter()
        .take_while(|&&byte| byte != 0)
        .map(|&byte| {
            if byte.is_ascii() {
                byte as char
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect()
}
