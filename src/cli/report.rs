//! Human readable firmware map reports

use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

use comfy_table::{modifiers, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use log::warn;
use sha2::{Digest, Sha256};

use crate::{
    cli::config::ReportConfig,
    firmware_map::{FirmwareMap, Presence},
    image_format::DecodedImage,
    partition_table::PartitionTable,
    strings::interesting_strings,
    targets::{describe_chip, describe_flash_frequency, describe_flash_mode, describe_flash_size},
};

/// Render the report for a dump and the map decoded from it.
pub fn render(path: &Path, data: &[u8], map: &FirmwareMap, config: &ReportConfig) -> String {
    Report {
        path,
        data,
        map,
        config,
    }
    .to_string()
}

struct Report<'a> {
    path: &'a Path,
    data: &'a [u8],
    map: &'a FirmwareMap,
    config: &'a ReportConfig,
}

impl Display for Report<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let file_size = self.map.file_size();

        writeln!(f, "ESP Firmware Map")?;
        writeln!(f, "================")?;
        writeln!(f, "Input file: {}", self.path.display())?;
        writeln!(f, "File size:  {} ({file_size} bytes)", hex32(file_size as u64))?;
        writeln!(f, "SHA256:     {}", hex::encode(Sha256::digest(self.data)))?;
        writeln!(f)?;

        match self.map.bootloader() {
            Some(image) => {
                write_image(f, self.data, image, "Bootloader image")?;
                writeln!(f)?;
            }
            None => {
                writeln!(f, "Bootloader image: not detected at offset 0x00000000")?;
                writeln!(f)?;
            }
        }

        match self.map.partition_table() {
            Some(table) => {
                writeln!(f, "Partition table @ {}", hex32(table.offset() as u64))?;
                writeln!(f, "--------------------------------")?;
                writeln!(f, "{}", partition_table(table, self.map))?;
                if let Some(md5) = table.md5() {
                    let status = integrity(table.md5_valid(self.data), "partition table MD5");
                    writeln!(f, "  md5 trailer: {}{status}", hex::encode(md5))?;
                }
                writeln!(f)?;
            }
            None => {
                writeln!(f, "Partition table: not detected")?;
                writeln!(f)?;
            }
        }

        if !self.map.app_images().is_empty() {
            writeln!(f, "Application images")?;
            writeln!(f, "------------------")?;
            for app in self.map.app_images() {
                let entry = app.entry();
                let tag = format!("{} @ {}", entry.label(), hex32(entry.offset() as u64));
                match app.image() {
                    Some(image) => write_image(f, self.data, image, &tag)?,
                    None => writeln!(f, "{tag}: no valid ESP image in available bytes")?,
                }
            }
            writeln!(f)?;
        }

        writeln!(f, "Coverage")?;
        writeln!(f, "--------")?;
        writeln!(f, "Bytes present in file: {}", hex32(file_size as u64))?;
        writeln!(f, "Declared flash span:   {}", hex32(self.map.flash_end()))?;
        match self.map.missing_tail() {
            Some(missing) => writeln!(
                f,
                "Missing tail in file:  {} (trimmed merged image)",
                hex32(missing)
            )?,
            None => writeln!(f, "Missing tail in file:  none")?,
        }

        let strings =
            interesting_strings(self.data, &self.config.keywords, self.config.string_limit);
        if !strings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Interesting strings")?;
            writeln!(f, "-------------------")?;
            for text in strings {
                writeln!(f, "  - {text}")?;
            }
        }

        Ok(())
    }
}

fn write_image(
    f: &mut Formatter<'_>,
    data: &[u8],
    image: &DecodedImage,
    label: &str,
) -> fmt::Result {
    writeln!(f, "{label}:")?;
    writeln!(f, "  file offset: {}", hex32(image.offset() as u64))?;
    writeln!(f, "  image size:  {}", hex32(image.total_size() as u64))?;
    writeln!(f, "  entry addr:  {}", hex32(image.entry_addr() as u64))?;
    writeln!(f, "  chip:        {}", describe_chip(image.chip_id()))?;
    writeln!(f, "  spi mode:    {}", describe_flash_mode(image.spi_mode()))?;
    writeln!(f, "  spi speed:   {}", describe_flash_frequency(image.spi_speed_code()))?;
    writeln!(f, "  flash size:  {}", describe_flash_size(image.spi_size_code()))?;
    writeln!(f, "  segments:    {}", image.segment_count())?;

    let checksum_status = integrity(image.checksum_valid(data), "image checksum");
    writeln!(f, "  checksum:    0x{:02X}{checksum_status}", image.checksum())?;
    writeln!(
        f,
        "  hash app.:   {}",
        if image.hash_appended() { "yes" } else { "no" }
    )?;
    if let Some(sha256) = image.sha256() {
        let status = integrity(image.sha256_valid(data), "image SHA256");
        writeln!(f, "  image sha256:{}{status}", hex::encode(sha256))?;
    }

    for segment in image.segments() {
        writeln!(
            f,
            "  seg{}: file {}..{} load {} size {}",
            segment.index(),
            hex32(segment.data_offset() as u64),
            hex32(segment.data_end() as u64),
            hex32(segment.load_addr() as u64),
            hex32(segment.size() as u64),
        )?;
    }

    Ok(())
}

fn partition_table(table: &PartitionTable, map: &FirmwareMap) -> Table {
    let mut rendered = Table::new();
    rendered
        .load_preset(UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Label")
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
            Cell::new("Type")
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold),
            Cell::new("SubType")
                .fg(Color::Magenta)
                .add_attribute(Attribute::Bold),
            Cell::new("Offset")
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
            Cell::new("Size")
                .fg(Color::Yellow)
                .add_attribute(Attribute::Bold),
            Cell::new("Flags")
                .fg(Color::DarkCyan)
                .add_attribute(Attribute::Bold),
            Cell::new("In file").add_attribute(Attribute::Bold),
        ]);

    for entry in table.entries() {
        let presence = match map.presence(entry) {
            Presence::Full => String::from("fully present"),
            Presence::Partial { available } => format!("partial ({} bytes)", hex32(available)),
            Presence::Absent => String::from("not present"),
        };

        rendered.add_row(vec![
            Cell::new(format!("{:02}", entry.index())),
            Cell::new(entry.label()).fg(Color::Green),
            Cell::new(entry.type_name()).fg(Color::Cyan),
            Cell::new(entry.sub_type_name()).fg(Color::Magenta),
            Cell::new(format!("{:#x}", entry.offset())).fg(Color::Red),
            Cell::new(format!("{:#x} ({}KiB)", entry.size(), entry.size() / 1024))
                .fg(Color::Yellow),
            Cell::new(format!("{:#x}", entry.flags())).fg(Color::DarkCyan),
            Cell::new(presence),
        ]);
    }

    rendered
}

/// Suffix describing an integrity check, logging any mismatch.
fn integrity(valid: Option<bool>, what: &str) -> &'static str {
    match valid {
        Some(true) => " (valid)",
        Some(false) => {
            warn!("The {what} does not match the contents");
            " (MISMATCH)"
        }
        None => "",
    }
}

fn hex32(value: u64) -> String {
    format!("0x{value:08X}")
}
