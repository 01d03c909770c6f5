//! Reverse-engineering bundles
//!
//! A bundle splits a dump into the pieces worth looking at individually: the
//! bootloader, the partition table, the primary application and each of its
//! segments, alongside a disassembly of the executable segments and an index
//! of the strings they contain.

use std::{
    env,
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    cli::config::ReconConfig,
    error::Error,
    firmware_map::FirmwareMap,
    image_format::{DecodedImage, DecodedSegment},
    partition_table::PartitionEntry,
    strings::printable_strings,
};

/// Bytes copied out for the partition table, one flash sector
pub const PARTITION_TABLE_SIZE: usize = 0x1000;

/// `objdump` searched for on `PATH` when none is configured
pub const DEFAULT_OBJDUMP: &str = "xtensa-esp32s3-elf-objdump";

const SUMMARY_FILE: &str = "RECON_SUMMARY.txt";
const STRINGS_FILE: &str = "strings_index.txt";
const ANCHORS_FILE: &str = "behavior_anchors.txt";

/// Address ranges mapped as instruction memory on ESP32 family chips
const EXECUTABLE_RANGES: &[(u32, u32)] = &[
    (0x4000_0000, 0x40FF_FFFF),
    (0x4200_0000, 0x42FF_FFFF),
    (0x4037_0000, 0x403F_FFFF),
];

/// Where and how a bundle is written
#[derive(Debug, Clone)]
pub struct ReconOptions {
    pub out_dir: PathBuf,
    pub objdump: Option<PathBuf>,
    pub preferred_app: String,
    pub min_string_len: usize,
    pub anchor_words: Vec<String>,
}

impl ReconOptions {
    /// Options for writing to `out_dir`, taking everything else from `config`.
    pub fn new(out_dir: PathBuf, config: &ReconConfig) -> Self {
        Self {
            out_dir,
            objdump: config.objdump.clone(),
            preferred_app: config.preferred_app.clone(),
            min_string_len: config.min_string_len,
            anchor_words: config.anchor_words.clone(),
        }
    }
}

/// How far the bundle got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconOutcome {
    Complete,
    NoPartitionTable,
    NoAppImage,
}

/// What was written, and the lines of `RECON_SUMMARY.txt`
#[derive(Debug, Clone)]
pub struct ReconSummary {
    pub outcome: ReconOutcome,
    pub files: Vec<PathBuf>,
    pub lines: Vec<String>,
}

struct Bundle<'a> {
    out_dir: &'a Path,
    files: Vec<PathBuf>,
    lines: Vec<String>,
}

impl Bundle<'_> {
    fn write(&mut self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<PathBuf, Error> {
        let path = self.out_dir.join(relative);
        write(&path, contents).map_err(|e| Error::WriteError(path.clone(), e))?;
        debug!("Wrote {} bytes to {}", contents.len(), path.display());

        self.files.push(path.clone());
        Ok(path)
    }

    fn write_lines(&mut self, relative: &str, lines: &[String]) -> Result<PathBuf, Error> {
        let mut contents = lines.join("\n");
        contents.push('\n');
        self.write(relative, contents.as_bytes())
    }

    fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn finish(mut self, outcome: ReconOutcome) -> Result<ReconSummary, Error> {
        let lines = self.lines.clone();
        self.write_lines(SUMMARY_FILE, &lines)?;
        info!("Recon bundle written to {}", self.out_dir.display());

        Ok(ReconSummary {
            outcome,
            files: self.files,
            lines,
        })
    }
}

/// Write the recon bundle for `data` into `options.out_dir`.
pub fn build_bundle(
    input: &Path,
    data: &[u8],
    map: &FirmwareMap,
    options: &ReconOptions,
) -> Result<ReconSummary, Error> {
    create_dir(&options.out_dir)?;
    let objdump = find_objdump(options.objdump.as_deref());

    let mut bundle = Bundle {
        out_dir: &options.out_dir,
        files: Vec::new(),
        lines: Vec::new(),
    };
    bundle.line(format!("Input: {}", input.display()));
    bundle.line(format!("File SHA256: {}", hex::encode(Sha256::digest(data))));
    bundle.line(format!("Output: {}", options.out_dir.display()));
    bundle.line("");

    match map.bootloader() {
        Some(image) => {
            bundle.write("bootloader.bin", image_bytes(image, data)?)?;
            bundle.line(format!(
                "bootloader.bin: offset=0x{:08X} size=0x{:08X}",
                image.offset(),
                image.total_size()
            ));
        }
        None => bundle.line("bootloader: not parsed"),
    }

    let Some(table) = map.partition_table() else {
        bundle.line("partition table: not found");
        return bundle.finish(ReconOutcome::NoPartitionTable);
    };

    let table_end = data.len().min(table.offset().saturating_add(PARTITION_TABLE_SIZE));
    let table_bytes = data
        .get(table.offset()..table_end)
        .ok_or(Error::MapMismatch)?;
    bundle.write("partitions.bin", table_bytes)?;
    bundle.line(format!(
        "partitions.bin: offset=0x{:08X} size=0x{:08X}",
        table.offset(),
        table_bytes.len()
    ));

    let Some((entry, image)) = primary_app(map, &options.preferred_app) else {
        bundle.line("application images: none parsed");
        return bundle.finish(ReconOutcome::NoAppImage);
    };

    let app_file = format!("{}.bin", file_stem(entry.label()));
    bundle.write(&app_file, image_bytes(image, data)?)?;
    bundle.line(format!(
        "{app_file}: offset=0x{:08X} size=0x{:08X}",
        image.offset(),
        image.total_size()
    ));

    create_dir(&options.out_dir.join("segments"))?;
    create_dir(&options.out_dir.join("disasm"))?;

    let mut string_index = vec![String::from(
        "# Strings (segment offset + runtime address + text)",
    )];
    let mut anchors = vec![String::from("# Behavior anchors")];

    for segment in image.segments() {
        let segment_data = segment.data(data).ok_or(Error::MapMismatch)?;
        let name = format!("seg{}_0x{:08X}", segment.index(), segment.load_addr());
        let segment_path =
            bundle.write(Path::new("segments").join(format!("{name}.bin")), segment_data)?;
        bundle.line(format!(
            "segment {}: file=0x{:08X} size=0x{:08X} load=0x{:08X} -> {name}.bin",
            segment.index(),
            segment.data_offset(),
            segment.size(),
            segment.load_addr()
        ));

        let disassembler = objdump
            .as_deref()
            .filter(|_| is_executable_addr(segment.load_addr()));
        if let Some(disassembler) = disassembler {
            match disassemble(disassembler, &segment_path, segment) {
                Ok(listing) => {
                    let listing_path = Path::new("disasm").join(format!("{name}.S"));
                    bundle.write(listing_path, listing.as_bytes())?;
                    bundle.line(format!("  disasm: {name}.S"));
                }
                Err(Error::DisassemblerFailed { segment: index, status }) => {
                    warn!("Disassembly of segment {index} failed with {status}");
                    let code = status
                        .code()
                        .map_or_else(|| String::from("signal"), |code| code.to_string());
                    bundle.line(format!("  disasm failed for segment {index}: exit={code}"));
                }
                Err(e) => return Err(e),
            }
        }

        for found in printable_strings(segment_data, options.min_string_len) {
            let runtime = segment.load_addr() as u64 + found.offset as u64;
            string_index.push(format!(
                "0x{:08X} 0x{runtime:08X} {}",
                found.offset, found.text
            ));
            if options
                .anchor_words
                .iter()
                .any(|word| found.text.contains(word.as_str()))
            {
                anchors.push(format!("0x{runtime:08X} {}", found.text));
            }
        }
    }

    bundle.write_lines(STRINGS_FILE, &string_index)?;
    bundle.write_lines(ANCHORS_FILE, &anchors)?;

    match &objdump {
        Some(objdump) => bundle.line(format!("objdump used: {}", objdump.display())),
        None => bundle.line("objdump used: not found (disassembly skipped)"),
    }

    bundle.line("");
    bundle.line("Next step:");
    bundle.line("1) Open disasm/*.S and behavior_anchors.txt together.");
    bundle.line("2) Trace anchor strings back to nearby call sites.");
    bundle.line("3) Build function tags (UI, seek engine, radio I/O, storage).");

    bundle.finish(ReconOutcome::Complete)
}

/// The decoded app to extract: the preferred label if it decoded, otherwise
/// the decoded app at the lowest offset.
pub fn primary_app<'a>(
    map: &'a FirmwareMap,
    preferred: &str,
) -> Option<(&'a PartitionEntry, &'a DecodedImage)> {
    map.decoded_apps()
        .min_by_key(|(entry, _)| (entry.label() != preferred, entry.offset()))
}

pub fn is_executable_addr(addr: u32) -> bool {
    EXECUTABLE_RANGES
        .iter()
        .any(|&(start, end)| (start..=end).contains(&addr))
}

/// An explicitly given `objdump`, or the Xtensa one on `PATH`.
pub fn find_objdump(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(DEFAULT_OBJDUMP))
        .find(|candidate| candidate.is_file())
}

fn disassemble(
    objdump: &Path,
    segment_path: &Path,
    segment: &DecodedSegment,
) -> Result<String, Error> {
    let output = Command::new(objdump)
        .args(["-D", "-b", "binary", "-m", "xtensa"])
        .arg(format!("--adjust-vma=0x{:08X}", segment.load_addr()))
        .arg(segment_path)
        .output()?;

    if !output.status.success() {
        return Err(Error::DisassemblerFailed {
            segment: segment.index(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn image_bytes<'a>(image: &DecodedImage, data: &'a [u8]) -> Result<&'a [u8], Error> {
    image.bytes(data).ok_or(Error::MapMismatch)
}

fn create_dir(path: &Path) -> Result<(), Error> {
    create_dir_all(path).map_err(|e| Error::WriteError(path.to_path_buf(), e))
}

/// Partition labels come straight from flash, so keep them from escaping the
/// output directory.
fn file_stem(label: &str) -> String {
    let stem: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() {
        String::from("app")
    } else {
        stem
    }
}
