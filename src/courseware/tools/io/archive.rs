//! Gzip-compressed ustar archives holding a flat map of text files.
//!
//! Only what the course archive needs is supported: regular files and the
//! directory entries synthesised for them, one fixed top-level directory, and
//! UTF-8 text content.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::courseware::tools::error::{Result, ToolError};

/// Relative posix path → file content.
pub type EntryMap = BTreeMap<String, String>;

/// Top-level directory every entry is stored under.
pub const ARCHIVE_ROOT: &str = "course";

const BLOCK_SIZE: usize = 512;
const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;

const NAME: std::ops::Range<usize> = 0..100;
const MODE: std::ops::Range<usize> = 100..108;
const UID: std::ops::Range<usize> = 108..116;
const GID: std::ops::Range<usize> = 116..124;
const SIZE: std::ops::Range<usize> = 124..136;
const MTIME: std::ops::Range<usize> = 136..148;
const CHECKSUM: std::ops::Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const MAGIC: std::ops::Range<usize> = 257..263;
const VERSION: std::ops::Range<usize> = 263..265;
const PREFIX: std::ops::Range<usize> = 345..500;

const FILE_MODE: &[u8] = b"0000644";
const DIR_MODE: &[u8] = b"0000755";
const REGULAR_FILE: u8 = b'0';
const DIRECTORY: u8 = b'5';

/// Packs `entries` into a gzip-compressed tar stamped with the current time.
pub fn pack_entries(entries: &EntryMap) -> Result<Vec<u8>> {
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    pack_entries_at(entries, mtime)
}

/// Packs `entries` with an explicit modification time.
pub fn pack_entries_at(entries: &EntryMap, mtime: u64) -> Result<Vec<u8>> {
    let tar = write_tar(entries, mtime)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar)?;
    let compressed = encoder.finish()?;
    debug!(
        entries = entries.len(),
        tar_bytes = tar.len(),
        gzip_bytes = compressed.len(),
        "packed course archive"
    );
    Ok(compressed)
}

/// Builds the uncompressed tar stream.
///
/// Every path is placed under [`ARCHIVE_ROOT`]. Directory headers for every
/// distinct parent come first in lexicographic order, then one header and
/// padded content per file, then two zero blocks.
pub fn write_tar(entries: &EntryMap, mtime: u64) -> Result<Vec<u8>> {
    let mut directories = BTreeSet::new();
    directories.insert(format!("{ARCHIVE_ROOT}/"));
    for path in entries.keys() {
        let full = format!("{ARCHIVE_ROOT}/{path}");
        let mut end = 0;
        while let Some(pos) = full[end..].find('/') {
            end += pos + 1;
            directories.insert(full[..end].to_string());
        }
    }

    let mut out = Vec::new();
    for directory in &directories {
        out.extend_from_slice(&build_header(directory, 0, mtime, DIRECTORY)?);
    }
    for (path, content) in entries {
        let full = format!("{ARCHIVE_ROOT}/{path}");
        let bytes = content.as_bytes();
        out.extend_from_slice(&build_header(&full, bytes.len() as u64, mtime, REGULAR_FILE)?);
        out.extend_from_slice(bytes);
        out.resize(padded(out.len()), 0);
    }
    out.resize(out.len() + 2 * BLOCK_SIZE, 0);
    Ok(out)
}

fn padded(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn build_header(path: &str, size: u64, mtime: u64, typeflag: u8) -> Result<[u8; BLOCK_SIZE]> {
    let mut header = [0u8; BLOCK_SIZE];
    let (prefix, name) = split_path(path)?;

    header[NAME][..name.len()].copy_from_slice(name.as_bytes());
    header[PREFIX][..prefix.len()].copy_from_slice(prefix.as_bytes());
    let mode = if typeflag == DIRECTORY { DIR_MODE } else { FILE_MODE };
    header[MODE][..mode.len()].copy_from_slice(mode);
    write_octal(&mut header[UID], 0)?;
    write_octal(&mut header[GID], 0)?;
    write_octal(&mut header[SIZE], size)?;
    write_octal(&mut header[MTIME], mtime)?;
    header[TYPEFLAG] = typeflag;
    header[MAGIC].copy_from_slice(b"ustar\0");
    header[VERSION].copy_from_slice(b"00");

    let checksum = header_checksum(&header);
    let digits = format!("{checksum:06o}");
    header[CHECKSUM][..6].copy_from_slice(digits.as_bytes());
    header[CHECKSUM][6] = 0;
    header[CHECKSUM][7] = b' ';
    Ok(header)
}

/// Splits a path into ustar `(prefix, name)`, using the prefix field only
/// when the path does not fit in the name field.
fn split_path(path: &str) -> Result<(&str, &str)> {
    if path.len() <= NAME_LEN {
        return Ok(("", path));
    }
    for (idx, _) in path.match_indices('/') {
        // A trailing slash stays with the directory name.
        if idx + 1 == path.len() {
            continue;
        }
        let (prefix, name) = (&path[..idx], &path[idx + 1..]);
        if prefix.len() <= PREFIX_LEN && name.len() <= NAME_LEN && !name.is_empty() {
            return Ok((prefix, name));
        }
    }
    Err(ToolError::Archive(format!(
        "path '{path}' is too long for a ustar header"
    )))
}

/// Writes `value` as zero-padded octal followed by a NUL terminator.
fn write_octal(field: &mut [u8], value: u64) -> Result<()> {
    let width = field.len() - 1;
    let digits = format!("{value:0width$o}");
    if digits.len() > width {
        return Err(ToolError::Archive(format!(
            "value {value} does not fit in a {width}-digit header field"
        )));
    }
    field[..width].copy_from_slice(digits.as_bytes());
    field[width] = 0;
    Ok(())
}

/// Unsigned byte sum of a header with the checksum field read as spaces.
pub fn header_checksum(header: &[u8]) -> u32 {
    header
        .iter()
        .enumerate()
        .map(|(idx, &byte)| {
            if CHECKSUM.contains(&idx) {
                u32::from(b' ')
            } else {
                u32::from(byte)
            }
        })
        .sum()
}

/// Decompresses and walks a course archive.
///
/// Input that is not gzip at all is a fatal error. A stream that breaks off
/// part way is walked as far as it goes.
pub fn unpack_entries(bytes: &[u8]) -> Result<EntryMap> {
    let mut decoder = GzDecoder::new(bytes);
    let mut tar = Vec::new();
    if let Err(err) = decoder.read_to_end(&mut tar) {
        if tar.is_empty() {
            return Err(ToolError::Archive(format!(
                "input is not a readable gzip stream: {err}"
            )));
        }
        warn!(error = %err, recovered_bytes = tar.len(), "gzip stream truncated");
    }
    let entries = read_tar(&tar);
    debug!(entries = entries.len(), "unpacked course archive");
    Ok(entries)
}

/// Walks an uncompressed tar stream and returns its regular files with the
/// [`ARCHIVE_ROOT`] component removed. Never fails; damaged or short input
/// yields the files read before the damage.
pub fn read_tar(bytes: &[u8]) -> EntryMap {
    let mut entries = EntryMap::new();
    let mut offset = 0;

    while offset + BLOCK_SIZE <= bytes.len() {
        let header = &bytes[offset..offset + BLOCK_SIZE];
        if header.iter().all(|&byte| byte == 0) {
            break;
        }

        let name = c_string(&header[NAME]);
        let path = if &header[MAGIC][..5] == b"ustar" {
            let prefix = c_string(&header[PREFIX]);
            if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            }
        } else {
            name
        };

        let Some(size) = parse_octal(&header[SIZE]) else {
            warn!(%path, "unreadable size field, stopping archive walk");
            break;
        };
        offset += BLOCK_SIZE;

        let typeflag = header[TYPEFLAG];
        if typeflag == 0 || typeflag == REGULAR_FILE {
            let end = offset.saturating_add(size);
            if end > bytes.len() {
                warn!(%path, size, "file content truncated, stopping archive walk");
                break;
            }
            let content = String::from_utf8_lossy(&bytes[offset..end]).into_owned();
            let relative = strip_root(&path);
            if !relative.is_empty() {
                entries.insert(relative.to_string(), content);
            }
        }
        offset = offset.saturating_add(padded(size));
    }

    entries
}

fn strip_root(path: &str) -> &str {
    let path = path.trim_start_matches("./");
    path.strip_prefix(ARCHIVE_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
}

fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&byte| byte == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn parse_octal(field: &[u8]) -> Option<usize> {
    let text = c_string(field);
    let digits = text.trim_matches(|ch: char| ch == ' ' || ch == '\0');
    if digits.is_empty() {
        return Some(0);
    }
    usize::from_str_radix(digits, 8).ok()
}
