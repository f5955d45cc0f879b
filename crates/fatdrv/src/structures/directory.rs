//! Directory-entry building blocks: attribute flags, 8.3 short-name
//! handling and the long-file-name checksum.

use alloc::string::String;
use alloc::vec::Vec;

use crate::structures::raw::directory::{
    LAST_LONG_ENTRY, LFN_UNITS_PER_ENTRY, RawLfnEntry,
};

bitflags::bitflags! {
    /// The attribute byte of a directory entry.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl FileAttributes {
    /// The attribute combination that marks an LFN continuation slot.
    pub const LONG_NAME: u8 = 0x0F;
}

/// First name byte of a never-used entry; terminates iteration.
pub const ENTRY_FREE: u8 = 0x00;
/// First name byte of a deleted entry.
pub const ENTRY_DELETED: u8 = 0xE5;
/// Stored in place of a leading 0xE5 name byte.
pub const ENTRY_KANJI_ESCAPE: u8 = 0x05;

/// The short-name checksum stored in every LFN slot: a rotate-right-and-add
/// over the 11 name bytes.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for b in short_name {
        sum = ((sum >> 1) | (sum << 7)).wrapping_add(*b);
    }
    sum
}

/// Formats an 11-byte short name as `NAME.EXT`, trimming the space padding
/// and restoring a 0x05 escape to its 0xE5 value.
pub fn format_short_name(raw: &[u8; 11]) -> String {
    let mut name = *raw;
    if name[0] == ENTRY_KANJI_ESCAPE {
        name[0] = ENTRY_DELETED;
    }

    let base_len = name[..8].iter().rposition(|b| *b != b' ').map_or(0, |p| p + 1);
    let ext_len = name[8..].iter().rposition(|b| *b != b' ').map_or(0, |p| p + 1);

    let mut out = String::with_capacity(12);
    out.extend(name[..base_len].iter().map(|b| *b as char));
    if ext_len > 0 {
        out.push('.');
        out.extend(name[8..8 + ext_len].iter().map(|b| *b as char));
    }
    out
}

fn is_short_name_char(c: char) -> bool {
    c.is_ascii_uppercase()
        || c.is_ascii_digit()
        || matches!(
            c,
            '$' | '%' | '\'' | '-' | '_' | '@' | '~' | '`' | '!' | '(' | ')' | '{' | '}' | '^'
                | '#' | '&'
        )
}

/// Converts a path component to an 11-byte short name, if it fits 8.3 after
/// ASCII upcasing. Returns `None` when the component needs an LFN.
pub fn short_name_from_str(component: &str) -> Option<[u8; 11]> {
    let (base, ext) = match component.rsplit_once('.') {
        // A leading dot is a name byte, not a separator.
        Some(("", _)) | None => (component, ""),
        Some((base, ext)) => (base, ext),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }

    let mut out = [b' '; 11];
    for (i, c) in base.chars().enumerate() {
        let c = c.to_ascii_uppercase();
        if !is_short_name_char(c) {
            return None;
        }
        out[i] = c as u8;
    }
    for (i, c) in ext.chars().enumerate() {
        let c = c.to_ascii_uppercase();
        if !is_short_name_char(c) {
            return None;
        }
        out[8 + i] = c as u8;
    }
    if out[0] == ENTRY_DELETED {
        out[0] = ENTRY_KANJI_ESCAPE;
    }
    Some(out)
}

/// Builds the `BASIS~N` short name for a component that needs an LFN.
pub fn basis_name(component: &str, tail: u32) -> [u8; 11] {
    let (base, ext) = match component.rsplit_once('.') {
        Some(("", _)) | None => (component, ""),
        Some((base, ext)) => (base, ext),
    };

    let mut out = [b' '; 11];
    let mut pos = 0;
    for c in base.chars() {
        if pos == 8 {
            break;
        }
        let c = c.to_ascii_uppercase();
        if c == ' ' || c == '.' {
            continue;
        }
        out[pos] = if is_short_name_char(c) { c as u8 } else { b'_' };
        pos += 1;
    }
    if pos == 0 {
        out[0] = b'_';
        pos = 1;
    }

    // Append ~N, shortening the base so it fits in 8 bytes.
    let mut digits = [0u8; 10];
    let mut n = tail.max(1);
    let mut len = 0;
    while n > 0 {
        digits[len] = b'0' + (n % 10) as u8;
        n /= 10;
        len += 1;
    }
    let keep = pos.min(8 - 1 - len);
    out[keep] = b'~';
    for i in 0..len {
        out[keep + 1 + i] = digits[len - 1 - i];
    }
    for slot in out.iter_mut().take(8).skip(keep + 1 + len) {
        *slot = b' ';
    }

    for (i, c) in ext.chars().take(3).enumerate() {
        let c = c.to_ascii_uppercase();
        out[8 + i] = if is_short_name_char(c) { c as u8 } else { b'_' };
    }
    out
}

/// Encodes a long name into LFN slots, ordered as they are written on disk:
/// highest sequence number (flagged [`LAST_LONG_ENTRY`]) first, the slot
/// with sequence 1 immediately before the short entry.
///
/// Returns `None` when the name exceeds 20 slots (255 units).
pub fn build_lfn_entries(long_name: &str, checksum: u8) -> Option<Vec<RawLfnEntry>> {
    let units: Vec<u16> = long_name.encode_utf16().collect();
    if units.is_empty() || units.len() > 255 {
        return None;
    }
    let slots = units.len().div_ceil(LFN_UNITS_PER_ENTRY);

    let mut out = Vec::with_capacity(slots);
    for seq in (1..=slots).rev() {
        let mut chunk = [0xFFFFu16; LFN_UNITS_PER_ENTRY];
        let start = (seq - 1) * LFN_UNITS_PER_ENTRY;
        let span = &units[start..units.len().min(start + LFN_UNITS_PER_ENTRY)];
        chunk[..span.len()].copy_from_slice(span);
        if span.len() < LFN_UNITS_PER_ENTRY {
            chunk[span.len()] = 0x0000;
        }

        let mut entry: RawLfnEntry = bytemuck::Zeroable::zeroed();
        entry.sequence = seq as u8 | if seq == slots { LAST_LONG_ENTRY } else { 0 };
        entry.attributes = FileAttributes::LONG_NAME;
        entry.checksum = checksum;
        entry.set_units(&chunk);
        out.push(entry);
    }
    Some(out)
}
