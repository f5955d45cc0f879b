//! Directory iteration: 32-byte slot decoding, long-file-name reassembly
//! and the raw slot access the mutation paths build on.
//!
//! A directory is either the fixed FAT12/16 root region (bounded by the
//! BPB's root-entry count, walked sector by sector) or a cluster chain
//! (walked through the FAT, a cluster at a time). [`DirReader`] hides the
//! difference.

use alloc::string::String;
use alloc::vec::Vec;

use log::warn;

use crate::device::BlockDevice;
use crate::error::Error;
use crate::structures::FatType;
use crate::structures::boot_sector::DIR_ENTRY_SIZE;
use crate::structures::directory::{
    ENTRY_DELETED, ENTRY_FREE, FileAttributes, format_short_name, lfn_checksum,
};
use crate::structures::raw::directory::{
    LAST_LONG_ENTRY, LFN_MAX_UNITS, LFN_UNITS_PER_ENTRY, RawDirEntry, RawLfnEntry,
};
use crate::structures::time::FatTime;
use crate::volume::Volume;

/// Where a directory entry lives, for the paths that rewrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryLocation {
    /// First cluster of the containing directory; 0 is the fixed FAT12/16
    /// root region.
    pub dir_cluster: u32,
    /// Slot index of the short entry within the directory.
    pub index: u32,
    /// LFN slots immediately preceding the short entry.
    pub lfn_slots: u32,
}

/// A decoded directory record.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    /// The 8.3 name, formatted as `NAME.EXT`.
    pub short_name: String,
    /// The long name, when valid LFN slots preceded the entry.
    pub long_name: Option<String>,
    pub attributes: FileAttributes,
    pub first_cluster: u32,
    pub size: u32,
    pub created: FatTime,
    pub modified: FatTime,
    /// Access stamps carry a date only; the time word is zero.
    pub accessed: FatTime,
    pub location: DirEntryLocation,
}

impl DirEntryInfo {
    /// The display name: the long name when present, the short one otherwise.
    pub fn name(&self) -> &str {
        self.long_name.as_deref().unwrap_or(&self.short_name)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes.contains(FileAttributes::VOLUME_ID) && !self.is_directory()
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes.contains(FileAttributes::HIDDEN)
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(FileAttributes::READ_ONLY)
    }

    /// Case-insensitive match against the short or the long name.
    pub fn matches(&self, component: &str) -> bool {
        self.short_name.eq_ignore_ascii_case(component)
            || self
                .long_name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(component))
    }

    fn from_raw(raw: &RawDirEntry, long_name: Option<String>, location: DirEntryLocation) -> Self {
        Self {
            short_name: format_short_name(&raw.name),
            long_name,
            attributes: FileAttributes::from_bits_truncate(raw.attributes),
            first_cluster: raw.first_cluster(),
            size: u32::from_le_bytes(raw.file_size),
            created: FatTime::new(
                u16::from_le_bytes(raw.create_time),
                u16::from_le_bytes(raw.create_date),
            ),
            modified: FatTime::new(
                u16::from_le_bytes(raw.write_time),
                u16::from_le_bytes(raw.write_date),
            ),
            accessed: FatTime::new(0, u16::from_le_bytes(raw.access_date)),
            location,
        }
    }
}

/// Accumulates LFN slots until the short entry they extend arrives.
///
/// Slots appear in reverse order: the first slot on disk carries the highest
/// sequence number with [`LAST_LONG_ENTRY`] set, the slot with sequence 1
/// sits immediately before the short entry. Any break in the protocol
/// invalidates the pending name; iteration then falls back to the 8.3 name.
struct LfnAssembler {
    units: [u16; LFN_MAX_UNITS],
    checksum: u8,
    expected_seq: u8,
    slots: u8,
    active: bool,
}

impl Default for LfnAssembler {
    fn default() -> Self {
        Self {
            units: [0u16; LFN_MAX_UNITS],
            checksum: 0,
            expected_seq: 0,
            slots: 0,
            active: false,
        }
    }
}

impl LfnAssembler {
    fn reset(&mut self) {
        self.active = false;
        self.slots = 0;
    }

    fn push(&mut self, slot: &RawLfnEntry) {
        let seq = slot.sequence & !LAST_LONG_ENTRY;
        if slot.sequence & LAST_LONG_ENTRY != 0 {
            if seq == 0 || seq as usize > LFN_MAX_UNITS / LFN_UNITS_PER_ENTRY {
                self.reset();
                return;
            }
            self.active = true;
            self.slots = seq;
            self.checksum = slot.checksum;
            self.expected_seq = seq;
        } else if !self.active || seq != self.expected_seq || slot.checksum != self.checksum {
            self.reset();
            return;
        }
        let start = (seq - 1) as usize * LFN_UNITS_PER_ENTRY;
        self.units[start..start + LFN_UNITS_PER_ENTRY].copy_from_slice(&slot.units());
        self.expected_seq = seq - 1;
    }

    /// Yields the assembled name if the sequence completed and its checksum
    /// matches the short entry, along with the number of slots it occupied.
    fn take(&mut self, short_name: &[u8; 11]) -> (Option<String>, u32) {
        if !self.active {
            return (None, 0);
        }
        let complete = self.expected_seq == 0;
        let checksum_ok = self.checksum == lfn_checksum(short_name);
        let slots = self.slots as u32;
        self.reset();

        if !complete || !checksum_ok {
            warn!(
                "discarding long name for {:?}: {}",
                format_short_name(short_name),
                if complete { "checksum mismatch" } else { "incomplete sequence" }
            );
            return (None, 0);
        }

        let end = self.units[..slots as usize * LFN_UNITS_PER_ENTRY]
            .iter()
            .position(|u| *u == 0x0000)
            .unwrap_or(slots as usize * LFN_UNITS_PER_ENTRY);
        let name: String = char::decode_utf16(self.units[..end].iter().copied())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        (Some(name), slots)
    }
}

/// An open directory, reading entries in on-disk order.
pub struct DirReader<'v, D: BlockDevice> {
    volume: &'v mut Volume<D>,
    dir_cluster: u32,
    current_cluster: u32,
    fixed_root: bool,
    buffer: Vec<u8>,
    entries_per_buffer: u32,
    slot_in_buffer: u32,
    entry_index: u32,
    max_entries: u32,
    finished: bool,
    lfn: LfnAssembler,
}

impl<'v, D: BlockDevice> DirReader<'v, D> {
    /// Opens the directory starting at `first_cluster` (0 opens the root on
    /// any variant).
    pub fn open(volume: &'v mut Volume<D>, first_cluster: u32) -> Result<Self, Error> {
        let (fixed_root, start) = volume.dir_region(first_cluster);
        let mut reader = if fixed_root {
            let buffer = volume.sector_buf();
            let entries_per_buffer = volume.bytes_per_sector / DIR_ENTRY_SIZE;
            let max_entries = volume.root_entry_count;
            Self {
                volume,
                dir_cluster: 0,
                current_cluster: 0,
                fixed_root,
                buffer,
                entries_per_buffer,
                slot_in_buffer: 0,
                entry_index: 0,
                max_entries,
                finished: false,
                lfn: LfnAssembler::default(),
            }
        } else {
            let buffer = volume.cluster_buf();
            let entries_per_buffer = volume.bytes_per_cluster / DIR_ENTRY_SIZE;
            Self {
                volume,
                dir_cluster: start,
                current_cluster: start,
                fixed_root,
                buffer,
                entries_per_buffer,
                slot_in_buffer: 0,
                entry_index: 0,
                max_entries: 0,
                finished: false,
                lfn: LfnAssembler::default(),
            }
        };
        reader.load_region()?;
        Ok(reader)
    }

    /// Loads the region containing `entry_index` (fixed root) or
    /// `current_cluster` (chain).
    fn load_region(&mut self) -> Result<(), Error> {
        if self.fixed_root {
            if self.entry_index >= self.max_entries {
                return Err(Error::Eof);
            }
            let sector = self.volume.root_dir_begin_sector
                + self.entry_index / self.entries_per_buffer;
            self.volume.device.read_sectors(sector, 1, &mut self.buffer)?;
        } else {
            let cluster = self.current_cluster;
            self.volume.read_cluster(cluster, &mut self.buffer)?;
        }
        self.slot_in_buffer = 0;
        Ok(())
    }

    fn advance_region(&mut self) -> Result<(), Error> {
        if self.fixed_root {
            self.load_region()
        } else {
            let next = self.volume.next_cluster(self.current_cluster)?;
            if self.volume.fat_type().is_eoc(next) {
                return Err(Error::Eof);
            }
            if self.volume.fat_type().is_bad(next) || !self.volume.is_valid_cluster(next) {
                return Err(Error::Corrupted);
            }
            self.current_cluster = next;
            self.load_region()
        }
    }

    /// Reads the next record. `Err(Eof)` signals exhaustion.
    ///
    /// Deleted slots, LFN continuations and the volume label are consumed
    /// transparently; LFN slots contribute to the following record's long
    /// name when their checksums hold up.
    pub fn read_dir(&mut self) -> Result<DirEntryInfo, Error> {
        loop {
            if self.finished {
                return Err(Error::Eof);
            }
            if self.slot_in_buffer >= self.entries_per_buffer {
                match self.advance_region() {
                    Ok(()) => {}
                    Err(Error::Eof) => {
                        self.finished = true;
                        return Err(Error::Eof);
                    }
                    Err(e) => return Err(e),
                }
            }

            let offset = (self.slot_in_buffer * DIR_ENTRY_SIZE) as usize;
            let raw: RawDirEntry =
                *bytemuck::from_bytes(&self.buffer[offset..offset + DIR_ENTRY_SIZE as usize]);
            let index = self.entry_index;
            self.slot_in_buffer += 1;
            self.entry_index += 1;

            match raw.name[0] {
                ENTRY_FREE => {
                    self.finished = true;
                    return Err(Error::Eof);
                }
                ENTRY_DELETED => {
                    self.lfn.reset();
                    continue;
                }
                _ => {}
            }

            if raw.attributes == FileAttributes::LONG_NAME {
                self.lfn.push(bytemuck::cast_ref(&raw));
                continue;
            }

            let attributes = FileAttributes::from_bits_truncate(raw.attributes);
            if attributes.contains(FileAttributes::VOLUME_ID)
                && !attributes.contains(FileAttributes::DIRECTORY)
            {
                self.lfn.reset();
                continue;
            }

            let (long_name, lfn_slots) = self.lfn.take(&raw.name);
            let location = DirEntryLocation {
                dir_cluster: self.dir_cluster,
                index,
                lfn_slots,
            };
            return Ok(DirEntryInfo::from_raw(&raw, long_name, location));
        }
    }

    /// Like [`read_dir`](Self::read_dir) but yields the volume label too,
    /// which plain iteration skips. Long names are not assembled.
    pub fn read_dir_any(&mut self) -> Result<DirEntryInfo, Error> {
        loop {
            if self.finished {
                return Err(Error::Eof);
            }
            if self.slot_in_buffer >= self.entries_per_buffer {
                match self.advance_region() {
                    Ok(()) => {}
                    Err(Error::Eof) => {
                        self.finished = true;
                        return Err(Error::Eof);
                    }
                    Err(e) => return Err(e),
                }
            }
            let offset = (self.slot_in_buffer * DIR_ENTRY_SIZE) as usize;
            let raw: RawDirEntry =
                *bytemuck::from_bytes(&self.buffer[offset..offset + DIR_ENTRY_SIZE as usize]);
            let index = self.entry_index;
            self.slot_in_buffer += 1;
            self.entry_index += 1;

            match raw.name[0] {
                ENTRY_FREE => {
                    self.finished = true;
                    return Err(Error::Eof);
                }
                ENTRY_DELETED => continue,
                _ => {}
            }
            if raw.attributes == FileAttributes::LONG_NAME {
                continue;
            }
            let location = DirEntryLocation {
                dir_cluster: self.dir_cluster,
                index,
                lfn_slots: 0,
            };
            return Ok(DirEntryInfo::from_raw(&raw, None, location));
        }
    }
}

impl<D: BlockDevice> Iterator for DirReader<'_, D> {
    type Item = Result<DirEntryInfo, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_dir() {
            Err(Error::Eof) => None,
            other => Some(other),
        }
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Whether `first_cluster` names the fixed root region, and the cluster
    /// iteration actually starts at.
    pub(crate) fn dir_region(&self, first_cluster: u32) -> (bool, u32) {
        if first_cluster == 0 {
            if self.fat_type() == FatType::Fat32 {
                (false, self.root_cluster)
            } else {
                (true, 0)
            }
        } else {
            (false, first_cluster)
        }
    }

    /// Opens the root directory.
    pub fn open_root_dir(&mut self) -> Result<DirReader<'_, D>, Error> {
        DirReader::open(self, 0)
    }

    /// Resolves `path` and opens it as a directory.
    pub fn open_dir(&mut self, path: &str) -> Result<DirReader<'_, D>, Error> {
        let entry = crate::path::resolve(self, path)?;
        if !entry.is_directory() {
            return Err(Error::NotADirectory);
        }
        DirReader::open(self, entry.first_cluster)
    }

    /// Reads the raw 32-byte slot `index` of a directory. `Err(Eof)` when
    /// the index lies beyond the region.
    pub(crate) fn read_dir_slot(
        &mut self,
        dir_cluster: u32,
        index: u32,
    ) -> Result<RawDirEntry, Error> {
        let (sector, offset) = self.dir_slot_position(dir_cluster, index, false)?;
        let mut buf = self.sector_buf();
        self.device.read_sectors(sector, 1, &mut buf)?;
        Ok(*bytemuck::from_bytes(
            &buf[offset..offset + DIR_ENTRY_SIZE as usize],
        ))
    }

    /// Rewrites the raw 32-byte slot `index` of a directory, extending a
    /// chain-backed directory when `grow` is set and the index lies one
    /// region past its end.
    pub(crate) fn write_dir_slot(
        &mut self,
        dir_cluster: u32,
        index: u32,
        entry: &RawDirEntry,
        grow: bool,
    ) -> Result<(), Error> {
        let (sector, offset) = self.dir_slot_position(dir_cluster, index, grow)?;
        let mut buf = self.sector_buf();
        self.device.read_sectors(sector, 1, &mut buf)?;
        buf[offset..offset + DIR_ENTRY_SIZE as usize].copy_from_slice(bytemuck::bytes_of(entry));
        self.device.write_sectors(sector, 1, &buf)?;
        Ok(())
    }

    /// Maps a slot index to its sector and byte offset, walking the chain
    /// for cluster-backed directories.
    fn dir_slot_position(
        &mut self,
        dir_cluster: u32,
        index: u32,
        grow: bool,
    ) -> Result<(u32, usize), Error> {
        let entries_per_sector = self.bytes_per_sector / DIR_ENTRY_SIZE;
        let (fixed_root, start) = self.dir_region(dir_cluster);
        if fixed_root {
            if index >= self.root_entry_count {
                return Err(Error::Eof);
            }
            let sector = self.root_dir_begin_sector + index / entries_per_sector;
            let offset = ((index % entries_per_sector) * DIR_ENTRY_SIZE) as usize;
            return Ok((sector, offset));
        }

        let entries_per_cluster = self.bytes_per_cluster / DIR_ENTRY_SIZE;
        let mut cluster = start;
        for _ in 0..index / entries_per_cluster {
            let next = self.next_cluster(cluster)?;
            if self.fat_type().is_eoc(next) {
                if !grow {
                    return Err(Error::Eof);
                }
                let fresh = self.extend_chain(cluster)?;
                self.zero_cluster(fresh)?;
                // The FAT must be durable before an entry in the new
                // cluster becomes reachable.
                self.flush()?;
                cluster = fresh;
                continue;
            }
            if !self.is_valid_cluster(next) {
                return Err(Error::Corrupted);
            }
            cluster = next;
        }
        let within = index % entries_per_cluster;
        let sector = self.cluster_to_sector(cluster) + within / entries_per_sector;
        let offset = ((within % entries_per_sector) * DIR_ENTRY_SIZE) as usize;
        Ok((sector, offset))
    }

    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<(), Error> {
        let buf = self.cluster_buf();
        self.write_cluster(cluster, &buf)
    }

    /// Finds `count` contiguous free slots, growing chain-backed
    /// directories as needed. Returns the index of the first slot.
    pub(crate) fn find_free_dir_slots(
        &mut self,
        dir_cluster: u32,
        count: u32,
    ) -> Result<u32, Error> {
        let mut index = 0u32;
        let mut run_start = 0u32;
        let mut run = 0u32;
        loop {
            match self.read_dir_slot(dir_cluster, index) {
                Ok(raw) => {
                    if raw.name[0] == ENTRY_FREE || raw.name[0] == ENTRY_DELETED {
                        if run == 0 {
                            run_start = index;
                        }
                        run += 1;
                        if run == count {
                            return Ok(run_start);
                        }
                    } else {
                        run = 0;
                    }
                    index += 1;
                }
                Err(Error::Eof) => {
                    let (fixed_root, _) = self.dir_region(dir_cluster);
                    if fixed_root {
                        // The fixed root region cannot grow.
                        return Err(Error::DiskFull);
                    }
                    // Touch the slot with growth enabled, which appends and
                    // zeroes a cluster; the scan then continues into it.
                    let blank = RawDirEntry::default();
                    self.write_dir_slot(dir_cluster, index, &blank, true)?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::format::{self, FormatOptions};
    use crate::structures::raw::directory::LAST_LONG_ENTRY;
    use pretty_assertions::assert_eq;

    fn fat12_volume() -> Volume<MemDisk> {
        let mut disk = MemDisk::new(2880, 512);
        format::format(
            &mut disk,
            2880,
            &FormatOptions {
                fat_type: Some(FatType::Fat12),
                volume_label: Some("TESTVOL"),
                ..FormatOptions::default()
            },
        )
        .unwrap();
        Volume::mount(disk).unwrap()
    }

    fn short_entry(name: &[u8; 11], attributes: u8, cluster: u32, size: u32) -> RawDirEntry {
        let mut raw = RawDirEntry {
            name: *name,
            attributes,
            ..RawDirEntry::default()
        };
        raw.set_first_cluster(cluster);
        raw.file_size = size.to_le_bytes();
        raw
    }

    fn lfn_slot(seq: u8, checksum: u8, text: &str, first_of_name: bool) -> RawDirEntry {
        let mut units = [0xFFFFu16; LFN_UNITS_PER_ENTRY];
        let encoded: Vec<u16> = text.encode_utf16().collect();
        units[..encoded.len()].copy_from_slice(&encoded);
        if encoded.len() < LFN_UNITS_PER_ENTRY {
            units[encoded.len()] = 0x0000;
        }
        let mut slot: RawLfnEntry = bytemuck::Zeroable::zeroed();
        slot.sequence = seq | if first_of_name { LAST_LONG_ENTRY } else { 0 };
        slot.attributes = FileAttributes::LONG_NAME;
        slot.checksum = checksum;
        slot.set_units(&units);
        *bytemuck::cast_ref(&slot)
    }

    #[test]
    fn root_label_is_skipped_but_entries_emerge() {
        let mut volume = fat12_volume();
        volume
            .write_dir_slot(0, 1, &short_entry(b"HELLO   TXT", 0x20, 0, 5), false)
            .unwrap();

        let entries: Vec<_> = volume
            .open_root_dir()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].short_name, "HELLO.TXT");
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[0].location.index, 1);
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let mut volume = fat12_volume();
        let mut dead = short_entry(b"DEAD    TXT", 0x20, 0, 0);
        dead.name[0] = ENTRY_DELETED;
        volume.write_dir_slot(0, 1, &dead, false).unwrap();
        volume
            .write_dir_slot(0, 2, &short_entry(b"LIVE    TXT", 0x20, 0, 0), false)
            .unwrap();

        let names: Vec<_> = volume
            .open_root_dir()
            .unwrap()
            .map(|e| e.unwrap().short_name)
            .collect();
        assert_eq!(names, ["LIVE.TXT"]);
    }

    #[test]
    fn lfn_reassembly_across_two_slots() {
        let mut volume = fat12_volume();
        let short = *b"LONGFI~1TXT";
        let sum = lfn_checksum(&short);
        // Reverse on-disk order: slot 2 (flagged last) first.
        volume
            .write_dir_slot(0, 1, &lfn_slot(2, sum, "txt", true), false)
            .unwrap();
        volume
            .write_dir_slot(0, 2, &lfn_slot(1, sum, "LongFileName.", false), false)
            .unwrap();
        volume
            .write_dir_slot(0, 3, &short_entry(&short, 0x20, 0, 9), false)
            .unwrap();

        let entries: Vec<_> = volume
            .open_root_dir()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].long_name.as_deref(), Some("LongFileName.txt"));
        assert_eq!(entries[0].short_name, "LONGFI~1.TXT");
        assert_eq!(entries[0].location.lfn_slots, 2);
    }

    #[test]
    fn lfn_with_bad_checksum_is_discarded() {
        let mut volume = fat12_volume();
        let short = *b"LONGFI~1TXT";
        let bad = lfn_checksum(&short).wrapping_add(1);
        volume
            .write_dir_slot(0, 1, &lfn_slot(1, bad, "LongName.txt", true), false)
            .unwrap();
        volume
            .write_dir_slot(0, 2, &short_entry(&short, 0x20, 0, 0), false)
            .unwrap();

        let entries: Vec<_> = volume
            .open_root_dir()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(entries[0].long_name, None);
        assert_eq!(entries[0].location.lfn_slots, 0);
    }

    #[test]
    fn enumeration_is_stable() {
        let mut volume = fat12_volume();
        for (i, name) in [b"AAA     TXT", b"BBB     TXT", b"CCC     TXT"]
            .iter()
            .enumerate()
        {
            volume
                .write_dir_slot(0, 1 + i as u32, &short_entry(name, 0x20, 0, 0), false)
                .unwrap();
        }
        let pass1: Vec<_> = volume
            .open_root_dir()
            .unwrap()
            .map(|e| e.unwrap().short_name)
            .collect();
        let pass2: Vec<_> = volume
            .open_root_dir()
            .unwrap()
            .map(|e| e.unwrap().short_name)
            .collect();
        assert_eq!(pass1, pass2);
        assert_eq!(pass1, ["AAA.TXT", "BBB.TXT", "CCC.TXT"]);
    }

    #[test]
    fn free_slot_search_skips_live_entries() {
        let mut volume = fat12_volume();
        volume
            .write_dir_slot(0, 1, &short_entry(b"USED    TXT", 0x20, 0, 0), false)
            .unwrap();
        // Slot 0 holds the volume label, slot 1 a file; 2.. are free.
        assert_eq!(volume.find_free_dir_slots(0, 3).unwrap(), 2);
    }

    #[test]
    fn fixed_root_cannot_grow() {
        let mut volume = fat12_volume();
        let count = volume.root_entry_count;
        assert_eq!(
            volume.find_free_dir_slots(0, count + 1).unwrap_err(),
            Error::DiskFull
        );
    }
}
