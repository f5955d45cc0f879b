//! File handles and the directory mutations built on them.
//!
//! A [`File`] is a position cursor over a cluster chain plus the location
//! of its directory entry. Handles do not borrow the volume; every
//! operation takes it explicitly, and metadata changes become durable at
//! [`File::sync`] (or [`File::close`]). The FAT is always flushed before a
//! directory entry referencing new clusters is written, so an interruption
//! leaves an orphaned chain rather than a dangling reference.

use log::debug;

use crate::device::BlockDevice;
use crate::dir::{DirEntryLocation, DirReader};
use crate::error::Error;
use crate::path;
use crate::structures::directory::{
    ENTRY_DELETED, FileAttributes, basis_name, build_lfn_entries, lfn_checksum,
    short_name_from_str,
};
use crate::structures::raw::directory::RawDirEntry;
use crate::structures::time::FatTime;
use crate::volume::Volume;

bitflags::bitflags! {
    /// Open flags. `RDWR` is the union of the two access bits.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        const RDONLY = 0x01;
        const WRONLY = 0x02;
        const RDWR = 0x03;
        const CREATE = 0x04;
        const TRUNC = 0x08;
    }
}

impl OpenFlags {
    fn readable(self) -> bool {
        self.contains(OpenFlags::RDONLY)
    }

    fn writable(self) -> bool {
        self.contains(OpenFlags::WRONLY)
    }
}

/// Where to seek from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i64),
    End(i64),
}

/// An open file.
#[derive(Debug)]
pub struct File {
    first_cluster: u32,
    size: u32,
    position: u32,
    flags: OpenFlags,
    location: DirEntryLocation,
    dirty: bool,
}

impl<D: BlockDevice> Volume<D> {
    /// Opens a file. `CREATE` makes a missing file (the parent must exist),
    /// `TRUNC` drops the contents of an existing one.
    pub fn open_file(&mut self, file_path: &str, flags: OpenFlags) -> Result<File, Error> {
        if (flags & OpenFlags::RDWR).is_empty() {
            return Err(Error::InvalidParam);
        }

        match path::resolve(self, file_path) {
            Ok(entry) => {
                if entry.is_directory() {
                    return Err(Error::IsADirectory);
                }
                let mut file = File {
                    first_cluster: entry.first_cluster,
                    size: entry.size,
                    position: 0,
                    flags,
                    location: entry.location,
                    dirty: false,
                };
                if flags.contains(OpenFlags::TRUNC) && flags.writable() && file.size > 0 {
                    if file.first_cluster >= 2 {
                        self.free_chain(file.first_cluster)?;
                    }
                    file.first_cluster = 0;
                    file.size = 0;
                    file.dirty = true;
                    file.sync(self)?;
                }
                Ok(file)
            }
            Err(Error::NotFound) if flags.contains(OpenFlags::CREATE) && flags.writable() => {
                let (parent_path, name) = path::split_parent(file_path)?;
                let parent = path::resolve(self, parent_path)?;
                if !parent.is_directory() {
                    return Err(Error::NotADirectory);
                }
                let location = self.create_dir_entry(
                    parent.first_cluster,
                    name,
                    FileAttributes::ARCHIVE,
                    0,
                    0,
                )?;
                debug!("created {}", file_path);
                Ok(File {
                    first_cluster: 0,
                    size: 0,
                    position: 0,
                    flags,
                    location,
                    dirty: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a directory with its `.` and `..` entries.
    pub fn mkdir(&mut self, dir_path: &str) -> Result<(), Error> {
        let (parent_path, name) = path::split_parent(dir_path)?;
        let parent = path::resolve(self, parent_path)?;
        if !parent.is_directory() {
            return Err(Error::NotADirectory);
        }
        if path::find_in_dir(self, parent.first_cluster, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let cluster = self.allocate_cluster()?;
        self.zero_cluster(cluster)?;

        let now = FatTime::now();
        let mut dot = dot_entry(*b".          ", cluster, now);
        let mut buf = self.cluster_buf();
        buf[..32].copy_from_slice(bytemuck::bytes_of(&dot));
        // `..` names the parent; a root parent is stored as cluster 0 on
        // every variant.
        let parent_is_root =
            parent.first_cluster == 0 || parent.first_cluster == self.root_dir_cluster();
        dot.name = *b"..         ";
        dot.set_first_cluster(if parent_is_root { 0 } else { parent.first_cluster });
        buf[32..64].copy_from_slice(bytemuck::bytes_of(&dot));
        self.write_cluster(cluster, &buf)?;

        // FAT first: the new chain must be durable before the parent
        // references it.
        self.flush()?;
        self.create_dir_entry(
            parent.first_cluster,
            name,
            FileAttributes::DIRECTORY,
            cluster,
            0,
        )?;
        debug!("created directory {}", dir_path);
        Ok(())
    }

    /// Removes a file: frees its chain, then deletes its entry.
    pub fn unlink(&mut self, file_path: &str) -> Result<(), Error> {
        let entry = path::resolve(self, file_path)?;
        if entry.is_directory() {
            return Err(Error::IsADirectory);
        }
        if entry.first_cluster >= 2 {
            self.free_chain(entry.first_cluster)?;
        }
        self.flush()?;
        self.delete_dir_entry(entry.location)?;
        debug!("unlinked {}", file_path);
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, dir_path: &str) -> Result<(), Error> {
        let entry = path::resolve(self, dir_path)?;
        if !entry.is_directory() {
            return Err(Error::NotADirectory);
        }
        if entry.first_cluster == 0 || entry.first_cluster == self.root_dir_cluster() {
            // The root has no entry to remove.
            return Err(Error::InvalidParam);
        }

        let mut reader = DirReader::open(self, entry.first_cluster)?;
        loop {
            match reader.read_dir() {
                Ok(child) => {
                    if child.short_name != "." && child.short_name != ".." {
                        return Err(Error::DirectoryNotEmpty);
                    }
                }
                Err(Error::Eof) => break,
                Err(e) => return Err(e),
            }
        }

        self.free_chain(entry.first_cluster)?;
        self.flush()?;
        self.delete_dir_entry(entry.location)?;
        debug!("removed directory {}", dir_path);
        Ok(())
    }

    /// Marks the short entry and its LFN slots deleted.
    fn delete_dir_entry(&mut self, location: DirEntryLocation) -> Result<(), Error> {
        let first = location.index - location.lfn_slots;
        for index in first..=location.index {
            let mut raw = self.read_dir_slot(location.dir_cluster, index)?;
            raw.name[0] = ENTRY_DELETED;
            self.write_dir_slot(location.dir_cluster, index, &raw, false)?;
        }
        Ok(())
    }

    /// Writes a new directory entry (with LFN slots when the name needs
    /// them) and returns where the short entry landed.
    pub(crate) fn create_dir_entry(
        &mut self,
        dir_cluster: u32,
        name: &str,
        attributes: FileAttributes,
        first_cluster: u32,
        size: u32,
    ) -> Result<DirEntryLocation, Error> {
        let (short, lfn) = match short_name_from_str(name) {
            Some(short) => (short, None),
            None => {
                let short = self.untaken_basis_name(dir_cluster, name)?;
                let entries = build_lfn_entries(name, lfn_checksum(&short))
                    .ok_or(Error::InvalidParam)?;
                (short, Some(entries))
            }
        };

        let lfn_slots = lfn.as_ref().map_or(0, |e| e.len() as u32);
        let start = self.find_free_dir_slots(dir_cluster, lfn_slots + 1)?;
        if let Some(entries) = &lfn {
            for (i, entry) in entries.iter().enumerate() {
                self.write_dir_slot(
                    dir_cluster,
                    start + i as u32,
                    bytemuck::cast_ref(entry),
                    true,
                )?;
            }
        }

        let now = FatTime::now();
        let mut raw = RawDirEntry {
            name: short,
            attributes: attributes.bits(),
            create_time: now.time.to_le_bytes(),
            create_date: now.date.to_le_bytes(),
            access_date: now.date.to_le_bytes(),
            write_time: now.time.to_le_bytes(),
            write_date: now.date.to_le_bytes(),
            file_size: size.to_le_bytes(),
            ..RawDirEntry::default()
        };
        raw.set_first_cluster(first_cluster);
        let index = start + lfn_slots;
        self.write_dir_slot(dir_cluster, index, &raw, true)?;

        Ok(DirEntryLocation {
            dir_cluster,
            index,
            lfn_slots,
        })
    }

    /// Picks a `BASIS~N` short name no existing entry uses.
    fn untaken_basis_name(&mut self, dir_cluster: u32, name: &str) -> Result<[u8; 11], Error> {
        'tails: for tail in 1..1000 {
            let candidate = basis_name(name, tail);
            let mut reader = DirReader::open(self, dir_cluster)?;
            loop {
                match reader.read_dir_any() {
                    Ok(entry) => {
                        if entry.short_name.eq_ignore_ascii_case(
                            &crate::structures::directory::format_short_name(&candidate),
                        ) {
                            continue 'tails;
                        }
                    }
                    Err(Error::Eof) => return Ok(candidate),
                    Err(e) => return Err(e),
                }
            }
        }
        Err(Error::DiskFull)
    }
}

fn dot_entry(name: [u8; 11], cluster: u32, now: FatTime) -> RawDirEntry {
    let mut raw = RawDirEntry {
        name,
        attributes: FileAttributes::DIRECTORY.bits(),
        create_time: now.time.to_le_bytes(),
        create_date: now.date.to_le_bytes(),
        access_date: now.date.to_le_bytes(),
        write_time: now.time.to_le_bytes(),
        write_date: now.date.to_le_bytes(),
        ..RawDirEntry::default()
    };
    raw.set_first_cluster(cluster);
    raw
}

impl File {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// Reads at the cursor. Short counts happen at end-of-file; a read
    /// starting at or past the end is `Eof`.
    pub fn read<D: BlockDevice>(
        &mut self,
        volume: &mut Volume<D>,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        if !self.flags.readable() {
            return Err(Error::InvalidParam);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if self.position >= self.size {
            return Err(Error::Eof);
        }

        let bpc = volume.bytes_per_cluster();
        let want = (buf.len() as u32).min(self.size - self.position) as usize;
        let mut cluster = self.first_cluster;
        for _ in 0..self.position / bpc {
            cluster = chain_step(volume, cluster)?;
        }

        let mut scratch = volume.cluster_buf();
        let mut within = (self.position % bpc) as usize;
        let mut done = 0usize;
        while done < want {
            volume.read_cluster(cluster, &mut scratch)?;
            let take = (bpc as usize - within).min(want - done);
            buf[done..done + take].copy_from_slice(&scratch[within..within + take]);
            done += take;
            within = 0;
            if done < want {
                cluster = chain_step(volume, cluster)?;
            }
        }
        self.position += want as u32;
        Ok(want)
    }

    /// Writes at the cursor, allocating and linking clusters as needed.
    /// The chain grows through the FAT cache; the entry's size becomes
    /// durable at [`sync`](Self::sync).
    pub fn write<D: BlockDevice>(
        &mut self,
        volume: &mut Volume<D>,
        buf: &[u8],
    ) -> Result<usize, Error> {
        if !self.flags.writable() {
            return Err(Error::InvalidParam);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = self.position as u64 + buf.len() as u64;
        if end > volume.max_file_size() as u64 {
            return Err(Error::FileTooLarge);
        }

        if self.first_cluster < 2 {
            let head = volume.allocate_cluster()?;
            volume.zero_cluster(head)?;
            self.first_cluster = head;
            self.dirty = true;
        }

        let bpc = volume.bytes_per_cluster();
        let mut cluster = self.first_cluster;
        for _ in 0..self.position / bpc {
            cluster = chain_step_or_grow(volume, cluster)?;
        }

        let mut scratch = volume.cluster_buf();
        let mut within = (self.position % bpc) as usize;
        let mut done = 0usize;
        while done < buf.len() {
            let take = (bpc as usize - within).min(buf.len() - done);
            if take == bpc as usize {
                scratch[..].copy_from_slice(&buf[done..done + take]);
            } else {
                volume.read_cluster(cluster, &mut scratch)?;
                scratch[within..within + take].copy_from_slice(&buf[done..done + take]);
            }
            volume.write_cluster(cluster, &scratch)?;
            done += take;
            within = 0;
            if done < buf.len() {
                cluster = chain_step_or_grow(volume, cluster)?;
            }
        }

        self.position = end as u32;
        if self.position > self.size {
            self.size = self.position;
        }
        self.dirty = true;
        Ok(buf.len())
    }

    /// Moves the cursor. Seeking before the start is `InvalidParam`;
    /// seeking past the end is allowed and a later write fills the gap.
    pub fn seek(&mut self, from: SeekFrom) -> Result<u32, Error> {
        let base = match from {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if base < 0 || base > u32::MAX as i64 {
            return Err(Error::InvalidParam);
        }
        self.position = base as u32;
        Ok(self.position)
    }

    /// Publishes pending metadata: flushes the FAT, then rewrites the
    /// directory entry's first cluster, size and write stamp.
    pub fn sync<D: BlockDevice>(&mut self, volume: &mut Volume<D>) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }
        volume.flush()?;

        let mut raw = volume.read_dir_slot(self.location.dir_cluster, self.location.index)?;
        raw.set_first_cluster(self.first_cluster);
        raw.file_size = self.size.to_le_bytes();
        let now = FatTime::now();
        raw.write_time = now.time.to_le_bytes();
        raw.write_date = now.date.to_le_bytes();
        volume.write_dir_slot(self.location.dir_cluster, self.location.index, &raw, false)?;
        self.dirty = false;
        Ok(())
    }

    /// Syncs and consumes the handle.
    pub fn close<D: BlockDevice>(mut self, volume: &mut Volume<D>) -> Result<(), Error> {
        self.sync(volume)
    }
}

/// One step along a chain during file I/O; running off the end of a chain
/// the size word says should continue is corruption.
fn chain_step<D: BlockDevice>(volume: &Volume<D>, cluster: u32) -> Result<u32, Error> {
    let next = volume.next_cluster(cluster)?;
    if volume.fat_type().is_eoc(next) || volume.fat_type().is_bad(next)
        || !volume.is_valid_cluster(next)
    {
        return Err(Error::Corrupted);
    }
    Ok(next)
}

fn chain_step_or_grow<D: BlockDevice>(
    volume: &mut Volume<D>,
    cluster: u32,
) -> Result<u32, Error> {
    let next = volume.next_cluster(cluster)?;
    if volume.fat_type().is_eoc(next) {
        let fresh = volume.extend_chain(cluster)?;
        volume.zero_cluster(fresh)?;
        return Ok(fresh);
    }
    if volume.fat_type().is_bad(next) || !volume.is_valid_cluster(next) {
        return Err(Error::Corrupted);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::format::{self, FormatOptions};
    use crate::structures::FatType;
    use pretty_assertions::assert_eq;

    fn fat16_volume() -> Volume<MemDisk> {
        let mut disk = MemDisk::new(40000, 512);
        format::format(
            &mut disk,
            40000,
            &FormatOptions {
                fat_type: Some(FatType::Fat16),
                volume_label: Some("FILES"),
                ..FormatOptions::default()
            },
        )
        .unwrap();
        Volume::mount(disk).unwrap()
    }

    #[test]
    fn create_write_read_round_trip() {
        let mut v = fat16_volume();
        let mut f = v
            .open_file("/hello.txt", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, b"hello, volume").unwrap();
        f.close(&mut v).unwrap();

        let mut f = v.open_file("/hello.txt", OpenFlags::RDONLY).unwrap();
        assert_eq!(f.size(), 13);
        let mut buf = [0u8; 64];
        let n = f.read(&mut v, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello, volume");
        assert_eq!(f.read(&mut v, &mut buf).unwrap_err(), Error::Eof);
    }

    #[test]
    fn open_without_access_mode_is_invalid() {
        let mut v = fat16_volume();
        assert_eq!(
            v.open_file("/x", OpenFlags::CREATE).unwrap_err(),
            Error::InvalidParam
        );
    }

    #[test]
    fn missing_file_without_create_is_not_found() {
        let mut v = fat16_volume();
        assert_eq!(
            v.open_file("/nope.txt", OpenFlags::RDONLY).unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn write_spanning_clusters() {
        let mut v = fat16_volume();
        let bpc = v.bytes_per_cluster() as usize;
        let payload: alloc::vec::Vec<u8> =
            (0..bpc * 3 + 100).map(|i| (i % 251) as u8).collect();

        let mut f = v
            .open_file("/big.bin", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, &payload).unwrap();
        f.close(&mut v).unwrap();

        let mut f = v.open_file("/big.bin", OpenFlags::RDONLY).unwrap();
        let mut back = alloc::vec![0u8; payload.len()];
        let n = f.read(&mut v, &mut back).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(back, payload);

        // The chain holds together.
        v.validate_cluster_chain(f.first_cluster()).unwrap();
    }

    #[test]
    fn seek_and_partial_read() {
        let mut v = fat16_volume();
        let mut f = v
            .open_file("/seek.txt", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, b"0123456789").unwrap();

        f.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 3];
        f.read(&mut v, &mut buf).unwrap();
        assert_eq!(&buf, b"456");

        assert_eq!(f.seek(SeekFrom::Current(-2)).unwrap(), 5);
        assert_eq!(f.seek(SeekFrom::End(-1)).unwrap(), 9);
        assert_eq!(f.seek(SeekFrom::Current(-100)).unwrap_err(), Error::InvalidParam);
        f.close(&mut v).unwrap();
    }

    #[test]
    fn truncate_frees_the_chain() {
        let mut v = fat16_volume();
        let mut f = v
            .open_file("/t.bin", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, &[7u8; 2048]).unwrap();
        f.close(&mut v).unwrap();
        let free_before = v.count_free_clusters().unwrap();

        let f = v
            .open_file("/t.bin", OpenFlags::RDWR | OpenFlags::TRUNC)
            .unwrap();
        assert_eq!(f.size(), 0);
        assert_eq!(v.count_free_clusters().unwrap(), free_before + 4);

        let entry = v.stat("/t.bin").unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.first_cluster, 0);
    }

    #[test]
    fn unlink_removes_and_frees() {
        let mut v = fat16_volume();
        let mut f = v
            .open_file("/gone.txt", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, b"data").unwrap();
        f.close(&mut v).unwrap();
        let free_before = v.count_free_clusters().unwrap();

        v.unlink("/gone.txt").unwrap();
        assert_eq!(v.stat("/gone.txt").unwrap_err(), Error::NotFound);
        assert_eq!(v.count_free_clusters().unwrap(), free_before + 1);
    }

    #[test]
    fn unlink_refuses_directories() {
        let mut v = fat16_volume();
        v.mkdir("/d").unwrap();
        assert_eq!(v.unlink("/d").unwrap_err(), Error::IsADirectory);
    }

    #[test]
    fn mkdir_writes_dot_entries() {
        let mut v = fat16_volume();
        v.mkdir("/sub").unwrap();

        let names: alloc::vec::Vec<_> = v
            .open_dir("/sub")
            .unwrap()
            .map(|e| e.unwrap().short_name)
            .collect();
        assert_eq!(names, [".", ".."]);

        let entry = v.stat("/sub").unwrap();
        assert!(entry.is_directory());
        assert!(entry.first_cluster >= 2);
    }

    #[test]
    fn nested_directories_resolve() {
        let mut v = fat16_volume();
        v.mkdir("/a").unwrap();
        v.mkdir("/a/b").unwrap();
        let mut f = v
            .open_file("/a/b/deep.txt", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, b"deep").unwrap();
        f.close(&mut v).unwrap();

        let entry = v.stat("/a/b/deep.txt").unwrap();
        assert_eq!(entry.size, 4);
        // Case-insensitive resolution.
        assert!(v.stat("/A/B/DEEP.TXT").is_ok());
    }

    #[test]
    fn mkdir_existing_is_already_exists() {
        let mut v = fat16_volume();
        v.mkdir("/dup").unwrap();
        assert_eq!(v.mkdir("/dup").unwrap_err(), Error::AlreadyExists);
    }

    #[test]
    fn rmdir_refuses_non_empty() {
        let mut v = fat16_volume();
        v.mkdir("/full").unwrap();
        v.open_file("/full/f.txt", OpenFlags::WRONLY | OpenFlags::CREATE)
            .unwrap()
            .close(&mut v)
            .unwrap();
        assert_eq!(v.rmdir("/full").unwrap_err(), Error::DirectoryNotEmpty);

        v.unlink("/full/f.txt").unwrap();
        v.rmdir("/full").unwrap();
        assert_eq!(v.stat("/full").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn long_names_get_lfn_slots() {
        let mut v = fat16_volume();
        v.open_file(
            "/A Long File Name.document",
            OpenFlags::WRONLY | OpenFlags::CREATE,
        )
        .unwrap()
        .close(&mut v)
        .unwrap();

        let entry = v.stat("/A Long File Name.document").unwrap();
        assert_eq!(entry.name(), "A Long File Name.document");
        assert_eq!(entry.short_name, "ALONGF~1.DOC");
        assert!(entry.location.lfn_slots > 0);

        // Deleting clears the LFN slots too.
        v.unlink("/A Long File Name.document").unwrap();
        assert!(v.stat("/ALONGF~1.DOC").is_err());
    }

    #[test]
    fn short_name_collisions_bump_the_tail() {
        let mut v = fat16_volume();
        for name in ["/collision one.txt", "/collision two.txt"] {
            v.open_file(name, OpenFlags::WRONLY | OpenFlags::CREATE)
                .unwrap()
                .close(&mut v)
                .unwrap();
        }
        let one = v.stat("/collision one.txt").unwrap();
        let two = v.stat("/collision two.txt").unwrap();
        assert_eq!(one.short_name, "COLLIS~1.TXT");
        assert_eq!(two.short_name, "COLLIS~2.TXT");
    }

    #[test]
    fn sparse_seek_then_write_zero_fills() {
        let mut v = fat16_volume();
        let mut f = v
            .open_file("/sparse.bin", OpenFlags::RDWR | OpenFlags::CREATE)
            .unwrap();
        f.write(&mut v, b"head").unwrap();
        f.seek(SeekFrom::Start(3000)).unwrap();
        f.write(&mut v, b"tail").unwrap();
        f.close(&mut v).unwrap();

        let mut f = v.open_file("/sparse.bin", OpenFlags::RDONLY).unwrap();
        assert_eq!(f.size(), 3004);
        let mut buf = alloc::vec![0u8; 3004];
        f.read(&mut v, &mut buf).unwrap();
        assert_eq!(&buf[..4], b"head");
        assert!(buf[4..3000].iter().all(|b| *b == 0));
        assert_eq!(&buf[3000..], b"tail");
    }
}
