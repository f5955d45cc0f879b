//! The mounted-volume value.
//!
//! A [`Volume`] is the handle every other operation takes: it caches the
//! geometry derived from the BPB, owns the in-memory mirror of the FAT and
//! tracks whether that mirror has diverged from the media. There is no
//! global state; dropping the volume forgets everything except what was
//! flushed.

use alloc::vec::Vec;

use log::debug;

use crate::device::BlockDevice;
use crate::error::Error;
use crate::structures::boot_sector::Bpb;
use crate::structures::fs_info::{FSINFO_UNKNOWN, FsInfo};
use crate::structures::{FatStr, FatType};

/// A mounted FAT volume.
///
/// The device is taken by value; mount `&mut disk` to keep ownership of the
/// disk (every `&mut T` of a device is itself a device). The volume is not
/// reentrant: directory readers and file handles borrow it for each
/// operation, and two volumes may share one device only if the host
/// serializes them.
pub struct Volume<D: BlockDevice> {
    pub(crate) device: D,
    fat_type: FatType,
    bpb: Bpb,

    // Geometry, in sectors unless noted.
    pub(crate) bytes_per_sector: u32,
    pub(crate) sectors_per_cluster: u32,
    pub(crate) bytes_per_cluster: u32,
    pub(crate) reserved_sector_count: u32,
    pub(crate) num_fats: u32,
    pub(crate) fat_size_sectors: u32,
    pub(crate) root_entry_count: u32,
    pub(crate) root_cluster: u32,
    pub(crate) total_sectors: u32,
    pub(crate) total_clusters: u32,
    pub(crate) fat_begin_sector: u32,
    pub(crate) root_dir_begin_sector: u32,
    pub(crate) data_begin_sector: u32,
    pub(crate) root_dir_sectors: u32,

    pub(crate) fat_cache: Vec<u8>,
    pub(crate) fat_dirty: bool,
    /// Cursor for the allocator's linear scan.
    pub(crate) next_free: u32,
    /// Free-cluster count mirrored into FS-Info on FAT32.
    pub(crate) free_count: u32,
}

impl<D: BlockDevice> Volume<D> {
    /// Mounts the volume: decodes the boot sector, derives the geometry and
    /// loads FAT #0 into the cache. The device is not written.
    pub fn mount(mut device: D) -> Result<Self, Error> {
        let bpb = Bpb::parse(&mut device)?;
        let fat_type = bpb.fat_type();

        let bytes_per_sector = bpb.bytes_per_sector as u32;
        let fat_begin_sector = bpb.reserved_sector_count as u32;
        let root_dir_begin_sector =
            fat_begin_sector + bpb.num_fats as u32 * bpb.fat_size_sectors;
        let data_begin_sector = bpb.data_begin_sector();
        if data_begin_sector >= bpb.total_sectors {
            return Err(Error::InvalidBootSector);
        }

        let total_clusters = bpb.total_clusters();
        let root_cluster = if fat_type == FatType::Fat32 {
            if bpb.root_cluster < 2 || bpb.root_cluster >= total_clusters + 2 {
                return Err(Error::InvalidBootSector);
            }
            bpb.root_cluster
        } else {
            0
        };

        let cache_size = bpb.fat_size_sectors as usize * bytes_per_sector as usize;
        let mut fat_cache = Vec::new();
        fat_cache
            .try_reserve_exact(cache_size)
            .map_err(|_| Error::NoMemory)?;
        fat_cache.resize(cache_size, 0);
        device.read_sectors(fat_begin_sector, bpb.fat_size_sectors, &mut fat_cache)?;

        let mut volume = Self {
            device,
            fat_type,
            bytes_per_sector,
            sectors_per_cluster: bpb.sectors_per_cluster as u32,
            bytes_per_cluster: bpb.sectors_per_cluster as u32 * bytes_per_sector,
            reserved_sector_count: bpb.reserved_sector_count as u32,
            num_fats: bpb.num_fats as u32,
            fat_size_sectors: bpb.fat_size_sectors,
            root_entry_count: bpb.root_entry_count as u32,
            root_cluster,
            total_sectors: bpb.total_sectors,
            total_clusters,
            fat_begin_sector,
            root_dir_begin_sector,
            data_begin_sector,
            root_dir_sectors: bpb.root_dir_sectors(),
            fat_cache,
            fat_dirty: false,
            next_free: 2,
            free_count: FSINFO_UNKNOWN,
            bpb,
        };
        volume.load_fs_info_hints()?;

        debug!(
            "mounted {:?} volume: {} sectors, {} clusters, fat at {}, data at {}",
            volume.fat_type, volume.total_sectors, volume.total_clusters,
            volume.fat_begin_sector, volume.data_begin_sector,
        );
        Ok(volume)
    }

    /// Seeds the allocator cursor from the FAT32 FS-Info sector, when one is
    /// present and plausible.
    fn load_fs_info_hints(&mut self) -> Result<(), Error> {
        if self.fat_type != FatType::Fat32
            || self.bpb.fs_info_sector == 0
            || self.bpb.fs_info_sector as u32 >= self.reserved_sector_count
        {
            return Ok(());
        }
        let mut sector = self.sector_buf();
        self.device
            .read_sectors(self.bpb.fs_info_sector as u32, 1, &mut sector)?;
        if let Some(info) = FsInfo::decode(&sector) {
            if info.next_free >= 2 && info.next_free < self.total_clusters + 2 {
                self.next_free = info.next_free;
            }
            if info.free_count <= self.total_clusters {
                self.free_count = info.free_count;
            }
        }
        Ok(())
    }

    /// Publishes the FAT cache to every FAT copy, in order, then refreshes
    /// the FAT32 FS-Info hints. No-op when the cache is clean. The dirty
    /// flag is cleared only after every copy was written.
    pub fn flush(&mut self) -> Result<(), Error> {
        if !self.fat_dirty {
            return Ok(());
        }
        for i in 0..self.num_fats {
            let lba = self.fat_begin_sector + i * self.fat_size_sectors;
            self.device
                .write_sectors(lba, self.fat_size_sectors, &self.fat_cache)?;
        }
        self.write_fs_info_hints()?;
        self.fat_dirty = false;
        debug!("flushed FAT cache to {} copies", self.num_fats);
        Ok(())
    }

    fn write_fs_info_hints(&mut self) -> Result<(), Error> {
        if self.fat_type != FatType::Fat32
            || self.bpb.fs_info_sector == 0
            || self.bpb.fs_info_sector as u32 >= self.reserved_sector_count
        {
            return Ok(());
        }
        let info = FsInfo {
            free_count: self.free_count,
            next_free: self.next_free,
        };
        let mut sector = self.sector_buf();
        info.encode(&mut sector);
        self.device
            .write_sectors(self.bpb.fs_info_sector as u32, 1, &sector)?;
        Ok(())
    }

    /// Flushes and consumes the volume. The cache is released either way;
    /// a flush failure is reported after the volume is already unusable.
    pub fn unmount(mut self) -> Result<(), Error> {
        self.flush()
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    pub fn total_clusters(&self) -> u32 {
        self.total_clusters
    }

    pub fn num_fats(&self) -> u32 {
        self.num_fats
    }

    pub fn fat_size_sectors(&self) -> u32 {
        self.fat_size_sectors
    }

    pub fn fat_begin_sector(&self) -> u32 {
        self.fat_begin_sector
    }

    pub fn data_begin_sector(&self) -> u32 {
        self.data_begin_sector
    }

    /// First cluster of the root directory: FAT32's root cluster, or the
    /// fixed-region sentinel 0 on FAT12/16.
    pub fn root_dir_cluster(&self) -> u32 {
        self.root_cluster
    }

    pub fn volume_id(&self) -> u32 {
        self.bpb.volume_id
    }

    pub fn volume_label(&self) -> FatStr<11> {
        self.bpb.volume_label
    }

    /// The largest file size this volume's variant can represent.
    pub fn max_file_size(&self) -> u32 {
        self.fat_type.max_file_size()
    }

    /// Whether `cluster` indexes the data region: `[2, total_clusters + 2)`.
    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster < self.total_clusters + 2
    }

    /// First sector of a data cluster.
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_begin_sector + (cluster - 2) * self.sectors_per_cluster
    }

    pub(crate) fn sector_buf(&self) -> Vec<u8> {
        alloc::vec![0u8; self.bytes_per_sector as usize]
    }

    pub(crate) fn cluster_buf(&self) -> Vec<u8> {
        alloc::vec![0u8; self.bytes_per_cluster as usize]
    }

    /// Reads one whole data cluster.
    pub(crate) fn read_cluster(&mut self, cluster: u32, buf: &mut [u8]) -> Result<(), Error> {
        if !self.is_valid_cluster(cluster) {
            return Err(Error::InvalidCluster);
        }
        let lba = self.cluster_to_sector(cluster);
        self.device
            .read_sectors(lba, self.sectors_per_cluster, buf)?;
        Ok(())
    }

    /// Writes one whole data cluster.
    pub(crate) fn write_cluster(&mut self, cluster: u32, buf: &[u8]) -> Result<(), Error> {
        if !self.is_valid_cluster(cluster) {
            return Err(Error::InvalidCluster);
        }
        let lba = self.cluster_to_sector(cluster);
        self.device
            .write_sectors(lba, self.sectors_per_cluster, buf)?;
        Ok(())
    }
}
