//! Volume formatting: the inverse synthesis of a consistent on-disk image.
//!
//! The geometry solver picks a variant, cluster size and FAT size that
//! agree with the requested sector count, then the writers lay down the
//! boot sector, the FAT copies, FS-Info (FAT32) and the root directory in
//! that order. A failure part-way leaves the device indeterminate; callers
//! that care should re-format or discard the media.

use log::debug;

use crate::device::BlockDevice;
use crate::error::Error;
use crate::structures::boot_sector::DIR_ENTRY_SIZE;
use crate::structures::directory::FileAttributes;
use crate::structures::fs_info::FsInfo;
use crate::structures::raw::boot_sector::{BPB_EXT_OFFSET, RawBpb, RawBpbExt16, RawBpbExt32};
use crate::structures::raw::directory::RawDirEntry;
use crate::structures::time::{FatTime, wall_clock_seconds};
use crate::structures::{FAT12_CLUSTER_LIMIT, FAT16_CLUSTER_LIMIT, FatStr, FatType};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// What the caller wants from a format.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions<'a> {
    /// The variant to lay down; `None` lets the cluster count decide.
    pub fat_type: Option<FatType>,
    /// Cluster size in bytes; `None` picks from the volume-size table.
    pub cluster_size: Option<u32>,
    /// Up to 11 bytes; also written as the root volume-label entry.
    pub volume_label: Option<&'a str>,
}

/// The solved geometry of a volume about to be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatParams {
    pub fat_type: FatType,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub bytes_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    pub fat_size_sectors: u32,
    pub root_entry_count: u32,
    pub total_sectors: u32,
    pub data_sectors: u32,
    pub total_clusters: u32,
    pub root_cluster: u32,
    pub fs_info_sector: u32,
    pub backup_boot_sector: u32,
}

/// The default cluster size for a volume, keyed on its byte size.
///
/// 4 KiB covers everything from 256 MiB through 8 GiB; past that the size
/// doubles per doubling of the volume, capped at 32 KiB.
fn auto_cluster_size(total_bytes: u64) -> u32 {
    match total_bytes {
        n if n <= 32 * MIB => 512,
        n if n <= 64 * MIB => 1024,
        n if n <= 128 * MIB => 2048,
        n if n <= 8 * GIB => 4096,
        n if n <= 16 * GIB => 8192,
        n if n <= 32 * GIB => 16384,
        _ => 32768,
    }
}

impl FormatParams {
    /// Solves the format geometry for a device of `total_sectors` sectors.
    ///
    /// The FAT size is found by fixed-point iteration: a trial size implies
    /// a cluster count, which implies a variant and an entry width, which
    /// implies a new size. At most ten passes; a variant switch resets the
    /// reserved-sector and root layout and redoes the pass.
    pub fn calculate(
        total_sectors: u32,
        bytes_per_sector: u32,
        options: &FormatOptions<'_>,
    ) -> Result<Self, Error> {
        if total_sectors == 0
            || !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096)
        {
            return Err(Error::InvalidParam);
        }
        let num_fats = 2u32;
        let total_bytes = total_sectors as u64 * bytes_per_sector as u64;

        let cluster_size = options
            .cluster_size
            .unwrap_or_else(|| auto_cluster_size(total_bytes));
        if cluster_size < bytes_per_sector || cluster_size % bytes_per_sector != 0 {
            return Err(Error::InvalidParam);
        }
        let sectors_per_cluster = cluster_size / bytes_per_sector;
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(Error::InvalidParam);
        }

        // The starting layout; the solver may swap it when the cluster
        // count lands in the other family.
        let mut reserved_sectors;
        let mut root_entry_count;
        let mut root_cluster = 0;
        let mut fs_info_sector = 0;
        let mut backup_boot_sector = 0;
        if options.fat_type == Some(FatType::Fat32) {
            reserved_sectors = 32;
            root_entry_count = 0;
            root_cluster = 2;
            fs_info_sector = 1;
            backup_boot_sector = 6;
        } else {
            reserved_sectors = 1;
            root_entry_count = if total_bytes <= 32 * MIB { 224 } else { 512 };
        }

        let mut fat_type = options.fat_type.unwrap_or(FatType::Fat12);
        let mut fat_size_sectors = 0u32;
        let mut data_sectors = 0u32;
        let mut total_clusters = 0u32;
        for _ in 0..10 {
            let root_dir_sectors = (root_entry_count * DIR_ENTRY_SIZE)
                .div_ceil(bytes_per_sector);
            let overhead = reserved_sectors + num_fats * fat_size_sectors + root_dir_sectors;
            if overhead >= total_sectors {
                return Err(Error::InvalidParam);
            }
            data_sectors = total_sectors - overhead;
            total_clusters = data_sectors / sectors_per_cluster;

            fat_type = options
                .fat_type
                .unwrap_or_else(|| FatType::from_cluster_count(total_clusters));

            // A switch into or out of FAT32 changes the fixed layout; redo
            // the pass with the new overhead.
            if fat_type == FatType::Fat32 && reserved_sectors == 1 {
                reserved_sectors = 32;
                root_entry_count = 0;
                root_cluster = 2;
                fs_info_sector = 1;
                backup_boot_sector = 6;
                continue;
            }
            if fat_type != FatType::Fat32 && reserved_sectors != 1 {
                reserved_sectors = 1;
                root_entry_count = if total_bytes <= 32 * MIB { 224 } else { 512 };
                root_cluster = 0;
                fs_info_sector = 0;
                backup_boot_sector = 0;
                continue;
            }

            // FAT12 entries are narrower than two bytes; sizing them at two
            // keeps the table a safe upper bound.
            let bytes_per_entry: u64 = match fat_type {
                FatType::Fat12 | FatType::Fat16 => 2,
                FatType::Fat32 => 4,
            };
            let needed = ((total_clusters as u64 + 2) * bytes_per_entry)
                .div_ceil(bytes_per_sector as u64) as u32;
            if needed == fat_size_sectors {
                break;
            }
            fat_size_sectors = needed;
        }

        if total_clusters < 2 {
            return Err(Error::InvalidParam);
        }
        // Cluster numbers above this collide with the FAT32 reserved range.
        const FAT32_MAX_CLUSTERS: u32 = 0x0FFF_FFF4;
        let in_bounds = match fat_type {
            FatType::Fat12 => total_clusters < FAT12_CLUSTER_LIMIT,
            FatType::Fat16 => {
                (FAT12_CLUSTER_LIMIT..FAT16_CLUSTER_LIMIT).contains(&total_clusters)
            }
            FatType::Fat32 => {
                (FAT16_CLUSTER_LIMIT..=FAT32_MAX_CLUSTERS).contains(&total_clusters)
            }
        };
        if !in_bounds {
            return Err(Error::InvalidParam);
        }

        Ok(Self {
            fat_type,
            bytes_per_sector,
            sectors_per_cluster,
            bytes_per_cluster: cluster_size,
            reserved_sectors,
            num_fats,
            fat_size_sectors,
            root_entry_count,
            total_sectors,
            data_sectors,
            total_clusters,
            root_cluster,
            fs_info_sector,
            backup_boot_sector,
        })
    }

    fn root_dir_sectors(&self) -> u32 {
        (self.root_entry_count * DIR_ENTRY_SIZE).div_ceil(self.bytes_per_sector)
    }

    fn root_begin_sector(&self) -> u32 {
        self.reserved_sectors + self.num_fats * self.fat_size_sectors
    }
}

fn padded_label(label: Option<&str>) -> FatStr<11> {
    match label {
        Some(l) if !l.is_empty() => FatStr::padded(l),
        _ => FatStr::from_bytes(*b"NO NAME    "),
    }
}

/// Writes the boot sector (and the FAT32 backup copy).
pub fn write_boot_sector<D: BlockDevice>(
    device: &mut D,
    params: &FormatParams,
    label: Option<&str>,
) -> Result<(), Error> {
    let (total_16, total_32) = if params.total_sectors < 65536 {
        (params.total_sectors as u16, 0)
    } else {
        (0, params.total_sectors)
    };
    let bpb = RawBpb {
        jump: [0xEB, 0x3C, 0x90],
        oem_name: *b"FATDRV  ",
        bytes_per_sector: (params.bytes_per_sector as u16).to_le_bytes(),
        sectors_per_cluster: params.sectors_per_cluster as u8,
        reserved_sector_count: (params.reserved_sectors as u16).to_le_bytes(),
        num_fats: params.num_fats as u8,
        root_entry_count: (params.root_entry_count as u16).to_le_bytes(),
        total_sectors_16: total_16.to_le_bytes(),
        media_type: 0xF8,
        fat_size_16: if params.fat_type == FatType::Fat32 {
            [0; 2]
        } else {
            (params.fat_size_sectors as u16).to_le_bytes()
        },
        sectors_per_track: 63u16.to_le_bytes(),
        num_heads: 255u16.to_le_bytes(),
        hidden_sectors: [0; 4],
        total_sectors_32: total_32.to_le_bytes(),
    };

    let mut sector = alloc::vec![0u8; params.bytes_per_sector as usize];
    sector[..BPB_EXT_OFFSET].copy_from_slice(bytemuck::bytes_of(&bpb));

    let volume_id = wall_clock_seconds();
    let volume_label = padded_label(label);
    if params.fat_type == FatType::Fat32 {
        let ext = RawBpbExt32 {
            fat_size_32: params.fat_size_sectors.to_le_bytes(),
            ext_flags: [0; 2],
            fs_version: [0; 2],
            root_cluster: params.root_cluster.to_le_bytes(),
            fs_info_sector: (params.fs_info_sector as u16).to_le_bytes(),
            backup_boot_sector: (params.backup_boot_sector as u16).to_le_bytes(),
            reserved: [0; 12],
            drive_number: 0x80,
            reserved1: 0,
            boot_signature: 0x29,
            volume_id: volume_id.to_le_bytes(),
            volume_label: volume_label.raw,
            fs_type: *params.fat_type.fs_type_label(),
        };
        sector[BPB_EXT_OFFSET..BPB_EXT_OFFSET + size_of::<RawBpbExt32>()]
            .copy_from_slice(bytemuck::bytes_of(&ext));
    } else {
        let ext = RawBpbExt16 {
            drive_number: 0x80,
            reserved1: 0,
            boot_signature: 0x29,
            volume_id: volume_id.to_le_bytes(),
            volume_label: volume_label.raw,
            fs_type: *params.fat_type.fs_type_label(),
        };
        sector[BPB_EXT_OFFSET..BPB_EXT_OFFSET + size_of::<RawBpbExt16>()]
            .copy_from_slice(bytemuck::bytes_of(&ext));
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;

    device.write_sectors(0, 1, &sector)?;
    if params.fat_type == FatType::Fat32 && params.backup_boot_sector > 0 {
        device.write_sectors(params.backup_boot_sector, 1, &sector)?;
    }
    Ok(())
}

/// Lays down every FAT copy: the reserved leading entries, then zeros.
pub fn initialize_fat_tables<D: BlockDevice>(
    device: &mut D,
    params: &FormatParams,
) -> Result<(), Error> {
    let mut sector = alloc::vec![0u8; params.bytes_per_sector as usize];
    match params.fat_type {
        FatType::Fat12 => sector[..3].copy_from_slice(&[0xF8, 0xFF, 0xFF]),
        FatType::Fat16 => {
            sector[..2].copy_from_slice(&0xFFF8u16.to_le_bytes());
            sector[2..4].copy_from_slice(&0xFFFFu16.to_le_bytes());
        }
        FatType::Fat32 => {
            sector[..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
            sector[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
            // The root directory cluster ends its own chain.
            sector[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        }
    }

    for copy in 0..params.num_fats {
        let begin = params.reserved_sectors + copy * params.fat_size_sectors;
        device.write_sectors(begin, 1, &sector)?;
    }

    sector.fill(0);
    for copy in 0..params.num_fats {
        let begin = params.reserved_sectors + copy * params.fat_size_sectors;
        for s in 1..params.fat_size_sectors {
            device.write_sectors(begin + s, 1, &sector)?;
        }
    }
    Ok(())
}

/// Writes the FAT32 FS-Info sector: everything free except the root
/// cluster, allocator hint just past it.
pub fn create_fs_info<D: BlockDevice>(
    device: &mut D,
    params: &FormatParams,
) -> Result<(), Error> {
    if params.fat_type != FatType::Fat32 {
        return Err(Error::InvalidParam);
    }
    let info = FsInfo {
        free_count: params.total_clusters - 1,
        next_free: 3,
    };
    let mut sector = alloc::vec![0u8; params.bytes_per_sector as usize];
    info.encode(&mut sector);
    device.write_sectors(params.fs_info_sector, 1, &sector)?;
    Ok(())
}

/// Clears the root directory, writing a volume-label entry first when a
/// label was given.
pub fn initialize_root_directory<D: BlockDevice>(
    device: &mut D,
    params: &FormatParams,
    label: Option<&str>,
) -> Result<(), Error> {
    let mut sector = alloc::vec![0u8; params.bytes_per_sector as usize];
    if let Some(label) = label.filter(|l| !l.is_empty()) {
        let now = FatTime::now();
        let entry = RawDirEntry {
            name: padded_label(Some(label)).raw,
            attributes: FileAttributes::VOLUME_ID.bits(),
            create_time: now.time.to_le_bytes(),
            create_date: now.date.to_le_bytes(),
            access_date: now.date.to_le_bytes(),
            write_time: now.time.to_le_bytes(),
            write_date: now.date.to_le_bytes(),
            ..RawDirEntry::default()
        };
        sector[..DIR_ENTRY_SIZE as usize].copy_from_slice(bytemuck::bytes_of(&entry));
    }

    let (begin, sectors) = if params.fat_type == FatType::Fat32 {
        (
            params.root_begin_sector()
                + (params.root_cluster - 2) * params.sectors_per_cluster,
            params.sectors_per_cluster,
        )
    } else {
        (params.root_begin_sector(), params.root_dir_sectors())
    };
    for i in 0..sectors {
        device.write_sectors(begin + i, 1, &sector)?;
        if i == 0 {
            sector.fill(0);
        }
    }
    Ok(())
}

/// Formats the device: parameters, boot sector, FATs, FS-Info (FAT32),
/// root directory, in that order. A failed step aborts and leaves the
/// device in an indeterminate state.
pub fn format<D: BlockDevice>(
    device: &mut D,
    total_sectors: u32,
    options: &FormatOptions<'_>,
) -> Result<FormatParams, Error> {
    let params = FormatParams::calculate(total_sectors, 512, options)?;
    debug!(
        "formatting {:?}: {} sectors, {} clusters of {} bytes, fat {} sectors x{}",
        params.fat_type,
        params.total_sectors,
        params.total_clusters,
        params.bytes_per_cluster,
        params.fat_size_sectors,
        params.num_fats,
    );
    write_boot_sector(device, &params, options.volume_label)?;
    initialize_fat_tables(device, &params)?;
    if params.fat_type == FatType::Fat32 {
        create_fs_info(device, &params)?;
    }
    initialize_root_directory(device, &params, options.volume_label)?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use pretty_assertions::assert_eq;

    #[test]
    fn auto_cluster_table() {
        assert_eq!(auto_cluster_size(32 * MIB), 512);
        assert_eq!(auto_cluster_size(64 * MIB), 1024);
        assert_eq!(auto_cluster_size(128 * MIB), 2048);
        assert_eq!(auto_cluster_size(256 * MIB), 4096);
        assert_eq!(auto_cluster_size(8 * GIB), 4096);
        assert_eq!(auto_cluster_size(16 * GIB), 8192);
        assert_eq!(auto_cluster_size(32 * GIB), 16384);
        assert_eq!(auto_cluster_size(64 * GIB), 32768);
    }

    #[test]
    fn floppy_solves_to_fat12() {
        let params =
            FormatParams::calculate(2880, 512, &FormatOptions::default()).unwrap();
        assert_eq!(params.fat_type, FatType::Fat12);
        assert_eq!(params.sectors_per_cluster, 1);
        assert_eq!(params.reserved_sectors, 1);
        assert_eq!(params.root_entry_count, 224);
        assert!(params.total_clusters < 4085);
        // The solved FAT covers every cluster entry.
        assert!(
            params.fat_size_sectors * params.bytes_per_sector
                >= (params.total_clusters + 2) * 2
        );
    }

    #[test]
    fn mid_size_solves_to_fat16() {
        let params =
            FormatParams::calculate(40000, 512, &FormatOptions::default()).unwrap();
        assert_eq!(params.fat_type, FatType::Fat16);
        // Under 32 MiB the root region stays at the floppy-sized 224 entries.
        assert_eq!(params.root_entry_count, 224);
        assert!((4085..65525).contains(&params.total_clusters));

        let params = FormatParams::calculate(131_072, 512, &FormatOptions::default()).unwrap();
        assert_eq!(params.fat_type, FatType::Fat16);
        assert_eq!(params.root_entry_count, 512);
    }

    #[test]
    fn large_volume_switches_to_fat32() {
        // No preference: the first pass classifies FAT32 and restarts with
        // the FAT32 reserved/root layout.
        let params =
            FormatParams::calculate(1_048_576, 512, &FormatOptions::default()).unwrap();
        assert_eq!(params.fat_type, FatType::Fat32);
        assert_eq!(params.reserved_sectors, 32);
        assert_eq!(params.root_entry_count, 0);
        assert_eq!(params.root_cluster, 2);
        assert_eq!(params.fs_info_sector, 1);
        assert_eq!(params.backup_boot_sector, 6);
        assert!(params.total_clusters >= 65525);
    }

    #[test]
    fn fat32_rejects_small_cluster_count() {
        // 128 MiB at 8 sectors per cluster lands near 32k clusters, well
        // under the FAT32 floor.
        let err = FormatParams::calculate(
            262_144,
            512,
            &FormatOptions {
                fat_type: Some(FatType::Fat32),
                cluster_size: Some(4096),
                ..FormatOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, Error::InvalidParam);

        // Sixteen times the sectors clears it.
        let params = FormatParams::calculate(
            4_194_304,
            512,
            &FormatOptions {
                fat_type: Some(FatType::Fat32),
                cluster_size: Some(4096),
                ..FormatOptions::default()
            },
        )
        .unwrap();
        assert_eq!(params.fat_type, FatType::Fat32);
        assert!(params.total_clusters >= 65525);
    }

    #[test]
    fn rejects_hopeless_geometry() {
        assert!(FormatParams::calculate(0, 512, &FormatOptions::default()).is_err());
        assert!(FormatParams::calculate(16, 512, &FormatOptions::default()).is_err());
        // Cluster smaller than a sector.
        assert!(
            FormatParams::calculate(
                2880,
                4096,
                &FormatOptions {
                    cluster_size: Some(512),
                    ..FormatOptions::default()
                }
            )
            .is_err()
        );
        // 3 sectors per cluster is not a power of two.
        assert!(
            FormatParams::calculate(
                2880,
                512,
                &FormatOptions {
                    cluster_size: Some(1536),
                    ..FormatOptions::default()
                }
            )
            .is_err()
        );
    }

    #[test]
    fn boot_sector_bytes_are_well_formed() {
        let mut disk = MemDisk::new(2880, 512);
        let params = format(
            &mut disk,
            2880,
            &FormatOptions {
                volume_label: Some("DEMO"),
                ..FormatOptions::default()
            },
        )
        .unwrap();

        let bytes = disk.as_bytes();
        assert_eq!(&bytes[0..3], &[0xEB, 0x3C, 0x90]);
        assert_eq!(&bytes[3..11], b"FATDRV  ");
        assert_eq!(bytes[510], 0x55);
        assert_eq!(bytes[511], 0xAA);
        // FAT12/16 extension: label and type string.
        assert_eq!(&bytes[43..54], b"DEMO       ");
        assert_eq!(&bytes[54..62], b"FAT12   ");

        // The first FAT sector carries the reserved entries in both copies.
        let fat0 = params.reserved_sectors as usize * 512;
        let fat1 = fat0 + params.fat_size_sectors as usize * 512;
        assert_eq!(&bytes[fat0..fat0 + 3], &[0xF8, 0xFF, 0xFF]);
        assert_eq!(&bytes[fat1..fat1 + 3], &[0xF8, 0xFF, 0xFF]);
    }

    #[test]
    fn fat32_format_writes_backup_and_fs_info() {
        let mut disk = MemDisk::new(262_144, 512);
        let params = format(
            &mut disk,
            262_144,
            &FormatOptions {
                fat_type: Some(FatType::Fat32),
                cluster_size: Some(512),
                volume_label: Some("TEST"),
                ..FormatOptions::default()
            },
        )
        .unwrap();
        let bytes = disk.as_bytes();

        // Backup boot sector is byte-identical.
        let backup = params.backup_boot_sector as usize * 512;
        assert_eq!(&bytes[0..512], &bytes[backup..backup + 512]);

        // FS-Info signatures and hints.
        let fsi = params.fs_info_sector as usize * 512;
        assert_eq!(&bytes[fsi..fsi + 4], &0x41615252u32.to_le_bytes());
        assert_eq!(
            &bytes[fsi + 488..fsi + 492],
            &(params.total_clusters - 1).to_le_bytes()
        );
        assert_eq!(&bytes[fsi + 492..fsi + 496], &3u32.to_le_bytes());

        // Root cluster starts with the volume label entry.
        let root = (params.reserved_sectors
            + params.num_fats * params.fat_size_sectors) as usize
            * 512;
        assert_eq!(&bytes[root..root + 11], b"TEST       ");
        assert_eq!(bytes[root + 11], 0x08);
    }
}
