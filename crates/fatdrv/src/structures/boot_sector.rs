//! Boot-sector decoding and FAT-variant classification.
//!
//! The extended BPB differs by variant, so decoding is two-phased: the
//! common header is read first, the variant is classified from the cluster
//! count it implies, and only then is the tail reinterpreted as the
//! FAT12/16 or FAT32 extension.

use log::debug;

use crate::device::BlockDevice;
use crate::error::Error;
use crate::structures::raw::boot_sector::{
    BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, BPB_EXT_OFFSET, RawBpb, RawBpbExt16, RawBpbExt32,
};
use crate::structures::{FatStr, FatType};

/// Size of a directory entry in bytes.
pub const DIR_ENTRY_SIZE: u32 = 32;

/// The decoded and validated BIOS Parameter Block.
#[derive(Debug, Clone, Copy)]
pub struct Bpb {
    pub oem_name: FatStr<8>,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub media_type: u8,
    pub hidden_sectors: u32,
    /// The non-zero one of BPB_TotSec16/BPB_TotSec32.
    pub total_sectors: u32,
    /// The non-zero one of BPB_FATSz16/BPB_FATSz32.
    pub fat_size_sectors: u32,
    /// BPB_RootClus; meaningful only when `fat_size_16` was zero (FAT32).
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub volume_id: u32,
    pub volume_label: FatStr<11>,
}

impl Bpb {
    /// Reads LBA 0 and decodes it, validating the structural fields.
    pub fn parse<D: BlockDevice>(device: &mut D) -> Result<Self, Error> {
        let mut sector = [0u8; 512];
        device.read_sectors(0, 1, &mut sector)?;
        Self::decode(&sector)
    }

    /// Decodes the first 512 bytes of a volume.
    pub fn decode(sector: &[u8; 512]) -> Result<Self, Error> {
        let signature = u16::from_le_bytes([
            sector[BOOT_SIGNATURE_OFFSET],
            sector[BOOT_SIGNATURE_OFFSET + 1],
        ]);
        if signature != BOOT_SIGNATURE {
            return Err(Error::InvalidBootSector);
        }

        let raw: &RawBpb = bytemuck::from_bytes(&sector[..BPB_EXT_OFFSET]);
        let bytes_per_sector = u16::from_le_bytes(raw.bytes_per_sector);
        let sectors_per_cluster = raw.sectors_per_cluster;

        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(Error::InvalidBootSector);
        }
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(Error::InvalidBootSector);
        }
        if raw.num_fats == 0 {
            return Err(Error::InvalidBootSector);
        }
        let reserved_sector_count = u16::from_le_bytes(raw.reserved_sector_count);
        if reserved_sector_count == 0 {
            return Err(Error::InvalidBootSector);
        }

        let total_16 = u16::from_le_bytes(raw.total_sectors_16);
        let total_32 = u32::from_le_bytes(raw.total_sectors_32);
        let total_sectors = match (total_16, total_32) {
            (0, n) if n != 0 => n,
            (n, 0) if n != 0 => n as u32,
            _ => return Err(Error::InvalidBootSector),
        };

        // The 16-bit FAT size decides which extension layout follows.
        let fat_size_16 = u16::from_le_bytes(raw.fat_size_16);
        let ext32: &RawBpbExt32 =
            bytemuck::from_bytes(&sector[BPB_EXT_OFFSET..BPB_EXT_OFFSET + size_of::<RawBpbExt32>()]);
        let fat_size_32 = u32::from_le_bytes(ext32.fat_size_32);
        let fat_size_sectors = match (fat_size_16, fat_size_32) {
            (0, n) if n != 0 => n,
            (n, _) if n != 0 => n as u32,
            _ => return Err(Error::InvalidBootSector),
        };

        let (root_cluster, fs_info_sector, backup_boot_sector, volume_id, volume_label) =
            if fat_size_16 == 0 {
                (
                    u32::from_le_bytes(ext32.root_cluster),
                    u16::from_le_bytes(ext32.fs_info_sector),
                    u16::from_le_bytes(ext32.backup_boot_sector),
                    u32::from_le_bytes(ext32.volume_id),
                    FatStr::from_bytes(ext32.volume_label),
                )
            } else {
                let ext16: &RawBpbExt16 = bytemuck::from_bytes(
                    &sector[BPB_EXT_OFFSET..BPB_EXT_OFFSET + size_of::<RawBpbExt16>()],
                );
                (
                    0,
                    0,
                    0,
                    u32::from_le_bytes(ext16.volume_id),
                    FatStr::from_bytes(ext16.volume_label),
                )
            };

        Ok(Self {
            oem_name: FatStr::from_bytes(raw.oem_name),
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            num_fats: raw.num_fats,
            root_entry_count: u16::from_le_bytes(raw.root_entry_count),
            media_type: raw.media_type,
            hidden_sectors: u32::from_le_bytes(raw.hidden_sectors),
            total_sectors,
            fat_size_sectors,
            root_cluster,
            fs_info_sector,
            backup_boot_sector,
            volume_id,
            volume_label,
        })
    }

    /// Sectors occupied by the fixed FAT12/16 root region.
    pub fn root_dir_sectors(&self) -> u32 {
        (self.root_entry_count as u32 * DIR_ENTRY_SIZE + self.bytes_per_sector as u32 - 1)
            / self.bytes_per_sector as u32
    }

    /// First sector of the data region.
    pub fn data_begin_sector(&self) -> u32 {
        self.reserved_sector_count as u32
            + self.num_fats as u32 * self.fat_size_sectors
            + self.root_dir_sectors()
    }

    /// Number of data clusters on the volume.
    pub fn total_clusters(&self) -> u32 {
        let data_sectors = self.total_sectors.saturating_sub(self.data_begin_sector());
        data_sectors / self.sectors_per_cluster as u32
    }

    /// Classifies the variant from the cluster count alone.
    pub fn fat_type(&self) -> FatType {
        let ty = FatType::from_cluster_count(self.total_clusters());
        debug!(
            "classified volume: {} clusters -> {:?}",
            self.total_clusters(),
            ty
        );
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A minimal FAT16 boot sector: 2880 sectors, 1 sector/cluster,
    /// 1 reserved, 2 FATs of 9 sectors, 224 root entries.
    pub(crate) fn floppy_sector() -> [u8; 512] {
        let mut s = [0u8; 512];
        s[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        s[3..11].copy_from_slice(b"FATDRV  ");
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = 1; // sectors per cluster
        s[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved
        s[16] = 2; // fats
        s[17..19].copy_from_slice(&224u16.to_le_bytes());
        s[19..21].copy_from_slice(&2880u16.to_le_bytes());
        s[21] = 0xF0;
        s[22..24].copy_from_slice(&9u16.to_le_bytes()); // fat size
        s[38] = 0x29;
        s[43..54].copy_from_slice(b"NO NAME    ");
        s[54..62].copy_from_slice(b"FAT16   ");
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn decodes_floppy_geometry() {
        let bpb = Bpb::decode(&floppy_sector()).unwrap();
        assert_eq!(bpb.bytes_per_sector, 512);
        assert_eq!(bpb.sectors_per_cluster, 1);
        assert_eq!(bpb.reserved_sector_count, 1);
        assert_eq!(bpb.num_fats, 2);
        assert_eq!(bpb.root_entry_count, 224);
        assert_eq!(bpb.total_sectors, 2880);
        assert_eq!(bpb.fat_size_sectors, 9);
        assert_eq!(bpb.root_dir_sectors(), 14);
        assert_eq!(bpb.data_begin_sector(), 1 + 18 + 14);
        assert_eq!(bpb.total_clusters(), 2880 - 33);
        assert_eq!(bpb.fat_type(), FatType::Fat12);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut s = floppy_sector();
        s[511] = 0x00;
        assert_eq!(Bpb::decode(&s).unwrap_err(), Error::InvalidBootSector);
    }

    #[test]
    fn rejects_bad_sector_size() {
        let mut s = floppy_sector();
        s[11..13].copy_from_slice(&256u16.to_le_bytes());
        assert!(Bpb::decode(&s).is_err());
        s[11..13].copy_from_slice(&1000u16.to_le_bytes());
        assert!(Bpb::decode(&s).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_cluster() {
        let mut s = floppy_sector();
        s[13] = 3;
        assert!(Bpb::decode(&s).is_err());
        s[13] = 0;
        assert!(Bpb::decode(&s).is_err());
    }

    #[test]
    fn rejects_zero_fats_and_reserved() {
        let mut s = floppy_sector();
        s[16] = 0;
        assert!(Bpb::decode(&s).is_err());
        let mut s = floppy_sector();
        s[14..16].copy_from_slice(&0u16.to_le_bytes());
        assert!(Bpb::decode(&s).is_err());
    }

    #[test]
    fn rejects_ambiguous_totals() {
        let mut s = floppy_sector();
        // Both total fields zero.
        s[19..21].copy_from_slice(&0u16.to_le_bytes());
        assert!(Bpb::decode(&s).is_err());
        // Both set.
        s[19..21].copy_from_slice(&2880u16.to_le_bytes());
        s[32..36].copy_from_slice(&2880u32.to_le_bytes());
        assert!(Bpb::decode(&s).is_err());
    }

    #[test]
    fn decodes_fat32_extension() {
        let mut s = [0u8; 512];
        s[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = 8;
        s[14..16].copy_from_slice(&32u16.to_le_bytes());
        s[16] = 2;
        s[32..36].copy_from_slice(&4_194_304u32.to_le_bytes());
        s[36..40].copy_from_slice(&4096u32.to_le_bytes()); // fat size 32
        s[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
        s[48..50].copy_from_slice(&1u16.to_le_bytes());
        s[50..52].copy_from_slice(&6u16.to_le_bytes());
        s[71..82].copy_from_slice(b"BIGVOL     ");
        s[510] = 0x55;
        s[511] = 0xAA;

        let bpb = Bpb::decode(&s).unwrap();
        assert_eq!(bpb.root_entry_count, 0);
        assert_eq!(bpb.root_dir_sectors(), 0);
        assert_eq!(bpb.root_cluster, 2);
        assert_eq!(bpb.fs_info_sector, 1);
        assert_eq!(bpb.volume_label.trimmed(), "BIGVOL");
        assert_eq!(bpb.fat_type(), FatType::Fat32);
    }
}
