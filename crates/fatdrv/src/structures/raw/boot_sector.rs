/// The common BIOS Parameter Block, bytes 0..36 of the boot sector.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawBpb {
    /// BS_jmpBoot
    pub jump: [u8; 3],
    /// BS_OEMName
    pub oem_name: [u8; 8],
    /// BPB_BytsPerSec
    ///
    /// A power of two, 512 through 4096.
    pub bytes_per_sector: [u8; 2],
    /// BPB_SecPerClus
    ///
    /// A power of two, 1 through 128.
    pub sectors_per_cluster: u8,
    /// BPB_RsvdSecCnt
    ///
    /// Must be nonzero, the boot sector itself is reserved.
    pub reserved_sector_count: [u8; 2],
    /// BPB_NumFATs
    pub num_fats: u8,
    /// BPB_RootEntCnt
    ///
    /// Entry capacity of the fixed FAT12/16 root region; 0 on FAT32.
    pub root_entry_count: [u8; 2],
    /// BPB_TotSec16
    ///
    /// Total sector count when it fits 16 bits, else 0 and BPB_TotSec32
    /// carries the count.
    pub total_sectors_16: [u8; 2],
    /// BPB_Media
    pub media_type: u8,
    /// BPB_FATSz16
    ///
    /// Sectors per FAT for FAT12/16; 0 on FAT32.
    pub fat_size_16: [u8; 2],
    /// BPB_SecPerTrk
    pub sectors_per_track: [u8; 2],
    /// BPB_NumHeads
    pub num_heads: [u8; 2],
    /// BPB_HiddSec
    pub hidden_sectors: [u8; 4],
    /// BPB_TotSec32
    pub total_sectors_32: [u8; 4],
}

/// The FAT12/16 extended BPB, bytes 36..62.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawBpbExt16 {
    /// BS_DrvNum
    pub drive_number: u8,
    /// BS_Reserved1
    pub reserved1: u8,
    /// BS_BootSig
    ///
    /// 0x29 when the three fields below are present.
    pub boot_signature: u8,
    /// BS_VolID
    pub volume_id: [u8; 4],
    /// BS_VolLab
    pub volume_label: [u8; 11],
    /// BS_FilSysType
    ///
    /// "FAT12   " or "FAT16   "; informational only.
    pub fs_type: [u8; 8],
}

/// The FAT32 extended BPB, bytes 36..90.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawBpbExt32 {
    /// BPB_FATSz32
    pub fat_size_32: [u8; 4],
    /// BPB_ExtFlags
    pub ext_flags: [u8; 2],
    /// BPB_FSVer
    ///
    /// Must be 0.
    pub fs_version: [u8; 2],
    /// BPB_RootClus
    ///
    /// First cluster of the root directory, usually 2.
    pub root_cluster: [u8; 4],
    /// BPB_FSInfo
    pub fs_info_sector: [u8; 2],
    /// BPB_BkBootSec
    ///
    /// 6 when a backup boot sector is kept.
    pub backup_boot_sector: [u8; 2],
    /// BPB_Reserved
    pub reserved: [u8; 12],
    /// BS_DrvNum
    pub drive_number: u8,
    /// BS_Reserved1
    pub reserved1: u8,
    /// BS_BootSig
    pub boot_signature: u8,
    /// BS_VolID
    pub volume_id: [u8; 4],
    /// BS_VolLab
    pub volume_label: [u8; 11],
    /// BS_FilSysType
    ///
    /// "FAT32   "; informational only.
    pub fs_type: [u8; 8],
}

/// Byte offset of the extended BPB inside the boot sector.
pub const BPB_EXT_OFFSET: usize = 36;
/// Byte offset of the 0xAA55 signature word.
pub const BOOT_SIGNATURE_OFFSET: usize = 510;
/// The boot-sector signature, stored little-endian as `55 AA`.
pub const BOOT_SIGNATURE: u16 = 0xAA55;
