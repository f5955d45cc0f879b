/// The FAT32 FS-Info sector.
///
/// Caches the free-cluster count and the allocator's next-free hint so
/// mounting does not have to scan the whole FAT. Both fields are advisory;
/// 0xFFFFFFFF means unknown.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawFsInfo {
    /// FSI_LeadSig, 0x41615252 ("RRaA")
    pub lead_signature: [u8; 4],
    /// FSI_Reserved1
    pub reserved1_0: [u8; 256],
    pub reserved1_1: [u8; 128],
    pub reserved1_2: [u8; 96],
    /// FSI_StrucSig, 0x61417272 ("rrAa")
    pub structure_signature: [u8; 4],
    /// FSI_Free_Count
    pub free_count: [u8; 4],
    /// FSI_Nxt_Free
    pub next_free: [u8; 4],
    /// FSI_Reserved2
    pub reserved2: [u8; 12],
    /// FSI_TrailSig, 0xAA550000
    pub trail_signature: [u8; 4],
}

pub const FSINFO_LEAD_SIGNATURE: u32 = 0x41615252;
pub const FSINFO_STRUCTURE_SIGNATURE: u32 = 0x61417272;
pub const FSINFO_TRAIL_SIGNATURE: u32 = 0xAA550000;
