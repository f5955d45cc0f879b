//! Decoded view of the FAT32 FS-Info sector.

use crate::structures::raw::fs_info::{
    FSINFO_LEAD_SIGNATURE, FSINFO_STRUCTURE_SIGNATURE, FSINFO_TRAIL_SIGNATURE, RawFsInfo,
};

/// Free-cluster count and next-free hint, as cached on a FAT32 volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

/// Marks an unknown free count or hint.
pub const FSINFO_UNKNOWN: u32 = 0xFFFF_FFFF;

impl FsInfo {
    /// Decodes a 512-byte FS-Info sector, `None` when the signatures do not
    /// match (the hints are then simply unavailable).
    pub fn decode(sector: &[u8]) -> Option<Self> {
        let raw: &RawFsInfo = bytemuck::from_bytes(&sector[..512]);
        if u32::from_le_bytes(raw.lead_signature) != FSINFO_LEAD_SIGNATURE
            || u32::from_le_bytes(raw.structure_signature) != FSINFO_STRUCTURE_SIGNATURE
            || u32::from_le_bytes(raw.trail_signature) != FSINFO_TRAIL_SIGNATURE
        {
            return None;
        }
        Some(Self {
            free_count: u32::from_le_bytes(raw.free_count),
            next_free: u32::from_le_bytes(raw.next_free),
        })
    }

    /// Writes the signatures and hints into a zeroed 512-byte sector buffer.
    pub fn encode(&self, sector: &mut [u8]) {
        sector[..512].fill(0);
        sector[0..4].copy_from_slice(&FSINFO_LEAD_SIGNATURE.to_le_bytes());
        sector[484..488].copy_from_slice(&FSINFO_STRUCTURE_SIGNATURE.to_le_bytes());
        sector[488..492].copy_from_slice(&self.free_count.to_le_bytes());
        sector[492..496].copy_from_slice(&self.next_free.to_le_bytes());
        sector[508..512].copy_from_slice(&FSINFO_TRAIL_SIGNATURE.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let info = FsInfo {
            free_count: 1234,
            next_free: 3,
        };
        let mut sector = [0xAAu8; 512];
        info.encode(&mut sector);
        assert_eq!(FsInfo::decode(&sector), Some(info));
        assert_eq!(&sector[0..4], &0x41615252u32.to_le_bytes());
        assert_eq!(&sector[508..512], &0xAA550000u32.to_le_bytes());
    }

    #[test]
    fn rejects_bad_signatures() {
        let mut sector = [0u8; 512];
        FsInfo {
            free_count: 1,
            next_free: 2,
        }
        .encode(&mut sector);
        sector[0] = 0;
        assert_eq!(FsInfo::decode(&sector), None);
    }
}
