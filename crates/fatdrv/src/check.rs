//! Integrity checking: chain validation and FAT-copy consistency.

use log::warn;

use crate::device::BlockDevice;
use crate::error::Error;
use crate::structures::FatType;
use crate::volume::Volume;

/// Chains longer than this are considered corrupt regardless of shape.
pub const MAX_CLUSTER_CHAIN_LENGTH: u32 = 1024 * 1024;

impl<D: BlockDevice> Volume<D> {
    /// One validated step along a chain: the successor, or `None` at
    /// end-of-chain. Bad and out-of-range links are corruption.
    fn checked_next(&self, cluster: u32) -> Result<Option<u32>, Error> {
        let entry = self.next_cluster(cluster)?;
        if self.fat_type().is_eoc(entry) {
            return Ok(None);
        }
        if self.fat_type().is_bad(entry) || !self.is_valid_cluster(entry) {
            warn!("chain leaves the data region at cluster {}", cluster);
            return Err(Error::Corrupted);
        }
        Ok(Some(entry))
    }

    /// Validates the chain starting at `start` with Floyd's tortoise and
    /// hare: reports `Corrupted` on a cycle, on a bad or out-of-range link,
    /// or past [`MAX_CLUSTER_CHAIN_LENGTH`] links.
    pub fn validate_cluster_chain(&self, start: u32) -> Result<(), Error> {
        if !self.is_valid_cluster(start) {
            return Err(Error::InvalidCluster);
        }
        let mut slow = start;
        let mut fast = start;
        let mut length = 0u32;
        loop {
            slow = match self.checked_next(slow)? {
                Some(c) => c,
                None => return Ok(()),
            };
            fast = match self.checked_next(fast)? {
                Some(c) => c,
                None => return Ok(()),
            };
            fast = match self.checked_next(fast)? {
                Some(c) => c,
                None => return Ok(()),
            };
            if slow == fast {
                warn!("cluster chain from {} closes on itself at {}", start, slow);
                return Err(Error::Corrupted);
            }
            length += 1;
            if length > MAX_CLUSTER_CHAIN_LENGTH {
                return Err(Error::Corrupted);
            }
        }
    }

    /// Compares every sector of FAT #0 against the same sector of each
    /// other copy; any difference is corruption. Requires a second copy.
    pub fn check_fat_consistency(&mut self) -> Result<(), Error> {
        if self.num_fats() < 2 {
            return Err(Error::InvalidParam);
        }
        let mut primary = self.sector_buf();
        let mut mirror = self.sector_buf();
        for copy in 1..self.num_fats() {
            for sector in 0..self.fat_size_sectors() {
                self.device.read_sectors(
                    self.fat_begin_sector() + sector,
                    1,
                    &mut primary,
                )?;
                self.device.read_sectors(
                    self.fat_begin_sector() + copy * self.fat_size_sectors() + sector,
                    1,
                    &mut mirror,
                )?;
                if primary != mirror {
                    warn!("FAT copy {} differs at sector {}", copy, sector);
                    return Err(Error::Corrupted);
                }
            }
        }
        Ok(())
    }

    /// Volume-level integrity: FAT copies agree and, on FAT32, the root
    /// chain is sound.
    pub fn check_integrity(&mut self) -> Result<(), Error> {
        if self.num_fats() >= 2 {
            self.check_fat_consistency()?;
        }
        if self.fat_type() == FatType::Fat32 {
            self.validate_cluster_chain(self.root_dir_cluster())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::format::{self, FormatOptions};

    fn fat16_volume() -> Volume<MemDisk> {
        let mut disk = MemDisk::new(40000, 512);
        format::format(
            &mut disk,
            40000,
            &FormatOptions {
                fat_type: Some(FatType::Fat16),
                ..FormatOptions::default()
            },
        )
        .unwrap();
        Volume::mount(disk).unwrap()
    }

    #[test]
    fn straight_chain_validates() {
        let mut v = fat16_volume();
        let head = v.allocate_cluster().unwrap();
        let mut last = head;
        for _ in 0..63 {
            last = v.extend_chain(last).unwrap();
        }
        v.validate_cluster_chain(head).unwrap();
    }

    #[test]
    fn two_cluster_cycle_is_detected() {
        let mut v = fat16_volume();
        v.write_fat_entry(5, 6).unwrap();
        v.write_fat_entry(6, 5).unwrap();
        assert_eq!(v.validate_cluster_chain(5).unwrap_err(), Error::Corrupted);
    }

    #[test]
    fn self_loop_is_detected() {
        let mut v = fat16_volume();
        v.write_fat_entry(9, 9).unwrap();
        assert_eq!(v.validate_cluster_chain(9).unwrap_err(), Error::Corrupted);
    }

    #[test]
    fn long_cycle_is_detected() {
        let mut v = fat16_volume();
        for c in 10..30u32 {
            v.write_fat_entry(c, c + 1).unwrap();
        }
        v.write_fat_entry(30, 10).unwrap();
        assert_eq!(v.validate_cluster_chain(10).unwrap_err(), Error::Corrupted);
    }

    #[test]
    fn free_link_is_corrupt_not_eoc() {
        let mut v = fat16_volume();
        // A chain pointing into a free entry walks out of bounds (0 and 1
        // are never valid).
        v.write_fat_entry(12, 13).unwrap();
        // fat[13] stays FREE = 0.
        assert_eq!(v.validate_cluster_chain(12).unwrap_err(), Error::Corrupted);
    }

    #[test]
    fn fat_copies_compare_equal_after_flush() {
        let mut v = fat16_volume();
        let head = v.allocate_cluster().unwrap();
        v.extend_chain(head).unwrap();
        v.flush().unwrap();
        v.check_fat_consistency().unwrap();
        v.check_integrity().unwrap();
    }

    #[test]
    fn diverged_copy_is_detected() {
        let mut v = fat16_volume();
        // Scribble on the second copy directly.
        let lba = v.fat_begin_sector() + v.fat_size_sectors() + 3;
        let mut sector = [0u8; 512];
        sector[0] = 0xEE;
        v.device.write_sectors(lba, 1, &sector).unwrap();
        assert_eq!(v.check_fat_consistency().unwrap_err(), Error::Corrupted);
    }

    #[test]
    fn bad_marker_in_chain_is_corrupt() {
        let mut v = fat16_volume();
        v.write_fat_entry(20, 21).unwrap();
        v.write_fat_entry(21, 0xFFF7).unwrap();
        assert_eq!(v.validate_cluster_chain(20).unwrap_err(), Error::Corrupted);
    }
}
