//! The block device contract.
//!
//! The driver talks to storage exclusively through [`BlockDevice`]; it never
//! assumes a file, a memory buffer, or any particular backing. Two
//! implementations ship with the crate: [`MemDisk`], a heap-backed image
//! used by the tests and useful for scratch volumes, and (with the `std`
//! feature) [`FileDisk`] over an image file. A plain `&mut [u8]` also works
//! as a 512-byte-sector device.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::DeviceError;

/// A sector-addressed storage medium.
///
/// `lba` is the 32-bit logical block address of the first sector and `count`
/// the number of whole sectors addressed. The transfer length is
/// `buf.len()` bytes, which must not exceed `count` sectors; a shorter
/// buffer transfers a prefix of the addressed range (the boot-sector parser
/// relies on this to read the first 512 bytes of a volume whose sector size
/// it does not yet know).
pub trait BlockDevice {
    fn read_sectors(&mut self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceError>;
    fn write_sectors(&mut self, lba: u32, count: u32, buf: &[u8]) -> Result<(), DeviceError>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn read_sectors(&mut self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_sectors(lba, count, buf)
    }

    fn write_sectors(&mut self, lba: u32, count: u32, buf: &[u8]) -> Result<(), DeviceError> {
        (**self).write_sectors(lba, count, buf)
    }
}

/// A RAM-backed disk image.
pub struct MemDisk {
    bytes: Vec<u8>,
    sector_size: usize,
    read_only: bool,
}

impl MemDisk {
    /// Creates a zero-filled image of `sectors` sectors.
    pub fn new(sectors: u32, sector_size: usize) -> Self {
        Self {
            bytes: vec![0u8; sectors as usize * sector_size],
            sector_size,
            read_only: false,
        }
    }

    /// Wraps an existing image. The length must be a whole number of sectors.
    pub fn from_bytes(bytes: Vec<u8>, sector_size: usize) -> Self {
        assert!(bytes.len() % sector_size == 0);
        Self {
            bytes,
            sector_size,
            read_only: false,
        }
    }

    /// Makes every subsequent write fail with [`DeviceError::ReadOnly`].
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn sector_count(&self) -> u32 {
        (self.bytes.len() / self.sector_size) as u32
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn range(&self, lba: u32, count: u32, len: usize) -> Result<usize, DeviceError> {
        let start = lba as usize * self.sector_size;
        let span = count as usize * self.sector_size;
        if len > span || start + span > self.bytes.len() {
            return Err(DeviceError::OutOfRange);
        }
        Ok(start)
    }
}

impl BlockDevice for MemDisk {
    fn read_sectors(&mut self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let start = self.range(lba, count, buf.len())?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u32, count: u32, buf: &[u8]) -> Result<(), DeviceError> {
        if self.read_only {
            return Err(DeviceError::ReadOnly);
        }
        let start = self.range(lba, count, buf.len())?;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// A byte slice as a 512-byte-sector device.
impl BlockDevice for [u8] {
    fn read_sectors(&mut self, lba: u32, _count: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let start = lba as usize * 512;
        if start + buf.len() > self.len() {
            return Err(DeviceError::OutOfRange);
        }
        buf.copy_from_slice(&self[start..start + buf.len()]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u32, _count: u32, buf: &[u8]) -> Result<(), DeviceError> {
        let start = lba as usize * 512;
        if start + buf.len() > self.len() {
            return Err(DeviceError::OutOfRange);
        }
        self[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// An image file as a block device.
#[cfg(feature = "std")]
pub struct FileDisk {
    file: std::fs::File,
    sector_size: u64,
}

#[cfg(feature = "std")]
impl FileDisk {
    pub fn new(file: std::fs::File, sector_size: usize) -> Self {
        Self {
            file,
            sector_size: sector_size as u64,
        }
    }

    /// Opens an image file with 512-byte sectors, read-write.
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self::new(file, 512))
    }

    pub fn sector_count(&self) -> std::io::Result<u32> {
        Ok((self.file.metadata()?.len() / self.sector_size) as u32)
    }
}

#[cfg(feature = "std")]
impl BlockDevice for FileDisk {
    fn read_sectors(&mut self, lba: u32, _count: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        use std::io::{Read, Seek, SeekFrom};
        self.file
            .seek(SeekFrom::Start(lba as u64 * self.sector_size))
            .map_err(|_| DeviceError::OutOfRange)?;
        self.file.read_exact(buf).map_err(|_| DeviceError::Io)
    }

    fn write_sectors(&mut self, lba: u32, _count: u32, buf: &[u8]) -> Result<(), DeviceError> {
        use std::io::{Seek, SeekFrom, Write};
        self.file
            .seek(SeekFrom::Start(lba as u64 * self.sector_size))
            .map_err(|_| DeviceError::OutOfRange)?;
        self.file.write_all(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                DeviceError::ReadOnly
            } else {
                DeviceError::Io
            }
        })
    }
}
