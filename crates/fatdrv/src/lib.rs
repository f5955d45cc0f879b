//! A user-space driver for the FAT family of filesystems.
//!
//! fatdrv mounts existing FAT12, FAT16 and FAT32 volumes, walks their
//! directory trees (long file names included), reads and writes files,
//! allocates and frees cluster chains, and formats fresh volumes of any of
//! the three variants. It sits on top of any sector-addressed storage that
//! implements [`BlockDevice`]; nothing below that trait is assumed.
//!
//! ```no_run
//! use fatdrv::{FormatOptions, MemDisk, OpenFlags, Volume};
//!
//! let mut disk = MemDisk::new(40000, 512);
//! fatdrv::format(&mut disk, 40000, &FormatOptions {
//!     volume_label: Some("SCRATCH"),
//!     ..FormatOptions::default()
//! })?;
//!
//! let mut volume = Volume::mount(&mut disk)?;
//! let mut file = volume.open_file("/notes.txt", OpenFlags::RDWR | OpenFlags::CREATE)?;
//! file.write(&mut volume, b"remember the reserved clusters")?;
//! file.close(&mut volume)?;
//! volume.unmount()?;
//! # Ok::<(), fatdrv::Error>(())
//! ```
//!
//! ## Cargo features
//!
//! - **std** (default): wall-clock timestamps via `chrono` and the
//!   file-backed [`FileDisk`] device. Without it the crate is `no_std`
//!   (alloc is still required for the FAT cache and name handling).

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod check;
pub mod device;
pub mod dir;
pub mod error;
pub mod fat;
pub mod file;
pub mod format;
pub mod path;
pub mod structures;
pub mod volume;

#[cfg(feature = "std")]
pub use device::FileDisk;
pub use device::{BlockDevice, MemDisk};
pub use dir::{DirEntryInfo, DirReader};
pub use error::{DeviceError, Error};
pub use file::{File, OpenFlags, SeekFrom};
pub use format::{FormatOptions, FormatParams, format};
pub use structures::FatType;
pub use structures::directory::FileAttributes;
pub use volume::Volume;
