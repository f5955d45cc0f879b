//! Raw on-disk byte layouts.
//!
//! Every multi-byte field is stored as a little-endian `[u8; N]` so the
//! structs carry no alignment and can be read from or written to a sector
//! buffer with `bytemuck` on any host.

pub mod boot_sector;
pub mod directory;
pub mod fs_info;

pub use boot_sector::{RawBpb, RawBpbExt16, RawBpbExt32};
pub use directory::{RawDirEntry, RawLfnEntry};
pub use fs_info::RawFsInfo;
