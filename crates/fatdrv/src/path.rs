//! Path resolution: repeated open-and-scan from the root.

use alloc::string::String;

use crate::device::BlockDevice;
use crate::dir::{DirEntryInfo, DirEntryLocation, DirReader};
use crate::error::Error;
use crate::structures::directory::FileAttributes;
use crate::structures::time::FatTime;
use crate::volume::Volume;

/// A synthetic record for the root directory, which has no entry of its own.
fn root_entry<D: BlockDevice>(volume: &Volume<D>) -> DirEntryInfo {
    DirEntryInfo {
        short_name: String::from("/"),
        long_name: None,
        attributes: FileAttributes::DIRECTORY,
        first_cluster: volume.root_dir_cluster(),
        size: 0,
        created: FatTime::default(),
        modified: FatTime::default(),
        accessed: FatTime::default(),
        location: DirEntryLocation {
            dir_cluster: 0,
            index: 0,
            lfn_slots: 0,
        },
    }
}

/// Splits a path into its non-empty '/'-separated components.
pub(crate) fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// Scans one directory for a component, comparing case-insensitively
/// against both the short and the long name.
pub(crate) fn find_in_dir<D: BlockDevice>(
    volume: &mut Volume<D>,
    dir_cluster: u32,
    component: &str,
) -> Result<Option<DirEntryInfo>, Error> {
    let mut reader = DirReader::open(volume, dir_cluster)?;
    loop {
        match reader.read_dir() {
            Ok(entry) => {
                if entry.matches(component) {
                    return Ok(Some(entry));
                }
            }
            Err(Error::Eof) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Resolves a path to its directory entry.
///
/// Every intermediate component must be a directory; a missing component is
/// `NotFound`. `/` (and the empty path) resolves to a synthetic root record.
pub fn resolve<D: BlockDevice>(volume: &mut Volume<D>, path: &str) -> Result<DirEntryInfo, Error> {
    let mut current = root_entry(volume);
    for component in components(path) {
        if !current.is_directory() {
            return Err(Error::NotADirectory);
        }
        current = find_in_dir(volume, current.first_cluster, component)?
            .ok_or(Error::NotFound)?;
    }
    Ok(current)
}

/// Splits a path into the parent directory's path and the final component.
pub(crate) fn split_parent(path: &str) -> Result<(&str, &str), Error> {
    let trimmed = path.trim_end_matches('/');
    let mut last = None;
    for component in components(trimmed) {
        last = Some(component);
    }
    let name = last.ok_or(Error::InvalidParam)?;
    let parent_len = name.as_ptr() as usize - trimmed.as_ptr() as usize;
    Ok((&trimmed[..parent_len], name))
}

impl<D: BlockDevice> Volume<D> {
    /// Resolves `path` and returns its record without opening anything.
    pub fn stat(&mut self, path: &str) -> Result<DirEntryInfo, Error> {
        resolve(self, path)
    }
}
