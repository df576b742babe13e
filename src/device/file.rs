//! File-backed block device.
//!
//! Stores the whole flash image in a single file, one block after another.
//! Programming ANDs the new bits into the existing image so the file behaves
//! like the real medium, and every mutation is followed by `sync_all` so a
//! completed store operation is on disk before it is acknowledged.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{check_range, BlockDevice, DeviceError, DeviceResult, Geometry, ERASED_BYTE};

/// Block device backed by a flat image file.
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
    geometry: Geometry,
}

impl FileDevice {
    /// Create a new image file with every block erased. Fails if the file
    /// already exists with a different size.
    pub fn create(path: &Path, geometry: Geometry) -> DeviceResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let expected = geometry.capacity();
        let actual = file.metadata()?.len();
        if actual != 0 && actual != expected {
            return Err(DeviceError::GeometryMismatch(format!(
                "image {} is {} bytes, geometry wants {}",
                path.display(),
                actual,
                expected
            )));
        }

        let mut device = Self {
            path: path.to_path_buf(),
            file,
            geometry,
        };

        if actual == 0 {
            device.file.set_len(expected)?;
            for block in 0..geometry.block_count {
                device.erase(block)?;
            }
            device.sync()?;
        }

        Ok(device)
    }

    /// Open an existing image file. The file size must match the geometry.
    pub fn open(path: &Path, geometry: Geometry) -> DeviceResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let expected = geometry.capacity();
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(DeviceError::GeometryMismatch(format!(
                "image {} is {} bytes, geometry wants {}",
                path.display(),
                actual,
                expected
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            geometry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seek_to(&mut self, block: u32, offset: u32) -> DeviceResult<()> {
        let pos = block as u64 * self.geometry.block_size as u64 + offset as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> DeviceResult<()> {
        check_range(self.geometry, block, offset, buf.len())?;
        let pos = block as u64 * self.geometry.block_size as u64 + offset as u64;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn program(&mut self, block: u32, offset: u32, data: &[u8]) -> DeviceResult<()> {
        check_range(self.geometry, block, offset, data.len())?;

        let mut current = vec![0u8; data.len()];
        self.read(block, offset, &mut current)?;

        let mut merged = Vec::with_capacity(data.len());
        for (i, (&old, &new)) in current.iter().zip(data.iter()).enumerate() {
            if old & new != new {
                return Err(DeviceError::ProgramConflict {
                    block,
                    offset: offset + i as u32,
                });
            }
            merged.push(old & new);
        }

        self.seek_to(block, offset)?;
        self.file.write_all(&merged)?;
        Ok(())
    }

    fn erase(&mut self, block: u32) -> DeviceResult<()> {
        check_range(self.geometry, block, 0, self.geometry.block_size as usize)?;
        self.seek_to(block, 0)?;
        let blank = vec![ERASED_BYTE; self.geometry.block_size as usize];
        self.file.write_all(&blank)?;
        Ok(())
    }

    fn sync(&mut self) -> DeviceResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
