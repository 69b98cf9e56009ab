//! Memory - IO descriptors and address-space maps
//!
//! Opened files and virtual buffers become descriptors; maps place a
//! descriptor's bytes into the session address space. Reads of unmapped
//! addresses yield `0xff`.

use std::collections::BTreeMap;
use thiserror::Error;

/// IO errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Unknown file descriptor: {fd}")]
    UnknownFd { fd: u32 },

    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Failed to write memory at {address:#x}: {reason}")]
    WriteFailed { address: u64, reason: String },
}

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl MemoryProtection {
    pub const R: Self = Self {
        read: true,
        write: false,
        execute: false,
    };
    pub const RX: Self = Self {
        read: true,
        write: false,
        execute: true,
    };
    pub const RW: Self = Self {
        read: true,
        write: true,
        execute: false,
    };

    pub fn as_str(&self) -> String {
        format!(
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' }
        )
    }
}

/// A memory region of the debuggee, as listed by `dm`
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    /// Start address of the region
    pub base_address: u64,

    /// Size of the region in bytes
    pub size: u64,

    pub protection: MemoryProtection,

    /// Optional name (e.g., module name, "[stack]", "[heap]")
    pub name: Option<String>,
}

/// An open descriptor and its backing bytes
#[derive(Debug, Clone)]
pub struct Desc {
    pub fd: u32,
    pub uri: String,
    pub data: Vec<u8>,
    pub protection: MemoryProtection,
}

/// Placement of a descriptor in the address space
#[derive(Debug, Clone, PartialEq)]
pub struct IoMap {
    pub fd: u32,
    pub from: u64,
    pub size: u64,
    /// Offset inside the descriptor where the map starts
    pub delta: u64,
}

#[derive(Debug, Default)]
pub struct Io {
    descs: BTreeMap<u32, Desc>,
    /// Later maps shadow earlier ones
    maps: Vec<IoMap>,
    current: Option<u32>,
    next_fd: u32,
}

impl Io {
    pub fn new() -> Self {
        Self {
            next_fd: 3,
            ..Self::default()
        }
    }

    /// Open a descriptor over `data` and map it at `at`. The new descriptor
    /// becomes the current one.
    pub fn open(&mut self, uri: &str, data: Vec<u8>, at: u64, protection: MemoryProtection) -> u32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        let size = data.len() as u64;
        self.descs.insert(
            fd,
            Desc {
                fd,
                uri: uri.to_string(),
                data,
                protection,
            },
        );
        if size > 0 {
            self.maps.push(IoMap {
                fd,
                from: at,
                size,
                delta: 0,
            });
        }
        self.current = Some(fd);
        log::debug!("io: opened fd {} ({}) at {:#x}", fd, uri, at);
        fd
    }

    /// Open a descriptor without mapping it
    pub fn open_unmapped(&mut self, uri: &str, data: Vec<u8>, protection: MemoryProtection) -> u32 {
        let fd = self.open(uri, Vec::new(), 0, protection);
        if let Some(desc) = self.descs.get_mut(&fd) {
            desc.data = data;
        }
        fd
    }

    /// Map `size` bytes of `fd`, starting at `delta` in the descriptor, at `from`
    pub fn map(&mut self, fd: u32, from: u64, size: u64, delta: u64) -> Result<(), MemoryError> {
        if !self.descs.contains_key(&fd) {
            return Err(MemoryError::UnknownFd { fd });
        }
        self.maps.push(IoMap {
            fd,
            from,
            size,
            delta,
        });
        Ok(())
    }

    /// Close a descriptor and drop its maps
    pub fn close(&mut self, fd: u32) -> Result<(), MemoryError> {
        self.descs
            .remove(&fd)
            .ok_or(MemoryError::UnknownFd { fd })?;
        self.maps.retain(|m| m.fd != fd);
        if self.current == Some(fd) {
            self.current = self.descs.keys().next_back().copied();
        }
        log::debug!("io: closed fd {}", fd);
        Ok(())
    }

    /// Switch the current descriptor, returning the previous one
    pub fn use_fd(&mut self, fd: u32) -> Result<Option<u32>, MemoryError> {
        if !self.descs.contains_key(&fd) {
            return Err(MemoryError::UnknownFd { fd });
        }
        Ok(self.current.replace(fd))
    }

    /// Restore a descriptor selection saved by [`Io::use_fd`]
    pub fn restore_fd(&mut self, fd: Option<u32>) {
        self.current = fd.filter(|fd| self.descs.contains_key(fd));
    }

    pub fn current_fd(&self) -> Option<u32> {
        self.current
    }

    pub fn desc(&self, fd: u32) -> Option<&Desc> {
        self.descs.get(&fd)
    }

    pub fn descs(&self) -> impl Iterator<Item = &Desc> {
        self.descs.values()
    }

    pub fn maps(&self) -> &[IoMap] {
        &self.maps
    }

    /// Maps belonging to `fd`
    pub fn maps_of(&self, fd: u32) -> Vec<IoMap> {
        self.maps.iter().filter(|m| m.fd == fd).cloned().collect()
    }

    fn byte_at(&self, addr: u64) -> Option<u8> {
        // The current descriptor wins, then the most recent map
        let hit = |m: &&IoMap| addr >= m.from && addr - m.from < m.size;
        let map = self
            .maps
            .iter()
            .rev()
            .filter(hit)
            .find(|m| Some(m.fd) == self.current)
            .or_else(|| self.maps.iter().rev().find(hit))?;
        let desc = self.descs.get(&map.fd)?;
        let idx = usize::try_from(addr - map.from + map.delta).ok()?;
        desc.data.get(idx).copied()
    }

    /// Read `len` bytes; unmapped bytes read as 0xff
    pub fn read_at(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.byte_at(addr.wrapping_add(i)).unwrap_or(0xff))
            .collect()
    }

    /// Write into the mapped descriptor bytes at `addr`
    pub fn write_at(&mut self, addr: u64, bytes: &[u8]) -> Result<usize, MemoryError> {
        let map = self
            .maps
            .iter()
            .rev()
            .find(|m| addr >= m.from && addr - m.from < m.size)
            .cloned()
            .ok_or_else(|| MemoryError::WriteFailed {
                address: addr,
                reason: "unmapped address".into(),
            })?;
        let desc = self
            .descs
            .get_mut(&map.fd)
            .ok_or(MemoryError::UnknownFd { fd: map.fd })?;
        if !desc.protection.write {
            return Err(MemoryError::WriteFailed {
                address: addr,
                reason: "descriptor is read-only".into(),
            });
        }
        let start = (addr - map.from + map.delta) as usize;
        let end = (start + bytes.len()).min(desc.data.len());
        let n = end.saturating_sub(start);
        desc.data[start..end].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_mapped_and_unmapped() {
        let mut io = Io::new();
        io.open("malloc://4", vec![1, 2, 3, 4], 0x100, MemoryProtection::RW);
        assert_eq!(io.read_at(0xfe, 4), vec![0xff, 0xff, 1, 2]);
    }

    #[test]
    fn test_current_fd_shadows() {
        let mut io = Io::new();
        let a = io.open("a", vec![0xaa; 4], 0, MemoryProtection::R);
        let b = io.open("b", vec![0xbb; 4], 0, MemoryProtection::R);
        assert_eq!(io.read_at(0, 1), vec![0xbb]);
        let prev = io.use_fd(a).unwrap();
        assert_eq!(prev, Some(b));
        assert_eq!(io.read_at(0, 1), vec![0xaa]);
        io.close(b).unwrap();
        assert_eq!(io.maps().len(), 1);
        assert!(io.use_fd(b).is_err());
    }

    #[test]
    fn test_write_at() {
        let mut io = Io::new();
        io.open("malloc://4", vec![0; 4], 0x10, MemoryProtection::RW);
        assert_eq!(io.write_at(0x12, &[9, 9, 9]).unwrap(), 2);
        assert_eq!(io.read_at(0x10, 4), vec![0, 0, 9, 9]);
    }
}
