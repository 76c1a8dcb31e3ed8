use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::DmaAddr;

/// Default maximum number of concurrent mappings.
pub const DEFAULT_CAPACITY: usize = 1024;

const BASE_ADDR: DmaAddr = 0x1000_0000;
const ADDR_STRIDE: DmaAddr = 0x1000;

enum Mapping {
    /// Device-readable buffer owned by the arena until unmapped.
    Outbound(Bytes),
    /// Device-writable buffer, zero-filled at map time.
    Inbound(BytesMut),
}

/// Mapping table standing in for streaming DMA.
///
/// `map_*` hands out a bus address and takes ownership of the buffer;
/// `unmap` returns ownership to the caller. The transport reads and
/// writes mapped buffers by address while moving transfers.
pub struct DmaArena {
    capacity: usize,
    next: AtomicU64,
    table: Mutex<HashMap<DmaAddr, Mapping>>,
}

impl DmaArena {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            next: AtomicU64::new(BASE_ADDR),
            table: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DmaAddr, Mapping>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map a buffer for device reads (local memory to peer).
    pub fn map_outbound(&self, frame: Bytes) -> Result<DmaAddr> {
        self.insert(Mapping::Outbound(frame))
    }

    /// Map a zero-filled buffer of `len` bytes for device writes.
    pub fn map_inbound(&self, len: usize) -> Result<DmaAddr> {
        let mut buf = BytesMut::with_capacity(len);
        buf.resize(len, 0);
        self.insert(Mapping::Inbound(buf))
    }

    fn insert(&self, mapping: Mapping) -> Result<DmaAddr> {
        let mut table = self.lock();
        if table.len() >= self.capacity {
            return Err(TransportError::MapExhausted {
                capacity: self.capacity,
            });
        }
        let addr = self.next.fetch_add(ADDR_STRIDE, Ordering::Relaxed);
        table.insert(addr, mapping);
        Ok(addr)
    }

    /// Remove the mapping at `addr` and return the buffer.
    pub fn unmap(&self, addr: DmaAddr) -> Result<Bytes> {
        match self.lock().remove(&addr) {
            Some(Mapping::Outbound(frame)) => Ok(frame),
            Some(Mapping::Inbound(buf)) => Ok(buf.freeze()),
            None => Err(TransportError::InvalidAddress(addr)),
        }
    }

    /// Read up to `len` bytes from the mapping at `addr`.
    pub fn read(&self, addr: DmaAddr, len: usize) -> Result<Bytes> {
        match self.lock().get(&addr) {
            Some(Mapping::Outbound(frame)) => Ok(frame.slice(..len.min(frame.len()))),
            Some(Mapping::Inbound(buf)) => Ok(Bytes::copy_from_slice(&buf[..len.min(buf.len())])),
            None => Err(TransportError::InvalidAddress(addr)),
        }
    }

    /// Copy `data` into the inbound mapping at `addr`.
    ///
    /// Returns the number of bytes written, truncated to the buffer size.
    pub fn write(&self, addr: DmaAddr, data: &[u8]) -> Result<usize> {
        match self.lock().get_mut(&addr) {
            Some(Mapping::Inbound(buf)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Mapping::Outbound(_)) => Err(TransportError::InvalidAddress(addr)),
            None => Err(TransportError::InvalidAddress(addr)),
        }
    }

    /// Number of live mappings.
    pub fn mapped(&self) -> usize {
        self.lock().len()
    }
}

impl Default for DmaArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_roundtrip() {
        let arena = DmaArena::new();
        let addr = arena.map_outbound(Bytes::from_static(b"abcd")).unwrap();

        assert_eq!(arena.mapped(), 1);
        assert_eq!(arena.read(addr, 4).unwrap().as_ref(), b"abcd");
        assert_eq!(arena.unmap(addr).unwrap().as_ref(), b"abcd");
        assert_eq!(arena.mapped(), 0);
    }

    #[test]
    fn inbound_starts_zeroed_and_accepts_writes() {
        let arena = DmaArena::new();
        let addr = arena.map_inbound(8).unwrap();

        assert_eq!(arena.read(addr, 8).unwrap().as_ref(), &[0u8; 8]);

        let written = arena.write(addr, b"xy").unwrap();
        assert_eq!(written, 2);

        let buf = arena.unmap(addr).unwrap();
        assert_eq!(&buf[..2], b"xy");
        assert_eq!(&buf[2..], &[0u8; 6]);
    }

    #[test]
    fn write_truncates_to_buffer_size() {
        let arena = DmaArena::new();
        let addr = arena.map_inbound(4).unwrap();

        let written = arena.write(addr, b"longer than four").unwrap();
        assert_eq!(written, 4);
    }

    #[test]
    fn write_to_outbound_rejected() {
        let arena = DmaArena::new();
        let addr = arena.map_outbound(Bytes::from_static(b"ro")).unwrap();

        assert!(matches!(
            arena.write(addr, b"x"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn unmap_unknown_address() {
        let arena = DmaArena::new();
        assert!(matches!(
            arena.unmap(0xdead),
            Err(TransportError::InvalidAddress(0xdead))
        ));
    }

    #[test]
    fn capacity_exhaustion() {
        let arena = DmaArena::with_capacity(2);
        arena.map_inbound(4).unwrap();
        arena.map_inbound(4).unwrap();

        assert!(matches!(
            arena.map_inbound(4),
            Err(TransportError::MapExhausted { capacity: 2 })
        ));
    }

    #[test]
    fn addresses_are_unique() {
        let arena = DmaArena::new();
        let a = arena.map_inbound(4).unwrap();
        let b = arena.map_inbound(4).unwrap();
        assert_ne!(a, b);
    }
}
