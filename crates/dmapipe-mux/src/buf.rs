use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use dmapipe_frame::{ALIGNMENT, HEADER_SIZE};

/// Worst-case padding for the transport's alignment.
const PAD_RESERVE: usize = ALIGNMENT - 1;

/// A byte buffer with explicit headroom and tailroom.
///
/// The TX pipeline prefixes the mux header into headroom and appends
/// alignment padding into tailroom; when either is missing the payload
/// is copied into an expanded buffer instead of reallocating in place.
pub struct PacketBuf {
    storage: BytesMut,
    head: usize,
    /// Logical capacity; `tailroom` is measured against this rather than
    /// whatever the allocator actually handed out.
    limit: usize,
}

impl PacketBuf {
    /// Payload buffer with default headroom for one header and tailroom
    /// for worst-case padding.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self::with_layout(HEADER_SIZE, payload, PAD_RESERVE)
    }

    /// Payload buffer with explicit headroom and tailroom.
    pub fn with_layout(headroom: usize, payload: &[u8], tailroom: usize) -> Self {
        let limit = headroom + payload.len() + tailroom;
        let mut storage = BytesMut::with_capacity(limit);
        storage.put_bytes(0, headroom);
        storage.put_slice(payload);
        Self {
            storage,
            head: headroom,
            limit,
        }
    }

    /// Current content length (headroom excluded).
    pub fn len(&self) -> usize {
        self.storage.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes available in front of the content for prefixing.
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Bytes available past the content before the buffer would grow.
    pub fn tailroom(&self) -> usize {
        self.limit - self.storage.len()
    }

    /// Copy the content into a new buffer with at least `headroom` and
    /// `tailroom` around it.
    pub fn copy_expand(&self, headroom: usize, tailroom: usize) -> Self {
        Self::with_layout(headroom, self.as_slice(), tailroom)
    }

    /// Append `n` zero filler bytes.
    ///
    /// Exceeding `tailroom()` grows the buffer; the TX pipeline checks
    /// first and takes the copy-expand path instead.
    pub fn put_padding(&mut self, n: usize) {
        self.storage.put_bytes(0, n);
        if self.storage.len() > self.limit {
            self.limit = self.storage.len();
        }
    }

    /// Prefix `data` into headroom. Returns `false` when headroom is
    /// too short, leaving the buffer unchanged.
    pub fn prepend(&mut self, data: &[u8]) -> bool {
        if data.len() > self.head {
            return false;
        }
        self.head -= data.len();
        let end = self.head + data.len();
        self.storage[self.head..end].copy_from_slice(data);
        true
    }

    /// View of the current content.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.head..]
    }

    /// Freeze into immutable bytes for DMA mapping.
    pub fn freeze(self) -> Bytes {
        let head = self.head;
        self.storage.freeze().slice(head..)
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_reserves_header_and_pad_room() {
        let buf = PacketBuf::from_payload(b"hello");

        assert_eq!(buf.len(), 5);
        assert_eq!(buf.headroom(), HEADER_SIZE);
        assert_eq!(buf.tailroom(), PAD_RESERVE);
        assert_eq!(buf.as_slice(), b"hello");
    }

    #[test]
    fn explicit_layout_controls_tailroom() {
        let buf = PacketBuf::with_layout(HEADER_SIZE, b"12345", 1);
        assert_eq!(buf.tailroom(), 1);
    }

    #[test]
    fn prepend_consumes_headroom() {
        let mut buf = PacketBuf::with_layout(4, b"data", 0);

        assert!(buf.prepend(b"hd"));
        assert_eq!(buf.headroom(), 2);
        assert_eq!(buf.as_slice(), b"hddata");
    }

    #[test]
    fn prepend_fails_without_headroom() {
        let mut buf = PacketBuf::with_layout(2, b"data", 0);

        assert!(!buf.prepend(b"too long"));
        assert_eq!(buf.as_slice(), b"data");
        assert_eq!(buf.headroom(), 2);
    }

    #[test]
    fn padding_fills_zeroes() {
        let mut buf = PacketBuf::with_layout(0, b"ab", 2);
        buf.put_padding(2);

        assert_eq!(buf.as_slice(), b"ab\0\0");
        assert_eq!(buf.tailroom(), 0);
    }

    #[test]
    fn copy_expand_preserves_content() {
        let buf = PacketBuf::with_layout(0, b"payload", 0);
        let expanded = buf.copy_expand(HEADER_SIZE, 3);

        assert_eq!(expanded.as_slice(), b"payload");
        assert_eq!(expanded.headroom(), HEADER_SIZE);
        assert_eq!(expanded.tailroom(), 3);
    }

    #[test]
    fn freeze_drops_headroom() {
        let mut buf = PacketBuf::with_layout(4, b"xy", 2);
        assert!(buf.prepend(b"z"));
        buf.put_padding(1);

        assert_eq!(buf.freeze().as_ref(), b"zxy\0");
    }
}
