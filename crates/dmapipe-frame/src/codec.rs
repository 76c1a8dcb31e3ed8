use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Mux header: magic (2) + reserved (1) + cmd (1) + pad_len (1) +
/// ch_id (1) + pkt_len (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Header magic sentinel.
pub const MAGIC: u16 = 0x33FC;

/// Frame lengths are always a multiple of this transfer granularity.
pub const ALIGNMENT: usize = 4;

/// Frame commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Channel payload.
    Data = 0,
    /// The sender opened the channel.
    Open = 1,
    /// The sender closed the channel.
    Close = 2,
}

impl Command {
    /// Parse a wire command byte. Unknown values decode to `None` and
    /// are dropped by the receive path.
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Command::Data),
            1 => Some(Command::Open),
            2 => Some(Command::Close),
            _ => None,
        }
    }
}

/// Decoded mux header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub reserved: u8,
    pub cmd: u8,
    pub pad_len: u8,
    pub ch_id: u8,
    pub pkt_len: u16,
}

impl Header {
    /// Header for a data frame carrying `pkt_len` payload bytes.
    pub fn data(ch_id: u8, pkt_len: u16, pad_len: u8) -> Self {
        Self {
            reserved: 0,
            cmd: Command::Data as u8,
            pad_len,
            ch_id,
            pkt_len,
        }
    }

    /// Header-only channel open announcement.
    pub fn open(ch_id: u8) -> Self {
        Self {
            reserved: 0,
            cmd: Command::Open as u8,
            pad_len: 0,
            ch_id,
            pkt_len: 0,
        }
    }

    /// Header-only channel close announcement.
    pub fn close(ch_id: u8) -> Self {
        Self {
            reserved: 0,
            cmd: Command::Close as u8,
            pad_len: 0,
            ch_id,
            pkt_len: 0,
        }
    }

    /// The parsed command, or `None` for unknown command bytes.
    pub fn command(&self) -> Option<Command> {
        Command::from_wire(self.cmd)
    }

    /// Total on-wire frame length described by this header.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.pkt_len as usize + self.pad_len as usize
    }

    /// Fixed 8-byte wire encoding.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let magic = MAGIC.to_le_bytes();
        let pkt_len = self.pkt_len.to_le_bytes();
        [
            magic[0],
            magic[1],
            self.reserved,
            self.cmd,
            self.pad_len,
            self.ch_id,
            pkt_len[0],
            pkt_len[1],
        ]
    }
}

/// Append the encoded header to `dst`.
pub fn encode_header(header: &Header, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    dst.put_slice(&header.encode());
}

/// Decode a header from the start of `src`.
pub fn decode_header(src: &[u8]) -> Result<Header> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::Truncated { len: src.len() });
    }
    let magic = u16::from_le_bytes([src[0], src[1]]);
    if magic != MAGIC {
        return Err(FrameError::InvalidMagic { found: magic });
    }
    Ok(Header {
        reserved: src[2],
        cmd: src[3],
        pad_len: src[4],
        ch_id: src[5],
        pkt_len: u16::from_le_bytes([src[6], src[7]]),
    })
}

/// Filler bytes needed so `HEADER_SIZE + payload_len + pad` is a
/// multiple of [`ALIGNMENT`].
pub fn pad_len(payload_len: usize) -> usize {
    (ALIGNMENT - (HEADER_SIZE + payload_len) % ALIGNMENT) % ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let header = Header::data(3, 517, 3);
        let decoded = decode_header(&header.encode()).unwrap();

        assert_eq!(decoded, header);
        assert_eq!(decoded.command(), Some(Command::Data));
    }

    #[test]
    fn open_header_wire_layout() {
        // magic LE, reserved, cmd, pad_len, ch_id, pkt_len LE
        assert_eq!(
            Header::open(3).encode(),
            [0xFC, 0x33, 0x00, 0x01, 0x00, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn close_header_roundtrip() {
        let decoded = decode_header(&Header::close(7).encode()).unwrap();
        assert_eq!(decoded.command(), Some(Command::Close));
        assert_eq!(decoded.ch_id, 7);
        assert_eq!(decoded.pkt_len, 0);
        assert_eq!(decoded.pad_len, 0);
    }

    #[test]
    fn pad_keeps_frames_aligned() {
        for payload_len in 0..64 {
            let pad = pad_len(payload_len);
            assert!(pad < ALIGNMENT);
            assert_eq!((HEADER_SIZE + payload_len + pad) % ALIGNMENT, 0);
        }
    }

    #[test]
    fn frame_len_matches_pad_policy() {
        for payload_len in [0usize, 1, 2, 3, 4, 5, 1500] {
            let pad = pad_len(payload_len);
            let header = Header::data(1, payload_len as u16, pad as u8);
            assert_eq!(header.frame_len(), HEADER_SIZE + payload_len + pad);
            assert_eq!(header.frame_len() % ALIGNMENT, 0);
        }
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = Header::open(1).encode();
        bytes[0] = 0xAA;

        assert!(matches!(
            decode_header(&bytes),
            Err(FrameError::InvalidMagic { found: 0x33AA })
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            decode_header(&[0xFC, 0x33, 0x00]),
            Err(FrameError::Truncated { len: 3 })
        ));
    }

    #[test]
    fn unknown_command_survives_decode() {
        let mut bytes = Header::open(2).encode();
        bytes[3] = 9;

        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.cmd, 9);
        assert_eq!(header.command(), None);
    }

    #[test]
    fn encode_header_appends_to_buffer() {
        let mut dst = BytesMut::new();
        encode_header(&Header::open(1), &mut dst);
        encode_header(&Header::close(1), &mut dst);

        assert_eq!(dst.len(), 2 * HEADER_SIZE);
        assert_eq!(decode_header(&dst[..]).unwrap().command(), Some(Command::Open));
        assert_eq!(
            decode_header(&dst[HEADER_SIZE..]).unwrap().command(),
            Some(Command::Close)
        );
    }
}
