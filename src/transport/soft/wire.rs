//! Data-plane frames.
//!
//! All integers are little-endian.
//!
//! ```text
//! WRITE: 0x01 | rkey: u32 | remote_offset: u64 | len: u32 | payload[len]
//! ACK:   0x02 | status: u8
//! ```

use std::io::{self, Read, Write};

use crate::transport::WcStatus;

const TAG_WRITE: u8 = 0x01;
const TAG_ACK: u8 = 0x02;

/// Largest payload one WRITE frame may carry.
pub(crate) const MAX_WRITE_LEN: usize = u32::MAX as usize;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    Write {
        rkey: u32,
        remote_offset: u64,
        payload: Vec<u8>,
    },
    Ack {
        status: WcStatus,
    },
}

impl Frame {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Frame::Write {
                rkey,
                remote_offset,
                payload,
            } => {
                let len = u32::try_from(payload.len())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too long"))?;
                w.write_all(&[TAG_WRITE])?;
                w.write_all(&rkey.to_le_bytes())?;
                w.write_all(&remote_offset.to_le_bytes())?;
                w.write_all(&len.to_le_bytes())?;
                w.write_all(payload)
            }
            Frame::Ack { status } => w.write_all(&[TAG_ACK, *status as u8]),
        }
    }

    /// Read one frame. `Ok(None)` means the peer closed the stream cleanly
    /// between two frames.
    ///
    /// A WRITE carrying more than `max_len` bytes is refused with
    /// `InvalidData` before its payload is read.
    pub fn read_from<R: Read>(r: &mut R, max_len: usize) -> io::Result<Option<Frame>> {
        let mut tag = [0u8; 1];
        match r.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Self::read_from(r, max_len),
            Err(e) => return Err(e),
        }

        match tag[0] {
            TAG_WRITE => {
                let mut hdr = [0u8; 16];
                r.read_exact(&mut hdr)?;
                let rkey = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
                let mut offset = [0u8; 8];
                offset.copy_from_slice(&hdr[4..12]);
                let len = u32::from_le_bytes([hdr[12], hdr[13], hdr[14], hdr[15]]) as usize;
                if len > max_len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("WRITE of {} B exceeds the {} B region", len, max_len),
                    ));
                }

                let mut payload = vec![0u8; len];
                r.read_exact(&mut payload)?;
                Ok(Some(Frame::Write {
                    rkey,
                    remote_offset: u64::from_le_bytes(offset),
                    payload,
                }))
            }
            TAG_ACK => {
                let mut status = [0u8; 1];
                r.read_exact(&mut status)?;
                Ok(Some(Frame::Ack {
                    status: WcStatus::from(status[0]),
                }))
            }
            t => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown frame tag {:#04x}", t),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_frame_layout() {
        let frame = Frame::Write {
            rkey: 0x0403_0201,
            remote_offset: 8,
            payload: vec![0xAA, 0xBB],
        };
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        assert_eq!(
            buf,
            [
                0x01, 0x01, 0x02, 0x03, 0x04, 8, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0xBB
            ]
        );
        assert_eq!(
            Frame::read_from(&mut Cursor::new(buf), 64).unwrap(),
            Some(frame)
        );
    }

    #[test]
    fn test_stream_of_frames() {
        let mut buf = Vec::new();
        Frame::Ack {
            status: WcStatus::Success,
        }
        .write_to(&mut buf)
        .unwrap();
        Frame::Ack {
            status: WcStatus::RemAccessErr,
        }
        .write_to(&mut buf)
        .unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(
            Frame::read_from(&mut r, 64).unwrap(),
            Some(Frame::Ack {
                status: WcStatus::Success
            })
        );
        assert_eq!(
            Frame::read_from(&mut r, 64).unwrap(),
            Some(Frame::Ack {
                status: WcStatus::RemAccessErr
            })
        );
        assert_eq!(Frame::read_from(&mut r, 64).unwrap(), None);
    }

    #[test]
    fn test_truncated_and_unknown() {
        let mut r = Cursor::new(vec![TAG_WRITE, 1, 2]);
        assert_eq!(
            Frame::read_from(&mut r, 64).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
        let mut r = Cursor::new(vec![0x7f]);
        assert_eq!(
            Frame::read_from(&mut r, 64).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_oversized_write_refused() {
        let mut buf = vec![TAG_WRITE];
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = Frame::read_from(&mut Cursor::new(buf), 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // Exactly the region size is fine.
        let frame = Frame::Write {
            rkey: 7,
            remote_offset: 0,
            payload: vec![1; 16],
        };
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        assert_eq!(
            Frame::read_from(&mut Cursor::new(buf.clone()), 16).unwrap(),
            Some(frame)
        );
        assert!(Frame::read_from(&mut Cursor::new(buf), 15).is_err());
    }
}
