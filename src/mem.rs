use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::transport::{SgDescriptor, TransportError, ELEMENT_SIZE};

/// Source of access keys. Keys only need to differ between regions of one
/// process.
static NEXT_KEY: AtomicU32 = AtomicU32::new(0x5eed_0001);

/// An owned memory area exposed to the peer as the payload region.
///
/// The memory area is allocated on the heap with `Box<[u8]>`, zeroed, and
/// deallocated when this structure is dropped. The `rkey` must accompany
/// every remote access to the area.
pub struct RegisteredMem {
    buf: Box<[u8]>,
    rkey: u32,
}

impl RegisteredMem {
    /// Allocate zeroed memory with the given length.
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0u8; len].into_boxed_slice(),
            rkey: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Get the remote access key.
    #[inline]
    pub fn rkey(&self) -> u32 {
        self.rkey
    }

    /// Sub-slicing. Return `None` if the range is out of bounds.
    #[inline]
    pub fn get_slice(&self, r: Range<usize>) -> Option<&[u8]> {
        self.buf.get(r)
    }

    /// Copy `bytes` into the region at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), TransportError> {
        let region = self.buf.len();
        let dst = offset
            .checked_add(bytes.len())
            .and_then(|end| self.buf.get_mut(offset..end))
            .ok_or(TransportError::OutOfBounds {
                offset,
                len: bytes.len(),
                region,
            })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Arm the span the descriptor covers with the sequence `0, 1, 2, ..`
    /// of native-endian `u32` elements, so the peer can check what landed.
    ///
    /// Bytes outside the span are left untouched.
    pub fn fill_sequential(&mut self, sg: &SgDescriptor) -> Result<(), TransportError> {
        if sg.len == 0 || sg.len % ELEMENT_SIZE != 0 {
            return Err(TransportError::BadLength(sg.len));
        }
        let region = self.buf.len();
        let span = sg
            .local_offset
            .checked_add(sg.len)
            .and_then(|end| self.buf.get_mut(sg.local_offset..end))
            .ok_or(TransportError::OutOfBounds {
                offset: sg.local_offset,
                len: sg.len,
                region,
            })?;
        for (i, elem) in span.chunks_exact_mut(ELEMENT_SIZE).enumerate() {
            elem.copy_from_slice(&(i as u32).to_ne_bytes());
        }
        Ok(())
    }

    /// Read back the `i`-th element of the region.
    #[inline]
    pub fn element(&self, i: usize) -> Option<u32> {
        let bytes = self.get_slice(i * ELEMENT_SIZE..(i + 1) * ELEMENT_SIZE)?;
        let mut word = [0u8; ELEMENT_SIZE];
        word.copy_from_slice(bytes);
        Some(u32::from_ne_bytes(word))
    }
}

impl Deref for RegisteredMem {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.buf.as_ref()
    }
}

impl DerefMut for RegisteredMem {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_touches_only_span() {
        let mut mem = RegisteredMem::new(256);
        mem.iter_mut().for_each(|b| *b = 0xAB);

        mem.fill_sequential(&SgDescriptor::new(64)).unwrap();
        for i in 0..16 {
            assert_eq!(mem.element(i), Some(i as u32));
        }
        assert!(mem[64..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_fill_rejects_bad_span() {
        let mut mem = RegisteredMem::new(64);
        assert!(matches!(
            mem.fill_sequential(&SgDescriptor::new(128)),
            Err(TransportError::OutOfBounds { region: 64, .. })
        ));
        assert!(matches!(
            mem.fill_sequential(&SgDescriptor::new(10)),
            Err(TransportError::BadLength(10))
        ));
        assert!(mem.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fill_at_offset() {
        let mut mem = RegisteredMem::new(64);
        let sg = SgDescriptor {
            local_offset: 16,
            remote_offset: 0,
            len: 32,
        };
        mem.fill_sequential(&sg).unwrap();
        assert!(mem[..16].iter().all(|&b| b == 0));
        assert_eq!(mem.element(4), Some(0));
        assert_eq!(mem.element(11), Some(7));
        assert!(mem[48..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_at_bounds() {
        let mut mem = RegisteredMem::new(8);
        mem.write_at(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&mem[4..], &[1, 2, 3, 4]);
        assert!(mem.write_at(6, &[0; 4]).is_err());
        assert!(mem.write_at(usize::MAX, &[0; 1]).is_err());
    }

    #[test]
    fn test_distinct_keys() {
        assert_ne!(RegisteredMem::new(4).rkey(), RegisteredMem::new(4).rkey());
    }
}
