use std::ops::Range;

use crate::{checked_range, PatcherError, Result};

/// Size of an expanded 32 Mbit Super Metroid image.
pub const SM_ROM_CAPACITY: usize = 0x40_0000;

/// A fixed-capacity ROM image patched in place.
///
/// The capacity never changes after construction; every write is checked
/// against it and fails with [`PatcherError::OutOfBounds`] instead of
/// growing, wrapping or clipping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    /// A zero-filled image of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
        }
    }

    /// Copy `image` to the start of a zero-filled buffer of `capacity` bytes.
    pub fn from_image(image: &[u8], capacity: usize) -> Result<Self> {
        if image.len() > capacity {
            return Err(PatcherError::OutOfBounds {
                what: "ROM image",
                offset: 0,
                len: image.len(),
                capacity,
            });
        }
        let mut rom = Self::new(capacity);
        rom.data[..image.len()].copy_from_slice(image);
        Ok(rom)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Check that `len` bytes at `offset` fit without touching anything.
    pub fn check_range(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        checked_range("ROM write", offset, len, self.data.len())
    }

    pub fn read_n(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let range = checked_range("ROM read", offset, len, self.data.len())?;
        Ok(&self.data[range])
    }

    pub fn write_n(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let range = self.check_range(offset, data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<()> {
        let range = self.check_range(offset, len)?;
        self.data[range].fill(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_zero_extended() {
        let rom = Rom::from_image(&[1, 2, 3], 8).unwrap();
        assert_eq!(rom.as_bytes(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(rom.capacity(), 8);
    }

    #[test]
    fn oversized_image_is_rejected() {
        let err = Rom::from_image(&[0; 9], 8).unwrap_err();
        assert!(matches!(err, PatcherError::OutOfBounds { len: 9, capacity: 8, .. }));
    }

    #[test]
    fn write_past_end_fails_and_leaves_buffer_alone() {
        let mut rom = Rom::new(4);
        let err = rom.write_n(3, &[0xAA, 0xBB]).unwrap_err();
        assert!(matches!(err, PatcherError::OutOfBounds { offset: 3, len: 2, .. }));
        assert_eq!(rom.as_bytes(), &[0; 4]);
    }

    #[test]
    fn write_ending_exactly_at_capacity_is_allowed() {
        let mut rom = Rom::new(4);
        rom.write_n(2, &[7, 8]).unwrap();
        rom.fill(0, 2, 9).unwrap();
        assert_eq!(rom.read_n(0, 4).unwrap(), &[9, 9, 7, 8]);
    }

    #[test]
    fn empty_fill_at_capacity_is_a_no_op() {
        let mut rom = Rom::new(4);
        rom.fill(4, 0, 0xFF).unwrap();
        assert!(rom.fill(5, 0, 0xFF).is_err());
        assert_eq!(rom.into_bytes(), vec![0; 4]);
    }
}
