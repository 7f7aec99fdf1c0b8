//! Bit-per-resource allocator over caller-supplied storage
//!
//! Bit set = used. Allocation is first-fit over the lowest contiguous run.

use crate::error::{MemError, MemResult};

pub struct Bitmap<'a> {
    bits: &'a mut [u8],
    length: usize,
}

impl<'a> Bitmap<'a> {
    /// Bind `storage` for `length` bits and mark them all free
    ///
    /// `length` is clamped to what the storage can hold.
    pub fn new(storage: &'a mut [u8], length: usize) -> Self {
        debug_assert!(length <= storage.len() * 8, "bitmap storage too small for {} bits", length);
        let length = length.min(storage.len() * 8);

        for byte in storage.iter_mut() {
            *byte = 0;
        }

        Bitmap { bits: storage, length }
    }

    /// Number of bits managed
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Is bit `index` used?
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        index < self.length && (self.bits[index / 8] & (1u8 << (index % 8))) != 0
    }

    #[inline]
    fn set(&mut self, index: usize, used: bool) {
        let byte = &mut self.bits[index / 8];
        if used {
            *byte |= 1u8 << (index % 8);
        } else {
            *byte &= !(1u8 << (index % 8));
        }
    }

    /// Allocate `count` contiguous bits
    ///
    /// Returns the index of the first bit, or None (bitmap unchanged).
    pub fn allocate(&mut self, count: usize) -> Option<usize> {
        if count == 0 || count > self.length {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;

        for index in 0..self.length {
            if self.get(index) {
                run_len = 0;
                continue;
            }

            if run_len == 0 {
                run_start = index;
            }
            run_len += 1;

            if run_len == count {
                for i in run_start..run_start + count {
                    self.set(i, true);
                }
                return Some(run_start);
            }
        }

        None
    }

    /// Are all bits in `[index, index + count)` used?
    pub fn is_range_used(&self, index: usize, count: usize) -> bool {
        match index.checked_add(count) {
            Some(end) if end <= self.length => (index..end).all(|i| self.get(i)),
            _ => false,
        }
    }

    /// Free `count` bits starting at `index`
    ///
    /// Rejects the whole request if any bit in the range is not in use.
    pub fn release(&mut self, index: usize, count: usize) -> MemResult<()> {
        if !self.is_range_used(index, count) {
            return Err(MemError::NotAllocated { address: index as u32 });
        }

        for i in index..index + count {
            self.set(i, false);
        }
        Ok(())
    }

    /// Number of used bits
    pub fn used(&self) -> usize {
        (0..self.length).filter(|&i| self.get(i)).count()
    }

    /// Lowest used bit, if any
    pub fn first_used(&self) -> Option<usize> {
        (0..self.length).find(|&i| self.get(i))
    }
}
