#![forbid(unsafe_code)]
//! Adaptive-width unsigned integer array.
//!
//! Values start out stored as `u8` and the backing storage is widened to `u16`
//! and then `u32` the first time a value does not fit. Arrays never narrow
//! again; [`PackedOffsetArray::compact`] rebuilds at the narrowest width.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
enum Repr {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

/// Fixed-length array of `u32` values stored at the narrowest width that fits.
#[derive(Clone, PartialEq, Eq)]
pub struct PackedOffsetArray {
    repr: Repr,
}

impl PackedOffsetArray {
    /// Creates a zero-filled array of `len` entries.
    pub fn new(len: usize) -> Self {
        Self {
            repr: Repr::U8(vec![0; len]),
        }
    }

    /// Builds an array from plain values, choosing the width from the largest value.
    pub fn from_values(values: &[u32]) -> Self {
        let max = values.iter().copied().max().unwrap_or(0);
        let repr = if max <= u8::MAX as u32 {
            Repr::U8(values.iter().map(|v| *v as u8).collect())
        } else if max <= u16::MAX as u32 {
            Repr::U16(values.iter().map(|v| *v as u16).collect())
        } else {
            Repr::U32(values.to_vec())
        };
        Self { repr }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::U8(v) => v.len(),
            Repr::U16(v) => v.len(),
            Repr::U32(v) => v.len(),
        }
    }

    /// Returns true if the array has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width in bytes of each stored entry.
    pub fn width(&self) -> usize {
        match &self.repr {
            Repr::U8(_) => 1,
            Repr::U16(_) => 2,
            Repr::U32(_) => 4,
        }
    }

    /// Returns the value at `index`. Panics if out of bounds, like slice indexing.
    pub fn get(&self, index: usize) -> u32 {
        match &self.repr {
            Repr::U8(v) => v[index] as u32,
            Repr::U16(v) => v[index] as u32,
            Repr::U32(v) => v[index],
        }
    }

    /// Stores `value` at `index`, widening the backing storage if needed.
    pub fn set(&mut self, index: usize, value: u32) {
        self.ensure_width(value);
        match &mut self.repr {
            Repr::U8(v) => v[index] = value as u8,
            Repr::U16(v) => v[index] = value as u16,
            Repr::U32(v) => v[index] = value,
        }
    }

    /// Adds `delta` to every entry in `from..`.
    pub fn add_from(&mut self, from: usize, delta: u32) {
        for index in from..self.len() {
            let value = self.get(index) + delta;
            self.set(index, value);
        }
    }

    /// Iterates the values in order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(move |idx| self.get(idx))
    }

    /// Copies the values out as `u32`.
    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    /// Rebuilds the array at the narrowest width for its current contents.
    pub fn compact(&self) -> Self {
        Self::from_values(&self.to_vec())
    }

    /// Approximate heap footprint in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.len() * self.width()
    }

    fn ensure_width(&mut self, value: u32) {
        let needs_widen = match &self.repr {
            Repr::U8(_) => value > u8::MAX as u32,
            Repr::U16(_) => value > u16::MAX as u32,
            Repr::U32(_) => false,
        };
        if !needs_widen {
            return;
        }
        let values = self.to_vec();
        self.repr = if value <= u16::MAX as u32 {
            Repr::U16(values.into_iter().map(|v| v as u16).collect())
        } else {
            Repr::U32(values)
        };
    }
}

impl fmt::Debug for PackedOffsetArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedOffsetArray")
            .field("width", &self.width())
            .field("values", &self.to_vec())
            .finish()
    }
}
