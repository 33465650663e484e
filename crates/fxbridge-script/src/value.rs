use std::fmt;

use crate::error::ScriptError;

/// Managed sequence of samples.
///
/// Owns its storage; nothing handed to managed code ever aliases a native
/// buffer. Callbacks may read, overwrite, grow or truncate the list freely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatList {
    items: Vec<f32>,
}

impl FloatList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity) }
    }

    pub fn from_slice(samples: &[f32]) -> Self {
        Self { items: samples.to_vec() }
    }

    /// Replace the contents with a copy of `samples`, reusing the allocation
    /// when it is large enough.
    pub fn refill_from(&mut self, samples: &[f32]) {
        self.items.clear();
        self.items.extend_from_slice(samples);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<f32, ScriptError> {
        self.items
            .get(index)
            .copied()
            .ok_or(ScriptError::IndexOutOfRange { index, len: self.items.len() })
    }

    pub fn set(&mut self, index: usize, value: f32) -> Result<(), ScriptError> {
        let len = self.items.len();
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ScriptError::IndexOutOfRange { index, len }),
        }
    }

    pub fn push(&mut self, value: f32) {
        self.items.push(value);
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f32> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, f32> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.items
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

impl From<Vec<f32>> for FloatList {
    fn from(items: Vec<f32>) -> Self {
        Self { items }
    }
}

impl From<FloatList> for Vec<f32> {
    fn from(list: FloatList) -> Self {
        list.items
    }
}

impl<'a> IntoIterator for &'a FloatList {
    type Item = &'a f32;
    type IntoIter = std::slice::Iter<'a, f32>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A frame counter passed to managed code by reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameCount(u32);

impl FrameCount {
    pub fn new(frames: u32) -> Self {
        Self(frames)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn set(&mut self, frames: u32) {
        self.0 = frames;
    }
}

impl fmt::Display for FrameCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_reuses_allocation() {
        let mut list = FloatList::with_capacity(8);
        let cap = list.capacity();
        list.refill_from(&[1.0, 2.0, 3.0]);
        assert_eq!(list.as_slice(), &[1.0, 2.0, 3.0]);
        list.refill_from(&[4.0]);
        assert_eq!(list.as_slice(), &[4.0]);
        assert_eq!(list.capacity(), cap);
    }

    #[test]
    fn out_of_range_access_raises() {
        let mut list = FloatList::from_slice(&[0.5, 0.25]);
        assert_eq!(list.get(1), Ok(0.25));
        assert_eq!(
            list.get(2),
            Err(ScriptError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert!(list.set(5, 1.0).is_err());
        list.set(0, -1.0).unwrap();
        assert_eq!(list.as_slice(), &[-1.0, 0.25]);
    }

    #[test]
    fn frame_count_is_mutable_by_reference() {
        fn shrink(count: &mut FrameCount) {
            count.set(count.get() / 2);
        }
        let mut count = FrameCount::new(512);
        shrink(&mut count);
        assert_eq!(count.get(), 256);
        assert_eq!(count.to_string(), "256");
    }
}
