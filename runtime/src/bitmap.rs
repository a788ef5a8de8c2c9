// Licensed under the Apache-2.0 license

//! Fixed-size received-fragment bitmap, one bit per fragment.

/// Largest image, in data fragments, a session may announce.
pub const MAX_DATA_FRAGMENTS: usize = 4608;
/// Largest number of parity fragments a session may announce.
pub const MAX_REDUNDANCY: usize = 512;
pub const MAX_FRAGMENTS: usize = MAX_DATA_FRAGMENTS + MAX_REDUNDANCY;

const WORDS: usize = MAX_FRAGMENTS.div_ceil(32);

#[derive(Clone, PartialEq, Eq)]
pub struct FragmentBitmap {
    words: [u32; WORDS],
    len: usize,
    count: usize,
}

impl core::fmt::Debug for FragmentBitmap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FragmentBitmap({}/{})", self.count, self.len)
    }
}

impl FragmentBitmap {
    /// An empty bitmap tracking `len` positions, clamped to `MAX_FRAGMENTS`.
    pub fn new(len: usize) -> Self {
        FragmentBitmap {
            words: [0; WORDS],
            len: core::cmp::min(len, MAX_FRAGMENTS),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of positions set.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, position: usize) -> bool {
        position < self.len && self.words[position / 32] & (1 << (position % 32)) != 0
    }

    /// Sets `position`. Returns `false` if it was already set or is out of
    /// range.
    pub fn set(&mut self, position: usize) -> bool {
        if position >= self.len || self.get(position) {
            return false;
        }
        self.words[position / 32] |= 1 << (position % 32);
        self.count += 1;
        true
    }

    /// Number of set positions in `start..end`.
    pub fn count_range(&self, start: usize, end: usize) -> usize {
        (start..core::cmp::min(end, self.len))
            .filter(|&p| self.get(p))
            .count()
    }

    /// Unset positions in `start..end`, ascending.
    pub fn missing(&self, start: usize, end: usize) -> impl Iterator<Item = usize> + '_ {
        (start..core::cmp::min(end, self.len)).filter(move |&p| !self.get(p))
    }

    /// Set positions in `start..end`, ascending.
    pub fn present(&self, start: usize, end: usize) -> impl Iterator<Item = usize> + '_ {
        (start..core::cmp::min(end, self.len)).filter(move |&p| self.get(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut bitmap = FragmentBitmap::new(100);
        assert!(bitmap.set(0));
        assert!(bitmap.set(33));
        assert!(bitmap.set(99));
        assert!(!bitmap.set(33));
        assert!(!bitmap.set(100));
        assert_eq!(bitmap.count(), 3);
        assert_eq!(bitmap.count_range(1, 99), 1);
        assert_eq!(bitmap.present(0, 100).collect::<Vec<_>>(), vec![0, 33, 99]);
        assert_eq!(bitmap.missing(30, 35).collect::<Vec<_>>(), vec![30, 31, 32, 34]);
    }

    #[test]
    fn test_capacity_covers_largest_session() {
        let mut bitmap = FragmentBitmap::new(MAX_FRAGMENTS + 10);
        assert_eq!(bitmap.len(), MAX_FRAGMENTS);
        assert!(bitmap.set(MAX_FRAGMENTS - 1));
        // 1 bit per fragment.
        assert_eq!(core::mem::size_of::<[u32; WORDS]>() * 8, MAX_FRAGMENTS);
    }
}
