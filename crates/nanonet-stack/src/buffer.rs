use crate::error::Error;

/// Growable byte queue with a hard size limit.
///
/// Data always starts at offset zero. `append` grows geometrically up to
/// the limit and fails with `OutOfMemory` instead of evicting; `consume`
/// shifts the tail down and zeroes the vacated region so stale payload
/// bytes never linger in the allocation.
#[derive(Debug, Default)]
pub struct IoBuf {
    data: Vec<u8>,
    limit: usize,
}

impl IoBuf {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Room left before the limit.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.data.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let new_len = self
            .data
            .len()
            .checked_add(bytes.len())
            .ok_or(Error::OutOfMemory)?;
        if new_len > self.limit {
            return Err(Error::OutOfMemory);
        }
        if new_len > self.data.capacity() {
            let want = new_len.max(self.data.capacity() * 2).min(self.limit);
            self.data.reserve(want - self.data.len());
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Drop up to `n` bytes from the front. Returns how many were dropped.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.data.len());
        if n == 0 {
            return 0;
        }
        let rest = self.data.len() - n;
        self.data.copy_within(n.., 0);
        self.data[rest..].fill(0);
        self.data.truncate(rest);
        n
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
        self.data.clear();
    }
}
