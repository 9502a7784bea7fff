/// Endless u32 sequence starting at 0 and wrapping around
pub(crate) struct U32Iter {
    num: u32,
}

impl Iterator for U32Iter {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        self.num = self.num.wrapping_add(1);
        Some(self.num)
    }
}

impl Default for U32Iter {
    fn default() -> Self {
        Self { num: u32::MAX }
    }
}

impl U32Iter {
    /// the next number `in_use` does not reject, `None` once every value was tried
    pub fn next_free<F>(&mut self, in_use: F) -> Option<u32>
    where
        F: Fn(u32) -> bool,
    {
        let start = self.num;
        loop {
            let n = self.next()?;
            if !in_use(n) {
                return Some(n);
            }
            if n == start {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_and_skips_used() {
        let mut ids = U32Iter::default();
        assert_eq!(ids.next(), Some(0));
        assert_eq!(ids.next_free(|n| n == 1 || n == 2), Some(3));
    }

    #[test]
    fn wraps() {
        let mut ids = U32Iter { num: u32::MAX - 1 };
        assert_eq!(ids.next(), Some(u32::MAX));
        assert_eq!(ids.next(), Some(0));
    }
}
