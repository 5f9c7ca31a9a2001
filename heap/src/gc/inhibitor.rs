use std::cell::Cell;

/// While any inhibitor is alive no collection starts: the lite sweep returns at once and
/// allocation never triggers one. Inhibitors nest.
#[must_use = "collection is only inhibited while the guard is alive"]
pub struct GcInhibitor<'a> {
    count: &'a Cell<usize>,
}

impl<'a> GcInhibitor<'a> {
    pub(crate) fn new(count: &'a Cell<usize>) -> Self {
        count.set(count.get() + 1);
        Self { count }
    }
}

impl Drop for GcInhibitor<'_> {
    fn drop(&mut self) {
        self.count.set(self.count.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting() {
        let count = Cell::new(0);
        {
            let _outer = GcInhibitor::new(&count);
            {
                let _inner = GcInhibitor::new(&count);
                assert_eq!(count.get(), 2);
            }
            assert_eq!(count.get(), 1);
        }
        assert_eq!(count.get(), 0);
    }
}
