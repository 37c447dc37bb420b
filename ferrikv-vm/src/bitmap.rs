use rand::Rng;

/// How far a dense region can push the rotating cursor forward before
/// giving up on the current pass (spec §4.12: "if the local region is
/// dense, jump forward by a bounded random amount and retry").
const MAX_JUMP: usize = 256;

/// Tracks free/used pages of the swap file with a single bit per page and
/// a rotating allocation cursor, the way the teacher's pooled-chunk
/// allocators (`chunk.rs`/`chunkpool.rs`) recycle fixed-size slots rather
/// than doing a linear scan from zero every time.
pub struct PageBitmap {
    bits: Vec<bool>,
    cursor: usize,
}

impl PageBitmap {
    pub fn new(page_count: usize) -> PageBitmap {
        PageBitmap {
            bits: vec![false; page_count],
            cursor: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.bits.len()
    }

    pub fn used_count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    fn is_free_run(&self, start: usize, count: usize) -> bool {
        start + count <= self.bits.len() && self.bits[start..start + count].iter().all(|&used| !used)
    }

    /// Finds `count` contiguous free pages starting from the rotating
    /// cursor; when the local region is dense, jumps forward by a bounded
    /// random amount and retries, giving up after one full pass over the
    /// bitmap (spec §4.12).
    pub fn allocate(&mut self, count: usize) -> Option<usize> {
        if count == 0 || count > self.bits.len() {
            return None;
        }

        let mut rng = rand::thread_rng();
        let total = self.bits.len();
        let mut tried = 0usize;
        let mut position = self.cursor % total;

        while tried < total {
            if self.is_free_run(position, count) {
                for bit in self.bits[position..position + count].iter_mut() {
                    *bit = true;
                }
                self.cursor = (position + count) % total;
                return Some(position);
            }

            let jump = 1 + rng.gen_range(0..MAX_JUMP.min(total));
            tried += jump;
            position = (position + jump) % total;
        }

        None
    }

    pub fn free(&mut self, start: usize, count: usize) {
        for bit in self.bits[start..(start + count).min(self.bits.len())].iter_mut() {
            *bit = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_frees_contiguous_pages() {
        let mut bitmap = PageBitmap::new(16);
        let at = bitmap.allocate(4).unwrap();
        assert!(bitmap.is_free_run(0, 0)); // sanity: empty run trivially free
        assert_eq!(bitmap.used_count(), 4);
        bitmap.free(at, 4);
        assert_eq!(bitmap.used_count(), 0);
    }

    #[test]
    fn refuses_to_allocate_more_than_total_pages() {
        let mut bitmap = PageBitmap::new(4);
        assert!(bitmap.allocate(5).is_none());
    }

    #[test]
    fn fails_once_fully_packed() {
        let mut bitmap = PageBitmap::new(8);
        bitmap.allocate(8).unwrap();
        assert!(bitmap.allocate(1).is_none());
    }

    #[test]
    fn finds_free_run_after_fragmentation() {
        let mut bitmap = PageBitmap::new(8);
        let a = bitmap.allocate(4).unwrap();
        bitmap.allocate(4).unwrap();
        bitmap.free(a, 4);
        assert!(bitmap.allocate(4).is_some());
    }
}
