use crate::value::{Object, ObjectRef, StrValue, ValueData};
use std::cell::RefCell;
use std::rc::Rc;

/// Small integers are shared the way the original server shares them: a
/// pool of read-only singleton objects built once at startup. Because we
/// model refcount as `Rc::strong_count`, the "sentinel refcount that never
/// drops to zero" from spec §3/§9 falls out for free -- `SharedObjects`
/// itself keeps one `Rc` clone alive for the lifetime of the server, so the
/// strong count can shrink back to 1 (this pool's own reference) but never
/// to 0 while the server is running.
pub struct SharedObjects {
    small_ints: Vec<ObjectRef>,
}

/// Matches the historical shared-integer pool size (0..=9999).
const SHARE_POOL_SIZE: i64 = 10_000;

impl SharedObjects {
    pub fn new(now: u64) -> SharedObjects {
        let small_ints = (0..SHARE_POOL_SIZE)
            .map(|n| {
                Rc::new(RefCell::new(Object::new(
                    ValueData::Str(StrValue::Int(n)),
                    now,
                )))
            })
            .collect();
        SharedObjects { small_ints }
    }

    /// Returns the shared object for `n` if it falls in the sharing range,
    /// sparing an allocation for the extremely common small-counter case
    /// (`INCR`, list lengths stored back as strings, etc).
    pub fn small_int(&self, n: i64) -> Option<ObjectRef> {
        if (0..SHARE_POOL_SIZE).contains(&n) {
            Some(Rc::clone(&self.small_ints[n as usize]))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_small_integers_and_nothing_else() {
        let shared = SharedObjects::new(0);
        let a = shared.small_int(5).unwrap();
        let b = shared.small_int(5).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(Rc::strong_count(&a), 3); // pool + a + b
        assert!(shared.small_int(SHARE_POOL_SIZE).is_none());
        assert!(shared.small_int(-1).is_none());
    }
}
