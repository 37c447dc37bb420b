use crate::keyspace::Keyspace;
use rand::seq::IteratorRandom;

/// Number of volatile keys sampled per reclaim attempt (spec §4.7: "sample
/// three keys with TTLs").
const SAMPLE_SIZE: usize = 3;

/// Sums the estimated size of every resident value across every database.
/// Recomputed on demand rather than incrementally tracked through every
/// mutating handler -- a deliberate simplification recorded in DESIGN.md,
/// acceptable because it only needs to be monotonic and roughly accurate
/// for the reclaim loop to converge, not byte-exact.
pub fn used_memory(keyspace: &Keyspace) -> usize {
    keyspace
        .iter()
        .map(|(_, db)| {
            db.entries
                .values()
                .map(|entry| match entry {
                    crate::keyspace::Entry::Resident(obj) => obj.borrow().estimated_bytes(),
                    crate::keyspace::Entry::Swapped(_) => 0,
                })
                .sum::<usize>()
        })
        .sum()
}

/// Attempts to bring `used_memory(keyspace)` back under `cap` by evicting
/// volatile keys closest to expiry, sampling across all databases each
/// round (spec §4.7). Returns `true` if the keyspace ended up at or under
/// the cap (whether or not anything was evicted).
pub fn reclaim(keyspace: &mut Keyspace, cap: usize) -> bool {
    if cap == 0 {
        return true;
    }

    let mut rng = rand::thread_rng();

    loop {
        if used_memory(keyspace) <= cap {
            return true;
        }

        let mut candidate: Option<(usize, Vec<u8>, u64)> = None;
        let mut pool: Vec<(usize, Vec<u8>, u64)> = Vec::new();

        for (db_index, db) in keyspace.iter() {
            for (key, &at) in &db.expiries {
                pool.push((db_index, key.clone(), at));
            }
        }

        let sample = pool.into_iter().choose_multiple(&mut rng, SAMPLE_SIZE);
        if sample.is_empty() {
            // No volatile keys left anywhere: DENYOOM commands will now be
            // rejected by the dispatcher instead.
            return false;
        }

        for entry in sample {
            candidate = match candidate {
                Some((_, _, best_at)) if entry.2 >= best_at => candidate,
                _ => Some(entry),
            };
        }

        if let Some((db_index, key, _)) = candidate {
            keyspace.db_mut(db_index).delete(&key);
        } else {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Entry;
    use crate::value::{Object, StrValue, ValueData};

    fn put(keyspace: &mut Keyspace, db: usize, key: &str, bytes: usize, ttl: Option<u64>) {
        keyspace.db_mut(db).set(
            key.as_bytes().to_vec(),
            Entry::resident(Object::new(
                ValueData::Str(StrValue::Raw(vec![0u8; bytes])),
                0,
            )),
        );
        if let Some(at) = ttl {
            keyspace.db_mut(db).set_expiry(key.as_bytes().to_vec(), at);
        }
    }

    #[test]
    fn reclaims_volatile_keys_until_under_cap() {
        let mut keyspace = Keyspace::new(1);
        for i in 0..10 {
            put(&mut keyspace, 0, &format!("v{}", i), 100, Some(i as u64));
        }

        assert!(reclaim(&mut keyspace, 500));
        assert!(used_memory(&keyspace) <= 500);
    }

    #[test]
    fn gives_up_once_no_volatile_keys_remain() {
        let mut keyspace = Keyspace::new(1);
        put(&mut keyspace, 0, "persistent", 10_000, None);

        assert!(!reclaim(&mut keyspace, 1));
    }

    #[test]
    fn zero_cap_means_no_enforcement() {
        let mut keyspace = Keyspace::new(1);
        put(&mut keyspace, 0, "k", 100, None);
        assert!(reclaim(&mut keyspace, 0));
    }
}
