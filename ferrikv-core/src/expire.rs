use crate::keyspace::Database;
use rand::seq::IteratorRandom;

/// Per-tick sample size and the "too many expired" threshold that makes the
/// cycle repeat for the same database (spec §4.6).
const SAMPLE_SIZE: usize = 100;
const REPEAT_THRESHOLD: f64 = 0.25;

/// Runs the probabilistic active-expire cycle for one database: sample up
/// to `SAMPLE_SIZE` volatile keys, delete the expired ones, and repeat for
/// this database as long as more than a quarter of the sample was expired.
/// Returns the number of keys reclaimed.
pub fn active_expire_cycle(db: &mut Database, now: u64) -> usize {
    let mut total = 0;
    let mut rng = rand::thread_rng();

    loop {
        if db.expiries.is_empty() {
            break;
        }

        let sample: Vec<Vec<u8>> = db
            .expiries
            .keys()
            .cloned()
            .choose_multiple(&mut rng, SAMPLE_SIZE);

        if sample.is_empty() {
            break;
        }

        let mut expired = 0;
        for key in &sample {
            if db.is_expired(key, now) {
                db.delete(key);
                expired += 1;
            }
        }
        total += expired;

        if (expired as f64) <= REPEAT_THRESHOLD * sample.len() as f64 {
            break;
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Entry;
    use crate::value::{Object, StrValue, ValueData};

    fn put(db: &mut Database, key: &str, expires_at: u64) {
        db.set(
            key.as_bytes().to_vec(),
            Entry::resident(Object::new(
                ValueData::Str(StrValue::Raw(b"v".to_vec())),
                0,
            )),
        );
        db.set_expiry(key.as_bytes().to_vec(), expires_at);
    }

    #[test]
    fn reclaims_all_expired_keys_eventually() {
        let mut db = Database::new();
        for i in 0..250 {
            put(&mut db, &format!("k{}", i), 10);
        }

        let reclaimed = active_expire_cycle(&mut db, 100);
        assert_eq!(reclaimed, 250);
        assert!(db.expiries.is_empty());
    }

    #[test]
    fn leaves_live_keys_alone() {
        let mut db = Database::new();
        put(&mut db, "alive", 1_000_000);

        let reclaimed = active_expire_cycle(&mut db, 100);
        assert_eq!(reclaimed, 0);
        assert_eq!(db.expiries.len(), 1);
    }
}
