use ferrikv_core::{Bytes, Entry, Keyspace, Storage};
use rand::seq::IteratorRandom;

/// Per-database and total sampling caps from spec §4.12.
const PER_DB_SAMPLE: usize = 5;
const MAX_TOTAL_TRIES: usize = 100;

/// A key nominated for swap-out, along with its computed score (spec
/// §4.12: "score = idle-seconds × log(1 + estimated-bytes)").
pub struct Candidate {
    pub db: usize,
    pub key: Bytes,
    pub score: f64,
}

fn score(idle_secs: u64, estimated_bytes: usize) -> f64 {
    idle_secs as f64 * (1.0 + estimated_bytes as f64).ln()
}

/// Samples up to `PER_DB_SAMPLE` memory-resident keys per database (capped
/// at `MAX_TOTAL_TRIES` keys examined overall) and returns the
/// highest-scoring one, or `None` if nothing is resident anywhere.
pub fn pick_swap_out_candidate(keyspace: &Keyspace, now: u64) -> Option<Candidate> {
    let mut rng = rand::thread_rng();
    let mut tried = 0usize;
    let mut best: Option<Candidate> = None;

    for (db_index, db) in keyspace.iter() {
        if tried >= MAX_TOTAL_TRIES {
            break;
        }

        let resident_keys = db.entries.iter().filter(|(_, entry)| {
            matches!(entry, Entry::Resident(obj) if obj.borrow().storage == Storage::Memory)
        });

        let remaining_budget = MAX_TOTAL_TRIES - tried;
        let sample_size = PER_DB_SAMPLE.min(remaining_budget);
        let sample: Vec<(Bytes, f64)> = resident_keys
            .choose_multiple(&mut rng, sample_size)
            .into_iter()
            .map(|(key, entry)| {
                let obj = entry.as_resident().expect("filtered to resident above");
                let object = obj.borrow();
                let idle = now.saturating_sub(object.last_access);
                (key.clone(), score(idle, object.estimated_bytes()))
            })
            .collect();

        tried += sample.len();

        for (key, candidate_score) in sample {
            let is_better = best.as_ref().map(|b| candidate_score > b.score).unwrap_or(true);
            if is_better {
                best = Some(Candidate {
                    db: db_index,
                    key,
                    score: candidate_score,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrikv_core::{Object, StrValue, ValueData};

    fn put(keyspace: &mut Keyspace, db: usize, key: &str, bytes: usize, last_access: u64) {
        keyspace.db_mut(db).set(
            key.as_bytes().to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(vec![0u8; bytes])), last_access)),
        );
    }

    #[test]
    fn picks_the_idlest_largest_key() {
        let mut keyspace = Keyspace::new(1);
        put(&mut keyspace, 0, "fresh", 10, 99);
        put(&mut keyspace, 0, "stale", 10_000, 0);

        let candidate = pick_swap_out_candidate(&keyspace, 100).unwrap();
        assert_eq!(candidate.key, b"stale".to_vec());
    }

    #[test]
    fn returns_none_when_keyspace_is_empty() {
        let keyspace = Keyspace::new(1);
        assert!(pick_swap_out_candidate(&keyspace, 100).is_none());
    }

    #[test]
    fn ignores_already_swapping_keys() {
        let mut keyspace = Keyspace::new(1);
        put(&mut keyspace, 0, "k", 100, 0);
        if let Entry::Resident(obj) = keyspace.db(0).entries.get(b"k".as_slice()).unwrap() {
            obj.borrow_mut().storage = ferrikv_core::Storage::Swapping;
        }
        assert!(pick_swap_out_candidate(&keyspace, 100).is_none());
    }
}
