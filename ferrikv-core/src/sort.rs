use crate::value::Bytes;
use std::cmp::Ordering;
use std::fmt;

/// Errors surfaced to clients as an error reply (spec §4.14).
#[derive(Debug)]
pub enum SortError {
    NotDouble(Bytes),
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::NotDouble(_) => {
                write!(f, "One or more scores can't be converted into double")
            }
        }
    }
}

impl std::error::Error for SortError {}

/// Parsed `SORT` modifiers (spec §4.14: `ASC`/`DESC`, `ALPHA`, `LIMIT offset
/// count`, `BY pattern`, `GET pattern` [repeatable], `STORE destination`).
#[derive(Debug, Default)]
pub struct SortOptions {
    pub desc: bool,
    pub alpha: bool,
    pub limit: Option<(i64, i64)>,
    pub by: Option<Bytes>,
    pub get: Vec<Bytes>,
    pub store: Option<Bytes>,
}

/// Replaces the first `*` in `pattern` with `element`. Patterns without a
/// `*` are returned unchanged, matching the "pattern with no wildcard names
/// a fixed key" convention used by `BY`/`GET`.
fn substitute(pattern: &[u8], element: &[u8]) -> Bytes {
    match pattern.iter().position(|&b| b == b'*') {
        Some(at) => {
            let mut out = Vec::with_capacity(pattern.len() - 1 + element.len());
            out.extend_from_slice(&pattern[..at]);
            out.extend_from_slice(element);
            out.extend_from_slice(&pattern[at + 1..]);
            out
        }
        None => pattern.to_vec(),
    }
}

/// `true` if a `BY` pattern has no wildcard, which disables sorting entirely
/// and just returns elements in their natural (already-fetched) order.
fn is_nosort(pattern: &[u8]) -> bool {
    !pattern.contains(&b'*')
}

/// Sorts `elements` per `options`, resolving `BY` weights and `GET` patterns
/// through `lookup` (a STRING-keyed getter over the active keyspace; `#`
/// alone means "the element itself" rather than an external key).
///
/// Returns one output row per surviving element; each `GET` pattern
/// contributes one slot (or the element itself if `GET` is empty), so a
/// caller with two `GET` patterns gets back `2 * len` entries in sequence,
/// matching the flat multi-bulk reply shape.
pub fn sort<F>(mut elements: Vec<Bytes>, options: &SortOptions, lookup: F) -> Result<Vec<Option<Bytes>>, SortError>
where
    F: Fn(&[u8]) -> Option<Bytes>,
{
    let skip_sort = options
        .by
        .as_ref()
        .map(|pattern| is_nosort(pattern))
        .unwrap_or(false);

    if !skip_sort {
        if options.alpha {
            elements.sort_by(|a, b| compare_alpha(&weight_bytes(a, &options.by, &lookup), &weight_bytes(b, &options.by, &lookup)));
        } else {
            let mut weighed = Vec::with_capacity(elements.len());
            for elem in elements {
                let raw = weight_bytes(&elem, &options.by, &lookup);
                let parsed = parse_double(&raw).ok_or_else(|| SortError::NotDouble(raw))?;
                weighed.push((parsed, elem));
            }
            weighed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            elements = weighed.into_iter().map(|(_, e)| e).collect();
        }

        if options.desc {
            elements.reverse();
        }
    }

    let elements = apply_limit(elements, options.limit);

    let mut out = Vec::new();
    if options.get.is_empty() {
        for elem in elements {
            out.push(Some(elem));
        }
    } else {
        for elem in elements {
            for pattern in &options.get {
                if pattern.as_slice() == b"#" {
                    out.push(Some(elem.clone()));
                } else {
                    out.push(lookup(&substitute(pattern, &elem)));
                }
            }
        }
    }
    Ok(out)
}

fn weight_bytes<F: Fn(&[u8]) -> Option<Bytes>>(elem: &[u8], by: &Option<Bytes>, lookup: &F) -> Bytes {
    match by {
        Some(pattern) => lookup(&substitute(pattern, elem)).unwrap_or_default(),
        None => elem.to_vec(),
    }
}

fn parse_double(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.trim().parse::<f64>().ok()
}

fn compare_alpha(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// `LIMIT offset count` with redis-style negative/overflowing bounds
/// clamping, `count < 0` meaning "to the end".
fn apply_limit(elements: Vec<Bytes>, limit: Option<(i64, i64)>) -> Vec<Bytes> {
    let (offset, count) = match limit {
        Some(pair) => pair,
        None => return elements,
    };
    let len = elements.len() as i64;
    let start = offset.clamp(0, len) as usize;
    let end = if count < 0 {
        elements.len()
    } else {
        (offset + count).clamp(0, len) as usize
    };
    if start >= end {
        Vec::new()
    } else {
        elements[start..end].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(map: &HashMap<&'static str, &'static str>) -> impl Fn(&[u8]) -> Option<Bytes> + '_ {
        move |key: &[u8]| {
            let key = std::str::from_utf8(key).ok()?;
            map.get(key).map(|v| v.as_bytes().to_vec())
        }
    }

    #[test]
    fn sorts_numerically_by_default() {
        let elements = vec![b"30".to_vec(), b"5".to_vec(), b"100".to_vec()];
        let result = sort(elements, &SortOptions::default(), |_| None).unwrap();
        assert_eq!(result, vec![Some(b"5".to_vec()), Some(b"30".to_vec()), Some(b"100".to_vec())]);
    }

    #[test]
    fn alpha_sorts_lexicographically() {
        let elements = vec![b"banana".to_vec(), b"apple".to_vec()];
        let options = SortOptions { alpha: true, ..Default::default() };
        let result = sort(elements, &options, |_| None).unwrap();
        assert_eq!(result, vec![Some(b"apple".to_vec()), Some(b"banana".to_vec())]);
    }

    #[test]
    fn non_numeric_without_alpha_errors() {
        let elements = vec![b"not-a-number".to_vec()];
        let err = sort(elements, &SortOptions::default(), |_| None).unwrap_err();
        assert!(matches!(err, SortError::NotDouble(_)));
    }

    #[test]
    fn desc_reverses_order() {
        let elements = vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()];
        let options = SortOptions { desc: true, ..Default::default() };
        let result = sort(elements, &options, |_| None).unwrap();
        assert_eq!(result, vec![Some(b"3".to_vec()), Some(b"2".to_vec()), Some(b"1".to_vec())]);
    }

    #[test]
    fn by_pattern_sorts_using_external_weight() {
        let mut weights = HashMap::new();
        weights.insert("weight_a", "9");
        weights.insert("weight_b", "1");
        let elements = vec![b"a".to_vec(), b"b".to_vec()];
        let options = SortOptions { by: Some(b"weight_*".to_vec()), ..Default::default() };
        let result = sort(elements, &options, lookup_from(&weights)).unwrap();
        assert_eq!(result, vec![Some(b"b".to_vec()), Some(b"a".to_vec())]);
    }

    #[test]
    fn by_pattern_without_wildcard_disables_sorting() {
        let elements = vec![b"z".to_vec(), b"a".to_vec(), b"m".to_vec()];
        let options = SortOptions { by: Some(b"nosort".to_vec()), ..Default::default() };
        let result = sort(elements, &options, |_| None).unwrap();
        assert_eq!(result, vec![Some(b"z".to_vec()), Some(b"a".to_vec()), Some(b"m".to_vec())]);
    }

    #[test]
    fn get_hash_pattern_fetches_and_get_pound_returns_element() {
        let mut data = HashMap::new();
        data.insert("data_1", "one");
        let elements = vec![b"1".to_vec()];
        let options = SortOptions {
            get: vec![b"#".to_vec(), b"data_*".to_vec()],
            ..Default::default()
        };
        let result = sort(elements, &options, lookup_from(&data)).unwrap();
        assert_eq!(result, vec![Some(b"1".to_vec()), Some(b"one".to_vec())]);
    }

    #[test]
    fn limit_applies_after_sort() {
        let elements = vec![b"5".to_vec(), b"1".to_vec(), b"3".to_vec(), b"2".to_vec(), b"4".to_vec()];
        let options = SortOptions { limit: Some((1, 2)), ..Default::default() };
        let result = sort(elements, &options, |_| None).unwrap();
        assert_eq!(result, vec![Some(b"2".to_vec()), Some(b"3".to_vec())]);
    }
}
