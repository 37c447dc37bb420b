use crate::value::Bytes;
use rand::Rng;

/// Max skiplist height (spec §3, §4.5): level ∈ [1, 32], geometric growth
/// with p = 1/4.
const MAX_LEVEL: usize = 32;
const LEVEL_PROBABILITY: f64 = 0.25;

type Link = Option<usize>;

#[derive(Clone)]
struct Node {
    score: f64,
    member: Bytes,
    forward: Vec<Link>,
    backward: Link,
}

/// A probabilistic ordered index over `(score, member)` pairs, backing
/// sorted sets (spec §4.5). Nodes live in an arena `Vec` with a free list
/// for recycled slots rather than raw pointers, so the whole structure stays
/// safe Rust while keeping the teacher's "contiguous per-node forward-
/// pointer array" shape (spec §9 design notes).
#[derive(Clone)]
pub struct SkipList {
    arena: Vec<Option<Node>>,
    free: Vec<usize>,
    head_forward: Vec<Link>,
    tail: Link,
    level: usize,
    length: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        SkipList::new()
    }
}

impl SkipList {
    pub fn new() -> SkipList {
        SkipList {
            arena: Vec::new(),
            free: Vec::new(),
            head_forward: vec![None; MAX_LEVEL],
            tail: None,
            level: 1,
            length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    fn node(&self, idx: usize) -> &Node {
        self.arena[idx].as_ref().expect("dangling skiplist slot")
    }

    #[inline]
    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.arena[idx].as_mut().expect("dangling skiplist slot")
    }

    #[inline]
    fn forward_at(&self, x: Link, level: usize) -> Link {
        match x {
            None => self.head_forward[level],
            Some(idx) => self.node(idx).forward[level],
        }
    }

    #[inline]
    fn set_forward(&mut self, x: Link, level: usize, value: Link) {
        match x {
            None => self.head_forward[level] = value,
            Some(idx) => self.node_mut(idx).forward[level] = value,
        }
    }

    #[inline]
    fn less(score_a: f64, member_a: &[u8], score_b: f64, member_b: &[u8]) -> bool {
        if score_a != score_b {
            score_a < score_b
        } else {
            member_a < member_b
        }
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen::<f64>() < LEVEL_PROBABILITY {
            level += 1;
        }
        level
    }

    /// Builds the update path: for each level, the last node whose key is
    /// strictly less than `(score, member)`.
    fn search_path(&self, score: f64, member: &[u8]) -> Vec<Link> {
        let mut update = vec![None; MAX_LEVEL];
        let mut x: Link = None;

        for i in (0..self.level).rev() {
            loop {
                match self.forward_at(x, i) {
                    Some(next_idx) => {
                        let next = self.node(next_idx);
                        if Self::less(next.score, &next.member, score, member) {
                            x = Some(next_idx);
                            continue;
                        }
                        break;
                    }
                    None => break,
                }
            }
            update[i] = x;
        }

        update
    }

    /// Inserts `(score, member)`. Caller is responsible for deleting any
    /// prior entry for `member` first -- the skiplist has no concept of
    /// member identity, only `(score, member)` keys (spec §4.5 ZADD: update
    /// is implemented as delete+insert).
    pub fn insert(&mut self, score: f64, member: Bytes) {
        let update = self.search_path(score, &member);
        let new_level = self.random_level();

        if new_level > self.level {
            self.level = new_level;
        }

        let idx = match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = Some(Node {
                    score,
                    member,
                    forward: vec![None; new_level],
                    backward: None,
                });
                idx
            }
            None => {
                self.arena.push(Some(Node {
                    score,
                    member,
                    forward: vec![None; new_level],
                    backward: None,
                }));
                self.arena.len() - 1
            }
        };

        for i in 0..new_level {
            let succ = self.forward_at(update[i], i);
            self.set_forward(update[i], i, Some(idx));
            self.node_mut(idx).forward[i] = succ;
        }

        let backward = update[0];
        self.node_mut(idx).backward = backward;

        match self.node(idx).forward[0] {
            Some(next_idx) => self.node_mut(next_idx).backward = Some(idx),
            None => self.tail = Some(idx),
        }

        self.length += 1;
    }

    /// Deletes the node matching `(score, member)` exactly. Returns `true`
    /// if a node was removed.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> bool {
        let update = self.search_path(score, member);
        let candidate = self.forward_at(update[0], 0);

        let idx = match candidate {
            Some(idx) if self.node(idx).score == score && self.node(idx).member == member => idx,
            _ => return false,
        };

        let node_level = self.node(idx).forward.len();

        for i in 0..node_level {
            let succ = self.node(idx).forward[i];
            self.set_forward(update[i], i, succ);
        }

        match self.node(idx).forward[0] {
            Some(next_idx) => self.node_mut(next_idx).backward = self.node(idx).backward,
            None => self.tail = self.node(idx).backward,
        }

        // Shrink the list level if the top levels are now empty.
        while self.level > 1 && self.head_forward[self.level - 1].is_none() {
            self.level -= 1;
        }

        self.arena[idx] = None;
        self.free.push(idx);
        self.length -= 1;
        true
    }

    /// In-order (ascending `(score, member)`) iterator over the level-1
    /// chain, used for full scans, RDB dumps and the §8 ordering property.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &[u8])> {
        let mut cursor = self.head_forward[0];
        std::iter::from_fn(move || match cursor {
            Some(idx) => {
                let node = self.node(idx);
                cursor = node.forward[0];
                Some((node.score, node.member.as_slice()))
            }
            None => None,
        })
    }

    /// First node with `score >= min`, located in O(log N) by searching for
    /// the key `(min, "")` -- the empty member sorts before every real
    /// member at the same score, so this lands exactly on the first
    /// occurrence of `min` (spec §4.5).
    fn first_at_or_above(&self, min: f64) -> Link {
        let update = self.search_path(min, &[]);
        self.forward_at(update[0], 0)
    }

    /// Range by score with optional offset/limit (spec §4.5, §6 ZRANGEBYSCORE).
    pub fn range_by_score(
        &self,
        min: f64,
        max: f64,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<(f64, Bytes)> {
        let mut out = Vec::new();
        let mut cursor = self.first_at_or_above(min);
        let mut skipped = 0;

        while let Some(idx) = cursor {
            let node = self.node(idx);
            if node.score > max {
                break;
            }
            if skipped < offset {
                skipped += 1;
            } else {
                out.push((node.score, node.member.clone()));
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            cursor = node.forward[0];
        }

        out
    }

    /// Index range with Redis-style negative offsets counting from the back
    /// (spec §4.5 "Rank/index range converts negative bounds from the back").
    pub fn range_by_rank(&self, start: i64, stop: i64) -> Vec<(f64, Bytes)> {
        let len = self.length as i64;
        if len == 0 {
            return Vec::new();
        }

        let norm = |idx: i64| -> i64 {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx
            }
        };

        let start = norm(start).min(len - 1).max(0);
        let stop = norm(stop).min(len - 1);

        if start > stop {
            return Vec::new();
        }

        self.iter()
            .enumerate()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(_, (score, member))| (score, member.to_vec()))
            .collect()
    }

    /// 0-based rank of `member` (ascending order), or `None` if absent.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        self.iter().position(|(s, m)| s == score && m == member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_walk_is_non_decreasing() {
        let mut list = SkipList::new();
        list.insert(2.0, b"y".to_vec());
        list.insert(1.0, b"x".to_vec());
        list.insert(1.0, b"a".to_vec());
        list.insert(3.0, b"z".to_vec());

        let collected: Vec<_> = list.iter().map(|(s, m)| (s, m.to_vec())).collect();
        assert_eq!(
            collected,
            vec![
                (1.0, b"a".to_vec()),
                (1.0, b"x".to_vec()),
                (2.0, b"y".to_vec()),
                (3.0, b"z".to_vec()),
            ]
        );
        assert_eq!(list.len(), 4);
        assert!(list.level() <= 32);
    }

    #[test]
    fn delete_removes_exact_match_only() {
        let mut list = SkipList::new();
        list.insert(1.0, b"a".to_vec());
        list.insert(1.0, b"b".to_vec());

        assert!(!list.delete(2.0, b"a"));
        assert!(list.delete(1.0, b"a"));
        assert_eq!(list.len(), 1);
        let remaining: Vec<_> = list.iter().map(|(s, m)| (s, m.to_vec())).collect();
        assert_eq!(remaining, vec![(1.0, b"b".to_vec())]);
    }

    #[test]
    fn range_by_score_respects_offset_and_limit() {
        let mut list = SkipList::new();
        for (score, member) in [(1.0, "a"), (2.0, "b"), (2.0, "c"), (3.0, "d")] {
            list.insert(score, member.as_bytes().to_vec());
        }

        let range = list.range_by_score(2.0, 3.0, 1, Some(1));
        assert_eq!(range, vec![(3.0, b"d".to_vec())]);
    }

    #[test]
    fn range_by_rank_handles_negative_bounds() {
        let mut list = SkipList::new();
        for (score, member) in [(1.0, "a"), (2.0, "b"), (3.0, "c")] {
            list.insert(score, member.as_bytes().to_vec());
        }

        let range = list.range_by_rank(0, -1);
        assert_eq!(
            range,
            vec![(1.0, b"a".to_vec()), (2.0, b"b".to_vec()), (3.0, b"c".to_vec())]
        );

        let last_two = list.range_by_rank(-2, -1);
        assert_eq!(last_two, vec![(2.0, b"b".to_vec()), (3.0, b"c".to_vec())]);
    }

    #[test]
    fn level_shrinks_back_down_after_deletes() {
        let mut list = SkipList::new();
        for i in 0..200 {
            list.insert(i as f64, format!("m{}", i).into_bytes());
        }
        for i in 0..200 {
            list.delete(i as f64, format!("m{}", i).into_bytes().as_slice());
        }
        assert_eq!(list.len(), 0);
        assert_eq!(list.level(), 1);
    }
}
