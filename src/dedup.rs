//! One record tree per key, chosen by folding a pairwise tie-break.
//!
//! The fold may run in any order and over any partitioning of the input, so
//! the tie-break must be associative and commutative. That is a caller
//! precondition and is not checked; a tie-break violating it yields results
//! that depend on input order.

use crate::cdx::CdxRecord;
use crate::tree::RecordTree;

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Width of a full CDX timestamp.
const TIMESTAMP_DIGITS: usize = 14;

/// Deduplicate a collection. Output is ordered by key.
pub fn dedup<K, KF, TB>(trees: impl IntoIterator<Item = RecordTree>, key: KF, tie_break: TB) -> Vec<RecordTree>
where
    K: Ord,
    KF: Fn(&CdxRecord) -> K,
    TB: Fn(RecordTree, RecordTree) -> RecordTree,
{
    reduce(trees, &key, &tie_break).into_values().collect()
}

/// Deduplicate partition by partition, then merge the partial winners,
/// the way a distributed reduce-by-key would.
pub fn dedup_partitions<K, KF, TB>(partitions: Vec<Vec<RecordTree>>, key: KF, tie_break: TB) -> Vec<RecordTree>
where
    K: Ord,
    KF: Fn(&CdxRecord) -> K,
    TB: Fn(RecordTree, RecordTree) -> RecordTree,
{
    let mut merged: BTreeMap<K, RecordTree> = BTreeMap::new();
    for partition in partitions {
        for (k, tree) in reduce(partition, &key, &tie_break) {
            fold_into(&mut merged, k, tree, &tie_break);
        }
    }
    merged.into_values().collect()
}

fn reduce<K, KF, TB>(trees: impl IntoIterator<Item = RecordTree>, key: &KF, tie_break: &TB) -> BTreeMap<K, RecordTree>
where
    K: Ord,
    KF: Fn(&CdxRecord) -> K,
    TB: Fn(RecordTree, RecordTree) -> RecordTree,
{
    let mut best = BTreeMap::new();
    for tree in trees {
        let k = key(tree.original());
        fold_into(&mut best, k, tree, tie_break);
    }
    best
}

fn fold_into<K, TB>(best: &mut BTreeMap<K, RecordTree>, k: K, tree: RecordTree, tie_break: &TB)
where
    K: Ord,
    TB: Fn(RecordTree, RecordTree) -> RecordTree,
{
    let winner = match best.remove(&k) {
        Some(prev) => tie_break(prev, tree),
        None => tree,
    };
    best.insert(k, winner);
}

/// Key: payload digest, falling back to the canonical URL when missing.
pub fn digest_key(record: &CdxRecord) -> String {
    record
        .digest
        .clone()
        .unwrap_or_else(|| record.surt_url.clone())
}

/// Key: canonical (SURT) URL.
pub fn url_key(record: &CdxRecord) -> String {
    record.surt_url.clone()
}

/// Earlier capture wins. Remaining ties are broken on the other metadata
/// columns so the choice does not depend on argument order.
pub fn earliest_timestamp(a: RecordTree, b: RecordTree) -> RecordTree {
    match compare_captures(a.original(), b.original()) {
        Ordering::Greater => b,
        _ => a,
    }
}

fn compare_captures(a: &CdxRecord, b: &CdxRecord) -> Ordering {
    fn padded(ts: &str) -> String {
        format!("{:0<width$}", ts, width = TIMESTAMP_DIGITS)
    }
    padded(&a.timestamp)
        .cmp(&padded(&b.timestamp))
        .then_with(|| a.surt_url.cmp(&b.surt_url))
        .then_with(|| a.original_url.cmp(&b.original_url))
        .then_with(|| a.digest.cmp(&b.digest))
        .then_with(|| {
            let loc = |r: &CdxRecord| r.locator.as_ref().map(|l| (l.filename.clone(), l.offset));
            loc(a).cmp(&loc(b))
        })
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.to_cdx_line().cmp(&b.to_cdx_line()))
}
