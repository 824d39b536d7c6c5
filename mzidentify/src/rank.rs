//! Stable "top-K by key" ranking shared by every stage that ranks candidates.
//!
//! All rankings in this crate are descending and stable: items with equal keys
//! keep the order in which the source produced them, so the first one seen wins.

/// Sort `items` by `key` in descending order, preserving the source order of ties.
pub fn rank_descending_by<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    // `sort_by` is a stable merge sort
    items.sort_by(|a, b| key(b).total_cmp(&key(a)));
    items
}

/// Take the `k` highest ranked items from `items` according to `key`.
///
/// Ties are broken by source order, see [`rank_descending_by`].
pub fn top_k_by<T, I, F>(items: I, k: usize, key: F) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> f64,
{
    let mut ranked = rank_descending_by(items.into_iter().collect(), key);
    ranked.truncate(k);
    ranked
}

/// Find the position of the first maximal item, or `None` if `items` is empty.
pub fn first_max_by<T, F>(items: &[T], key: F) -> Option<usize>
where
    F: Fn(&T) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, item) in items.iter().enumerate() {
        let k = key(item);
        match best {
            Some((_, best_k)) if k <= best_k => {}
            _ => best = Some((i, k)),
        }
    }
    best.map(|(i, _)| i)
}
