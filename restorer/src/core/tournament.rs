//! Single-elimination pairwise tournament over candidate images.
//!
//! O(n) comparisons rather than a full ranking, and intentionally
//! order-dependent: the first-seen candidate wins ties. The candidate set is
//! bounded by toolbox size, so determinism under a fixed seed matters more
//! than global optimality.

use anyhow::{Result, anyhow};

use crate::core::types::Preference;

/// Run a sequential tournament: the first candidate starts as champion; each
/// contender replaces it only when the comparator prefers the latter.
///
/// `compare` receives `(champion, contender)` in that order.
pub fn pick_best<T, F>(candidates: &[T], mut compare: F) -> Result<T>
where
    T: Copy,
    F: FnMut(T, T) -> Result<Preference>,
{
    let mut iter = candidates.iter().copied();
    let mut champion = iter
        .next()
        .ok_or_else(|| anyhow!("tournament requires at least one candidate"))?;
    for contender in iter {
        match compare(champion, contender)? {
            Preference::Latter => champion = contender,
            Preference::Former | Preference::Neither => {}
        }
    }
    Ok(champion)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A comparator that always reports "former" must keep the first
    /// candidate as champion.
    #[test]
    fn always_former_returns_first() {
        let winner = pick_best(&[1, 2, 3], |_, _| Ok(Preference::Former)).expect("winner");
        assert_eq!(winner, 1);
    }

    /// A comparator that always reports "latter" must crown the last.
    #[test]
    fn always_latter_returns_last() {
        let winner = pick_best(&[1, 2, 3], |_, _| Ok(Preference::Latter)).expect("winner");
        assert_eq!(winner, 3);
    }

    /// "Neither" keeps the incumbent champion (first-seen wins ties).
    #[test]
    fn neither_keeps_champion() {
        let winner = pick_best(&[7, 8], |_, _| Ok(Preference::Neither)).expect("winner");
        assert_eq!(winner, 7);
    }

    #[test]
    fn empty_candidate_set_is_an_error() {
        let err = pick_best::<u32, _>(&[], |_, _| Ok(Preference::Former)).unwrap_err();
        assert!(err.to_string().contains("at least one candidate"));
    }

    #[test]
    fn comparator_errors_propagate() {
        let err = pick_best(&[1, 2], |_, _| Err(anyhow!("judge unavailable"))).unwrap_err();
        assert!(err.to_string().contains("judge unavailable"));
    }
}
