use crate::history::HistorySample;

/// A declarative guard over a watched word's current value and bounded
/// history (spec.md §3). Implemented as a tagged variant rather than a
/// trait object: the construction sites (the static table in `profile`)
/// stay purely declarative and there is no virtual dispatch in the monitor's
/// hot poll loop (spec.md §9).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    Eq(u32),
    NZ,
    OneOf(Vec<u32>),
    RecentEq { value: u32, window_ms: u64 },
}

impl Predicate {
    pub fn check(&self, current: u32, history: &[HistorySample], now_ms: u64) -> bool {
        match self {
            Predicate::Eq(v) => current == *v,
            Predicate::NZ => current != 0,
            Predicate::OneOf(set) => set.contains(&current),
            Predicate::RecentEq { value, window_ms } => history.iter().any(|sample| {
                now_ms.saturating_sub(sample.at_ms) <= *window_ms && sample.value == *value
            }),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Predicate::Eq(v) => format!("==0x{v:08X}"),
            Predicate::NZ => "!=0".to_string(),
            Predicate::OneOf(set) => {
                let mut sorted = set.clone();
                sorted.sort_unstable();
                let items: Vec<String> = sorted.iter().map(|v| format!("0x{v:08X}")).collect();
                format!("oneof{{{}}}", items.join(","))
            }
            Predicate::RecentEq { value, window_ms } => {
                format!("recent==0x{value:08X} in {window_ms}ms")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(entries: &[(u64, u32)]) -> Vec<HistorySample> {
        entries
            .iter()
            .map(|&(at_ms, value)| HistorySample { at_ms, value })
            .collect()
    }

    #[test]
    fn eq_matches_only_exact_value() {
        let p = Predicate::Eq(7);
        assert!(p.check(7, &[], 0));
        assert!(!p.check(8, &[], 0));
    }

    #[test]
    fn nz_rejects_only_zero() {
        assert!(!Predicate::NZ.check(0, &[], 0));
        assert!(Predicate::NZ.check(1, &[], 0));
    }

    #[test]
    fn one_of_checks_set_membership() {
        let p = Predicate::OneOf(vec![1, 2, 3]);
        assert!(p.check(2, &[], 0));
        assert!(!p.check(4, &[], 0));
    }

    #[test]
    fn recent_eq_true_iff_some_history_sample_in_window() {
        let p = Predicate::RecentEq {
            value: 5,
            window_ms: 1000,
        };
        assert!(p.check(0, &hist(&[(500, 5)]), 1000));
        assert!(!p.check(0, &hist(&[(0, 5)]), 2000));
        assert!(!p.check(0, &hist(&[(500, 6)]), 1000));
    }
}
