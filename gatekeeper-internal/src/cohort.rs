const COHORT_COUNT: u16 = 10;

/// Deterministic cohort in `1..=10` for a user ordinal
pub fn cohort(ordinal: u16) -> u8 {
    // `ordinal % 10` is below 10, so the cast cannot truncate
    (ordinal % COHORT_COUNT) as u8 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohort_assignment() {
        assert_eq!(cohort(7), 8);
        assert_eq!(cohort(19), 10);
        assert_eq!(cohort(30), 1);
        assert_eq!(cohort(0), 1);
        assert_eq!(cohort(999), 10);
    }

    #[test]
    fn test_cohort_range() {
        for ordinal in 0..1000 {
            assert!((1..=10).contains(&cohort(ordinal)));
        }
    }
}
