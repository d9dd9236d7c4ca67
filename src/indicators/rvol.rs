// =============================================================================
// Relative Volume (RVOL)
// =============================================================================
//
// RVOL compares the most recent closed bar's volume against the mean of the
// `period` closed bars before it. A value of 2.0 means the bar printed twice
// its recent average volume.
// =============================================================================

/// Compute RVOL from a closed-bar volume history (oldest first).
///
/// The last entry is the current bar; the mean is taken over the `period`
/// entries preceding it. Returns `None` when `period` is zero, fewer than
/// `period + 1` entries exist, or the baseline mean is not positive.
pub fn calculate_rvol(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period + 1 {
        return None;
    }

    let current = *volumes.last()?;
    let baseline = &volumes[volumes.len() - 1 - period..volumes.len() - 1];
    let mean = baseline.iter().sum::<f64>() / period as f64;

    if !mean.is_finite() || mean <= 0.0 || !current.is_finite() {
        return None;
    }
    Some(current / mean)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_is_none() {
        let volumes = vec![100.0; 5];
        assert!(calculate_rvol(&volumes, 5).is_none());
        assert!(calculate_rvol(&volumes, 0).is_none());
    }

    #[test]
    fn exact_minimum_history() {
        // period=5 needs 6 entries.
        let volumes = vec![100.0, 100.0, 100.0, 100.0, 100.0, 200.0];
        let rvol = calculate_rvol(&volumes, 5).unwrap();
        assert!((rvol - 2.0).abs() < 1e-12);
    }

    #[test]
    fn baseline_excludes_current_bar() {
        // Mean of the 3 entries before the last: (100+200+300)/3 = 200.
        let volumes = vec![999.0, 100.0, 200.0, 300.0, 400.0];
        let rvol = calculate_rvol(&volumes, 3).unwrap();
        assert!((rvol - 2.0).abs() < 1e-12);
    }

    #[test]
    fn quiet_bar_scores_below_one() {
        let volumes = vec![100.0, 100.0, 100.0, 50.0];
        let rvol = calculate_rvol(&volumes, 3).unwrap();
        assert!((rvol - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_baseline_is_none() {
        let volumes = vec![0.0, 0.0, 0.0, 100.0];
        assert!(calculate_rvol(&volumes, 3).is_none());
    }
}
