/// piecewise-constant record of the capacity share a customer received
/// while in service, as (start, end, share) spans
#[derive(Debug, Clone, Default)]
pub struct UtilizationProfile {
    spans: Vec<(f64, f64, f64)>,
}

impl UtilizationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, start: f64, end: f64, share: f64) {
        if end > start && share > 0.0 {
            self.spans.push((start, end, share));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn spans(&self) -> &[(f64, f64, f64)] {
        &self.spans
    }

    /// total share-weighted time, i.e. the work delivered over the profile
    pub fn area(&self) -> f64 {
        self.spans.iter().map(|(s, e, share)| (e - s) * share).sum()
    }

    /// wall-clock span from first start to last end
    pub fn duration(&self) -> f64 {
        match (self.spans.first(), self.spans.last()) {
            (Some(&(start, _, _)), Some(&(_, end, _))) => end - start,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_weights_spans_by_share() {
        let mut profile = UtilizationProfile::new();
        profile.push(0.0, 2.0, 1.0);
        profile.push(2.0, 6.0, 0.5);
        assert!((profile.area() - 4.0).abs() < 1e-12);
        assert!((profile.duration() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_spans_are_dropped() {
        let mut profile = UtilizationProfile::new();
        profile.push(1.0, 1.0, 1.0);
        profile.push(2.0, 1.0, 1.0);
        profile.push(1.0, 2.0, 0.0);
        assert!(profile.is_empty());
    }
}
