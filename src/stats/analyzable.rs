use super::statistic::Statistic;

/// a statistic under sequential output analysis: it knows its target
/// precision, whether its current observation chunk (replication or batch)
/// is complete, and how its warm-up phase went. engines poll this surface
/// for global termination.
pub trait Analyzable: Statistic {
    fn target_relative_precision(&self) -> f64;

    fn target_precision_reached(&self) -> bool {
        self.relative_precision() <= self.target_relative_precision()
    }

    fn max_num_observations(&self) -> usize;

    /// whether the warm-up phase is over for this statistic
    fn steady_state_entered(&self) -> bool;

    /// warm-up length in observations
    fn transient_phase_length(&self) -> usize;

    fn steady_state_enter_time(&self) -> f64;

    fn set_steady_state_enter_time(&self, time: f64);

    /// whether the current chunk (replication or batch) is finished
    fn observation_complete(&self) -> bool;

    fn initialize_for_experiment(&self) {}

    fn finalize_for_experiment(&self) {}

    /// re-inspect detectors whose state may flip without a new observation
    /// (e.g. duration-based ones watching the clock)
    fn refresh(&self) {}
}

/// renders an analyzable statistic like `Summary`, with `([[INCOMPLETE]])`
/// and `([[DISABLED]])` suffixes when applicable
pub struct Report<'a>(pub &'a dyn Analyzable);

impl std::fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stat = self.0;
        write!(
            f,
            "{} ± {} — C.I. ({}, {}) at {}% (r.e. {}% — sample size: {}){}{}",
            stat.estimate(),
            stat.standard_deviation(),
            stat.estimate() - stat.half_width(),
            stat.estimate() + stat.half_width(),
            stat.confidence_level() * 100.0,
            stat.relative_precision() * 100.0,
            stat.num_observations(),
            if stat.observation_complete() {
                ""
            } else {
                " ([[INCOMPLETE]])"
            },
            if stat.enabled() { "" } else { " ([[DISABLED]])" },
        )
    }
}
