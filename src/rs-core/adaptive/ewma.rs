/// Exponentially-weighted moving average.
///
/// Each sample has a weight (here, the duration of the request it comes
/// from, in seconds) and older samples lose half of their importance every
/// `half_life` seconds of newer samples.
#[derive(Clone, Debug)]
pub(super) struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    pub(super) fn new(half_life: f64) -> Self {
        Self {
            alpha: f64::exp(0.5f64.ln() / half_life),
            last_estimate: 0.,
            total_weight: 0.,
        }
    }

    pub(super) fn add_sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight);
        self.last_estimate = value * (1. - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight;
    }

    /// Current average, corrected for the bias towards the initial `0`.
    ///
    /// Returns `0.` if no sample has been added yet.
    pub(super) fn estimate(&self) -> f64 {
        if self.total_weight == 0. {
            return 0.;
        }
        let zero_factor = 1. - self.alpha.powf(self.total_weight);
        self.last_estimate / zero_factor
    }
}
