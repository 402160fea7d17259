/// A change larger than this is followed quickly.
const FAST_STEP_THRESHOLD: f32 = 0.5;
const FAST_GAIN: f32 = 0.6;
const SLOW_GAIN: f32 = 0.1;

/// Smooths the displayed hotspot temperature.
///
/// Large jumps (aiming from a wall to a forehead) are followed at 60% per
/// reading; small jitter is damped to 10% per reading so the number stays
/// readable.
#[derive(Debug, Default)]
pub struct MaxSmoother {
    displayed: Option<f32>,
}

impl MaxSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fresh hotspot reading and return the value to show.
    pub fn update(&mut self, raw: f32) -> f32 {
        if raw.is_nan() {
            return self.displayed.unwrap_or(raw);
        }
        let next = match self.displayed {
            None => raw,
            Some(shown) => {
                let diff = raw - shown;
                let gain = if diff.abs() > FAST_STEP_THRESHOLD {
                    FAST_GAIN
                } else {
                    SLOW_GAIN
                };
                shown + diff * gain
            }
        };
        self.displayed = Some(next);
        next
    }

    pub fn displayed(&self) -> Option<f32> {
        self.displayed
    }
}
