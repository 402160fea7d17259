use crossterm::style::Color;

const LEVELS: usize = 256;

/// 256-step false-color ramp: black, blue, purple, orange, yellow, white.
pub struct Palette {
    colors: [(u8, u8, u8); LEVELS],
}

impl Palette {
    /// The ironbow ramp common on thermal cameras.
    pub fn ironbow() -> Self {
        let mut colors = [(0u8, 0u8, 0u8); LEVELS];
        for (i, color) in colors.iter_mut().enumerate() {
            let step = (i % 64) as u8 * 4;
            *color = match i {
                0..=63 => (0, 0, step),
                64..=127 => (step, 0, 255),
                128..=191 => (255, step, 255 - step),
                _ => (255, 255, step),
            };
        }
        Self { colors }
    }

    /// Ramp index for `value` clamped to `[min, max]`. NaN maps to the coldest color.
    pub fn index_for(value: f32, min: f32, max: f32) -> usize {
        if value.is_nan() || max <= min {
            return 0;
        }
        let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
        (t * (LEVELS - 1) as f32).round() as usize
    }

    pub fn rgb(&self, index: usize) -> (u8, u8, u8) {
        self.colors[index.min(LEVELS - 1)]
    }

    pub fn color_for(&self, value: f32, min: f32, max: f32) -> Color {
        let (r, g, b) = self.rgb(Self::index_for(value, min, max));
        Color::Rgb { r, g, b }
    }
}
