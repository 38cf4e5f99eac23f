use embedded_graphics::pixelcolor::Rgb565;

use crate::render::palette;

/// Air quality band of a CO2 concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Safe,
    Good,
    Caution,
    Elevated,
    Alert,
}

const SAFE_BELOW: f32 = 600.0;
const GOOD_BELOW: f32 = 800.0;
const CAUTION_BELOW: f32 = 1000.0;
const ELEVATED_BELOW: f32 = 1400.0;

impl Severity {
    pub fn of_ppm(ppm: i32) -> Self {
        Self::of(ppm as f32)
    }

    pub fn of(ppm: f32) -> Self {
        if ppm < SAFE_BELOW {
            Self::Safe
        } else if ppm < GOOD_BELOW {
            Self::Good
        } else if ppm < CAUTION_BELOW {
            Self::Caution
        } else if ppm < ELEVATED_BELOW {
            Self::Elevated
        } else {
            Self::Alert
        }
    }

    pub fn color(self) -> Rgb565 {
        match self {
            Self::Safe => palette::CYAN,
            Self::Good => palette::GREEN,
            Self::Caution => palette::YELLOW,
            Self::Elevated => palette::ORANGE,
            Self::Alert => palette::RED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_are_exact() {
        let cases = [
            (599, Severity::Safe),
            (600, Severity::Good),
            (799, Severity::Good),
            (800, Severity::Caution),
            (999, Severity::Caution),
            (1000, Severity::Elevated),
            (1399, Severity::Elevated),
            (1400, Severity::Alert),
        ];

        for (ppm, expected) in cases {
            assert_eq!(Severity::of_ppm(ppm), expected, "ppm {ppm}");
        }
    }

    #[test]
    fn fractional_graph_values_use_the_same_bands() {
        assert_eq!(Severity::of(599.9), Severity::Safe);
        assert_eq!(Severity::of(1399.5), Severity::Elevated);
        assert_eq!(Severity::Alert.color(), palette::RED);
    }
}
