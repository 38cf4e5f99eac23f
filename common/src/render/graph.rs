use embedded_graphics::{
    mono_font::MonoTextStyle,
    pixelcolor::Rgb565,
    prelude::*,
    primitives::Rectangle,
    text::Text,
};

use super::{
    palette::{BLACK, WHITE},
    regions::PLOT_HEIGHT,
    styles::{SMALL_FONT, TOP_LEFT},
};
use crate::{severity::Severity, types::GraphMode};

const MAX_LABEL: Point = Point::new(0, 2);
const MIN_LABEL: Point = Point::new(0, 70);

/// Vertical range of the plotted window, outliers trimmed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphScale {
    pub min: f32,
    pub max: f32,
}

impl GraphScale {
    /// `None` when no slot has been written. The newest sample always stays in range.
    pub fn compute(values: &[f32], graph_index: usize) -> Option<Self> {
        let len = values.len();
        let mut sorted: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f32::total_cmp);

        let count = sorted.len();
        let skip = len * 25 / 1000;
        let (mut min, mut max) = if count > 10 * skip {
            (sorted[skip], sorted[count - 1 - skip])
        } else {
            (sorted[0], sorted[count - 1])
        };

        let newest = values[(graph_index + len - 1) % len];
        min = min.min(newest).min(max);
        max = max.max(newest).max(min);

        Some(Self { min, max })
    }

    pub fn row(&self, value: f32) -> i32 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return PLOT_HEIGHT / 2;
        }
        let factor = PLOT_HEIGHT as f32 / span;
        (PLOT_HEIGHT - (factor * (value - self.min)) as i32).clamp(0, PLOT_HEIGHT)
    }
}

/// Newest sample lands on the right edge, older ones step left.
pub fn column(slot: usize, graph_index: usize, len: usize) -> i32 {
    let age = (graph_index + 2 * len - 1 - slot) % len;
    319 - age as i32
}

/// Repaints the plot area. `target` is already cropped to the graph region.
pub fn draw_graph<D>(target: &mut D, values: &[f32], mode: GraphMode, graph_index: usize) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    target.clear(BLACK)?;

    let Some(scale) = GraphScale::compute(values, graph_index) else {
        return Ok(());
    };

    let label = MonoTextStyle::new(SMALL_FONT, WHITE);
    Text::with_text_style(&format!("{:.1}", scale.max), MAX_LABEL, label, TOP_LEFT).draw(target)?;
    Text::with_text_style(&format!("{:.1}", scale.min), MIN_LABEL, label, TOP_LEFT).draw(target)?;

    for (slot, value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        let y = scale.row(*value);
        if y >= PLOT_HEIGHT {
            continue;
        }
        let color = match mode {
            GraphMode::Co2 => Severity::of(*value).color(),
            _ => WHITE,
        };
        let x = column(slot, graph_index, values.len());
        let bar = Rectangle::new(Point::new(x, y), Size::new(1, (PLOT_HEIGHT - y) as u32));
        target.fill_solid(&bar, color)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn window(samples: &[f32]) -> Vec<f32> {
        let mut values = vec![f32::NAN; 240];
        values[..samples.len()].copy_from_slice(samples);
        values
    }

    #[test]
    fn empty_window_has_no_scale() {
        assert_eq!(GraphScale::compute(&vec![f32::NAN; 240], 0), None);
    }

    #[test]
    fn short_series_keeps_its_extremes() {
        let values = window(&[500.0, 692.0, 596.0]);

        let scale = GraphScale::compute(&values, 3).unwrap();

        assert_eq!(scale, GraphScale { min: 500.0, max: 692.0 });
        assert_eq!(scale.row(500.0), 96);
        assert_eq!(scale.row(692.0), 0);
        assert_eq!(scale.row(596.0), 48);
    }

    #[test]
    fn long_series_trims_outliers_but_keeps_the_newest() {
        let mut samples: Vec<f32> = (0..100).map(|i| 600.0 + i as f32).collect();
        samples[10] = 5_000.0;
        samples[20] = 10.0;
        let values = window(&samples);

        let trimmed = GraphScale::compute(&values, 50).unwrap();
        assert_eq!(trimmed.min, 605.0);
        assert_eq!(trimmed.max, 694.0);

        let widened = GraphScale::compute(&values, 11).unwrap();
        assert_eq!(widened.max, 5_000.0);
    }

    #[test]
    fn flat_series_sits_at_half_height() {
        let values = window(&[21.5; 30]);
        let scale = GraphScale::compute(&values, 30).unwrap();

        assert_eq!(scale.row(21.5), 48);
    }

    #[test]
    fn newest_sample_is_on_the_right_edge() {
        assert_eq!(column(16, 17, 240), 319);
        assert_eq!(column(0, 17, 240), 303);
        assert_eq!(column(17, 17, 240), 80);
        assert_eq!(column(239, 0, 240), 319);
    }
}
