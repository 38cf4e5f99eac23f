//! Region-diffed drawing of the 320x240 panel.
//!
//! Every region compares its driving fields between the previous snapshot and the
//! current state and touches the display only when they differ.

pub mod body;
pub mod controls;
pub mod graph;
pub mod palette;
pub mod regions;
pub mod styles;

use embedded_graphics::{
    mono_font::MonoTextStyle,
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{Line, PrimitiveStyle},
    text::Text,
};

use crate::{history::GraphHistory, severity::Severity, state::DeviceState, types::MenuMode};
use body::{draw_body, BodyContext};
use controls::{draw_button, Control, ControlSet};
use graph::draw_graph;
use palette::{BLACK, RED, WHITE};
use regions::{graph_key, header_key, values_key, BodyKey, BODY, GRAPH, HEADER, VALUES};
use styles::{TEXT_FONT, TOP_CENTER, TOP_LEFT, TOP_RIGHT, VALUE_FONT};

const HEADER_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Which regions one `render` call repainted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub cleared: bool,
    pub header: bool,
    pub values: bool,
    pub graph: bool,
    pub body: bool,
}

impl RenderReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct DisplayDiffRenderer {
    ap_ssid: String,
    firmware_version: &'static str,
    controls: ControlSet,
}

impl DisplayDiffRenderer {
    pub fn new(ap_ssid: String, firmware_version: &'static str) -> Self {
        Self {
            ap_ssid,
            firmware_version,
            controls: ControlSet::default(),
        }
    }

    /// Controls shown by the last draw; touches resolve against these.
    pub fn controls(&self) -> &ControlSet {
        &self.controls
    }

    pub fn render<D>(
        &mut self,
        target: &mut D,
        old: &DeviceState,
        state: &DeviceState,
        history: &GraphHistory,
    ) -> Result<RenderReport, D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        let mut report = RenderReport::default();
        if state.display_sleep {
            return Ok(report);
        }

        if header_key(old) != header_key(state) {
            draw_header(target, state)?;
            report.header = true;
        }

        // Waking up counts as a fresh screen: controls from before the sleep are stale.
        if old.menu_mode != state.menu_mode || old.display_sleep {
            self.controls.hide_all();
            target.cropped(&BODY).clear(BLACK)?;
            report.cleared = true;
        }

        if state.menu_mode == MenuMode::Graphs {
            if values_key(old) != values_key(state) {
                self.draw_values(target, state)?;
                report.values = true;
            }
            if graph_key(old) != graph_key(state) {
                let mut area = target.cropped(&GRAPH);
                draw_graph(
                    &mut area,
                    history.series(state.graph_mode),
                    state.graph_mode,
                    state.graph_index,
                )?;
                report.graph = true;
            }
        } else if BodyKey::of(old) != BodyKey::of(state) {
            let context = BodyContext {
                ap_ssid: &self.ap_ssid,
                firmware_version: self.firmware_version,
            };
            draw_body(target, state, &context, &mut self.controls)?;
            report.body = true;
        }

        Ok(report)
    }

    fn draw_values<D>(&mut self, target: &mut D, state: &DeviceState) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        {
            let mut area = target.cropped(&VALUES);
            area.clear(BLACK)?;
            let style = MonoTextStyle::new(VALUE_FONT, Severity::of_ppm(state.co2_ppm).color());
            Text::with_text_style(
                &format!("{}ppm", state.co2_ppm),
                Point::new(160, 10),
                style,
                TOP_CENTER,
            )
            .draw(&mut area)?;
        }

        self.controls.show(Control::Battery);
        self.controls.show(Control::Co2Value);
        self.controls.show(Control::MidLeft);
        self.controls.show(Control::MidRight);
        draw_button(
            target,
            Control::MidLeft,
            &format!("{:.1}C", state.temperature_c()),
            WHITE,
        )?;
        draw_button(
            target,
            Control::MidRight,
            &format!("{:.1}%", state.humidity_pct()),
            WHITE,
        )
    }

    /// Shown once when the air sensor is missing at boot; the device halts afterwards.
    pub fn draw_sensor_fault<D>(&mut self, target: &mut D) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        self.controls.hide_all();
        target.clear(BLACK)?;

        let mut area = target.cropped(&VALUES);
        let style = MonoTextStyle::new(TEXT_FONT, RED);
        for (line, y) in [
            ("Air sensor not detected.", 10),
            ("Please check wiring.", 35),
            ("Freezing.", 60),
        ] {
            Text::with_text_style(line, Point::new(20, y), style, TOP_LEFT).draw(&mut area)?;
        }
        Ok(())
    }
}

fn draw_header<D>(target: &mut D, state: &DeviceState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let mut area = target.cropped(&HEADER);
    area.clear(BLACK)?;

    let style = MonoTextStyle::new(TEXT_FONT, WHITE);
    let clock = state.current_time.format(HEADER_TIME_FORMAT).to_string();
    Text::with_text_style(&clock, Point::new(0, 1), style, TOP_LEFT).draw(&mut area)?;

    let battery = format!(
        "{}%{}",
        state.battery.percent,
        if state.battery.in_ac { "+" } else { "-" }
    );
    Text::with_text_style(&battery, Point::new(319, 1), style, TOP_RIGHT).draw(&mut area)?;

    Line::new(Point::new(0, 25), Point::new(319, 25))
        .into_styled(PrimitiveStyle::with_stroke(WHITE, 1))
        .draw(&mut area)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{sim::CountingDisplay, types::GraphMode};

    fn rig() -> (DisplayDiffRenderer, CountingDisplay, GraphHistory, DeviceState) {
        let mut state = DeviceState::new(2, 0);
        state.co2_ppm = 650;
        (
            DisplayDiffRenderer::new("SMOCA CO2-ABC123".to_string(), "1.1.9"),
            CountingDisplay::default(),
            GraphHistory::new(240),
            state,
        )
    }

    #[test]
    fn unchanged_snapshot_draws_nothing() {
        let (mut renderer, mut display, history, state) = rig();

        for mode in [MenuMode::Graphs, MenuMode::Wifi, MenuMode::Mqtt, MenuMode::Update] {
            let mut state = state.clone();
            state.menu_mode = mode;
            let report = renderer
                .render(&mut display, &state.clone(), &state, &history)
                .unwrap();

            assert!(report.is_idle(), "{}", mode.as_str());
        }
        assert_eq!(display.draw_calls(), 0);
    }

    #[test]
    fn only_the_changed_region_repaints() {
        let (mut renderer, mut display, history, old) = rig();
        let mut state = old.clone();
        state.current_time += Duration::seconds(1);

        let report = renderer.render(&mut display, &old, &state, &history).unwrap();

        assert_eq!(
            report,
            RenderReport {
                header: true,
                ..RenderReport::default()
            }
        );
        assert!(display.draw_calls() > 0);
    }

    #[test]
    fn mode_change_clears_body_and_swaps_controls() {
        let (mut renderer, mut display, history, old) = rig();
        let mut graphs = old.clone();
        graphs.co2_ppm = 700;
        renderer.render(&mut display, &old, &graphs, &history).unwrap();
        assert!(renderer.controls().is_visible(Control::Co2Value));

        let mut wifi = graphs.clone();
        wifi.menu_mode = MenuMode::Wifi;
        let report = renderer.render(&mut display, &graphs, &wifi, &history).unwrap();

        assert!(report.cleared);
        assert!(report.body);
        assert!(!renderer.controls().is_visible(Control::Co2Value));
        assert!(renderer.controls().is_visible(Control::Toggle));
    }

    #[test]
    fn sleeping_display_draws_nothing() {
        let (mut renderer, mut display, history, old) = rig();
        let mut state = old.clone();
        state.display_sleep = true;
        state.co2_ppm = 1500;
        state.graph_mode = GraphMode::Humidity;

        let report = renderer.render(&mut display, &old, &state, &history).unwrap();

        assert!(report.is_idle());
        assert_eq!(display.draw_calls(), 0);
    }

    #[test]
    fn waking_repaints_every_graph_region() {
        let (mut renderer, mut display, history, mut old) = rig();
        old.display_sleep = true;
        let state = DeviceState {
            display_sleep: false,
            ..old.clone()
        };

        let report = renderer.render(&mut display, &old, &state, &history).unwrap();

        assert_eq!(
            report,
            RenderReport {
                cleared: true,
                header: true,
                values: true,
                graph: true,
                body: false,
            }
        );
    }
}
