use crate::{state::DeviceState, types::GraphMode};

/// Ring buffers of one sample per minute, `NAN` where nothing was written yet.
#[derive(Debug, Clone)]
pub struct GraphHistory {
    co2: Vec<f32>,
    temperature: Vec<f32>,
    humidity: Vec<f32>,
    battery_mah: Vec<f32>,
}

impl GraphHistory {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            co2: vec![f32::NAN; window],
            temperature: vec![f32::NAN; window],
            humidity: vec![f32::NAN; window],
            battery_mah: vec![f32::NAN; window],
        }
    }

    pub fn len(&self) -> usize {
        self.co2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.co2.iter().all(|value| value.is_nan())
    }

    pub fn series(&self, mode: GraphMode) -> &[f32] {
        match mode {
            GraphMode::Co2 => &self.co2,
            GraphMode::Temperature => &self.temperature,
            GraphMode::Humidity => &self.humidity,
            GraphMode::BatteryMah => &self.battery_mah,
        }
    }

    /// Writes the current readings at the cursor and advances it.
    pub fn push(&mut self, state: &mut DeviceState) {
        let index = state.graph_index % self.len();
        self.co2[index] = state.co2_ppm as f32;
        self.temperature[index] = state.temperature_c();
        self.humidity[index] = state.humidity_pct();
        self.battery_mah[index] = state.battery.mah;
        state.graph_index = (index + 1) % self.len();
    }

    /// Records one sample per whole minute once the sensor has produced a reading.
    pub fn record(&mut self, old: &DeviceState, state: &mut DeviceState) -> bool {
        if !state.minute_changed(old) || state.co2_ppm == 0 {
            return false;
        }
        self.push(state);
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn filled(series: &[f32]) -> usize {
        series.iter().filter(|value| !value.is_nan()).count()
    }

    #[test]
    fn cursor_counts_written_slots() {
        let mut history = GraphHistory::new(240);
        let mut state = DeviceState::new(2, 0);
        state.co2_ppm = 650;

        for _ in 0..17 {
            history.push(&mut state);
        }

        assert_eq!(state.graph_index, 17);
        assert_eq!(filled(history.series(GraphMode::Co2)), 17);
        assert_eq!(filled(history.series(GraphMode::BatteryMah)), 17);
    }

    #[test]
    fn cursor_wraps_after_a_full_window() {
        let mut history = GraphHistory::new(240);
        let mut state = DeviceState::new(2, 0);
        state.co2_ppm = 650;

        for _ in 0..240 {
            history.push(&mut state);
        }

        assert_eq!(state.graph_index, 0);
        assert_eq!(filled(history.series(GraphMode::Co2)), 240);
        assert_eq!(filled(history.series(GraphMode::Humidity)), 240);
    }

    #[test]
    fn records_only_on_minute_change_with_a_reading() {
        let mut history = GraphHistory::new(240);
        let start = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 30)
            .unwrap();
        let mut old = DeviceState::new(2, 0);
        old.current_time = start;
        let mut state = old.clone();

        state.current_time = start + Duration::seconds(20);
        state.co2_ppm = 700;
        assert!(!history.record(&old, &mut state));

        state.current_time = start + Duration::seconds(40);
        state.co2_ppm = 0;
        assert!(!history.record(&old, &mut state));

        state.co2_ppm = 700;
        state.temperature_decideg = 215;
        assert!(history.record(&old, &mut state));
        assert_eq!(state.graph_index, 1);
        assert_eq!(history.series(GraphMode::Co2)[0], 700.0);
        assert!((history.series(GraphMode::Temperature)[0] - 21.5).abs() < 1e-4);
    }
}
