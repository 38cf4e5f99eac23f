use crate::{error::DataLogError, state::DeviceState};

pub const DATALOG_FILE: &str = "/data.txt";
pub const DATALOG_HEADER: &str = "Date, Co2 (ppm), Temperature, Humidity, Battery Charge \r\n";

/// Append-only CSV sink on removable storage.
pub trait DataLog {
    fn is_present(&self) -> bool;
    /// Creates the log with `header` as its first line when it does not exist yet.
    fn start(&mut self, header: &str) -> Result<(), DataLogError>;
    fn append(&mut self, line: &str) -> Result<(), DataLogError>;
}

pub fn format_line(state: &DeviceState) -> String {
    format!(
        "{},{},{:.2},{:.2},{:.2}\r\n",
        state.current_time.format("%Y-%m-%d-%H-%M-%S"),
        state.co2_ppm,
        state.temperature_c(),
        state.humidity_pct(),
        state.battery.mah,
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn line_matches_the_csv_layout() {
        let mut state = DeviceState::new(2, 0);
        state.current_time = NaiveDate::from_ymd_opt(2026, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap();
        state.co2_ppm = 812;
        state.temperature_decideg = 231;
        state.humidity_decipct = 456;
        state.battery.mah = 512.25;

        assert_eq!(
            format_line(&state),
            "2026-03-07-09-05-02,812,23.10,45.60,512.25\r\n"
        );
    }
}
