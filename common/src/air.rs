use log::info;

use crate::{error::SensorError, state::DeviceState};

pub const INITIAL_TEMPERATURE_OFFSET_C: f32 = 5.5;
pub const ALTITUDE_COMPENSATION_M: u16 = 440;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirSample {
    pub co2_ppm: f32,
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

/// NDIR CO2 sensor with on-board temperature and humidity.
pub trait AirSensor {
    fn begin(&mut self, auto_calibration: bool) -> Result<(), SensorError>;
    /// `None` while no new measurement is ready.
    fn read(&mut self) -> Result<Option<AirSample>, SensorError>;
    fn set_auto_calibration(&mut self, enabled: bool) -> Result<(), SensorError>;
    fn force_recalibration(&mut self, ppm: i32) -> Result<(), SensorError>;
    fn temperature_offset(&mut self) -> Result<f32, SensorError>;
    fn set_temperature_offset(&mut self, offset_c: f32) -> Result<(), SensorError>;
    fn set_altitude_compensation(&mut self, meters: u16) -> Result<(), SensorError>;
}

/// Boot-time setup. An error here means the sensor is absent and the device must halt.
pub fn start_sensor(sensor: &mut dyn AirSensor, auto_calibration: bool) -> Result<(), SensorError> {
    sensor.begin(auto_calibration)?;
    sensor.set_temperature_offset(INITIAL_TEMPERATURE_OFFSET_C)?;
    sensor.set_altitude_compensation(ALTITUDE_COMPENSATION_M)?;
    info!("air sensor ready, auto calibration {auto_calibration}");
    Ok(())
}

pub fn apply_sample(state: &mut DeviceState, sample: &AirSample) {
    state.co2_ppm = sample.co2_ppm as i32;
    state.temperature_decideg = (sample.temperature_c * 10.0) as i32;
    state.humidity_decipct = (sample.humidity_pct * 10.0) as i32;
}

/// Offset that makes the sensor report `target_c` for the current air, never negative.
pub fn offset_for_target(current_offset_c: f32, measured_c: f32, target_c: f32) -> f32 {
    (current_offset_c + measured_c - target_c).max(0.0)
}
