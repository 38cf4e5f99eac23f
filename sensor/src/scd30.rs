//! Sensirion SCD30 CO2/temperature/humidity sensor over I2C.

use embedded_hal::{delay::DelayNs, i2c::I2c};

use co2_common::{
    air::{AirSample, AirSensor},
    error::SensorError,
};

pub const ADDRESS: u8 = 0x61;

const CMD_START_CONTINUOUS: u16 = 0x0010;
const CMD_DATA_READY: u16 = 0x0202;
const CMD_READ_MEASUREMENT: u16 = 0x0300;
const CMD_MEASUREMENT_INTERVAL: u16 = 0x4600;
const CMD_ALTITUDE: u16 = 0x5102;
const CMD_FORCED_RECALIBRATION: u16 = 0x5204;
const CMD_AUTO_CALIBRATION: u16 = 0x5306;
const CMD_TEMPERATURE_OFFSET: u16 = 0x5403;
const CMD_FIRMWARE_VERSION: u16 = 0xD100;

const MEASUREMENT_INTERVAL_S: u16 = 2;
const READ_DELAY_US: u32 = 3_000;

/// Sensirion CRC-8: polynomial 0x31, init 0xFF, over one 16-bit word.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x31;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn bus_error<E: core::fmt::Debug>(err: E) -> SensorError {
    SensorError::Bus(format!("{err:?}"))
}

pub struct Scd30<I, D> {
    i2c: I,
    delay: D,
}

impl<I, D> Scd30<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I, delay: D) -> Self {
        Self { i2c, delay }
    }

    fn command(&mut self, command: u16) -> Result<(), SensorError> {
        self.i2c
            .write(ADDRESS, &command.to_be_bytes())
            .map_err(bus_error)
    }

    fn command_with_argument(&mut self, command: u16, argument: u16) -> Result<(), SensorError> {
        let [c0, c1] = command.to_be_bytes();
        let [a0, a1] = argument.to_be_bytes();
        self.i2c
            .write(ADDRESS, &[c0, c1, a0, a1, crc8(&[a0, a1])])
            .map_err(bus_error)
    }

    /// Issues `command` and reads back `N` CRC-checked words.
    fn read_words<const N: usize>(&mut self, command: u16) -> Result<[u16; N], SensorError> {
        self.command(command)?;
        self.delay.delay_us(READ_DELAY_US);

        let mut raw = vec![0u8; N * 3];
        self.i2c.read(ADDRESS, &mut raw).map_err(bus_error)?;

        let mut words = [0u16; N];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(3)) {
            if crc8(&chunk[..2]) != chunk[2] {
                return Err(SensorError::Bus("crc mismatch".to_string()));
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(words)
    }

    pub fn firmware_version(&mut self) -> Result<u16, SensorError> {
        let [version] = self.read_words::<1>(CMD_FIRMWARE_VERSION)?;
        Ok(version)
    }

    pub fn data_ready(&mut self) -> Result<bool, SensorError> {
        let [ready] = self.read_words::<1>(CMD_DATA_READY)?;
        Ok(ready == 1)
    }

    pub fn read_measurement(&mut self) -> Result<AirSample, SensorError> {
        let words = self.read_words::<6>(CMD_READ_MEASUREMENT)?;
        let float = |hi: u16, lo: u16| f32::from_bits((u32::from(hi) << 16) | u32::from(lo));

        Ok(AirSample {
            co2_ppm: float(words[0], words[1]),
            temperature_c: float(words[2], words[3]),
            humidity_pct: float(words[4], words[5]),
        })
    }
}

impl<I, D> AirSensor for Scd30<I, D>
where
    I: I2c,
    D: DelayNs,
{
    fn begin(&mut self, auto_calibration: bool) -> Result<(), SensorError> {
        self.firmware_version()
            .map_err(|_| SensorError::NotDetected)?;
        self.command_with_argument(CMD_MEASUREMENT_INTERVAL, MEASUREMENT_INTERVAL_S)?;
        self.set_auto_calibration(auto_calibration)?;
        // Zero disables ambient pressure compensation.
        self.command_with_argument(CMD_START_CONTINUOUS, 0)
    }

    fn read(&mut self) -> Result<Option<AirSample>, SensorError> {
        if !self.data_ready()? {
            return Ok(None);
        }
        self.read_measurement().map(Some)
    }

    fn set_auto_calibration(&mut self, enabled: bool) -> Result<(), SensorError> {
        self.command_with_argument(CMD_AUTO_CALIBRATION, u16::from(enabled))
    }

    fn force_recalibration(&mut self, ppm: i32) -> Result<(), SensorError> {
        let ppm = u16::try_from(ppm.clamp(400, 2000)).unwrap_or(400);
        self.command_with_argument(CMD_FORCED_RECALIBRATION, ppm)
    }

    fn temperature_offset(&mut self) -> Result<f32, SensorError> {
        let [ticks] = self.read_words::<1>(CMD_TEMPERATURE_OFFSET)?;
        Ok(f32::from(ticks) / 100.0)
    }

    fn set_temperature_offset(&mut self, offset_c: f32) -> Result<(), SensorError> {
        let ticks = (offset_c.max(0.0) * 100.0).round().min(f32::from(u16::MAX)) as u16;
        self.command_with_argument(CMD_TEMPERATURE_OFFSET, ticks)
    }

    fn set_altitude_compensation(&mut self, meters: u16) -> Result<(), SensorError> {
        self.command_with_argument(CMD_ALTITUDE, meters)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct FakeBus {
        absent: bool,
        writes: Vec<Vec<u8>>,
        reads: VecDeque<Vec<u8>>,
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, ADDRESS);
            if self.absent {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => self.writes.push(bytes.to_vec()),
                    Operation::Read(buffer) => {
                        let reply = self.reads.pop_front().unwrap_or_default();
                        buffer.copy_from_slice(&reply[..buffer.len()]);
                    }
                }
            }
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn words(values: &[u16]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|value| {
                let [hi, lo] = value.to_be_bytes();
                [hi, lo, crc8(&[hi, lo])]
            })
            .collect()
    }

    fn float_words(values: &[f32]) -> Vec<u16> {
        values
            .iter()
            .flat_map(|value| {
                let bits = value.to_bits();
                [(bits >> 16) as u16, bits as u16]
            })
            .collect()
    }

    fn sensor(bus: FakeBus) -> Scd30<FakeBus, NoDelay> {
        Scd30::new(bus, NoDelay)
    }

    #[test]
    fn crc_matches_the_datasheet_example() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
        assert_eq!(crc8(&[0x00, 0x00]), 0x81);
    }

    #[test]
    fn begin_configures_and_starts_measuring() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(words(&[0x0342]));
        let mut scd30 = sensor(bus);

        scd30.begin(true).unwrap();

        assert_eq!(
            scd30.i2c.writes,
            vec![
                vec![0xD1, 0x00],
                vec![0x46, 0x00, 0x00, 0x02, crc8(&[0x00, 0x02])],
                vec![0x53, 0x06, 0x00, 0x01, crc8(&[0x00, 0x01])],
                vec![0x00, 0x10, 0x00, 0x00, 0x81],
            ]
        );
    }

    #[test]
    fn absent_sensor_is_not_detected() {
        let mut scd30 = sensor(FakeBus {
            absent: true,
            ..FakeBus::default()
        });

        assert!(matches!(scd30.begin(false), Err(SensorError::NotDetected)));
    }

    #[test]
    fn read_decodes_three_floats() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(words(&[1]));
        bus.reads.push_back(words(&float_words(&[812.5, 23.25, 45.5])));
        let mut scd30 = sensor(bus);

        let sample = scd30.read().unwrap().unwrap();

        assert_eq!(sample.co2_ppm, 812.5);
        assert_eq!(sample.temperature_c, 23.25);
        assert_eq!(sample.humidity_pct, 45.5);
    }

    #[test]
    fn nothing_ready_reads_nothing() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(words(&[0]));
        let mut scd30 = sensor(bus);

        assert_eq!(scd30.read().unwrap(), None);
        assert_eq!(scd30.i2c.writes, vec![vec![0x02, 0x02]]);
    }

    #[test]
    fn corrupted_word_is_a_bus_error() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(vec![0x00, 0x01, 0x00]);
        let mut scd30 = sensor(bus);

        assert!(matches!(scd30.data_ready(), Err(SensorError::Bus(_))));
    }

    #[test]
    fn temperature_offset_uses_hundredths() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(words(&[550]));
        let mut scd30 = sensor(bus);

        assert_eq!(scd30.temperature_offset().unwrap(), 5.5);

        scd30.set_temperature_offset(3.25).unwrap();
        let [hi, lo] = 325u16.to_be_bytes();
        assert_eq!(
            scd30.i2c.writes.last().unwrap(),
            &vec![0x54, 0x03, hi, lo, crc8(&[hi, lo])]
        );
    }
}
