//! M5Stack Core2 internal bus peripherals: AXP192 power management and FT6336 touch.

use embedded_graphics::prelude::Point;
use embedded_hal::{delay::DelayNs, i2c::I2c};
use log::warn;

use co2_common::{
    battery::{PowerMonitor, PowerSample},
    InputEvent,
};

pub const AXP192_ADDRESS: u8 = 0x34;
pub const FT6336_ADDRESS: u8 = 0x38;

const REG_POWER_STATUS: u8 = 0x00;
const REG_OUTPUT_CONTROL: u8 = 0x12;
const REG_DCDC1_VOLTAGE: u8 = 0x26;
const REG_DCDC3_VOLTAGE: u8 = 0x27;
const REG_LDO23_VOLTAGE: u8 = 0x28;
const REG_CHARGE_CONTROL: u8 = 0x33;
const REG_BATTERY_VOLTAGE: u8 = 0x78;
const REG_CHARGE_CURRENT: u8 = 0x7A;
const REG_DISCHARGE_CURRENT: u8 = 0x7C;
const REG_ADC_ENABLE: u8 = 0x82;
const REG_GPIO4_CONTROL: u8 = 0x95;
const REG_GPIO34_LEVEL: u8 = 0x96;
const REG_GPIO1_CONTROL: u8 = 0x94;
const REG_COULOMB_CHARGE: u8 = 0xB0;
const REG_COULOMB_DISCHARGE: u8 = 0xB4;
const REG_COULOMB_CONTROL: u8 = 0xB8;

const COULOMB_ENABLE: u8 = 0x80;
const COULOMB_CLEAR: u8 = 0x20;
const DCDC1_ESP: u8 = 0x01;
const DCDC3_BACKLIGHT: u8 = 0x02;
const LDO2_LCD_LOGIC: u8 = 0x04;
const LCD_RESET_BIT: u8 = 0x02;
const LED_OFF_BIT: u8 = 0x02;
const CHARGE_280_MA: u8 = 0x02;

const REG_TOUCH_STATUS: u8 = 0x02;

/// Rows below the display that carry the three printed buttons.
const BUTTON_ROW_Y: i32 = 240;
const SCREEN_WIDTH: i32 = 320;

fn dcdc_step(millivolts: u16) -> u8 {
    ((millivolts - 700) / 25) as u8
}

fn ldo_step(millivolts: u16) -> u8 {
    ((millivolts - 1_800) / 100) as u8
}

pub struct Axp192<I> {
    i2c: I,
}

impl<I: I2c> Axp192<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    fn read<const N: usize>(&mut self, register: u8) -> Result<[u8; N], I::Error> {
        let mut buffer = [0u8; N];
        self.i2c
            .write_read(AXP192_ADDRESS, &[register], &mut buffer)?;
        Ok(buffer)
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), I::Error> {
        self.i2c.write(AXP192_ADDRESS, &[register, value])
    }

    fn update(&mut self, register: u8, apply: impl FnOnce(u8) -> u8) -> Result<(), I::Error> {
        let [current] = self.read::<1>(register)?;
        self.write(register, apply(current))
    }

    /// Powers the rails the Core2 needs and sets up charging and the coulomb counter.
    pub fn init(&mut self) -> Result<(), I::Error> {
        // 3.35 V for the ESP32, 2.8 V backlight, 3.3 V LCD logic.
        self.write(REG_DCDC1_VOLTAGE, dcdc_step(3_350))?;
        self.write(REG_DCDC3_VOLTAGE, dcdc_step(2_800))?;
        self.update(REG_LDO23_VOLTAGE, |value| (value & 0x0F) | (ldo_step(3_300) << 4))?;
        self.update(REG_OUTPUT_CONTROL, |value| {
            value | DCDC1_ESP | DCDC3_BACKLIGHT | LDO2_LCD_LOGIC
        })?;
        self.write(REG_ADC_ENABLE, 0xFF)?;
        self.update(REG_CHARGE_CONTROL, |value| (value & 0xF0) | CHARGE_280_MA)?;
        self.write(REG_COULOMB_CONTROL, COULOMB_ENABLE)
    }

    /// Pulses the panel reset line, which hangs off the PMU's GPIO4.
    pub fn reset_lcd<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), I::Error> {
        self.update(REG_GPIO4_CONTROL, |value| (value & 0x72) | 0x84)?;
        self.update(REG_GPIO34_LEVEL, |value| value & !LCD_RESET_BIT)?;
        delay.delay_ms(100);
        self.update(REG_GPIO34_LEVEL, |value| value | LCD_RESET_BIT)?;
        delay.delay_ms(100);
        Ok(())
    }

    fn read_u32(&mut self, register: u8) -> Result<u32, I::Error> {
        self.read::<4>(register).map(u32::from_be_bytes)
    }

    pub fn battery_voltage(&mut self) -> Result<f32, I::Error> {
        let [hi, lo] = self.read::<2>(REG_BATTERY_VOLTAGE)?;
        let raw = (u16::from(hi) << 4) | u16::from(lo & 0x0F);
        Ok(f32::from(raw) * 1.1 / 1000.0)
    }

    /// Net battery current in mA, positive while charging.
    pub fn battery_current(&mut self) -> Result<f32, I::Error> {
        let current = |[hi, lo]: [u8; 2]| f32::from((u16::from(hi) << 5) | u16::from(lo & 0x1F)) * 0.5;
        let charging = current(self.read::<2>(REG_CHARGE_CURRENT)?);
        let discharging = current(self.read::<2>(REG_DISCHARGE_CURRENT)?);
        Ok(charging - discharging)
    }

    pub fn is_ac_in(&mut self) -> Result<bool, I::Error> {
        let [status] = self.read::<1>(REG_POWER_STATUS)?;
        Ok(status & 0x80 != 0)
    }

    fn try_sample(&mut self) -> Result<PowerSample, I::Error> {
        Ok(PowerSample {
            charged: self.read_u32(REG_COULOMB_CHARGE)?,
            discharged: self.read_u32(REG_COULOMB_DISCHARGE)?,
            voltage: self.battery_voltage()?,
            current: self.battery_current()?,
            in_ac: self.is_ac_in()?,
        })
    }
}

impl<I: I2c> PowerMonitor for Axp192<I> {
    fn sample(&mut self) -> PowerSample {
        self.try_sample().unwrap_or_else(|err| {
            warn!("power monitor read failed: {err:?}");
            PowerSample::default()
        })
    }

    fn reset_coulomb_counter(&mut self) {
        let result = self
            .write(REG_COULOMB_CONTROL, COULOMB_ENABLE | COULOMB_CLEAR)
            .and_then(|()| self.write(REG_COULOMB_CONTROL, COULOMB_ENABLE));
        if let Err(err) = result {
            warn!("coulomb counter reset failed: {err:?}");
        }
    }

    fn set_charge_led(&mut self, on: bool) {
        let result = self.update(REG_GPIO1_CONTROL, |value| {
            if on {
                value & !LED_OFF_BIT
            } else {
                value | LED_OFF_BIT
            }
        });
        if let Err(err) = result {
            warn!("charge led update failed: {err:?}");
        }
    }

    fn set_display_power(&mut self, on: bool) {
        let result = self.update(REG_OUTPUT_CONTROL, |value| {
            if on {
                value | DCDC3_BACKLIGHT
            } else {
                value & !DCDC3_BACKLIGHT
            }
        });
        if let Err(err) = result {
            warn!("backlight switch failed: {err:?}");
        }
    }
}

/// Maps a touch to a screen event, or to one of the printed buttons under the display.
pub fn touch_event(point: Point) -> InputEvent {
    if point.y < BUTTON_ROW_Y {
        return InputEvent::Touch(point);
    }
    match point.x {
        x if x < SCREEN_WIDTH / 3 => InputEvent::ButtonA,
        x if x < SCREEN_WIDTH * 2 / 3 => InputEvent::ButtonB,
        _ => InputEvent::ButtonC,
    }
}

/// Capacitive touch controller. Reports a press once, when the finger lands.
pub struct Ft6336<I> {
    i2c: I,
    pressed: bool,
}

impl<I: I2c> Ft6336<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            pressed: false,
        }
    }

    pub fn point(&mut self) -> Result<Option<Point>, I::Error> {
        let mut data = [0u8; 5];
        self.i2c
            .write_read(FT6336_ADDRESS, &[REG_TOUCH_STATUS], &mut data)?;

        let touches = data[0] & 0x0F;
        if touches == 0 || touches > 2 {
            return Ok(None);
        }
        let x = (i32::from(data[1] & 0x0F) << 8) | i32::from(data[2]);
        let y = (i32::from(data[3] & 0x0F) << 8) | i32::from(data[4]);
        Ok(Some(Point::new(x, y)))
    }

    pub fn poll(&mut self) -> Result<Option<InputEvent>, I::Error> {
        let point = self.point()?;
        let landed = point.is_some() && !self.pressed;
        self.pressed = point.is_some();
        Ok(point.filter(|_| landed).map(touch_event))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Register file behind one device address.
    #[derive(Default)]
    struct Registers {
        values: HashMap<u8, u8>,
    }

    impl Registers {
        fn set(&mut self, start: u8, bytes: &[u8]) {
            for (offset, byte) in bytes.iter().enumerate() {
                self.values.insert(start + offset as u8, *byte);
            }
        }

        fn get(&self, register: u8) -> u8 {
            self.values.get(&register).copied().unwrap_or(0)
        }
    }

    impl ErrorType for Registers {
        type Error = ErrorKind;
    }

    impl I2c for Registers {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            let mut cursor = 0u8;
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => {
                        cursor = bytes[0];
                        if let Some(value) = bytes.get(1) {
                            self.values.insert(cursor, *value);
                        }
                    }
                    Operation::Read(buffer) => {
                        for (offset, slot) in buffer.iter_mut().enumerate() {
                            *slot = self.get(cursor + offset as u8);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn sample_decodes_pmu_registers() {
        let mut registers = Registers::default();
        registers.set(REG_COULOMB_CHARGE, &1_000u32.to_be_bytes());
        registers.set(REG_COULOMB_DISCHARGE, &250u32.to_be_bytes());
        // 3700 steps of 1.1 mV.
        registers.set(REG_BATTERY_VOLTAGE, &[0xE7, 0x04]);
        // 200 mA charging, 40 mA discharging, in 0.5 mA steps.
        registers.set(REG_CHARGE_CURRENT, &[0x0C, 0x10]);
        registers.set(REG_DISCHARGE_CURRENT, &[0x02, 0x10]);
        registers.set(REG_POWER_STATUS, &[0x80]);
        let mut axp = Axp192::new(registers);

        let sample = axp.sample();

        assert_eq!(sample.charged, 1_000);
        assert_eq!(sample.discharged, 250);
        assert!((sample.voltage - 4.0700).abs() < 1e-3);
        assert!((sample.current - 160.0).abs() < 1e-3);
        assert!(sample.in_ac);
    }

    #[test]
    fn backlight_and_led_flip_their_bits() {
        let mut registers = Registers::default();
        registers.set(REG_OUTPUT_CONTROL, &[0x4D]);
        registers.set(REG_GPIO1_CONTROL, &[0x00]);
        let mut axp = Axp192::new(registers);

        axp.set_display_power(false);
        axp.set_charge_led(false);
        assert_eq!(axp.i2c.get(REG_OUTPUT_CONTROL), 0x4D & !0x02);
        assert_eq!(axp.i2c.get(REG_GPIO1_CONTROL), 0x02);

        axp.set_display_power(true);
        axp.set_charge_led(true);
        assert_eq!(axp.i2c.get(REG_OUTPUT_CONTROL), 0x4F);
        assert_eq!(axp.i2c.get(REG_GPIO1_CONTROL), 0x00);
    }

    #[test]
    fn init_powers_rails_and_sets_charging() {
        let mut registers = Registers::default();
        registers.set(REG_CHARGE_CONTROL, &[0xC8]);
        registers.set(REG_LDO23_VOLTAGE, &[0x0C]);
        let mut axp = Axp192::new(registers);

        axp.init().unwrap();

        assert_eq!(axp.i2c.get(REG_DCDC1_VOLTAGE), 106);
        assert_eq!(axp.i2c.get(REG_DCDC3_VOLTAGE), 84);
        assert_eq!(axp.i2c.get(REG_LDO23_VOLTAGE), 0xFC);
        assert_eq!(axp.i2c.get(REG_OUTPUT_CONTROL), 0x07);
        assert_eq!(axp.i2c.get(REG_CHARGE_CONTROL), 0xC2);
        assert_eq!(axp.i2c.get(REG_COULOMB_CONTROL), COULOMB_ENABLE);
    }

    #[test]
    fn lcd_reset_ends_released() {
        struct NoDelay;
        impl DelayNs for NoDelay {
            fn delay_ns(&mut self, _ns: u32) {}
        }
        let mut axp = Axp192::new(Registers::default());

        axp.reset_lcd(&mut NoDelay).unwrap();

        assert_eq!(axp.i2c.get(REG_GPIO4_CONTROL), 0x84);
        assert_eq!(axp.i2c.get(REG_GPIO34_LEVEL), LCD_RESET_BIT);
    }

    #[test]
    fn touch_reports_once_per_press() {
        let mut registers = Registers::default();
        registers.set(REG_TOUCH_STATUS, &[0x01, 0x00, 0x50, 0x00, 0xC8]);
        let mut touch = Ft6336::new(registers);

        assert_eq!(
            touch.poll().unwrap(),
            Some(InputEvent::Touch(Point::new(80, 200)))
        );
        assert_eq!(touch.poll().unwrap(), None);

        touch.i2c.set(REG_TOUCH_STATUS, &[0x00]);
        assert_eq!(touch.poll().unwrap(), None);

        touch.i2c.set(REG_TOUCH_STATUS, &[0x01]);
        assert!(touch.poll().unwrap().is_some());
    }

    #[test]
    fn touches_below_the_screen_are_buttons() {
        assert_eq!(touch_event(Point::new(40, 260)), InputEvent::ButtonA);
        assert_eq!(touch_event(Point::new(160, 250)), InputEvent::ButtonB);
        assert_eq!(touch_event(Point::new(300, 275)), InputEvent::ButtonC);
        assert_eq!(
            touch_event(Point::new(300, 120)),
            InputEvent::Touch(Point::new(300, 120))
        );
    }
}
