use log::info;

use crate::state::BatteryState;

const COULOMB_LSB_MAH: f32 = 65536.0 * 0.5 / 3600.0 / 25.0;
const EMPTY_VOLTAGE: f32 = 3.2;
const FULL_VOLTAGE: f32 = 4.15;
const FULL_CURRENT: f32 = 0.1;

/// One reading of the power management chip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerSample {
    pub charged: u32,
    pub discharged: u32,
    pub voltage: f32,
    pub current: f32,
    pub in_ac: bool,
}

pub trait PowerMonitor {
    fn sample(&mut self) -> PowerSample;
    fn reset_coulomb_counter(&mut self);
    fn set_charge_led(&mut self, on: bool);
    fn set_display_power(&mut self, on: bool);
}

/// Folds a power sample into the battery state and reports whether the coulomb
/// counter has drifted below empty and needs a reset.
pub fn update_battery(battery: &mut BatteryState, sample: &PowerSample) -> bool {
    let needs_reset = sample.voltage < EMPTY_VOLTAGE && sample.discharged > sample.charged;

    battery.mah = COULOMB_LSB_MAH * (i64::from(sample.charged) - i64::from(sample.discharged)) as f32;
    battery.voltage = sample.voltage;
    battery.current = sample.current;

    if battery.in_ac
        && battery.current.abs() < FULL_CURRENT
        && battery.voltage >= FULL_VOLTAGE
        && (battery.mah - battery.capacity_mah).abs() > 1.0
    {
        info!(
            "battery full, capacity {:.1} -> {:.1} mAh",
            battery.capacity_mah, battery.mah
        );
        battery.capacity_mah = battery.mah;
    }

    battery.percent = if battery.capacity_mah > 0.0 {
        ((battery.mah * 100.0 / battery.capacity_mah) as i32).clamp(0, 100)
    } else {
        0
    };
    battery.in_ac = sample.in_ac;

    needs_reset
}

pub fn poll_battery(monitor: &mut dyn PowerMonitor, battery: &mut BatteryState) {
    let sample = monitor.sample();
    if update_battery(battery, &sample) {
        info!("battery empty, resetting coulomb counter");
        monitor.reset_coulomb_counter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(mah: f32) -> u32 {
        (mah / COULOMB_LSB_MAH).round() as u32
    }

    #[test]
    fn percent_follows_counted_charge() {
        let mut battery = BatteryState::default();
        let sample = PowerSample {
            charged: charge(350.0),
            discharged: 0,
            voltage: 3.9,
            current: -0.2,
            in_ac: false,
        };

        assert!(!update_battery(&mut battery, &sample));
        assert!((battery.mah - 350.0).abs() < 0.5);
        assert_eq!(battery.percent, 49);
    }

    #[test]
    fn full_battery_on_ac_learns_the_capacity() {
        let mut battery = BatteryState {
            in_ac: true,
            ..BatteryState::default()
        };
        let sample = PowerSample {
            charged: charge(640.0),
            discharged: 0,
            voltage: 4.18,
            current: 0.02,
            in_ac: true,
        };

        update_battery(&mut battery, &sample);

        assert!((battery.capacity_mah - 640.0).abs() < 0.5);
        assert_eq!(battery.percent, 100);
    }

    #[test]
    fn learning_uses_the_previous_ac_flag() {
        let mut battery = BatteryState::default();
        let sample = PowerSample {
            charged: charge(640.0),
            discharged: 0,
            voltage: 4.18,
            current: 0.02,
            in_ac: true,
        };

        update_battery(&mut battery, &sample);

        assert_eq!(battery.capacity_mah, 700.0);
        assert!(battery.in_ac);
    }

    #[test]
    fn drained_counter_requests_a_reset_and_clamps() {
        let mut battery = BatteryState::default();
        let sample = PowerSample {
            charged: 100,
            discharged: 500,
            voltage: 3.1,
            current: -0.3,
            in_ac: false,
        };

        assert!(update_battery(&mut battery, &sample));
        assert!(battery.mah < 0.0);
        assert_eq!(battery.percent, 0);
    }
}
