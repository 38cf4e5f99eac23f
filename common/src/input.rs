use embedded_graphics::prelude::Point;

use crate::{
    config::{
        CALIBRATION_PPM_STEP, CALIBRATION_TEMP_STEP_C, MAX_CALIBRATION_PPM, MAX_CALIBRATION_TEMP_C,
        MIN_CALIBRATION_PPM, MIN_CALIBRATION_TEMP_C,
    },
    render::controls::{Control, ControlSet},
    state::DeviceState,
    types::{CalibrationNotice, GraphMode, MenuMode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ButtonA,
    ButtonB,
    ButtonC,
    Touch(Point),
}

/// Hardware side effects an input asks for, carried out by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetAutoCalibration(bool),
    ForceRecalibration(i32),
    CalibrateTemperature(f32),
    SetDisplayPower(bool),
}

pub fn apply_input(event: InputEvent, state: &mut DeviceState, controls: &ControlSet) -> Option<Command> {
    match event {
        InputEvent::ButtonA => button_a(state),
        InputEvent::ButtonB => None,
        InputEvent::ButtonC => {
            state.menu_mode = state.menu_mode.next();
            None
        }
        InputEvent::Touch(point) => controls.hit(point).and_then(|control| touch(control, state)),
    }
}

fn button_a(state: &mut DeviceState) -> Option<Command> {
    if state.menu_mode == MenuMode::Graphs {
        state.display_sleep = !state.display_sleep;
        Some(Command::SetDisplayPower(!state.display_sleep))
    } else {
        state.menu_mode = MenuMode::Graphs;
        None
    }
}

fn touch(control: Control, state: &mut DeviceState) -> Option<Command> {
    let calibration = &mut state.calibration;
    match (state.menu_mode, control) {
        (MenuMode::Graphs, Control::Battery) => state.graph_mode = GraphMode::BatteryMah,
        (MenuMode::Graphs, Control::Co2Value) => state.graph_mode = GraphMode::Co2,
        (MenuMode::Graphs, Control::MidLeft) => state.graph_mode = GraphMode::Temperature,
        (MenuMode::Graphs, Control::MidRight) => state.graph_mode = GraphMode::Humidity,

        (MenuMode::CalibrationPpm, Control::MidLeft) => {
            if calibration.ppm_target >= MIN_CALIBRATION_PPM + CALIBRATION_PPM_STEP {
                calibration.ppm_target -= CALIBRATION_PPM_STEP;
            }
        }
        (MenuMode::CalibrationPpm, Control::MidRight) => {
            if calibration.ppm_target <= MAX_CALIBRATION_PPM - CALIBRATION_PPM_STEP {
                calibration.ppm_target += CALIBRATION_PPM_STEP;
            }
        }
        (MenuMode::CalibrationTemperature, Control::MidLeft) => {
            if calibration.temperature_target_c >= MIN_CALIBRATION_TEMP_C + CALIBRATION_TEMP_STEP_C {
                calibration.temperature_target_c -= CALIBRATION_TEMP_STEP_C;
            }
        }
        (MenuMode::CalibrationTemperature, Control::MidRight) => {
            if calibration.temperature_target_c <= MAX_CALIBRATION_TEMP_C - CALIBRATION_TEMP_STEP_C {
                calibration.temperature_target_c += CALIBRATION_TEMP_STEP_C;
            }
        }
        (MenuMode::CalibrationPpm | MenuMode::CalibrationTemperature, Control::Toggle) => {
            calibration.auto_on = !calibration.auto_on;
            return Some(Command::SetAutoCalibration(calibration.auto_on));
        }
        (MenuMode::CalibrationPpm, Control::Action) => {
            state.menu_mode = MenuMode::CalibrationPpmConfirm;
        }
        (MenuMode::CalibrationTemperature, Control::Action) => {
            state.menu_mode = MenuMode::CalibrationTemperatureConfirm;
        }

        (MenuMode::CalibrationPpmConfirm, Control::Action) => {
            state.menu_mode = MenuMode::CalibrationPpm;
            state.notices.calibration = Some(CalibrationNotice::Applied);
            return Some(Command::ForceRecalibration(calibration.ppm_target));
        }
        (MenuMode::CalibrationTemperatureConfirm, Control::Action) => {
            state.menu_mode = MenuMode::CalibrationTemperature;
            state.notices.calibration = Some(CalibrationNotice::Applied);
            return Some(Command::CalibrateTemperature(calibration.temperature_target_c));
        }
        (MenuMode::CalibrationPpmConfirm, Control::Toggle) => {
            state.menu_mode = MenuMode::CalibrationPpm;
        }
        (MenuMode::CalibrationTemperatureConfirm, Control::Toggle) => {
            state.menu_mode = MenuMode::CalibrationTemperature;
        }

        (MenuMode::Wifi, Control::Toggle) => {
            if !state.wifi.config_running {
                state.wifi.activated = !state.wifi.activated;
            }
        }
        (MenuMode::Wifi, Control::Action) => state.wifi.requesting_reset = true,

        (MenuMode::Time, Control::Wide) => state.force_sync = true,
        (MenuMode::Update, Control::Wide) => state.firmware.is_requesting_update = true,

        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn all_visible() -> ControlSet {
        let mut controls = ControlSet::default();
        for control in Control::ALL {
            controls.show(control);
        }
        controls
    }

    fn tap(control: Control) -> InputEvent {
        InputEvent::Touch(control.rect().center())
    }

    #[test]
    fn button_a_toggles_display_in_graphs() {
        let mut state = DeviceState::new(2, 0);
        let controls = ControlSet::default();

        assert_eq!(
            apply_input(InputEvent::ButtonA, &mut state, &controls),
            Some(Command::SetDisplayPower(false))
        );
        assert!(state.display_sleep);

        assert_eq!(
            apply_input(InputEvent::ButtonA, &mut state, &controls),
            Some(Command::SetDisplayPower(true))
        );
        assert!(!state.display_sleep);

        state.menu_mode = MenuMode::Mqtt;
        assert_eq!(apply_input(InputEvent::ButtonA, &mut state, &controls), None);
        assert_eq!(state.menu_mode, MenuMode::Graphs);
    }

    #[test]
    fn graph_buttons_pick_the_series() {
        let mut state = DeviceState::new(2, 0);
        let controls = all_visible();

        apply_input(tap(Control::Battery), &mut state, &controls);
        assert_eq!(state.graph_mode, GraphMode::BatteryMah);
        apply_input(tap(Control::MidLeft), &mut state, &controls);
        assert_eq!(state.graph_mode, GraphMode::Temperature);
        apply_input(tap(Control::MidRight), &mut state, &controls);
        assert_eq!(state.graph_mode, GraphMode::Humidity);
        apply_input(InputEvent::Touch(Point::new(160, 50)), &mut state, &controls);
        assert_eq!(state.graph_mode, GraphMode::Co2);
    }

    #[test]
    fn ppm_target_steps_within_bounds() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::CalibrationPpm;
        let controls = all_visible();

        apply_input(tap(Control::MidLeft), &mut state, &controls);
        assert_eq!(state.calibration.ppm_target, 400);

        apply_input(tap(Control::MidRight), &mut state, &controls);
        assert_eq!(state.calibration.ppm_target, 410);

        state.calibration.ppm_target = 1990;
        apply_input(tap(Control::MidRight), &mut state, &controls);
        apply_input(tap(Control::MidRight), &mut state, &controls);
        assert_eq!(state.calibration.ppm_target, 2000);
    }

    #[test]
    fn temperature_target_steps_by_half_degrees() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::CalibrationTemperature;
        let controls = all_visible();

        apply_input(tap(Control::MidRight), &mut state, &controls);
        assert_eq!(state.calibration.temperature_target_c, 22.5);

        state.calibration.temperature_target_c = 10.0;
        apply_input(tap(Control::MidLeft), &mut state, &controls);
        assert_eq!(state.calibration.temperature_target_c, 10.0);
    }

    #[test]
    fn confirming_recalibrates_and_returns_to_the_editor() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::CalibrationPpm;
        state.calibration.ppm_target = 420;
        let controls = all_visible();

        apply_input(tap(Control::Action), &mut state, &controls);
        assert_eq!(state.menu_mode, MenuMode::CalibrationPpmConfirm);

        assert_eq!(
            apply_input(tap(Control::Action), &mut state, &controls),
            Some(Command::ForceRecalibration(420))
        );
        assert_eq!(state.menu_mode, MenuMode::CalibrationPpm);
        assert_eq!(state.notices.calibration, Some(CalibrationNotice::Applied));
    }

    #[test]
    fn declining_changes_nothing() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::CalibrationTemperatureConfirm;
        let controls = all_visible();

        assert_eq!(apply_input(tap(Control::Toggle), &mut state, &controls), None);
        assert_eq!(state.menu_mode, MenuMode::CalibrationTemperature);
        assert_eq!(state.notices.calibration, None);
    }

    #[test]
    fn wifi_toggle_is_locked_while_the_portal_runs() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::Wifi;
        let controls = all_visible();

        apply_input(tap(Control::Toggle), &mut state, &controls);
        assert!(state.wifi.activated);

        state.wifi.config_running = true;
        apply_input(tap(Control::Toggle), &mut state, &controls);
        assert!(state.wifi.activated);

        apply_input(tap(Control::Action), &mut state, &controls);
        assert!(state.wifi.requesting_reset);
    }

    #[test]
    fn hidden_controls_are_ignored() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::Update;

        apply_input(tap(Control::Wide), &mut state, &ControlSet::default());

        assert!(!state.firmware.is_requesting_update);
    }
}
