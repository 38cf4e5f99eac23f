use embedded_graphics::{
    mono_font::{MonoFont, MonoTextStyle},
    pixelcolor::Rgb565,
    prelude::*,
    text::{Text, TextStyle},
};

use super::{
    controls::{draw_button, Control, ControlSet},
    palette::{BLACK, CYAN, GREEN, RED, WHITE},
    regions::BODY,
    styles::{BUTTON_FONT, EDITOR_FONT, TEXT_FONT, TITLE_FONT, TOP_LEFT},
};
use crate::{
    firmware::need_firmware_update,
    severity::Severity,
    state::DeviceState,
    types::{CalibrationNotice, MenuMode, TimeSyncNotice, UpdateNotice, WifiNotice},
};

const PORTAL_URL: &str = "Open http://192.168.4.1";

/// Values the body needs that live outside [`DeviceState`].
pub struct BodyContext<'a> {
    pub ap_ssid: &'a str,
    pub firmware_version: &'a str,
}

fn text<D>(target: &mut D, content: &str, x: i32, y: i32, font: &MonoFont<'_>, color: Rgb565) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    text_styled(target, content, Point::new(x, y), font, color, TOP_LEFT)
}

fn text_styled<D>(
    target: &mut D,
    content: &str,
    position: Point,
    font: &MonoFont<'_>,
    color: Rgb565,
    style: TextStyle,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    Text::with_text_style(content, position, MonoTextStyle::new(font, color), style).draw(target)?;
    Ok(())
}

/// Keeps `keep` characters and appends `...` once `value` is longer than `limit`.
pub fn ellipsize(value: &str, limit: usize, keep: usize) -> String {
    if value.chars().count() > limit {
        let head: String = value.chars().take(keep).collect();
        format!("{head}...")
    } else {
        value.to_string()
    }
}

fn or_not_configured(value: &str) -> &str {
    if value.is_empty() {
        "Not Configured"
    } else {
        value
    }
}

/// Repaints the settings body for `state.menu_mode` and re-shows its controls.
pub fn draw_body<D>(
    target: &mut D,
    state: &DeviceState,
    context: &BodyContext<'_>,
    controls: &mut ControlSet,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    controls.hide_all();
    {
        let mut area = target.cropped(&BODY);
        area.clear(BLACK)?;
        match state.menu_mode {
            MenuMode::Graphs => {}
            MenuMode::CalibrationPpm => calibration_ppm(&mut area, state)?,
            MenuMode::CalibrationTemperature => calibration_temperature(&mut area, state)?,
            MenuMode::CalibrationPpmConfirm => {
                confirmation(&mut area, &format!("{}ppm", state.calibration.ppm_target))?
            }
            MenuMode::CalibrationTemperatureConfirm => confirmation(
                &mut area,
                &format!("{:.1}C", state.calibration.temperature_target_c),
            )?,
            MenuMode::Wifi => wifi(&mut area, state, context)?,
            MenuMode::Mqtt => mqtt(&mut area, state, context)?,
            MenuMode::Time => time(&mut area, state)?,
            MenuMode::Update => update(&mut area, state, context)?,
        }
    }

    let mut button = |control: Control, label: &str, color: Rgb565| -> Result<(), D::Error> {
        controls.show(control);
        draw_button(target, control, label, color)
    };

    match state.menu_mode {
        MenuMode::Graphs | MenuMode::Mqtt => {}
        MenuMode::CalibrationPpm | MenuMode::CalibrationTemperature => {
            button(Control::MidLeft, "-", WHITE)?;
            button(Control::MidRight, "+", WHITE)?;
            let auto_on = state.calibration.auto_on;
            button(
                Control::Toggle,
                if auto_on { "Auto Cal: ON" } else { "Auto Cal: OFF" },
                if auto_on { GREEN } else { RED },
            )?;
            if !auto_on || state.menu_mode == MenuMode::CalibrationTemperature {
                button(Control::Action, "Calibrate", CYAN)?;
            }
        }
        MenuMode::CalibrationPpmConfirm | MenuMode::CalibrationTemperatureConfirm => {
            button(Control::Toggle, "NO", RED)?;
            button(Control::Action, "YES", GREEN)?;
        }
        MenuMode::Wifi => {
            let activated = state.wifi.activated;
            button(
                Control::Toggle,
                if activated { "ON" } else { "OFF" },
                if activated { GREEN } else { RED },
            )?;
            if activated {
                button(Control::Action, "Reset", CYAN)?;
            }
        }
        MenuMode::Time => {
            if state.wifi.status.is_connected() {
                button(Control::Wide, "Synchronize", CYAN)?;
            }
        }
        MenuMode::Update => {
            if need_firmware_update(context.firmware_version, &state.firmware.newest_version) {
                button(Control::Wide, "Update Firmware", CYAN)?;
            }
        }
    }
    Ok(())
}

fn calibration_ppm<D>(area: &mut D, state: &DeviceState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let target = state.calibration.ppm_target;
    text(area, "Calibration: ", 45, 5, EDITOR_FONT, WHITE)?;
    text(area, &format!("{target}ppm"), 80, 30, TITLE_FONT, Severity::of_ppm(target).color())?;
    calibration_notice(area, state)
}

fn calibration_temperature<D>(area: &mut D, state: &DeviceState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let target = state.calibration.temperature_target_c;
    text(area, "Temperature: ", 45, 5, EDITOR_FONT, WHITE)?;
    text(area, &format!("{target:.1}C"), 100, 30, TITLE_FONT, WHITE)?;
    calibration_notice(area, state)
}

fn calibration_notice<D>(area: &mut D, state: &DeviceState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    if state.notices.calibration == Some(CalibrationNotice::Applied) {
        text(area, "Calibration Successful", 35, 130, TEXT_FONT, GREEN)?;
    }
    Ok(())
}

fn confirmation<D>(area: &mut D, value: &str) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    text(area, "Attention! ", 65, 20, EDITOR_FONT, WHITE)?;
    text(area, "Change Calibration", 30, 55, BUTTON_FONT, WHITE)?;
    text(area, &format!("to {value} ?"), 85, 80, BUTTON_FONT, WHITE)?;
    text(area, "This can't be undone.", 20, 105, BUTTON_FONT, WHITE)
}

fn wifi<D>(area: &mut D, state: &DeviceState, context: &BodyContext<'_>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    text(area, "WiFi", 75, 10, TITLE_FONT, WHITE)?;

    match state.notices.wifi {
        Some(WifiNotice::PortalCredentials) => {
            text(area, &format!("AP SSID : {}", context.ap_ssid), 15, 80, TEXT_FONT, WHITE)?;
            text(area, &format!("Password: {}", state.portal_password), 15, 100, TEXT_FONT, WHITE)?;
            text(area, PORTAL_URL, 15, 120, TEXT_FONT, WHITE)?;
        }
        Some(WifiNotice::Connected) => {
            let ip = state
                .wifi
                .local_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            text(
                area,
                &format!("Connected: {}", ellipsize(&state.wifi.ssid, 18, 15)),
                15,
                90,
                TEXT_FONT,
                WHITE,
            )?;
            text(area, &format!("Local IP : {ip}"), 15, 110, TEXT_FONT, WHITE)?;
        }
        Some(WifiNotice::Lost) => text(area, "Connection lost", 70, 90, TEXT_FONT, RED)?,
        Some(WifiNotice::Failed) => text(area, "Connection failed", 65, 90, TEXT_FONT, RED)?,
        None => {}
    }
    Ok(())
}

fn mqtt<D>(area: &mut D, state: &DeviceState, context: &BodyContext<'_>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    text(area, "MQTT", 75, 10, TITLE_FONT, WHITE)?;
    if state.is_mqtt_connected {
        text(area, "Connected", 100, 80, TEXT_FONT, GREEN)?;
    } else {
        text(area, "Not Connected", 85, 80, TEXT_FONT, RED)?;
    }

    let broker = &state.broker;
    let server = ellipsize(or_not_configured(&broker.server), 18, 14);
    let device = ellipsize(broker.client_id(context.ap_ssid), 18, 14);
    text(area, &format!("Server: {server}"), 15, 100, TEXT_FONT, WHITE)?;
    text(area, &format!("Port  : {}", or_not_configured(&broker.port)), 15, 115, TEXT_FONT, WHITE)?;
    text(area, &format!("Device: {device}"), 15, 130, TEXT_FONT, WHITE)
}

fn offline_warning<D>(area: &mut D, headline: &str, x: i32) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    text(area, headline, x, 150, TEXT_FONT, RED)?;
    text(area, "WiFi is not connected", 40, 170, TEXT_FONT, RED)
}

fn time<D>(area: &mut D, state: &DeviceState) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    text(area, "Sync", 75, 10, TITLE_FONT, WHITE)?;
    text(area, "Sync time & firmware", 40, 80, TEXT_FONT, WHITE)?;
    text(area, "with online Servers.", 40, 95, TEXT_FONT, WHITE)?;

    match state.notices.time {
        Some(TimeSyncNotice::Succeeded) => text(area, "Sync successful", 75, 115, TEXT_FONT, GREEN)?,
        Some(TimeSyncNotice::Failed) => text(area, "Sync Failed", 80, 115, TEXT_FONT, RED)?,
        None => {}
    }

    if !state.wifi.status.is_connected() {
        offline_warning(area, "Can not synchronize", 45)?;
    }
    Ok(())
}

fn update<D>(area: &mut D, state: &DeviceState, context: &BodyContext<'_>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let newest = match state.firmware.newest_version.as_str() {
        "" => "N/A",
        version => version,
    };

    text(area, "Updates", 15, 10, TITLE_FONT, WHITE)?;
    text(area, &format!("Version: {}", context.firmware_version), 80, 80, TEXT_FONT, WHITE)?;
    text(area, &format!("Newest : {newest}"), 80, 100, TEXT_FONT, WHITE)?;

    if state.notices.update == Some(UpdateNotice::Failed) {
        text(area, "Update failed!", 40, 120, TEXT_FONT, RED)?;
    }
    if !state.wifi.status.is_connected() {
        offline_warning(area, "Can not update device", 35)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{sim::CountingDisplay, types::WifiStatus};

    const CONTEXT: BodyContext<'static> = BodyContext {
        ap_ssid: "SMOCA CO2-ABC123",
        firmware_version: "1.1.9",
    };

    fn visible(controls: &ControlSet) -> Vec<Control> {
        Control::ALL
            .into_iter()
            .filter(|control| controls.is_visible(*control))
            .collect()
    }

    fn draw(state: &DeviceState) -> ControlSet {
        let mut display = CountingDisplay::default();
        let mut controls = ControlSet::default();
        draw_body(&mut display, state, &CONTEXT, &mut controls).unwrap();
        controls
    }

    #[test]
    fn long_names_are_shortened() {
        assert_eq!(ellipsize("broker.example.internal", 18, 14), "broker.example...");
        assert_eq!(ellipsize("short", 18, 14), "short");
        assert_eq!(ellipsize("exactly-eighteen-c", 18, 14), "exactly-eighteen-c");
    }

    #[test]
    fn calibrate_button_hides_while_auto_calibrating() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::CalibrationPpm;

        assert_eq!(
            visible(&draw(&state)),
            vec![Control::MidLeft, Control::MidRight, Control::Toggle, Control::Action]
        );

        state.calibration.auto_on = true;
        assert_eq!(
            visible(&draw(&state)),
            vec![Control::MidLeft, Control::MidRight, Control::Toggle]
        );
    }

    #[test]
    fn sync_button_needs_a_connection() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::Time;
        assert_eq!(visible(&draw(&state)), Vec::<Control>::new());

        state.wifi.status = WifiStatus::Connected;
        assert_eq!(visible(&draw(&state)), vec![Control::Wide]);
    }

    #[test]
    fn update_button_follows_the_newest_version() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::Update;
        state.firmware.newest_version = "1.1.9".to_string();
        assert_eq!(visible(&draw(&state)), Vec::<Control>::new());

        state.firmware.newest_version = "1.2.0".to_string();
        assert_eq!(visible(&draw(&state)), vec![Control::Wide]);
    }

    #[test]
    fn wifi_reset_only_when_activated() {
        let mut state = DeviceState::new(2, 0);
        state.menu_mode = MenuMode::Wifi;
        assert_eq!(visible(&draw(&state)), vec![Control::Toggle]);

        state.wifi.activated = true;
        assert_eq!(visible(&draw(&state)), vec![Control::Toggle, Control::Action]);
    }
}
