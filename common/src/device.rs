use std::fmt::Debug;

use embedded_graphics::{pixelcolor::Rgb565, prelude::DrawTarget};
use log::{info, warn};
use rand::{distr::Alphanumeric, rngs::StdRng, Rng, SeedableRng};

use crate::{
    air::{apply_sample, offset_for_target, start_sensor, AirSensor},
    battery::{poll_battery, PowerMonitor},
    config::{PersistedState, RuntimeConfig, PORTAL_PASSWORD_LEN},
    datalog::{format_line, DataLog, DATALOG_HEADER},
    error::DeviceError,
    firmware::{FirmwareSource, FIRMWARE_VERSION},
    history::GraphHistory,
    input::{apply_input, Command, InputEvent},
    link::{update_wifi_notice, BrokerClient, LinkPorts, NetworkLinkManager, Provisioner, WifiRadio},
    render::{DisplayDiffRenderer, RenderReport},
    state::DeviceState,
    storage::{self, KeyValueStore},
    sync::{handle_firmware, read_clock, sync_data, update_time_state, Clock},
};

/// Access point name shown on the WiFi screen and used as the default broker client id.
pub fn access_point_name(chip_id: u32) -> String {
    format!("SMOCA CO2-{chip_id:X}")
}

/// The hardware the device drives, one trait object per peripheral.
pub struct Board {
    pub sensor: Box<dyn AirSensor>,
    pub power: Box<dyn PowerMonitor>,
    pub clock: Box<dyn Clock>,
    pub radio: Box<dyn WifiRadio>,
    pub broker: Box<dyn BrokerClient>,
    pub portal: Box<dyn Provisioner>,
    pub store: Box<dyn KeyValueStore>,
    pub firmware: Box<dyn FirmwareSource>,
    pub datalog: Option<Box<dyn DataLog>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub render: RenderReport,
    pub restart_requested: bool,
}

/// Owns the state record and runs one fixed-rate tick at a time.
pub struct Device<D> {
    board: Board,
    display: D,
    runtime: RuntimeConfig,
    state: DeviceState,
    history: GraphHistory,
    manager: NetworkLinkManager,
    renderer: DisplayDiffRenderer,
    rng: StdRng,
    cycle: u64,
    first_frame: bool,
}

impl<D> Device<D>
where
    D: DrawTarget<Color = Rgb565>,
    D::Error: Debug,
{
    pub fn boot(
        mut board: Board,
        mut display: D,
        runtime: RuntimeConfig,
        ap_ssid: String,
        seed: u64,
    ) -> Result<Self, DeviceError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = DeviceState::new(runtime.time_sync_hour, rng.random_range(0..60));
        let mut renderer = DisplayDiffRenderer::new(ap_ssid.clone(), FIRMWARE_VERSION);

        match storage::load_persisted(board.store.as_mut()) {
            Ok(Some(persisted)) => persisted.apply_to(&mut state),
            Ok(None) => info!("no state record yet, using defaults"),
            Err(err) => warn!("state record unreadable: {err}"),
        }

        if state.portal_password.len() < PORTAL_PASSWORD_LEN {
            state.portal_password = (&mut rng)
                .sample_iter(Alphanumeric)
                .take(PORTAL_PASSWORD_LEN)
                .map(char::from)
                .collect();
            let persisted = PersistedState::from_state(&state);
            if let Err(err) = storage::save_persisted(board.store.as_mut(), &persisted) {
                warn!("failed to persist portal password: {err}");
            }
        }

        state.broker = storage::load_broker(board.store.as_mut()).unwrap_or_else(|err| {
            warn!("broker config unreadable: {err}");
            Default::default()
        });
        board.broker.configure(&state.broker);

        let credentials = storage::load_credentials(board.store.as_mut()).unwrap_or_else(|err| {
            warn!("wifi credentials unreadable: {err}");
            Default::default()
        });

        if let Err(err) = start_sensor(board.sensor.as_mut(), state.calibration.auto_on) {
            if let Err(draw_err) = renderer.draw_sensor_fault(&mut display) {
                warn!("failed to draw sensor fault: {draw_err:?}");
            }
            return Err(err.into());
        }

        if let Some(datalog) = board.datalog.as_mut() {
            if datalog.is_present() {
                if let Err(err) = datalog.start(DATALOG_HEADER) {
                    warn!("data log unavailable: {err}");
                }
            }
        }

        read_clock(board.clock.as_mut(), &mut state);
        board.power.set_display_power(true);

        let manager = NetworkLinkManager::new(
            runtime.timings.clone(),
            runtime.discovery,
            ap_ssid,
            credentials,
        );
        let history = GraphHistory::new(runtime.graph_window);
        info!(
            "device booted, firmware {FIRMWARE_VERSION}, wifi {}",
            if state.wifi.activated { "on" } else { "off" }
        );

        Ok(Self {
            board,
            display,
            runtime,
            state,
            history,
            manager,
            renderer,
            rng,
            cycle: 0,
            first_frame: true,
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn history(&self) -> &GraphHistory {
        &self.history
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn frame_duration_ms(&self) -> u64 {
        self.runtime.frame_duration_ms()
    }

    pub fn tick(&mut self, now_ms: u64, inputs: &[InputEvent]) -> TickReport {
        let fps = u64::from(self.runtime.target_fps.max(1));
        let cycle = self.cycle;
        self.cycle += 1;

        let old = self.state.clone();
        let state = &mut self.state;

        for event in inputs {
            if let Some(command) = apply_input(*event, state, self.renderer.controls()) {
                execute(&mut self.board, state, command);
            }
        }

        if cycle % fps == 0 {
            read_clock(self.board.clock.as_mut(), state);
            poll_battery(self.board.power.as_mut(), &mut state.battery);
        }
        if cycle % (2 * fps) == 2 {
            match self.board.sensor.read() {
                Ok(Some(sample)) => apply_sample(state, &sample),
                Ok(None) => {}
                Err(err) => warn!("air sensor read failed: {err}"),
            }
        }

        self.history.record(&old, state);
        if state.battery.in_ac != old.battery.in_ac {
            self.board.power.set_charge_led(state.battery.in_ac);
        }
        update_time_state(&old, state);

        state.is_mqtt_connected = self.board.broker.poll();
        state.wifi.status = self.board.radio.status();
        state.wifi.ssid = self.board.radio.connected_ssid().unwrap_or_default();
        state.wifi.local_ip = self.board.radio.local_ip();
        update_wifi_notice(&old, state);

        let mut ports = LinkPorts {
            radio: self.board.radio.as_mut(),
            broker: self.board.broker.as_mut(),
            portal: self.board.portal.as_mut(),
            store: self.board.store.as_mut(),
        };
        self.manager.tick(now_ms, &old, state, &mut ports);

        sync_data(
            state,
            self.board.clock.as_mut(),
            self.board.firmware.as_mut(),
            self.runtime.time_sync_hour,
            &mut self.rng,
        );
        let restart_requested = handle_firmware(&old, state, self.board.firmware.as_mut());

        if state.menu_mode != old.menu_mode {
            state.notices.retain_for(state.menu_mode);
        }

        let render = self.render(&old);

        if let Err(err) = storage::save_state_if_changed(self.board.store.as_mut(), &old, &self.state) {
            warn!("failed to persist state: {err}");
        }

        if cycle % (2 * fps) == 3 {
            self.append_log();
        }

        TickReport {
            render,
            restart_requested,
        }
    }

    fn render(&mut self, old: &DeviceState) -> RenderReport {
        // A sleeping predecessor makes the first frame repaint every region.
        let forced;
        let old = if self.first_frame {
            self.first_frame = false;
            forced = DeviceState {
                display_sleep: true,
                ..old.clone()
            };
            &forced
        } else {
            old
        };

        match self
            .renderer
            .render(&mut self.display, old, &self.state, &self.history)
        {
            Ok(report) => report,
            Err(err) => {
                warn!("display draw failed: {err:?}");
                RenderReport::default()
            }
        }
    }

    fn append_log(&mut self) {
        let Some(datalog) = self.board.datalog.as_mut() else {
            return;
        };
        if !datalog.is_present() {
            return;
        }
        if let Err(err) = datalog.append(&format_line(&self.state)) {
            warn!("data log append failed: {err}");
        }
    }
}

fn execute(board: &mut Board, state: &DeviceState, command: Command) {
    let result = match command {
        Command::SetDisplayPower(on) => {
            board.power.set_display_power(on);
            Ok(())
        }
        Command::SetAutoCalibration(enabled) => {
            info!("auto calibration {}", if enabled { "on" } else { "off" });
            board.sensor.set_auto_calibration(enabled)
        }
        Command::ForceRecalibration(ppm) => {
            info!("forcing recalibration to {ppm} ppm");
            board.sensor.force_recalibration(ppm)
        }
        Command::CalibrateTemperature(target_c) => board
            .sensor
            .temperature_offset()
            .and_then(|offset| {
                let offset = offset_for_target(offset, state.temperature_c(), target_c);
                info!("temperature offset set to {offset:.2} C");
                board.sensor.set_temperature_offset(offset)
            }),
    };

    if let Err(err) = result {
        warn!("sensor command failed: {err}");
    }
}
