use chrono::{Days, NaiveDateTime};
use log::{info, warn};
use rand::Rng;

use crate::{
    config::{bounded, VERSION_NUMBER_LEN},
    error::SyncError,
    firmware::FirmwareSource,
    state::DeviceState,
    types::{TimeSyncNotice, UpdateNotice},
};

/// Battery-backed wall clock that can be set from network time.
pub trait Clock {
    /// Local calendar time, `None` while the clock was never set.
    fn now_local(&mut self) -> Option<NaiveDateTime>;
    fn sync_network_time(&mut self) -> Result<(), SyncError>;
}

pub fn read_clock(clock: &mut dyn Clock, state: &mut DeviceState) {
    if let Some(now) = clock.now_local() {
        state.current_time = now;
    }
}

/// Flags a sync once per minute while the scheduled sync time lies in the past.
pub fn update_time_state(old: &DeviceState, state: &mut DeviceState) {
    if state.minute_changed(old) && state.current_time > state.next_time_sync {
        state.is_sync_needed = true;
    }
}

/// Tomorrow at `hour:minute`, relative to `now`.
pub fn next_sync_after(now: NaiveDateTime, hour: u32, minute: u32) -> NaiveDateTime {
    now.date()
        .checked_add_days(Days::new(1))
        .and_then(|date| date.and_hms_opt(hour.min(23), minute.min(59), 0))
        .unwrap_or(now)
}

fn sync_once(
    state: &mut DeviceState,
    clock: &mut dyn Clock,
    firmware: &mut dyn FirmwareSource,
) -> Result<(), SyncError> {
    let version = firmware.fetch_remote_version()?;
    state.firmware.newest_version = bounded(&version, VERSION_NUMBER_LEN);
    info!("newest firmware on server: {}", state.firmware.newest_version);

    clock.sync_network_time()?;
    read_clock(clock, state);
    Ok(())
}

/// Runs a forced or scheduled sync while the station is up.
pub fn sync_data<R>(
    state: &mut DeviceState,
    clock: &mut dyn Clock,
    firmware: &mut dyn FirmwareSource,
    sync_hour: u32,
    rng: &mut R,
) where
    R: Rng + ?Sized,
{
    if !state.wifi.status.is_connected() {
        return;
    }

    let scheduled = if state.force_sync {
        false
    } else if state.is_sync_needed {
        true
    } else {
        return;
    };

    match sync_once(state, clock, firmware) {
        Ok(()) => {
            state.notices.time = Some(TimeSyncNotice::Succeeded);
            if scheduled {
                state.next_time_sync =
                    next_sync_after(state.current_time, sync_hour, rng.random_range(0..60));
                info!("time synced, next sync at {}", state.next_time_sync);
            } else {
                info!("time synced on request");
            }
        }
        Err(err) => {
            warn!("sync failed: {err}");
            state.notices.time = Some(TimeSyncNotice::Failed);
        }
    }

    if scheduled {
        state.is_sync_needed = false;
    } else {
        state.force_sync = false;
    }
}

/// Installs the latest image when the user asked for it this tick. Returns whether the
/// device should restart into the new firmware.
pub fn handle_firmware(
    old: &DeviceState,
    state: &mut DeviceState,
    firmware: &mut dyn FirmwareSource,
) -> bool {
    if !state.firmware.is_requesting_update || old.firmware.is_requesting_update {
        return false;
    }
    state.firmware.is_requesting_update = false;

    if !state.wifi.status.is_connected() {
        warn!("firmware update requested without a station link");
        return false;
    }

    match firmware.install_latest() {
        Ok(written) => {
            info!("firmware image of {written} bytes installed, restarting");
            true
        }
        Err(err) => {
            warn!("firmware update failed: {err}");
            state.notices.update = Some(UpdateNotice::Failed);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        sim::{SimClock, SimFirmware},
        types::WifiStatus,
    };

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn connected() -> DeviceState {
        let mut state = DeviceState::new(2, 0);
        state.wifi.status = WifiStatus::Connected;
        state
    }

    #[test]
    fn next_sync_is_tomorrow_at_the_sync_hour() {
        assert_eq!(next_sync_after(at(7, 14, 33), 2, 41), at(8, 2, 41));
        assert_eq!(
            next_sync_after(at(31, 23, 59), 2, 0),
            NaiveDate::from_ymd_opt(2026, 4, 1)
                .unwrap()
                .and_hms_opt(2, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn first_minute_change_requests_a_sync() {
        let mut old = DeviceState::new(2, 17);
        old.current_time = at(7, 9, 0);
        let mut state = old.clone();

        state.current_time = old.current_time + Duration::seconds(30);
        update_time_state(&old, &mut state);
        assert!(!state.is_sync_needed);

        state.current_time = old.current_time + Duration::seconds(60);
        update_time_state(&old, &mut state);
        assert!(state.is_sync_needed);
    }

    #[test]
    fn scheduled_sync_reschedules_on_success() {
        let mut clock = SimClock::new(at(7, 3, 5));
        let mut firmware = SimFirmware::new("1.2.0");
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = connected();
        state.is_sync_needed = true;

        sync_data(&mut state, &mut clock, &mut firmware, 2, &mut rng);

        assert!(!state.is_sync_needed);
        assert_eq!(state.notices.time, Some(TimeSyncNotice::Succeeded));
        assert_eq!(state.firmware.newest_version, "1.2.0");
        assert_eq!(state.current_time, at(7, 3, 5));
        assert_eq!(state.next_time_sync.date(), at(8, 0, 0).date());
        assert_eq!(chrono::Timelike::hour(&state.next_time_sync), 2);
        assert_eq!(clock.syncs(), 1);
    }

    #[test]
    fn forced_sync_failure_sets_the_notice_and_keeps_schedule() {
        let mut clock = SimClock::new(at(7, 3, 5));
        clock.fail_syncs(true);
        let mut firmware = SimFirmware::new("1.2.0");
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = connected();
        state.force_sync = true;
        let schedule = state.next_time_sync;

        sync_data(&mut state, &mut clock, &mut firmware, 2, &mut rng);

        assert!(!state.force_sync);
        assert_eq!(state.notices.time, Some(TimeSyncNotice::Failed));
        assert_eq!(state.next_time_sync, schedule);
    }

    #[test]
    fn version_failure_skips_the_time_sync() {
        let mut clock = SimClock::new(at(7, 3, 5));
        let mut firmware = SimFirmware::new("1.2.0");
        firmware.fail_requests(true);
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = connected();
        state.is_sync_needed = true;

        sync_data(&mut state, &mut clock, &mut firmware, 2, &mut rng);

        assert_eq!(state.notices.time, Some(TimeSyncNotice::Failed));
        assert_eq!(clock.syncs(), 0);
        assert!(!state.is_sync_needed);
    }

    #[test]
    fn offline_sync_waits() {
        let mut clock = SimClock::new(at(7, 3, 5));
        let mut firmware = SimFirmware::new("1.2.0");
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = DeviceState::new(2, 0);
        state.force_sync = true;

        sync_data(&mut state, &mut clock, &mut firmware, 2, &mut rng);

        assert!(state.force_sync);
        assert_eq!(state.notices.time, None);
    }

    #[test]
    fn update_runs_once_per_request() {
        let mut firmware = SimFirmware::new("1.2.0");
        let old = connected();
        let mut state = old.clone();
        state.firmware.is_requesting_update = true;

        assert!(handle_firmware(&old, &mut state, &mut firmware));
        assert!(!state.firmware.is_requesting_update);
        assert_eq!(firmware.installs(), 1);

        let steady = state.clone();
        assert!(!handle_firmware(&steady, &mut state, &mut firmware));
        assert_eq!(firmware.installs(), 1);
    }

    #[test]
    fn failed_update_sets_the_notice() {
        let mut firmware = SimFirmware::new("1.2.0");
        firmware.fail_requests(true);
        let old = connected();
        let mut state = old.clone();
        state.firmware.is_requesting_update = true;

        assert!(!handle_firmware(&old, &mut state, &mut firmware));
        assert_eq!(state.notices.update, Some(UpdateNotice::Failed));
        assert!(!state.firmware.is_requesting_update);
    }
}
