use arrayvec::ArrayString;
use bytemuck::Zeroable;
use core::fmt::Write as _;
use tracing::{debug, trace, warn};

use crate::aggregate::{self, ANOMALY_INFO_ADC_BASE, ANOMALY_INFO_RTC};
use crate::buffer::{TelemetryBlock, TELEMETRY_CAPACITY};
use crate::drivers::Bus;
use crate::monitor;
use crate::state::{StatMonState, SECONDS_PER_DAY};
use crate::store::StateStore;

/// Channels carried by each ADC, in bus order. The sum is the sensor count.
pub const ADC_CHANNELS: [usize; 7] = [7, 6, 6, 7, 8, 4, 6];

/// Backlog at which acquisition drains the buffer to storage.
pub const FLUSH_THRESHOLD: usize = TELEMETRY_CAPACITY;

/// Only the low twelve bits of an ADC word are counts; the rest is
/// addressing.
const ADC_COUNT_MASK: u16 = 0x0FFF;

pub const TELEMETRY_FILE_NAME_LEN: usize = 12;

/// Name of the file holding a given epoch's telemetry: the day number as
/// eight zero-padded decimal digits, then `.TEL`.
pub fn day_filename(epoch: u32) -> ArrayString<TELEMETRY_FILE_NAME_LEN> {
    let days = epoch / SECONDS_PER_DAY;
    let mut name = ArrayString::new();
    write!(name, "{days:08}.TEL").ok();
    name
}

/// The 1 Hz acquisition tick. In order: one RTC read, every ADC channel in
/// bus order (a failed ADC leaves zeros and logs an anomaly), append to the
/// buffer, flush when the backlog reaches threshold, fold into the running
/// aggregates, settle the replicas, publish the live readings, and flag the
/// state machine to step the pending sequence on this tick's pass.
pub fn record_tick<B: Bus>(store: &mut StateStore, bus: &mut B) {
    let epoch = match bus.now_epoch() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "acquisition skipped, RTC unavailable");
            aggregate::store_anomaly(store, ANOMALY_INFO_RTC, 0);
            return;
        }
    };
    trace!(epoch, "telemetry tick");

    let mut block = TelemetryBlock::zeroed();
    block.epoch = epoch;

    let mut cursor = 0;
    for (adc, &channels) in ADC_CHANNELS.iter().enumerate() {
        let mut raw = [0u16; 8];
        match bus.read_adc(adc as u8, &mut raw[..channels]) {
            Ok(()) => {
                for (slot, word) in raw[..channels].iter().enumerate() {
                    block.readings[cursor + slot] = word & ADC_COUNT_MASK;
                }
            }
            Err(e) => {
                // Zeros remain in this ADC's slots.
                warn!(error = %e, adc, "ADC read failed");
                aggregate::store_anomaly(store, ANOMALY_INFO_ADC_BASE | adc as u16, epoch);
            }
        }
        cursor += channels;
    }

    let appended = store.update(|s| s.telemetry.put(&block));
    debug_assert!(appended, "telemetry buffer overran the flush threshold");

    if store.state().telemetry.count() >= FLUSH_THRESHOLD {
        flush(store, bus);
    }

    aggregate::store_block(store, &block);
    store.settle();
    store.update(|s| s.last_telemetry = block.readings);

    if store.state().ops.stat_mon_state != StatMonState::PendingProcess as u8 {
        monitor::change_stat_mon_state(store, StatMonState::PendingProcess);
    }
}

/// Drains the buffer into per-day `.TEL` files, rotating whenever the day
/// of a block differs from the currently open file. A failed open skips
/// that day's blocks but the drain continues; the buffer is cleared at the
/// end either way, so every block is written at most once.
pub fn flush<B: Bus>(store: &mut StateStore, bus: &mut B) {
    let mut snapshot = store.state().telemetry;
    let total = snapshot.count();
    if total == 0 {
        return;
    }

    let mut open_day: Option<u32> = None;
    let mut failed_day: Option<u32> = None;
    let mut written = 0usize;
    while let Some(block) = snapshot.get() {
        let day = block.epoch / SECONDS_PER_DAY;
        if open_day != Some(day) && failed_day != Some(day) {
            bus.storage_close();
            open_day = None;
            let name = day_filename(block.epoch);
            match bus.storage_open_day(&name) {
                Ok(()) => {
                    open_day = Some(day);
                    failed_day = None;
                }
                Err(e) => {
                    warn!(error = %e, file = %name, "telemetry file open failed");
                    failed_day = Some(day);
                }
            }
        }
        if open_day == Some(day) {
            match bus.storage_append(bytemuck::bytes_of(&block)) {
                Ok(()) => written += 1,
                Err(e) => warn!(error = %e, "telemetry block write failed"),
            }
        }
    }
    bus.storage_close();

    debug!(written, total, "telemetry flush complete");
    store.update(|s| s.telemetry.clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_filename_format() {
        assert_eq!(day_filename(0).as_str(), "00000000.TEL");
        assert_eq!(day_filename(86_399).as_str(), "00000000.TEL");
        assert_eq!(day_filename(86_400).as_str(), "00000001.TEL");
        assert_eq!(day_filename(172_800).as_str(), "00000002.TEL");
        assert_eq!(day_filename(u32::MAX).as_str(), "00049710.TEL");
    }

    #[test]
    fn test_adc_channel_map_covers_all_sensors() {
        assert_eq!(
            ADC_CHANNELS.iter().sum::<usize>(),
            crate::state::NUM_SENSORS
        );
    }
}
