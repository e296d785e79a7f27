use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use tracing::debug;

use crate::buffer::TelemetryBlock;
use crate::state::NUM_SENSORS;
use crate::store::StateStore;

pub const ANOMALY_SLOTS: usize = 5;
pub const BATT_SLOTS: usize = 3;

/// Spacecraft battery temperature channel, sampled into the delta ring.
pub const BATTERY_SENSOR: usize = 27;

/// Downlink layout: 14 bytes per sensor, then delta temp, main state, and
/// the anomaly ring.
pub const SENSOR_EXPORT_BYTES: usize = 14;
pub const EXPORT_BYTES: usize = NUM_SENSORS * SENSOR_EXPORT_BYTES + 3 + ANOMALY_SLOTS * 6;
const_assert_eq!(EXPORT_BYTES, 649);

/// Anomaly-ring info codes for faults detected inside the core.
pub const ANOMALY_INFO_RTC: u16 = 0x0100;
pub const ANOMALY_INFO_ADC_BASE: u16 = 0x0200;
pub const ANOMALY_INFO_BAD_STATE: u16 = 0x0300;
pub const ANOMALY_INFO_DIAGNOSTIC: u16 = 0x0400;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SensorAggregate {
    pub n: u16,
    pub hi_val: u16,
    pub low_val: u16,
    pub avg: u16,
    pub hi_time: u32,
    pub low_time: u32,
}

/// Running per-sensor statistics plus the two small rings: the five most
/// recent anomalies and the three most recent battery temperatures.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BasicTelemetry {
    pub sensors: [SensorAggregate; NUM_SENSORS],
    pub anomaly_time: [u32; ANOMALY_SLOTS],
    pub batt_recent_temp: [u16; BATT_SLOTS],
    pub batt_delta_temp: i16,
    pub anomaly_info: [u16; ANOMALY_SLOTS],
    pub anomaly_slot: u8,
    pub batt_slot: u8,
}

impl BasicTelemetry {
    fn update_sensor(&mut self, index: usize, reading: u16, epoch: u32) {
        let agg = &mut self.sensors[index];
        // Running mean reconstructed through a 32-bit sum: readings are
        // 12-bit, so the product has twenty bits of headroom.
        let sum = u32::from(agg.avg) * u32::from(agg.n) + u32::from(reading);
        agg.n = agg.n.saturating_add(1);
        agg.avg = (sum / u32::from(agg.n)) as u16;

        // Ties record the most recent occurrence; the first sample seeds
        // both extremes.
        if reading >= agg.hi_val || agg.n == 1 {
            agg.hi_val = reading;
            agg.hi_time = epoch;
        }
        if reading <= agg.low_val || agg.n == 1 {
            agg.low_val = reading;
            agg.low_time = epoch;
        }
    }

    /// Pushes a battery temperature into the three-slot ring; the delta is
    /// against the value it overwrites, i.e. the oldest of the three.
    pub fn record_batt_temp(&mut self, battery: u16) {
        let slot = usize::from(self.batt_slot);
        self.batt_delta_temp = battery.wrapping_sub(self.batt_recent_temp[slot]) as i16;
        self.batt_recent_temp[slot] = battery;
        self.batt_slot = ((slot + 1) % BATT_SLOTS) as u8;
    }

    pub fn record_anomaly(&mut self, info: u16, time: u32) {
        let slot = usize::from(self.anomaly_slot);
        self.anomaly_info[slot] = info;
        self.anomaly_time[slot] = time;
        self.anomaly_slot = ((slot + 1) % ANOMALY_SLOTS) as u8;
    }

    /// True when every field is zero. OR-accumulation instead of counting
    /// so the check cannot wrap.
    pub fn is_cleared(&self) -> bool {
        let mut chk: u32 = 0;
        for agg in &self.sensors {
            chk |= u32::from(agg.n | agg.hi_val | agg.low_val | agg.avg);
            chk |= agg.hi_time | agg.low_time;
        }
        for i in 0..ANOMALY_SLOTS {
            chk |= self.anomaly_time[i] | u32::from(self.anomaly_info[i]);
        }
        for &t in &self.batt_recent_temp {
            chk |= u32::from(t);
        }
        chk |= self.batt_delta_temp as u16 as u32;
        chk |= u32::from(self.anomaly_slot) | u32::from(self.batt_slot);
        chk == 0
    }

    /// Packs the whole structure for downlink, all multi-byte values
    /// MSB-first: per sensor `hi(2) hiTime(4) low(2) lowTime(4) avg(2)`,
    /// then `battDelta(2) mainState(1)` and five `info(2) time(4)` pairs.
    pub fn export(&self, main_state: u8) -> [u8; EXPORT_BYTES] {
        let mut out = [0u8; EXPORT_BYTES];
        for (i, agg) in self.sensors.iter().enumerate() {
            let base = i * SENSOR_EXPORT_BYTES;
            out[base..base + 2].copy_from_slice(&agg.hi_val.to_be_bytes());
            out[base + 2..base + 6].copy_from_slice(&agg.hi_time.to_be_bytes());
            out[base + 6..base + 8].copy_from_slice(&agg.low_val.to_be_bytes());
            out[base + 8..base + 12].copy_from_slice(&agg.low_time.to_be_bytes());
            out[base + 12..base + 14].copy_from_slice(&agg.avg.to_be_bytes());
        }
        let mut base = NUM_SENSORS * SENSOR_EXPORT_BYTES;
        out[base..base + 2].copy_from_slice(&self.batt_delta_temp.to_be_bytes());
        out[base + 2] = main_state;
        base += 3;
        for i in 0..ANOMALY_SLOTS {
            let at = base + i * 6;
            out[at..at + 2].copy_from_slice(&self.anomaly_info[i].to_be_bytes());
            out[at + 2..at + 6].copy_from_slice(&self.anomaly_time[i].to_be_bytes());
        }
        out
    }
}

/// Folds one acquisition block into the running aggregates. Every tenth
/// second of epoch time also samples the battery temperature ring.
pub fn store_block(store: &mut StateStore, block: &TelemetryBlock) {
    store.update(|s| {
        for i in 0..NUM_SENSORS {
            s.basic.update_sensor(i, block.readings[i], block.epoch);
        }
        if block.epoch % 10 == 0 {
            s.basic.record_batt_temp(block.readings[BATTERY_SENSOR]);
        }
    });
}

pub fn store_anomaly(store: &mut StateStore, info: u16, time: u32) {
    debug!(info, time, "recording anomaly");
    store.update(|s| s.basic.record_anomaly(info, time));
}

/// Clears the aggregates. The most recent battery temperature survives: it
/// is replayed three times into the ring so the delta restarts at zero
/// instead of a garbage transient. Returns whether the cleared image
/// verified as all-zero.
pub fn reset(store: &mut StateStore) -> bool {
    let backup = {
        let basic = &store.state().basic;
        let newest = (usize::from(basic.batt_slot) + BATT_SLOTS - 1) % BATT_SLOTS;
        basic.batt_recent_temp[newest]
    };
    store.update(|s| s.basic = BasicTelemetry::zeroed());
    let cleared = store.state().basic.is_cleared();
    store.update(|s| {
        for _ in 0..BATT_SLOTS {
            s.basic.record_batt_temp(backup);
        }
    });
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_both_extremes() {
        let mut basic = BasicTelemetry::zeroed();
        basic.update_sensor(0, 100, 7);
        let agg = &basic.sensors[0];
        assert_eq!(agg.n, 1);
        assert_eq!(agg.avg, 100);
        assert_eq!((agg.hi_val, agg.hi_time), (100, 7));
        assert_eq!((agg.low_val, agg.low_time), (100, 7));
    }

    #[test]
    fn test_running_mean_and_tie_timestamps() {
        let mut basic = BasicTelemetry::zeroed();
        basic.update_sensor(2, 100, 1);
        basic.update_sensor(2, 200, 2);
        basic.update_sensor(2, 150, 3);
        let agg = &basic.sensors[2];
        assert_eq!(agg.n, 3);
        assert_eq!(agg.avg, 150);
        assert_eq!((agg.hi_val, agg.hi_time), (200, 2));
        assert_eq!((agg.low_val, agg.low_time), (100, 1));

        // A tie with the recorded extreme refreshes the timestamp.
        basic.update_sensor(2, 200, 9);
        assert_eq!(basic.sensors[2].hi_time, 9);
    }

    #[test]
    fn test_batt_delta_is_newest_minus_oldest() {
        let mut basic = BasicTelemetry::zeroed();
        basic.record_batt_temp(1000);
        basic.record_batt_temp(1010);
        basic.record_batt_temp(1025);
        // Ring full; the next sample overwrites 1000.
        basic.record_batt_temp(1031);
        assert_eq!(basic.batt_delta_temp, 31);
    }

    #[test]
    fn test_anomaly_ring_wraps_at_five() {
        let mut basic = BasicTelemetry::zeroed();
        for i in 0..6u16 {
            basic.record_anomaly(0x100 + i, u32::from(i));
        }
        // Slot 0 was overwritten by the sixth record.
        assert_eq!(basic.anomaly_info[0], 0x105);
        assert_eq!(basic.anomaly_info[1], 0x101);
        assert_eq!(basic.anomaly_slot, 1);
    }

    #[test]
    fn test_reset_preserves_battery_temperature() {
        let mut store = StateStore::new();
        store.update(|s| {
            s.basic.record_batt_temp(900);
            s.basic.record_batt_temp(950);
            s.basic.record_anomaly(0xBEEF, 42);
        });
        assert!(reset(&mut store));
        let basic = &store.state().basic;
        assert_eq!(basic.batt_recent_temp, [950; BATT_SLOTS]);
        assert_eq!(basic.batt_delta_temp, 0);
        assert_eq!(basic.anomaly_info, [0; ANOMALY_SLOTS]);
    }

    #[test]
    fn test_export_layout() {
        let mut basic = BasicTelemetry::zeroed();
        basic.update_sensor(0, 0x0123, 0x0A0B0C0D);
        basic.record_anomaly(0x1122, 0x33445566);
        let out = basic.export(5);

        assert_eq!(&out[0..2], &[0x01, 0x23]); // hiVal
        assert_eq!(&out[2..6], &[0x0A, 0x0B, 0x0C, 0x0D]); // hiTime
        assert_eq!(&out[6..8], &[0x01, 0x23]); // lowVal
        assert_eq!(&out[12..14], &[0x01, 0x23]); // avg
        let tail = NUM_SENSORS * SENSOR_EXPORT_BYTES;
        assert_eq!(out[tail + 2], 5); // mainState
        assert_eq!(&out[tail + 3..tail + 5], &[0x11, 0x22]);
        assert_eq!(&out[tail + 5..tail + 9], &[0x33, 0x44, 0x55, 0x66]);
    }
}
