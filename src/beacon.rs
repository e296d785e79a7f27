use arrayvec::ArrayString;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::SystemState;
use crate::store::StateStore;

pub const BEACON_LEN: usize = 31;

/// Symbols available to the beacon: `0-9` and `A-Z` minus `E` and `T`,
/// which are reserved by the modulation scheme.
pub const ALPHABET_SIZE: u16 = 34;

/// Beacon power flag and the 31-character message, kept in replicated state.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BeaconState {
    pub enabled: u8,
    pub message: [u8; BEACON_LEN],
}

impl BeaconState {
    /// All positions at `'A'`, the nominal/minimum symbol, beacon enabled.
    pub fn nominal() -> Self {
        Self {
            enabled: 1,
            message: [b'A'; BEACON_LEN],
        }
    }
}

/// Position of each character in the beacon message. The first six are
/// software status fields written individually; the rest are recomputed
/// from live telemetry before every transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BeaconIndex {
    SoftwareState = 0,
    NvMemCheck = 1,
    PgmImgStatus = 2,
    VtMemCheck = 3,
    Faults = 4,
    ProcFaults = 5,
    ScBattV = 6,
    ScBattA = 7,
    ScBattT = 8,
    PlBattV = 9,
    PlBattA = 10,
    PlBattT = 11,
    V3d3V = 12,
    V3d3A = 13,
    V3d3Sw1V = 14,
    V3d3Sw1A = 15,
    V3d3Sw2V = 16,
    V3d3Sw2A = 17,
    V3d3Sw3V = 18,
    V3d3Sw3A = 19,
    V3d3Sw4V = 20,
    V3d3Sw4A = 21,
    V5V = 22,
    V5A = 23,
    V5Sw5V = 24,
    V5Sw5A = 25,
    V12V = 26,
    V12A = 27,
    V12Sw6V = 28,
    V12Sw6A = 29,
    RadioT = 30,
}

impl BeaconIndex {
    pub fn from_raw(raw: u8) -> Option<Self> {
        const POSITIONS: [BeaconIndex; BEACON_LEN] = [
            BeaconIndex::SoftwareState,
            BeaconIndex::NvMemCheck,
            BeaconIndex::PgmImgStatus,
            BeaconIndex::VtMemCheck,
            BeaconIndex::Faults,
            BeaconIndex::ProcFaults,
            BeaconIndex::ScBattV,
            BeaconIndex::ScBattA,
            BeaconIndex::ScBattT,
            BeaconIndex::PlBattV,
            BeaconIndex::PlBattA,
            BeaconIndex::PlBattT,
            BeaconIndex::V3d3V,
            BeaconIndex::V3d3A,
            BeaconIndex::V3d3Sw1V,
            BeaconIndex::V3d3Sw1A,
            BeaconIndex::V3d3Sw2V,
            BeaconIndex::V3d3Sw2A,
            BeaconIndex::V3d3Sw3V,
            BeaconIndex::V3d3Sw3A,
            BeaconIndex::V3d3Sw4V,
            BeaconIndex::V3d3Sw4A,
            BeaconIndex::V5V,
            BeaconIndex::V5A,
            BeaconIndex::V5Sw5V,
            BeaconIndex::V5Sw5A,
            BeaconIndex::V12V,
            BeaconIndex::V12A,
            BeaconIndex::V12Sw6V,
            BeaconIndex::V12Sw6A,
            BeaconIndex::RadioT,
        ];
        POSITIONS.get(usize::from(raw)).copied()
    }
}

#[derive(Debug, Clone, Copy)]
enum Encoding {
    /// 12-bit count right-shifted by 7 before symbol lookup.
    Scaled(usize),
    /// Temperature count mapped through the 1385-count floor.
    Temp(usize),
}

/// Which telemetry reading feeds each telemetry-driven beacon position.
const TELEMETRY_MAP: [(BeaconIndex, Encoding); 25] = [
    (BeaconIndex::ScBattV, Encoding::Scaled(19)),
    (BeaconIndex::ScBattA, Encoding::Scaled(20)),
    (BeaconIndex::ScBattT, Encoding::Temp(21)),
    (BeaconIndex::PlBattV, Encoding::Scaled(26)),
    (BeaconIndex::PlBattA, Encoding::Scaled(27)),
    (BeaconIndex::PlBattT, Encoding::Temp(28)),
    (BeaconIndex::V3d3V, Encoding::Scaled(16)),
    (BeaconIndex::V3d3A, Encoding::Scaled(15)),
    (BeaconIndex::V3d3Sw1V, Encoding::Scaled(43)),
    (BeaconIndex::V3d3Sw1A, Encoding::Scaled(42)),
    (BeaconIndex::V3d3Sw2V, Encoding::Scaled(41)),
    (BeaconIndex::V3d3Sw2A, Encoding::Scaled(40)),
    (BeaconIndex::V3d3Sw3V, Encoding::Scaled(39)),
    (BeaconIndex::V3d3Sw3A, Encoding::Scaled(38)),
    (BeaconIndex::V3d3Sw4V, Encoding::Scaled(18)),
    (BeaconIndex::V3d3Sw4A, Encoding::Scaled(17)),
    (BeaconIndex::V5V, Encoding::Scaled(12)),
    (BeaconIndex::V5A, Encoding::Scaled(11)),
    (BeaconIndex::V5Sw5V, Encoding::Scaled(14)),
    (BeaconIndex::V5Sw5A, Encoding::Scaled(13)),
    (BeaconIndex::V12V, Encoding::Scaled(8)),
    (BeaconIndex::V12A, Encoding::Scaled(7)),
    (BeaconIndex::V12Sw6V, Encoding::Scaled(10)),
    (BeaconIndex::V12Sw6A, Encoding::Scaled(9)),
    (BeaconIndex::RadioT, Encoding::Temp(24)),
];

/// Maps `0..34` onto the beacon alphabet in order: `A..Z` minus `E`/`T`
/// for `0..24`, then `0..9` for `24..34`. Anything at or above 34 falls
/// back to the nominal `'A'`.
pub fn int_to_beacon_char(val: u16) -> u8 {
    if val >= ALPHABET_SIZE {
        warn!(val, "beacon symbol index out of range");
        return b'A';
    }
    if val < 24 {
        let mut ch = b'A' + val as u8;
        if ch >= b'S' {
            ch += 2;
        } else if ch >= b'E' {
            ch += 1;
        }
        ch
    } else {
        b'0' + (val as u8 - 24)
    }
}

/// Inverse of [`int_to_beacon_char`] on the 34-symbol alphabet.
pub fn beacon_char_index(ch: u8) -> Option<u16> {
    match ch {
        b'A'..=b'D' => Some(u16::from(ch - b'A')),
        b'F'..=b'S' => Some(u16::from(ch - b'A') - 1),
        b'U'..=b'Z' => Some(u16::from(ch - b'A') - 2),
        b'0'..=b'9' => Some(u16::from(ch - b'0') + 24),
        _ => None,
    }
}

/// Encodes a 12-bit temperature count: 1385 counts is the coldest symbol,
/// each symbol above spans 32 counts, clamped at the hottest symbol.
fn temp_char(reading: u16) -> u8 {
    let t = i32::from(reading) - 1385;
    if t <= 0 {
        return int_to_beacon_char(0);
    }
    let t = t >> 5;
    int_to_beacon_char(t.min(33) as u16)
}

/// Resets the message to the nominal all-`'A'` string.
pub fn init(store: &mut StateStore) {
    store.update(|s| s.beacon.message = [b'A'; BEACON_LEN]);
}

/// Recomputes the telemetry-driven positions from the last acquisition.
pub fn update_telemetry(store: &mut StateStore) {
    let readings = store.state().last_telemetry;
    store.update(|s| {
        for (index, encoding) in TELEMETRY_MAP {
            s.beacon.message[index as usize] = match encoding {
                Encoding::Scaled(sensor) => int_to_beacon_char(readings[sensor] >> 7),
                Encoding::Temp(sensor) => temp_char(readings[sensor]),
            };
        }
    });
    debug!(message = %message_text(store.state()), "beacon refreshed");
}

/// Writes one character. Characters outside `0-9`/`A-Z` are rejected
/// silently; `E` and `T` are assumed to be near-miss inputs and bump up to
/// `F` and `U`.
pub fn update_single(store: &mut StateStore, index: BeaconIndex, val: u8) {
    let mut ch = val;
    let valid = ch.is_ascii_digit() || ch.is_ascii_uppercase();
    if !valid {
        return;
    }
    if ch == b'E' || ch == b'T' {
        ch += 1;
    }
    store.update(|s| s.beacon.message[index as usize] = ch);
}

/// The message as text, for transmission and logging.
pub fn message_text(state: &SystemState) -> ArrayString<BEACON_LEN> {
    let mut out = ArrayString::new();
    for &b in &state.beacon.message {
        out.push(char::from(b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_boundaries() {
        assert_eq!(int_to_beacon_char(0), b'A');
        assert_eq!(int_to_beacon_char(3), b'D');
        assert_eq!(int_to_beacon_char(4), b'F'); // E skipped
        assert_eq!(int_to_beacon_char(17), b'S');
        assert_eq!(int_to_beacon_char(18), b'U'); // T skipped
        assert_eq!(int_to_beacon_char(23), b'Z');
        assert_eq!(int_to_beacon_char(24), b'0');
        assert_eq!(int_to_beacon_char(33), b'9');
        assert_eq!(int_to_beacon_char(34), b'A'); // guard
    }

    #[test]
    fn test_symbols_monotone_and_bijective() {
        let mut seen = [false; 256];
        let mut prev = None;
        for v in 0..ALPHABET_SIZE {
            let ch = int_to_beacon_char(v);
            assert_ne!(ch, b'E');
            assert_ne!(ch, b'T');
            assert!(ch.is_ascii_digit() || ch.is_ascii_uppercase());
            assert!(!seen[usize::from(ch)], "symbol {ch} emitted twice");
            seen[usize::from(ch)] = true;
            // Order within each band is preserved.
            if let Some(p) = prev {
                if (v < 24) == (v - 1 < 24) {
                    assert!(ch > p);
                }
            }
            prev = Some(ch);
        }
        assert_eq!(seen.iter().filter(|&&s| s).count(), 34);
    }

    #[test]
    fn test_symbol_round_trip() {
        for v in 0..ALPHABET_SIZE {
            assert_eq!(beacon_char_index(int_to_beacon_char(v)), Some(v));
        }
        assert_eq!(beacon_char_index(b'E'), None);
        assert_eq!(beacon_char_index(b'T'), None);
        assert_eq!(beacon_char_index(b'*'), None);
    }

    #[test]
    fn test_temp_char_boundaries() {
        assert_eq!(temp_char(0), b'A');
        assert_eq!(temp_char(1385), b'A');
        assert_eq!(temp_char(1385 + 32), b'B');
        assert_eq!(temp_char(1385 + 32 * 33), b'9');
        assert_eq!(temp_char(4095), b'9');
    }

    #[test]
    fn test_update_single_validation() {
        let mut store = StateStore::new();
        update_single(&mut store, BeaconIndex::ScBattV, b'E');
        assert_eq!(
            store.state().beacon.message[BeaconIndex::ScBattV as usize],
            b'F'
        );
        update_single(&mut store, BeaconIndex::ScBattV, b'*');
        assert_eq!(
            store.state().beacon.message[BeaconIndex::ScBattV as usize],
            b'F'
        );
        update_single(&mut store, BeaconIndex::ScBattV, b'5');
        assert_eq!(
            store.state().beacon.message[BeaconIndex::ScBattV as usize],
            b'5'
        );
        update_single(&mut store, BeaconIndex::SoftwareState, b'T');
        assert_eq!(
            store.state().beacon.message[BeaconIndex::SoftwareState as usize],
            b'U'
        );
    }

    #[test]
    fn test_update_telemetry_restricted_alphabet() {
        let mut store = StateStore::new();
        store.update(|s| {
            for (i, r) in s.last_telemetry.iter_mut().enumerate() {
                *r = (i as u16 * 191) & 0x0FFF;
            }
        });
        update_telemetry(&mut store);
        for &ch in &store.state().beacon.message {
            assert!(ch.is_ascii_digit() || ch.is_ascii_uppercase());
            assert_ne!(ch, b'E');
            assert_ne!(ch, b'T');
        }
    }

    #[test]
    fn test_scaled_encoding_uses_upper_bits() {
        let mut store = StateStore::new();
        // Reading 19 feeds SC_BATT_V; 0x0FFF >> 7 == 31 -> last letter band.
        store.update(|s| s.last_telemetry[19] = 0x0FFF);
        update_telemetry(&mut store);
        assert_eq!(
            store.state().beacon.message[BeaconIndex::ScBattV as usize],
            int_to_beacon_char(31)
        );
    }
}
