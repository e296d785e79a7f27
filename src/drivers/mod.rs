pub mod sim;

pub use sim::SimBus;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("RTC read failed")]
    Rtc,
    #[error("ADC {0} not responding")]
    Adc(u8),
    #[error("radio not responding")]
    Radio,
    #[error("switch bank {0} not responding")]
    Switch(u8),
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Radio link mode as seen from the main loop. The beacon may only
/// transmit while the link is not actively using the shared antenna.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    Inactive,
    Active,
    Sequencing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuPriority {
    Normal,
    Uninterruptible,
}

/// Radio configuration uploaded with a sequence and persisted in the
/// journal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct RadioConfig {
    pub frequency_hz: u32,
    pub power_dbm: u8,
    pub modulation: u8,
    pub bitrate_code: u8,
    pub reserved: u8,
}

impl RadioConfig {
    /// The configuration flown at launch and seeded into the journal.
    pub fn default_flight() -> Self {
        Self {
            frequency_hz: 437_500_000,
            power_dbm: 27,
            modulation: 0,
            bitrate_code: 1,
            reserved: 0,
        }
    }
}

/// Hardware abstraction the core runs against: RTC, ADC chain, radio and
/// beacon, journal, SD storage, switch bank, CPU control, diagnostics.
/// Every call blocks to completion within the current tick; the core never
/// aborts the main loop on a driver error.
pub trait Bus {
    /// Mission epoch in seconds, from one RTC read.
    fn now_epoch(&mut self) -> Result<u32, DriverError>;

    /// Reads all channels of one ADC: one raw 16-bit word per channel into
    /// `out`. The caller strips the address bits.
    fn read_adc(&mut self, adc: u8, out: &mut [u16]) -> Result<(), DriverError>;

    fn link_mode(&self) -> LinkMode;
    fn apply_radio_config(&mut self, config: &RadioConfig) -> Result<(), DriverError>;

    fn beacon_power(&mut self, on: bool);
    fn transmit_beacon(&mut self, message: &str) -> Result<(), DriverError>;

    fn journal_radio_config(&mut self) -> Result<RadioConfig, DriverError>;
    fn store_radio_config(&mut self, config: &RadioConfig) -> Result<(), DriverError>;

    /// Switches block appends to the named per-day telemetry file,
    /// closing any previously open file.
    fn storage_open_day(&mut self, name: &str) -> Result<(), DriverError>;
    fn storage_append(&mut self, bytes: &[u8]) -> Result<(), DriverError>;
    fn storage_close(&mut self);
    fn storage_self_check(&mut self) -> Result<(), DriverError>;
    fn storage_reformat(&mut self) -> Result<(), DriverError>;
    fn storage_reinit(&mut self) -> Result<(), DriverError>;

    fn set_switch(&mut self, pca_id: u8, config: u8) -> Result<(), DriverError>;

    fn set_cpu_mode(&mut self, mode: u8);
    fn set_cpu_priority(&mut self, priority: CpuPriority) -> CpuPriority;
    fn set_power_saving(&mut self, on: bool);

    /// Runs the daily diagnostic pass; true on success.
    fn run_diagnostics(&mut self) -> bool;

    /// Payload reset hook invoked when a sequence aborts.
    fn reset_payload(&mut self);
}
