use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;

use arrayvec::ArrayString;
use heapless::Vec;
use tracing::{debug, info};

use super::{Bus, CpuPriority, DriverError, LinkMode, RadioConfig};
use crate::beacon::BEACON_LEN;
use crate::state::NUM_SENSORS;
use crate::telemetry::ADC_CHANNELS;

const CAPTURE_DEPTH: usize = 16;

/// Simulated spacecraft bus: every driver the core talks to, backed by
/// settable values, injectable failures, and capture logs. Storage writes
/// land in real files under a configurable directory so flush behavior is
/// observable end to end.
pub struct SimBus {
    epoch: u32,
    rtc_failed: bool,

    readings: [u16; NUM_SENSORS],
    adc_failed: [bool; ADC_CHANNELS.len()],

    link_mode: LinkMode,
    applied_radio_config: Option<RadioConfig>,
    journal_config: RadioConfig,

    beacon_powered: bool,
    transmissions: Vec<ArrayString<BEACON_LEN>, CAPTURE_DEPTH>,

    storage_root: Option<PathBuf>,
    current_file: Option<File>,
    open_failure: bool,
    self_check_failure: bool,
    reformat_count: u32,
    reinit_count: u32,

    switch_log: Vec<(u8, u8), CAPTURE_DEPTH>,

    cpu_mode: u8,
    cpu_priority: CpuPriority,
    power_saving: bool,
    priority_raises: u32,

    diagnostics_pass: bool,
    diagnostics_runs: u32,
    payload_resets: u32,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            epoch: 0,
            rtc_failed: false,
            readings: [0; NUM_SENSORS],
            adc_failed: [false; ADC_CHANNELS.len()],
            link_mode: LinkMode::Inactive,
            applied_radio_config: None,
            journal_config: RadioConfig::default_flight(),
            beacon_powered: false,
            transmissions: Vec::new(),
            storage_root: None,
            current_file: None,
            open_failure: false,
            self_check_failure: false,
            reformat_count: 0,
            reinit_count: 0,
            switch_log: Vec::new(),
            cpu_mode: 0,
            cpu_priority: CpuPriority::Normal,
            power_saving: false,
            priority_raises: 0,
            diagnostics_pass: true,
            diagnostics_runs: 0,
            payload_resets: 0,
        }
    }

    /// Directs telemetry files into `root`.
    pub fn with_storage(root: impl Into<PathBuf>) -> Self {
        let mut bus = Self::new();
        bus.storage_root = Some(root.into());
        bus
    }

    pub fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }

    pub fn advance_epoch(&mut self, seconds: u32) {
        self.epoch = self.epoch.wrapping_add(seconds);
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn fail_rtc(&mut self, failed: bool) {
        self.rtc_failed = failed;
    }

    /// Sets the raw ADC word for one sensor channel; acquisition strips it
    /// to twelve bits.
    pub fn set_raw_word(&mut self, sensor: usize, word: u16) {
        self.readings[sensor] = word;
    }

    pub fn set_reading(&mut self, sensor: usize, counts: u16) {
        self.readings[sensor] = counts & 0x0FFF;
    }

    pub fn set_all_readings(&mut self, counts: u16) {
        self.readings = [counts & 0x0FFF; NUM_SENSORS];
    }

    pub fn fail_adc(&mut self, adc: usize, failed: bool) {
        self.adc_failed[adc] = failed;
    }

    pub fn set_link_mode(&mut self, mode: LinkMode) {
        self.link_mode = mode;
    }

    pub fn fail_storage_open(&mut self, failed: bool) {
        self.open_failure = failed;
    }

    pub fn fail_self_check(&mut self, failed: bool) {
        self.self_check_failure = failed;
    }

    pub fn set_diagnostics_pass(&mut self, pass: bool) {
        self.diagnostics_pass = pass;
    }

    // Observation points for tests and the simulator binary.

    pub fn beacon_powered(&self) -> bool {
        self.beacon_powered
    }

    pub fn transmissions(&self) -> &[ArrayString<BEACON_LEN>] {
        &self.transmissions
    }

    pub fn applied_radio_config(&self) -> Option<&RadioConfig> {
        self.applied_radio_config.as_ref()
    }

    pub fn journal_config(&self) -> &RadioConfig {
        &self.journal_config
    }

    pub fn switch_log(&self) -> &[(u8, u8)] {
        &self.switch_log
    }

    pub fn cpu_mode(&self) -> u8 {
        self.cpu_mode
    }

    pub fn power_saving(&self) -> bool {
        self.power_saving
    }

    pub fn cpu_priority(&self) -> CpuPriority {
        self.cpu_priority
    }

    pub fn priority_raises(&self) -> u32 {
        self.priority_raises
    }

    pub fn diagnostics_runs(&self) -> u32 {
        self.diagnostics_runs
    }

    pub fn payload_resets(&self) -> u32 {
        self.payload_resets
    }

    pub fn reformat_count(&self) -> u32 {
        self.reformat_count
    }

    pub fn reinit_count(&self) -> u32 {
        self.reinit_count
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimBus {
    fn now_epoch(&mut self) -> Result<u32, DriverError> {
        if self.rtc_failed {
            return Err(DriverError::Rtc);
        }
        Ok(self.epoch)
    }

    fn read_adc(&mut self, adc: u8, out: &mut [u16]) -> Result<(), DriverError> {
        let index = usize::from(adc);
        if self.adc_failed[index] {
            return Err(DriverError::Adc(adc));
        }
        let offset: usize = ADC_CHANNELS[..index].iter().sum();
        out.copy_from_slice(&self.readings[offset..offset + out.len()]);
        Ok(())
    }

    fn link_mode(&self) -> LinkMode {
        self.link_mode
    }

    fn apply_radio_config(&mut self, config: &RadioConfig) -> Result<(), DriverError> {
        debug!(frequency = config.frequency_hz, "radio config applied");
        self.applied_radio_config = Some(*config);
        Ok(())
    }

    fn beacon_power(&mut self, on: bool) {
        self.beacon_powered = on;
    }

    fn transmit_beacon(&mut self, message: &str) -> Result<(), DriverError> {
        if !self.beacon_powered {
            return Err(DriverError::Radio);
        }
        info!(message, "beacon transmitted");
        let mut captured = ArrayString::new();
        captured.push_str(&message[..message.len().min(BEACON_LEN)]);
        if self.transmissions.is_full() {
            self.transmissions.remove(0);
        }
        self.transmissions.push(captured).ok();
        Ok(())
    }

    fn journal_radio_config(&mut self) -> Result<RadioConfig, DriverError> {
        Ok(self.journal_config)
    }

    fn store_radio_config(&mut self, config: &RadioConfig) -> Result<(), DriverError> {
        self.journal_config = *config;
        Ok(())
    }

    fn storage_open_day(&mut self, name: &str) -> Result<(), DriverError> {
        self.storage_close();
        if self.open_failure {
            return Err(DriverError::StorageUnavailable);
        }
        let Some(root) = &self.storage_root else {
            return Err(DriverError::StorageUnavailable);
        };
        std::fs::create_dir_all(root)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.join(name))?;
        self.current_file = Some(file);
        Ok(())
    }

    fn storage_append(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        let Some(file) = self.current_file.as_mut() else {
            return Err(DriverError::StorageUnavailable);
        };
        file.write_all(bytes)?;
        Ok(())
    }

    fn storage_close(&mut self) {
        self.current_file = None;
    }

    fn storage_self_check(&mut self) -> Result<(), DriverError> {
        if self.self_check_failure {
            return Err(DriverError::StorageUnavailable);
        }
        Ok(())
    }

    fn storage_reformat(&mut self) -> Result<(), DriverError> {
        self.storage_close();
        self.reformat_count += 1;
        if let Some(root) = &self.storage_root {
            if root.exists() {
                std::fs::remove_dir_all(root)?;
            }
            std::fs::create_dir_all(root)?;
        }
        Ok(())
    }

    fn storage_reinit(&mut self) -> Result<(), DriverError> {
        self.reinit_count += 1;
        Ok(())
    }

    fn set_switch(&mut self, pca_id: u8, config: u8) -> Result<(), DriverError> {
        debug!(pca_id, config, "switch configured");
        if self.switch_log.is_full() {
            self.switch_log.remove(0);
        }
        self.switch_log.push((pca_id, config)).ok();
        Ok(())
    }

    fn set_cpu_mode(&mut self, mode: u8) {
        self.cpu_mode = mode;
    }

    fn set_cpu_priority(&mut self, priority: CpuPriority) -> CpuPriority {
        let previous = self.cpu_priority;
        if priority == CpuPriority::Uninterruptible && previous == CpuPriority::Normal {
            self.priority_raises += 1;
        }
        self.cpu_priority = priority;
        previous
    }

    fn set_power_saving(&mut self, on: bool) {
        self.power_saving = on;
    }

    fn run_diagnostics(&mut self) -> bool {
        self.diagnostics_runs += 1;
        self.diagnostics_pass
    }

    fn reset_payload(&mut self) {
        self.payload_resets += 1;
    }
}
