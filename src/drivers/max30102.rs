// PulseWatch — MAX30102 Pulse-Oximeter Driver
//
// Register-level driver over a `RegisterInterface`. Owns the sensor
// lifecycle (reset → configured → running ⇄ shutdown), the FIFO protocol and
// sample decoding.

use std::ops::Deref;

use embedded_hal::delay::DelayNs;
use thiserror::Error;

use super::registers::RegisterInterface;
use crate::bus::{BusError, Transport};
use crate::config::*;

// MAX30102 register addresses
pub mod reg {
    pub const INT_STATUS_1: u8 = 0x00;
    pub const INT_STATUS_2: u8 = 0x01;
    pub const INT_ENABLE_1: u8 = 0x02;
    pub const INT_ENABLE_2: u8 = 0x03;
    pub const FIFO_WR_PTR: u8 = 0x04;
    pub const FIFO_OVF_CNT: u8 = 0x05;
    pub const FIFO_RD_PTR: u8 = 0x06;
    pub const FIFO_DATA: u8 = 0x07; // burst-readable, pointer does not auto-increment
    pub const FIFO_CONFIG: u8 = 0x08;
    pub const MODE_CONFIG: u8 = 0x09;
    pub const SPO2_CONFIG: u8 = 0x0A;
    pub const LED1_PA: u8 = 0x0C; // red
    pub const LED2_PA: u8 = 0x0D; // IR
    pub const MULTI_LED_CTRL1: u8 = 0x11;
    pub const MULTI_LED_CTRL2: u8 = 0x12;
    pub const TEMP_INT: u8 = 0x1F;
    pub const TEMP_FRAC: u8 = 0x20;
    pub const TEMP_CONFIG: u8 = 0x21;
    pub const REV_ID: u8 = 0xFE;
    pub const PART_ID: u8 = 0xFF;
}

/// Interrupt status / enable bits.
pub mod int {
    // status 1 / enable 1
    pub const A_FULL: u8 = 1 << 7;
    pub const PPG_RDY: u8 = 1 << 6;
    pub const ALC_OVF: u8 = 1 << 5;
    pub const PROX_INT: u8 = 1 << 4;
    pub const PWR_RDY: u8 = 1 << 0;
    // status 2 / enable 2
    pub const DIE_TEMP_RDY: u8 = 1 << 1;
}

pub mod mode {
    pub const SHDN: u8 = 1 << 7;
    pub const RESET: u8 = 1 << 6;
    pub const MODE_MASK: u8 = 0x07;
}

pub const TEMP_EN: u8 = 0x01;
const FIFO_ROLLOVER_EN: u8 = 1 << 4;
const FIFO_A_FULL_MASK: u8 = 0x0F;
const FIFO_SMP_AVE_SHIFT: u8 = 5;
const FIFO_PTR_MASK: u8 = FIFO_DEPTH - 1;
const RAW_SAMPLE_MASK: u32 = 0x3FFFF;
pub const BYTES_PER_SAMPLE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("sensor did not leave reset")]
    ResetTimeout,
    #[error("temperature conversion did not complete")]
    TemperatureTimeout,
    #[error("unexpected part id 0x{found:02X} (expected 0x15)")]
    WrongPartId { found: u8 },
}

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleRate {
    Hz50 = 0,
    Hz100 = 1,
    Hz200 = 2,
    Hz400 = 3,
    Hz800 = 4,
    Hz1000 = 5,
    Hz1600 = 6,
    Hz3200 = 7,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            Self::Hz50 => 50,
            Self::Hz100 => 100,
            Self::Hz200 => 200,
            Self::Hz400 => 400,
            Self::Hz800 => 800,
            Self::Hz1000 => 1000,
            Self::Hz1600 => 1600,
            Self::Hz3200 => 3200,
        }
    }
}

/// LED pulse width; also fixes the ADC resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PulseWidth {
    Us69 = 0,
    Us118 = 1,
    Us215 = 2,
    Us411 = 3,
}

impl PulseWidth {
    pub fn resolution_bits(self) -> u32 {
        match self {
            Self::Us69 => 15,
            Self::Us118 => 16,
            Self::Us215 => 17,
            Self::Us411 => 18,
        }
    }

    pub fn sample_mask(self) -> u32 {
        (1 << self.resolution_bits()) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdcRange {
    Na2048 = 0,
    Na4096 = 1,
    Na8192 = 2,
    Na16384 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedMode {
    HeartRate = 0x02,
    SpO2 = 0x03,
    MultiLed = 0x07,
}

/// On-chip sample averaging, encoded as a power-of-two selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleAveraging {
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
    X16 = 4,
    X32 = 5,
}

impl SampleAveraging {
    pub fn from_count(samples: u8) -> Option<Self> {
        match samples {
            1 => Some(Self::X1),
            2 => Some(Self::X2),
            4 => Some(Self::X4),
            8 => Some(Self::X8),
            16 => Some(Self::X16),
            32 => Some(Self::X32),
            _ => None,
        }
    }

    /// ADC conversions folded into one FIFO entry.
    pub fn count(self) -> u32 {
        1 << self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedAmplitude {
    pub red: u8,
    pub ir: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoSettings {
    pub averaging: SampleAveraging,
    pub rollover: bool,
    /// Free slots left when A_FULL fires (0..=15).
    pub almost_full: u8,
}

/// Everything `Max30102::init` programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub sample_rate: SampleRate,
    pub pulse_width: PulseWidth,
    pub adc_range: AdcRange,
    pub leds: LedAmplitude,
    pub fifo: FifoSettings,
    pub mode: LedMode,
    pub interrupt_enable_1: u8,
    pub interrupt_enable_2: u8,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz100,
            pulse_width: PulseWidth::Us411,
            adc_range: AdcRange::Na4096,
            leds: LedAmplitude {
                red: DEFAULT_LED_AMPLITUDE,
                ir: DEFAULT_LED_AMPLITUDE,
            },
            fifo: FifoSettings {
                averaging: SampleAveraging::X1,
                rollover: true,
                almost_full: DEFAULT_FIFO_ALMOST_FULL,
            },
            mode: LedMode::SpO2,
            interrupt_enable_1: int::A_FULL | int::PPG_RDY,
            interrupt_enable_2: 0,
        }
    }
}

impl SensorSettings {
    /// Rate at which samples leave the FIFO, after on-chip averaging.
    pub fn output_rate_hz(&self) -> u32 {
        self.sample_rate.hz() / self.fifo.averaging.count()
    }
}

pub fn spo2_config_byte(rate: SampleRate, width: PulseWidth, range: AdcRange) -> u8 {
    ((range as u8) << 5) | ((rate as u8) << 2) | width as u8
}

pub fn fifo_config_byte(averaging: SampleAveraging, rollover: bool, almost_full: u8) -> u8 {
    let rollover = if rollover { FIFO_ROLLOVER_EN } else { 0 };
    ((averaging as u8) << FIFO_SMP_AVE_SHIFT) | rollover | almost_full.min(FIFO_A_FULL_MASK)
}

// ---------------------------------------------------------------------------
// Samples & FIFO bookkeeping
// ---------------------------------------------------------------------------

/// Decode one 3-byte channel word and keep the bits the pulse width produces.
pub fn extract_sample(raw: [u8; 3], width: PulseWidth) -> u32 {
    let value = (raw[0] as u32) << 16 | (raw[1] as u32) << 8 | raw[2] as u32;
    value & RAW_SAMPLE_MASK & width.sample_mask()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub red: u32,
    pub ir: u32,
}

impl Sample {
    /// `bytes` is one FIFO record: red[3] followed by ir[3], MSB first.
    pub fn from_record(bytes: &[u8; BYTES_PER_SAMPLE], width: PulseWidth) -> Self {
        Self {
            red: extract_sample([bytes[0], bytes[1], bytes[2]], width),
            ir: extract_sample([bytes[3], bytes[4], bytes[5]], width),
        }
    }
}

/// Bounded, reusable buffer of samples drained in one acquisition cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    samples: Vec<Sample>,
    capacity: usize,
}

impl SampleBatch {
    pub fn new() -> Self {
        Self::with_capacity(BATCH_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Append a sample; returns `false` (and drops it) when full.
    pub fn push(&mut self, sample: Sample) -> bool {
        if self.samples.len() >= self.capacity {
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }
}

impl Default for SampleBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for SampleBatch {
    type Target = [Sample];

    fn deref(&self) -> &[Sample] {
        &self.samples
    }
}

/// Snapshot of the 32-entry hardware ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoPointers {
    pub write_ptr: u8,
    pub read_ptr: u8,
    pub overflow_count: u8,
}

impl FifoPointers {
    /// Unread samples: `(write - read) mod 32`.
    pub fn available(&self) -> u8 {
        self.write_ptr.wrapping_sub(self.read_ptr) & FIFO_PTR_MASK
    }

    /// Samples were lost; the FIFO contents can no longer be trusted.
    pub fn overflowed(&self) -> bool {
        self.overflow_count > 0
    }
}

/// Both interrupt status registers as read (and cleared) in one go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptStatus {
    pub status1: u8,
    pub status2: u8,
}

impl InterruptStatus {
    pub fn almost_full(&self) -> bool {
        self.status1 & int::A_FULL != 0
    }

    pub fn data_ready(&self) -> bool {
        self.status1 & int::PPG_RDY != 0
    }

    pub fn ambient_overflow(&self) -> bool {
        self.status1 & int::ALC_OVF != 0
    }

    pub fn temperature_ready(&self) -> bool {
        self.status2 & int::DIE_TEMP_RDY != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub part_id: u8,
    pub revision_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Reset,
    Configured,
    Running,
    Shutdown,
}

// Registers included in a diagnostics dump, in bus order.
const DUMP_REGISTERS: [(&str, u8); 12] = [
    ("INT_STATUS_1", reg::INT_STATUS_1),
    ("INT_STATUS_2", reg::INT_STATUS_2),
    ("INT_ENABLE_1", reg::INT_ENABLE_1),
    ("INT_ENABLE_2", reg::INT_ENABLE_2),
    ("FIFO_WR_PTR", reg::FIFO_WR_PTR),
    ("FIFO_OVF_CNT", reg::FIFO_OVF_CNT),
    ("FIFO_RD_PTR", reg::FIFO_RD_PTR),
    ("FIFO_CONFIG", reg::FIFO_CONFIG),
    ("MODE_CONFIG", reg::MODE_CONFIG),
    ("SPO2_CONFIG", reg::SPO2_CONFIG),
    ("LED1_PA", reg::LED1_PA),
    ("LED2_PA", reg::LED2_PA),
];

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Max30102<T, D> {
    regs: RegisterInterface<T>,
    delay: D,
    pulse_width: PulseWidth,
    state: DeviceState,
}

impl<T: Transport, D: DelayNs> Max30102<T, D> {
    pub fn new(regs: RegisterInterface<T>, delay: D) -> Self {
        Self {
            regs,
            delay,
            // Power-on value of SPO2_CONFIG.
            pulse_width: PulseWidth::Us69,
            state: DeviceState::Reset,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn pulse_width(&self) -> PulseWidth {
        self.pulse_width
    }

    pub fn registers(&mut self) -> &mut RegisterInterface<T> {
        &mut self.regs
    }

    /// Full bring-up: identity check, reset, configuration, interrupt setup,
    /// clean FIFO. Fails with `WrongPartId` on an unexpected device.
    pub fn init(&mut self, settings: &SensorSettings) -> Result<Identity, DriverError> {
        let part_id = self.read_part_id()?;
        if part_id != MAX30102_EXPECTED_PART_ID {
            log::error!(
                "MAX30102 part id 0x{:02X} (expected 0x{:02X})",
                part_id,
                MAX30102_EXPECTED_PART_ID
            );
            return Err(DriverError::WrongPartId { found: part_id });
        }
        let revision_id = self.read_revision_id()?;

        self.reset()?;
        self.configure_fifo(
            settings.fifo.averaging,
            settings.fifo.rollover,
            settings.fifo.almost_full,
        )?;
        self.configure(
            settings.sample_rate,
            settings.pulse_width,
            settings.adc_range,
            settings.leds,
        )?;
        self.set_mode(settings.mode)?;
        self.set_interrupt_enables(settings.interrupt_enable_1, settings.interrupt_enable_2)?;
        // Drop whatever fired during bring-up (power-ready, early samples).
        self.read_interrupt_status()?;
        self.clear_fifo()?;

        log::info!(
            "MAX30102 at 0x{:02X} initialised (part 0x{:02X} rev 0x{:02X}, {} Hz, {}-bit, mode {:?})",
            self.regs.address(),
            part_id,
            revision_id,
            settings.output_rate_hz(),
            settings.pulse_width.resolution_bits(),
            settings.mode
        );
        Ok(Identity {
            part_id,
            revision_id,
        })
    }

    /// Soft reset; waits (bounded) for the reset bit to self-clear.
    pub fn reset(&mut self) -> Result<(), DriverError> {
        self.regs.write_register(reg::MODE_CONFIG, mode::RESET)?;

        for _ in 0..SENSOR_RESET_POLLS {
            self.delay.delay_ms(SENSOR_RESET_POLL_MS);
            if self.regs.read_register(reg::MODE_CONFIG)? & mode::RESET == 0 {
                self.pulse_width = PulseWidth::Us69;
                self.state = DeviceState::Reset;
                return Ok(());
            }
        }
        log::warn!("MAX30102 reset bit still set after {} polls", SENSOR_RESET_POLLS);
        Err(DriverError::ResetTimeout)
    }

    /// Program SPO2_CONFIG and both LED amplitudes.
    pub fn configure(
        &mut self,
        sample_rate: SampleRate,
        pulse_width: PulseWidth,
        adc_range: AdcRange,
        leds: LedAmplitude,
    ) -> Result<(), DriverError> {
        let spo2 = spo2_config_byte(sample_rate, pulse_width, adc_range);
        self.regs.write_register(reg::SPO2_CONFIG, spo2)?;
        self.regs.write_register(reg::LED1_PA, leds.red)?;
        self.regs.write_register(reg::LED2_PA, leds.ir)?;

        self.pulse_width = pulse_width;
        if self.state == DeviceState::Reset {
            self.state = DeviceState::Configured;
        }
        log::debug!("SPO2_CONFIG=0x{:02X} LED red=0x{:02X} ir=0x{:02X}", spo2, leds.red, leds.ir);
        Ok(())
    }

    pub fn configure_fifo(
        &mut self,
        averaging: SampleAveraging,
        rollover: bool,
        almost_full: u8,
    ) -> Result<(), DriverError> {
        let value = fifo_config_byte(averaging, rollover, almost_full);
        self.regs.write_register(reg::FIFO_CONFIG, value)?;
        Ok(())
    }

    pub fn set_fifo_averaging(&mut self, averaging: SampleAveraging) -> Result<(), DriverError> {
        self.regs.modify_register(
            reg::FIFO_CONFIG,
            0b111 << FIFO_SMP_AVE_SHIFT,
            (averaging as u8) << FIFO_SMP_AVE_SHIFT,
        )?;
        Ok(())
    }

    /// Threshold is clamped to 15.
    pub fn set_fifo_almost_full(&mut self, almost_full: u8) -> Result<(), DriverError> {
        self.regs.modify_register(
            reg::FIFO_CONFIG,
            FIFO_A_FULL_MASK,
            almost_full.min(FIFO_A_FULL_MASK),
        )?;
        Ok(())
    }

    /// Select the LED mode (low 3 bits of MODE_CONFIG) and start sampling.
    pub fn set_mode(&mut self, led_mode: LedMode) -> Result<(), DriverError> {
        self.regs
            .modify_register(reg::MODE_CONFIG, mode::MODE_MASK, led_mode as u8)?;
        self.state = DeviceState::Running;
        Ok(())
    }

    /// Enter (`true`) or leave (`false`) power-save shutdown.
    pub fn shutdown(&mut self, shutdown: bool) -> Result<(), DriverError> {
        let bits = if shutdown { mode::SHDN } else { 0 };
        self.regs.modify_register(reg::MODE_CONFIG, mode::SHDN, bits)?;
        self.state = if shutdown {
            DeviceState::Shutdown
        } else {
            DeviceState::Running
        };
        log::info!("MAX30102 {}", if shutdown { "shut down" } else { "resumed" });
        Ok(())
    }

    pub fn set_interrupt_enables(&mut self, enable1: u8, enable2: u8) -> Result<(), DriverError> {
        self.regs.write_register(reg::INT_ENABLE_1, enable1)?;
        self.regs.write_register(reg::INT_ENABLE_2, enable2)?;
        Ok(())
    }

    pub fn enable_interrupt(&mut self, mask: u8) -> Result<(), DriverError> {
        self.regs.modify_register(reg::INT_ENABLE_1, mask, mask)?;
        Ok(())
    }

    pub fn disable_interrupt(&mut self, mask: u8) -> Result<(), DriverError> {
        self.regs.modify_register(reg::INT_ENABLE_1, mask, 0)?;
        Ok(())
    }

    /// Read both status registers. The hardware clears them on read.
    pub fn read_interrupt_status(&mut self) -> Result<InterruptStatus, DriverError> {
        let mut raw = [0u8; 2];
        self.regs.read_into(reg::INT_STATUS_1, &mut raw)?;
        Ok(InterruptStatus {
            status1: raw[0],
            status2: raw[1],
        })
    }

    pub fn read_fifo_pointers(&mut self) -> Result<FifoPointers, DriverError> {
        // WR_PTR, OVF_CNT and RD_PTR are adjacent.
        let mut raw = [0u8; 3];
        self.regs.read_into(reg::FIFO_WR_PTR, &mut raw)?;
        Ok(FifoPointers {
            write_ptr: raw[0] & FIFO_PTR_MASK,
            overflow_count: raw[1],
            read_ptr: raw[2] & FIFO_PTR_MASK,
        })
    }

    /// Discard everything queued in the FIFO.
    pub fn clear_fifo(&mut self) -> Result<(), DriverError> {
        self.regs.write_register(reg::FIFO_WR_PTR, 0)?;
        self.regs.write_register(reg::FIFO_OVF_CNT, 0)?;
        self.regs.write_register(reg::FIFO_RD_PTR, 0)?;
        Ok(())
    }

    /// Drain `count` samples into `batch` (capped to its capacity) with a
    /// single burst read. Returns the number of samples stored.
    pub fn read_fifo_into(
        &mut self,
        batch: &mut SampleBatch,
        count: usize,
    ) -> Result<usize, DriverError> {
        batch.clear();
        let count = count.min(batch.capacity());
        if count == 0 {
            return Ok(0);
        }

        let mut raw = vec![0u8; count * BYTES_PER_SAMPLE];
        self.regs.read_into(reg::FIFO_DATA, &mut raw)?;

        for record in raw.chunks_exact(BYTES_PER_SAMPLE) {
            let mut bytes = [0u8; BYTES_PER_SAMPLE];
            bytes.copy_from_slice(record);
            batch.push(Sample::from_record(&bytes, self.pulse_width));
        }
        Ok(batch.len())
    }

    pub fn read_fifo_samples(&mut self, count: usize) -> Result<SampleBatch, DriverError> {
        let mut batch = SampleBatch::with_capacity(count.min(FIFO_DEPTH as usize));
        self.read_fifo_into(&mut batch, count)?;
        Ok(batch)
    }

    pub fn read_part_id(&mut self) -> Result<u8, DriverError> {
        Ok(self.regs.read_register(reg::PART_ID)?)
    }

    pub fn read_revision_id(&mut self) -> Result<u8, DriverError> {
        Ok(self.regs.read_register(reg::REV_ID)?)
    }

    /// One-shot die temperature in °C (0.0625 °C resolution).
    pub fn read_temperature(&mut self) -> Result<f32, DriverError> {
        self.regs.write_register(reg::TEMP_CONFIG, TEMP_EN)?;

        let mut ready = false;
        for _ in 0..TEMPERATURE_POLLS {
            let status = InterruptStatus {
                status1: 0,
                status2: self.regs.read_register(reg::INT_STATUS_2)?,
            };
            if status.temperature_ready() {
                ready = true;
                break;
            }
            self.delay.delay_ms(TEMPERATURE_POLL_MS);
        }
        if !ready {
            return Err(DriverError::TemperatureTimeout);
        }

        let integer = self.regs.read_register(reg::TEMP_INT)? as i8;
        let fraction = self.regs.read_register(reg::TEMP_FRAC)? & 0x0F;
        Ok(integer as f32 + fraction as f32 * TEMPERATURE_LSB_C)
    }

    /// Read the configuration and status registers for diagnostics.
    /// Note that the status registers are cleared by this read.
    pub fn register_dump(&mut self) -> Result<Vec<(&'static str, u8)>, DriverError> {
        DUMP_REGISTERS
            .iter()
            .map(|&(name, address)| Ok((name, self.regs.read_register(address)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{BusOp, MockTransport, OpKind};
    use crate::sim::{DeviceModel, SimClock};
    use proptest::prelude::*;

    fn driver(device: DeviceModel) -> Max30102<MockTransport, SimClock> {
        let regs = RegisterInterface::new(MockTransport::with_device(device), MAX30102_ADDR);
        Max30102::new(regs, SimClock::new())
    }

    fn bus(drv: &mut Max30102<MockTransport, SimClock>) -> &mut MockTransport {
        drv.registers().transport()
    }

    #[test]
    fn mask_follows_pulse_width() {
        let raw = [0x03, 0xFF, 0xFF];
        assert_eq!(extract_sample(raw, PulseWidth::Us69), 0x7FFF);
        assert_eq!(extract_sample(raw, PulseWidth::Us118), 0xFFFF);
        assert_eq!(extract_sample(raw, PulseWidth::Us215), 0x1FFFF);
        assert_eq!(extract_sample(raw, PulseWidth::Us411), 0x3FFFF);
        // Bits above 18 never leak through.
        assert_eq!(extract_sample([0xFF, 0xFF, 0xFF], PulseWidth::Us411), 0x3FFFF);
    }

    #[test]
    fn available_wraps_around() {
        let p = FifoPointers {
            write_ptr: 2,
            read_ptr: 30,
            overflow_count: 0,
        };
        assert_eq!(p.available(), 4);
        assert!(!p.overflowed());
    }

    proptest! {
        #[test]
        fn available_is_pointer_distance_mod_32(wr in 0u8..32, rd in 0u8..32) {
            let p = FifoPointers { write_ptr: wr, read_ptr: rd, overflow_count: 0 };
            let expected = (wr as i32 - rd as i32).rem_euclid(32) as u8;
            prop_assert_eq!(p.available(), expected);
        }

        #[test]
        fn sample_never_exceeds_resolution(b0 in any::<u8>(), b1 in any::<u8>(), b2 in any::<u8>(), pw in 0u8..4) {
            let width = [PulseWidth::Us69, PulseWidth::Us118, PulseWidth::Us215, PulseWidth::Us411][pw as usize];
            let v = extract_sample([b0, b1, b2], width);
            prop_assert!(v < 1 << width.resolution_bits());
        }
    }

    #[test]
    fn config_bytes_match_datasheet_layout() {
        assert_eq!(
            spo2_config_byte(SampleRate::Hz100, PulseWidth::Us411, AdcRange::Na4096),
            0x27
        );
        assert_eq!(fifo_config_byte(SampleAveraging::X4, true, 15), 0x5F);
        assert_eq!(fifo_config_byte(SampleAveraging::X32, false, 40), 0xAF);
        assert_eq!(SampleAveraging::from_count(16), Some(SampleAveraging::X16));
        assert_eq!(SampleAveraging::from_count(3), None);
    }

    #[test]
    fn output_rate_divides_by_averaging() {
        let mut settings = SensorSettings::default();
        assert_eq!(settings.output_rate_hz(), 100);
        settings.fifo.averaging = SampleAveraging::X4;
        assert_eq!(settings.output_rate_hz(), 25);
        settings.sample_rate = SampleRate::Hz1000;
        settings.fifo.averaging = SampleAveraging::X32;
        assert_eq!(settings.output_rate_hz(), 31);
    }

    #[test]
    fn init_brings_sensor_to_running() {
        let mut drv = driver(DeviceModel::new());
        let id = drv.init(&SensorSettings::default()).unwrap();

        assert_eq!(id.part_id, 0x15);
        assert_eq!(drv.state(), DeviceState::Running);
        assert_eq!(drv.pulse_width(), PulseWidth::Us411);

        let dev = &bus(&mut drv).device;
        assert_eq!(dev.register(reg::SPO2_CONFIG), 0x27);
        assert_eq!(dev.register(reg::FIFO_CONFIG), 0x1F);
        assert_eq!(dev.register(reg::MODE_CONFIG) & mode::MODE_MASK, LedMode::SpO2 as u8);
        assert_eq!(dev.register(reg::INT_ENABLE_1), int::A_FULL | int::PPG_RDY);
        assert_eq!(dev.register(reg::LED1_PA), DEFAULT_LED_AMPLITUDE);
        assert_eq!(dev.register(reg::LED2_PA), DEFAULT_LED_AMPLITUDE);
    }

    #[test]
    fn init_rejects_foreign_part() {
        let mut dev = DeviceModel::new();
        dev.set_register(reg::PART_ID, 0x11);
        let mut drv = driver(dev);

        assert_eq!(
            drv.init(&SensorSettings::default()),
            Err(DriverError::WrongPartId { found: 0x11 })
        );
        assert_eq!(drv.state(), DeviceState::Reset);
    }

    #[test]
    fn reset_times_out_when_bit_sticks() {
        let mut dev = DeviceModel::new();
        dev.set_reset_latency(u32::MAX);
        let mut drv = driver(dev);

        assert_eq!(drv.reset(), Err(DriverError::ResetTimeout));
        let mode_reads = bus(&mut drv)
            .ops()
            .iter()
            .filter(|op| **op == BusOp::Write(reg::MODE_CONFIG))
            .count();
        // one write + SENSOR_RESET_POLLS reads, each addressing MODE_CONFIG
        assert_eq!(mode_reads, 1 + SENSOR_RESET_POLLS as usize);
    }

    #[test]
    fn reset_waits_for_self_clear() {
        let mut dev = DeviceModel::new();
        dev.set_reset_latency(3);
        let mut drv = driver(dev);
        assert_eq!(drv.reset(), Ok(()));
    }

    #[test]
    fn set_mode_preserves_upper_bits() {
        let mut drv = driver(DeviceModel::new());
        drv.shutdown(true).unwrap();
        drv.set_mode(LedMode::HeartRate).unwrap();

        let value = bus(&mut drv).device.register(reg::MODE_CONFIG);
        assert_eq!(value, mode::SHDN | LedMode::HeartRate as u8);
    }

    #[test]
    fn shutdown_round_trip() {
        let mut drv = driver(DeviceModel::new());
        drv.set_mode(LedMode::SpO2).unwrap();
        drv.shutdown(true).unwrap();
        assert_eq!(drv.state(), DeviceState::Shutdown);
        drv.shutdown(false).unwrap();
        assert_eq!(drv.state(), DeviceState::Running);
        assert_eq!(bus(&mut drv).device.register(reg::MODE_CONFIG), LedMode::SpO2 as u8);
    }

    #[test]
    fn interrupt_status_is_read_to_clear() {
        let mut dev = DeviceModel::new();
        dev.set_register(reg::INT_STATUS_1, int::A_FULL | int::PPG_RDY);
        let mut drv = driver(dev);

        let first = drv.read_interrupt_status().unwrap();
        assert!(first.almost_full());
        assert!(first.data_ready());

        let second = drv.read_interrupt_status().unwrap();
        assert_eq!(second, InterruptStatus::default());
        assert!(!second.ambient_overflow());
        assert!(!second.temperature_ready());
    }

    #[test]
    fn interrupt_enable_helpers_touch_only_their_bits() {
        let mut drv = driver(DeviceModel::new());
        drv.set_interrupt_enables(int::PPG_RDY, 0).unwrap();
        drv.enable_interrupt(int::A_FULL).unwrap();
        drv.disable_interrupt(int::PPG_RDY).unwrap();
        assert_eq!(bus(&mut drv).device.register(reg::INT_ENABLE_1), int::A_FULL);
    }

    #[test]
    fn fifo_helpers_clamp_and_preserve() {
        let mut drv = driver(DeviceModel::new());
        drv.configure_fifo(SampleAveraging::X1, true, 3).unwrap();
        drv.set_fifo_averaging(SampleAveraging::X8).unwrap();
        drv.set_fifo_almost_full(99).unwrap();
        assert_eq!(bus(&mut drv).device.register(reg::FIFO_CONFIG), 0x60 | 0x10 | 0x0F);
    }

    #[test]
    fn fifo_drain_is_one_burst_and_masks_samples() {
        let mut dev = DeviceModel::new();
        dev.push_sample(0x3FFFF, 0x12345);
        dev.push_sample(0x00001, 0x3FFFF);
        let mut drv = driver(dev);
        drv.configure(
            SampleRate::Hz100,
            PulseWidth::Us118,
            AdcRange::Na4096,
            LedAmplitude { red: 1, ir: 1 },
        )
        .unwrap();
        bus(&mut drv).clear_ops();

        let batch = drv.read_fifo_samples(2).unwrap();

        assert_eq!(
            batch.as_slice(),
            &[
                Sample { red: 0xFFFF, ir: 0x2345 },
                Sample { red: 0x0001, ir: 0xFFFF },
            ]
        );
        let ops = bus(&mut drv).ops().to_vec();
        assert_eq!(ops.iter().filter(|op| **op == BusOp::Start).count(), 1);
        assert_eq!(ops.iter().filter(|op| matches!(op, BusOp::Read { .. })).count(), 12);

        let ptrs = drv.read_fifo_pointers().unwrap();
        assert_eq!(ptrs.available(), 0);
        assert_eq!(ptrs.read_ptr, 2);
    }

    #[test]
    fn drain_is_capped_to_batch_capacity() {
        let mut dev = DeviceModel::new();
        for i in 0..20 {
            dev.push_sample(i, i);
        }
        let mut drv = driver(dev);
        let mut batch = SampleBatch::with_capacity(16);
        assert_eq!(drv.read_fifo_into(&mut batch, 20).unwrap(), 16);
        assert_eq!(drv.read_fifo_pointers().unwrap().available(), 4);
    }

    #[test]
    fn clear_fifo_zeroes_pointers() {
        let mut dev = DeviceModel::new();
        for i in 0..5 {
            dev.push_sample(i, i);
        }
        let mut drv = driver(dev);
        drv.clear_fifo().unwrap();
        assert_eq!(drv.read_fifo_pointers().unwrap(), FifoPointers::default());
    }

    #[test]
    fn temperature_combines_integer_and_fraction() {
        let mut dev = DeviceModel::new();
        dev.set_die_temperature(-3, 0x4);
        let mut drv = driver(dev);
        let t = drv.read_temperature().unwrap();
        assert!((t - (-3.0 + 0.25)).abs() < 1e-6);
    }

    #[test]
    fn temperature_times_out_without_ready_flag() {
        let mut dev = DeviceModel::new();
        dev.set_temperature_stuck(true);
        let mut drv = driver(dev);
        assert_eq!(drv.read_temperature(), Err(DriverError::TemperatureTimeout));
    }

    #[test]
    fn bus_failure_surfaces_as_driver_error() {
        let mut drv = driver(DeviceModel::new());
        bus(&mut drv).fail_on(OpKind::Address, 0, BusError::Nack { status: 0x20 });
        assert_eq!(
            drv.read_part_id(),
            Err(DriverError::Bus(BusError::Nack { status: 0x20 }))
        );
        let b = bus(&mut drv);
        assert_eq!(b.starts(), b.stops());
    }

    #[test]
    fn register_dump_names_every_register() {
        let mut drv = driver(DeviceModel::new());
        let dump = drv.register_dump().unwrap();
        assert_eq!(dump.len(), DUMP_REGISTERS.len());
        assert_eq!(dump[0].0, "INT_STATUS_1");
    }
}
