// PulseWatch — Acquisition loop
//
// Orchestrates one sensor service cycle:
//   interrupt status → FIFO pointers → bounded drain → estimator → mailbox.
// Triggered by the sensor INT edge (via `IrqFlag`) or by a periodic poll.
// Never blocks waiting for samples; bus faults are counted and retried on the
// next trigger.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::delay::DelayNs;

use crate::bus::Transport;
use crate::config::*;
use crate::drivers::max30102::{DriverError, FifoPointers, Max30102, SampleBatch};
use crate::estimator::{HeartRateEstimator, HeartRateResult};
use crate::events::SensorCommand;

// ---------------------------------------------------------------------------
// Interrupt flag (ISR → sensor task)
// ---------------------------------------------------------------------------

/// Set from interrupt context, consumed by the acquisition task.
pub struct IrqFlag {
    pending: AtomicBool,
    count: AtomicU32,
}

impl IrqFlag {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            count: AtomicU32::new(0),
        }
    }

    /// ISR side: only flips atomics.
    pub fn raise(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Returns `true` once per batch of raises.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::Acquire)
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for IrqFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Statistics & mailbox (sensor task → UI task)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionStats {
    pub cycles: u32,
    pub published: u32,
    pub idle: u32,
    pub not_ready: u32,
    pub bus_errors: u32,
    pub overflow_recoveries: u32,
    /// Cycles where ambient light cancellation had saturated.
    pub ambient_overflows: u32,
    pub interrupts: u32,
    pub last_pointers: FifoPointers,
    pub temperature_c: Option<f32>,
}

impl AcquisitionStats {
    pub const fn new() -> Self {
        Self {
            cycles: 0,
            published: 0,
            idle: 0,
            not_ready: 0,
            bus_errors: 0,
            overflow_recoveries: 0,
            ambient_overflows: 0,
            interrupts: 0,
            last_pointers: FifoPointers {
                write_ptr: 0,
                read_ptr: 0,
                overflow_count: 0,
            },
            temperature_c: None,
        }
    }
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

struct Slot {
    latest: Option<HeartRateResult>,
    fresh: bool,
    stats: AcquisitionStats,
}

/// Latest reading plus a "data ready" flag, copied in and out under a lock
/// so the consumer never sees a torn result.
pub struct ReadingMailbox {
    slot: Mutex<Slot>,
}

impl ReadingMailbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                latest: None,
                fresh: false,
                stats: AcquisitionStats::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, result: HeartRateResult, stats: AcquisitionStats) {
        let mut slot = self.lock();
        slot.latest = Some(result);
        slot.fresh = true;
        slot.stats = stats;
    }

    pub fn update_stats(&self, stats: AcquisitionStats) {
        self.lock().stats = stats;
    }

    /// The newest result if it has not been taken yet; clears the flag.
    pub fn take(&self) -> Option<HeartRateResult> {
        let mut slot = self.lock();
        if !slot.fresh {
            return None;
        }
        slot.fresh = false;
        slot.latest
    }

    /// The newest result regardless of the flag.
    pub fn latest(&self) -> Option<HeartRateResult> {
        self.lock().latest
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.lock().stats
    }
}

impl Default for ReadingMailbox {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// FIFO not almost full; nothing to do.
    Idle,
    /// Almost full, but fewer samples than a minimum batch are available.
    NotReady(usize),
    /// Samples were lost; FIFO and estimator restarted.
    OverflowRecovered,
    Published(HeartRateResult),
    Paused,
    Failed(DriverError),
}

pub struct AcquisitionLoop<T, D> {
    sensor: Max30102<T, D>,
    estimator: HeartRateEstimator,
    batch: SampleBatch,
    mailbox: Arc<ReadingMailbox>,
    stats: AcquisitionStats,
    paused: bool,
    loops_since_service: u32,
}

impl<T: Transport, D: DelayNs> AcquisitionLoop<T, D> {
    pub fn new(
        sensor: Max30102<T, D>,
        estimator: HeartRateEstimator,
        mailbox: Arc<ReadingMailbox>,
    ) -> Self {
        Self {
            sensor,
            estimator,
            batch: SampleBatch::with_capacity(BATCH_CAPACITY),
            mailbox,
            stats: AcquisitionStats::new(),
            paused: false,
            loops_since_service: 0,
        }
    }

    pub fn sensor(&mut self) -> &mut Max30102<T, D> {
        &mut self.sensor
    }

    pub fn estimator(&self) -> &HeartRateEstimator {
        &self.estimator
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Main-loop entry: service on an interrupt edge, otherwise every
    /// `SENSOR_POLL_EVERY_LOOPS` calls. Returns `None` when not triggered.
    pub fn tick(&mut self, irq_fired: bool) -> Option<CycleOutcome> {
        self.loops_since_service += 1;
        if irq_fired {
            self.stats.interrupts += 1;
        } else if self.loops_since_service < SENSOR_POLL_EVERY_LOOPS {
            return None;
        }
        self.loops_since_service = 0;

        let outcome = match self.service() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.bus_errors += 1;
                log::warn!("sensor service failed: {}", e);
                self.mailbox.update_stats(self.stats);
                CycleOutcome::Failed(e)
            }
        };
        Some(outcome)
    }

    /// One acquisition cycle.
    pub fn service(&mut self) -> Result<CycleOutcome, DriverError> {
        self.stats.cycles += 1;
        if self.paused {
            return Ok(CycleOutcome::Paused);
        }

        let status = self.sensor.read_interrupt_status()?;
        if status.ambient_overflow() {
            self.stats.ambient_overflows += 1;
            log::debug!("ambient light cancellation overflow");
        }
        if !status.almost_full() {
            self.stats.idle += 1;
            return Ok(CycleOutcome::Idle);
        }

        let pointers = self.sensor.read_fifo_pointers()?;
        self.stats.last_pointers = pointers;
        if pointers.overflowed() {
            log::warn!(
                "FIFO overflow ({} samples lost), restarting acquisition",
                pointers.overflow_count
            );
            self.sensor.clear_fifo()?;
            self.estimator.reset();
            self.stats.overflow_recoveries += 1;
            self.mailbox.update_stats(self.stats);
            return Ok(CycleOutcome::OverflowRecovered);
        }

        let available = (pointers.available() as usize).min(self.batch.capacity());
        if available < MIN_BATCH {
            self.stats.not_ready += 1;
            return Ok(CycleOutcome::NotReady(available));
        }

        self.sensor.read_fifo_into(&mut self.batch, available)?;
        let result = self.estimator.process(&self.batch);
        self.stats.published += 1;

        if self.stats.published % TEMPERATURE_REFRESH_CYCLES == 0 {
            self.refresh_temperature();
        }

        self.mailbox.publish(result, self.stats);
        log::debug!("published {:?} from {} samples", result, self.batch.len());
        Ok(CycleOutcome::Published(result))
    }

    /// Take a die-temperature reading into the statistics. Failures are
    /// logged and leave the previous value in place.
    pub fn refresh_temperature(&mut self) {
        match self.sensor.read_temperature() {
            Ok(t) => self.stats.temperature_c = Some(t),
            Err(e) => log::warn!("die temperature read failed: {}", e),
        }
    }

    pub fn handle_command(&mut self, command: SensorCommand) -> Result<(), DriverError> {
        match command {
            SensorCommand::Pause => {
                self.sensor.shutdown(true)?;
                self.paused = true;
            }
            SensorCommand::Resume => {
                self.sensor.shutdown(false)?;
                self.sensor.clear_fifo()?;
                self.estimator.reset();
                self.paused = false;
            }
            SensorCommand::DumpRegisters => {
                for (name, value) in self.sensor.register_dump()? {
                    log::info!("{:<13} 0x{:02X}", name, value);
                }
            }
        }
        self.mailbox.update_stats(self.stats);
        Ok(())
    }
}
