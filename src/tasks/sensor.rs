// PulseWatch — Sensor Task
//
// Owns the acquisition loop. Services the MAX30102 on every INT falling edge
// and, as a fallback, every few loop iterations; applies commands from the
// UI task between cycles.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::{AnyIOPin, AnyInputPin, Input, InputOutput, PinDriver};

use pulsewatch::acquisition::{AcquisitionLoop, CycleOutcome, IrqFlag};
use pulsewatch::bus::soft::SoftTwi;
use pulsewatch::bus::twi::Twi;
use pulsewatch::config::*;
use pulsewatch::events::SensorCommand;

pub type BusPin = PinDriver<'static, AnyIOPin, InputOutput>;
pub type SensorBus = Twi<SoftTwi<BusPin, BusPin, Ets>, Ets>;

pub fn sensor_task(
    mut acquisition: AcquisitionLoop<SensorBus, Ets>,
    mut int_pin: PinDriver<'static, AnyInputPin, Input>,
    irq: &'static IrqFlag,
    cmd_rx: Receiver<SensorCommand>,
) {
    log::info!("Sensor task started");
    acquisition.refresh_temperature();

    let interval = Duration::from_millis(SENSOR_LOOP_INTERVAL_MS);
    let mut commands_open = true;

    loop {
        let tick_start = Instant::now();

        // 1. Commands from the UI (never in the middle of a bus transaction).
        while commands_open {
            match cmd_rx.try_recv() {
                Ok(command) => {
                    log::info!("Sensor command: {:?}", command);
                    if let Err(e) = acquisition.handle_command(command) {
                        log::warn!("Sensor command {:?} failed: {}", command, e);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Command channel closed, sensor keeps running");
                    commands_open = false;
                }
            }
        }

        // 2. Service on an edge or on the periodic poll.
        let fired = irq.take();
        if let Some(CycleOutcome::Published(result)) = acquisition.tick(fired) {
            log::debug!(
                "HR {} ({}) SpO2 {} ({})",
                result.heart_rate,
                result.hr_valid,
                result.spo2,
                result.spo2_valid
            );
        }

        // 3. The GPIO driver disarms the interrupt after each edge.
        if fired {
            if let Err(e) = int_pin.enable_interrupt() {
                log::warn!("Failed to re-arm sensor interrupt: {}", e);
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}
