// PulseWatch — Firmware Entry Point
//
// Boot sequence (ESP32-C3):
//   1. Bring up the OLED and show the "PulseWatch" splash.
//   2. Bring up the sensor bus (bit-banged TWI on two open-drain GPIOs).
//   3. Verify and configure the MAX30102; halt with a message on failure.
//   4. Arm the sensor INT falling-edge interrupt.
//   5. Spawn the sensor and UI tasks.
//
// On a host the same pipeline runs against the simulated sensor and the
// readings are printed to stdout.

#[cfg(target_os = "espidf")]
mod oled;
#[cfg(target_os = "espidf")]
mod tasks;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    host::run()
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::delay::Ets;
    use esp_idf_hal::gpio::{IOPin, InputPin, InterruptType, PinDriver, Pull};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;

    use pulsewatch::acquisition::{AcquisitionLoop, IrqFlag, ReadingMailbox};
    use pulsewatch::bus::soft::SoftTwi;
    use pulsewatch::bus::twi::{BusTimeouts, Twi};
    use pulsewatch::bus::Transport;
    use pulsewatch::config::*;
    use pulsewatch::display::{render_splash, FrameBuffer};
    use pulsewatch::drivers::max30102::{Max30102, SensorSettings};
    use pulsewatch::drivers::registers::RegisterInterface;
    use pulsewatch::estimator::{EstimatorConfig, HeartRateEstimator};

    use crate::oled::OledDisplay;
    use crate::tasks;

    /// Raised by the sensor INT edge; consumed by the sensor task.
    static SENSOR_IRQ: IrqFlag = IrqFlag::new();

    pub fn run() -> anyhow::Result<()> {
        // Link esp-idf-sys runtime patches and initialise logging.
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        log::info!("PulseWatch firmware starting…");

        // ---- Peripherals --------------------------------------------------
        let peripherals = Peripherals::take()?;

        // ---- OLED on the hardware I2C controller ---------------------------
        let i2c_config = I2cConfig::new().baudrate(400u32.kHz().into());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio6, // SDA
            peripherals.pins.gpio7, // SCL
            &i2c_config,
        )?;
        let oled_bus: &'static Mutex<I2cDriver<'static>> = Box::leak(Box::new(Mutex::new(i2c)));

        let mut display = OledDisplay::new(oled_bus);
        let mut frame = FrameBuffer::new();
        let oled_ok = display.init().is_ok();
        if oled_ok {
            render_splash(&mut frame, "PulseWatch")?;
            display.show(&frame)?;
            thread::sleep(Duration::from_millis(BOOT_TEXT_DISPLAY_MS));
        } else {
            log::error!("OLED not responding at 0x{:02X}", I2C_ADDR_OLED);
        }

        // ---- Sensor bus ---------------------------------------------------
        let mut sda = PinDriver::input_output_od(peripherals.pins.gpio9.downgrade())?;
        let mut scl = PinDriver::input_output_od(peripherals.pins.gpio10.downgrade())?;
        sda.set_pull(Pull::Up)?;
        scl.set_pull(Pull::Up)?;
        sda.set_high()?;
        scl.set_high()?;

        log::info!("Sensor bus on GPIO{} (SDA) / GPIO{} (SCL)", PIN_SENSOR_SDA, PIN_SENSOR_SCL);
        let soft = SoftTwi::new(sda, scl, Ets, TWI_CPU_FREQ_HZ);
        let mut twi = Twi::new(soft, Ets, BusTimeouts::default());
        twi.init(TWI_CPU_FREQ_HZ, TWI_BUS_FREQ_HZ);

        if !twi.probe(MAX30102_ADDR) {
            log::error!("No device answers at 0x{:02X}", MAX30102_ADDR);
        }

        // ---- Sensor bring-up ----------------------------------------------
        let settings = SensorSettings::default();
        let mut sensor = Max30102::new(RegisterInterface::new(twi, MAX30102_ADDR), Ets);
        match sensor.init(&settings) {
            Ok(id) => log::info!(
                "MAX30102 ready (part 0x{:02X}, rev 0x{:02X})",
                id.part_id,
                id.revision_id
            ),
            Err(e) => {
                log::error!("Sensor init FAILED: {}", e);
                if oled_ok {
                    render_splash(&mut frame, "No sensor")?;
                    display.show(&frame)?;
                }
                return Err(e.into());
            }
        }

        // ---- Sensor interrupt (open-drain, active LOW) ----------------------
        let mut int_pin = PinDriver::input(peripherals.pins.gpio4.downgrade_input())?;
        int_pin.set_pull(Pull::Up)?;
        int_pin.set_interrupt_type(InterruptType::NegEdge)?;
        // SAFETY: the callback only touches atomics.
        unsafe {
            int_pin.subscribe(|| SENSOR_IRQ.raise())?;
        }
        int_pin.enable_interrupt()?;
        log::info!("Sensor INT armed on GPIO{}", PIN_SENSOR_INT);

        // ---- Shared state -------------------------------------------------
        let mailbox = Arc::new(ReadingMailbox::new());
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let estimator =
            HeartRateEstimator::new(EstimatorConfig::with_sample_rate(settings.output_rate_hz()));
        let acquisition = AcquisitionLoop::new(sensor, estimator, Arc::clone(&mailbox));

        let mut button = PinDriver::input(peripherals.pins.gpio3.downgrade_input())?;
        button.set_pull(Pull::Up)?;
        log::info!("Button on GPIO{}, OLED on GPIO{}/GPIO{}", PIN_BUTTON, PIN_OLED_SDA, PIN_OLED_SCL);

        // ---- Spawn tasks (map to FreeRTOS tasks via std::thread) ------------
        thread::Builder::new()
            .name("sensor".into())
            .stack_size(STACK_SENSOR)
            .spawn(move || {
                tasks::sensor::sensor_task(acquisition, int_pin, &SENSOR_IRQ, cmd_rx);
            })?;

        let ui_mailbox = Arc::clone(&mailbox);
        thread::Builder::new()
            .name("ui".into())
            .stack_size(STACK_UI)
            .spawn(move || {
                tasks::ui::ui_task(display, button, ui_mailbox, cmd_tx);
            })?;

        log::info!("Boot complete, entering normal operation");

        // Main thread has nothing left to do; park it.
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod host {
    use std::sync::Arc;

    use pulsewatch::acquisition::{AcquisitionLoop, ReadingMailbox};
    use pulsewatch::bus::twi::{BusTimeouts, Twi};
    use pulsewatch::config::*;
    use pulsewatch::display::{heart_rate_label, render_reading, spo2_label, FrameBuffer};
    use pulsewatch::drivers::max30102::{Max30102, SensorSettings};
    use pulsewatch::drivers::registers::RegisterInterface;
    use pulsewatch::estimator::{EstimatorConfig, HeartRateEstimator};
    use pulsewatch::sim::{SimClock, SimulatedBus};

    const SIM_SECONDS: u32 = 10;

    pub fn run() -> anyhow::Result<()> {
        println!("PulseWatch (simulated sensor)");

        let bus = SimulatedBus::new();
        let clock = SimClock::new();
        let mut twi = Twi::new(bus.clone(), clock.clone(), BusTimeouts::default());
        twi.init(TWI_CPU_FREQ_HZ, TWI_BUS_FREQ_HZ);

        let mut sensor = Max30102::new(RegisterInterface::new(twi, MAX30102_ADDR), clock);
        let settings = SensorSettings::default();
        let id = sensor.init(&settings)?;
        println!("part 0x{:02X} rev 0x{:02X}", id.part_id, id.revision_id);

        let mailbox = Arc::new(ReadingMailbox::new());
        let estimator =
            HeartRateEstimator::new(EstimatorConfig::with_sample_rate(settings.output_rate_hz()));
        let mut acquisition = AcquisitionLoop::new(sensor, estimator, Arc::clone(&mailbox));
        acquisition.refresh_temperature();

        // One main-loop iteration per sample period.
        for second in 1..=SIM_SECONDS {
            if second == 7 {
                println!("-- finger lifted --");
                bus.set_finger(false);
            } else if second == 8 {
                println!("-- finger back --");
                bus.set_finger(true);
            }
            for _ in 0..settings.sample_rate.hz() {
                bus.advance(1);
                acquisition.tick(bus.interrupt_pending());
            }
            match mailbox.latest() {
                Some(r) => println!(
                    "{:>2}s  {:<8} {:<10} finger={}",
                    second,
                    heart_rate_label(&r),
                    spo2_label(&r),
                    r.finger_detected
                ),
                None => println!("{:>2}s  no reading yet", second),
            }
        }

        let stats = mailbox.stats();
        println!(
            "cycles={} published={} irq={} errors={} overflows={} temp={:?}",
            stats.cycles,
            stats.published,
            stats.interrupts,
            stats.bus_errors,
            stats.overflow_recoveries,
            stats.temperature_c
        );

        let mut frame = FrameBuffer::new();
        render_reading(&mut frame, mailbox.latest().as_ref(), false)?;
        print_frame(&frame);
        Ok(())
    }

    /// Two display rows per text line.
    fn print_frame(frame: &FrameBuffer) {
        for y in (0..SCREEN_HEIGHT).step_by(2) {
            let line: String = (0..SCREEN_WIDTH)
                .map(|x| match (frame.pixel(x, y), frame.pixel(x, y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                })
                .collect();
            println!("{}", line.trim_end());
        }
    }
}
