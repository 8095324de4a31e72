// PulseWatch — Bit-banged TWI controller
//
// Presents two open-drain GPIOs as the four-register controller that `Twi`
// drives. Each control-register write performs its bus step synchronously and
// then raises TWINT with the matching status code, so the transport code is
// the same on real controller hardware and on plain pins.
//
// Pins must be configured open-drain with pull-ups: `set_high` releases the
// line, `set_low` pulls it down, `is_high` samples it.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use super::twi::{control, status, TwiPeripheral};
use crate::config::{TWI_BUS_FREQ_HZ, TWI_CLOCK_STRETCH_POLLS};

/// A pin error or a clock held low by a peripheral past the stretch budget.
struct LineFault;

pub struct SoftTwi<SDA, SCL, D> {
    sda: SDA,
    scl: SCL,
    delay: D,
    cpu_hz: u32,
    half_period_ns: u32,
    control: u8,
    status: u8,
    data: u8,
    prescaler: u8,
    held: bool,
    address_pending: bool,
    reading: bool,
}

impl<SDA, SCL, D> SoftTwi<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    /// `cpu_hz` is the reference clock bit-rate values are computed against.
    pub fn new(sda: SDA, scl: SCL, delay: D, cpu_hz: u32) -> Self {
        Self {
            sda,
            scl,
            delay,
            cpu_hz,
            half_period_ns: half_period_ns(TWI_BUS_FREQ_HZ),
            control: 0,
            status: status::NO_INFO,
            data: 0,
            prescaler: 0,
            held: false,
            address_pending: false,
            reading: false,
        }
    }

    pub fn release(self) -> (SDA, SCL, D) {
        (self.sda, self.scl, self.delay)
    }

    fn half(&mut self) {
        self.delay.delay_ns(self.half_period_ns);
    }

    fn sda(&mut self, high: bool) -> Result<(), LineFault> {
        let r = if high { self.sda.set_high() } else { self.sda.set_low() };
        r.map_err(|_| LineFault)
    }

    fn sda_is_high(&mut self) -> Result<bool, LineFault> {
        self.sda.is_high().map_err(|_| LineFault)
    }

    fn scl_low(&mut self) -> Result<(), LineFault> {
        self.scl.set_low().map_err(|_| LineFault)
    }

    /// Release SCL and wait (bounded) for a stretching peripheral to let go.
    fn scl_release(&mut self) -> Result<(), LineFault> {
        self.scl.set_high().map_err(|_| LineFault)?;
        for _ in 0..TWI_CLOCK_STRETCH_POLLS {
            if self.scl.is_high().map_err(|_| LineFault)? {
                return Ok(());
            }
            self.delay.delay_us(1);
        }
        log::warn!("soft TWI: SCL held low past stretch budget");
        Err(LineFault)
    }

    fn bus_free(&mut self) -> Result<bool, LineFault> {
        let scl = self.scl.is_high().map_err(|_| LineFault)?;
        Ok(scl && self.sda_is_high()?)
    }

    fn start_condition(&mut self) -> Result<u8, LineFault> {
        if self.held {
            // Repeated start: bring both lines high without a stop.
            self.sda(true)?;
            self.half();
            self.scl_release()?;
            self.half();
        } else if !self.bus_free()? {
            return Ok(status::ARB_LOST);
        }
        self.sda(false)?;
        self.half();
        self.scl_low()?;

        let code = if self.held { status::REP_START } else { status::START };
        self.held = true;
        self.address_pending = true;
        Ok(code)
    }

    fn stop_condition(&mut self) -> Result<(), LineFault> {
        self.held = false;
        self.address_pending = false;
        self.sda(false)?;
        self.half();
        self.scl_release()?;
        self.half();
        self.sda(true)?;
        self.half();
        Ok(())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), LineFault> {
        self.sda(bit)?;
        self.half();
        self.scl_release()?;
        self.half();
        self.scl_low()
    }

    fn read_bit(&mut self) -> Result<bool, LineFault> {
        self.sda(true)?;
        self.half();
        self.scl_release()?;
        self.half();
        let bit = self.sda_is_high()?;
        self.scl_low()?;
        Ok(bit)
    }

    /// Shift out a byte MSB first; returns `true` if the peripheral ACKed.
    fn write_byte(&mut self, byte: u8) -> Result<bool, LineFault> {
        for i in (0..8).rev() {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        Ok(!self.read_bit()?)
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, LineFault> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | self.read_bit()? as u8;
        }
        self.write_bit(!ack)?;
        Ok(byte)
    }

    fn execute(&mut self, command: u8) -> Result<u8, LineFault> {
        if command & control::TWSTA != 0 {
            return self.start_condition();
        }
        if !self.held {
            return Ok(status::BUS_ERROR);
        }
        if self.address_pending {
            self.address_pending = false;
            self.reading = self.data & 1 != 0;
            let acked = self.write_byte(self.data)?;
            return Ok(match (self.reading, acked) {
                (true, true) => status::MR_SLA_ACK,
                (true, false) => status::MR_SLA_NACK,
                (false, true) => status::MT_SLA_ACK,
                (false, false) => status::MT_SLA_NACK,
            });
        }
        if self.reading {
            let ack = command & control::TWEA != 0;
            self.data = self.read_byte(ack)?;
            Ok(if ack { status::MR_DATA_ACK } else { status::MR_DATA_NACK })
        } else {
            let acked = self.write_byte(self.data)?;
            Ok(if acked { status::MT_DATA_ACK } else { status::MT_DATA_NACK })
        }
    }
}

fn half_period_ns(scl_hz: u32) -> u32 {
    500_000_000 / scl_hz.max(1)
}

impl<SDA, SCL, D> TwiPeripheral for SoftTwi<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    fn set_bit_rate(&mut self, twbr: u8, prescaler: u8) {
        self.prescaler = prescaler & 0x03;
        let divider = 16 + 2 * twbr as u32 * 4u32.pow(self.prescaler as u32);
        self.half_period_ns = half_period_ns(self.cpu_hz / divider);
    }

    fn write_control(&mut self, value: u8) {
        self.control = value;
        if value & control::TWEN == 0 {
            // Controller disabled: let go of both lines.
            let _ = self.sda.set_high();
            let _ = self.scl.set_high();
            self.held = false;
            return;
        }
        if value & control::TWINT == 0 {
            return;
        }
        if value & control::TWSTO != 0 {
            if self.stop_condition().is_err() {
                self.status = status::BUS_ERROR;
            }
            self.control = value & !(control::TWINT | control::TWSTO);
            return;
        }
        self.status = match self.execute(value) {
            Ok(code) => code,
            Err(LineFault) => {
                self.held = false;
                status::BUS_ERROR
            }
        };
        self.control = value | control::TWINT;
    }

    fn control(&mut self) -> u8 {
        self.control
    }

    fn status(&mut self) -> u8 {
        self.status | self.prescaler
    }

    fn write_data(&mut self, value: u8) {
        self.data = value;
    }

    fn data(&mut self) -> u8 {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::twi::{BusTimeouts, Twi};
    use crate::bus::{BusError, Transport};
    use crate::sim::SimClock;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Two pulled-up wires with no peripheral attached. Records SDA every
    /// time SCL is released.
    #[derive(Default)]
    struct Wires {
        sda_low: bool,
        scl_low: bool,
        scl_stuck: bool,
        sampled: Vec<bool>,
    }

    struct Sda(Rc<RefCell<Wires>>);
    struct Scl(Rc<RefCell<Wires>>);

    impl ErrorType for Sda {
        type Error = Infallible;
    }
    impl ErrorType for Scl {
        type Error = Infallible;
    }

    impl OutputPin for Sda {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().sda_low = true;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().sda_low = false;
            Ok(())
        }
    }
    impl InputPin for Sda {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.borrow().sda_low)
        }
        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.borrow().sda_low)
        }
    }

    impl OutputPin for Scl {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().scl_low = true;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            let mut w = self.0.borrow_mut();
            w.scl_low = false;
            let sda = !w.sda_low;
            w.sampled.push(sda);
            Ok(())
        }
    }
    impl InputPin for Scl {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            let w = self.0.borrow();
            Ok(!w.scl_low && !w.scl_stuck)
        }
        fn is_low(&mut self) -> Result<bool, Infallible> {
            let w = self.0.borrow();
            Ok(w.scl_low || w.scl_stuck)
        }
    }

    fn bench() -> (Rc<RefCell<Wires>>, Twi<SoftTwi<Sda, Scl, SimClock>, SimClock>) {
        let wires = Rc::new(RefCell::new(Wires::default()));
        let clock = SimClock::new();
        let soft = SoftTwi::new(
            Sda(wires.clone()),
            Scl(wires.clone()),
            clock.clone(),
            16_000_000,
        );
        let mut twi = Twi::new(soft, clock, BusTimeouts::default());
        twi.init(16_000_000, 100_000);
        (wires, twi)
    }

    #[test]
    fn empty_bus_nacks_address() {
        let (wires, mut twi) = bench();
        twi.start().unwrap();
        wires.borrow_mut().sampled.clear();

        assert_eq!(
            twi.address(0x57, false),
            Err(BusError::Nack { status: status::MT_SLA_NACK })
        );
        let bits = wires.borrow().sampled.clone();
        // 0x57 << 1 | W, then the released ACK slot reads high.
        assert_eq!(
            bits,
            vec![true, false, true, false, true, true, true, false, true]
        );
        twi.stop();
        assert!(!wires.borrow().sda_low);
        assert!(!wires.borrow().scl_low);
    }

    #[test]
    fn busy_bus_loses_arbitration() {
        let (wires, mut twi) = bench();
        wires.borrow_mut().sda_low = true;
        assert_eq!(
            twi.start(),
            Err(BusError::UnexpectedStatus {
                expected: status::START,
                actual: status::ARB_LOST,
            })
        );
    }

    #[test]
    fn stuck_clock_is_a_bus_error() {
        let (wires, mut twi) = bench();
        twi.start().unwrap();
        wires.borrow_mut().scl_stuck = true;
        assert_eq!(
            twi.write_byte(0x00),
            Err(BusError::UnexpectedStatus {
                expected: status::MT_DATA_ACK,
                actual: status::BUS_ERROR,
            })
        );
    }

    #[test]
    fn bit_rate_sets_half_period() {
        let clock = SimClock::new();
        let wires = Rc::new(RefCell::new(Wires::default()));
        let mut soft = SoftTwi::new(Sda(wires.clone()), Scl(wires), clock, 16_000_000);
        soft.set_bit_rate(12, 0);
        assert_eq!(soft.half_period_ns, 1_250);
    }
}
