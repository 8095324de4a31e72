// PulseWatch — TWI controller transport
//
// Drives a register-level two-wire controller (bit-rate, control, status and
// data registers, classic TWI status codes) through the `Transport` steps.
// Every wait is bounded by a `Timeout` budget spent on an injected delay, so
// timeouts are deterministic under a fake clock.

use embedded_hal::delay::DelayNs;

use super::{BusError, Timeout, Transport};
use crate::config::*;

/// Control register bits.
pub mod control {
    pub const TWINT: u8 = 1 << 7; // operation complete / write 1 to start the next one
    pub const TWEA: u8 = 1 << 6;  // acknowledge received bytes
    pub const TWSTA: u8 = 1 << 5; // start condition
    pub const TWSTO: u8 = 1 << 4; // stop condition, self-clearing
    pub const TWEN: u8 = 1 << 2;  // controller enable
}

/// Status register codes (top 5 bits).
pub mod status {
    pub const MASK: u8 = 0xF8;
    pub const BUS_ERROR: u8 = 0x00;
    pub const START: u8 = 0x08;
    pub const REP_START: u8 = 0x10;
    pub const MT_SLA_ACK: u8 = 0x18;
    pub const MT_SLA_NACK: u8 = 0x20;
    pub const MT_DATA_ACK: u8 = 0x28;
    pub const MT_DATA_NACK: u8 = 0x30;
    pub const ARB_LOST: u8 = 0x38;
    pub const MR_SLA_ACK: u8 = 0x40;
    pub const MR_SLA_NACK: u8 = 0x48;
    pub const MR_DATA_ACK: u8 = 0x50;
    pub const MR_DATA_NACK: u8 = 0x58;
    pub const NO_INFO: u8 = 0xF8;
}

/// The hardware side: four 8-bit registers of a two-wire controller.
pub trait TwiPeripheral {
    /// Program the bit-rate register and the status-register prescaler bits.
    fn set_bit_rate(&mut self, twbr: u8, prescaler: u8);
    fn write_control(&mut self, value: u8);
    fn control(&mut self) -> u8;
    /// Raw status register (prescaler bits included).
    fn status(&mut self) -> u8;
    fn write_data(&mut self, value: u8);
    fn data(&mut self) -> u8;
}

/// Wait budgets for the two kinds of hardware handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTimeouts {
    /// Start / address / byte completion (TWINT).
    pub handshake: Timeout,
    /// Stop condition execution (TWSTO self-clear).
    pub stop: Timeout,
}

impl Default for BusTimeouts {
    fn default() -> Self {
        Self {
            handshake: Timeout::new(TWI_HANDSHAKE_POLLS, TWI_POLL_INTERVAL_US),
            stop: Timeout::new(TWI_STOP_POLLS, TWI_POLL_INTERVAL_US),
        }
    }
}

/// Bit-rate register value for `scl_hz` with prescaler 1:
/// `SCL = F_CPU / (16 + 2 * TWBR)`.
pub fn bit_rate_register(cpu_hz: u32, scl_hz: u32) -> u8 {
    if scl_hz == 0 {
        return u8::MAX;
    }
    let divider = (cpu_hz / scl_hz).saturating_sub(16) / 2;
    divider.min(u8::MAX as u32) as u8
}

pub struct Twi<P, D> {
    hw: P,
    delay: D,
    timeouts: BusTimeouts,
}

impl<P: TwiPeripheral, D: DelayNs> Twi<P, D> {
    pub fn new(hw: P, delay: D, timeouts: BusTimeouts) -> Self {
        Self { hw, delay, timeouts }
    }

    /// Program the bus clock and enable the controller.
    pub fn init(&mut self, cpu_hz: u32, scl_hz: u32) {
        let twbr = bit_rate_register(cpu_hz, scl_hz);
        self.hw.set_bit_rate(twbr, 0);
        self.hw.write_control(control::TWEN);
        log::info!("TWI enabled: {} Hz (TWBR={})", scl_hz, twbr);
    }

    pub fn peripheral(&mut self) -> &mut P {
        &mut self.hw
    }

    pub fn release(self) -> (P, D) {
        (self.hw, self.delay)
    }

    /// Poll TWINT within the handshake budget, then return the masked status.
    fn wait_complete(&mut self) -> Result<u8, BusError> {
        let budget = self.timeouts.handshake;
        for _ in 0..budget.polls {
            if self.hw.control() & control::TWINT != 0 {
                return Ok(self.hw.status() & status::MASK);
            }
            self.delay.delay_us(budget.poll_interval_us);
        }
        Err(BusError::Timeout)
    }

    /// Kick off a step and check its outcome against `ok` (and its NACK twin).
    fn run_step(&mut self, command: u8, ok: u8, nack: Option<u8>) -> Result<(), BusError> {
        self.hw.write_control(command);
        let actual = self.wait_complete()?;
        match actual {
            s if s == ok => Ok(()),
            s if Some(s) == nack => Err(BusError::Nack { status: s }),
            s => Err(BusError::UnexpectedStatus { expected: ok, actual: s }),
        }
    }
}

impl<P: TwiPeripheral, D: DelayNs> Transport for Twi<P, D> {
    fn start(&mut self) -> Result<(), BusError> {
        self.run_step(
            control::TWINT | control::TWSTA | control::TWEN,
            status::START,
            None,
        )
    }

    fn restart(&mut self) -> Result<(), BusError> {
        self.run_step(
            control::TWINT | control::TWSTA | control::TWEN,
            status::REP_START,
            None,
        )
    }

    fn stop(&mut self) {
        self.hw
            .write_control(control::TWINT | control::TWSTO | control::TWEN);

        let budget = self.timeouts.stop;
        for _ in 0..budget.polls {
            if self.hw.control() & control::TWSTO == 0 {
                return;
            }
            self.delay.delay_us(budget.poll_interval_us);
        }
        log::warn!("TWI stop not confirmed after {} us", budget.budget_us());
    }

    fn address(&mut self, address: u8, read: bool) -> Result<(), BusError> {
        self.hw.write_data((address << 1) | read as u8);
        let (ok, nack) = if read {
            (status::MR_SLA_ACK, status::MR_SLA_NACK)
        } else {
            (status::MT_SLA_ACK, status::MT_SLA_NACK)
        };
        self.run_step(control::TWINT | control::TWEN, ok, Some(nack))
    }

    fn write_byte(&mut self, data: u8) -> Result<(), BusError> {
        self.hw.write_data(data);
        self.run_step(
            control::TWINT | control::TWEN,
            status::MT_DATA_ACK,
            Some(status::MT_DATA_NACK),
        )
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, BusError> {
        let (command, expected) = if ack {
            (
                control::TWINT | control::TWEN | control::TWEA,
                status::MR_DATA_ACK,
            )
        } else {
            (control::TWINT | control::TWEN, status::MR_DATA_NACK)
        };
        self.run_step(command, expected, None)?;
        Ok(self.hw.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimulatedBus};

    fn twi(bus: &SimulatedBus, clock: &SimClock) -> Twi<SimulatedBus, SimClock> {
        let mut twi = Twi::new(bus.clone(), clock.clone(), BusTimeouts::default());
        twi.init(TWI_CPU_FREQ_HZ, TWI_BUS_FREQ_HZ);
        twi
    }

    #[test]
    fn bit_rate_for_standard_mode() {
        assert_eq!(bit_rate_register(16_000_000, 100_000), 72);
        assert_eq!(bit_rate_register(16_000_000, 400_000), 12);
        assert_eq!(bit_rate_register(16_000_000, 2_000_000), 0);
    }

    #[test]
    fn register_round_trip_over_status_codes() {
        let bus = SimulatedBus::new();
        let clock = SimClock::new();
        let mut twi = twi(&bus, &clock);

        twi.start().unwrap();
        twi.address(MAX30102_ADDR, false).unwrap();
        twi.write_byte(0xFF).unwrap();
        twi.restart().unwrap();
        twi.address(MAX30102_ADDR, true).unwrap();
        let id = twi.read_byte(false).unwrap();
        twi.stop();

        assert_eq!(id, MAX30102_EXPECTED_PART_ID);
        assert_eq!(bus.bit_rate(), 72);
    }

    #[test]
    fn restart_without_held_bus_is_unexpected() {
        let bus = SimulatedBus::new();
        let clock = SimClock::new();
        let mut twi = twi(&bus, &clock);

        // A plain start reports START, not REP_START.
        assert_eq!(
            twi.restart(),
            Err(BusError::UnexpectedStatus {
                expected: status::REP_START,
                actual: status::START,
            })
        );
        twi.stop();
    }

    #[test]
    fn wrong_address_is_nacked() {
        let bus = SimulatedBus::new();
        let clock = SimClock::new();
        let mut twi = twi(&bus, &clock);

        twi.start().unwrap();
        assert_eq!(
            twi.address(0x3C, false),
            Err(BusError::Nack { status: status::MT_SLA_NACK })
        );
        twi.stop();
    }

    #[test]
    fn stalled_handshake_times_out_after_budget() {
        let bus = SimulatedBus::new();
        let clock = SimClock::new();
        let mut twi = twi(&bus, &clock);
        bus.set_stalled(true);

        assert_eq!(twi.start(), Err(BusError::Timeout));
        // 100 polls × 100 µs
        assert_eq!(clock.elapsed_us(), 10_000);
    }

    #[test]
    fn stop_gives_up_when_controller_holds_stop() {
        let bus = SimulatedBus::new();
        let clock = SimClock::new();
        let mut twi = twi(&bus, &clock);
        bus.set_stop_stuck(true);

        twi.stop();
        assert_eq!(clock.elapsed_us(), 100_000);
    }
}
