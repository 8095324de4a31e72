// PulseWatch — Two-wire Bus Transport
//
// Byte-level master primitives (start / restart / stop / address / byte I/O).
// Register-level access is layered on top in `drivers::registers`.

pub mod soft;
pub mod twi;

#[cfg(test)]
pub(crate) mod mock;

use thiserror::Error;

/// Failure of a single bus primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The controller never reported the step as complete.
    #[error("bus handshake timed out")]
    Timeout,
    /// The controller reported a status code that does not belong to this step.
    #[error("unexpected bus status 0x{actual:02X} (expected 0x{expected:02X})")]
    UnexpectedStatus { expected: u8, actual: u8 },
    /// The addressed device (or the data byte) was not acknowledged.
    #[error("not acknowledged (status 0x{status:02X})")]
    Nack { status: u8 },
}

/// Bounded busy-wait budget: `polls` checks separated by `poll_interval_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub polls: u32,
    pub poll_interval_us: u32,
}

impl Timeout {
    pub const fn new(polls: u32, poll_interval_us: u32) -> Self {
        Self { polls, poll_interval_us }
    }

    /// Total time the budget allows, in microseconds.
    pub fn budget_us(&self) -> u64 {
        self.polls as u64 * self.poll_interval_us as u64
    }
}

/// Blocking two-wire master.
///
/// Implementations perform each step to completion before returning; there
/// is no way to interleave two transactions on one transport.
pub trait Transport {
    /// Assert a start condition.
    fn start(&mut self) -> Result<(), BusError>;

    /// Assert a repeated start without releasing the bus.
    fn restart(&mut self) -> Result<(), BusError>;

    /// Assert a stop condition. Best effort: never blocks forever and never fails.
    fn stop(&mut self);

    /// Send the 7-bit `address` with the R/W bit and check for ACK.
    fn address(&mut self, address: u8, read: bool) -> Result<(), BusError>;

    /// Send one data byte; succeeds only if the device acknowledged it.
    fn write_byte(&mut self, data: u8) -> Result<(), BusError>;

    /// Receive one byte, answering with ACK (more to come) or NACK (last byte).
    fn read_byte(&mut self, ack: bool) -> Result<u8, BusError>;

    /// Returns `true` if a device answers at `address`.
    fn probe(&mut self, address: u8) -> bool {
        transaction(self, |bus| bus.address(address, false)).is_ok()
    }

    /// Plain write of `data` to `address` (no register pointer).
    fn write_bytes(&mut self, address: u8, data: &[u8]) -> Result<(), BusError> {
        transaction(self, |bus| {
            bus.address(address, false)?;
            data.iter().try_for_each(|&b| bus.write_byte(b))
        })
    }

    /// Plain read of `buf.len()` bytes from `address`.
    fn read_bytes(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        transaction(self, |bus| {
            bus.address(address, true)?;
            read_into(bus, buf)
        })
    }
}

/// Run `body` between a start and a stop condition.
///
/// The stop is issued on every path, including a failed start, so the bus
/// is never left held by a partial transaction.
pub fn transaction<T, R, F>(bus: &mut T, body: F) -> Result<R, BusError>
where
    T: Transport + ?Sized,
    F: FnOnce(&mut T) -> Result<R, BusError>,
{
    let result = bus.start().and_then(|()| body(bus));
    bus.stop();
    if let Err(e) = &result {
        log::debug!("bus transaction aborted: {}", e);
    }
    result
}

/// Fill `buf`, ACKing every byte but the last.
pub fn read_into<T: Transport + ?Sized>(bus: &mut T, buf: &mut [u8]) -> Result<(), BusError> {
    let last = buf.len().saturating_sub(1);
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = bus.read_byte(i < last)?;
    }
    Ok(())
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn start(&mut self) -> Result<(), BusError> {
        (**self).start()
    }

    fn restart(&mut self) -> Result<(), BusError> {
        (**self).restart()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn address(&mut self, address: u8, read: bool) -> Result<(), BusError> {
        (**self).address(address, read)
    }

    fn write_byte(&mut self, data: u8) -> Result<(), BusError> {
        (**self).write_byte(data)
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, BusError> {
        (**self).read_byte(ack)
    }
}
