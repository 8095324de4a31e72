// PulseWatch — Register access for a single two-wire device
//
// Typed register read / write / burst-read at one fixed 7-bit address.
// Each call is one complete bus transaction; a failure at any step still
// releases the bus.

use crate::bus::{self, BusError, Transport};

pub struct RegisterInterface<T> {
    bus: T,
    address: u8,
}

impl<T: Transport> RegisterInterface<T> {
    pub fn new(bus: T, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.bus
    }

    pub fn release(self) -> T {
        self.bus
    }

    /// start → address(W) → reg → value → stop
    pub fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        let address = self.address;
        bus::transaction(&mut self.bus, |b| {
            b.address(address, false)?;
            b.write_byte(reg)?;
            b.write_byte(value)
        })
    }

    /// start → address(W) → reg → restart → address(R) → read(NACK) → stop
    pub fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.read_into(reg, &mut value)?;
        Ok(value[0])
    }

    /// Burst read of `count` consecutive bytes starting at `reg`.
    pub fn read_registers(&mut self, reg: u8, count: usize) -> Result<Vec<u8>, BusError> {
        let mut buf = vec![0u8; count];
        self.read_into(reg, &mut buf)?;
        Ok(buf)
    }

    /// Burst read into a caller-owned buffer. An empty buffer touches no bus.
    pub fn read_into(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        if buf.is_empty() {
            return Ok(());
        }
        let address = self.address;
        bus::transaction(&mut self.bus, |b| {
            b.address(address, false)?;
            b.write_byte(reg)?;
            b.restart()?;
            b.address(address, true)?;
            bus::read_into(b, buf)
        })
    }

    /// Read-modify-write: replace the bits selected by `mask` with `bits`.
    pub fn modify_register(&mut self, reg: u8, mask: u8, bits: u8) -> Result<u8, BusError> {
        let current = self.read_register(reg)?;
        let value = (current & !mask) | (bits & mask);
        if value != current {
            self.write_register(reg, value)?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{BusOp, MockTransport, OpKind};
    use crate::config::MAX30102_ADDR;

    fn regs() -> RegisterInterface<MockTransport> {
        RegisterInterface::new(MockTransport::new(), MAX30102_ADDR)
    }

    #[test]
    fn read_register_follows_combined_format() {
        let mut r = regs();
        assert_eq!(r.read_register(0xFF).unwrap(), 0x15);
        assert_eq!(
            r.transport().ops(),
            &[
                BusOp::Start,
                BusOp::Address { address: 0x57, read: false },
                BusOp::Write(0xFF),
                BusOp::Restart,
                BusOp::Address { address: 0x57, read: true },
                BusOp::Read { ack: false },
                BusOp::Stop,
            ]
        );
    }

    #[test]
    fn write_register_sends_pointer_then_value() {
        let mut r = regs();
        r.write_register(0x0C, 0x24).unwrap();
        assert_eq!(
            r.transport().ops(),
            &[
                BusOp::Start,
                BusOp::Address { address: 0x57, read: false },
                BusOp::Write(0x0C),
                BusOp::Write(0x24),
                BusOp::Stop,
            ]
        );
        assert_eq!(r.transport().device.register(0x0C), 0x24);
    }

    #[test]
    fn zero_length_burst_is_silent() {
        let mut r = regs();
        assert_eq!(r.read_registers(0x07, 0).unwrap(), Vec::<u8>::new());
        assert!(r.transport().ops().is_empty());
    }

    #[test]
    fn burst_read_acks_all_but_last() {
        let mut r = regs();
        let bytes = r.read_registers(0xFE, 2).unwrap();
        assert_eq!(bytes.len(), 2);
        let acks: Vec<bool> = r
            .transport()
            .ops()
            .iter()
            .filter_map(|op| match op {
                BusOp::Read { ack } => Some(*ack),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec![true, false]);
    }

    #[test]
    fn every_failure_point_still_stops() {
        let steps = [
            (OpKind::Start, 0),
            (OpKind::Address, 0),
            (OpKind::Write, 0),
            (OpKind::Restart, 0),
            (OpKind::Address, 1),
            (OpKind::Read, 0),
        ];
        for (kind, nth) in steps {
            let mut r = regs();
            r.transport().fail_on(kind, nth, BusError::Timeout);
            assert_eq!(r.read_register(0x09), Err(BusError::Timeout), "{:?}/{}", kind, nth);
            let bus = r.transport();
            assert_eq!(bus.starts(), 1);
            assert_eq!(bus.stops(), 1);
            assert_eq!(bus.ops().last(), Some(&BusOp::Stop));
        }
    }

    #[test]
    fn modify_register_only_writes_on_change() {
        let mut r = regs();
        r.write_register(0x09, 0x83).unwrap();
        r.transport().clear_ops();

        assert_eq!(r.modify_register(0x09, 0x07, 0x03).unwrap(), 0x83);
        assert_eq!(r.transport().stops(), 1);

        assert_eq!(r.modify_register(0x09, 0x07, 0x02).unwrap(), 0x82);
        assert_eq!(r.transport().device.register(0x09), 0x82);
    }
}
