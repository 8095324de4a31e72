// Logging transport for unit tests: records every primitive, answers from a
// `DeviceModel`, and can inject a failure at the n-th call of a given kind.

use super::{BusError, Transport};
use crate::config::MAX30102_ADDR;
use crate::sim::DeviceModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Start,
    Restart,
    Stop,
    Address { address: u8, read: bool },
    Write(u8),
    Read { ack: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Start,
    Restart,
    Address,
    Write,
    Read,
}

struct Fault {
    kind: OpKind,
    remaining: usize,
    error: BusError,
}

pub struct MockTransport {
    pub device: DeviceModel,
    ops: Vec<BusOp>,
    fault: Option<Fault>,
    selected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_device(DeviceModel::new())
    }

    pub fn with_device(device: DeviceModel) -> Self {
        Self {
            device,
            ops: Vec::new(),
            fault: None,
            selected: false,
        }
    }

    /// Fail the `nth` (0-based) upcoming call of `kind` with `error`.
    pub fn fail_on(&mut self, kind: OpKind, nth: usize, error: BusError) {
        self.fault = Some(Fault {
            kind,
            remaining: nth,
            error,
        });
    }

    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn starts(&self) -> usize {
        self.ops.iter().filter(|op| **op == BusOp::Start).count()
    }

    pub fn stops(&self) -> usize {
        self.ops.iter().filter(|op| **op == BusOp::Stop).count()
    }

    fn check_fault(&mut self, kind: OpKind) -> Result<(), BusError> {
        match &mut self.fault {
            Some(fault) if fault.kind == kind => {
                if fault.remaining == 0 {
                    let error = fault.error;
                    self.fault = None;
                    Err(error)
                } else {
                    fault.remaining -= 1;
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

impl Transport for MockTransport {
    fn start(&mut self) -> Result<(), BusError> {
        self.ops.push(BusOp::Start);
        self.check_fault(OpKind::Start)?;
        self.device.begin_transfer();
        Ok(())
    }

    fn restart(&mut self) -> Result<(), BusError> {
        self.ops.push(BusOp::Restart);
        self.check_fault(OpKind::Restart)?;
        self.device.begin_transfer();
        Ok(())
    }

    fn stop(&mut self) {
        self.ops.push(BusOp::Stop);
        self.selected = false;
    }

    fn address(&mut self, address: u8, read: bool) -> Result<(), BusError> {
        self.ops.push(BusOp::Address { address, read });
        self.check_fault(OpKind::Address)?;
        self.selected = address == MAX30102_ADDR;
        if self.selected {
            Ok(())
        } else {
            Err(BusError::Nack {
                status: if read { 0x48 } else { 0x20 },
            })
        }
    }

    fn write_byte(&mut self, data: u8) -> Result<(), BusError> {
        self.ops.push(BusOp::Write(data));
        self.check_fault(OpKind::Write)?;
        if !self.selected {
            return Err(BusError::Nack { status: 0x30 });
        }
        self.device.write(data);
        Ok(())
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, BusError> {
        self.ops.push(BusOp::Read { ack });
        self.check_fault(OpKind::Read)?;
        Ok(self.device.read())
    }
}
