// PulseWatch — Simulated sensor bench
//
// A MAX30102 as seen from the wire (`DeviceModel`), a register-level TWI
// controller wired to it (`SimulatedBus`), a virtual clock (`SimClock`) and a
// synthetic PPG waveform (`PulseTrain`). Drives the host binary and the
// integration tests; nothing here touches real hardware.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;

use crate::bus::twi::{control, status, TwiPeripheral};
use crate::config::{FIFO_DEPTH, MAX30102_ADDR, MAX30102_EXPECTED_PART_ID};
use crate::drivers::max30102::{int, mode, reg, BYTES_PER_SAMPLE, TEMP_EN};

const REVISION_ID: u8 = 0x03;
const PTR_MASK: u8 = FIFO_DEPTH - 1;
const ROLLOVER_EN: u8 = 1 << 4;
const SMP_AVE_SHIFT: u8 = 5;

// ---------------------------------------------------------------------------
// Device model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeviceModel {
    regs: [u8; 256],
    pointer: u8,
    expect_pointer: bool,
    fifo: [[u8; BYTES_PER_SAMPLE]; FIFO_DEPTH as usize],
    fifo_byte: usize,
    unread: u8,
    /// Running red/IR sums and count for the averaging block in progress.
    averaging: (u64, u64, u32),
    reset_latency: u32,
    reset_polls_left: u32,
    temperature: (i8, u8),
    temperature_stuck: bool,
}

impl DeviceModel {
    pub fn new() -> Self {
        let mut dev = Self {
            regs: [0; 256],
            pointer: 0,
            expect_pointer: false,
            fifo: [[0; BYTES_PER_SAMPLE]; FIFO_DEPTH as usize],
            fifo_byte: 0,
            unread: 0,
            averaging: (0, 0, 0),
            reset_latency: 0,
            reset_polls_left: 0,
            temperature: (25, 4),
            temperature_stuck: false,
        };
        dev.power_on();
        dev
    }

    fn power_on(&mut self) {
        self.regs = [0; 256];
        self.regs[reg::PART_ID as usize] = MAX30102_EXPECTED_PART_ID;
        self.regs[reg::REV_ID as usize] = REVISION_ID;
        self.regs[reg::INT_STATUS_1 as usize] = int::PWR_RDY;
        self.fifo_byte = 0;
        self.unread = 0;
        self.averaging = (0, 0, 0);
    }

    /// Number of MODE_CONFIG reads that still see the reset bit after a reset.
    pub fn set_reset_latency(&mut self, polls: u32) {
        self.reset_latency = polls;
    }

    /// Die temperature reported by the next conversion (integer °C, 1/16 steps).
    pub fn set_die_temperature(&mut self, integer: i8, fraction: u8) {
        self.temperature = (integer, fraction & 0x0F);
    }

    /// Conversions never complete.
    pub fn set_temperature_stuck(&mut self, stuck: bool) {
        self.temperature_stuck = stuck;
    }

    pub fn register(&self, address: u8) -> u8 {
        self.regs[address as usize]
    }

    /// Backdoor write that bypasses the register side effects.
    pub fn set_register(&mut self, address: u8, value: u8) {
        self.regs[address as usize] = value;
    }

    pub fn unread(&self) -> u8 {
        self.unread
    }

    /// True while an enabled interrupt is pending (INT pin low).
    pub fn interrupt_pending(&self) -> bool {
        let pending1 = self.register(reg::INT_STATUS_1) & self.register(reg::INT_ENABLE_1);
        let pending2 = self.register(reg::INT_STATUS_2) & self.register(reg::INT_ENABLE_2);
        // Power-ready cannot be masked.
        pending1 != 0 || pending2 != 0 || self.register(reg::INT_STATUS_1) & int::PWR_RDY != 0
    }

    /// Start or repeated start: the next written byte is the register pointer.
    pub fn begin_transfer(&mut self) {
        self.expect_pointer = true;
    }

    pub fn write(&mut self, data: u8) {
        if self.expect_pointer {
            self.expect_pointer = false;
            self.pointer = data;
            self.fifo_byte = 0;
            return;
        }
        self.write_register(self.pointer, data);
        self.advance_pointer();
    }

    pub fn read(&mut self) -> u8 {
        self.expect_pointer = false;
        let value = match self.pointer {
            reg::FIFO_DATA => self.read_fifo_byte(),
            reg::INT_STATUS_1 | reg::INT_STATUS_2 => {
                let value = self.regs[self.pointer as usize];
                self.regs[self.pointer as usize] = 0;
                value
            }
            reg::MODE_CONFIG => {
                let value = self.regs[reg::MODE_CONFIG as usize];
                if value & mode::RESET != 0 {
                    if self.reset_polls_left == 0 {
                        self.regs[reg::MODE_CONFIG as usize] &= !mode::RESET;
                        self.regs[reg::MODE_CONFIG as usize]
                    } else {
                        self.reset_polls_left -= 1;
                        value
                    }
                } else {
                    value
                }
            }
            other => self.regs[other as usize],
        };
        self.advance_pointer();
        value
    }

    /// Feed one ADC conversion. With sample averaging configured, only every
    /// Nth conversion queues a FIFO entry (the mean of the block).
    pub fn push_sample(&mut self, red: u32, ir: u32) {
        let fifo_config = self.register(reg::FIFO_CONFIG);
        let block = 1u32 << ((fifo_config >> SMP_AVE_SHIFT) & 0b111).min(5);
        let (red_sum, ir_sum, count) = &mut self.averaging;
        *red_sum += red as u64;
        *ir_sum += ir as u64;
        *count += 1;
        if *count < block {
            return;
        }
        let red = (*red_sum / block as u64) as u32;
        let ir = (*ir_sum / block as u64) as u32;
        self.averaging = (0, 0, 0);
        self.queue_entry(fifo_config, red, ir);
    }

    fn queue_entry(&mut self, fifo_config: u8, red: u32, ir: u32) {
        if self.unread == FIFO_DEPTH {
            let ovf = self.register(reg::FIFO_OVF_CNT);
            self.regs[reg::FIFO_OVF_CNT as usize] = (ovf + 1).min(PTR_MASK);
            if fifo_config & ROLLOVER_EN == 0 {
                return;
            }
            let rd = self.register(reg::FIFO_RD_PTR);
            self.regs[reg::FIFO_RD_PTR as usize] = (rd + 1) & PTR_MASK;
        } else {
            self.unread += 1;
        }

        let wr = self.register(reg::FIFO_WR_PTR);
        self.fifo[wr as usize] = encode(red, ir);
        self.regs[reg::FIFO_WR_PTR as usize] = (wr + 1) & PTR_MASK;

        let mut flags = int::PPG_RDY;
        let free_slots_trigger = fifo_config & 0x0F;
        if self.unread >= FIFO_DEPTH - free_slots_trigger {
            flags |= int::A_FULL;
        }
        self.regs[reg::INT_STATUS_1 as usize] |= flags;
    }

    fn advance_pointer(&mut self) {
        if self.pointer != reg::FIFO_DATA {
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn read_fifo_byte(&mut self) -> u8 {
        let rd = self.register(reg::FIFO_RD_PTR);
        let value = self.fifo[rd as usize][self.fifo_byte];
        self.fifo_byte += 1;
        if self.fifo_byte == BYTES_PER_SAMPLE {
            self.fifo_byte = 0;
            if self.unread > 0 {
                self.unread -= 1;
                self.regs[reg::FIFO_RD_PTR as usize] = (rd + 1) & PTR_MASK;
            }
        }
        value
    }

    fn resync_unread(&mut self) {
        let wr = self.register(reg::FIFO_WR_PTR);
        let rd = self.register(reg::FIFO_RD_PTR);
        self.unread = wr.wrapping_sub(rd) & PTR_MASK;
    }

    fn write_register(&mut self, address: u8, value: u8) {
        match address {
            reg::INT_STATUS_1 | reg::INT_STATUS_2 | reg::REV_ID | reg::PART_ID => {}
            reg::FIFO_WR_PTR | reg::FIFO_RD_PTR => {
                self.regs[address as usize] = value & PTR_MASK;
                self.resync_unread();
            }
            reg::FIFO_OVF_CNT => self.regs[address as usize] = value & PTR_MASK,
            reg::MODE_CONFIG if value & mode::RESET != 0 => {
                self.power_on();
                self.regs[reg::MODE_CONFIG as usize] = mode::RESET;
                self.reset_polls_left = self.reset_latency;
            }
            reg::TEMP_CONFIG if value & TEMP_EN != 0 => {
                if self.temperature_stuck {
                    self.regs[address as usize] = TEMP_EN;
                } else {
                    self.regs[reg::TEMP_INT as usize] = self.temperature.0 as u8;
                    self.regs[reg::TEMP_FRAC as usize] = self.temperature.1;
                    self.regs[reg::INT_STATUS_2 as usize] |= int::DIE_TEMP_RDY;
                    self.regs[address as usize] = 0;
                }
            }
            _ => self.regs[address as usize] = value,
        }
    }
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(red: u32, ir: u32) -> [u8; BYTES_PER_SAMPLE] {
    let r = red & 0x3FFFF;
    let i = ir & 0x3FFFF;
    [
        (r >> 16) as u8,
        (r >> 8) as u8,
        r as u8,
        (i >> 16) as u8,
        (i >> 8) as u8,
        i as u8,
    ]
}

// ---------------------------------------------------------------------------
// Signal source
// ---------------------------------------------------------------------------

/// Synthetic PPG: flat baseline, one sharp pulse every `period` samples and
/// a shallow notch every 16 samples so that each 16-sample batch shows some
/// swing.
#[derive(Debug, Clone)]
pub struct PulseTrain {
    period: u64,
    t: u64,
    finger: bool,
    pub ir_base: u32,
    pub red_base: u32,
    pub ir_pulse: u32,
    pub red_pulse: u32,
}

impl PulseTrain {
    pub fn new(period: u32) -> Self {
        Self {
            period: period.max(1) as u64,
            t: 0,
            finger: true,
            ir_base: 50_000,
            red_base: 40_000,
            ir_pulse: 2_000,
            red_pulse: 1_000,
        }
    }

    pub fn set_finger(&mut self, present: bool) {
        self.finger = present;
    }

    /// Next `(red, ir)` pair.
    pub fn next_sample(&mut self) -> (u32, u32) {
        let t = self.t;
        self.t += 1;
        if !self.finger {
            return (300, 400);
        }
        if t % self.period == 0 {
            (self.red_base + self.red_pulse, self.ir_base + self.ir_pulse)
        } else if t % 16 == 4 {
            (self.red_base - self.red_pulse / 2, self.ir_base - self.ir_pulse / 2)
        } else {
            (self.red_base, self.ir_base)
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated controller
// ---------------------------------------------------------------------------

struct BusState {
    device: DeviceModel,
    signal: PulseTrain,
    control: u8,
    status: u8,
    data: u8,
    twbr: u8,
    prescaler: u8,
    held: bool,
    address_pending: bool,
    selected: Option<bool>,
    stalled: bool,
    stop_stuck: bool,
    nack: bool,
}

impl BusState {
    fn execute(&mut self, command: u8) {
        if command & control::TWSTA != 0 {
            self.status = if self.held { status::REP_START } else { status::START };
            self.held = true;
            self.address_pending = true;
            self.selected = None;
            self.device.begin_transfer();
            return;
        }
        if !self.held {
            self.status = status::BUS_ERROR;
            return;
        }
        if self.address_pending {
            self.address_pending = false;
            let read = self.data & 1 != 0;
            let present = self.data >> 1 == MAX30102_ADDR && !self.nack;
            self.selected = present.then_some(read);
            self.status = match (present, read) {
                (true, true) => status::MR_SLA_ACK,
                (true, false) => status::MT_SLA_ACK,
                (false, true) => status::MR_SLA_NACK,
                (false, false) => status::MT_SLA_NACK,
            };
            return;
        }
        self.status = match self.selected {
            Some(false) => {
                self.device.write(self.data);
                status::MT_DATA_ACK
            }
            Some(true) => {
                self.data = self.device.read();
                if command & control::TWEA != 0 {
                    status::MR_DATA_ACK
                } else {
                    status::MR_DATA_NACK
                }
            }
            None => status::MT_DATA_NACK,
        };
    }
}

/// Shared handle to a simulated controller + sensor. Clones refer to the
/// same bench, so a test can keep one while the driver owns another.
#[derive(Clone)]
pub struct SimulatedBus {
    state: Rc<RefCell<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::with_device(DeviceModel::new(), PulseTrain::new(40))
    }

    pub fn with_device(device: DeviceModel, signal: PulseTrain) -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState {
                device,
                signal,
                control: 0,
                status: status::NO_INFO,
                data: 0,
                twbr: 0,
                prescaler: 0,
                held: false,
                address_pending: false,
                selected: None,
                stalled: false,
                stop_stuck: false,
                nack: false,
            })),
        }
    }

    /// Controller never reports completion.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    /// Stop condition never clears.
    pub fn set_stop_stuck(&self, stuck: bool) {
        self.state.borrow_mut().stop_stuck = stuck;
    }

    /// Sensor stops acknowledging its address.
    pub fn set_nack(&self, nack: bool) {
        self.state.borrow_mut().nack = nack;
    }

    pub fn bit_rate(&self) -> u8 {
        self.state.borrow().twbr
    }

    pub fn set_finger(&self, present: bool) {
        self.state.borrow_mut().signal.set_finger(present);
    }

    /// Let the sensor acquire `samples` new samples.
    pub fn advance(&self, samples: usize) {
        let mut state = self.state.borrow_mut();
        for _ in 0..samples {
            let (red, ir) = state.signal.next_sample();
            state.device.push_sample(red, ir);
        }
    }

    pub fn interrupt_pending(&self) -> bool {
        self.state.borrow().device.interrupt_pending()
    }

    pub fn with_model<R>(&self, f: impl FnOnce(&mut DeviceModel) -> R) -> R {
        f(&mut self.state.borrow_mut().device)
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TwiPeripheral for SimulatedBus {
    fn set_bit_rate(&mut self, twbr: u8, prescaler: u8) {
        let mut state = self.state.borrow_mut();
        state.twbr = twbr;
        state.prescaler = prescaler & 0x03;
    }

    fn write_control(&mut self, value: u8) {
        let mut state = self.state.borrow_mut();
        if value & control::TWEN == 0 || value & control::TWINT == 0 {
            state.control = value;
            return;
        }
        if state.stalled {
            state.control = value & !control::TWINT;
            return;
        }
        if value & control::TWSTO != 0 {
            state.held = false;
            state.selected = None;
            state.address_pending = false;
            state.status = status::NO_INFO;
            state.control = if state.stop_stuck {
                value & !control::TWINT
            } else {
                value & !(control::TWINT | control::TWSTO)
            };
            return;
        }
        state.execute(value);
        state.control = value | control::TWINT;
    }

    fn control(&mut self) -> u8 {
        self.state.borrow().control
    }

    fn status(&mut self) -> u8 {
        let state = self.state.borrow();
        state.status | state.prescaler
    }

    fn write_data(&mut self, value: u8) {
        self.state.borrow_mut().data = value;
    }

    fn data(&mut self) -> u8 {
        self.state.borrow().data
    }
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

/// `DelayNs` that only advances a counter. Clones share the counter.
#[derive(Clone, Default)]
pub struct SimClock {
    elapsed_ns: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_ns.get() / 1_000
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }
}

impl DelayNs for SimClock {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.set(self.elapsed_ns.get() + ns as u64);
    }
}
