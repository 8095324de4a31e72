// PulseWatch — SSD1306 OLED Driver
//
// Minimal command-level driver over the hardware I2C bus: init sequence,
// full-frame upload of a `FrameBuffer`, panel on/off.

use std::sync::{Mutex, PoisonError};

use esp_idf_hal::i2c::I2cDriver;

use pulsewatch::config::*;
use pulsewatch::display::FrameBuffer;

/// Thread-safe handle to the display I2C bus.
pub type SharedBus = &'static Mutex<I2cDriver<'static>>;

// Control bytes
const CMD: u8 = 0x00;
const DATA: u8 = 0x40;

const DATA_CHUNK: usize = 32;

const INIT_SEQUENCE: &[u8] = &[
    0xAE, // display off
    0xD5, 0x80, // clock divide
    0xA8, 0x3F, // multiplex 64
    0xD3, 0x00, // display offset
    0x40, // start line 0
    0x8D, 0x14, // charge pump on
    0x20, 0x00, // horizontal addressing
    0xA1, // segment remap
    0xC8, // COM scan descending
    0xDA, 0x12, // COM pins
    0x81, 0x7F, // contrast
    0xD9, 0xF1, // pre-charge
    0xDB, 0x40, // VCOMH
    0xA4, // resume from RAM
    0xA6, // normal (not inverted)
    0xAF, // display on
];

pub struct OledDisplay {
    bus: SharedBus,
}

impl OledDisplay {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }

    fn commands(&self, cmds: &[u8]) -> anyhow::Result<()> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = Vec::with_capacity(cmds.len() + 1);
        buf.push(CMD);
        buf.extend_from_slice(cmds);
        bus.write(I2C_ADDR_OLED, &buf, I2C_TIMEOUT_TICKS)?;
        Ok(())
    }

    pub fn init(&mut self) -> anyhow::Result<()> {
        self.commands(INIT_SEQUENCE)?;
        log::info!("SSD1306 initialised ({}x{})", SCREEN_WIDTH, SCREEN_HEIGHT);
        Ok(())
    }

    /// Upload the whole frame.
    pub fn show(&mut self, frame: &FrameBuffer) -> anyhow::Result<()> {
        // Column 0..127, page 0..7
        self.commands(&[0x21, 0, (SCREEN_WIDTH - 1) as u8, 0x22, 0, (SCREEN_HEIGHT / 8 - 1) as u8])?;

        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = [0u8; DATA_CHUNK + 1];
        buf[0] = DATA;
        for chunk in frame.as_bytes().chunks(DATA_CHUNK) {
            buf[1..=chunk.len()].copy_from_slice(chunk);
            bus.write(I2C_ADDR_OLED, &buf[..=chunk.len()], I2C_TIMEOUT_TICKS)?;
        }
        Ok(())
    }
}
