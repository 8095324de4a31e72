// PulseWatch — Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V) + MAX30102 pulse-oximeter breakout

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
pub const PIN_BUTTON: i32 = 3;       // D1/A1  User button (INPUT_PULLUP, active LOW)
pub const PIN_SENSOR_INT: i32 = 4;   // D2/A2  MAX30102 INT (open-drain, active LOW)
pub const PIN_OLED_SDA: i32 = 6;     // D4  hardware I2C data (OLED)
pub const PIN_OLED_SCL: i32 = 7;     // D5  hardware I2C clock (OLED)
pub const PIN_SENSOR_SDA: i32 = 9;   // D9  sensor bus data (open-drain)
pub const PIN_SENSOR_SCL: i32 = 10;  // D10  sensor bus clock (open-drain)

// ---------------------------------------------------------------------------
// Sensor Bus (two-wire, register-level controller)
// ---------------------------------------------------------------------------
pub const TWI_CPU_FREQ_HZ: u32 = 16_000_000; // reference clock the bit-rate register is computed against
pub const TWI_BUS_FREQ_HZ: u32 = 100_000;    // standard mode
pub const TWI_POLL_INTERVAL_US: u32 = 100;
pub const TWI_HANDSHAKE_POLLS: u32 = 100;    // 100 × 100 µs = 10 ms
pub const TWI_STOP_POLLS: u32 = 1000;        // 1000 × 100 µs = 100 ms
pub const TWI_CLOCK_STRETCH_POLLS: u32 = 1000;

// ---------------------------------------------------------------------------
// MAX30102
// ---------------------------------------------------------------------------
pub const MAX30102_ADDR: u8 = 0x57;
pub const MAX30102_EXPECTED_PART_ID: u8 = 0x15;
pub const FIFO_DEPTH: u8 = 32;
pub const SENSOR_RESET_POLLS: u32 = 10;
pub const SENSOR_RESET_POLL_MS: u32 = 10;
pub const TEMPERATURE_POLLS: u32 = 10;
pub const TEMPERATURE_POLL_MS: u32 = 10;
pub const TEMPERATURE_LSB_C: f32 = 0.0625;

// Default bring-up settings (100 Hz, 411 µs, 4096 nA, ~7 mA LEDs)
pub const DEFAULT_LED_AMPLITUDE: u8 = 0x24;
pub const DEFAULT_FIFO_ALMOST_FULL: u8 = 15; // A_FULL once 17 samples are waiting

// ---------------------------------------------------------------------------
// OLED (SSD1306)
// ---------------------------------------------------------------------------
pub const I2C_ADDR_OLED: u8 = 0x3C;
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks
pub const SCREEN_WIDTH: u32 = 128;
pub const SCREEN_HEIGHT: u32 = 64;
pub const DISPLAY_BUFFER_SIZE: usize = (SCREEN_WIDTH as usize * SCREEN_HEIGHT as usize) / 8; // 1024

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_SENSOR: usize = 6144;
pub const STACK_UI: usize = 8192;

// ---------------------------------------------------------------------------
// Timing (milliseconds)
// ---------------------------------------------------------------------------
pub const SENSOR_LOOP_INTERVAL_MS: u64 = 10;
pub const SENSOR_POLL_EVERY_LOOPS: u32 = 10;          // fallback poll when no INT edge arrives
pub const TEMPERATURE_REFRESH_CYCLES: u32 = 100;
pub const UI_POLL_INTERVAL_MS: u64 = 10;               // 100 Hz input poll / refresh
pub const UI_REDRAW_INTERVAL_MS: u64 = 250;
pub const DEBOUNCE_MS: u64 = 50;
pub const LONG_PRESS_MS: u64 = 3000;                   // 3-second hold
pub const DOUBLE_CLICK_WINDOW_MS: u64 = 400;
pub const BOOT_TEXT_DISPLAY_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------
pub const BATCH_CAPACITY: usize = 16;
pub const MIN_BATCH: usize = 5;

// ---------------------------------------------------------------------------
// Heart-rate / SpO2 estimator defaults (see `EstimatorConfig`)
// ---------------------------------------------------------------------------
pub const SAMPLE_RATE_HZ: u32 = 100;
pub const DC_RING_SIZE: usize = 128;
pub const PEAK_SCAN_WINDOW: usize = DC_RING_SIZE - 4; // 124
pub const INTERVAL_HISTORY: usize = 8;
pub const PRESENCE_MIN_IR_AVG: i64 = 5000;
pub const PRESENCE_MIN_SWING_RATIO: f32 = 0.01;
pub const SPO2_MIN_CHANNEL_AVG: i64 = 1000;
pub const PEAK_THRESHOLD_FLOOR: i32 = 10;
pub const PEAK_THRESHOLD_DIVISOR: i32 = 10;
pub const MIN_PEAK_INTERVAL: u32 = 27;  // 220 BPM @ 100 Hz
pub const MAX_PEAK_INTERVAL: u32 = 150; // 40 BPM @ 100 Hz
pub const MIN_ACCEPTED_PEAKS: u32 = 3;
pub const BPM_CORRECTION_DIVISOR: f32 = 2.0;
pub const HR_VALID_MIN: i32 = 40;
pub const HR_VALID_MAX: i32 = 220;
pub const SPO2_INTERCEPT: f32 = 110.0;
pub const SPO2_SLOPE: f32 = 25.0;
pub const SPO2_VALID_MIN: i32 = 70;
pub const SPO2_VALID_MAX: i32 = 100;
