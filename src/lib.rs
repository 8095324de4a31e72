// PulseWatch — PPG heart-rate monitor core
//
// Portable part of the firmware: two-wire bus transport, MAX30102 driver,
// heart-rate / SpO2 estimator, acquisition loop, screens and input handling.
// Hardware enters only through `embedded-hal` traits and `TwiPeripheral`.

pub mod acquisition;
pub mod bus;
pub mod config;
pub mod display;
pub mod drivers;
pub mod estimator;
pub mod events;
pub mod input;
pub mod sim;
