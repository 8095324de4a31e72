pub mod sensor;
pub mod ui;
