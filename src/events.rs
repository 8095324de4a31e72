// PulseWatch — System Events & Commands

// ---------------------------------------------------------------------------
// UI Events: produced by the button handler, consumed by the UI task
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    /// Single button click detected.
    ButtonSingleClick,
    /// Double button click detected.
    ButtonDoubleClick,
    /// Long button press (≥ 3 s) detected.
    ButtonLongPress,
}

// ---------------------------------------------------------------------------
// Sensor Commands: sent from the UI task to the sensor task via channel
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    /// Put the sensor into power-save shutdown and stop servicing the FIFO.
    Pause,
    /// Wake the sensor and start from a clean FIFO and estimator.
    Resume,
    /// Log every configuration / status register.
    DumpRegisters,
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Screen {
    #[default]
    Reading,
    Diagnostics,
}

impl Screen {
    /// The screen a single click switches to.
    pub fn next(self) -> Self {
        match self {
            Self::Reading => Self::Diagnostics,
            Self::Diagnostics => Self::Reading,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Diagnostics => "diagnostics",
        }
    }
}
