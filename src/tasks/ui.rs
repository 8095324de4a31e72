// PulseWatch — UI Task
//
// Owns the OLED and the button. Polls the button at ~100 Hz, redraws the
// current screen when a new reading arrives (or periodically), and forwards
// button gestures to the sensor task as commands.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_hal::gpio::{AnyInputPin, Input, PinDriver};

use pulsewatch::acquisition::ReadingMailbox;
use pulsewatch::config::*;
use pulsewatch::display::{render_diagnostics, render_reading, FrameBuffer};
use pulsewatch::events::{Screen, SensorCommand, UiEvent};
use pulsewatch::input::InputManager;

use crate::oled::OledDisplay;

pub fn ui_task(
    mut display: OledDisplay,
    button_pin: PinDriver<'static, AnyInputPin, Input>,
    mailbox: Arc<ReadingMailbox>,
    sensor_tx: Sender<SensorCommand>,
) {
    log::info!("UI task started");

    let (ui_tx, ui_rx) = mpsc::channel();
    let mut input = InputManager::new(button_pin, ui_tx);
    let mut frame = FrameBuffer::new();

    let mut screen = Screen::default();
    let mut paused = false;
    let mut dirty = true;

    let boot = Instant::now();
    let mut last_redraw = boot;
    let poll_interval = Duration::from_millis(UI_POLL_INTERVAL_MS);
    let redraw_interval = Duration::from_millis(UI_REDRAW_INTERVAL_MS);

    loop {
        // 1. Poll the button (handles debounce + click detection internally).
        input.update(boot.elapsed().as_millis() as u64);

        // 2. Drain all pending UI events (non-blocking).
        while let Ok(event) = ui_rx.try_recv() {
            let command = match event {
                UiEvent::ButtonSingleClick => {
                    screen = screen.next();
                    log::info!("Screen: {}", screen.display_name());
                    None
                }
                UiEvent::ButtonDoubleClick => Some(SensorCommand::DumpRegisters),
                UiEvent::ButtonLongPress => {
                    paused = !paused;
                    Some(if paused {
                        SensorCommand::Pause
                    } else {
                        SensorCommand::Resume
                    })
                }
            };
            if let Some(command) = command {
                if sensor_tx.send(command).is_err() {
                    log::warn!("Sensor task gone, dropping {:?}", command);
                }
            }
            dirty = true;
        }

        // 3. New reading, or the diagnostics counters moved on.
        if mailbox.take().is_some() || last_redraw.elapsed() >= redraw_interval {
            dirty = true;
        }

        if dirty {
            let drawn = match screen {
                Screen::Reading => render_reading(&mut frame, mailbox.latest().as_ref(), paused),
                Screen::Diagnostics => render_diagnostics(&mut frame, &mailbox.stats()),
            };
            if drawn.is_ok() {
                if let Err(e) = display.show(&frame) {
                    log::warn!("Display error: {}", e);
                }
            }
            last_redraw = Instant::now();
            dirty = false;
        }

        thread::sleep(poll_interval);
    }
}
