// PulseWatch — Button Input Manager
//
// Debounced button handler with single-click, double-click, and long-press
// detection.  Designed to be polled at ~100 Hz from the UI task; the caller
// supplies the time so the state machine runs the same on a host.

use std::sync::mpsc::Sender;

use embedded_hal::digital::InputPin;

use crate::config::*;
use crate::events::UiEvent;

pub struct InputManager<P> {
    pin: P,
    ui_tx: Sender<UiEvent>,

    // Debounce state
    last_raw: bool,
    last_debounce_ms: u64,

    // Press tracking
    press_start_ms: Option<u64>,
    button_down: bool,

    // Double-click state machine
    waiting_for_second_click: bool,
    first_click_ms: u64,
}

impl<P: InputPin> InputManager<P> {
    pub fn new(pin: P, ui_tx: Sender<UiEvent>) -> Self {
        Self {
            pin,
            ui_tx,
            last_raw: true, // pull-up → idle HIGH
            last_debounce_ms: 0,
            press_start_ms: None,
            button_down: false,
            waiting_for_second_click: false,
            first_click_ms: 0,
        }
    }

    /// Call every ~10 ms from the UI task loop.
    pub fn update(&mut self, now_ms: u64) {
        // A failed read counts as released.
        let current = self.pin.is_high().unwrap_or(true);

        // ---- debounce filter ----
        if current != self.last_raw {
            self.last_debounce_ms = now_ms;
        }
        self.last_raw = current;

        if now_ms.saturating_sub(self.last_debounce_ms) < DEBOUNCE_MS {
            self.check_double_click_timeout(now_ms);
            return;
        }

        let pressed = !current; // active LOW

        // ---- button pressed edge ----
        if pressed && !self.button_down {
            self.button_down = true;
            self.press_start_ms = Some(now_ms);
        }

        // ---- button released edge ----
        if !pressed && self.button_down {
            self.button_down = false;
            let hold_ms = self
                .press_start_ms
                .map(|t| now_ms.saturating_sub(t))
                .unwrap_or(0);

            if hold_ms >= LONG_PRESS_MS {
                self.send(UiEvent::ButtonLongPress);
                self.waiting_for_second_click = false;
            } else if self.waiting_for_second_click {
                self.send(UiEvent::ButtonDoubleClick);
                self.waiting_for_second_click = false;
            } else {
                self.waiting_for_second_click = true;
                self.first_click_ms = now_ms;
            }
        }

        self.check_double_click_timeout(now_ms);
    }

    /// If the double-click window expires, emit a single-click.
    fn check_double_click_timeout(&mut self, now_ms: u64) {
        if self.waiting_for_second_click
            && now_ms.saturating_sub(self.first_click_ms) > DOUBLE_CLICK_WINDOW_MS
        {
            self.send(UiEvent::ButtonSingleClick);
            self.waiting_for_second_click = false;
        }
    }

    fn send(&self, event: UiEvent) {
        if self.ui_tx.send(event).is_err() {
            log::warn!("UI channel closed, dropping {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Receiver};

    /// Active-low button: `true` in the cell means pressed.
    struct Button(Rc<Cell<bool>>);

    impl ErrorType for Button {
        type Error = Infallible;
    }

    impl InputPin for Button {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.get())
        }
        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.get())
        }
    }

    struct Bench {
        pressed: Rc<Cell<bool>>,
        input: InputManager<Button>,
        rx: Receiver<UiEvent>,
        now: u64,
    }

    impl Bench {
        fn new() -> Self {
            let pressed = Rc::new(Cell::new(false));
            let (tx, rx) = mpsc::channel();
            let input = InputManager::new(Button(pressed.clone()), tx);
            Self { pressed, input, rx, now: 0 }
        }

        /// Hold the button state for `ms`, polling every 10 ms.
        fn hold(&mut self, pressed: bool, ms: u64) {
            self.pressed.set(pressed);
            for _ in 0..ms / 10 {
                self.now += 10;
                self.input.update(self.now);
            }
        }

        fn events(&self) -> Vec<UiEvent> {
            self.rx.try_iter().collect()
        }
    }

    #[test]
    fn single_click_after_window() {
        let mut b = Bench::new();
        b.hold(false, 100);
        b.hold(true, 120);
        b.hold(false, 600);
        assert_eq!(b.events(), vec![UiEvent::ButtonSingleClick]);
    }

    #[test]
    fn double_click() {
        let mut b = Bench::new();
        b.hold(false, 100);
        b.hold(true, 100);
        b.hold(false, 100);
        b.hold(true, 100);
        b.hold(false, 600);
        assert_eq!(b.events(), vec![UiEvent::ButtonDoubleClick]);
    }

    #[test]
    fn long_press() {
        let mut b = Bench::new();
        b.hold(false, 100);
        b.hold(true, LONG_PRESS_MS + 100);
        b.hold(false, 600);
        assert_eq!(b.events(), vec![UiEvent::ButtonLongPress]);
    }

    #[test]
    fn bounce_is_filtered() {
        let mut b = Bench::new();
        b.hold(false, 100);
        for _ in 0..3 {
            b.hold(true, 10);
            b.hold(false, 10);
        }
        b.hold(false, 600);
        assert!(b.events().is_empty());
    }
}
