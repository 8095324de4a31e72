// PulseWatch — Screen rendering
//
// A 128×64 monochrome frame buffer in SSD1306 page order plus the screens
// drawn into it. Rendering is generic over any `DrawTarget<Color = BinaryColor>`
// so screens can be drawn straight into a panel driver as well.

use core::convert::Infallible;

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10},
        MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};

use crate::acquisition::AcquisitionStats;
use crate::config::*;
use crate::estimator::HeartRateResult;

// ---------------------------------------------------------------------------
// Frame buffer
// ---------------------------------------------------------------------------

/// One bit per pixel; byte `x + (y / 8) * width`, bit `y % 8`.
pub struct FrameBuffer {
    bytes: [u8; DISPLAY_BUFFER_SIZE],
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0; DISPLAY_BUFFER_SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pixel(&self, x: u32, y: u32) -> bool {
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return false;
        }
        let (index, bit) = Self::locate(x, y);
        self.bytes[index] & bit != 0
    }

    pub fn lit_pixels(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }

    fn locate(x: u32, y: u32) -> (usize, u8) {
        let index = (x + (y / 8) * SCREEN_WIDTH) as usize;
        (index, 1 << (y % 8))
    }

    fn set_pixel(&mut self, point: Point, on: bool) {
        let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
            return;
        };
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return;
        }
        let (index, bit) = Self::locate(x, y);
        if on {
            self.bytes[index] |= bit;
        } else {
            self.bytes[index] &= !bit;
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set_pixel(point, color.is_on());
        }
        Ok(())
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(SCREEN_WIDTH, SCREEN_HEIGHT)
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

pub fn heart_rate_label(result: &HeartRateResult) -> String {
    if result.hr_valid {
        format!("{} bpm", result.heart_rate)
    } else {
        "-- bpm".to_string()
    }
}

pub fn spo2_label(result: &HeartRateResult) -> String {
    if result.spo2_valid {
        format!("SpO2 {}%", result.spo2)
    } else {
        "SpO2 --%".to_string()
    }
}

fn status_label(reading: Option<&HeartRateResult>, paused: bool) -> &'static str {
    match reading {
        _ if paused => "paused",
        None => "waiting...",
        Some(r) if !r.finger_detected => "place finger",
        Some(r) if !r.hr_valid => "measuring...",
        Some(_) => "ok",
    }
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------

/// Single line of large text in the middle of the screen.
pub fn render_splash<D>(target: &mut D, text: &str) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    target.clear(BinaryColor::Off)?;
    let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    let centered = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Middle)
        .build();
    Text::with_text_style(
        text,
        Point::new(SCREEN_WIDTH as i32 / 2, SCREEN_HEIGHT as i32 / 2),
        style,
        centered,
    )
    .draw(target)?;
    Ok(())
}

/// Main screen: heart rate in large type, SpO2 and a status line below.
pub fn render_reading<D>(
    target: &mut D,
    reading: Option<&HeartRateResult>,
    paused: bool,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    target.clear(BinaryColor::Off)?;
    let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    let large = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);

    Text::with_baseline("PulseWatch", Point::zero(), small, Baseline::Top).draw(target)?;
    Line::new(Point::new(0, 11), Point::new(SCREEN_WIDTH as i32 - 1, 11))
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(target)?;

    let empty = HeartRateResult::default();
    let shown = reading.unwrap_or(&empty);
    Text::with_baseline(&heart_rate_label(shown), Point::new(0, 16), large, Baseline::Top)
        .draw(target)?;
    Text::with_baseline(&spo2_label(shown), Point::new(0, 40), small, Baseline::Top)
        .draw(target)?;
    Text::with_baseline(
        status_label(reading, paused),
        Point::new(0, 52),
        small,
        Baseline::Top,
    )
    .draw(target)?;
    Ok(())
}

/// Debug screen: FIFO pointers, counters and die temperature.
pub fn render_diagnostics<D>(target: &mut D, stats: &AcquisitionStats) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    target.clear(BinaryColor::Off)?;
    let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    let p = stats.last_pointers;
    let temperature = match stats.temperature_c {
        Some(t) => format!("temp {:.1}C", t),
        None => "temp --".to_string(),
    };
    let lines = [
        "diagnostics".to_string(),
        format!("wr {:02} rd {:02} ovf {:02}", p.write_ptr, p.read_ptr, p.overflow_count),
        format!("irq {} cyc {}", stats.interrupts, stats.cycles),
        format!("pub {} idle {}", stats.published, stats.idle),
        format!("err {} rec {}", stats.bus_errors, stats.overflow_recoveries),
        temperature,
    ];
    for (row, line) in lines.iter().enumerate() {
        Text::with_baseline(line, Point::new(0, row as i32 * 10), small, Baseline::Top)
            .draw(target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> HeartRateResult {
        HeartRateResult {
            heart_rate: 75,
            hr_valid: true,
            spo2: 97,
            spo2_valid: true,
            finger_detected: true,
        }
    }

    #[test]
    fn page_layout_matches_controller() {
        let mut fb = FrameBuffer::new();
        fb.draw_iter([Pixel(Point::new(3, 9), BinaryColor::On)]).unwrap();
        assert_eq!(fb.as_bytes()[SCREEN_WIDTH as usize + 3], 0b0000_0010);
        assert!(fb.pixel(3, 9));
        assert_eq!(fb.lit_pixels(), 1);
    }

    #[test]
    fn off_screen_pixels_are_dropped() {
        let mut fb = FrameBuffer::new();
        fb.draw_iter([
            Pixel(Point::new(-1, 0), BinaryColor::On),
            Pixel(Point::new(0, 64), BinaryColor::On),
            Pixel(Point::new(128, 0), BinaryColor::On),
        ])
        .unwrap();
        assert_eq!(fb.lit_pixels(), 0);
    }

    #[test]
    fn labels() {
        assert_eq!(heart_rate_label(&valid()), "75 bpm");
        assert_eq!(spo2_label(&valid()), "SpO2 97%");
        let invalid = HeartRateResult::default();
        assert_eq!(heart_rate_label(&invalid), "-- bpm");
        assert_eq!(spo2_label(&invalid), "SpO2 --%");
        assert_eq!(status_label(Some(&invalid), false), "place finger");
        assert_eq!(status_label(Some(&valid()), true), "paused");
        assert_eq!(status_label(None, false), "waiting...");
    }

    #[test]
    fn screens_draw_something_and_clear_first() {
        let mut fb = FrameBuffer::new();
        render_reading(&mut fb, Some(&valid()), false).unwrap();
        let reading = fb.lit_pixels();
        assert!(reading > 0);

        render_diagnostics(&mut fb, &AcquisitionStats::new()).unwrap();
        assert!(fb.lit_pixels() > 0);

        render_splash(&mut fb, "").unwrap();
        assert_eq!(fb.lit_pixels(), 0);
    }
}
