use std::io::Write;

use crossterm::cursor::{Hide, MoveTo, MoveToNextLine, Show};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use thermal_view_common::config::DisplayConfig;
use thermal_view_common::driver::{RenderError, Renderer};
use thermal_view_common::frame::{ThermalFrame, HEIGHT, WIDTH};
use thermal_view_common::reconciler::{SignalState, TickOutput, TickStatus};
use tracing::debug;

use crate::hud::MaxSmoother;
use crate::palette::Palette;

/// Upper half block: foreground paints the top pixel, background the bottom one.
const HALF_BLOCK: &str = "\u{2580}";
/// Terminal columns per sensor pixel, to keep the image roughly square.
const PIXEL_COLUMNS: usize = 2;
const LEGEND_STEPS: usize = WIDTH * PIXEL_COLUMNS;

/// Draws the heatmap into a terminal using 24-bit colors.
///
/// Two sensor rows share one terminal line via half-block characters. The
/// frame body is only redrawn when the frame or the signal state changes;
/// otherwise a tick is a no-op.
pub struct HeatmapRenderer<W: Write> {
    out: W,
    palette: Palette,
    display: DisplayConfig,
    smoother: MaxSmoother,
    screen_entered: bool,
    last_signal: Option<SignalState>,
}

impl<W: Write> HeatmapRenderer<W> {
    pub fn new(out: W, display: DisplayConfig) -> Self {
        Self {
            out,
            palette: Palette::ironbow(),
            display,
            smoother: MaxSmoother::new(),
            screen_entered: false,
            last_signal: None,
        }
    }

    fn enter_screen(&mut self) -> std::io::Result<()> {
        execute!(self.out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        self.screen_entered = true;
        Ok(())
    }

    fn draw(&mut self, tick: &TickOutput<'_>, shown_max: Option<f32>) -> std::io::Result<()> {
        queue!(
            self.out,
            MoveTo(0, 0),
            ResetColor,
            Print(tick.label()),
            Clear(ClearType::UntilNewLine),
            MoveToNextLine(1)
        )?;

        self.draw_frame(tick.frame)?;
        self.draw_status(tick.signal, shown_max)?;
        self.draw_legend()?;
        self.out.flush()
    }

    fn draw_frame(&mut self, frame: &ThermalFrame) -> std::io::Result<()> {
        let (min, max) = (self.display.min_temp, self.display.max_temp);
        for top in (0..HEIGHT).step_by(2) {
            for col in 0..WIDTH {
                let upper = frame.get(top, col).unwrap_or(f32::NAN);
                let lower = frame.get(top + 1, col).unwrap_or(f32::NAN);
                queue!(
                    self.out,
                    SetForegroundColor(self.palette.color_for(upper, min, max)),
                    SetBackgroundColor(self.palette.color_for(lower, min, max)),
                    Print(HALF_BLOCK.repeat(PIXEL_COLUMNS))
                )?;
            }
            queue!(self.out, ResetColor, MoveToNextLine(1))?;
        }
        Ok(())
    }

    fn draw_status(&mut self, signal: SignalState, shown_max: Option<f32>) -> std::io::Result<()> {
        let (text, color) = match (signal, shown_max) {
            (SignalState::Lost, _) => ("NO SIGNAL".to_string(), Color::Red),
            (SignalState::Waiting, _) | (_, None) => {
                ("waiting for sensor...".to_string(), Color::Cyan)
            }
            (SignalState::Live, Some(t)) if t >= self.display.fever_threshold => {
                (format!("TEMP {t:.1}°C  FEVER"), Color::Red)
            }
            (SignalState::Live, Some(t)) => (format!("TEMP {t:.1}°C"), Color::Green),
        };
        queue!(
            self.out,
            SetForegroundColor(color),
            Print(text),
            ResetColor,
            Clear(ClearType::UntilNewLine),
            MoveToNextLine(1)
        )
    }

    fn draw_legend(&mut self) -> std::io::Result<()> {
        let (min, max) = (self.display.min_temp, self.display.max_temp);
        for step in 0..LEGEND_STEPS {
            let value = min + (max - min) * step as f32 / (LEGEND_STEPS - 1) as f32;
            queue!(
                self.out,
                SetBackgroundColor(self.palette.color_for(value, min, max)),
                Print(" ")
            )?;
        }
        let scale = format!("{min:.0}°C{:>width$}", format!("{max:.0}°C"), width = LEGEND_STEPS - 4);
        queue!(
            self.out,
            ResetColor,
            MoveToNextLine(1),
            Print(scale),
            Clear(ClearType::UntilNewLine)
        )
    }
}

impl<W: Write> Renderer for HeatmapRenderer<W> {
    fn render(&mut self, tick: &TickOutput<'_>) -> Result<(), RenderError> {
        if !self.screen_entered {
            self.enter_screen()?;
        }

        if tick.status == TickStatus::Updated {
            self.smoother.update(tick.max);
        }

        let changed = tick.status == TickStatus::Updated || self.last_signal != Some(tick.signal);
        if !changed {
            return Ok(());
        }
        if self.last_signal != Some(tick.signal) {
            debug!(signal = ?tick.signal, "signal state changed");
        }
        self.last_signal = Some(tick.signal);

        let shown = self.smoother.displayed();
        self.draw(tick, shown)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "terminal-heatmap"
    }
}

impl<W: Write> Drop for HeatmapRenderer<W> {
    fn drop(&mut self) {
        if self.screen_entered {
            let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        }
    }
}
