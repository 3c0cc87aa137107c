//! Terminal palette and style helpers for the interactive reporter

use crossterm::style::{Attribute, Color, Stylize};

use readyup_core::model::ServiceState;
use readyup_core::state::RunStatus;

/// Color palette tokens
#[derive(Clone, Debug)]
pub struct Palette {
    pub text_dim: Color,
    pub accent: Color,
    /// Healthy, ready
    pub success: Color,
    /// In progress, degraded
    pub warn: Color,
    /// Unhealthy, timed out, failed
    pub error: Color,
    /// Blocked by a dependency
    pub muted: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    pub fn dark() -> Self {
        Self {
            text_dim: Color::Rgb {
                r: 150,
                g: 150,
                b: 150,
            },
            accent: Color::Rgb {
                r: 79,
                g: 193,
                b: 255,
            },
            success: Color::Rgb {
                r: 78,
                g: 201,
                b: 176,
            },
            warn: Color::Rgb {
                r: 220,
                g: 180,
                b: 100,
            },
            error: Color::Rgb {
                r: 244,
                g: 135,
                b: 113,
            },
            muted: Color::DarkGrey,
        }
    }
}

/// Palette plus the on/off switch for escape codes
#[derive(Clone, Debug)]
pub struct Theme {
    pub palette: Palette,
    pub color: bool,
}

impl Theme {
    pub fn new(color: bool) -> Self {
        Self {
            palette: Palette::dark(),
            color,
        }
    }

    pub fn state_color(&self, state: ServiceState) -> Color {
        match state {
            ServiceState::Healthy => self.palette.success,
            ServiceState::Pending => self.palette.text_dim,
            ServiceState::Starting | ServiceState::Checking => self.palette.warn,
            ServiceState::Unhealthy | ServiceState::TimedOut => self.palette.error,
            ServiceState::Blocked => self.palette.muted,
        }
    }

    pub fn state_icon(&self, state: ServiceState) -> &'static str {
        match state {
            ServiceState::Pending => "○",
            ServiceState::Starting => "◐",
            ServiceState::Checking => "◑",
            ServiceState::Healthy => "✓",
            ServiceState::Unhealthy => "✗",
            ServiceState::TimedOut => "⧗",
            ServiceState::Blocked => "⊘",
        }
    }

    pub fn status_color(&self, status: RunStatus) -> Color {
        match status {
            RunStatus::Ready => self.palette.success,
            RunStatus::Degraded => self.palette.warn,
            RunStatus::Failed => self.palette.error,
        }
    }

    pub fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn bold(&self, text: &str) -> String {
        if self.color {
            text.attribute(Attribute::Bold).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint(text, self.palette.text_dim)
    }

    pub fn accent(&self, text: &str) -> String {
        self.paint(text, self.palette.accent)
    }

    /// `✓ healthy` style label for a state
    pub fn state(&self, state: ServiceState) -> String {
        self.paint(
            &format!("{} {}", self.state_icon(state), state.label()),
            self.state_color(state),
        )
    }
}
