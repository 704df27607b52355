//! Colors and column widths shared by every command.

use crossterm::style::Color;

/// Visual constants.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    /// Pack ids.
    pub pack: Color,
    /// Version numbers.
    pub version: Color,
    /// Locations, counts and other secondary detail.
    pub secondary: Color,
    /// Completed operations.
    pub success: Color,
    /// Recoverable problems.
    pub warning: Color,
    /// Failed operations.
    pub error: Color,
    /// Width of the pack id column.
    pub pack_width: usize,
    /// Width of the version column.
    pub version_width: usize,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            pack: Color::Cyan,
            version: Color::White,
            secondary: Color::DarkGrey,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            pack_width: 32,
            version_width: 14,
        }
    }
}
