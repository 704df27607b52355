//! Terminal output.

pub mod output;
pub mod theme;

pub use output::TerminalReporter;
pub use theme::Theme;
