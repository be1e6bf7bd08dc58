/*!
 * CLI Style System
 *
 * Shared styling for the `attempt` binary: themed text, tables for attempt
 * logs and delay schedules, and status messages.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::context::LogEntry;
use crate::outcome::OutcomeSummary;

// ============================================================================
// THEME COLORS
// ============================================================================

/// Colors used across the binary's output
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const SKIPPED: &'static str = "○";
    pub const ARROW_RIGHT: &'static str = "→";
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a minimal table (no outer borders)
pub fn create_minimal_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// One row per attempt log entry
pub fn attempt_log_table(log: &[LogEntry]) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("#"),
        header_cell("Stage"),
        header_cell("Status"),
        header_cell("Error"),
        header_cell("At"),
    ]);

    for (index, entry) in log.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1).fg(Color::DarkGrey),
            Cell::new(&entry.stage),
            status_cell(entry.success),
            Cell::new(entry.error.as_deref().unwrap_or("")).fg(Color::Red),
            Cell::new(entry.timestamp.format("%H:%M:%S%.3f")).fg(Color::DarkGrey),
        ]);
    }

    table
}

/// Delay before each retry, as computed by a strategy
pub fn delay_schedule_table(strategy: &str, delays_ms: &[u64]) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("Retry"),
        header_cell("Delay"),
        header_cell("Elapsed"),
    ]);

    let mut elapsed = 0u64;
    for (index, delay) in delays_ms.iter().enumerate() {
        elapsed = elapsed.saturating_add(*delay);
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(format_duration(*delay as f64 / 1000.0))
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
            Cell::new(format_duration(elapsed as f64 / 1000.0)).fg(Color::DarkGrey),
        ]);
    }

    if delays_ms.is_empty() {
        table.add_row(vec![Cell::new("-"), Cell::new(format!("{}: no delays", strategy)), Cell::new("-")]);
    }

    table
}

/// Key-value summary of a finished run
pub fn outcome_table(summary: &OutcomeSummary) -> Table {
    let mut table = create_minimal_table();

    let status = if summary.succeeded {
        Cell::new(format!("{} succeeded", Icons::SUCCESS)).fg(Color::Green)
    } else {
        Cell::new(format!("{} failed", Icons::ERROR)).fg(Color::Red)
    };

    table.add_row(vec![Cell::new("Status").fg(Color::Cyan), status]);
    table.add_row(vec![
        Cell::new("Attempts").fg(Color::Cyan),
        Cell::new(summary.attempts).add_attribute(Attribute::Bold),
    ]);
    table.add_row(vec![
        Cell::new("Resolved by").fg(Color::Cyan),
        Cell::new(summary.resolved_by.as_deref().unwrap_or("-")),
    ]);
    if let Some(error) = &summary.error {
        table.add_row(vec![
            Cell::new("Error").fg(Color::Cyan),
            Cell::new(error).fg(Color::Red),
        ]);
    }

    table
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn status_cell(success: bool) -> Cell {
    if success {
        Cell::new(format!("{} ok", Icons::SUCCESS)).fg(Color::Green)
    } else {
        Cell::new(format!("{} failed", Icons::ERROR)).fg(Color::Red)
    }
}

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    eprintln!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    eprintln!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    eprintln!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

// ============================================================================
// TESTS
// ============================================================================
