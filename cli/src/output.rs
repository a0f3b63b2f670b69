//! Output formatting utilities for CLI commands

use colored::Colorize;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Section header
pub fn header(title: &str) {
    println!("\n{}", title.bold().cyan());
}

/// Signed delta, red when it grew and green when it shrank
pub fn delta(value: Option<f64>, pct: f64) -> String {
    match value {
        None => "n/a".dimmed().to_string(),
        Some(d) if d > 0.0 => format!("{:+.3} ({:+.1}%)", d, pct).red().to_string(),
        Some(d) if d < 0.0 => format!("{:+.3} ({:+.1}%)", d, pct).green().to_string(),
        Some(d) => format!("{:+.3}", d),
    }
}
