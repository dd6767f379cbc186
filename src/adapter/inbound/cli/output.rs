//! Terminal output helpers shared by CLI handlers.

use std::fmt::Display;

use owo_colors::OwoColorize;

/// Print the application banner.
pub fn header(version: &str) {
    println!("{} {}", "eventgate".bold(), version.dimmed());
    println!();
}

pub fn section(title: &str) {
    println!();
    println!("{}", title.bold());
}

/// Print a labelled value.
pub fn field(label: &str, value: impl Display) {
    println!("  {:<16} {}", label.dimmed(), value);
}

pub fn success(message: &str) {
    println!("  {} {}", "✓".green(), message);
}

pub fn warning(message: &str) {
    println!("  {} {}", "⚠".yellow(), message);
}

pub fn note(message: &str) {
    println!("  {}", message.dimmed());
}

/// Print multi-line content indented under the current section.
pub fn lines(content: &str) {
    for line in content.lines() {
        println!("  {line}");
    }
}
