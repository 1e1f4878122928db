//! Startup banners on stdout.
//!
//! The host scans stdout line by line for the readiness sentinel, so banners
//! never contain a bare sentinel-like line: every line starts with the role.

use owo_colors::{OwoColorize, Stream::Stdout};
use std::io::Write;

/// Print a role header followed by aligned `label: value` detail lines.
pub fn print(role: &str, headline: &str, details: &[(&str, String)]) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(
        out,
        "{} {}",
        format!("[{}]", role)
            .if_supports_color(Stdout, |text| text.green())
            .if_supports_color(Stdout, |text| text.bold()),
        headline
    );
    let width = details.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in details {
        let _ = writeln!(
            out,
            "{}   {}  {}",
            format!("[{}]", role).if_supports_color(Stdout, |text| text.dimmed()),
            format!("{:<width$}", label, width = width)
                .if_supports_color(Stdout, |text| text.cyan()),
            value
        );
    }
    let _ = out.flush();
}
