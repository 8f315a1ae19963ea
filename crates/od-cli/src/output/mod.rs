//! Terminal output: the browser table and colored status lines

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use od_core::browser::BrowserDescriptor;

/// Format a browser catalog as an ASCII table
pub fn format_browsers(browsers: &[BrowserDescriptor]) -> String {
    if browsers.is_empty() {
        return "No browsers available".to_string();
    }

    #[derive(Tabled)]
    struct BrowserRow {
        #[tabled(rename = "PLATFORM")]
        platform: String,
        #[tabled(rename = "BROWSER")]
        browser: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "DEVICE")]
        device: String,
        #[tabled(rename = "SELECTION")]
        key: String,
    }

    let rows: Vec<BrowserRow> = browsers
        .iter()
        .map(|b| BrowserRow {
            platform: b.platform.clone(),
            browser: b.browser.clone(),
            version: b.version.clone(),
            device: b.device.clone().unwrap_or_else(|| "-".to_string()),
            key: b.key(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn print_marked(mut out: impl Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a green success line on stdout
pub fn print_success(msg: &str) {
    print_marked(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print a red error line on stderr
pub fn print_error(msg: &str) {
    print_marked(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a yellow warning line on stderr
pub fn print_warning(msg: &str) {
    print_marked(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print a cyan note on stdout
pub fn print_info(msg: &str) {
    print_marked(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_empty_catalog() {
        assert_eq!(format_browsers(&[]), "No browsers available");
    }

    #[test]
    fn test_format_catalog() {
        let browsers = vec![
            BrowserDescriptor::parse("Windows 10|chrome|120").unwrap(),
            BrowserDescriptor::parse("Linux|android|12.0|Pixel 6").unwrap(),
        ];
        let table = format_browsers(&browsers);
        assert!(table.contains("PLATFORM"));
        assert!(table.contains("Windows 10|chrome|120"));
        assert!(table.contains("Pixel 6"));
    }
}
