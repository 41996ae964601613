//! Field formatters for human-readable output

use clap::ValueEnum;

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Raw => "Raw",
            FormatMode::Human => "Human-Readable",
        }
    }
}

/// Format a YYMMDD date field
pub fn format_date(date: &str, mode: &FormatMode) -> String {
    if *mode == FormatMode::Raw || date.len() != 6 {
        return date.to_string();
    }
    format!("{}/{}/{} (YY/MM/DD)", &date[0..2], &date[2..4], &date[4..6])
}

/// Expand the single-letter MRZ sex code
pub fn format_sex(code: &str, mode: &FormatMode) -> String {
    if *mode == FormatMode::Raw {
        return code.to_string();
    }
    match code {
        "M" => "Male".to_string(),
        "F" => "Female".to_string(),
        _ => "Unspecified".to_string(),
    }
}

/// Expand the MRZ document code (P, I, ID, ...)
pub fn format_document_code(code: &str, mode: &FormatMode) -> String {
    if *mode == FormatMode::Raw {
        return code.to_string();
    }
    match code.chars().next() {
        Some('P') => format!("{} (Passport)", code),
        Some('I') | Some('A') | Some('C') => format!("{} (Identity Card)", code),
        Some('V') => format!("{} (Visa)", code),
        _ => code.to_string(),
    }
}
