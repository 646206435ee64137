use chrono::{DateTime, FixedOffset, Utc};
use clap::ValueEnum;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

/// Output format for listings.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// Print rows as a rounded table or as pretty JSON.
pub(crate) fn print_rows<T: Tabled + Serialize>(
    rows: Vec<T>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    render(&rows, rows.iter(), format)
}

/// Table view of `rows`, JSON view of `value`.
fn render<'a, T, R>(
    value: &T,
    rows: impl IntoIterator<Item = &'a R>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>>
where
    T: Serialize + ?Sized,
    R: Tabled + 'a,
{
    match format {
        OutputFormat::Table => println!("{}", Table::new(rows).with(Style::rounded())),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// Property/value row for single-record views.
#[derive(Debug, Serialize, Tabled)]
pub(crate) struct Detail {
    #[tabled(rename = "Property")]
    pub property: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl Detail {
    pub(crate) fn new(property: &str, value: impl ToString) -> Self {
        Self {
            property: property.to_string(),
            value: value.to_string(),
        }
    }
}

/// Print a property table, or the underlying value as JSON.
pub(crate) fn print_details<T: Serialize>(
    value: &T,
    details: Vec<Detail>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    render(value, &details, format)
}

pub(crate) fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub(crate) fn format_stored_time(at: Option<DateTime<FixedOffset>>) -> String {
    format_time(at.map(|at| at.with_timezone(&Utc)))
}

/// Compact human-readable duration: `42s`, `2m 5s`, `1h 5m`.
pub(crate) fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let (major, minor, units) = match secs {
        0..60 => return format!("{secs}s"),
        60..3600 => (secs / 60, secs % 60, ("m", "s")),
        _ => (secs / 3600, (secs % 3600) / 60, ("h", "m")),
    };
    if minor == 0 {
        format!("{major}{}", units.0)
    } else {
        format!("{major}{} {minor}{}", units.0, units.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_default_is_table() {
        assert!(matches!(OutputFormat::default(), OutputFormat::Table));
    }

    #[test]
    fn format_duration_handles_seconds_minutes_and_hours() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(120)), "2m");
        assert_eq!(format_duration(chrono::Duration::seconds(125)), "2m 5s");
        assert_eq!(format_duration(chrono::Duration::seconds(3600)), "1h");
        assert_eq!(format_duration(chrono::Duration::seconds(3900)), "1h 5m");
    }

    #[test]
    fn missing_times_render_as_dash() {
        assert_eq!(format_time(None), "-");
        assert_eq!(format_stored_time(None), "-");
    }
}
