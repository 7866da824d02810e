//! Text formatting helpers shared by the status panel and chat prompts.

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const BAR_FILLED: &str = "🟩";
const BAR_EMPTY: &str = "⬜️";

pub const BAR_WIDTH: usize = 12;

/// Binary-prefixed byte count with two decimals, e.g. `1.50 KB`.
pub fn human_bytes(size: f64) -> String {
    if !size.is_finite() || size <= 0.0 {
        return "0 B".to_string();
    }

    let mut value = size;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2} {}", BYTE_UNITS[unit])
}

/// Compact duration such as `1h 5m` or `2m 5s`. Zero components are omitted.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    [(hours, 'h'), (minutes, 'm'), (secs, 's')]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Number of filled bar segments for a percentage, clamped to the bar width.
pub fn filled_segments(percentage: f64) -> usize {
    let clamped = clamp_percentage(percentage);
    ((BAR_WIDTH as f64) * clamped / 100.0).floor() as usize
}

pub fn progress_bar(percentage: f64) -> String {
    let filled = filled_segments(percentage);
    format!(
        "{}{}",
        BAR_FILLED.repeat(filled),
        BAR_EMPTY.repeat(BAR_WIDTH - filled)
    )
}

pub fn clamp_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}

/// Cuts a title to `max_chars` characters, appending `...` when shortened.
pub fn shorten_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() > max_chars {
        let head: String = title.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        title.to_string()
    }
}

/// Single-line, user-facing version of a backend error.
pub fn sanitize_error(message: &str) -> String {
    let line = message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("Unknown error");

    let cleaned = line.replace("ERROR: ", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "Unknown error".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Escapes text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(character),
        }
    }
    escaped
}
