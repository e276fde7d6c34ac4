//! Human-readable byte counts for build reports and logs.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// `1536` → `"1.5 KiB"`. Plain bytes stay integral; larger units keep at most two
/// significant decimals with trailing zeros removed.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} B");
    }
    let precision = if value >= 10.0 { 1 } else { 2 };
    let rendered = format!("{value:.precision$}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}

/// Share of `original` removed by minification or compression, e.g. `"62.5%"`.
/// Output larger than the input reports a negative saving.
pub fn savings(original: u64, output: u64) -> String {
    if original == 0 {
        return "0%".to_string();
    }
    let saved = (original as f64 - output as f64) / original as f64 * 100.0;
    let rendered = format!("{saved:.1}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered}%")
}
