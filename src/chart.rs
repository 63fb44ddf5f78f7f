use std::io::{self, Write};

use crate::aggregate::Series;

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Scales `bytes` down by thousands for an axis label.
pub fn human_bytes(bytes: u64) -> (u64, &'static str) {
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1000 && unit < BYTE_UNITS.len() - 1 {
        value /= 1000;
        unit += 1;
    }
    (value, BYTE_UNITS[unit])
}

pub fn human_duration(ms: u64) -> (u64, &'static str) {
    match ms {
        0..=999 => (ms, "ms"),
        1_000..=59_999 => (ms / 1_000, "s"),
        60_000..=3_599_999 => (ms / 60_000, "mn"),
        _ => (ms / 3_600_000, "hr"),
    }
}

/// Groups digits by thousands: `1234567` -> `1,234,567`.
pub fn grouped(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Draws the series as a bar chart, one column per bucket and `rows` lines
/// tall, framed with the max PSS on the left and the duration below.
pub fn render(
    out: &mut impl Write,
    series: &Series,
    rows: u64,
    duration_ms: u64,
) -> io::Result<()> {
    let width = series.heights.len();
    let (max_value, max_unit) = human_bytes(series.max_combined_pss);

    writeln!(out, "{:>3}┏{}┓", max_value, "━".repeat(width))?;

    let middle = rows / 2;
    for row in (0..rows).rev() {
        let edge = if row == middle { "┫" } else { "┃" };
        let bars: String = series
            .heights
            .iter()
            .map(|&h| if h > row as f64 { '█' } else { ' ' })
            .collect();
        writeln!(out, "   {}{}┃", edge, bars)?;
    }

    let axis: String = (0..width)
        .map(|i| if i == width / 2 { '┳' } else { '━' })
        .collect();
    writeln!(out, "{:<3}┗{}┛", format!("0{}", max_unit), axis)?;

    let (span, span_unit) = human_duration(duration_ms);
    let start = format!("0{}", span_unit);
    let pad = (width + 2).saturating_sub(start.len() + 3);
    writeln!(out, "   {}{}{:>3}", start, " ".repeat(pad), span)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Store;

    #[test]
    fn units() {
        assert_eq!(human_bytes(999), (999, "B"));
        assert_eq!(human_bytes(12_345_678), (12, "MB"));
        assert_eq!(human_bytes(u64::MAX), (18_446_744, "TB"));
        assert_eq!(human_duration(250), (250, "ms"));
        assert_eq!(human_duration(1_500), (1, "s"));
        assert_eq!(human_duration(120_000), (2, "mn"));
        assert_eq!(human_duration(7_200_000), (2, "hr"));
    }

    #[test]
    fn thousands() {
        assert_eq!(grouped(0), "0");
        assert_eq!(grouped(999), "999");
        assert_eq!(grouped(1000), "1,000");
        assert_eq!(grouped(1_234_567), "1,234,567");
    }

    #[test]
    fn draws_bars() -> anyhow::Result<()> {
        let mut store = Store::new();
        store.record_pss(0, 1_000_000);
        store.record_pss(150, 2_000_000);
        store.record_pss(390, 4_000_000);
        let series = Series::new(&store, 4, 400, 4);

        let mut out = Vec::new();
        render(&mut out, &series, 4, 400)?;
        let text = String::from_utf8(out)?;
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "  4┏━━━━┓",
                "   ┃   █┃",
                "   ┫   █┃",
                "   ┃ ███┃",
                "   ┃████┃",
                "0MB┗━━┳━┛",
                "   0ms400",
            ]
        );
        Ok(())
    }
}
