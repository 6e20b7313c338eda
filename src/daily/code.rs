//! Daily auction codes: `DA` followed by a zero-padded sequence number.

const PREFIX: &str = "DA";
const WIDTH: usize = 6;

/// `DA000001` for sequence 1. Codes wider than six digits keep growing.
pub fn format_daily_code(seq: i64) -> String {
    format!("{PREFIX}{:0width$}", seq, width = WIDTH)
}

pub fn parse_daily_code(code: &str) -> Option<i64> {
    let digits = code.strip_prefix(PREFIX)?;
    if digits.len() < WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Hourly auction code, e.g. `HA20261017-1400`.
pub fn hourly_auction_code(date: chrono::NaiveDate, slot: &str) -> String {
    format!("HA{}-{}", date.format("%Y%m%d"), slot.replace(':', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(format_daily_code(1), "DA000001");
        assert_eq!(format_daily_code(42), "DA000042");
        assert_eq!(format_daily_code(1_234_567), "DA1234567");
    }

    #[test]
    fn test_codes_increase_with_sequence() {
        let codes: Vec<_> = (1..=1200).map(format_daily_code).collect();
        for pair in codes.windows(2) {
            assert!(parse_daily_code(&pair[0]) < parse_daily_code(&pair[1]));
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_daily_code("DA000007"), Some(7));
        assert_eq!(parse_daily_code("DB000007"), None);
        assert_eq!(parse_daily_code("DA7"), None);
        assert_eq!(parse_daily_code("DA00000x"), None);
    }

    #[test]
    fn test_hourly_code() {
        let d = chrono::NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(hourly_auction_code(d, "09:00"), "HA20261017-0900");
    }
}
