//! Parsing of numeric condition values with unit suffixes.

use super::types::Field;

/// Unit a numeric field is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUnit {
    Bytes,
    Seconds,
    Plain,
}

impl FieldUnit {
    pub fn of(field: Field) -> Self {
        match field {
            Field::Size
            | Field::Downloaded
            | Field::Uploaded
            | Field::FreeSpace
            | Field::DownloadSpeed
            | Field::UploadSpeed => FieldUnit::Bytes,
            Field::SeedingTime
            | Field::AddedOnAge
            | Field::CompletionAge
            | Field::LastActivityAge => FieldUnit::Seconds,
            _ => FieldUnit::Plain,
        }
    }
}

/// Parse `value` as a number in the unit of `field`.
///
/// A bare number (`2.5`, `1e3`) is taken as-is. Bytes accept `b`,
/// `kb`/`mb`/`gb`/`tb` (powers of 1000) and `kib`/`mib`/`gib`/`tib` (powers
/// of 1024). Durations are anything `humantime` reads, such as `90s`, `5m`,
/// `12h`, `30d` or `1h 30m`. Units are case-insensitive.
pub fn parse_numeric(field: Field, value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(number) = value.parse::<f64>() {
        return number.is_finite().then_some(number);
    }

    match FieldUnit::of(field) {
        FieldUnit::Bytes => parse_bytes(value),
        FieldUnit::Seconds => humantime::parse_duration(&value.to_ascii_lowercase())
            .ok()
            .map(|d| d.as_secs_f64()),
        FieldUnit::Plain => None,
    }
}

fn parse_bytes(value: &str) -> Option<f64> {
    let number = value.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let suffix = value[number.len()..].to_ascii_lowercase();
    let number: f64 = number.trim().parse().ok().filter(|n: &f64| n.is_finite())?;

    let multiplier = match suffix.as_str() {
        "b" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "t" | "tb" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_numbers() {
        assert_eq!(parse_numeric(Field::Ratio, "2.5"), Some(2.5));
        assert_eq!(parse_numeric(Field::NumSeeds, " 10 "), Some(10.0));
        assert_eq!(parse_numeric(Field::Ratio, "2x"), None);
        assert_eq!(parse_numeric(Field::Ratio, ""), None);
        assert_eq!(parse_numeric(Field::Ratio, "inf"), None);
    }

    #[test]
    fn test_exponent_notation() {
        assert_eq!(parse_numeric(Field::NumSeeds, "1e3"), Some(1000.0));
        assert_eq!(parse_numeric(Field::Size, "1.5e3"), Some(1500.0));
        assert_eq!(parse_numeric(Field::Size, "1e3GB"), Some(1e12));
        assert_eq!(parse_numeric(Field::SeedingTime, "1e3"), Some(1000.0));
    }

    #[test]
    fn test_byte_suffixes() {
        assert_eq!(parse_numeric(Field::Size, "500GB"), Some(500e9));
        assert_eq!(parse_numeric(Field::FreeSpace, "1 GiB"), Some(1073741824.0));
        assert_eq!(parse_numeric(Field::Size, "10kb"), Some(10_000.0));
        assert_eq!(parse_numeric(Field::Size, "10d"), None);
    }

    #[test]
    fn test_duration_suffixes() {
        assert_eq!(parse_numeric(Field::CompletionAge, "30d"), Some(2_592_000.0));
        assert_eq!(parse_numeric(Field::SeedingTime, "12h"), Some(43_200.0));
        assert_eq!(parse_numeric(Field::LastActivityAge, "5m"), Some(300.0));
        assert_eq!(parse_numeric(Field::AddedOnAge, "1GB"), None);
        assert_eq!(parse_numeric(Field::AddedOnAge, "2w"), Some(1_209_600.0));
        assert_eq!(parse_numeric(Field::SeedingTime, "1h 30m"), Some(5_400.0));
        assert_eq!(parse_numeric(Field::SeedingTime, "90S"), Some(90.0));
        assert_eq!(parse_numeric(Field::SeedingTime, "3600"), Some(3_600.0));
    }
}
