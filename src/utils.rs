use failure::Fail;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Parse a human-friendly duration like `10m`, `1m30s`, `250ms` or `0`.
///
/// A bare number is interpreted as seconds.
pub fn parse_duration(src: &str) -> Result<Duration, InvalidDuration> {
    let src = src.trim();
    let invalid = || InvalidDuration(src.to_string());

    if src.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = src.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::from_secs(0);
    let mut rest = src;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or_else(|| rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            _ => return Err(invalid()),
        };
        total = unit
            .and_then(|unit| total.checked_add(unit))
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

/// The inverse of [`parse_duration()`].
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();

    if millis == 0 {
        return String::from("0");
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let mut secs = duration.as_secs();
    let mut formatted = String::new();

    for &(unit, size) in &[("h", 60 * 60), ("m", 60), ("s", 1)] {
        if secs >= size {
            formatted.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }

    formatted
}

#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "\"{}\" isn't a valid duration (try something like \"10m\" or \"1m30s\")", _0)]
pub struct InvalidDuration(pub String);

/// Create a directory, ignoring the error if it already exists.
pub async fn create_dir(path: &Path) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(0o700);

    match builder.create(path).await {
        Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// Recursively delete a directory, ignoring the error if it was never
/// created.
pub async fn remove_dir_all(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// (de)serialize a `Duration` using the [`parse_duration()`] format.
pub(crate) mod duration_shim {
    use super::*;
    use serde::de::{Deserialize, Deserializer, Error};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Duration, D::Error> {
        let raw = String::deserialize(de)?;
        parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_some_durations() {
        let inputs = vec![
            ("0", Duration::from_secs(0)),
            ("30", Duration::from_secs(30)),
            ("250ms", Duration::from_millis(250)),
            ("10m", Duration::from_secs(600)),
            ("1m30s", Duration::from_secs(90)),
            ("2h", Duration::from_secs(7200)),
        ];

        for (src, should_be) in inputs {
            assert_eq!(parse_duration(src).unwrap(), should_be, "{}", src);
        }
    }

    #[test]
    fn reject_bad_durations() {
        for src in &["", "m", "10x", "1.5s", "-3s", "s10", "9999999999999999h"] {
            assert!(parse_duration(src).is_err(), "{:?}", src);
        }
    }

    #[test]
    fn overflowing_sums_are_rejected() {
        let src = format!("{}s{}s", u64::MAX, u64::MAX);

        assert_eq!(parse_duration(&src), Err(InvalidDuration(src.clone())));
    }

    #[test]
    fn formatted_durations_can_be_parsed_again() {
        for secs in &[0, 1, 59, 60, 90, 3600, 3725] {
            let duration = Duration::from_secs(*secs);
            let formatted = format_duration(duration);
            assert_eq!(parse_duration(&formatted).unwrap(), duration, "{}", formatted);
        }

        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
    }

    #[tokio::test]
    async fn creating_a_directory_twice_is_fine() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("alice");

        create_dir(&dir).await.unwrap();
        create_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn removing_a_missing_directory_is_fine() {
        let temp = tempfile::tempdir().unwrap();

        remove_dir_all(&temp.path().join("never-created")).await.unwrap();
    }
}
