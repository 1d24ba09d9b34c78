//! Parsers for `zfs list -H` / `zfs get -H` output.
//!
//! Scripted (`-H`) output has one record per line and tab-separated columns.
//! A row with the wrong number of columns means the output is not what the
//! command was asked for, so it is rejected instead of skipped.

use thiserror::Error;

use crate::error::CsiError;

/// Failure to interpret command output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid quota value {0:?}")]
    InvalidQuota(String),

    #[error("expected {expected} tab-separated fields, found {found}: {line:?}")]
    FieldCount {
        expected: usize,
        found: usize,
        line: String,
    },
}

impl From<ParseError> for CsiError {
    fn from(e: ParseError) -> Self {
        CsiError::Internal(format!("unexpected zfs output: {e}"))
    }
}

/// One row of `zfs list -H -o name,mountpoint,quota`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub name: String,
    pub mountpoint: String,
    /// `None` when the dataset has no quota.
    pub quota: Option<u64>,
}

/// Parse a quota column such as `20G`, `1.50T` or `none` into bytes.
///
/// Suffixes are the binary units `K`, `M`, `G`, `T` (uppercase only).
/// Fractional values are truncated after scaling.
pub fn parse_quota(text: &str) -> Result<Option<u64>, ParseError> {
    if text == "none" || text == "-" {
        return Ok(None);
    }

    let (number, multiplier) = match text.char_indices().last() {
        Some((i, 'K')) => (&text[..i], 1u64 << 10),
        Some((i, 'M')) => (&text[..i], 1u64 << 20),
        Some((i, 'G')) => (&text[..i], 1u64 << 30),
        Some((i, 'T')) => (&text[..i], 1u64 << 40),
        _ => (text, 1),
    };
    let invalid = || ParseError::InvalidQuota(text.to_owned());

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).map(Some).ok_or_else(invalid);
    }

    // `f64::from_str` also accepts "inf", "nan" and exponents; only plain
    // decimals are valid here.
    let plain = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.chars().filter(|&c| c == '.').count() == 1
        && number.chars().any(|c| c.is_ascii_digit());
    if !plain {
        return Err(invalid());
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = value * multiplier as f64;
    if bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Some(bytes as u64))
}

/// Split scripted output into rows of exactly `columns` fields.
///
/// Blank lines (including the trailing newline) carry no record.
pub fn parse_rows(output: &str, columns: usize) -> Result<Vec<Vec<String>>, ParseError> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<String> = line.split('\t').map(str::to_owned).collect();
            if fields.len() != columns {
                return Err(ParseError::FieldCount {
                    expected: columns,
                    found: fields.len(),
                    line: line.to_owned(),
                });
            }
            Ok(fields)
        })
        .collect()
}

/// Parse `zfs list -H -o name,mountpoint,quota` output.
pub fn parse_listing(output: &str) -> Result<Vec<DatasetRecord>, ParseError> {
    parse_rows(output, 3)?
        .into_iter()
        .map(|mut fields| {
            let quota = parse_quota(&fields[2])?;
            let mountpoint = std::mem::take(&mut fields[1]);
            let name = std::mem::take(&mut fields[0]);
            Ok(DatasetRecord {
                name,
                mountpoint,
                quota,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_with_units() {
        assert_eq!(parse_quota("20G"), Ok(Some(20 * 1024 * 1024 * 1024)));
        assert_eq!(parse_quota("512K"), Ok(Some(512 * 1024)));
        assert_eq!(parse_quota("3M"), Ok(Some(3 * 1024 * 1024)));
        assert_eq!(parse_quota("4096"), Ok(Some(4096)));
    }

    #[test]
    fn fractional_quota_is_truncated() {
        assert_eq!(parse_quota("1.5T"), Ok(Some(1_649_267_441_664)));
        // 1.33 * 1024 = 1361.92
        assert_eq!(parse_quota("1.33K"), Ok(Some(1361)));
    }

    #[test]
    fn absent_quota() {
        assert_eq!(parse_quota("none"), Ok(None));
        assert_eq!(parse_quota("-"), Ok(None));
    }

    #[test]
    fn malformed_quota() {
        for text in ["", "G", "abc", "1.2.3G", "20g", "inf", "NaN", "1e3", "-5G", "20GB"] {
            assert!(parse_quota(text).is_err(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn overflowing_quota() {
        assert!(parse_quota("99999999999T").is_err());
    }

    #[test]
    fn listing() {
        let out = "tank/k8s\t/tank/k8s\tnone\n\
                   tank/k8s/pvc-a\t/tank/k8s/pvc-a\t10G\n\
                   tank/k8s/pvc-b\t/tank/k8s/pvc-b\t1.5T\n";
        let records = parse_listing(out).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].quota, None);
        assert_eq!(records[1].name, "tank/k8s/pvc-a");
        assert_eq!(records[1].mountpoint, "/tank/k8s/pvc-a");
        assert_eq!(records[1].quota, Some(10 << 30));
        assert_eq!(records[2].quota, Some(1_649_267_441_664));
    }

    #[test]
    fn empty_listing() {
        assert_eq!(parse_listing(""), Ok(vec![]));
        assert_eq!(parse_listing("\n"), Ok(vec![]));
    }

    #[test]
    fn wrong_field_count_is_fatal() {
        let out = "tank/a\t/tank/a\t1G\ntank/b\t/tank/b\n";
        match parse_listing(out) {
            Err(ParseError::FieldCount {
                expected, found, ..
            }) => {
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bad_quota_in_listing_is_fatal() {
        assert!(parse_listing("tank/a\t/tank/a\tlots\n").is_err());
    }

    #[test]
    fn parse_error_becomes_internal() {
        let err: CsiError = ParseError::InvalidQuota("x".into()).into();
        assert!(matches!(err, CsiError::Internal(_)));
    }
}
