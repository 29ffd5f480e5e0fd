use anyhow::{Result, anyhow, bail};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

const EPOCH_SECONDS_CUTOFF: i128 = 100_000_000_000;
const EPOCH_MILLIS_CUTOFF: i128 = 100_000_000_000_000;
const EPOCH_MICROS_CUTOFF: i128 = 100_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpochUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl EpochUnit {
    #[must_use]
    pub const fn nanos_per_unit(self) -> i128 {
        match self {
            Self::Seconds => 1_000_000_000,
            Self::Milliseconds => 1_000_000,
            Self::Microseconds => 1_000,
            Self::Nanoseconds => 1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Milliseconds => "milliseconds",
            Self::Microseconds => "microseconds",
            Self::Nanoseconds => "nanoseconds",
        }
    }
}

/// Guesses the unit of a raw epoch number from its magnitude.
#[must_use]
pub fn infer_epoch_unit(epoch_raw: i128) -> EpochUnit {
    let magnitude = epoch_raw.abs();
    if magnitude < EPOCH_SECONDS_CUTOFF {
        EpochUnit::Seconds
    } else if magnitude < EPOCH_MILLIS_CUTOFF {
        EpochUnit::Milliseconds
    } else if magnitude < EPOCH_MICROS_CUTOFF {
        EpochUnit::Microseconds
    } else {
        EpochUnit::Nanoseconds
    }
}

/// Epoch value of `instant` in `unit`, rounded toward negative infinity.
#[must_use]
pub fn to_epoch(instant: OffsetDateTime, unit: EpochUnit) -> i128 {
    instant.unix_timestamp_nanos().div_euclid(unit.nanos_per_unit())
}

pub fn from_epoch(value: i128, unit: EpochUnit) -> Result<OffsetDateTime> {
    let nanos = value
        .checked_mul(unit.nanos_per_unit())
        .ok_or_else(|| anyhow!("epoch conversion overflow"))?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|error| anyhow!("epoch value out of range: {error}"))
}

/// Parses an RFC 3339 timestamp or a raw epoch number of any common unit.
pub fn parse_instant(raw: &str) -> Result<OffsetDateTime> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        bail!("timestamp input is empty");
    }

    if let Ok(epoch_raw) = candidate.parse::<i128>() {
        if epoch_raw < 0 {
            bail!("negative epoch values are not supported");
        }
        return from_epoch(epoch_raw, infer_epoch_unit(epoch_raw));
    }

    if let Ok(parsed) = OffsetDateTime::parse(candidate, &Rfc3339) {
        return Ok(parsed);
    }

    bail!("unsupported timestamp format: {candidate}");
}

/// Accepts `UTC`, `Z`, `GMT`, `Etc/UTC` and fixed offsets such as `+08:00`, `-0530` or `+08`.
#[must_use]
pub fn parse_utc_offset(zone: &str) -> Option<UtcOffset> {
    let candidate = zone.trim();
    if candidate.is_empty()
        || ["utc", "z", "gmt", "etc/utc"].contains(&candidate.to_ascii_lowercase().as_str())
    {
        return Some(UtcOffset::UTC);
    }

    let (sign, rest) = match candidate.as_bytes().first() {
        Some(b'+') => (1_i8, &candidate[1..]),
        Some(b'-') => (-1_i8, &candidate[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|ch| *ch != ':').collect();
    if !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i8>().ok()?, 0),
        4 => (digits[..2].parse::<i8>().ok()?, digits[2..].parse::<i8>().ok()?),
        _ => return None,
    };

    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

/// RFC 3339 with millisecond precision, `Z` for UTC and `±HH:MM` otherwise.
#[must_use]
pub fn format_rfc3339_millis(instant: OffsetDateTime, offset: UtcOffset) -> String {
    let dt = instant.to_offset(offset);
    let suffix = if offset == UtcOffset::UTC {
        "Z".to_string()
    } else {
        let (hours, minutes, _) = offset.as_hms();
        let sign = if offset.is_negative() { '-' } else { '+' };
        format!("{sign}{:02}:{:02}", hours.unsigned_abs(), minutes.unsigned_abs())
    };
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}{suffix}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

#[must_use]
pub fn format_utc(instant: OffsetDateTime) -> String {
    format_rfc3339_millis(instant, UtcOffset::UTC)
}
