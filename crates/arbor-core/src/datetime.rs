use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  NaiveDate,
  NaiveDateTime,
  NaiveTime
};
use regex::Regex;

/// Wall-clock layout used when writing
/// due dates. `%.f` only emits a
/// fraction when one is present.
pub const DUE_FORMAT: &str =
  "%Y-%m-%dT%H:%M:%S%.f";

const DUE_INPUT_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M"
];

#[must_use]
pub fn format_due(
  due: Option<NaiveDateTime>
) -> String {
  due
    .map(|dt| {
      dt.format(DUE_FORMAT).to_string()
    })
    .unwrap_or_default()
}

/// Reads the persisted due-date text.
/// Empty or unparsable text is not an
/// error: it simply means "no date".
#[must_use]
pub fn parse_due(
  raw: &str
) -> Option<NaiveDateTime> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  if let Ok(ndt) =
    NaiveDateTime::parse_from_str(
      trimmed,
      "%Y-%m-%dT%H:%M:%S%.f"
    )
  {
    return Some(ndt);
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Some(dt.naive_local());
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      trimmed, "%Y-%m-%d"
    )
  {
    return Some(
      date.and_time(NaiveTime::MIN)
    );
  }

  tracing::trace!(raw = %trimmed, "unparsable due date; treating as unset");
  None
}

/// Parses a due date typed by a user.
///
/// Accepts `today`, `tomorrow`,
/// relative offsets (`+3d`, `+2w`,
/// `-4h`), plain dates, local
/// date-times and RFC 3339 stamps.
#[tracing::instrument(skip(now))]
pub fn parse_due_input(
  input: &str,
  now: NaiveDateTime
) -> anyhow::Result<NaiveDateTime> {
  let token =
    input.trim().to_ascii_lowercase();
  if token.is_empty() {
    return Err(anyhow!(
      "due date cannot be empty"
    ));
  }

  let midnight = |date: NaiveDate| {
    date.and_time(NaiveTime::MIN)
  };

  match token.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return Ok(midnight(now.date()));
    }
    | "tomorrow" => {
      return Ok(
        midnight(now.date())
          + Duration::days(1)
      );
    }
    | "yesterday" => {
      return Ok(
        midnight(now.date())
          - Duration::days(1)
      );
    }
    | _ => {}
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwh])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&token)
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match &caps["unit"]
    {
      | "d" => Duration::try_days(num),
      | "w" => Duration::try_weeks(num),
      | "h" => Duration::try_hours(num),
      | _ => None
    }
    .ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    })?;

    let shifted = if &caps["sign"] == "-"
    {
      now.checked_sub_signed(duration)
    } else {
      now.checked_add_signed(duration)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    });
  }

  let raw = input.trim();

  if let Ok(date) =
    NaiveDate::parse_from_str(
      raw, "%Y-%m-%d"
    )
  {
    return Ok(midnight(date));
  }

  for fmt in DUE_INPUT_FORMATS {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        raw, fmt
      )
    {
      return Ok(ndt);
    }
  }

  DateTime::parse_from_rfc3339(raw)
  .map(|dt| dt.naive_local())
  .map_err(|_| {
    anyhow!(
      "unrecognized due date: {input}"
    )
  })
}

/// Serde adapter for the `dueDate`
/// field: written as text (empty when
/// unset), read leniently from any JSON
/// value.
pub mod due_date_serde {
  use chrono::NaiveDateTime;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };
  use serde_json::Value;

  pub fn serialize<S>(
    due: &Option<NaiveDateTime>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &super::format_due(*due)
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<
    Option<NaiveDateTime>,
    D::Error
  >
  where
    D: Deserializer<'de>
  {
    let raw =
      Value::deserialize(deserializer)?;
    Ok(
      raw
        .as_str()
        .and_then(super::parse_due)
    )
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    NaiveDateTime
  };

  use super::{
    format_due,
    parse_due,
    parse_due_input
  };

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32
  ) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
      .and_then(|date| {
        date.and_hms_opt(h, min, 0)
      })
      .expect("valid datetime")
  }

  #[test]
  fn writes_iso_without_fraction() {
    assert_eq!(
      format_due(Some(at(
        2026, 10, 20, 9, 30
      ))),
      "2026-10-20T09:30:00"
    );
    assert_eq!(format_due(None), "");
  }

  #[test]
  fn reads_what_it_writes() {
    let due = at(2026, 3, 1, 18, 5);
    assert_eq!(
      parse_due(&format_due(Some(
        due
      ))),
      Some(due)
    );
  }

  #[test]
  fn reads_offset_and_date_only_forms()
  {
    assert_eq!(
      parse_due(
        "2026-03-01T18:05:00+02:00"
      ),
      Some(at(2026, 3, 1, 18, 5))
    );
    assert_eq!(
      parse_due("2026-03-01Z"),
      None
    );
    assert_eq!(
      parse_due("2026-03-01"),
      Some(at(2026, 3, 1, 0, 0))
    );
  }

  #[test]
  fn garbage_due_text_is_unset() {
    assert_eq!(parse_due(""), None);
    assert_eq!(
      parse_due("next tuesday-ish"),
      None
    );
  }

  #[test]
  fn parses_relative_input() {
    let now = at(2026, 10, 16, 12, 0);
    assert_eq!(
      parse_due_input("+3d", now)
        .expect("relative days"),
      at(2026, 10, 19, 12, 0)
    );
    assert_eq!(
      parse_due_input("+1w", now)
        .expect("relative weeks"),
      at(2026, 10, 23, 12, 0)
    );
    assert_eq!(
      parse_due_input("tomorrow", now)
        .expect("tomorrow"),
      at(2026, 10, 17, 0, 0)
    );
  }

  #[test]
  fn parses_absolute_input() {
    let now = at(2026, 10, 16, 12, 0);
    assert_eq!(
      parse_due_input(
        "2027-01-02", now
      )
      .expect("date"),
      at(2027, 1, 2, 0, 0)
    );
    assert_eq!(
      parse_due_input(
        "2027-01-02T08:15",
        now
      )
      .expect("datetime"),
      at(2027, 1, 2, 8, 15)
    );
    assert!(
      parse_due_input("someday", now)
        .is_err()
    );
  }
}
