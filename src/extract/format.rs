use chrono::{Duration, NaiveDate, NaiveDateTime};
use hex::encode;
use tiberius::numeric::Numeric;
use tiberius::time::{Date, DateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
use tiberius::ColumnData;

use crate::common::cursor::CursorValue;

const NULL: &str = "NULL";

/// Renders one MSSQL value as a MySQL literal.
pub fn format_column_value(item: &ColumnData<'_>) -> String {
    match item {
        ColumnData::Binary(val) => val
            .as_deref()
            .map(|bytes| format!("X'{}'", encode(bytes)))
            .unwrap_or_else(|| NULL.to_string()),
        ColumnData::Bit(val) => format_number_value(val.map(u8::from)),
        ColumnData::U8(val) => format_number_value(*val),
        ColumnData::I16(val) => format_number_value(*val),
        ColumnData::I32(val) => format_number_value(*val),
        ColumnData::I64(val) => format_number_value(*val),
        ColumnData::F32(val) => format_number_value(*val),
        ColumnData::F64(val) => format_number_value(*val),
        ColumnData::Guid(val) => format_string_value(val.map(|guid| guid.to_string()).as_deref()),
        ColumnData::Numeric(val) => val
            .map(format_numeric_value)
            .unwrap_or_else(|| NULL.to_string()),
        ColumnData::String(val) => format_string_value(val.as_deref()),
        ColumnData::Xml(val) => {
            format_string_value(val.as_deref().map(|xml| xml.to_string()).as_deref())
        }
        ColumnData::Time(val) => format_temporal(val.and_then(convert_time), "'%H:%M:%S%.6f'"),
        ColumnData::Date(val) => format_temporal(
            val.and_then(convert_date).map(|date| date.and_time(Default::default())),
            "'%Y-%m-%d'",
        ),
        ColumnData::SmallDateTime(val) => {
            format_temporal(val.and_then(convert_small_datetime), DATETIME_FORMAT)
        }
        ColumnData::DateTime(val) => format_temporal(val.and_then(convert_datetime), DATETIME_FORMAT),
        ColumnData::DateTime2(val) => {
            format_temporal(val.and_then(convert_datetime2), DATETIME_FORMAT)
        }
        ColumnData::DateTimeOffset(val) => {
            format_temporal(val.and_then(convert_datetime_offset), DATETIME_FORMAT)
        }
    }
}

/// Reads a value usable as a migration cursor: integers and date/time types.
pub fn cursor_value(item: &ColumnData<'_>) -> Option<CursorValue> {
    match item {
        ColumnData::U8(val) => val.map(|v| CursorValue::Ordinal(v.into())),
        ColumnData::I16(val) => val.map(|v| CursorValue::Ordinal(v.into())),
        ColumnData::I32(val) => val.map(|v| CursorValue::Ordinal(v.into())),
        ColumnData::I64(val) => val.map(CursorValue::Ordinal),
        ColumnData::Numeric(Some(numeric)) if numeric.scale() == 0 => {
            i64::try_from(numeric.value()).ok().map(CursorValue::Ordinal)
        }
        ColumnData::Date(val) => val
            .and_then(convert_date)
            .map(|date| CursorValue::Timestamp(date.and_time(Default::default()))),
        ColumnData::SmallDateTime(val) => {
            val.and_then(convert_small_datetime).map(CursorValue::Timestamp)
        }
        ColumnData::DateTime(val) => val.and_then(convert_datetime).map(CursorValue::Timestamp),
        ColumnData::DateTime2(val) => val.and_then(convert_datetime2).map(CursorValue::Timestamp),
        ColumnData::DateTimeOffset(val) => {
            val.and_then(convert_datetime_offset).map(CursorValue::Timestamp)
        }
        _ => None,
    }
}

// MySQL keeps at most microseconds
const DATETIME_FORMAT: &str = "'%Y-%m-%d %H:%M:%S%.6f'";

pub fn format_numeric_value(numeric: Numeric) -> String {
    let scale = numeric.scale() as u32;
    let value = numeric.value();
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();

    if scale == 0 {
        return format!("{}{}", sign, abs);
    }

    let divisor = 10u128.pow(scale);
    format!(
        "{}{}.{:0>width$}",
        sign,
        abs / divisor,
        abs % divisor,
        width = scale as usize
    )
}

pub fn format_string_value(value: Option<&str>) -> String {
    value
        .map(|v| format!("'{}'", v.replace('\\', "\\\\").replace('\'', "''")))
        .unwrap_or_else(|| NULL.to_string())
}

pub fn format_number_value<T>(value: Option<T>) -> String
where
    T: std::fmt::Display,
{
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NULL.to_string())
}

fn format_temporal(value: Option<NaiveDateTime>, format: &str) -> String {
    value
        .map(|datetime| datetime.format(format).to_string())
        .unwrap_or_else(|| NULL.to_string())
}

fn convert_time(time: Time) -> Option<NaiveDateTime> {
    midnight(NaiveDate::default())?.checked_add_signed(time_of_day(time)?)
}

fn convert_date(date: Date) -> Option<NaiveDate> {
    from_days(date.days() as i64, 1)
}

fn convert_datetime(datetime: DateTime) -> Option<NaiveDateTime> {
    // Fragments are 1/300 of a second
    let nanos = datetime.seconds_fragments() as i64 * 1_000_000_000 / 300;
    midnight(from_days(datetime.days() as i64, 1900)?)?
        .checked_add_signed(Duration::nanoseconds(nanos))
}

fn convert_small_datetime(datetime: SmallDateTime) -> Option<NaiveDateTime> {
    // Minutes since midnight, despite the accessor name
    let minutes = datetime.seconds_fragments() as i64;
    midnight(from_days(datetime.days() as i64, 1900)?)?
        .checked_add_signed(Duration::minutes(minutes))
}

fn convert_datetime2(datetime: DateTime2) -> Option<NaiveDateTime> {
    midnight(from_days(datetime.date().days() as i64, 1)?)?
        .checked_add_signed(time_of_day(datetime.time())?)
}

/// MSSQL stores the UTC instant; the offset is display information only.
fn convert_datetime_offset(datetime: DateTimeOffset) -> Option<NaiveDateTime> {
    convert_datetime2(datetime.datetime2())
}

fn time_of_day(time: Time) -> Option<Duration> {
    let factor = 10i64.checked_pow(9u32.checked_sub(time.scale() as u32)?)?;
    let nanos = i64::try_from(time.increments()).ok()?.checked_mul(factor)?;
    Some(Duration::nanoseconds(nanos))
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

fn from_days(days: i64, base_year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(base_year, 1, 1)?.checked_add_signed(Duration::days(days))
}
