//! Time node: timezone-aware current or derived time.

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, TimeZone, Timelike, Weekday,
};
use chrono_tz::{OffsetComponents, Tz};
use serde_json::{json, Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::registry::NodeHandler;
use crate::types::WorkflowResult;

pub struct TimeNode;

#[async_trait]
impl NodeHandler for TimeNode {
    fn type_tag(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Current or derived time in a named timezone, with arithmetic and period snapping"
    }

    async fn execute(
        &self,
        ctx: NodeCtx,
        params: Map<String, Value>,
        _inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let tz_name = params
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("UTC");
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| WorkflowError::handler("parse", format!("unknown timezone '{}'", tz_name)))?;

        let base = match params.get("base_time").and_then(Value::as_str) {
            Some(text) => DateTime::parse_from_rfc3339(text)
                .map_err(|e| {
                    WorkflowError::handler("parse", format!("invalid base_time '{}': {}", text, e))
                })?
                .with_timezone(&tz),
            None => ctx.now().with_timezone(&tz),
        };

        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("now");

        let result = match operation {
            "now" => base,
            "add_time" | "subtract_time" => {
                let amount = params.get("amount").and_then(Value::as_i64).unwrap_or(1);
                let unit = params.get("unit").and_then(Value::as_str).unwrap_or("day");
                let signed = if operation == "subtract_time" {
                    -amount
                } else {
                    amount
                };
                shift(base, signed, unit)?
            }
            "start_of" | "end_of" => {
                let period = params
                    .get("period")
                    .or_else(|| params.get("unit"))
                    .and_then(Value::as_str)
                    .unwrap_or("day");
                let start = period_start(base.date_naive(), period)?;
                if operation == "start_of" {
                    local_midnight(tz, start)?
                } else {
                    let next = period_next(start, period).ok_or_else(|| {
                        WorkflowError::handler("parse", "period end out of range")
                    })?;
                    local_midnight(tz, next)? - Duration::seconds(1)
                }
            }
            "next_weekday" | "previous_weekday" => {
                let target = parse_weekday(
                    params
                        .get("weekday")
                        .and_then(Value::as_str)
                        .unwrap_or("monday"),
                )?;
                let step = if operation == "next_weekday" { 1 } else { -1 };
                let mut cursor = base;
                loop {
                    cursor = cursor + Duration::days(step);
                    if cursor.weekday() == target {
                        break cursor;
                    }
                }
            }
            other => {
                return Err(WorkflowError::handler(
                    "parse",
                    format!("unknown time operation '{}'", other),
                ))
            }
        };

        let iso = result.to_rfc3339();
        let custom_formatted = match params.get("custom_format").and_then(Value::as_str) {
            Some(format) => format_checked(&result, format)?,
            None => iso.clone(),
        };

        Ok(json!({
            "output": iso,
            "iso": iso,
            "timestamp": result.timestamp(),
            "year": result.year(),
            "month": result.month(),
            "day": result.day(),
            "hour": result.hour(),
            "minute": result.minute(),
            "second": result.second(),
            "timezone": tz.name(),
            "day_of_week": result.format("%A").to_string(),
            "month_name": result.format("%B").to_string(),
            "utc_offset": result.format("%:z").to_string(),
            "is_dst": result.offset().dst_offset() != Duration::zero(),
            "custom_formatted": custom_formatted,
        }))
    }
}

/// Render with a user-supplied strftime pattern, rejecting patterns
/// chrono cannot format instead of panicking inside `Display`.
fn format_checked(at: &DateTime<Tz>, format: &str) -> WorkflowResult<String> {
    use chrono::format::{Item, StrftimeItems};

    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(WorkflowError::handler(
            "parse",
            format!("invalid custom_format '{}'", format),
        ));
    }
    Ok(at.format_with_items(items.into_iter()).to_string())
}

fn shift(base: DateTime<Tz>, amount: i64, unit: &str) -> WorkflowResult<DateTime<Tz>> {
    let out_of_range = || WorkflowError::handler("parse", "time arithmetic out of range");
    match unit {
        "second" => Ok(base + Duration::seconds(amount)),
        "minute" => Ok(base + Duration::minutes(amount)),
        "hour" => Ok(base + Duration::hours(amount)),
        "day" => Ok(base + Duration::days(amount)),
        "week" => Ok(base + Duration::weeks(amount)),
        "month" => shift_months(base, amount).ok_or_else(out_of_range),
        "year" => shift_months(base, amount.checked_mul(12).unwrap_or(0)).ok_or_else(out_of_range),
        "business_day" => {
            let step = if amount < 0 { -1 } else { 1 };
            let mut remaining = amount.unsigned_abs();
            let mut cursor = base;
            while remaining > 0 {
                cursor = cursor + Duration::days(step);
                if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
                    remaining -= 1;
                }
            }
            Ok(cursor)
        }
        other => Err(WorkflowError::handler(
            "parse",
            format!("unknown time unit '{}'", other),
        )),
    }
}

fn shift_months(base: DateTime<Tz>, amount: i64) -> Option<DateTime<Tz>> {
    let months = Months::new(amount.unsigned_abs() as u32);
    if amount < 0 {
        base.checked_sub_months(months)
    } else {
        base.checked_add_months(months)
    }
}

fn period_start(date: NaiveDate, period: &str) -> WorkflowResult<NaiveDate> {
    let start = match period {
        "day" => Some(date),
        "week" => date.checked_sub_days(Days::new(date.weekday().num_days_from_monday() as u64)),
        "month" => date.with_day(1),
        "quarter" => {
            let month = (date.month0() / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), month, 1)
        }
        "year" => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        other => {
            return Err(WorkflowError::handler(
                "parse",
                format!("unknown period '{}'", other),
            ))
        }
    };
    start.ok_or_else(|| WorkflowError::handler("parse", "period start out of range"))
}

fn period_next(start: NaiveDate, period: &str) -> Option<NaiveDate> {
    match period {
        "day" => start.checked_add_days(Days::new(1)),
        "week" => start.checked_add_days(Days::new(7)),
        "month" => start.checked_add_months(Months::new(1)),
        "quarter" => start.checked_add_months(Months::new(3)),
        "year" => start.checked_add_months(Months::new(12)),
        _ => None,
    }
}

fn local_midnight(tz: Tz, date: NaiveDate) -> WorkflowResult<DateTime<Tz>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| WorkflowError::handler("parse", "invalid date"))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| WorkflowError::handler("parse", "nonexistent local midnight"))
}

fn parse_weekday(name: &str) -> WorkflowResult<Weekday> {
    match name.to_lowercase().as_str() {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        other => Err(WorkflowError::handler(
            "parse",
            format!("unknown weekday '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Clock;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::watch;

    // Wednesday, June 5th 2024, 15:30 UTC.
    fn fixed_ctx() -> NodeCtx {
        let at = DateTime::parse_from_rfc3339("2024-06-05T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (_tx, rx) = watch::channel(false);
        NodeCtx::new("time-0".into(), HashMap::new(), rx, Clock::fixed(at))
    }

    fn params(raw: Value) -> Map<String, Value> {
        match raw {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn run(raw_params: Value) -> Value {
        TimeNode
            .execute(fixed_ctx(), params(raw_params), Map::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_now_in_utc() {
        let out = run(json!({})).await;
        assert_eq!(out["year"], json!(2024));
        assert_eq!(out["month"], json!(6));
        assert_eq!(out["day"], json!(5));
        assert_eq!(out["hour"], json!(15));
        assert_eq!(out["day_of_week"], json!("Wednesday"));
        assert_eq!(out["month_name"], json!("June"));
        assert_eq!(out["timezone"], json!("UTC"));
        assert_eq!(out["utc_offset"], json!("+00:00"));
        assert_eq!(out["is_dst"], json!(false));
        assert_eq!(out["timestamp"], json!(1717601400));
    }

    #[tokio::test]
    async fn test_timezone_conversion_and_dst() {
        let out = run(json!({"timezone": "America/New_York"})).await;
        assert_eq!(out["hour"], json!(11));
        assert_eq!(out["utc_offset"], json!("-04:00"));
        assert_eq!(out["is_dst"], json!(true));
        assert_eq!(out["timezone"], json!("America/New_York"));
    }

    #[tokio::test]
    async fn test_add_and_subtract() {
        let out = run(json!({"operation": "subtract_time", "amount": 2, "unit": "hour"})).await;
        assert_eq!(out["hour"], json!(13));

        let out = run(json!({"operation": "add_time", "amount": 1, "unit": "month"})).await;
        assert_eq!(out["month"], json!(7));
        assert_eq!(out["day"], json!(5));
    }

    #[tokio::test]
    async fn test_business_day_skips_weekend() {
        let out = run(json!({"operation": "add_time", "amount": 3, "unit": "business_day"})).await;
        // Wed + 3 business days lands on Monday.
        assert_eq!(out["day"], json!(10));
        assert_eq!(out["day_of_week"], json!("Monday"));
    }

    #[tokio::test]
    async fn test_start_and_end_of_period() {
        let out = run(json!({"operation": "start_of", "period": "month"})).await;
        assert_eq!(out["day"], json!(1));
        assert_eq!(out["hour"], json!(0));

        let out = run(json!({"operation": "end_of", "period": "month"})).await;
        assert_eq!(out["day"], json!(30));
        assert_eq!(out["hour"], json!(23));
        assert_eq!(out["second"], json!(59));

        let out = run(json!({"operation": "start_of", "period": "quarter"})).await;
        assert_eq!(out["month"], json!(4));
        assert_eq!(out["day"], json!(1));

        let out = run(json!({"operation": "start_of", "period": "week"})).await;
        assert_eq!(out["day"], json!(3));
        assert_eq!(out["day_of_week"], json!("Monday"));
    }

    #[tokio::test]
    async fn test_weekday_jumps() {
        let out = run(json!({"operation": "next_weekday", "weekday": "friday"})).await;
        assert_eq!(out["day"], json!(7));

        let out = run(json!({"operation": "previous_weekday", "weekday": "friday"})).await;
        assert_eq!(out["day"], json!(31));
        assert_eq!(out["month"], json!(5));
    }

    #[tokio::test]
    async fn test_custom_format_and_base_time() {
        let out = run(json!({
            "base_time": "2024-01-15T08:00:00Z",
            "custom_format": "%Y/%m/%d"
        }))
        .await;
        assert_eq!(out["custom_formatted"], json!("2024/01/15"));
    }

    #[tokio::test]
    async fn test_invalid_custom_format_errors() {
        let err = TimeNode
            .execute(
                fixed_ctx(),
                params(json!({"custom_format": "%Q%Q"})),
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("custom_format"));
    }

    #[tokio::test]
    async fn test_unknown_timezone_errors() {
        let err = TimeNode
            .execute(
                fixed_ctx(),
                params(json!({"timezone": "Mars/Olympus"})),
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown timezone"));
    }
}
