//! Coercion of loosely-typed request, upstream and analyzer values into canonical
//! storage fields.

use crate::models::{
    Environment, LeadCreateRequest, LeadFlashRequest, LeadOperation, LeadRow,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::str::FromStr;

/// Placeholder values the analyzer and the upstream use for "no data".
const PLACEHOLDERS: [&str; 5] = ["not found", "na", "n/a", "none", "null"];

pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || PLACEHOLDERS
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Trims a value and maps empty strings and placeholders to `None`.
pub fn clean(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        if is_placeholder(&v) {
            None
        } else {
            Some(v.trim().to_string())
        }
    })
}

pub fn clean_str(value: Option<&str>) -> Option<String> {
    clean(value.map(str::to_string))
}

/// Parses an amount after stripping currency markers, thousands separators and
/// whitespace. Indian grouping (`1,00,000.50`) is accepted.
pub fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let mut s = raw.trim();
    loop {
        let lower = s.to_lowercase();
        let stripped = ["₹", "inr", "rs.", "rs"]
            .iter()
            .find(|prefix| lower.starts_with(*prefix))
            .map(|prefix| s[prefix.len()..].trim_start());
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    let s = s.trim_end_matches("/-");
    let digits: String = s
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if digits.is_empty() {
        return None;
    }
    BigDecimal::from_str(&digits).ok()
}

pub fn decimal_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    BigDecimal::from_str(&value.to_string()).ok()
}

/// Parses a calendar date from the formats seen in emails and upstream payloads.
///
/// Day-first forms are tried before month-first, so `05/04/2024` reads as 5 April.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() || is_placeholder(s) {
        return None;
    }

    const PRIMARY: [&str; 4] = ["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%m/%d/%Y"];
    const FALLBACK: [&str; 9] = [
        "%Y/%m/%d",
        "%d.%m.%Y",
        "%d %b %Y",
        "%d-%b-%Y",
        "%d %B %Y",
        "%d-%B-%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %b, %Y",
    ];

    for format in PRIMARY.iter().chain(FALLBACK.iter()) {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    // ISO timestamps without offset, e.g. "2024-03-01T10:15:00"
    if let Some((date_part, _)) = s.split_once('T') {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            return Some(date);
        }
    }

    None
}

/// Date of birth as the upstream expects it (`YYYY-MM-DDT00:00:00Z`). Unparseable
/// input is passed through unchanged.
pub fn format_upstream_date(raw: &str) -> String {
    match parse_date(raw) {
        Some(date) => format!("{}T00:00:00Z", date.format("%Y-%m-%d")),
        None => raw.trim().to_string(),
    }
}

/// Integer coercion for loosely typed JSON: numbers, numeric strings and floats
/// (truncated) are accepted.
pub fn coerce_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
                .and_then(|v| i32::try_from(v).ok())
        }
        _ => None,
    }
}

/// Reads `key` as a string. Numbers are stringified; blanks and placeholders are `None`.
pub fn json_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => clean_str(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present key among `keys`.
pub fn json_string_any(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| json_string(value, key))
}

fn owned(value: &Option<String>) -> Option<String> {
    clean(value.clone())
}

/// Canonical lead row carrying the request's customer and loan fields.
pub fn lead_row_from_request(
    environment: Environment,
    operation: LeadOperation,
    request: &LeadCreateRequest,
) -> LeadRow {
    let mut row = LeadRow::new(environment, operation);
    row.customer_first_name = owned(&request.first_name);
    row.customer_last_name = owned(&request.last_name);
    row.customer_mobile = owned(&request.mobile);
    row.customer_email = owned(&request.email);
    row.customer_pan = owned(&request.pan).map(|p| p.to_uppercase());
    row.customer_dob = request.date_of_birth.as_deref().and_then(parse_date);
    row.customer_gender = owned(&request.gender);
    row.customer_pincode = owned(&request.pincode);
    row.customer_city = owned(&request.city);
    row.customer_district = owned(&request.district);
    row.customer_state = owned(&request.state);
    row.loan_type = owned(&request.loan_type);
    row.loan_amount_req = request.loan_amount_req.and_then(decimal_from_f64);
    row.loan_tenure = request.loan_tenure.and_then(|t| i32::try_from(t).ok());
    row.annual_income = request.annual_income.and_then(decimal_from_f64);
    row.credit_score = request.credit_score.and_then(|c| i32::try_from(c).ok());
    row.original_request_data = serde_json::to_value(request).ok();
    row
}

/// Adds the flash-only profession and property fields.
pub fn apply_flash_fields(row: &mut LeadRow, request: &LeadFlashRequest) {
    row.profession_name = owned(&request.profession_name);
    row.company_name = owned(&request.company_name);
    row.property_type_id = owned(&request.property_type_id);
    row.property_value = request.property_value.and_then(decimal_from_f64);
    row.property_city = owned(&request.property_city);
    row.property_pincode = owned(&request.property_pincode);
    row.property_project_name = owned(&request.property_project_name);
    row.original_request_data = serde_json::to_value(request).ok();
}

/// Overlays values reported by the upstream `result` object: the primary borrower's
/// details, the application status and the credit-report score.
pub fn apply_upstream_result(row: &mut LeadRow, result: &Value) {
    if let Some(status) = json_string_any(result, &["applicationStatus", "latestStatus", "status"]) {
        row.application_status = Some(status);
    }

    if let Some(borrower) = result.get("primaryBorrower").filter(|b| b.is_object()) {
        let fields: [(&str, &mut Option<String>); 10] = [
            ("firstName", &mut row.customer_first_name),
            ("lastName", &mut row.customer_last_name),
            ("mobile", &mut row.customer_mobile),
            ("email", &mut row.customer_email),
            ("pan", &mut row.customer_pan),
            ("gender", &mut row.customer_gender),
            ("pincode", &mut row.customer_pincode),
            ("city", &mut row.customer_city),
            ("district", &mut row.customer_district),
            ("state", &mut row.customer_state),
        ];
        for (key, slot) in fields {
            if let Some(value) = json_string(borrower, key) {
                *slot = Some(value);
            }
        }
        if let Some(dob) = json_string(borrower, "dateOfBirth").as_deref().and_then(parse_date) {
            row.customer_dob = Some(dob);
        }
    }

    if let Some(score) = result
        .get("primaryBorrowerCreditReportDetails")
        .and_then(|d| d.get("creditScore"))
        .and_then(coerce_i32)
    {
        row.credit_score = Some(score);
    }

    if let Some(tenure) = result.get("loanTenure").and_then(coerce_i32) {
        row.loan_tenure = Some(tenure);
    }
}
