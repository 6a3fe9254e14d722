//! Field-format validators and the per-environment lead validation profiles.

use crate::errors::AppError;
use crate::models::{Environment, LeadCreateRequest};
use crate::normalizer::parse_date;
use regex::Regex;
use std::sync::OnceLock;

static PAN: OnceLock<Option<Regex>> = OnceLock::new();
static MOBILE: OnceLock<Option<Regex>> = OnceLock::new();
static PINCODE: OnceLock<Option<Regex>> = OnceLock::new();
static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
static NAME: OnceLock<Option<Regex>> = OnceLock::new();
static E164_IN: OnceLock<Option<Regex>> = OnceLock::new();

const PAN_PATTERN: &str = r"^[A-Z]{5}[0-9]{4}[A-Z]$";
const MOBILE_PATTERN: &str = r"^[0-9]{10}$";
const PINCODE_PATTERN: &str = r"^[0-9]{6}$";
const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$";
const NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z .'-]{0,49}$";
const E164_IN_PATTERN: &str = r"^\+91[1-9]\d{9,11}$";

fn is_match(cell: &'static OnceLock<Option<Regex>>, pattern: &str, value: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

pub fn is_valid_pan(pan: &str) -> bool {
    is_match(&PAN, PAN_PATTERN, pan)
}

pub fn is_valid_mobile(mobile: &str) -> bool {
    is_match(&MOBILE, MOBILE_PATTERN, mobile)
}

pub fn is_valid_pincode(pincode: &str) -> bool {
    is_match(&PINCODE, PINCODE_PATTERN, pincode)
}

pub fn is_valid_email(email: &str) -> bool {
    is_match(&EMAIL, EMAIL_PATTERN, email)
}

pub fn is_valid_name(name: &str) -> bool {
    is_match(&NAME, NAME_PATTERN, name.trim())
}

pub fn is_valid_gender(gender: &str) -> bool {
    matches!(
        gender.trim().to_lowercase().as_str(),
        "male" | "female" | "other" | "transgender"
    )
}

pub fn is_valid_credit_score(score: i64) -> bool {
    (0..=1000).contains(&score)
}

/// Maps a loan-type alias to the upstream code.
///
/// Matching ignores case and treats `_` like a space, so `home_loan`, `Home Loan`
/// and `HOME LOAN` are the same alias.
pub fn loan_type_code(loan_type: &str) -> Option<&'static str> {
    let key = loan_type.trim().to_lowercase().replace('_', " ");
    let code = match key.as_str() {
        "home loan" | "hl" => "HL",
        "loan against property" | "lap" => "LAP",
        "personal loan" => "PL",
        "business loan" => "BL",
        "car loan" => "CL",
        "education loan" => "EL",
        _ => return None,
    };
    Some(code)
}

/// Normalizes an Indian phone number to `+91XXXXXXXXXX`.
pub fn normalize_phone_number(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    match cleaned.len() {
        10 | 9 | 8 => format!("+91{}", cleaned),
        12 if cleaned.starts_with("91") => format!("+{}", cleaned),
        11 if cleaned.starts_with('0') => format!("+91{}", &cleaned[1..]),
        _ => format!("+91{}", cleaned.trim_start_matches('0')),
    }
}

/// True when the number normalizes to a plausible Indian mobile number.
pub fn is_valid_phone(raw: &str) -> bool {
    is_match(&E164_IN, E164_IN_PATTERN, &normalize_phone_number(raw))
}

/// A request that passed its environment's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedLead {
    pub environment: Environment,
    /// Upstream loan-type code.
    pub loan_type_code: &'static str,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::Validation(message.to_string())),
    }
}

fn check(ok: bool, message: &str) -> Result<(), AppError> {
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(message.to_string()))
    }
}

/// Validates a lead request against the profile of its `environment`.
///
/// The environment itself is checked first; the first failing field wins.
pub fn validate_lead(request: &LeadCreateRequest) -> Result<ValidatedLead, AppError> {
    let environment = Environment::from_request(request.environment.as_deref())?;

    let loan_type = required(&request.loan_type, "Loan type is required")?;
    let loan_type_code = loan_type_code(loan_type).ok_or_else(|| {
        AppError::Validation(format!(
            "Invalid loan type '{}'. Must be one of: home_loan, loan_against_property, personal_loan, business_loan, car_loan, education_loan",
            loan_type
        ))
    })?;

    let amount = request
        .loan_amount_req
        .ok_or_else(|| AppError::Validation("Loan amount is required".to_string()))?;
    check(amount > 0.0, "Loan amount must be greater than 0")?;

    let first_name = required(&request.first_name, "First name is required")?;
    check(
        is_valid_name(first_name),
        "First name must contain only letters, spaces, dots, apostrophes or hyphens (max 50 characters)",
    )?;
    let last_name = required(&request.last_name, "Last name is required")?;
    check(
        is_valid_name(last_name),
        "Last name must contain only letters, spaces, dots, apostrophes or hyphens (max 50 characters)",
    )?;

    let mobile = required(&request.mobile, "Mobile number is required")?;
    check(is_valid_mobile(mobile), "Mobile number must be exactly 10 digits")?;

    let pincode = required(&request.pincode, "Pincode is required")?;
    check(is_valid_pincode(pincode), "Pincode must be exactly 6 digits")?;

    let email = required(&request.email, "Email is required")?;
    check(is_valid_email(email), "Invalid email format")?;

    if environment == Environment::Orbit {
        let tenure = request
            .loan_tenure
            .ok_or_else(|| AppError::Validation("Loan tenure is required".to_string()))?;
        check(tenure > 0, "Loan tenure must be greater than 0")?;

        let pan = required(&request.pan, "PAN number is required")?;
        check(is_valid_pan(pan), "PAN number must be in format: ABCDE1234F")?;

        let score = request
            .credit_score
            .ok_or_else(|| AppError::Validation("Credit score is required".to_string()))?;
        check(
            is_valid_credit_score(score),
            "Credit score must be between 0 and 1000",
        )?;

        let dob = required(&request.date_of_birth, "Date of birth is required")?;
        check(
            parse_date(dob).is_some(),
            "Date of birth must be a valid date (DD/MM/YYYY or YYYY-MM-DD)",
        )?;

        if let Some(gender) = request.gender.as_deref().filter(|g| !g.trim().is_empty()) {
            check(
                is_valid_gender(gender),
                "Gender must be one of: male, female, other",
            )?;
        }
    }

    Ok(ValidatedLead {
        environment,
        loan_type_code,
    })
}
