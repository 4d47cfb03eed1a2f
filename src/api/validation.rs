//! Input validation for API requests.
//!
//! Every entity gets an explicit validation pass producing field-level errors
//! before anything touches the database. For collecting multiple errors and
//! returning them as an ApiError, use the `ValidationErrorBuilder` from the
//! `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{CATEGORIES, STATUSES};

lazy_static! {
    /// Loose email shape check; deliverability is proven by the verification mail
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// Indian-style PIN codes: six digits, not starting with zero
    static ref PINCODE_REGEX: Regex = Regex::new(
        r"^[1-9][0-9]{5}$"
    ).unwrap();

    /// Phone numbers: digits with optional leading +, 7-15 digits
    static ref MOBILE_REGEX: Regex = Regex::new(
        r"^\+?[0-9]{7,15}$"
    ).unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Please enter a valid email address".to_string());
    }

    Ok(())
}

/// Validate a password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() < 6 {
        return Err("Password must be at least 6 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    Ok(())
}

/// Validate a person's display name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name is required".to_string());
    }

    if name.len() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }

    Ok(())
}

/// Validate an issue title
pub fn validate_title(title: &str) -> Result<(), String> {
    if title.is_empty() {
        return Err("Please enter issue title".to_string());
    }

    if title.len() > 100 {
        return Err("Title can't exceed 100 characters".to_string());
    }

    Ok(())
}

/// Validate an issue description
pub fn validate_description(description: &str) -> Result<(), String> {
    if description.is_empty() {
        return Err("Please enter issue description".to_string());
    }

    if description.len() > 1000 {
        return Err("Description can't exceed 1000 characters".to_string());
    }

    Ok(())
}

pub fn validate_location(location: &str) -> Result<(), String> {
    if location.is_empty() {
        return Err("Please provide issue location".to_string());
    }

    if location.len() > 255 {
        return Err("Location is too long (max 255 characters)".to_string());
    }

    Ok(())
}

pub fn validate_pincode(pincode: &str) -> Result<(), String> {
    if pincode.is_empty() {
        return Err("Please provide a pincode".to_string());
    }

    if !PINCODE_REGEX.is_match(pincode) {
        return Err("Pincode must be a valid 6-digit code".to_string());
    }

    Ok(())
}

pub fn validate_category(category: &str) -> Result<(), String> {
    if !CATEGORIES.contains(&category) {
        return Err(format!(
            "Invalid category. Must be one of: {}",
            CATEGORIES.join(", ")
        ));
    }
    Ok(())
}

pub fn validate_status(status: &str) -> Result<(), String> {
    if !STATUSES.contains(&status) {
        return Err(format!(
            "Invalid status. Must be one of: {}",
            STATUSES.join(", ")
        ));
    }
    Ok(())
}

pub fn validate_severity(severity: i64) -> Result<(), String> {
    if !(1..=5).contains(&severity) {
        return Err("Severity must be between 1 and 5".to_string());
    }
    Ok(())
}

pub fn validate_mobile(mobile: &str) -> Result<(), String> {
    if mobile.is_empty() {
        return Err("Reporter mobile is required".to_string());
    }

    if !MOBILE_REGEX.is_match(mobile) {
        return Err("Invalid mobile number format".to_string());
    }

    Ok(())
}
