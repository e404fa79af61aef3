use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Account emails are stored trimmed; case is kept as given.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_string()
}

pub fn check_password(password: &str, problems: &mut Vec<String>) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
}

pub fn check_email(email: &str, problems: &mut Vec<String>) {
    if !is_valid_email(email) {
        problems.push("email must be a valid email address".into());
    }
}
