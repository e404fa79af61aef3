//! Single-use secrets for the verification and reset flows.

use rand::{distributions::Alphanumeric, Rng};
use time::Duration;
use uuid::Uuid;

pub const RESET_CODE_LEN: usize = 12;
pub const RESET_CODE_TTL: Duration = Duration::hours(1);

pub fn verification_token() -> String {
    Uuid::new_v4().to_string()
}

pub fn reset_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_CODE_LEN)
        .map(char::from)
        .collect()
}
