use serde::{Deserialize, Serialize};

/// TTL (seconds) of a captcha session from its last `created_at` reset.
pub const CAPTCHA_SESSION_TTL_SECS: i64 = 300;
/// Length of the alphanumeric captcha text rendered into the image.
pub const CAPTCHA_TEXT_LEN: usize = 6;

/// States of the registration captcha state machine (SPEC_FULL.md §4.10).
/// `Expired` is a logical state derived from the TTL, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaState {
    Fresh,
    Verified,
    Completed,
}

impl CaptchaState {
    #[must_use]
    pub fn can_verify(self) -> bool {
        matches!(self, Self::Fresh)
    }

    #[must_use]
    pub fn can_complete(self) -> bool {
        matches!(self, Self::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::CaptchaState;

    #[test]
    fn only_fresh_accepts_a_captcha_answer() {
        assert!(CaptchaState::Fresh.can_verify());
        assert!(!CaptchaState::Verified.can_verify());
        assert!(!CaptchaState::Completed.can_verify());
    }

    #[test]
    fn only_verified_can_complete_registration() {
        assert!(CaptchaState::Verified.can_complete());
        assert!(!CaptchaState::Fresh.can_complete());
    }
}
