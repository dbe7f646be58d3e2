//! Check-in credential issuance (QR tokens and OTPs)

use uuid::Uuid;

/// Shortest and longest OTP the issuer will produce
pub const MIN_OTP_DIGITS: u32 = 4;
pub const MAX_OTP_DIGITS: u32 = 9;

/// Issues fresh check-in credentials for visitors registered without them
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    otp_digits: u32,
    max_attempts: u32,
}

impl Default for CredentialIssuer {
    fn default() -> Self {
        Self { otp_digits: MIN_OTP_DIGITS, max_attempts: 32 }
    }
}

impl CredentialIssuer {
    pub fn new(otp_digits: u32, max_attempts: u32) -> Self {
        Self {
            otp_digits: otp_digits.clamp(MIN_OTP_DIGITS, MAX_OTP_DIGITS),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn otp_digits(&self) -> u32 {
        self.otp_digits
    }

    /// How many times the directory may re-issue after a collision
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// QR tokens are UUIDv7 strings (time-sortable, opaque to scanners)
    pub fn issue_qr_token(&self) -> String {
        Uuid::now_v7().to_string()
    }

    /// Numeric OTP of `otp_digits` digits; the leading digit is never zero
    pub fn issue_otp(&self) -> String {
        let low = 10u64.pow(self.otp_digits - 1);
        let span = 9 * low;
        let random = Uuid::new_v4().as_u128();
        let code = low + (random % u128::from(span)) as u64;
        code.to_string()
    }
}
