use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Fresh TOTP material handed to the user during setup. Nothing is stored until
/// the user proves possession with a valid code.
#[derive(Clone, Debug)]
pub struct TotpEnrollment {
    pub secret: String,
    pub otpauth_url: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
}

#[derive(Clone, Debug)]
pub struct TotpService {
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    fn totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Generate a new secret with its provisioning URL and QR code.
    ///
    /// # Errors
    /// Returns an error if secret generation or QR rendering fails.
    pub fn enroll(&self, email: &str) -> Result<TotpEnrollment> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;
        let totp = self.totp(secret_bytes, email)?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR gen error: {e}"))?;

        Ok(TotpEnrollment {
            secret: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            qr_code: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Check `code` against the base32 `secret`, allowing one step of skew.
    ///
    /// # Errors
    /// Returns an error if the stored secret is not valid base32 or the system
    /// clock is before the epoch.
    pub fn verify(&self, secret_base32: &str, code: &str) -> Result<bool> {
        let code = code.trim();
        if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }
        let secret_bytes = decode_secret(secret_base32)?;
        // Account name does not affect the code.
        let totp = self.totp(secret_bytes, "verify")?;
        totp.check_current(code)
            .map_err(|e| anyhow!("System clock error: {e}"))
    }
}

fn decode_secret(secret_base32: &str) -> Result<Vec<u8>> {
    Secret::Encoded(secret_base32.trim().to_uppercase())
        .to_bytes()
        .map_err(|e| anyhow!("Invalid TOTP secret: {e}"))
}

#[cfg(test)]
pub(crate) fn current_code(secret_base32: &str) -> Result<String> {
    let totp = TotpService::new("test".to_string()).totp(decode_secret(secret_base32)?, "test")?;
    totp.generate_current()
        .map_err(|e| anyhow!("System clock error: {e}"))
}
