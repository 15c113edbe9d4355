//! Account flows that sit beside the session slice.

pub mod otp;

use serde_json::json;
use tracing::info;

use crate::api::ResourceName;
use crate::error::CacheError;
use crate::store::GlobalStore;

pub use otp::{OtpCountdown, OtpPhase, DEFAULT_OTP_WINDOW};

/// Ask the server for a new OTP unless the countdown is still running.
///
/// Returns whether a code was requested.
pub async fn resend_otp(
  store: &GlobalStore,
  countdown: &OtpCountdown,
  email: &str,
) -> Result<bool, CacheError> {
  if !countdown.can_resend() {
    return Ok(false);
  }
  store
    .mutate(ResourceName::Auth, "resendOtp", json!({"email": email}))
    .await?;
  countdown.start(DEFAULT_OTP_WINDOW);
  info!("OTP resent");
  Ok(true)
}
