//! Google reCAPTCHA v3 siteverify client (§4.3/§6): a thin `reqwest` POST,
//! named but never wire-specified by the distilled spec.

use crate::error::ApiError;
use serde::Deserialize;

const SITEVERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const MINIMUM_SCORE: f64 = 0.5;

#[derive(Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default)]
    score: f64,
}

#[derive(Clone)]
pub struct RecaptchaClient {
    secret: String,
    http: reqwest::Client,
}

impl RecaptchaClient {
    /// Returns `None` when `secret` is empty, per §6: an empty secret disables
    /// human verification entirely.
    pub fn new(secret: &str) -> Option<Self> {
        if secret.is_empty() {
            return None;
        }
        Some(Self {
            secret: secret.to_string(),
            http: reqwest::Client::new(),
        })
    }

    /// Verifies `token`, rejecting with [`ApiError::CaptchaFailed`] on a
    /// negative `success` flag or a score under [`MINIMUM_SCORE`].
    pub async fn verify(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(SITEVERIFY_URL)
            .form(&[("secret", self.secret.as_str()), ("response", token)])
            .send()
            .await
            .map_err(|_| ApiError::CaptchaFailed)?
            .json::<SiteverifyResponse>()
            .await
            .map_err(|_| ApiError::CaptchaFailed)?;

        if !response.success || response.score < MINIMUM_SCORE {
            return Err(ApiError::CaptchaFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_secret_disables_verification() {
        assert!(RecaptchaClient::new("").is_none());
    }

    #[test]
    fn non_empty_secret_builds_a_client() {
        assert!(RecaptchaClient::new("test-secret").is_some());
    }
}
