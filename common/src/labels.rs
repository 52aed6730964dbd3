//! Label key constants and the small state machine they encode on a claim.
//!
//! See DESIGN.md for the legal label combinations. This module only knows how
//! to read/write the labels themselves; the rules about which combinations are
//! legal live in `crate::resource_store` and the gateway's `assignment` module,
//! which are the only code paths allowed to mutate them.

use std::collections::BTreeMap;

/// Value of [`LABEL_AUTH`] once the authenticator has sealed a claim.
pub const AUTH_DONE: &str = "done";

pub const LABEL_AUTH: &str = "auth";
pub const LABEL_PHONE: &str = "phone";
pub const LABEL_FINGERPRINT: &str = "fp";

/// Read-only view over a claim's coordination labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimLabels {
    pub auth_done: bool,
    pub phone: Option<String>,
    pub fingerprint: Option<String>,
}

impl ClaimLabels {
    pub fn from_map(labels: &BTreeMap<String, String>) -> Self {
        Self {
            auth_done: labels.get(LABEL_AUTH).map(String::as_str) == Some(AUTH_DONE),
            phone: labels.get(LABEL_PHONE).filter(|p| !p.is_empty()).cloned(),
            fingerprint: labels
                .get(LABEL_FINGERPRINT)
                .filter(|f| !f.is_empty())
                .cloned(),
        }
    }

    /// A claim is "available" when it is sealed and has no assigned phone.
    pub fn available(&self) -> bool {
        self.auth_done && self.phone.is_none()
    }

    /// A claim is "ready" when it is sealed, assigned or not.
    pub fn ready(&self) -> bool {
        self.auth_done
    }
}
