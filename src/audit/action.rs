//! Audit Action Taxonomy
//!
//! Fixed vocabulary of auditable actions and the severity class
//! each one is displayed under. Severity is derived, never stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Auditable action kinds
///
/// Records written by newer producers may carry actions this build does
/// not know about; those deserialize into [`AuditAction::Unknown`] so old
/// viewers can still read and verify them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    Login,
    Logout,
    Registration,
    PasswordChange,
    EmailVerification,
    TwoFactorEnable,
    TwoFactorDisable,
    TwoFactorVerify,
    TwoFactorVerifyFailed,
    PermissionGranted,
    PermissionDenied,
    SubscriptionChange,
    DataExport,
    DataDeletion,
    PhiAccess,
    AiQuery,
    ClinicalDataAccess,
    SecurityEvent,
    ProfileUpdate,
    EmergencyAccessSuccess,
    EmergencyAccessFailed,
    Unknown(String),
}

impl AuditAction {
    /// Every action in the taxonomy, in declaration order
    pub const KNOWN: [AuditAction; 21] = [
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::Registration,
        AuditAction::PasswordChange,
        AuditAction::EmailVerification,
        AuditAction::TwoFactorEnable,
        AuditAction::TwoFactorDisable,
        AuditAction::TwoFactorVerify,
        AuditAction::TwoFactorVerifyFailed,
        AuditAction::PermissionGranted,
        AuditAction::PermissionDenied,
        AuditAction::SubscriptionChange,
        AuditAction::DataExport,
        AuditAction::DataDeletion,
        AuditAction::PhiAccess,
        AuditAction::AiQuery,
        AuditAction::ClinicalDataAccess,
        AuditAction::SecurityEvent,
        AuditAction::ProfileUpdate,
        AuditAction::EmergencyAccessSuccess,
        AuditAction::EmergencyAccessFailed,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Registration => "registration",
            Self::PasswordChange => "password_change",
            Self::EmailVerification => "email_verification",
            Self::TwoFactorEnable => "two_factor_enable",
            Self::TwoFactorDisable => "two_factor_disable",
            Self::TwoFactorVerify => "two_factor_verify",
            Self::TwoFactorVerifyFailed => "two_factor_verify_failed",
            Self::PermissionGranted => "permission_granted",
            Self::PermissionDenied => "permission_denied",
            Self::SubscriptionChange => "subscription_change",
            Self::DataExport => "data_export",
            Self::DataDeletion => "data_deletion",
            Self::PhiAccess => "phi_access",
            Self::AiQuery => "ai_query",
            Self::ClinicalDataAccess => "clinical_data_access",
            Self::SecurityEvent => "security_event",
            Self::ProfileUpdate => "profile_update",
            Self::EmergencyAccessSuccess => "emergency_access_success",
            Self::EmergencyAccessFailed => "emergency_access_failed",
            Self::Unknown(name) => name,
        }
    }

    /// Whether this action is part of the taxonomy this build knows
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Severity class used by viewers to group and highlight records
    pub fn severity(&self) -> SeverityClass {
        classify(self)
    }
}

/// Map an action to its severity class.
///
/// Total: unknown actions fall back to [`SeverityClass::Admin`].
pub fn classify(action: &AuditAction) -> SeverityClass {
    use AuditAction::*;

    match action {
        SecurityEvent | DataDeletion | EmergencyAccessSuccess | EmergencyAccessFailed => {
            SeverityClass::Critical
        }
        PermissionDenied | DataExport => SeverityClass::Warning,
        Login | Logout | Registration | PasswordChange | EmailVerification => SeverityClass::Auth,
        TwoFactorEnable | TwoFactorDisable | TwoFactorVerify | TwoFactorVerifyFailed => {
            SeverityClass::TwoFa
        }
        PhiAccess | ClinicalDataAccess | AiQuery => SeverityClass::Clinical,
        PermissionGranted | SubscriptionChange | ProfileUpdate | Unknown(_) => {
            SeverityClass::Admin
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AuditAction {
    fn from(value: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|action| action.as_str() == value)
            .cloned()
            .unwrap_or_else(|| Self::Unknown(value.to_string()))
    }
}

impl From<String> for AuditAction {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        action.as_str().to_string()
    }
}

/// Display severity of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityClass {
    Critical,
    Warning,
    Auth,
    TwoFa,
    Clinical,
    Admin,
}

impl SeverityClass {
    pub const ALL: [SeverityClass; 6] = [
        SeverityClass::Critical,
        SeverityClass::Warning,
        SeverityClass::Auth,
        SeverityClass::TwoFa,
        SeverityClass::Clinical,
        SeverityClass::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Auth => "auth",
            Self::TwoFa => "twofa",
            Self::Clinical => "clinical",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for SeverityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeverityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|class| class.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown severity class '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_action_round_trips_its_name() {
        for action in AuditAction::KNOWN.iter() {
            let parsed = AuditAction::from(action.as_str());
            assert_eq!(&parsed, action);
            assert!(parsed.is_known());
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&AuditAction::SecurityEvent), SeverityClass::Critical);
        assert_eq!(classify(&AuditAction::EmergencyAccessFailed), SeverityClass::Critical);
        assert_eq!(classify(&AuditAction::PermissionDenied), SeverityClass::Warning);
        assert_eq!(classify(&AuditAction::Login), SeverityClass::Auth);
        assert_eq!(classify(&AuditAction::TwoFactorVerifyFailed), SeverityClass::TwoFa);
        assert_eq!(classify(&AuditAction::PhiAccess), SeverityClass::Clinical);
        assert_eq!(classify(&AuditAction::ProfileUpdate), SeverityClass::Admin);
    }

    #[test]
    fn test_unknown_action_is_admin() {
        let action = AuditAction::from("quantum_teleport");
        assert!(!action.is_known());
        assert_eq!(action.as_str(), "quantum_teleport");
        assert_eq!(action.severity(), SeverityClass::Admin);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&AuditAction::TwoFactorVerifyFailed).unwrap();
        assert_eq!(json, "\"two_factor_verify_failed\"");

        let parsed: AuditAction = serde_json::from_str("\"future_action\"").unwrap();
        assert_eq!(parsed, AuditAction::Unknown("future_action".to_string()));

        let severity = serde_json::to_string(&SeverityClass::TwoFa).unwrap();
        assert_eq!(severity, "\"twofa\"");
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("clinical".parse::<SeverityClass>(), Ok(SeverityClass::Clinical));
        assert!("loud".parse::<SeverityClass>().is_err());
    }
}
