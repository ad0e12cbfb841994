//! Classification of heterogeneous provider and storage failures into a
//! closed set of kinds that drive remediation text and recovery paths.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigMissing,
    PermissionDenied,
    ApiNotEnabled,
    RedirectUriMismatch,
    QuotaExceeded,
    InvalidCredentials,
    NetworkUnavailable,
    StorageWriteFailure,
    InvalidBackupFormat,
    /// A provider failure matching none of the known shapes.
    Unclassified,
}

impl ErrorKind {
    fn remediation(&self, origin: Option<&str>) -> String {
        match self {
            ErrorKind::ConfigMissing => {
                "Set google.client_id and google.client_secret in the config file to enable cloud sync. Local data is unaffected.".to_string()
            }
            ErrorKind::PermissionDenied => {
                "Sign in again and grant access to the application data folder when prompted.".to_string()
            }
            ErrorKind::ApiNotEnabled => {
                "Enable the Google Drive API for this OAuth client's Cloud project, then retry.".to_string()
            }
            ErrorKind::RedirectUriMismatch => format!(
                "Add {} to the authorized redirect URIs of the OAuth client.",
                origin.unwrap_or("this client's redirect URI")
            ),
            ErrorKind::QuotaExceeded => {
                "Free up Google Drive storage. Local data is unaffected and will sync once space is available.".to_string()
            }
            ErrorKind::InvalidCredentials => {
                "Check google.client_id and google.client_secret in the config file.".to_string()
            }
            ErrorKind::NetworkUnavailable => {
                "Cloud sync is paused. Check your connection and sign in again to resume.".to_string()
            }
            ErrorKind::StorageWriteFailure => {
                "Local storage rejected the write. Free disk space or check permissions before closing the app.".to_string()
            }
            ErrorKind::InvalidBackupFormat => {
                "The file is not a backup produced by this application.".to_string()
            }
            ErrorKind::Unclassified => "Retry the operation.".to_string(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::ConfigMissing => "Cloud sync is not configured",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::ApiNotEnabled => "Google Drive API is not enabled",
            ErrorKind::RedirectUriMismatch => "Redirect URI mismatch",
            ErrorKind::QuotaExceeded => "Storage quota exceeded",
            ErrorKind::InvalidCredentials => "Invalid client credentials",
            ErrorKind::NetworkUnavailable => "Network unavailable",
            ErrorKind::StorageWriteFailure => "Local storage write failed",
            ErrorKind::InvalidBackupFormat => "Invalid backup format",
            ErrorKind::Unclassified => "Cloud request failed",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {detail}")]
pub struct CloudError {
    pub kind: ErrorKind,
    pub detail: String,
    pub remediation: String,
}

impl CloudError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            remediation: kind.remediation(None),
        }
    }
}

/// The fields that matter for classification, pulled out of whatever shape
/// the provider returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderError {
    pub http_status: Option<u16>,
    pub status: Option<String>,
    pub reasons: Vec<String>,
    pub message: Option<String>,
    /// Timeout or connection failure; no response was received.
    pub transport: bool,
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            transport: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn http(status: u16, body: &str) -> Self {
        let mut error = serde_json::from_str::<Value>(body)
            .map(|v| Self::from_json(&v))
            .unwrap_or_default();
        error.http_status = error.http_status.or(Some(status));
        if error.message.is_none() && !body.trim().is_empty() {
            error.message = Some(body.trim().to_string());
        }
        error
    }

    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return Self::transport(e.to_string());
        }
        Self {
            http_status: e.status().map(|s| s.as_u16()),
            message: Some(e.to_string()),
            ..Default::default()
        }
    }

    /// Accepts the Google JSON error envelope (`{"error": {...}}`), the
    /// JavaScript client's `{"result": {"error": ...}}` wrapper, OAuth
    /// errors (`{"error": "invalid_client"}`) and flat objects.
    pub fn from_json(value: &Value) -> Self {
        let value = value.get("result").unwrap_or(value);
        let mut error = Self::default();

        match value.get("error") {
            Some(inner @ Value::Object(_)) => error.absorb(inner),
            Some(Value::String(code)) => {
                error.reasons.push(code.clone());
                error.message = value
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            _ => {}
        }
        error.absorb(value);
        error
    }

    fn absorb(&mut self, value: &Value) {
        if self.http_status.is_none() {
            self.http_status = value
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok());
        }
        if self.status.is_none() {
            self.status = value
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        if self.message.is_none() {
            self.message = ["message", "details"]
                .iter()
                .find_map(|k| value.get(*k).and_then(Value::as_str))
                .map(str::to_string);
        }
        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            self.reasons.push(kind.to_string());
        }
        for list in ["errors", "details"] {
            let Some(items) = value.get(list).and_then(Value::as_array) else {
                continue;
            };
            self.reasons.extend(
                items
                    .iter()
                    .filter_map(|item| item.get("reason").and_then(Value::as_str))
                    .map(str::to_string),
            );
        }
    }

    /// An error object carrying no detail at all. The provider produces these
    /// when authorization was aborted or granted with too few scopes.
    pub fn is_empty(&self) -> bool {
        !self.transport
            && self.http_status.is_none()
            && self.status.is_none()
            && self.reasons.is_empty()
            && self.message.as_deref().is_none_or(|m| m.trim().is_empty())
    }

    fn haystack(&self) -> String {
        let mut parts: Vec<&str> = self.reasons.iter().map(String::as_str).collect();
        parts.extend(self.status.as_deref());
        parts.extend(self.message.as_deref());
        parts.join(" ").to_lowercase()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    origin: Option<String>,
}

impl ErrorClassifier {
    /// `origin` is the redirect URI this client registers with the provider;
    /// it is quoted back in redirect mismatch remediation.
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
        }
    }

    pub fn kind_of(&self, error: &ProviderError) -> ErrorKind {
        if error.transport {
            return ErrorKind::NetworkUnavailable;
        }
        if error.is_empty() {
            return ErrorKind::PermissionDenied;
        }

        let text = error.haystack();
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if has(&["redirect_uri_mismatch", "redirect uri mismatch"]) {
            return ErrorKind::RedirectUriMismatch;
        }
        if has(&[
            "accessnotconfigured",
            "service_disabled",
            "has not been used in project",
            "api has not been enabled",
        ]) {
            return ErrorKind::ApiNotEnabled;
        }
        if has(&["storagequotaexceeded", "quotaexceeded", "resource_exhausted"]) {
            return ErrorKind::QuotaExceeded;
        }
        if has(&[
            "invalid_client",
            "unauthorized_client",
            "api_key_invalid",
            "keyinvalid",
            "invalid client",
        ]) {
            return ErrorKind::InvalidCredentials;
        }
        if has(&[
            "permission_denied",
            "insufficientpermissions",
            "access_denied",
            "popup_closed",
            "unauthenticated",
            "invalid_grant",
        ]) || matches!(error.http_status, Some(401 | 403))
        {
            return ErrorKind::PermissionDenied;
        }
        if has(&["unavailable", "deadline_exceeded", "backenderror"])
            || error.http_status.is_some_and(|s| s >= 500)
        {
            return ErrorKind::NetworkUnavailable;
        }

        ErrorKind::Unclassified
    }

    pub fn classify(&self, error: &ProviderError) -> CloudError {
        let kind = self.kind_of(error);
        let detail = error
            .message
            .clone()
            .or_else(|| error.status.clone())
            .or_else(|| error.reasons.first().cloned())
            .unwrap_or_else(|| "no detail provided".to_string());

        CloudError {
            kind,
            detail,
            remediation: kind.remediation(self.origin.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind(value: Value) -> ErrorKind {
        ErrorClassifier::default().kind_of(&ProviderError::from_json(&value))
    }

    #[test]
    fn test_status_permission_denied() {
        assert_eq!(
            kind(json!({"status": "PERMISSION_DENIED"})),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_empty_error_means_permission_denied() {
        assert_eq!(kind(json!({})), ErrorKind::PermissionDenied);
        assert_eq!(kind(json!({"message": ""})), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_quota_wins_over_forbidden_status() {
        let body = json!({
            "error": {
                "code": 403,
                "status": "PERMISSION_DENIED",
                "message": "The user's Drive storage quota has been exceeded.",
                "errors": [{"domain": "usageLimits", "reason": "storageQuotaExceeded"}]
            }
        });
        assert_eq!(kind(body), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_api_not_enabled() {
        let body = json!({
            "result": {
                "error": {
                    "code": 403,
                    "message": "Google Drive API has not been used in project 1234 before or it is disabled.",
                    "errors": [{"reason": "accessNotConfigured"}]
                }
            }
        });
        assert_eq!(kind(body), ErrorKind::ApiNotEnabled);
    }

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(
            kind(json!({"error": "redirect_uri_mismatch"})),
            ErrorKind::RedirectUriMismatch
        );
        assert_eq!(
            kind(json!({"error": "invalid_client", "error_description": "The OAuth client was not found."})),
            ErrorKind::InvalidCredentials
        );
        assert_eq!(
            kind(json!({"error": "access_denied"})),
            ErrorKind::PermissionDenied
        );
        assert_eq!(kind(json!({"type": "popup_closed"})), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_server_errors_are_transient() {
        let error = ProviderError::http(503, "Service Unavailable");
        assert_eq!(
            ErrorClassifier::default().kind_of(&error),
            ErrorKind::NetworkUnavailable
        );
        assert_eq!(
            ErrorClassifier::default().kind_of(&ProviderError::transport("timed out")),
            ErrorKind::NetworkUnavailable
        );
    }

    #[test]
    fn test_unknown_error_is_unclassified() {
        let error = ProviderError::http(404, r#"{"error": {"code": 404, "message": "File not found: abc."}}"#);
        let classified = ErrorClassifier::default().classify(&error);
        assert_eq!(classified.kind, ErrorKind::Unclassified);
        assert_eq!(classified.detail, "File not found: abc.");
    }

    #[test]
    fn test_redirect_remediation_names_origin() {
        let classifier = ErrorClassifier::with_origin("http://127.0.0.1:8085/callback");
        let error = classifier.classify(&ProviderError::from_json(
            &json!({"error": "redirect_uri_mismatch"}),
        ));
        assert!(error.remediation.contains("http://127.0.0.1:8085/callback"));
    }
}
