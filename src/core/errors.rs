use std::fmt;
use thiserror::Error;

/// Unified hardware wallet failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareErrorKind {
    /// No device connected, or device selection was cancelled.
    DeviceNotFound,
    /// The user refused the request on the device.
    UserRejected,
    /// Communication with the device failed.
    Transport,
    /// PIN or passphrase entry is required.
    DeviceLocked,
    /// The required on-device application is not open.
    AppNotOpen,
    /// Malformed derivation path.
    InvalidPath,
    /// Firmware or application lacks the capability.
    UnsupportedOperation,
    /// A caller-supplied deadline elapsed.
    ConnectionTimeout,
    /// Anything else; the vendor message is preserved.
    Unknown,
}

impl HardwareErrorKind {
    /// Default machine-readable code for this kind.
    pub fn default_code(&self) -> &'static str {
        match self {
            HardwareErrorKind::DeviceNotFound => "DEVICE_NOT_FOUND",
            HardwareErrorKind::UserRejected => "USER_REJECTED",
            HardwareErrorKind::Transport => "TRANSPORT_ERROR",
            HardwareErrorKind::DeviceLocked => "DEVICE_LOCKED",
            HardwareErrorKind::AppNotOpen => "APP_NOT_OPEN",
            HardwareErrorKind::InvalidPath => "INVALID_PATH",
            HardwareErrorKind::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            HardwareErrorKind::ConnectionTimeout => "CONNECTION_TIMEOUT",
            HardwareErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for HardwareErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardwareErrorKind::DeviceNotFound => "device not found",
            HardwareErrorKind::UserRejected => "user rejected",
            HardwareErrorKind::Transport => "transport error",
            HardwareErrorKind::DeviceLocked => "device locked",
            HardwareErrorKind::AppNotOpen => "app not open",
            HardwareErrorKind::InvalidPath => "invalid path",
            HardwareErrorKind::UnsupportedOperation => "unsupported operation",
            HardwareErrorKind::ConnectionTimeout => "connection timeout",
            HardwareErrorKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// What a caller should do after receiving a given error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Prompt the user to reconnect; never retried automatically.
    Reconnect,
    /// Terminal for this attempt; the same request may be issued again.
    RetryRequest,
    /// Retry once the user has unlocked the device or opened the app.
    RetryAfterUserAction,
    /// Possibly retried once.
    RetryOnce,
    /// Retry/backoff decided by the caller.
    CallerDefined,
    /// Do not retry; the input or capability must change.
    Fatal,
    /// Surface the vendor message as-is.
    Surface,
}

/// Error returned by every hardware operation.
///
/// Classification is data-driven: callers switch on [`HardwareError::kind`]
/// rather than on distinct error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HardwareError {
    kind: HardwareErrorKind,
    message: String,
    code: String,
}

impl HardwareError {
    /// Creates an error with the kind's default code.
    pub fn new(kind: HardwareErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: kind.default_code().to_string(),
        }
    }

    /// Creates an error carrying a vendor-specific code.
    pub fn with_code(
        kind: HardwareErrorKind,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn device_not_found(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::DeviceNotFound, message)
    }

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::UserRejected, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::Transport, message)
    }

    pub fn device_locked(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::DeviceLocked, message)
    }

    pub fn app_not_open(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::AppNotOpen, message)
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::InvalidPath, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::UnsupportedOperation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::ConnectionTimeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HardwareErrorKind::Unknown, message)
    }

    pub fn kind(&self) -> HardwareErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Recommended caller policy for this error.
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        match self.kind {
            HardwareErrorKind::DeviceNotFound => RecoveryPolicy::Reconnect,
            HardwareErrorKind::UserRejected => RecoveryPolicy::RetryRequest,
            HardwareErrorKind::DeviceLocked | HardwareErrorKind::AppNotOpen => {
                RecoveryPolicy::RetryAfterUserAction
            }
            HardwareErrorKind::Transport => RecoveryPolicy::RetryOnce,
            HardwareErrorKind::ConnectionTimeout => RecoveryPolicy::CallerDefined,
            HardwareErrorKind::InvalidPath | HardwareErrorKind::UnsupportedOperation => {
                RecoveryPolicy::Fatal
            }
            HardwareErrorKind::Unknown => RecoveryPolicy::Surface,
        }
    }

    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.recovery_policy(),
            RecoveryPolicy::RetryRequest
                | RecoveryPolicy::RetryAfterUserAction
                | RecoveryPolicy::RetryOnce
                | RecoveryPolicy::CallerDefined
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HardwareError>;

impl From<serde_json::Error> for HardwareError {
    fn from(err: serde_json::Error) -> Self {
        HardwareError::with_code(HardwareErrorKind::Unknown, err.to_string(), "INVALID_JSON")
    }
}

impl From<hex::FromHexError> for HardwareError {
    fn from(err: hex::FromHexError) -> Self {
        HardwareError::with_code(HardwareErrorKind::Unknown, err.to_string(), "INVALID_HEX")
    }
}

impl From<toml::de::Error> for HardwareError {
    fn from(err: toml::de::Error) -> Self {
        HardwareError::with_code(HardwareErrorKind::Unknown, err.to_string(), "INVALID_CONFIG")
    }
}
