use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FavoritesErrorCode {
    Persistence,
    RemoteUnavailable,
    PermissionDenied,
}

impl FavoritesErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FavoritesErrorCode::Persistence => "favorites/persistence",
            FavoritesErrorCode::RemoteUnavailable => "favorites/remote-unavailable",
            FavoritesErrorCode::PermissionDenied => "favorites/permission-denied",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FavoritesError {
    pub code: FavoritesErrorCode,
    message: String,
}

impl FavoritesError {
    pub fn new(code: FavoritesErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for FavoritesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for FavoritesError {}

pub type FavoritesResult<T> = Result<T, FavoritesError>;

pub fn persistence(message: impl Into<String>) -> FavoritesError {
    FavoritesError::new(FavoritesErrorCode::Persistence, message)
}

pub fn remote_unavailable(message: impl Into<String>) -> FavoritesError {
    FavoritesError::new(FavoritesErrorCode::RemoteUnavailable, message)
}

pub fn permission_denied(message: impl Into<String>) -> FavoritesError {
    FavoritesError::new(FavoritesErrorCode::PermissionDenied, message)
}
