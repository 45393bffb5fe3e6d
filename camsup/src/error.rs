use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::recorder::RecordingError;
use crate::registry::RegistryError;
use crate::sink::SinkError;

#[derive(Debug)]
pub enum AppError {
    CameraNotFound(String),
    InvalidCamera(String),
    RecordingConflict(String),
    SessionNotFound(String),
    RecordingNotFound(String),
    BadRequest(String),
    /// Resource exhaustion, the host cannot start more encoders
    Unavailable(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn unavailable<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Unavailable(t.to_string())
    }

    pub fn registry(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => AppError::CameraNotFound(err.to_string()),
            RegistryError::Invalid(_) => AppError::InvalidCamera(err.to_string()),
            err => AppError::InternalServerError(err.into()),
        }
    }

    pub fn recording(err: RecordingError) -> Self {
        match err {
            RecordingError::Conflict(_) | RecordingError::Stopping(_) => {
                AppError::RecordingConflict(err.to_string())
            }
            RecordingError::UnknownSession(_) => AppError::SessionNotFound(err.to_string()),
            RecordingError::NoCameras => AppError::BadRequest(err.to_string()),
            RecordingError::Interrupted(_) => AppError::InternalServerError(err.into()),
        }
    }

    pub fn sink(err: SinkError) -> Self {
        match err {
            SinkError::NotFound(_) => AppError::RecordingNotFound(err.to_string()),
            SinkError::InvalidName(_) => AppError::BadRequest(err.to_string()),
            err => AppError::InternalServerError(err.into()),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::CameraNotFound(_)
            | AppError::SessionNotFound(_)
            | AppError::RecordingNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidCamera(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RecordingConflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::CameraNotFound(err)
            | AppError::InvalidCamera(err)
            | AppError::RecordingConflict(err)
            | AppError::SessionNotFound(err)
            | AppError::RecordingNotFound(err)
            | AppError::BadRequest(err)
            | AppError::Unavailable(err) => err,
            AppError::InternalServerError(err) => err.to_string(),
        };
        (status, Json(api::response::Error::new(message))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                AppError::registry(RegistryError::NotFound("cam1".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::registry(RegistryError::Invalid("fps".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::recording(RecordingError::Conflict("ab12cd34".into())),
                StatusCode::CONFLICT,
            ),
            (
                AppError::recording(RecordingError::UnknownSession("x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::sink(SinkError::InvalidName("../a".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::recording(RecordingError::Interrupted("panicked".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::unavailable("EAGAIN"), StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::from(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
