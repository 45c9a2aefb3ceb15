use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use brewlink_protocol::{DeviceFamily, ErrorBody, ErrorCode, ProtocolError, ReplyBody};
use libbrewlink::BrewError;

/// HTTP status for each wire error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::RecipeUnavailable => StatusCode::BAD_GATEWAY,
    }
}

/// A `BrewError` answered as JSON on operator routes.
#[derive(Debug)]
pub struct ApiError(pub BrewError);

impl From<BrewError> for ApiError {
    fn from(err: BrewError) -> Self {
        Self(err)
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.0.to_body();
        let status = status_for(body.code);
        with_retry_after(&body, (status, Json(body.clone())).into_response())
    }
}

/// Render a device-route error in the family's own wire shape.
pub fn device_error(family: DeviceFamily, err: &BrewError) -> Response {
    let body = err.to_body();
    let status = status_for(body.code);
    with_retry_after(&body, reply_response(status, family.render_error(&body)))
}

pub fn reply_response(status: StatusCode, body: ReplyBody) -> Response {
    match body {
        ReplyBody::Text(text) => (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        ReplyBody::Json(value) => (status, Json(value)).into_response(),
    }
}

fn with_retry_after(body: &ErrorBody, mut response: Response) -> Response {
    if let Some(ms) = body.retry_after_ms {
        let secs = ms.div_ceil(1000).max(1);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use brewlink_protocol::VerbKind;

    #[test]
    fn busy_carries_retry_after() {
        let response = ApiError(BrewError::Busy {
            retry_after_ms: 2_500,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }

    #[test]
    fn device_errors_follow_family_shape() {
        let err = BrewError::from(ProtocolError::UnsupportedVerb {
            family: DeviceFamily::PicoFerm,
            verb: VerbKind::Log,
        });
        let response = device_error(DeviceFamily::PicoFerm, &err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );

        let response = device_error(DeviceFamily::ZSeries, &BrewError::NotFound("x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn every_code_has_a_status() {
        assert_eq!(status_for(ErrorCode::InvalidState).as_u16(), 422);
        assert_eq!(status_for(ErrorCode::RecipeUnavailable).as_u16(), 502);
        assert_eq!(status_for(ErrorCode::Persistence).as_u16(), 500);
        assert_eq!(status_for(ErrorCode::Conflict).as_u16(), 409);
    }
}
