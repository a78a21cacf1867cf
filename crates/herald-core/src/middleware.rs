use axum::http::{HeaderName, HeaderValue, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

/// Header carrying the correlation id on HTTP requests and responses.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone, Default)]
pub struct MakeCorrelationId;

impl MakeRequestId for MakeCorrelationId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Assign a correlation id to requests that arrive without one. Apply with
/// `.layer(correlation_id_layer())`; an incoming id is left untouched.
pub fn correlation_id_layer() -> SetRequestIdLayer<MakeCorrelationId> {
    SetRequestIdLayer::new(
        HeaderName::from_static(CORRELATION_ID_HEADER),
        MakeCorrelationId,
    )
}

/// Echo the request's correlation id on the response.
pub fn propagate_correlation_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(CORRELATION_ID_HEADER))
}
