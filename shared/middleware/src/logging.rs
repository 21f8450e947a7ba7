use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, Result,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
    time::Instant,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Paths excluded from per-request access logging, matching `/health`
/// liveness polling noise.
const EXCLUDED_PATHS: &[&str] = &["/health"];

#[derive(Clone, Default)]
pub struct RequestLoggingMiddleware;

impl<S, B> Transform<S, ServiceRequest> for RequestLoggingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingService {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggingService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let method = req.method().to_string();
        let excluded = EXCLUDED_PATHS.contains(&path.as_str());

        let request_id = req
            .headers()
            .get("X-Request-Id")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        req.extensions_mut().insert(request_id.clone());

        let started = Instant::now();
        let service = self.service.clone();

        Box::pin(async move {
            if !excluded {
                info!(request_id = %request_id, %method, %path, "request received");
            }

            let res = service.call(req).await?;
            let elapsed_ms = started.elapsed().as_millis();
            let status = res.status().as_u16();

            if !excluded {
                if status >= 500 {
                    warn!(request_id = %request_id, %method, %path, status, elapsed_ms, "request failed");
                } else {
                    info!(request_id = %request_id, %method, %path, status, elapsed_ms, "request completed");
                }
            }

            Ok(res)
        })
    }
}

pub fn create_request_logging() -> RequestLoggingMiddleware {
    RequestLoggingMiddleware
}
