use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ORIGIN,
        },
        Method,
    },
    Error, HttpResponse, Result,
};
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    future::{ready, Ready},
    rc::Rc,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u32>,
    pub allow_any_origin: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Accept".to_string(),
                "X-Request-Id".to_string(),
                "traceparent".to_string(),
            ],
            exposed_headers: vec!["X-Request-Id".to_string()],
            allow_credentials: false,
            max_age: Some(3600),
            allow_any_origin: false,
        }
    }
}

impl CorsConfig {
    pub fn permissive() -> Self {
        Self {
            allow_any_origin: true,
            allow_credentials: false,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct CorsMiddleware {
    config: CorsConfig,
    allowed_origins_set: HashSet<String>,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        let allowed_origins_set = config.allowed_origins.iter().cloned().collect();
        Self {
            config,
            allowed_origins_set,
        }
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config.allow_any_origin || self.allowed_origins_set.contains(origin)
    }

    fn handle_preflight(&self, req: &ServiceRequest) -> HttpResponse {
        let origin = req.headers().get(ORIGIN).and_then(|h| h.to_str().ok());
        if let Some(origin) = origin {
            if !self.is_origin_allowed(origin) {
                warn!(origin, "CORS preflight rejected: origin not allowed");
                return HttpResponse::Forbidden().finish();
            }
        }
        debug!(?origin, "CORS preflight approved");
        self.build_cors_response(origin)
    }

    fn build_cors_response(&self, origin: Option<&str>) -> HttpResponse {
        let mut response = HttpResponse::Ok();
        self.apply_headers(response.headers_mut(), origin);
        response.finish()
    }

    fn apply_headers(&self, headers: &mut actix_web::http::header::HeaderMap, origin: Option<&str>) {
        if let Some(origin) = origin {
            if self.is_origin_allowed(origin) {
                let value = if self.config.allow_any_origin {
                    "*".to_string()
                } else {
                    origin.to_string()
                };
                if let Ok(v) = value.parse() {
                    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, v);
                }
            }
        }
        if self.config.allow_credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, "true".parse().unwrap());
        }
        let methods = self.config.allowed_methods.join(", ");
        if let Ok(v) = methods.parse() {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, v);
        }
        let allow_headers = self.config.allowed_headers.join(", ");
        if let Ok(v) = allow_headers.parse() {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, v);
        }
        if !self.config.exposed_headers.is_empty() {
            let exposed = self.config.exposed_headers.join(", ");
            if let Ok(v) = exposed.parse() {
                headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, v);
            }
        }
        if let Some(max_age) = self.config.max_age {
            if let Ok(v) = max_age.to_string().parse() {
                headers.insert(ACCESS_CONTROL_MAX_AGE, v);
            }
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CorsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CorsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CorsMiddlewareService {
            service: Rc::new(service),
            middleware: self.clone(),
        }))
    }
}

pub struct CorsMiddlewareService<S> {
    service: Rc<S>,
    middleware: CorsMiddleware,
}

impl<S, B> Service<ServiceRequest> for CorsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let middleware = self.middleware.clone();
        let service = self.service.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                let response = middleware.handle_preflight(&req);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let origin = req
                .headers()
                .get(ORIGIN)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string());

            let mut res = service.call(req).await?;
            middleware.apply_headers(res.headers_mut(), origin.as_deref());
            Ok(res.map_into_left_body())
        })
    }
}

pub fn create_cors_middleware() -> CorsMiddleware {
    CorsMiddleware::new(CorsConfig::default())
}

pub fn create_permissive_cors() -> CorsMiddleware {
    CorsMiddleware::new(CorsConfig::permissive())
}
