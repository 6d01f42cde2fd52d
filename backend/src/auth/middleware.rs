use crate::auth::jwt_service::{Claims, JwtError, JwtService};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorForbidden, ErrorUnauthorized},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use tracing::{debug, warn};

/// Guards the scoring routes: a Bearer token carrying the admin role
pub struct AdminAuth {
    jwt_service: Rc<JwtService>,
}

impl AdminAuth {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Rc::new(jwt_service),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdminAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AdminAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminAuthService {
            service: Rc::new(service),
            jwt_service: self.jwt_service.clone(),
        }))
    }
}

pub struct AdminAuthService<S> {
    service: Rc<S>,
    jwt_service: Rc<JwtService>,
}

impl<S, B> Service<ServiceRequest> for AdminAuthService<S>
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
        let jwt_service = self.jwt_service.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "));

            let Some(token) = token else {
                warn!(path = %req.path(), "Missing or malformed authorization header");
                return Err(ErrorUnauthorized("Missing bearer token"));
            };

            match jwt_service.authorize_admin(token) {
                Ok(claims) => {
                    debug!(sub = %claims.sub, path = %req.path(), "Admin request authorized");
                    req.extensions_mut().insert(claims);
                    service.call(req).await
                }
                Err(JwtError::MissingRole(role)) => {
                    warn!(role = %role, "Token lacks required role");
                    Err(ErrorForbidden("Admin role required"))
                }
                Err(JwtError::TokenExpired) => Err(ErrorUnauthorized("Token expired")),
                Err(e) => {
                    warn!(error = %e, "Token validation failed");
                    Err(ErrorUnauthorized("Invalid token"))
                }
            }
        })
    }
}

/// Claims of the authorized operator (use in route handlers)
pub trait ClaimsExt {
    fn claims(&self) -> Option<Claims>;
}

impl ClaimsExt for actix_web::HttpRequest {
    fn claims(&self) -> Option<Claims> {
        self.extensions().get::<Claims>().cloned()
    }
}
