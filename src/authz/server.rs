//! Envoy ext_authz gRPC server
//!
//! Implements the external authorization Check RPC: extract the bearer
//! credential, validate it against the workload clusters, exchange it
//! for a management cluster token, and rewrite the `authorization`
//! header on allow. Validation failures deny with Unauthenticated (401),
//! exchange failures with PermissionDenied (403); only generic messages
//! cross the boundary.

use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::ext_authz::v3::pb::{
    Authorization, AuthorizationServer, CheckRequest, CheckResponse,
};
use envoy_types::pb::envoy::config::core::v3::header_value_option::HeaderAppendAction;
use envoy_types::pb::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use envoy_types::pb::envoy::r#type::v3::HttpStatus;
use envoy_types::pb::envoy::service::auth::v3::check_response::HttpResponse;
use envoy_types::pb::envoy::service::auth::v3::{DeniedHttpResponse, OkHttpResponse};
use envoy_types::pb::google::rpc;
use tonic::{Code, Request, Response, Status};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::token::{Exchanger, TokenValidator};

/// Bearer credential prefix; case-sensitive per RFC 6750
const BEARER_PREFIX: &str = "Bearer ";

/// TokenSmith ext_authz gRPC server
pub struct AuthzServer {
    validator: Arc<dyn TokenValidator>,
    exchanger: Arc<Exchanger>,
    addr: SocketAddr,
}

impl AuthzServer {
    /// Create a new external authorization server
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        exchanger: Arc<Exchanger>,
        addr: SocketAddr,
    ) -> Self {
        Self {
            validator,
            exchanger,
            addr,
        }
    }

    /// Run the gRPC server until the shutdown future resolves
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let addr = self.addr;
        let service = AuthzService {
            validator: self.validator,
            exchanger: self.exchanger,
        };

        info!(?addr, "Starting TokenSmith ext_authz gRPC server");

        tonic::transport::Server::builder()
            .add_service(AuthorizationServer::new(service))
            .serve_with_shutdown(addr, shutdown)
            .await
            .map_err(|e| Error::grpc(format!("server error: {e}")))
    }

    /// Run the gRPC server until the process exits
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }
}

/// Internal gRPC service implementation
struct AuthzService {
    validator: Arc<dyn TokenValidator>,
    exchanger: Arc<Exchanger>,
}

impl AuthzService {
    /// Extract the bearer credential from the Authorization header
    ///
    /// Envoy normalizes header names to lowercase, so the lookup key is
    /// `authorization`. The scheme prefix itself is case-sensitive:
    /// `bearer x` is not a Bearer credential.
    fn extract_bearer_token(request: &CheckRequest) -> Result<String> {
        let headers = request
            .attributes
            .as_ref()
            .and_then(|a| a.request.as_ref())
            .and_then(|r| r.http.as_ref())
            .map(|h| &h.headers)
            .ok_or(Error::HeaderMissing)?;

        let value = headers.get("authorization").ok_or(Error::HeaderMissing)?;

        let token = value
            .strip_prefix(BEARER_PREFIX)
            .ok_or(Error::HeaderMalformed)?;
        if token.is_empty() {
            return Err(Error::HeaderMalformed);
        }

        Ok(token.to_string())
    }

    /// Extract the request path from the check request
    fn extract_path(request: &CheckRequest) -> String {
        request
            .attributes
            .as_ref()
            .and_then(|a| a.request.as_ref())
            .and_then(|r| r.http.as_ref())
            .map(|h| h.path.clone())
            .unwrap_or_default()
    }

    /// Extract the HTTP method from the check request
    fn extract_method(request: &CheckRequest) -> String {
        request
            .attributes
            .as_ref()
            .and_then(|a| a.request.as_ref())
            .and_then(|r| r.http.as_ref())
            .map(|h| h.method.clone())
            .unwrap_or_default()
    }

    async fn do_check(&self, request: CheckRequest) -> CheckResponse {
        info!(
            path = %Self::extract_path(&request),
            method = %Self::extract_method(&request),
            "Received authorization check request"
        );

        let bearer_token = match Self::extract_bearer_token(&request) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to extract bearer token");
                return deny_response(
                    Code::Unauthenticated,
                    "Missing or invalid Authorization header",
                );
            }
        };

        let identity = match self.validator.validate(&bearer_token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                return deny_response(Code::Unauthenticated, "Token validation failed");
            }
        };

        info!(
            namespace = %identity.namespace,
            service_account = %identity.name,
            uid = %identity.uid,
            "Token validated successfully"
        );

        let management_token = match self.exchanger.exchange(&identity).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    error = %e,
                    namespace = %identity.namespace,
                    service_account = %identity.name,
                    "Token exchange failed"
                );
                return deny_response(Code::PermissionDenied, "Token exchange failed");
            }
        };

        info!(
            namespace = %identity.namespace,
            service_account = %identity.name,
            "Token exchanged successfully"
        );

        ok_response_with_token(&management_token)
    }
}

#[tonic::async_trait]
impl Authorization for AuthzService {
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> std::result::Result<Response<CheckResponse>, Status> {
        let check_request = request.into_inner();
        Ok(Response::new(self.do_check(check_request).await))
    }
}

/// Build an OK response that rewrites the Authorization header
fn ok_response_with_token(token: &str) -> CheckResponse {
    CheckResponse {
        status: Some(rpc::Status {
            code: Code::Ok as i32,
            ..Default::default()
        }),
        http_response: Some(HttpResponse::OkResponse(OkHttpResponse {
            headers: vec![HeaderValueOption {
                header: Some(HeaderValue {
                    key: "authorization".to_string(),
                    value: format!("{BEARER_PREFIX}{token}"),
                    ..Default::default()
                }),
                append_action: HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
                ..Default::default()
            }],
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Build a deny response with the given status code and message
fn deny_response(code: Code, message: &str) -> CheckResponse {
    CheckResponse {
        status: Some(rpc::Status {
            code: code as i32,
            message: message.to_string(),
            ..Default::default()
        }),
        http_response: Some(HttpResponse::DeniedResponse(DeniedHttpResponse {
            status: Some(HttpStatus {
                code: http_status_from_code(code),
            }),
            body: message.to_string(),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Map a gRPC status code to an HTTP status code
fn http_status_from_code(code: Code) -> i32 {
    match code {
        Code::Ok => 200,
        Code::Unauthenticated => 401,
        Code::PermissionDenied => 403,
        Code::NotFound => 404,
        Code::Internal => 500,
        Code::Unavailable => 503,
        _ => 500,
    }
}
