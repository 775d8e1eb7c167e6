//! Session propagation across gRPC calls
//!
//! `SessionGuard` runs on the request headers before any vault handler, so
//! unary and streaming calls are gated the same way. On success the decoded
//! [`Session`] rides along in the request extensions; handlers take it out
//! once with [`Session::from_request`] and pass it on explicitly.

use std::sync::Arc;

use coffer_core::AUTHORIZATION;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::debug;

use crate::token::TokenAuthority;

/// The authenticated caller of one RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub login: String,
    /// PKCS#1 PEM public key bound into the caller's token
    pub public_key: Vec<u8>,
}

impl Session {
    pub fn from_request<T>(req: &Request<T>) -> Result<Self, Status> {
        req.extensions()
            .get::<Session>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("Unauthorized"))
    }
}

/// Server interceptor: verifies the bearer token or rejects the call.
#[derive(Clone)]
pub struct SessionGuard {
    tokens: Arc<TokenAuthority>,
}

impl SessionGuard {
    pub fn new(tokens: Arc<TokenAuthority>) -> Self {
        Self { tokens }
    }

    fn authenticate(&self, metadata: &MetadataMap) -> Result<Session, Status> {
        let raw = metadata
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                debug!("rejecting call without token");
                Status::unauthenticated("Unauthorized")
            })?;

        let claims = self.tokens.parse(raw).map_err(|e| {
            debug!(error = %e, "rejecting call with bad token");
            Status::unauthenticated("Unauthorized")
        })?;

        Ok(Session {
            login: claims.sub,
            public_key: claims.pk.into_bytes(),
        })
    }
}

impl Interceptor for SessionGuard {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        let session = self.authenticate(req.metadata())?;
        req.extensions_mut().insert(session);
        Ok(req)
    }
}

/// Client interceptor: attaches the stored token to every outgoing call.
#[derive(Clone, Default)]
pub struct BearerToken {
    value: Option<AsciiMetadataValue>,
}

impl BearerToken {
    pub fn new(token: &str) -> Result<Self, Status> {
        let value = token
            .parse()
            .map_err(|_| Status::invalid_argument("token is not valid header text"))?;
        Ok(Self { value: Some(value) })
    }

    /// No token: calls go out anonymously.
    pub fn none() -> Self {
        Self::default()
    }
}

impl Interceptor for BearerToken {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        if let Some(value) = &self.value {
            req.metadata_mut().insert(AUTHORIZATION, value.clone());
        }
        Ok(req)
    }
}

/// Place an issued token in the response headers.
pub fn attach_token<T>(resp: &mut tonic::Response<T>, token: &str) -> Result<(), Status> {
    let value: AsciiMetadataValue = token
        .parse()
        .map_err(|_| Status::internal("issued token is not valid header text"))?;
    resp.metadata_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Read the token a server placed in the response headers.
pub fn read_token<T>(resp: &tonic::Response<T>) -> Option<String> {
    resp.metadata()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
