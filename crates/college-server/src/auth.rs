//! Identity resolution against the external auth service, plus the bearer
//! middleware that attaches an [`Identity`] to every authenticated request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use college_shared::{DirectoryUser, Identity, Role, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Which half of the user directory to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    Students,
    Teachers,
}

impl DirectoryKind {
    fn path(&self) -> &'static str {
        match self {
            DirectoryKind::Students => "students",
            DirectoryKind::Teachers => "teachers",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DirectoryPage {
    pub users: Vec<DirectoryUser>,
    pub total: u64,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Map a bearer token to an identity. Unknown or empty roles fail with
    /// [`EngineError::Unauthorized`].
    async fn validate_token(&self, token: &str) -> Result<Identity, EngineError>;

    async fn search(&self, kind: DirectoryKind, query: &str) -> Result<DirectoryPage, EngineError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpIdentityResolver {
    client: reqwest::Client,
    base_url: String,
    internal_token: String,
}

#[derive(Deserialize)]
struct ValidateResponse {
    user: RemoteUser,
}

#[derive(Deserialize)]
struct RemoteUser {
    id: String,
    username: String,
    #[serde(default)]
    role: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default, alias = "students", alias = "teachers")]
    users: Vec<DirectoryUser>,
    #[serde(default)]
    total: u64,
}

impl HttpIdentityResolver {
    pub fn new(
        base_url: &str,
        internal_token: &str,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build auth client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_token: internal_token.to_string(),
        })
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn validate_token(&self, token: &str) -> Result<Identity, EngineError> {
        let url = format!("{}/api/v1/auth/validate", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "auth service unreachable");
                EngineError::UpstreamFailure("failed to validate token".to_string())
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::Unauthorized("invalid or expired token".to_string()));
        }
        if !status.is_success() {
            return Err(EngineError::UpstreamFailure(format!(
                "auth service returned status {}",
                status.as_u16()
            )));
        }

        let body: ValidateResponse = resp.json().await.map_err(|e| {
            warn!(error = %e, "failed to decode auth response");
            EngineError::UpstreamFailure("failed to decode auth response".to_string())
        })?;

        identity_from_remote(body.user)
    }

    async fn search(&self, kind: DirectoryKind, query: &str) -> Result<DirectoryPage, EngineError> {
        let url = format!("{}/api/v1/{}/search", self.base_url, kind.path());

        let resp = self
            .client
            .post(&url)
            .header("X-Internal-Token", &self.internal_token)
            .json(&SearchRequest { query })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, directory = kind.path(), "directory search failed");
                EngineError::UpstreamFailure(format!("failed to search {}", kind.path()))
            })?;

        if !resp.status().is_success() {
            return Err(EngineError::UpstreamFailure(format!(
                "auth service returned status {}",
                resp.status().as_u16()
            )));
        }

        let body: SearchResponse = resp.json().await.map_err(|e| {
            warn!(error = %e, "failed to decode search response");
            EngineError::UpstreamFailure("failed to decode search response".to_string())
        })?;

        Ok(DirectoryPage {
            users: body.users,
            total: body.total,
        })
    }
}

fn identity_from_remote(user: RemoteUser) -> Result<Identity, EngineError> {
    let role: Role = user.role.parse().map_err(|e| {
        warn!(user = %user.id, error = %e, "rejecting identity with unusable role");
        EngineError::Unauthorized(format!("unusable role: {e}"))
    })?;

    debug!(user = %user.username, %role, "token validated");
    Ok(Identity {
        id: UserId(user.id),
        username: user.username,
        role,
    })
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

fn bad_header() -> EngineError {
    EngineError::Unauthorized("invalid authorization header format".to_string())
}

/// Extract the bearer token from the `Authorization` header.
fn bearer_token(req: &Request) -> Result<&str, EngineError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| EngineError::Unauthorized("authorization header is missing".to_string()))?
        .to_str()
        .map_err(|_| bad_header())?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(bad_header)?
        .trim();

    if token.is_empty() {
        return Err(EngineError::Unauthorized("token is missing".to_string()));
    }
    Ok(token)
}

/// Resolve the caller and stash the [`Identity`] in the request extensions.
pub async fn require_identity(
    State(resolver): State<Arc<dyn IdentityResolver>>,
    mut req: Request,
    next: Next,
) -> Response {
    // Owned copy: the request body is not `Sync`, so no borrow of `req` may
    // live across the await below.
    let token = bearer_token(&req).map(str::to_owned);
    let identity = match token {
        Ok(token) => resolver.validate_token(&token).await,
        Err(e) => Err(e),
    };

    match identity {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(role: &str) -> RemoteUser {
        RemoteUser {
            id: "u1".into(),
            username: "Ada".into(),
            role: role.into(),
        }
    }

    #[test]
    fn known_roles_resolve() {
        let id = identity_from_remote(remote("teacher")).unwrap();
        assert_eq!(id.role, Role::Teacher);
        assert_eq!(id.id.as_str(), "u1");
    }

    #[test]
    fn empty_or_unknown_role_is_unauthorized() {
        assert!(matches!(
            identity_from_remote(remote("")),
            Err(EngineError::Unauthorized(_))
        ));
        assert!(matches!(
            identity_from_remote(remote("root")),
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[test]
    fn search_response_accepts_either_key() {
        let raw = r#"{"students":[{"id":"s1","username":"Sam"}],"total":1}"#;
        let students: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(students.users.len(), 1);
        let teachers: SearchResponse =
            serde_json::from_str(r#"{"teachers":[],"total":0}"#).unwrap();
        assert!(teachers.users.is_empty());
    }

    #[test]
    fn bearer_parsing() {
        let req = |value: Option<&str>| {
            let mut builder = Request::builder();
            if let Some(v) = value {
                builder = builder.header(AUTHORIZATION, v);
            }
            builder.body(axum::body::Body::empty()).unwrap()
        };

        assert_eq!(bearer_token(&req(Some("Bearer abc"))).unwrap(), "abc");
        assert!(bearer_token(&req(None)).is_err());
        assert!(bearer_token(&req(Some("Basic abc"))).is_err());
        assert!(bearer_token(&req(Some("Bearer "))).is_err());
    }
}
