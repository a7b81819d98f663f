//! # Management Portal Client
//!
//! Token refresh and subject lookup against the management portal.
//!
//! ## Requests
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Portal Requests                                  │
//! │                                                                         │
//! │  refresh          POST {portal}/oauth/token                            │
//! │                   Basic <client_id:client_secret>                      │
//! │                   grant_type=refresh_token&refresh_token=…             │
//! │                   → { access_token, refresh_token?, expires_in, sub }  │
//! │                                                                         │
//! │  fetch_subject    GET  {portal}/api/subjects/{user}                    │
//! │                   Bearer <token>                                       │
//! │                   → { project.projectName, sources[], attributes }     │
//! │                                                                         │
//! │  register_source  POST {portal}/api/subjects/{user}/sources            │
//! │                   Bearer <token>, JSON source                          │
//! │                   → registered source                                  │
//! │                                                                         │
//! │  401 → Unauthorized   404 → UserNotFound   409 → Conflict              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call returns a new [`AuthState`]; the input state is never touched.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use beacon_core::{AppSource, AuthState, ServerConfig, SourceType};

use crate::error::{AgentResult, PortalError};

/// Attribute holding the subject's human-readable identifier.
pub const HUMAN_READABLE_ID_ATTRIBUTE: &str = "Human-readable-identifier";

/// Portal operations the agent depends on.
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// Exchanges the refresh token for a new access token.
    async fn refresh(&self, auth: &AuthState) -> Result<AuthState, PortalError>;

    /// Reloads project, sources and attributes of the subject.
    async fn fetch_subject(&self, auth: &AuthState) -> Result<AuthState, PortalError>;

    /// Registers a dynamically discovered source with the subject.
    async fn register_source(
        &self,
        auth: &AuthState,
        source: &AppSource,
    ) -> Result<AppSource, PortalError>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    sub: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDto {
    project_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_source_name: Option<String>,
    source_type_producer: String,
    source_type_model: String,
    #[serde(default)]
    source_type_catalog_version: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectResponse {
    #[serde(default)]
    project: Option<ProjectDto>,
    #[serde(default)]
    sources: Vec<SourceDto>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl From<SourceDto> for AppSource {
    fn from(dto: SourceDto) -> Self {
        AppSource {
            source_id: dto.source_id,
            source_name: dto.source_name,
            expected_source_name: dto.expected_source_name,
            source_type: SourceType::new(
                dto.source_type_producer,
                dto.source_type_model,
                dto.source_type_catalog_version,
            ),
            attributes: dto.attributes,
        }
    }
}

impl From<&AppSource> for SourceDto {
    fn from(source: &AppSource) -> Self {
        SourceDto {
            source_id: source.source_id.clone(),
            source_name: source.source_name.clone(),
            expected_source_name: source.expected_source_name.clone(),
            source_type_producer: source.source_type.producer.clone(),
            source_type_model: source.source_type.model.clone(),
            source_type_catalog_version: source.source_type.catalog_version.clone(),
            attributes: source.attributes.clone(),
        }
    }
}

// =============================================================================
// Response Handling
// =============================================================================

/// Maps a portal status code to an error, if it is one.
pub fn classify_status(status: u16, body: String) -> Result<(), PortalError> {
    match status {
        200..=299 => Ok(()),
        401 => Err(PortalError::Unauthorized),
        404 => Err(PortalError::UserNotFound),
        409 => Err(PortalError::Conflict),
        _ => Err(PortalError::Http { status, body }),
    }
}

/// Applies a token response body to `auth`.
pub fn apply_token_response(
    auth: &AuthState,
    body: &str,
    now: DateTime<Utc>,
) -> Result<AuthState, PortalError> {
    let token: TokenResponse =
        serde_json::from_str(body).map_err(|e| PortalError::InvalidResponse(e.to_string()))?;
    if token.access_token.is_empty() {
        return Err(PortalError::InvalidResponse("empty access token".into()));
    }

    let mut builder = auth
        .to_builder()
        .token(token.access_token)
        .expiration(now + Duration::seconds(token.expires_in))
        .last_update(now);
    if let Some(refresh) = token.refresh_token.filter(|t| !t.is_empty()) {
        builder = builder.refresh_token(refresh);
    }
    if let Some(sub) = token.sub {
        builder = builder.user_id(sub);
    }
    Ok(builder.build())
}

/// Applies a subject response body to `auth`.
pub fn apply_subject_response(
    auth: &AuthState,
    body: &str,
    now: DateTime<Utc>,
) -> Result<AuthState, PortalError> {
    let subject: SubjectResponse =
        serde_json::from_str(body).map_err(|e| PortalError::InvalidResponse(e.to_string()))?;

    let sources: Vec<AppSource> = subject.sources.into_iter().map(AppSource::from).collect();
    let mut builder = auth.to_builder().sources(&sources).last_update(now);
    if let Some(project) = subject.project {
        builder = builder.project_id(project.project_name);
    }
    if let Some(id) = subject.attributes.get(HUMAN_READABLE_ID_ATTRIBUTE) {
        builder = builder.human_readable_user_id(id.clone());
    }
    Ok(builder.build())
}

/// Decodes a registered source.
pub fn parse_registered_source(body: &str) -> Result<AppSource, PortalError> {
    if body.trim().is_empty() {
        return Err(PortalError::InvalidResponse("empty source registration body".into()));
    }
    let dto: SourceDto =
        serde_json::from_str(body).map_err(|e| PortalError::InvalidResponse(e.to_string()))?;
    Ok(dto.into())
}

// =============================================================================
// HTTP Client
// =============================================================================

/// [`PortalClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct ManagementPortalClient {
    client: Client,
    base: ServerConfig,
    client_id: String,
    client_secret: String,
}

impl ManagementPortalClient {
    pub fn new(
        base: ServerConfig,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> AgentResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(base.unsafe_connection)
            .build()
            .map_err(|e| PortalError::Network(e.to_string()))?;

        Ok(ManagementPortalClient {
            client,
            base,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn base(&self) -> &ServerConfig {
        &self.base
    }

    fn subject_path(auth: &AuthState) -> Result<String, PortalError> {
        let user = auth.user_id().ok_or(PortalError::MissingUser)?;
        Ok(format!("api/subjects/{}", user))
    }

    async fn read(response: reqwest::Response) -> Result<String, PortalError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        classify_status(status, body.clone())?;
        Ok(body)
    }
}

#[async_trait]
impl PortalClient for ManagementPortalClient {
    async fn refresh(&self, auth: &AuthState) -> Result<AuthState, PortalError> {
        let refresh_token = auth.refresh_token().ok_or(PortalError::MissingRefreshToken)?;
        let url = self.base.join("oauth/token")?;

        debug!(portal = %self.base, "Refreshing access token");
        let response = self
            .client
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let body = Self::read(response).await?;
        let refreshed = apply_token_response(auth, &body, Utc::now())?;
        info!(user_id = ?refreshed.user_id(), "Access token refreshed");
        Ok(refreshed)
    }

    async fn fetch_subject(&self, auth: &AuthState) -> Result<AuthState, PortalError> {
        let url = self.base.join(&Self::subject_path(auth)?)?;

        let mut request = self.client.get(url);
        if let Some(header) = auth.authorization_header() {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }
        let body = Self::read(request.send().await?).await?;

        let updated = apply_subject_response(auth, &body, Utc::now())?;
        info!(
            project_id = ?updated.project_id(),
            sources = updated.assigned_sources().map(|s| s.len()).unwrap_or(0),
            "Subject loaded from portal"
        );
        Ok(updated)
    }

    async fn register_source(
        &self,
        auth: &AuthState,
        source: &AppSource,
    ) -> Result<AppSource, PortalError> {
        let url = self
            .base
            .join(&format!("{}/sources", Self::subject_path(auth)?))?;

        let mut request = self.client.post(url).json(&SourceDto::from(source));
        if let Some(header) = auth.authorization_header() {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }
        let body = Self::read(request.send().await?).await?;

        let registered = parse_registered_source(&body)?;
        info!(source_id = ?registered.source_id, "Source registered");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthState {
        AuthState::builder()
            .user_id("sub-1")
            .token("old")
            .refresh_token("r1")
            .build()
    }

    #[test]
    fn test_token_response_replaces_token() {
        let now = Utc::now();
        let body = r#"{"access_token":"new","refresh_token":"r2","expires_in":3600,"sub":"sub-1"}"#;

        let refreshed = apply_token_response(&auth(), body, now).unwrap();
        assert_eq!(refreshed.token(), Some("new"));
        assert_eq!(refreshed.refresh_token(), Some("r2"));
        assert_eq!(refreshed.expiration(), Some(now + Duration::seconds(3600)));
        assert!(refreshed.is_valid_at(now));
    }

    #[test]
    fn test_token_response_keeps_refresh_token_when_absent() {
        let body = r#"{"access_token":"new","expires_in":60}"#;
        let refreshed = apply_token_response(&auth(), body, Utc::now()).unwrap();
        assert_eq!(refreshed.refresh_token(), Some("r1"));
        assert_eq!(refreshed.user_id(), Some("sub-1"));
    }

    #[test]
    fn test_token_response_rejects_garbage() {
        assert!(matches!(
            apply_token_response(&auth(), "<html>", Utc::now()),
            Err(PortalError::InvalidResponse(_))
        ));
        assert!(apply_token_response(&auth(), r#"{"access_token":"","expires_in":1}"#, Utc::now())
            .is_err());
    }

    #[test]
    fn test_subject_response_sets_sources_and_project() {
        let body = r#"{
            "login": "sub-1",
            "project": { "projectName": "radar-test" },
            "attributes": { "Human-readable-identifier": "P-0042" },
            "sources": [{
                "sourceId": "src-1",
                "sourceName": "E4 left",
                "expectedSourceName": "A01, A02",
                "sourceTypeProducer": "Empatica",
                "sourceTypeModel": "E4",
                "sourceTypeCatalogVersion": "v1"
            }]
        }"#;

        let updated = apply_subject_response(&auth(), body, Utc::now()).unwrap();
        assert_eq!(updated.project_id(), Some("radar-test"));
        assert_eq!(updated.human_readable_user_id(), Some("P-0042"));

        let sources = updated.assigned_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id.as_deref(), Some("src-1"));
        assert_eq!(sources[0].source_type, SourceType::new("Empatica", "E4", "v1"));
        assert_eq!(
            sources[0].expected_device_names(),
            Some(vec!["A01".to_string(), "A02".to_string()])
        );
    }

    #[test]
    fn test_subject_without_sources_has_empty_assignment() {
        let updated = apply_subject_response(&auth(), "{}", Utc::now()).unwrap();
        assert_eq!(updated.assigned_sources(), Some(Vec::new()));
    }

    #[test]
    fn test_registration_status_mapping() {
        assert!(classify_status(201, String::new()).is_ok());
        assert!(matches!(classify_status(401, String::new()), Err(PortalError::Unauthorized)));
        assert!(matches!(classify_status(404, String::new()), Err(PortalError::UserNotFound)));
        assert!(matches!(classify_status(409, String::new()), Err(PortalError::Conflict)));
        assert!(matches!(
            classify_status(500, "boom".into()),
            Err(PortalError::Http { status: 500, .. })
        ));
    }

    #[test]
    fn test_registered_source_body() {
        assert!(parse_registered_source("").is_err());

        let source = parse_registered_source(
            r#"{"sourceId":"src-9","sourceTypeProducer":"Polar","sourceTypeModel":"H10"}"#,
        )
        .unwrap();
        assert_eq!(source.source_id.as_deref(), Some("src-9"));
        assert_eq!(source.source_type.model, "H10");
    }

    #[test]
    fn test_source_dto_serializes_camel_case() {
        let source = AppSource::new(SourceType::new("Polar", "H10", "1.0"));
        let json = serde_json::to_value(SourceDto::from(&source)).unwrap();
        assert_eq!(json["sourceTypeProducer"], "Polar");
        assert!(json.get("sourceId").is_none());
    }
}
