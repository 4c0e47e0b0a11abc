use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Build information", body = Health)
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method) -> impl IntoResponse {
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let short_hash = health.commit.get(..7).unwrap_or("");

    let headers = match format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
    {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", value);
            headers
        }
        Err(err) => {
            error!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        }
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    (StatusCode::OK, headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn health_reports_build_info() -> Result<()> {
        let response = health(Method::GET).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let app = response
            .headers()
            .get("X-App")
            .map(HeaderValue::to_str)
            .transpose()?
            .unwrap_or_default();
        assert!(app.starts_with(concat!(env!("CARGO_PKG_NAME"), ":", env!("CARGO_PKG_VERSION"))));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&bytes)?;
        assert_eq!(
            body.get("name").and_then(serde_json::Value::as_str),
            Some(env!("CARGO_PKG_NAME"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn head_has_no_body() -> Result<()> {
        let response = health(Method::HEAD).await.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert!(bytes.is_empty());
        Ok(())
    }
}
