//! API REST de la configuration
//!
//! The router is meant to be nested under `/api/config`.

use crate::Config;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value;
use std::sync::Arc;

/// Valeur de configuration à un chemin donné
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ConfigValue {
    /// Chemin de la clé (ex: "icecast.mount")
    pub path: String,
    /// Valeur au format JSON
    pub value: JsonValue,
}

/// Requête de mise à jour
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UpdateConfigRequest {
    /// Chemin de la clé (ex: "relay.backoff_max_secs")
    pub path: String,
    /// Nouvelle valeur au format JSON
    pub value: JsonValue,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UpdateConfigResponse {
    pub success: bool,
    pub message: String,
}

/// Erreur API, rendue en JSON `{ "error": ... }`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.error.to_string() })),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

/// GET /api/config - toute la configuration
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    responses(
        (status = 200, description = "Configuration complète", body = serde_json::Value)
    )
)]
pub async fn get_full_config(
    State(config): State<Arc<Config>>,
) -> Result<Json<JsonValue>, ApiError> {
    let value = config.get_value(&[])?;
    Ok(Json(yaml_to_json(&value)?))
}

/// GET /api/config/{path} - une valeur
#[utoipa::path(
    get,
    path = "/api/config/{path}",
    tag = "config",
    params(
        ("path" = String, Path, description = "Chemin séparé par des points, ex: icecast.mount")
    ),
    responses(
        (status = 200, description = "Valeur de configuration", body = ConfigValue),
        (status = 404, description = "Chemin non trouvé")
    )
)]
pub async fn get_config_value(
    State(config): State<Arc<Config>>,
    Path(path): Path<String>,
) -> Result<Json<ConfigValue>, ApiError> {
    let parts: Vec<&str> = path.split('.').collect();
    let value = config.get_value(&parts).map_err(|error| ApiError {
        status: StatusCode::NOT_FOUND,
        error,
    })?;

    Ok(Json(ConfigValue {
        value: yaml_to_json(&value)?,
        path,
    }))
}

/// POST /api/config - met à jour une valeur
#[utoipa::path(
    post,
    path = "/api/config",
    tag = "config",
    request_body = UpdateConfigRequest,
    responses(
        (status = 200, description = "Configuration mise à jour", body = UpdateConfigResponse),
        (status = 400, description = "Chemin invalide")
    )
)]
pub async fn update_config_value(
    State(config): State<Arc<Config>>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<UpdateConfigResponse>, ApiError> {
    let parts: Vec<&str> = request.path.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!("empty configuration path"),
        });
    }

    config.set_value(&parts, json_to_yaml(&request.value)?)?;
    tracing::info!(path = %request.path, "Configuration updated");

    Ok(Json(UpdateConfigResponse {
        success: true,
        message: format!("Configuration updated at path: {}", request.path),
    }))
}

fn yaml_to_json(yaml: &Value) -> Result<JsonValue, ApiError> {
    Ok(serde_json::to_value(yaml)?)
}

fn json_to_yaml(json: &JsonValue) -> Result<Value, ApiError> {
    Ok(serde_yaml::to_value(json)?)
}

/// Crée le router de l'API de configuration
pub fn create_router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/", get(get_full_config).post(update_config_value))
        .route("/{path}", get(get_config_value))
        .with_state(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn router() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, create_router(Arc::new(config)))
    }

    #[tokio::test]
    async fn test_get_and_update_value() {
        let (_dir, app) = router();

        let response = app
            .clone()
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"path":"icecast.mount","value":"/live"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/icecast.mount").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: ConfigValue = serde_json::from_slice(&body).unwrap();
        assert_eq!(value.value, JsonValue::String("/live".into()));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (_dir, app) = router();
        let response = app
            .oneshot(Request::get("/nope.nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
