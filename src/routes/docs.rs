use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Path where the raw OpenAPI document is published.
pub const OPENAPI_JSON_PATH: &str = "/openapi.json";

/// Swagger UI at `/docs`, reading the room and leaderboard API description.
pub fn router() -> Router<SharedState> {
    SwaggerUi::new("/docs")
        .url(OPENAPI_JSON_PATH, ApiDoc::openapi())
        .into()
}
