//! Canvas routes: creation and the optimistic-versioned update protocol.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use easel_store::{ids, Canvas, CanvasVersion, NewCanvas};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_CANVAS_NAME: &str = "Untitled canvas";
const MAX_CANVAS_NAME_LEN: usize = 100;

fn empty_graph() -> String {
  serde_json::json!({
    "nodes": [],
    "edges": [],
    "viewport": { "x": 0, "y": 0, "zoom": 1 }
  })
  .to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateCanvasBody {
  pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCanvasResponse {
  pub id: String,
  pub name: String,
  pub graph_json: String,
  pub version: i64,
}

pub async fn create_canvas(
  State(state): State<AppState>,
  body: Result<Option<Json<CreateCanvasBody>>, JsonRejection>,
) -> Result<Json<CreateCanvasResponse>, ApiError> {
  // The body is optional, but when one is sent it has to parse; a malformed
  // body gets the stable {code, message} shape, not a bare rejection.
  let body = body?.map(|Json(body)| body).unwrap_or_default();
  let name = match body.name {
    Some(name) => {
      if name.is_empty() || name.chars().count() > MAX_CANVAS_NAME_LEN {
        return Err(ApiError::Validation(format!(
          "name must be 1 to {MAX_CANVAS_NAME_LEN} characters"
        )));
      }
      name
    }
    None => DEFAULT_CANVAS_NAME.to_string(),
  };

  let now = ids::now();
  let row = state
    .store
    .create_canvas(&NewCanvas {
      id: ids::new_id(),
      name,
      graph_json: empty_graph(),
      created_at: now,
      updated_at: now,
    })
    .await?;

  Ok(Json(CreateCanvasResponse {
    id: row.id,
    name: row.name,
    graph_json: row.graph_json,
    version: row.version,
  }))
}

pub async fn get_canvas(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<Canvas>, ApiError> {
  let row = state
    .store
    .get_canvas(&id)
    .await?
    .ok_or(ApiError::CanvasNotFound)?;
  Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCanvasBody {
  pub graph_json: String,
  pub version: i64,
}

pub async fn update_canvas(
  State(state): State<AppState>,
  Path(id): Path<String>,
  body: Result<Json<UpdateCanvasBody>, JsonRejection>,
) -> Result<Json<CanvasVersion>, ApiError> {
  let Json(body) = body?;
  if body.version < 1 {
    return Err(ApiError::Validation(
      "version must be a positive integer".to_string(),
    ));
  }
  let updated = state
    .store
    .update_canvas(&id, &body.graph_json, body.version, ids::now())
    .await?;
  Ok(Json(updated))
}
