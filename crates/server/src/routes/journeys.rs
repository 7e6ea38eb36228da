//! Journey reads and user checkpoint actions.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use journey_automation::AppliedTransition;
use journey_core::{Checkpoint, CheckpointId, Journey, JourneyError, JourneyId, PhaseId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// One entry of `GET /api/journeys`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    /// Template id
    pub id: JourneyId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Number of phases
    pub phases: usize,
    /// Number of checkpoints across phases
    pub checkpoints: usize,
}

/// `GET /api/journeys`
pub async fn list_templates(State(state): State<AppState>) -> Json<Vec<TemplateSummary>> {
    let summaries = state
        .tracker()
        .catalog()
        .iter()
        .map(|t| TemplateSummary {
            id: t.id.clone(),
            name: t.name.clone(),
            description: t.description.clone(),
            phases: t.phases.len(),
            checkpoints: t.phases.iter().map(|p| p.checkpoints.len()).sum(),
        })
        .collect();
    Json(summaries)
}

/// `GET /api/journeys/{journey_id}/users/{user_id}`
pub async fn get_journey(
    State(state): State<AppState>,
    Path((journey_id, user_id)): Path<(JourneyId, UserId)>,
) -> ApiResult<Json<Journey>> {
    let journey = state.tracker().load_journey(&user_id, &journey_id).await?;
    Ok(Json(journey))
}

/// `GET /api/journeys/{journey_id}/users/{user_id}/phases/{phase_id}/checkpoints/{checkpoint_id}`
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path((journey_id, user_id, phase_id, checkpoint_id)): Path<(
        JourneyId,
        UserId,
        PhaseId,
        CheckpointId,
    )>,
) -> ApiResult<Json<Checkpoint>> {
    let checkpoint = state
        .tracker()
        .find_checkpoint(&user_id, &journey_id, &phase_id, &checkpoint_id)
        .await?;
    Ok(Json(checkpoint))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressBody {
    completion_percentage: u8,
}

/// Response of a checkpoint action.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    /// Always true
    pub success: bool,
    /// The applied transition; `null` when the action changed nothing
    pub transition: Option<AppliedTransition>,
}

/// `POST /api/journeys/{journey_id}/users/{user_id}/checkpoints/{checkpoint_id}/{action}`
pub async fn checkpoint_action(
    State(state): State<AppState>,
    Path((journey_id, user_id, checkpoint_id, action)): Path<(
        JourneyId,
        UserId,
        CheckpointId,
        String,
    )>,
    body: Bytes,
) -> ApiResult<Json<ActionResponse>> {
    let engine = &state.engine;
    let transition = match action.as_str() {
        "start" => engine.start_checkpoint(&user_id, &journey_id, &checkpoint_id).await?,
        "progress" => {
            let body: ProgressBody = serde_json::from_slice(&body)
                .map_err(|e| ApiError::BadRequest(format!("invalid progress body: {}", e)))?;
            engine
                .update_checkpoint_progress(
                    &user_id,
                    &journey_id,
                    &checkpoint_id,
                    body.completion_percentage,
                )
                .await?
        }
        "review" => engine.submit_for_review(&user_id, &journey_id, &checkpoint_id).await?,
        "complete" => engine.complete_checkpoint(&user_id, &journey_id, &checkpoint_id).await?,
        "reset" => engine.reset_checkpoint(&user_id, &journey_id, &checkpoint_id).await?,
        other => {
            return Err(JourneyError::NotFound(format!("checkpoint action '{}'", other)).into())
        }
    };
    Ok(Json(ActionResponse {
        success: true,
        transition,
    }))
}
