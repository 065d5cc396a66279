use rocket::State;
use rocket::post;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use std::sync::Arc;

use crate::api::fairings::guards::nonce::GuardNonce;
use crate::api::{AppResult, GuardResult};
use crate::models::dto::{BatchRunRequest, LeaveOutcome, ResetOutcome};
use crate::service::CropService;

/// Starts the batch and streams its progress as server-sent events. The
/// stream ends after the `finished` event. Closing it does not stop the
/// batch; `/post/batch/reset` does.
#[post("/post/batch/run", format = "json", data = "<request>")]
pub async fn run_batch(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
    request: Json<BatchRunRequest>,
) -> AppResult<EventStream![]> {
    let GuardNonce(token) = nonce?;
    let (mut events, _handle) = service.batch_run(&token, request.into_inner())?;
    Ok(EventStream! {
        while let Some(event) = events.recv().await {
            yield Event::json(&event).event(event.name());
        }
    })
}

#[post("/post/batch/reset")]
pub async fn reset(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
) -> AppResult<Json<ResetOutcome>> {
    let GuardNonce(token) = nonce?;
    Ok(Json(service.reset(&token)?))
}

#[post("/post/batch/leave")]
pub async fn leave(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
) -> AppResult<Json<LeaveOutcome>> {
    let GuardNonce(token) = nonce?;
    Ok(Json(service.leave(&token)?))
}
