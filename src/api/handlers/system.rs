use anyhow::Context;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::{Shutdown, State, get, post};
use std::sync::Arc;

use crate::api::fairings::guards::nonce::GuardNonce;
use crate::api::{AppResult, GuardResult};
use crate::common::errors::CropError;
use crate::models::dto::{IssuedNonce, ResourceRequest, SnapshotRestored, SnapshotStatus};
use crate::models::entity::ResourceId;
use crate::supervisor::Notification;
use crate::service::CropService;

#[get("/get/nonce")]
pub async fn issue_nonce(service: &State<Arc<CropService>>) -> AppResult<Json<IssuedNonce>> {
    let nonce = service.issue_nonce().context("Failed to issue nonce")?;
    Ok(Json(nonce))
}

/// Supervisor notifications (resets, restored controls, refreshed images).
#[get("/get/notifications")]
pub async fn notifications(
    service: &State<Arc<CropService>>,
    mut shutdown: Shutdown,
) -> EventStream![] {
    let mut rx = service.supervisor().subscribe();
    EventStream! {
        loop {
            let notification: Notification = rocket::tokio::select! {
                received = rx.recv() => match received {
                    Ok(notification) => notification,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                },
                _ = &mut shutdown => break,
            };
            yield Event::json(&notification);
        }
    }
}

/// `ids` is a comma-separated list of resource ids.
#[get("/get/snapshot-status?<ids>")]
pub async fn snapshot_status(
    service: &State<Arc<CropService>>,
    ids: &str,
) -> AppResult<Json<Vec<SnapshotStatus>>> {
    let ids = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<ResourceId>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CropError::Validation(format!("invalid resource id: {err}")))?;
    Ok(Json(service.snapshot_status(&ids).await?))
}

#[post("/post/snapshot/restore", format = "json", data = "<request>")]
pub async fn restore_snapshot(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
    request: Json<ResourceRequest>,
) -> AppResult<Json<SnapshotRestored>> {
    let GuardNonce(token) = nonce?;
    let restored = service.snapshot_restore(&token, request.into_inner()).await?;
    Ok(Json(restored))
}
