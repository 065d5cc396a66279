use rocket::State;
use rocket::post;
use rocket::serde::json::Json;
use std::sync::Arc;

use crate::api::fairings::guards::nonce::GuardNonce;
use crate::api::{AppResult, GuardResult};
use crate::models::dto::{
    PreviewCommitted, PreviewCreateRequest, PreviewCreated, PreviewDiscarded, ResourceRequest,
};
use crate::service::CropService;

#[post("/post/preview/create", format = "json", data = "<request>")]
pub async fn create_preview(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
    request: Json<PreviewCreateRequest>,
) -> AppResult<Json<PreviewCreated>> {
    let GuardNonce(token) = nonce?;
    let created = service.preview_create(&token, request.into_inner()).await?;
    Ok(Json(created))
}

#[post("/post/preview/commit", format = "json", data = "<request>")]
pub async fn commit_preview(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
    request: Json<ResourceRequest>,
) -> AppResult<Json<PreviewCommitted>> {
    let GuardNonce(token) = nonce?;
    let committed = service.preview_commit(&token, request.into_inner()).await?;
    Ok(Json(committed))
}

#[post("/post/preview/discard", format = "json", data = "<request>")]
pub async fn discard_preview(
    nonce: GuardResult<GuardNonce>,
    service: &State<Arc<CropService>>,
    request: Json<ResourceRequest>,
) -> AppResult<Json<PreviewDiscarded>> {
    let GuardNonce(token) = nonce?;
    let discarded = service.preview_discard(&token, request.into_inner()).await?;
    Ok(Json(discarded))
}
