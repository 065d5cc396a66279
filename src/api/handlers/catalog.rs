use anyhow::Context;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use std::sync::Arc;

use crate::api::AppResult;
use crate::models::dto::SelectionRequest;
use crate::models::entity::{Category, ResourceFilter, ResourcePage, SelectionItem};
use crate::service::CropService;

#[get("/get/categories")]
pub async fn categories(service: &State<Arc<CropService>>) -> AppResult<Json<Vec<Category>>> {
    let categories = service
        .catalog()
        .list_categories()
        .context("Failed to list categories")?;
    Ok(Json(categories))
}

#[get("/get/resources?<category>&<search>&<page>&<page_size>")]
pub async fn resources(
    service: &State<Arc<CropService>>,
    category: Option<String>,
    search: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
) -> AppResult<Json<ResourcePage>> {
    let filter = ResourceFilter {
        category,
        search_term: search,
    };
    let page = service
        .catalog()
        .list_resources(&filter, page.unwrap_or(1), page_size.unwrap_or(20))
        .context("Failed to list resources")?;
    Ok(Json(page))
}

#[post("/post/selection", format = "json", data = "<request>")]
pub async fn selection(
    service: &State<Arc<CropService>>,
    request: Json<SelectionRequest>,
) -> AppResult<Json<Vec<SelectionItem>>> {
    Ok(Json(service.select_resources(&request)?))
}
