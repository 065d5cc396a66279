use rocket::Route;

pub mod batch;
pub mod catalog;
pub mod preview;
pub mod system;

pub fn generate_preview_routes() -> Vec<Route> {
    routes![
        preview::create_preview,
        preview::commit_preview,
        preview::discard_preview
    ]
}

pub fn generate_batch_routes() -> Vec<Route> {
    routes![batch::run_batch, batch::reset, batch::leave]
}

pub fn generate_system_routes() -> Vec<Route> {
    routes![
        system::issue_nonce,
        system::notifications,
        system::snapshot_status,
        system::restore_snapshot
    ]
}

pub fn generate_catalog_routes() -> Vec<Route> {
    routes![catalog::categories, catalog::resources, catalog::selection]
}
