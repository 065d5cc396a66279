use rocket::fairing::AdHoc;
use rocket::http::Header;

use crate::common::PREVIEW_URL_PREFIX;

/// Library files and previews change bytes under a stable name, so browsers
/// must revalidate them. Clients still append `?v=` after a mutation.
pub fn cache_control_fairing(library_prefix: String) -> AdHoc {
    AdHoc::on_response("Cache-Control for mutable images", move |req, res| {
        let library_prefix = library_prefix.clone();
        Box::pin(async move {
            let path = req.uri().path().as_str();
            if path.starts_with(PREVIEW_URL_PREFIX) || path.starts_with(library_prefix.as_str()) {
                res.set_header(Header::new("Cache-Control", "no-cache"));
            }
        })
    })
}
