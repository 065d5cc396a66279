use anyhow::anyhow;
use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};

use crate::api::GuardError;

pub const NONCE_HEADER: &str = "X-Crop-Nonce";

/// Raw anti-forgery token from the request. Only presence is checked here;
/// `CropService` verifies it before touching anything.
pub struct GuardNonce(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for GuardNonce {
    type Error = GuardError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one(NONCE_HEADER) {
            Some(token) if !token.is_empty() => Outcome::Success(GuardNonce(token.to_string())),
            _ => Outcome::Error((
                Status::Forbidden,
                anyhow!("Request is missing the {} header", NONCE_HEADER).into(),
            )),
        }
    }
}
