pub mod fairings;
pub mod handlers;

use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde_json::json;
use std::io::Cursor;

use crate::common::errors::CropError;

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "error": outer_msg,
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError {
            status: Status::InternalServerError,
            error: err,
        }
    }
}

impl From<CropError> for AppError {
    fn from(err: CropError) -> Self {
        let status = match &err {
            CropError::Validation(_) => Status::BadRequest,
            CropError::InvalidToken(_) => Status::Forbidden,
            CropError::Busy | CropError::Cancelled => Status::Conflict,
            CropError::NotFound(_) => Status::NotFound,
            CropError::Tool(_) => Status::BadGateway,
            CropError::Timeout(_) => Status::GatewayTimeout,
            CropError::Io { .. } | CropError::Aborted(_) => Status::InternalServerError,
        };
        // Outer message is the operator-facing one; the chain keeps the cause.
        let message = err.user_message();
        AppError {
            status,
            error: anyhow::Error::new(err).context(message),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct GuardError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        AppError {
            status: err.status,
            error: err.error,
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        GuardError {
            status: Status::Forbidden,
            error: err,
        }
    }
}
