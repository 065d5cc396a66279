#[macro_use]
extern crate rocket;

pub mod api;
pub mod background;
pub mod catalog;
pub mod common;
pub mod config;
pub mod models;
pub mod service;
pub mod staging;
pub mod supervisor;
pub mod utils;
