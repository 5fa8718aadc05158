//! Types shared by every Missive crate: domain models, HTTP payloads and
//! the JWT claim set.

pub mod api;
pub mod models;
