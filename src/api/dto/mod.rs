//! Data Transfer Objects for REST request/response serialization.

pub mod report_dto;

pub use report_dto::*;
