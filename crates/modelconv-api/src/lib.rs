//! # modelconv-api
//!
//! Thin axum layer over [`modelconv_pipeline::RequestOrchestrator`]:
//! multipart upload intake, artifact streaming, health endpoints, access-key
//! middleware and request logging.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
