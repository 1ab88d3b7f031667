//! Database services: all SQL for the pipeline lives here, behind small
//! per-entity APIs, so handlers and the worker never touch the schema
//! directly.

pub mod campaign_service;
pub mod template_service;
pub mod user_service;

pub use campaign_service::{CampaignService, CampaignServiceError, CampaignStore, MessageStats};
pub use template_service::TemplateService;
