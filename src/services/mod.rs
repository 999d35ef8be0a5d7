pub mod ai_service;
pub mod auth_service;
pub mod batch_service;
pub mod folder_service;
pub mod grading_service;
pub mod history_service;
pub mod query_cache;
pub mod retry_service;
