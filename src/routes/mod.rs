pub mod auth;
pub mod cache;
pub mod docs;
pub mod folders;
pub mod health;
pub mod profile;
pub mod quizzes;
pub mod tests;
