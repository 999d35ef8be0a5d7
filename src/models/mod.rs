pub mod answer;
pub mod folder;
pub mod question;
pub mod test_history;
pub mod user;
