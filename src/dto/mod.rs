pub mod auth_dto;
pub mod folder_dto;
pub mod quiz_dto;
pub mod test_dto;
