use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};

use crate::{
    dto::quiz_dto::{GenerateQuizRequest, GenerateQuizResponse},
    error::Result,
    middleware::auth::AuthUser,
    models::{answer::UserAnswer, test_history::TestHistory},
    utils::{time::now, validation::validate},
    AppState,
};

/// Generates a quiz from extracted document text and stores it as a new,
/// not yet taken test.
#[axum::debug_handler]
pub async fn generate_quiz(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<GenerateQuizRequest>,
) -> Result<impl IntoResponse> {
    validate(&payload)?;
    let profile = state.auth_service.get_profile(&user.id).await?;
    state
        .history_service
        .check_monthly_quota(&user.id, profile.plan)
        .await?;
    if let Some(folder_id) = payload.folder_id.as_deref() {
        state.folder_service.get_folder(&user.id, folder_id).await?;
    }

    let quiz = state
        .ai_service
        .generate_quiz(&payload.text, payload.quiz_type, payload.question_count, profile.plan)
        .await?;

    let history = TestHistory {
        id: String::new(),
        user_id: user.id.clone(),
        test_name: payload.test_name,
        file_name: payload.file_name,
        file_type: payload.file_type,
        extracted_text: Some(payload.text),
        quiz_type: payload.quiz_type,
        user_answers: quiz.questions.iter().map(|q| UserAnswer::empty(&q.id)).collect(),
        questions: quiz.questions.clone(),
        score: None,
        folder_id: payload.folder_id,
        created_at: now(),
        completed_at: None,
    };
    let test_id = state.history_service.save_test_history(history).await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateQuizResponse {
            test_id,
            model: quiz.model,
            questions: quiz.questions,
        }),
    ))
}
