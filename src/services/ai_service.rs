use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::error::{classify_http_status, Error, ErrorKind, Result};
use crate::models::question::{AnswerValue, Question, QuestionKind, QuizType};
use crate::models::user::Plan;
use crate::services::retry_service::{with_retry, RetryPolicy};

/// Longest source text sent to the model, in characters.
pub const MAX_SOURCE_CHARS: usize = 12_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuiz {
    pub questions: Vec<Question>,
    pub model: String,
    pub requested: u32,
}

/// Chat model used for each plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTiers {
    pub free: String,
    pub student: String,
    pub pro: String,
}

impl Default for ModelTiers {
    fn default() -> Self {
        Self {
            free: Plan::Free.limits().model_tier.to_string(),
            student: Plan::Student.limits().model_tier.to_string(),
            pro: Plan::Pro.limits().model_tier.to_string(),
        }
    }
}

impl ModelTiers {
    pub fn for_plan(&self, plan: Plan) -> &str {
        match plan {
            Plan::Free => &self.free,
            Plan::Student => &self.student,
            Plan::Pro => &self.pro,
        }
    }
}

#[derive(Clone)]
pub struct AIService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    models: ModelTiers,
    retry: RetryPolicy,
}

impl AIService {
    pub fn new(api_key: Option<String>, base_url: String, client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            models: ModelTiers::default(),
            retry,
        }
    }

    pub fn with_models(mut self, models: ModelTiers) -> Self {
        self.models = models;
        self
    }

    pub fn with_retry_policy(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    /// Generates up to `count` questions from `text`. The count is capped by
    /// the plan, and the plan picks the model.
    pub async fn generate_quiz(
        &self,
        text: &str,
        quiz_type: QuizType,
        count: u32,
        plan: Plan,
    ) -> Result<GeneratedQuiz> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("text", "Source text is required"));
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(Error::backend(ErrorKind::Unavailable, "quiz generation is not configured"));
        };

        let limits = plan.limits();
        let model = self.models.for_plan(plan);
        let count = count.clamp(1, limits.max_questions);
        let source: String = text.chars().take(MAX_SOURCE_CHARS).collect();

        let system_prompt = format!(
            "You write study quizzes from course material. Return a JSON object with a \
             'questions' array of exactly {count} items. Allowed question types: {types}. \
             Each item has 'type', 'question', 'options' (MCQ, MSQ), 'correctAnswer' \
             (option index for MCQ, list of option indexes for MSQ, boolean for True/False, \
             the missing word for Fill in the blank, omitted for Essay) and a short \
             'explanation'. Vary the position of correct options.",
            count = count,
            types = allowed_types(quiz_type),
        );
        let payload = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": source}
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.7
        });

        let raw = with_retry("generateQuiz", &self.retry, || self.chat_openai(api_key, &payload)).await?;
        let questions = sanitize_questions(&raw, quiz_type, count as usize);
        if questions.is_empty() {
            return Err(Error::backend(ErrorKind::Internal, "model returned no usable questions"));
        }
        tracing::info!(
            model,
            requested = count,
            generated = questions.len(),
            "generated quiz"
        );

        Ok(GeneratedQuiz {
            questions,
            model: model.to_string(),
            requested: count,
        })
    }

    async fn chat_openai(&self, api_key: &str, payload: &JsonValue) -> Result<JsonValue> {
        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(payload)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Error::backend(
                classify_http_status(status.as_u16()),
                format!("OpenAI API error {}: {}", status, text),
            ));
        }

        let body: JsonValue = res.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| Error::backend(ErrorKind::Internal, "invalid OpenAI response format"))
    }
}

fn allowed_types(quiz_type: QuizType) -> String {
    match quiz_type {
        QuizType::Mixed => ["MCQ", "MSQ", "True/False", "Fill in the blank", "Essay"].join(", "),
        other => other.as_str().to_string(),
    }
}

/// Coerces raw model output into valid questions of the requested type. Items
/// that cannot be repaired are dropped; at most `limit` are kept.
pub fn sanitize_questions(raw: &JsonValue, quiz_type: QuizType, limit: usize) -> Vec<Question> {
    let items = raw
        .get("questions")
        .and_then(|a| a.as_array())
        .or_else(|| raw.as_array())
        .cloned()
        .unwrap_or_default();

    let mut rng = rand::thread_rng();
    let mut questions = Vec::new();
    for item in &items {
        let Some(mut q) = coerce_question(item, quiz_type, &mut rng) else {
            continue;
        };
        if !quiz_type.allows(q.kind) {
            continue;
        }
        q.id = format!("q{}", questions.len() + 1);
        questions.push(q);
        if questions.len() == limit {
            break;
        }
    }
    questions
}

fn parse_kind(raw: &str) -> Option<QuestionKind> {
    let key: String = raw
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match key.as_str() {
        "mcq" | "multiplechoice" => Some(QuestionKind::MultipleChoice),
        "msq" | "multipleselect" | "multipleanswer" => Some(QuestionKind::MultipleSelect),
        "truefalse" | "tf" | "boolean" => Some(QuestionKind::TrueFalse),
        "fillintheblank" | "fillblank" | "blank" => Some(QuestionKind::FillInTheBlank),
        "essay" | "shortanswer" | "openended" => Some(QuestionKind::Essay),
        _ => None,
    }
}

fn default_kind(quiz_type: QuizType) -> QuestionKind {
    match quiz_type {
        QuizType::MultipleChoice | QuizType::Mixed => QuestionKind::MultipleChoice,
        QuizType::FillInTheBlank => QuestionKind::FillInTheBlank,
        QuizType::Essay => QuestionKind::Essay,
        QuizType::TrueFalse => QuestionKind::TrueFalse,
        QuizType::MultipleSelect => QuestionKind::MultipleSelect,
    }
}

fn coerce_question(v: &JsonValue, quiz_type: QuizType, rng: &mut impl rand::Rng) -> Option<Question> {
    let kind = match v.get("type").and_then(|t| t.as_str()) {
        Some(t) => parse_kind(t)?,
        None => default_kind(quiz_type),
    };
    let prompt = v.get("question").and_then(|s| s.as_str())?.trim().to_string();
    if prompt.is_empty() {
        return None;
    }
    let explanation = v
        .get("explanation")
        .and_then(|s| s.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let correct = v.get("correctAnswer").or_else(|| v.get("correct_answer"));

    let (options, correct_answer) = match kind {
        QuestionKind::MultipleChoice => {
            let mut options = clean_options(v);
            if options.len() < 2 {
                return None;
            }
            let idx = option_index(correct, &options).unwrap_or(0);
            let correct_option = options[idx].clone();
            options.shuffle(rng);
            let idx = options.iter().position(|o| *o == correct_option).unwrap_or(0);
            (Some(options), Some(AnswerValue::Index(idx as u32)))
        }
        QuestionKind::MultipleSelect => {
            let options = clean_options(v);
            if options.len() < 2 {
                return None;
            }
            let mut indices: Vec<u32> = correct
                .and_then(|c| c.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|x| option_index(Some(x), &options))
                        .map(|i| i as u32)
                        .collect()
                })
                .unwrap_or_default();
            indices.sort_unstable();
            indices.dedup();
            if indices.is_empty() {
                return None;
            }
            (Some(options), Some(AnswerValue::Indices(indices)))
        }
        QuestionKind::TrueFalse => {
            let flag = match correct {
                Some(JsonValue::Bool(b)) => *b,
                Some(JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return None,
                },
                _ => return None,
            };
            (
                Some(vec!["True".to_string(), "False".to_string()]),
                Some(AnswerValue::Flag(flag)),
            )
        }
        QuestionKind::FillInTheBlank => {
            let text = correct.and_then(|c| c.as_str()).map(str::trim).filter(|s| !s.is_empty())?;
            (None, Some(AnswerValue::Text(text.to_string())))
        }
        QuestionKind::Essay => (None, None),
    };

    Some(Question {
        id: String::new(),
        kind,
        prompt,
        options,
        correct_answer,
        explanation,
        points: 1,
    })
}

fn clean_options(v: &JsonValue) -> Vec<String> {
    let mut options: Vec<String> = Vec::new();
    for opt in v.get("options").and_then(|o| o.as_array()).into_iter().flatten() {
        if let Some(s) = opt.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            if !options.iter().any(|o| o == s) {
                options.push(s.to_string());
            }
        }
    }
    options
}

/// Resolves an answer given either as an index or as the option text.
fn option_index(answer: Option<&JsonValue>, options: &[String]) -> Option<usize> {
    match answer? {
        JsonValue::Number(n) => n.as_u64().map(|i| i as usize).filter(|i| *i < options.len()),
        JsonValue::String(s) => options.iter().position(|o| o.eq_ignore_ascii_case(s.trim())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repairs_and_filters_model_output() {
        let raw = json!({"questions": [
            {"type": "MCQ", "question": "Capital of France?", "options": ["Paris", "Rome", "Paris", ""], "correctAnswer": 7},
            {"type": "MCQ", "question": "Only one option", "options": ["A"], "correctAnswer": 0},
            {"type": "True/False", "question": "Water is wet", "correctAnswer": "TRUE"},
            {"type": "MSQ", "question": "Even numbers", "options": ["1", "2", "4"], "correctAnswer": [2, 1, 9, 1]},
            {"type": "Fill in the blank", "question": "H2O is ____", "correctAnswer": "  water "},
            {"type": "Essay", "question": "Discuss entropy."},
            {"type": "Riddle", "question": "?"}
        ]});

        let questions = sanitize_questions(&raw, QuizType::Mixed, 10);
        assert_eq!(questions.len(), 5);
        assert_eq!(questions[0].options.as_ref().map(Vec::len), Some(2));
        assert_eq!(questions[1].correct_answer, Some(AnswerValue::Flag(true)));
        assert_eq!(questions[2].correct_answer, Some(AnswerValue::Indices(vec![1, 2])));
        assert_eq!(questions[3].correct_answer, Some(AnswerValue::Text("water".into())));
        assert_eq!(questions[4].kind, QuestionKind::Essay);
        assert!(questions.iter().all(|q| q.check_answer_shape().is_ok()));
        let ids: Vec<&str> = questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3", "q4", "q5"]);
    }

    #[test]
    fn keeps_the_correct_option_after_shuffle() {
        let raw = json!([{"question": "2+2", "options": ["3", "4", "5", "6"], "correctAnswer": "4"}]);
        for _ in 0..20 {
            let q = &sanitize_questions(&raw, QuizType::MultipleChoice, 1)[0];
            let Some(AnswerValue::Index(i)) = q.correct_answer else {
                panic!("expected an index answer");
            };
            assert_eq!(q.options.as_ref().unwrap()[i as usize], "4");
        }
    }

    #[test]
    fn drops_types_outside_the_quiz_and_caps_count() {
        let raw = json!({"questions": [
            {"type": "Essay", "question": "Why?"},
            {"type": "True/False", "question": "A", "correctAnswer": true},
            {"type": "True/False", "question": "B", "correctAnswer": false},
            {"type": "True/False", "question": "C", "correctAnswer": true}
        ]});
        let questions = sanitize_questions(&raw, QuizType::TrueFalse, 2);
        assert_eq!(questions.len(), 2);
        assert!(questions.iter().all(|q| q.kind == QuestionKind::TrueFalse));
    }

    #[tokio::test]
    async fn missing_key_or_text_fails_fast() {
        let svc = AIService::new(None, "http://localhost".into(), Client::new(), RetryPolicy::no_retry());
        let err = svc.generate_quiz("notes", QuizType::Mixed, 5, Plan::Free).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        let err = svc.generate_quiz("   ", QuizType::Mixed, 5, Plan::Free).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
