use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    #[serde(rename = "MCQ")]
    MultipleChoice,
    #[serde(rename = "Fill in the blank")]
    FillInTheBlank,
    #[serde(rename = "Essay")]
    Essay,
    #[serde(rename = "True/False")]
    TrueFalse,
    #[serde(rename = "MSQ")]
    MultipleSelect,
}

/// Kind of quiz requested at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuizType {
    #[serde(rename = "MCQ")]
    MultipleChoice,
    #[serde(rename = "Fill in the blank")]
    FillInTheBlank,
    #[serde(rename = "Essay")]
    Essay,
    #[serde(rename = "True/False")]
    TrueFalse,
    #[serde(rename = "MSQ")]
    MultipleSelect,
    #[serde(rename = "Mixed")]
    Mixed,
}

impl QuizType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuizType::MultipleChoice => "MCQ",
            QuizType::FillInTheBlank => "Fill in the blank",
            QuizType::Essay => "Essay",
            QuizType::TrueFalse => "True/False",
            QuizType::MultipleSelect => "MSQ",
            QuizType::Mixed => "Mixed",
        }
    }

    pub fn allows(self, kind: QuestionKind) -> bool {
        match self {
            QuizType::Mixed => true,
            QuizType::MultipleChoice => kind == QuestionKind::MultipleChoice,
            QuizType::FillInTheBlank => kind == QuestionKind::FillInTheBlank,
            QuizType::Essay => kind == QuestionKind::Essay,
            QuizType::TrueFalse => kind == QuestionKind::TrueFalse,
            QuizType::MultipleSelect => kind == QuestionKind::MultipleSelect,
        }
    }
}

/// An answer value; its shape depends on the question kind: option index
/// (MCQ), text (fill in the blank, essay), boolean (true/false) or a list of
/// option indices (MSQ).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Index(u32),
    Indices(Vec<u32>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<AnswerValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

impl Question {
    fn option_count(&self) -> usize {
        self.options.as_ref().map(|o| o.len()).unwrap_or(0)
    }

    /// Checks that options and the correct answer fit the question kind.
    pub fn check_answer_shape(&self) -> std::result::Result<(), String> {
        match (self.kind, &self.correct_answer) {
            (QuestionKind::MultipleChoice, Some(AnswerValue::Index(i))) => {
                if self.option_count() < 2 {
                    Err("Multiple choice questions need at least two options".to_string())
                } else if (*i as usize) >= self.option_count() {
                    Err(format!("Correct option {} is out of range", i))
                } else {
                    Ok(())
                }
            }
            (QuestionKind::MultipleSelect, Some(AnswerValue::Indices(list))) => {
                if self.option_count() < 2 {
                    Err("Multiple select questions need at least two options".to_string())
                } else if list.is_empty() {
                    Err("Multiple select questions need at least one correct option".to_string())
                } else if list.iter().any(|i| (*i as usize) >= self.option_count()) {
                    Err("A correct option is out of range".to_string())
                } else {
                    Ok(())
                }
            }
            (QuestionKind::TrueFalse, Some(AnswerValue::Flag(_))) => Ok(()),
            (QuestionKind::FillInTheBlank, Some(AnswerValue::Text(t))) if !t.trim().is_empty() => {
                Ok(())
            }
            (QuestionKind::Essay, None | Some(AnswerValue::Text(_))) => Ok(()),
            (kind, _) => Err(format!("Correct answer does not fit a {:?} question", kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_each_answer_shape() {
        let q: Question = serde_json::from_value(json!({
            "id": "q1",
            "type": "MSQ",
            "question": "Pick primes",
            "options": ["2", "4", "5"],
            "correctAnswer": [0, 2]
        }))
        .unwrap();
        assert_eq!(q.kind, QuestionKind::MultipleSelect);
        assert_eq!(q.correct_answer, Some(AnswerValue::Indices(vec![0, 2])));
        assert_eq!(q.points, 1);
        assert!(q.check_answer_shape().is_ok());

        let tf: AnswerValue = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(tf, AnswerValue::Flag(true));
        let text: AnswerValue = serde_json::from_value(json!("mitochondria")).unwrap();
        assert_eq!(text, AnswerValue::Text("mitochondria".into()));
    }

    #[test]
    fn rejects_mismatched_answer() {
        let q = Question {
            id: "q1".into(),
            kind: QuestionKind::MultipleChoice,
            prompt: "2+2?".into(),
            options: Some(vec!["3".into(), "4".into()]),
            correct_answer: Some(AnswerValue::Index(5)),
            explanation: None,
            points: 1,
        };
        assert!(q.check_answer_shape().is_err());
        assert!(QuizType::Mixed.allows(QuestionKind::Essay));
        assert!(!QuizType::TrueFalse.allows(QuestionKind::Essay));
    }
}
