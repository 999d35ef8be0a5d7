use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Student,
    Pro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsTier {
    Basic,
    Advanced,
    Premium,
}

/// What a plan entitles its user to. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub monthly_tests: Option<u32>,
    pub max_questions: u32,
    pub retakes: bool,
    pub max_folders: Option<u32>,
    pub ai_feedback: bool,
    pub analytics: AnalyticsTier,
    pub model_tier: &'static str,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Student => "student",
            Plan::Pro => "pro",
        }
    }

    pub fn limits(self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                monthly_tests: Some(3),
                max_questions: 10,
                retakes: false,
                max_folders: Some(0),
                ai_feedback: false,
                analytics: AnalyticsTier::Basic,
                model_tier: "gpt-3.5-turbo",
            },
            Plan::Student => PlanLimits {
                monthly_tests: Some(50),
                max_questions: 25,
                retakes: true,
                max_folders: Some(10),
                ai_feedback: true,
                analytics: AnalyticsTier::Advanced,
                model_tier: "gpt-4o-mini",
            },
            Plan::Pro => PlanLimits {
                monthly_tests: None,
                max_questions: 50,
                retakes: true,
                max_folders: None,
                ai_feedback: true,
                analytics: AnalyticsTier::Premium,
                model_tier: "gpt-4o",
            },
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "student" => Ok(Plan::Student),
            "pro" => Ok(Plan::Pro),
            other => Err(format!("unknown plan `{}`", other)),
        }
    }
}

/// Profile document stored at `users/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub disabled: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Login record stored at `credentials/{lowercased email}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub user_id: String,
    pub password_hash: String,
}
