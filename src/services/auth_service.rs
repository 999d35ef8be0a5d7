use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::store::TransactionFn;
use crate::database::{DocumentPath, DocumentStore, Filter, Query, WriteOp};
use crate::error::{Error, ErrorKind, Result};
use crate::models::user::{Credential, Plan, User};
use crate::services::query_cache::{CacheCategory, QueryCache, QueryOptions};
use crate::services::retry_service::{with_retry, RetryPolicy};
use crate::utils::crypto::{hash_password, verify_password};
use crate::utils::time::now;
use crate::utils::token::{generate_document_id, issue_token};
use crate::utils::validation::{sanitize_for_store, validate_email, validate_password, validate_user_id};

pub const USERS: &str = "users";
pub const CREDENTIALS: &str = "credentials";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn DocumentStore>,
    cache: QueryCache,
    retry: RetryPolicy,
    jwt_secret: String,
    token_ttl_hours: i64,
}

fn profile_pattern(user_id: &str) -> String {
    format!("{}?where=id==\"{}\"", USERS, user_id)
}

impl AuthService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: QueryCache,
        retry: RetryPolicy,
        jwt_secret: String,
        token_ttl_hours: i64,
    ) -> Self {
        Self {
            store,
            cache,
            retry,
            jwt_secret,
            token_ttl_hours,
        }
    }

    /// Same service with a different retry policy for subsequent calls.
    pub fn with_retry_policy(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<AuthSession> {
        validate_email(email)?;
        validate_password(password)?;
        let email = email.trim().to_lowercase();
        let password_hash = hash_password(password)?;

        let created = now();
        let user = User {
            id: generate_document_id(),
            email: email.clone(),
            display_name: display_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            plan: Plan::Free,
            disabled: false,
            created_at: created,
            updated_at: created,
        };
        let credential = Credential {
            user_id: user.id.clone(),
            password_hash,
        };
        let user_data = sanitize_for_store(&serde_json::to_value(&user)?);
        let credential_data = serde_json::to_value(&credential)?;
        let credential_path = DocumentPath::new(CREDENTIALS, &email);
        let user_path = DocumentPath::new(USERS, &user.id);

        with_retry("signUp", &self.retry, || {
            let reads = [credential_path.clone()];
            let writes = vec![
                WriteOp::set(credential_path.clone(), credential_data.clone()),
                WriteOp::set(user_path.clone(), user_data.clone()),
            ];
            let apply: TransactionFn = Box::new(move |snapshot| {
                if snapshot.first().map_or(false, Option::is_some) {
                    return Err(Error::backend(
                        ErrorKind::EmailAlreadyInUse,
                        "an account already uses this email",
                    ));
                }
                Ok(writes)
            });
            let store = self.store.clone();
            async move { store.transaction(&reads, apply).await }
        })
        .await?;

        tracing::info!(user_id = %user.id, "user signed up");
        let token = issue_token(&user.id, &self.jwt_secret, self.token_ttl_hours)?;
        Ok(AuthSession { token, user })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(Error::validation("password", "Password is required"));
        }
        let email = email.trim().to_lowercase();
        let credential_path = DocumentPath::new(CREDENTIALS, &email);

        let credential: Credential = with_retry("signIn", &self.retry, || {
            self.store.get(&credential_path)
        })
        .await?
        .ok_or_else(|| Error::backend(ErrorKind::UserNotFound, "no account for this email"))?
        .into_model()?;

        if !verify_password(password, &credential.password_hash)? {
            tracing::info!(user_id = %credential.user_id, "sign-in with wrong password");
            return Err(Error::backend(ErrorKind::WrongPassword, "password does not match"));
        }

        let user = self.get_profile(&credential.user_id).await?;
        if user.disabled {
            return Err(Error::backend(ErrorKind::UserDisabled, "account is disabled"));
        }
        let token = issue_token(&user.id, &self.jwt_secret, self.token_ttl_hours)?;
        Ok(AuthSession { token, user })
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<User> {
        validate_user_id(user_id)?;
        let query = Query::collection(USERS)
            .filter(Filter::eq("id", user_id))
            .limit(1);
        let outcome = with_retry("getUserProfile", &self.retry, || {
            self.cache
                .execute_query(QueryOptions::new(query.clone(), CacheCategory::Profile))
        })
        .await?;
        outcome
            .documents
            .first()
            .cloned()
            .ok_or_else(|| Error::backend(ErrorKind::UserNotFound, format!("no profile for `{}`", user_id)))?
            .into_model()
    }

    pub async fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<User> {
        let name = display_name.trim();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(Error::validation("displayName", "Display name must be 1 to 100 characters"));
        }
        self.update_profile(user_id, json!({ "displayName": name }), "updateUserProfile")
            .await
    }

    pub async fn change_plan(&self, user_id: &str, plan: Plan) -> Result<User> {
        let user = self
            .update_profile(user_id, json!({ "plan": plan }), "changePlan")
            .await?;
        tracing::info!(user_id, plan = plan.as_str(), "plan changed");
        Ok(user)
    }

    async fn update_profile(&self, user_id: &str, mut patch: serde_json::Value, label: &str) -> Result<User> {
        validate_user_id(user_id)?;
        patch["updatedAt"] = json!(now().timestamp_millis());
        let path = DocumentPath::new(USERS, user_id);
        let writes = [WriteOp::update(path, patch)];

        with_retry(label, &self.retry, || self.store.commit(&writes))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::backend(ErrorKind::UserNotFound, format!("no profile for `{}`", user_id)),
                _ => e,
            })?;
        self.cache.invalidate_cache(&profile_pattern(user_id));
        self.get_profile(user_id).await
    }
}
