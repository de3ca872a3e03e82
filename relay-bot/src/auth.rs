//! Allow-list admission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_common::Result;

use crate::allowlist::AllowList;

/// Read-only view over the allow-list.
#[derive(Clone)]
pub struct AuthorizationGate {
    allow_list: Arc<dyn AllowList>,
}

impl AuthorizationGate {
    pub fn new(allow_list: Arc<dyn AllowList>) -> Self {
        Self { allow_list }
    }

    /// Whether `user_id` may use the relay right now.
    ///
    /// Unknown users are `Ok(false)`. Lookup failures are returned as errors.
    pub async fn check_valid(&self, user_id: i64) -> Result<bool> {
        self.check_valid_at(user_id, Utc::now()).await
    }

    pub async fn check_valid_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let entry = self.allow_list.find(user_id).await?;
        Ok(entry.is_some_and(|e| e.is_valid_at(now)))
    }

    /// Whether `user_id` holds a valid admin entry.
    pub async fn check_admin(&self, user_id: i64) -> Result<bool> {
        let entry = self.allow_list.find(user_id).await?;
        Ok(entry.is_some_and(|e| e.is_admin && e.is_valid_at(Utc::now())))
    }
}
