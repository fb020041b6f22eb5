use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::ChatError;
use crate::model::{self, User};
use crate::store::{Filter, Store};

/// Hard cap on user search results.
pub const SEARCH_MAX: usize = 50;

pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Register a new account. Emails are unique.
pub fn signup(store: &Store, name: &str, email: &str, password: &str) -> Result<String, ChatError> {
    if store.find_one("user", &Filter::eq("email", email))?.is_some() {
        return Err(ChatError::InvalidRequest("email_taken"));
    }
    let mut doc = Map::new();
    doc.insert("name".into(), json!(name));
    doc.insert("email".into(), json!(email));
    doc.insert("password_hash".into(), json!(hash_password(password)));
    doc.insert("avatar_url".into(), Value::Null);
    doc.insert("bio".into(), json!(""));
    doc.insert("is_active".into(), json!(true));
    Ok(store.create("user", doc)?)
}

/// Verify credentials. The session token is the user id.
pub fn login(store: &Store, email: &str, password: &str) -> Result<(String, User), ChatError> {
    let doc = store
        .find_one("user", &Filter::eq("email", email))?
        .ok_or(ChatError::Unauthorized("invalid_credentials"))?;
    let stored = doc
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if stored != hash_password(password) {
        return Err(ChatError::Unauthorized("invalid_credentials"));
    }
    let user = model::user_from_doc(&doc).ok_or(ChatError::Unauthorized("invalid_credentials"))?;
    Ok((user.id.clone(), user))
}

/// Case-insensitive substring search over names and emails.
pub fn search_users(store: &Store, query: &str, limit: usize) -> Result<Vec<User>, ChatError> {
    let filter = if query.is_empty() {
        Filter::All
    } else {
        Filter::any_like(&["name", "email"], query)
    };
    let docs = store.find("user", &filter, None, Some(limit.min(SEARCH_MAX)))?;
    Ok(docs.iter().filter_map(model::user_from_doc).collect())
}

pub fn get_user(store: &Store, user_id: &str) -> Result<User, ChatError> {
    let doc = store
        .find_one("user", &Filter::eq("_id", user_id))?
        .ok_or(ChatError::NotFound("user_not_found"))?;
    model::user_from_doc(&doc).ok_or(ChatError::NotFound("user_not_found"))
}

/// Apply a partial profile update. Returns false for an empty patch.
pub fn update_profile(
    store: &Store,
    user_id: &str,
    patch: Map<String, Value>,
) -> Result<bool, ChatError> {
    if patch.is_empty() {
        return Ok(false);
    }
    let modified = store.update("user", &Filter::eq("_id", user_id), patch)?;
    if modified == 0 {
        return Err(ChatError::NotFound("user_not_found"));
    }
    Ok(true)
}
