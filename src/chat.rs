use serde_json::{json, Map, Value};

use crate::error::ChatError;
use crate::fanout::{self, Event, MessageEvent};
use crate::model::{self, Room, StoredMessage};
use crate::registry::RoomRegistry;
use crate::store::{Filter, Sort, Store};

/// Hard cap on a message page.
pub const MESSAGE_PAGE_MAX: usize = 200;

/// Create a direct room between two distinct users, or return the existing
/// one. Idempotent per unordered pair.
pub fn create_direct_room(store: &Store, user_a: &str, user_b: &str) -> Result<String, ChatError> {
    if user_a == user_b {
        return Err(ChatError::InvalidRequest("self_chat"));
    }
    let filter = Filter::and(vec![
        Filter::eq("type", "direct"),
        Filter::contains_all("members", vec![json!(user_a), json!(user_b)]),
    ]);
    if let Some(existing) = store.find_one("chatroom", &filter)? {
        if let Some(id) = existing.get("_id").and_then(Value::as_str) {
            return Ok(id.to_owned());
        }
    }
    let mut doc = Map::new();
    doc.insert("name".into(), Value::Null);
    doc.insert("type".into(), json!("direct"));
    doc.insert("members".into(), json!([user_a, user_b]));
    doc.insert("admins".into(), json!([]));
    Ok(store.create("chatroom", doc)?)
}

/// Create a group room. Admins default to empty.
pub fn create_group_room(
    store: &Store,
    name: &str,
    member_ids: &[String],
    admin_ids: &[String],
) -> Result<String, ChatError> {
    if member_ids.is_empty() {
        return Err(ChatError::InvalidRequest("members_required"));
    }
    let mut doc = Map::new();
    doc.insert("name".into(), json!(name));
    doc.insert("type".into(), json!("group"));
    doc.insert("members".into(), json!(member_ids));
    doc.insert("admins".into(), json!(admin_ids));
    Ok(store.create("chatroom", doc)?)
}

/// All rooms the user is a member of, most recently updated first.
pub fn list_rooms_for_user(store: &Store, user_id: &str) -> Result<Vec<Room>, ChatError> {
    let docs = store.find(
        "chatroom",
        &Filter::contains("members", user_id),
        Some(Sort::desc("updated_at")),
        None,
    )?;
    Ok(docs.iter().filter_map(model::room_from_doc).collect())
}

/// Persist a message in an existing room, then fan it out to the room's
/// live subscribers.
///
/// Fan-out is fire-and-forget: the new message id is returned regardless of
/// how many subscribers exist or whether any delivery lands. Persistence
/// failures abort before fan-out is attempted.
pub fn send_message(
    store: &Store,
    registry: &RoomRegistry,
    room_id: &str,
    sender_id: &str,
    content: &str,
) -> Result<String, ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::InvalidRequest("empty_message"));
    }
    store
        .find_one("chatroom", &Filter::eq("_id", room_id))?
        .ok_or(ChatError::NotFound("room_not_found"))?;

    let mut doc = Map::new();
    doc.insert("room_id".into(), json!(room_id));
    doc.insert("sender_id".into(), json!(sender_id));
    doc.insert("content".into(), json!(content));
    doc.insert("type".into(), json!("text"));
    let message_id = store.create("message", doc)?;

    // bump the room's last-activity marker
    store.update("chatroom", &Filter::eq("_id", room_id), Map::new())?;

    fanout::publish(
        registry,
        room_id,
        &Event::Message(MessageEvent {
            id: message_id.clone(),
            room_id: room_id.to_owned(),
            sender_id: sender_id.to_owned(),
            content: content.to_owned(),
        }),
    );
    Ok(message_id)
}

/// Up to `limit` (capped) most recent messages, oldest first.
pub fn list_messages(
    store: &Store,
    room_id: &str,
    limit: usize,
) -> Result<Vec<StoredMessage>, ChatError> {
    let docs = store.find(
        "message",
        &Filter::eq("room_id", room_id),
        Some(Sort::desc("created_at")),
        Some(limit.min(MESSAGE_PAGE_MAX)),
    )?;
    let mut messages: Vec<StoredMessage> =
        docs.iter().filter_map(model::message_from_doc).collect();
    messages.reverse();
    Ok(messages)
}
