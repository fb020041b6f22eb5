use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Public profile of a registered user.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub bio: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
}

/// A conversation with a fixed member set. Direct rooms have no name and
/// exactly two members.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Room {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: i64,
}

pub fn user_from_doc(doc: &Value) -> Option<User> {
    Some(User {
        id: doc.get("_id")?.as_str()?.to_owned(),
        name: doc.get("name")?.as_str()?.to_owned(),
        email: doc.get("email")?.as_str()?.to_owned(),
        avatar_url: doc.get("avatar_url").and_then(Value::as_str).map(str::to_owned),
        bio: doc
            .get("bio")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    })
}

pub fn room_from_doc(doc: &Value) -> Option<Room> {
    let kind = match doc.get("type")?.as_str()? {
        "direct" => RoomKind::Direct,
        "group" => RoomKind::Group,
        _ => return None,
    };
    Some(Room {
        id: doc.get("_id")?.as_str()?.to_owned(),
        name: doc.get("name").and_then(Value::as_str).map(str::to_owned),
        kind,
        members: string_vec(doc.get("members")),
        admins: string_vec(doc.get("admins")),
        updated_at: doc.get("updated_at").and_then(Value::as_i64).unwrap_or_default(),
    })
}

pub fn message_from_doc(doc: &Value) -> Option<StoredMessage> {
    Some(StoredMessage {
        id: doc.get("_id")?.as_str()?.to_owned(),
        room_id: doc.get("room_id")?.as_str()?.to_owned(),
        sender_id: doc.get("sender_id")?.as_str()?.to_owned(),
        content: doc.get("content")?.as_str()?.to_owned(),
        kind: doc
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("text")
            .to_owned(),
        created_at: doc.get("created_at").and_then(Value::as_i64).unwrap_or_default(),
    })
}

fn string_vec(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
