use serde::Deserialize;
use serde_json::{Value, json};

use crate::pending::RoomWrite;
use crate::types::{Room, Temperature};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api-1.adax.no/client-api";

pub const TOKEN_PATH: &str = "/auth/token";
pub const CONTENT_PATH: &str = "/rest/v1/content/";
pub const CONTROL_PATH: &str = "/rest/v1/control/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoom {
    id: u64,
    #[serde(default)]
    home_id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    heating_enabled: bool,
    #[serde(default)]
    target_temperature: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
}

impl From<WireRoom> for Room {
    fn from(w: WireRoom) -> Self {
        Room {
            id: w.id,
            home_id: w.home_id,
            name: w.name,
            heating_enabled: w.heating_enabled,
            target_temperature: Temperature::from_hundredths(w.target_temperature.unwrap_or(0.0)),
            temperature: Temperature::from_hundredths(w.temperature.unwrap_or(0.0)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub fn token_form<'a>(account_id: &'a str, password: &'a str) -> [(&'static str, &'a str); 3] {
    [
        ("grant_type", "password"),
        ("username", account_id),
        ("password", password),
    ]
}

/// Extract `access_token` from a 200 token response.
pub fn parse_token_response(body: &str) -> Result<String> {
    let parsed: TokenResponse = serde_json::from_str(body)?;
    parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Protocol("token response without access_token".to_string()))
}

/// Parse the content endpoint body.
///
/// `Ok(None)` means "no update": empty or `null` bodies leave the cache alone.
/// Duplicate room ids keep the last occurrence at the first one's position.
pub fn parse_content(body: &str) -> Result<Option<Vec<Room>>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(body)?;
    if parsed.is_null() {
        return Ok(None);
    }
    let rooms = match parsed.get("rooms") {
        Some(Value::Array(rooms)) => rooms,
        Some(Value::Null) => return Ok(None),
        _ => return Err(Error::Protocol("content response without rooms".to_string())),
    };

    let mut out: Vec<Room> = Vec::with_capacity(rooms.len());
    for raw in rooms {
        let room: Room = WireRoom::deserialize(raw)?.into();
        match out.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => *existing = room,
            None => out.push(room),
        }
    }
    Ok(Some(out))
}

pub fn control_body(writes: &[RoomWrite]) -> Value {
    let rooms: Vec<Value> = writes
        .iter()
        .map(|w| {
            json!({
                "id": w.room_id,
                "heatingEnabled": w.heating_enabled,
                "targetTemperature": w.target_temperature.to_wire(),
            })
        })
        .collect();
    json!({ "rooms": rooms })
}
