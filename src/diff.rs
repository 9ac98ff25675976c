use serde_json::{Map, Value};

use crate::types::{Room, RoomEvent};

/// Temperatures closer than this are treated as unchanged (wire precision is 0.01).
const TEMP_EPSILON: f64 = 0.005;

pub(crate) type Change = (String, Value, Value);

/// Collect leaf-level changes between two JSON documents.
///
/// Objects recurse by key (`a.b`), arrays by index (`rooms[0]`). Keys that
/// disappear are reported with a `null` new value.
pub(crate) fn diff_json(previous: &Value, current: &Value, path: &str, changes: &mut Vec<Change>) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let child = join_key(path, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &child, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &child, changes);
                    }
                    None => changes.push((child, Value::Null, curr_val.clone())),
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push((join_key(path, key), prev_val.clone(), Value::Null));
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) => {
            let len = prev_arr.len().max(curr_arr.len());
            for i in 0..len {
                let child = format!("{path}[{i}]");
                match (prev_arr.get(i), curr_arr.get(i)) {
                    (Some(p), Some(c)) => diff_json(p, c, &child, changes),
                    (None, Some(c)) => changes.push((child, Value::Null, c.clone())),
                    (Some(p), None) => changes.push((child, p.clone(), Value::Null)),
                    (None, None) => {}
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Events describing how the room cache moves from `previous` to `current`.
pub(crate) fn diff_rooms(previous: &[Room], current: &[Room]) -> Vec<RoomEvent> {
    let mut events = Vec::new();

    for room in current {
        let Some(prev) = previous.iter().find(|r| r.id == room.id) else {
            events.push(RoomEvent::RoomAdded {
                room_id: room.id,
                name: room.name.clone(),
            });
            continue;
        };
        events.extend(diff_room(prev, room));
    }

    for prev in previous {
        if !current.iter().any(|r| r.id == prev.id) {
            events.push(RoomEvent::RoomRemoved {
                room_id: prev.id,
                name: prev.name.clone(),
            });
        }
    }

    events
}

pub(crate) fn diff_room(prev: &Room, room: &Room) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    if (prev.temperature.celsius() - room.temperature.celsius()).abs() > TEMP_EPSILON {
        events.push(RoomEvent::TemperatureChanged {
            room_id: room.id,
            name: room.name.clone(),
            temp: room.temperature,
        });
    }
    if (prev.target_temperature.celsius() - room.target_temperature.celsius()).abs() > TEMP_EPSILON
    {
        events.push(RoomEvent::TargetChanged {
            room_id: room.id,
            name: room.name.clone(),
            target: room.target_temperature,
        });
    }
    if prev.heating_enabled != room.heating_enabled {
        events.push(RoomEvent::HeatingChanged {
            room_id: room.id,
            name: room.name.clone(),
            enabled: room.heating_enabled,
        });
    }
    events
}
