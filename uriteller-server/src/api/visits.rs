// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Visit listings for the monitor page and its polling endpoint.

use serde::Serialize;
use serde_json::{Map, Value};
use uriteller_core::{Item, Visit};

use crate::api::{ApiError, AppState};

/// Body of `GET /{viewId}.json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitsResponse {
    pub trap_url: String,
    pub cursor: u64,
    pub visits: Vec<Value>,
}

/// Body of `GET /{viewId}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResponse {
    pub update_url: String,
    #[serde(flatten)]
    pub data: VisitsResponse,
}

/// Read the `cursor` query parameter.
///
/// Absent means 0. It must appear at most once and be a non-negative
/// integer.
pub fn parse_cursor(query: Option<&str>) -> Result<u64, ApiError> {
    let values: Vec<String> = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .filter(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
        .collect();

    match values.as_slice() {
        [] => Ok(0),
        [value] => value
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid cursor {:?}", value))),
        _ => Err(ApiError::BadRequest("cursor given more than once".into())),
    }
}

/// A stored visit as shown to the monitor: its info fields plus the
/// timestamp, with `protocol` defaulting to https.
pub fn visit_json(visit: &Visit) -> Value {
    let mut fields = match &visit.info {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };

    let has_protocol = fields
        .get("protocol")
        .and_then(Value::as_str)
        .map_or(false, |p| !p.is_empty());
    if !has_protocol {
        fields.insert("protocol".into(), Value::from("https"));
    }
    fields.insert("timestamp".into(), Value::from(visit.timestamp));
    Value::Object(fields)
}

/// Visits of the trap paired with `view`, from `cursor` on.
pub async fn visits_for(state: &AppState, view: &Item, cursor: u64) -> Result<VisitsResponse, ApiError> {
    let page = state.store.list(&view.other, cursor).await?;

    Ok(VisitsResponse {
        trap_url: state.url(&view.other),
        cursor: page.cursor,
        visits: page.visits.iter().map(visit_json).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cursor_parsing() {
        assert_eq!(parse_cursor(None).unwrap(), 0);
        assert_eq!(parse_cursor(Some("")).unwrap(), 0);
        assert_eq!(parse_cursor(Some("cursor=12")).unwrap(), 12);
        assert_eq!(parse_cursor(Some("other=x&cursor=3")).unwrap(), 3);

        for bad in ["cursor=-1", "cursor=abc", "cursor=", "cursor=1.5", "cursor=1&cursor=2"] {
            assert!(
                matches!(parse_cursor(Some(bad)), Err(ApiError::BadRequest(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_visit_shape() {
        let visit = Visit::new(
            7,
            json!({"ip": "192.0.2.1", "protocol": "http", "timestamp": "spoofed"}),
        );
        assert_eq!(
            visit_json(&visit),
            json!({"ip": "192.0.2.1", "protocol": "http", "timestamp": 7})
        );
    }

    #[test]
    fn test_protocol_defaults_to_https() {
        let visit = Visit::new(1, json!({"ip": "192.0.2.1"}));
        assert_eq!(visit_json(&visit)["protocol"], json!("https"));

        let visit = Visit::new(1, json!({"protocol": null}));
        assert_eq!(visit_json(&visit)["protocol"], json!("https"));

        let visit = Visit::new(1, Value::Null);
        assert_eq!(visit_json(&visit), json!({"protocol": "https", "timestamp": 1}));
    }
}
