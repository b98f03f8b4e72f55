//! Gateway and zone endpoints
//!
//! Listings are derived by walking the login payload; per-gateway telemetry
//! goes through the timed read cache so REST traffic doesn't hammer the
//! vendor service.

use std::sync::Arc;

use hyper::StatusCode;
use serde_json::{Map, Value};

use super::{awl_error_response, error_response, json_response, RouteResponse};
use crate::server::AppState;

/// GET /gateways — gateway summaries, or the raw login payload with `?raw`
pub async fn list_gateways(state: &Arc<AppState>, raw: bool) -> RouteResponse {
    let payload = match state.login_payload().await {
        Ok(payload) => payload,
        Err(e) => return awl_error_response(&e),
    };
    if raw {
        return json_response(StatusCode::OK, payload.raw());
    }
    json_response(StatusCode::OK, &payload.gateways())
}

/// GET /zones — every zone on every gateway
pub async fn list_zones(state: &Arc<AppState>) -> RouteResponse {
    match state.login_payload().await {
        Ok(payload) => json_response(StatusCode::OK, &payload.zones()),
        Err(e) => awl_error_response(&e),
    }
}

/// GET /gateways/{gwid} — cached telemetry read, returned verbatim
pub async fn read_gateway(state: &Arc<AppState>, gwid: &str) -> RouteResponse {
    match state.read_gateway(gwid).await {
        Ok(data) => json_response(StatusCode::OK, &data),
        Err(e) => awl_error_response(&e),
    }
}

/// GET /gateways/{gwid}/zones — zones filtered by gateway; `*` matches all
pub async fn gateway_zones(state: &Arc<AppState>, gwid: &str) -> RouteResponse {
    let payload = match state.login_payload().await {
        Ok(payload) => payload,
        Err(e) => return awl_error_response(&e),
    };
    let zones: Vec<_> = payload
        .zones()
        .into_iter()
        .filter(|zone| gwid == "*" || zone.gwid == gwid)
        .collect();
    json_response(StatusCode::OK, &zones)
}

/// GET /gateways/{gwid}/zones/{zoneid} — exactly one zone, or 404/500
pub async fn gateway_zone(state: &Arc<AppState>, gwid: &str, zoneid: u32) -> RouteResponse {
    let payload = match state.login_payload().await {
        Ok(payload) => payload,
        Err(e) => return awl_error_response(&e),
    };
    let matches: Vec<_> = payload
        .zones()
        .into_iter()
        .filter(|zone| zone.gwid == gwid && zone.zoneid == zoneid)
        .collect();
    match matches.len() {
        0 => error_response(
            StatusCode::NOT_FOUND,
            &format!("the gateway {gwid} does not have a zone {zoneid}"),
        ),
        1 => json_response(StatusCode::OK, &matches[0]),
        _ => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "more than one zone matched the gateway/zone ID specified",
        ),
    }
}

/// GET /gateways/{gwid}/zones/{zoneid}/details — zone-scoped slice of a read
pub async fn zone_details(state: &Arc<AppState>, gwid: &str, zoneid: u32) -> RouteResponse {
    let data = match state.read_gateway(gwid).await {
        Ok(data) => data,
        Err(e) => return awl_error_response(&e),
    };
    match zone_slice(&data, zoneid) {
        Some(slice) => json_response(StatusCode::OK, &slice),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("the gateway {gwid} does not have a zone {zoneid}"),
        ),
    }
}

/// Select the `iz2_z{zoneid}_`-prefixed keys from a gateway read, hoist the
/// nested `…activesettings` object to the top level (sibling keys win), and
/// strip the prefix. `None` when the read carries no keys for that zone.
fn zone_slice(data: &Value, zoneid: u32) -> Option<Value> {
    let prefix = format!("iz2_z{zoneid}_");
    let mut zone_raw: Map<String, Value> = data
        .as_object()?
        .iter()
        .filter(|(key, _)| key.starts_with(&prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if zone_raw.is_empty() {
        return None;
    }

    let mut zone_data = Map::new();
    if let Some(Value::Object(active)) = zone_raw.remove(&format!("{prefix}activesettings")) {
        zone_data.extend(active);
    }
    // Stripped sibling keys overwrite anything activesettings brought in
    for (key, value) in zone_raw {
        zone_data.insert(key.replacen(&prefix, "", 1), value);
    }
    Some(Value::Object(zone_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zone_slice_hoists_activesettings_and_strips_prefix() {
        let data = json!({
            "tid": 3,
            "roomtemp": 70,
            "iz2_z1_roomtemp": 68,
            "iz2_z1_activesettings": {"heat_sp": 66, "cool_sp": 75},
            "iz2_z2_roomtemp": 71
        });
        let slice = zone_slice(&data, 1).unwrap();
        assert_eq!(slice["roomtemp"], 68);
        assert_eq!(slice["heat_sp"], 66);
        assert_eq!(slice["cool_sp"], 75);
        assert!(slice.get("iz2_z1_roomtemp").is_none());
        assert!(slice.get("iz2_z2_roomtemp").is_none());
        // The gateway-level roomtemp must not leak into the zone view
        assert_eq!(slice.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_zone_slice_sibling_keys_beat_activesettings() {
        let data = json!({
            "iz2_z1_roomtemp": 68,
            "iz2_z1_activesettings": {"roomtemp": 0}
        });
        let slice = zone_slice(&data, 1).unwrap();
        assert_eq!(slice["roomtemp"], 68);
    }

    #[test]
    fn test_zone_slice_unknown_zone_is_none() {
        let data = json!({"roomtemp": 70, "iz2_z1_roomtemp": 68});
        assert!(zone_slice(&data, 4).is_none());
        assert!(zone_slice(&json!("not an object"), 1).is_none());
    }
}
