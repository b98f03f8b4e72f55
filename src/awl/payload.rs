//! Read-only views over the AWL login payload
//!
//! The login response is a nested, schema-light document describing
//! locations -> gateways -> zones. It is kept as raw `serde_json::Value`
//! and replaced wholesale on every (re)login; these accessors tolerate
//! absent or oddly shaped fields instead of presuming a fixed schema.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Immutable snapshot of one login payload
#[derive(Debug, Clone)]
pub struct LoginPayload(Arc<Value>);

/// Gateway summary derived from the login payload
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GatewayView {
    pub location: Option<String>,
    pub gwid: String,
    pub system_name: Option<String>,
}

/// Zone summary: one non-null `tstat_names` slot on a gateway
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ZoneView {
    pub location: Option<String>,
    pub gwid: String,
    pub system_name: Option<String>,
    pub zoneid: u32,
    pub zone_name: String,
}

impl LoginPayload {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Raw payload, for the `?raw` REST passthrough
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Look up a parameter on the gateway with the given `gwid`.
    ///
    /// Walks `locations[].gateways[]`; returns the first match.
    pub fn gateway_param(&self, gwid: &str, param: &str) -> Option<&Value> {
        for (_, gateway) in self.walk_gateways() {
            if gateway.get("gwid").and_then(Value::as_str) == Some(gwid) {
                return gateway.get(param);
            }
        }
        None
    }

    /// Configured `iz2_max_zones` for a gateway; absent or non-numeric
    /// means no zone expansion (0).
    pub fn max_zones(&self, gwid: &str) -> u32 {
        self.gateway_param(gwid, "iz2_max_zones")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(0)
    }

    /// Enumerate all gateways across all locations.
    pub fn gateways(&self) -> Vec<GatewayView> {
        let mut gateways = Vec::new();
        for (location, gateway) in self.walk_gateways() {
            let Some(gwid) = gateway.get("gwid").and_then(Value::as_str) else {
                error!("gateway entry without gwid in login payload");
                continue;
            };
            gateways.push(GatewayView {
                location: location
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                gwid: gwid.to_string(),
                system_name: gateway
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        gateways
    }

    /// Enumerate all zones: every non-null entry of each gateway's
    /// `tstat_names` map, keyed like `"z1"`, `"z2"`, ...
    pub fn zones(&self) -> Vec<ZoneView> {
        let mut zones = Vec::new();
        for (location, gateway) in self.walk_gateways() {
            let Some(gwid) = gateway.get("gwid").and_then(Value::as_str) else {
                error!("gateway entry without gwid in login payload");
                continue;
            };
            let Some(names) = gateway.get("tstat_names").and_then(Value::as_object) else {
                continue;
            };
            for (key, zone_name) in names {
                let Some(zone_name) = zone_name.as_str() else {
                    // Null name means the slot is unused
                    continue;
                };
                let Ok(zoneid) = key[1.min(key.len())..].parse::<u32>() else {
                    error!("couldn't parse zone key {:?} in login payload", key);
                    continue;
                };
                zones.push(ZoneView {
                    location: location
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    gwid: gwid.to_string(),
                    system_name: gateway
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    zoneid,
                    zone_name: zone_name.to_string(),
                });
            }
        }
        zones
    }

    fn walk_gateways(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.0
            .get("locations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .flat_map(|location| {
                location
                    .get("gateways")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .map(move |gateway| (location, gateway))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> LoginPayload {
        LoginPayload::new(json!({
            "success": true,
            "locations": [
                {
                    "description": "Home",
                    "gateways": [
                        {
                            "gwid": "GW1",
                            "description": "Main floor",
                            "iz2_max_zones": 2,
                            "tstat_names": {
                                "z1": "Living room",
                                "z2": "Bedroom",
                                "z3": null
                            }
                        },
                        {
                            "gwid": "GW2",
                            "tstat_names": {"z1": "Shop"}
                        }
                    ]
                },
                {
                    "description": "Cottage",
                    "gateways": [
                        {"gwid": "GW3"}
                    ]
                }
            ]
        }))
    }

    #[test]
    fn test_gateway_param_finds_first_match() {
        let payload = sample();
        assert_eq!(
            payload.gateway_param("GW1", "description").unwrap(),
            "Main floor"
        );
        assert!(payload.gateway_param("GW9", "description").is_none());
    }

    #[test]
    fn test_max_zones_defaults_to_zero() {
        let payload = sample();
        assert_eq!(payload.max_zones("GW1"), 2);
        assert_eq!(payload.max_zones("GW2"), 0); // field absent
        assert_eq!(payload.max_zones("GW9"), 0); // gateway absent
    }

    #[test]
    fn test_gateways_enumeration() {
        let gateways = sample().gateways();
        assert_eq!(gateways.len(), 3);
        assert_eq!(
            gateways[0],
            GatewayView {
                location: Some("Home".into()),
                gwid: "GW1".into(),
                system_name: Some("Main floor".into()),
            }
        );
        assert_eq!(gateways[2].gwid, "GW3");
        assert_eq!(gateways[2].system_name, None);
    }

    #[test]
    fn test_zones_skip_null_slots() {
        let zones = sample().zones();
        assert_eq!(zones.len(), 3);
        let z1 = &zones[0];
        assert_eq!(z1.gwid, "GW1");
        assert_eq!(z1.zoneid, 1);
        assert_eq!(z1.zone_name, "Living room");
        assert!(zones.iter().all(|z| z.zone_name != "z3"));
        assert_eq!(zones[2].gwid, "GW2");
    }

    #[test]
    fn test_degenerate_payload_shapes() {
        let empty = LoginPayload::new(json!({}));
        assert!(empty.gateways().is_empty());
        assert!(empty.zones().is_empty());
        assert_eq!(empty.max_zones("GW1"), 0);

        let weird = LoginPayload::new(json!({"locations": "nope"}));
        assert!(weird.gateways().is_empty());
    }

    #[test]
    fn test_unparseable_zone_key_is_skipped() {
        let payload = LoginPayload::new(json!({
            "locations": [{"gateways": [{
                "gwid": "GW1",
                "tstat_names": {"zone-one": "Den", "z2": "Loft"}
            }]}]
        }));
        let zones = payload.zones();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zoneid, 2);
    }
}
