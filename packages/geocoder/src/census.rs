//! US Census Bureau geographies client.
//!
//! Resolves coordinates and one-line addresses to census tracts via the
//! Census Bureau's free geocoding service. No API key required.
//!
//! - Coordinates: `GET /geocoder/geographies/coordinates`
//! - Address: `GET /geocoder/geographies/onelineaddress`
//!
//! Both return a `geographies` object keyed by layer name; the tract is
//! `"Census Tracts"[0].GEOID`.
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use serde_json::Value;
use tract_match_geography_models::{RegionInfo, TractGeoid};

use crate::{AuthoritativeResolver, GeocodeError, service_registry::CensusService};

const TRACTS_LAYER: &str = "Census Tracts";
const COUNTIES_LAYER: &str = "Counties";
const STATES_LAYER: &str = "States";

/// Block layers are named after their decennial vintage
/// (`"2020 Census Blocks"`), so they are matched by suffix.
const BLOCKS_LAYER_SUFFIX: &str = "Census Blocks";

/// Census geographies API client.
#[derive(Debug, Clone)]
pub struct CensusGeocoder {
    client: reqwest::Client,
    service: CensusService,
}

impl CensusGeocoder {
    /// Builds a client for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn new(service: CensusService) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(service.user_agent.clone())
            .timeout(service.timeout())
            .build()?;
        Ok(Self { client, service })
    }

    /// The service configuration this client talks to.
    #[must_use]
    pub const fn service(&self) -> &CensusService {
        &self.service
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, GeocodeError> {
        let url = format!("{}/geographies/{endpoint}", self.service.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .query(&[
                ("benchmark", self.service.benchmark.as_str()),
                ("vintage", self.service.vintage.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }
        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| GeocodeError::Parse {
            message: format!("Invalid JSON from {endpoint}: {e}"),
        })
    }
}

#[async_trait]
impl AuthoritativeResolver for CensusGeocoder {
    async fn coordinates_to_region(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> Result<RegionInfo, GeocodeError> {
        let x = longitude.to_string();
        let y = latitude.to_string();
        let body = self
            .get_json("coordinates", &[("x", x.as_str()), ("y", y.as_str())])
            .await?;
        parse_coordinates_response(&body)
    }

    async fn address_to_region(
        &self,
        address: &str,
        locality_hint: Option<&str>,
    ) -> Result<RegionInfo, GeocodeError> {
        let query = with_locality(address, locality_hint);
        let body = self
            .get_json("onelineaddress", &[("address", query.as_str())])
            .await?;
        parse_address_response(&body, &query)
    }
}

/// Appends `locality_hint` to `address` unless the address already ends
/// with it as its last comma-separated part. A hint elsewhere in the
/// address (`"West Virginia Ave"`) is a street name, not a locality.
fn with_locality(address: &str, locality_hint: Option<&str>) -> String {
    let address = address.trim();
    let Some(hint) = locality_hint.map(str::trim).filter(|h| !h.is_empty()) else {
        return address.to_string();
    };
    let already_qualified = address
        .rsplit_once(',')
        .is_some_and(|(_, last)| last.trim().eq_ignore_ascii_case(hint));
    if already_qualified {
        address.to_string()
    } else {
        format!("{address}, {hint}")
    }
}

/// Parses the JSON response from the coordinates endpoint.
fn parse_coordinates_response(body: &Value) -> Result<RegionInfo, GeocodeError> {
    let geographies = &body["result"]["geographies"];
    if !geographies.is_object() {
        return Err(GeocodeError::Parse {
            message: "Missing geographies object".to_string(),
        });
    }
    parse_geographies(geographies)
}

/// Parses the JSON response from the one-line address endpoint.
fn parse_address_response(body: &Value, address: &str) -> Result<RegionInfo, GeocodeError> {
    let matches =
        body["result"]["addressMatches"]
            .as_array()
            .ok_or_else(|| GeocodeError::Parse {
                message: "Missing addressMatches array".to_string(),
            })?;

    let Some(first) = matches.first() else {
        return Err(GeocodeError::NoMatch {
            address: address.to_string(),
        });
    };

    parse_geographies(&first["geographies"])
}

/// Extracts the tract and its parents from a `geographies` object.
///
/// County and state fall back to the tract's GEOID prefixes when their
/// layers are absent.
fn parse_geographies(geographies: &Value) -> Result<RegionInfo, GeocodeError> {
    let raw = first_geoid(geographies, TRACTS_LAYER).ok_or(GeocodeError::EmptyResponse)?;
    let tract = TractGeoid::parse(raw).map_err(|e| GeocodeError::Parse {
        message: e.to_string(),
    })?;

    let county_id = first_geoid(geographies, COUNTIES_LAYER)
        .map_or_else(|| tract.county_geoid().to_string(), str::to_string);
    let state_id = first_geoid(geographies, STATES_LAYER)
        .map_or_else(|| tract.state_fips().to_string(), str::to_string);
    let block_id = geographies.as_object().and_then(|layers| {
        layers
            .iter()
            .find(|(name, _)| name.ends_with(BLOCKS_LAYER_SUFFIX))
            .and_then(|(_, layer)| layer[0]["GEOID"].as_str())
            .map(String::from)
    });

    Ok(RegionInfo {
        tract,
        county_id,
        state_id,
        block_id,
    })
}

fn first_geoid<'a>(geographies: &'a Value, layer: &str) -> Option<&'a str> {
    geographies[layer][0]["GEOID"]
        .as_str()
        .filter(|g| !g.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn coordinates_body() -> Value {
        json!({
            "result": {
                "input": {
                    "location": { "x": -77.0365, "y": 38.8977 },
                    "benchmark": { "benchmarkName": "Public_AR_Current" }
                },
                "geographies": {
                    "2020 Census Blocks": [{ "GEOID": "110010062021031", "BLOCK": "1031" }],
                    "States": [{ "GEOID": "11", "STUSAB": "DC" }],
                    "Counties": [{ "GEOID": "11001", "NAME": "District of Columbia" }],
                    "Census Tracts": [{ "GEOID": "11001006202", "TRACT": "006202" }]
                }
            }
        })
    }

    #[test]
    fn parses_coordinates_response() {
        let region = parse_coordinates_response(&coordinates_body()).unwrap();
        assert_eq!(region.tract.as_str(), "11001006202");
        assert_eq!(region.county_id, "11001");
        assert_eq!(region.state_id, "11");
        assert_eq!(region.block_id.as_deref(), Some("110010062021031"));
    }

    #[test]
    fn missing_parent_layers_fall_back_to_prefixes() {
        let body = json!({
            "result": {
                "geographies": {
                    "Census Tracts": [{ "GEOID": "48453001100" }]
                }
            }
        });
        let region = parse_coordinates_response(&body).unwrap();
        assert_eq!(region.county_id, "48453");
        assert_eq!(region.state_id, "48");
        assert_eq!(region.block_id, None);
    }

    #[test]
    fn missing_tract_is_empty_response() {
        // Points in open water come back with no tract layer entries
        let body = json!({
            "result": { "geographies": { "Census Tracts": [], "States": [] } }
        });
        assert!(matches!(
            parse_coordinates_response(&body),
            Err(GeocodeError::EmptyResponse)
        ));
    }

    #[test]
    fn malformed_responses_are_parse_errors() {
        assert!(matches!(
            parse_coordinates_response(&json!({ "errors": ["bad x"] })),
            Err(GeocodeError::Parse { .. })
        ));
        let block_group = json!({
            "result": { "geographies": { "Census Tracts": [{ "GEOID": "110010062021" }] } }
        });
        assert!(matches!(
            parse_coordinates_response(&block_group),
            Err(GeocodeError::Parse { .. })
        ));
    }

    #[test]
    fn parses_address_match() {
        let body = json!({
            "result": {
                "addressMatches": [{
                    "matchedAddress": "1600 PENNSYLVANIA AVE NW, WASHINGTON, DC, 20500",
                    "coordinates": { "x": -77.0365, "y": 38.8977 },
                    "geographies": coordinates_body()["result"]["geographies"].clone()
                }]
            }
        });
        let region = parse_address_response(&body, "1600 Pennsylvania Ave").unwrap();
        assert_eq!(region.tract.as_str(), "11001006202");
    }

    #[test]
    fn address_without_match_is_permanent() {
        let body = json!({ "result": { "addressMatches": [] } });
        let err = parse_address_response(&body, "nowhere").unwrap_err();
        assert!(matches!(err, GeocodeError::NoMatch { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn locality_hint_is_appended_once() {
        assert_eq!(
            with_locality(" 100 Congress Ave ", Some("Texas")),
            "100 Congress Ave, Texas"
        );
        assert_eq!(
            with_locality("100 Congress Ave, Austin, TEXAS", Some("Texas")),
            "100 Congress Ave, Austin, TEXAS"
        );
        assert_eq!(with_locality("100 Congress Ave", None), "100 Congress Ave");
        assert_eq!(with_locality("Texas", Some("Texas")), "Texas, Texas");
        assert_eq!(with_locality("100 Congress Ave", Some(" ")), "100 Congress Ave");
    }

    #[test]
    fn state_named_streets_still_get_the_state() {
        assert_eq!(
            with_locality("500 West Virginia Ave", Some("Virginia")),
            "500 West Virginia Ave, Virginia"
        );
        assert_eq!(
            with_locality("1200 Washington St", Some("Washington")),
            "1200 Washington St, Washington"
        );
        assert_eq!(
            with_locality("Texas Ave, Houston", Some("Texas")),
            "Texas Ave, Houston, Texas"
        );
        assert_eq!(
            with_locality("500 West Virginia Ave, virginia ", Some("Virginia")),
            "500 West Virginia Ave, virginia"
        );
    }
}
