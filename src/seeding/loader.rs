/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{collections::HashMap, str::FromStr, time::Duration};

use log::{debug, warn};
use rand::{rngs::OsRng, seq::SliceRandom};
use tinyjson::JsonValue;
use url::Url;

use super::fetch::{fetch, Fetched};
use crate::{
    route::{AccessPoint, PeerId, Route},
    Error, Result,
};

/// Fetch the seed list at `url` and parse it into routes.
///
/// Structured (JSON) lists are shuffled unless they are marked `ordered`.
/// Plain text lists keep their order.
pub async fn load_seeds(url: &Url, timeout: Duration) -> Result<Vec<Route>> {
    let fetched = fetch(url, timeout).await?;
    let routes = parse_seeds(&fetched)?;

    debug!(
        target: "seeding::loader::load_seeds()",
        "Loaded {} seed route(s) from {}", routes.len(), url,
    );

    Ok(routes)
}

/// Parse a fetched seed list according to its content type.
pub fn parse_seeds(fetched: &Fetched) -> Result<Vec<Route>> {
    let Ok(text) = std::str::from_utf8(&fetched.body) else {
        return Err(Error::SeedParse("seed list is not valid UTF-8".to_string()))
    };

    let structured = fetched.content_type.as_deref().is_some_and(|t| t.ends_with("json"));
    if !structured {
        return Ok(parse_text_seeds(text))
    }

    let (ordered, mut routes) = parse_json_seeds(text)?;
    if !ordered {
        routes.shuffle(&mut OsRng);
    }

    Ok(routes)
}

/// One address per line. Blank lines and `#` comments are skipped, and so
/// are lines that don't parse as a URL.
pub fn parse_text_seeds(text: &str) -> Vec<Route> {
    let mut routes = vec![];

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue
        }

        match Url::parse(line) {
            Ok(addr) => routes.push(Route::new(AccessPoint::with_addresses(None, &[addr]))),
            Err(e) => {
                warn!(
                    target: "seeding::loader::parse_text_seeds()",
                    "Skipping malformed seed address on line {}: {} ({})", lineno + 1, line, e,
                );
            }
        }
    }

    routes
}

/// Parse a structured seed list:
///
/// ```text
/// {
///   "ordered": false,
///   "routes": [
///     {
///       "destination": { "peer_id": "<base58>", "addresses": ["tcp://..."] },
///       "hops": [ { "peer_id": "<base58>", "addresses": [] } ]
///     }
///   ]
/// }
/// ```
///
/// Returns whether the list is ordered, and its routes. Malformed route
/// entries are logged and skipped.
pub fn parse_json_seeds(text: &str) -> Result<(bool, Vec<Route>)> {
    let json: JsonValue = text.parse()?;

    let JsonValue::Object(root) = json else {
        return Err(Error::SeedParse("document root is not an object".to_string()))
    };

    let ordered = match root.get("ordered") {
        Some(JsonValue::Boolean(b)) => *b,
        None | Some(JsonValue::Null) => false,
        Some(_) => return Err(Error::SeedParse("\"ordered\" is not a boolean".to_string())),
    };

    let Some(JsonValue::Array(entries)) = root.get("routes") else {
        return Err(Error::SeedParse("missing \"routes\" array".to_string()))
    };

    let mut routes = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match route_from_json(entry) {
            Ok(route) => routes.push(route),
            Err(e) => {
                warn!(
                    target: "seeding::loader::parse_json_seeds()",
                    "Skipping malformed seed route #{}: {}", i, e,
                );
            }
        }
    }

    Ok((ordered, routes))
}

fn route_from_json(value: &JsonValue) -> Result<Route> {
    let JsonValue::Object(obj) = value else {
        return Err(Error::SeedParse("route is not an object".to_string()))
    };

    let Some(destination) = obj.get("destination") else {
        return Err(Error::SeedParse("route has no destination".to_string()))
    };
    let destination = access_point_from_json(destination)?;
    if destination.peer_id().is_none() && destination.is_empty() {
        return Err(Error::SeedParse("destination has neither peer id nor address".to_string()))
    }

    let hops = match obj.get("hops") {
        Some(JsonValue::Array(hops)) => {
            hops.iter().map(access_point_from_json).collect::<Result<Vec<_>>>()?
        }
        None | Some(JsonValue::Null) => vec![],
        Some(_) => return Err(Error::SeedParse("\"hops\" is not an array".to_string())),
    };

    let mut route = Route::new(destination);
    route.set_hops(hops)?;
    Ok(route)
}

fn access_point_from_json(value: &JsonValue) -> Result<AccessPoint> {
    let JsonValue::Object(obj) = value else {
        return Err(Error::SeedParse("access point is not an object".to_string()))
    };

    let peer_id = match obj.get("peer_id") {
        Some(JsonValue::String(s)) => Some(PeerId::from_str(s)?),
        None | Some(JsonValue::Null) => None,
        Some(_) => return Err(Error::SeedParse("\"peer_id\" is not a string".to_string())),
    };

    let addresses = match obj.get("addresses") {
        Some(JsonValue::Array(addrs)) => addresses_from_json(addrs)?,
        None | Some(JsonValue::Null) => vec![],
        Some(_) => return Err(Error::SeedParse("\"addresses\" is not an array".to_string())),
    };

    Ok(AccessPoint::with_addresses(peer_id, &addresses))
}

fn addresses_from_json(values: &[JsonValue]) -> Result<Vec<Url>> {
    let mut addrs = Vec::with_capacity(values.len());
    for value in values {
        let JsonValue::String(s) = value else {
            return Err(Error::SeedParse("address is not a string".to_string()))
        };
        addrs.push(Url::parse(s)?);
    }
    Ok(addrs)
}

/// Render routes as a structured seed list, the inverse of
/// [`parse_json_seeds`].
pub fn routes_to_json(ordered: bool, routes: &[Route]) -> JsonValue {
    let routes = routes
        .iter()
        .map(|route| {
            let hops = route.hops().iter().map(access_point_to_json).collect();
            JsonValue::Object(HashMap::from([
                ("destination".to_string(), access_point_to_json(route.destination())),
                ("hops".to_string(), JsonValue::Array(hops)),
            ]))
        })
        .collect();

    JsonValue::Object(HashMap::from([
        ("ordered".to_string(), JsonValue::Boolean(ordered)),
        ("routes".to_string(), JsonValue::Array(routes)),
    ]))
}

fn access_point_to_json(ap: &AccessPoint) -> JsonValue {
    let peer_id = match ap.peer_id() {
        Some(pid) => JsonValue::String(pid.to_string()),
        None => JsonValue::Null,
    };
    let addresses = ap.addresses().iter().map(|a| JsonValue::String(a.to_string())).collect();

    JsonValue::Object(HashMap::from([
        ("peer_id".to_string(), peer_id),
        ("addresses".to_string(), JsonValue::Array(addresses)),
    ]))
}
