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

//! Access list deciding which peers may be used. The list is a JSON
//! document `{"grant_all": bool, "peers": ["<base58 peer id>", ...]}`
//! fetched from a configured location and refreshed periodically.

use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::atomic::AtomicBool,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use smol::lock::RwLock;
use tinyjson::JsonValue;
use url::Url;

use super::{fetch::fetch, settings::SeedingSettings, RefreshGuard};
use crate::{route::PeerId, Error, Result};

/// Set of peers allowed to be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    grant_all: bool,
    allowed: HashSet<PeerId>,
    /// Modification time of the document this list was read from
    last_modified: Option<DateTime<Utc>>,
}

impl AccessList {
    /// A list granting every peer.
    pub fn grant_all() -> Self {
        Self { grant_all: true, ..Default::default() }
    }

    /// A list granting only the given peers.
    pub fn with_peers(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self { grant_all: false, allowed: peers.into_iter().collect(), last_modified: None }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let json: JsonValue = text.parse()?;
        let JsonValue::Object(root) = json else {
            return Err(Error::AccessListParse("document root is not an object".to_string()))
        };

        let grant_all = match root.get("grant_all") {
            Some(JsonValue::Boolean(b)) => *b,
            None | Some(JsonValue::Null) => false,
            Some(_) => {
                return Err(Error::AccessListParse("\"grant_all\" is not a boolean".to_string()))
            }
        };

        let mut allowed = HashSet::new();
        match root.get("peers") {
            Some(JsonValue::Array(peers)) => {
                for peer in peers {
                    let JsonValue::String(s) = peer else {
                        return Err(Error::AccessListParse("peer is not a string".to_string()))
                    };
                    allowed.insert(PeerId::from_str(s)?);
                }
            }
            None | Some(JsonValue::Null) => {}
            Some(_) => return Err(Error::AccessListParse("\"peers\" is not an array".to_string())),
        }

        Ok(Self { grant_all, allowed, last_modified: None })
    }

    pub fn to_json(&self) -> JsonValue {
        let mut peers: Vec<String> = self.allowed.iter().map(|p| p.to_string()).collect();
        peers.sort();

        JsonValue::Object(HashMap::from([
            ("grant_all".to_string(), JsonValue::Boolean(self.grant_all)),
            ("peers".to_string(), JsonValue::Array(peers.into_iter().map(JsonValue::String).collect())),
        ]))
    }

    /// Whether the peer may be used. Peers without an id are only granted
    /// by a grant-all list.
    pub fn is_allowed(&self, peer_id: Option<&PeerId>) -> bool {
        self.grant_all || peer_id.is_some_and(|p| self.allowed.contains(p))
    }

    pub fn is_grant_all(&self) -> bool {
        self.grant_all
    }

    pub fn set_grant_all(&mut self, grant_all: bool) {
        self.grant_all = grant_all;
    }

    pub fn allow(&mut self, peer_id: PeerId) {
        self.allowed.insert(peer_id);
    }

    pub fn disallow(&mut self, peer_id: &PeerId) {
        self.allowed.remove(peer_id);
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Whether a document modified at `modified` should replace this list.
    /// Documents without a modification time always do.
    fn is_older_than(&self, modified: Option<DateTime<Utc>>) -> bool {
        match (self.last_modified, modified) {
            (Some(ours), Some(theirs)) => theirs > ours,
            _ => true,
        }
    }
}

struct AclState {
    list: AccessList,
    next_refresh: Instant,
}

/// Access list kept up to date from its configured location.
///
/// Without a location every peer is granted. A failed fetch grants every
/// peer as well until a later fetch succeeds, which is retried after the
/// short failure interval.
pub struct AccessControl {
    url: Option<Url>,
    refresh_interval: Duration,
    failure_interval: Duration,
    fetch_timeout: Duration,
    state: RwLock<AclState>,
    refreshing: AtomicBool,
}

impl AccessControl {
    pub fn new(settings: &SeedingSettings) -> Self {
        Self {
            url: settings.acl_url.clone(),
            refresh_interval: Duration::from_secs(settings.acl_refresh_interval),
            failure_interval: Duration::from_secs(settings.acl_failure_interval),
            fetch_timeout: Duration::from_secs(settings.fetch_timeout),
            state: RwLock::new(AclState {
                list: AccessList::grant_all(),
                next_refresh: Instant::now(),
            }),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Refresh if due, then check the peer against the list.
    pub async fn is_allowed(&self, peer_id: Option<&PeerId>) -> bool {
        self.refresh().await;
        self.state.read().await.list.is_allowed(peer_id)
    }

    /// Snapshot of the list currently in force.
    pub async fn access_list(&self) -> AccessList {
        self.state.read().await.list.clone()
    }

    /// Make the next check fetch the list again.
    pub async fn force_refresh(&self) {
        self.state.write().await.next_refresh = Instant::now();
    }

    /// Fetch the list if the refresh interval has elapsed. The fetch happens
    /// without holding the state lock.
    pub async fn refresh(&self) {
        let Some(ref url) = self.url else { return };

        if Instant::now() < self.state.read().await.next_refresh {
            return
        }

        let Some(_guard) = RefreshGuard::try_acquire(&self.refreshing) else { return };

        let fetched = match fetch(url, self.fetch_timeout).await {
            Ok(f) => match std::str::from_utf8(&f.body) {
                Ok(text) => AccessList::from_json(text).map(|list| (list, f.last_modified)),
                Err(_) => Err(Error::AccessListParse("document is not valid UTF-8".to_string())),
            },
            Err(e) => Err(e),
        };

        let mut state = self.state.write().await;
        match fetched {
            Ok((mut list, modified)) => {
                if state.list.is_older_than(modified) {
                    debug!(
                        target: "seeding::acl::refresh()",
                        "Access list from {} updated: grant_all={} peers={}",
                        url, list.grant_all, list.len(),
                    );
                    list.last_modified = modified;
                    state.list = list;
                }
                state.next_refresh = Instant::now() + self.refresh_interval;
            }

            Err(e) => {
                warn!(
                    target: "seeding::acl::refresh()",
                    "Failed refreshing access list from {}: {}. Granting all peers.", url, e,
                );
                state.list = AccessList::grant_all();
                state.next_refresh = Instant::now() + self.failure_interval;
            }
        }
    }
}
