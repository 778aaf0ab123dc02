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

use std::{collections::HashSet, fmt};

use darkfi_serial::{deserialize, serialize, SerialDecodable, SerialEncodable};
use log::{debug, trace};
use url::Url;

use super::{
    access_point::AccessPoint,
    peer_id::{PeerId, RouteId},
};
use crate::{Error, Result};

/// A route towards a destination peer.
///
/// `hops[0]` is the relay nearest to us and the last hop is the relay
/// nearest to the destination. Every hop must carry a peer id.
#[derive(Clone, Debug, Default, SerialEncodable, SerialDecodable)]
pub struct Route {
    destination: AccessPoint,
    hops: Vec<AccessPoint>,
}

impl Route {
    /// Create a direct route (no hops) to the given destination.
    pub fn new(destination: AccessPoint) -> Self {
        Self { destination, hops: vec![] }
    }

    /// Build a route to `destination` going through `hops`.
    ///
    /// If `first_hop` is given and it is not already the first hop of the
    /// route, a minimal access point carrying only that peer id is prepended.
    pub fn new_route(
        destination: Option<PeerId>,
        first_hop: Option<PeerId>,
        hops: Vec<AccessPoint>,
    ) -> Result<Self> {
        let Some(destination) = destination else { return Err(Error::RouteDestinationMissing) };
        Self::validate_hops(&hops)?;

        let mut route = Self { destination: AccessPoint::with_peer_id(destination), hops };

        if let Some(first_hop) = first_hop {
            if route.first_hop().and_then(|h| h.peer_id()) != Some(&first_hop) {
                route.hops.insert(0, AccessPoint::with_peer_id(first_hop));
            }
        }

        Ok(route)
    }

    fn validate_hops(hops: &[AccessPoint]) -> Result<()> {
        match hops.iter().position(|h| h.peer_id().is_none()) {
            Some(i) => Err(Error::IncompleteHop(i)),
            None => Ok(()),
        }
    }

    pub fn destination(&self) -> &AccessPoint {
        &self.destination
    }

    pub fn set_destination(&mut self, destination: AccessPoint) {
        self.destination = destination;
    }

    pub fn dest_peer_id(&self) -> Option<&PeerId> {
        self.destination.peer_id()
    }

    pub fn set_dest_peer_id(&mut self, peer_id: PeerId) {
        self.destination.set_peer_id(Some(peer_id));
    }

    pub fn dest_addresses(&self) -> &[Url] {
        self.destination.addresses()
    }

    pub fn add_dest_addresses(&mut self, addrs: &[Url]) {
        self.destination.add_all(addrs);
    }

    pub fn remove_dest_addresses(&mut self, addrs: &[Url]) {
        self.destination.remove_all(addrs);
    }

    /// Stable route identity. Routes with no destination peer id have no
    /// identity and this returns an error instead of a shared fallback.
    pub fn route_id(&self) -> Result<RouteId> {
        match self.dest_peer_id() {
            Some(pid) => Ok(RouteId::from_destination(pid)),
            None => Err(Error::RouteDestinationMissing),
        }
    }

    pub fn hops(&self) -> &[AccessPoint] {
        &self.hops
    }

    /// Replace all hops. Fails without modifying the route if any hop has
    /// no peer id.
    pub fn set_hops(&mut self, hops: Vec<AccessPoint>) -> Result<()> {
        Self::validate_hops(&hops)?;
        self.hops = hops;
        Ok(())
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// True if the route has no hops, i.e. it is direct.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn first_hop(&self) -> Option<&AccessPoint> {
        self.hops.first()
    }

    pub fn last_hop(&self) -> Option<&AccessPoint> {
        self.hops.last()
    }

    /// Replace the first hop, or insert it if the route has no hops.
    pub fn set_first_hop(&mut self, hop: AccessPoint) -> Result<()> {
        Self::validate_hops(std::slice::from_ref(&hop))?;
        match self.hops.first_mut() {
            Some(first) => *first = hop,
            None => self.hops.push(hop),
        }
        Ok(())
    }

    /// Replace the last hop, or insert it if the route has no hops.
    pub fn set_last_hop(&mut self, hop: AccessPoint) -> Result<()> {
        Self::validate_hops(std::slice::from_ref(&hop))?;
        match self.hops.last_mut() {
            Some(last) => *last = hop,
            None => self.hops.push(hop),
        }
        Ok(())
    }

    /// Append a hop at the destination end of the route.
    pub fn append_hop(&mut self, hop: AccessPoint) -> Result<()> {
        Self::validate_hops(std::slice::from_ref(&hop))?;
        self.hops.push(hop);
        Ok(())
    }

    /// Returns true if any peer id repeats among the hops.
    pub fn has_loop(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.hops.len());
        self.hops.iter().filter_map(|h| h.peer_id()).any(|pid| !seen.insert(*pid))
    }

    /// Find the hop that follows `current`.
    ///
    /// When `current` is not part of the route we hand back the first hop,
    /// so the caller forwards to the nearest relay.
    pub fn next_hop(&self, current: &PeerId) -> Option<&AccessPoint> {
        if self.hops.is_empty() {
            return None
        }

        match self.hops.iter().position(|h| h.peer_id() == Some(current)) {
            Some(i) => self.hops.get(i + 1),
            None => self.hops.first(),
        }
    }

    pub fn contains_hop(&self, pid: &PeerId) -> bool {
        self.hops.iter().any(|h| h.peer_id() == Some(pid))
    }

    /// Returns a copy of the hop for the given peer.
    pub fn get_hop(&self, pid: &PeerId) -> Option<AccessPoint> {
        self.hops.iter().find(|h| h.peer_id() == Some(pid)).map(|h| h.snapshot())
    }

    /// Remove every hop belonging to `pid`. Returns true if one was removed.
    pub fn remove_hop(&mut self, pid: &PeerId) -> bool {
        let before = self.hops.len();
        self.hops.retain(|h| h.peer_id() != Some(pid));
        before != self.hops.len()
    }

    /// Independent deep copy of this route.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Projection of this route carrying only peer ids: the destination and
    /// every hop lose their transport addresses.
    pub fn clone_only_peer_ids(&self) -> Self {
        Self {
            destination: self.destination.peer_id_only(),
            hops: self.hops.iter().map(|h| h.peer_id_only()).collect(),
        }
    }

    /// Alter `new_route` in place so that it starts with the hops of
    /// `first_leg`, making it usable from our vantage point through
    /// `first_leg`'s destination.
    ///
    /// Fails and leaves `new_route` untouched if it already contains a loop,
    /// or if `first_leg` has no destination peer id.
    pub fn stitch_route(
        new_route: &mut Route,
        first_leg: &Route,
        local_peer: Option<&PeerId>,
    ) -> Result<()> {
        if new_route.has_loop() {
            debug!(
                target: "route::stitch_route()",
                "Refusing to stitch looping route {}", new_route,
            );
            return Err(Error::RouteHasLoop)
        }

        let Some(junction) = first_leg.dest_peer_id() else {
            return Err(Error::RouteDestinationMissing)
        };

        if new_route.first_hop().and_then(|h| h.peer_id()) != Some(junction) {
            new_route.hops.insert(0, AccessPoint::with_peer_id(*junction));
        }

        let tail = std::mem::take(&mut new_route.hops);
        new_route.hops = first_leg.hops.iter().cloned().chain(tail).collect();

        Self::cleanup_loop(new_route, local_peer);

        trace!(target: "route::stitch_route()", "Stitched route: {}", new_route);
        Ok(())
    }

    /// Remove cycles from `route`.
    ///
    /// All hops but the last are reduced to their peer ids. Whenever a peer
    /// id shows up again, the detour between its first occurrence and the
    /// repeat is cut out. If `local_peer` is on the remaining route, every
    /// hop up to and including it is dropped. Only the last hop keeps its
    /// transport addresses.
    pub fn cleanup_loop(route: &mut Route, local_peer: Option<&PeerId>) {
        let Some(last) = route.hops.last().cloned() else { return };
        let n = route.hops.len();

        let mut clean: Vec<AccessPoint> = Vec::with_capacity(n);
        for (i, hop) in route.hops.iter().enumerate() {
            let hop = if i + 1 == n { hop.clone() } else { hop.peer_id_only() };

            match clean.iter().position(|h| h.peer_id() == hop.peer_id()) {
                Some(first) => clean.truncate(first + 1),
                None => clean.push(hop),
            }
        }

        if let Some(local) = local_peer {
            if let Some(pos) = clean.iter().position(|h| h.peer_id() == Some(local)) {
                clean.drain(..=pos);
            }
        }

        // The last hop may have collapsed onto an earlier, projected copy
        // of itself. Give it back its addresses.
        if let Some(tail) = clean.last_mut() {
            if tail.peer_id() == last.peer_id() {
                *tail = last;
            }
        }

        if clean.len() != n {
            debug!(
                target: "route::cleanup_loop()",
                "Route to {:?} shortened from {} to {} hops",
                route.dest_peer_id(), n, clean.len(),
            );
        }

        route.hops = clean;
    }

    /// Encode this route as a wire record.
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(self)
    }

    /// Decode a route from a wire record. Duplicate addresses are dropped
    /// and hops without a peer id are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut route: Route = match deserialize(bytes) {
            Ok(v) => v,
            Err(e) => return Err(Error::DecodeError(e.to_string())),
        };

        Self::validate_hops(&route.hops)?;
        route.destination.normalize();
        route.hops.iter_mut().for_each(|h| h.normalize());
        Ok(route)
    }
}

/// Routes are equal when their destinations and their hop sequences are.
impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination && self.hops == other.hops
    }
}

impl Eq for Route {}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.dest_peer_id() {
            Some(pid) => write!(f, "{}", pid)?,
            None => write!(f, "<unknown>")?,
        }

        let addrs: Vec<&str> = self.dest_addresses().iter().map(|a| a.as_str()).collect();
        if !addrs.is_empty() {
            write!(f, " [{}]", addrs.join(", "))?;
        }

        if !self.hops.is_empty() {
            let hops: Vec<String> = self
                .hops
                .iter()
                .map(|h| h.peer_id().map_or("<unknown>".to_string(), |p| p.to_string()))
                .collect();
            write!(f, " via {}", hops.join(" -> "))?;
        }

        Ok(())
    }
}
