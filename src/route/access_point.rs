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

use darkfi_serial::{SerialDecodable, SerialEncodable};
use url::Url;

use super::peer_id::PeerId;

/// A peer id together with the ordered list of transport addresses it can
/// be reached at. Insertion order is preference order and an address is
/// never stored twice.
#[derive(Clone, Debug, Default, SerialEncodable, SerialDecodable)]
pub struct AccessPoint {
    peer_id: Option<PeerId>,
    addresses: Vec<Url>,
}

impl AccessPoint {
    /// Create an empty access point with no peer id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an access point for the given peer, with no addresses.
    pub fn with_peer_id(peer_id: PeerId) -> Self {
        Self { peer_id: Some(peer_id), addresses: vec![] }
    }

    /// Create an access point from a peer id and addresses. Duplicate
    /// addresses are dropped, keeping the first occurrence.
    pub fn with_addresses(peer_id: Option<PeerId>, addresses: &[Url]) -> Self {
        let mut ap = Self { peer_id, addresses: vec![] };
        ap.add_all(addresses);
        ap
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.peer_id.as_ref()
    }

    pub fn set_peer_id(&mut self, peer_id: Option<PeerId>) {
        self.peer_id = peer_id;
    }

    /// Addresses in preference order.
    pub fn addresses(&self) -> &[Url] {
        &self.addresses
    }

    /// Append an address unless it is already present.
    pub fn add(&mut self, addr: Url) {
        if !self.addresses.contains(&addr) {
            self.addresses.push(addr);
        }
    }

    pub fn add_all(&mut self, addrs: &[Url]) {
        for addr in addrs {
            self.add(addr.clone());
        }
    }

    /// Remove an address. Missing entries are ignored.
    pub fn remove(&mut self, addr: &Url) {
        self.addresses.retain(|a| a != addr);
    }

    pub fn remove_all(&mut self, addrs: &[Url]) {
        self.addresses.retain(|a| !addrs.contains(a));
    }

    pub fn clear(&mut self) {
        self.addresses.clear();
    }

    pub fn contains(&self, addr: &Url) -> bool {
        self.addresses.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Independent deep copy of this access point.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Copy carrying only the peer id, without transport addresses.
    pub fn peer_id_only(&self) -> Self {
        Self { peer_id: self.peer_id, addresses: vec![] }
    }

    /// Drop duplicate addresses that may have come in over the wire.
    pub(super) fn normalize(&mut self) {
        let addrs = std::mem::take(&mut self.addresses);
        for addr in addrs {
            self.add(addr);
        }
    }
}

/// Two access points are equal when their peer ids match and they carry
/// the same set of addresses. Address order is not significant.
impl PartialEq for AccessPoint {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id &&
            self.addresses.len() == other.addresses.len() &&
            self.addresses.iter().all(|a| other.addresses.contains(a))
    }
}

impl Eq for AccessPoint {}
