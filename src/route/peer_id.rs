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

use std::{fmt, str::FromStr};

use darkfi_serial::{SerialDecodable, SerialEncodable};
use rand::{rngs::OsRng, RngCore};

use crate::{Error, Result};

/// Identifier of a peer taking part in the overlay.
///
/// Peer ids are immutable value types. They are rendered and parsed as
/// base58 strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerialEncodable, SerialDecodable)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create a peer id from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a peer id from arbitrary data by hashing it with BLAKE3.
    pub fn derive(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Generate a random peer id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = match bs58::decode(s.trim()).into_vec() {
            Ok(v) => v,
            Err(_) => return Err(Error::PeerIdFromStr),
        };

        let bytes: [u8; 32] = match bytes.try_into() {
            Ok(v) => v,
            Err(_) => return Err(Error::PeerIdFromStr),
        };

        Ok(Self(bytes))
    }
}

/// Stable identity of a route, derived from its destination peer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RouteId(pub blake3::Hash);

impl RouteId {
    const DOMAIN: &'static [u8] = b"darkroute:route";

    pub(super) fn from_destination(pid: &PeerId) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(Self::DOMAIN);
        hasher.update(pid.as_bytes());
        Self(hasher.finalize())
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0.as_bytes()).into_string())
    }
}
