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

/// Peer and route identifiers.
pub mod peer_id;

/// An access point is a peer id together with the ordered set of
/// transport addresses the peer is reachable at.
pub mod access_point;

/// Multi-hop routes towards a destination peer. Implements loop detection
/// and removal, stitching a known first leg in front of a route learned
/// from a relay, next-hop lookup and the wire record codec.
#[allow(clippy::module_inception)]
pub mod route;

pub use access_point::AccessPoint;
pub use peer_id::{PeerId, RouteId};
pub use route::Route;
