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

//! Peer route handling for P2P overlays: multi-hop routes with loop
//! detection and stitching, ranked seed selection filtered by an access
//! list, and a fair-share dispatcher bounding concurrent work across
//! peer sessions.

/// Error handling
pub mod error;
pub use error::{Error, Result};

/// Peer identifiers, access points and routes
pub mod route;

/// Fair-share resource dispatcher
pub mod dispatch;

/// Seed routes and access control
pub mod seeding;
