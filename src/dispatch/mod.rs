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

/// Fair-share dispatcher granting abstract items (connection or worker
/// slots) to client accounts under a reserved/extra pool policy, with
/// optional round-robin service of starved accounts.
pub mod dispatcher;

/// Wake-up signal used to park tasks waiting for an item.
pub mod signal;

pub use dispatcher::{AccountId, DispatcherConfig, ResourceAccount, ResourceDispatcher};
