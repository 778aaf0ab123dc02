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

use std::sync::atomic::{AtomicBool, Ordering};

/// Seeding settings and their TOML/CLI counterpart
pub mod settings;
pub use settings::{SeedingSettings, SeedingSettingsOpt};

/// Document retrieval from `file://` and `http://` locations
pub mod fetch;

/// Seed list parsing
pub mod loader;
pub use loader::load_seeds;

/// Seed discovery collaborator
pub mod discovery;
pub use discovery::{SeedDiscovery, SeedDiscoveryPtr, StaticDiscovery};

/// Access list and its periodic refresh
pub mod acl;
pub use acl::{AccessControl, AccessList};

/// Seed ranking, refresh and peer acceptance
pub mod manager;
pub use manager::{SeedSource, SeedingManager, SeedingManagerPtr};

/// Marks a refresh in progress. The flag is lowered when the guard is
/// dropped, including when the refreshing future is cancelled.
pub(crate) struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    /// Returns `None` if another refresh holds the flag.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return None
        }
        Some(Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
