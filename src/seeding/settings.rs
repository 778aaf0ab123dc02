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

use structopt::StructOpt;
use url::Url;

/// Seeding settings. The scope of this is a single [`SeedingManager`]
/// configured by the library user.
///
/// [`SeedingManager`]: super::manager::SeedingManager
#[derive(Debug, Clone)]
pub struct SeedingSettings {
    /// Locations of seed lists, loaded on every refresh
    pub seed_uris: Vec<Url>,
    /// Seed addresses that are always part of the active seeds
    pub permanent_seeds: Vec<Url>,
    /// Discovery service queried for seed routes, if any
    pub discovery_service: Option<String>,
    /// Only accept peers reachable through an active seed address
    pub seeds_only: bool,
    /// Location of the access list. Every peer is granted when unset.
    pub acl_url: Option<Url>,
    /// Time between seed refreshes (in seconds)
    pub refresh_interval: u64,
    /// Backoff step used when every seed source failed (in seconds)
    pub min_refresh_interval: u64,
    /// Time between access list refreshes (in seconds)
    pub acl_refresh_interval: u64,
    /// Time until the access list is retried after a failed fetch (in seconds)
    pub acl_failure_interval: u64,
    /// Seed list and access list fetch timeout (in seconds)
    pub fetch_timeout: u64,
}

impl Default for SeedingSettings {
    fn default() -> Self {
        Self {
            seed_uris: vec![],
            permanent_seeds: vec![],
            discovery_service: None,
            seeds_only: false,
            acl_url: None,
            refresh_interval: 1800,
            min_refresh_interval: 60,
            acl_refresh_interval: 600,
            acl_failure_interval: 60,
            fetch_timeout: 15,
        }
    }
}

// The following is used so we can have seeding settings configurable
// from TOML files.

/// Defines the seeding settings.
#[derive(Clone, Debug, serde::Deserialize, structopt::StructOpt, structopt_toml::StructOptToml)]
#[structopt()]
pub struct SeedingSettingsOpt {
    /// Seed list locations (file:// or http://)
    #[serde(default)]
    #[structopt(long = "seed-list")]
    pub seed_uris: Vec<Url>,

    /// Seed addresses that never expire
    #[serde(default)]
    #[structopt(long = "seed")]
    pub permanent_seeds: Vec<Url>,

    /// Discovery service name queried for seed routes
    #[structopt(long)]
    pub discovery_service: Option<String>,

    /// Only accept peers sharing an address with an active seed
    #[serde(default)]
    #[structopt(long)]
    pub seeds_only: bool,

    /// Access list location (file:// or http://)
    #[structopt(long = "acl")]
    pub acl_url: Option<Url>,

    /// Time between seed refreshes in seconds
    #[structopt(long)]
    pub refresh_interval: Option<u64>,

    /// Backoff step after failed seed refreshes in seconds
    #[structopt(skip)]
    pub min_refresh_interval: Option<u64>,

    /// Time between access list refreshes in seconds
    #[structopt(skip)]
    pub acl_refresh_interval: Option<u64>,

    /// Access list retry interval after a failed fetch in seconds
    #[structopt(skip)]
    pub acl_failure_interval: Option<u64>,

    /// Fetch timeout in seconds
    #[structopt(skip)]
    pub fetch_timeout: Option<u64>,
}

impl From<SeedingSettingsOpt> for SeedingSettings {
    fn from(opt: SeedingSettingsOpt) -> Self {
        let def = SeedingSettings::default();

        Self {
            seed_uris: opt.seed_uris,
            permanent_seeds: opt.permanent_seeds,
            discovery_service: opt.discovery_service,
            seeds_only: opt.seeds_only,
            acl_url: opt.acl_url,
            refresh_interval: opt.refresh_interval.unwrap_or(def.refresh_interval),
            min_refresh_interval: opt.min_refresh_interval.unwrap_or(def.min_refresh_interval),
            acl_refresh_interval: opt.acl_refresh_interval.unwrap_or(def.acl_refresh_interval),
            acl_failure_interval: opt.acl_failure_interval.unwrap_or(def.acl_failure_interval),
            fetch_timeout: opt.fetch_timeout.unwrap_or(def.fetch_timeout),
        }
    }
}
