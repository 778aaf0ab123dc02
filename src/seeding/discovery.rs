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

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use log::debug;
use smol::lock::RwLock;

use crate::{route::Route, Error, Result};

/// Atomic pointer to a seed discovery implementation
pub type SeedDiscoveryPtr = Arc<dyn SeedDiscovery>;

/// A service able to find seed routes by service name, such as a
/// rendezvous or DHT lookup.
#[async_trait]
pub trait SeedDiscovery: Send + Sync {
    /// Return the routes currently published under `service`.
    async fn discover(&self, service: &str) -> Result<Vec<Route>>;
}

/// In-memory discovery table. Useful for local networks and tests where
/// seeds are published by the application itself.
#[derive(Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, Vec<Route>>>,
}

impl StaticDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish routes under a service name, replacing earlier ones.
    pub async fn publish(&self, service: &str, routes: Vec<Route>) {
        debug!(
            target: "seeding::discovery::publish()",
            "Publishing {} route(s) for \"{}\"", routes.len(), service,
        );
        self.services.write().await.insert(service.to_string(), routes);
    }

    pub async fn withdraw(&self, service: &str) {
        self.services.write().await.remove(service);
    }
}

#[async_trait]
impl SeedDiscovery for StaticDiscovery {
    async fn discover(&self, service: &str) -> Result<Vec<Route>> {
        match self.services.read().await.get(service) {
            Some(routes) => Ok(routes.clone()),
            None => Err(Error::DiscoveryFailed(format!("no routes published for \"{}\"", service))),
        }
    }
}
