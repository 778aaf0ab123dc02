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

use std::{
    fmt,
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};
use rand::{rngs::OsRng, seq::SliceRandom};
use smol::lock::Mutex;
use url::Url;

use super::{
    acl::AccessControl,
    discovery::SeedDiscoveryPtr,
    loader::load_seeds,
    settings::SeedingSettings,
    RefreshGuard,
};
use crate::{
    route::{AccessPoint, Route},
    Error, Result,
};

/// Atomic pointer to a seeding manager
pub type SeedingManagerPtr = Arc<SeedingManager>;

/// Where seed routes come from on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSource {
    /// A seed list document
    Uri(Url),
    /// A discovery service name
    Discovery(String),
}

impl fmt::Display for SeedSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Uri(url) => write!(f, "{}", url),
            Self::Discovery(service) => write!(f, "discovery:{}", service),
        }
    }
}

struct SeedingState {
    permanent_seeds: Vec<Route>,
    sources: Vec<SeedSource>,
    active_seeds: Vec<Route>,
    next_refresh: Instant,
    consecutive_failures: u32,
}

/// Keeps the ranked list of seed routes a peer bootstraps from.
///
/// Seeds come from the configured sources, refreshed on a timer, followed
/// by the permanent seeds. Candidates are checked against the access list
/// and, in seeds-only mode, against the active seed addresses.
pub struct SeedingManager {
    settings: SeedingSettings,
    discovery: Option<SeedDiscoveryPtr>,
    acl: AccessControl,
    state: Mutex<SeedingState>,
    /// Set while a refresh is fetching sources
    refreshing: AtomicBool,
}

impl SeedingManager {
    pub fn new(settings: SeedingSettings, discovery: Option<SeedDiscoveryPtr>) -> SeedingManagerPtr {
        let permanent_seeds = settings
            .permanent_seeds
            .iter()
            .map(|addr| Route::new(AccessPoint::with_addresses(None, &[addr.clone()])))
            .collect();

        let mut sources: Vec<SeedSource> =
            settings.seed_uris.iter().cloned().map(SeedSource::Uri).collect();
        if let Some(ref service) = settings.discovery_service {
            sources.push(SeedSource::Discovery(service.clone()));
        }

        Arc::new(Self {
            acl: AccessControl::new(&settings),
            settings,
            discovery,
            state: Mutex::new(SeedingState {
                permanent_seeds,
                sources,
                active_seeds: vec![],
                next_refresh: Instant::now(),
                consecutive_failures: 0,
            }),
            refreshing: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &SeedingSettings {
        &self.settings
    }

    pub fn access_control(&self) -> &AccessControl {
        &self.acl
    }

    /// Ranked active seed routes, refreshed first if due.
    pub async fn active_seed_routes(&self) -> Vec<Route> {
        self.refresh_active_seeds().await;
        self.state.lock().await.active_seeds.clone()
    }

    /// Addresses of the active seeds, refreshed first if due.
    ///
    /// Addresses are taken in rounds: the first address of every route,
    /// then the second address of every route, and so on. Repeated
    /// addresses are returned once.
    pub async fn active_seed_uris(&self) -> Vec<Url> {
        let routes = self.active_seed_routes().await;
        interleave_addresses(&routes)
    }

    /// Reload the active seeds if the refresh time has come.
    ///
    /// Sources are loaded in random order without holding the state lock.
    /// Failing sources are logged and skipped. When every source fails the
    /// next attempt is backed off.
    pub async fn refresh_active_seeds(&self) {
        let (sources, mut permanent) = {
            let state = self.state.lock().await;
            if Instant::now() < state.next_refresh {
                return
            }
            (state.sources.clone(), state.permanent_seeds.clone())
        };

        let Some(_guard) = RefreshGuard::try_acquire(&self.refreshing) else {
            trace!(target: "seeding::manager::refresh_active_seeds()", "Refresh already running");
            return
        };

        let mut order = sources.clone();
        order.shuffle(&mut OsRng);

        let mut routes: Vec<Route> = vec![];
        let mut loaded = 0;

        for source in order {
            match self.load_source(&source).await {
                Ok(found) => {
                    loaded += 1;
                    debug!(
                        target: "seeding::manager::refresh_active_seeds()",
                        "Got {} seed route(s) from {}", found.len(), source,
                    );
                    for route in found {
                        if !routes.contains(&route) {
                            routes.push(route);
                        }
                    }
                }

                Err(e) => {
                    warn!(
                        target: "seeding::manager::refresh_active_seeds()",
                        "Failed loading seeds from {}: {}", source, e,
                    );
                }
            }
        }

        permanent.shuffle(&mut OsRng);
        for route in permanent {
            if !routes.contains(&route) {
                routes.push(route);
            }
        }

        let mut state = self.state.lock().await;
        let now = Instant::now();

        if !sources.is_empty() && loaded == 0 {
            state.consecutive_failures += 1;
            let backoff = self
                .min_refresh_interval()
                .saturating_mul(state.consecutive_failures)
                .min(self.refresh_interval());
            state.next_refresh = now + backoff;

            warn!(
                target: "seeding::manager::refresh_active_seeds()",
                "All {} seed source(s) failed ({} in a row), retrying in {}s",
                sources.len(), state.consecutive_failures, backoff.as_secs(),
            );
        } else {
            state.consecutive_failures = 0;
            state.next_refresh = now + self.refresh_interval();
        }

        // Seeds added while we were loading stay active.
        for route in state.permanent_seeds.iter() {
            if !routes.contains(route) {
                routes.push(route.clone());
            }
        }

        debug!(
            target: "seeding::manager::refresh_active_seeds()",
            "{} active seed route(s)", routes.len(),
        );
        state.active_seeds = routes;
    }

    async fn load_source(&self, source: &SeedSource) -> Result<Vec<Route>> {
        match source {
            SeedSource::Uri(url) => load_seeds(url, self.fetch_timeout()).await,
            SeedSource::Discovery(service) => match self.discovery {
                Some(ref discovery) => discovery.discover(service).await,
                None => Err(Error::DiscoveryFailed("no discovery service available".to_string())),
            },
        }
    }

    /// Whether a candidate peer may be used.
    ///
    /// In seeds-only mode the candidate must share a transport address with
    /// an active seed. This is a convenience filter, not authentication.
    /// The access list must then grant the candidate's peer id.
    pub async fn is_acceptable_peer(&self, route: &Route) -> bool {
        if self.settings.seeds_only {
            let seeds = self.active_seed_routes().await;
            let is_seed = route
                .dest_addresses()
                .iter()
                .any(|addr| seeds.iter().any(|seed| seed.destination().contains(addr)));

            if !is_seed {
                debug!(
                    target: "seeding::manager::is_acceptable_peer()",
                    "Rejecting {}: not a seed", route,
                );
                return false
            }
        }

        if !self.acl.is_allowed(route.dest_peer_id()).await {
            debug!(
                target: "seeding::manager::is_acceptable_peer()",
                "Rejecting {}: denied by access list", route,
            );
            return false
        }

        true
    }

    /// Add a seed that never expires. It is active right away.
    pub async fn add_permanent_seed(&self, route: Route) {
        let mut state = self.state.lock().await;
        if !state.permanent_seeds.contains(&route) {
            state.permanent_seeds.push(route.clone());
        }
        if !state.active_seeds.contains(&route) {
            state.active_seeds.push(route);
        }
    }

    pub async fn add_seed_uri(&self, url: Url) {
        self.add_seed_source(SeedSource::Uri(url)).await
    }

    /// Add a seed source. The next access triggers a refresh.
    pub async fn add_seed_source(&self, source: SeedSource) {
        let mut state = self.state.lock().await;
        if !state.sources.contains(&source) {
            debug!(target: "seeding::manager::add_seed_source()", "Adding seed source {}", source);
            state.sources.push(source);
            state.next_refresh = Instant::now();
        }
    }

    /// Make the next access reload the seeds.
    pub async fn force_refresh(&self) {
        self.state.lock().await.next_refresh = Instant::now();
    }

    /// Number of refreshes in a row where every source failed.
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    /// When the next refresh is due.
    pub async fn next_refresh(&self) -> Instant {
        self.state.lock().await.next_refresh
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.settings.refresh_interval)
    }

    fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.settings.min_refresh_interval)
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.fetch_timeout)
    }
}

/// Take addresses in rounds across routes, skipping repeats.
pub fn interleave_addresses(routes: &[Route]) -> Vec<Url> {
    let rounds = routes.iter().map(|r| r.dest_addresses().len()).max().unwrap_or(0);
    let mut addrs: Vec<Url> = vec![];

    for round in 0..rounds {
        for route in routes {
            if let Some(addr) = route.dest_addresses().get(round) {
                if !addrs.contains(addr) {
                    addrs.push(addr.clone());
                }
            }
        }
    }

    addrs
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, sync::atomic::Ordering};

    use smol::{net::TcpListener, Timer};
    use tempdir::TempDir;

    use super::*;
    use crate::{
        route::PeerId,
        seeding::{acl::AccessList, discovery::StaticDiscovery, loader::routes_to_json},
    };

    fn addr(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn seed(s: &str) -> Route {
        Route::new(AccessPoint::with_addresses(None, &[addr(s)]))
    }

    fn file_url(path: &Path) -> Url {
        Url::from_file_path(path).unwrap()
    }

    fn wait_time(next: Instant) -> Duration {
        next.saturating_duration_since(Instant::now())
    }

    #[test]
    fn sources_rank_before_permanent_seeds() {
        let dir = TempDir::new("darkroute").unwrap();
        let text = dir.path().join("a.txt");
        fs::write(&text, "tcp://10.0.0.1:1\ntcp://10.0.0.2:1\n").unwrap();

        let pid = PeerId::derive(b"json seed");
        let json = dir.path().join("b.json");
        let structured = Route::new(AccessPoint::with_addresses(Some(pid), &[addr("tcp://10.0.0.3:1")]));
        fs::write(&json, routes_to_json(true, &[structured.clone()]).stringify().unwrap()).unwrap();

        let settings = SeedingSettings {
            seed_uris: vec![file_url(&text), file_url(&json)],
            permanent_seeds: vec![addr("tcp://10.0.0.9:1"), addr("tcp://10.0.0.1:1")],
            ..Default::default()
        };
        let manager = SeedingManager::new(settings, None);

        let routes = smol::block_on(manager.active_seed_routes());
        assert_eq!(routes.len(), 4);
        assert!(routes[..3].contains(&structured));
        assert_eq!(routes[3], seed("tcp://10.0.0.9:1"));

        let first = routes.iter().position(|r| *r == seed("tcp://10.0.0.1:1")).unwrap();
        let second = routes.iter().position(|r| *r == seed("tcp://10.0.0.2:1")).unwrap();
        assert!(first < second);

        assert_eq!(smol::block_on(manager.consecutive_failures()), 0);
    }

    #[test]
    fn duplicate_routes_are_dropped() {
        let dir = TempDir::new("darkroute").unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "tcp://10.0.0.1:1\ntcp://10.0.0.1:1\n").unwrap();
        fs::write(&b, "tcp://10.0.0.1:1\ntcp://10.0.0.2:1\n").unwrap();

        let settings = SeedingSettings {
            seed_uris: vec![file_url(&a), file_url(&b)],
            permanent_seeds: vec![addr("tcp://10.0.0.2:1")],
            ..Default::default()
        };
        let manager = SeedingManager::new(settings, None);

        let routes = smol::block_on(manager.active_seed_routes());
        assert_eq!(routes.len(), 2);
        for (i, route) in routes.iter().enumerate() {
            assert!(!routes[i + 1..].contains(route));
        }
    }

    #[test]
    fn addresses_are_interleaved() {
        let r1 = Route::new(AccessPoint::with_addresses(
            None,
            &[addr("tcp://a:1"), addr("tcp://a:2"), addr("tcp://a:3")],
        ));
        let r2 = Route::new(AccessPoint::with_addresses(None, &[addr("tcp://b:1"), addr("tcp://a:2")]));
        let r3 = Route::new(AccessPoint::with_addresses(None, &[addr("tcp://c:1")]));

        let addrs = interleave_addresses(&[r1, r2, r3]);
        let expected: Vec<Url> =
            ["tcp://a:1", "tcp://b:1", "tcp://c:1", "tcp://a:2", "tcp://a:3"].map(addr).to_vec();
        assert_eq!(addrs, expected);
        assert!(interleave_addresses(&[]).is_empty());
    }

    #[test]
    fn failed_refreshes_back_off() {
        let dir = TempDir::new("darkroute").unwrap();
        let path = dir.path().join("seeds.txt");

        let settings = SeedingSettings {
            seed_uris: vec![file_url(&path)],
            permanent_seeds: vec![addr("tcp://10.0.0.9:1")],
            refresh_interval: 250,
            min_refresh_interval: 100,
            ..Default::default()
        };
        let manager = SeedingManager::new(settings, None);

        smol::block_on(async {
            // The permanent seeds are still served
            assert_eq!(manager.active_seed_routes().await, vec![seed("tcp://10.0.0.9:1")]);
            assert_eq!(manager.consecutive_failures().await, 1);
            let wait = wait_time(manager.next_refresh().await);
            assert!(wait > Duration::from_secs(90) && wait <= Duration::from_secs(100));

            manager.force_refresh().await;
            manager.refresh_active_seeds().await;
            assert_eq!(manager.consecutive_failures().await, 2);
            let wait = wait_time(manager.next_refresh().await);
            assert!(wait > Duration::from_secs(190) && wait <= Duration::from_secs(200));

            manager.force_refresh().await;
            manager.refresh_active_seeds().await;
            assert_eq!(manager.consecutive_failures().await, 3);
            let wait = wait_time(manager.next_refresh().await);
            assert!(wait > Duration::from_secs(240) && wait <= Duration::from_secs(250));

            fs::write(&path, "tcp://10.0.0.1:1\n").unwrap();
            manager.force_refresh().await;
            assert_eq!(manager.active_seed_routes().await.len(), 2);
            assert_eq!(manager.consecutive_failures().await, 0);
        });
    }

    #[test]
    fn refresh_waits_for_its_time() {
        let dir = TempDir::new("darkroute").unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "tcp://10.0.0.1:1\n").unwrap();

        let settings = SeedingSettings { seed_uris: vec![file_url(&path)], ..Default::default() };
        let manager = SeedingManager::new(settings, None);

        smol::block_on(async {
            assert_eq!(manager.active_seed_uris().await, vec![addr("tcp://10.0.0.1:1")]);

            fs::write(&path, "tcp://10.0.0.2:1\n").unwrap();
            assert_eq!(manager.active_seed_uris().await, vec![addr("tcp://10.0.0.1:1")]);

            manager.force_refresh().await;
            assert_eq!(manager.active_seed_uris().await, vec![addr("tcp://10.0.0.2:1")]);
        });
    }

    #[test]
    fn no_sources_is_not_a_failure() {
        let settings =
            SeedingSettings { permanent_seeds: vec![addr("tcp://10.0.0.9:1")], ..Default::default() };
        let manager = SeedingManager::new(settings, None);

        smol::block_on(async {
            assert_eq!(manager.active_seed_routes().await.len(), 1);
            assert_eq!(manager.consecutive_failures().await, 0);

            let extra = seed("tcp://10.0.0.8:1");
            manager.add_permanent_seed(extra.clone()).await;
            manager.add_permanent_seed(extra.clone()).await;
            assert_eq!(manager.active_seed_routes().await.len(), 2);

            manager.force_refresh().await;
            assert!(manager.active_seed_routes().await.contains(&extra));
        });
    }

    #[test]
    fn discovery_source() {
        let discovery = StaticDiscovery::new();
        let published = seed("tcp://10.0.0.5:1");

        let settings =
            SeedingSettings { discovery_service: Some("seeds".to_string()), ..Default::default() };
        let manager = SeedingManager::new(settings, Some(discovery.clone()));

        smol::block_on(async {
            // Nothing published yet
            assert!(manager.active_seed_routes().await.is_empty());
            assert_eq!(manager.consecutive_failures().await, 1);

            discovery.publish("seeds", vec![published.clone()]).await;
            manager.force_refresh().await;
            assert_eq!(manager.active_seed_routes().await, vec![published.clone()]);
            assert_eq!(manager.consecutive_failures().await, 0);

            discovery.withdraw("seeds").await;
            manager.force_refresh().await;
            assert!(manager.active_seed_routes().await.is_empty());
        });

        // A discovery source without a discovery service always fails
        let settings =
            SeedingSettings { discovery_service: Some("seeds".to_string()), ..Default::default() };
        let manager = SeedingManager::new(settings, None);
        smol::block_on(manager.refresh_active_seeds());
        assert_eq!(smol::block_on(manager.consecutive_failures()), 1);
    }

    #[test]
    fn added_source_triggers_refresh() {
        let dir = TempDir::new("darkroute").unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "tcp://10.0.0.1:1\n").unwrap();

        let manager = SeedingManager::new(SeedingSettings::default(), None);
        smol::block_on(async {
            assert!(manager.active_seed_uris().await.is_empty());

            manager.add_seed_uri(file_url(&path)).await;
            assert_eq!(manager.active_seed_uris().await, vec![addr("tcp://10.0.0.1:1")]);
        });
    }

    #[test]
    fn acceptable_peers() {
        let dir = TempDir::new("darkroute").unwrap();
        let allowed = PeerId::derive(b"allowed");
        let acl_path = dir.path().join("acl.json");
        fs::write(&acl_path, AccessList::with_peers([allowed]).to_json().stringify().unwrap())
            .unwrap();

        let settings = SeedingSettings {
            permanent_seeds: vec![addr("tcp://10.0.0.1:1")],
            seeds_only: true,
            acl_url: Some(file_url(&acl_path)),
            ..Default::default()
        };
        let manager = SeedingManager::new(settings, None);

        let candidate = |pid: PeerId, a: &str| {
            Route::new(AccessPoint::with_addresses(Some(pid), &[addr("tcp://10.9.9.9:1"), addr(a)]))
        };

        smol::block_on(async {
            assert!(manager.is_acceptable_peer(&candidate(allowed, "tcp://10.0.0.1:1")).await);
            assert!(!manager.is_acceptable_peer(&candidate(allowed, "tcp://10.0.0.2:1")).await);
            assert!(
                !manager.is_acceptable_peer(&candidate(PeerId::random(), "tcp://10.0.0.1:1")).await
            );
        });

        // Without seeds-only any address goes, the access list still applies
        let settings = SeedingSettings { acl_url: Some(file_url(&acl_path)), ..Default::default() };
        let manager = SeedingManager::new(settings, None);
        smol::block_on(async {
            assert!(manager.is_acceptable_peer(&candidate(allowed, "tcp://10.0.0.2:1")).await);
            assert!(
                !manager.is_acceptable_peer(&candidate(PeerId::random(), "tcp://10.0.0.2:1")).await
            );
        });
    }

    #[test]
    fn cancelled_refresh_does_not_block_later_ones() {
        let dir = TempDir::new("darkroute").unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "tcp://10.0.0.1:1\n").unwrap();

        smol::block_on(async {
            // Accepts connections through its backlog and never answers
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let settings = SeedingSettings {
                seed_uris: vec![addr(&format!("http://127.0.0.1:{}/seeds.txt", port))],
                fetch_timeout: 1,
                ..Default::default()
            };
            let manager = SeedingManager::new(settings, None);

            let finished = smol::future::or(
                async {
                    manager.active_seed_routes().await;
                    true
                },
                async {
                    Timer::after(Duration::from_millis(100)).await;
                    false
                },
            )
            .await;
            assert!(!finished);
            assert!(!manager.refreshing.load(Ordering::SeqCst));

            // The silent source times out, the new one is loaded
            manager.add_seed_uri(file_url(&path)).await;
            assert_eq!(manager.active_seed_routes().await, vec![seed("tcp://10.0.0.1:1")]);
            assert_eq!(manager.consecutive_failures().await, 0);
            drop(listener);
        });
    }
}
