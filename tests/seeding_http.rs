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

//! Seed lists and access lists served over HTTP by a local listener.

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::warn;
use smol::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    Executor,
};
use url::Url;

use darkroute::{
    route::{AccessPoint, PeerId, Route},
    seeding::{load_seeds, AccessList, SeedingManager, SeedingSettings},
    Error,
};

struct Document {
    content_type: &'static str,
    last_modified: Option<&'static str>,
    body: String,
}

type Documents = Arc<HashMap<&'static str, Document>>;

fn init_logger() {
    let mut cfg = simplelog::ConfigBuilder::new();
    cfg.add_filter_ignore("async_io".to_string());
    cfg.add_filter_ignore("polling".to_string());

    // We check this error so we can execute same file tests in parallel,
    // otherwise second one fails to init logger here.
    if simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        //simplelog::LevelFilter::Debug,
        cfg.build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .is_err()
    {
        warn!(target: "test::seeding_http", "Logger already initialized");
    }
}

async fn handle(mut stream: TcpStream, docs: Documents) -> std::io::Result<()> {
    let mut buf = vec![0u8; 4096];
    let mut len = 0;

    while !buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf[len..]).await?;
        if n == 0 || len + n == buf.len() {
            return Ok(())
        }
        len += n;
    }

    let mut headers = [httparse::EMPTY_HEADER; 16];
    let mut req = httparse::Request::new(&mut headers);
    let path = match req.parse(&buf[..len]) {
        Ok(httparse::Status::Complete(_)) => req.path.unwrap_or("/").to_string(),
        _ => return Ok(()),
    };

    let response = match docs.get(path.as_str()) {
        Some(doc) => {
            let last_modified = match doc.last_modified {
                Some(lm) => format!("Last-Modified: {}\r\n", lm),
                None => String::new(),
            };
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                doc.content_type,
                doc.body.len(),
                last_modified,
                doc.body,
            )
        }
        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

async fn serve(ex: Arc<Executor<'static>>, docs: Documents) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let ex_ = ex.clone();
    ex.spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            ex_.spawn(handle(stream, docs.clone())).detach();
        }
    })
    .detach();

    Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap()
}

fn seed(addr: &str) -> Route {
    Route::new(AccessPoint::with_addresses(None, &[Url::parse(addr).unwrap()]))
}

#[test]
fn seeding_over_http() {
    init_logger();

    let allowed = PeerId::derive(b"allowed");
    let json_seed = Route::new(AccessPoint::with_addresses(
        Some(allowed),
        &[Url::parse("tcp+tls://10.1.0.1:26661").unwrap()],
    ));

    let mut docs = HashMap::new();
    docs.insert(
        "/seeds.txt",
        Document {
            content_type: "text/plain; charset=utf-8",
            last_modified: None,
            body: "# public seeds\ntcp://10.0.0.1:26661\ntcp://10.0.0.2:26661\n".to_string(),
        },
    );
    docs.insert(
        "/seeds",
        Document {
            content_type: "application/json",
            last_modified: None,
            body: darkroute::seeding::loader::routes_to_json(true, &[json_seed.clone()])
                .stringify()
                .unwrap(),
        },
    );
    docs.insert(
        "/acl",
        Document {
            content_type: "application/json",
            last_modified: Some("Tue, 15 Nov 1994 08:12:31 GMT"),
            body: AccessList::with_peers([allowed]).to_json().stringify().unwrap(),
        },
    );
    let docs = Arc::new(docs);

    let ex = Arc::new(Executor::new());
    smol::block_on(ex.run(async {
        let base = serve(ex.clone(), docs).await;
        let timeout = Duration::from_secs(5);

        // Plain text list, detected from the Content-Type header
        let routes = load_seeds(&base.join("seeds.txt").unwrap(), timeout).await.unwrap();
        assert_eq!(routes, vec![seed("tcp://10.0.0.1:26661"), seed("tcp://10.0.0.2:26661")]);

        // Structured list without a file extension
        let routes = load_seeds(&base.join("seeds").unwrap(), timeout).await.unwrap();
        assert_eq!(routes, vec![json_seed.clone()]);

        assert!(matches!(
            load_seeds(&base.join("nope").unwrap(), timeout).await,
            Err(Error::HttpStatus(404))
        ));

        let settings = SeedingSettings {
            seed_uris: vec![
                base.join("seeds.txt").unwrap(),
                base.join("seeds").unwrap(),
                base.join("nope").unwrap(),
            ],
            seeds_only: true,
            acl_url: Some(base.join("acl").unwrap()),
            ..Default::default()
        };
        let manager = SeedingManager::new(settings, None);

        let routes = manager.active_seed_routes().await;
        assert_eq!(routes.len(), 3);
        assert_eq!(manager.consecutive_failures().await, 0);

        let uris = manager.active_seed_uris().await;
        assert_eq!(uris.len(), 3);

        // Seed address, peer granted by the access list
        assert!(manager.is_acceptable_peer(&json_seed).await);
        // Seed address, no peer id
        assert!(!manager.is_acceptable_peer(&seed("tcp://10.0.0.1:26661")).await);

        let acl = manager.access_control().access_list().await;
        assert_eq!(acl.last_modified().unwrap().timestamp(), 784887151);
    }));
}

#[test]
fn unreachable_seed_server() {
    init_logger();

    // Grab a free port and close it again
    let port = smol::block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    });
    let url = Url::parse(&format!("http://127.0.0.1:{}/seeds.txt", port)).unwrap();

    let result = smol::block_on(load_seeds(&url, Duration::from_secs(5)));
    assert!(matches!(result, Err(Error::ConnectFailed) | Err(Error::ConnectTimeout)));

    let settings = SeedingSettings {
        seed_uris: vec![url],
        permanent_seeds: vec![Url::parse("tcp://10.0.0.9:26661").unwrap()],
        ..Default::default()
    };
    let manager = SeedingManager::new(settings, None);
    smol::block_on(async {
        assert_eq!(manager.active_seed_routes().await, vec![seed("tcp://10.0.0.9:26661")]);
        assert_eq!(manager.consecutive_failures().await, 1);
    });
}
