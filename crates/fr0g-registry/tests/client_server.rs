//! The embedded registry client against the real registry HTTP surface:
//! the two halves of the discovery fabric speaking the same protocol.

use std::sync::Arc;

use fr0g_core::config::{RegistryClientConfig, SecurityConfig};
use fr0g_core::http::security::SecurityLayer;
use fr0g_core::registry::RegistryClient;
use fr0g_core::shutdown::ShutdownController;
use fr0g_core::types::{HealthStatus, ServiceRecord};

use fr0g_registry::config::HealthSettings;
use fr0g_registry::{Catalog, RegistryHttpServer};

async fn start_registry() -> (String, Arc<Catalog>, ShutdownController) {
    let catalog = Arc::new(Catalog::new(HealthSettings::default()));
    let controller = ShutdownController::new();
    let server = RegistryHttpServer::bind(
        "127.0.0.1:0",
        Arc::clone(&catalog),
        SecurityLayer::new(SecurityConfig::default()),
    )
    .await
    .unwrap();
    let url = format!("http://{}", server.local_addr());
    tokio::spawn(server.serve(controller.token()));
    (url, catalog, controller)
}

fn client(url: &str) -> RegistryClient {
    RegistryClient::new(RegistryClientConfig {
        registry_url: url.to_string(),
        ..RegistryClientConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn register_discover_deregister_round_trip() {
    let (url, _catalog, controller) = start_registry().await;
    let client = client(&url);

    let record = ServiceRecord::new("router-1", "fr0g-router", "10.0.0.5", 9102)
        .with_meta("zone", "a");
    client.register(&record).await.unwrap();

    let found = client.discover("fr0g-router").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "router-1");
    assert_eq!(found[0].meta["zone"], "a");
    assert_eq!(found[0].health, HealthStatus::Passing);

    let resolved = client.resolve("fr0g-router").await.unwrap();
    assert_eq!(resolved.endpoint(), "10.0.0.5:9102");

    client.deregister("router-1").await.unwrap();
    client.invalidate("fr0g-router");
    let err = client.resolve("fr0g-router").await.unwrap_err();
    assert!(err.is_transient());

    controller.trigger();
}

#[tokio::test]
async fn register_is_idempotent_over_the_wire() {
    let (url, catalog, controller) = start_registry().await;
    let client = client(&url);

    let record = ServiceRecord::new("a-1", "svc-a", "127.0.0.1", 9000);
    client.register(&record).await.unwrap();
    let first = catalog.get("a-1").unwrap();

    client.register(&record).await.unwrap();
    let second = catalog.get("a-1").unwrap();

    assert_eq!(catalog.len(), 1);
    assert_eq!(first.meta, second.meta);
    assert_eq!(first.health, second.health);
    assert!(second.last_seen >= first.last_seen);
    controller.trigger();
}

#[tokio::test]
async fn pushed_health_flows_back_through_discovery() {
    let (url, _catalog, controller) = start_registry().await;
    let client = client(&url);

    let record = ServiceRecord::new("b-1", "svc-b", "127.0.0.1", 9001);
    client.register(&record).await.unwrap();
    client
        .update_health("b-1", HealthStatus::Critical)
        .await
        .unwrap();

    // The cached passing answer is invalidated by the caller that observed
    // the failure; a fresh resolve must exclude the critical instance.
    client.invalidate("svc-b");
    let err = client.resolve("svc-b").await.unwrap_err();
    assert!(err.is_transient());

    client
        .update_health("b-1", HealthStatus::Warning)
        .await
        .unwrap();
    client.invalidate("svc-b");
    // Warning is still discoverable.
    let resolved = client.resolve("svc-b").await.unwrap();
    assert_eq!(resolved.id, "b-1");
    controller.trigger();
}

#[tokio::test]
async fn discovery_is_cached_until_invalidated() {
    let (url, catalog, controller) = start_registry().await;
    let client = client(&url);

    let record = ServiceRecord::new("c-1", "svc-c", "127.0.0.1", 9002);
    client.register(&record).await.unwrap();
    assert_eq!(client.discover("svc-c").await.unwrap().len(), 1);

    // Behind the cache, the record disappears; the client keeps answering
    // from the cache until told otherwise (and never longer than the TTL).
    catalog.deregister("c-1");
    assert_eq!(client.discover("svc-c").await.unwrap().len(), 1);

    client.invalidate("svc-c");
    assert!(client.discover("svc-c").await.unwrap().is_empty());
    controller.trigger();
}

#[tokio::test]
async fn heartbeat_task_registers_and_deregisters() {
    let (url, catalog, controller) = start_registry().await;
    let client = Arc::new(RegistryClient::new(RegistryClientConfig {
        registry_url: url,
        heartbeat_interval: 1,
        ..RegistryClientConfig::default()
    })
    .unwrap());

    let record = ServiceRecord::new("d-1", "svc-d", "127.0.0.1", 9003);
    let handle = client.spawn_heartbeat(record, controller.token());

    // The first tick fires immediately.
    for _ in 0..100 {
        if catalog.get("d-1").is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(catalog.get("d-1").is_some());

    controller.trigger();
    handle.await.unwrap();
    assert!(catalog.get("d-1").is_none());
}
