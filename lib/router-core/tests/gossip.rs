use router_core::{
    AdvertType, EventType, MemoryRegistry, Node, Options, QueryOptions, Router, Service,
};
use std::sync::Arc;

fn service(name: &str, addresses: &[&str]) -> Service {
    Service::new(
        name,
        addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| Node::new(format!("{}-{}", name, i), *addr))
            .collect(),
    )
}

async fn router(id: &str, registry: Arc<MemoryRegistry>) -> Router {
    let router = Router::new(Options::new(registry).with_id(id)).unwrap();
    router.start().await.unwrap();
    router
}

#[tokio::test(start_paused = true)]
async fn test_routers_converge() {
    let registry_a = Arc::new(MemoryRegistry::new());
    registry_a
        .register(service("greeter", &["10.0.0.1:8080"]))
        .await
        .unwrap();
    let registry_b = Arc::new(MemoryRegistry::new());
    registry_b
        .register(service("billing", &["10.0.1.1:8080"]))
        .await
        .unwrap();

    let a = router("router-a", registry_a.clone()).await;
    let b = router("router-b", registry_b).await;

    let mut adverts_a = a.advertise().await.unwrap();
    let mut adverts_b = b.advertise().await.unwrap();

    let announce_a = adverts_a.recv().await.unwrap();
    assert_eq!(announce_a.advert_type, AdvertType::Announce);
    b.process(&announce_a).await.unwrap();

    let greeter = b.lookup(QueryOptions::new().service("greeter")).await.unwrap();
    assert_eq!(greeter.len(), 1);
    assert_eq!(greeter[0].router, "router-a");

    // b's announce was taken before it learned a's routes
    let announce_b = adverts_b.recv().await.unwrap();
    a.process(&announce_b).await.unwrap();
    assert_eq!(a.table().len().await, 2);

    // b now re-advertises a's route; a must not import its own route back
    let update_b = adverts_b.recv().await.unwrap();
    assert_eq!(update_b.advert_type, AdvertType::RouteUpdate);
    assert!(update_b
        .events
        .iter()
        .any(|e| e.route.router == "router-a"));

    let before = a.table().list().await.unwrap();
    a.process(&update_b).await.unwrap();
    assert_eq!(a.table().list().await.unwrap(), before);

    // a new node on a reaches b with the next tick
    registry_a
        .register(service("greeter", &["10.0.0.1:8080", "10.0.0.2:8080"]))
        .await
        .unwrap();

    let update_a = loop {
        let advert = adverts_a.recv().await.unwrap();
        if advert
            .events
            .iter()
            .any(|e| e.route.address == "10.0.0.2:8080")
        {
            break advert;
        }
    };
    b.process(&update_a).await.unwrap();

    let greeter = b.lookup(QueryOptions::new().service("greeter")).await.unwrap();
    assert_eq!(greeter.len(), 2);

    // removing the service on a removes it on b
    registry_a.deregister("greeter").await.unwrap();
    let update_a = loop {
        let advert = adverts_a.recv().await.unwrap();
        if advert.events.iter().any(|e| e.event_type == EventType::Delete) {
            break advert;
        }
    };
    b.process(&update_a).await.unwrap();
    assert!(b.lookup(QueryOptions::new().service("greeter")).await.is_err());

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}
