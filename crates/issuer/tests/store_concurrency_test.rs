//! Uniqueness under concurrent requests

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use certkeeper::{
    CertificateRequest, CertificateService, CertificateStore, CertkeeperError, MemoryStore,
    StoreError,
};
use certkeeper_common::{Certificate, CertificateClass, CertificateId, ProfileId, UserId};

mod common;

use common::{StubAuthority, StubBehaviour};

fn certificate(name: &str, domain: &str) -> Certificate {
    Certificate {
        id: CertificateId::generate(),
        name: name.to_string(),
        description: None,
        created_by: UserId::new("admin"),
        class: CertificateClass::Production,
        domains: vec![domain.to_string()],
        dns_profile: ProfileId::new(7),
        disabled: false,
        created_at: Utc::now(),
        issued_at: None,
        expires_at: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_with_same_name() {
    let store = Arc::new(MemoryStore::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .insert(certificate("shared", &format!("host{}.example.com", i)))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(matches!(e, StoreError::NameConflict { .. })),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_with_same_domain() {
    let store = Arc::new(MemoryStore::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .insert(certificate(&format!("cert-{}", i), "shared.example.com"))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_creates_with_same_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let ssl_dir = tempfile::tempdir().unwrap();
    let config = common::config(ssl_dir.path(), vec![common::profile(7, &server.uri())]);
    let store = Arc::new(MemoryStore::with_profiles(config.profiles.clone()));
    let service = Arc::new(
        CertificateService::from_config(
            &config,
            store.clone(),
            store.clone(),
            StubAuthority::new(StubBehaviour::default()),
        )
        .unwrap(),
    );

    let request = |domain: &str| -> CertificateRequest {
        serde_json::from_value(json!({
            "name": "web-prod",
            "domain": domain,
            "profile": 7
        }))
        .unwrap()
    };
    let first = request("a.example.com");
    let second = request("b.example.com");
    let cancel = CancellationToken::new();
    let admin = common::admin();

    let (a, b) = tokio::join!(
        service.create(&admin, &first, &cancel),
        service.create(&admin, &second, &cancel),
    );

    let outcomes = [a.map(|_| ()), b.map(|_| ())];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(CertkeeperError::Store(StoreError::NameConflict { .. }))
            )
        })
        .count();

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(store.len(), 1);
    assert!(store.find_by_name("web-prod").await.unwrap().is_some());
}
