#![cfg(feature = "config")]

use std::sync::Arc;
use turnstile::config::{LimiterConfig, MethodConfig};
use turnstile::limiter::Admission;
use turnstile::store::InMemoryCounterStore;

const CONFIG: &str = r#"{
    "rules": [
        { "name": "login", "algorithm": "FixedWindow",
          "permit_limit": 2, "interval_in_seconds": 300 },
        { "name": "inflight", "algorithm": "Semaphore",
          "permit_limit": 50, "ignore_allow_list": true }
    ],
    "allow_list": ["10.0.0.1"]
}"#;

#[test]
fn config_describes_rules_in_order() {
    let config = LimiterConfig::from_json(CONFIG).unwrap();
    assert_eq!(config.rules.len(), 2);
    assert_eq!(config.rules[0].name.as_deref(), Some("login"));
    assert!(matches!(
        config.rules[1].method,
        MethodConfig::Semaphore { timeout_in_seconds: 100, .. }
    ));
    assert_eq!(config.allow_list, vec!["10.0.0.1".to_string()]);
}

#[tokio::test]
async fn configured_limiter_enforces_rules() {
    let limiter = LimiterConfig::from_json(CONFIG)
        .unwrap()
        .into_limiter(Arc::new(InMemoryCounterStore::new()))
        .unwrap();

    for _ in 0..2 {
        limiter.check("mallory", 1, &()).await.unwrap().into_permit().unwrap().release(&()).await;
    }
    match limiter.check("mallory", 1, &()).await.unwrap() {
        Admission::Rejected { rule, .. } => assert_eq!(rule, "login"),
        Admission::Admitted(_) => panic!("third login in the window must be rejected"),
    }

    // Allow-listed, but still counted by the in-flight rule.
    for _ in 0..5 {
        let permit = limiter.check("10.0.0.1", 1, &()).await.unwrap().into_permit().unwrap();
        assert!(permit.remaining() < 50);
        permit.release(&()).await;
    }
}
