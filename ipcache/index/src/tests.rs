use super::*;
use pretty_assertions::assert_eq;
use prometheus_client::registry::Registry;

fn generated(id: u32) -> CachedIdentity {
    CachedIdentity {
        id: NumericIdentity::new(id),
        source: Source::Generated,
    }
}

#[test]
fn upsert_and_lookup() {
    let index = Index::shared();
    assert!(index.upsert("10.0.0.0/24", None, 0, None, generated(100)));
    assert_eq!(index.lookup_by_ip("10.0.0.0/24"), Some(generated(100)));
    assert_eq!(index.lookup_by_ip("10.0.1.0/24"), None);

    // Same-source updates overwrite and move the reverse index.
    assert!(index.upsert("10.0.0.0/24", None, 0, None, generated(101)));
    assert_eq!(index.lookup_by_ip("10.0.0.0/24"), Some(generated(101)));
    let idx = index.read();
    assert!(idx.lookup_by_identity(NumericIdentity::new(100)).is_empty());
    assert_eq!(
        idx.lookup_by_identity(NumericIdentity::new(101)),
        vec!["10.0.0.0/24".to_string()]
    );
}

#[test]
fn shared_index_is_a_store() {
    fn boxed(store: impl IpCacheStore + 'static) -> Box<dyn IpCacheStore> {
        Box::new(store)
    }

    let index = Index::shared();
    let store = boxed(index.clone());
    assert!(store.upsert("10.0.0.0/24", None, 0, None, generated(100)));
    assert_eq!(
        index.read().get("10.0.0.0/24").map(|e| e.identity),
        Some(generated(100))
    );
    assert!(store.delete("10.0.0.0/24", Source::Generated));
    assert!(index.read().is_empty());
}

#[test]
fn lower_precedence_cannot_overwrite() {
    let index = Index::shared();
    let k8s = CachedIdentity {
        id: NumericIdentity::new(7),
        source: Source::Kubernetes,
    };
    assert!(index.upsert("192.0.2.1/32", Some("10.1.1.1".parse().unwrap()), 0, None, k8s));
    assert!(!index.upsert("192.0.2.1/32", None, 0, None, generated(100)));
    assert_eq!(index.lookup_by_ip("192.0.2.1/32"), Some(k8s));

    // The stronger source's entry is not deleted on behalf of the weaker one either.
    assert!(!index.delete("192.0.2.1/32", Source::Generated));
    assert_eq!(index.lookup_by_ip("192.0.2.1/32"), Some(k8s));

    assert!(index.delete("192.0.2.1/32", Source::Kubernetes));
    assert!(index.read().is_empty());
}

#[test]
fn delete_unlinks_identity() {
    let index = Index::shared();
    index.upsert("10.0.0.0/24", None, 0, None, generated(100));
    index.upsert("10.0.1.0/24", None, 0, None, generated(100));
    assert_eq!(
        index.read().lookup_by_identity(NumericIdentity::new(100)),
        vec!["10.0.0.0/24".to_string(), "10.0.1.0/24".to_string()]
    );

    assert!(index.delete("10.0.0.0/24", Source::Generated));
    assert!(!index.delete("10.0.0.0/24", Source::Generated));
    assert_eq!(
        index.read().lookup_by_identity(NumericIdentity::new(100)),
        vec!["10.0.1.0/24".to_string()]
    );
    assert_eq!(index.read().len(), 1);
}

#[test]
fn entries_metric() {
    let index = Index::shared();
    index.upsert("10.0.0.0/24", None, 0, None, generated(100));
    index.upsert("10.0.1.0/24", None, 0, None, generated(101));
    index.upsert(
        "192.0.2.1/32",
        None,
        0,
        None,
        CachedIdentity {
            id: NumericIdentity::new(7),
            source: Source::Kubernetes,
        },
    );

    let mut prom = Registry::default();
    metrics::register(prom.sub_registry_with_prefix("ipcache_index"), index);
    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();

    assert!(
        text.contains("ipcache_index_entries{source=\"generated\"} 2"),
        "{}",
        text
    );
    assert!(
        text.contains("ipcache_index_entries{source=\"k8s\"} 1"),
        "{}",
        text
    );
}
