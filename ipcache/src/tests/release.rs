use super::*;
use pretty_assertions::assert_eq;
use std::net::IpAddr;
use tokio::time::{self, Duration};
use tokio_test::{assert_pending, task};

#[tokio::test]
async fn release_by_cidr_removes_freed_entries() {
    let h = Harness::new();
    let prefixes = [net("10.0.0.0/24"), net("10.0.1.0/24")];

    let ids = h
        .coordinator
        .allocate_cidrs(&prefixes.map(Some), None, None)
        .await
        .expect("allocation must succeed");
    assert_eq!(h.entry("10.0.0.0/24"), generated(ids[0].id));
    assert_eq!(h.entry("10.0.1.0/24"), generated(ids[1].id));

    h.coordinator.release_cidr_identities_by_cidr(&prefixes);
    assert_eq!(h.coordinator.pending_releases(), 2);
    h.coordinator.flush_releases().await;

    assert_eq!(h.coordinator.pending_releases(), 0);
    assert_eq!(h.entry("10.0.0.0/24"), None);
    assert_eq!(h.entry("10.0.1.0/24"), None);
    assert_eq!(h.ref_count(&ids[0]), 0);
    assert_eq!(h.ref_count(&ids[1]), 0);
    assert!(h.allocator.is_empty());
    assert_eq!(h.metrics.released_prefixes(), 2);
}

#[tokio::test]
async fn referenced_entries_are_kept() {
    let h = Harness::new();
    let prefixes = nets(&["10.0.0.0/24"]);

    let first = h
        .coordinator
        .allocate_cidrs(&prefixes, None, None)
        .await
        .expect("allocation must succeed");
    h.coordinator
        .allocate_cidrs(&prefixes, None, None)
        .await
        .expect("allocation must succeed");
    assert_eq!(h.ref_count(&first[0]), 2);

    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);
    h.coordinator.flush_releases().await;
    assert_eq!(h.ref_count(&first[0]), 1);
    assert_eq!(h.entry("10.0.0.0/24"), generated(first[0].id));

    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);
    h.coordinator.flush_releases().await;
    assert_eq!(h.ref_count(&first[0]), 0);
    assert_eq!(h.entry("10.0.0.0/24"), None);
}

#[tokio::test]
async fn pending_duplicates_are_released_once() {
    let h = Harness::new();
    let prefixes = nets(&["10.0.0.0/24"]);

    let ids = h
        .coordinator
        .allocate_cidrs(&prefixes, None, None)
        .await
        .expect("allocation must succeed");
    h.coordinator
        .allocate_cidrs(&prefixes, None, None)
        .await
        .expect("allocation must succeed");

    // Both requests land in the same batch.
    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);
    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.7/24")]);
    assert_eq!(h.coordinator.pending_releases(), 1);
    h.coordinator.flush_releases().await;

    assert_eq!(h.ref_count(&ids[0]), 1);
    assert_eq!(h.entry("10.0.0.0/24"), generated(ids[0].id));
}

#[tokio::test]
async fn release_by_id_removes_freed_entries() {
    let h = Harness::new();
    let ips = ["192.0.2.1", "192.0.2.2"]
        .iter()
        .map(|s| s.parse::<IpAddr>().unwrap())
        .collect::<Vec<_>>();

    let ids = h
        .coordinator
        .allocate_cidrs_for_ips(&ips, None)
        .await
        .expect("allocation must succeed");

    h.coordinator
        .release_cidr_identities_by_id(&[ids[0].id])
        .await;
    h.coordinator.flush_releases().await;
    assert_eq!(h.entry("192.0.2.1/32"), None);
    assert_eq!(h.entry("192.0.2.2/32"), generated(ids[1].id));
    assert_eq!(h.ref_count(&ids[0]), 0);
}

#[tokio::test]
async fn release_by_id_skips_non_cidr_identities() {
    let h = Harness::new();

    let cidr = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24"]), None, None)
        .await
        .expect("allocation must succeed");
    let labels = [("app", "web")].into_iter().collect::<Labels>();
    let (generic, _) = h
        .allocator
        .allocate_identity(labels, false, NumericIdentity::INVALID)
        .await
        .expect("allocation must succeed");

    h.coordinator
        .release_cidr_identities_by_id(&[generic.id])
        .await;
    assert_eq!(h.coordinator.pending_releases(), 0);
    h.coordinator.flush_releases().await;

    assert_eq!(h.ref_count(&generic), 1);
    assert_eq!(h.ref_count(&cidr[0]), 1);
    assert_eq!(h.entry("10.0.0.0/24"), generated(cidr[0].id));
}

#[tokio::test]
async fn release_by_id_skips_unknown_identities() {
    let h = Harness::new();
    let unknown = NumericIdentity::new(NumericIdentity::LOCAL_IDENTITY_FLAG | 0x9999);

    h.coordinator.release_cidr_identities_by_id(&[unknown]).await;
    assert_eq!(h.coordinator.pending_releases(), 0);
}

#[tokio::test]
async fn malformed_prefixes_are_skipped() {
    let h = Harness::new();

    let ids = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24"]), None, None)
        .await
        .expect("allocation must succeed");

    h.coordinator
        .inner
        .release_cidr_identities(vec![
            "not-a-prefix".to_string(),
            "10.0.9.0/24".to_string(),
            "10.0.0.0/24".to_string(),
        ])
        .await;
    assert_eq!(h.ref_count(&ids[0]), 0);
    assert_eq!(h.entry("10.0.0.0/24"), None);
    assert_eq!(h.metrics.released_prefixes(), 1);
}

#[tokio::test]
async fn release_uses_current_metadata() {
    let h = Harness::new();
    let addr = "10.0.0.0".parse::<IpAddr>().unwrap();
    let extra = [("app", "apiserver")].into_iter().collect::<Labels>();

    h.coordinator.upsert_metadata(addr, extra.clone()).await;
    let merged = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24"]), None, None)
        .await
        .expect("allocation must succeed");
    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);
    h.coordinator.flush_releases().await;
    assert_eq!(h.ref_count(&merged[0]), 0);
    assert_eq!(h.entry("10.0.0.0/24"), None);

    // Metadata added after allocation does not prevent the release.
    h.coordinator.remove_metadata(addr).await;
    let plain = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24"]), None, None)
        .await
        .expect("allocation must succeed");
    h.coordinator.upsert_metadata(addr, extra).await;
    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);
    h.coordinator.flush_releases().await;
    assert_eq!(h.ref_count(&plain[0]), 0);
    assert_eq!(h.entry("10.0.0.0/24"), None);
    assert!(h.allocator.is_empty());
}

#[tokio::test]
async fn flush_waits_for_the_releaser() {
    let allocator = Arc::new(LocalIdentityAllocator::new());
    let index = Index::shared();
    let (coordinator, releaser) = Coordinator::new(
        allocator.clone(),
        index.clone(),
        Metrics::default(),
        Config::default(),
    );

    coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24"]), None, None)
        .await
        .expect("allocation must succeed");
    coordinator.release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);

    let mut flush = task::spawn(coordinator.flush_releases());
    assert_pending!(flush.poll());
    assert_eq!(coordinator.pending_releases(), 1);
    assert!(index.lookup_by_ip("10.0.0.0/24").is_some());

    let (drain, watch) = drain::channel();
    tokio::spawn(releaser.run(watch));
    flush.await;

    assert_eq!(coordinator.pending_releases(), 0);
    assert!(index.lookup_by_ip("10.0.0.0/24").is_none());
    assert!(allocator.is_empty());
    drain.drain().await;
}

#[tokio::test]
async fn pending_releases_are_processed_on_shutdown() {
    let h = Harness::new();

    let ids = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24", "10.0.1.0/24"]), None, None)
        .await
        .expect("allocation must succeed");
    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);

    let coordinator = h.coordinator.clone();
    let index = h.index.clone();
    let allocator = h.allocator.clone();
    h.shutdown().await;

    assert_eq!(coordinator.pending_releases(), 0);
    assert_eq!(index.lookup_by_ip("10.0.0.0/24"), None);
    assert_eq!(index.lookup_by_ip("10.0.1.0/24"), generated(ids[1].id));
    assert_eq!(allocator.ref_count(ids[0].id), 0);
}

#[tokio::test]
async fn flush_after_shutdown_returns() {
    let h = Harness::new();

    let ids = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24"]), None, None)
        .await
        .expect("allocation must succeed");
    let coordinator = h.coordinator.clone();
    let index = h.index.clone();
    h.shutdown().await;

    time::timeout(Duration::from_secs(2), coordinator.flush_releases())
        .await
        .expect("flush must not wait for a stopped releaser");

    // Releases enqueued after shutdown are never processed.
    coordinator.release_cidr_identities_by_cidr(&[net("10.0.0.0/24")]);
    time::timeout(Duration::from_secs(2), coordinator.flush_releases())
        .await
        .expect("flush must not wait for a stopped releaser");
    assert_eq!(coordinator.pending_releases(), 1);
    assert_eq!(index.lookup_by_ip("10.0.0.0/24"), generated(ids[0].id));
}

#[tokio::test]
async fn release_failure_keeps_entry_and_continues_batch() {
    let h = Harness::with_allocator(|inner| ReleaseFault {
        inner,
        prefix: net("10.0.0.0/24"),
        stall: false,
    });

    let ids = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24", "10.0.1.0/24"]), None, None)
        .await
        .expect("allocation must succeed");

    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24"), net("10.0.1.0/24")]);
    h.coordinator.flush_releases().await;

    assert_eq!(h.ref_count(&ids[0]), 1);
    assert_eq!(h.entry("10.0.0.0/24"), generated(ids[0].id));
    assert_eq!(h.ref_count(&ids[1]), 0);
    assert_eq!(h.entry("10.0.1.0/24"), None);
    assert_eq!(h.metrics.released_prefixes(), 1);
}

#[tokio::test(start_paused = true)]
async fn release_timeout_keeps_entry_and_continues_batch() {
    let config = Config {
        allocation_timeout_ms: 1_000,
        ..Config::default()
    };
    let h = Harness::with_config(config, |inner| ReleaseFault {
        inner,
        prefix: net("10.0.0.0/24"),
        stall: true,
    });

    let ids = h
        .coordinator
        .allocate_cidrs(&nets(&["10.0.0.0/24", "10.0.1.0/24"]), None, None)
        .await
        .expect("allocation must succeed");

    h.coordinator
        .release_cidr_identities_by_cidr(&[net("10.0.0.0/24"), net("10.0.1.0/24")]);
    time::timeout(Duration::from_secs(10), h.coordinator.flush_releases())
        .await
        .expect("release must give up after the allocation timeout");

    assert_eq!(h.ref_count(&ids[0]), 1);
    assert_eq!(h.entry("10.0.0.0/24"), generated(ids[0].id));
    assert_eq!(h.ref_count(&ids[1]), 0);
    assert_eq!(h.entry("10.0.1.0/24"), None);
    assert_eq!(h.metrics.released_prefixes(), 1);
}

/// Releasing a prefix concurrently with its re-allocation must never leave a referenced identity
/// without an IP cache entry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_races_reallocation() {
    let h = Harness::with_config(
        Config {
            release_interval_ms: 1,
            ..Config::default()
        },
        |alloc| alloc,
    );
    let prefix = net("10.0.0.0/24");

    for _ in 0..100 {
        h.coordinator
            .allocate_cidrs(&[Some(prefix)], None, None)
            .await
            .expect("allocation must succeed");

        let release = tokio::spawn({
            let coordinator = h.coordinator.clone();
            async move {
                coordinator.release_cidr_identities_by_cidr(&[prefix]);
                coordinator.flush_releases().await;
            }
        });
        let allocate = tokio::spawn({
            let coordinator = h.coordinator.clone();
            async move {
                coordinator
                    .allocate_cidrs(&[Some(prefix)], None, None)
                    .await
                    .expect("allocation must succeed")
            }
        });
        release.await.expect("release task must not panic");
        let ids = allocate.await.expect("allocate task must not panic");

        // Whichever ran first, exactly one reference remains and its entry is present.
        assert_eq!(h.ref_count(&ids[0]), 1);
        assert_eq!(h.entry("10.0.0.0/24"), generated(ids[0].id));

        h.coordinator.release_cidr_identities_by_cidr(&[prefix]);
        h.coordinator.flush_releases().await;
        assert_eq!(h.entry("10.0.0.0/24"), None);
        assert!(h.allocator.is_empty());
    }
}
