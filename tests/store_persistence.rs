use std::sync::Arc;

use chrono::{Duration, Utc};
use lanpulse::models::{Device, HealthMetrics, TrafficSample};
use lanpulse::store::DataStore;

fn device(ip: &str) -> Device {
    Device {
        ip_address: ip.to_string(),
        mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
        hostname: "printer.lan".to_string(),
        vendor: "Hewlett Packard".to_string(),
        first_seen: Utc::now(),
        last_seen: Utc::now(),
        is_active: true,
    }
}

fn traffic_sample(age: Duration) -> TrafficSample {
    TrafficSample {
        timestamp: Utc::now() - age,
        bytes_received: 1_000,
        bytes_sent: 2_000,
        bytes_received_per_sec: 100.0,
        bytes_sent_per_sec: 200.0,
        packets_received: 10,
        packets_sent: 20,
    }
}

fn health_sample(ip: &str, age: Duration) -> HealthMetrics {
    HealthMetrics {
        ip_address: ip.to_string(),
        latency: 12.0,
        min_latency: 8.0,
        max_latency: 20.0,
        packet_loss: 0.0,
        jitter: 1.5,
        last_updated: Utc::now() - age,
        is_degraded: false,
    }
}

#[tokio::test]
async fn device_round_trip_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanpulse.json");

    let store = DataStore::open(&path).unwrap();
    let original = device("192.168.1.42");
    store.save_device(original.clone()).await.unwrap();
    store.close().await.unwrap();

    let reopened = DataStore::open(&path).unwrap();
    let loaded = reopened.get_device("192.168.1.42").expect("device should survive reopen");
    assert_eq!(loaded.ip_address, original.ip_address);
    assert_eq!(loaded.mac_address, original.mac_address);
    assert_eq!(loaded.hostname, original.hostname);
    assert_eq!(loaded.is_active, original.is_active);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn save_device_upserts_by_ip() {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::open(dir.path().join("lanpulse.json")).unwrap();

    store.save_device(device("192.168.1.42")).await.unwrap();
    let mut renamed = device("192.168.1.42");
    renamed.hostname = "printer-2.lan".to_string();
    store.save_device(renamed).await.unwrap();

    let devices = store.get_all_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].hostname, "printer-2.lan");
    store.close().await.unwrap();
}

#[tokio::test]
async fn cleanup_removes_only_entries_older_than_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::open(dir.path().join("lanpulse.json")).unwrap();

    store.save_traffic_stats(traffic_sample(Duration::hours(30))).await.unwrap();
    store.save_traffic_stats(traffic_sample(Duration::hours(2))).await.unwrap();
    store.save_traffic_stats(traffic_sample(Duration::hours(1))).await.unwrap();
    store
        .save_health_metrics(health_sample("192.168.1.42", Duration::hours(30)))
        .await
        .unwrap();
    store
        .save_health_metrics(health_sample("192.168.1.42", Duration::hours(1)))
        .await
        .unwrap();

    let cutoff = Utc::now() - Duration::hours(24);
    let removed = store.cleanup_old_data(cutoff).await.unwrap();
    assert_eq!(removed, 2);

    let far_past = Utc::now() - Duration::days(365);
    let traffic = store.get_traffic_stats(far_past, Utc::now());
    assert_eq!(traffic.len(), 2);
    assert!(traffic.iter().all(|s| s.timestamp >= cutoff));

    let health = store.get_health_metrics("192.168.1.42", far_past, Utc::now());
    assert_eq!(health.len(), 1);

    // Nothing left to purge; the second pass is a no-op.
    let removed = store.cleanup_old_data(cutoff).await.unwrap();
    assert_eq!(removed, 0);
    store.close().await.unwrap();
}

#[tokio::test]
async fn corrupt_file_degrades_to_empty_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanpulse.json");
    std::fs::write(&path, "{ this is not json").unwrap();

    let store = DataStore::open(&path).unwrap();
    assert!(store.get_all_devices().is_empty());

    // The store stays writable after discarding the corrupt file.
    store.save_device(device("192.168.1.42")).await.unwrap();
    store.close().await.unwrap();

    let reopened = DataStore::open(&path).unwrap();
    assert_eq!(reopened.get_all_devices().len(), 1);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_writes_all_land_in_one_complete_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanpulse.json");
    let store = Arc::new(DataStore::open(&path).unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.save_traffic_stats(traffic_sample(Duration::seconds(i))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    store.close().await.unwrap();

    // Whatever interleaving happened, the file is one parseable snapshot
    // holding every accepted write.
    let contents = std::fs::read_to_string(&path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(document["trafficStats"].as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn touch_device_refreshes_activity() {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::open(dir.path().join("lanpulse.json")).unwrap();

    let mut original = device("192.168.1.42");
    original.is_active = false;
    original.last_seen = Utc::now() - Duration::hours(5);
    store.save_device(original).await.unwrap();

    let seen_at = Utc::now();
    store.touch_device("192.168.1.42", true, seen_at).await.unwrap();

    let loaded = store.get_device("192.168.1.42").unwrap();
    assert!(loaded.is_active);
    assert!(loaded.last_seen >= seen_at - Duration::seconds(1));

    // Going offline keeps last_seen at the last active sighting.
    store.touch_device("192.168.1.42", false, Utc::now()).await.unwrap();
    let loaded = store.get_device("192.168.1.42").unwrap();
    assert!(!loaded.is_active);
    assert!(loaded.last_seen >= seen_at - Duration::seconds(1));
    store.close().await.unwrap();
}
