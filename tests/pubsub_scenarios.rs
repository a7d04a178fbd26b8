//! End-to-end scenarios against a live publisher/subscriber pair, run
//! in-process with real shared memory, named semaphores, and a real
//! control-channel backend — only the process boundary is simulated away.

use std::time::Duration;

use framebus::{BusConfig, DType, Publisher, Subscriber, TopicDescriptor};

fn unique_topic(tag: &str) -> String {
    format!("test-e2e-{tag}-{}", uuid::Uuid::new_v4())
}

fn test_config() -> BusConfig {
    let mut config = BusConfig::default();
    config.join_backoff.max_wait = Duration::from_secs(5);
    config
}

/// Scenario 1 (§8): single publisher, single subscriber.
#[test]
fn single_publisher_single_subscriber_round_trips_frame_and_timestamp() {
    let topic = unique_topic("single");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![2, 2], DType::U8);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscriber = Subscriber::connect(&topic, &config).unwrap();
    // give the listener thread a moment to apply the signin before publishing
    std::thread::sleep(Duration::from_millis(50));

    publisher.publish(&[1, 2, 3, 4], 100).unwrap();

    let (bytes, timestamp) = subscriber.recv().unwrap();
    assert_eq!(bytes, vec![1, 2, 3, 4]);
    assert_eq!(timestamp, 100);

    subscriber.close();
    publisher.shutdown();
}

/// Scenario 2 (§8): three subscribers, fan-out all see the same publication
/// and the reader counter returns to zero.
#[test]
fn three_subscribers_all_observe_the_same_publication() {
    let topic = unique_topic("fanout");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![3], DType::U8);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscribers: Vec<Subscriber> = (0..3)
        .map(|_| Subscriber::connect(&topic, &config).unwrap())
        .collect();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(publisher.subscriber_count(), 3);

    publisher.publish(&[9, 8, 7], 55).unwrap();

    for subscriber in &subscribers {
        let (bytes, timestamp) = subscriber.recv().unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
        assert_eq!(timestamp, 55);
    }

    for subscriber in subscribers {
        subscriber.close();
    }
    publisher.shutdown();
}

/// Scenario 3 (§8): latest-wins. A subscriber that doesn't read until after
/// a burst of publications only ever observes the most recent one.
#[test]
fn slow_subscriber_observes_only_the_latest_publication() {
    let topic = unique_topic("latest-wins");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![1], DType::I32);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscriber = Subscriber::connect(&topic, &config).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    for ts in 1..=1000u64 {
        let bytes = (ts as i32).to_le_bytes();
        publisher.publish(&bytes, ts).unwrap();
    }

    let (bytes, timestamp) = subscriber.recv().unwrap();
    assert_eq!(timestamp, 1000);
    assert_eq!(i32::from_le_bytes(bytes.try_into().unwrap()), 1000);

    subscriber.close();
    publisher.shutdown();
}

/// Scenario 4 (§8): after signout, the publisher's registry no longer
/// carries the subscriber and stops counting it in fan-out.
#[test]
fn signout_removes_the_subscriber_from_the_registry() {
    let topic = unique_topic("signout");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![2], DType::U8);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscriber = Subscriber::connect(&topic, &config).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(publisher.subscriber_count(), 1);

    publisher.publish(&[1, 1], 1).unwrap();
    subscriber.recv().unwrap();
    subscriber.close();
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(publisher.subscriber_count(), 0);

    publisher.publish(&[2, 2], 2).unwrap();
    publisher.shutdown();
}

/// Scenario 6 (§8): metadata discovery. A late-joining subscriber reads
/// back exactly the shape and dtype the publisher declared at init.
#[test]
fn late_joining_subscriber_discovers_declared_metadata() {
    let topic = unique_topic("metadata");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![288, 320, 1], DType::I16);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscriber = Subscriber::connect(&topic, &config).unwrap();
    let (shape, dtype) = subscriber.metadata().unwrap();
    assert_eq!(shape, vec![288, 320, 1]);
    assert_eq!(dtype, DType::I16);

    subscriber.close();
    publisher.shutdown();
}

/// Boundary behavior (§8): a wrong-length payload is rejected and the
/// topic keeps serving subsequent well-formed publications.
#[test]
fn wrong_length_publish_is_rejected_without_disrupting_later_publications() {
    let topic = unique_topic("shape-mismatch");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![4], DType::U8);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscriber = Subscriber::connect(&topic, &config).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert!(publisher.publish(&[1, 2, 3], 1).is_err());
    publisher.publish(&[1, 2, 3, 4], 2).unwrap();

    let (bytes, timestamp) = subscriber.recv().unwrap();
    assert_eq!(bytes, vec![1, 2, 3, 4]);
    assert_eq!(timestamp, 2);

    subscriber.close();
    publisher.shutdown();
}

/// The client worker (§4.6) keeps serving `latest()` from a background
/// thread without the caller driving `recv()` directly.
#[test]
fn client_worker_surfaces_published_frames_via_latest() {
    let topic = unique_topic("worker");
    let config = test_config();
    let descriptor = TopicDescriptor::new(topic.clone(), vec![2], DType::U8);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let subscriber = Subscriber::connect(&topic, &config).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let worker = framebus::ClientWorker::spawn(subscriber, &config);

    publisher.publish(&[5, 6], 7).unwrap();
    let frame = worker.latest_blocking();
    assert_eq!(frame, vec![5, 6]);

    worker.shutdown();
    publisher.shutdown();
}

/// Scenario 5 (§8): a subscriber that joins concurrently with an in-flight
/// publish never observes a torn frame, and sees the expected bytes on the
/// next publish after its signin lands.
#[test]
fn subscriber_joining_mid_publish_never_observes_a_torn_frame() {
    let topic = unique_topic("race-join");
    let config = test_config();
    // Large enough that a copy isn't instantaneous relative to a concurrent
    // signin landing on the control channel.
    let descriptor = TopicDescriptor::new(topic.clone(), vec![65536], DType::U8);
    let publisher = Publisher::new(descriptor, config.clone()).unwrap();

    let first_payload = vec![0xAAu8; 65536];
    publisher.publish(&first_payload, 1).unwrap();

    let join_topic = topic.clone();
    let join_config = config.clone();
    let joiner = std::thread::spawn(move || Subscriber::connect(&join_topic, &join_config).unwrap());

    let second_payload = vec![0xBBu8; 65536];
    publisher.publish(&second_payload, 2).unwrap();

    let subscriber = joiner.join().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let third_payload = vec![0xCCu8; 65536];
    publisher.publish(&third_payload, 3).unwrap();

    let (bytes, timestamp) = subscriber.recv().unwrap();
    assert_eq!(timestamp, 3);
    // Every byte must come from a single publication: no interleaving of
    // 0xBB and 0xCC.
    assert!(bytes.iter().all(|&b| b == 0xCC));

    subscriber.close();
    publisher.shutdown();
}
