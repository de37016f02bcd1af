use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{Instant, sleep};

use super::options::{
    PUBLISH_QOS_PROP_NAME, PUBLISH_RATE_PROP_NAME, PUBLISH_RETAIN_PROP_NAME,
    PUBLISH_TOPIC_PROP_NAME,
};
use super::{
    FixedRateTask, PUBLISH_PRIORITY, Properties, PublishOptions, TemperaturePublisher,
    build_payload,
};
use crate::cloud::{CloudClient, CloudClientListener, CloudService};
use crate::sensor::{SensorReading, SensorSource};
use crate::utils::error::{CloudError, ComponentError, PropertyError, SensorError};

struct FixedSensors(Vec<SensorReading>);

#[async_trait]
impl SensorSource for FixedSensors {
    async fn list_sensors(&self) -> Result<Vec<SensorReading>, SensorError> {
        Ok(self.0.clone())
    }
}

/// Fails the first `failures` reads, then returns one reading.
struct FlakySensors {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl SensorSource for FlakySensors {
    async fn list_sensors(&self) -> Result<Vec<SensorReading>, SensorError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(SensorError::Io(io::Error::other("bus error")));
        }
        Ok(vec![probe("28-000", 20.0)])
    }
}

/// The first read takes `delay` and reports 1.0; later reads are instant and report 2.0.
struct SlowFirstRead {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl SensorSource for SlowFirstRead {
    async fn list_sensors(&self) -> Result<Vec<SensorReading>, SensorError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            sleep(self.delay).await;
            return Ok(vec![probe("28-000", 1.0)]);
        }
        Ok(vec![probe("28-000", 2.0)])
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Published {
    topic: String,
    payload: String,
    qos: u8,
    retain: bool,
    priority: u8,
}

#[derive(Default)]
struct RecordingClient {
    fail: bool,
    attempts: AtomicUsize,
    published: Mutex<Vec<Published>>,
    listeners: AtomicUsize,
    released: AtomicBool,
}

impl RecordingClient {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl CloudClient for RecordingClient {
    fn app_id(&self) -> &str {
        super::APP_ID
    }

    async fn publish(
        &self,
        app_topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> Result<u32, CloudError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as u32;
        if self.fail {
            return Err(CloudError::NotConnected);
        }
        self.published.lock().unwrap().push(Published {
            topic: app_topic.to_string(),
            payload: String::from_utf8(payload).unwrap(),
            qos,
            retain,
            priority,
        });
        Ok(attempt)
    }

    fn add_cloud_client_listener(&self, _listener: Arc<dyn CloudClientListener>) {
        self.listeners.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_cloud_client_listener(&self, _listener: &Arc<dyn CloudClientListener>) {
        self.listeners.fetch_sub(1, Ordering::SeqCst);
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct MockCloud {
    client: Arc<RecordingClient>,
    unavailable: bool,
}

#[async_trait]
impl CloudService for MockCloud {
    async fn new_cloud_client(&self, _app_id: &str) -> Result<Arc<dyn CloudClient>, CloudError> {
        if self.unavailable {
            return Err(CloudError::NotConnected);
        }
        Ok(self.client.clone() as Arc<dyn CloudClient>)
    }
}

fn probe(id: &str, value: f64) -> SensorReading {
    SensorReading::new(id, "Temperature", value, "C")
}

fn props(rate: Option<u64>) -> Properties {
    let props = Properties::new()
        .with(PUBLISH_TOPIC_PROP_NAME, "temp")
        .with(PUBLISH_QOS_PROP_NAME, 1)
        .with(PUBLISH_RETAIN_PROP_NAME, true);
    match rate {
        Some(rate) => props.with(PUBLISH_RATE_PROP_NAME, rate),
        None => props,
    }
}

fn component(
    sensors: impl SensorSource + 'static,
    client: RecordingClient,
) -> (Arc<TemperaturePublisher>, Arc<RecordingClient>) {
    let client = Arc::new(client);
    let cloud = MockCloud {
        client: client.clone(),
        unavailable: false,
    };
    let publisher = Arc::new(TemperaturePublisher::new(Arc::new(cloud), Arc::new(sensors)));
    (publisher, client)
}

fn one_probe() -> FixedSensors {
    FixedSensors(vec![probe("28-000", 23.456)])
}

// --- payload ---

#[test]
fn test_payload_single_sensor() {
    assert_eq!(
        build_payload(&[probe("28-000", 23.456)]),
        "Temperature(28-000):23.46C"
    );
}

#[test]
fn test_payload_concatenates_without_delimiter() {
    let readings = [probe("28-a", 1.0), probe("28-b", 2.5)];
    assert_eq!(
        build_payload(&readings),
        "Temperature(28-a):1.00CTemperature(28-b):2.50C"
    );
    assert!(build_payload(&[]).is_empty());
}

// --- options ---

#[test]
fn test_options_without_rate_means_no_schedule() {
    assert_eq!(PublishOptions::from_properties(&props(None)).unwrap(), None);
    assert_eq!(PublishOptions::from_properties(&Properties::new()).unwrap(), None);
}

#[test]
fn test_options_from_properties() {
    let options = PublishOptions::from_properties(&props(Some(10)))
        .unwrap()
        .unwrap();
    assert_eq!(options.rate, Duration::from_secs(10));
    assert_eq!(options.topic, "temp");
    assert_eq!(options.qos, 1);
    assert!(options.retain);
}

#[test]
fn test_options_defaults_for_optional_keys() {
    let only_rate = Properties::new().with(PUBLISH_RATE_PROP_NAME, 3);
    let options = PublishOptions::from_properties(&only_rate).unwrap().unwrap();
    assert_eq!(options.topic, "data");
    assert_eq!(options.qos, 0);
    assert!(!options.retain);
}

#[test]
fn test_options_reject_bad_rate() {
    let rate = |value: serde_json::Value| {
        PublishOptions::from_properties(&props(None).with(PUBLISH_RATE_PROP_NAME, value))
    };

    assert!(matches!(rate(json!(0)), Err(PropertyError::NonPositiveRate(0))));
    assert!(matches!(rate(json!(-5)), Err(PropertyError::NonPositiveRate(-5))));
    assert!(matches!(
        rate(json!("often")),
        Err(PropertyError::InvalidType { key: "publish.rate", .. })
    ));
    assert!(matches!(
        rate(json!(1.5)),
        Err(PropertyError::InvalidType { key: "publish.rate", .. })
    ));
}

#[test]
fn test_options_reject_bad_types() {
    let with = |key: &str, value: serde_json::Value| {
        PublishOptions::from_properties(&props(Some(1)).with(key, value))
    };

    assert!(matches!(
        with(PUBLISH_TOPIC_PROP_NAME, json!(7)),
        Err(PropertyError::InvalidType { key: "publish.semanticTopic", .. })
    ));
    assert!(matches!(
        with(PUBLISH_QOS_PROP_NAME, json!("high")),
        Err(PropertyError::InvalidType { key: "publish.qos", .. })
    ));
    assert!(matches!(
        with(PUBLISH_QOS_PROP_NAME, json!(3)),
        Err(PropertyError::InvalidQos(3))
    ));
    assert!(matches!(
        with(PUBLISH_RETAIN_PROP_NAME, json!("yes")),
        Err(PropertyError::InvalidType { key: "publish.retain", .. })
    ));
}

// --- scheduler ---

#[tokio::test(start_paused = true)]
async fn test_fixed_rate_fires_immediately_and_catches_up() {
    let start = Instant::now();
    let offsets = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::new(AtomicBool::new(true));

    let task = {
        let offsets = offsets.clone();
        FixedRateTask::spawn(Duration::from_secs(10), move || {
            let offsets = offsets.clone();
            let first = first.clone();
            async move {
                offsets.lock().unwrap().push(start.elapsed().as_secs());
                if first.swap(false, Ordering::SeqCst) {
                    sleep(Duration::from_secs(25)).await;
                }
            }
        })
    };

    sleep(Duration::from_secs(31)).await;
    assert_eq!(*offsets.lock().unwrap(), vec![0, 25, 25, 30]);
    task.cancel().await;
}

#[tokio::test(start_paused = true)]
async fn test_tick_bodies_never_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));

    let task = {
        let (in_flight, max_in_flight, ticks) =
            (in_flight.clone(), max_in_flight.clone(), ticks.clone());
        FixedRateTask::spawn(Duration::from_secs(1), move || {
            let (in_flight, max_in_flight, ticks) =
                (in_flight.clone(), max_in_flight.clone(), ticks.clone());
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_secs(3)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    sleep(Duration::from_secs(10)).await;
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert!(ticks.load(Ordering::SeqCst) >= 3);
    task.cancel().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_ticks() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let task = {
        let ticks = ticks.clone();
        FixedRateTask::spawn(Duration::from_secs(1), move || {
            let ticks = ticks.clone();
            async move {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    sleep(Duration::from_millis(10)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert!(!task.is_finished());
    assert_eq!(task.period(), Duration::from_secs(1));

    task.cancel().await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_running_tick() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let task = {
        let (started, finished) = (started.clone(), finished.clone());
        FixedRateTask::spawn(Duration::from_secs(60), move || {
            let (started, finished) = (started.clone(), finished.clone());
            async move {
                started.store(true, Ordering::SeqCst);
                sleep(Duration::from_secs(5)).await;
                finished.store(true, Ordering::SeqCst);
            }
        })
    };

    sleep(Duration::from_secs(1)).await;
    assert!(started.load(Ordering::SeqCst));
    task.cancel().await;

    sleep(Duration::from_secs(10)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

// --- component ---

#[tokio::test(start_paused = true)]
async fn test_activate_with_rate_publishes_immediately_then_periodically() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(10))).await.unwrap();

    assert!(publisher.is_scheduled().await);
    assert_eq!(publisher.schedule_period().await, Some(Duration::from_secs(10)));
    assert_eq!(client.listeners.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        client.published(),
        vec![Published {
            topic: "temp".to_string(),
            payload: "Temperature(28-000):23.46C".to_string(),
            qos: 1,
            retain: true,
            priority: PUBLISH_PRIORITY,
        }]
    );

    sleep(Duration::from_secs(10)).await;
    assert_eq!(client.count(), 2);

    publisher.deactivate().await;
}

#[tokio::test(start_paused = true)]
async fn test_activate_without_rate_leaves_component_idle() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(None)).await.unwrap();

    assert!(!publisher.is_scheduled().await);
    assert_eq!(publisher.schedule_period().await, None);
    assert_eq!(publisher.properties().as_deref(), Some(&props(None)));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(client.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_update_replaces_schedule() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(10))).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.count(), 1);

    publisher.updated(props(Some(3))).await.unwrap();
    assert_eq!(publisher.schedule_period().await, Some(Duration::from_secs(3)));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.count(), 2);

    // new schedule ticks at +3, +6, +9
    sleep(Duration::from_secs(9)).await;
    assert_eq!(client.count(), 5);

    // the old 10s schedule never fires again
    sleep(Duration::from_secs(2)).await;
    assert_eq!(client.count(), 5);

    publisher.deactivate().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_during_slow_cycle_drops_that_cycle() {
    let sensors = SlowFirstRead {
        delay: Duration::from_secs(5),
        calls: AtomicUsize::new(0),
    };
    let (publisher, client) = component(sensors, RecordingClient::default());
    publisher.activate(props(Some(60))).await.unwrap();

    // first cycle is still waiting on its sensor read
    sleep(Duration::from_secs(1)).await;
    assert_eq!(client.count(), 0);

    publisher.updated(props(Some(60))).await.unwrap();
    sleep(Duration::from_secs(10)).await;

    let payloads: Vec<String> = client.published().into_iter().map(|p| p.payload).collect();
    assert_eq!(payloads, vec!["Temperature(28-000):2.00C".to_string()]);
    assert_eq!(client.attempts.load(Ordering::SeqCst), 1);

    publisher.deactivate().await;
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_during_slow_cycle_publishes_nothing() {
    let sensors = SlowFirstRead {
        delay: Duration::from_secs(5),
        calls: AtomicUsize::new(0),
    };
    let (publisher, client) = component(sensors, RecordingClient::default());
    publisher.activate(props(Some(60))).await.unwrap();

    sleep(Duration::from_secs(1)).await;
    publisher.deactivate().await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(client.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_update_without_rate_cancels_schedule() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(5))).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    publisher.updated(props(None)).await.unwrap();
    assert!(!publisher.is_scheduled().await);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(client.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_sensors_means_no_publish() {
    let (publisher, client) = component(FixedSensors(Vec::new()), RecordingClient::default());
    publisher.activate(props(Some(1))).await.unwrap();

    sleep(Duration::from_secs(3)).await;
    assert_eq!(client.attempts.load(Ordering::SeqCst), 0);
    assert!(publisher.is_scheduled().await);
}

#[tokio::test(start_paused = true)]
async fn test_sensor_failure_skips_tick_only() {
    let sensors = FlakySensors {
        failures: 1,
        calls: AtomicUsize::new(0),
    };
    let (publisher, client) = component(sensors, RecordingClient::default());
    publisher.activate(props(Some(1))).await.unwrap();

    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.attempts.load(Ordering::SeqCst), 0);
    assert!(publisher.is_scheduled().await);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(client.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_keeps_schedule() {
    let (publisher, client) = component(one_probe(), RecordingClient::failing());
    publisher.activate(props(Some(1))).await.unwrap();

    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.attempts.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
    assert!(publisher.is_scheduled().await);
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_stops_publishing_and_releases_client() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(1))).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    publisher.deactivate().await;
    assert!(client.released.load(Ordering::SeqCst));
    assert!(!publisher.is_scheduled().await);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(client.count(), 1);

    let err = publisher.updated(props(Some(1))).await.unwrap_err();
    assert!(matches!(err, ComponentError::Stopped));
}

#[tokio::test]
async fn test_activation_fails_without_cloud_client() {
    let client = Arc::new(RecordingClient::default());
    let cloud = MockCloud {
        client: client.clone(),
        unavailable: true,
    };
    let publisher = Arc::new(TemperaturePublisher::new(
        Arc::new(cloud),
        Arc::new(one_probe()),
    ));

    let err = publisher.activate(props(Some(1))).await.unwrap_err();
    match err {
        ComponentError::Activation(inner) => {
            assert!(matches!(*inner, ComponentError::Cloud(CloudError::NotConnected)))
        }
        other => panic!("Expected activation error, got {other:?}"),
    }
    assert!(!publisher.is_scheduled().await);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_rate_aborts_activation() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    let bad = props(None).with(PUBLISH_RATE_PROP_NAME, "often");

    let err = publisher.activate(bad).await.unwrap_err();
    assert!(matches!(
        err,
        ComponentError::Activation(ref inner) if matches!(**inner, ComponentError::Property(_))
    ));
    assert!(client.released.load(Ordering::SeqCst));

    let err = publisher.updated(props(Some(1))).await.unwrap_err();
    assert!(matches!(err, ComponentError::NotActive));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_update_cancels_running_schedule() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(1))).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    let bad = props(None).with(PUBLISH_RATE_PROP_NAME, 0);
    let err = publisher.updated(bad).await.unwrap_err();
    assert!(matches!(
        err,
        ComponentError::Property(PropertyError::NonPositiveRate(0))
    ));
    assert!(!publisher.is_scheduled().await);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(client.count(), 1);
}

#[tokio::test]
async fn test_apply_before_activation_is_rejected() {
    let (publisher, _client) = component(one_probe(), RecordingClient::default());
    let err = publisher.apply(props(Some(1))).await.unwrap_err();
    assert!(matches!(err, ComponentError::NotActive));
}

#[tokio::test(start_paused = true)]
async fn test_publish_once_uses_current_configuration() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(1000))).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.count(), 1);

    publisher.publish_once().await;
    assert_eq!(client.count(), 2);
    assert_eq!(client.published()[1].topic, "temp");

    publisher.updated(props(None)).await.unwrap();
    publisher.publish_once().await;
    assert_eq!(client.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_listener_callbacks_leave_state_untouched() {
    let (publisher, client) = component(one_probe(), RecordingClient::default());
    publisher.activate(props(Some(10))).await.unwrap();
    let before = publisher.properties();

    publisher.on_connection_lost();
    publisher.on_connection_established();
    publisher.on_message_arrived("dev", "cmd", b"x", 0, false);
    publisher.on_control_message_arrived("dev", "cmd", b"x", 0, false);
    publisher.on_message_published(1, "temp");
    publisher.on_message_confirmed(1, "temp");

    assert_eq!(publisher.properties(), before);
    assert_eq!(publisher.schedule_period().await, Some(Duration::from_secs(10)));
    assert!(!client.released.load(Ordering::SeqCst));
}
