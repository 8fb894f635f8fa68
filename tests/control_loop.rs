//! End-to-end control scenarios: an inline spec wired to an in-memory
//! datasource and software relays, driven through the real supervisor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use fermenator::bootstrap;
use fermenator::config::{ConfigSpec, ConfigStore, InlineStore};
use fermenator::supervisor::Supervisor;
use fermenator::{FermenatorError, Result};

fn inline_store(doc: &Value) -> Box<dyn ConfigStore> {
    Box::new(InlineStore::from_bootstrap("e2e", doc, Duration::from_secs(300)).unwrap())
}

/// A spec with one managed set-point beer reading literal samples.
fn set_point_doc(set_point: f64, tolerance: f64, readings: Value) -> Value {
    json!({
        "relays": {
            "heater": { "type": "software" },
            "chiller": { "type": "software" }
        },
        "datasources": {
            "tilt": { "type": "memory", "config": { "batches": { "PB0044": readings } } }
        },
        "beers": {
            "PB0044": {
                "type": "set_point",
                "config": {
                    "datasource": "tilt",
                    "identifier": "PB0044",
                    "set_point": set_point,
                    "tolerance": tolerance
                }
            }
        },
        "managers": {
            "ferm1": {
                "config": {
                    "beer": "PB0044",
                    "active_heating": true,
                    "active_heating_relay": "heater",
                    "active_cooling": true,
                    "active_cooling_relay": "chiller",
                    "polling_frequency": 0.05
                }
            }
        }
    })
}

fn linear_ramp_doc(temp: f64, gravity: f64) -> Value {
    json!({
        "relays": {
            "heater": { "type": "software" },
            "chiller": { "type": "software" }
        },
        "datasources": {
            "tilt": {
                "type": "memory",
                "config": {
                    "batches": {
                        "PB0044": [
                            { "seconds_ago": 5, "temperature": temp },
                            { "seconds_ago": 5, "gravity": gravity }
                        ]
                    }
                }
            }
        },
        "beers": {
            "PB0044": {
                "type": "linear_ramp",
                "config": {
                    "datasource": "tilt",
                    "identifier": "PB0044",
                    "original_gravity": 27.0,
                    "final_gravity": 4.0,
                    "start_set_point": 18.0,
                    "end_set_point": 25.0,
                    "tolerance": 0.3
                }
            }
        },
        "managers": {
            "ferm1": {
                "config": {
                    "beer": "PB0044",
                    "active_heating": true,
                    "active_heating_relay": "heater",
                    "active_cooling": true,
                    "active_cooling_relay": "chiller",
                    "polling_frequency": 0.05
                }
            }
        }
    })
}

async fn settled(doc: &Value) -> Supervisor {
    let mut supervisor = Supervisor::new("e2e", inline_store(doc));
    supervisor.assemble().await.unwrap();
    // A few polls at 50ms each.
    tokio::time::sleep(Duration::from_millis(250)).await;
    supervisor
}

#[tokio::test]
async fn test_dead_band_keeps_both_relays_off() {
    let doc = set_point_doc(20.0, 0.5, json!([{ "seconds_ago": 5, "temperature": 20.3 }]));
    let mut supervisor = settled(&doc).await;
    assert!(supervisor.relay("heater").unwrap().is_off().await);
    assert!(supervisor.relay("chiller").unwrap().is_off().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_cold_beer_gets_heat() {
    let doc = set_point_doc(18.0, 0.3, json!([{ "seconds_ago": 5, "temperature": 17.5 }]));
    let mut supervisor = settled(&doc).await;
    assert!(supervisor.relay("heater").unwrap().is_on().await);
    assert!(supervisor.relay("chiller").unwrap().is_off().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_stale_sample_still_drives_heating() {
    let doc = set_point_doc(
        18.0,
        0.3,
        json!([{ "seconds_ago": 3600, "temperature": 17.5 }]),
    );
    let mut supervisor = settled(&doc).await;
    assert!(supervisor.relay("heater").unwrap().is_on().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_missing_data_keeps_both_relays_off() {
    let doc = set_point_doc(18.0, 0.3, json!([]));
    let mut supervisor = settled(&doc).await;
    assert!(supervisor.relay("heater").unwrap().is_off().await);
    assert!(supervisor.relay("chiller").unwrap().is_off().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_ramp_midway_heats() {
    let mut supervisor = settled(&linear_ramp_doc(21.0, 15.5)).await;
    assert!(supervisor.relay("heater").unwrap().is_on().await);
    assert!(supervisor.relay("chiller").unwrap().is_off().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_ramp_over_attenuated_cools() {
    let mut supervisor = settled(&linear_ramp_doc(26.0, 2.0)).await;
    assert!(supervisor.relay("heater").unwrap().is_off().await);
    assert!(supervisor.relay("chiller").unwrap().is_on().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_shutdown_releases_running_relays() {
    let doc = set_point_doc(18.0, 0.3, json!([{ "seconds_ago": 5, "temperature": 17.5 }]));
    let mut supervisor = settled(&doc).await;
    let heater = supervisor.relay("heater").unwrap();
    assert!(heater.is_on().await);
    let released = tokio::time::timeout(Duration::from_secs(5), supervisor.disassemble()).await;
    assert!(released.is_ok(), "disassemble did not finish within the stop bound");
    assert!(heater.is_off().await);
}

/// Store double whose change flag can be flipped, to watch the
/// supervisory loop pick up new configuration.
struct FlippingStore {
    spec: ConfigSpec,
    changed: AtomicBool,
    loads: AtomicUsize,
}

impl FlippingStore {
    fn new(doc: &Value) -> Self {
        let spec = ConfigSpec::from_value(doc.clone(), &Default::default()).unwrap();
        FlippingStore {
            spec,
            changed: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConfigStore for FlippingStore {
    fn name(&self) -> &str {
        "flip"
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn load(&self) -> Result<ConfigSpec> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.spec.clone())
    }

    async fn has_changed(&self) -> Result<bool> {
        Ok(self.changed.swap(false, Ordering::SeqCst))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_supervisory_loop_reloads_on_change() {
    let doc = set_point_doc(18.0, 0.3, json!([{ "seconds_ago": 5, "temperature": 17.5 }]));
    let store = std::sync::Arc::new(FlippingStore::new(&doc));

    struct Shared(std::sync::Arc<FlippingStore>);

    #[async_trait]
    impl ConfigStore for Shared {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn refresh_interval(&self) -> Duration {
            self.0.refresh_interval()
        }
        async fn load(&self) -> Result<ConfigSpec> {
            self.0.load().await
        }
        async fn has_changed(&self) -> Result<bool> {
            self.0.has_changed().await
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut supervisor = Supervisor::new("e2e", Box::new(Shared(store.clone())));
    let task = tokio::spawn(async move { supervisor.run(stop_rx).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);

    store.changed.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        store.loads.load(Ordering::SeqCst) >= 2,
        "supervisor never reloaded after the change flag flipped"
    );

    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bootstrap_descriptor_drives_the_whole_stack() {
    let text = r#"
bootstrap:
  name: garage
  type: inline
  config:
    relays:
      heater: { type: software }
    datasources:
      tilt:
        type: memory
        config:
          batches:
            PB0044:
              - { seconds_ago: 5, temperature: 17.0 }
    beers:
      PB0044:
        type: set_point
        config: { datasource: tilt, identifier: PB0044, set_point: 18.0, tolerance: 0.3 }
    managers:
      ferm1:
        config:
          beer: PB0044
          active_heating: yes
          active_heating_relay: heater
          polling_frequency: 0.05
"#;
    let descriptor = bootstrap::parse_bootstrap(text).unwrap();
    assert_eq!(descriptor.name, "garage");
    let store = bootstrap::store_from_bootstrap(&descriptor).unwrap();
    let mut supervisor = Supervisor::new(descriptor.name, store);
    supervisor.assemble().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(supervisor.relay("heater").unwrap().is_on().await);
    supervisor.disassemble().await;
}

#[tokio::test]
async fn test_invalid_spec_is_a_config_error() {
    let doc = json!({
        "beers": {
            "PB0044": {
                "type": "set_point",
                "config": { "datasource": "ghost", "identifier": "PB0044", "set_point": 18.0 }
            }
        }
    });
    let mut supervisor = Supervisor::new("e2e", inline_store(&doc));
    let err = supervisor.assemble().await.unwrap_err();
    assert!(matches!(err, FermenatorError::MissingReference { .. }));
    assert!(err.is_config_error());
}
