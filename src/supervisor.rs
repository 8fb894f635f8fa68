//! Bootstrap, assembly, hot reload and teardown.
//!
//! The supervisor is the root owner of the whole object graph. It
//! materializes a validated [`ConfigSpec`] in dependency order (relays,
//! then datasources, then beers, then managers), runs the managers,
//! periodically asks the config store whether anything changed, and
//! tears the graph down fully before building a replacement. Managers
//! only ever see the immutable snapshot they were assembled from.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::beer::{Beer, LinearRampBeer, SetPointBeer};
use crate::config::{cfg_str, ComponentSpec, ConfigSpec, ConfigStore};
use crate::datasource::{BrewConsoleDataSource, DataSource, GraphiteDataSource, MemoryDataSource};
use crate::error::{FermenatorError, Result};
use crate::manager::{Manager, ManagerHandle};
use crate::relay::{GpioRelay, Relay, SoftwareRelay};

/// How long a manager gets to acknowledge a stop before the supervisor
/// takes its relays away from it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// One fully-assembled, running object graph.
struct Graph {
    relays: BTreeMap<String, Arc<dyn Relay>>,
    datasources: BTreeMap<String, Arc<dyn DataSource>>,
    beers: BTreeMap<String, Arc<dyn Beer>>,
    managers: Vec<ManagerHandle>,
    stop: watch::Sender<bool>,
}

fn build_relay(name: &str, spec: &ComponentSpec) -> Result<Arc<dyn Relay>> {
    match spec.kind.as_str() {
        // The software relay is the default when no type is given.
        "software" | "Relay" | "" => Ok(Arc::new(SoftwareRelay::from_config(name, &spec.config)?)),
        "gpio" | "GPIORelay" => Ok(Arc::new(GpioRelay::from_config(name, &spec.config)?)),
        other => Err(FermenatorError::config(
            format!("relay '{}'", name),
            format!("unknown relay type '{}'", other),
        )),
    }
}

fn build_datasource(name: &str, spec: &ComponentSpec) -> Result<Arc<dyn DataSource>> {
    match spec.kind.as_str() {
        "memory" => Ok(Arc::new(MemoryDataSource::from_config(name, &spec.config)?)),
        "graphite" | "GraphiteDataSource" => Ok(Arc::new(GraphiteDataSource::from_config(
            name,
            &spec.config,
        )?)),
        "brewconsole" | "BrewConsoleFirebaseDS" => Ok(Arc::new(
            BrewConsoleDataSource::from_config(name, &spec.config)?,
        )),
        other => Err(FermenatorError::config(
            format!("datasource '{}'", name),
            format!("unknown datasource type '{}'", other),
        )),
    }
}

fn build_beer(
    name: &str,
    spec: &ComponentSpec,
    datasources: &BTreeMap<String, Arc<dyn DataSource>>,
) -> Result<Arc<dyn Beer>> {
    let item = format!("beer '{}'", name);
    let ds_name = cfg_str(&item, &spec.config, "datasource")?
        .ok_or_else(|| FermenatorError::config(&item, "datasource is required"))?;
    // Resolution is guaranteed by validation; this is the materialized lookup.
    let datasource = datasources
        .get(&ds_name)
        .cloned()
        .ok_or_else(|| FermenatorError::MissingReference {
            kind: "beer",
            name: name.to_string(),
            referent: "datasource",
            target: ds_name,
        })?;
    match spec.kind.as_str() {
        "set_point" | "SetPointBeer" => Ok(Arc::new(SetPointBeer::from_config(
            name,
            &spec.config,
            datasource,
        )?)),
        "linear_ramp" | "LinearBeer" => Ok(Arc::new(LinearRampBeer::from_config(
            name,
            &spec.config,
            datasource,
        )?)),
        other => Err(FermenatorError::config(
            &item,
            format!("unknown beer type '{}'", other),
        )),
    }
}

/// Materialize a validated spec and start its managers.
fn build_graph(spec: &ConfigSpec) -> Result<Graph> {
    spec.validate()?;

    let mut relays = BTreeMap::new();
    for (name, cspec) in &spec.relays {
        relays.insert(name.clone(), build_relay(name, cspec)?);
    }
    let mut datasources = BTreeMap::new();
    for (name, cspec) in &spec.datasources {
        datasources.insert(name.clone(), build_datasource(name, cspec)?);
    }
    let mut beers = BTreeMap::new();
    for (name, cspec) in &spec.beers {
        beers.insert(name.clone(), build_beer(name, cspec, &datasources)?);
    }

    // Construct every manager before starting any, so a bad one
    // cannot leave half the fleet running.
    let mut pending = Vec::new();
    for (name, cspec) in &spec.managers {
        let item = format!("manager '{}'", name);
        let beer_name = cfg_str(&item, &cspec.config, "beer")?
            .ok_or_else(|| FermenatorError::config(&item, "beer is required"))?;
        let beer = beers
            .get(&beer_name)
            .cloned()
            .ok_or_else(|| FermenatorError::MissingReference {
                kind: "manager",
                name: name.clone(),
                referent: "beer",
                target: beer_name,
            })?;
        let lookup_relay = |key: &str| -> Result<Option<Arc<dyn Relay>>> {
            match cfg_str(&item, &cspec.config, key)? {
                None => Ok(None),
                Some(relay_name) => relays
                    .get(&relay_name)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| FermenatorError::MissingReference {
                        kind: "manager",
                        name: name.clone(),
                        referent: "relay",
                        target: relay_name,
                    }),
            }
        };
        let heating = lookup_relay("active_heating_relay")?;
        let cooling = lookup_relay("active_cooling_relay")?;
        pending.push(Manager::from_config(
            name,
            &cspec.config,
            beer,
            heating,
            cooling,
        )?);
    }

    if pending.is_empty() {
        warn!("no managers in configuration, nothing will be controlled");
    }

    let (stop, _) = watch::channel(false);
    let managers = pending
        .into_iter()
        .map(|manager| Arc::new(manager).spawn(stop.subscribe()))
        .collect();

    Ok(Graph {
        relays,
        datasources,
        beers,
        managers,
        stop,
    })
}

pub struct Supervisor {
    name: String,
    store: Box<dyn ConfigStore>,
    spec: Option<ConfigSpec>,
    graph: Option<Graph>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, store: Box<dyn ConfigStore>) -> Self {
        Supervisor {
            name: name.into(),
            store,
            spec: None,
            graph: None,
        }
    }

    /// Load, validate and materialize the current configuration.
    pub async fn assemble(&mut self) -> Result<()> {
        let spec = self.store.load().await?;
        info!(supervisor = %self.name, version = %spec.version, "assembling");
        let graph = build_graph(&spec)?;
        info!(
            supervisor = %self.name,
            managers = graph.managers.len(),
            relays = graph.relays.len(),
            "assembled"
        );
        self.graph = Some(graph);
        self.spec = Some(spec);
        Ok(())
    }

    /// Supervisory loop: assemble, then poll for configuration changes
    /// until the shutdown channel flips. Always disassembles on exit.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.assemble().await?;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.store.refresh_interval()) => {
                    match self.store.has_changed().await {
                        Ok(true) => {
                            info!(supervisor = %self.name, "detected new configuration data");
                            self.reassemble().await?;
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(supervisor = %self.name, %err,
                                "change check failed, keeping current graph");
                        }
                    }
                }
            }
        }
        self.disassemble().await;
        Ok(())
    }

    /// Swap to the latest configuration. An invalid new spec leaves the
    /// running graph untouched; it is only torn down once the
    /// replacement has passed validation.
    pub async fn reassemble(&mut self) -> Result<()> {
        let spec = match self.store.load().await.and_then(|spec| {
            spec.validate()?;
            Ok(spec)
        }) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(
                    supervisor = %self.name,
                    %err,
                    "new configuration rejected, keeping previous graph"
                );
                return Ok(());
            }
        };
        self.teardown().await;
        match build_graph(&spec) {
            Ok(graph) => {
                info!(supervisor = %self.name, version = %spec.version, "reassembled");
                self.graph = Some(graph);
                self.spec = Some(spec);
                Ok(())
            }
            Err(err) => {
                error!(
                    supervisor = %self.name,
                    %err,
                    "could not build the new graph, restoring previous configuration"
                );
                let previous = self
                    .spec
                    .as_ref()
                    .ok_or(err)?;
                let graph = build_graph(previous)?;
                self.graph = Some(graph);
                Ok(())
            }
        }
    }

    /// Stop managers, force relays off, release datasources.
    pub async fn disassemble(&mut self) {
        info!(supervisor = %self.name, "disassembling");
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(mut graph) = self.graph.take() else {
            return;
        };
        let _ = graph.stop.send(true);
        for handle in graph.managers.drain(..) {
            let name = handle.name().to_string();
            if !handle.await_stopped(STOP_TIMEOUT).await {
                error!(
                    manager = %name,
                    "did not acknowledge stop in time, forcing its relays off"
                );
            }
        }
        // Belt and braces: every relay off, whatever the managers did.
        for relay in graph.relays.values() {
            relay.shutdown().await;
        }
        for datasource in graph.datasources.values() {
            datasource.close().await;
        }
    }

    /// Look up an assembled relay, mainly for inspection and tests.
    pub fn relay(&self, name: &str) -> Option<Arc<dyn Relay>> {
        self.graph.as_ref()?.relays.get(name).cloned()
    }

    /// Look up an assembled beer.
    pub fn beer(&self, name: &str) -> Option<Arc<dyn Beer>> {
        self.graph.as_ref()?.beers.get(name).cloned()
    }

    pub fn manager_count(&self) -> usize {
        self.graph.as_ref().map(|g| g.managers.len()).unwrap_or(0)
    }
}

/// Construct every configured relay and command it off. Used by the
/// `init` CLI path to override default-high pins right after boot.
pub async fn all_relays_off(store: &dyn ConfigStore) -> Result<()> {
    let spec = store.load().await?;
    for (name, cspec) in &spec.relays {
        match build_relay(name, cspec) {
            Ok(relay) => relay.shutdown().await,
            Err(err) => {
                warn!(relay = %name, %err, "could not construct relay to switch it off");
            }
        }
    }
    Ok(())
}
