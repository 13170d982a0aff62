//! # Export Collect
//!
//! Snapshot a Brian-style network into a [`ModelDocument`]: one record per
//! named object, holding everything needed to rebuild or translate it.
//! Writing the document to a concrete file format is left to the caller;
//! every record derives `Serialize`.
//!
//! ## Collectors
//!
//! | Object | Collector |
//! |--------|-----------|
//! | `NeuronGroup` | [`collect_neuron_group`] |
//! | `SpikeGeneratorGroup` | [`collect_spike_generator`] |
//! | `PoissonGroup` | [`collect_poisson_group`] |
//! | `StateMonitor` | [`collect_state_monitor`] |
//! | `SpikeMonitor` | [`collect_spike_monitor`] |
//! | `EventMonitor` | [`collect_event_monitor`] |
//! | `PopulationRateMonitor` | [`collect_population_rate_monitor`] |
//! | `Synapses` | [`collect_synapses`] |
//!
//! [`collect_network`] dispatches a whole network.

use export_core::{
    ExportError, Quantity, QuantityArray, Result, Scheduling, StageContext, Unit, When,
};
use export_graph::{
    get_identifiers, BrianObject, CodeObjectKind, ContainedObject, EquationFlag, EquationType,
    Equations, EventMonitor, MethodChoice, NamespaceValue, Network, NeuronGroup, PathwayRole,
    PoissonGroup, PopulationRateMonitor, Rates, Record, RefractorySpec, Resolved, LayerKind,
    RunNamespace, SpikeGeneratorGroup, SpikeMonitor, StateMonitor, Synapses, VarType,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// DOCUMENT SCHEMA
// ============================================================================

/// One named quantity of an object's dynamics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquationRecord {
    pub unit: Unit,
    #[serde(rename = "type")]
    pub eq_type: EquationType,
    pub var_type: VarType,
    /// Absent for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<BTreeSet<EquationFlag>>,
}

pub type EquationMap = BTreeMap<String, EquationRecord>;

/// Pruned identifiers and the values they resolved to
pub type IdentifierMap = BTreeMap<String, NamespaceValue>;

/// Threshold or reset code with its schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlockRecord {
    pub code: String,
    pub when: When,
    pub order: i32,
    pub dt: Quantity,
}

impl CodeBlockRecord {
    fn new(code: &str, scheduling: &Scheduling) -> Self {
        Self {
            code: code.to_string(),
            when: scheduling.when,
            order: scheduling.order,
            dt: scheduling.dt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub threshold: CodeBlockRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<CodeBlockRecord>,
    /// Only ever set on the `spike` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refractory: Option<RefractorySpec>,
}

pub type EventMap = BTreeMap<String, EventRecord>;

/// Code attached with `run_regularly`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRegularlyRecord {
    pub name: String,
    pub code: String,
    pub dt: Quantity,
    pub when: When,
    pub order: i32,
}

/// Integration method as requested by the user; `null` means it is
/// decided when the network runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserMethod {
    Named(String),
    Unresolved,
}

impl From<&MethodChoice> for UserMethod {
    fn from(choice: &MethodChoice) -> Self {
        match choice {
            MethodChoice::Named(name) => UserMethod::Named(name.clone()),
            MethodChoice::Default | MethodChoice::Candidates(_) => UserMethod::Unresolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronGroupRecord {
    pub name: String,
    #[serde(rename = "N")]
    pub n: usize,
    pub user_method: UserMethod,
    pub equations: EquationMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<EventMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<IdentifierMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_regularly: Option<Vec<RunRegularlyRecord>>,
    /// Slot of the state updater
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<When>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeGeneratorRecord {
    pub name: String,
    #[serde(rename = "N")]
    pub n: usize,
    pub indices: Vec<usize>,
    pub times: QuantityArray,
    pub period: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_regularly: Option<Vec<RunRegularlyRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoissonGroupRecord {
    pub name: String,
    #[serde(rename = "N")]
    pub n: usize,
    pub rates: Rates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<IdentifierMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_regularly: Option<Vec<RunRegularlyRecord>>,
}

/// Recorded indices: `true` for all of them, otherwise an explicit list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSelector", into = "RawSelector")]
pub enum RecordSelector {
    All,
    Indices(Vec<usize>),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Flag(bool),
    Indices(Vec<usize>),
}

impl From<RawSelector> for RecordSelector {
    fn from(raw: RawSelector) -> Self {
        match raw {
            RawSelector::Flag(true) => RecordSelector::All,
            RawSelector::Flag(false) => RecordSelector::Indices(vec![]),
            RawSelector::Indices(indices) => RecordSelector::Indices(indices),
        }
    }
}

impl From<RecordSelector> for RawSelector {
    fn from(selector: RecordSelector) -> Self {
        match selector {
            RecordSelector::All => RawSelector::Flag(true),
            RecordSelector::Indices(indices) => RawSelector::Indices(indices),
        }
    }
}

impl From<&Record> for RecordSelector {
    fn from(record: &Record) -> Self {
        match record {
            Record::All => RecordSelector::All,
            Record::Indices(indices) => RecordSelector::Indices(indices.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMonitorRecord {
    pub name: String,
    pub source: String,
    pub variables: Vec<String>,
    pub record: RecordSelector,
    pub n_indices: usize,
    pub dt: Quantity,
    pub when: When,
    pub order: i32,
}

/// Shared by spike and generic event monitors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMonitorRecord {
    pub name: String,
    pub event: String,
    pub source: String,
    pub variables: Vec<String>,
    pub record: RecordSelector,
    pub dt: Quantity,
    pub when: When,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRateMonitorRecord {
    pub name: String,
    pub source: String,
    pub dt: Quantity,
    pub when: When,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummedVariableRecord {
    pub code: String,
    pub target: String,
    pub name: String,
    pub dt: Quantity,
    pub when: When,
    pub order: i32,
}

/// On-pre or on-post code of a synapse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathwayRecord {
    pub name: String,
    pub prepost: PathwayRole,
    pub event: String,
    pub code: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Quantity>,
    pub dt: Quantity,
    pub when: When,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapsesRecord {
    pub name: String,
    pub source: String,
    pub target: String,
    pub user_method: UserMethod,
    pub equations: EquationMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathways: Option<Vec<PathwayRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summed_variables: Option<Vec<SummedVariableRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<IdentifierMap>,
}

/// Record of any collected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRecord {
    NeuronGroup(NeuronGroupRecord),
    SpikeGeneratorGroup(SpikeGeneratorRecord),
    PoissonGroup(PoissonGroupRecord),
    Synapses(SynapsesRecord),
    StateMonitor(StateMonitorRecord),
    SpikeMonitor(EventMonitorRecord),
    EventMonitor(EventMonitorRecord),
    PopulationRateMonitor(PopulationRateMonitorRecord),
}

/// Object name -> record, for one extraction pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelDocument {
    entities: BTreeMap<String, EntityRecord>,
}

impl ModelDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, record: EntityRecord) -> Result<()> {
        if self.entities.contains_key(name) {
            return Err(ExportError::DuplicateName(name.to_string()));
        }
        self.entities.insert(name.to_string(), record);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EntityRecord> {
        self.entities.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntityRecord)> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// IDENTIFIER PRUNING
// ============================================================================

/// Removes resolved identifiers that are internal or noise
pub trait IdentifierPruner {
    fn prune(&self, identifiers: BTreeMap<String, Resolved>) -> BTreeMap<String, Resolved>;
}

/// Settings of the [`LayerPruner`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    /// Drop names found in the object's own scope (`t`, `dt`, `N`, state variables)
    pub prune_local: bool,
    /// Drop library units, constants and functions
    pub prune_library: bool,
    pub always_keep: BTreeSet<String>,
    pub always_prune: BTreeSet<String>,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            prune_local: true,
            prune_library: true,
            always_keep: BTreeSet::new(),
            always_prune: BTreeSet::new(),
        }
    }
}

impl PruneConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Prunes by the namespace layer an identifier resolved in
#[derive(Debug, Clone, Default)]
pub struct LayerPruner {
    config: PruneConfig,
}

impl LayerPruner {
    pub fn new(config: PruneConfig) -> Self {
        Self { config }
    }
}

impl IdentifierPruner for LayerPruner {
    fn prune(&self, mut identifiers: BTreeMap<String, Resolved>) -> BTreeMap<String, Resolved> {
        identifiers.retain(|name, resolved| {
            if self.config.always_keep.contains(name) {
                return true;
            }
            let keep = !self.config.always_prune.contains(name)
                && match resolved.layer {
                    LayerKind::Local => !self.config.prune_local,
                    LayerKind::Library => !self.config.prune_library,
                    LayerKind::Run => true,
                };
            if !keep {
                log::trace!("Pruned identifier '{}' ({:?})", name, resolved.layer);
            }
            keep
        });
        identifiers
    }
}

/// Resolve, prune, and keep the result only when something is left
fn resolve_and_prune<F>(
    identifiers: &BTreeSet<String>,
    resolve: F,
    pruner: &dyn IdentifierPruner,
) -> Result<Option<IdentifierMap>>
where
    F: FnOnce(&BTreeSet<String>) -> Result<BTreeMap<String, Resolved>>,
{
    let pruned: IdentifierMap = pruner
        .prune(resolve(identifiers)?)
        .into_iter()
        .map(|(name, resolved)| (name, resolved.value))
        .collect();
    Ok(if pruned.is_empty() { None } else { Some(pruned) })
}

// ============================================================================
// EQUATIONS AND EVENTS
// ============================================================================

/// Collect an equation block into per-variable records
pub fn collect_equations(equations: &Equations) -> Result<EquationMap> {
    let mut eqn_map = EquationMap::new();

    for eq in equations.iter() {
        let expr = match eq.eq_type {
            EquationType::Parameter => None,
            _ => {
                let expr = eq
                    .expr
                    .as_ref()
                    .ok_or_else(|| {
                        ExportError::missing("equations", &format!("expr[{}]", eq.varname))
                    })?;
                Some(expr.code.clone())
            }
        };
        let flags = if eq.flags.is_empty() { None } else { Some(eq.flags.clone()) };

        eqn_map.insert(
            eq.varname.clone(),
            EquationRecord {
                unit: eq.unit,
                eq_type: eq.eq_type,
                var_type: eq.var_type,
                expr,
                flags,
            },
        );
    }

    Ok(eqn_map)
}

/// Collect the spike and custom events of a group, with the identifiers
/// their code refers to
pub fn collect_events(group: &NeuronGroup) -> Result<(EventMap, BTreeSet<String>)> {
    let mut events = EventMap::new();
    let mut identifiers = BTreeSet::new();

    for (event, condition) in &group.events {
        let thresholder = group
            .thresholder(event)
            .ok_or_else(|| ExportError::missing(&group.name, &format!("thresholder[{}]", event)))?;
        identifiers.extend(get_identifiers(condition)?);

        let reset = match group.event_codes.get(event) {
            Some(code) => {
                let resetter = group
                    .resetter(event)
                    .ok_or_else(|| {
                        ExportError::missing(&group.name, &format!("resetter[{}]", event))
                    })?;
                identifiers.extend(get_identifiers(code)?);
                Some(CodeBlockRecord::new(code, &resetter.scheduling))
            }
            None => None,
        };

        // Refractoriness belongs to the spike event alone, whatever the event order
        let refractory = match &group.refractory {
            Some(RefractorySpec::Duration(period)) if period.value == 0.0 => None,
            spec if event == "spike" => spec.clone(),
            _ => None,
        };
        if let Some(RefractorySpec::Condition(code)) = &refractory {
            identifiers.extend(get_identifiers(code)?);
        }

        events.insert(
            event.clone(),
            EventRecord {
                threshold: CodeBlockRecord::new(condition, &thresholder.scheduling),
                reset,
                refractory,
            },
        );
    }

    Ok((events, identifiers))
}

/// Free-standing `run_regularly` blocks; built-in updaters are excluded by kind
fn collect_run_regularly(objects: &[ContainedObject]) -> Option<Vec<RunRegularlyRecord>> {
    let records: Vec<RunRegularlyRecord> = objects
        .iter()
        .filter(|obj| obj.kind == CodeObjectKind::RunRegularly)
        .map(|obj| RunRegularlyRecord {
            name: obj.name.clone(),
            code: obj.code.clone(),
            dt: obj.scheduling.dt(),
            when: obj.scheduling.when,
            order: obj.scheduling.order,
        })
        .collect();

    if records.is_empty() { None } else { Some(records) }
}

// ============================================================================
// GROUPS
// ============================================================================

pub fn collect_neuron_group(
    group: &NeuronGroup,
    run_namespace: &RunNamespace,
    pruner: &dyn IdentifierPruner,
) -> Result<NeuronGroupRecord> {
    log::debug!("Collecting NeuronGroup '{}' (N={})", group.name, group.n);

    let equations = collect_equations(&group.equations).stage(&group.name, "equations")?;
    let mut identifiers = group.equations.identifiers().stage(&group.name, "equations")?;

    let events = if group.events.is_empty() {
        None
    } else {
        let (events, event_identifiers) = collect_events(group).stage(&group.name, "events")?;
        identifiers.extend(event_identifiers);
        Some(events)
    };

    let identifiers = resolve_and_prune(
        &identifiers,
        |ids| group.resolve_all(ids, run_namespace),
        pruner,
    )
    .stage(&group.name, "identifiers")?;

    let mut record = NeuronGroupRecord {
        name: group.name.clone(),
        n: group.n,
        user_method: UserMethod::from(&group.method),
        equations,
        events,
        identifiers,
        run_regularly: collect_run_regularly(&group.contained_objects),
        when: None,
        order: None,
    };

    if let Some(updater) = group
        .contained_objects
        .iter()
        .find(|obj| obj.kind == CodeObjectKind::StateUpdater)
    {
        record.when = Some(updater.scheduling.when);
        record.order = Some(updater.scheduling.order);
    }

    Ok(record)
}

pub fn collect_spike_generator(spike_gen: &SpikeGeneratorGroup) -> SpikeGeneratorRecord {
    log::debug!(
        "Collecting SpikeGeneratorGroup '{}' ({} spikes)",
        spike_gen.name,
        spike_gen.indices.len()
    );

    SpikeGeneratorRecord {
        name: spike_gen.name.clone(),
        n: spike_gen.n,
        indices: spike_gen.indices.clone(),
        times: spike_gen.times.clone(),
        period: spike_gen.period,
        run_regularly: collect_run_regularly(&spike_gen.contained_objects),
    }
}

pub fn collect_poisson_group(
    poisson_grp: &PoissonGroup,
    run_namespace: &RunNamespace,
    pruner: &dyn IdentifierPruner,
) -> Result<PoissonGroupRecord> {
    log::debug!("Collecting PoissonGroup '{}' (N={})", poisson_grp.name, poisson_grp.n);

    let identifiers = match &poisson_grp.rates {
        Rates::Expression(code) => get_identifiers(code).stage(&poisson_grp.name, "rates")?,
        Rates::Scalar(_) | Rates::Array(_) => BTreeSet::new(),
    };
    let identifiers = resolve_and_prune(
        &identifiers,
        |ids| poisson_grp.resolve_all(ids, run_namespace),
        pruner,
    )
    .stage(&poisson_grp.name, "identifiers")?;

    Ok(PoissonGroupRecord {
        name: poisson_grp.name.clone(),
        n: poisson_grp.n,
        rates: poisson_grp.rates.clone(),
        identifiers,
        run_regularly: collect_run_regularly(&poisson_grp.contained_objects),
    })
}

// ============================================================================
// MONITORS
// ============================================================================

pub fn collect_state_monitor(state_mon: &StateMonitor) -> StateMonitorRecord {
    StateMonitorRecord {
        name: state_mon.name.clone(),
        source: state_mon.source.clone(),
        variables: state_mon.variables.clone(),
        record: RecordSelector::from(&state_mon.record),
        n_indices: state_mon.n_indices,
        dt: state_mon.scheduling.dt(),
        when: state_mon.scheduling.when,
        order: state_mon.scheduling.order,
    }
}

/// Spike monitors are event monitors on `spike`
pub fn collect_spike_monitor(spike_mon: &SpikeMonitor) -> EventMonitorRecord {
    collect_event_monitor(spike_mon.as_event_monitor())
}

pub fn collect_event_monitor(event_mon: &EventMonitor) -> EventMonitorRecord {
    EventMonitorRecord {
        name: event_mon.name.clone(),
        event: event_mon.event.clone(),
        source: event_mon.source.clone(),
        variables: event_mon.variables.clone(),
        record: RecordSelector::from(&event_mon.record),
        dt: event_mon.scheduling.dt(),
        when: event_mon.scheduling.when,
        order: event_mon.scheduling.order,
    }
}

pub fn collect_population_rate_monitor(
    poprate_mon: &PopulationRateMonitor,
) -> PopulationRateMonitorRecord {
    PopulationRateMonitorRecord {
        name: poprate_mon.name.clone(),
        source: poprate_mon.source.clone(),
        dt: poprate_mon.scheduling.dt(),
        when: poprate_mon.scheduling.when,
        order: poprate_mon.scheduling.order,
    }
}

// ============================================================================
// SYNAPSES
// ============================================================================

pub fn collect_synapses(
    synapses: &Synapses,
    run_namespace: &RunNamespace,
    pruner: &dyn IdentifierPruner,
) -> Result<SynapsesRecord> {
    log::debug!(
        "Collecting Synapses '{}' ({} -> {})",
        synapses.name,
        synapses.source,
        synapses.target
    );

    // Event-driven definitions win on a name collision
    let mut equations = collect_equations(&synapses.equations).stage(&synapses.name, "equations")?;
    let mut identifiers = synapses.equations.identifiers().stage(&synapses.name, "equations")?;
    if let Some(event_driven) = &synapses.event_driven {
        equations.extend(
            collect_equations(event_driven).stage(&synapses.name, "event-driven equations")?,
        );
        identifiers.extend(
            event_driven.identifiers().stage(&synapses.name, "event-driven equations")?,
        );
    }

    let mut pathways = Vec::new();
    let mut summed_variables = Vec::new();
    for obj in &synapses.contained_objects {
        match &obj.kind {
            CodeObjectKind::SynapticPathway { prepost, event, source, target, delay } => {
                identifiers.extend(get_identifiers(&obj.code).stage(&synapses.name, "pathways")?);
                pathways.push(PathwayRecord {
                    name: obj.name.clone(),
                    prepost: *prepost,
                    event: event.clone(),
                    code: obj.code.clone(),
                    source: source.clone(),
                    target: target.clone(),
                    delay: *delay,
                    dt: obj.scheduling.dt(),
                    when: obj.scheduling.when,
                    order: obj.scheduling.order,
                });
            }
            CodeObjectKind::SummedVariableUpdater { target } => {
                summed_variables.push(SummedVariableRecord {
                    code: obj.code.clone(),
                    target: target.clone(),
                    name: obj.name.clone(),
                    dt: obj.scheduling.dt(),
                    when: obj.scheduling.when,
                    order: obj.scheduling.order,
                });
            }
            _ => log::trace!("Skipping contained object '{}' of {}", obj.name, synapses.name),
        }
    }

    let identifiers = resolve_and_prune(
        &identifiers,
        |ids| synapses.resolve_all(ids, run_namespace),
        pruner,
    )
    .stage(&synapses.name, "identifiers")?;

    Ok(SynapsesRecord {
        name: synapses.name.clone(),
        source: synapses.source.clone(),
        target: synapses.target.clone(),
        user_method: UserMethod::from(&synapses.method),
        equations,
        pathways: if pathways.is_empty() { None } else { Some(pathways) },
        summed_variables: if summed_variables.is_empty() { None } else { Some(summed_variables) },
        identifiers,
    })
}

// ============================================================================
// NETWORK
// ============================================================================

/// Dispatch one object to the collector for its kind
pub fn collect_object(
    obj: &BrianObject,
    run_namespace: &RunNamespace,
    pruner: &dyn IdentifierPruner,
) -> Result<EntityRecord> {
    Ok(match obj {
        BrianObject::NeuronGroup(g) => {
            EntityRecord::NeuronGroup(collect_neuron_group(g, run_namespace, pruner)?)
        }
        BrianObject::SpikeGeneratorGroup(g) => {
            EntityRecord::SpikeGeneratorGroup(collect_spike_generator(g))
        }
        BrianObject::PoissonGroup(g) => {
            EntityRecord::PoissonGroup(collect_poisson_group(g, run_namespace, pruner)?)
        }
        BrianObject::Synapses(s) => {
            EntityRecord::Synapses(collect_synapses(s, run_namespace, pruner)?)
        }
        BrianObject::StateMonitor(m) => EntityRecord::StateMonitor(collect_state_monitor(m)),
        BrianObject::SpikeMonitor(m) => EntityRecord::SpikeMonitor(collect_spike_monitor(m)),
        BrianObject::EventMonitor(m) => EntityRecord::EventMonitor(collect_event_monitor(m)),
        BrianObject::PopulationRateMonitor(m) => {
            EntityRecord::PopulationRateMonitor(collect_population_rate_monitor(m))
        }
        BrianObject::Opaque { name, kind } => {
            return Err(ExportError::UnsupportedKind {
                name: name.clone(),
                kind: kind.clone(),
            })
        }
    })
}

/// Snapshot every object of a network. Fails on the first object that
/// cannot be collected; no partial document is returned.
pub fn collect_network(
    network: &Network,
    run_namespace: &RunNamespace,
    pruner: &dyn IdentifierPruner,
) -> Result<ModelDocument> {
    let mut document = ModelDocument::new();
    for obj in &network.objects {
        let record = collect_object(obj, run_namespace, pruner)?;
        document.insert(obj.name(), record)?;
    }
    log::debug!("Collected {} objects", document.len());
    Ok(document)
}

// ============================================================================
// TESTS
// ============================================================================
