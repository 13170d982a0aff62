//! # Export Graph
//!
//! The live object graph of a Brian-style simulation, as seen by the
//! model exporter. Every object here is caller-owned and read-only from
//! the exporter's point of view.
//!
//! This crate provides:
//! - Equations (differential, subexpression, parameter)
//! - Neuron groups with spike and custom events
//! - Input devices (spike generators, Poisson groups)
//! - Synapses with pathways and summed variables
//! - State, event, spike and population rate monitors
//! - Contained code objects tagged by an explicit kind
//! - Layered namespaces and identifier extraction from code

use export_core::{Clock, ExportError, Quantity, QuantityArray, Result, Scheduling, Unit, When};
use ndarray::Array1;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// IDENTIFIER EXTRACTION
// ============================================================================

/// Tokenizer for abstract code: only identifiers matter, everything else is skipped
#[derive(Parser)]
#[grammar_inline = r##"
code = { SOI ~ (comment | number | string | identifier | other)* ~ EOI }
comment = @{ "#" ~ (!NEWLINE ~ ANY)* }
number = @{
    (ASCII_DIGIT+ ~ ("." ~ ASCII_DIGIT*)? | "." ~ ASCII_DIGIT+)
    ~ (("e" | "E") ~ ("+" | "-")? ~ ASCII_DIGIT+)?
}
string = @{ "\"" ~ (!"\"" ~ ANY)* ~ "\"" | "'" ~ (!"'" ~ ANY)* ~ "'" }
identifier = @{ (ASCII_ALPHA | "_") ~ (ASCII_ALPHANUMERIC | "_")* }
other = _{ ANY }
"##]
struct CodeTokenizer;

/// Words that look like identifiers but are part of the code language
pub const KEYWORDS: [&str; 5] = ["and", "or", "not", "True", "False"];

/// Collect the free identifiers referenced by a piece of code
pub fn get_identifiers(code: &str) -> Result<BTreeSet<String>> {
    let pairs = CodeTokenizer::parse(Rule::code, code)
        .map_err(|e| ExportError::Parse(e.to_string()))?;

    Ok(pairs
        .flatten()
        .filter(|pair| pair.as_rule() == Rule::identifier)
        .map(|pair| pair.as_str())
        .filter(|name| !KEYWORDS.contains(name))
        .map(str::to_string)
        .collect())
}

// ============================================================================
// EQUATION SYSTEM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquationType {
    #[serde(rename = "differential equation")]
    DifferentialEquation,
    #[serde(rename = "subexpression")]
    Subexpression,
    #[serde(rename = "parameter")]
    Parameter,
}

/// Storage type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Float,
    Integer,
    Boolean,
}

/// Declarative flags attached to an equation, e.g. `(constant, shared)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EquationFlag {
    #[serde(rename = "constant")]
    Constant,
    #[serde(rename = "shared")]
    Shared,
    #[serde(rename = "linked")]
    Linked,
    #[serde(rename = "unless refractory")]
    UnlessRefractory,
    #[serde(rename = "constant over dt")]
    ConstantOverDt,
    #[serde(rename = "event-driven")]
    EventDriven,
    #[serde(rename = "clock-driven")]
    ClockDriven,
    #[serde(rename = "summed")]
    Summed,
}

/// Right-hand side of an equation, kept as source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub code: String,
}

impl Expression {
    pub fn new(code: &str) -> Self {
        Self { code: code.to_string() }
    }

    pub fn identifiers(&self) -> Result<BTreeSet<String>> {
        get_identifiers(&self.code)
    }
}

/// One line of an equation block: `dv/dt = expr : unit (flags)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleEquation {
    pub eq_type: EquationType,
    pub varname: String,
    pub unit: Unit,
    pub var_type: VarType,
    pub expr: Option<Expression>,
    pub flags: BTreeSet<EquationFlag>,
}

impl SingleEquation {
    fn build(eq_type: EquationType, varname: &str, expr: Option<&str>, unit: Unit) -> Self {
        Self {
            eq_type,
            varname: varname.to_string(),
            unit,
            var_type: VarType::Float,
            expr: expr.map(Expression::new),
            flags: BTreeSet::new(),
        }
    }

    /// `dvarname/dt = expr : unit`
    pub fn differential(varname: &str, expr: &str, unit: Unit) -> Self {
        Self::build(EquationType::DifferentialEquation, varname, Some(expr), unit)
    }

    /// `varname = expr : unit`
    pub fn subexpression(varname: &str, expr: &str, unit: Unit) -> Self {
        Self::build(EquationType::Subexpression, varname, Some(expr), unit)
    }

    /// `varname : unit`
    pub fn parameter(varname: &str, unit: Unit) -> Self {
        Self::build(EquationType::Parameter, varname, None, unit)
    }

    pub fn with_flag(mut self, flag: EquationFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn with_var_type(mut self, var_type: VarType) -> Self {
        self.var_type = var_type;
        self
    }
}

/// Ordered equation block of a group or synapse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Equations {
    equations: Vec<SingleEquation>,
}

impl Equations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equation, replacing any earlier one for the same variable
    pub fn with(mut self, eq: SingleEquation) -> Self {
        self.push(eq);
        self
    }

    pub fn push(&mut self, eq: SingleEquation) {
        match self.equations.iter_mut().find(|e| e.varname == eq.varname) {
            Some(existing) => *existing = eq,
            None => self.equations.push(eq),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SingleEquation> {
        self.equations.iter().find(|e| e.varname == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SingleEquation> {
        self.equations.iter()
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    fn names_of(&self, eq_type: EquationType) -> BTreeSet<String> {
        self.equations
            .iter()
            .filter(|e| e.eq_type == eq_type)
            .map(|e| e.varname.clone())
            .collect()
    }

    pub fn diff_eq_names(&self) -> BTreeSet<String> {
        self.names_of(EquationType::DifferentialEquation)
    }

    pub fn subexpr_names(&self) -> BTreeSet<String> {
        self.names_of(EquationType::Subexpression)
    }

    pub fn parameter_names(&self) -> BTreeSet<String> {
        self.names_of(EquationType::Parameter)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.equations.iter().map(|e| e.varname.clone()).collect()
    }

    /// Identifiers used by the expressions but not defined by this block.
    /// Stochastic symbols (`xi`, `xi_*`) are not identifiers.
    pub fn identifiers(&self) -> Result<BTreeSet<String>> {
        let defined = self.names();
        let mut used = BTreeSet::new();
        for eq in &self.equations {
            if eq.eq_type == EquationType::Parameter {
                continue;
            }
            if let Some(expr) = &eq.expr {
                used.extend(expr.identifiers()?);
            }
        }
        used.retain(|name| {
            !defined.contains(name) && name != "xi" && !name.starts_with("xi_")
        });
        Ok(used)
    }

    fn variables(&self) -> BTreeMap<String, Unit> {
        self.equations
            .iter()
            .map(|e| (e.varname.clone(), e.unit))
            .collect()
    }

    fn render(&self) -> String {
        self.equations
            .iter()
            .filter_map(|e| match (&e.eq_type, &e.expr) {
                (EquationType::DifferentialEquation, Some(expr)) => {
                    Some(format!("d{}/dt = {}", e.varname, expr.code))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Integration method requested by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum MethodChoice {
    /// Chosen automatically when the network runs
    #[default]
    Default,
    Named(String),
    /// Tried in order when the network runs
    Candidates(Vec<String>),
}

/// Refractory period specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefractorySpec {
    Duration(Quantity),   // Fixed duration
    Condition(String),    // Until condition is met
}

// ============================================================================
// CONTAINED CODE OBJECTS
// ============================================================================

/// Direction of a synaptic pathway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathwayRole {
    Pre,
    Post,
}

/// What a contained code object is, fixed by its owner at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeObjectKind {
    /// The owner's own integration step
    StateUpdater,
    Thresholder { event: String },
    Resetter { event: String },
    /// Free-standing code attached with `run_regularly`
    RunRegularly,
    SummedVariableUpdater { target: String },
    SynapticPathway {
        prepost: PathwayRole,
        event: String,
        source: String,
        target: String,
        delay: Option<Quantity>,
    },
}

/// Scheduled code block owned by a group or synapse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainedObject {
    pub name: String,
    pub kind: CodeObjectKind,
    pub code: String,
    pub scheduling: Scheduling,
}

impl ContainedObject {
    pub fn new(name: &str, kind: CodeObjectKind, code: &str, scheduling: Scheduling) -> Self {
        Self {
            name: name.to_string(),
            kind,
            code: code.to_string(),
            scheduling,
        }
    }
}

/// Append a `run_regularly` block named after its owner
fn push_run_regularly(
    owner: &str,
    objects: &mut Vec<ContainedObject>,
    clock: Clock,
    code: &str,
    dt: Option<Quantity>,
    when: When,
    order: i32,
) {
    let existing = objects
        .iter()
        .filter(|o| o.kind == CodeObjectKind::RunRegularly)
        .count();
    let name = match existing {
        0 => format!("{}_run_regularly", owner),
        n => format!("{}_run_regularly_{}", owner, n),
    };
    let mut scheduling = Scheduling::new(when, order).with_dt(clock.dt);
    if let Some(dt) = dt {
        scheduling = scheduling.with_dt(dt);
    }
    objects.push(ContainedObject::new(&name, CodeObjectKind::RunRegularly, code, scheduling));
}

fn set_clock(objects: &mut [ContainedObject], dt: Quantity) {
    for obj in objects {
        obj.scheduling = obj.scheduling.with_dt(dt);
    }
}

// ============================================================================
// NAMESPACES
// ============================================================================

/// Value an identifier stands for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NamespaceValue {
    Quantity(Quantity),
    Array(QuantityArray),
    Unit(Unit),
    Constant(#[serde(with = "constant_value")] f64),
    Function(String),
    /// State or built-in variable of the owning object
    Variable { unit: Unit },
}

/// Non-finite constants travel as `"inf"`, `"-inf"` or `"nan"`
mod constant_value {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Symbol(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if value.is_finite() {
            Repr::Number(*value)
        } else if value.is_nan() {
            Repr::Symbol("nan".into())
        } else if *value > 0.0 {
            Repr::Symbol("inf".into())
        } else {
            Repr::Symbol("-inf".into())
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Symbol(symbol) => match symbol.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(de::Error::custom(format!("unknown constant '{}'", other))),
            },
        }
    }
}

/// Where a name was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Local,
    Run,
    Library,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceLayer {
    pub kind: LayerKind,
    pub entries: BTreeMap<String, NamespaceValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub layer: LayerKind,
    pub value: NamespaceValue,
}

/// Explicit name bindings supplied when the network runs
pub type RunNamespace = BTreeMap<String, NamespaceValue>;

/// Ordered lookup sources; earlier layers shadow later ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    layers: Vec<NamespaceLayer>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(
        mut self,
        kind: LayerKind,
        entries: BTreeMap<String, NamespaceValue>,
    ) -> Self {
        self.layers.push(NamespaceLayer { kind, entries });
        self
    }

    /// Local scope, then the run namespace, then the shared library
    pub fn layered(local: BTreeMap<String, NamespaceValue>, run: &RunNamespace) -> Self {
        Self::new()
            .with_layer(LayerKind::Local, local)
            .with_layer(LayerKind::Run, run.clone())
            .with_layer(LayerKind::Library, library_namespace())
    }

    pub fn lookup(&self, name: &str) -> Option<Resolved> {
        self.layers.iter().find_map(|layer| {
            layer.entries.get(name).map(|value| Resolved {
                layer: layer.kind,
                value: value.clone(),
            })
        })
    }

    pub fn resolve_all(
        &self,
        entity: &str,
        identifiers: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Resolved>> {
        identifiers
            .iter()
            .map(|name| {
                self.lookup(name)
                    .map(|resolved| (name.clone(), resolved))
                    .ok_or_else(|| ExportError::UnresolvedIdentifier {
                        entity: entity.to_string(),
                        identifier: name.clone(),
                    })
            })
            .collect()
    }
}

const LIBRARY_FUNCTIONS: [&str; 23] = [
    "exp", "log", "log10", "sqrt", "sin", "cos", "tan", "sinh", "cosh", "tanh",
    "arcsin", "arccos", "arctan", "abs", "ceil", "floor", "sign", "clip", "int",
    "exprel", "rand", "randn", "timestep",
];

/// Units, constants and functions every piece of code may use
pub fn library_namespace() -> BTreeMap<String, NamespaceValue> {
    let mut entries = BTreeMap::new();
    for unit in Unit::all() {
        if *unit != Unit::Dimensionless {
            entries.insert(unit.symbol().to_string(), NamespaceValue::Unit(*unit));
        }
    }
    entries.insert("pi".into(), NamespaceValue::Constant(std::f64::consts::PI));
    entries.insert("e".into(), NamespaceValue::Constant(std::f64::consts::E));
    entries.insert("inf".into(), NamespaceValue::Constant(f64::INFINITY));
    for func in LIBRARY_FUNCTIONS {
        entries.insert(func.to_string(), NamespaceValue::Function(func.to_string()));
    }
    entries
}

/// Variables every clocked object provides
fn clock_variables() -> BTreeMap<String, NamespaceValue> {
    let mut vars = BTreeMap::new();
    vars.insert("t".into(), NamespaceValue::Variable { unit: Unit::Second });
    vars.insert("dt".into(), NamespaceValue::Variable { unit: Unit::Second });
    vars.insert("t_in_timesteps".into(), NamespaceValue::Variable { unit: Unit::Dimensionless });
    vars.insert("N".into(), NamespaceValue::Variable { unit: Unit::Dimensionless });
    vars.insert("i".into(), NamespaceValue::Variable { unit: Unit::Dimensionless });
    vars
}

fn variable_entries(
    vars: &BTreeMap<String, Unit>,
    suffix: &str,
) -> BTreeMap<String, NamespaceValue> {
    vars.iter()
        .map(|(name, unit)| {
            (format!("{}{}", name, suffix), NamespaceValue::Variable { unit: *unit })
        })
        .collect()
}

// ============================================================================
// SOURCES
// ============================================================================

/// Anything a monitor or synapse can refer to by name
pub trait Source {
    fn name(&self) -> &str;

    fn size(&self) -> usize;

    /// State variables and their units
    fn variables(&self) -> BTreeMap<String, Unit> {
        BTreeMap::new()
    }
}

// ============================================================================
// NEURON GROUP
// ============================================================================

/// A group of neurons sharing the same equations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuronGroup {
    pub name: String,
    pub n: usize,
    pub method: MethodChoice,
    pub equations: Equations,
    /// Threshold condition per event name
    pub events: BTreeMap<String, String>,
    /// Reset code per event name
    pub event_codes: BTreeMap<String, String>,
    pub refractory: Option<RefractorySpec>,
    pub clock: Clock,
    pub contained_objects: Vec<ContainedObject>,
}

impl NeuronGroup {
    pub fn new(name: &str, n: usize, equations: Equations) -> Self {
        let clock = Clock::default();
        let state_updater = ContainedObject::new(
            &format!("{}_stateupdater", name),
            CodeObjectKind::StateUpdater,
            &equations.render(),
            Scheduling::new(When::Groups, 0).with_dt(clock.dt),
        );

        Self {
            name: name.to_string(),
            n,
            method: MethodChoice::Default,
            equations,
            events: BTreeMap::new(),
            event_codes: BTreeMap::new(),
            refractory: None,
            clock,
            contained_objects: vec![state_updater],
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = MethodChoice::Named(method.to_string());
        self
    }

    pub fn with_method_choice(mut self, method: MethodChoice) -> Self {
        self.method = method;
        self
    }

    /// Run every contained object on a clock with this time step
    pub fn with_dt(mut self, dt: Quantity) -> Self {
        self.clock = Clock::new(dt);
        set_clock(&mut self.contained_objects, dt);
        self
    }

    /// Threshold of the built-in `spike` event
    pub fn with_threshold(self, condition: &str) -> Self {
        self.with_event("spike", condition)
    }

    /// Reset of the built-in `spike` event
    pub fn with_reset(self, code: &str) -> Self {
        self.with_event_reset("spike", code)
    }

    pub fn with_refractory(mut self, refractory: RefractorySpec) -> Self {
        self.refractory = Some(refractory);
        self
    }

    pub fn with_event(mut self, event: &str, condition: &str) -> Self {
        let name = match event {
            "spike" => format!("{}_thresholder", self.name),
            other => format!("{}_thresholder_{}", self.name, other),
        };
        self.events.insert(event.to_string(), condition.to_string());
        self.replace_object(ContainedObject::new(
            &name,
            CodeObjectKind::Thresholder { event: event.to_string() },
            condition,
            Scheduling::new(When::Thresholds, 0).with_dt(self.clock.dt),
        ));
        self
    }

    pub fn with_event_reset(mut self, event: &str, code: &str) -> Self {
        let name = match event {
            "spike" => format!("{}_resetter", self.name),
            other => format!("{}_resetter_{}", self.name, other),
        };
        self.event_codes.insert(event.to_string(), code.to_string());
        self.replace_object(ContainedObject::new(
            &name,
            CodeObjectKind::Resetter { event: event.to_string() },
            code,
            Scheduling::new(When::Resets, 0).with_dt(self.clock.dt),
        ));
        self
    }

    pub fn run_regularly(
        mut self,
        code: &str,
        dt: Option<Quantity>,
        when: When,
        order: i32,
    ) -> Self {
        let clock = self.clock;
        push_run_regularly(&self.name, &mut self.contained_objects, clock, code, dt, when, order);
        self
    }

    fn replace_object(&mut self, obj: ContainedObject) {
        self.contained_objects.retain(|o| o.kind != obj.kind);
        self.contained_objects.push(obj);
    }

    pub fn thresholder(&self, event: &str) -> Option<&ContainedObject> {
        self.contained_objects.iter().find(
            |o| matches!(&o.kind, CodeObjectKind::Thresholder { event: e } if e == event),
        )
    }

    pub fn resetter(&self, event: &str) -> Option<&ContainedObject> {
        self.contained_objects.iter().find(
            |o| matches!(&o.kind, CodeObjectKind::Resetter { event: e } if e == event),
        )
    }

    /// Variables the group adds on top of its equations
    fn builtin_variables(&self) -> BTreeMap<String, Unit> {
        let mut builtins = BTreeMap::new();
        if self.events.contains_key("spike") {
            builtins.insert("lastspike".to_string(), Unit::Second);
        }
        if self.refractory.is_some() {
            builtins.insert("not_refractory".to_string(), Unit::Dimensionless);
        }
        builtins
    }

    pub fn local_namespace(&self) -> BTreeMap<String, NamespaceValue> {
        let mut local = clock_variables();
        local.extend(variable_entries(&self.variables(), ""));
        local
    }

    pub fn resolve_all(
        &self,
        identifiers: &BTreeSet<String>,
        run_namespace: &RunNamespace,
    ) -> Result<BTreeMap<String, Resolved>> {
        Namespace::layered(self.local_namespace(), run_namespace)
            .resolve_all(&self.name, identifiers)
    }
}

impl Source for NeuronGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.n
    }

    fn variables(&self) -> BTreeMap<String, Unit> {
        let mut vars = self.builtin_variables();
        vars.extend(self.equations.variables());
        vars
    }
}

// ============================================================================
// INPUT DEVICES
// ============================================================================

/// Spike generator from predetermined spike times
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeGeneratorGroup {
    pub name: String,
    pub n: usize,
    /// Neuron index of each spike
    pub indices: Vec<usize>,
    /// Time of each spike
    pub times: QuantityArray,
    /// Repetition period, zero when spikes play once
    pub period: Quantity,
    pub clock: Clock,
    pub contained_objects: Vec<ContainedObject>,
}

impl SpikeGeneratorGroup {
    pub fn new(name: &str, n: usize, indices: &[usize], times: QuantityArray) -> Self {
        Self {
            name: name.to_string(),
            n,
            indices: indices.to_vec(),
            times,
            period: Quantity::zero(Unit::Second),
            clock: Clock::default(),
            contained_objects: vec![],
        }
    }

    pub fn with_period(mut self, period: Quantity) -> Self {
        self.period = period;
        self
    }

    pub fn run_regularly(
        mut self,
        code: &str,
        dt: Option<Quantity>,
        when: When,
        order: i32,
    ) -> Self {
        let clock = self.clock;
        push_run_regularly(&self.name, &mut self.contained_objects, clock, code, dt, when, order);
        self
    }
}

impl Source for SpikeGeneratorGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.n
    }
}

/// Firing rates of a Poisson group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rates {
    Scalar(Quantity),
    Array(QuantityArray),
    /// Code evaluated every time step
    Expression(String),
}

/// Poisson spike generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoissonGroup {
    pub name: String,
    pub n: usize,
    pub rates: Rates,
    pub clock: Clock,
    pub contained_objects: Vec<ContainedObject>,
}

impl PoissonGroup {
    pub fn new(name: &str, n: usize, rates: Rates) -> Self {
        let clock = Clock::default();
        let thresholder = ContainedObject::new(
            &format!("{}_thresholder", name),
            CodeObjectKind::Thresholder { event: "spike".into() },
            "rand() < rates * dt",
            Scheduling::new(When::Thresholds, 0).with_dt(clock.dt),
        );

        Self {
            name: name.to_string(),
            n,
            rates,
            clock,
            contained_objects: vec![thresholder],
        }
    }

    /// One rate per neuron, in Hz
    pub fn new_heterogeneous(name: &str, rates: Array1<f64>) -> Self {
        let n = rates.len();
        Self::new(name, n, Rates::Array(QuantityArray::new(rates, Unit::Hertz)))
    }

    pub fn run_regularly(
        mut self,
        code: &str,
        dt: Option<Quantity>,
        when: When,
        order: i32,
    ) -> Self {
        let clock = self.clock;
        push_run_regularly(&self.name, &mut self.contained_objects, clock, code, dt, when, order);
        self
    }

    pub fn local_namespace(&self) -> BTreeMap<String, NamespaceValue> {
        let mut local = clock_variables();
        local.insert("rates".into(), NamespaceValue::Variable { unit: Unit::Hertz });
        local
    }

    pub fn resolve_all(
        &self,
        identifiers: &BTreeSet<String>,
        run_namespace: &RunNamespace,
    ) -> Result<BTreeMap<String, Resolved>> {
        Namespace::layered(self.local_namespace(), run_namespace)
            .resolve_all(&self.name, identifiers)
    }
}

impl Source for PoissonGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.n
    }

    fn variables(&self) -> BTreeMap<String, Unit> {
        BTreeMap::from([("rates".to_string(), Unit::Hertz)])
    }
}

// ============================================================================
// SYNAPSES
// ============================================================================

/// Synapse connections between neuron groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synapses {
    pub name: String,
    pub source: String,      // Source group name
    pub target: String,      // Target group name
    pub method: MethodChoice,
    pub equations: Equations,
    /// Equations integrated only when a pre- or post-synaptic spike arrives
    pub event_driven: Option<Equations>,
    /// Sparse connectivity: (source_idx, target_idx)
    pub connections: Vec<(usize, usize)>,
    pub clock: Clock,
    pub contained_objects: Vec<ContainedObject>,
    source_variables: BTreeMap<String, Unit>,
    target_variables: BTreeMap<String, Unit>,
}

impl Synapses {
    pub fn new(
        name: &str,
        source: &impl Source,
        target: &impl Source,
        equations: Equations,
    ) -> Self {
        let clock = Clock::default();
        let state_updater = ContainedObject::new(
            &format!("{}_stateupdater", name),
            CodeObjectKind::StateUpdater,
            &equations.render(),
            Scheduling::new(When::Groups, 0).with_dt(clock.dt),
        );

        Self {
            name: name.to_string(),
            source: source.name().to_string(),
            target: target.name().to_string(),
            method: MethodChoice::Default,
            equations,
            event_driven: None,
            connections: vec![],
            clock,
            contained_objects: vec![state_updater],
            source_variables: source.variables(),
            target_variables: target.variables(),
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = MethodChoice::Named(method.to_string());
        self
    }

    pub fn with_event_driven(mut self, equations: Equations) -> Self {
        self.event_driven = Some(equations);
        self
    }

    pub fn with_on_pre(self, code: &str) -> Self {
        self.with_pathway(PathwayRole::Pre, "spike", code)
    }

    pub fn with_on_post(self, code: &str) -> Self {
        self.with_pathway(PathwayRole::Post, "spike", code)
    }

    /// Code run when `event` fires on the pre- or post-synaptic side
    pub fn with_pathway(mut self, prepost: PathwayRole, event: &str, code: &str) -> Self {
        let (name, source, target, order) = match prepost {
            PathwayRole::Pre => (format!("{}_pre", self.name), &self.source, &self.target, -1),
            PathwayRole::Post => (format!("{}_post", self.name), &self.target, &self.source, 1),
        };
        let kind = CodeObjectKind::SynapticPathway {
            prepost,
            event: event.to_string(),
            source: source.clone(),
            target: target.clone(),
            delay: None,
        };
        let scheduling = Scheduling::new(When::Synapses, order).with_dt(self.clock.dt);
        self.contained_objects.push(ContainedObject::new(&name, kind, code, scheduling));
        self
    }

    /// Set a homogeneous delay on every pathway of the given direction
    pub fn with_delay(mut self, role: PathwayRole, delay: Quantity) -> Self {
        for obj in &mut self.contained_objects {
            if let CodeObjectKind::SynapticPathway { prepost, delay: d, .. } = &mut obj.kind {
                if *prepost == role {
                    *d = Some(delay);
                }
            }
        }
        self
    }

    /// `varname_post = expr : unit (summed)` updating a variable of `target`
    pub fn with_summed_variable(
        mut self,
        varname: &str,
        expr: &str,
        unit: Unit,
        target: &impl Source,
    ) -> Self {
        self.equations.push(
            SingleEquation::subexpression(varname, expr, unit).with_flag(EquationFlag::Summed),
        );
        let kind = CodeObjectKind::SummedVariableUpdater {
            target: target.name().to_string(),
        };
        let scheduling = Scheduling::new(When::AfterGroups, 0).with_dt(self.clock.dt);
        self.contained_objects.push(ContainedObject::new(
            &format!("{}_summed_variable_{}", self.name, varname),
            kind,
            &format!("_synaptic_var = {}", expr),
            scheduling,
        ));
        self
    }

    pub fn with_dt(mut self, dt: Quantity) -> Self {
        self.clock = Clock::new(dt);
        set_clock(&mut self.contained_objects, dt);
        self
    }

    /// Connect all-to-all
    pub fn connect_all_to_all(&mut self, n_source: usize, n_target: usize) {
        for i in 0..n_source {
            for j in 0..n_target {
                self.connections.push((i, j));
            }
        }
    }

    /// One-to-one mapping
    pub fn connect_one_to_one(&mut self, n: usize) {
        for i in 0..n {
            self.connections.push((i, i));
        }
    }

    pub fn pathways(&self) -> impl Iterator<Item = &ContainedObject> {
        self.contained_objects
            .iter()
            .filter(|o| matches!(o.kind, CodeObjectKind::SynapticPathway { .. }))
    }

    pub fn local_namespace(&self) -> BTreeMap<String, NamespaceValue> {
        let mut local = clock_variables();
        for builtin in ["j", "N_incoming", "N_outgoing", "N_pre", "N_post"] {
            local.insert(builtin.into(), NamespaceValue::Variable { unit: Unit::Dimensionless });
        }
        local.insert("lastupdate".into(), NamespaceValue::Variable { unit: Unit::Second });
        local.insert("delay".into(), NamespaceValue::Variable { unit: Unit::Second });
        // Bare names fall back to the post-synaptic group
        local.extend(variable_entries(&self.target_variables, ""));
        local.extend(variable_entries(&self.target_variables, "_post"));
        local.extend(variable_entries(&self.source_variables, "_pre"));
        local.extend(variable_entries(&self.equations.variables(), ""));
        if let Some(event_driven) = &self.event_driven {
            local.extend(variable_entries(&event_driven.variables(), ""));
        }
        local
    }

    pub fn resolve_all(
        &self,
        identifiers: &BTreeSet<String>,
        run_namespace: &RunNamespace,
    ) -> Result<BTreeMap<String, Resolved>> {
        Namespace::layered(self.local_namespace(), run_namespace)
            .resolve_all(&self.name, identifiers)
    }
}

impl Source for Synapses {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.connections.len()
    }

    fn variables(&self) -> BTreeMap<String, Unit> {
        self.equations.variables()
    }
}

// ============================================================================
// MONITORS
// ============================================================================

/// Which indices of the source a monitor records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    All,
    Indices(Vec<usize>),
}

/// Record state variables over time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMonitor {
    pub name: String,
    pub source: String,
    pub variables: Vec<String>,
    pub record: Record,
    pub n_indices: usize,
    pub scheduling: Scheduling,
}

impl StateMonitor {
    pub fn new(name: &str, source: &impl Source, variables: &[&str], record: Record) -> Self {
        let n_indices = match &record {
            Record::All => source.size(),
            Record::Indices(indices) => indices.len(),
        };

        Self {
            name: name.to_string(),
            source: source.name().to_string(),
            variables: variables.iter().map(|s| s.to_string()).collect(),
            record,
            n_indices,
            scheduling: Scheduling::new(When::Start, 0),
        }
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }
}

/// Record occurrences of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMonitor {
    pub name: String,
    pub event: String,
    pub source: String,
    pub variables: Vec<String>,
    pub record: Record,
    pub scheduling: Scheduling,
}

impl EventMonitor {
    pub fn new(name: &str, source: &impl Source, event: &str) -> Self {
        Self {
            name: name.to_string(),
            event: event.to_string(),
            source: source.name().to_string(),
            variables: vec![],
            record: Record::All,
            scheduling: Scheduling::new(When::Thresholds, 1),
        }
    }

    /// Variables stored alongside each event
    pub fn with_variables(mut self, variables: &[&str]) -> Self {
        self.variables = variables.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.record = record;
        self
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }
}

/// Event monitor bound to the `spike` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeMonitor {
    inner: EventMonitor,
}

impl SpikeMonitor {
    pub fn new(name: &str, source: &impl Source) -> Self {
        Self {
            inner: EventMonitor::new(name, source, "spike"),
        }
    }

    pub fn with_variables(self, variables: &[&str]) -> Self {
        Self {
            inner: self.inner.with_variables(variables),
        }
    }

    pub fn with_record(self, record: Record) -> Self {
        Self {
            inner: self.inner.with_record(record),
        }
    }

    pub fn as_event_monitor(&self) -> &EventMonitor {
        &self.inner
    }
}

/// Population rate monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationRateMonitor {
    pub name: String,
    pub source: String,
    pub scheduling: Scheduling,
}

impl PopulationRateMonitor {
    pub fn new(name: &str, source: &impl Source) -> Self {
        Self {
            name: name.to_string(),
            source: source.name().to_string(),
            scheduling: Scheduling::new(When::End, 0),
        }
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }
}

// ============================================================================
// NETWORK
// ============================================================================

/// Any object a network can contain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrianObject {
    NeuronGroup(NeuronGroup),
    SpikeGeneratorGroup(SpikeGeneratorGroup),
    PoissonGroup(PoissonGroup),
    Synapses(Synapses),
    StateMonitor(StateMonitor),
    SpikeMonitor(SpikeMonitor),
    EventMonitor(EventMonitor),
    PopulationRateMonitor(PopulationRateMonitor),
    /// Object of a kind the exporter does not know
    Opaque { name: String, kind: String },
}

impl BrianObject {
    pub fn name(&self) -> &str {
        match self {
            Self::NeuronGroup(g) => &g.name,
            Self::SpikeGeneratorGroup(g) => &g.name,
            Self::PoissonGroup(g) => &g.name,
            Self::Synapses(s) => &s.name,
            Self::StateMonitor(m) => &m.name,
            Self::SpikeMonitor(m) => &m.as_event_monitor().name,
            Self::EventMonitor(m) => &m.name,
            Self::PopulationRateMonitor(m) => &m.name,
            Self::Opaque { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::NeuronGroup(_) => "NeuronGroup",
            Self::SpikeGeneratorGroup(_) => "SpikeGeneratorGroup",
            Self::PoissonGroup(_) => "PoissonGroup",
            Self::Synapses(_) => "Synapses",
            Self::StateMonitor(_) => "StateMonitor",
            Self::SpikeMonitor(_) => "SpikeMonitor",
            Self::EventMonitor(_) => "EventMonitor",
            Self::PopulationRateMonitor(_) => "PopulationRateMonitor",
            Self::Opaque { kind, .. } => kind,
        }
    }
}

macro_rules! impl_into_object {
    ($($ty:ident),*) => {
        $(impl From<$ty> for BrianObject {
            fn from(obj: $ty) -> Self {
                BrianObject::$ty(obj)
            }
        })*
    };
}

impl_into_object!(
    NeuronGroup,
    SpikeGeneratorGroup,
    PoissonGroup,
    Synapses,
    StateMonitor,
    SpikeMonitor,
    EventMonitor,
    PopulationRateMonitor
);

/// Complete Brian network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub objects: Vec<BrianObject>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, obj: impl Into<BrianObject>) {
        self.objects.push(obj.into());
    }

    pub fn get(&self, name: &str) -> Option<&BrianObject> {
        self.objects.iter().find(|o| o.name() == name)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lif_equations() -> Equations {
        Equations::new()
            .with(SingleEquation::differential("v", "(v_rest - v + I) / tau", Unit::Volt))
            .with(SingleEquation::parameter("I", Unit::Volt))
            .with(SingleEquation::subexpression("I_half", "I / 2", Unit::Volt))
    }

    #[test]
    fn test_get_identifiers() {
        let ids = get_identifiers("v > v_th and not refractory_flag").unwrap();
        let expected: BTreeSet<String> =
            ["v", "v_th", "refractory_flag"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_get_identifiers_skips_numbers_strings_comments() {
        let ids = get_identifiers("x = 1e-3 * ms + 2.5E+2 # tau\ny = 'label' + .5").unwrap();
        let expected: BTreeSet<String> = ["x", "ms", "y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_get_identifiers_empty() {
        assert!(get_identifiers("").unwrap().is_empty());
        assert!(get_identifiers("1 + 2").unwrap().is_empty());
    }

    #[test]
    fn test_equation_name_sets() {
        let eqs = lif_equations();
        assert_eq!(eqs.diff_eq_names(), BTreeSet::from(["v".to_string()]));
        assert_eq!(eqs.parameter_names(), BTreeSet::from(["I".to_string()]));
        assert_eq!(eqs.subexpr_names(), BTreeSet::from(["I_half".to_string()]));
        assert_eq!(eqs.len(), 3);
    }

    #[test]
    fn test_equation_identifiers_exclude_defined_and_noise() {
        let eqs = lif_equations()
            .with(SingleEquation::differential("w", "-w / tau_w + sigma * xi", Unit::Volt));
        let ids = eqs.identifiers().unwrap();
        let expected: BTreeSet<String> =
            ["v_rest", "tau", "tau_w", "sigma"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_push_replaces_same_variable() {
        let mut eqs = Equations::new().with(SingleEquation::parameter("a", Unit::Volt));
        eqs.push(SingleEquation::parameter("a", Unit::Ampere));
        assert_eq!(eqs.len(), 1);
        assert_eq!(eqs.get("a").unwrap().unit, Unit::Ampere);
    }

    #[test]
    fn test_namespace_layer_order() {
        let mut run = RunNamespace::new();
        run.insert("tau".into(), NamespaceValue::Quantity(Quantity::new(10.0, Unit::Millisecond)));
        run.insert("ms".into(), NamespaceValue::Constant(3.0));

        let ns = Namespace::layered(clock_variables(), &run);
        assert_eq!(ns.lookup("t").unwrap().layer, LayerKind::Local);
        assert_eq!(ns.lookup("tau").unwrap().layer, LayerKind::Run);
        // Run bindings shadow library units
        assert_eq!(ns.lookup("ms").unwrap().layer, LayerKind::Run);
        assert_eq!(ns.lookup("exp").unwrap().layer, LayerKind::Library);
        assert!(ns.lookup("nonexistent").is_none());
    }

    #[test]
    fn test_resolve_all_fails_on_unknown() {
        let ns = Namespace::layered(BTreeMap::new(), &RunNamespace::new());
        let ids = BTreeSet::from(["pi".to_string(), "mystery".to_string()]);
        match ns.resolve_all("G", &ids) {
            Err(ExportError::UnresolvedIdentifier { entity, identifier }) => {
                assert_eq!(entity, "G");
                assert_eq!(identifier, "mystery");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_neuron_group_contained_objects() {
        let group = NeuronGroup::new("G", 10, lif_equations())
            .with_threshold("v > 1")
            .with_reset("v = 0")
            .with_event("burst", "v > 2")
            .run_regularly("v = 0", None, When::Start, 0)
            .run_regularly("v += 1", None, When::End, 1);

        assert!(group.thresholder("spike").is_some());
        assert!(group.thresholder("burst").is_some());
        assert!(group.resetter("spike").is_some());
        assert!(group.resetter("burst").is_none());

        let names: Vec<&str> = group
            .contained_objects
            .iter()
            .filter(|o| o.kind == CodeObjectKind::RunRegularly)
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(names, vec!["G_run_regularly", "G_run_regularly_1"]);
    }

    #[test]
    fn test_neuron_group_with_dt_updates_objects() {
        let dt = Quantity::new(0.05, Unit::Millisecond);
        let group = NeuronGroup::new("G", 1, lif_equations()).with_threshold("v > 1").with_dt(dt);
        assert!(group.contained_objects.iter().all(|o| o.scheduling.dt() == dt));
    }

    #[test]
    fn test_neuron_group_local_namespace() {
        let group = NeuronGroup::new("G", 1, lif_equations())
            .with_threshold("v > 1")
            .with_refractory(RefractorySpec::Duration(Quantity::new(2.0, Unit::Millisecond)));
        let local = group.local_namespace();
        for name in ["t", "dt", "N", "i", "lastspike", "not_refractory", "v", "I"] {
            assert!(local.contains_key(name), "missing {}", name);
        }
    }

    #[test]
    fn test_synapse_namespace_suffixes() {
        let pre = NeuronGroup::new("pre", 2, lif_equations());
        let post = NeuronGroup::new("post", 3, lif_equations());
        let weights = Equations::new().with(SingleEquation::parameter("w", Unit::Volt));
        let syn = Synapses::new("S", &pre, &post, weights);
        let local = syn.local_namespace();
        for name in ["v_pre", "v_post", "v", "w", "j", "lastupdate"] {
            assert!(local.contains_key(name), "missing {}", name);
        }
    }

    #[test]
    fn test_synapse_namespace_group_builtins() {
        let pre = NeuronGroup::new("pre", 2, lif_equations())
            .with_threshold("v > 1")
            .with_refractory(RefractorySpec::Duration(Quantity::new(2.0, Unit::Millisecond)));
        let post = NeuronGroup::new("post", 3, lif_equations()).with_threshold("v > 1");
        let syn = Synapses::new("S", &pre, &post, Equations::new());
        let local = syn.local_namespace();
        for name in ["N_pre", "N_post", "lastspike_pre", "lastspike_post", "not_refractory_pre"] {
            assert!(local.contains_key(name), "missing {}", name);
        }
        // post has no refractory period
        assert!(!local.contains_key("not_refractory_post"));
        assert_eq!(local["lastspike_post"], NamespaceValue::Variable { unit: Unit::Second });
    }

    #[test]
    fn test_synapse_connectivity() {
        let pre = NeuronGroup::new("A", 3, Equations::new());
        let post = NeuronGroup::new("B", 4, Equations::new());
        let mut syn = Synapses::new("test", &pre, &post, Equations::new());
        syn.connect_all_to_all(3, 4);
        assert_eq!(syn.size(), 12); // 3 * 4

        let mut one = Synapses::new("one", &pre, &pre, Equations::new());
        one.connect_one_to_one(3);
        assert_eq!(one.connections, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_synapse_pathways_and_delay() {
        let g = NeuronGroup::new("G", 2, Equations::new());
        let syn = Synapses::new("S", &g, &g, Equations::new())
            .with_on_pre("v_post += w")
            .with_on_post("w += 0.1")
            .with_delay(PathwayRole::Pre, Quantity::new(1.5, Unit::Millisecond));

        let pathways: Vec<_> = syn.pathways().collect();
        assert_eq!(pathways.len(), 2);
        match &pathways[0].kind {
            CodeObjectKind::SynapticPathway { prepost, delay, .. } => {
                assert_eq!(*prepost, PathwayRole::Pre);
                assert_eq!(*delay, Some(Quantity::new(1.5, Unit::Millisecond)));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_state_monitor_n_indices() {
        let group = NeuronGroup::new("G", 100, lif_equations());
        let all = StateMonitor::new("M", &group, &["v"], Record::All);
        assert_eq!(all.record, Record::All);
        assert_eq!(all.n_indices, 100);

        let some = StateMonitor::new("M2", &group, &["v"], Record::Indices(vec![3, 5]));
        assert_eq!(some.n_indices, 2);
        assert_eq!(some.source, "G");
    }

    #[test]
    fn test_spike_monitor_is_event_monitor() {
        let group = NeuronGroup::new("G", 10, lif_equations());
        let mon = SpikeMonitor::new("spikes", &group).with_variables(&["v"]);
        assert_eq!(mon.as_event_monitor().event, "spike");
        assert_eq!(mon.as_event_monitor().variables, vec!["v".to_string()]);
    }

    #[test]
    fn test_network_lookup() {
        let mut net = Network::new();
        let group = NeuronGroup::new("G", 10, lif_equations());
        net.add(PopulationRateMonitor::new("rate", &group));
        net.add(group);
        net.objects.push(BrianObject::Opaque {
            name: "op".into(),
            kind: "NetworkOperation".into(),
        });

        assert_eq!(net.get("G").unwrap().kind(), "NeuronGroup");
        assert_eq!(net.get("rate").unwrap().kind(), "PopulationRateMonitor");
        assert_eq!(net.get("op").unwrap().kind(), "NetworkOperation");
        assert!(net.get("missing").is_none());
    }

    #[test]
    fn test_poisson_heterogeneous() {
        let group = PoissonGroup::new_heterogeneous("P", Array1::from(vec![5.0, 10.0, 20.0]));
        assert_eq!(group.size(), 3);
        assert!(matches!(group.rates, Rates::Array(_)));
    }
}
