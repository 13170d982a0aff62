//! # Export Core
//!
//! Shared vocabulary for snapshotting a Brian-style simulation into a
//! language-neutral model document.
//!
//! ## Contents
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Unit`], [`Quantity`], [`QuantityArray`] | Physical values with units |
//! | [`When`], [`Clock`], [`Scheduling`] | Where and how often a code block runs |
//! | [`ExportError`] | Error taxonomy shared by every export crate |

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised while extracting a model document
#[derive(Debug, Error)]
pub enum ExportError {
    /// The entity lacks something its collector requires
    #[error("{entity} is missing required attribute '{attribute}'")]
    MissingAttribute { entity: String, attribute: String },

    /// No collector exists for this kind of object
    #[error("No collector for '{name}' of kind {kind}")]
    UnsupportedKind { name: String, kind: String },

    /// A name was not found in any namespace layer
    #[error("Identifier '{identifier}' used by {entity} could not be resolved")]
    UnresolvedIdentifier { entity: String, identifier: String },

    #[error("Duplicate object name: {0}")]
    DuplicateName(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any of the above, located at a collector stage of one entity
    #[error("{entity} ({stage}): {source}")]
    Stage {
        entity: String,
        stage: &'static str,
        source: Box<ExportError>,
    },
}

impl ExportError {
    pub fn missing(entity: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Strip any stage wrappers and return the underlying error
    pub fn root(&self) -> &ExportError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Attach entity and stage context to a failing result
pub trait StageContext<T> {
    fn stage(self, entity: &str, stage: &'static str) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, entity: &str, stage: &'static str) -> Result<T> {
        self.map_err(|e| ExportError::Stage {
            entity: entity.to_string(),
            stage,
            source: Box::new(e),
        })
    }
}

// ============================================================================
// UNITS
// ============================================================================

/// Physical units with SI prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    // Time
    Second,
    Millisecond,  // ms
    Microsecond,  // us

    // Voltage
    Volt,
    Millivolt,    // mV

    // Current
    Ampere,
    Nanoampere,   // nA
    Picoampere,   // pA

    // Conductance
    Siemens,
    Nanosiemens,  // nS
    Microsiemens, // uS

    // Capacitance
    Farad,
    Picofarad,    // pF

    // Resistance
    Ohm,
    Megaohm,      // MOhm
    Gigaohm,      // GOhm

    // Frequency
    Hertz,

    // Dimensionless
    Dimensionless,
}

impl Unit {
    /// Name the unit is bound to in equation code
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Second => "second",
            Unit::Millisecond => "ms",
            Unit::Microsecond => "us",
            Unit::Volt => "volt",
            Unit::Millivolt => "mV",
            Unit::Ampere => "amp",
            Unit::Nanoampere => "nA",
            Unit::Picoampere => "pA",
            Unit::Siemens => "siemens",
            Unit::Nanosiemens => "nS",
            Unit::Microsiemens => "uS",
            Unit::Farad => "farad",
            Unit::Picofarad => "pF",
            Unit::Ohm => "ohm",
            Unit::Megaohm => "Mohm",
            Unit::Gigaohm => "Gohm",
            Unit::Hertz => "Hz",
            Unit::Dimensionless => "1",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Unit> {
        Unit::all().iter().copied().find(|u| u.symbol() == symbol)
    }

    pub fn all() -> &'static [Unit] {
        &[
            Unit::Second,
            Unit::Millisecond,
            Unit::Microsecond,
            Unit::Volt,
            Unit::Millivolt,
            Unit::Ampere,
            Unit::Nanoampere,
            Unit::Picoampere,
            Unit::Siemens,
            Unit::Nanosiemens,
            Unit::Microsiemens,
            Unit::Farad,
            Unit::Picofarad,
            Unit::Ohm,
            Unit::Megaohm,
            Unit::Gigaohm,
            Unit::Hertz,
            Unit::Dimensionless,
        ]
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Quantity with value and unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn zero(unit: Unit) -> Self {
        Self::new(0.0, unit)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Array of values sharing one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityArray {
    pub values: Array1<f64>,
    pub unit: Unit,
}

impl QuantityArray {
    pub fn new(values: Array1<f64>, unit: Unit) -> Self {
        Self { values, unit }
    }

    pub fn from_vec(values: Vec<f64>, unit: Unit) -> Self {
        Self::new(Array1::from(values), unit)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// SCHEDULING
// ============================================================================

/// Slot within a time step at which a code block runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    Start,
    BeforeGroups,
    Groups,
    AfterGroups,
    BeforeThresholds,
    Thresholds,
    AfterThresholds,
    BeforeSynapses,
    Synapses,
    AfterSynapses,
    BeforeResets,
    Resets,
    AfterResets,
    End,
}

impl When {
    const ALL: [When; 14] = [
        When::Start,
        When::BeforeGroups,
        When::Groups,
        When::AfterGroups,
        When::BeforeThresholds,
        When::Thresholds,
        When::AfterThresholds,
        When::BeforeSynapses,
        When::Synapses,
        When::AfterSynapses,
        When::BeforeResets,
        When::Resets,
        When::AfterResets,
        When::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            When::Start => "start",
            When::BeforeGroups => "before_groups",
            When::Groups => "groups",
            When::AfterGroups => "after_groups",
            When::BeforeThresholds => "before_thresholds",
            When::Thresholds => "thresholds",
            When::AfterThresholds => "after_thresholds",
            When::BeforeSynapses => "before_synapses",
            When::Synapses => "synapses",
            When::AfterSynapses => "after_synapses",
            When::BeforeResets => "before_resets",
            When::Resets => "resets",
            When::AfterResets => "after_resets",
            When::End => "end",
        }
    }
}

impl FromStr for When {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        When::ALL
            .iter()
            .copied()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| ExportError::Parse(format!("unknown scheduling slot '{}'", s)))
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulation clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    pub dt: Quantity,
}

impl Clock {
    pub fn new(dt: Quantity) -> Self {
        Self { dt }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(Quantity::new(0.1, Unit::Millisecond))
    }
}

/// Clock, slot and priority of a scheduled object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scheduling {
    pub clock: Clock,
    pub when: When,
    pub order: i32,
}

impl Scheduling {
    pub fn new(when: When, order: i32) -> Self {
        Self {
            clock: Clock::default(),
            when,
            order,
        }
    }

    pub fn with_dt(mut self, dt: Quantity) -> Self {
        self.clock = Clock::new(dt);
        self
    }

    pub fn dt(&self) -> Quantity {
        self.clock.dt
    }
}
