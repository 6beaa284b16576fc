//! Constructor lookup keyed by [`ComponentKind`].
//!
//! Importers hand over a kind tag, a name and a flat parameter map; the
//! registry picks the constructor for the tag. Every parameter a
//! constructor does not consume is an error, so typos do not pass
//! silently.

use indexmap::IndexMap;
use kirch_core::{AttributeStore, Complex64};

use crate::component::{Component, ComponentKind};
use crate::components::{
    Capacitor, ControlledVoltageSource, CurrentSource, DecouplingLine, Gain, Inductor, PiLine, Resistor,
    Switch, VoltageSource,
};
use crate::error::ComponentError;

/// Named real parameters for one component.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: IndexMap<String, f64>,
}

impl Params {
    /// Empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    /// Remove and return a required value.
    pub fn take(&mut self, component: &str, key: &str) -> Result<f64, ComponentError> {
        self.values
            .shift_remove(key)
            .ok_or_else(|| ComponentError::MissingParameter {
                component: component.to_string(),
                parameter: key.to_string(),
            })
    }

    /// Remove and return an optional value.
    pub fn take_or(&mut self, key: &str, default: f64) -> f64 {
        self.values.shift_remove(key).unwrap_or(default)
    }

    /// Fail on the first value nobody consumed.
    pub fn finish(self, component: &str) -> Result<(), ComponentError> {
        match self.values.into_keys().next() {
            Some(parameter) => Err(ComponentError::UnknownParameter {
                component: component.to_string(),
                parameter,
            }),
            None => Ok(()),
        }
    }
}

/// Boxed components built by one constructor call.
///
/// Most kinds yield one component; a decoupling line yields its two
/// halves.
pub type Built = Vec<Box<dyn Component>>;

/// Constructor signature.
pub type Constructor = fn(&mut AttributeStore, &str, &mut Params) -> Result<Built, ComponentError>;

/// Map from kind to constructor.
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    constructors: IndexMap<ComponentKind, Constructor>,
}

impl ComponentRegistry {
    /// Registry without constructors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with a constructor for every [`ComponentKind`].
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        r.register(ComponentKind::Resistor, resistor);
        r.register(ComponentKind::Inductor, inductor);
        r.register(ComponentKind::Capacitor, capacitor);
        r.register(ComponentKind::VoltageSource, voltage_source);
        r.register(ComponentKind::CurrentSource, current_source);
        r.register(ComponentKind::Switch, switch);
        r.register(ComponentKind::DecouplingLine, decoupling_line);
        r.register(ComponentKind::PiLine, pi_line);
        r.register(ComponentKind::ControlledVoltageSource, controlled_source);
        r.register(ComponentKind::Gain, gain);
        r
    }

    /// Register or replace the constructor of `kind`.
    pub fn register(&mut self, kind: ComponentKind, constructor: Constructor) {
        self.constructors.insert(kind, constructor);
    }

    /// Whether `kind` has a constructor.
    pub fn contains(&self, kind: ComponentKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Build from a kind.
    pub fn create(
        &self,
        kind: ComponentKind,
        store: &mut AttributeStore,
        name: &str,
        mut params: Params,
    ) -> Result<Built, ComponentError> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| ComponentError::UnknownKind(kind.tag().to_string()))?;
        let built = constructor(store, name, &mut params)?;
        params.finish(name)?;
        Ok(built)
    }

    /// Build from a tag string.
    pub fn create_tagged(
        &self,
        tag: &str,
        store: &mut AttributeStore,
        name: &str,
        params: Params,
    ) -> Result<Built, ComponentError> {
        self.create(tag.parse()?, store, name, params)
    }
}

fn one(c: impl Component + 'static) -> Result<Built, ComponentError> {
    Ok(vec![Box::new(c)])
}

fn phasor(name: &str, p: &mut Params) -> Result<(Complex64, f64), ComponentError> {
    let magnitude = p.take(name, "magnitude")?;
    let angle = p.take_or("angle", 0.0);
    let frequency = p.take_or("frequency", 0.0);
    Ok((Complex64::from_polar(magnitude, angle), frequency))
}

fn resistor(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    one(Resistor::new(s, name, p.take(name, "resistance")?)?)
}

fn inductor(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    one(Inductor::new(s, name, p.take(name, "inductance")?)?)
}

fn capacitor(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    one(Capacitor::new(s, name, p.take(name, "capacitance")?)?)
}

fn voltage_source(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    let (v, f) = phasor(name, p)?;
    one(VoltageSource::new(s, name, v, f)?)
}

fn current_source(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    let (i, f) = phasor(name, p)?;
    one(CurrentSource::new(s, name, i, f)?)
}

fn switch(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    let r_open = p.take(name, "r_open")?;
    let r_closed = p.take(name, "r_closed")?;
    let closed = p.take_or("closed", 0.0) != 0.0;
    one(Switch::new(s, name, r_open, r_closed, closed)?)
}

fn line(name: &str, p: &mut Params) -> Result<(f64, f64, f64), ComponentError> {
    Ok((
        p.take(name, "resistance")?,
        p.take(name, "inductance")?,
        p.take(name, "capacitance")?,
    ))
}

fn decoupling_line(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    let (r, l, c) = line(name, p)?;
    let (k, m) = DecouplingLine::new(s, name, r, l, c)?;
    Ok(vec![Box::new(k), Box::new(m)])
}

fn pi_line(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    let (r, l, c) = line(name, p)?;
    one(PiLine::new(s, name, r, l, c)?)
}

fn controlled_source(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    let setpoint = p.take_or("setpoint", 0.0);
    let gain = p.take_or("gain", 1.0);
    one(ControlledVoltageSource::new(s, name, setpoint, gain)?)
}

fn gain(s: &mut AttributeStore, name: &str, p: &mut Params) -> Result<Built, ComponentError> {
    one(Gain::new(s, name, p.take(name, "k")?)?)
}
