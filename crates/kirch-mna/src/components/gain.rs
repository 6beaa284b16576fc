use kirch_core::{Attr, AttrSet, AttributeStore};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{Component, ComponentKind, Layout, SystemEnv};
use crate::error::ComponentError;
use crate::solver::SystemBinding;

/// Signal block: `output = k * input`.
///
/// No terminals and no matrix involvement. Bind `input` to any real cell
/// (a node voltage, a port current) and bind a consumer to `output`.
/// A gain closing a loop through the network must be
/// [`delayed`](Self::delayed), reading its input from the previous step;
/// otherwise schedule construction reports the loop as a cycle.
#[derive(Debug)]
pub struct Gain {
    name: String,
    input: Attr<f64>,
    output: Attr<f64>,
    k: Attr<f64>,
    delayed: bool,
}

impl Gain {
    /// Gain block with factor `k`.
    pub fn new(store: &mut AttributeStore, name: &str, k: f64) -> Result<Self, ComponentError> {
        if !k.is_finite() {
            return Err(ComponentError::InvalidParameter {
                component: name.to_string(),
                parameter: "k".to_string(),
                reason: format!("must be finite, got {k}"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            input: store.create(name, "input", 0.0)?,
            output: store.create(name, "output", 0.0)?,
            k: store.create(name, "k", k)?,
            delayed: false,
        })
    }

    /// Read the input's previous-step value.
    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    /// Input cell.
    pub fn input(&self) -> Attr<f64> {
        self.input
    }

    /// Output cell.
    pub fn output(&self) -> Attr<f64> {
        self.output
    }

    /// Factor cell.
    pub fn factor(&self) -> Attr<f64> {
        self.k
    }
}

impl Component for Gain {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Gain
    }

    fn terminal_count(&self) -> usize {
        0
    }

    fn attach(&mut self, _layout: Layout, _env: &SystemEnv) -> Result<(), ComponentError> {
        Ok(())
    }

    fn tasks(&self, _binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let (input, output, k) = (self.input, self.output, self.k);
        let task = FnTask::new(self.name.clone(), Phase::Step).writes(AttrSet::empty().with(output));
        let task = if self.delayed {
            task.reads(AttrSet::empty().with(k))
                .reads_previous(AttrSet::empty().with(input))
                .body(move |ctx| {
                    let y = ctx.read(k)? * ctx.read_previous(input)?;
                    ctx.write(output, y)
                })
        } else {
            task.reads(AttrSet::empty().with(k).with(input))
                .body(move |ctx| {
                    let y = ctx.read(k)? * ctx.read(input)?;
                    ctx.write(output, y)
                })
        };
        Ok(vec![task.shared()])
    }
}
