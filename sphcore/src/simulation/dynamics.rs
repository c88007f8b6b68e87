//! Dynamics dispatch: the uniform way physical models are applied to particles.
//!
//! - `SimpleDynamics`        : per-particle update over one body
//! - `InteractionDynamics`   : per-particle interaction reading a relation's neighbor tables
//! - `InteractionWithUpdate` : interaction followed by a per-particle update
//! - `Dynamics1Level`        : initialization -> interaction -> update
//! - `ReduceDynamics`        : per-particle value folded into one result
//!
//! Model bodies are injected through the `LocalUpdate`, `LocalInteraction` and
//! `LocalReduce` traits (closures work for the first one directly, and through
//! `InteractionFn` / `ReduceFn` for the other two). The dispatcher itself does no physics.
//!
//! Interactions run in two phases: every particle's value is computed against an
//! immutable view of the system, then each value is committed to its own particle.
//! A model therefore cannot write a neighbor's state.

use std::marker::PhantomData;

use rayon::prelude::*;

use crate::error::Result;
use crate::simulation::engine::ExecutionPolicy;
use crate::simulation::relation::{Neighborhood, Relation, EMPTY_NEIGHBORHOOD};
use crate::simulation::states::{Body, BodyId, Particle, RelationId, System};

/// Whether an update changes particle positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Motion {
    #[default]
    Stationary,
    Kinematic, // moves particles; dependent relations go stale
}

/// Per-particle state update
pub trait LocalUpdate: Send + Sync {
    fn update(&self, i: usize, dt: f64, particle: &mut Particle);
}

impl<F> LocalUpdate for F
where
    F: Fn(usize, f64, &mut Particle) + Send + Sync,
{
    fn update(&self, i: usize, dt: f64, particle: &mut Particle) {
        self(i, dt, particle)
    }
}

/// Per-particle interaction: compute from neighbors, then commit to the own particle only
pub trait LocalInteraction: Send + Sync {
    type Value: Send;

    fn interaction(&self, i: usize, dt: f64, ctx: &DispatchContext) -> Self::Value;

    fn commit(&self, i: usize, dt: f64, value: Self::Value, particle: &mut Particle);
}

/// Per-particle value folded with an associative and commutative operator
pub trait LocalReduce: Send + Sync {
    type Value: Send;

    fn identity(&self) -> Self::Value;

    fn reduce(&self, a: Self::Value, b: Self::Value) -> Self::Value;

    fn local(&self, i: usize, dt: f64, ctx: &DispatchContext) -> Self::Value;

    /// Post-processing of the folded value
    fn finish(&self, value: Self::Value) -> Self::Value {
        value
    }
}

/// `LocalInteraction` from a pair of closures
pub struct InteractionFn<F, C, V> {
    interaction: F,
    commit: C,
    _value: PhantomData<fn() -> V>,
}

impl<F, C, V> InteractionFn<F, C, V>
where
    F: Fn(usize, f64, &DispatchContext) -> V + Send + Sync,
    C: Fn(usize, f64, V, &mut Particle) + Send + Sync,
    V: Send,
{
    pub fn new(interaction: F, commit: C) -> Self {
        Self { interaction, commit, _value: PhantomData }
    }
}

impl<F, C, V> LocalInteraction for InteractionFn<F, C, V>
where
    F: Fn(usize, f64, &DispatchContext) -> V + Send + Sync,
    C: Fn(usize, f64, V, &mut Particle) + Send + Sync,
    V: Send,
{
    type Value = V;

    fn interaction(&self, i: usize, dt: f64, ctx: &DispatchContext) -> V {
        (self.interaction)(i, dt, ctx)
    }

    fn commit(&self, i: usize, dt: f64, value: V, particle: &mut Particle) {
        (self.commit)(i, dt, value, particle)
    }
}

/// `LocalReduce` from an identity value and two closures
pub struct ReduceFn<F, R, V> {
    identity: V,
    local: F,
    reduce: R,
}

impl<F, R, V> ReduceFn<F, R, V>
where
    F: Fn(usize, f64, &DispatchContext) -> V + Send + Sync,
    R: Fn(V, V) -> V + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(identity: V, local: F, reduce: R) -> Self {
        Self { identity, local, reduce }
    }
}

impl<F, R, V> LocalReduce for ReduceFn<F, R, V>
where
    F: Fn(usize, f64, &DispatchContext) -> V + Send + Sync,
    R: Fn(V, V) -> V + Send + Sync,
    V: Clone + Send + Sync,
{
    type Value = V;

    fn identity(&self) -> V {
        self.identity.clone()
    }

    fn reduce(&self, a: V, b: V) -> V {
        (self.reduce)(a, b)
    }

    fn local(&self, i: usize, dt: f64, ctx: &DispatchContext) -> V {
        (self.local)(i, dt, ctx)
    }
}

/// Read-only view handed to interaction and reduce bodies
pub struct DispatchContext<'a> {
    pub t: f64, // physical time of the system
    body: BodyId,
    bodies: &'a [Body],
    relation: Option<&'a Relation>,
}

impl<'a> DispatchContext<'a> {
    pub fn body_id(&self) -> BodyId {
        self.body
    }

    /// Source body of the dispatch
    pub fn body(&self) -> &'a Body {
        &self.bodies[self.body.0]
    }

    pub fn bodies(&self) -> &'a [Body] {
        self.bodies
    }

    pub fn relation(&self) -> Option<&'a Relation> {
        self.relation
    }

    pub fn particles(&self) -> &'a [Particle] {
        self.body().particles.particles()
    }

    pub fn particle(&self, i: usize) -> &'a Particle {
        &self.particles()[i]
    }

    /// Inner neighbors of `i`, empty without an inner relation
    pub fn inner(&self, i: usize) -> &'a Neighborhood {
        match self.relation.and_then(|r| r.inner()) {
            Some(inner) => inner.neighborhood(i),
            None => &EMPTY_NEIGHBORHOOD,
        }
    }

    /// Contact neighbors of `i`, one entry per target body
    pub fn contacts(&self, i: usize) -> impl Iterator<Item = (&'a Body, &'a Neighborhood)> + 'a {
        let bodies = self.bodies;
        self.relation
            .and_then(|r| r.contact())
            .into_iter()
            .flat_map(move |c| c.neighborhoods_of(i).map(move |(id, n)| (&bodies[id.0], n)))
    }
}

/// What a reduce runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Body(BodyId),
    Relation(RelationId),
}

/// Build the read-only view for `target`, refusing stale relations
fn context(sys: &System, target: Target) -> Result<DispatchContext<'_>> {
    match target {
        Target::Body(id) => {
            sys.body(id)?;
            Ok(DispatchContext { t: sys.t, body: id, bodies: &sys.bodies, relation: None })
        }
        Target::Relation(id) => {
            let relation = sys.relation(id)?;
            relation.ensure_current(id.0, &sys.bodies)?;
            Ok(DispatchContext {
                t: sys.t,
                body: relation.source(),
                bodies: &sys.bodies,
                relation: Some(relation),
            })
        }
    }
}

fn apply_update<U: LocalUpdate>(particles: &mut [Particle], update: &U, dt: f64, execution: ExecutionPolicy) {
    match execution {
        ExecutionPolicy::Sequential => particles
            .iter_mut()
            .enumerate()
            .for_each(|(i, p)| update.update(i, dt, p)),
        ExecutionPolicy::Parallel => particles
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, p)| update.update(i, dt, p)),
    }
}

fn compute_values<I: LocalInteraction>(
    ctx: &DispatchContext,
    interaction: &I,
    dt: f64,
    execution: ExecutionPolicy,
) -> Vec<I::Value> {
    let n = ctx.particles().len();
    match execution {
        ExecutionPolicy::Sequential => (0..n).map(|i| interaction.interaction(i, dt, ctx)).collect(),
        ExecutionPolicy::Parallel => (0..n).into_par_iter().map(|i| interaction.interaction(i, dt, ctx)).collect(),
    }
}

fn commit_values<I: LocalInteraction>(
    particles: &mut [Particle],
    values: Vec<I::Value>,
    interaction: &I,
    dt: f64,
    execution: ExecutionPolicy,
) {
    match execution {
        ExecutionPolicy::Sequential => particles
            .iter_mut()
            .zip(values)
            .enumerate()
            .for_each(|(i, (p, v))| interaction.commit(i, dt, v, p)),
        ExecutionPolicy::Parallel => particles
            .par_iter_mut()
            .zip(values)
            .enumerate()
            .for_each(|(i, (p, v))| interaction.commit(i, dt, v, p)),
    }
}

/// Compute every value of `relation` then commit them to its source body
fn run_interaction<I: LocalInteraction>(
    sys: &mut System,
    relation: RelationId,
    interaction: &I,
    dt: f64,
    execution: ExecutionPolicy,
) -> Result<BodyId> {
    let (source, values) = {
        let ctx = context(sys, Target::Relation(relation))?;
        (ctx.body_id(), compute_values(&ctx, interaction, dt, execution))
    };
    let particles = sys.body_mut(source)?.particles.particles_mut();
    commit_values(particles, values, interaction, dt, execution);
    Ok(source)
}

// ======================================================================================

/// Per-particle update over every particle of one body
pub struct SimpleDynamics<U> {
    body: BodyId,
    update: U,
    motion: Motion,
    execution: ExecutionPolicy,
}

impl<U: LocalUpdate> SimpleDynamics<U> {
    pub fn new(body: BodyId, update: U) -> Self {
        Self { body, update, motion: Motion::Stationary, execution: ExecutionPolicy::Parallel }
    }

    /// Declare that the update moves particles
    pub fn kinematic(mut self) -> Self {
        self.motion = Motion::Kinematic;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn exec(&self, sys: &mut System, dt: f64) -> Result<()> {
        let body = sys.body_mut(self.body)?;
        apply_update(body.particles.particles_mut(), &self.update, dt, self.execution);
        if self.motion == Motion::Kinematic {
            body.particles.mark_moved();
        }
        Ok(())
    }
}

/// Interaction over the source particles of one relation
pub struct InteractionDynamics<I> {
    relation: RelationId,
    interaction: I,
    execution: ExecutionPolicy,
}

impl<I: LocalInteraction> InteractionDynamics<I> {
    pub fn new(relation: RelationId, interaction: I) -> Self {
        Self { relation, interaction, execution: ExecutionPolicy::Parallel }
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn exec(&self, sys: &mut System, dt: f64) -> Result<()> {
        run_interaction(sys, self.relation, &self.interaction, dt, self.execution)?;
        Ok(())
    }
}

/// Interaction followed by a per-particle update of the same body, in one call
pub struct InteractionWithUpdate<I, U> {
    relation: RelationId,
    interaction: I,
    update: U,
    motion: Motion,
    execution: ExecutionPolicy,
}

impl<I: LocalInteraction, U: LocalUpdate> InteractionWithUpdate<I, U> {
    pub fn new(relation: RelationId, interaction: I, update: U) -> Self {
        Self { relation, interaction, update, motion: Motion::Stationary, execution: ExecutionPolicy::Parallel }
    }

    pub fn kinematic(mut self) -> Self {
        self.motion = Motion::Kinematic;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn exec(&self, sys: &mut System, dt: f64) -> Result<()> {
        let source = run_interaction(sys, self.relation, &self.interaction, dt, self.execution)?;
        let body = sys.body_mut(source)?;
        apply_update(body.particles.particles_mut(), &self.update, dt, self.execution);
        if self.motion == Motion::Kinematic {
            body.particles.mark_moved();
        }
        Ok(())
    }
}

/// Initialization -> interaction -> update over one relation.
/// The initialization stage must not move particles: the interaction reads the
/// relation built from the positions it sees.
pub struct Dynamics1Level<P, I, U> {
    relation: RelationId,
    initialization: P,
    interaction: I,
    update: U,
    motion: Motion,
    execution: ExecutionPolicy,
}

impl<P: LocalUpdate, I: LocalInteraction, U: LocalUpdate> Dynamics1Level<P, I, U> {
    pub fn new(relation: RelationId, initialization: P, interaction: I, update: U) -> Self {
        Self {
            relation,
            initialization,
            interaction,
            update,
            motion: Motion::Stationary,
            execution: ExecutionPolicy::Parallel,
        }
    }

    /// Declare that the update stage moves particles
    pub fn kinematic(mut self) -> Self {
        self.motion = Motion::Kinematic;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn exec(&self, sys: &mut System, dt: f64) -> Result<()> {
        let source = {
            let relation = sys.relation(self.relation)?;
            relation.ensure_current(self.relation.0, &sys.bodies)?;
            relation.source()
        };
        apply_update(sys.body_mut(source)?.particles.particles_mut(), &self.initialization, dt, self.execution);
        run_interaction(sys, self.relation, &self.interaction, dt, self.execution)?;

        let body = sys.body_mut(source)?;
        apply_update(body.particles.particles_mut(), &self.update, dt, self.execution);
        if self.motion == Motion::Kinematic {
            body.particles.mark_moved();
        }
        Ok(())
    }
}

/// Fold of a per-particle value over a body or the source particles of a relation
pub struct ReduceDynamics<R> {
    target: Target,
    reduce: R,
    execution: ExecutionPolicy,
}

impl<R: LocalReduce> ReduceDynamics<R> {
    pub fn new(target: Target, reduce: R) -> Self {
        Self { target, reduce, execution: ExecutionPolicy::Parallel }
    }

    pub fn over_body(body: BodyId, reduce: R) -> Self {
        Self::new(Target::Body(body), reduce)
    }

    pub fn over_relation(relation: RelationId, reduce: R) -> Self {
        Self::new(Target::Relation(relation), reduce)
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn exec(&self, sys: &System, dt: f64) -> Result<R::Value> {
        let ctx = context(sys, self.target)?;
        let n = ctx.particles().len();
        let r = &self.reduce;
        let folded = match self.execution {
            ExecutionPolicy::Sequential => {
                (0..n).fold(r.identity(), |acc, i| r.reduce(acc, r.local(i, dt, &ctx)))
            }
            ExecutionPolicy::Parallel => (0..n)
                .into_par_iter()
                .map(|i| r.local(i, dt, &ctx))
                .reduce(|| r.identity(), |a, b| r.reduce(a, b)),
        };
        Ok(r.finish(folded))
    }
}
