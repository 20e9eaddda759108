//! Lifecycle dispatcher
//!
//! [`Provider`] is the host-facing surface. It plans changes for a resource
//! instance (schema coercion, diff, `CustomizeDiff`), applies plans by
//! routing them to the Create / Update / Delete handlers, and refreshes or
//! imports instances through Read. Every phase runs in its own scoped
//! [`Context`] under the phase timeout and a tracing span.
//!
//! # Module Structure
//!
//! - [`data`] - Handler view of one resource instance
//! - [`import`] - Import id parsing
//! - [`registry`] - Type name → definition registry
//! - [`resource`] - Definitions, handler traits and timeouts

pub mod data;
pub mod import;
pub mod registry;
pub mod resource;

pub use data::ResourceData;
pub use import::Importer;
pub use registry::Registry;
pub use resource::{DataSource, DataSourceDefinition, Phase, Resource, ResourceDefinition, Timeouts};

use crate::context::{CancelToken, Context};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::diff::{diff, ChangeSet, FieldChange, ResourceDiff, Verdict};
use crate::error::{Classifier, Error, ErrorClass, Result};
use crate::otc::ClientFactory;
use crate::schema::{value::field_map_to_json, FieldMap, Schema, Value, ID_FIELD};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Configuration key carrying per-instance timeout overrides
pub const TIMEOUTS_KEY: &str = "timeouts";

/// Extra time granted past the phase deadline so the coordinator can report
/// its own timeout (with the last observed state) first
const PHASE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    NoOp,
    Create,
    Update,
    Replace,
    Delete,
}

/// Planned change for one resource instance
#[derive(Debug, Clone)]
pub struct Plan {
    pub type_name: String,
    pub action: PlanAction,
    pub prior: Option<FieldMap>,
    pub config: FieldMap,
    /// Expected state after apply; computed values may be missing
    pub planned: Option<FieldMap>,
    pub changes: ChangeSet,
    pub timeouts: Timeouts,
}

impl Plan {
    pub fn verdict(&self) -> Verdict {
        self.changes.verdict()
    }

    /// Replace a tainted instance even when the configuration matches
    pub fn force_replace(&mut self) {
        if matches!(self.action, PlanAction::NoOp | PlanAction::Update) && self.prior.is_some() {
            self.action = PlanAction::Replace;
            self.planned = Some(self.config.clone());
        }
    }

    /// Display form with sensitive values redacted
    pub fn render(&self, schema: &Schema) -> Json {
        let changes: serde_json::Map<String, Json> = self
            .changes
            .changes
            .iter()
            .filter(|(_, c)| c.is_change())
            .map(|(path, change)| {
                let sensitive = schema.lookup(path).is_some_and(|f| f.sensitive);
                let rendered = if sensitive {
                    redacted_change(change)
                } else {
                    serde_json::to_value(change).unwrap_or(Json::Null)
                };
                (path.clone(), rendered)
            })
            .collect();

        json!({
            "type": self.type_name,
            "action": self.action,
            "changes": changes,
            "force_new": self.changes.force_new,
            "known_after_apply": self.changes.unknown,
            "planned": self.planned.as_ref().map(|p| schema.redact(p)),
        })
    }
}

fn redacted_change(change: &FieldChange) -> Json {
    let hidden = Value::from("(sensitive)");
    let redacted = match change {
        FieldChange::Unchanged => FieldChange::Unchanged,
        FieldChange::Changed { .. } => FieldChange::Changed {
            old: hidden.clone(),
            new: hidden,
        },
        FieldChange::Added { .. } => FieldChange::Added { new: hidden },
        FieldChange::Removed { .. } => FieldChange::Removed { old: hidden },
    };
    serde_json::to_value(redacted).unwrap_or(Json::Null)
}

/// Result of a lifecycle call: the state to persist plus diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    pub state: Option<FieldMap>,
    pub diagnostics: Diagnostics,
    /// Created but not fully configured; the next plan replaces it
    pub tainted: bool,
}

impl Outcome {
    pub fn ok(state: Option<FieldMap>) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn error(state: Option<FieldMap>, err: Error) -> Self {
        Self {
            state,
            diagnostics: Diagnostic::from(&err).into(),
            tainted: false,
        }
    }

    fn from_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Persisted form of the state (nulls omitted)
    pub fn state_json(&self) -> Json {
        self.state.as_ref().map_or(Json::Null, field_map_to_json)
    }
}

fn has_id(map: &FieldMap) -> bool {
    map.get(ID_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty())
}

pub struct Provider {
    registry: Arc<Registry>,
    factory: Arc<ClientFactory>,
    poll_interval: Duration,
}

impl Provider {
    pub fn new(registry: Registry, factory: ClientFactory) -> Self {
        Self {
            registry: Arc::new(registry),
            factory: Arc::new(factory),
            poll_interval: crate::context::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Invocation context sharing the process-wide factory
    pub fn context(&self, cancel: CancelToken) -> Context {
        Context::new(self.factory.clone())
            .with_cancel(cancel)
            .with_poll_interval(self.poll_interval)
    }

    fn definition(&self, type_name: &str) -> Result<Arc<ResourceDefinition>, Diagnostics> {
        self.registry
            .resource(type_name)
            .ok_or_else(|| Diagnostic::error(format!("Unknown resource type {:?}", type_name)).into())
    }

    // =========================================================================
    // Plan
    // =========================================================================

    /// Plan the change from `prior` to `config`. A missing config plans a
    /// delete; a missing prior plans a create.
    pub fn plan(&self, type_name: &str, prior: Option<&Json>, config: Option<&Json>) -> Result<Plan, Diagnostics> {
        let def = self.definition(type_name)?;
        let schema = &def.schema;

        let prior = match prior.filter(|p| !p.is_null()) {
            Some(json) => Some(schema.decode_state(json).map_err(|e| Diagnostics::from(Diagnostic::from(e)))?),
            None => None,
        }
        .filter(has_id);

        let Some(config_json) = config.filter(|c| !c.is_null()) else {
            let action = if prior.is_some() {
                PlanAction::Delete
            } else {
                PlanAction::NoOp
            };
            return Ok(Plan {
                type_name: type_name.to_string(),
                action,
                prior,
                config: FieldMap::new(),
                planned: None,
                changes: ChangeSet::default(),
                timeouts: def.timeouts,
            });
        };

        let (config_json, timeouts) = split_timeouts(config_json, &def.timeouts)?;
        let config = schema.decode_config(&config_json)?;

        let empty = FieldMap::new();
        let base = prior.as_ref().unwrap_or(&empty);
        let mut changes = diff(base, &config, schema);
        if let Some(hook) = def.customize_diff {
            let mut rd = ResourceDiff::new(schema, base, &config, &mut changes);
            hook(&mut rd).map_err(|e| Diagnostics::from(Diagnostic::from(e)))?;
        }

        let action = match (&prior, changes.verdict()) {
            (None, _) => PlanAction::Create,
            (Some(_), Verdict::NoChange) => PlanAction::NoOp,
            (Some(_), Verdict::UpdateInPlace) => PlanAction::Update,
            (Some(_), Verdict::DestroyThenCreate) => PlanAction::Replace,
        };
        let planned = Some(planned_state(schema, prior.as_ref(), &config, action));

        tracing::debug!("Planned {:?} for {}", action, type_name);

        Ok(Plan {
            type_name: type_name.to_string(),
            action,
            prior,
            config,
            planned,
            changes,
            timeouts,
        })
    }

    // =========================================================================
    // Apply
    // =========================================================================

    pub async fn apply(&self, ctx: &Context, plan: &Plan) -> Outcome {
        let def = match self.definition(&plan.type_name) {
            Ok(def) => def,
            Err(diags) => return Outcome::from_diagnostics(diags),
        };

        match plan.action {
            PlanAction::NoOp => Outcome::ok(plan.prior.clone()),
            PlanAction::Create => self.create(&def, ctx, plan).await,
            PlanAction::Update => self.update(&def, ctx, plan).await,
            PlanAction::Delete => {
                self.delete(&def, ctx, plan.prior.clone().unwrap_or_default(), &plan.timeouts)
                    .await
            }
            PlanAction::Replace => {
                tracing::info!(
                    "Replacing {} because of {:?}",
                    plan.type_name,
                    plan.changes.force_new
                );
                let deleted = self
                    .delete(&def, ctx, plan.prior.clone().unwrap_or_default(), &plan.timeouts)
                    .await;
                if deleted.has_errors() {
                    return deleted;
                }
                let mut created = self.create(&def, ctx, plan).await;
                created.diagnostics.extend(deleted.diagnostics);
                created
            }
        }
    }

    async fn create(&self, def: &ResourceDefinition, ctx: &Context, plan: &Plan) -> Outcome {
        let changes = diff(&FieldMap::new(), &plan.config, &def.schema);
        let mut d = ResourceData::new(def.type_name.clone(), def.schema.clone())
            .with_config(plan.config.clone())
            .with_changes(changes);

        tracing::info!("Creating {}", def.type_name);
        let result = self
            .run_phase(def, ctx, Phase::Create, plan.timeouts.create, &mut d)
            .await;
        let warnings = Diagnostics::from(d.take_warnings());

        let mut outcome = match result {
            Ok(()) if d.id().is_empty() => Outcome::error(
                None,
                Error::Other(format!("{} create finished without setting an id", def.type_name)),
            ),
            Ok(()) => {
                tracing::info!("Created {} {}", def.type_name, d.id());
                Outcome::ok(d.into_state())
            }
            Err(err) if !d.id().is_empty() => {
                // The object exists remotely; keep it in state so it is not leaked
                tracing::warn!("Create of {} {} failed after the id was set: {}", def.type_name, d.id(), err);
                let mut outcome = Outcome::error(d.into_state(), err);
                outcome.tainted = true;
                outcome
            }
            Err(err) => Outcome::error(None, err),
        };
        outcome.diagnostics.extend(warnings);
        outcome
    }

    async fn update(&self, def: &ResourceDefinition, ctx: &Context, plan: &Plan) -> Outcome {
        let mut d = ResourceData::new(def.type_name.clone(), def.schema.clone())
            .with_prior(plan.prior.clone().unwrap_or_default())
            .with_config(plan.config.clone())
            .with_changes(plan.changes.clone());

        tracing::info!("Updating {} {}", def.type_name, d.id());
        let result = self
            .run_phase(def, ctx, Phase::Update, plan.timeouts.update, &mut d)
            .await;
        let warnings = Diagnostics::from(d.take_warnings());

        let mut outcome = match result {
            Ok(()) => Outcome::ok(d.into_state()),
            Err(err) => Outcome::error(d.into_error_state(), err),
        };
        outcome.diagnostics.extend(warnings);
        outcome
    }

    async fn delete(&self, def: &ResourceDefinition, ctx: &Context, prior: FieldMap, timeouts: &Timeouts) -> Outcome {
        let mut d = ResourceData::new(def.type_name.clone(), def.schema.clone()).with_prior(prior.clone());
        if d.id().is_empty() {
            return Outcome::ok(None);
        }

        tracing::info!("Deleting {} {}", def.type_name, d.id());
        match self.run_phase(def, ctx, Phase::Delete, timeouts.delete, &mut d).await {
            Ok(()) => Outcome::ok(None),
            Err(err) if def.classifier().classify(&err) == ErrorClass::NotFound => {
                tracing::info!("{} {} was already gone", def.type_name, d.id());
                Outcome::ok(None)
            }
            Err(err) => Outcome::error(Some(prior), err),
        }
    }

    // =========================================================================
    // Read / Import / Data sources
    // =========================================================================

    /// Refresh one persisted instance
    pub async fn read(&self, ctx: &Context, type_name: &str, state: &Json) -> Outcome {
        let def = match self.definition(type_name) {
            Ok(def) => def,
            Err(diags) => return Outcome::from_diagnostics(diags),
        };
        let prior = match def.schema.decode_state(state) {
            Ok(prior) => prior,
            Err(err) => return Outcome::error(None, err),
        };
        self.read_prior(&def, ctx, prior).await
    }

    async fn read_prior(&self, def: &ResourceDefinition, ctx: &Context, prior: FieldMap) -> Outcome {
        let mut d = ResourceData::new(def.type_name.clone(), def.schema.clone()).with_prior(prior.clone());
        if d.id().is_empty() {
            return Outcome::ok(None);
        }

        let id = d.id().to_string();
        match self.run_phase(def, ctx, Phase::Read, def.timeouts.read, &mut d).await {
            Ok(()) => {
                let warnings = Diagnostics::from(d.take_warnings());
                let state = d.into_state();
                if state.is_none() {
                    tracing::info!("{} {} no longer exists, dropping it from state", def.type_name, id);
                }
                let mut outcome = Outcome::ok(state);
                outcome.diagnostics.extend(warnings);
                outcome
            }
            Err(err) if def.classifier().classify(&err) == ErrorClass::NotFound => {
                tracing::info!("{} {} no longer exists, dropping it from state", def.type_name, id);
                Outcome::ok(None)
            }
            Err(err) => Outcome::error(Some(prior), err),
        }
    }

    /// Adopt an existing remote object by external id
    pub async fn import(&self, ctx: &Context, type_name: &str, external_id: &str) -> Outcome {
        let def = match self.definition(type_name) {
            Ok(def) => def,
            Err(diags) => return Outcome::from_diagnostics(diags),
        };
        let Some(importer) = def.importer else {
            return Outcome::error(None, Error::Other(format!("{} does not support import", type_name)));
        };

        let (id, mut seeded) = match importer.seed(external_id) {
            Ok(seed) => seed,
            Err(err) => return Outcome::error(None, err),
        };
        seeded.insert(ID_FIELD.to_string(), Value::from(id.clone()));

        tracing::info!("Importing {} {}", type_name, external_id);
        let outcome = self.read_prior(&def, ctx, seeded).await;
        if outcome.state.is_none() && !outcome.has_errors() {
            return Outcome::error(
                None,
                Error::Other(format!(
                    "Cannot import non-existent remote object: {} {}",
                    type_name, external_id
                )),
            );
        }
        if outcome.has_errors() {
            // Seeded attributes are not a real state
            return Outcome {
                state: None,
                ..outcome
            };
        }
        outcome
    }

    pub async fn read_data_source(&self, ctx: &Context, type_name: &str, config: &Json) -> Outcome {
        let Some(def) = self.registry.data_source(type_name) else {
            return Outcome::from_diagnostics(
                Diagnostic::error(format!("Unknown data source {:?}", type_name)).into(),
            );
        };
        let config = match def.schema.decode_config(config) {
            Ok(config) => config,
            Err(diags) => return Outcome::from_diagnostics(diags),
        };

        let mut d = ResourceData::new(def.type_name.clone(), def.schema.clone()).with_config(config);
        let phase_ctx = ctx.scoped(Classifier::default(), def.timeout);
        let span = tracing::info_span!("data_source", source = %def.type_name, invocation = %ctx.invocation_id());
        let what = format!("{} read", def.type_name);
        let result = bounded(what, def.timeout, def.handler.read(&phase_ctx, &mut d).instrument(span)).await;

        let warnings = Diagnostics::from(d.take_warnings());
        let mut outcome = match result {
            Ok(()) if d.id().is_empty() => Outcome::error(
                None,
                Error::Other(format!("{} read finished without setting an id", def.type_name)),
            ),
            Ok(()) => Outcome::ok(d.into_state()),
            Err(err) => Outcome::error(None, err),
        };
        outcome.diagnostics.extend(warnings);
        outcome
    }

    /// Refresh many instances with at most `concurrency` reads in flight.
    /// Results keep the input order.
    pub async fn refresh_all(&self, ctx: &Context, instances: Vec<(String, Json)>, concurrency: usize) -> Vec<Outcome> {
        stream::iter(instances)
            .map(|(type_name, state)| async move { self.read(ctx, &type_name, &state).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn run_phase(
        &self,
        def: &ResourceDefinition,
        ctx: &Context,
        phase: Phase,
        timeout: Duration,
        d: &mut ResourceData,
    ) -> Result<()> {
        let phase_ctx = ctx.scoped(def.classifier(), timeout);
        let span = tracing::info_span!(
            "lifecycle",
            resource = %def.type_name,
            phase = %phase,
            id = %d.id(),
            invocation = %ctx.invocation_id(),
        );
        let handlers = def.handlers.clone();
        let work = async {
            match phase {
                Phase::Create => handlers.create(&phase_ctx, d).await,
                Phase::Read => handlers.read(&phase_ctx, d).await,
                Phase::Update => handlers.update(&phase_ctx, d).await,
                Phase::Delete => handlers.delete(&phase_ctx, d).await,
            }
        };
        bounded(format!("{} {}", def.type_name, phase), timeout, work.instrument(span)).await
    }
}

/// Run `work` under `timeout` (plus a grace period)
async fn bounded<F>(what: String, timeout: Duration, work: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout.saturating_add(PHASE_GRACE), work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            what,
            elapsed: start.elapsed(),
            last_state: "unknown".to_string(),
        }),
    }
}

/// Remove the `timeouts` object from a configuration and apply it
fn split_timeouts(config: &Json, defaults: &Timeouts) -> Result<(Json, Timeouts), Diagnostics> {
    let mut config = config.clone();
    let overrides = config.as_object_mut().and_then(|obj| obj.remove(TIMEOUTS_KEY));
    let timeouts = match overrides {
        Some(t) if !t.is_null() => defaults
            .with_overrides(&t)
            .map_err(|e| Diagnostics::from(Diagnostic::from(e)))?,
        _ => *defaults,
    };
    Ok((config, timeouts))
}

/// Expected state after apply
fn planned_state(schema: &Schema, prior: Option<&FieldMap>, config: &FieldMap, action: PlanAction) -> FieldMap {
    let prior = match (action, prior) {
        (PlanAction::Update | PlanAction::NoOp, Some(prior)) => prior,
        _ => return config.clone(),
    };

    let mut planned = prior.clone();
    for field in schema.fields() {
        if field.is_computed_only() || field.name == ID_FIELD {
            continue;
        }
        match config.get(&field.name) {
            Some(value) => {
                planned.insert(field.name.clone(), value.clone());
            }
            None if field.computed => {}
            None => {
                planned.remove(&field.name);
            }
        }
    }
    planned
}
