// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::graph::{find_cycle, topological_order, OrderKey};
use super::invocation::{Invocation, PredictedOutput};
use super::plan::{DroppedInvocation, Plan, UnboundRule};
use crate::config::{ResolvedPaths, RunRule, RunTable};
use crate::db::{Databases, IndexQuery};
use crate::errors::{PlanError, RecipeArgError};
use crate::files::{fingerprint, stem, BoundFile, DrsFileSpec, FileKind};
use crate::observability::messages::planner::{
    CandidateSkipped, CycleDetected, InvocationDropped, PlanBuilt, RuleUnbound,
};
use crate::observability::messages::StructuredLog;
use crate::recipes::{ArgBundle, ArgSpec, ArgValue, Recipe, RecipeRegistry, OBS_DIR_ARG};

/// One group of files for a rule, before outputs are predicted.
struct Draft<'t> {
    rule: &'t RunRule,
    recipe: Arc<Recipe>,
    night: String,
    group_key: String,
    /// File arguments in schema order; the first is the primary.
    files: Vec<(String, Vec<BoundFile>)>,
}

impl Draft<'_> {
    fn primary(&self) -> &[BoundFile] {
        self.files.first().map(|(_, f)| f.as_slice()).unwrap_or(&[])
    }

    fn inputs(&self) -> impl Iterator<Item = &BoundFile> {
        self.files.iter().flat_map(|(_, files)| files.iter())
    }

    /// Outputs named the way a recipe body names them: from the first input's
    /// stem, or the fingerprint of every input name for hashed products.
    fn predict(&self, paths: &ResolvedPaths) -> Vec<PredictedOutput> {
        let input_stem = self
            .primary()
            .first()
            .map(|f| stem(&f.filename).to_string())
            .unwrap_or_else(|| self.night.clone());
        let names = fingerprint::names(self.inputs().map(|f| f.filename.as_str()));

        self.recipe
            .outputs
            .iter()
            .map(|spec| {
                let filename = spec.output_filename(&self.night, &input_stem, &names);
                PredictedOutput {
                    output: spec.name.clone(),
                    kind: spec.kind,
                    night: self.night.clone(),
                    path: spec.directory(paths, &self.night).join(&filename),
                    filename,
                    calib_key: spec.calib_key.clone(),
                    fiber: spec.fiber.clone(),
                }
            })
            .collect()
    }

    fn dropped(&self, missing: &str) -> DroppedInvocation {
        DroppedInvocation {
            rule_id: self.rule.id.clone(),
            recipe: self.recipe.name.clone(),
            night: self.night.clone(),
            missing: missing.to_string(),
        }
    }
}

/// Whether a producer's output type yields files a consumer's input type
/// accepts, judged by the derived file name of a common raw stem.
fn feeds(output: &DrsFileSpec, input: &DrsFileSpec) -> bool {
    output.kind == input.kind
        && input.kind != FileKind::Raw
        && !output.hashed_name
        && output.derived_filename("x") == input.derived_filename("x")
}

/// Turns a run table into a [`Plan`].
///
/// Planning reads the file index and the reject list; it never touches the
/// filesystem and never writes a table.
pub struct Planner<'a> {
    registry: &'a RecipeRegistry,
    databases: &'a Databases,
    paths: &'a ResolvedPaths,
}

impl<'a> Planner<'a> {
    pub fn new(
        registry: &'a RecipeRegistry,
        databases: &'a Databases,
        paths: &'a ResolvedPaths,
    ) -> Self {
        Self {
            registry,
            databases,
            paths,
        }
    }

    pub fn plan(&self, table: &RunTable) -> Result<Plan, PlanError> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let plan_id = format!("PLAN-{stamp}");

        let rules = self.check_rules(table)?;
        self.check_rule_cycles(&rules)?;

        let rejected = self.databases.reject.keys()?;
        let existing: HashSet<PathBuf> = self
            .databases
            .index
            .query(&IndexQuery::default())?
            .into_iter()
            .filter(|e| e.output_kind != FileKind::Raw)
            .map(|e| e.path)
            .collect();

        let mut sizes: HashMap<PathBuf, u64> = HashMap::new();
        let mut drafts = Vec::new();
        let mut unbound = Vec::new();
        for (rule, recipe) in &rules {
            let found = self.drafts_for(table, rule, recipe, &rejected, &mut sizes)?;
            if found.is_empty() {
                unbound.push(UnboundRule {
                    rule_id: rule.id.clone(),
                    recipe: recipe.name.clone(),
                    reason: "no candidate files".to_string(),
                });
            }
            drafts.extend(found);
        }

        let dropped = self.prune(&mut drafts, &existing);
        for (rule, recipe) in &rules {
            let bound = drafts.iter().any(|d| d.rule.id == rule.id);
            let listed = unbound.iter().any(|u: &UnboundRule| u.rule_id == rule.id);
            if !bound && !listed {
                unbound.push(UnboundRule {
                    rule_id: rule.id.clone(),
                    recipe: recipe.name.clone(),
                    reason: "every invocation was dropped".to_string(),
                });
            }
        }
        for rule in &unbound {
            RuleUnbound {
                rule_id: &rule.rule_id,
                recipe: &rule.recipe,
                reason: &rule.reason,
            }
            .log();
        }

        let mut invocations = drafts
            .iter()
            .map(|draft| self.invocation(draft, &sizes))
            .collect::<Result<Vec<_>, _>>()?;
        let upstream = self.edges(&drafts, &invocations);

        let keys: Vec<OrderKey> = invocations
            .iter()
            .enumerate()
            .map(|(seq, inv)| OrderKey {
                priority: inv.priority,
                night: inv.night.clone(),
                recipe: inv.recipe.clone(),
                seq,
            })
            .collect();

        let order = match topological_order(&keys, &upstream) {
            Ok(order) => order,
            Err(leftover) => {
                let labels: Vec<String> = invocations.iter().map(Invocation::label).collect();
                let edges: HashMap<usize, Vec<usize>> = leftover
                    .iter()
                    .map(|&i| (i, upstream[i].iter().copied().collect()))
                    .collect();
                let cycle = find_cycle(&leftover, &edges)
                    .unwrap_or(leftover)
                    .into_iter()
                    .map(|i| labels[i].clone())
                    .collect::<Vec<_>>();
                CycleDetected { cycle: &cycle }.log();
                return Err(PlanError::Cycle { cycle });
            }
        };

        for (position, &index) in order.iter().enumerate() {
            invocations[index].pid = format!("PID-{stamp}-{:05}", position + 1);
        }
        let pids: Vec<String> = invocations.iter().map(|i| i.pid.clone()).collect();
        for (index, deps) in upstream.iter().enumerate() {
            invocations[index].upstream = deps.iter().map(|&d| pids[d].clone()).collect();
        }

        let mut slots: Vec<Option<Invocation>> = invocations.into_iter().map(Some).collect();
        let invocations: Vec<Invocation> = order
            .iter()
            .filter_map(|&index| slots[index].take())
            .collect();

        let plan = Plan {
            id: plan_id,
            invocations,
            dropped,
            unbound,
        };
        PlanBuilt {
            plan_id: &plan.id,
            invocations: plan.len(),
            nights: plan.nights().len(),
        }
        .log();
        Ok(plan)
    }

    /// Enabled rules with their recipes, after checking ids and references.
    fn check_rules<'t>(
        &self,
        table: &'t RunTable,
    ) -> Result<Vec<(&'t RunRule, Arc<Recipe>)>, PlanError> {
        let mut ids = HashSet::new();
        for rule in &table.rules {
            if !ids.insert(rule.id.as_str()) {
                return Err(PlanError::DuplicateRule {
                    rule_id: rule.id.clone(),
                });
            }
        }

        let mut rules = Vec::new();
        for rule in table.enabled_rules() {
            let recipe = self
                .registry
                .get(&rule.recipe)
                .map_err(|_| PlanError::UnknownRecipe {
                    rule_id: rule.id.clone(),
                    recipe: rule.recipe.clone(),
                })?;
            if let Some(missing) = rule.requires.iter().find(|r| !ids.contains(r.as_str())) {
                return Err(PlanError::UnknownRule {
                    rule_id: rule.id.clone(),
                    missing: missing.clone(),
                });
            }
            rules.push((rule, recipe));
        }
        Ok(rules)
    }

    /// Reject tables whose rules depend on each other in a loop, through
    /// `requires`, calibrations or file products.
    fn check_rule_cycles(&self, rules: &[(&RunRule, Arc<Recipe>)]) -> Result<(), PlanError> {
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for (rule, recipe) in rules {
            let mut targets: Vec<String> = rule
                .requires
                .iter()
                .filter(|r| rules.iter().any(|(other, _)| &other.id == *r))
                .cloned()
                .collect();

            for (other, producer) in rules {
                if other.id == rule.id {
                    continue;
                }
                let calibrates = recipe.calibrations.iter().any(|c| producer.produces(c));
                let supplies = recipe.file_args().any(|arg| {
                    arg.files.iter().any(|input| {
                        producer.outputs.iter().any(|output| feeds(output, input))
                    })
                });
                if (calibrates || supplies) && !targets.contains(&other.id) {
                    targets.push(other.id.clone());
                }
            }
            edges.insert(rule.id.clone(), targets);
        }

        let nodes: Vec<String> = rules.iter().map(|(r, _)| r.id.clone()).collect();
        match find_cycle(&nodes, &edges) {
            Some(cycle) => {
                CycleDetected { cycle: &cycle }.log();
                Err(PlanError::Cycle { cycle })
            }
            None => Ok(()),
        }
    }

    /// Files from the index that one file argument of `rule` accepts.
    ///
    /// Inputs of a derived type are bound at the path their producer writes
    /// to, whether or not that file exists yet.
    fn candidates(
        &self,
        table: &RunTable,
        rule: &RunRule,
        arg: &ArgSpec,
        night: Option<&str>,
        rejected: &BTreeSet<(String, String)>,
        sizes: &mut HashMap<PathBuf, u64>,
    ) -> Result<Vec<BoundFile>, PlanError> {
        let mut found: BTreeMap<PathBuf, BoundFile> = BTreeMap::new();
        for spec in &arg.files {
            let root = spec.root();
            let query = IndexQuery {
                night: night.map(str::to_string),
                kind: Some(FileKind::Raw),
                dprtypes: root.dprtypes.clone(),
                ..IndexQuery::default()
            };
            for entry in self.databases.index.query(&query)? {
                if !spec.accepts_dprtype(&entry.dprtype) || !rule.accepts_dprtype(&entry.dprtype) {
                    continue;
                }
                if !table.night_selected(rule, &entry.night)
                    || !table.object_selected(rule, entry.objname.as_deref())
                {
                    continue;
                }
                if rejected.contains(&(entry.night.clone(), entry.filename.clone())) {
                    CandidateSkipped {
                        rule_id: &rule.id,
                        filename: &entry.filename,
                        reason: "rejected",
                    }
                    .log();
                    continue;
                }

                let file = if spec.kind == FileKind::Raw {
                    entry.to_bound()
                } else {
                    let filename = spec.derived_filename(stem(&entry.filename));
                    BoundFile {
                        path: spec.directory(self.paths, &entry.night).join(&filename),
                        night: entry.night.clone(),
                        filename,
                        kind: spec.kind,
                        dprtype: entry.dprtype.clone(),
                        fiber: spec.fiber.clone(),
                        object: entry.objname.clone(),
                        mid_obs_time: entry.mid_obs_time,
                    }
                };
                if !arg.accepts(&file) {
                    continue;
                }
                sizes.insert(file.path.clone(), entry.size.max(0) as u64);
                found.insert(file.path.clone(), file);
            }
        }

        let mut files: Vec<BoundFile> = found.into_values().collect();
        files.sort_by(|a, b| (&a.night, &a.filename).cmp(&(&b.night, &b.filename)));
        Ok(files)
    }

    fn drafts_for<'t>(
        &self,
        table: &RunTable,
        rule: &'t RunRule,
        recipe: &Arc<Recipe>,
        rejected: &BTreeSet<(String, String)>,
        sizes: &mut HashMap<PathBuf, u64>,
    ) -> Result<Vec<Draft<'t>>, PlanError> {
        let file_args: Vec<&ArgSpec> = recipe.file_args().collect();
        let Some((primary, secondary)) = file_args.split_first() else {
            return Ok(vec![]);
        };

        let mut groups: BTreeMap<String, Vec<BoundFile>> = BTreeMap::new();
        for file in self.candidates(table, rule, primary, None, rejected, sizes)? {
            groups
                .entry(recipe.grouping.key(&file))
                .or_default()
                .push(file);
        }

        let spans = recipe.grouping.spans_nights();
        let mut drafts = Vec::new();
        'groups: for (group_key, files) in groups {
            let night = if spans {
                files.iter().map(|f| f.night.clone()).max()
            } else {
                files.first().map(|f| f.night.clone())
            };
            let Some(night) = night else { continue };

            let mut bound = vec![(primary.name.clone(), files)];
            for arg in secondary {
                let scope = if spans { None } else { Some(night.as_str()) };
                let more = self.candidates(table, rule, arg, scope, rejected, sizes)?;
                if more.is_empty() && arg.multiplicity.is_required() {
                    CandidateSkipped {
                        rule_id: &rule.id,
                        filename: &group_key,
                        reason: &format!("no files for argument '{}'", arg.name),
                    }
                    .log();
                    continue 'groups;
                }
                bound.push((arg.name.clone(), more));
            }

            drafts.push(Draft {
                rule,
                recipe: Arc::clone(recipe),
                night,
                group_key,
                files: bound,
            });
        }
        Ok(drafts)
    }

    /// Remove derived inputs that are neither indexed nor predicted by another
    /// draft, dropping drafts left without a required argument, until stable.
    fn prune(&self, drafts: &mut Vec<Draft<'_>>, existing: &HashSet<PathBuf>) -> Vec<DroppedInvocation> {
        let mut dropped = Vec::new();
        loop {
            let produced: HashSet<PathBuf> = drafts
                .iter()
                .flat_map(|d| d.predict(self.paths))
                .map(|o| o.path)
                .collect();

            let mut changed = false;
            drafts.retain_mut(|draft| {
                let mut missing = None;
                for (_, files) in draft.files.iter_mut() {
                    let before = files.len();
                    files.retain(|f| {
                        let available = f.kind == FileKind::Raw
                            || existing.contains(&f.path)
                            || produced.contains(&f.path);
                        if !available && missing.is_none() {
                            missing = Some(f.filename.clone());
                        }
                        available
                    });
                    changed |= files.len() != before;
                }

                let schema = &draft.recipe.args;
                let incomplete = draft.files.iter().enumerate().any(|(position, (name, files))| {
                    let required = position == 0
                        || schema
                            .iter()
                            .find(|a| &a.name == name)
                            .map_or(false, |a| a.multiplicity.is_required());
                    required && files.is_empty()
                });
                if incomplete {
                    let missing = missing.unwrap_or_default();
                    InvocationDropped {
                        recipe: &draft.recipe.name,
                        night: &draft.night,
                        missing: &missing,
                    }
                    .log();
                    dropped.push(draft.dropped(&missing));
                    changed = true;
                }
                !incomplete
            });

            if !changed {
                return dropped;
            }
        }
    }

    fn invocation(
        &self,
        draft: &Draft<'_>,
        sizes: &HashMap<PathBuf, u64>,
    ) -> Result<Invocation, PlanError> {
        let rule = draft.rule;
        let recipe = &draft.recipe;
        let binding = |source: RecipeArgError| PlanError::Binding {
            rule_id: rule.id.clone(),
            source,
        };

        let mut bundle = ArgBundle::new();
        if recipe.takes_directory() {
            bundle.insert(OBS_DIR_ARG, ArgValue::Directory(draft.night.clone()));
        }
        for (name, files) in &draft.files {
            if !files.is_empty() {
                bundle.insert(name, ArgValue::Files(files.clone()));
            }
        }
        for (name, value) in &rule.args {
            let spec = recipe.args.iter().find(|a| &a.name == name).ok_or_else(|| {
                binding(RecipeArgError::Unknown {
                    recipe: recipe.name.clone(),
                    arg: name.clone(),
                })
            })?;
            let value = ArgValue::from_param(spec.kind, value).ok_or_else(|| {
                binding(RecipeArgError::WrongKind {
                    recipe: recipe.name.clone(),
                    arg: name.clone(),
                    expected: spec.kind.as_str().to_string(),
                })
            })?;
            bundle.insert(name, value);
        }
        let args = recipe.bind(bundle).map_err(binding)?;

        let times: Vec<f64> = draft.primary().iter().filter_map(|f| f.mid_obs_time).collect();
        let query_time = if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<f64>() / times.len() as f64)
        };
        let objname = draft.primary().iter().find_map(|f| f.object.clone());

        let outputs = draft.predict(self.paths);
        let largest_input = draft
            .inputs()
            .filter_map(|f| sizes.get(&f.path))
            .copied()
            .max()
            .unwrap_or(0);

        Ok(Invocation {
            pid: String::new(),
            rule_id: rule.id.clone(),
            recipe: recipe.name.clone(),
            night: draft.night.clone(),
            group_key: draft.group_key.clone(),
            args,
            params: rule.params.clone(),
            priority: rule.priority.unwrap_or(recipe.priority),
            skip_done: rule.skip_done,
            query_time,
            objname,
            estimated_bytes: largest_input * outputs.len() as u64,
            outputs,
            upstream: vec![],
        })
    }

    /// Upstream invocation indices of every invocation.
    fn edges(&self, drafts: &[Draft<'_>], invocations: &[Invocation]) -> Vec<BTreeSet<usize>> {
        let mut producer: HashMap<&PathBuf, usize> = HashMap::new();
        for (index, inv) in invocations.iter().enumerate() {
            for output in &inv.outputs {
                producer.entry(&output.path).or_insert(index);
            }
        }

        let mut upstream = vec![BTreeSet::new(); invocations.len()];
        for (index, (draft, inv)) in drafts.iter().zip(invocations).enumerate() {
            let deps = &mut upstream[index];

            for file in draft.inputs() {
                if let Some(&p) = producer.get(&file.path) {
                    if p != index {
                        deps.insert(p);
                    }
                }
            }

            for requirement in &draft.recipe.calibrations {
                for (other, (other_draft, other_inv)) in drafts.iter().zip(invocations).enumerate() {
                    if other == index || !other_draft.recipe.produces(requirement) {
                        continue;
                    }
                    if requirement.per_object && other_inv.objname != inv.objname {
                        continue;
                    }
                    deps.insert(other);
                }
            }

            for required in &draft.rule.requires {
                for (other, other_draft) in drafts.iter().enumerate() {
                    if other == index || &other_draft.rule.id != required {
                        continue;
                    }
                    let spans = draft.recipe.grouping.spans_nights()
                        || other_draft.recipe.grouping.spans_nights();
                    if spans || other_draft.night == draft.night {
                        deps.insert(other);
                    }
                }
            }
        }
        upstream
    }
}
