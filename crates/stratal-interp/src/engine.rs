//! The engine: program-wide state and run lifecycle.
//!
//! An engine owns everything a single RAM run touches: the relation
//! handle slots, the symbol/record tables, the regex cache, the functor
//! and I/O registries, the generated node tree, and the run counters.
//! `execute_main` drives the main tree; `execute_subroutine` drives a
//! named subroutine with argument and return buffers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use stratal_ram::{Domain, IndexCluster, TranslationUnit};

use crate::context::Context;
use crate::error::EvalError;
use crate::functor::FunctorRegistry;
use crate::generator::NodeGenerator;
use crate::io::IoRegistry;
use crate::node::{EngineProgram, RelId, ViewSpec};
use crate::profile::ProfileLog;
use crate::relation::{Relation, RelationCell};
use crate::record::RecordTable;
use crate::symbol::SymbolTable;
use crate::regex_cache::RegexCache;
use crate::view::View;
use crate::watch::Watchdog;

/// Profiling knobs: where events go and whether per-rule frequencies are
/// counted.
pub struct ProfileOptions {
    pub log: Arc<ProfileLog>,
    pub output: Option<PathBuf>,
    pub count_frequencies: bool,
}

impl ProfileOptions {
    pub fn in_memory() -> Self {
        ProfileOptions {
            log: Arc::new(ProfileLog::new()),
            output: None,
            count_frequencies: true,
        }
    }
}

pub struct EngineConfig {
    /// Worker threads for `Parallel*` operations; 0 auto-detects.
    pub threads: usize,
    pub verbose: bool,
    pub profile: Option<ProfileOptions>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { threads: 1, verbose: false, profile: None }
    }
}

pub struct Engine {
    unit: TranslationUnit,
    threads: usize,
    verbose: bool,
    profile: Option<ProfileOptions>,
    relations: Vec<RelationCell>,
    relation_ids: HashMap<String, RelId>,
    symbols: Arc<SymbolTable>,
    records: Arc<RecordTable>,
    regexes: RegexCache,
    io: IoRegistry,
    program: EngineProgram,
    counter: AtomicI64,
    iteration: AtomicUsize,
    /// Per-rule hit counts, one slot per loop iteration. Growth of a
    /// label's slot vector is serialized by the map shard lock.
    frequencies: DashMap<String, Vec<AtomicUsize>>,
    /// Per-relation existence-probe counts.
    reads: DashMap<String, AtomicUsize>,
}

impl Engine {
    /// Engine with the default functor and I/O registries.
    pub fn new(unit: TranslationUnit, config: EngineConfig) -> Result<Self> {
        Self::with_collaborators(unit, config, FunctorRegistry::new(), IoRegistry::with_defaults())
    }

    pub fn with_collaborators(
        unit: TranslationUnit,
        config: EngineConfig,
        functors: FunctorRegistry,
        io: IoRegistry,
    ) -> Result<Self> {
        let threads = if config.threads == 0 { num_cpus::get() } else { config.threads };
        let symbols = Arc::new(SymbolTable::new());

        // Relations live for the whole run; the node tree below resolves
        // names to these slots.
        let mut relations = Vec::with_capacity(unit.program.relations.len());
        let mut relation_ids = HashMap::new();
        for (id, decl) in unit.program.relations.iter().enumerate() {
            let cluster = unit
                .cluster(&decl.name)
                .cloned()
                .unwrap_or_else(|| IndexCluster::single(decl.arity));
            relations.push(RelationCell::new(Relation::new(decl.clone(), cluster)));
            relation_ids.insert(decl.name.clone(), id);
        }

        let program = NodeGenerator::generate(&unit, &relation_ids, &functors, &symbols)?;

        Ok(Engine {
            unit,
            threads,
            verbose: config.verbose,
            profile: config.profile,
            relations,
            relation_ids,
            symbols,
            records: Arc::new(RecordTable::new()),
            regexes: RegexCache::new(),
            io,
            program,
            counter: AtomicI64::new(0),
            iteration: AtomicUsize::new(0),
            frequencies: DashMap::new(),
            reads: DashMap::new(),
        })
    }

    // ------------------------------------------------------------------
    // run entry points
    // ------------------------------------------------------------------

    pub fn execute_main(&self) -> Result<()> {
        let watchdog = Watchdog::instance();
        watchdog.install();
        if self.verbose {
            watchdog.enable_logging();
        }

        if self.profile.is_some() {
            self.prepare_profiling();
        }

        let mut ctxt = self.fresh_context();
        self.execute(&self.program.main, &mut ctxt);

        if self.profile.is_some() {
            self.finish_profiling();
        }
        watchdog.clear();
        Ok(())
    }

    pub fn execute_subroutine(
        &self,
        name: &str,
        arguments: &[Domain],
        returns: &mut Vec<Domain>,
    ) -> Result<()> {
        let node = self
            .program
            .subroutines
            .get(name)
            .ok_or_else(|| EvalError::UnknownSubroutine(name.to_string()))?;
        let mut ctxt = self.fresh_context();
        ctxt.set_arguments(arguments.to_vec());
        self.execute(node, &mut ctxt);
        returns.extend(ctxt.take_returns());
        Ok(())
    }

    fn fresh_context(&self) -> Context {
        Context::new(self.program.tuple_slots, self.program.view_slots)
    }

    // ------------------------------------------------------------------
    // profiling
    // ------------------------------------------------------------------

    fn prepare_profiling(&self) {
        let options = self.profile.as_ref().expect("profiling prepared when enabled");
        if let Some(path) = &options.output {
            options.log.set_output_file(path.clone());
        }
        // Register every rule label up front so rules that never fire
        // still appear in the frequency output.
        for label in &self.program.profile_labels {
            self.frequencies
                .entry(label.clone())
                .or_insert_with(|| vec![AtomicUsize::new(0)]);
        }
        options.log.start_timer();
        options.log.time_event("@time;starttime");
        options.log.config_record("threads", &self.threads.to_string());

        let mut relation_count = 0usize;
        for decl in &self.unit.program.relations {
            if !decl.is_temp() {
                relation_count += 1;
                self.reads.entry(decl.name.clone()).or_insert_with(|| AtomicUsize::new(0));
            }
        }
        options.log.config_record("relationCount", &relation_count.to_string());
        options.log.config_record("ruleCount", &self.unit.program.query_count().to_string());
    }

    fn finish_profiling(&self) {
        let options = self.profile.as_ref().expect("profiling finished when enabled");
        for entry in self.frequencies.iter() {
            for (iteration, counter) in entry.value().iter().enumerate() {
                options.log.quantity_event(
                    entry.key(),
                    counter.load(Ordering::SeqCst) as u64,
                    iteration,
                );
            }
        }
        for entry in self.reads.iter() {
            options.log.quantity_event(
                &format!("@relation-reads;{}", entry.key()),
                entry.value().load(Ordering::SeqCst) as u64,
                0,
            );
        }
        options.log.stop_timer();
    }

    pub(crate) fn profiling(&self) -> bool {
        self.profile.is_some()
    }

    pub(crate) fn profile_log(&self) -> Option<&ProfileLog> {
        self.profile.as_ref().map(|options| options.log.as_ref())
    }

    pub(crate) fn frequencies_enabled(&self) -> bool {
        self.profile.as_ref().is_some_and(|options| options.count_frequencies)
    }

    /// Bump `frequencies[label][iteration]`. The per-iteration slots grow
    /// lazily; growth serializes on the entry lock, steady-state bumps
    /// are atomic adds.
    pub(crate) fn bump_frequency(&self, label: &str) {
        let iteration = self.iteration();
        {
            if let Some(entry) = self.frequencies.get(label) {
                if let Some(counter) = entry.value().get(iteration) {
                    counter.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
        }
        let mut entry = self.frequencies.entry(label.to_string()).or_default();
        while entry.value().len() <= iteration {
            entry.value_mut().push(AtomicUsize::new(0));
        }
        entry.value()[iteration].fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn bump_read(&self, relation: &str) {
        self.reads
            .entry(relation.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // shared state accessors
    // ------------------------------------------------------------------

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn records(&self) -> &RecordTable {
        &self.records
    }

    pub(crate) fn symbols_arc(&self) -> Arc<SymbolTable> {
        self.symbols.clone()
    }

    pub(crate) fn records_arc(&self) -> Arc<RecordTable> {
        self.records.clone()
    }

    pub(crate) fn regexes(&self) -> &RegexCache {
        &self.regexes
    }

    pub(crate) fn io(&self) -> &IoRegistry {
        &self.io
    }

    pub(crate) fn threads(&self) -> usize {
        self.threads
    }

    pub(crate) fn subroutine(&self, name: &str) -> &crate::node::Node {
        self.program
            .subroutines
            .get(name)
            .expect("call target validated at generation")
    }

    /// Current relation behind a handle slot.
    pub(crate) fn relation(&self, id: RelId) -> Arc<Relation> {
        self.relations[id].get()
    }

    pub(crate) fn swap_relations(&self, a: RelId, b: RelId) {
        RelationCell::swap(&self.relations[a], &self.relations[b]);
    }

    /// Relation lookup by name, for embedders preloading facts and tests
    /// inspecting results.
    pub fn relation_by_name(&self, name: &str) -> Option<Arc<Relation>> {
        self.relation_ids.get(name).map(|&id| self.relation(id))
    }

    /// The handle slot for a relation. Unlike [`Engine::relation_by_name`]
    /// the slot keeps following swaps, exactly as the node tree does.
    pub fn relation_handle(&self, name: &str) -> Option<&RelationCell> {
        self.relation_ids.get(name).map(|&id| &self.relations[id])
    }

    pub(crate) fn create_views(&self, specs: &[ViewSpec], ctxt: &mut Context) {
        for spec in specs {
            ctxt.create_view(spec.slot, View::new(self.relation(spec.relation), spec.index_pos));
        }
    }

    pub(crate) fn next_counter(&self) -> Domain {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Loop iteration counter, `0` outside any loop.
    pub fn iteration(&self) -> usize {
        self.iteration.load(Ordering::Acquire)
    }

    pub(crate) fn increment_iteration(&self) {
        self.iteration.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_iteration(&self) {
        self.iteration.store(0, Ordering::Release);
    }
}
