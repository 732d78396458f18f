//! Per-worker execution environment.
//!
//! A context carries everything a single evaluation thread binds while
//! walking the node tree: the rows bound to tuple ids, named variables,
//! the subroutine argument and return buffers, and the live views of the
//! enclosing query. Parallel fan-outs clone the enclosing context; the
//! clones never share mutable state.

use std::collections::HashMap;

use stratal_ram::Domain;

use crate::tuple::Row;
use crate::view::View;

#[derive(Clone)]
pub struct Context {
    tuples: Vec<Row>,
    variables: HashMap<String, Domain>,
    arguments: Vec<Domain>,
    returns: Vec<Domain>,
    views: Vec<Option<View>>,
}

impl Context {
    /// Slot counts come from node generation: the highest tuple id and
    /// view id any node of the program uses.
    pub fn new(tuple_slots: usize, view_slots: usize) -> Self {
        Context {
            tuples: vec![Row::new(); tuple_slots],
            variables: HashMap::new(),
            arguments: Vec::new(),
            returns: Vec::new(),
            views: vec![None; view_slots],
        }
    }

    #[inline]
    pub fn set_tuple(&mut self, tuple_id: usize, row: Row) {
        self.tuples[tuple_id] = row;
    }

    #[inline]
    pub fn element(&self, tuple_id: usize, element: usize) -> Domain {
        self.tuples[tuple_id][element]
    }

    pub fn set_variable(&mut self, name: &str, value: Domain) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Domain {
        match self.variables.get(name) {
            Some(&value) => value,
            None => panic!("read of unassigned variable `{name}`"),
        }
    }

    pub fn set_arguments(&mut self, arguments: Vec<Domain>) {
        self.arguments = arguments;
    }

    pub fn argument(&self, position: usize) -> Domain {
        self.arguments[position]
    }

    pub fn add_return(&mut self, value: Domain) {
        self.returns.push(value);
    }

    pub fn take_returns(&mut self) -> Vec<Domain> {
        std::mem::take(&mut self.returns)
    }

    pub fn create_view(&mut self, slot: usize, view: View) {
        self.views[slot] = Some(view);
    }

    pub fn view(&self, slot: usize) -> &View {
        match &self.views[slot] {
            Some(view) => view,
            None => panic!("view slot {slot} used before its query created it"),
        }
    }
}
