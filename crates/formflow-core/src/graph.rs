//! Dependency graph over the fields of one form
//!
//! Nodes are field positions; an edge `parent -> derived` exists for every
//! declared parent id that names a field of the same form. References to ids
//! absent from the form are kept aside as dangling, not as edges.

use crate::domain::{Field, FieldId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Directed graph `parent -> derived field`
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<FieldId>,
    dependents: Vec<Vec<usize>>,
    precedents: Vec<Vec<usize>>,
    dangling: Vec<Vec<FieldId>>,
    derived: Vec<bool>,
}

/// A dependency cycle, in traversal order and closed on its first node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<FieldId>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: ")?;
        for (idx, id) in self.path.iter().enumerate() {
            if idx > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}

/// Build the dependency graph for a field list
pub fn build_graph(fields: &[Field]) -> DependencyGraph {
    DependencyGraph::build(fields)
}

/// First cycle found, if any; self-references count
pub fn detect_cycle(graph: &DependencyGraph) -> Option<Vec<FieldId>> {
    graph.find_cycle()
}

impl DependencyGraph {
    pub fn build(fields: &[Field]) -> Self {
        let n = fields.len();
        // first occurrence wins for duplicated ids
        let mut position: HashMap<&FieldId, usize> = HashMap::with_capacity(n);
        for (idx, field) in fields.iter().enumerate() {
            position.entry(field.id()).or_insert(idx);
        }

        let mut dependents = vec![Vec::new(); n];
        let mut precedents = vec![Vec::new(); n];
        let mut dangling = vec![Vec::new(); n];

        for (child, field) in fields.iter().enumerate() {
            for parent_id in field.parent_field_ids() {
                match position.get(parent_id) {
                    Some(&parent) => {
                        if !precedents[child].contains(&parent) {
                            precedents[child].push(parent);
                            dependents[parent].push(child);
                        }
                    }
                    None => {
                        if !dangling[child].contains(parent_id) {
                            dangling[child].push(parent_id.clone());
                        }
                    }
                }
            }
        }

        Self {
            ids: fields.iter().map(|f| f.id().clone()).collect(),
            dependents,
            precedents,
            dangling,
            derived: fields.iter().map(Field::is_derived).collect(),
        }
    }

    /// Number of nodes (all fields)
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of derived fields
    pub fn derived_count(&self) -> usize {
        self.derived.iter().filter(|&&d| d).count()
    }

    /// Number of resolved edges
    pub fn edge_count(&self) -> usize {
        self.precedents.iter().map(Vec::len).sum()
    }

    /// Fields whose formulas directly reference `id`
    pub fn dependents_of(&self, id: &FieldId) -> Vec<FieldId> {
        self.position(id)
            .map(|p| self.to_ids(&self.dependents[p]))
            .unwrap_or_default()
    }

    /// Resolved parents of `id`
    pub fn precedents_of(&self, id: &FieldId) -> Vec<FieldId> {
        self.position(id)
            .map(|p| self.to_ids(&self.precedents[p]))
            .unwrap_or_default()
    }

    /// Declared parents of `id` that are absent from the form
    pub fn dangling_of(&self, id: &FieldId) -> &[FieldId] {
        self.position(id)
            .map(|p| self.dangling[p].as_slice())
            .unwrap_or(&[])
    }

    /// Full topological order, or the first cycle
    pub fn topological_order(&self) -> Result<Vec<FieldId>, CycleError> {
        let (ordered, blocked) = self.partial_order();
        if blocked.is_empty() {
            return Ok(self.to_ids(&ordered));
        }
        let path = self.find_cycle().unwrap_or_default();
        Err(CycleError { path })
    }

    pub(crate) fn id_at(&self, position: usize) -> &FieldId {
        &self.ids[position]
    }

    pub(crate) fn precedents_at(&self, position: usize) -> &[usize] {
        &self.precedents[position]
    }

    pub(crate) fn dangling_at(&self, position: usize) -> &[FieldId] {
        &self.dangling[position]
    }

    pub(crate) fn is_derived_at(&self, position: usize) -> bool {
        self.derived[position]
    }

    /// Kahn's algorithm; ties broken by form position.
    ///
    /// Returns the processed nodes in order, plus the nodes left over because
    /// they sit on or downstream of a cycle.
    pub(crate) fn partial_order(&self) -> (Vec<usize>, Vec<usize>) {
        let mut in_degree: Vec<usize> = self.precedents.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(node, &deg)| (deg == 0).then_some(node))
            .collect();

        let mut ordered = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop_first() {
            ordered.push(node);
            for &dep in &self.dependents[node] {
                in_degree[dep] = in_degree[dep].saturating_sub(1);
                if in_degree[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }

        let blocked = in_degree
            .iter()
            .enumerate()
            .filter_map(|(node, &deg)| (deg > 0).then_some(node))
            .collect();
        (ordered, blocked)
    }

    /// Every group of nodes lying on a cycle (Tarjan SCC), members in form order
    pub(crate) fn cyclic_components(&self) -> Vec<Vec<usize>> {
        let mut tarjan = Tarjan {
            graph: self,
            index: vec![None; self.len()],
            lowlink: vec![0; self.len()],
            on_stack: vec![false; self.len()],
            stack: Vec::new(),
            next: 0,
            components: Vec::new(),
        };
        for node in 0..self.len() {
            if tarjan.index[node].is_none() {
                tarjan.visit(node);
            }
        }

        let mut cyclic: Vec<Vec<usize>> = tarjan
            .components
            .into_iter()
            .filter(|c| c.len() > 1 || self.dependents[c[0]].contains(&c[0]))
            .map(|mut c| {
                c.sort_unstable();
                c
            })
            .collect();
        cyclic.sort_by_key(|c| c[0]);
        cyclic
    }

    fn find_cycle(&self) -> Option<Vec<FieldId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        struct Frame {
            node: usize,
            idx: usize,
        }

        let mut color = vec![Color::White; self.len()];
        let mut stack: Vec<usize> = Vec::new();

        for start in 0..self.len() {
            if color[start] != Color::White {
                continue;
            }

            let mut frames = vec![Frame { node: start, idx: 0 }];
            stack.push(start);
            color[start] = Color::Gray;

            while let Some(frame) = frames.last_mut() {
                let neighbors = &self.dependents[frame.node];
                if frame.idx >= neighbors.len() {
                    color[frame.node] = Color::Black;
                    stack.pop();
                    frames.pop();
                    continue;
                }

                let next = neighbors[frame.idx];
                frame.idx += 1;

                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push(next);
                        frames.push(Frame { node: next, idx: 0 });
                    }
                    Color::Gray => {
                        let start_idx = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[start_idx..].to_vec();
                        cycle.push(next);
                        return Some(self.to_ids(&cycle));
                    }
                    Color::Black => {}
                }
            }
        }

        None
    }

    fn position(&self, id: &FieldId) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    fn to_ids(&self, nodes: &[usize]) -> Vec<FieldId> {
        nodes.iter().map(|&n| self.ids[n].clone()).collect()
    }
}

struct Tarjan<'g> {
    graph: &'g DependencyGraph,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    components: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    /// Iterative strong-connect; `frames` holds (node, next edge index)
    fn visit(&mut self, root: usize) {
        let graph = self.graph;
        let mut frames: Vec<(usize, usize)> = Vec::new();
        self.open(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (v, edge) = *frame;
            if let Some(&w) = graph.dependents[v].get(edge) {
                frame.1 += 1;
                match self.index[w] {
                    None => {
                        self.open(w);
                        frames.push((w, 0));
                    }
                    Some(iw) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(iw);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
            }
            if self.index[v] == Some(self.lowlink[v]) {
                self.close(v);
            }
        }
    }

    fn open(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.lowlink[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }

    /// Pop the component rooted at `v`
    fn close(&mut self, v: usize) {
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
            self.on_stack[w] = false;
            component.push(w);
            if w == v {
                break;
            }
        }
        self.components.push(component);
    }
}
