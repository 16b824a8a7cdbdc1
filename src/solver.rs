use auto_impl::auto_impl;
use log::trace;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::ops::Index;

use crate::expr::{CmpOp, Constraint, Expr, Var};

/// The finite set of values a variable may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    /// An inclusive range.
    Range(i64, i64),
    Values(SmallVec<[i64; 4]>),
}

/// A satisfying assignment, indexed by [Var].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Model(Vec<i64>);

/// An incremental integer constraint solver.
///
/// Constraints only ever accumulate, so the set of models a solver can return
/// shrinks monotonically. Callers enumerate distinct models by pairing each
/// [ConstraintSolver::check_and_get_model] with an [ConstraintSolver::exclude].
#[auto_impl(&mut, Box)]
pub trait ConstraintSolver {
    fn new_var(&mut self, name: &str, domain: Domain) -> Var;
    fn add_constraint(&mut self, constraint: Constraint);
    /// Returns some model satisfying every constraint and no exclusion, or `None`
    /// if none exists.
    fn check_and_get_model(&mut self) -> Option<Model>;
    /// Blocks the exact assignment in `model` from being returned again.
    fn exclude(&mut self, model: &Model);
}

/// A depth-first search over the Cartesian product of variable domains.
///
/// Variables are assigned in declaration order. Each constraint is checked at
/// the depth of the last variable it mentions, and an equality which defines a
/// variable in terms of earlier ones narrows that variable to a single
/// candidate instead of a scan of its domain. The search resumes from the last
/// returned model rather than restarting.
#[derive(Debug, Default)]
pub struct FiniteDomainSolver {
    names: Vec<String>,
    domains: Vec<Domain>,
    checks: Vec<Vec<Constraint>>,
    definitions: Vec<Option<Expr>>,
    excluded: HashSet<Vec<i64>>,
    infeasible: bool,
    state: SearchState,
}

#[derive(Debug, Default)]
enum SearchState {
    #[default]
    Fresh,
    Suspended(Vec<Level>),
    Exhausted,
}

#[derive(Debug)]
struct Level {
    candidates: Vec<i64>,
    pos: usize,
}

impl Domain {
    pub fn range(lo: i64, hi: i64) -> Self {
        Domain::Range(lo, hi)
    }

    pub fn values(values: impl IntoIterator<Item = i64>) -> Self {
        let mut values = values.into_iter().collect::<SmallVec<_>>();
        values.sort_unstable();
        values.dedup();
        Domain::Values(values)
    }

    pub fn contains(&self, value: i64) -> bool {
        match self {
            Domain::Range(lo, hi) => (*lo..=*hi).contains(&value),
            Domain::Values(values) => values.binary_search(&value).is_ok(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Domain::Range(lo, hi) if lo <= hi => (hi - lo + 1) as usize,
            Domain::Range(_, _) => 0,
            Domain::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_vec(&self) -> Vec<i64> {
        match self {
            Domain::Range(lo, hi) => (*lo..=*hi).collect(),
            Domain::Values(values) => values.to_vec(),
        }
    }
}

impl Model {
    pub fn values(&self) -> &[i64] {
        &self.0
    }

    pub fn get(&self, var: Var) -> i64 {
        self.0[var.0 as usize]
    }

    pub fn lookup(&self) -> impl Fn(Var) -> i64 + '_ {
        move |v| self.get(v)
    }
}

impl Index<Var> for Model {
    type Output = i64;

    fn index(&self, index: Var) -> &Self::Output {
        &self.0[index.0 as usize]
    }
}

impl FiniteDomainSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_vars(&self) -> usize {
        self.domains.len()
    }

    pub fn var_names(&self) -> &[String] {
        &self.names
    }

    fn add_flattened(&mut self, constraint: Constraint) {
        if let Constraint::And(conjuncts) = constraint {
            for c in conjuncts {
                self.add_flattened(c);
            }
            return;
        }

        let Some(level) = constraint.vars().last().map(|v| v.0 as usize) else {
            if !constraint.holds(&|_| 0) {
                trace!("constant constraint is false: {}", constraint.with_names(&self.names));
                self.infeasible = true;
            }
            return;
        };
        assert!(level < self.domains.len(), "constraint mentions an unknown variable");

        if let Some((var, definition)) = as_definition(&constraint) {
            let slot = &mut self.definitions[var.0 as usize];
            if slot.is_none() {
                *slot = Some(definition.clone());
            }
        }
        self.checks[level].push(constraint);
    }

    fn level_holds(&self, depth: usize, trail: &[Level]) -> bool {
        let lookup = trail_lookup(trail);
        self.checks[depth].iter().all(|c| c.holds(&lookup))
    }

    fn candidates(&self, depth: usize, trail: &[Level]) -> Vec<i64> {
        match &self.definitions[depth] {
            Some(definition) => match definition.eval(&trail_lookup(trail)) {
                Some(value) if self.domains[depth].contains(value) => vec![value],
                _ => vec![],
            },
            None => self.domains[depth].to_vec(),
        }
    }

    fn search(&self, mut trail: Vec<Level>, resuming: bool) -> Option<Vec<Level>> {
        let num_vars = self.domains.len();
        let mut advance = false;

        if resuming {
            // New constraints may invalidate any prefix of the previous model.
            if let Some(depth) = (0..trail.len()).find(|&d| !self.level_holds(d, &trail[..=d])) {
                trail.truncate(depth + 1);
                advance = true;
            }
        }

        loop {
            if advance {
                loop {
                    let level = trail.last_mut()?;
                    level.pos += 1;
                    if level.pos < level.candidates.len() {
                        break;
                    }
                    trail.pop();
                }
                advance = false;
            }

            let depth = trail.len();
            if depth > 0 && !self.level_holds(depth - 1, &trail) {
                advance = true;
                continue;
            }
            if depth == num_vars {
                if self.excluded.contains(&assignment(&trail)) {
                    advance = true;
                    continue;
                }
                return Some(trail);
            }

            let candidates = self.candidates(depth, &trail);
            if candidates.is_empty() {
                advance = true;
                continue;
            }
            trail.push(Level { candidates, pos: 0 });
        }
    }
}

impl ConstraintSolver for FiniteDomainSolver {
    fn new_var(&mut self, name: &str, domain: Domain) -> Var {
        assert!(
            matches!(self.state, SearchState::Fresh),
            "variables must be declared before the first check"
        );
        let var = Var(u32::try_from(self.domains.len()).expect("too many variables"));
        self.names.push(name.to_string());
        self.domains.push(domain);
        self.checks.push(vec![]);
        self.definitions.push(None);
        var
    }

    fn add_constraint(&mut self, constraint: Constraint) {
        self.add_flattened(constraint);
    }

    fn check_and_get_model(&mut self) -> Option<Model> {
        if self.infeasible {
            self.state = SearchState::Exhausted;
        }
        let (trail, resuming) = match std::mem::take(&mut self.state) {
            SearchState::Fresh => (vec![], false),
            SearchState::Suspended(trail) => (trail, true),
            SearchState::Exhausted => {
                self.state = SearchState::Exhausted;
                return None;
            }
        };
        match self.search(trail, resuming) {
            Some(trail) => {
                let model = Model(assignment(&trail));
                self.state = SearchState::Suspended(trail);
                Some(model)
            }
            None => {
                self.state = SearchState::Exhausted;
                None
            }
        }
    }

    fn exclude(&mut self, model: &Model) {
        assert_eq!(model.0.len(), self.domains.len(), "model from another solver");
        self.excluded.insert(model.0.clone());
    }
}

/// Recognizes `v == e` (or `e == v`) where `e` only mentions variables declared
/// before `v`.
fn as_definition(constraint: &Constraint) -> Option<(Var, &Expr)> {
    let Constraint::Cmp(CmpOp::Eq, lhs, rhs) = constraint else {
        return None;
    };
    [(lhs, rhs), (rhs, lhs)].into_iter().find_map(|(target, definition)| {
        let var = target.as_var()?;
        let mut earlier = true;
        definition.visit_vars(&mut |v| earlier &= v < var);
        earlier.then_some((var, definition))
    })
}

fn trail_lookup(trail: &[Level]) -> impl Fn(Var) -> i64 + '_ {
    move |v| {
        let level = &trail[v.0 as usize];
        level.candidates[level.pos]
    }
}

fn assignment(trail: &[Level]) -> Vec<i64> {
    trail.iter().map(|l| l.candidates[l.pos]).collect()
}
