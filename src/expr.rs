use std::fmt;
use std::ops::{Add, Mul, Not, Sub};

/// A handle to an integer variable owned by a [crate::solver::ConstraintSolver].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Expr {
    Constant(i64),
    Var(Var),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    /// Floor division. Undefined for a zero divisor.
    FloorDiv(Box<Expr>, Box<Expr>),
    /// Euclidean remainder. Undefined for a zero divisor.
    Mod(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A boolean formula over integer [Expr]s.
///
/// A comparison whose operands are undefined (division by zero, overflow) is false.
#[derive(Debug, Clone)]
pub enum Constraint {
    Cmp(CmpOp, Expr, Expr),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Not(Box<Constraint>),
}

impl Expr {
    pub fn floor_div(self, rhs: impl Into<Expr>) -> Expr {
        Expr::FloorDiv(Box::new(self), Box::new(rhs.into()))
    }

    pub fn rem(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Mod(Box::new(self), Box::new(rhs.into()))
    }

    /// Evaluates the expression, returning `None` if it is undefined under the
    /// given assignment.
    pub fn eval(&self, lookup: &impl Fn(Var) -> i64) -> Option<i64> {
        match self {
            Expr::Constant(c) => Some(*c),
            Expr::Var(v) => Some(lookup(*v)),
            Expr::Add(a, b) => a.eval(lookup)?.checked_add(b.eval(lookup)?),
            Expr::Sub(a, b) => a.eval(lookup)?.checked_sub(b.eval(lookup)?),
            Expr::Mul(a, b) => a.eval(lookup)?.checked_mul(b.eval(lookup)?),
            Expr::FloorDiv(a, b) => {
                let (a, b) = (a.eval(lookup)?, b.eval(lookup)?);
                if b == 0 {
                    return None;
                }
                Some(divrem::DivFloor::div_floor(a, b))
            }
            Expr::Mod(a, b) => a.eval(lookup)?.checked_rem_euclid(b.eval(lookup)?),
        }
    }

    pub fn visit_vars(&self, f: &mut impl FnMut(Var)) {
        match self {
            Expr::Constant(_) => {}
            Expr::Var(v) => f(*v),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::FloorDiv(a, b)
            | Expr::Mod(a, b) => {
                a.visit_vars(f);
                b.visit_vars(f);
            }
        }
    }

    pub fn as_var(&self) -> Option<Var> {
        match self {
            Expr::Var(v) => Some(*v),
            _ => None,
        }
    }
}

impl CmpOp {
    fn apply(&self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl Constraint {
    fn cmp(op: CmpOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::Cmp(op, lhs.into(), rhs.into())
    }

    pub fn eq(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::cmp(CmpOp::Eq, lhs, rhs)
    }

    pub fn ne(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::cmp(CmpOp::Ne, lhs, rhs)
    }

    pub fn lt(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::cmp(CmpOp::Lt, lhs, rhs)
    }

    pub fn le(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::cmp(CmpOp::Le, lhs, rhs)
    }

    pub fn gt(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::cmp(CmpOp::Gt, lhs, rhs)
    }

    pub fn ge(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Constraint::cmp(CmpOp::Ge, lhs, rhs)
    }

    /// `divisor` evenly divides `dividend`.
    pub fn divides(divisor: impl Into<Expr>, dividend: impl Into<Expr>) -> Self {
        Constraint::eq(dividend.into().rem(divisor), 0)
    }

    pub fn all(constraints: impl IntoIterator<Item = Constraint>) -> Self {
        Constraint::And(constraints.into_iter().collect())
    }

    pub fn any(constraints: impl IntoIterator<Item = Constraint>) -> Self {
        Constraint::Or(constraints.into_iter().collect())
    }

    pub fn implies(self, consequent: Constraint) -> Self {
        Constraint::any([!self, consequent])
    }

    pub fn iff(self, other: Constraint) -> Self {
        Constraint::all([
            self.clone().implies(other.clone()),
            other.implies(self),
        ])
    }

    pub fn holds(&self, lookup: &impl Fn(Var) -> i64) -> bool {
        self.truth(lookup) == Some(true)
    }

    /// Three-valued evaluation. A comparison over an undefined expression
    /// (overflow, division by zero) is `None`, and so is its negation.
    pub fn truth(&self, lookup: &impl Fn(Var) -> i64) -> Option<bool> {
        match self {
            Constraint::Cmp(op, a, b) => Some(op.apply(a.eval(lookup)?, b.eval(lookup)?)),
            Constraint::And(cs) => {
                let mut result = Some(true);
                for c in cs {
                    match c.truth(lookup) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Constraint::Or(cs) => {
                let mut result = Some(false);
                for c in cs {
                    match c.truth(lookup) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Constraint::Not(c) => c.truth(lookup).map(|t| !t),
        }
    }

    pub fn visit_vars(&self, f: &mut impl FnMut(Var)) {
        match self {
            Constraint::Cmp(_, a, b) => {
                a.visit_vars(f);
                b.visit_vars(f);
            }
            Constraint::And(cs) | Constraint::Or(cs) => cs.iter().for_each(|c| c.visit_vars(f)),
            Constraint::Not(c) => c.visit_vars(f),
        }
    }

    /// The variables mentioned by this constraint, sorted and deduplicated.
    pub fn vars(&self) -> Vec<Var> {
        let mut vars = Vec::new();
        self.visit_vars(&mut |v| vars.push(v));
        vars.sort_unstable();
        vars.dedup();
        vars
    }

    /// Wraps the constraint for display, naming each variable with `names`.
    pub fn with_names<'a>(&'a self, names: &'a [String]) -> WithNames<'a, Self> {
        WithNames(self, names)
    }
}

impl Not for Constraint {
    type Output = Constraint;

    fn not(self) -> Self::Output {
        match self {
            Constraint::Not(inner) => *inner,
            c => Constraint::Not(Box::new(c)),
        }
    }
}

impl From<Var> for Expr {
    fn from(value: Var) -> Self {
        Expr::Var(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Constant(value)
    }
}

impl<T: Into<Expr>> Add<T> for Expr {
    type Output = Expr;

    fn add(self, rhs: T) -> Self::Output {
        match (self, rhs.into()) {
            (Expr::Constant(a), Expr::Constant(b)) if a.checked_add(b).is_some() => {
                Expr::Constant(a + b)
            }
            (lhs, Expr::Constant(0)) => lhs,
            (lhs, rhs) => Expr::Add(Box::new(lhs), Box::new(rhs)),
        }
    }
}

impl<T: Into<Expr>> Sub<T> for Expr {
    type Output = Expr;

    fn sub(self, rhs: T) -> Self::Output {
        Expr::Sub(Box::new(self), Box::new(rhs.into()))
    }
}

impl<T: Into<Expr>> Mul<T> for Expr {
    type Output = Expr;

    fn mul(self, rhs: T) -> Self::Output {
        match (self, rhs.into()) {
            (Expr::Constant(a), Expr::Constant(b)) if a.checked_mul(b).is_some() => {
                Expr::Constant(a * b)
            }
            (lhs, Expr::Constant(1)) => lhs,
            (Expr::Constant(1), rhs) => rhs,
            (lhs, rhs) => Expr::Mul(Box::new(lhs), Box::new(rhs)),
        }
    }
}

impl<T: Into<Expr>> Add<T> for Var {
    type Output = Expr;

    fn add(self, rhs: T) -> Self::Output {
        Expr::from(self) + rhs
    }
}

impl<T: Into<Expr>> Sub<T> for Var {
    type Output = Expr;

    fn sub(self, rhs: T) -> Self::Output {
        Expr::from(self) - rhs
    }
}

impl<T: Into<Expr>> Mul<T> for Var {
    type Output = Expr;

    fn mul(self, rhs: T) -> Self::Output {
        Expr::from(self) * rhs
    }
}

impl Mul<Var> for i64 {
    type Output = Expr;

    fn mul(self, rhs: Var) -> Self::Output {
        Expr::from(self) * rhs
    }
}

impl Mul<Expr> for i64 {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Self::Output {
        Expr::from(self) * rhs
    }
}

/// Formats an [Expr] or [Constraint] with variable names in place of indices.
pub struct WithNames<'a, T>(&'a T, &'a [String]);

impl WithNames<'_, Expr> {
    fn fmt_expr(e: &Expr, names: &[String], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bin = |a: &Expr, op: &str, b: &Expr| {
            write!(f, "(")?;
            Self::fmt_expr(a, names, f)?;
            write!(f, " {op} ")?;
            Self::fmt_expr(b, names, f)?;
            write!(f, ")")
        };
        match e {
            Expr::Constant(c) => write!(f, "{c}"),
            Expr::Var(v) => match names.get(v.0 as usize) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "v{}", v.0),
            },
            Expr::Add(a, b) => bin(a, "+", b),
            Expr::Sub(a, b) => bin(a, "-", b),
            Expr::Mul(a, b) => bin(a, "*", b),
            Expr::FloorDiv(a, b) => bin(a, "//", b),
            Expr::Mod(a, b) => bin(a, "%", b),
        }
    }
}

impl fmt::Display for WithNames<'_, Expr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Self::fmt_expr(self.0, self.1, f)
    }
}

impl fmt::Display for WithNames<'_, Constraint> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.1;
        let mut join = |cs: &[Constraint], sep: &str| {
            write!(f, "(")?;
            for (i, c) in cs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{}", c.with_names(names))?;
            }
            write!(f, ")")
        };
        match self.0 {
            Constraint::Cmp(op, a, b) => write!(
                f,
                "{} {} {}",
                WithNames(a, names),
                op.symbol(),
                WithNames(b, names)
            ),
            Constraint::And(cs) => join(cs, "&&"),
            Constraint::Or(cs) => join(cs, "||"),
            Constraint::Not(c) => write!(f, "!({})", c.with_names(names)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lookup(values: &[i64]) -> impl Fn(Var) -> i64 + '_ {
        move |v| values[v.0 as usize]
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(Expr::from(2) + 3, Expr::Constant(5));
        assert_eq!(Expr::from(2) * 3, Expr::Constant(6));
        assert_eq!(Var(0) * 1, Expr::Var(Var(0)));
        assert_eq!(1 * Var(0), Expr::Var(Var(0)));
        assert_eq!(Var(0) + 0, Expr::Var(Var(0)));
    }

    #[test]
    fn test_eval_arithmetic() {
        let values = [7, 3];
        let e = (Var(0) * Var(1) + 1) - Var(1);
        assert_eq!(e.eval(&lookup(&values)), Some(19));
        assert_eq!(Expr::from(Var(0)).floor_div(Var(1)).eval(&lookup(&values)), Some(2));
        assert_eq!(Expr::from(-7).floor_div(2).eval(&lookup(&values)), Some(-4));
        assert_eq!(Expr::from(-7).rem(2).eval(&lookup(&values)), Some(1));
    }

    #[test]
    fn test_division_by_zero_is_undefined() {
        let values = [4, 0];
        let l = lookup(&values);
        assert_eq!(Expr::from(Var(0)).rem(Var(1)).eval(&l), None);
        assert!(!Constraint::divides(Var(1), Var(0)).holds(&l));
        assert!(!(!Constraint::divides(Var(1), Var(0))).holds(&l));
        assert_eq!((!Constraint::divides(Var(1), Var(0))).truth(&l), None);
    }

    #[test]
    fn test_undefined_comparisons_propagate_through_connectives() {
        let values = [4, 0];
        let l = lookup(&values);
        let undefined = Constraint::divides(Var(1), Var(0));
        let truthy = Constraint::eq(Var(0), 4);
        let falsy = Constraint::eq(Var(0), 5);
        assert_eq!(Constraint::all([undefined.clone(), falsy.clone()]).truth(&l), Some(false));
        assert_eq!(Constraint::all([undefined.clone(), truthy.clone()]).truth(&l), None);
        assert_eq!(Constraint::any([undefined.clone(), truthy.clone()]).truth(&l), Some(true));
        assert_eq!(Constraint::any([undefined.clone(), falsy]).truth(&l), None);
        // A false guard still discharges an implication over an undefined term.
        assert!(Constraint::ne(Var(1), 0).implies(undefined).holds(&l));
    }

    #[test]
    fn test_overflowing_constants_are_not_folded() {
        let sum = Expr::from(i64::MAX) + 1i64;
        assert!(matches!(sum, Expr::Add(_, _)));
        assert_eq!(sum.eval(&|_| 0), None);
        let product = Expr::from(i64::MAX) * 2i64;
        assert!(matches!(product, Expr::Mul(_, _)));
        assert_eq!(product.eval(&|_| 0), None);
    }

    #[test]
    fn test_connectives() {
        let values = [4, 6];
        let l = lookup(&values);
        let x_small = Constraint::lt(Var(0), 5);
        let y_small = Constraint::lt(Var(1), 5);
        assert!(Constraint::any([x_small.clone(), y_small.clone()]).holds(&l));
        assert!(!Constraint::all([x_small.clone(), y_small.clone()]).holds(&l));
        assert!(!x_small.clone().implies(y_small.clone()).holds(&l));
        assert!(y_small.clone().implies(x_small.clone()).holds(&l));
        assert!(!x_small.iff(y_small).holds(&l));
        assert!(Constraint::all([]).holds(&l));
        assert!(!Constraint::any([]).holds(&l));
    }

    #[test]
    fn test_double_negation_is_removed() {
        let c = !!Constraint::eq(Var(0), 1);
        assert!(matches!(c, Constraint::Cmp(CmpOp::Eq, _, _)));
    }

    #[test]
    fn test_vars_are_sorted_and_unique() {
        let c = Constraint::all([
            Constraint::eq(Var(3), Var(1) * Var(3)),
            Constraint::divides(Var(0), Var(1)),
        ]);
        assert_eq!(c.vars(), vec![Var(0), Var(1), Var(3)]);
    }

    #[test]
    fn test_display_with_names() {
        let names = ["m".to_string(), "imn".to_string()];
        let c = Constraint::divides(Var(1), Var(0));
        assert_eq!(c.with_names(&names).to_string(), "(m % imn) == 0");
    }

    proptest! {
        #[test]
        fn test_divides_matches_rem(d in 1i64..64, n in -512i64..512) {
            let values = [d, n];
            prop_assert_eq!(
                Constraint::divides(Var(0), Var(1)).holds(&lookup(&values)),
                n % d == 0
            );
        }

        #[test]
        fn test_floor_div_and_rem_recompose(a in -1000i64..1000, b in 1i64..100) {
            let values = [a, b];
            let l = lookup(&values);
            let q = Expr::from(Var(0)).floor_div(Var(1)).eval(&l).unwrap();
            let r = Expr::from(Var(0)).rem(Var(1)).eval(&l).unwrap();
            prop_assert_eq!(q * b + r, a);
            prop_assert!((0..b).contains(&r));
        }
    }
}
