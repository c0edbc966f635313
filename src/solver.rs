use crate::state::SymbolicEngine;
use crate::value::{mask, SymbolicExpr};
use boolector::option::{BtorOption, ModelGen, NumberFormat};
use boolector::{Btor, SolverResult, BV};
use std::sync::Arc;

pub type BitVec = BV<Arc<Btor>>;

/// Boolector backed expression engine. Handles given out to the
/// interceptor are indexes into `symbols`.
#[derive(Debug, Clone)]
pub struct Solver {
    pub btor: Arc<Btor>,
    pub assertions: Vec<BitVec>,
    symbols: Vec<BitVec>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    pub fn new() -> Self {
        let btor = Arc::new(Btor::new());
        btor.set_opt(BtorOption::ModelGen(ModelGen::Disabled));
        btor.set_opt(BtorOption::Incremental(true));
        btor.set_opt(BtorOption::OutputNumberFormat(NumberFormat::Hexadecimal));

        Solver {
            btor,
            assertions: Vec::with_capacity(256),
            symbols: Vec::with_capacity(256),
        }
    }

    #[inline]
    pub fn bv(&self, s: &str, n: u32) -> BitVec {
        BV::new(self.btor.clone(), n, Some(s))
    }

    #[inline]
    pub fn bvv(&self, v: u64, n: u32) -> BitVec {
        BV::from_u64(self.btor.clone(), v, n)
    }

    /// bitvector behind a handle handed out by this solver
    pub fn lookup(&self, expr: &SymbolicExpr) -> Option<&BitVec> {
        self.symbols.get(expr.id() as usize)
    }

    fn register(&mut self, bv: BitVec, name: &str) -> SymbolicExpr {
        let expr = SymbolicExpr::new(self.symbols.len() as u64, name, bv.get_width());
        self.symbols.push(bv);
        expr
    }

    fn set_model_gen(&self, enabled: bool) {
        let model = if enabled {
            ModelGen::All
        } else {
            ModelGen::Disabled
        };
        self.btor.set_opt(BtorOption::ModelGen(model));
    }

    /// Run `query` in a scope holding every recorded assertion
    fn scoped<T>(&self, query: impl FnOnce() -> T) -> T {
        self.btor.push(1);
        for assertion in &self.assertions {
            assertion.assert();
        }
        let result = query();
        self.btor.pop(1);
        result
    }

    #[inline]
    pub fn assert_bv(&mut self, bv: &BitVec) {
        self.assertions.push(bv.to_owned());
    }

    pub fn is_sat(&self) -> bool {
        self.assertions.is_empty() || self.scoped(|| self.btor.sat() == SolverResult::Sat)
    }

    pub fn solve(&self, bv: &BitVec) -> Option<u64> {
        self.set_model_gen(true);
        let solution = self.scoped(|| match self.btor.sat() {
            SolverResult::Sat => bv.get_a_solution().as_u64(),
            _ => None,
        });
        self.set_model_gen(false);
        solution
    }

    /// Largest (or smallest) value `bv` can take. Binary search on
    /// assumptions, which only last for a single sat call.
    fn bound(&self, bv: &BitVec, largest: bool) -> u64 {
        let width = bv.get_width();
        self.scoped(|| {
            let (mut low, mut high) = (0, mask(width));
            while low < high {
                if largest {
                    let mid = low + (high - low) / 2 + 1;
                    bv.ugte(&self.bvv(mid, width)).assume();
                    match self.btor.sat() {
                        SolverResult::Sat => low = mid,
                        _ => high = mid - 1,
                    }
                } else {
                    let mid = low + (high - low) / 2;
                    bv.ulte(&self.bvv(mid, width)).assume();
                    match self.btor.sat() {
                        SolverResult::Sat => high = mid,
                        _ => low = mid + 1,
                    }
                }
            }
            low
        })
    }

    pub fn max(&self, bv: &BitVec) -> u64 {
        self.bound(bv, true)
    }

    pub fn min(&self, bv: &BitVec) -> u64 {
        self.bound(bv, false)
    }
}

impl SymbolicEngine for Solver {
    fn symbolic(&mut self, name: &str, bits: u32) -> SymbolicExpr {
        let bv = self.bv(name, bits);
        self.register(bv, name)
    }

    fn concolic(&mut self, name: &str, bits: u32, concrete: u64) -> SymbolicExpr {
        let bv = self.bv(name, bits);
        let pin = bv._eq(&self.bvv(concrete & mask(bits), bits));
        self.assert_bv(&pin);
        self.register(bv, name)
    }

    fn evaluate(&mut self, expr: &SymbolicExpr) -> Option<u64> {
        let bv = self.lookup(expr)?.to_owned();
        self.solve(&bv)
    }

    fn range(&mut self, expr: &SymbolicExpr) -> Option<(u64, u64)> {
        let bv = self.lookup(expr)?.to_owned();
        if !self.is_sat() {
            return None;
        }
        Some((self.min(&bv), self.max(&bv)))
    }
}
