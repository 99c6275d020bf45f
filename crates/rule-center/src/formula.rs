//! The seam to the rule language: a compiler turns formula text into a
//! predicate over `{user, rec, newRec}`. The language itself lives outside
//! this crate.

use std::fmt;
use std::sync::Arc;

use doc_model::RecordView;

use crate::errors::RuleError;
use crate::user::UserInfo;

/// Evaluation inputs for one predicate call.
pub struct EvalContext<'a> {
    pub user: &'a UserInfo,
    pub rec: Option<&'a RecordView>,
    pub new_rec: Option<&'a RecordView>,
}

pub type PredicateFn = dyn Fn(&EvalContext<'_>) -> Result<bool, RuleError> + Send + Sync;

/// A compiled rule predicate. `uses_rec` records whether the formula
/// references `rec`/`newRec`; without a concrete record such predicates
/// cannot be decided.
#[derive(Clone)]
pub struct CompiledFormula {
    pub text: String,
    pub uses_rec: bool,
    func: Arc<PredicateFn>,
}

impl CompiledFormula {
    pub fn new(
        text: impl Into<String>,
        uses_rec: bool,
        func: Arc<PredicateFn>,
    ) -> Self {
        Self { text: text.into(), uses_rec, func }
    }

    /// The empty formula: matches unconditionally.
    pub fn always_true() -> Self {
        Self {
            text: String::new(),
            uses_rec: false,
            func: Arc::new(|_| Ok(true)),
        }
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for CompiledFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFormula")
            .field("text", &self.text)
            .field("uses_rec", &self.uses_rec)
            .finish()
    }
}

/// Compiles formula text into predicates. Injected by the host.
pub trait FormulaCompiler: Send + Sync {
    fn compile(&self, text: &str) -> Result<CompiledFormula, RuleError>;
}

/// Compiler that accepts only the empty formula; useful where rules carry no
/// conditions.
pub struct EmptyFormulaCompiler;

impl FormulaCompiler for EmptyFormulaCompiler {
    fn compile(&self, text: &str) -> Result<CompiledFormula, RuleError> {
        if text.trim().is_empty() {
            Ok(CompiledFormula::always_true())
        } else {
            Err(RuleError::Compile(format!("no compiler for formula: {text}")))
        }
    }
}
