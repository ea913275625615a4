//! The narrow interface the code generator emits through.
//!
//! Nothing outside this module names backend types; [`Codegen`] only sees the
//! opaque `Value` and `Function` handles.
//!
//! [`Codegen`]: crate::codegen::Codegen

pub mod ir;
#[cfg(feature = "llvm")]
pub mod llvm;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no insertion point, open a function body first")]
    NoInsertionPoint,
    #[error("function {0} no longer exists")]
    DanglingFunction(String),
    #[error("unresolved external symbol {0}")]
    UnresolvedSymbol(String),
    #[error("call depth exceeded {0} frames")]
    RecursionLimit(usize),
    #[error("cannot evaluate function {0} taking {1} arguments")]
    NotNullary(String, usize),
    #[error("builder error: {0}")]
    Builder(String),
}

pub trait Backend {
    type Value: Copy;
    type Function: Copy;

    fn const_float(&mut self, value: f64) -> Self::Value;

    fn get_function(&self, name: &str) -> Option<Self::Function>;
    /// Declare a new function taking `params.len()` numbers and returning one.
    fn add_function(&mut self, name: &str, params: &[String]) -> Self::Function;
    fn set_param_names(&mut self, function: Self::Function, params: &[String]);
    fn count_params(&self, function: Self::Function) -> usize;
    fn params(&self, function: Self::Function) -> Vec<Self::Value>;
    fn has_body(&self, function: Self::Function) -> bool;

    /// Give `function` an empty entry block and move the insertion point there.
    fn position_at_entry(&mut self, function: Self::Function) -> Result<(), BackendError>;

    fn build_add(&mut self, lhs: Self::Value, rhs: Self::Value) -> Result<Self::Value, BackendError>;
    fn build_sub(&mut self, lhs: Self::Value, rhs: Self::Value) -> Result<Self::Value, BackendError>;
    fn build_mul(&mut self, lhs: Self::Value, rhs: Self::Value) -> Result<Self::Value, BackendError>;
    /// Unordered less-than, widened to 0.0 or 1.0.
    fn build_less_than(
        &mut self,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError>;
    fn build_call(
        &mut self,
        function: Self::Function,
        args: &[Self::Value],
    ) -> Result<Self::Value, BackendError>;
    fn build_return(&mut self, value: Self::Value) -> Result<(), BackendError>;

    fn verify(&self, function: Self::Function) -> bool;

    /// Drop the body of `function`, leaving it a bare declaration.
    fn clear_body(&mut self, function: Self::Function);
    fn delete_function(&mut self, function: Self::Function);

    /// Names of every function in the module, in declaration order.
    fn function_names(&self) -> Vec<String>;
    fn print_function(&self, function: Self::Function) -> String;
    fn print_module(&self) -> String;

    /// Run a zero-argument function, if this backend can execute code.
    fn evaluate(&self, _function: Self::Function) -> Option<Result<f64, BackendError>> {
        None
    }
}
