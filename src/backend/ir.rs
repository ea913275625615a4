//! In-process backend: a small three-address IR over `double`.
//!
//! Every defined function has a single `entry` block. Values are constants,
//! parameters or numbered temporaries, each temporary assigned exactly once.

use std::{collections::HashMap, fmt};

use tracing::{debug, trace};

use super::{Backend, BackendError};

const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    Param(usize),
    Temp(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "fadd",
            ArithOp::Sub => "fsub",
            ArithOp::Mul => "fmul",
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ArithOp::Add => lhs + rhs,
            ArithOp::Sub => lhs - rhs,
            ArithOp::Mul => lhs * rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binary {
        op: ArithOp,
        lhs: Value,
        rhs: Value,
        dst: u32,
    },
    /// `fcmp ult`, producing a boolean.
    LessThan { lhs: Value, rhs: Value, dst: u32 },
    /// `uitofp`, widening a boolean to 0.0 or 1.0.
    BoolToFloat { src: Value, dst: u32 },
    Call {
        callee: FunctionId,
        args: Vec<Value>,
        dst: u32,
    },
    Return(Value),
}

#[derive(Debug)]
pub struct IrFunction {
    id: FunctionId,
    name: String,
    params: Vec<String>,
    body: Option<Vec<Instruction>>,
    next_temp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Bool,
}

#[derive(Debug)]
pub struct IrModule {
    name: String,
    functions: Vec<IrFunction>,
    next_id: u32,
    insertion: Option<FunctionId>,
}

impl IrModule {
    pub fn new(name: &str) -> Self {
        IrModule {
            name: name.to_string(),
            functions: Vec::new(),
            next_id: 0,
            insertion: None,
        }
    }

    fn function(&self, id: FunctionId) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.id == id)
    }

    fn function_mut(&mut self, id: FunctionId) -> Option<&mut IrFunction> {
        self.functions.iter_mut().find(|f| f.id == id)
    }

    fn emit(&mut self, make: impl FnOnce(u32) -> Instruction) -> Result<Value, BackendError> {
        let id = self.insertion.ok_or(BackendError::NoInsertionPoint)?;
        let function = self.function_mut(id).ok_or(BackendError::NoInsertionPoint)?;
        let dst = function.next_temp;
        let body = function.body.as_mut().ok_or(BackendError::NoInsertionPoint)?;
        body.push(make(dst));
        function.next_temp += 1;
        Ok(Value::Temp(dst))
    }

    fn check(&self, function: &IrFunction) -> Result<(), String> {
        let body = function.body.as_ref().ok_or("function has no body")?;
        let mut kinds = HashMap::new();

        let operand = |kinds: &HashMap<u32, Kind>, value: Value, want: Kind| -> Result<(), String> {
            let kind = match value {
                Value::Const(_) => Kind::Float,
                Value::Param(i) if i < function.params.len() => Kind::Float,
                Value::Param(i) => return Err(format!("parameter {} out of range", i)),
                Value::Temp(t) => *kinds
                    .get(&t)
                    .ok_or_else(|| format!("%{} used before definition", t))?,
            };
            if kind == want {
                Ok(())
            } else {
                Err(format!("operand {:?} has kind {:?}, expected {:?}", value, kind, want))
            }
        };
        let define = |kinds: &mut HashMap<u32, Kind>, dst: u32, kind: Kind| {
            if kinds.insert(dst, kind).is_some() {
                Err(format!("%{} assigned twice", dst))
            } else {
                Ok(())
            }
        };

        match body.last() {
            Some(Instruction::Return(_)) => {}
            _ => return Err("entry block is not terminated by ret".to_string()),
        }

        for (i, inst) in body.iter().enumerate() {
            match inst {
                Instruction::Binary { lhs, rhs, dst, .. } => {
                    operand(&kinds, *lhs, Kind::Float)?;
                    operand(&kinds, *rhs, Kind::Float)?;
                    define(&mut kinds, *dst, Kind::Float)?;
                }
                Instruction::LessThan { lhs, rhs, dst } => {
                    operand(&kinds, *lhs, Kind::Float)?;
                    operand(&kinds, *rhs, Kind::Float)?;
                    define(&mut kinds, *dst, Kind::Bool)?;
                }
                Instruction::BoolToFloat { src, dst } => {
                    operand(&kinds, *src, Kind::Bool)?;
                    define(&mut kinds, *dst, Kind::Float)?;
                }
                Instruction::Call { callee, args, dst } => {
                    let target = self
                        .function(*callee)
                        .ok_or_else(|| format!("call to deleted function {:?}", callee))?;
                    if target.params.len() != args.len() {
                        return Err(format!(
                            "call to {} passes {} arguments, expected {}",
                            target.name,
                            args.len(),
                            target.params.len()
                        ));
                    }
                    for arg in args {
                        operand(&kinds, *arg, Kind::Float)?;
                    }
                    define(&mut kinds, *dst, Kind::Float)?;
                }
                Instruction::Return(value) => {
                    if i + 1 != body.len() {
                        return Err("instructions after ret".to_string());
                    }
                    operand(&kinds, *value, Kind::Float)?;
                }
            }
        }

        Ok(())
    }

    fn call(&self, id: FunctionId, args: &[f64], depth: usize) -> Result<f64, BackendError> {
        if depth > MAX_CALL_DEPTH {
            return Err(BackendError::RecursionLimit(MAX_CALL_DEPTH));
        }
        let function = self
            .function(id)
            .ok_or_else(|| BackendError::DanglingFunction(format!("{:?}", id)))?;
        let body = match function.body {
            Some(ref body) => body,
            None => return call_builtin(&function.name, args),
        };
        trace!(function = %function.name, ?args, depth, "call");

        let malformed = || BackendError::Builder(format!("malformed function {}", function.name));
        let mut temps = vec![0.0; function.next_temp as usize];

        for inst in body {
            let (dst, result) = match inst {
                Instruction::Binary { op, lhs, rhs, dst } => {
                    let lhs = read(args, &temps, *lhs).ok_or_else(malformed)?;
                    let rhs = read(args, &temps, *rhs).ok_or_else(malformed)?;
                    (*dst, op.apply(lhs, rhs))
                }
                Instruction::LessThan { lhs, rhs, dst } => {
                    let lhs = read(args, &temps, *lhs).ok_or_else(malformed)?;
                    let rhs = read(args, &temps, *rhs).ok_or_else(malformed)?;
                    let ult = lhs < rhs || lhs.is_nan() || rhs.is_nan();
                    (*dst, if ult { 1.0 } else { 0.0 })
                }
                Instruction::BoolToFloat { src, dst } => {
                    (*dst, read(args, &temps, *src).ok_or_else(malformed)?)
                }
                Instruction::Call {
                    callee,
                    args: call_args,
                    dst,
                } => {
                    let values = call_args
                        .iter()
                        .map(|arg| read(args, &temps, *arg).ok_or_else(malformed))
                        .collect::<Result<Vec<_>, _>>()?;
                    (*dst, self.call(*callee, &values, depth + 1)?)
                }
                Instruction::Return(value) => {
                    return read(args, &temps, *value).ok_or_else(malformed)
                }
            };
            *temps.get_mut(dst as usize).ok_or_else(malformed)? = result;
        }

        Err(malformed())
    }
}

fn read(args: &[f64], temps: &[f64], value: Value) -> Option<f64> {
    match value {
        Value::Const(c) => Some(c),
        Value::Param(i) => args.get(i).copied(),
        Value::Temp(t) => temps.get(t as usize).copied(),
    }
}

/// Host implementations for bodiless `extern` declarations.
fn call_builtin(name: &str, args: &[f64]) -> Result<f64, BackendError> {
    let value = match (name, args) {
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("sqrt", [x]) => x.sqrt(),
        ("exp", [x]) => x.exp(),
        ("log", [x]) => x.ln(),
        ("fabs", [x]) => x.abs(),
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        ("pow", [x, y]) => x.powf(*y),
        _ => return Err(BackendError::UnresolvedSymbol(name.to_string())),
    };
    Ok(value)
}

/// Format a constant as LLVM does: `%e` with six digits when that reads back
/// to the same value, the raw bits in hex otherwise.
fn llvm_double(value: f64) -> String {
    if value.is_finite() {
        let text = format!("{:.6e}", value);
        if let Some((mantissa, exponent)) = text.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                let printed = format!("{}e{}{:02}", mantissa, sign, exponent.abs());
                if printed.parse::<f64>().ok() == Some(value) {
                    return printed;
                }
            }
        }
    }
    format!("0x{:016X}", value.to_bits())
}

struct FunctionDisplay<'a> {
    module: &'a IrModule,
    function: &'a IrFunction,
}

impl FunctionDisplay<'_> {
    fn operand(&self, value: Value) -> String {
        match value {
            Value::Const(c) => llvm_double(c),
            Value::Param(i) => match self.function.params.get(i) {
                Some(name) => format!("%{}", name),
                None => format!("%arg{}", i),
            },
            Value::Temp(t) => format!("%{}", t),
        }
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .function
            .params
            .iter()
            .map(|p| format!("double %{}", p))
            .collect::<Vec<_>>()
            .join(", ");

        let body = match self.function.body {
            Some(ref body) => body,
            None => return writeln!(f, "declare double @{}({})", self.function.name, params),
        };

        writeln!(f, "define double @{}({}) {{", self.function.name, params)?;
        writeln!(f, "entry:")?;
        for inst in body {
            match inst {
                Instruction::Binary { op, lhs, rhs, dst } => writeln!(
                    f,
                    "  %{} = {} double {}, {}",
                    dst,
                    op.mnemonic(),
                    self.operand(*lhs),
                    self.operand(*rhs)
                )?,
                Instruction::LessThan { lhs, rhs, dst } => writeln!(
                    f,
                    "  %{} = fcmp ult double {}, {}",
                    dst,
                    self.operand(*lhs),
                    self.operand(*rhs)
                )?,
                Instruction::BoolToFloat { src, dst } => writeln!(
                    f,
                    "  %{} = uitofp i1 {} to double",
                    dst,
                    self.operand(*src)
                )?,
                Instruction::Call { callee, args, dst } => {
                    let callee = self
                        .module
                        .function(*callee)
                        .map_or("<deleted>", |c| c.name.as_str());
                    let args = args
                        .iter()
                        .map(|a| format!("double {}", self.operand(*a)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    writeln!(f, "  %{} = call double @{}({})", dst, callee, args)?
                }
                Instruction::Return(value) => writeln!(f, "  ret double {}", self.operand(*value))?,
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{}", FunctionDisplay { module: self, function })?;
        }
        Ok(())
    }
}

impl Backend for IrModule {
    type Value = Value;
    type Function = FunctionId;

    fn const_float(&mut self, value: f64) -> Value {
        Value::Const(value)
    }

    fn get_function(&self, name: &str) -> Option<FunctionId> {
        self.functions.iter().find(|f| f.name == name).map(|f| f.id)
    }

    fn add_function(&mut self, name: &str, params: &[String]) -> FunctionId {
        let id = FunctionId(self.next_id);
        self.next_id += 1;
        self.functions.push(IrFunction {
            id,
            name: name.to_string(),
            params: params.to_vec(),
            body: None,
            next_temp: 0,
        });
        id
    }

    fn set_param_names(&mut self, function: FunctionId, params: &[String]) {
        if let Some(function) = self.function_mut(function) {
            if function.params.len() == params.len() {
                function.params = params.to_vec();
            }
        }
    }

    fn count_params(&self, function: FunctionId) -> usize {
        self.function(function).map_or(0, |f| f.params.len())
    }

    fn params(&self, function: FunctionId) -> Vec<Value> {
        (0..self.count_params(function)).map(Value::Param).collect()
    }

    fn has_body(&self, function: FunctionId) -> bool {
        self.function(function).map_or(false, |f| f.body.is_some())
    }

    fn position_at_entry(&mut self, id: FunctionId) -> Result<(), BackendError> {
        let function = self
            .function_mut(id)
            .ok_or_else(|| BackendError::DanglingFunction(format!("{:?}", id)))?;
        function.body = Some(Vec::new());
        function.next_temp = 0;
        self.insertion = Some(id);
        Ok(())
    }

    fn build_add(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.emit(|dst| Instruction::Binary {
            op: ArithOp::Add,
            lhs,
            rhs,
            dst,
        })
    }

    fn build_sub(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.emit(|dst| Instruction::Binary {
            op: ArithOp::Sub,
            lhs,
            rhs,
            dst,
        })
    }

    fn build_mul(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.emit(|dst| Instruction::Binary {
            op: ArithOp::Mul,
            lhs,
            rhs,
            dst,
        })
    }

    fn build_less_than(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        let cmp = self.emit(|dst| Instruction::LessThan { lhs, rhs, dst })?;
        self.emit(|dst| Instruction::BoolToFloat { src: cmp, dst })
    }

    fn build_call(&mut self, function: FunctionId, args: &[Value]) -> Result<Value, BackendError> {
        let args = args.to_vec();
        self.emit(|dst| Instruction::Call {
            callee: function,
            args,
            dst,
        })
    }

    fn build_return(&mut self, value: Value) -> Result<(), BackendError> {
        let id = self.insertion.ok_or(BackendError::NoInsertionPoint)?;
        self.function_mut(id)
            .and_then(|f| f.body.as_mut())
            .ok_or(BackendError::NoInsertionPoint)?
            .push(Instruction::Return(value));
        Ok(())
    }

    fn verify(&self, function: FunctionId) -> bool {
        let function = match self.function(function) {
            Some(function) => function,
            None => return false,
        };
        match self.check(function) {
            Ok(()) => true,
            Err(reason) => {
                debug!(function = %function.name, %reason, "verification failed");
                false
            }
        }
    }

    fn clear_body(&mut self, id: FunctionId) {
        if let Some(function) = self.function_mut(id) {
            function.body = None;
            function.next_temp = 0;
        }
        if self.insertion == Some(id) {
            self.insertion = None;
        }
    }

    fn delete_function(&mut self, id: FunctionId) {
        self.functions.retain(|f| f.id != id);
        if self.insertion == Some(id) {
            self.insertion = None;
        }
    }

    fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name.clone()).collect()
    }

    fn print_function(&self, function: FunctionId) -> String {
        match self.function(function) {
            Some(function) => FunctionDisplay { module: self, function }.to_string(),
            None => String::new(),
        }
    }

    fn print_module(&self) -> String {
        self.to_string()
    }

    fn evaluate(&self, id: FunctionId) -> Option<Result<f64, BackendError>> {
        let function = self.function(id)?;
        if !function.params.is_empty() {
            return Some(Err(BackendError::NotNullary(
                function.name.clone(),
                function.params.len(),
            )));
        }
        Some(self.call(id, &[], 0))
    }
}
