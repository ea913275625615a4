use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::{ASTNode, Expression, Function, Prototype},
    backend::{Backend, BackendError},
};

/// Module symbol for the wrapper around a top-level expression. Not a valid
/// identifier, so it can never collide with a user function.
pub const ANONYMOUS_NAME: &str = "__anon_expr";

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable name {0}")]
    UnknownVariable(String),
    #[error("invalid binary operator {0}")]
    UnknownOperator(char),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("incorrect number of arguments passed to {0}, expected {1} found {2}")]
    InvalidCall(String, usize, usize),
    #[error("function {0} declared with {1} parameters, defined with {2}")]
    ArityMismatch(String, usize, usize),
    #[error("function {0} cannot be redefined")]
    Redefinition(String),
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

fn symbol_name(proto: &Prototype) -> &str {
    if proto.is_anonymous() {
        ANONYMOUS_NAME
    } else {
        proto.name.as_str()
    }
}

pub struct Codegen<B: Backend> {
    pub backend: B,
    named_values: HashMap<String, B::Value>,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Codegen<B> {
        Codegen {
            backend,
            named_values: HashMap::new(),
        }
    }

    fn codegen_expr(&mut self, expr: &Expression) -> Result<B::Value, CodegenError> {
        match expr {
            Expression::Literal(value) => Ok(self.backend.const_float(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(*var),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                match op {
                    '+' => Ok(self.backend.build_add(lhs, rhs)?),
                    '-' => Ok(self.backend.build_sub(lhs, rhs)?),
                    '*' => Ok(self.backend.build_mul(lhs, rhs)?),
                    '<' => Ok(self.backend.build_less_than(lhs, rhs)?),
                    _ => Err(CodegenError::UnknownOperator(*op)),
                }
            }
            Expression::Call(callee, args) => match self.backend.get_function(callee) {
                Some(func) => {
                    let expected = self.backend.count_params(func);
                    if expected != args.len() {
                        return Err(CodegenError::InvalidCall(
                            callee.clone(),
                            expected,
                            args.len(),
                        ));
                    }

                    let mut gened_args = Vec::with_capacity(args.len());

                    for arg in args {
                        gened_args.push(self.codegen_expr(arg)?);
                    }

                    Ok(self.backend.build_call(func, &gened_args)?)
                }
                None => Err(CodegenError::UnknownFunction(callee.clone())),
            },
        }
    }

    fn compile_proto(&mut self, proto: &Prototype) -> B::Function {
        let name = symbol_name(proto);
        match self.backend.get_function(name) {
            Some(existing) => existing,
            None => {
                debug!(function = name, arity = proto.args.len(), "declaring");
                self.backend.add_function(name, &proto.args)
            }
        }
    }

    fn compile_fn(&mut self, function: &Function) -> Result<B::Function, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;
        let name = symbol_name(proto);

        let previous = self.backend.get_function(name);
        let func = match previous {
            Some(func) if self.backend.has_body(func) => {
                return Err(CodegenError::Redefinition(name.to_string()));
            }
            Some(func) => {
                let declared = self.backend.count_params(func);
                if declared != proto.args.len() {
                    return Err(CodegenError::ArityMismatch(
                        name.to_string(),
                        declared,
                        proto.args.len(),
                    ));
                }
                func
            }
            None => self.compile_proto(proto),
        };

        let result = self.compile_body(func, proto, body);
        match &result {
            // The definition's parameter names replace the declaration's only
            // once the body is in place.
            Ok(func) if previous.is_some() => self.backend.set_param_names(*func, &proto.args),
            Ok(_) => {}
            // Leave the module exactly as it was before this definition.
            Err(_) if previous.is_some() => {
                debug!(function = name, "stripping partial body");
                self.backend.clear_body(func);
            }
            Err(_) => {
                debug!(function = name, "deleting partial function");
                self.backend.delete_function(func);
            }
        }
        result
    }

    fn compile_body(
        &mut self,
        func: B::Function,
        proto: &Prototype,
        body: &Expression,
    ) -> Result<B::Function, CodegenError> {
        self.backend.position_at_entry(func)?;

        self.named_values.clear();
        self.named_values.reserve(proto.args.len());

        for (arg, value) in proto.args.iter().zip(self.backend.params(func)) {
            self.named_values.insert(arg.clone(), value);
        }

        let body = self.codegen_expr(body)?;

        self.backend.build_return(body)?;

        if self.backend.verify(func) {
            debug!(function = symbol_name(proto), "defined");
            Ok(func)
        } else {
            Err(CodegenError::InvalidFunction(symbol_name(proto).to_string()))
        }
    }

    pub fn codegen(&mut self, node: &ASTNode) -> Result<B::Function, CodegenError> {
        match node {
            ASTNode::Function(func) => self.compile_fn(func),
            ASTNode::Extern(proto) => Ok(self.compile_proto(proto)),
        }
    }

    /// Erase a function once it has been used, e.g. an evaluated anonymous
    /// expression.
    pub fn remove(&mut self, function: B::Function) {
        self.backend.delete_function(function);
    }

    /// Names of functions in the module, ignoring any anonymous wrapper.
    pub fn named_functions(&self) -> Vec<String> {
        self.backend
            .function_names()
            .into_iter()
            .filter(|name| name != ANONYMOUS_NAME)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::ir::IrModule, lexer::Lexer, parser::Parser};
    use pretty_assertions::assert_eq;

    fn codegen() -> Codegen<IrModule> {
        Codegen::new(IrModule::new("test"))
    }

    fn parse(input: &str) -> ASTNode {
        let mut parser = Parser::new(Lexer::new(input.as_bytes()));
        parser.advance().unwrap();
        parser.parse_top_level().unwrap()
    }

    fn run(codegen: &mut Codegen<IrModule>, input: &str) -> Result<String, CodegenError> {
        let func = codegen.codegen(&parse(input))?;
        Ok(codegen.backend.print_function(func))
    }

    #[test]
    fn codegen_works() {
        let mut codegen = codegen();
        run(&mut codegen, "extern sin(x);").unwrap();
        let ir = run(&mut codegen, "def thing(x) sin(x) * x;").unwrap();
        assert_eq!(
            ir,
            "define double @thing(double %x) {\n\
             entry:\n  \
             %0 = call double @sin(double %x)\n  \
             %1 = fmul double %0, %x\n  \
             ret double %1\n\
             }\n"
        );
    }

    #[test]
    fn extern_then_matching_def_merges() {
        let mut codegen = codegen();
        run(&mut codegen, "extern foo(a)").unwrap();
        run(&mut codegen, "def foo(b) b+1").unwrap();

        let foo = codegen.backend.get_function("foo").unwrap();
        assert!(codegen.backend.has_body(foo));
        assert_eq!(codegen.named_functions(), ["foo"]);
        assert!(codegen.backend.print_function(foo).contains("double %b"));
    }

    #[test]
    fn extern_then_mismatched_def_fails() {
        let mut codegen = codegen();
        run(&mut codegen, "extern foo(a)").unwrap();
        let err = run(&mut codegen, "def foo(a b) a+b").unwrap_err();
        assert!(matches!(err, CodegenError::ArityMismatch(ref name, 1, 2) if name == "foo"));

        let foo = codegen.backend.get_function("foo").unwrap();
        assert!(!codegen.backend.has_body(foo));
        assert_eq!(codegen.backend.count_params(foo), 1);
    }

    #[test]
    fn repeated_extern_reuses_declaration() {
        let mut codegen = codegen();
        let first = codegen.codegen(&parse("extern foo(a)")).unwrap();
        let second = codegen.codegen(&parse("extern foo(a)")).unwrap();
        assert_eq!(first, second);
        assert_eq!(codegen.named_functions(), ["foo"]);
    }

    #[test]
    fn redefinition_is_rejected() {
        let mut codegen = codegen();
        run(&mut codegen, "def id(x) x").unwrap();
        let before = codegen.backend.print_module();
        let err = run(&mut codegen, "def id(y) y").unwrap_err();
        assert!(matches!(err, CodegenError::Redefinition(ref name) if name == "id"));
        assert_eq!(codegen.backend.print_module(), before);
    }

    #[test]
    fn unknown_function_leaves_module_unchanged() {
        let mut codegen = codegen();
        let before = codegen.backend.print_module();
        let err = run(&mut codegen, "bar(1)").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownFunction(ref name) if name == "bar"));
        assert_eq!(codegen.backend.print_module(), before);
        assert!(codegen.backend.function_names().is_empty());
    }

    #[test]
    fn wrong_argument_count() {
        let mut codegen = codegen();
        run(&mut codegen, "extern pow(x y)").unwrap();
        let err = run(&mut codegen, "pow(2)").unwrap_err();
        assert!(matches!(err, CodegenError::InvalidCall(_, 2, 1)));
    }

    #[test]
    fn failed_body_deletes_fresh_function() {
        let mut codegen = codegen();
        let err = run(&mut codegen, "def f(x) x + y").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownVariable(ref name) if name == "y"));
        assert_eq!(codegen.backend.get_function("f"), None);

        // The name is free again afterwards.
        run(&mut codegen, "def f(x) x").unwrap();
    }

    #[test]
    fn failed_body_restores_declaration() {
        let mut codegen = codegen();
        run(&mut codegen, "extern f(x)").unwrap();
        let before = codegen.backend.print_module();
        let err = run(&mut codegen, "def f(x) x / 2").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownOperator('/')));
        assert_eq!(codegen.backend.print_module(), before);
    }

    #[test]
    fn failed_body_keeps_declared_parameter_names() {
        let mut codegen = codegen();
        run(&mut codegen, "extern f(x)").unwrap();
        let before = codegen.backend.print_module();
        let err = run(&mut codegen, "def f(y) y / 2").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownOperator('/')));
        assert_eq!(codegen.backend.print_module(), before);

        let err = run(&mut codegen, "def f(z) z + w").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownVariable(ref name) if name == "w"));
        assert_eq!(codegen.backend.print_module(), before);

        // A later successful definition still takes its own names.
        let ir = run(&mut codegen, "def f(y) y").unwrap();
        assert!(ir.contains("define double @f(double %y)"));
    }

    #[test]
    fn parameters_do_not_leak_between_functions() {
        let mut codegen = codegen();
        run(&mut codegen, "def f(x) x").unwrap();
        let err = run(&mut codegen, "def g(y) x").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownVariable(ref name) if name == "x"));
    }

    #[test]
    fn comparison_is_widened() {
        let mut codegen = codegen();
        let ir = run(&mut codegen, "def lt(a b) a < b").unwrap();
        assert!(ir.contains("fcmp ult double %a, %b"));
        assert!(ir.contains("uitofp i1 %0 to double"));
        assert!(matches!(
            run(&mut codegen, "def gt(a b) a > b").unwrap_err(),
            CodegenError::UnknownOperator('>')
        ));
    }

    #[test]
    fn anonymous_expression_is_removable() {
        let mut codegen = codegen();
        run(&mut codegen, "def two() 2").unwrap();
        let before = codegen.named_functions();

        let func = codegen.codegen(&parse("two() + 2")).unwrap();
        assert!(codegen.backend.verify(func));
        assert_eq!(codegen.backend.evaluate(func).unwrap().unwrap(), 4.0);
        codegen.remove(func);

        assert_eq!(codegen.named_functions(), before);
        assert_eq!(codegen.backend.function_names(), ["two"]);
    }
}
