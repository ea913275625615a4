//! The read, parse, generate, report loop.

use std::io::{BufRead, Write};

use tracing::{debug, info};

use crate::{
    ast::ASTNode,
    backend::Backend,
    codegen::Codegen,
    lexer::{LexError, Token},
    parser::{Parser, ParserError},
};

#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Print `ready> ` before each form.
    pub prompt: bool,
    /// Evaluate top-level expressions when the backend can.
    pub evaluate: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            prompt: false,
            evaluate: true,
        }
    }
}

/// Everything one interactive session owns: the lookahead token (inside the
/// parser), the symbol table and module (inside the code generator), and the
/// diagnostic stream.
pub struct Session<R, B: Backend, W> {
    parser: Parser<R>,
    codegen: Codegen<B>,
    out: W,
    options: Options,
}

impl<R: BufRead, B: Backend, W: Write> Session<R, B, W> {
    pub fn new(parser: Parser<R>, codegen: Codegen<B>, out: W, options: Options) -> Self {
        Session {
            parser,
            codegen,
            out,
            options,
        }
    }

    /// Process forms until end of input, then dump the module.
    ///
    /// Malformed forms are reported and skipped; only failing to read input or
    /// write diagnostics ends the session early.
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.prompt()?;
        self.parser.advance()?;

        loop {
            match self.parser.current() {
                Token::Eof => break,
                Token::Char(';') => {
                    self.parser.advance()?;
                    continue;
                }
                _ => self.handle_form()?,
            }
            self.prompt()?;
        }

        info!(functions = self.codegen.named_functions().len(), "end of input");
        write!(self.out, "{}", self.codegen.backend.print_module())?;
        Ok(())
    }

    fn prompt(&mut self) -> anyhow::Result<()> {
        if self.options.prompt {
            write!(self.out, "ready> ")?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn handle_form(&mut self) -> anyhow::Result<()> {
        let node = match self.parser.parse_top_level() {
            Ok(node) => node,
            Err(err) => return self.recover(err),
        };

        let (heading, anonymous) = match node {
            ASTNode::Extern(_) => ("Read extern:", false),
            ASTNode::Function(ref function) if function.prototype.is_anonymous() => {
                ("Read top-level expression:", true)
            }
            ASTNode::Function(_) => ("Read function definition:", false),
        };
        debug!(heading, "parsed form");

        let func = match self.codegen.codegen(&node) {
            Ok(func) => func,
            // The whole form was consumed by the parser, so no token is
            // discarded here; the lookahead already starts the next form.
            Err(err) => return self.report(&err),
        };
        writeln!(self.out, "{}", heading)?;
        write!(self.out, "{}", self.codegen.backend.print_function(func))?;

        if anonymous {
            let evaluated = if self.options.evaluate {
                self.codegen.backend.evaluate(func)
            } else {
                None
            };
            self.codegen.remove(func);

            match evaluated {
                Some(Ok(value)) => writeln!(self.out, "Evaluated to {}", value)?,
                Some(Err(err)) => self.report(&err)?,
                None => {}
            }
        }
        Ok(())
    }

    fn report(&mut self, err: &dyn std::error::Error) -> anyhow::Result<()> {
        writeln!(self.out, "Error: {}", err)?;
        Ok(())
    }

    /// Report a parse failure and skip the offending token, unless it already
    /// starts the next form.
    fn recover(&mut self, err: ParserError) -> anyhow::Result<()> {
        if let ParserError::Lex(LexError::Io(_)) = err {
            return Err(err.into());
        }
        self.report(&err)?;

        match self.parser.current() {
            Token::Eof | Token::Def | Token::Extern => {}
            token => {
                debug!(%token, "skipping token");
                self.parser.advance()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::ir::IrModule, lexer::Lexer};
    use pretty_assertions::assert_eq;

    fn session(input: &str) -> Session<&[u8], IrModule, Vec<u8>> {
        Session::new(
            Parser::new(Lexer::new(input.as_bytes())),
            Codegen::new(IrModule::new("test")),
            Vec::new(),
            Options::default(),
        )
    }

    fn run(input: &str) -> (String, Vec<String>) {
        let mut session = session(input);
        session.run().unwrap();
        let names = session.codegen.named_functions();
        (String::from_utf8(session.out).unwrap(), names)
    }

    #[test]
    fn bare_expression_is_evaluated_and_erased() {
        let (out, names) = run("2+2;");
        assert_eq!(
            out,
            "Read top-level expression:\n\
             define double @__anon_expr() {\n\
             entry:\n  \
             %0 = fadd double 2.000000e+00, 2.000000e+00\n  \
             ret double %0\n\
             }\n\
             Evaluated to 4\n\
             ; ModuleID = 'test'\n"
        );
        assert!(names.is_empty());
    }

    #[test]
    fn named_count_unchanged_by_expressions() {
        let (out, names) = run("def sq(x) x*x; sq(3); sq(4) + 1;");
        assert_eq!(names, ["sq"]);
        assert!(out.contains("Evaluated to 9\n"));
        assert!(out.contains("Evaluated to 17\n"));
        let dump = out.rsplit("; ModuleID").next().unwrap();
        assert!(dump.contains("define double @sq(double %x)"));
        assert!(!dump.contains("__anon_expr"));
    }

    #[test]
    fn extern_definitions_and_builtins() {
        let (out, names) = run("extern sqrt(x);\nsqrt(16);");
        assert!(out.starts_with("Read extern:\ndeclare double @sqrt(double %x)\n"));
        assert!(out.contains("Evaluated to 4\n"));
        assert_eq!(names, ["sqrt"]);
    }

    #[test]
    fn recovers_after_malformed_definition() {
        let (out, names) = run("def f(\ndef g(x) x");
        assert!(out.starts_with("Error: expected ')' in prototype, found 'def'\n"));
        assert!(out.contains("Read function definition:\ndefine double @g(double %x)"));
        assert_eq!(names, ["g"]);
    }

    #[test]
    fn recovers_after_malformed_expression() {
        let (out, names) = run(") ; def g(x) x");
        assert!(out.starts_with("Error: unknown token ')', expected an expression\n"));
        assert_eq!(names, ["g"]);
    }

    #[test]
    fn invalid_utf8_does_not_end_session() {
        let mut session = Session::new(
            Parser::new(Lexer::new(&b"\xff;\ndef g(x) x\n"[..])),
            Codegen::new(IrModule::new("test")),
            Vec::new(),
            Options::default(),
        );
        session.run().unwrap();
        let out = String::from_utf8(session.out).unwrap();
        assert!(out.starts_with("Error: unknown token '\u{fffd}', expected an expression\n"));
        assert!(out.contains("Read function definition:\ndefine double @g(double %x)"));
        assert!(out.ends_with("ret double %x\n}\n"));
        assert_eq!(session.codegen.named_functions(), ["g"]);
    }

    #[test]
    fn codegen_failure_does_not_skip_next_form() {
        let (out, names) = run("bar(1)\ndef g(x) x");
        assert!(out.starts_with("Error: unknown function referenced bar\n"));
        assert_eq!(names, ["g"]);
    }

    #[test]
    fn forward_declaration_mismatch_reported() {
        let (out, names) = run("extern foo(a); def foo(a b) a+b; def foo(a) a+1;");
        assert!(out.contains("Error: function foo declared with 1 parameters, defined with 2\n"));
        assert!(out.contains("Read function definition:\ndefine double @foo(double %a)"));
        assert_eq!(names, ["foo"]);
    }

    #[test]
    fn evaluation_can_be_disabled() {
        let mut session = Session::new(
            Parser::new(Lexer::new("1;".as_bytes())),
            Codegen::new(IrModule::new("test")),
            Vec::new(),
            Options {
                prompt: true,
                evaluate: false,
            },
        );
        session.run().unwrap();
        let out = String::from_utf8(session.out).unwrap();
        assert!(out.starts_with("ready> Read top-level expression:\n"));
        assert!(!out.contains("Evaluated"));
        assert!(out.ends_with("ready> ; ModuleID = 'test'\n"));
    }

    #[test]
    fn evaluation_errors_are_reported() {
        let (out, names) = run("extern mystery(); mystery();");
        assert!(out.contains("Error: unresolved external symbol mystery\n"));
        assert_eq!(names, ["mystery"]);
    }

    #[test]
    fn module_dump_at_end() {
        let (out, _) = run("extern sin(x); def one() 1;");
        assert!(out.ends_with(
            "; ModuleID = 'test'\n\n\
             declare double @sin(double %x)\n\n\
             define double @one() {\n\
             entry:\n  \
             ret double 1.000000e+00\n\
             }\n"
        ));
    }
}
