use std::io::{self, BufRead, Write};

use crate::diagnostic::Diagnostic;
use crate::diagnostic::ansi::AnsiRenderer;
use crate::vm::{Vm, VmConfig};
use crate::{Error, compile_source_at};

pub const PROMPT: &str = ">> ";

/// Line-at-a-time session over one long-lived VM.
///
/// Each line is compiled at the VM's current code length and appended, so
/// globals and functions from earlier lines stay visible and label names
/// never collide.
pub struct Repl {
    vm: Vm,
    renderer: AnsiRenderer,
}

impl Repl {
    /// `output` receives everything the program prints.
    pub fn new(config: VmConfig, output: Box<dyn Write>) -> Self {
        Repl {
            vm: Vm::new(Vec::new()).with_config(config).with_output(output),
            renderer: AnsiRenderer::for_stderr(),
        }
    }

    pub fn with_renderer(mut self, renderer: AnsiRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn eval(&mut self, line: &str) -> Result<(), Error> {
        let code = compile_source_at(line, self.vm.code().len())?;
        log::debug!("repl: appending {} instruction(s)", code.len());
        self.vm.append(code);
        self.vm.run()?;
        Ok(())
    }

    /// Read lines until EOF or `exit`. Errors are rendered to `err` and the
    /// session carries on.
    pub fn run<R: BufRead, W: Write, E: Write>(&mut self, input: R, out: &mut W, err: &mut E) -> io::Result<()> {
        writeln!(out, "Strawberry.")?;
        writeln!(out, "Type \"exit\" to exit.")?;
        let mut lines = input.lines();
        loop {
            write!(out, "{PROMPT}")?;
            out.flush()?;
            let Some(line) = lines.next() else {
                return Ok(());
            };
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" {
                writeln!(out, "bye.")?;
                return Ok(());
            }
            if let Err(e) = self.eval(line) {
                let diags = match &e {
                    Error::Vm(vm_err) => vec![Diagnostic::runtime(vm_err, &self.vm)],
                    _ => e.diagnostics(Some(line)),
                };
                for d in diags {
                    write!(err, "{}", self.renderer.render(&d))?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn session(input: &str, config: VmConfig) -> (String, String, String) {
        let printed = Shared::default();
        let mut repl = Repl::new(config, Box::new(printed.clone()))
            .with_renderer(AnsiRenderer { use_color: false });
        let mut out = Vec::new();
        let mut err = Vec::new();
        repl.run(Cursor::new(input.to_string()), &mut out, &mut err).unwrap();
        (
            printed.text(),
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn repl_keeps_globals_between_lines() {
        let (printed, _, err) = session("var a = 2;\nprint a * 21;\n", VmConfig::default());
        assert_eq!(printed, "42\n");
        assert!(err.is_empty(), "unexpected errors: {err}");
    }

    #[test]
    fn repl_keeps_functions_between_lines() {
        let input = "fun sq(x) { return x * x; }\nprint sq(5);\nprint sq(sq(2));\n";
        let (printed, _, _) = session(input, VmConfig::default());
        assert_eq!(printed, "25\n16\n");
    }

    #[test]
    fn repl_reports_errors_and_continues() {
        let input = "var a = 1;\nprint missing;\nvar = 3;\nprint a;\n";
        let (printed, _, err) = session(input, VmConfig::default());
        assert_eq!(printed, "1\n");
        assert!(err.contains("undefined variable: missing"), "got: {err}");
        assert!(err.contains("error[SB-P"), "got: {err}");
    }

    #[test]
    fn repl_runtime_errors_name_the_instruction() {
        let (_, _, err) = session("print 1/0;\n", VmConfig::default());
        assert!(err.contains("division by zero"), "got: {err}");
        assert!(err.contains("at instruction 2: DIV"), "got: {err}");
    }

    #[test]
    fn repl_labels_stay_unique_across_lines() {
        let input = "var i = 0;\nwhile (i < 2) i = i + 1;\nwhile (i < 4) i = i + 1;\nprint i;\n";
        let (printed, _, err) = session(input, VmConfig::default());
        assert_eq!(printed, "4\n");
        assert!(err.is_empty(), "unexpected errors: {err}");
    }

    #[test]
    fn repl_exit_stops_reading() {
        let (printed, out, _) = session("print 1;\nexit\nprint 2;\n", VmConfig::default());
        assert_eq!(printed, "1\n");
        assert!(out.starts_with("Strawberry."));
        assert!(out.ends_with("bye.\n"));
    }

    #[test]
    fn repl_skips_blank_lines() {
        let (printed, out, _) = session("\n   \nprint true;\n", VmConfig::default());
        assert_eq!(printed, "true\n");
        assert_eq!(out.matches(PROMPT).count(), 4);
    }
}
