use crate::environment::Environment;
use crate::error::{runtime_error, Result};
use crate::runtime::{as_number, resolve_index, Arity, BuiltIn, Callable, Console, Number, Value};
use log::debug;
use std::cmp::Ordering;
use std::io::Write;
use std::rc::Rc;

/// Binds every built-in function in the global frame of `env`.
///
/// Built-ins are ordinary bindings, so a program can shadow any of them with
/// `let` or `func`.
pub fn install(env: &mut Environment) {
    let global = env.global();
    let mut count = 0;

    macro_rules! define_builtin {
        ($name:expr, $arity:expr, $func:expr) => {
            env.define(global, $name, builtin($name, $arity, $func));
            count += 1;
        };
    }

    define_builtin!("len", Arity::Exact(1), len);
    define_builtin!("type", Arity::Exact(1), |_console, args, _line| {
        Ok(Value::String(args[0].type_name().to_string()))
    });
    define_builtin!("str", Arity::Exact(1), |_console, args, _line| {
        Ok(Value::String(args[0].to_string()))
    });
    define_builtin!("int", Arity::Exact(1), to_int);
    define_builtin!("float", Arity::Exact(1), to_float);
    define_builtin!("abs", Arity::Exact(1), abs);
    define_builtin!("max", Arity::AtLeast(1), |_console, args, line| {
        extremum("max", args, Ordering::Greater, line)
    });
    define_builtin!("min", Arity::AtLeast(1), |_console, args, line| {
        extremum("min", args, Ordering::Less, line)
    });
    define_builtin!("append", Arity::Exact(2), append);
    define_builtin!("pop", Arity::Range(1, 2), pop);
    define_builtin!("input", Arity::Range(0, 1), input);

    debug!("installed {} built-ins", count);
}

fn builtin(
    name: &str,
    arity: Arity,
    func: impl Fn(&mut Console<'_>, Vec<Value>, usize) -> Result<Value> + 'static,
) -> Value {
    Value::Callable(Callable::BuiltIn(Rc::new(BuiltIn {
        name: name.to_string(),
        arity,
        func: Rc::new(func),
    })))
}

fn len(_console: &mut Console, args: Vec<Value>, line: usize) -> Result<Value> {
    let length = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        other => {
            return runtime_error(
                format!("len() expects a string or list, got {}", other.type_name()),
                line,
            )
        }
    };
    Ok(Value::Integer(length as i64))
}

fn to_int(_console: &mut Console, args: Vec<Value>, line: usize) -> Result<Value> {
    match &args[0] {
        Value::Integer(n) => Ok(Value::Integer(*n)),
        // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound.
        Value::Float(n) if n.is_finite() && *n >= i64::MIN as f64 && *n < i64::MAX as f64 => {
            Ok(Value::Integer(n.trunc() as i64))
        }
        Value::Float(n) => runtime_error(format!("Cannot convert {} to int", n), line),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Ok(Value::Integer(n)),
            Err(_) => runtime_error(format!("Cannot convert '{}' to int", s), line),
        },
        other => runtime_error(
            format!("int() expects a number or string, got {}", other.type_name()),
            line,
        ),
    }
}

fn to_float(_console: &mut Console, args: Vec<Value>, line: usize) -> Result<Value> {
    match &args[0] {
        Value::Integer(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) => Ok(Value::Float(n)),
            Err(_) => runtime_error(format!("Cannot convert '{}' to float", s), line),
        },
        other => runtime_error(
            format!("float() expects a number or string, got {}", other.type_name()),
            line,
        ),
    }
}

fn abs(_console: &mut Console, args: Vec<Value>, line: usize) -> Result<Value> {
    match as_number(&args[0], line)? {
        Number::Int(n) => match n.checked_abs() {
            Some(n) => Ok(Value::Integer(n)),
            None => runtime_error("Integer overflow", line),
        },
        Number::Float(n) => Ok(Value::Float(n.abs())),
    }
}

// `max`/`min` over either a single list argument or the argument list itself.
fn extremum(name: &str, args: Vec<Value>, wanted: Ordering, line: usize) -> Result<Value> {
    let single_list = match args.as_slice() {
        [Value::List(items)] => Some(items.borrow().clone()),
        _ => None,
    };
    let candidates = single_list.unwrap_or(args);

    let mut best: Option<(Number, Value)> = None;
    for candidate in candidates {
        let number = match as_number(&candidate, line) {
            Ok(number) => number,
            Err(_) => {
                return runtime_error(
                    format!(
                        "{}() expects numbers, got {}",
                        name,
                        candidate.type_name()
                    ),
                    line,
                )
            }
        };

        let replace = match &best {
            Some((current, _)) => number.compare(*current) == Some(wanted),
            None => true,
        };
        if replace {
            best = Some((number, candidate));
        }
    }

    match best {
        Some((_, value)) => Ok(value),
        None => runtime_error(format!("{}() of an empty list", name), line),
    }
}

fn append(_console: &mut Console, args: Vec<Value>, line: usize) -> Result<Value> {
    let mut args = args.into_iter();
    let (Some(list), Some(item)) = (args.next(), args.next()) else {
        return runtime_error("append() expects a list and a value", line);
    };

    match &list {
        Value::List(items) => items.borrow_mut().push(item),
        other => {
            return runtime_error(
                format!("append() expects a list, got {}", other.type_name()),
                line,
            )
        }
    }
    Ok(list)
}

fn pop(_console: &mut Console, args: Vec<Value>, line: usize) -> Result<Value> {
    let Value::List(items) = &args[0] else {
        return runtime_error(
            format!("pop() expects a list, got {}", args[0].type_name()),
            line,
        );
    };

    let mut items = items.borrow_mut();
    if items.is_empty() {
        return runtime_error("pop() from an empty list", line);
    }

    let index = match args.get(1) {
        None => items.len() - 1,
        Some(Value::Integer(i)) => resolve_index(*i, items.len(), line)?,
        Some(other) => {
            return runtime_error(
                format!("pop() index must be an integer, got {}", other.type_name()),
                line,
            )
        }
    };
    Ok(items.remove(index))
}

fn input(console: &mut Console, args: Vec<Value>, _line: usize) -> Result<Value> {
    if let Some(prompt) = args.first() {
        write!(console.output, "{}", prompt)?;
        console.output.flush()?;
    }

    // End of input and read failures both yield an empty string.
    let mut line = String::new();
    match console.input.read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim_end_matches(['\n', '\r']).len();
            line.truncate(trimmed);
            Ok(Value::String(line))
        }
        Err(err) => {
            debug!("input() read failed: {}", err);
            Ok(Value::String(String::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runtime::Interpreter;
    use pretty_assertions::assert_eq;

    fn eval(expr: &str) -> Result<String> {
        let mut interpreter = Interpreter::with_output(Vec::new());
        interpreter.exec(&format!("print {}\n", expr))?;
        Ok(String::from_utf8_lossy(interpreter.output()).trim_end().to_string())
    }

    fn error_message(source: &str) -> String {
        let mut interpreter = Interpreter::with_output(Vec::new());
        match interpreter.exec(source) {
            Err(Error::Runtime { message, .. }) => message,
            other => panic!("Expected runtime error for {:?}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_install_binds_every_builtin() {
        let mut env = Environment::new();
        install(&mut env);

        for name in [
            "len", "type", "str", "int", "float", "abs", "max", "min", "append", "pop", "input",
        ] {
            match env.get(env.global(), name) {
                Some(Value::Callable(Callable::BuiltIn(builtin))) => assert_eq!(builtin.name, name),
                other => panic!("{} is not a built-in: {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_len() -> Result<()> {
        assert_eq!(eval("len(\"hello\")")?, "5");
        assert_eq!(eval("len(\"\")")?, "0");
        assert_eq!(eval("len([1, 2, 3])")?, "3");
        assert!(eval("len(5)").is_err());
        Ok(())
    }

    #[test]
    fn test_type() -> Result<()> {
        assert_eq!(eval("type(1)")?, "int");
        assert_eq!(eval("type(1.5)")?, "float");
        assert_eq!(eval("type(true)")?, "bool");
        assert_eq!(eval("type(\"s\")")?, "string");
        assert_eq!(eval("type([])")?, "list");
        assert_eq!(eval("type(nil)")?, "nil");
        assert_eq!(eval("type(len)")?, "builtin");

        let mut interpreter = Interpreter::with_output(Vec::new());
        interpreter.exec("func f()\nend\nprint type(f)\nprint f\nprint len\n")?;
        assert_eq!(
            String::from_utf8_lossy(interpreter.output()),
            "function\n<func f>\n<builtin len>\n"
        );
        Ok(())
    }

    #[test]
    fn test_conversions() -> Result<()> {
        assert_eq!(eval("str(12) + \"!\"")?, "12!");
        assert_eq!(eval("str([1, 2])")?, "[1, 2]");
        assert_eq!(eval("int(3.9)")?, "3");
        assert_eq!(eval("int(-3.9)")?, "-3");
        assert_eq!(eval("int(\" 42 \")")?, "42");
        assert_eq!(eval("float(2) / 4")?, "0.5");
        assert_eq!(eval("float(\"2.5\")")?, "2.5");
        assert_eq!(eval("type(float(\"3\"))")?, "float");

        assert!(error_message("int(true)\n").contains("bool"));
        assert!(error_message("float(false)\n").contains("bool"));
        assert!(eval("int(\"abc\")").is_err());
        assert!(eval("float(\"abc\")").is_err());
        assert!(eval("int(nil)").is_err());
        Ok(())
    }

    #[test]
    fn test_abs() -> Result<()> {
        assert_eq!(eval("abs(-5)")?, "5");
        assert_eq!(eval("abs(-2.5)")?, "2.5");
        assert!(eval("abs(\"x\")").is_err());
        assert!(eval("abs(true)").is_err());
        Ok(())
    }

    #[test]
    fn test_max_min() -> Result<()> {
        assert_eq!(eval("max(3, 7, 2)")?, "7");
        assert_eq!(eval("min(3, 7, 2)")?, "2");
        assert_eq!(eval("max([4, 9.5, 1])")?, "9.5");
        assert_eq!(eval("min([4, 9.5, 1])")?, "1");
        assert_eq!(eval("type(max(1, 2.0, 3))")?, "int");
        assert_eq!(eval("max(5)")?, "5");

        assert!(error_message("max([])\n").contains("empty"));
        assert!(eval("min(1, \"a\")").is_err());
        assert!(error_message("max()\n").contains("argument"));
        Ok(())
    }

    #[test]
    fn test_append_mutates_and_returns_list() -> Result<()> {
        let mut interpreter = Interpreter::with_output(Vec::new());
        interpreter.exec("let xs = [1]\nlet ys = append(xs, 2)\nappend(ys, 3)\nprint xs\n")?;
        assert_eq!(String::from_utf8_lossy(interpreter.output()), "[1, 2, 3]\n");

        assert!(eval("append(1, 2)").is_err());
        Ok(())
    }

    #[test]
    fn test_pop() -> Result<()> {
        let mut interpreter = Interpreter::with_output(Vec::new());
        interpreter.exec(
            "let xs = [1, 2, 3, 4]\nprint pop(xs)\nprint pop(xs, 0)\nprint pop(xs, -1)\nprint xs\n",
        )?;
        assert_eq!(String::from_utf8_lossy(interpreter.output()), "4\n1\n3\n[2]\n");

        assert!(error_message("pop([])\n").contains("empty"));
        assert!(error_message("pop([1], 5)\n").contains("out of range"));
        assert!(eval("pop([1], true)").is_err());
        Ok(())
    }

    #[test]
    fn test_builtin_arity_is_checked() {
        let message = error_message("len(1, 2)\n");
        assert!(message.contains("'len' expects 1 argument(s), got 2"));

        let message = error_message("pop()\n");
        assert!(message.contains("1 to 2"));
    }

    #[test]
    fn test_builtins_can_be_shadowed() -> Result<()> {
        let mut interpreter = Interpreter::with_output(Vec::new());
        interpreter.exec("func len(x)\n  return 99\nend\nprint len(\"abc\")\n")?;
        assert_eq!(String::from_utf8_lossy(interpreter.output()), "99\n");
        Ok(())
    }

    fn run_with_input(source: &str, input: &str) -> Result<String> {
        let mut interpreter = Interpreter::with_io(Vec::new(), input.as_bytes());
        interpreter.exec(source)?;
        Ok(String::from_utf8_lossy(interpreter.output()).into_owned())
    }

    #[test]
    fn test_input_reads_lines() -> Result<()> {
        let output = run_with_input(
            "let a = input()\nlet b = input()\nprint a + \"|\" + b\n",
            "abc\r\ndef\n",
        )?;
        assert_eq!(output, "abc|def\n");
        Ok(())
    }

    #[test]
    fn test_input_at_end_of_input_is_empty() -> Result<()> {
        let output = run_with_input("print len(input())\nprint type(input())\n", "")?;
        assert_eq!(output, "0\nstring\n");

        let output = run_with_input("print input() + \"!\"\n", "last line")?;
        assert_eq!(output, "last line!\n");
        Ok(())
    }

    #[test]
    fn test_input_writes_prompt() -> Result<()> {
        let output = run_with_input("let name = input(\"Name? \")\nprint \"Hi \" + name\n", "Ada\n")?;
        assert_eq!(output, "Name? Hi Ada\n");
        Ok(())
    }

    #[test]
    fn test_builtin_arguments_are_evaluated_before_the_count_check() {
        let message = error_message("len(undefined, 2)\n");
        assert!(message.contains("Undefined variable 'undefined'"));
    }
}
