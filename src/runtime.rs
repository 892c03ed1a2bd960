use crate::environment::{Environment, FrameId};
use crate::error::{runtime_error, Result};
use crate::parser::{BinaryOp, Expr, ExprType, Literal, Stmt, StmtType, UnaryOp};
use crate::{parse_source, stdlib, STACK_GROWTH, STACK_RED_ZONE};
use log::{debug, trace};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::HashSet,
    fmt::{self, Debug, Display, Formatter},
    io::{self, BufRead, BufReader, Stdin, Stdout, Write},
    rc::Rc,
};

/// Nested user function calls allowed before a call fails.
pub const MAX_CALL_DEPTH: usize = 1000;

#[derive(Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    List(Rc<RefCell<Vec<Value>>>),
    Callable(Callable),
    Nil,
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Boolean(_) => "bool",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Callable(Callable::Function(_)) => "function",
            Value::Callable(Callable::BuiltIn(_)) => "builtin",
            Value::Nil => "nil",
        }
    }

    /// `nil`, `false` and numeric zero are falsy, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other, &mut HashSet::new())
    }
}

type ListPair = (*const RefCell<Vec<Value>>, *const RefCell<Vec<Value>>);

// Pairs of lists already being compared further up count as equal, so
// self-containing lists compare without looping forever.
fn values_equal(left: &Value, right: &Value, in_progress: &mut HashSet<ListPair>) -> bool {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            *a as f64 == *b
        }
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
            if !in_progress.insert(pair) {
                return true;
            }

            let (xs, ys) = (a.borrow(), b.borrow());
            let equal = xs.len() == ys.len()
                && stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                    xs.iter()
                        .zip(ys.iter())
                        .all(|(x, y)| values_equal(x, y, in_progress))
                });

            in_progress.remove(&pair);
            equal
        }
        (Value::Callable(a), Value::Callable(b)) => a == b,
        (Value::Nil, Value::Nil) => true,
        _ => false,
    }
}

// Text form of a float: integral values drop the decimal point, and very
// small magnitudes use a two-digit exponent (`1e-07`).
fn format_float(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_finite() && n.fract() == 0.0 {
        return format!("{:.0}", n);
    }
    if n.is_finite() && n.abs() < 1e-4 {
        let scientific = format!("{:e}", n);
        if let Some((mantissa, exponent)) = scientific.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
            }
        }
        return scientific;
    }
    format!("{}", n)
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                // A list that (indirectly) contains itself is already
                // borrowed further up and prints as `[...]`.
                let Ok(items) = items.try_borrow_mut() else {
                    return write!(f, "[...]");
                };
                stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                    write!(f, "[")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", item)?;
                    }
                    write!(f, "]")
                })
            }
            Value::Callable(c) => write!(f, "{}", c),
            Value::Nil => write!(f, "nil"),
        }
    }
}

// Nested lists are torn down from a worklist instead of recursively, so
// dropping a deeply nested list never exhausts the host stack.
impl Drop for Value {
    fn drop(&mut self) {
        let Value::List(items) = self else {
            return;
        };
        if Rc::strong_count(items) != 1 {
            return;
        }
        let Ok(mut items) = items.try_borrow_mut() else {
            return;
        };

        let mut pending = std::mem::take(&mut *items);
        drop(items);

        while let Some(mut value) = pending.pop() {
            if let Value::List(inner) = &mut value {
                if Rc::strong_count(inner) == 1 {
                    if let Ok(mut inner) = inner.try_borrow_mut() {
                        pending.append(&mut inner);
                    }
                }
            }
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Value::String(s) = self {
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// I/O handed to a built-in for the duration of one call.
pub struct Console<'a> {
    pub input: &'a mut dyn BufRead,
    pub output: &'a mut dyn Write,
}

pub type NativeFn = Rc<dyn Fn(&mut Console<'_>, Vec<Value>, usize) -> Result<Value>>;

#[derive(Clone)]
pub enum Callable {
    Function(Rc<Function>),
    BuiltIn(Rc<BuiltIn>),
}

pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<[Stmt]>,
    pub closure: FrameId,
}

pub struct BuiltIn {
    pub name: String,
    pub arity: Arity,
    pub func: NativeFn,
}

/// Number of arguments a built-in accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::AtLeast(min) => count >= min,
        }
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
            Arity::AtLeast(min) => write!(f, "at least {}", min),
        }
    }
}

impl Display for Callable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function(function) => write!(f, "<func {}>", function.name),
            Callable::BuiltIn(builtin) => write!(f, "<builtin {}>", builtin.name),
        }
    }
}

impl Debug for Callable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callable::Function(a), Callable::Function(b)) => Rc::ptr_eq(a, b),
            (Callable::BuiltIn(a), Callable::BuiltIn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Outcome of executing a statement.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Normal,
    /// A `return` unwinding to the nearest call boundary.
    Return { value: Value, line: usize },
}

#[derive(Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }

    fn is_zero(self) -> bool {
        self.to_f64() == 0.0
    }

    pub(crate) fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }
    }
}

pub(crate) fn as_number(value: &Value, line: usize) -> Result<Number> {
    match value {
        Value::Integer(n) => Ok(Number::Int(*n)),
        Value::Float(n) => Ok(Number::Float(*n)),
        other => runtime_error(
            format!("Expected a number, got {}", other.type_name()),
            line,
        ),
    }
}

fn numeric_operands(
    operator: BinaryOp,
    left: &Value,
    right: &Value,
    line: usize,
) -> Result<(Number, Number)> {
    match (as_number(left, line), as_number(right, line)) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        _ => runtime_error(
            format!(
                "Operands of '{}' must be numbers, got {} and {}",
                operator,
                left.type_name(),
                right.type_name()
            ),
            line,
        ),
    }
}

fn integer_result(result: Option<i64>, line: usize) -> Result<Value> {
    match result {
        Some(n) => Ok(Value::Integer(n)),
        None => runtime_error("Integer overflow", line),
    }
}

// Modulo takes the sign of the divisor.
fn floor_mod_int(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn floor_mod_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

/// Resolves a possibly negative index against a sequence of length `len`.
pub(crate) fn resolve_index(index: i64, len: usize, line: usize) -> Result<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return runtime_error(
            format!("Index {} out of range for length {}", index, len),
            line,
        );
    }
    Ok(resolved as usize)
}

/// Tree-walking evaluator bound to one persistent [`Environment`].
///
/// The environment survives across [`exec`](Interpreter::exec) calls, so a
/// REPL session sees every binding made by earlier submissions. `print`
/// output goes to `W` and `input()` reads lines from `R`.
pub struct Interpreter<W = Stdout, R = BufReader<Stdin>> {
    env: Environment,
    out: W,
    input: R,
    call_depth: usize,
}

impl Interpreter<Stdout> {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl Default for Interpreter<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Interpreter<W> {
    pub fn with_output(out: W) -> Self {
        Self::with_io(out, BufReader::new(io::stdin()))
    }
}

impl<W: Write, R: BufRead> Interpreter<W, R> {
    pub fn with_io(out: W, input: R) -> Self {
        let mut env = Environment::new();
        stdlib::install(&mut env);

        Self {
            env,
            out,
            input,
            call_depth: 0,
        }
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Tokenizes, parses and runs `source` against the global frame.
    pub fn exec(&mut self, source: &str) -> Result<()> {
        let statements = parse_source(source)?;
        self.execute_program(&statements)
    }

    pub fn execute_program(&mut self, statements: &[Stmt]) -> Result<()> {
        let global = self.env.global();
        self.call_depth = 0;

        let result = self.execute_top_level(statements, global);
        self.out.flush()?;
        result
    }

    fn execute_top_level(&mut self, statements: &[Stmt], global: FrameId) -> Result<()> {
        for statement in statements {
            let flow = self.execute(statement, global);
            // Only the global frame is active here, so every live value sits
            // in the arena and unreachable closure frames can be freed.
            self.env.collect();

            if let Flow::Return { line, .. } = flow? {
                return runtime_error("'return' outside of function", line);
            }
        }
        debug!("executed {} statements", statements.len());
        Ok(())
    }

    fn execute_block(&mut self, statements: &[Stmt], frame: FrameId) -> Result<Flow> {
        for statement in statements {
            let flow = self.execute(statement, frame)?;
            if let Flow::Return { .. } = flow {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    // Runs a body in a fresh child frame, releasing it on every exit path.
    fn execute_scoped(&mut self, statements: &[Stmt], parent: FrameId) -> Result<Flow> {
        let frame = self.env.push_frame(parent);
        let flow = self.execute_block(statements, frame);
        self.env.pop_frame(frame);
        flow
    }

    pub fn execute(&mut self, statement: &Stmt, frame: FrameId) -> Result<Flow> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.execute_statement(statement, frame)
        })
    }

    fn execute_statement(&mut self, statement: &Stmt, frame: FrameId) -> Result<Flow> {
        match &statement.stmt_type {
            StmtType::Let { name, initializer } => {
                let value = self.evaluate(initializer, frame)?;
                self.env.assign_or_define(frame, name, value);
                Ok(Flow::Normal)
            }
            StmtType::Print(expr) => {
                let value = self.evaluate(expr, frame)?;
                writeln!(self.out, "{}", value)?;
                Ok(Flow::Normal)
            }
            StmtType::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr, frame)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return {
                    value,
                    line: statement.line,
                })
            }
            StmtType::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, frame)?.is_truthy() {
                    self.execute_scoped(then_branch, frame)
                } else if !else_branch.is_empty() {
                    self.execute_scoped(else_branch, frame)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtType::While { condition, body } => {
                while self.evaluate(condition, frame)?.is_truthy() {
                    let flow = self.execute_scoped(body, frame)?;
                    if let Flow::Return { .. } = flow {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtType::Function { name, params, body } => {
                self.env.capture(frame);
                let function = Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: Rc::clone(body),
                    closure: frame,
                };
                self.env.define(
                    frame,
                    name.as_str(),
                    Value::Callable(Callable::Function(Rc::new(function))),
                );
                Ok(Flow::Normal)
            }
            StmtType::Expression(expr) => {
                self.evaluate(expr, frame)?;
                Ok(Flow::Normal)
            }
        }
    }

    pub fn evaluate(&mut self, expr: &Expr, frame: FrameId) -> Result<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.evaluate_expression(expr, frame)
        })
    }

    fn evaluate_expression(&mut self, expr: &Expr, frame: FrameId) -> Result<Value> {
        match &expr.expr_type {
            ExprType::Literal(literal) => Ok(match literal {
                Literal::Integer(n) => Value::Integer(*n),
                Literal::Float(n) => Value::Float(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Nil => Value::Nil,
            }),
            ExprType::List(elements) => {
                let items = self.evaluate_all(elements, frame)?;
                Ok(Value::list(items))
            }
            ExprType::Variable(name) => self.lookup(name, frame, expr.line),
            ExprType::Unary { operator, right } => {
                let right_val = self.evaluate(right, frame)?;
                evaluate_unary(*operator, right_val, expr.line)
            }
            ExprType::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, *operator, right, frame, expr.line),
            ExprType::Call { callee, arguments } => {
                self.evaluate_call(callee, arguments, frame, expr.line)
            }
            ExprType::Index { collection, index } => {
                let collection_val = self.evaluate(collection, frame)?;
                let index_val = self.evaluate(index, frame)?;
                evaluate_index(&collection_val, &index_val, expr.line)
            }
        }
    }

    fn lookup(&self, name: &str, frame: FrameId, line: usize) -> Result<Value> {
        match self.env.get(frame, name) {
            Some(value) => Ok(value.clone()),
            None => runtime_error(format!("Undefined variable '{}'", name), line),
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr], frame: FrameId) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.evaluate(expr, frame)?);
        }
        Ok(values)
    }

    fn evaluate_binary(
        &mut self,
        left: &Expr,
        operator: BinaryOp,
        right: &Expr,
        frame: FrameId,
        line: usize,
    ) -> Result<Value> {
        let left_val = self.evaluate(left, frame)?;

        // The deciding operand is the result; the right side may never run.
        match operator {
            BinaryOp::And if !left_val.is_truthy() => return Ok(left_val),
            BinaryOp::Or if left_val.is_truthy() => return Ok(left_val),
            BinaryOp::And | BinaryOp::Or => return self.evaluate(right, frame),
            _ => {}
        }

        let right_val = self.evaluate(right, frame)?;
        evaluate_binary_values(operator, &left_val, &right_val, line)
    }

    fn evaluate_call(
        &mut self,
        callee: &str,
        arguments: &[Expr],
        frame: FrameId,
        line: usize,
    ) -> Result<Value> {
        let callable = match &self.lookup(callee, frame, line)? {
            Value::Callable(callable) => callable.clone(),
            _ => return runtime_error(format!("'{}' is not a function", callee), line),
        };

        match callable {
            Callable::BuiltIn(builtin) => {
                // Arguments run first, so their own errors win over a count mismatch.
                let args = self.evaluate_all(arguments, frame)?;
                if !builtin.arity.accepts(args.len()) {
                    return runtime_error(
                        format!(
                            "'{}' expects {} argument(s), got {}",
                            builtin.name,
                            builtin.arity,
                            args.len()
                        ),
                        line,
                    );
                }

                let mut console = Console {
                    input: &mut self.input,
                    output: &mut self.out,
                };
                (builtin.func)(&mut console, args, line)
            }
            Callable::Function(function) => {
                if function.params.len() != arguments.len() {
                    return runtime_error(
                        format!(
                            "'{}' expects {} argument(s), got {}",
                            function.name,
                            function.params.len(),
                            arguments.len()
                        ),
                        line,
                    );
                }

                let args = self.evaluate_all(arguments, frame)?;
                self.call_function(&function, args, line)
            }
        }
    }

    fn call_function(&mut self, function: &Function, args: Vec<Value>, line: usize) -> Result<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return runtime_error(
                format!("Maximum recursion depth exceeded ({})", MAX_CALL_DEPTH),
                line,
            );
        }

        trace!("call {} from line {}", function.name, line);

        // Lexical scoping: the call frame hangs off the defining frame.
        let call_frame = self.env.push_frame(function.closure);
        for (param, arg) in function.params.iter().zip(args) {
            self.env.define(call_frame, param.as_str(), arg);
        }

        self.call_depth += 1;
        let flow = self.execute_block(&function.body, call_frame);
        self.call_depth -= 1;
        self.env.pop_frame(call_frame);

        match flow? {
            Flow::Return { value, .. } => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

fn evaluate_unary(operator: UnaryOp, right: Value, line: usize) -> Result<Value> {
    match operator {
        UnaryOp::Negate => match right {
            Value::Integer(n) => integer_result(n.checked_neg(), line),
            Value::Float(n) => Ok(Value::Float(-n)),
            other => runtime_error(
                format!("Unary '-' requires a number, got {}", other.type_name()),
                line,
            ),
        },
        UnaryOp::Not => Ok(Value::Boolean(!right.is_truthy())),
    }
}

fn evaluate_binary_values(
    operator: BinaryOp,
    left: &Value,
    right: &Value,
    line: usize,
) -> Result<Value> {
    match operator {
        BinaryOp::Add => {
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                return Ok(Value::String(format!("{}{}", left, right)));
            }
            match numeric_operands(operator, left, right, line)? {
                (Number::Int(a), Number::Int(b)) => integer_result(a.checked_add(b), line),
                (a, b) => Ok(Value::Float(a.to_f64() + b.to_f64())),
            }
        }
        BinaryOp::Subtract => match numeric_operands(operator, left, right, line)? {
            (Number::Int(a), Number::Int(b)) => integer_result(a.checked_sub(b), line),
            (a, b) => Ok(Value::Float(a.to_f64() - b.to_f64())),
        },
        BinaryOp::Multiply => match numeric_operands(operator, left, right, line)? {
            (Number::Int(a), Number::Int(b)) => integer_result(a.checked_mul(b), line),
            (a, b) => Ok(Value::Float(a.to_f64() * b.to_f64())),
        },
        BinaryOp::Divide => {
            let (a, b) = numeric_operands(operator, left, right, line)?;
            if b.is_zero() {
                return runtime_error("Division by zero", line);
            }
            Ok(Value::Float(a.to_f64() / b.to_f64()))
        }
        BinaryOp::Modulo => match numeric_operands(operator, left, right, line)? {
            (_, b) if b.is_zero() => runtime_error("Modulo by zero", line),
            (Number::Int(a), Number::Int(b)) => Ok(Value::Integer(floor_mod_int(a, b))),
            (a, b) => Ok(Value::Float(floor_mod_float(a.to_f64(), b.to_f64()))),
        },
        BinaryOp::Equal => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let (a, b) = numeric_operands(operator, left, right, line)?;
            let ordering = a.compare(b);
            let result = match operator {
                BinaryOp::Less => ordering == Some(Ordering::Less),
                BinaryOp::LessEqual => {
                    matches!(ordering, Some(Ordering::Less | Ordering::Equal))
                }
                BinaryOp::Greater => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            };
            Ok(Value::Boolean(result))
        }
        BinaryOp::And | BinaryOp::Or => {
            // Short-circuit operators are resolved before both sides are evaluated.
            runtime_error(format!("Operator '{}' cannot be applied here", operator), line)
        }
    }
}

fn evaluate_index(collection: &Value, index: &Value, line: usize) -> Result<Value> {
    let position = match index {
        Value::Integer(n) => *n,
        other => {
            return runtime_error(
                format!("Indices must be integers, got {}", other.type_name()),
                line,
            )
        }
    };

    match collection {
        Value::List(items) => {
            let items = items.borrow();
            let i = resolve_index(position, items.len(), line)?;
            Ok(items[i].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = resolve_index(position, chars.len(), line)?;
            Ok(Value::String(chars[i].to_string()))
        }
        other => runtime_error(format!("Cannot index into {}", other.type_name()), line),
    }
}
