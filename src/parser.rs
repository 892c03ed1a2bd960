use crate::{
    error::{parser_error, Result},
    tokenizer::{Token, TokenType},
    STACK_GROWTH, STACK_RED_ZONE,
};
use log::debug;
use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub expr_type: ExprType,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprType {
    Literal(Literal),
    List(Vec<Expr>),
    Variable(String),
    Unary {
        operator: UnaryOp,
        right: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },
    Call {
        callee: String,
        arguments: Vec<Expr>,
    },
    Index {
        collection: Box<Expr>,
        index: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub stmt_type: StmtType,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtType {
    Let {
        name: String,
        initializer: Expr,
    },
    Print(Expr),
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Function {
        name: String,
        params: Vec<String>,
        body: Rc<[Stmt]>,
    },
    Expression(Expr),
}

/// Parses a complete token stream into the top-level statement list.
///
/// The slice must be terminated by an `EOF` token, as produced by
/// [`tokenize`](crate::tokenizer::tokenize). Parsing stops at the first
/// grammar violation.
pub fn parse(tokens: &[Token]) -> Result<Vec<Stmt>> {
    assert!(
        tokens
            .last()
            .map_or(false, |t| t.token_type == TokenType::EOF),
        "Token slice must be terminated by EOF"
    );

    let (statements, consumed) = parse_body(tokens, &[])?;
    assert_eq!(
        tokens[consumed].token_type,
        TokenType::EOF,
        "Failed to consume all tokens"
    );

    debug!("parsed {} top-level statements", statements.len());
    Ok(statements)
}

// Parse statements until one of `terminators` (left unconsumed) or EOF.
fn parse_body(tokens: &[Token], terminators: &[TokenType]) -> Result<(Vec<Stmt>, usize)> {
    let mut consumed = skip_newlines(tokens, 0);
    let mut statements = Vec::new();

    while tokens[consumed].token_type != TokenType::EOF
        && !terminators.contains(&tokens[consumed].token_type)
    {
        let (statement, statement_consumed) = parse_statement(&tokens[consumed..])?;
        statements.push(statement);
        consumed += statement_consumed;
        consumed = skip_newlines(tokens, consumed);
    }

    Ok((statements, consumed))
}

fn skip_newlines(tokens: &[Token], mut consumed: usize) -> usize {
    while tokens[consumed].token_type == TokenType::NewLine {
        consumed += 1;
    }
    consumed
}

// Every statement ends in a newline or at end of input.
fn expect_newline(tokens: &[Token], consumed: usize) -> Result<usize> {
    match tokens[consumed].token_type {
        TokenType::EOF => Ok(consumed),
        TokenType::NewLine => Ok(skip_newlines(tokens, consumed)),
        _ => parser_error("Expected newline after statement", &tokens[consumed]),
    }
}

fn expect(tokens: &[Token], consumed: usize, expected: TokenType, message: &str) -> Result<usize> {
    if tokens[consumed].token_type == expected {
        Ok(consumed + 1)
    } else {
        parser_error(message, &tokens[consumed])
    }
}

fn expect_identifier(tokens: &[Token], consumed: usize, message: &str) -> Result<String> {
    match &tokens[consumed].token_type {
        TokenType::Identifier(name) => Ok(name.clone()),
        _ => parser_error(message, &tokens[consumed]),
    }
}

fn parse_statement(tokens: &[Token]) -> Result<(Stmt, usize)> {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || parse_statement_inner(tokens))
}

fn parse_statement_inner(tokens: &[Token]) -> Result<(Stmt, usize)> {
    match tokens[0].token_type {
        TokenType::Let => parse_let(tokens),
        TokenType::Print => parse_print(tokens),
        TokenType::Return => parse_return(tokens),
        TokenType::If => parse_if(tokens),
        TokenType::While => parse_while(tokens),
        TokenType::Func => parse_function(tokens),
        _ => {
            let (expr, consumed) = parse_expression(tokens)?;
            let consumed = expect_newline(tokens, consumed)?;
            let line = expr.line;
            Ok((
                Stmt {
                    stmt_type: StmtType::Expression(expr),
                    line,
                },
                consumed,
            ))
        }
    }
}

fn parse_let(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'let'

    let name = expect_identifier(tokens, consumed, "Expected identifier after 'let'")?;
    consumed += 1;

    consumed = expect(
        tokens,
        consumed,
        TokenType::Equal,
        "Expected '=' after identifier in let",
    )?;

    let (initializer, init_consumed) = parse_expression(&tokens[consumed..])?;
    consumed += init_consumed;
    consumed = expect_newline(tokens, consumed)?;

    Ok((
        Stmt {
            stmt_type: StmtType::Let { name, initializer },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_print(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let (value, value_consumed) = parse_expression(&tokens[1..])?;
    let consumed = expect_newline(tokens, value_consumed + 1)?;

    Ok((
        Stmt {
            stmt_type: StmtType::Print(value),
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_return(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'return'

    let value = match tokens[consumed].token_type {
        TokenType::NewLine | TokenType::EOF => None,
        _ => {
            let (value, value_consumed) = parse_expression(&tokens[consumed..])?;
            consumed += value_consumed;
            Some(value)
        }
    };
    consumed = expect_newline(tokens, consumed)?;

    Ok((
        Stmt {
            stmt_type: StmtType::Return(value),
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_if(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'if'

    let (condition, cond_consumed) = parse_expression(&tokens[consumed..])?;
    consumed += cond_consumed;

    consumed = expect(
        tokens,
        consumed,
        TokenType::Then,
        "Expected 'then' after if condition",
    )?;
    consumed = expect_block_header_end(tokens, consumed)?;

    let (then_branch, then_consumed) =
        parse_body(&tokens[consumed..], &[TokenType::Else, TokenType::End])?;
    consumed += then_consumed;

    let mut else_branch = Vec::new();
    if tokens[consumed].token_type == TokenType::Else {
        consumed = expect_block_header_end(tokens, consumed + 1)?;

        let (body, else_consumed) = parse_body(&tokens[consumed..], &[TokenType::End])?;
        else_branch = body;
        consumed += else_consumed;
    }

    consumed = expect(
        tokens,
        consumed,
        TokenType::End,
        "Expected 'end' to close if block",
    )?;
    consumed = expect_newline(tokens, consumed)?;

    Ok((
        Stmt {
            stmt_type: StmtType::If {
                condition,
                then_branch,
                else_branch,
            },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_while(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'while'

    let (condition, cond_consumed) = parse_expression(&tokens[consumed..])?;
    consumed += cond_consumed;

    consumed = expect(
        tokens,
        consumed,
        TokenType::Do,
        "Expected 'do' after while condition",
    )?;
    consumed = expect_block_header_end(tokens, consumed)?;

    let (body, body_consumed) = parse_body(&tokens[consumed..], &[TokenType::End])?;
    consumed += body_consumed;

    consumed = expect(
        tokens,
        consumed,
        TokenType::End,
        "Expected 'end' to close while block",
    )?;
    consumed = expect_newline(tokens, consumed)?;

    Ok((
        Stmt {
            stmt_type: StmtType::While { condition, body },
            line: tokens[0].line,
        },
        consumed,
    ))
}

fn parse_function(tokens: &[Token]) -> Result<(Stmt, usize)> {
    let mut consumed = 1; // Skip 'func'

    let name = expect_identifier(tokens, consumed, "Expected function name after 'func'")?;
    consumed += 1;

    consumed = expect(
        tokens,
        consumed,
        TokenType::LeftParen,
        "Expected '(' after function name",
    )?;

    let mut params: Vec<String> = Vec::new();
    if tokens[consumed].token_type != TokenType::RightParen {
        loop {
            let param = expect_identifier(tokens, consumed, "Expected parameter name")?;
            if params.contains(&param) {
                return parser_error(
                    format!("Duplicate parameter '{}' in function '{}'", param, name),
                    &tokens[consumed],
                );
            }
            params.push(param);
            consumed += 1;

            if tokens[consumed].token_type != TokenType::Comma {
                break;
            }
            consumed += 1;
        }
    }

    consumed = expect(
        tokens,
        consumed,
        TokenType::RightParen,
        "Expected ')' after parameters",
    )?;
    consumed = expect_block_header_end(tokens, consumed)?;

    let (body, body_consumed) = parse_body(&tokens[consumed..], &[TokenType::End])?;
    consumed += body_consumed;

    consumed = expect(
        tokens,
        consumed,
        TokenType::End,
        "Expected 'end' to close function body",
    )?;
    consumed = expect_newline(tokens, consumed)?;

    Ok((
        Stmt {
            stmt_type: StmtType::Function {
                name,
                params,
                body: body.into(),
            },
            line: tokens[0].line,
        },
        consumed,
    ))
}

// Block headers must be followed by a line break before the body starts.
fn expect_block_header_end(tokens: &[Token], consumed: usize) -> Result<usize> {
    if tokens[consumed].token_type != TokenType::NewLine {
        return parser_error("Expected newline after block header", &tokens[consumed]);
    }
    Ok(skip_newlines(tokens, consumed))
}

fn parse_expression(tokens: &[Token]) -> Result<(Expr, usize)> {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || parse_or(tokens))
}

fn binary(left: Expr, operator: BinaryOp, right: Expr, line: usize) -> Expr {
    Expr {
        expr_type: ExprType::Binary {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        },
        line,
    }
}

fn parse_or(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (mut left, mut consumed) = parse_and(tokens)?;

    while tokens[consumed].token_type == TokenType::Or {
        let line = tokens[consumed].line;
        let (right, right_consumed) = parse_and(&tokens[consumed + 1..])?;
        left = binary(left, BinaryOp::Or, right, line);
        consumed += right_consumed + 1;
    }

    Ok((left, consumed))
}

fn parse_and(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (mut left, mut consumed) = parse_not(tokens)?;

    while tokens[consumed].token_type == TokenType::And {
        let line = tokens[consumed].line;
        let (right, right_consumed) = parse_not(&tokens[consumed + 1..])?;
        left = binary(left, BinaryOp::And, right, line);
        consumed += right_consumed + 1;
    }

    Ok((left, consumed))
}

fn parse_not(tokens: &[Token]) -> Result<(Expr, usize)> {
    if tokens[0].token_type == TokenType::Not {
        let (right, right_consumed) = parse_not(&tokens[1..])?;
        return Ok((
            Expr {
                expr_type: ExprType::Unary {
                    operator: UnaryOp::Not,
                    right: Box::new(right),
                },
                line: tokens[0].line,
            },
            right_consumed + 1,
        ));
    }

    parse_comparison(tokens)
}

// Comparison does not chain: at most one operator is taken here.
fn parse_comparison(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (left, consumed) = parse_additive(tokens)?;

    let operator = match tokens[consumed].token_type {
        TokenType::EqualEqual => BinaryOp::Equal,
        TokenType::BangEqual => BinaryOp::NotEqual,
        TokenType::Less => BinaryOp::Less,
        TokenType::LessEqual => BinaryOp::LessEqual,
        TokenType::Greater => BinaryOp::Greater,
        TokenType::GreaterEqual => BinaryOp::GreaterEqual,
        _ => return Ok((left, consumed)),
    };

    let line = tokens[consumed].line;
    let (right, right_consumed) = parse_additive(&tokens[consumed + 1..])?;

    Ok((
        binary(left, operator, right, line),
        consumed + right_consumed + 1,
    ))
}

fn parse_additive(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (mut left, mut consumed) = parse_multiplicative(tokens)?;

    loop {
        let operator = match tokens[consumed].token_type {
            TokenType::Plus => BinaryOp::Add,
            TokenType::Minus => BinaryOp::Subtract,
            _ => break,
        };

        let line = tokens[consumed].line;
        let (right, right_consumed) = parse_multiplicative(&tokens[consumed + 1..])?;
        left = binary(left, operator, right, line);
        consumed += right_consumed + 1;
    }

    Ok((left, consumed))
}

fn parse_multiplicative(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (mut left, mut consumed) = parse_unary(tokens)?;

    loop {
        let operator = match tokens[consumed].token_type {
            TokenType::Star => BinaryOp::Multiply,
            TokenType::Slash => BinaryOp::Divide,
            TokenType::Percent => BinaryOp::Modulo,
            _ => break,
        };

        let line = tokens[consumed].line;
        let (right, right_consumed) = parse_unary(&tokens[consumed + 1..])?;
        left = binary(left, operator, right, line);
        consumed += right_consumed + 1;
    }

    Ok((left, consumed))
}

fn parse_unary(tokens: &[Token]) -> Result<(Expr, usize)> {
    if tokens[0].token_type == TokenType::Minus {
        let (right, right_consumed) = parse_unary(&tokens[1..])?;
        return Ok((
            Expr {
                expr_type: ExprType::Unary {
                    operator: UnaryOp::Negate,
                    right: Box::new(right),
                },
                line: tokens[0].line,
            },
            right_consumed + 1,
        ));
    }

    parse_call(tokens)
}

fn parse_call(tokens: &[Token]) -> Result<(Expr, usize)> {
    let (mut expr, mut consumed) = match &tokens[0].token_type {
        // Only a bare identifier can be called.
        TokenType::Identifier(name) if tokens[1].token_type == TokenType::LeftParen => {
            let (arguments, args_consumed) =
                parse_arguments(&tokens[1..], TokenType::RightParen, "arguments")?;
            (
                Expr {
                    expr_type: ExprType::Call {
                        callee: name.clone(),
                        arguments,
                    },
                    line: tokens[0].line,
                },
                args_consumed + 1,
            )
        }
        _ => parse_primary(tokens)?,
    };

    while tokens[consumed].token_type == TokenType::LeftSquare {
        let line = tokens[consumed].line;
        consumed += 1;

        let (index, index_consumed) = parse_expression(&tokens[consumed..])?;
        consumed += index_consumed;

        consumed = expect(
            tokens,
            consumed,
            TokenType::RightSquare,
            "Expected ']' after index",
        )?;

        expr = Expr {
            expr_type: ExprType::Index {
                collection: Box::new(expr),
                index: Box::new(index),
            },
            line,
        };
    }

    Ok((expr, consumed))
}

// Parses `( a, b, c )` or `[ a, b, c ]` starting at the opening delimiter.
fn parse_arguments(
    tokens: &[Token],
    closing: TokenType,
    what: &str,
) -> Result<(Vec<Expr>, usize)> {
    let mut consumed = 1; // Skip the opening delimiter
    let mut arguments = Vec::new();

    if tokens[consumed].token_type != closing {
        loop {
            let (argument, argument_consumed) = parse_expression(&tokens[consumed..])?;
            arguments.push(argument);
            consumed += argument_consumed;

            if tokens[consumed].token_type != TokenType::Comma {
                break;
            }
            consumed += 1;
        }
    }

    let message = format!("Expected '{}' after {}", closing, what);
    consumed = expect(tokens, consumed, closing, &message)?;

    Ok((arguments, consumed))
}

fn parse_primary(tokens: &[Token]) -> Result<(Expr, usize)> {
    let line = tokens[0].line;
    let literal = |literal: Literal| -> Result<(Expr, usize)> {
        Ok((
            Expr {
                expr_type: ExprType::Literal(literal),
                line,
            },
            1,
        ))
    };

    match &tokens[0].token_type {
        TokenType::Integer(n) => literal(Literal::Integer(*n)),
        TokenType::Float(n) => literal(Literal::Float(*n)),
        TokenType::String(s) => literal(Literal::String(s.clone())),
        TokenType::True => literal(Literal::Boolean(true)),
        TokenType::False => literal(Literal::Boolean(false)),
        TokenType::Nil => literal(Literal::Nil),
        TokenType::Identifier(name) => Ok((
            Expr {
                expr_type: ExprType::Variable(name.clone()),
                line,
            },
            1,
        )),
        TokenType::LeftParen => {
            let mut consumed = 1; // Skip '('

            let (expr, expr_consumed) = parse_expression(&tokens[consumed..])?;
            consumed += expr_consumed;

            consumed = expect(
                tokens,
                consumed,
                TokenType::RightParen,
                "Expected ')' after expression",
            )?;

            Ok((expr, consumed))
        }
        TokenType::LeftSquare => {
            let (elements, consumed) =
                parse_arguments(tokens, TokenType::RightSquare, "list elements")?;
            Ok((
                Expr {
                    expr_type: ExprType::List(elements),
                    line,
                },
                consumed,
            ))
        }
        _ => parser_error("Expected expression", &tokens[0]),
    }
}
