//! Recursive-descent parser for Vesper.
//!
//! Statements are parsed by a straightforward dispatch on the leading token;
//! expressions use a precedence ladder (lowest to highest binding):
//! `await` → ternary → `or` → `and` → equality → comparison → additive →
//! multiplicative → unary → `^` (right-associative) → postfix → primary.
//!
//! `await` is recognized only at full-expression entry positions, so it is
//! always the outermost operator of the expression it appears in. That
//! property is what lets a suspended statement be re-entered safely: the
//! only work skipped on re-execution is the await itself.

use std::{mem, rc::Rc};

use crate::{
    expressions::{
        AccessSeg, AssignTarget, BinaryOp, Block, BoolOp, CatchClause, CmpOp, Expr, ExprLoc, FunctionDef, FunctionId,
        Literal, Param, Program, Stmt, TemplatePart, UnaryOp,
    },
    token::{CodeLoc, CodeRange, Lexer, ParseError, StringSegment, Token, TokenKind},
};

/// Maximum expression nesting depth, guarding against stack overflow from
/// pathological inputs like `((((((x))))))`.
const MAX_NESTING_DEPTH: u32 = 200;

/// Parses a complete source file into a program.
///
/// The top-level statements become the body of a synthesized `<main>`
/// function which is implicitly asynchronous (top-level `await` is legal and
/// the program runs as the main coroutine of the event loop).
pub(crate) fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).lex()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        functions: Vec::new(),
        fn_stack: vec![FnCtx {
            is_async: true,
            loop_depth: 0,
        }],
        depth: 0,
    };
    let body = parser.parse_statements(&TokenKind::Eof)?;
    let main = FunctionId::new(parser.functions.len());
    parser.functions.push(Rc::new(FunctionDef {
        name: "<main>".to_owned(),
        params: Vec::new(),
        body,
        is_async: true,
        is_method: false,
        range: CodeRange::at(CodeLoc::start()),
    }));
    Ok(Program {
        functions: parser.functions,
        main,
    })
}

struct FnCtx {
    is_async: bool,
    loop_depth: u32,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    functions: Vec<Rc<FunctionDef>>,
    fn_stack: Vec<FnCtx>,
    depth: u32,
}

impl Parser {
    // === statements ===

    fn parse_statements(&mut self, terminator: &TokenKind) -> Result<Block, ParseError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek_is(terminator) || self.peek_is(&TokenKind::Eof) {
                return Ok(stmts);
            }
            stmts.push(self.parse_statement()?);
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let stmts = self.parse_statements(&TokenKind::RBrace)?;
        self.expect(&TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            TokenKind::Let => {
                self.bump();
                let (name, _) = self.expect_ident()?;
                self.expect(&TokenKind::Assign)?;
                let value = self.parse_expr_entry()?;
                self.end_of_statement()?;
                Ok(Stmt::Let { name, value })
            }
            TokenKind::Show => {
                self.bump();
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expr_entry()?;
                self.end_of_statement()?;
                Ok(Stmt::Show { value })
            }
            TokenKind::Funct => {
                self.bump();
                self.parse_funct_decl(false)
            }
            TokenKind::Async => {
                self.bump();
                self.expect(&TokenKind::Funct)?;
                self.parse_funct_decl(true)
            }
            TokenKind::Blueprint => self.parse_blueprint(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.bump();
                let cond = self.parse_expr_entry()?;
                self.enter_loop();
                let body = self.parse_block();
                self.exit_loop();
                Ok(Stmt::While { cond, body: body? })
            }
            TokenKind::For => {
                self.bump();
                let (var, _) = self.expect_ident()?;
                self.expect(&TokenKind::In)?;
                let iter = self.parse_expr_entry()?;
                self.enter_loop();
                let body = self.parse_block();
                self.exit_loop();
                Ok(Stmt::For { var, iter, body: body? })
            }
            TokenKind::Break => {
                let range = self.bump().range;
                if !self.in_loop() {
                    return Err(ParseError::new("`break` outside of a loop", range.start));
                }
                self.end_of_statement()?;
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                let range = self.bump().range;
                if !self.in_loop() {
                    return Err(ParseError::new("`continue` outside of a loop", range.start));
                }
                self.end_of_statement()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Return => {
                let range = self.bump().range;
                let value = if self.peek_ends_statement() {
                    None
                } else {
                    Some(self.parse_expr_entry()?)
                };
                self.end_of_statement()?;
                Ok(Stmt::Return { value, range })
            }
            TokenKind::Try => self.parse_try(),
            TokenKind::Raise => {
                let range = self.bump().range;
                let value = self.parse_expr_entry()?;
                self.end_of_statement()?;
                Ok(Stmt::Raise { value, range })
            }
            _ => {
                let expr = self.parse_expr_entry()?;
                if self.peek_is(&TokenKind::Assign) {
                    self.bump();
                    let target = expr_to_target(expr)?;
                    let value = self.parse_expr_entry()?;
                    self.end_of_statement()?;
                    Ok(Stmt::Assign { target, value })
                } else {
                    self.end_of_statement()?;
                    Ok(Stmt::Expr(expr))
                }
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_expr_entry()?;
        let then_block = self.parse_block()?;
        let else_block = if self.peek_is(&TokenKind::Else) {
            self.bump();
            if self.peek_is(&TokenKind::If) {
                // `else if` chains become a nested If in the else block
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let try_tok = self.expect(&TokenKind::Try)?;
        let try_loc = try_tok.range.start;
        let body = self.parse_block()?;
        let catch = if self.peek_is(&TokenKind::Catch) {
            self.bump();
            self.expect(&TokenKind::LParen)?;
            let (var, _) = self.expect_ident()?;
            self.expect(&TokenKind::RParen)?;
            let body = self.parse_block()?;
            Some(CatchClause { var, body })
        } else {
            None
        };
        let finally = if self.peek_is(&TokenKind::Finally) {
            self.bump();
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(ParseError::new("`try` requires a `catch` or `finally` block", try_loc));
        }
        Ok(Stmt::Try { body, catch, finally })
    }

    /// Parses `funct name(params) { ... }` after the keyword(s); registers the
    /// definition and returns the declaration statement.
    fn parse_funct_decl(&mut self, is_async: bool) -> Result<Stmt, ParseError> {
        let func = self.parse_funct_def(is_async, false)?;
        let name = self.functions[func.index()].name.clone();
        Ok(Stmt::FunctionDecl { name, func })
    }

    fn parse_funct_def(&mut self, is_async: bool, is_method: bool) -> Result<FunctionId, ParseError> {
        let (name, name_range) = self.expect_ident()?;
        if is_method && name == "init" && is_async {
            return Err(ParseError::new("`init` may not be declared async", name_range.start));
        }
        self.expect(&TokenKind::LParen)?;
        let params = self.parse_params()?;
        if is_method && params.is_empty() {
            return Err(ParseError::new(
                format!("method `{name}` must declare a receiver parameter"),
                name_range.start,
            ));
        }
        self.fn_stack.push(FnCtx {
            is_async,
            loop_depth: 0,
        });
        let body = self.parse_block();
        self.fn_stack.pop();
        let id = FunctionId::new(self.functions.len());
        self.functions.push(Rc::new(FunctionDef {
            name,
            params,
            body: body?,
            is_async,
            is_method,
            range: name_range,
        }));
        Ok(id)
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params: Vec<Param> = Vec::new();
        self.skip_newlines();
        while !self.peek_is(&TokenKind::RParen) {
            let (name, range) = self.expect_ident()?;
            if params.iter().any(|p| p.name == name) {
                return Err(ParseError::new(format!("duplicate parameter `{name}`"), range.start));
            }
            let default = if self.peek_is(&TokenKind::Assign) {
                self.bump();
                Some(self.parse_ternary()?)
            } else {
                if params.last().is_some_and(|p| p.default.is_some()) {
                    return Err(ParseError::new(
                        format!("parameter `{name}` without a default follows one with a default"),
                        range.start,
                    ));
                }
                None
            };
            params.push(Param { name, default });
            self.skip_newlines();
            if !self.peek_is(&TokenKind::RParen) {
                self.expect(&TokenKind::Comma)?;
                self.skip_newlines();
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_blueprint(&mut self) -> Result<Stmt, ParseError> {
        let kw = self.expect(&TokenKind::Blueprint)?;
        let (name, _) = self.expect_ident()?;
        let parent = if self.peek_is(&TokenKind::Inherits) {
            self.bump();
            let (parent_name, parent_range) = self.expect_ident()?;
            Some((parent_name, parent_range))
        } else {
            None
        };
        self.expect(&TokenKind::LBrace)?;
        let mut attrs = Vec::new();
        let mut methods: Vec<(String, FunctionId)> = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::RBrace => break,
                TokenKind::Let => {
                    self.bump();
                    let (attr_name, _) = self.expect_ident()?;
                    self.expect(&TokenKind::Assign)?;
                    let value = self.parse_ternary()?;
                    self.end_of_statement()?;
                    attrs.push((attr_name, value));
                }
                TokenKind::Funct => {
                    self.bump();
                    let func = self.parse_funct_def(false, true)?;
                    methods.push((self.functions[func.index()].name.clone(), func));
                }
                TokenKind::Async => {
                    self.bump();
                    self.expect(&TokenKind::Funct)?;
                    let func = self.parse_funct_def(true, true)?;
                    methods.push((self.functions[func.index()].name.clone(), func));
                }
                other => {
                    return Err(ParseError::new(
                        format!(
                            "expected a method or `let` attribute in blueprint body, found {}",
                            other.describe()
                        ),
                        self.peek_loc(),
                    ));
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Stmt::BlueprintDecl {
            name,
            parent,
            attrs,
            methods,
            range: kw.range,
        })
    }

    // === expressions ===

    /// Full-expression entry point: the only place `await` is recognized.
    fn parse_expr_entry(&mut self) -> Result<ExprLoc, ParseError> {
        if self.peek_is(&TokenKind::Await) {
            let kw = self.bump();
            if !self.fn_stack.last().is_some_and(|ctx| ctx.is_async) {
                return Err(ParseError::new(
                    "`await` is only allowed inside async functions",
                    kw.range.start,
                ));
            }
            let target = self.parse_ternary()?;
            let range = kw.range.to(target.range);
            return Ok(ExprLoc {
                expr: Expr::Await {
                    target: Box::new(target),
                },
                range,
            });
        }
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<ExprLoc, ParseError> {
        self.enter_depth()?;
        let cond = self.parse_or()?;
        let result = if self.peek_is(&TokenKind::Question) {
            self.bump();
            let then = self.parse_ternary()?;
            self.expect(&TokenKind::Colon)?;
            let otherwise = self.parse_ternary()?;
            let range = cond.range.to(otherwise.range);
            ExprLoc {
                expr: Expr::Ternary {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                range,
            }
        } else {
            cond
        };
        self.exit_depth();
        Ok(result)
    }

    fn parse_or(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek_is(&TokenKind::Or) {
            self.bump();
            let right = self.parse_and()?;
            let range = left.range.to(right.range);
            left = ExprLoc {
                expr: Expr::Bool {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                range,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_equality()?;
        while self.peek_is(&TokenKind::And) {
            self.bump();
            let right = self.parse_equality()?;
            let range = left.range.to(right.range);
            left = ExprLoc {
                expr: Expr::Bool {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                range,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_comparison()?;
            let range = left.range.to(right.range);
            left = ExprLoc {
                expr: Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                range,
            };
        }
    }

    fn parse_comparison(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Le => CmpOp::Le,
                TokenKind::Ge => CmpOp::Ge,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_additive()?;
            let range = left.range.to(right.range);
            left = ExprLoc {
                expr: Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                range,
            };
        }
    }

    fn parse_additive(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            let range = left.range.to(right.range);
            left = ExprLoc {
                expr: Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                range,
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            let range = left.range.to(right.range);
            left = ExprLoc {
                expr: Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                range,
            };
        }
    }

    fn parse_unary(&mut self) -> Result<ExprLoc, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        let tok = self.bump();
        self.enter_depth()?;
        let operand = self.parse_unary()?;
        self.exit_depth();
        let range = tok.range.to(operand.range);
        Ok(ExprLoc {
            expr: Expr::Unary {
                op,
                operand: Box::new(operand),
            },
            range,
        })
    }

    fn parse_power(&mut self) -> Result<ExprLoc, ParseError> {
        let base = self.parse_postfix()?;
        if self.peek_is(&TokenKind::Caret) {
            self.bump();
            // right-associative, and the exponent may carry a unary minus
            let exponent = self.parse_unary()?;
            let range = base.range.to(exponent.range);
            return Ok(ExprLoc {
                expr: Expr::Binary {
                    op: BinaryOp::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                range,
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<ExprLoc, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LBracket => {
                    self.bump();
                    self.skip_newlines();
                    let index = self.parse_ternary()?;
                    self.skip_newlines();
                    let close = self.expect(&TokenKind::RBracket)?;
                    let range = expr.range.to(close.range);
                    expr = ExprLoc {
                        expr: Expr::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        range,
                    };
                }
                TokenKind::Dot => {
                    self.bump();
                    let (attr, attr_range) = self.expect_ident()?;
                    let range = expr.range.to(attr_range);
                    expr = ExprLoc {
                        expr: Expr::Attr {
                            base: Box::new(expr),
                            attr,
                        },
                        range,
                    };
                }
                TokenKind::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    self.skip_newlines();
                    while !self.peek_is(&TokenKind::RParen) {
                        args.push(self.parse_ternary()?);
                        self.skip_newlines();
                        if !self.peek_is(&TokenKind::RParen) {
                            self.expect(&TokenKind::Comma)?;
                            self.skip_newlines();
                        }
                    }
                    let close = self.expect(&TokenKind::RParen)?;
                    let range = expr.range.to(close.range);
                    expr = ExprLoc {
                        expr: Expr::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        range,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<ExprLoc, ParseError> {
        self.enter_depth()?;
        let result = self.parse_primary_inner();
        self.exit_depth();
        result
    }

    fn parse_primary_inner(&mut self) -> Result<ExprLoc, ParseError> {
        let token = self.bump();
        let range = token.range;
        let expr = match token.kind {
            TokenKind::Int(v) => Expr::Literal(Literal::Int(v)),
            TokenKind::Float(v) => Expr::Literal(Literal::Float(v)),
            TokenKind::True => Expr::Literal(Literal::Bool(true)),
            TokenKind::False => Expr::Literal(Literal::Bool(false)),
            TokenKind::Null => Expr::Literal(Literal::Null),
            TokenKind::Ident(name) => Expr::Name(name),
            TokenKind::SuperKw => Expr::Super,
            TokenKind::Str(segments) => return self.build_string(segments, range),
            TokenKind::LParen => return self.parse_paren_or_tuple(range),
            TokenKind::LBracket => {
                let mut elements = Vec::new();
                self.skip_newlines();
                while !self.peek_is(&TokenKind::RBracket) {
                    elements.push(self.parse_ternary()?);
                    self.skip_newlines();
                    if !self.peek_is(&TokenKind::RBracket) {
                        self.expect(&TokenKind::Comma)?;
                        self.skip_newlines();
                    }
                }
                let close = self.expect(&TokenKind::RBracket)?;
                return Ok(ExprLoc {
                    expr: Expr::Array(elements),
                    range: range.to(close.range),
                });
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                self.skip_newlines();
                while !self.peek_is(&TokenKind::RBrace) {
                    let key = self.parse_ternary()?;
                    self.expect(&TokenKind::Colon)?;
                    self.skip_newlines();
                    let value = self.parse_ternary()?;
                    entries.push((key, value));
                    self.skip_newlines();
                    if !self.peek_is(&TokenKind::RBrace) {
                        self.expect(&TokenKind::Comma)?;
                        self.skip_newlines();
                    }
                }
                let close = self.expect(&TokenKind::RBrace)?;
                return Ok(ExprLoc {
                    expr: Expr::Dict(entries),
                    range: range.to(close.range),
                });
            }
            other => {
                return Err(ParseError::new(
                    format!("expected an expression, found {}", other.describe()),
                    range.start,
                ));
            }
        };
        Ok(ExprLoc { expr, range })
    }

    fn parse_paren_or_tuple(&mut self, open: CodeRange) -> Result<ExprLoc, ParseError> {
        self.skip_newlines();
        if self.peek_is(&TokenKind::RParen) {
            let close = self.bump();
            return Ok(ExprLoc {
                expr: Expr::Tuple(Vec::new()),
                range: open.to(close.range),
            });
        }
        let first = self.parse_ternary()?;
        self.skip_newlines();
        if self.peek_is(&TokenKind::Comma) {
            let mut elements = vec![first];
            while self.peek_is(&TokenKind::Comma) {
                self.bump();
                self.skip_newlines();
                if self.peek_is(&TokenKind::RParen) {
                    break;
                }
                elements.push(self.parse_ternary()?);
                self.skip_newlines();
            }
            let close = self.expect(&TokenKind::RParen)?;
            return Ok(ExprLoc {
                expr: Expr::Tuple(elements),
                range: open.to(close.range),
            });
        }
        let close = self.expect(&TokenKind::RParen)?;
        Ok(ExprLoc {
            expr: first.expr,
            range: open.to(close.range),
        })
    }

    fn build_string(&mut self, segments: Vec<StringSegment>, range: CodeRange) -> Result<ExprLoc, ParseError> {
        if segments.len() == 1
            && let StringSegment::Text(text) = &segments[0]
        {
            return Ok(ExprLoc {
                expr: Expr::Literal(Literal::Str(text.clone())),
                range,
            });
        }
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                StringSegment::Text(text) => parts.push(TemplatePart::Text(text)),
                StringSegment::Hole { source, loc } => {
                    let expr = self.parse_hole(&source, loc)?;
                    parts.push(TemplatePart::Expr(Box::new(expr)));
                }
            }
        }
        Ok(ExprLoc {
            expr: Expr::StringTemplate(parts),
            range,
        })
    }

    /// Parses an interpolation hole by swapping the token stream, then maps
    /// hole-local positions back to the enclosing file.
    fn parse_hole(&mut self, source: &str, loc: CodeLoc) -> Result<ExprLoc, ParseError> {
        let relocate = |local: CodeLoc| CodeLoc {
            line: loc.line,
            column: loc.column + local.column.saturating_sub(1),
        };
        let mut tokens = Lexer::new(source)
            .lex()
            .map_err(|e| ParseError::new(e.message, relocate(e.loc)))?;
        for token in &mut tokens {
            token.range = CodeRange {
                start: relocate(token.range.start),
                end: relocate(token.range.end),
            };
        }
        let saved_tokens = mem::replace(&mut self.tokens, tokens);
        let saved_pos = mem::replace(&mut self.pos, 0);
        let result = self.parse_ternary().and_then(|expr| {
            if self.peek_is(&TokenKind::Eof) {
                Ok(expr)
            } else {
                Err(ParseError::new(
                    format!("unexpected {} in string interpolation", self.peek_kind().describe()),
                    self.peek_loc(),
                ))
            }
        });
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        result
    }

    // === token helpers ===

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        mem::discriminant(self.peek_kind()) == mem::discriminant(kind)
    }

    fn peek_loc(&self) -> CodeLoc {
        self.tokens[self.pos.min(self.tokens.len() - 1)].range.start
    }

    fn peek_ends_statement(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.peek_is(kind) {
            Ok(self.bump())
        } else {
            Err(ParseError::new(
                format!("expected {}, found {}", kind.describe(), self.peek_kind().describe()),
                self.peek_loc(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, CodeRange), ParseError> {
        if let TokenKind::Ident(_) = self.peek_kind() {
            let token = self.bump();
            let TokenKind::Ident(name) = token.kind else {
                unreachable!("peeked an identifier");
            };
            Ok((name, token.range))
        } else {
            Err(ParseError::new(
                format!("expected an identifier, found {}", self.peek_kind().describe()),
                self.peek_loc(),
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_is(&TokenKind::Newline) {
            self.bump();
        }
    }

    fn end_of_statement(&mut self) -> Result<(), ParseError> {
        if self.peek_is(&TokenKind::Newline) {
            self.bump();
            Ok(())
        } else if self.peek_ends_statement() {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected end of statement, found {}", self.peek_kind().describe()),
                self.peek_loc(),
            ))
        }
    }

    fn in_loop(&self) -> bool {
        self.fn_stack.last().is_some_and(|ctx| ctx.loop_depth > 0)
    }

    fn enter_loop(&mut self) {
        if let Some(ctx) = self.fn_stack.last_mut() {
            ctx.loop_depth += 1;
        }
    }

    fn exit_loop(&mut self) {
        if let Some(ctx) = self.fn_stack.last_mut() {
            ctx.loop_depth -= 1;
        }
    }

    fn enter_depth(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::new("expression is nested too deeply", self.peek_loc()));
        }
        Ok(())
    }

    fn exit_depth(&mut self) {
        self.depth -= 1;
    }
}

fn expr_to_target(expr: ExprLoc) -> Result<AssignTarget, ParseError> {
    let mut path = Vec::new();
    let mut current = expr;
    loop {
        match current.expr {
            Expr::Name(base) => {
                path.reverse();
                return Ok(AssignTarget {
                    base,
                    base_range: current.range,
                    path,
                });
            }
            Expr::Index { base, index } => {
                path.push(AccessSeg::Index(*index));
                current = *base;
            }
            Expr::Attr { base, attr } => {
                path.push(AccessSeg::Attr(attr, current.range));
                current = *base;
            }
            _ => {
                return Err(ParseError::new("invalid assignment target", current.range.start));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn await_outside_async_is_rejected() {
        let err = parse("funct f() { let x = await g() }").unwrap_err();
        assert!(err.message.contains("only allowed inside async functions"), "{err:?}");
    }

    #[test]
    fn top_level_await_is_allowed() {
        parse("await async_sleep(0.1)").unwrap();
    }

    #[test]
    fn async_init_is_rejected() {
        let err = parse("blueprint A { async funct init(self) { } }").unwrap_err();
        assert!(err.message.contains("`init` may not be declared async"), "{err:?}");
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = parse("break").unwrap_err();
        assert!(err.message.contains("outside of a loop"), "{err:?}");
    }

    #[test]
    fn power_is_right_associative() {
        let program = parse("let x = 2 ^ 3 ^ 2").unwrap();
        let body = &program.functions[program.main.index()].body;
        let Stmt::Let { value, .. } = &body[0] else {
            panic!("expected let");
        };
        let Expr::Binary {
            op: BinaryOp::Pow,
            right,
            ..
        } = &value.expr
        else {
            panic!("expected power");
        };
        assert!(matches!(right.expr, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn unary_binds_looser_than_power() {
        let program = parse("let x = -2 ^ 2").unwrap();
        let body = &program.functions[program.main.index()].body;
        let Stmt::Let { value, .. } = &body[0] else {
            panic!("expected let");
        };
        assert!(matches!(
            value.expr,
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn assignment_target_paths() {
        let program = parse("grid[1].cells[0] = 5").unwrap();
        let body = &program.functions[program.main.index()].body;
        let Stmt::Assign { target, .. } = &body[0] else {
            panic!("expected assignment");
        };
        assert_eq!(target.base, "grid");
        assert_eq!(target.path.len(), 3);
        assert!(matches!(target.path[0], AccessSeg::Index(_)));
        assert!(matches!(target.path[1], AccessSeg::Attr(..)));
        assert!(matches!(target.path[2], AccessSeg::Index(_)));
    }

    #[test]
    fn call_is_not_an_assignment_target() {
        let err = parse("f() = 1").unwrap_err();
        assert!(err.message.contains("invalid assignment target"), "{err:?}");
    }

    #[test]
    fn one_element_tuple_requires_comma() {
        let program = parse("let t = (1,)\nlet g = (1)").unwrap();
        let body = &program.functions[program.main.index()].body;
        let Stmt::Let { value, .. } = &body[0] else {
            panic!("expected let");
        };
        assert!(matches!(&value.expr, Expr::Tuple(items) if items.len() == 1));
        let Stmt::Let { value, .. } = &body[1] else {
            panic!("expected let");
        };
        assert!(matches!(value.expr, Expr::Literal(Literal::Int(1))));
    }
}
