/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

// Abstract syntax of the brine source language, as delivered by the parser
// and annotated by the type checker. Every expression node carries a NodeId;
// the checker keys its TypeInfo maps by it. The SSA builder never interprets
// type syntax itself -- a type written in expression position is either a
// named reference or an opaque `TypeLit`, and the oracle answers what it
// denotes.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize, // byte offset (inclusive)
    pub end: usize,   // byte offset (exclusive)
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }
}

/// Identity of an AST node within one package, assigned by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Clone, Debug)]
pub struct Ident {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
}

impl Ident {
    pub fn is_blank(&self) -> bool {
        self.name == "_"
    }
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Ident(String),
    Lit(LitKind),
    FuncLit {
        params: Vec<Ident>,
        results: Vec<Option<Ident>>,
        body: Block,
    },
    /// Composite type syntax (slice, map, chan, struct, ... written inline).
    /// The checker records the denoted type against this node.
    TypeLit,
    Paren(Box<Expr>),
    Selector {
        x: Box<Expr>,
        sel: Ident,
    },
    Index {
        x: Box<Expr>,
        index: Box<Expr>,
    },
    SliceExpr {
        x: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
    },
    /// `x.(T)`; `ty` is None in the `x.(type)` switch header form.
    TypeAssert {
        x: Box<Expr>,
        ty: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        ellipsis: bool,
    },
    /// `*x` -- deref in expression position, pointer type in type position.
    Star(Box<Expr>),
    Unary {
        op: UnaryOp,
        x: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        x: Box<Expr>,
        y: Box<Expr>,
    },
    KeyValue {
        key: Box<Expr>,
        value: Box<Expr>,
    },
    CompositeLit {
        elts: Vec<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum LitKind {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// `&x` -- address-of (potentially escaping).
    Amp,
    /// `+x` -- identity.
    Plus,
    Neg,
    Not,
    BitNot,
    /// `<-ch` -- channel receive.
    Recv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Empty,
    /// Local declaration group (only var groups generate code).
    Decl(Decl),
    Labeled {
        label: Ident,
        stmt: Box<Stmt>,
    },
    Expr(Expr),
    Send {
        chan: Expr,
        value: Expr,
    },
    IncDec {
        x: Expr,
        inc: bool,
    },
    Assign {
        op: AssignKind,
        lhs: Vec<Expr>,
        rhs: Vec<Expr>,
    },
    /// `go f(...)`.
    Go(Expr),
    Defer(Expr),
    Return(Vec<Expr>),
    Branch {
        kind: BranchKind,
        label: Option<Ident>,
    },
    Block(Block),
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Block,
        els: Option<Box<Stmt>>,
    },
    Switch {
        init: Option<Box<Stmt>>,
        tag: Option<Expr>,
        cases: Vec<CaseClause>,
    },
    TypeSwitch {
        init: Option<Box<Stmt>>,
        /// `y` in `switch y := x.(type)`.
        bind: Option<Ident>,
        x: Expr,
        cases: Vec<TypeCaseClause>,
    },
    Select {
        cases: Vec<CommClause>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    Range {
        key: Option<Expr>,
        value: Option<Expr>,
        define: bool,
        x: Expr,
        body: Block,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignKind {
    /// `=`
    Assign,
    /// `:=`
    Define,
    /// `+=` and friends.
    Op(BinaryOp),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    Break,
    Continue,
    Fallthrough,
    Goto,
}

/// One `case a, b: ...` clause; an empty expression list is the default case.
#[derive(Clone, Debug)]
pub struct CaseClause {
    pub span: Span,
    pub exprs: Vec<Expr>,
    pub body: Vec<Stmt>,
}

/// One `case T1, T2: ...` clause of a type switch; empty list is the default.
#[derive(Clone, Debug)]
pub struct TypeCaseClause {
    pub span: Span,
    pub types: Vec<Expr>,
    pub body: Vec<Stmt>,
}

/// One communication clause of a select; `comm` is None for the default case.
#[derive(Clone, Debug)]
pub struct CommClause {
    pub span: Span,
    pub comm: Option<CommOp>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub enum CommOp {
    Send {
        chan: Expr,
        value: Expr,
    },
    /// `key, ok := <-chan` in all its optional shapes.
    Recv {
        key: Option<Ident>,
        ok: Option<Ident>,
        define: bool,
        chan: Expr,
    },
}

#[derive(Clone, Debug)]
pub enum Decl {
    Var(Vec<ValueSpec>),
    Const(Vec<ValueSpec>),
    Type(Vec<TypeSpec>),
    Func(FuncDecl),
}

/// `var a, b, c = x, y, z` (or `= f()`, or no values at all).
#[derive(Clone, Debug)]
pub struct ValueSpec {
    pub id: NodeId,
    pub span: Span,
    pub names: Vec<Ident>,
    pub values: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub struct TypeSpec {
    pub span: Span,
    pub name: Ident,
}

#[derive(Clone, Debug)]
pub struct FuncDecl {
    pub span: Span,
    /// Receiver ident for methods; None for package-level functions.
    pub recv: Option<Ident>,
    pub name: Ident,
    pub params: Vec<Ident>,
    /// Result slots; named results carry their idents.
    pub results: Vec<Option<Ident>>,
    /// None for externally supplied (bodyless) functions.
    pub body: Option<Block>,
}

#[derive(Clone, Debug)]
pub struct ImportSpec {
    pub span: Span,
    pub path: String,
}

/// One source file of a package. File order determines initialization order.
#[derive(Clone, Debug)]
pub struct File {
    pub package: String,
    pub imports: Vec<ImportSpec>,
    pub decls: Vec<Decl>,
}

/// Strip any number of enclosing parens.
pub fn unparen(e: &Expr) -> &Expr {
    let mut e = e;
    while let ExprKind::Paren(inner) = &e.kind {
        e = inner;
    }
    e
}

pub fn is_blank_expr(e: &Expr) -> bool {
    matches!(&unparen(e).kind, ExprKind::Ident(n) if n == "_")
}
