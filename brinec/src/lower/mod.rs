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

// The per-package build context and the lowering machinery shared by
// expression and statement lowering: lvalues, the reference-graph `lookup`,
// condition lowering with short-circuit simplification, multi-result
// expressions, value-spec initialization (lazy and eager modes) and the
// function-body driver.
//
// Lowering functions address the function under construction by its local
// index in the package, so the deeply re-entrant build (a global's
// initializer building a function that touches further globals, all while
// Init grows) never holds two &mut borrows.

mod emit;
mod expr;
mod stmt;

use tracing::debug;

use crate::ast::{self, Expr, ExprKind, Span, UnaryOp};
use crate::ir::{FuncRef, FuncSyntax, GlobalRef, InstrKind, UnOpKind, Value};
use crate::oracle::{ConstValue, Lit, ObjId, ObjKind};
use crate::prog::{Package, Tables, BuilderMode, INIT_FUNC};
use crate::types::{TypeId, TypeKind, T_BOOL, T_INVALID};

/// Index of a function within the package being built.
pub(crate) type Fx = u32;

/// Builds SSA for one package. Holds the frozen program tables and exclusive
/// ownership of the package.
pub(crate) struct PackageBuilder<'a> {
    pub tables: &'a Tables,
    pub pkg: &'a mut Package,
}

/// An addressable or write-only location.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Lvalue {
    /// The address of a cell; `ty` is the pointee type.
    Address { addr: Value, ty: TypeId },
    /// A map element: not addressable, loads via Lookup, stores via
    /// MapUpdate.
    Element { map: Value, key: Value, ty: TypeId },
    /// Discards writes; evaluating the RHS is the only effect.
    Blank,
}

impl Lvalue {
    pub fn ty(&self) -> TypeId {
        match self {
            Lvalue::Address { ty, .. } | Lvalue::Element { ty, .. } => *ty,
            Lvalue::Blank => panic!("blank lvalue has no type"),
        }
    }

    /// The address of an Address lvalue; anything else is a caller bug.
    pub fn addr(&self) -> Value {
        match self {
            Lvalue::Address { addr, .. } => *addr,
            lv => panic!("lvalue is not an address: {:?}", lv),
        }
    }
}

impl PackageBuilder<'_> {
    pub fn f(&mut self, fx: Fx) -> &mut crate::ir::Function {
        &mut self.pkg.funcs[fx as usize]
    }

    pub fn ff(&self, fx: Fx) -> &crate::ir::Function {
        &self.pkg.funcs[fx as usize]
    }

    pub fn info(&self) -> &crate::oracle::TypeInfo {
        &self.pkg.info
    }

    pub fn mode(&self) -> BuilderMode {
        self.tables.mode
    }

    /// The type of any value usable in function `fx`.
    pub fn value_ty(&self, fx: Fx, v: Value) -> TypeId {
        if let Some(t) = self.ff(fx).local_value_ty(v) {
            return t;
        }
        match v {
            Value::Global(g) => {
                let pointee = if g.pkg == self.pkg.id {
                    self.pkg.globals[g.index as usize].ty
                } else {
                    self.tables.global_ty(g)
                };
                self.tables.types.pointer_to(pointee)
            }
            Value::Func(r) => {
                if let FuncRef::Decl(p, i) = r {
                    if p == self.pkg.id {
                        return self.pkg.funcs[i as usize].sig;
                    }
                }
                self.tables.func_sig(r)
            }
            Value::Builtin(_) => T_INVALID,
            _ => unreachable!(),
        }
    }

    /// Literal of function `fx`'s pool backing `v`, if it is one.
    pub fn lit_of(&self, fx: Fx, v: Value) -> Option<Lit> {
        match v {
            Value::Lit(l) => Some(self.ff(fx).lits[l.0 as usize].clone()),
            _ => None,
        }
    }

    // ── Lvalue operations ────────────────────────────────────────

    pub fn lv_load(&mut self, fx: Fx, lv: &Lvalue) -> Value {
        match *lv {
            Lvalue::Address { addr, .. } => self.emit_load(fx, addr),
            Lvalue::Element { map, key, ty } => self.f(fx).emit(
                InstrKind::Lookup {
                    x: map,
                    index: key,
                    comma_ok: false,
                },
                Some(ty),
                Span::point(0),
            ),
            Lvalue::Blank => panic!("load of blank lvalue"),
        }
    }

    pub fn lv_store(&mut self, fx: Fx, lv: &Lvalue, v: Value, span: Span) {
        match *lv {
            Lvalue::Address { addr, .. } => {
                self.emit_store(fx, addr, v, span);
            }
            Lvalue::Element { map, key, ty } => {
                let v = self.emit_conv(fx, v, ty);
                self.f(fx).emit(
                    InstrKind::MapUpdate {
                        map,
                        key,
                        value: v,
                    },
                    None,
                    span,
                );
            }
            Lvalue::Blank => {}
        }
    }

    // ── Reference-graph lookup ───────────────────────────────────

    /// The package-level Function, Global address or universal Builtin for
    /// `obj`. An intra-package hit is an edge of the initialization
    /// dependency graph: its build is triggered here so initializer effects
    /// land in Init in reference order.
    pub fn lookup(&mut self, obj: ObjId) -> Option<Value> {
        let v = *self.tables.globals.get(&obj)?;
        match v {
            Value::Func(FuncRef::Decl(p, i)) if p == self.pkg.id => self.build_function(i),
            Value::Global(g) if g.pkg == self.pkg.id => self.build_global(g.index, obj),
            _ => {}
        }
        Some(v)
    }

    /// The local (or captured) cell for `obj` in function `fx`. Walks the
    /// lexical chain, creating capture slots; anything referenced from a
    /// nested function escapes.
    pub fn fn_lookup(&mut self, fx: Fx, obj: ObjId, escaping: bool) -> Value {
        if let Some(&v) = self.ff(fx).objects.get(&obj) {
            if escaping {
                self.mark_escaping(fx, v);
            }
            return v;
        }
        let enc = self
            .ff(fx)
            .enclosing
            .unwrap_or_else(|| panic!("unresolved local object {:?}", obj));
        let outer = self.fn_lookup(enc, obj, true);
        let ty = self.value_ty(enc, outer);
        let name = self.tables.objects.get(obj).name;
        let f = self.f(fx);
        let i = f.free_vars.len() as u32;
        f.free_vars.push(crate::ir::FreeVar {
            name,
            ty,
            outer: Some(outer),
        });
        let v = Value::Capture(i);
        f.objects.insert(obj, v);
        v
    }

    fn mark_escaping(&mut self, fx: Fx, v: Value) {
        if let Value::Instr(i) = v {
            if let InstrKind::Alloc { heap, .. } = &mut self.f(fx).instrs[i.0 as usize].kind {
                *heap = true;
            }
        }
    }

    // ── Condition lowering ───────────────────────────────────────

    /// Evaluate boolean condition `e`, jumping to `t` or `f`. Distributes
    /// negations, splits `&&`/`||` without materializing booleans, and
    /// dispatches constant conditions statically.
    /// Postcondition: no current block.
    pub fn cond(&mut self, fx: Fx, e: &Expr, t: crate::ir::BlockId, f: crate::ir::BlockId) {
        match &e.kind {
            ExprKind::Paren(inner) => return self.cond(fx, inner, t, f),
            ExprKind::Binary { op, x, y } => match op {
                ast::BinaryOp::LAnd => {
                    let ltrue = self.f(fx).new_basic_block("cond.true");
                    self.cond(fx, x, ltrue, f);
                    self.f(fx).current = Some(ltrue);
                    return self.cond(fx, y, t, f);
                }
                ast::BinaryOp::LOr => {
                    let lfalse = self.f(fx).new_basic_block("cond.false");
                    self.cond(fx, x, t, lfalse);
                    self.f(fx).current = Some(lfalse);
                    return self.cond(fx, y, t, f);
                }
                _ => {}
            },
            ExprKind::Unary {
                op: UnaryOp::Not,
                x,
            } => return self.cond(fx, x, f, t),
            _ => {}
        }

        let v = self.expr(fx, e);
        match self.lit_of(fx, v) {
            Some(lit) => {
                if lit.as_bool() {
                    self.emit_jump(fx, t);
                } else {
                    self.emit_jump(fx, f);
                }
            }
            None => self.emit_if(fx, v, t, f),
        }
    }

    /// Reify an `&&`/`||` expression's boolean value, folding a constant
    /// left operand and simplifying the unreachable side.
    pub fn logical_binop(&mut self, fx: Fx, e: &Expr) -> Value {
        let ExprKind::Binary { op, x, y } = &e.kind else {
            panic!("logical_binop on non-binary expression");
        };
        let rhs = self.f(fx).new_basic_block("binop.rhs");
        let done = self.f(fx).new_basic_block("binop.done");

        let short = match op {
            ast::BinaryOp::LAnd => {
                self.cond(fx, x, rhs, done);
                self.f(fx).lit(Lit::bool(false))
            }
            ast::BinaryOp::LOr => {
                self.cond(fx, x, done, rhs);
                self.f(fx).lit(Lit::bool(true))
            }
            _ => panic!("logical_binop on non-logical operator"),
        };

        if self.ff(fx).blocks[rhs.0 as usize].preds.is_empty() {
            // false && y, true || y: the right side never runs.
            self.f(fx).current = Some(done);
            return short;
        }
        if self.ff(fx).blocks[done.0 as usize].preds.is_empty() {
            // true && y, false || y: the value is just y.
            self.f(fx).current = Some(rhs);
            return self.expr(fx, y);
        }

        // Every edge from x carries the short-circuit constant.
        let mut edges = Vec::new();
        for _ in &self.ff(fx).blocks[done.0 as usize].preds {
            edges.push(short);
        }
        self.f(fx).current = Some(rhs);
        edges.push(self.expr(fx, y));
        self.emit_jump(fx, done);
        self.f(fx).current = Some(done);

        let comment = match op {
            ast::BinaryOp::LAnd => "&&",
            _ => "||",
        };
        self.f(fx).emit(
            InstrKind::Phi {
                edges,
                comment: comment.to_string(),
            },
            Some(T_BOOL),
            e.span,
        )
    }

    // ── Multi-result expressions ─────────────────────────────────

    /// Lower an expression that legitimately produces a tuple: a
    /// multi-result call, or the comma-ok form of a map lookup, channel
    /// receive or type assertion. The result type is canonicalized to
    /// (value, ok) for the comma-ok forms.
    pub fn expr_n(&mut self, fx: Fx, e: &Expr) -> Value {
        match &e.kind {
            ExprKind::Paren(inner) => self.expr_n(fx, inner),

            ExprKind::Call { .. } => {
                let c = self.set_call(fx, e);
                let ty = self.info().type_of(e.id);
                self.f(fx).emit(InstrKind::Call(c), Some(ty), e.span)
            }

            ExprKind::Index { x, index } => {
                let map_t = self.info().type_of(x.id);
                let elem = self.tables.types.elem(map_t);
                let key_t = self.tables.types.map_key(map_t);
                let xv = self.expr(fx, x);
                let kv = self.expr(fx, index);
                let kv = self.emit_conv(fx, kv, key_t);
                let ty = self.comma_ok_ty(elem);
                self.f(fx).emit(
                    InstrKind::Lookup {
                        x: xv,
                        index: kv,
                        comma_ok: true,
                    },
                    Some(ty),
                    e.span,
                )
            }

            ExprKind::TypeAssert { x, ty: Some(_) } => {
                let xv = self.expr(fx, x);
                let asserted = self.info().type_of(e.id);
                self.emit_type_test(fx, xv, asserted, e.span)
            }

            ExprKind::Unary {
                op: UnaryOp::Recv,
                x,
            } => {
                let chan_t = self.info().type_of(x.id);
                let elem = self.tables.types.elem(chan_t);
                let xv = self.expr(fx, x);
                let ty = self.comma_ok_ty(elem);
                self.f(fx).emit(
                    InstrKind::UnOp {
                        op: UnOpKind::Recv,
                        x: xv,
                        comma_ok: true,
                    },
                    Some(ty),
                    e.span,
                )
            }

            k => panic!("unexpected multi-result expression: {:?}", k),
        }
    }

    pub fn comma_ok_ty(&self, value: TypeId) -> TypeId {
        self.tables.types.tuple_of(vec![value, T_BOOL])
    }

    // ── Value specs ──────────────────────────────────────────────

    /// Lower a function-local `var` spec: 1:1 assignment, zero-value
    /// declaration, or n:1 tuple expansion.
    pub fn local_value_spec(&mut self, fx: Fx, spec: &ast::ValueSpec) {
        if spec.values.len() == spec.names.len() {
            for (i, id) in spec.names.iter().enumerate() {
                let lval = if id.is_blank() {
                    Lvalue::Blank
                } else {
                    let obj = self.info().object_of(id);
                    let addr = self.add_named_local(fx, obj, &id.name);
                    self.address_of(fx, addr)
                };
                self.expr_in_place(fx, &lval, &spec.values[i]);
            }
        } else if spec.values.is_empty() {
            // Zero-initialized slots.
            for id in &spec.names {
                if !id.is_blank() {
                    let obj = self.info().object_of(id);
                    self.add_named_local(fx, obj, &id.name);
                }
            }
        } else {
            let tuple = self.expr_n(fx, &spec.values[0]);
            let tys = self.tables.types.tuple_elems(self.value_ty(fx, tuple));
            for (i, id) in spec.names.iter().enumerate() {
                if id.is_blank() {
                    continue;
                }
                let obj = self.info().object_of(id);
                let lhs = self.add_named_local(fx, obj, &id.name);
                let v = self.emit_extract(fx, tuple, i as u32, tys[i]);
                self.emit_store(fx, lhs, v, id.span);
            }
        }
    }

    /// Lower (part of) a package-level `var` spec into Init.
    ///
    /// Mode A (`target` set): initialize just that global, during the
    /// reference-graph traversal. Mode B (`target` None): initialize every
    /// not-yet-done global of the spec, during the source-order walk. Each
    /// 1:1 position fires once per GLOBAL; an n:1 spec fires once per SPEC,
    /// so blank positions still observe their side effects exactly once.
    pub fn global_value_spec(
        &mut self,
        spec: &ast::ValueSpec,
        target: Option<(u32, ObjId)>,
    ) {
        if spec.values.len() == spec.names.len() {
            for (i, id) in spec.names.iter().enumerate() {
                let mut lval = Lvalue::Blank;
                if let Some((gx, obj)) = target {
                    // Mode A.
                    if id.is_blank() || self.info().object_of(id) != obj {
                        continue;
                    }
                    self.pkg.globals[gx as usize].spec = None;
                    lval = self.global_lvalue(gx);
                } else if !id.is_blank() {
                    // Mode B.
                    let obj = self.info().object_of(id);
                    let Some(Value::Global(g)) = self.tables.globals.get(&obj).copied() else {
                        panic!("var '{}' is not a global", id.name);
                    };
                    if self.pkg.globals[g.index as usize].spec.is_none() {
                        continue; // already initialized through a reference
                    }
                    self.pkg.globals[g.index as usize].spec = None;
                    lval = self.global_lvalue(g.index);
                }
                if self.mode().contains(BuilderMode::LOG_SOURCE) {
                    debug!(global = %id.name, "build global");
                }
                self.expr_in_place(INIT_FUNC, &lval, &spec.values[i]);
                if target.is_some() {
                    break;
                }
            }
        } else if spec.values.is_empty() {
            // Zero-initialized; no code.
        } else {
            // n:1 assignment fires once per spec.
            if !self.pkg.nto1_done.insert(spec.id) {
                return;
            }
            if self.mode().contains(BuilderMode::LOG_SOURCE) {
                let names: Vec<&str> = spec.names.iter().map(|n| n.name.as_str()).collect();
                debug!(globals = ?names, "build globals");
            }
            let tuple = self.expr_n(INIT_FUNC, &spec.values[0]);
            let tys = self
                .tables
                .types
                .tuple_elems(self.value_ty(INIT_FUNC, tuple));
            for (i, id) in spec.names.iter().enumerate() {
                if id.is_blank() {
                    continue;
                }
                let obj = self.info().object_of(id);
                let Some(Value::Global(g)) = self.tables.globals.get(&obj).copied() else {
                    panic!("var '{}' is not a global", id.name);
                };
                self.pkg.globals[g.index as usize].spec = None;
                let v = self.emit_extract(INIT_FUNC, tuple, i as u32, tys[i]);
                let addr = Value::Global(g);
                self.emit_store(INIT_FUNC, addr, v, id.span);
            }
        }
    }

    fn global_lvalue(&self, gx: u32) -> Lvalue {
        Lvalue::Address {
            addr: Value::Global(GlobalRef {
                pkg: self.pkg.id,
                index: gx,
            }),
            ty: self.pkg.globals[gx as usize].ty,
        }
    }

    /// Emit initialization for global `gx` if its spec is still pending
    /// (reference-graph mode A entry point).
    pub fn build_global(&mut self, gx: u32, obj: ObjId) {
        let Some(spec) = self.pkg.globals[gx as usize].spec.clone() else {
            return; // already built, or in progress
        };
        self.global_value_spec(&spec, Some((gx, obj)));
    }

    // ── Assignment ───────────────────────────────────────────────

    /// Parallel assignment `lhss = rhss` (or `:=` when `is_def`).
    pub fn assign_stmt(&mut self, fx: Fx, lhss: &[Expr], rhss: &[Expr], is_def: bool) {
        let mut lvals = Vec::with_capacity(lhss.len());
        for lhs in lhss {
            let lval = if ast::is_blank_expr(lhs) {
                Lvalue::Blank
            } else {
                if is_def {
                    // A short declaration may redeclare: only make a fresh
                    // slot for objects this function hasn't bound yet.
                    let target = ast::unparen(lhs);
                    if let ExprKind::Ident(name) = &target.kind {
                        let obj = *self
                            .pkg
                            .info
                            .uses
                            .get(&target.id)
                            .unwrap_or_else(|| panic!("no object for ident '{}'", name));
                        let name = name.clone();
                        if !self.ff(fx).objects.contains_key(&obj) {
                            self.add_named_local(fx, obj, &name);
                        }
                    }
                }
                self.addr(fx, lhs, false)
            };
            lvals.push(lval);
        }
        if lhss.len() == rhss.len() {
            if lhss.len() == 1 {
                // In-place construction of composite literals.
                self.expr_in_place(fx, &lvals[0], &rhss[0]);
            } else {
                // All reads precede all writes.
                let mut rvals = Vec::with_capacity(rhss.len());
                for r in rhss {
                    rvals.push(self.expr(fx, r));
                }
                for (lval, rv) in lvals.iter().zip(rvals) {
                    self.lv_store(fx, lval, rv, Span::point(0));
                }
            }
        } else {
            let tuple = self.expr_n(fx, &rhss[0]);
            let tys = self.tables.types.tuple_elems(self.value_ty(fx, tuple));
            for (i, lval) in lvals.iter().enumerate() {
                let v = self.emit_extract(fx, tuple, i as u32, tys[i]);
                self.lv_store(fx, lval, v, Span::point(0));
            }
        }
    }

    /// `loc op= incr`.
    pub fn assign_op(&mut self, fx: Fx, loc: &Lvalue, incr: Value, op: ast::BinaryOp, span: Span) {
        let old = self.lv_load(fx, loc);
        let old_ty = self.value_ty(fx, old);
        let incr = self.emit_conv(fx, incr, old_ty);
        let v = self.emit_arith(fx, op, old, incr, loc.ty(), span);
        self.lv_store(fx, loc, v, span);
    }

    // ── Function bodies ──────────────────────────────────────────

    /// Build the body of function `fx`. Idempotent; a function without a
    /// body only gets its parameter list populated.
    pub fn build_function(&mut self, fx: Fx) {
        if !self.ff(fx).blocks.is_empty() {
            return; // building already started
        }
        let Some(syntax) = self.ff(fx).syntax.clone() else {
            return; // synthetic or metadata-only: no source
        };
        if syntax.body.is_none() {
            // External function: expose parameters, emit nothing.
            if self.ff(fx).params.is_empty() {
                let sig = self.tables.types.sig(self.ff(fx).sig);
                if let (Some(recv_ty), Some(recv)) = (sig.recv, &syntax.recv) {
                    self.f(fx).add_param(recv.name.clone(), recv_ty, None);
                }
                for (i, &pt) in sig.params.iter().enumerate() {
                    let name = syntax
                        .params
                        .get(i)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| format!("arg{}", i));
                    self.f(fx).add_param(name, pt, None);
                }
            }
            return;
        }
        if self.mode().contains(BuilderMode::LOG_SOURCE) {
            debug!(
                function = %self.ff(fx).name,
                at = %self.tables.positions.describe(self.ff(fx).span),
                "build function"
            );
        }

        self.f(fx).start_body();
        self.create_syntactic_params(fx, &syntax);
        let body = syntax.body.as_ref().unwrap();
        self.stmt_list(fx, &body.stmts);
        // Fall off the end: run deferred calls and return.
        if let Some(cb) = self.ff(fx).current {
            if cb.0 == 0 || !self.ff(fx).blocks[cb.0 as usize].preds.is_empty() {
                self.f(fx).emit(InstrKind::RunDefers, None, body.span);
                self.f(fx).emit(InstrKind::Ret(Vec::new()), None, body.span);
            }
        }
        self.finish_function(fx);
    }

    /// Seal and post-process a built function body.
    pub fn finish_function(&mut self, fx: Fx) {
        self.f(fx).finish_body();
        if self.mode().contains(BuilderMode::SANITY_CHECK) {
            let report = crate::sanity::check_function(
                self.ff(fx),
                &self.tables.types,
                &format!("{}.{}", self.pkg.path, self.ff(fx).name),
            );
            if let Err(msg) = report {
                panic!("sanity check failed: {}", msg);
            }
        }
        if self.mode().contains(BuilderMode::LOG_FUNCTIONS) {
            debug!(
                function = %self.ff(fx).name,
                ssa = %crate::dump::function_to_string(self.ff(fx), &self.tables.types),
                "built function"
            );
        }
    }

    /// Add parameters (receiver first) and named-result slots from syntax,
    /// spilling each named parameter to a stack slot so all locals are
    /// uniformly addresses.
    fn create_syntactic_params(&mut self, fx: Fx, syntax: &FuncSyntax) {
        let sig = self.tables.types.sig(self.ff(fx).sig);
        if let (Some(recv_ty), Some(recv)) = (sig.recv, &syntax.recv) {
            let obj = self.info().try_object_of(recv);
            let p = self.f(fx).add_param(recv.name.clone(), recv_ty, obj);
            if !recv.is_blank() {
                self.spill_param(fx, p, recv_ty, obj, &recv.name);
            }
        }
        for (i, &pt) in sig.params.iter().enumerate() {
            let ident = &syntax.params[i];
            let obj = self.info().try_object_of(ident);
            let p = self.f(fx).add_param(ident.name.clone(), pt, obj);
            if !ident.is_blank() {
                self.spill_param(fx, p, pt, obj, &ident.name);
            }
        }
        for slot in &syntax.results {
            let Some(ident) = slot else { continue };
            if ident.is_blank() {
                continue;
            }
            let obj = self.info().object_of(ident);
            let addr = self.add_named_local(fx, obj, &ident.name);
            self.f(fx).named_results.push(addr);
        }
    }

    fn spill_param(&mut self, fx: Fx, p: Value, ty: TypeId, obj: Option<ObjId>, name: &str) {
        let slot_ty = self.tables.types.pointer_to(ty);
        let addr = self.f(fx).emit(
            InstrKind::Alloc {
                name: name.to_string(),
                heap: false,
            },
            Some(slot_ty),
            Span::point(0),
        );
        if let Value::Instr(i) = addr {
            self.f(fx).locals.push(i);
        }
        self.f(fx).emit(
            InstrKind::Store {
                addr,
                value: p,
            },
            None,
            Span::point(0),
        );
        if let Some(obj) = obj {
            self.f(fx).objects.insert(obj, addr);
        }
    }

    /// A named stack slot for `obj`, registered in the function's object
    /// map. The value is the slot's address.
    pub fn add_named_local(&mut self, fx: Fx, obj: ObjId, name: &str) -> Value {
        let ty = self.tables.objects.get(obj).ty;
        let addr = self.add_local(fx, ty, name, Span::point(0));
        self.f(fx).objects.insert(obj, addr);
        addr
    }

    pub fn address_of(&self, fx: Fx, addr: Value) -> Lvalue {
        let ty = self.tables.types.deref(self.value_ty(fx, addr));
        Lvalue::Address { addr, ty }
    }

    /// Does `e` denote the value of a variable object (vs a func/const)?
    pub fn obj_is_var(&self, obj: ObjId) -> bool {
        self.tables.objects.get(obj).kind == ObjKind::Var
    }

    /// The constant `nil` of type `ty` in function `fx`'s pool.
    pub fn nil_lit(&mut self, fx: Fx, ty: TypeId) -> Value {
        self.f(fx).lit(Lit::new(ConstValue::Nil, ty))
    }

    pub fn int_lit(&mut self, fx: Fx, v: i64) -> Value {
        self.f(fx).lit(Lit::int(v))
    }

    /// The package declaring unexported selector ids resolved here.
    pub fn pkg_path(&self) -> String {
        self.pkg.path.clone()
    }

    /// Is `t` the untyped nil type?
    pub fn is_untyped_nil(&self, t: TypeId) -> bool {
        matches!(self.tables.types.kind(t), TypeKind::UntypedNil)
    }

    /// Local function index behind a FuncRef of this package.
    pub fn local_fx(&self, r: FuncRef) -> Option<Fx> {
        match r {
            FuncRef::Decl(p, i) if p == self.pkg.id => Some(i),
            _ => None,
        }
    }
}
