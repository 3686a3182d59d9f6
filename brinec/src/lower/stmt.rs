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

// Statement lowering: control flow expressed as explicit basic blocks.
// Invariant at statement boundaries: the function has a current block
// (statements that divert control park the builder in a fresh unreachable
// block, which finish_body later discards).

use tracing::warn;

use crate::ast::{
    self, AssignKind, BinaryOp, Block, BranchKind, CaseClause, CommClause, CommOp, Expr, ExprKind,
    Ident, Span, Stmt, StmtKind, TypeCaseClause,
};
use crate::ir::{BlockId, CallCommon, InstrKind, SelectState, TargetFrame, UnOpKind, Value};
use crate::prog::INIT_FUNC;
use crate::types::{ChanDir, TypeId, TypeKind, T_BOOL, T_EFACE, T_INT, T_INVALID};

use super::{Fx, Lvalue, PackageBuilder};

impl PackageBuilder<'_> {
    pub fn stmt_list(&mut self, fx: Fx, list: &[Stmt]) {
        for s in list {
            self.stmt(fx, s);
        }
    }

    pub fn stmt(&mut self, fx: Fx, s: &Stmt) {
        self.stmt_inner(fx, s, None)
    }

    fn stmt_inner(&mut self, fx: Fx, s: &Stmt, label: Option<&str>) {
        match &s.kind {
            StmtKind::Empty => {}

            StmtKind::Decl(d) => match d {
                ast::Decl::Var(specs) => {
                    for spec in specs {
                        self.local_value_spec(fx, spec);
                    }
                }
                // Local consts were folded by the checker; local types
                // carry no code.
                ast::Decl::Const(_) | ast::Decl::Type(_) => {}
                ast::Decl::Func(_) => panic!("function declaration in statement position"),
            },

            StmtKind::Labeled { label: l, stmt } => {
                let lb = self.f(fx).lblock(&l.name);
                self.emit_jump(fx, lb.goto_to);
                self.f(fx).current = Some(lb.goto_to);
                self.stmt_inner(fx, stmt, Some(&l.name));
            }

            StmtKind::Expr(e) => {
                self.expr(fx, e);
            }

            StmtKind::Send { chan, value } => {
                let elem = self.tables.types.elem(self.info().type_of(chan.id));
                let ch = self.expr(fx, chan);
                let v = self.expr(fx, value);
                let v = self.emit_conv(fx, v, elem);
                self.f(fx)
                    .emit(InstrKind::Send { chan: ch, value: v }, None, s.span);
            }

            StmtKind::IncDec { x, inc } => {
                let op = if *inc { BinaryOp::Add } else { BinaryOp::Sub };
                let loc = self.addr(fx, x, false);
                let one = self.int_lit(fx, 1);
                self.assign_op(fx, &loc, one, op, s.span);
            }

            StmtKind::Assign { op, lhs, rhs } => match op {
                AssignKind::Assign | AssignKind::Define => {
                    self.assign_stmt(fx, lhs, rhs, *op == AssignKind::Define);
                }
                AssignKind::Op(binop) => {
                    let loc = self.addr(fx, &lhs[0], false);
                    let r = self.expr(fx, &rhs[0]);
                    self.assign_op(fx, &loc, r, *binop, s.span);
                }
            },

            StmtKind::Go(call) => {
                let c = self.set_call(fx, call);
                self.f(fx).emit(InstrKind::Go(c), None, s.span);
            }

            StmtKind::Defer(call) => {
                let c = self.set_call(fx, call);
                self.f(fx).emit(InstrKind::Defer(c), None, s.span);
            }

            StmtKind::Return(results) => self.return_stmt(fx, s, results),

            StmtKind::Branch { kind, label } => self.branch_stmt(fx, *kind, label.as_ref()),

            StmtKind::Block(b) => self.stmt_list(fx, &b.stmts),

            StmtKind::If {
                init,
                cond,
                then,
                els,
            } => {
                if let Some(init) = init {
                    self.stmt(fx, init);
                }
                let then_b = self.f(fx).new_basic_block("if.then");
                let done = self.f(fx).new_basic_block("if.done");
                let else_b = if els.is_some() {
                    self.f(fx).new_basic_block("if.else")
                } else {
                    done
                };
                self.cond(fx, cond, then_b, else_b);
                self.f(fx).current = Some(then_b);
                self.stmt_list(fx, &then.stmts);
                self.emit_jump(fx, done);

                if let Some(els) = els {
                    self.f(fx).current = Some(else_b);
                    self.stmt(fx, els);
                    self.emit_jump(fx, done);
                }
                self.f(fx).current = Some(done);
            }

            StmtKind::Switch { init, tag, cases } => {
                self.switch_stmt(fx, init.as_deref(), tag.as_ref(), cases, label)
            }

            StmtKind::TypeSwitch {
                init,
                bind,
                x,
                cases,
            } => self.type_switch_stmt(fx, init.as_deref(), bind.as_ref(), x, cases, label),

            StmtKind::Select { cases } => self.select_stmt(fx, cases, label),

            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => self.for_stmt(fx, init.as_deref(), cond.as_ref(), post.as_deref(), body, label),

            StmtKind::Range {
                key,
                value,
                define,
                x,
                body,
            } => self.range_stmt(fx, key.as_ref(), value.as_ref(), *define, x, body, s.span, label),
        }
    }

    // ── return ───────────────────────────────────────────────────

    fn return_stmt(&mut self, fx: Fx, s: &Stmt, result_exprs: &[Expr]) {
        if fx == INIT_FUNC {
            // A return within an init block means "go to the next init
            // block"; the outermost break target holds it.
            let block = self
                .ff(fx)
                .targets
                .iter()
                .find_map(|t| t.break_to)
                .expect("init block without a next-block target");
            self.f(fx).emit(InstrKind::RunDefers, None, s.span);
            self.emit_jump(fx, block);
            let unreachable = self.f(fx).new_basic_block("unreachable");
            self.f(fx).current = Some(unreachable);
            return;
        }

        let sig = self.tables.types.sig(self.ff(fx).sig);
        let mut results = Vec::new();
        if result_exprs.len() == 1 && sig.results.len() > 1 {
            // Return of one multi-result expression: expand it.
            let tuple = self.expr_n(fx, &result_exprs[0]);
            let tys = self.tables.types.tuple_elems(self.value_ty(fx, tuple));
            for (i, &rt) in sig.results.iter().enumerate() {
                let v = self.emit_extract(fx, tuple, i as u32, tys[i]);
                results.push(self.emit_conv(fx, v, rt));
            }
        } else {
            for (i, r) in result_exprs.iter().enumerate() {
                let v = self.expr(fx, r);
                results.push(self.emit_conv(fx, v, sig.results[i]));
            }
        }

        let named = self.ff(fx).named_results.clone();
        if !named.is_empty() {
            // Parallel assignment into the named result slots.
            for (i, &r) in results.iter().enumerate() {
                self.emit_store(fx, named[i], r, s.span);
            }
        }
        self.f(fx).emit(InstrKind::RunDefers, None, s.span);
        if !named.is_empty() {
            // Reload: a deferred call may have mutated them.
            results.clear();
            for &nr in &named {
                results.push(self.emit_load(fx, nr));
            }
        }
        self.f(fx).emit(InstrKind::Ret(results), None, s.span);
        let unreachable = self.f(fx).new_basic_block("unreachable");
        self.f(fx).current = Some(unreachable);
    }

    // ── break / continue / fallthrough / goto ────────────────────

    fn branch_stmt(&mut self, fx: Fx, kind: BranchKind, label: Option<&Ident>) {
        let block = match kind {
            BranchKind::Break => match label {
                Some(l) => self.f(fx).lblock(&l.name).break_to,
                None => self.ff(fx).targets.iter().rev().find_map(|t| t.break_to),
            },
            BranchKind::Continue => match label {
                Some(l) => self.f(fx).lblock(&l.name).continue_to,
                None => self
                    .ff(fx)
                    .targets
                    .iter()
                    .rev()
                    .find_map(|t| t.continue_to),
            },
            BranchKind::Fallthrough => self
                .ff(fx)
                .targets
                .iter()
                .rev()
                .find_map(|t| t.fallthrough_to),
            BranchKind::Goto => {
                let l = label.expect("goto without label");
                Some(self.f(fx).lblock(&l.name).goto_to)
            }
        };
        match block {
            None => {
                // The checker does not reject these yet.
                warn!(?kind, "ignoring illegal branch statement");
            }
            Some(b) => {
                self.emit_jump(fx, b);
                let unreachable = self.f(fx).new_basic_block("unreachable");
                self.f(fx).current = Some(unreachable);
            }
        }
    }

    // ── switch ───────────────────────────────────────────────────

    /// A switch lowers to a sequential compare/branch chain. The default
    /// clause runs last, but its body block is allocated at its source
    /// position so fallthrough targets stay in source order.
    fn switch_stmt(
        &mut self,
        fx: Fx,
        init: Option<&Stmt>,
        tag: Option<&Expr>,
        cases: &[CaseClause],
        label: Option<&str>,
    ) {
        if let Some(init) = init {
            self.stmt(fx, init);
        }
        let tag_v = match tag {
            Some(t) => self.expr(fx, t),
            None => self.f(fx).lit(crate::oracle::Lit::bool(true)),
        };
        let done = self.f(fx).new_basic_block("switch.done");
        if let Some(name) = label {
            let mut lb = self.f(fx).lblock(name);
            lb.break_to = Some(done);
            self.f(fx).set_lblock(name, lb);
        }

        let mut dflt_body: Option<&[Stmt]> = None;
        let mut dflt_fallthrough: Option<BlockId> = None;
        let mut dflt_block: Option<BlockId> = None;
        let mut fallthru: Option<BlockId> = None;
        let ncases = cases.len();

        for (i, cc) in cases.iter().enumerate() {
            let body = match fallthru {
                Some(b) => b,
                None => self.f(fx).new_basic_block("switch.body"), // first case only
            };
            // Preallocate the next case's body so fallthrough can target it.
            fallthru = Some(if i + 1 < ncases {
                self.f(fx).new_basic_block("switch.body")
            } else {
                done
            });

            if cc.exprs.is_empty() {
                dflt_body = Some(&cc.body);
                dflt_fallthrough = fallthru;
                dflt_block = Some(body);
                continue;
            }

            let mut next = None;
            for cond in &cc.exprs {
                let nb = self.f(fx).new_basic_block("switch.next");
                next = Some(nb);
                let cv = self.expr(fx, cond);
                let c = self.emit_compare(fx, BinaryOp::Eq, tag_v, cv, cond.span);
                self.emit_if(fx, c, body, nb);
                self.f(fx).current = Some(nb);
            }
            self.f(fx).current = Some(body);
            self.f(fx).targets.push(TargetFrame {
                break_to: Some(done),
                continue_to: None,
                fallthrough_to: fallthru,
            });
            self.stmt_list(fx, &cc.body);
            self.f(fx).targets.pop();
            self.emit_jump(fx, done);
            self.f(fx).current = next;
        }

        if let Some(db) = dflt_block {
            self.emit_jump(fx, db);
            self.f(fx).current = Some(db);
            self.f(fx).targets.push(TargetFrame {
                break_to: Some(done),
                continue_to: None,
                fallthrough_to: dflt_fallthrough,
            });
            self.stmt_list(fx, dflt_body.unwrap_or(&[]));
            self.f(fx).targets.pop();
        }
        self.emit_jump(fx, done);
        self.f(fx).current = Some(done);
    }

    // ── type switch ──────────────────────────────────────────────

    fn type_switch_stmt(
        &mut self,
        fx: Fx,
        init: Option<&Stmt>,
        bind: Option<&Ident>,
        x: &Expr,
        cases: &[TypeCaseClause],
        label: Option<&str>,
    ) {
        if let Some(init) = init {
            self.stmt(fx, init);
        }

        let xv = self.expr(fx, x);
        let mut y = None;
        if let Some(ident) = bind {
            let obj = self.info().object_of(ident);
            let yaddr = self.add_named_local(fx, obj, &ident.name);
            self.emit_store(fx, yaddr, xv, ident.span);
            y = Some((obj, yaddr));
        }

        let done = self.f(fx).new_basic_block("typeswitch.done");
        if let Some(name) = label {
            let mut lb = self.f(fx).lblock(name);
            lb.break_to = Some(done);
            self.f(fx).set_lblock(name, lb);
        }

        let mut dflt_body: Option<&[Stmt]> = None;
        for cc in cases {
            if cc.types.is_empty() {
                dflt_body = Some(&cc.body);
                continue;
            }
            let body = self.f(fx).new_basic_block("typeswitch.body");
            let mut next = None;
            let mut casetype = T_INVALID;
            let mut ti = None; // t_i, ok := typeassert,ok x <T_i>
            for cond in &cc.types {
                let nb = self.f(fx).new_basic_block("typeswitch.next");
                next = Some(nb);
                casetype = self.info().type_of(cond.id);
                let condv = if self.is_untyped_nil(casetype) {
                    let xt = self.value_ty(fx, xv);
                    let nil = self.nil_lit(fx, xt);
                    self.emit_compare(fx, BinaryOp::Eq, xv, nil, cond.span)
                } else {
                    let yok = self.emit_type_test(fx, xv, casetype, cond.span);
                    ti = Some(self.emit_extract(fx, yok, 0, casetype));
                    self.emit_extract(fx, yok, 1, T_BOOL)
                };
                self.emit_if(fx, condv, body, nb);
                self.f(fx).current = Some(nb);
            }
            self.f(fx).current = Some(body);
            if let Some((obj, _)) = y {
                if cc.types.len() == 1 && !self.is_untyped_nil(casetype) {
                    // Shadow the binding with a local of the asserted type;
                    // the name is decorated to keep dumps readable.
                    let name = format!("{}'", bind.unwrap().name);
                    let y2 = self.add_local(fx, casetype, &name, cc.span);
                    self.f(fx).objects.insert(obj, y2);
                    self.emit_store(fx, y2, ti.unwrap(), cc.span);
                }
            }
            self.f(fx).targets.push(TargetFrame {
                break_to: Some(done),
                ..TargetFrame::default()
            });
            self.stmt_list(fx, &cc.body);
            self.f(fx).targets.pop();
            if let Some((obj, yaddr)) = y {
                // Restore the outer binding on leaving the case.
                self.f(fx).objects.insert(obj, yaddr);
            }
            self.emit_jump(fx, done);
            self.f(fx).current = next;
        }

        self.f(fx).targets.push(TargetFrame {
            break_to: Some(done),
            ..TargetFrame::default()
        });
        self.stmt_list(fx, dflt_body.unwrap_or(&[]));
        self.f(fx).targets.pop();
        self.emit_jump(fx, done);
        self.f(fx).current = Some(done);
    }

    // ── select ───────────────────────────────────────────────────

    fn select_stmt(&mut self, fx: Fx, cases: &[CommClause], label: Option<&str>) {
        // A blocking single-case select degenerates to the plain statement.
        if cases.len() == 1 {
            if let Some(comm) = &cases[0].comm {
                match comm {
                    CommOp::Send { chan, value } => {
                        let elem = self.tables.types.elem(self.info().type_of(chan.id));
                        let ch = self.expr(fx, chan);
                        let v = self.expr(fx, value);
                        let v = self.emit_conv(fx, v, elem);
                        self.f(fx).emit(
                            InstrKind::Send { chan: ch, value: v },
                            None,
                            cases[0].span,
                        );
                    }
                    CommOp::Recv {
                        key,
                        ok,
                        define,
                        chan,
                    } => self.recv_stmt(fx, key.as_ref(), ok.as_ref(), *define, chan),
                }
                let done = self.f(fx).new_basic_block("select.done");
                if let Some(name) = label {
                    let mut lb = self.f(fx).lblock(name);
                    lb.break_to = Some(done);
                    self.f(fx).set_lblock(name, lb);
                }
                self.f(fx).targets.push(TargetFrame {
                    break_to: Some(done),
                    ..TargetFrame::default()
                });
                self.stmt_list(fx, &cases[0].body);
                self.f(fx).targets.pop();
                self.emit_jump(fx, done);
                self.f(fx).current = Some(done);
                return;
            }
        }

        // Evaluate every channel (and send operand) in source order.
        let mut states = Vec::new();
        let mut blocking = true;
        for cc in cases {
            match &cc.comm {
                None => blocking = false,
                Some(CommOp::Send { chan, value }) => {
                    let elem = self.tables.types.elem(self.info().type_of(chan.id));
                    let ch = self.expr(fx, chan);
                    let v = self.expr(fx, value);
                    let v = self.emit_conv(fx, v, elem);
                    states.push(SelectState {
                        dir: ChanDir::SendOnly,
                        chan: ch,
                        send: Some(v),
                    });
                }
                Some(CommOp::Recv { chan, .. }) => {
                    let ch = self.expr(fx, chan);
                    states.push(SelectState {
                        dir: ChanDir::RecvOnly,
                        chan: ch,
                        send: None,
                    });
                }
            }
        }

        // Dispatch on the chosen index with a sequential if-else chain.
        let sel_ty = self.tables.types.tuple_of(vec![T_INT, T_EFACE, T_BOOL]);
        let triple = self.f(fx).emit(
            InstrKind::Select { states, blocking },
            Some(sel_ty),
            Span::point(0),
        );
        let idx = self.emit_extract(fx, triple, 0, T_INT);

        let done = self.f(fx).new_basic_block("select.done");
        if let Some(name) = label {
            let mut lb = self.f(fx).lblock(name);
            lb.break_to = Some(done);
            self.f(fx).set_lblock(name, lb);
        }

        let mut dflt_body: Option<&[Stmt]> = None;
        let mut state = 0i64;
        for cc in cases {
            let Some(comm) = &cc.comm else {
                dflt_body = Some(&cc.body);
                continue;
            };
            let body = self.f(fx).new_basic_block("select.body");
            let next = self.f(fx).new_basic_block("select.next");
            let k = self.int_lit(fx, state);
            let c = self.emit_compare(fx, BinaryOp::Eq, idx, k, cc.span);
            self.emit_if(fx, c, body, next);
            self.f(fx).current = Some(body);
            self.f(fx).targets.push(TargetFrame {
                break_to: Some(done),
                ..TargetFrame::default()
            });
            if let CommOp::Recv {
                key, ok, define, ..
            } = comm
            {
                if let Some(kident) = key.as_ref().filter(|k| !k.is_blank()) {
                    let lv = self.ident_lvalue(fx, kident, *define);
                    let recv = self.emit_extract(fx, triple, 1, T_EFACE);
                    let rv = self.emit_type_assert(fx, recv, lv.ty(), kident.span);
                    self.lv_store(fx, &lv, rv, kident.span);
                }
                if let Some(okident) = ok.as_ref().filter(|o| !o.is_blank()) {
                    let lv = self.ident_lvalue(fx, okident, *define);
                    let okv = self.emit_extract(fx, triple, 2, lv.ty());
                    self.lv_store(fx, &lv, okv, okident.span);
                }
            }
            self.stmt_list(fx, &cc.body);
            self.f(fx).targets.pop();
            self.emit_jump(fx, done);
            self.f(fx).current = Some(next);
            state += 1;
        }
        if let Some(db) = dflt_body {
            self.f(fx).targets.push(TargetFrame {
                break_to: Some(done),
                ..TargetFrame::default()
            });
            self.stmt_list(fx, db);
            self.f(fx).targets.pop();
        }
        self.emit_jump(fx, done);
        self.f(fx).current = Some(done);
    }

    /// `key, ok := <-chan` (and its shapes) as a plain statement.
    fn recv_stmt(
        &mut self,
        fx: Fx,
        key: Option<&Ident>,
        ok: Option<&Ident>,
        define: bool,
        chan: &Expr,
    ) {
        let elem = self.tables.types.elem(self.info().type_of(chan.id));
        let ch = self.expr(fx, chan);
        if let Some(okident) = ok {
            let ty = self.comma_ok_ty(elem);
            let tuple = self.f(fx).emit(
                InstrKind::UnOp {
                    op: UnOpKind::Recv,
                    x: ch,
                    comma_ok: true,
                },
                Some(ty),
                chan.span,
            );
            if let Some(kident) = key.filter(|k| !k.is_blank()) {
                let lv = self.ident_lvalue(fx, kident, define);
                let v = self.emit_extract(fx, tuple, 0, elem);
                self.lv_store(fx, &lv, v, kident.span);
            }
            if !okident.is_blank() {
                let lv = self.ident_lvalue(fx, okident, define);
                let v = self.emit_extract(fx, tuple, 1, T_BOOL);
                self.lv_store(fx, &lv, v, okident.span);
            }
        } else {
            let v = self.f(fx).emit(
                InstrKind::UnOp {
                    op: UnOpKind::Recv,
                    x: ch,
                    comma_ok: false,
                },
                Some(elem),
                chan.span,
            );
            if let Some(kident) = key.filter(|k| !k.is_blank()) {
                let lv = self.ident_lvalue(fx, kident, define);
                self.lv_store(fx, &lv, v, kident.span);
            }
        }
    }

    /// The location named by a bare ident, declaring it first for `:=`.
    fn ident_lvalue(&mut self, fx: Fx, ident: &Ident, define: bool) -> Lvalue {
        if ident.is_blank() {
            return Lvalue::Blank;
        }
        let obj = self.info().object_of(ident);
        let addr = if define {
            self.add_named_local(fx, obj, &ident.name)
        } else {
            match self.lookup(obj) {
                Some(v) => v,
                None => self.fn_lookup(fx, obj, false),
            }
        };
        self.address_of(fx, addr)
    }

    // ── for ──────────────────────────────────────────────────────

    fn for_stmt(
        &mut self,
        fx: Fx,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        post: Option<&Stmt>,
        body: &Block,
        label: Option<&str>,
    ) {
        //      ...init...
        //      jump loop
        // loop:
        //      if cond goto body else done
        // body:
        //      ...body...
        //      jump post                     (target of continue)
        // post:
        //      ...post...
        //      jump loop
        // done:                              (target of break)
        if let Some(init) = init {
            self.stmt(fx, init);
        }
        let body_b = self.f(fx).new_basic_block("for.body");
        let done = self.f(fx).new_basic_block("for.done");
        let loop_b = if cond.is_some() {
            self.f(fx).new_basic_block("for.loop")
        } else {
            body_b
        };
        let cont = if post.is_some() {
            self.f(fx).new_basic_block("for.post")
        } else {
            loop_b
        };
        if let Some(name) = label {
            let mut lb = self.f(fx).lblock(name);
            lb.break_to = Some(done);
            lb.continue_to = Some(cont);
            self.f(fx).set_lblock(name, lb);
        }
        self.emit_jump(fx, loop_b);
        self.f(fx).current = Some(loop_b);
        if loop_b != body_b {
            self.cond(fx, cond.unwrap(), body_b, done);
            self.f(fx).current = Some(body_b);
        }
        self.f(fx).targets.push(TargetFrame {
            break_to: Some(done),
            continue_to: Some(cont),
            fallthrough_to: None,
        });
        self.stmt_list(fx, &body.stmts);
        self.f(fx).targets.pop();
        self.emit_jump(fx, cont);

        if let Some(post) = post {
            self.f(fx).current = Some(cont);
            self.stmt(fx, post);
            self.emit_jump(fx, loop_b); // back-edge
        }
        self.f(fx).current = Some(done);
    }

    // ── range ────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn range_stmt(
        &mut self,
        fx: Fx,
        key: Option<&Expr>,
        value: Option<&Expr>,
        define: bool,
        x: &Expr,
        body: &Block,
        span: Span,
        label: Option<&str>,
    ) {
        let live_key = key.filter(|k| !ast::is_blank_expr(k));
        let live_value = value.filter(|v| !ast::is_blank_expr(v));
        let tk = live_key.map(|k| self.info().type_of(k.id));
        let tv = live_value.map(|v| self.info().type_of(v.id));

        // A range with := always declares fresh variables, once, outside
        // the loop.
        if define {
            for e in [live_key, live_value].into_iter().flatten() {
                let ExprKind::Ident(name) = &e.kind else {
                    panic!("range declaration target is not an ident");
                };
                let obj = *self
                    .info()
                    .uses
                    .get(&e.id)
                    .unwrap_or_else(|| panic!("no object for '{}'", name));
                let name = name.clone();
                self.add_named_local(fx, obj, &name);
            }
        }

        let xv = self.expr(fx, x);
        let xt = self.value_ty(fx, xv);
        let (k, v, loop_b, done) = match self.tables.types.under_kind(xt) {
            TypeKind::Slice(_) | TypeKind::Array { .. } | TypeKind::Pointer(_) => {
                self.range_indexed(fx, xv, tv, span)
            }
            TypeKind::Chan { .. } => self.range_chan(fx, xv, tk),
            TypeKind::Map { .. } | TypeKind::Str | TypeKind::UntypedStr => {
                self.range_iter(fx, xv, tk, tv, span)
            }
            kind => panic!("cannot range over {:?}", kind),
        };

        // Evaluate both target lvalues before updating either.
        let kl = live_key.map(|e| self.addr(fx, e, false));
        let vl = live_value.map(|e| self.addr(fx, e, false));
        if let Some(kl) = &kl {
            self.lv_store(fx, kl, k.expect("range produced no key"), span);
        }
        if let Some(vl) = &vl {
            self.lv_store(fx, vl, v.expect("range produced no value"), span);
        }

        if let Some(name) = label {
            let mut lb = self.f(fx).lblock(name);
            lb.break_to = Some(done);
            lb.continue_to = Some(loop_b);
            self.f(fx).set_lblock(name, lb);
        }
        self.f(fx).targets.push(TargetFrame {
            break_to: Some(done),
            continue_to: Some(loop_b),
            fallthrough_to: None,
        });
        self.stmt_list(fx, &body.stmts);
        self.f(fx).targets.pop();
        self.emit_jump(fx, loop_b); // back-edge
        self.f(fx).current = Some(done);
    }

    /// Integer-indexed loop over an array, *array or slice. Array lengths
    /// are static; everything else calls `len`.
    fn range_indexed(
        &mut self,
        fx: Fx,
        x: Value,
        tv: Option<TypeId>,
        span: Span,
    ) -> (Option<Value>, Option<Value>, BlockId, BlockId) {
        //      length = len(x)
        //      index = -1
        // loop:                              (target of continue)
        //      index++
        //      if index < length goto body else done
        // body:
        //      k = index
        //      v = x[index]
        //      ...body...
        //      jump loop
        // done:                              (target of break)
        let types = self.tables.types.clone();
        let xt = self.value_ty(fx, x);

        let length = if let TypeKind::Array { len, .. } = types.under_kind(types.deref(xt)) {
            // Static length: no data dependence on x.
            self.int_lit(fx, len)
        } else {
            let len_obj = self.tables.objects.universe("len").expect("len builtin");
            self.f(fx).emit(
                InstrKind::Call(CallCommon {
                    func: Some(Value::Builtin(len_obj)),
                    method: None,
                    recv: None,
                    args: vec![x],
                    has_ellipsis: false,
                }),
                Some(T_INT),
                span,
            )
        };

        let index = self.add_local(fx, T_INT, "rangeindex", span);
        let m1 = self.int_lit(fx, -1);
        self.emit_store(fx, index, m1, span);

        let loop_b = self.f(fx).new_basic_block("rangeindex.loop");
        self.emit_jump(fx, loop_b);
        self.f(fx).current = Some(loop_b);

        let cur = self.emit_load(fx, index);
        let one = self.int_lit(fx, 1);
        let incr = self
            .f(fx)
            .emit(InstrKind::BinOp {
                op: BinaryOp::Add,
                x: cur,
                y: one,
            }, Some(T_INT), span);
        self.emit_store(fx, index, incr, span);

        let body = self.f(fx).new_basic_block("rangeindex.body");
        let done = self.f(fx).new_basic_block("rangeindex.done");
        let cmp = self.emit_compare(fx, BinaryOp::Lt, incr, length, span);
        self.emit_if(fx, cmp, body, done);
        self.f(fx).current = Some(body);

        let k = self.emit_load(fx, index);
        let v = tv.map(|_| match types.under_kind(xt) {
            TypeKind::Array { elem, .. } => self.f(fx).emit(
                InstrKind::Index { x, index: k },
                Some(elem),
                span,
            ),
            TypeKind::Pointer(arr) => {
                let elem = types.elem(arr);
                let ia = self.f(fx).emit(
                    InstrKind::IndexAddr { x, index: k },
                    Some(types.pointer_to(elem)),
                    span,
                );
                self.emit_load(fx, ia)
            }
            TypeKind::Slice(elem) => {
                let ia = self.f(fx).emit(
                    InstrKind::IndexAddr { x, index: k },
                    Some(types.pointer_to(elem)),
                    span,
                );
                self.emit_load(fx, ia)
            }
            kind => panic!("range_indexed over {:?}", kind),
        });
        (Some(k), v, loop_b, done)
    }

    /// Range/Next iteration over a map or string.
    fn range_iter(
        &mut self,
        fx: Fx,
        x: Value,
        tk: Option<TypeId>,
        tv: Option<TypeId>,
        span: Span,
    ) -> (Option<Value>, Option<Value>, BlockId, BlockId) {
        //      it = range x
        // loop:                              (target of continue)
        //      okv = next it                 (ok, key, value)
        //      if okv.0 goto body else done
        // body:
        //      k = okv.1
        //      v = okv.2
        //      ...body...
        //      jump loop
        // done:                              (target of break)
        let types = self.tables.types.clone();
        // The invalid type marks an unwanted component.
        let tk_slot = tk.unwrap_or(T_INVALID);
        let tv_slot = tv.unwrap_or(T_INVALID);

        let it = self
            .f(fx)
            .emit(InstrKind::Range { x }, Some(crate::types::T_RANGE_ITER), span);

        let loop_b = self.f(fx).new_basic_block("rangeiter.loop");
        self.emit_jump(fx, loop_b);
        self.f(fx).current = Some(loop_b);

        let is_string = matches!(
            types.under_kind(self.value_ty(fx, x)),
            TypeKind::Str | TypeKind::UntypedStr
        );
        let okv_ty = types.tuple_of(vec![T_BOOL, tk_slot, tv_slot]);
        let okv = self.f(fx).emit(
            InstrKind::Next {
                iter: it,
                is_string,
            },
            Some(okv_ty),
            span,
        );

        let body = self.f(fx).new_basic_block("rangeiter.body");
        let done = self.f(fx).new_basic_block("rangeiter.done");
        let ok = self.emit_extract(fx, okv, 0, T_BOOL);
        self.emit_if(fx, ok, body, done);
        self.f(fx).current = Some(body);

        let k = tk.map(|t| self.emit_extract(fx, okv, 1, t));
        let v = tv.map(|t| self.emit_extract(fx, okv, 2, t));
        (k, v, loop_b, done)
    }

    /// Receive loop over a channel; stops when the comma-ok fails.
    fn range_chan(
        &mut self,
        fx: Fx,
        x: Value,
        tk: Option<TypeId>,
    ) -> (Option<Value>, Option<Value>, BlockId, BlockId) {
        let elem = self.tables.types.elem(self.value_ty(fx, x));
        let loop_b = self.f(fx).new_basic_block("rangechan.loop");
        self.emit_jump(fx, loop_b);
        self.f(fx).current = Some(loop_b);

        let ty = self.comma_ok_ty(elem);
        let ko = self.f(fx).emit(
            InstrKind::UnOp {
                op: UnOpKind::Recv,
                x,
                comma_ok: true,
            },
            Some(ty),
            Span::point(0),
        );
        let body = self.f(fx).new_basic_block("rangechan.body");
        let done = self.f(fx).new_basic_block("rangechan.done");
        let ok = self.emit_extract(fx, ko, 1, T_BOOL);
        self.emit_if(fx, ok, body, done);
        self.f(fx).current = Some(body);
        let k = tk.map(|t| self.emit_extract(fx, ko, 0, t));
        (k, None, loop_b, done)
    }
}
