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

// Expression lowering. `expr` yields a value, `addr` yields an lvalue; the
// two recurse through each other. `escaping` rides along `addr` and marks
// the base variable heap-allocated whenever the resulting pointer could
// outlive the frame: explicit `&x`, slicing an array, implicit receiver
// address-taking, and references from nested functions.

use std::collections::HashSet;

use crate::ast::{self, BinaryOp, Expr, ExprKind, Ident, Span, UnaryOp};
use crate::ir::{CallCommon, FuncRef, FuncSyntax, Function, InstrKind, UnOpKind, Value};
use crate::methods::{self, Id, MethodInfo};
use crate::types::{Field, SigData, TypeId, TypeKind, T_BYTE, T_EFACE, T_INT};

use super::{Fx, Lvalue, PackageBuilder};

impl PackageBuilder<'_> {
    /// Lower a single-result expression, returning the value it defines.
    pub fn expr(&mut self, fx: Fx, e: &Expr) -> Value {
        // The checker folded it? Done.
        if let Some(lit) = self.info().value_of(e.id) {
            return self.f(fx).lit(lit);
        }

        match &e.kind {
            ExprKind::Lit(_) => panic!("non-constant basic literal"),

            ExprKind::FuncLit {
                params,
                results,
                body,
            } => self.func_lit(fx, e, params, results, body),

            ExprKind::Paren(inner) => self.expr(fx, inner),

            ExprKind::TypeAssert { x, ty: Some(_) } => {
                let xv = self.expr(fx, x);
                let asserted = self.info().type_of(e.id);
                self.emit_type_assert(fx, xv, asserted, e.span)
            }
            ExprKind::TypeAssert { ty: None, .. } => {
                panic!("x.(type) outside a type switch")
            }

            ExprKind::Call { func, args, .. } => {
                let typ = self.info().type_of(e.id);
                if self.info().is_type(func, &self.tables.objects) {
                    // Explicit conversion T(x).
                    let x = self.expr(fx, &args[0]);
                    return self.emit_conv(fx, x, typ);
                }
                if let ExprKind::Ident(name) = &ast::unparen(func).kind {
                    let obj = self
                        .info()
                        .uses
                        .get(&ast::unparen(func).id)
                        .copied();
                    if obj.is_some_and(|o| self.tables.objects.is_builtin(o)) {
                        let name = name.clone();
                        if let Some(v) = self.builtin(fx, &name, args, typ, e.span) {
                            return v;
                        }
                    }
                }
                let c = self.set_call(fx, e);
                self.f(fx).emit(InstrKind::Call(c), Some(typ), e.span)
            }

            ExprKind::Unary { op, x } => match op {
                UnaryOp::Amp => self.addr(fx, x, true).addr(),
                UnaryOp::Plus => self.expr(fx, x),
                UnaryOp::Not | UnaryOp::Neg | UnaryOp::BitNot | UnaryOp::Recv => {
                    let uop = match op {
                        UnaryOp::Not => UnOpKind::Not,
                        UnaryOp::Neg => UnOpKind::Neg,
                        UnaryOp::BitNot => UnOpKind::BitNot,
                        _ => UnOpKind::Recv,
                    };
                    let xv = self.expr(fx, x);
                    let ty = self.info().type_of(e.id);
                    self.f(fx).emit(
                        InstrKind::UnOp {
                            op: uop,
                            x: xv,
                            comma_ok: false,
                        },
                        Some(ty),
                        e.span,
                    )
                }
            },

            ExprKind::Binary { op, x, y } => match op {
                BinaryOp::LAnd | BinaryOp::LOr => self.logical_binop(fx, e),
                op if op.is_comparison() => {
                    let xv = self.expr(fx, x);
                    let yv = self.expr(fx, y);
                    self.emit_compare(fx, *op, xv, yv, e.span)
                }
                op => {
                    let t = self.info().type_of(e.id);
                    let xv = self.expr(fx, x);
                    let yv = self.expr(fx, y);
                    self.emit_arith(fx, *op, xv, yv, t, e.span)
                }
            },

            ExprKind::SliceExpr { x, low, high } => {
                let xt = self.info().type_of(x.id);
                let xv = match self.tables.types.under_kind(xt) {
                    // Slicing an array takes its address; the slice outlives
                    // the value.
                    TypeKind::Array { .. } => self.addr(fx, x, true).addr(),
                    TypeKind::Str
                    | TypeKind::UntypedStr
                    | TypeKind::Slice(_)
                    | TypeKind::Pointer(_) => self.expr(fx, x),
                    k => panic!("cannot slice {:?}", k),
                };
                let hv = high.as_ref().map(|h| self.expr(fx, h));
                let lv = low.as_ref().map(|l| self.expr(fx, l));
                let ty = self.info().type_of(e.id);
                self.f(fx).emit(
                    InstrKind::Slice {
                        x: xv,
                        low: lv,
                        high: hv,
                    },
                    Some(ty),
                    e.span,
                )
            }

            ExprKind::Ident(name) => {
                let obj = *self
                    .info()
                    .uses
                    .get(&e.id)
                    .unwrap_or_else(|| panic!("unresolved ident '{}'", name));
                if let Some(v) = self.lookup(obj) {
                    return if self.obj_is_var(obj) {
                        self.emit_load(fx, v) // globals hold addresses
                    } else {
                        v
                    };
                }
                let local = self.fn_lookup(fx, obj, false);
                self.emit_load(fx, local)
            }

            ExprKind::Selector { x, sel } => {
                if let Some(obj) = self.info().is_package_ref(e, &self.tables.objects) {
                    let Some(v) = self.lookup(obj) else {
                        panic!("undefined package-qualified name '{}'", sel.name);
                    };
                    return if self.obj_is_var(obj) {
                        self.emit_load(fx, v)
                    } else {
                        v
                    };
                }

                // T.m / (*T).m: a method from T's method set.
                if self.info().is_type(x, &self.tables.objects) {
                    let pkg_path = self.pkg_path();
                    let id = Id::new(&sel.name, Some(&pkg_path));
                    let typ = self.info().type_of(x.id);
                    if let Some(m) = methods::method_set(self.tables, typ).get(&id) {
                        return Value::Func(m.func);
                    }
                    // T must be an interface: reify the method.
                    return Value::Func(methods::imethod_thunk(self.tables, typ, &id));
                }

                self.selector(fx, e, false, false)
            }

            ExprKind::Index { x, index } => {
                let xt = self.info().type_of(x.id);
                match self.tables.types.under_kind(xt) {
                    TypeKind::Array { elem, .. } => {
                        // An array value in a register.
                        let xv = self.expr(fx, x);
                        let iv = self.expr(fx, index);
                        let iv = self.emit_conv(fx, iv, T_INT);
                        self.f(fx).emit(
                            InstrKind::Index { x: xv, index: iv },
                            Some(elem),
                            e.span,
                        )
                    }
                    TypeKind::Map { key, value } => {
                        let xv = self.expr(fx, x);
                        let iv = self.expr(fx, index);
                        let iv = self.emit_conv(fx, iv, key);
                        self.f(fx).emit(
                            InstrKind::Lookup {
                                x: xv,
                                index: iv,
                                comma_ok: false,
                            },
                            Some(value),
                            e.span,
                        )
                    }
                    TypeKind::Str | TypeKind::UntypedStr => {
                        let xv = self.expr(fx, x);
                        let iv = self.expr(fx, index);
                        self.f(fx).emit(
                            InstrKind::Lookup {
                                x: xv,
                                index: iv,
                                comma_ok: false,
                            },
                            Some(T_BYTE),
                            e.span,
                        )
                    }
                    TypeKind::Slice(_) | TypeKind::Pointer(_) => {
                        let lv = self.addr(fx, e, false);
                        self.lv_load(fx, &lv)
                    }
                    k => panic!("unexpected container type in index: {:?}", k),
                }
            }

            ExprKind::CompositeLit { .. } | ExprKind::Star(_) => {
                let lv = self.addr(fx, e, false);
                self.lv_load(fx, &lv)
            }

            k => panic!("unexpected expression kind: {:?}", k),
        }
    }

    /// Lower an addressable expression to the location it denotes.
    pub fn addr(&mut self, fx: Fx, e: &Expr, escaping: bool) -> Lvalue {
        match &e.kind {
            ExprKind::Ident(name) => {
                let obj = *self
                    .info()
                    .uses
                    .get(&e.id)
                    .unwrap_or_else(|| panic!("unresolved ident '{}'", name));
                let v = match self.lookup(obj) {
                    Some(v) => v,
                    None => self.fn_lookup(fx, obj, escaping),
                };
                self.address_of(fx, v)
            }

            ExprKind::CompositeLit { .. } => {
                let t = self.tables.types.deref(self.info().type_of(e.id));
                let v = if escaping {
                    self.emit_new(fx, t, e.span)
                } else {
                    self.add_local(fx, t, "complit", e.span)
                };
                self.comp_lit(fx, v, e, t);
                self.address_of(fx, v)
            }

            ExprKind::Paren(inner) => self.addr(fx, inner, escaping),

            ExprKind::Selector { sel, .. } => {
                if let Some(obj) = self.info().is_package_ref(e, &self.tables.objects) {
                    let Some(v) = self.lookup(obj) else {
                        panic!("undefined package-qualified name '{}'", sel.name);
                    };
                    return self.address_of(fx, v);
                }
                let v = self.selector(fx, e, true, escaping);
                self.address_of(fx, v)
            }

            ExprKind::Index { x, index } => {
                let xt = self.info().type_of(x.id);
                let types = self.tables.types.clone();
                let (xv, et) = match types.under_kind(xt) {
                    TypeKind::Array { elem, .. } => {
                        (self.addr(fx, x, escaping).addr(), types.pointer_to(elem))
                    }
                    TypeKind::Pointer(arr) => {
                        let elem = types.elem(arr);
                        (self.expr(fx, x), types.pointer_to(elem))
                    }
                    TypeKind::Slice(elem) => (self.expr(fx, x), types.pointer_to(elem)),
                    TypeKind::Map { key, value } => {
                        let m = self.expr(fx, x);
                        let k = self.expr(fx, index);
                        let k = self.emit_conv(fx, k, key);
                        return Lvalue::Element {
                            map: m,
                            key: k,
                            ty: value,
                        };
                    }
                    k => panic!("unexpected container type in index: {:?}", k),
                };
                let iv = self.expr(fx, index);
                let iv = self.emit_conv(fx, iv, T_INT);
                let v = self.f(fx).emit(
                    InstrKind::IndexAddr { x: xv, index: iv },
                    Some(et),
                    e.span,
                );
                self.address_of(fx, v)
            }

            ExprKind::Star(x) => {
                let v = self.expr(fx, x);
                self.address_of(fx, v)
            }

            k => panic!("unexpected address expression: {:?}", k),
        }
    }

    /// Initialize `loc` with `e`, constructing composite literals in place
    /// when the destination is an address.
    pub fn expr_in_place(&mut self, fx: Fx, loc: &Lvalue, e: &Expr) {
        if let Lvalue::Address { addr, ty } = loc {
            if let ExprKind::CompositeLit { .. } = &e.kind {
                match self.tables.types.under_kind(*ty) {
                    TypeKind::Pointer(_) => {
                        // Implicit &T{...}: possibly escaping.
                        let ptr = self.addr(fx, e, true).addr();
                        self.emit_store(fx, *addr, ptr, e.span);
                        return;
                    }
                    TypeKind::Interface(_) => {
                        // Cannot initialize an interface cell in place;
                        // fall through to the copying store.
                    }
                    _ => {
                        self.comp_lit(fx, *addr, e, *ty);
                        return;
                    }
                }
            }
        }
        let v = self.expr(fx, e);
        self.lv_store(fx, loc, v, e.span);
    }

    // ── Function literals ────────────────────────────────────────

    fn func_lit(
        &mut self,
        fx: Fx,
        e: &Expr,
        params: &[Ident],
        results: &[Option<Ident>],
        body: &ast::Block,
    ) -> Value {
        let sig = self.info().type_of(e.id);
        let mut f2 = Function::new(
            format!("func@{}", e.span.start),
            sig,
            e.span,
            Some(self.pkg.id),
            Some(FuncSyntax {
                recv: None,
                params: params.to_vec(),
                results: results.to_vec(),
                body: Some(body.clone()),
            }),
        );
        f2.enclosing = Some(fx);
        let fx2 = self.pkg.funcs.len() as Fx;
        self.pkg.funcs.push(f2);
        let r = FuncRef::Decl(self.pkg.id, fx2);
        self.f(fx).anon.push(r);
        self.build_function(fx2);

        if self.ff(fx2).free_vars.is_empty() {
            return Value::Func(r);
        }
        let bindings: Vec<Value> = self
            .f(fx2)
            .free_vars
            .iter_mut()
            .map(|fv| fv.outer.take().expect("capture without outer value"))
            .collect();
        self.f(fx).emit(
            InstrKind::MakeClosure { func: r, bindings },
            Some(sig),
            e.span,
        )
    }

    // ── Selectors and fields ─────────────────────────────────────

    /// Evaluate selector `e` as a value, or as an address when `want_addr`.
    fn selector(&mut self, fx: Fx, e: &Expr, want_addr: bool, escaping: bool) -> Value {
        let ExprKind::Selector { x, sel } = &e.kind else {
            panic!("selector on non-selector expression");
        };
        let pkg_path = self.pkg_path();
        let id = Id::new(&sel.name, Some(&pkg_path));

        // Bound method closure x.m?
        if !want_addr {
            if let Some((m, recv)) = self.find_method(fx, x, &id) {
                let thunk = methods::bound_method_thunk(self.tables, m.func, m.sig);
                let ty = self.info().type_of(e.id);
                return self.f(fx).emit(
                    InstrKind::MakeClosure {
                        func: thunk,
                        bindings: vec![recv],
                    },
                    Some(ty),
                    e.span,
                );
            }
        }

        let base_t = self.tables.types.deref(self.info().type_of(x.id));
        let fields = self.tables.types.struct_fields(base_t);
        let field_ty = self.info().type_of(e.id);

        let (path, index) = match fields.iter().position(|f| methods::field_id(f) == id) {
            Some(i) => (Vec::new(), i as u32),
            None => self
                .find_promoted_field(&fields, &id)
                .unwrap_or_else(|| panic!("field not found, even with promotion: {}", sel.name)),
        };

        if want_addr {
            self.field_addr(fx, x, &path, index, field_ty, e.span, escaping)
        } else {
            self.field_expr(fx, x, &path, index, field_ty, e.span)
        }
    }

    /// Locate `base.id()`'s method and receiver, adjusting for unequal
    /// actual/formal pointerness. An entry found only in MS(*X) forces an
    /// implicit (escaping) address-take of the receiver.
    fn find_method(&mut self, fx: Fx, base: &Expr, id: &Id) -> Option<(MethodInfo, Value)> {
        let typ = self.info().type_of(base.id);
        if let Some(&m) = methods::method_set(self.tables, typ).get(id) {
            let aptr = self.tables.types.is_pointer(typ);
            let fptr = self
                .tables
                .types
                .is_pointer(self.tables.types.sig(m.sig).recv.expect("method receiver"));
            if aptr == fptr {
                let recv = self.expr(fx, base);
                return Some((m, recv));
            }
            // Actual is a pointer, formal is not: load a copy.
            let recv = self.expr(fx, base);
            let recv = self.emit_load(fx, recv);
            return Some((m, recv));
        }
        if !self.tables.types.is_pointer(typ) {
            let ptr_t = self.tables.types.pointer_to(typ);
            if let Some(&m) = methods::method_set(self.tables, ptr_t).get(id) {
                let recv = self.addr(fx, base, true).addr();
                return Some((m, recv));
            }
        }
        None
    }

    /// Promoted-field search: breadth-first over embedded structs,
    /// shallowest match wins; an equal-depth tie finds nothing.
    fn find_promoted_field(
        &self,
        fields: &[Field],
        id: &Id,
    ) -> Option<(Vec<(u32, TypeId)>, u32)> {
        let types = &self.tables.types;
        let mut visited: HashSet<TypeId> = HashSet::new();
        let mut level: Vec<(Vec<(u32, TypeId)>, Vec<Field>)> =
            vec![(Vec::new(), fields.to_vec())];

        loop {
            // Descend one embedding level, then search it.
            let mut next: Vec<(Vec<(u32, TypeId)>, Vec<Field>)> = Vec::new();
            for (path, fs) in &level {
                for (i, f) in fs.iter().enumerate() {
                    if !f.embedded {
                        continue;
                    }
                    let inner = types.deref(f.ty);
                    if !matches!(types.under_kind(inner), TypeKind::Struct(_)) {
                        continue;
                    }
                    if !visited.insert(inner) {
                        continue;
                    }
                    let mut p = path.clone();
                    p.push((i as u32, f.ty));
                    next.push((p, types.struct_fields(inner)));
                }
            }
            if next.is_empty() {
                return None;
            }
            let mut hits = Vec::new();
            for (path, fs) in &next {
                for (i, f) in fs.iter().enumerate() {
                    if methods::field_id(f) == *id {
                        hits.push((path.clone(), i as u32));
                    }
                }
            }
            match hits.len() {
                0 => level = next,
                1 => return hits.pop(),
                _ => return None, // ambiguous promotion
            }
        }
    }

    /// Address of field `index` reached through the implicit selections of
    /// `path` (outermost first) from `base`.
    fn field_addr(
        &mut self,
        fx: Fx,
        base: &Expr,
        path: &[(u32, TypeId)],
        index: u32,
        field_ty: TypeId,
        span: Span,
        escaping: bool,
    ) -> Value {
        let types = self.tables.types.clone();
        let x = if let Some(((fi, fty), rest)) = path.split_last() {
            match types.under_kind(*fty) {
                TypeKind::Struct(_) => {
                    self.field_addr(fx, base, rest, *fi, *fty, Span::point(0), escaping)
                }
                TypeKind::Pointer(_) => self.field_expr(fx, base, rest, *fi, *fty, Span::point(0)),
                k => panic!("embedded field is not struct or pointer: {:?}", k),
            }
        } else {
            match types.under_kind(self.info().type_of(base.id)) {
                TypeKind::Struct(_) => self.addr(fx, base, escaping).addr(),
                TypeKind::Pointer(_) => self.expr(fx, base),
                k => panic!("selector base is not struct or pointer: {:?}", k),
            }
        };
        self.f(fx).emit(
            InstrKind::FieldAddr { x, field: index },
            Some(types.pointer_to(field_ty)),
            span,
        )
    }

    /// Value of field `index` reached through `path` from `base`.
    fn field_expr(
        &mut self,
        fx: Fx,
        base: &Expr,
        path: &[(u32, TypeId)],
        index: u32,
        field_ty: TypeId,
        span: Span,
    ) -> Value {
        let types = self.tables.types.clone();
        let x = if let Some(((fi, fty), rest)) = path.split_last() {
            self.field_expr(fx, base, rest, *fi, *fty, Span::point(0))
        } else {
            self.expr(fx, base)
        };
        match types.under_kind(self.value_ty(fx, x)) {
            TypeKind::Struct(_) => self.f(fx).emit(
                InstrKind::Field { x, field: index },
                Some(field_ty),
                span,
            ),
            TypeKind::Pointer(_) => {
                let fa = self.f(fx).emit(
                    InstrKind::FieldAddr { x, field: index },
                    Some(types.pointer_to(field_ty)),
                    span,
                );
                self.emit_load(fx, fa)
            }
            k => panic!("field base is not struct or pointer: {:?}", k),
        }
    }

    // ── Composite literals ───────────────────────────────────────

    /// Length of the array implied by literal elements: 1 + the maximum of
    /// explicit (constant) keys and the running positional counter.
    fn array_len(&mut self, elts: &[Expr]) -> i64 {
        let mut max: i64 = -1;
        let mut i: i64 = -1;
        for e in elts {
            if let ExprKind::KeyValue { key, .. } = &e.kind {
                let lit = self
                    .info()
                    .value_of(key.id)
                    .unwrap_or_else(|| panic!("array literal key is not a constant"));
                i = lit.as_int();
            } else {
                i += 1;
            }
            if i > max {
                max = i;
            }
        }
        max + 1
    }

    /// Initialize composite literal `e` of type `typ` at address `addr`,
    /// recursing in place for nested literals.
    pub fn comp_lit(&mut self, fx: Fx, addr: Value, e: &Expr, typ: TypeId) {
        let ExprKind::CompositeLit { elts } = &e.kind else {
            panic!("comp_lit on non-composite expression");
        };
        let types = self.tables.types.clone();
        match types.under_kind(typ) {
            TypeKind::Struct(fields) => {
                for (pos, elt) in elts.iter().enumerate() {
                    let (field_index, value) = match &elt.kind {
                        ExprKind::KeyValue { key, value } => {
                            let ExprKind::Ident(fname) = &ast::unparen(key).kind else {
                                panic!("struct literal key is not a field name");
                            };
                            let i = fields
                                .iter()
                                .position(|f| &f.name == fname)
                                .unwrap_or_else(|| panic!("no field '{}' in struct", fname));
                            (i, value.as_ref())
                        }
                        _ => (pos, elt),
                    };
                    let fty = fields[field_index].ty;
                    let faddr = self.f(fx).emit(
                        InstrKind::FieldAddr {
                            x: addr,
                            field: field_index as u32,
                        },
                        Some(types.pointer_to(fty)),
                        elt.span,
                    );
                    let loc = Lvalue::Address {
                        addr: faddr,
                        ty: fty,
                    };
                    self.expr_in_place(fx, &loc, value);
                }
            }

            TypeKind::Array { .. } | TypeKind::Slice(_) => {
                let (elem, at, array) = match types.under_kind(typ) {
                    TypeKind::Slice(elem) => {
                        let n = self.array_len(elts);
                        let at = types.array_of(elem, n);
                        let array = self.emit_new(fx, at, e.span);
                        (elem, at, array)
                    }
                    TypeKind::Array { elem, .. } => (elem, typ, addr),
                    _ => unreachable!(),
                };
                let mut idx: i64 = -1;
                for elt in elts {
                    let value = match &elt.kind {
                        ExprKind::KeyValue { key, value } => {
                            idx = self
                                .info()
                                .value_of(key.id)
                                .unwrap_or_else(|| panic!("array literal key is not a constant"))
                                .as_int();
                            value.as_ref()
                        }
                        _ => {
                            idx += 1;
                            elt
                        }
                    };
                    let iv = self.int_lit(fx, idx);
                    let iaddr = self.f(fx).emit(
                        InstrKind::IndexAddr {
                            x: array,
                            index: iv,
                        },
                        Some(types.pointer_to(elem)),
                        elt.span,
                    );
                    let loc = Lvalue::Address {
                        addr: iaddr,
                        ty: elem,
                    };
                    self.expr_in_place(fx, &loc, value);
                }
                if at != typ {
                    // A slice literal: wrap the backing array.
                    let s = self.f(fx).emit(
                        InstrKind::Slice {
                            x: array,
                            low: None,
                            high: None,
                        },
                        Some(typ),
                        e.span,
                    );
                    self.emit_store(fx, addr, s, e.span);
                }
            }

            TypeKind::Map { key, value } => {
                let reserve = self.int_lit(fx, elts.len() as i64);
                let m = self.f(fx).emit(
                    InstrKind::MakeMap {
                        reserve: Some(reserve),
                    },
                    Some(typ),
                    e.span,
                );
                self.emit_store(fx, addr, m, e.span);
                for elt in elts {
                    let ExprKind::KeyValue { key: k, value: v } = &elt.kind else {
                        panic!("map literal element without key");
                    };
                    let kv = self.expr(fx, k);
                    let kv = self.emit_conv(fx, kv, key);
                    let vv = self.expr(fx, v);
                    let vv = self.emit_conv(fx, vv, value);
                    self.f(fx).emit(
                        InstrKind::MapUpdate {
                            map: m,
                            key: kv,
                            value: vv,
                        },
                        None,
                        elt.span,
                    );
                }
            }

            TypeKind::Pointer(_) => {
                // addr() strips the pointer before recursing, so space is
                // allocated for a T, never a *T.
                panic!("composite literal of pointer type")
            }

            k => panic!("unexpected composite literal type: {:?}", k),
        }
    }

    // ── Builtins ─────────────────────────────────────────────────

    /// Special-cased builtins. None means the call should be lowered like
    /// an ordinary function call (of the Builtin value).
    fn builtin(
        &mut self,
        fx: Fx,
        name: &str,
        args: &[Expr],
        typ: TypeId,
        span: Span,
    ) -> Option<Value> {
        let types = self.tables.types.clone();
        match name {
            "make" => match types.under_kind(typ) {
                TypeKind::Slice(_) => {
                    let n = self.expr(fx, &args[1]);
                    let n = self.emit_conv(fx, n, T_INT);
                    let m = if args.len() == 3 {
                        let m = self.expr(fx, &args[2]);
                        self.emit_conv(fx, m, T_INT)
                    } else {
                        n
                    };
                    Some(
                        self.f(fx)
                            .emit(InstrKind::MakeSlice { len: n, cap: m }, Some(typ), span),
                    )
                }
                TypeKind::Map { .. } => {
                    let reserve = if args.len() == 2 {
                        let r = self.expr(fx, &args[1]);
                        Some(self.emit_conv(fx, r, T_INT))
                    } else {
                        None
                    };
                    Some(
                        self.f(fx)
                            .emit(InstrKind::MakeMap { reserve }, Some(typ), span),
                    )
                }
                TypeKind::Chan { .. } => {
                    let size = if args.len() == 2 {
                        let s = self.expr(fx, &args[1]);
                        self.emit_conv(fx, s, T_INT)
                    } else {
                        self.int_lit(fx, 0)
                    };
                    Some(
                        self.f(fx)
                            .emit(InstrKind::MakeChan { size }, Some(typ), span),
                    )
                }
                k => panic!("cannot make {:?}", k),
            },

            "new" => Some(self.emit_new(fx, types.deref(typ), span)),

            "len" | "cap" => {
                // len/cap of an array or *array is a property of the type,
                // not the value; the operand is still evaluated for its
                // effects.
                let t = types.deref(self.info().type_of(args[0].id));
                if let TypeKind::Array { len, .. } = types.under_kind(t) {
                    self.expr(fx, &args[0]);
                    return Some(self.int_lit(fx, len));
                }
                None
            }

            "panic" => {
                let x = self.expr(fx, &args[0]);
                let x = self.emit_conv(fx, x, T_EFACE);
                self.emit_panic(fx, x, span);
                let unreachable = self.f(fx).new_basic_block("unreachable");
                self.f(fx).current = Some(unreachable);
                // Any value will do; nothing can use it.
                Some(self.f(fx).lit(crate::oracle::Lit::bool(false)))
            }

            _ => None, // append, copy, delete, close, print: ordinary calls
        }
    }

    // ── Calls ────────────────────────────────────────────────────

    /// Populate the callee parts of a call: static function, builtin,
    /// method (with receiver adjustment), function-typed field, or
    /// interface dispatch.
    fn set_call_func(&mut self, fx: Fx, e: &Expr, c: &mut CallCommon) {
        let ExprKind::Call { func, ellipsis, .. } = &e.kind else {
            panic!("set_call_func on non-call");
        };
        c.has_ellipsis = *ellipsis;
        let fun = ast::unparen(func);

        let ExprKind::Selector { x, sel } = &fun.kind else {
            // Case 0: an ordinary function value.
            c.func = Some(self.expr(fx, fun));
            return;
        };

        // Case 1: x.F() where x is a package.
        if let Some(obj) = self.info().is_package_ref(fun, &self.tables.objects) {
            let Some(mut v) = self.lookup(obj) else {
                panic!("undefined package-qualified name '{}'", sel.name);
            };
            if self.obj_is_var(obj) {
                v = self.emit_load(fx, v);
            }
            c.func = Some(v);
            return;
        }

        // Case 2a: T.m() or (*T).m(): a method expression called directly.
        if self.info().is_type(x, &self.tables.objects) {
            c.func = Some(self.expr(fx, fun));
            return;
        }

        let pkg_path = self.pkg_path();
        let id = Id::new(&sel.name, Some(&pkg_path));

        // Case 2: x.m(): static dispatch through MS(X) or MS(*X).
        if let Some((m, recv)) = self.find_method(fx, x, &id) {
            c.func = Some(Value::Func(m.func));
            c.args.push(recv);
            return;
        }

        match self.tables.types.under_kind(self.info().type_of(x.id)) {
            // Case 3: a function-typed struct field; an ordinary call.
            TypeKind::Struct(_) | TypeKind::Pointer(_) => {
                c.func = Some(self.expr(fx, fun));
            }
            // Case 4: dynamic dispatch on an interface method.
            TypeKind::Interface(_) => {
                let iface = self.info().type_of(x.id);
                let (index, _) = methods::interface_method_index(self.tables, iface, &id)
                    .unwrap_or_else(|| panic!("interface has no method '{}'", sel.name));
                c.method = Some(index);
                c.recv = Some(self.expr(fx, x));
            }
            k => panic!("illegal receiver type for call of '{}': {:?}", sel.name, k),
        }
    }

    /// Evaluate and marshal actual parameters against `sig`: flatten a sole
    /// multi-result argument, apply assignability conversions, and build
    /// the variadic slice when the call site has no `...`.
    fn emit_call_args(
        &mut self,
        fx: Fx,
        sig: &SigData,
        arg_exprs: &[Expr],
        ellipsis: bool,
        span: Span,
        mut args: Vec<Value>,
    ) -> Vec<Value> {
        let types = self.tables.types.clone();

        if ellipsis {
            // f(x, y, zs...): pass the slice straight through.
            for (i, arg) in arg_exprs.iter().enumerate() {
                let mut t = sig.params[i];
                if sig.variadic && i == sig.params.len() - 1 {
                    t = types.slice_of(t);
                }
                let v = self.expr(fx, arg);
                args.push(self.emit_conv(fx, v, t));
            }
            return args;
        }

        let offset = args.len(); // 1 when the call has a receiver

        // f(g()) with g multi-result: flatten the tuple.
        for arg in arg_exprs {
            let v = self.expr(fx, arg);
            if let TypeKind::Tuple(elems) = types.kind(self.value_ty(fx, v)) {
                for (i, &et) in elems.iter().enumerate() {
                    let x = self.emit_extract(fx, v, i as u32, et);
                    args.push(x);
                }
            } else {
                args.push(v);
            }
        }

        let np = sig.params.len() - usize::from(sig.variadic);
        for i in 0..np {
            args[offset + i] = self.emit_conv(fx, args[offset + i], sig.params[i]);
        }

        if sig.variadic {
            let varargs = args.split_off(offset + np);
            let vt = sig.params[np];
            let st = types.slice_of(vt);
            if varargs.is_empty() {
                let nil = self.nil_lit(fx, st);
                args.push(nil);
            } else {
                // A fresh backing array, one store per tail argument, and a
                // slice of the whole thing.
                let at = types.array_of(vt, varargs.len() as i64);
                let a = self.emit_new(fx, at, span);
                for (i, arg) in varargs.into_iter().enumerate() {
                    let iv = self.int_lit(fx, i as i64);
                    let iaddr = self.f(fx).emit(
                        InstrKind::IndexAddr { x: a, index: iv },
                        Some(types.pointer_to(vt)),
                        span,
                    );
                    self.emit_store(fx, iaddr, arg, span);
                }
                let s = self.f(fx).emit(
                    InstrKind::Slice {
                        x: a,
                        low: None,
                        high: None,
                    },
                    Some(st),
                    span,
                );
                args.push(s);
            }
        }
        args
    }

    /// Evaluate the whole call expression into a CallCommon.
    pub fn set_call(&mut self, fx: Fx, e: &Expr) -> CallCommon {
        let ExprKind::Call {
            func,
            args,
            ellipsis,
        } = &e.kind
        else {
            panic!("set_call on non-call");
        };
        let mut c = CallCommon {
            func: None,
            method: None,
            recv: None,
            args: Vec::new(),
            has_ellipsis: *ellipsis,
        };
        self.set_call_func(fx, e, &mut c);

        let fun_t = self.info().type_of(ast::unparen(func).id);
        let sig = match self.tables.types.under_kind(fun_t) {
            TypeKind::Signature(s) => s,
            _ => self.builtin_call_signature(e),
        };
        c.args = self.emit_call_args(fx, &sig, args, *ellipsis, e.span, c.args);
        c
    }

    /// The effective signature of a builtin lowered as an ordinary call:
    /// each parameter at its argument's default type.
    fn builtin_call_signature(&self, e: &Expr) -> SigData {
        let ExprKind::Call { args, .. } = &e.kind else {
            panic!("builtin_call_signature on non-call");
        };
        let types = &self.tables.types;
        let params = args
            .iter()
            .map(|a| types.default_type(self.info().type_of(a.id)))
            .collect();
        SigData {
            recv: None,
            params,
            results: vec![self.info().type_of(e.id)],
            variadic: false,
        }
    }
}
