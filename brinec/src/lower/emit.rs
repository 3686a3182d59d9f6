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

// Primitive instruction construction: the closed vocabulary the expression
// and statement lowerers build everything from. Each helper owns one
// instruction shape and its type rule.

use crate::ast::{BinaryOp, Span};
use crate::ir::{BlockId, InstrKind, UnOpKind, Value};
use crate::oracle::{ConstValue, Lit};
use crate::types::{TypeId, T_BOOL, T_EFACE, T_STR};

use super::{Fx, PackageBuilder};

impl PackageBuilder<'_> {
    /// Terminate the current block with an unconditional transfer.
    pub fn emit_jump(&mut self, fx: Fx, target: BlockId) {
        let from = self.ff(fx).current_block();
        self.f(fx).emit(InstrKind::Jump(target), None, Span::point(0));
        self.f(fx).add_edge(from, target);
        self.f(fx).current = None;
    }

    /// Terminate the current block with a two-way branch.
    pub fn emit_if(&mut self, fx: Fx, cond: Value, t: BlockId, e: BlockId) {
        let from = self.ff(fx).current_block();
        self.f(fx).emit(
            InstrKind::If {
                cond,
                then_b: t,
                else_b: e,
            },
            None,
            Span::point(0),
        );
        self.f(fx).add_edge(from, t);
        self.f(fx).add_edge(from, e);
        self.f(fx).current = None;
    }

    /// Read through a pointer value.
    pub fn emit_load(&mut self, fx: Fx, addr: Value) -> Value {
        let ty = self.tables.types.deref(self.value_ty(fx, addr));
        self.f(fx).emit(
            InstrKind::UnOp {
                op: UnOpKind::Deref,
                x: addr,
                comma_ok: false,
            },
            Some(ty),
            Span::point(0),
        )
    }

    /// Write through a pointer value, converting for assignability.
    pub fn emit_store(&mut self, fx: Fx, addr: Value, v: Value, span: Span) -> Value {
        let pointee = self.tables.types.deref(self.value_ty(fx, addr));
        let v = self.emit_conv(fx, v, pointee);
        self.f(fx)
            .emit(InstrKind::Store { addr, value: v }, None, span)
    }

    /// The least-cost conversion of `v` to `dst`: identity, a re-typed
    /// untyped constant, ChangeType for a shared underlying type,
    /// MakeInterface / ChangeInterface at interface boundaries, or Convert.
    pub fn emit_conv(&mut self, fx: Fx, v: Value, dst: TypeId) -> Value {
        let src = self.value_ty(fx, v);
        if src == dst {
            return v;
        }
        let types = self.tables.types.clone();

        // Untyped constants specialize by re-typing.
        if let Some(lit) = self.lit_of(fx, v) {
            if types.is_untyped(lit.ty) {
                if matches!(lit.value, ConstValue::Nil) {
                    return self.f(fx).lit(lit.retyped(dst));
                }
                if types.is_interface(dst) {
                    // A constant enters an interface at its default type.
                    let def = types.default_type(lit.ty);
                    let tv = self.f(fx).lit(lit.retyped(def));
                    return self.f(fx).emit(
                        InstrKind::MakeInterface { x: tv },
                        Some(dst),
                        Span::point(0),
                    );
                }
                return self.f(fx).lit(lit.retyped(dst));
            }
        }

        if types.is_interface(dst) {
            let kind = if types.is_interface(src) {
                InstrKind::ChangeInterface { x: v }
            } else {
                InstrKind::MakeInterface { x: v }
            };
            return self.f(fx).emit(kind, Some(dst), Span::point(0));
        }

        if types.underlying(src) == types.underlying(dst) {
            return self
                .f(fx)
                .emit(InstrKind::ChangeType { x: v }, Some(dst), Span::point(0));
        }

        self.f(fx)
            .emit(InstrKind::Convert { x: v }, Some(dst), Span::point(0))
    }

    /// An arithmetic/bitwise binop of type `t`. Shift counts keep their own
    /// width; all other operands convert to `t`.
    pub fn emit_arith(
        &mut self,
        fx: Fx,
        op: BinaryOp,
        x: Value,
        y: Value,
        t: TypeId,
        span: Span,
    ) -> Value {
        let (x, y) = match op {
            BinaryOp::Shl | BinaryOp::Shr => (self.emit_conv(fx, x, t), y),
            _ => {
                let x = self.emit_conv(fx, x, t);
                let y = self.emit_conv(fx, y, t);
                (x, y)
            }
        };
        self.f(fx)
            .emit(InstrKind::BinOp { op, x, y }, Some(t), span)
    }

    /// A comparison; mixed-type operands meet at the typed side (or at the
    /// interface side).
    pub fn emit_compare(&mut self, fx: Fx, op: BinaryOp, x: Value, y: Value, span: Span) -> Value {
        let types = self.tables.types.clone();
        let xt = self.value_ty(fx, x);
        let yt = self.value_ty(fx, y);
        let (x, y) = if xt == yt {
            (x, y)
        } else if types.is_untyped(xt) {
            (self.emit_conv(fx, x, yt), y)
        } else if types.is_untyped(yt) {
            (x, self.emit_conv(fx, y, xt))
        } else if types.is_interface(xt) && !types.is_interface(yt) {
            (x, self.emit_conv(fx, y, xt))
        } else if types.is_interface(yt) && !types.is_interface(xt) {
            (self.emit_conv(fx, x, yt), y)
        } else {
            (x, y)
        };
        self.f(fx)
            .emit(InstrKind::BinOp { op, x, y }, Some(T_BOOL), span)
    }

    /// The comma-ok form of a type test: a (value, ok) tuple.
    pub fn emit_type_test(&mut self, fx: Fx, x: Value, t: TypeId, span: Span) -> Value {
        let ty = self.comma_ok_ty(t);
        self.f(fx).emit(
            InstrKind::TypeAssert {
                x,
                asserted: t,
                comma_ok: true,
            },
            Some(ty),
            span,
        )
    }

    /// The single-result form of a type assertion: tests, branches, and
    /// panics on failure; yields the asserted value on the success path.
    pub fn emit_type_assert(&mut self, fx: Fx, x: Value, t: TypeId, span: Span) -> Value {
        let yok = self.emit_type_test(fx, x, t, span);
        let ok = self.emit_extract(fx, yok, 1, T_BOOL);
        let succ = self.f(fx).new_basic_block("typeassert.ok");
        let fail = self.f(fx).new_basic_block("typeassert.fail");
        self.emit_if(fx, ok, succ, fail);

        self.f(fx).current = Some(fail);
        let msg = self
            .f(fx)
            .lit(Lit::new(ConstValue::Str("type assertion failed".to_string()), T_STR));
        let iface = self.emit_conv(fx, msg, T_EFACE);
        self.emit_panic(fx, iface, span);

        self.f(fx).current = Some(succ);
        self.emit_extract(fx, yok, 0, t)
    }

    /// Project one element of a multi-result value.
    pub fn emit_extract(&mut self, fx: Fx, tuple: Value, index: u32, ty: TypeId) -> Value {
        self.f(fx).emit(
            InstrKind::Extract { tuple, index },
            Some(ty),
            Span::point(0),
        )
    }

    /// A heap allocation; the value is the new cell's address.
    pub fn emit_new(&mut self, fx: Fx, t: TypeId, span: Span) -> Value {
        let ty = self.tables.types.pointer_to(t);
        self.f(fx).emit(
            InstrKind::Alloc {
                name: "new".to_string(),
                heap: true,
            },
            Some(ty),
            span,
        )
    }

    /// A stack slot whose address may later be marked escaping.
    pub fn add_local(&mut self, fx: Fx, t: TypeId, name: &str, span: Span) -> Value {
        let ty = self.tables.types.pointer_to(t);
        let v = self.f(fx).emit(
            InstrKind::Alloc {
                name: name.to_string(),
                heap: false,
            },
            Some(ty),
            span,
        );
        if let Value::Instr(i) = v {
            self.f(fx).locals.push(i);
        }
        v
    }

    /// Terminate with a panic; the block has no successors.
    pub fn emit_panic(&mut self, fx: Fx, x: Value, span: Span) {
        self.f(fx).emit(InstrKind::Panic(x), None, span);
        self.f(fx).current = None;
    }
}
