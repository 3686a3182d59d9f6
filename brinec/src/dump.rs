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

// Human-readable rendering of packages and functions, for the LOG_* modes
// and debugging sessions. The format is not part of any contract.

use std::fmt::Write;

use crate::ir::{CallCommon, Function, InstrKind, UnOpKind, Value};
use crate::oracle::ConstValue;
use crate::prog::{Member, Package};
use crate::types::TypeStore;

fn val(f: &Function, v: Value) -> String {
    match v {
        Value::Instr(i) => format!("t{}", i.0),
        Value::Param(i) => {
            let p = &f.params[i as usize];
            if p.name.is_empty() {
                format!("p{}", i)
            } else {
                p.name.clone()
            }
        }
        Value::Capture(i) => format!("cap{}", i),
        Value::Lit(l) => match &f.lits[l.0 as usize].value {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Int(v) => v.to_string(),
            ConstValue::Float(v) => v.to_string(),
            ConstValue::Str(s) => format!("{:?}", s),
            ConstValue::Nil => "nil".to_string(),
        },
        Value::Global(g) => format!("g{}.{}", g.pkg.0, g.index),
        Value::Func(r) => format!("fn<{:?}>", r),
        Value::Builtin(o) => format!("builtin#{}", o.0),
    }
}

fn call_str(f: &Function, c: &CallCommon) -> String {
    let args: Vec<String> = c.args.iter().map(|&a| val(f, a)).collect();
    match (&c.func, c.method) {
        (Some(callee), _) => format!("{}({})", val(f, *callee), args.join(", ")),
        (None, Some(m)) => format!(
            "invoke {}.[{}]({})",
            c.recv.map(|r| val(f, r)).unwrap_or_default(),
            m,
            args.join(", ")
        ),
        _ => format!("?({})", args.join(", ")),
    }
}

fn instr_str(f: &Function, types: &TypeStore, kind: &InstrKind) -> String {
    use InstrKind::*;
    match kind {
        Alloc { name, heap } => format!(
            "{} ({})",
            if *heap { "new" } else { "local" },
            name
        ),
        Phi { edges, comment } => {
            let es: Vec<String> = edges.iter().map(|&e| val(f, e)).collect();
            format!("phi [{}] #{}", es.join(", "), comment)
        }
        BinOp { op, x, y } => format!("{:?} {} {}", op, val(f, *x), val(f, *y)),
        UnOp { op, x, comma_ok } => {
            let sigil = match op {
                UnOpKind::Not => "!",
                UnOpKind::Neg => "-",
                UnOpKind::BitNot => "^",
                UnOpKind::Recv => "<-",
                UnOpKind::Deref => "*",
            };
            format!("{}{}{}", sigil, val(f, *x), if *comma_ok { ",ok" } else { "" })
        }
        Convert { x } => format!("convert {}", val(f, *x)),
        ChangeType { x } => format!("changetype {}", val(f, *x)),
        MakeInterface { x } => format!("make interface <- {}", val(f, *x)),
        ChangeInterface { x } => format!("change interface {}", val(f, *x)),
        MakeClosure { func, bindings } => {
            let bs: Vec<String> = bindings.iter().map(|&b| val(f, b)).collect();
            format!("make closure fn<{:?}> [{}]", func, bs.join(", "))
        }
        MakeMap { reserve } => format!(
            "make map{}",
            reserve.map(|r| format!(" reserve {}", val(f, r))).unwrap_or_default()
        ),
        MakeSlice { len, cap } => format!("make slice {} {}", val(f, *len), val(f, *cap)),
        MakeChan { size } => format!("make chan {}", val(f, *size)),
        Field { x, field } => format!("{}.[{}]", val(f, *x), field),
        FieldAddr { x, field } => format!("&{}.[{}]", val(f, *x), field),
        Index { x, index } => format!("{}[{}]", val(f, *x), val(f, *index)),
        IndexAddr { x, index } => format!("&{}[{}]", val(f, *x), val(f, *index)),
        Lookup { x, index, comma_ok } => format!(
            "{}[{}]{}",
            val(f, *x),
            val(f, *index),
            if *comma_ok { ",ok" } else { "" }
        ),
        Slice { x, low, high } => format!(
            "slice {}[{}:{}]",
            val(f, *x),
            low.map(|l| val(f, l)).unwrap_or_default(),
            high.map(|h| val(f, h)).unwrap_or_default()
        ),
        Range { x } => format!("range {}", val(f, *x)),
        Next { iter, is_string } => format!(
            "next {}{}",
            val(f, *iter),
            if *is_string { " string" } else { "" }
        ),
        Select { states, blocking } => format!(
            "select {} [{} states]",
            if *blocking { "blocking" } else { "nonblocking" },
            states.len()
        ),
        TypeAssert {
            x,
            asserted,
            comma_ok,
        } => format!(
            "typeassert{} {} <{}>",
            if *comma_ok { ",ok" } else { "" },
            val(f, *x),
            types.type_string(*asserted)
        ),
        Extract { tuple, index } => format!("extract {} #{}", val(f, *tuple), index),
        Call(c) => call_str(f, c),
        Go(c) => format!("go {}", call_str(f, c)),
        Defer(c) => format!("defer {}", call_str(f, c)),
        Store { addr, value } => format!("*{} = {}", val(f, *addr), val(f, *value)),
        MapUpdate { map, key, value } => {
            format!("{}[{}] = {}", val(f, *map), val(f, *key), val(f, *value))
        }
        Send { chan, value } => format!("send {} <- {}", val(f, *chan), val(f, *value)),
        RunDefers => "rundefers".to_string(),
        Jump(b) => format!("jump {}", b.0),
        If {
            cond,
            then_b,
            else_b,
        } => format!("if {} goto {} else {}", val(f, *cond), then_b.0, else_b.0),
        Ret(vals) => {
            let vs: Vec<String> = vals.iter().map(|&v| val(f, v)).collect();
            format!("ret {}", vs.join(", "))
        }
        Panic(x) => format!("panic {}", val(f, *x)),
    }
}

/// Render one function's SSA body.
pub fn function_to_string(f: &Function, types: &TypeStore) -> String {
    let mut out = String::new();
    let params: Vec<String> = f
        .params
        .iter()
        .map(|p| format!("{} {}", p.name, types.type_string(p.ty)))
        .collect();
    let _ = writeln!(out, "func {}({}):", f.name, params.join(", "));
    for (bi, b) in f.blocks.iter().enumerate() {
        let _ = writeln!(out, "{}:\t\t\t; {}", bi, b.name);
        for &iid in &b.instrs {
            let instr = f.instr(iid);
            let rendered = instr_str(f, types, &instr.kind);
            match instr.ty {
                Some(t) => {
                    let _ = writeln!(
                        out,
                        "\tt{} = {} : {}",
                        iid.0,
                        rendered,
                        types.type_string(t)
                    );
                }
                None => {
                    let _ = writeln!(out, "\t{}", rendered);
                }
            }
        }
    }
    out
}

/// Render a package's member inventory.
pub fn package_to_string(pkg: &Package, types: &TypeStore) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "package {}:", pkg.path);
    for (name, member) in &pkg.members {
        match member {
            Member::Func(i) => {
                let f = &pkg.funcs[*i as usize];
                let _ = writeln!(out, "  func  {} {}", name, types.type_string(f.sig));
            }
            Member::Global(i) => {
                let g = &pkg.globals[*i as usize];
                let _ = writeln!(out, "  var   {} {}", name, types.type_string(g.ty));
            }
            Member::Const { lit } => {
                let _ = writeln!(out, "  const {} {}", name, types.type_string(lit.ty));
            }
            Member::Type { ty, methods, .. } => {
                let _ = writeln!(
                    out,
                    "  type  {} {} ({} methods)",
                    name,
                    types.type_string(types.underlying(*ty)),
                    methods.len()
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::oracle::Lit;
    use crate::types::{SigData, T_INT};

    #[test]
    fn renders_blocks_and_values() {
        let types = TypeStore::new();
        let sig = types.sig_of(SigData::func(vec![], vec![T_INT]));
        let mut f = Function::new("f", sig, Span::point(0), None, None);
        f.start_body();
        let one = f.lit(Lit::int(1));
        let two = f.lit(Lit::int(2));
        let sum = f.emit(
            InstrKind::BinOp {
                op: crate::ast::BinaryOp::Add,
                x: one,
                y: two,
            },
            Some(T_INT),
            Span::point(0),
        );
        f.emit(InstrKind::Ret(vec![sum]), None, Span::point(0));
        f.finish_body();

        let s = function_to_string(&f, &types);
        assert!(s.contains("func f()"), "{}", s);
        assert!(s.contains("Add 1 2"), "{}", s);
        assert!(s.contains("ret t0"), "{}", s);
    }
}
