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

// Optional well-formedness verifier over built functions. It checks block
// and edge shape, phi arity and type agreement, same-block def-before-use
// ordering, and the per-variant type rules that can be decided from one
// function alone. Failures are caller bugs; when the mode bit is set the
// builder aborts on the first one.

use crate::ir::{BlockId, Function, InstrId, InstrKind, UnOpKind, Value};
use crate::prog::Program;
use crate::types::{TypeKind, TypeStore, T_BOOL};

fn err(name: &str, block: usize, msg: impl Into<String>) -> String {
    format!("{}: block {}: {}", name, block, msg.into())
}

/// Verify one function. `name` qualifies messages.
pub fn check_function(f: &Function, types: &TypeStore, name: &str) -> Result<(), String> {
    if f.blocks.is_empty() {
        return Ok(()); // external or unbuilt function
    }
    if !f.blocks[0].preds.is_empty() {
        return Err(format!("{}: entry block has predecessors", name));
    }

    let in_range = |v: Value| -> Result<(), String> {
        let ok = match v {
            Value::Instr(i) => (i.0 as usize) < f.instrs.len(),
            Value::Param(i) => (i as usize) < f.params.len(),
            Value::Capture(i) => (i as usize) < f.free_vars.len(),
            Value::Lit(l) => (l.0 as usize) < f.lits.len(),
            Value::Global(_) | Value::Func(_) | Value::Builtin(_) => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{}: value out of range: {:?}", name, v))
        }
    };

    for (bi, b) in f.blocks.iter().enumerate() {
        if b.instrs.is_empty() {
            return Err(err(name, bi, "empty block"));
        }

        // Exactly one terminator, at the tail.
        for (k, &iid) in b.instrs.iter().enumerate() {
            let instr = f.instr(iid);
            let last = k + 1 == b.instrs.len();
            if instr.kind.is_terminator() != last {
                return Err(err(
                    name,
                    bi,
                    if last {
                        "block does not end with a terminator"
                    } else {
                        "terminator in mid-block"
                    },
                ));
            }
            if instr.block != BlockId(bi as u32) {
                return Err(err(name, bi, "instruction claims another block"));
            }
        }

        // Edge symmetry.
        for &s in &b.succs {
            let sb = f
                .blocks
                .get(s.0 as usize)
                .ok_or_else(|| err(name, bi, "successor out of range"))?;
            if !sb.preds.contains(&BlockId(bi as u32)) {
                return Err(err(name, bi, format!("missing back-edge from block {}", s.0)));
            }
        }
        for &p in &b.preds {
            let pb = f
                .blocks
                .get(p.0 as usize)
                .ok_or_else(|| err(name, bi, "predecessor out of range"))?;
            if !pb.succs.contains(&BlockId(bi as u32)) {
                return Err(err(name, bi, format!("missing forward-edge from block {}", p.0)));
            }
        }

        // Terminator targets must agree with the successor list.
        let term = f.instr(*b.instrs.last().unwrap());
        match &term.kind {
            InstrKind::Jump(t) => {
                if b.succs != vec![*t] {
                    return Err(err(name, bi, "jump target disagrees with successors"));
                }
            }
            InstrKind::If { then_b, else_b, .. } => {
                if b.succs != vec![*then_b, *else_b] {
                    return Err(err(name, bi, "branch targets disagree with successors"));
                }
            }
            InstrKind::Ret(_) | InstrKind::Panic(_) => {
                if !b.succs.is_empty() {
                    return Err(err(name, bi, "returning block has successors"));
                }
            }
            _ => unreachable!(),
        }

        let mut defined: std::collections::HashSet<InstrId> = std::collections::HashSet::new();
        for &iid in &b.instrs {
            let instr = f.instr(iid);

            // Operand sanity plus same-block ordering.
            for v in instr.kind.operands() {
                in_range(v)?;
                if let Value::Instr(d) = v {
                    let dinstr = f.instr(d);
                    if dinstr.block == BlockId(bi as u32)
                        && !defined.contains(&d)
                        && !matches!(instr.kind, InstrKind::Phi { .. })
                    {
                        return Err(err(
                            name,
                            bi,
                            format!("use of value t{} before its definition", d.0),
                        ));
                    }
                }
            }

            check_type_rule(f, types, name, bi, instr)?;
            defined.insert(iid);
        }
    }

    // Ret arity must match the signature.
    let results = types.sig(f.sig).results;
    for b in &f.blocks {
        let term = f.instr(*b.instrs.last().unwrap());
        if let InstrKind::Ret(vals) = &term.kind {
            if vals.len() != results.len() {
                return Err(format!(
                    "{}: return of {} values from a {}-result function",
                    name,
                    vals.len(),
                    results.len()
                ));
            }
        }
    }
    Ok(())
}

fn check_type_rule(
    f: &Function,
    types: &TypeStore,
    name: &str,
    bi: usize,
    instr: &crate::ir::Instr,
) -> Result<(), String> {
    match &instr.kind {
        InstrKind::Phi { edges, .. } => {
            let npreds = f.blocks[bi].preds.len();
            if edges.len() != npreds {
                return Err(err(
                    name,
                    bi,
                    format!("phi has {} edges for {} predecessors", edges.len(), npreds),
                ));
            }
            let ty = instr.ty.ok_or_else(|| err(name, bi, "untyped phi"))?;
            for e in edges {
                if let Some(et) = f.local_value_ty(*e) {
                    if et != ty {
                        return Err(err(name, bi, "phi edge type disagrees with phi type"));
                    }
                }
            }
        }

        InstrKind::FieldAddr { .. } | InstrKind::IndexAddr { .. } | InstrKind::Alloc { .. } => {
            let ty = instr.ty.ok_or_else(|| err(name, bi, "untyped address"))?;
            if !matches!(types.under_kind(ty), TypeKind::Pointer(_)) {
                return Err(err(name, bi, "address instruction of non-pointer type"));
            }
        }

        InstrKind::BinOp { op, .. } => {
            if op.is_comparison() && instr.ty != Some(T_BOOL) {
                return Err(err(name, bi, "comparison of non-bool type"));
            }
        }

        InstrKind::UnOp {
            op: UnOpKind::Deref,
            x,
            ..
        } => {
            if let (Some(xt), Some(ty)) = (f.local_value_ty(*x), instr.ty) {
                if types.deref(xt) != ty {
                    return Err(err(name, bi, "load type is not the pointee type"));
                }
            }
        }

        InstrKind::Extract { tuple, index } => {
            if let Some(tt) = f.local_value_ty(*tuple) {
                let elems = match types.under_kind(tt) {
                    TypeKind::Tuple(elems) => elems,
                    _ => return Err(err(name, bi, "extract from non-tuple value")),
                };
                let et = elems
                    .get(*index as usize)
                    .ok_or_else(|| err(name, bi, "extract index out of range"))?;
                if Some(*et) != instr.ty {
                    return Err(err(name, bi, "extract type disagrees with tuple element"));
                }
            }
        }

        InstrKind::TypeAssert {
            asserted, comma_ok, ..
        } => {
            let want = if *comma_ok {
                types.tuple_of(vec![*asserted, T_BOOL])
            } else {
                *asserted
            };
            if instr.ty != Some(want) {
                return Err(err(name, bi, "type assertion result type mismatch"));
            }
        }

        InstrKind::Store { .. }
        | InstrKind::MapUpdate { .. }
        | InstrKind::Send { .. }
        | InstrKind::RunDefers
        | InstrKind::Go(_)
        | InstrKind::Defer(_)
        | InstrKind::Jump(_)
        | InstrKind::If { .. }
        | InstrKind::Ret(_)
        | InstrKind::Panic(_) => {
            if instr.ty.is_some() {
                return Err(err(name, bi, "effect instruction carries a type"));
            }
        }

        _ => {
            if instr.ty.is_none() {
                return Err(err(name, bi, "value instruction without a type"));
            }
        }
    }
    Ok(())
}

/// Verify every function of the program.
pub fn check_program(prog: &Program) -> Result<(), String> {
    let mut failure = None;
    prog.each_function(|r, f| {
        if failure.is_some() {
            return;
        }
        let name = format!("{:?}:{}", r, f.name);
        if let Err(e) = check_function(f, &prog.tables.types, &name) {
            failure = Some(e);
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::oracle::Lit;
    use crate::types::{SigData, T_INT};

    fn empty_fn(types: &TypeStore) -> Function {
        let sig = types.sig_of(SigData::func(vec![], vec![]));
        let mut f = Function::new("t", sig, Span::point(0), None, None);
        f.start_body();
        f
    }

    #[test]
    fn accepts_a_minimal_function() {
        let types = TypeStore::new();
        let mut f = empty_fn(&types);
        f.emit(InstrKind::RunDefers, None, Span::point(0));
        f.emit(InstrKind::Ret(vec![]), None, Span::point(0));
        f.finish_body();
        check_function(&f, &types, "t").unwrap();
    }

    #[test]
    fn rejects_missing_terminator() {
        let types = TypeStore::new();
        let mut f = empty_fn(&types);
        f.emit(InstrKind::RunDefers, None, Span::point(0));
        f.finish_body();
        let e = check_function(&f, &types, "t").unwrap_err();
        assert!(e.contains("terminator"), "{}", e);
    }

    #[test]
    fn rejects_phi_arity_mismatch() {
        let types = TypeStore::new();
        let mut f = empty_fn(&types);
        let one = f.lit(Lit::int(1));
        f.emit(
            InstrKind::Phi {
                edges: vec![one],
                comment: String::new(),
            },
            Some(T_INT),
            Span::point(0),
        );
        f.emit(InstrKind::Ret(vec![]), None, Span::point(0));
        f.finish_body();
        let e = check_function(&f, &types, "t").unwrap_err();
        assert!(e.contains("phi"), "{}", e);
    }

    #[test]
    fn rejects_phi_edge_type_disagreement() {
        let types = TypeStore::new();
        let mut f = empty_fn(&types);
        let entry = f.current_block();
        let join = f.new_basic_block("join");
        f.emit(InstrKind::Jump(join), None, Span::point(0));
        f.add_edge(entry, join);
        f.current = Some(join);
        let b = f.lit(Lit::bool(true));
        f.emit(
            InstrKind::Phi {
                edges: vec![b],
                comment: String::new(),
            },
            Some(T_INT),
            Span::point(0),
        );
        f.emit(InstrKind::Ret(vec![]), None, Span::point(0));
        f.finish_body();
        let e = check_function(&f, &types, "t").unwrap_err();
        assert!(e.contains("edge type"), "{}", e);
    }
}
