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

// The SSA model. Blocks and instructions live in per-function arenas and
// reference each other by index, which keeps the inherently cyclic value
// graph free of ownership cycles. An instruction that produces a value IS
// that value: `Value::Instr(id)`. Every local variable is the address of a
// stack slot (`Alloc`) accessed through explicit loads and stores; a later
// lifting pass (not in this crate) promotes slots whose address never
// escapes.

use std::collections::HashMap;

use crate::ast::{self, BinaryOp, Span};
use crate::oracle::{Lit, ObjId};
use crate::types::{ChanDir, TypeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LitId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PkgId(pub u32);

/// A function anywhere in the program: declared in a package, or synthesized
/// (bridge methods and thunks live in the shared synthetic arena).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FuncRef {
    Decl(PkgId, u32),
    Synth(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalRef {
    pub pkg: PkgId,
    pub index: u32,
}

/// A value usable as an instruction operand. Small and Copy; instruction
/// results, parameters, captures and literals are function-scoped, the rest
/// are program-scoped references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Instr(InstrId),
    Param(u32),
    Capture(u32),
    Lit(LitId),
    /// The address of a package-level variable.
    Global(GlobalRef),
    Func(FuncRef),
    Builtin(ObjId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOpKind {
    Not,
    Neg,
    BitNot,
    /// Channel receive; with `comma_ok` the result is a (value, ok) tuple.
    Recv,
    /// Pointer load.
    Deref,
}

#[derive(Clone, Debug)]
pub struct CallCommon {
    /// The callee for static calls and closures; None for interface calls.
    pub func: Option<Value>,
    /// Interface method index for dynamic dispatch.
    pub method: Option<u32>,
    /// Receiver for dynamic dispatch.
    pub recv: Option<Value>,
    pub args: Vec<Value>,
    pub has_ellipsis: bool,
}

#[derive(Clone, Debug)]
pub struct SelectState {
    pub dir: ChanDir,
    pub chan: Value,
    pub send: Option<Value>,
}

#[derive(Clone, Debug)]
pub enum InstrKind {
    /// A stack slot (or heap cell when `heap`); the value is its address.
    Alloc { name: String, heap: bool },
    Phi { edges: Vec<Value>, comment: String },
    BinOp { op: BinaryOp, x: Value, y: Value },
    UnOp { op: UnOpKind, x: Value, comma_ok: bool },
    /// Value-changing conversion (numeric, string/byte-slice).
    Convert { x: Value },
    /// Representation-preserving conversion between types with one underlying.
    ChangeType { x: Value },
    /// Concrete value into an interface.
    MakeInterface { x: Value },
    /// Interface into a wider interface.
    ChangeInterface { x: Value },
    MakeClosure { func: FuncRef, bindings: Vec<Value> },
    MakeMap { reserve: Option<Value> },
    MakeSlice { len: Value, cap: Value },
    MakeChan { size: Value },
    Field { x: Value, field: u32 },
    FieldAddr { x: Value, field: u32 },
    Index { x: Value, index: Value },
    IndexAddr { x: Value, index: Value },
    Lookup { x: Value, index: Value, comma_ok: bool },
    Slice { x: Value, low: Option<Value>, high: Option<Value> },
    Range { x: Value },
    Next { iter: Value, is_string: bool },
    Select { states: Vec<SelectState>, blocking: bool },
    TypeAssert { x: Value, asserted: TypeId, comma_ok: bool },
    Extract { tuple: Value, index: u32 },
    Call(CallCommon),
    Go(CallCommon),
    Defer(CallCommon),
    Store { addr: Value, value: Value },
    MapUpdate { map: Value, key: Value, value: Value },
    Send { chan: Value, value: Value },
    RunDefers,
    Jump(BlockId),
    If { cond: Value, then_b: BlockId, else_b: BlockId },
    Ret(Vec<Value>),
    Panic(Value),
}

impl InstrKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Jump(_) | InstrKind::If { .. } | InstrKind::Ret(_) | InstrKind::Panic(_)
        )
    }

    /// Values used as operands (not defined).
    pub fn operands(&self) -> Vec<Value> {
        use InstrKind::*;
        match self {
            Alloc { .. } | RunDefers | Jump(_) => vec![],
            Phi { edges, .. } => edges.clone(),
            BinOp { x, y, .. } => vec![*x, *y],
            UnOp { x, .. }
            | Convert { x }
            | ChangeType { x }
            | MakeInterface { x }
            | ChangeInterface { x }
            | Field { x, .. }
            | FieldAddr { x, .. }
            | Range { x }
            | Panic(x) => vec![*x],
            MakeClosure { bindings, .. } => bindings.clone(),
            MakeMap { reserve } => reserve.iter().copied().collect(),
            MakeSlice { len, cap } => vec![*len, *cap],
            MakeChan { size } => vec![*size],
            Index { x, index } | IndexAddr { x, index } | Lookup { x, index, .. } => {
                vec![*x, *index]
            }
            Slice { x, low, high } => {
                let mut v = vec![*x];
                v.extend(low.iter().copied());
                v.extend(high.iter().copied());
                v
            }
            Next { iter, .. } => vec![*iter],
            Select { states, .. } => {
                let mut v = Vec::new();
                for s in states {
                    v.push(s.chan);
                    v.extend(s.send.iter().copied());
                }
                v
            }
            TypeAssert { x, .. } => vec![*x],
            Extract { tuple, .. } => vec![*tuple],
            Call(c) | Go(c) | Defer(c) => {
                let mut v = Vec::new();
                v.extend(c.func.iter().copied());
                v.extend(c.recv.iter().copied());
                v.extend(c.args.iter().copied());
                v
            }
            Store { addr, value } => vec![*addr, *value],
            MapUpdate { map, key, value } => vec![*map, *key, *value],
            Send { chan, value } => vec![*chan, *value],
            If { cond, .. } => vec![*cond],
            Ret(vals) => vals.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub kind: InstrKind,
    /// The value's type; None for pure effects and terminators.
    pub ty: Option<TypeId>,
    pub span: Span,
    pub block: BlockId,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub name: String,
    pub instrs: Vec<InstrId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
    pub obj: Option<ObjId>,
}

/// A free variable of a closure. `outer` is the captured value in the
/// enclosing function's scope; it is consumed when the enclosing function
/// emits the MakeClosure and cleared afterwards.
#[derive(Clone, Debug)]
pub struct FreeVar {
    pub name: String,
    pub ty: TypeId,
    pub outer: Option<Value>,
}

/// One frame of the break/continue/fallthrough target stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetFrame {
    pub break_to: Option<BlockId>,
    pub continue_to: Option<BlockId>,
    pub fallthrough_to: Option<BlockId>,
}

/// Resolution state of one source label.
#[derive(Clone, Copy, Debug)]
pub struct LBlock {
    pub goto_to: BlockId,
    pub break_to: Option<BlockId>,
    pub continue_to: Option<BlockId>,
}

/// Syntax handle for functions that come from source; cloned out of the
/// package AST at CREATE so building never borrows the file list.
#[derive(Clone, Debug)]
pub struct FuncSyntax {
    pub recv: Option<ast::Ident>,
    pub params: Vec<ast::Ident>,
    pub results: Vec<Option<ast::Ident>>,
    /// None for externally supplied functions.
    pub body: Option<ast::Block>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub sig: TypeId,
    pub span: Span,
    /// Owning package; None for synthesized functions.
    pub pkg: Option<PkgId>,
    pub params: Vec<Param>,
    pub free_vars: Vec<FreeVar>,
    /// Addresses of named result slots, when the signature names them.
    pub named_results: Vec<Value>,
    /// Stack-slot allocations, in allocation order.
    pub locals: Vec<InstrId>,
    pub blocks: Vec<BasicBlock>,
    pub instrs: Vec<Instr>,
    pub lits: Vec<Lit>,
    /// Anonymous functions defined inside this one.
    pub anon: Vec<FuncRef>,
    /// Enclosing function (local index in the same package) for closures.
    pub enclosing: Option<u32>,
    pub syntax: Option<FuncSyntax>,

    // Build-time bookkeeping; discarded by finish_body.
    pub current: Option<BlockId>,
    pub objects: HashMap<ObjId, Value>,
    pub targets: Vec<TargetFrame>,
    pub lblocks: HashMap<String, LBlock>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        sig: TypeId,
        span: Span,
        pkg: Option<PkgId>,
        syntax: Option<FuncSyntax>,
    ) -> Self {
        Self {
            name: name.into(),
            sig,
            span,
            pkg,
            params: Vec::new(),
            free_vars: Vec::new(),
            named_results: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
            instrs: Vec::new(),
            lits: Vec::new(),
            anon: Vec::new(),
            enclosing: None,
            syntax,
            current: None,
            objects: HashMap::new(),
            targets: Vec::new(),
            lblocks: HashMap::new(),
        }
    }

    pub fn new_basic_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            name: name.into(),
            ..BasicBlock::default()
        });
        id
    }

    pub fn start_body(&mut self) {
        let entry = self.new_basic_block("entry");
        self.current = Some(entry);
    }

    pub fn current_block(&self) -> BlockId {
        match self.current {
            Some(b) => b,
            None => panic!("no current block in function '{}'", self.name),
        }
    }

    /// Append an instruction to the current block and return it as a value.
    pub fn emit(&mut self, kind: InstrKind, ty: Option<TypeId>, span: Span) -> Value {
        let block = self.current_block();
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(Instr {
            kind,
            ty,
            span,
            block,
        });
        self.blocks[block.0 as usize].instrs.push(id);
        Value::Instr(id)
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0 as usize]
    }

    pub fn lit(&mut self, l: Lit) -> Value {
        let id = LitId(self.lits.len() as u32);
        self.lits.push(l);
        Value::Lit(id)
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: TypeId, obj: Option<ObjId>) -> Value {
        self.params.push(Param {
            name: name.into(),
            ty,
            obj,
        });
        Value::Param(self.params.len() as u32 - 1)
    }

    /// The lazily created label record for `name`; the goto block is
    /// allocated on first touch.
    pub fn lblock(&mut self, name: &str) -> LBlock {
        if !self.lblocks.contains_key(name) {
            let goto_to = self.new_basic_block(format!("label.{}", name));
            self.lblocks.insert(
                name.to_string(),
                LBlock {
                    goto_to,
                    break_to: None,
                    continue_to: None,
                },
            );
        }
        self.lblocks[name]
    }

    pub fn set_lblock(&mut self, name: &str, lb: LBlock) {
        self.lblocks.insert(name.to_string(), lb);
    }

    /// Type of a function-scoped value; None for program-scoped references
    /// (globals, functions, builtins), which the caller resolves.
    pub fn local_value_ty(&self, v: Value) -> Option<TypeId> {
        match v {
            Value::Instr(i) => Some(
                self.instrs[i.0 as usize]
                    .ty
                    .unwrap_or_else(|| panic!("value of non-value instruction {:?}", i)),
            ),
            Value::Param(i) => Some(self.params[i as usize].ty),
            Value::Capture(i) => Some(self.free_vars[i as usize].ty),
            Value::Lit(i) => Some(self.lits[i.0 as usize].ty),
            Value::Global(_) | Value::Func(_) | Value::Builtin(_) => None,
        }
    }

    /// Record a control-flow edge between blocks.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0 as usize].succs.push(to);
        self.blocks[to.0 as usize].preds.push(from);
    }

    /// Seal the function after building: drop bookkeeping and remove blocks
    /// unreachable from the entry (fixing up edges and phi inputs).
    pub fn finish_body(&mut self) {
        self.current = None;
        self.objects = HashMap::new();
        self.targets = Vec::new();
        self.lblocks = HashMap::new();
        self.syntax = None;
        self.remove_unreachable_blocks();
    }

    fn remove_unreachable_blocks(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        let n = self.blocks.len();
        let mut reachable = vec![false; n];
        let mut work = vec![BlockId(0)];
        reachable[0] = true;
        while let Some(b) = work.pop() {
            for &s in &self.blocks[b.0 as usize].succs {
                if !reachable[s.0 as usize] {
                    reachable[s.0 as usize] = true;
                    work.push(s);
                }
            }
        }
        if reachable.iter().all(|&r| r) {
            return;
        }

        // Dense renumbering of the surviving blocks.
        let mut remap: Vec<Option<BlockId>> = vec![None; n];
        let mut next = 0u32;
        for (i, &r) in reachable.iter().enumerate() {
            if r {
                remap[i] = Some(BlockId(next));
                next += 1;
            }
        }

        // Drop phi edges whose predecessor went away; pairing is positional.
        for bi in 0..n {
            if !reachable[bi] {
                continue;
            }
            let pred_alive: Vec<bool> = self.blocks[bi]
                .preds
                .iter()
                .map(|p| reachable[p.0 as usize])
                .collect();
            if pred_alive.iter().all(|&a| a) {
                continue;
            }
            for &iid in &self.blocks[bi].instrs.clone() {
                if let InstrKind::Phi { edges, .. } = &mut self.instrs[iid.0 as usize].kind {
                    let mut kept = Vec::with_capacity(edges.len());
                    for (ei, e) in edges.iter().enumerate() {
                        if *pred_alive.get(ei).unwrap_or(&true) {
                            kept.push(*e);
                        }
                    }
                    *edges = kept;
                }
            }
        }

        let old_blocks = std::mem::take(&mut self.blocks);
        for (i, mut b) in old_blocks.into_iter().enumerate() {
            if !reachable[i] {
                continue;
            }
            b.preds = b
                .preds
                .iter()
                .filter_map(|p| remap[p.0 as usize])
                .collect();
            b.succs = b
                .succs
                .iter()
                .filter_map(|s| remap[s.0 as usize])
                .collect();
            self.blocks.push(b);
        }

        for instr in &mut self.instrs {
            if let Some(nb) = remap[instr.block.0 as usize] {
                instr.block = nb;
            }
            match &mut instr.kind {
                InstrKind::Jump(t) => {
                    if let Some(nt) = remap[t.0 as usize] {
                        *t = nt;
                    }
                }
                InstrKind::If { then_b, else_b, .. } => {
                    if let Some(nt) = remap[then_b.0 as usize] {
                        *then_b = nt;
                    }
                    if let Some(ne) = remap[else_b.0 as usize] {
                        *else_b = ne;
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{T_BOOL, T_INT};

    fn test_fn() -> Function {
        let mut f = Function::new("f", crate::types::T_INVALID, Span::point(0), None, None);
        f.start_body();
        f
    }

    #[test]
    fn emit_appends_to_current_block() {
        let mut f = test_fn();
        let one = f.lit(Lit::int(1));
        let two = f.lit(Lit::int(2));
        let v = f.emit(
            InstrKind::BinOp {
                op: BinaryOp::Add,
                x: one,
                y: two,
            },
            Some(T_INT),
            Span::point(0),
        );
        assert_eq!(f.blocks[0].instrs.len(), 1);
        assert_eq!(f.local_value_ty(v), Some(T_INT));
    }

    #[test]
    fn unreachable_blocks_are_removed_and_edges_remapped() {
        let mut f = test_fn();
        let entry = f.current_block();
        let dead = f.new_basic_block("dead");
        let exit = f.new_basic_block("exit");

        f.emit(InstrKind::Jump(exit), None, Span::point(0));
        f.add_edge(entry, exit);

        f.current = Some(dead);
        f.emit(InstrKind::Jump(exit), None, Span::point(0));
        f.add_edge(dead, exit);

        f.current = Some(exit);
        f.emit(InstrKind::Ret(vec![]), None, Span::point(0));

        f.finish_body();
        assert_eq!(f.blocks.len(), 2);
        assert_eq!(f.blocks[1].name, "exit");
        assert_eq!(f.blocks[0].succs, vec![BlockId(1)]);
        assert_eq!(f.blocks[1].preds, vec![BlockId(0)]);
        // The entry's jump must target the renumbered exit block.
        let last = *f.blocks[0].instrs.last().unwrap();
        match f.instr(last).kind {
            InstrKind::Jump(t) => assert_eq!(t, BlockId(1)),
            ref k => panic!("expected jump, got {:?}", k),
        }
    }

    #[test]
    fn phi_edges_follow_removed_predecessors() {
        let mut f = test_fn();
        let entry = f.current_block();
        let dead = f.new_basic_block("dead");
        let join = f.new_basic_block("join");

        f.emit(InstrKind::Jump(join), None, Span::point(0));
        f.add_edge(entry, join);
        f.add_edge(dead, join); // edge from a block nothing reaches

        f.current = Some(join);
        let a = f.lit(Lit::bool(true));
        let b = f.lit(Lit::bool(false));
        f.emit(
            InstrKind::Phi {
                edges: vec![a, b],
                comment: "t".to_string(),
            },
            Some(T_BOOL),
            Span::point(0),
        );
        f.emit(InstrKind::Ret(vec![]), None, Span::point(0));

        f.finish_body();
        let join = &f.blocks[1];
        assert_eq!(join.preds.len(), 1);
        let phi = f.instr(join.instrs[0]);
        match &phi.kind {
            InstrKind::Phi { edges, .. } => assert_eq!(edges.len(), 1),
            k => panic!("expected phi, got {:?}", k),
        }
    }
}
