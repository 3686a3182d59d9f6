/*
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

//! SSA construction for the brine language.
//!
//! The builder has two phases. In CREATE, packages are constructed from
//! type-checked source in topological import order: members are allocated,
//! method sets computed, and bridge methods synthesized. In BUILD, each
//! function body is lowered to SSA basic blocks; packages build in parallel,
//! serially within a package. After BUILD the [`prog::Program`] is complete
//! and the [`build::Builder`] can be discarded.
//!
//! Inputs come from an external parser and type checker: a typed AST
//! ([`ast`]) and the oracle tables ([`oracle`], [`types`]). The output is an
//! in-memory SSA program ([`ir`], [`prog`]); no files, no bytes.

pub mod ast;
pub mod build;
pub mod dump;
pub mod error;
pub mod ir;
pub mod methods;
pub mod oracle;
pub mod prog;
pub mod sanity;
pub mod source;
pub mod types;

mod lower;

#[cfg(test)]
mod tests;

pub use build::Builder;
pub use error::{CheckError, CreateError};
pub use prog::{BuilderMode, Context, Member, Package, Program};
