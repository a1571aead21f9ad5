//! SPIR-V emission for the s-expression surface language.
//!
//! There are no function values in the emitted code: every call site is
//! inlined. A `func` body is re-walked with its formals bound to the
//! caller's argument expressions, and `rec-func` lowers to a structured
//! loop whose formals resolve to phi nodes so `rec` calls become
//! back-edges. Constants and output variables are staged in side lists
//! during the walk and only materialized when the module is assembled.

use crate::ast::{CExprKind, CExpression, ExprKind, Expression, GenExpr, Location, Primitive, Type};
use crate::emit::{instr, pack_string};
use crate::error::{CompilerError, Result};
use crate::scope::{DefEntry, ScopeArena, ScopeId};
use log::debug;
use spirv::Op;

const VERSION_1_3: u32 = 0x0001_0300;

#[derive(Debug, Clone, Copy)]
struct Constant {
    id: u32,
    bits: u32,
    type_id: u32,
}

#[derive(Debug, Clone, Copy)]
struct Output {
    id: u32,
    location: u32,
    type_id: u32,
}

/// Emission state for the single entry-point function.
///
/// Ids are allocated by monotone increment and never reused. `block`
/// always names the last `OpLabel` written into the body that has not been
/// terminated yet.
struct Codegen {
    annotations: Vec<u32>,
    globals: Vec<u32>,
    body: Vec<u32>,

    id: u32,

    id_main: u32,
    id_main_type: u32,
    id_glsl: u32,
    id_true: u32,
    id_false: u32,

    t_float: u32,
    t_void: u32,
    t_vec4: u32,
    t_bool: u32,

    block: u32,

    constants: Vec<Constant>,
    outputs: Vec<Output>,
}

impl Codegen {
    fn new() -> Self {
        let mut cg = Codegen {
            annotations: Vec::new(),
            globals: Vec::new(),
            body: Vec::new(),
            id: 0,
            id_main: 0,
            id_main_type: 0,
            id_glsl: 0,
            id_true: 0,
            id_false: 0,
            t_float: 0,
            t_void: 0,
            t_vec4: 0,
            t_bool: 0,
            block: 0,
            constants: Vec::new(),
            outputs: Vec::new(),
        };

        cg.id_main = cg.fresh_id();
        cg.id_main_type = cg.fresh_id();
        cg.id_glsl = cg.fresh_id();
        cg.t_float = cg.fresh_id();
        cg.t_void = cg.fresh_id();
        cg.t_vec4 = cg.fresh_id();
        cg.t_bool = cg.fresh_id();
        cg.id_true = cg.fresh_id();
        cg.id_false = cg.fresh_id();

        instr(
            &mut cg.body,
            Op::Function,
            &[
                cg.t_void,
                cg.id_main,
                spirv::FunctionControl::NONE.bits(),
                cg.id_main_type,
            ],
        );
        let entry = cg.fresh_id();
        instr(&mut cg.body, Op::Label, &[entry]);
        cg.block = entry;
        cg
    }

    fn fresh_id(&mut self) -> u32 {
        self.id += 1;
        self.id
    }

    fn body_instr(&mut self, op: Op, operands: &[u32]) {
        instr(&mut self.body, op, operands);
    }

    fn label(&mut self, id: u32) {
        instr(&mut self.body, Op::Label, &[id]);
        self.block = id;
    }

    fn branch(&mut self, target: u32) {
        instr(&mut self.body, Op::Branch, &[target]);
    }

    /// Stage a float constant, reusing the id of an earlier occurrence of
    /// the same 32-bit pattern. The declaration itself is back-patched into
    /// the type section by `finish`.
    fn constant(&mut self, value: f64) -> GenExpr {
        let bits = (value as f32).to_bits();
        let id = match self.constants.iter().find(|c| c.bits == bits) {
            Some(existing) => existing.id,
            None => {
                let id = self.fresh_id();
                self.constants.push(Constant {
                    id,
                    bits,
                    type_id: self.t_float,
                });
                id
            }
        };
        GenExpr {
            id,
            type_id: self.t_float,
            ty: Type::Primitive(Primitive::Float),
        }
    }

    fn bool_constant(&mut self, value: bool) -> GenExpr {
        GenExpr {
            id: if value { self.id_true } else { self.id_false },
            type_id: self.t_bool,
            ty: Type::Primitive(Primitive::Bool),
        }
    }

    /// Assemble the module: header, annotations, types/constants, body.
    fn finish(mut self) -> Vec<u32> {
        self.body_instr(Op::Return, &[]);
        self.body_instr(Op::FunctionEnd, &[]);

        // Types and constants: the fixed part first, then everything
        // staged during the walk.
        let mut globals = std::mem::take(&mut self.globals);
        instr(&mut globals, Op::TypeFloat, &[self.t_float, 32]);
        instr(&mut globals, Op::TypeVoid, &[self.t_void]);
        instr(&mut globals, Op::TypeVector, &[self.t_vec4, self.t_float, 4]);
        instr(&mut globals, Op::TypeBool, &[self.t_bool]);
        instr(&mut globals, Op::TypeFunction, &[self.id_main_type, self.t_void]);
        instr(&mut globals, Op::ConstantTrue, &[self.t_bool, self.id_true]);
        instr(&mut globals, Op::ConstantFalse, &[self.t_bool, self.id_false]);

        for constant in &self.constants {
            instr(
                &mut globals,
                Op::Constant,
                &[constant.type_id, constant.id, constant.bits],
            );
        }

        let mut annotations = std::mem::take(&mut self.annotations);
        let outputs = std::mem::take(&mut self.outputs);
        for output in &outputs {
            let ptr = self.fresh_id();
            instr(
                &mut globals,
                Op::TypePointer,
                &[ptr, spirv::StorageClass::Output as u32, output.type_id],
            );
            instr(
                &mut globals,
                Op::Variable,
                &[ptr, output.id, spirv::StorageClass::Output as u32],
            );
            instr(
                &mut annotations,
                Op::Decorate,
                &[output.id, spirv::Decoration::Location as u32, output.location],
            );
        }

        let mut module = vec![spirv::MAGIC_NUMBER, VERSION_1_3, 0, self.id + 1, 0];
        instr(&mut module, Op::Capability, &[spirv::Capability::Shader as u32]);
        let mut operands = vec![self.id_glsl];
        pack_string(&mut operands, "GLSL.std.450");
        instr(&mut module, Op::ExtInstImport, &operands);
        instr(
            &mut module,
            Op::MemoryModel,
            &[
                spirv::AddressingModel::Logical as u32,
                spirv::MemoryModel::GLSL450 as u32,
            ],
        );
        let mut operands = vec![spirv::ExecutionModel::Fragment as u32, self.id_main];
        pack_string(&mut operands, "main");
        operands.extend(outputs.iter().map(|output| output.id));
        instr(&mut module, Op::EntryPoint, &operands);
        instr(
            &mut module,
            Op::ExecutionMode,
            &[self.id_main, spirv::ExecutionMode::OriginUpperLeft as u32],
        );

        module.extend_from_slice(&annotations);
        module.extend_from_slice(&globals);
        module.extend_from_slice(&self.body);

        debug!(
            "assembled module: {} words, {} constants, {} outputs",
            module.len(),
            self.constants.len(),
            outputs.len()
        );
        module
    }
}

/// A pending application: the argument vector of one call (head included)
/// and the scope its expressions evaluate in.
#[derive(Debug, Clone)]
struct Frame<'a> {
    args: Vec<Expression<'a>>,
    scope: ScopeId,
    loc: Location,
}

type CallStack<'a> = Vec<Frame<'a>>;

/// Pop the one pending argument vector a simple built-in expects.
fn innermost_frame<'a>(stack: &mut CallStack<'a>, loc: Location) -> Result<Frame<'a>> {
    match stack.pop() {
        Some(frame) if stack.is_empty() => Ok(frame),
        _ => Err(CompilerError::Nesting(loc)),
    }
}

struct BackEdge {
    from: u32,
    args: Vec<u32>,
}

/// Loop state of one `rec-func` under emission. These form a stack for
/// nested loops, but only the innermost is addressable by `rec`.
struct RecData {
    header: u32,
    cont: u32,
    param_types: Vec<u32>,
    back_edges: Vec<BackEdge>,
}

pub struct Emitter<'a> {
    codegen: Codegen,
    scopes: ScopeArena<'a>,
    rec: Vec<RecData>,
}

impl<'a> Emitter<'a> {
    pub fn new() -> Self {
        Emitter {
            codegen: Codegen::new(),
            scopes: ScopeArena::new(),
            rec: Vec::new(),
        }
    }

    /// Bind a top-level definition. The body stays unevaluated and closes
    /// over the global scope.
    pub fn define(&mut self, name: &'a str, body: &Expression<'a>) {
        self.scopes.insert(
            ScopeArena::GLOBAL,
            name,
            DefEntry {
                body: CExpression::wrap(body),
                scope: ScopeArena::GLOBAL,
            },
        );
    }

    /// Evaluate a top-level expression for its value.
    pub fn generate(&mut self, expr: &Expression<'a>) -> Result<GenExpr> {
        let mut stack = CallStack::new();
        self.generate_call(ScopeArena::GLOBAL, &CExpression::wrap(expr), &mut stack)
    }

    pub fn finish(self) -> Vec<u32> {
        self.codegen.finish()
    }

    /// Evaluate a subexpression for its value, with no pending calls.
    fn generate_value(&mut self, scope: ScopeId, expr: &Expression<'a>) -> Result<GenExpr> {
        let mut stack = CallStack::new();
        self.generate_call(scope, &CExpression::wrap(expr), &mut stack)
    }

    /// Produce the value of `expr` applied to the pending argument vectors
    /// in `stack`, innermost last.
    fn generate_call(
        &mut self,
        scope: ScopeId,
        expr: &CExpression<'a>,
        stack: &mut CallStack<'a>,
    ) -> Result<GenExpr> {
        match &expr.kind {
            CExprKind::Bool(value) => {
                self.expect_value_position(stack, expr.loc)?;
                Ok(self.codegen.bool_constant(*value))
            }
            CExprKind::Number(value) => {
                self.expect_value_position(stack, expr.loc)?;
                Ok(self.codegen.constant(*value))
            }
            CExprKind::Str(_) => Err(CompilerError::Capability(
                "Can't generate string".into(),
                expr.loc,
            )),
            CExprKind::Gen(gen) => {
                // An already-emitted value with arguments still pending
                // means a rec-func body handed back a function; the target
                // ISA has no value to express that.
                if !stack.is_empty() {
                    return Err(CompilerError::Capability(
                        "Can't return a function from a 'rec-func'".into(),
                        expr.loc,
                    ));
                }
                Ok(*gen)
            }
            CExprKind::Identifier(name) => self.generate_identifier(scope, name, expr.loc, stack),
            CExprKind::List(values) => self.generate_list(scope, values, expr.loc, stack),
        }
    }

    fn expect_value_position(&self, stack: &CallStack<'a>, loc: Location) -> Result<()> {
        if stack.is_empty() {
            Ok(())
        } else {
            Err(CompilerError::Type("Expression is not callable".into(), loc))
        }
    }

    fn generate_identifier(
        &mut self,
        scope: ScopeId,
        name: &str,
        loc: Location,
        stack: &mut CallStack<'a>,
    ) -> Result<GenExpr> {
        match name {
            "+" | "-" | "*" | "/" => self.builtin_binop(name, loc, stack),
            "eq" => self.builtin_eq(loc, stack),
            "vec4" => self.builtin_vec4(loc, stack),
            "output" => self.builtin_output(loc, stack),
            "if" => self.builtin_if(loc, stack),
            "let" => self.builtin_let(loc, stack),
            "rec" => self.builtin_rec(loc, stack),
            _ => {
                let entry = self
                    .scopes
                    .lookup(scope, name)
                    .cloned()
                    .ok_or_else(|| CompilerError::UnknownIdentifier(name.to_string(), loc))?;
                // Lexical scoping: the body resolves in the scope it was
                // defined under, not the caller's.
                self.generate_call(entry.scope, &entry.body, stack)
            }
        }
    }

    fn generate_list(
        &mut self,
        scope: ScopeId,
        values: &[Expression<'a>],
        loc: Location,
        stack: &mut CallStack<'a>,
    ) -> Result<GenExpr> {
        let Some(head) = values.first() else {
            return Err(CompilerError::Shape(
                "Can't generate an empty application".into(),
                loc,
            ));
        };

        // Function literals consume the innermost pending argument vector
        // instead of opening one of their own.
        if let ExprKind::Identifier(name) = head.kind {
            if name == "func" {
                return self.generate_func(scope, values, loc, stack);
            }
            if name == "rec-func" {
                return self.generate_rec_func(scope, values, loc, stack);
            }
        }

        stack.push(Frame {
            args: values.to_vec(),
            scope,
            loc,
        });
        self.generate_call(scope, &CExpression::wrap(head), stack)
    }

    fn builtin_binop(
        &mut self,
        name: &str,
        loc: Location,
        stack: &mut CallStack<'a>,
    ) -> Result<GenExpr> {
        let frame = innermost_frame(stack, loc)?;
        let [_, lhs, rhs] = frame.args.as_slice() else {
            return Err(CompilerError::Shape(
                format!("'{}' expects 2 arguments", name),
                loc,
            ));
        };

        let lhs = self.generate_value(frame.scope, lhs)?;
        let rhs = self.generate_value(frame.scope, rhs)?;
        if lhs.type_id != rhs.type_id {
            return Err(CompilerError::Type(
                format!(
                    "Mismatched operand types for '{}' ({} vs {})",
                    name, lhs.ty, rhs.ty
                ),
                loc,
            ));
        }

        let op = match name {
            "+" => Op::FAdd,
            "-" => Op::FSub,
            "*" => Op::FMul,
            _ => Op::FDiv,
        };
        let id = self.codegen.fresh_id();
        self.codegen.body_instr(op, &[lhs.type_id, id, lhs.id, rhs.id]);
        Ok(GenExpr {
            id,
            type_id: lhs.type_id,
            ty: lhs.ty,
        })
    }

    fn builtin_eq(&mut self, loc: Location, stack: &mut CallStack<'a>) -> Result<GenExpr> {
        let frame = innermost_frame(stack, loc)?;
        let [_, lhs, rhs] = frame.args.as_slice() else {
            return Err(CompilerError::Shape("'eq' expects 2 arguments".into(), loc));
        };

        let lhs = self.generate_value(frame.scope, lhs)?;
        let rhs = self.generate_value(frame.scope, rhs)?;
        if lhs.type_id != self.codegen.t_float || rhs.type_id != self.codegen.t_float {
            return Err(CompilerError::Type(
                format!("'eq' expects floats ({} vs {})", lhs.ty, rhs.ty),
                loc,
            ));
        }

        let id = self.codegen.fresh_id();
        self.codegen
            .body_instr(Op::FOrdEqual, &[self.codegen.t_bool, id, lhs.id, rhs.id]);
        Ok(GenExpr {
            id,
            type_id: self.codegen.t_bool,
            ty: Type::Primitive(Primitive::Bool),
        })
    }

    fn builtin_vec4(&mut self, loc: Location, stack: &mut CallStack<'a>) -> Result<GenExpr> {
        let frame = innermost_frame(stack, loc)?;
        if frame.args.len() != 5 {
            return Err(CompilerError::Shape(
                "'vec4' expects 4 arguments".into(),
                loc,
            ));
        }

        let mut operands = vec![self.codegen.t_vec4, 0];
        for arg in &frame.args[1..] {
            let component = self.generate_value(frame.scope, arg)?;
            operands.push(component.id);
        }
        let id = self.codegen.fresh_id();
        operands[1] = id;
        self.codegen.body_instr(Op::CompositeConstruct, &operands);
        Ok(GenExpr {
            id,
            type_id: self.codegen.t_vec4,
            ty: Type::Vector {
                count: 4,
                primitive: Primitive::Float,
            },
        })
    }

    /// `(output N e)`: stage an output variable for location N and store
    /// the value into it. The variable and its decoration are materialized
    /// by `finish`.
    fn builtin_output(&mut self, loc: Location, stack: &mut CallStack<'a>) -> Result<GenExpr> {
        let frame = innermost_frame(stack, loc)?;
        if frame.args.len() != 3 {
            return Err(CompilerError::Shape(
                "'output' expects 2 arguments".into(),
                loc,
            ));
        }
        let ExprKind::Number(location) = frame.args[1].kind else {
            return Err(CompilerError::Shape(
                "First argument of 'output' must be a number literal".into(),
                frame.args[1].loc,
            ));
        };

        let value = self.generate_value(frame.scope, &frame.args[2])?;
        let id = self.codegen.fresh_id();
        self.codegen.outputs.push(Output {
            id,
            location: location as u32,
            type_id: value.type_id,
        });
        self.codegen.body_instr(Op::Store, &[id, value.id]);
        Ok(GenExpr::VOID)
    }

    /// `(if c t f)`: structured selection. Each arm is emitted with the
    /// remaining call stack, so an `if` in call position can pick between
    /// functions. An arm that recursed has already terminated its block
    /// and contributes no phi operand.
    fn builtin_if(&mut self, loc: Location, stack: &mut CallStack<'a>) -> Result<GenExpr> {
        let Some(frame) = stack.pop() else {
            return Err(CompilerError::Nesting(loc));
        };
        if frame.args.len() != 4 {
            return Err(CompilerError::Shape("'if' expects 3 arguments".into(), loc));
        }

        let condition = self.generate_value(frame.scope, &frame.args[1])?;
        if condition.type_id != self.codegen.t_bool {
            return Err(CompilerError::Type(
                format!("Condition of 'if' must be a bool ({})", condition.ty),
                frame.args[1].loc,
            ));
        }

        let then_block = self.codegen.fresh_id();
        let else_block = self.codegen.fresh_id();
        let merge_block = self.codegen.fresh_id();

        self.codegen.body_instr(
            Op::SelectionMerge,
            &[merge_block, spirv::SelectionControl::NONE.bits()],
        );
        self.codegen
            .body_instr(Op::BranchConditional, &[condition.id, then_block, else_block]);

        let mut else_stack = stack.clone();

        self.codegen.label(then_block);
        let then_val =
            self.generate_call(frame.scope, &CExpression::wrap(&frame.args[2]), stack)?;
        let then_end = self.codegen.block;
        if !then_val.ty.is_rec_call() {
            self.codegen.branch(merge_block);
        }

        self.codegen.label(else_block);
        let else_val =
            self.generate_call(frame.scope, &CExpression::wrap(&frame.args[3]), &mut else_stack)?;
        let else_end = self.codegen.block;
        if !else_val.ty.is_rec_call() {
            self.codegen.branch(merge_block);
        }

        match (then_val.ty.is_rec_call(), else_val.ty.is_rec_call()) {
            (true, true) => Ok(GenExpr::REC_CALL),
            (true, false) => {
                self.codegen.label(merge_block);
                Ok(else_val)
            }
            (false, true) => {
                self.codegen.label(merge_block);
                Ok(then_val)
            }
            (false, false) => {
                self.codegen.label(merge_block);
                if then_val.type_id != else_val.type_id {
                    return Err(CompilerError::Type(
                        format!(
                            "Branches of 'if' must have the same type ({} vs {})",
                            then_val.ty, else_val.ty
                        ),
                        loc,
                    ));
                }
                let id = self.codegen.fresh_id();
                self.codegen.body_instr(
                    Op::Phi,
                    &[
                        then_val.type_id,
                        id,
                        then_val.id,
                        then_end,
                        else_val.id,
                        else_end,
                    ],
                );
                Ok(GenExpr {
                    id,
                    type_id: then_val.type_id,
                    ty: then_val.ty,
                })
            }
        }
    }

    /// `(let ((n e) …) body)`: bindings stay unevaluated and close over
    /// the enclosing scope; the body runs with the remaining call stack.
    fn builtin_let(&mut self, loc: Location, stack: &mut CallStack<'a>) -> Result<GenExpr> {
        let Some(frame) = stack.pop() else {
            return Err(CompilerError::Nesting(loc));
        };
        if frame.args.len() != 3 {
            return Err(CompilerError::Shape("'let' expects 2 arguments".into(), loc));
        }
        let ExprKind::List(bindings) = &frame.args[1].kind else {
            return Err(CompilerError::Shape(
                "Bindings of 'let' must be a list".into(),
                frame.args[1].loc,
            ));
        };

        let inner = self.scopes.extend(frame.scope);
        for binding in bindings {
            let ExprKind::List(pair) = &binding.kind else {
                return Err(CompilerError::Shape(
                    "Invalid 'let' binding".into(),
                    binding.loc,
                ));
            };
            let [name, value] = pair.as_slice() else {
                return Err(CompilerError::Shape(
                    "Invalid 'let' binding".into(),
                    binding.loc,
                ));
            };
            let ExprKind::Identifier(name) = name.kind else {
                return Err(CompilerError::Shape(
                    "'let' binding name must be an identifier".into(),
                    name.loc,
                ));
            };
            self.scopes.insert(
                inner,
                name,
                DefEntry {
                    body: CExpression::wrap(value),
                    scope: frame.scope,
                },
            );
        }

        self.generate_call(inner, &CExpression::wrap(&frame.args[2]), stack)
    }

    /// Plain inlining: bind each formal to the caller's argument
    /// expression as an unevaluated thunk closing over the caller's scope,
    /// then walk the body with the remaining stack. Currying falls out:
    /// a body that is itself a `func` consumes the next pending vector.
    fn generate_func(
        &mut self,
        scope: ScopeId,
        values: &[Expression<'a>],
        loc: Location,
        stack: &mut CallStack<'a>,
    ) -> Result<GenExpr> {
        let (params, body) = func_shape(values, "func", loc)?;
        let Some(frame) = stack.pop() else {
            return Err(CompilerError::Nesting(loc));
        };
        if frame.args.len() - 1 != params.len() {
            return Err(CompilerError::Shape(
                format!(
                    "Function expects {} arguments, got {}",
                    params.len(),
                    frame.args.len() - 1
                ),
                frame.loc,
            ));
        }

        let inner = self.scopes.extend(scope);
        for (param, arg) in params.iter().copied().zip(&frame.args[1..]) {
            self.scopes.insert(
                inner,
                param,
                DefEntry {
                    body: CExpression::wrap(arg),
                    scope: frame.scope,
                },
            );
        }
        self.generate_call(inner, &CExpression::wrap(body), stack)
    }

    /// Tail recursion as a structured loop. Formals become header phis fed
    /// by the caller's initial values and by the continue block, which in
    /// turn collects one phi operand per recorded `rec` back-edge.
    fn generate_rec_func(
        &mut self,
        scope: ScopeId,
        values: &[Expression<'a>],
        loc: Location,
        stack: &mut CallStack<'a>,
    ) -> Result<GenExpr> {
        let (params, body) = func_shape(values, "rec-func", loc)?;
        let Some(frame) = stack.pop() else {
            return Err(CompilerError::Nesting(loc));
        };
        if frame.args.len() - 1 != params.len() {
            return Err(CompilerError::Shape(
                format!(
                    "Function expects {} arguments, got {}",
                    params.len(),
                    frame.args.len() - 1
                ),
                frame.loc,
            ));
        }

        let header = self.codegen.fresh_id();
        let loop_block = self.codegen.fresh_id();
        let cont = self.codegen.fresh_id();
        let merge = self.codegen.fresh_id();

        // Initial values are evaluated in the caller's scope; the formals
        // themselves bind to the phi outputs, so references inside the
        // body resolve to already-emitted values.
        let inner = self.scopes.extend(scope);
        let mut inits = Vec::with_capacity(params.len());
        let mut param_ids = Vec::with_capacity(params.len());
        let mut param_types = Vec::with_capacity(params.len());
        for (param, arg) in params.iter().copied().zip(&frame.args[1..]) {
            let init = self.generate_value(frame.scope, arg)?;
            let id = self.codegen.fresh_id();
            param_ids.push(id);
            param_types.push(init.type_id);
            self.scopes.insert(
                inner,
                param,
                DefEntry {
                    body: CExpression {
                        kind: CExprKind::Gen(GenExpr {
                            id,
                            type_id: init.type_id,
                            ty: init.ty,
                        }),
                        loc: arg.loc,
                    },
                    scope: ScopeArena::EMPTY,
                },
            );
            inits.push(init);
        }

        let entry = self.codegen.block;
        self.codegen.branch(header);
        self.codegen.label(header);

        let mut cont_ids = Vec::with_capacity(params.len());
        for (i, &param_id) in param_ids.iter().enumerate() {
            let cont_id = self.codegen.fresh_id();
            self.codegen.body_instr(
                Op::Phi,
                &[param_types[i], param_id, inits[i].id, entry, cont_id, cont],
            );
            cont_ids.push(cont_id);
        }

        self.codegen
            .body_instr(Op::LoopMerge, &[merge, cont, spirv::LoopControl::NONE.bits()]);
        self.codegen.branch(loop_block);
        self.codegen.label(loop_block);

        self.rec.push(RecData {
            header,
            cont,
            param_types,
            back_edges: Vec::new(),
        });
        let value = self.generate_call(inner, &CExpression::wrap(body), stack)?;
        let Some(data) = self.rec.pop() else {
            unreachable!("rec-func loop state missing");
        };

        // A body that recursed unconditionally already ended its block
        // with the back-edge branch.
        if !value.ty.is_rec_call() {
            self.codegen.branch(merge);
        }

        self.codegen.label(data.cont);
        for (i, &cont_id) in cont_ids.iter().enumerate() {
            let mut operands = vec![data.param_types[i], cont_id];
            for edge in &data.back_edges {
                operands.push(edge.args[i]);
                operands.push(edge.from);
            }
            self.codegen.body_instr(Op::Phi, &operands);
        }
        self.codegen.branch(data.header);
        self.codegen.label(merge);

        Ok(value)
    }

    /// `(rec a1 … an)`: record a back-edge into the innermost loop and
    /// branch to its continue block. Produces no usable value.
    fn builtin_rec(&mut self, loc: Location, stack: &mut CallStack<'a>) -> Result<GenExpr> {
        let frame = innermost_frame(stack, loc)?;
        let (cont, param_types) = match self.rec.last() {
            Some(data) => (data.cont, data.param_types.clone()),
            None => {
                return Err(CompilerError::Capability(
                    "'rec' outside of a 'rec-func'".into(),
                    loc,
                ));
            }
        };
        if frame.args.len() - 1 != param_types.len() {
            return Err(CompilerError::Shape(
                format!(
                    "'rec' expects {} arguments, got {}",
                    param_types.len(),
                    frame.args.len() - 1
                ),
                loc,
            ));
        }

        let mut args = Vec::with_capacity(param_types.len());
        for (arg, &expected) in frame.args[1..].iter().zip(&param_types) {
            let value = self.generate_value(frame.scope, arg)?;
            if value.type_id != expected {
                return Err(CompilerError::Type(
                    format!("'rec' argument type mismatch ({})", value.ty),
                    arg.loc,
                ));
            }
            args.push(value.id);
        }

        let from = self.codegen.block;
        if let Some(data) = self.rec.last_mut() {
            data.back_edges.push(BackEdge { from, args });
        }
        self.codegen.branch(cont);
        Ok(GenExpr::REC_CALL)
    }
}

impl Default for Emitter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate `(func (p1 … pn) body)` / `(rec-func (p1 … pn) body)` and
/// split it into formal names and body.
fn func_shape<'e, 'a>(
    values: &'e [Expression<'a>],
    form: &str,
    loc: Location,
) -> Result<(Vec<&'a str>, &'e Expression<'a>)> {
    let [_, params, body] = values else {
        return Err(CompilerError::Shape(
            format!("'{}' expects a parameter list and a body", form),
            loc,
        ));
    };
    let ExprKind::List(params) = &params.kind else {
        return Err(CompilerError::Shape(
            format!("Parameter list of '{}' must be a list", form),
            params.loc,
        ));
    };

    let mut names = Vec::with_capacity(params.len());
    for param in params {
        let ExprKind::Identifier(name) = param.kind else {
            return Err(CompilerError::Shape(
                "Parameters must be identifiers".into(),
                param.loc,
            ));
        };
        names.push(name);
    }
    Ok((names, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotone() {
        let mut cg = Codegen::new();
        let a = cg.fresh_id();
        let b = cg.fresh_id();
        assert!(b > a);
    }

    #[test]
    fn test_constants_dedupe_by_bit_pattern() {
        let mut cg = Codegen::new();
        let a = cg.constant(1.0);
        let b = cg.constant(1.0);
        let c = cg.constant(2.0);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(cg.constants.len(), 2);
    }

    #[test]
    fn test_negative_zero_is_distinct_from_zero() {
        let mut cg = Codegen::new();
        let pos = cg.constant(0.0);
        let neg = cg.constant(-0.0);
        assert_ne!(pos.id, neg.id);
    }

    #[test]
    fn test_finish_header_words() {
        let cg = Codegen::new();
        let last_id = cg.id;
        let module = cg.finish();
        assert_eq!(module[0], spirv::MAGIC_NUMBER);
        assert_eq!(module[1], 0x0001_0300);
        assert_eq!(module[2], 0);
        assert_eq!(module[3], last_id + 1);
        assert_eq!(module[4], 0);
    }

    #[test]
    fn test_empty_module_type_section_order() {
        let cg = Codegen::new();
        let module = cg.finish();

        // Walk instructions and collect opcodes in order.
        let mut opcodes = Vec::new();
        let mut i = 5;
        while i < module.len() {
            opcodes.push((module[i] & 0xffff) as u16);
            i += (module[i] >> 16) as usize;
        }
        assert_eq!(i, module.len());

        let expected = [
            Op::Capability,
            Op::ExtInstImport,
            Op::MemoryModel,
            Op::EntryPoint,
            Op::ExecutionMode,
            Op::TypeFloat,
            Op::TypeVoid,
            Op::TypeVector,
            Op::TypeBool,
            Op::TypeFunction,
            Op::ConstantTrue,
            Op::ConstantFalse,
            Op::Function,
            Op::Label,
            Op::Return,
            Op::FunctionEnd,
        ];
        let expected: Vec<u16> = expected.iter().map(|&op| op as u16).collect();
        assert_eq!(opcodes, expected);
    }

    #[test]
    fn test_innermost_frame_rejects_extra_nesting() {
        let loc = Location::default();
        let mut stack = vec![
            Frame { args: Vec::new(), scope: ScopeArena::GLOBAL, loc },
            Frame { args: Vec::new(), scope: ScopeArena::GLOBAL, loc },
        ];
        assert!(matches!(
            innermost_frame(&mut stack, loc),
            Err(CompilerError::Nesting(_))
        ));

        let mut stack = Vec::new();
        assert!(matches!(
            innermost_frame(&mut stack, loc),
            Err(CompilerError::Nesting(_))
        ));
    }
}
