//! Syntax tree for the s-expression surface language.
//!
//! Atoms borrow views of the source buffer, so the source must outlive
//! every node and every definition built from one.

use std::fmt;

/// Source position of a token. `depth` counts enclosing parentheses and is
/// only used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub row: u32,
    pub col: u32,
    pub depth: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression<'a> {
    pub kind: ExprKind<'a>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind<'a> {
    Bool(bool),
    Number(f64),
    Str(&'a str),
    Identifier(&'a str),
    List(Vec<Expression<'a>>),
}

impl fmt::Display for Expression<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Bool(value) => write!(f, "{}", value),
            ExprKind::Number(value) => write!(f, "{}", value),
            ExprKind::Str(text) => write!(f, "\"{}\"", text),
            ExprKind::Identifier(name) => f.write_str(name),
            ExprKind::List(values) => {
                f.write_str("(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Scalar kinds of the type lattice. `RecCall` marks an expression whose
/// control flow diverges into a tail-recursive back-edge and therefore
/// produces no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Void,
    Float,
    Bool,
    RecCall,
}

/// Structural type of an emitted value. Values are compared by the SPIR-V
/// type-id they resolve to; this representation exists for diagnostics and
/// for the `Void`/`RecCall` sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Primitive(Primitive),
    Vector { count: u32, primitive: Primitive },
    Matrix { rows: u32, cols: u32, primitive: Primitive },
}

impl Type {
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Void))
    }

    pub fn is_rec_call(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::RecCall))
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Primitive::Void => "void",
            Primitive::Float => "float",
            Primitive::Bool => "bool",
            Primitive::RecCall => "rec-call",
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(primitive) => write!(f, "{}", primitive),
            Type::Vector { count, primitive } => write!(f, "{}{}", primitive, count),
            Type::Matrix { rows, cols, primitive } => {
                write!(f, "{}{}x{}", primitive, rows, cols)
            }
        }
    }
}

/// An already-emitted SPIR-V value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenExpr {
    pub id: u32,
    pub type_id: u32,
    pub ty: Type,
}

impl GenExpr {
    pub const VOID: GenExpr = GenExpr {
        id: 0,
        type_id: 0,
        ty: Type::Primitive(Primitive::Void),
    };

    pub const REC_CALL: GenExpr = GenExpr {
        id: 0,
        type_id: 0,
        ty: Type::Primitive(Primitive::RecCall),
    };
}

/// Expression as seen by the code generator: the parsed syntax plus values
/// that have already been lowered to a SPIR-V id. `Gen` values are injected
/// when `rec-func` binds its formals to phi outputs; the parser never
/// produces them.
#[derive(Debug, Clone, PartialEq)]
pub struct CExpression<'a> {
    pub kind: CExprKind<'a>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CExprKind<'a> {
    Bool(bool),
    Number(f64),
    Str(&'a str),
    Identifier(&'a str),
    List(Vec<Expression<'a>>),
    Gen(GenExpr),
}

impl<'a> CExpression<'a> {
    pub fn wrap(expr: &Expression<'a>) -> Self {
        let kind = match &expr.kind {
            ExprKind::Bool(value) => CExprKind::Bool(*value),
            ExprKind::Number(value) => CExprKind::Number(*value),
            ExprKind::Str(text) => CExprKind::Str(text),
            ExprKind::Identifier(name) => CExprKind::Identifier(name),
            ExprKind::List(values) => CExprKind::List(values.clone()),
        };
        CExpression { kind, loc: expr.loc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let loc = Location { row: 3, col: 14, depth: 2 };
        assert_eq!(loc.to_string(), "3:14");
    }

    #[test]
    fn test_expression_display() {
        let loc = Location::default();
        let expr = Expression {
            kind: ExprKind::List(vec![
                Expression { kind: ExprKind::Identifier("vec4"), loc },
                Expression { kind: ExprKind::Number(1.0), loc },
                Expression { kind: ExprKind::Bool(true), loc },
            ]),
            loc,
        };
        assert_eq!(expr.to_string(), "(vec4 1 true)");
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::Primitive(Primitive::Float).to_string(), "float");
        assert_eq!(
            Type::Vector { count: 4, primitive: Primitive::Float }.to_string(),
            "float4"
        );
        assert_eq!(
            Type::Matrix { rows: 3, cols: 3, primitive: Primitive::Float }.to_string(),
            "float3x3"
        );
    }

    #[test]
    fn test_sentinels() {
        assert!(GenExpr::VOID.ty.is_void());
        assert!(GenExpr::REC_CALL.ty.is_rec_call());
        assert!(!GenExpr::VOID.ty.is_rec_call());
    }
}
