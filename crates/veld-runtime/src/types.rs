//! Value type model
//!
//! Types exist to answer one question for the back end: how many bytes does a
//! value occupy on the operand stack. The resolver and typechecker (external
//! stages) attach these to identifier uses; the lowerer only reads sizes and
//! sum/product structure.

/// Width tag of a number literal or numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl NumberKind {
    /// Byte width of this numeric type (1, 2, 4, or 8).
    pub fn byte_size(self) -> u32 {
        match self {
            NumberKind::I8 | NumberKind::U8 => 1,
            NumberKind::I16 | NumberKind::U16 => 2,
            NumberKind::I32 | NumberKind::U32 => 4,
            NumberKind::I64 | NumberKind::U64 => 8,
        }
    }

    /// Whether the type is signed (affects the literal-move opcode family).
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NumberKind::I8 | NumberKind::I16 | NumberKind::I32 | NumberKind::I64
        )
    }
}

/// A resolved value type with a known byte size.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Number(NumberKind),
    Bool,
    /// Ordered fields laid out contiguously.
    Product(Vec<Type>),
    /// Tagged union: one tag byte followed by the (padded) payload.
    /// Variants are `(constructor name, payload type)`.
    Sum(Vec<(String, Type)>),
    Function {
        from: Box<Type>,
        to: Box<Type>,
    },
    Array {
        element: Box<Type>,
        length: u32,
    },
}

impl Type {
    /// Empty product, the unit type.
    pub fn unit() -> Type {
        Type::Product(Vec::new())
    }

    pub fn u64() -> Type {
        Type::Number(NumberKind::U64)
    }

    /// Bytes this value occupies on the operand stack.
    ///
    /// A sum is one tag byte plus its widest payload, rounded up to a
    /// power-of-two width so the value can travel through a register with a
    /// single push or pop; constructors zero-pad up to this size, so every
    /// variant of a type has the same layout. A function value is a code
    /// address.
    pub fn byte_size(&self) -> u32 {
        match self {
            Type::Number(k) => k.byte_size(),
            Type::Bool => 1,
            Type::Product(fields) => fields.iter().map(Type::byte_size).sum(),
            Type::Sum(variants) => {
                let payload = variants.iter().map(|(_, t)| t.byte_size()).max().unwrap_or(0);
                (1 + payload).next_power_of_two()
            }
            Type::Function { .. } => 8,
            Type::Array { element, length } => element.byte_size() * length,
        }
    }

    /// Index and payload type of a sum variant, looked up by constructor name.
    pub fn sum_variant(&self, name: &str) -> Option<(u32, &Type)> {
        match self {
            Type::Sum(variants) => variants
                .iter()
                .position(|(n, _)| n == name)
                .map(|i| (i as u32, &variants[i].1)),
            _ => None,
        }
    }
}
