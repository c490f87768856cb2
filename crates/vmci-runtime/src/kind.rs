//! Basic value kinds of the interpreter
//!
//! Every field, local, array element and constant carries a `JavaKind`.
//! Sub-int kinds (boolean, byte, short, char) are stored in their natural
//! width but widen to `Int` on the operand stack.

/// Kind of a value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JavaKind {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `C`
    Char,
    /// `I`
    Int,
    /// `F`
    Float,
    /// `J`
    Long,
    /// `D`
    Double,
    /// References (`L...;` and `[...`)
    Object,
    /// `V`, only valid as a return kind
    Void,
    /// No valid kind (failed or absent value)
    Illegal,
}

impl JavaKind {
    /// All primitive kinds including `Void`, in descriptor order
    pub const PRIMITIVES: [JavaKind; 9] = [
        JavaKind::Boolean,
        JavaKind::Byte,
        JavaKind::Short,
        JavaKind::Char,
        JavaKind::Int,
        JavaKind::Float,
        JavaKind::Long,
        JavaKind::Double,
        JavaKind::Void,
    ];

    /// Kind for a descriptor type character
    pub fn from_type_char(c: char) -> Option<Self> {
        match c {
            'Z' => Some(JavaKind::Boolean),
            'B' => Some(JavaKind::Byte),
            'S' => Some(JavaKind::Short),
            'C' => Some(JavaKind::Char),
            'I' => Some(JavaKind::Int),
            'F' => Some(JavaKind::Float),
            'J' => Some(JavaKind::Long),
            'D' => Some(JavaKind::Double),
            'L' | '[' => Some(JavaKind::Object),
            'V' => Some(JavaKind::Void),
            _ => None,
        }
    }

    /// Kind of a type descriptor (only the first character is inspected)
    pub fn from_descriptor(descriptor: &str) -> Option<Self> {
        descriptor.chars().next().and_then(Self::from_type_char)
    }

    /// Descriptor character for this kind
    pub fn type_char(self) -> char {
        match self {
            JavaKind::Boolean => 'Z',
            JavaKind::Byte => 'B',
            JavaKind::Short => 'S',
            JavaKind::Char => 'C',
            JavaKind::Int => 'I',
            JavaKind::Float => 'F',
            JavaKind::Long => 'J',
            JavaKind::Double => 'D',
            JavaKind::Object => 'L',
            JavaKind::Void => 'V',
            JavaKind::Illegal => '-',
        }
    }

    /// Source-level name (`int`, `boolean`, ...)
    pub fn java_name(self) -> &'static str {
        match self {
            JavaKind::Boolean => "boolean",
            JavaKind::Byte => "byte",
            JavaKind::Short => "short",
            JavaKind::Char => "char",
            JavaKind::Int => "int",
            JavaKind::Float => "float",
            JavaKind::Long => "long",
            JavaKind::Double => "double",
            JavaKind::Object => "Object",
            JavaKind::Void => "void",
            JavaKind::Illegal => "illegal",
        }
    }

    /// Primitive kinds, `Void` included
    pub fn is_primitive(self) -> bool {
        !matches!(self, JavaKind::Object | JavaKind::Illegal)
    }

    /// Kinds that widen to `Int` on the stack
    pub fn is_sub_int(self) -> bool {
        matches!(
            self,
            JavaKind::Boolean | JavaKind::Byte | JavaKind::Short | JavaKind::Char
        )
    }

    /// Kind of the value on the operand stack
    pub fn stack_kind(self) -> Self {
        if self.is_sub_int() {
            JavaKind::Int
        } else {
            self
        }
    }

    /// Storage width in bytes
    pub fn byte_count(self) -> u32 {
        match self {
            JavaKind::Boolean | JavaKind::Byte => 1,
            JavaKind::Short | JavaKind::Char => 2,
            JavaKind::Int | JavaKind::Float => 4,
            JavaKind::Long | JavaKind::Double => 8,
            JavaKind::Object => crate::layout::REFERENCE_SIZE,
            JavaKind::Void | JavaKind::Illegal => 0,
        }
    }

    /// Local variable / operand stack slots taken by this kind
    pub fn slot_count(self) -> u32 {
        match self {
            JavaKind::Long | JavaKind::Double => 2,
            JavaKind::Void | JavaKind::Illegal => 0,
            _ => 1,
        }
    }
}

impl std::fmt::Display for JavaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.java_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_char_roundtrip_for_primitives() {
        for kind in JavaKind::PRIMITIVES {
            assert_eq!(JavaKind::from_type_char(kind.type_char()), Some(kind));
        }
    }

    #[test]
    fn test_from_descriptor() {
        assert_eq!(JavaKind::from_descriptor("Ljava/lang/Object;"), Some(JavaKind::Object));
        assert_eq!(JavaKind::from_descriptor("[I"), Some(JavaKind::Object));
        assert_eq!(JavaKind::from_descriptor("J"), Some(JavaKind::Long));
        assert_eq!(JavaKind::from_descriptor(""), None);
        assert_eq!(JavaKind::from_descriptor("Q"), None);
    }

    #[test]
    fn test_sub_int_kinds_widen() {
        assert!(JavaKind::Char.is_sub_int());
        assert_eq!(JavaKind::Byte.stack_kind(), JavaKind::Int);
        assert_eq!(JavaKind::Long.stack_kind(), JavaKind::Long);
        assert!(!JavaKind::Int.is_sub_int());
    }

    #[test]
    fn test_widths() {
        assert_eq!(JavaKind::Short.byte_count(), 2);
        assert_eq!(JavaKind::Double.slot_count(), 2);
        assert_eq!(JavaKind::Void.slot_count(), 0);
    }
}
