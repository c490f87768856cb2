//! Type descriptors and method signatures
//!
//! Types are named by their descriptor everywhere in the runtime
//! (`Ljava/lang/String;`, `[I`, `J`). Constant pool class entries use
//! internal names instead (`java/lang/String`, `[I`); the helpers here
//! convert between the two forms.

use crate::kind::JavaKind;

/// Maximum number of array dimensions
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Length of the field descriptor at the start of `s`, if well formed
fn field_descriptor_prefix(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut dims = 0;
    while dims < bytes.len() && bytes[dims] == b'[' {
        dims += 1;
    }
    if dims > MAX_ARRAY_DIMENSIONS {
        return None;
    }
    match *bytes.get(dims)? {
        b'Z' | b'B' | b'S' | b'C' | b'I' | b'F' | b'J' | b'D' => Some(dims + 1),
        b'L' => {
            let rest = &s[dims + 1..];
            let end = rest.find(';')?;
            if is_valid_binary_name(&rest[..end]) {
                Some(dims + 1 + end + 1)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `java/lang/String` style binary name
pub fn is_valid_binary_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('/')
            .all(|segment| !segment.is_empty() && !segment.contains(['.', ';', '[']))
}

/// Descriptor of a field or array element type
pub fn is_valid_field_descriptor(s: &str) -> bool {
    field_descriptor_prefix(s) == Some(s.len())
}

/// Field descriptor or `V`
pub fn is_valid_type_descriptor(s: &str) -> bool {
    s == "V" || is_valid_field_descriptor(s)
}

/// Array or class-reference descriptor (`[...` or `L...;`)
pub fn is_reference_descriptor(s: &str) -> bool {
    (s.starts_with('[') || s.starts_with('L')) && is_valid_field_descriptor(s)
}

/// Whether `s` names a primitive type (`V` included)
pub fn is_primitive_descriptor(s: &str) -> bool {
    s.len() == 1 && JavaKind::from_descriptor(s).is_some_and(|k| k.is_primitive())
}

/// Name as it appears in a `CONSTANT_Class` entry
pub fn is_valid_class_name(name: &str) -> bool {
    if name.starts_with('[') {
        is_valid_field_descriptor(name)
    } else {
        is_valid_binary_name(name)
    }
}

/// `java/lang/String` -> `Ljava/lang/String;`; array names are already descriptors
pub fn class_name_to_descriptor(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{};", name)
    }
}

/// `Ljava/lang/String;` -> `java/lang/String`; arrays and primitives are returned unchanged
pub fn descriptor_to_class_name(descriptor: &str) -> &str {
    if descriptor.starts_with('L') && descriptor.ends_with(';') {
        &descriptor[1..descriptor.len() - 1]
    } else {
        descriptor
    }
}

/// Number of leading `[`
pub fn array_dimensions(descriptor: &str) -> usize {
    descriptor.bytes().take_while(|b| *b == b'[').count()
}

/// Descriptor with every array dimension stripped
pub fn elemental_descriptor(descriptor: &str) -> &str {
    &descriptor[array_dimensions(descriptor)..]
}

/// Descriptor with one array dimension stripped
pub fn component_descriptor(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

/// Package part of a type descriptor or internal name (`java/lang`)
pub fn package_of(name: &str) -> &str {
    let name = descriptor_to_class_name(elemental_descriptor(name));
    match name.rfind('/') {
        Some(pos) => &name[..pos],
        None => "",
    }
}

/// Human readable name (`java.lang.String`, `int[]`)
pub fn to_java_name(descriptor: &str) -> String {
    let dims = array_dimensions(descriptor);
    let elemental = &descriptor[dims..];
    let mut out = if elemental.len() == 1 {
        JavaKind::from_descriptor(elemental)
            .map(|k| k.java_name().to_string())
            .unwrap_or_else(|| elemental.to_string())
    } else {
        descriptor_to_class_name(elemental).replace('/', ".")
    };
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

/// Parsed method signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature<'a> {
    /// Parameter descriptors in order
    pub parameters: Vec<&'a str>,
    /// Return descriptor
    pub return_type: &'a str,
}

impl ParsedSignature<'_> {
    /// Argument slots, not counting the receiver
    pub fn parameter_slots(&self) -> u32 {
        self.parameters
            .iter()
            .filter_map(|p| JavaKind::from_descriptor(p))
            .map(JavaKind::slot_count)
            .sum()
    }
}

/// Split `(IJ)V` into parameters and return type
pub fn parse_signature(signature: &str) -> Option<ParsedSignature<'_>> {
    let body = signature.strip_prefix('(')?;
    let close = body.find(')')?;
    let mut params = &body[..close];
    let return_type = &body[close + 1..];
    if !is_valid_type_descriptor(return_type) {
        return None;
    }
    let mut parameters = Vec::new();
    while !params.is_empty() {
        let len = field_descriptor_prefix(params)?;
        parameters.push(&params[..len]);
        params = &params[len..];
    }
    Some(ParsedSignature {
        parameters,
        return_type,
    })
}

/// Whether `signature` is a well-formed method descriptor
pub fn is_valid_method_signature(signature: &str) -> bool {
    parse_signature(signature).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_descriptors() {
        assert!(is_valid_field_descriptor("I"));
        assert!(is_valid_field_descriptor("Ljava/lang/Object;"));
        assert!(is_valid_field_descriptor("[[J"));
        assert!(is_valid_field_descriptor("[Ljava/lang/String;"));
        assert!(!is_valid_field_descriptor("V"));
        assert!(!is_valid_field_descriptor("L;"));
        assert!(!is_valid_field_descriptor("Ljava/lang/Object"));
        assert!(!is_valid_field_descriptor("Ljava.lang.Object;"));
        assert!(!is_valid_field_descriptor("Ljava//Object;"));
        assert!(!is_valid_field_descriptor("II"));
        assert!(!is_valid_field_descriptor("["));
    }

    #[test]
    fn test_dimension_limit() {
        let ok = format!("{}I", "[".repeat(255));
        let too_deep = format!("{}I", "[".repeat(256));
        assert!(is_valid_field_descriptor(&ok));
        assert!(!is_valid_field_descriptor(&too_deep));
    }

    #[test]
    fn test_reference_descriptors() {
        assert!(is_reference_descriptor("Lp/A;"));
        assert!(is_reference_descriptor("[I"));
        assert!(!is_reference_descriptor("I"));
        assert!(is_primitive_descriptor("V"));
        assert!(!is_primitive_descriptor("Lp/A;"));
    }

    #[test]
    fn test_class_name_conversion() {
        assert_eq!(class_name_to_descriptor("java/lang/String"), "Ljava/lang/String;");
        assert_eq!(class_name_to_descriptor("[I"), "[I");
        assert_eq!(descriptor_to_class_name("Ljava/lang/String;"), "java/lang/String");
        assert_eq!(descriptor_to_class_name("[I"), "[I");
        assert!(is_valid_class_name("[Lp/A;"));
        assert!(!is_valid_class_name("Lp/A;;"));
    }

    #[test]
    fn test_array_helpers() {
        assert_eq!(array_dimensions("[[Lp/A;"), 2);
        assert_eq!(elemental_descriptor("[[Lp/A;"), "Lp/A;");
        assert_eq!(component_descriptor("[[I"), Some("[I"));
        assert_eq!(component_descriptor("I"), None);
    }

    #[test]
    fn test_java_names() {
        assert_eq!(to_java_name("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(to_java_name("[[I"), "int[][]");
        assert_eq!(package_of("Ljava/lang/String;"), "java/lang");
        assert_eq!(package_of("[LTop;"), "");
    }

    #[test]
    fn test_parse_signature() {
        let sig = parse_signature("(IJ[Ljava/lang/String;)V").unwrap();
        assert_eq!(sig.parameters, vec!["I", "J", "[Ljava/lang/String;"]);
        assert_eq!(sig.return_type, "V");
        assert_eq!(sig.parameter_slots(), 4);

        assert!(parse_signature("()Ljava/lang/Object;").is_some());
        assert!(parse_signature("(V)V").is_none());
        assert!(parse_signature("(I").is_none());
        assert!(parse_signature("()").is_none());
    }
}
