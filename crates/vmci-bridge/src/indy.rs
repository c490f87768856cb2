//! Invokedynamic site tables
//!
//! Compiled code names an invokedynamic site by its position among all
//! `invokedynamic` instructions of the class: methods in declaration order,
//! instructions in code order. The table maps that site index back to the
//! constant pool index the instruction carries.

use std::sync::Arc;

use tracing::debug;
use vmci_runtime::bytecode::{self, BytecodeStream};
use vmci_runtime::{Klass, Runtime};

pub(crate) fn scan_sites(rt: &Runtime, klass: &Klass) -> Arc<[u16]> {
    let mut sites = Vec::new();
    for &id in klass.methods() {
        let Some(code) = rt.method(id).code() else {
            continue;
        };
        for (bci, opcode) in BytecodeStream::new(&code.code) {
            if opcode == bytecode::INVOKEDYNAMIC {
                if let Some(cpi) = bytecode::cp_index_at(&code.code, bci) {
                    sites.push(cpi);
                }
            }
        }
    }
    debug!(
        class = klass.name().as_str(),
        sites = sites.len(),
        "built invokedynamic site table"
    );
    sites.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmci_runtime::bytecode::{INVOKEDYNAMIC, POP, RETURN};
    use vmci_runtime::{AccessFlags, ClassDefinition, CodeAttribute, LoaderId, MethodDefinition};

    #[test]
    fn test_sites_follow_declaration_order() {
        let rt = Runtime::new().unwrap();
        let klass = rt
            .define_class(
                LoaderId::BOOT,
                ClassDefinition::new("p/Sites")
                    .method(
                        MethodDefinition::new("a", "()V", AccessFlags::PUBLIC).with_code(CodeAttribute::new(
                            2,
                            1,
                            vec![INVOKEDYNAMIC, 0, 9, 0, 0, POP, INVOKEDYNAMIC, 0, 4, 0, 0, POP, RETURN],
                        )),
                    )
                    .method(MethodDefinition::new("b", "()V", AccessFlags::ABSTRACT))
                    .method(
                        MethodDefinition::new("c", "()V", AccessFlags::PUBLIC).with_code(CodeAttribute::new(
                            2,
                            1,
                            vec![INVOKEDYNAMIC, 0, 7, 0, 0, POP, RETURN],
                        )),
                    )
                    .flags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT),
            )
            .unwrap();
        assert_eq!(&*scan_sites(&rt, &klass), &[9, 4, 7]);
    }
}
