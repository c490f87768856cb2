//! Method mirrors
//!
//! A [`MethodHandle`] always names the canonical identity of a method:
//! default-method copies, miranda copies and poison pills installed by the
//! linker collapse onto the method they were copied from. Handles compare by
//! that identity alone.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use vmci_runtime::descriptor;
use vmci_runtime::method::{ExceptionHandler, LineNumber};
use vmci_runtime::{AccessFlags, CodeAttribute, Method, MethodId, Symbol};

use crate::context::BridgeContext;
use crate::pool::ConstantPoolHandle;
use crate::types::InstanceType;
use crate::BridgeResult;

#[derive(Debug, Clone, Copy)]
pub struct MethodHandle {
    method: MethodId,
    holder: InstanceType,
    poison_pill: bool,
}

/// Mirror of `method`, normalized to its canonical identity
///
/// A supplied `holder` is kept as is; it must mirror the class declaring
/// the canonical method.
pub fn to_method(cx: &BridgeContext, method: MethodId, holder: Option<&InstanceType>) -> BridgeResult<MethodHandle> {
    cx.ensure_enabled()?;
    Ok(method_of(cx, method, holder))
}

pub(crate) fn method_of(cx: &BridgeContext, method: MethodId, holder: Option<&InstanceType>) -> MethodHandle {
    let rt = cx.runtime();
    let viewed = rt.method(method);
    let canonical = rt.method(viewed.identity());
    let holder = match holder {
        Some(holder) => *holder,
        None => InstanceType::new(canonical.declaring()),
    };
    assert_eq!(
        holder.klass_id(),
        canonical.declaring(),
        "holder of {}{} is not its declaring class",
        canonical.name(),
        canonical.signature()
    );
    MethodHandle {
        method: canonical.id(),
        holder,
        poison_pill: viewed.is_poison_pill(),
    }
}

impl PartialEq for MethodHandle {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
    }
}

impl Eq for MethodHandle {}

impl Hash for MethodHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state)
    }
}

impl MethodHandle {
    /// Canonical identity
    pub fn id(&self) -> MethodId {
        self.method
    }

    /// Class the handle was obtained through; always the declaring class
    pub fn holder(&self) -> InstanceType {
        self.holder
    }

    /// Stands for a conflicting default that must never be invoked
    pub fn is_poison_pill(&self) -> bool {
        self.poison_pill
    }

    /// Runtime record behind the canonical identity
    pub fn method(&self, cx: &BridgeContext) -> Arc<Method> {
        cx.runtime().method(self.method)
    }

    /// Simple name
    pub fn name(&self, cx: &BridgeContext) -> Symbol {
        self.method(cx).name().clone()
    }

    /// Method descriptor
    pub fn signature(&self, cx: &BridgeContext) -> Symbol {
        self.method(cx).signature().clone()
    }

    /// Modifiers visible to the compiler
    pub fn modifiers(&self, cx: &BridgeContext) -> AccessFlags {
        self.method(cx).flags().intersection(AccessFlags::JVM_MODIFIERS)
    }

    /// Declaring class
    pub fn declaring_type(&self) -> InstanceType {
        self.holder
    }

    /// Pool of the declaring class
    pub fn constant_pool(&self) -> ConstantPoolHandle {
        self.holder.constant_pool()
    }

    /// Vtable slot, `-1` for methods without one
    pub fn vtable_index(&self, cx: &BridgeContext) -> i32 {
        self.method(cx).vtable_index()
    }

    /// An `<init>` method
    pub fn is_constructor(&self, cx: &BridgeContext) -> bool {
        self.method(cx).is_constructor()
    }

    /// The `<clinit>` method
    pub fn is_class_initializer(&self, cx: &BridgeContext) -> bool {
        self.method(cx).is_class_initializer()
    }

    /// Non-abstract instance method of an interface
    pub fn is_default(&self, cx: &BridgeContext) -> bool {
        self.method(cx).is_default()
    }

    pub fn is_abstract(&self, cx: &BridgeContext) -> bool {
        self.method(cx).is_abstract()
    }

    pub fn is_native(&self, cx: &BridgeContext) -> bool {
        self.method(cx).is_native()
    }

    pub fn is_static(&self, cx: &BridgeContext) -> bool {
        self.method(cx).is_static()
    }

    /// Declared with a trailing variable-arity parameter
    pub fn is_varargs(&self, cx: &BridgeContext) -> bool {
        self.method(cx).flags().contains(AccessFlags::VARARGS)
    }

    pub fn is_synthetic(&self, cx: &BridgeContext) -> bool {
        self.method(cx).flags().is_synthetic()
    }

    /// Compiler-generated bridge to a covariant override
    pub fn is_bridge(&self, cx: &BridgeContext) -> bool {
        self.method(cx).flags().contains(AccessFlags::BRIDGE)
    }

    /// `MethodHandle.invoke` style method typed at each call site
    pub fn is_signature_polymorphic(&self, cx: &BridgeContext) -> bool {
        cx.runtime().is_signature_polymorphic(&self.method(cx))
    }

    /// A call can only ever reach this method
    pub fn can_be_statically_bound(&self, cx: &BridgeContext) -> bool {
        let m = self.method(cx);
        if m.is_abstract() {
            return false;
        }
        m.is_static()
            || m.is_private()
            || m.is_final()
            || m.is_constructor()
            || cx.instance_klass(&self.holder).flags().is_final()
    }

    /// No loaded subtype overrides this method
    ///
    /// Advisory; later loading may invalidate the answer.
    pub fn is_leaf(&self, cx: &BridgeContext) -> bool {
        cx.runtime().is_leaf_method(&self.method(cx))
    }

    /// Current body, `None` for abstract and native methods
    pub fn code(&self, cx: &BridgeContext) -> Option<Arc<CodeAttribute>> {
        self.method(cx).code()
    }

    /// Bytecode length, `0` without code
    pub fn code_size(&self, cx: &BridgeContext) -> usize {
        self.code(cx).map_or(0, |c| c.code.len())
    }

    pub fn max_locals(&self, cx: &BridgeContext) -> u16 {
        self.code(cx).map_or(0, |c| c.max_locals)
    }

    /// Operand stack depth the code needs
    pub fn max_stack_size(&self, cx: &BridgeContext) -> u16 {
        self.code(cx).map_or(0, |c| c.max_stack)
    }

    /// Bytecode index to source line mapping
    pub fn line_number_table(&self, cx: &BridgeContext) -> Vec<LineNumber> {
        self.code(cx).map_or_else(Vec::new, |c| c.line_numbers.clone())
    }

    /// Handlers in code order
    pub fn exception_handlers(&self, cx: &BridgeContext) -> Vec<ExceptionHandler> {
        self.code(cx).map_or_else(Vec::new, |c| c.exception_handlers.clone())
    }

    /// Declared parameters, the receiver excluded
    pub fn parameter_count(&self, cx: &BridgeContext) -> usize {
        descriptor::parse_signature(self.method(cx).signature()).map_or(0, |sig| sig.parameters.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use vmci_runtime::bytecode::{ALOAD_0, ARETURN};
    use vmci_runtime::{ClassDefinition, LoaderId, MethodDefinition, MethodOrigin, Runtime};

    fn context() -> BridgeContext {
        let rt = Runtime::new().unwrap();
        rt.define_class(
            LoaderId::BOOT,
            ClassDefinition::interface("p/I")
                .method(MethodDefinition::new("d", "()V", AccessFlags::PUBLIC))
                .method(MethodDefinition::new("x", "()V", AccessFlags::PUBLIC)),
        )
        .unwrap();
        rt.define_class(
            LoaderId::BOOT,
            ClassDefinition::interface("p/J").method(MethodDefinition::new("x", "()V", AccessFlags::PUBLIC)),
        )
        .unwrap();
        let mut code = CodeAttribute::new(1, 2, vec![ALOAD_0, ARETURN]);
        code.line_numbers.push(LineNumber { bci: 0, line: 12 });
        let c = rt
            .define_class(
                LoaderId::BOOT,
                ClassDefinition::new("p/C")
                    .implements("p/I")
                    .implements("p/J")
                    .flags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
                    .method(
                        MethodDefinition::new("self", "(ILjava/lang/String;)Ljava/lang/Object;", AccessFlags::PUBLIC)
                            .with_code(code),
                    ),
            )
            .unwrap();
        rt.link(&c).unwrap();
        BridgeContext::new(Arc::new(rt), BridgeConfig::default())
    }

    #[test]
    fn test_copies_collapse_to_identity() {
        let cx = context();
        let rt = cx.runtime();
        let c = rt.find_loaded("Lp/C;", LoaderId::BOOT).unwrap();
        let i = rt.find_loaded("Lp/I;", LoaderId::BOOT).unwrap();
        let declared_d = rt.declared_method(&i, "d", "()V").unwrap();
        let copy = c
            .vtable()
            .unwrap()
            .iter()
            .copied()
            .find(|&id| rt.method(id).origin() == MethodOrigin::DefaultCopy)
            .unwrap();
        assert_ne!(copy, declared_d);

        let via_copy = to_method(&cx, copy, None).unwrap();
        let direct = to_method(&cx, declared_d, None).unwrap();
        assert_eq!(via_copy, direct);
        assert_eq!(via_copy.id(), declared_d);
        assert_eq!(via_copy.holder().klass_id(), i.id());
        assert!(!via_copy.is_poison_pill());
    }

    #[test]
    fn test_poison_pill_is_recorded() {
        let cx = context();
        let rt = cx.runtime();
        let c = rt.find_loaded("Lp/C;", LoaderId::BOOT).unwrap();
        let pill = c
            .vtable()
            .unwrap()
            .iter()
            .copied()
            .find(|&id| rt.method(id).is_poison_pill())
            .unwrap();
        let handle = to_method(&cx, pill, None).unwrap();
        assert!(handle.is_poison_pill());
        assert_eq!(handle.id(), rt.method(pill).identity());
        // equality ignores the flag
        assert_eq!(handle, to_method(&cx, rt.method(pill).identity(), None).unwrap());
    }

    #[test]
    #[should_panic(expected = "is not its declaring class")]
    fn test_holder_must_declare() {
        let cx = context();
        let rt = cx.runtime();
        let i = rt.find_loaded("Lp/I;", LoaderId::BOOT).unwrap();
        let d = rt.declared_method(&i, "d", "()V").unwrap();
        let _ = to_method(&cx, d, Some(&InstanceType::new(rt.object_klass().id())));
    }

    #[test]
    fn test_code_queries() {
        let cx = context();
        let rt = cx.runtime();
        let c = InstanceType::new(rt.find_loaded("Lp/C;", LoaderId::BOOT).unwrap().id());
        let m = c
            .find_method(&cx, "self", "(ILjava/lang/String;)Ljava/lang/Object;")
            .unwrap()
            .unwrap();
        assert_eq!(m.code_size(&cx), 2);
        assert_eq!(m.max_locals(&cx), 2);
        assert_eq!(m.max_stack_size(&cx), 1);
        assert_eq!(m.parameter_count(&cx), 2);
        assert_eq!(m.line_number_table(&cx), vec![LineNumber { bci: 0, line: 12 }]);
        assert!(m.exception_handlers(&cx).is_empty());
        assert!(!m.can_be_statically_bound(&cx));
        assert_eq!(m.vtable_index(&cx), 5);

        rt.method(m.id()).redefine(None);
        assert!(m.code(&cx).is_none());
    }

    #[test]
    fn test_static_binding() {
        let cx = context();
        let object = InstanceType::new(cx.runtime().object_klass().id());
        let init = object.declared_constructors(&cx).unwrap().pop().unwrap();
        assert!(init.can_be_statically_bound(&cx));
        let hash = object.find_method(&cx, "hashCode", "()I").unwrap().unwrap();
        assert!(hash.is_native(&cx));
        assert!(!hash.can_be_statically_bound(&cx));
    }

    #[test]
    fn test_disabled_context_mints_no_handles() {
        let cx = context();
        let object = InstanceType::new(cx.runtime().object_klass().id());
        let hash = object.find_method(&cx, "hashCode", "()I").unwrap().unwrap();
        cx.set_enabled(false);
        assert!(matches!(to_method(&cx, hash.id(), None), Err(crate::BridgeError::Disabled)));
        assert!(matches!(object.declared_methods(&cx), Err(crate::BridgeError::Disabled)));
        assert_eq!(hash.name(&cx).as_str(), "hashCode");
    }
}
