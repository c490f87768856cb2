//! Access control
//!
//! One predicate decides whether a class may use a member; resolution and
//! the compiler interface both go through it.

use crate::class::{Klass, KlassKind, LoaderId};
use crate::descriptor::package_of;
use crate::flags::AccessFlags;
use crate::runtime::Runtime;

/// Same defining loader and same package
pub fn same_package(a: &Klass, b: &Klass) -> bool {
    a.loader() == b.loader() && package_of(a.name()) == package_of(b.name())
}

/// Whether `accessor` may refer to `target` at all
pub fn is_class_accessible(rt: &Runtime, accessor: &Klass, target: &Klass) -> bool {
    is_accessible_from(rt, accessor.loader(), accessor.name(), target)
}

/// Class accessibility for a class named `name` that may not be defined yet
pub(crate) fn is_accessible_from(rt: &Runtime, loader: LoaderId, name: &str, target: &Klass) -> bool {
    match target.kind() {
        KlassKind::Primitive(_) => true,
        KlassKind::Array { elemental, .. } => {
            is_accessible_from(rt, loader, name, &rt.klass(elemental))
        }
        KlassKind::Instance => {
            target.flags().is_public()
                || (target.loader() == loader && package_of(target.name()) == package_of(name))
        }
    }
}

/// Whether `accessor` may use a member with `flags` declared in `declaring`
pub fn check_access(rt: &Runtime, accessor: &Klass, declaring: &Klass, flags: AccessFlags) -> bool {
    if accessor.id() == declaring.id() {
        return true;
    }
    if !is_class_accessible(rt, accessor, declaring) {
        return false;
    }
    if flags.is_public() {
        return true;
    }
    // nestmates are not modelled
    if flags.is_private() {
        return false;
    }
    if same_package(accessor, declaring) {
        return true;
    }
    flags.is_protected() && rt.is_subclass_of(accessor, declaring.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassDefinition, LoaderId};

    #[test]
    fn test_member_access() {
        let rt = Runtime::new().unwrap();
        let a = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/A"))
            .unwrap();
        let b = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/B"))
            .unwrap();
        let sub = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/Sub").extends("p/A"))
            .unwrap();
        let other = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/Other"))
            .unwrap();

        assert!(check_access(&rt, &b, &a, AccessFlags::NONE));
        assert!(!check_access(&rt, &other, &a, AccessFlags::NONE));
        assert!(check_access(&rt, &sub, &a, AccessFlags::PROTECTED));
        assert!(!check_access(&rt, &other, &a, AccessFlags::PROTECTED));
        assert!(!check_access(&rt, &b, &a, AccessFlags::PRIVATE));
        assert!(check_access(&rt, &a, &a, AccessFlags::PRIVATE));
        assert!(check_access(&rt, &other, &a, AccessFlags::PUBLIC));
    }

    #[test]
    fn test_package_private_class() {
        let rt = Runtime::new().unwrap();
        let hidden = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/Hidden").flags(AccessFlags::NONE))
            .unwrap();
        let same = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/Same"))
            .unwrap();
        let other = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/Other"))
            .unwrap();

        assert!(is_class_accessible(&rt, &same, &hidden));
        assert!(!is_class_accessible(&rt, &other, &hidden));
        assert!(!check_access(&rt, &other, &hidden, AccessFlags::PUBLIC));

        let array = rt.array_of(&hidden).unwrap();
        assert!(!is_class_accessible(&rt, &other, &array));
    }

    #[test]
    fn test_loaders_split_packages() {
        let rt = Runtime::new().unwrap();
        let a = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/A"))
            .unwrap();
        let b = rt
            .define_class(LoaderId::from_raw(1), ClassDefinition::new("p/B"))
            .unwrap();
        assert!(!same_package(&a, &b));
    }
}
