//! Access and property flags for classes, methods and fields

/// Class, method or field modifier bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(u16);

impl AccessFlags {
    /// No flags
    pub const NONE: Self = Self(0x0000);
    /// `public`
    pub const PUBLIC: Self = Self(0x0001);
    /// `private`
    pub const PRIVATE: Self = Self(0x0002);
    /// `protected`
    pub const PROTECTED: Self = Self(0x0004);
    /// `static`
    pub const STATIC: Self = Self(0x0008);
    /// `final`
    pub const FINAL: Self = Self(0x0010);
    /// `synchronized` on methods, `ACC_SUPER` on classes
    pub const SYNCHRONIZED: Self = Self(0x0020);
    /// Bridge method
    pub const BRIDGE: Self = Self(0x0040);
    /// `volatile` field (shares the bridge bit)
    pub const VOLATILE: Self = Self(0x0040);
    /// Varargs method
    pub const VARARGS: Self = Self(0x0080);
    /// `transient` field (shares the varargs bit)
    pub const TRANSIENT: Self = Self(0x0080);
    /// `native`
    pub const NATIVE: Self = Self(0x0100);
    /// Interface class
    pub const INTERFACE: Self = Self(0x0200);
    /// `abstract`
    pub const ABSTRACT: Self = Self(0x0400);
    /// `strictfp`
    pub const STRICT: Self = Self(0x0800);
    /// Compiler generated
    pub const SYNTHETIC: Self = Self(0x1000);
    /// Annotation interface
    pub const ANNOTATION: Self = Self(0x2000);
    /// Enum class or constant
    pub const ENUM: Self = Self(0x4000);

    /// Bits a compiler may observe through `getModifiers`
    pub const JVM_MODIFIERS: Self = Self(0x0FFF);

    /// Create from raw bits
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags
    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection of flags
    pub const fn intersection(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Remove flags
    pub const fn difference(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_public(&self) -> bool {
        self.contains(Self::PUBLIC)
    }

    pub fn is_private(&self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub fn is_protected(&self) -> bool {
        self.contains(Self::PROTECTED)
    }

    /// Neither public, protected nor private
    pub fn is_package_private(&self) -> bool {
        self.0 & (Self::PUBLIC.0 | Self::PRIVATE.0 | Self::PROTECTED.0) == 0
    }

    pub fn is_static(&self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.contains(Self::FINAL)
    }

    pub fn is_native(&self) -> bool {
        self.contains(Self::NATIVE)
    }

    pub fn is_interface(&self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_synthetic(&self) -> bool {
        self.contains(Self::SYNTHETIC)
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::fmt::Display for AccessFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_combinations() {
        let flags = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL;
        assert!(flags.is_public());
        assert!(flags.is_static());
        assert!(!flags.is_private());
        assert_eq!(flags.bits(), 0x0019);
        assert_eq!(flags.difference(AccessFlags::STATIC).bits(), 0x0011);
    }

    #[test]
    fn test_package_private() {
        assert!(AccessFlags::NONE.is_package_private());
        assert!(AccessFlags::FINAL.is_package_private());
        assert!(!AccessFlags::PROTECTED.is_package_private());
    }
}
