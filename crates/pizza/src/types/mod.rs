/// Runtime object types that carry behaviour beyond plain data.
///
/// Classes and instances implement the object model, namespaces are the result of imports,
/// enums construct tagged instances, patterns match structured values, and natives are the
/// host-side functions the VM can call.
pub mod class;
pub mod enums;
pub mod instance;
pub mod namespace;
pub mod native;
pub mod pattern;

pub use class::{Class, ClassAttr, FieldLookup, Method};
pub use enums::{EnumType, EnumVariant};
pub use instance::Instance;
pub use namespace::Namespace;
pub use native::{Arity, NativeFn, NativeFunction, TypeTag};
pub use pattern::Pattern;
