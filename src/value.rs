//! Runtime values stored in dictionaries and passed through generators.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use crate::Error;

/// [`Value`] is a dynamically typed runtime value.
///
/// Cloning a [`Value`] never deep-copies: strings, tuples, types and objects are reference
/// counted.
#[derive(Clone)]
pub enum Value {
    /// The null value.
    None,
    /// A boolean; compares and hashes equal to `0` and `1`.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A double precision float.
    Float(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// An immutable sequence of values.
    Tuple(Arc<[Value]>),
    /// A type object, compared by identity.
    Type(TypeHandle),
    /// A user-level object.
    Object(Arc<dyn RuntimeObject>),
}

/// [`TypeTag`] identifies the runtime type of a [`Value`].
///
/// Two values share a [`TypeTag`] if and only if a dictionary may treat them as keys of the
/// same type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeTag {
    None,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    Type,
    /// A user-level object of the given class.
    Object(TypeHandle),
}

/// [`RuntimeObject`] is implemented by user-level objects that can be stored in a [`Value`].
pub trait RuntimeObject: Debug + Send + Sync {
    /// Returns the class of the object.
    fn class(&self) -> TypeHandle;

    /// Returns the hash code of the object.
    ///
    /// Objects are unhashable unless they override this method.
    fn hash(&self) -> Result<i32, Error> {
        Err(Error::Unhashable(self.class().name().to_owned()))
    }

    /// Compares the object with `other`.
    ///
    /// The default implementation compares identities.
    fn equals(&self, other: &Value) -> Result<bool, Error> {
        let this = (self as *const Self).cast::<()>();
        Ok(matches!(other, Value::Object(o) if Arc::as_ptr(o).cast::<()>() == this))
    }

    /// Returns a printable representation of the object.
    fn repr(&self) -> String {
        format!("<{} object>", self.class().name())
    }
}

/// [`TypeHandle`] is a reference to a type object.
///
/// Type objects are compared by identity; two handles are equal only if they were cloned from
/// the same [`TypeHandle::new`] call.
#[derive(Clone)]
pub struct TypeHandle(Arc<TypeInfo>);

struct TypeInfo {
    name: Box<str>,
    base: Option<TypeHandle>,
}

impl TypeHandle {
    /// Creates a new root type.
    #[inline]
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::new(TypeInfo {
            name: name.into(),
            base: None,
        }))
    }

    /// Creates a new type deriving from `base`.
    #[inline]
    #[must_use]
    pub fn with_base(name: &str, base: &TypeHandle) -> Self {
        Self(Arc::new(TypeInfo {
            name: name.into(),
            base: Some(base.clone()),
        }))
    }

    /// Returns the name of the type.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Returns the base type.
    #[inline]
    #[must_use]
    pub fn base(&self) -> Option<&TypeHandle> {
        self.0.base.as_ref()
    }

    /// Returns `true` if `self` is `other` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &TypeHandle) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == other {
                return true;
            }
            current = ty.base();
        }
        false
    }

    /// Returns a hash code derived from the identity of the type object.
    #[allow(clippy::cast_possible_truncation)] // Intended truncation.
    #[inline]
    #[must_use]
    pub fn identity_hash(&self) -> i32 {
        let addr = Arc::as_ptr(&self.0) as usize as u64;
        ((addr >> 4) ^ (addr >> 36)) as i32
    }
}

impl PartialEq for TypeHandle {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TypeHandle {}

impl Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name())
    }
}

impl Value {
    /// Creates a tuple from the supplied values.
    #[inline]
    pub fn tuple<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    /// Wraps a user-level object.
    #[inline]
    pub fn object<O: RuntimeObject + 'static>(object: O) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Returns the [`TypeTag`] of the value.
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::None => TypeTag::None,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Float(_) => TypeTag::Float,
            Self::Str(_) => TypeTag::Str,
            Self::Tuple(_) => TypeTag::Tuple,
            Self::Type(_) => TypeTag::Type,
            Self::Object(o) => TypeTag::Object(o.class()),
        }
    }

    /// Returns the name of the type of the value.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::None => "NoneType".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Int(_) => "int".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Str(_) => "str".to_owned(),
            Self::Tuple(_) => "tuple".to_owned(),
            Self::Type(_) => "type".to_owned(),
            Self::Object(o) => o.class().name().to_owned(),
        }
    }

    /// Returns `true` if the value is [`Value::None`].
    #[inline]
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the integer if the value is an [`Value::Int`].
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Returns the string slice if the value is a [`Value::Str`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(s) = self {
            Some(s)
        } else {
            None
        }
    }
}

impl Default for Value {
    #[inline]
    fn default() -> Self {
        Self::None
    }
}

/// Structural comparison used by tests and containers of values.
///
/// This is not the language-level equality; see [`KeyComparer`](crate::KeyComparer). Floats
/// compare by `==` and objects by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    Display::fmt(item, f)?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Type(t) => Debug::fmt(t, f),
            Self::Object(o) => f.write_str(&o.repr()),
        }
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<TypeHandle> for Value {
    #[inline]
    fn from(t: TypeHandle) -> Self {
        Self::Type(t)
    }
}

impl From<Vec<Value>> for Value {
    #[inline]
    fn from(items: Vec<Value>) -> Self {
        Self::Tuple(items.into())
    }
}

#[cfg(test)]
mod test {
    use super::{RuntimeObject, TypeHandle, TypeTag, Value};
    use crate::Error;

    #[derive(Debug)]
    struct Point(TypeHandle);

    impl RuntimeObject for Point {
        fn class(&self) -> TypeHandle {
            self.0.clone()
        }
    }

    #[test]
    fn type_tags() {
        let class = TypeHandle::new("Point");
        let a = Value::object(Point(class.clone()));
        let b = Value::object(Point(class.clone()));
        assert_eq!(a.type_tag(), b.type_tag());
        assert_eq!(a.type_tag(), TypeTag::Object(class));
        assert_ne!(
            a.type_tag(),
            Value::object(Point(TypeHandle::new("Point"))).type_tag()
        );
        assert_eq!(Value::from(1).type_tag(), TypeTag::Int);
        assert_ne!(Value::from(true).type_tag(), TypeTag::Int);
    }

    #[test]
    fn object_defaults() {
        let class = TypeHandle::new("Point");
        let a = Value::object(Point(class.clone()));
        let b = Value::object(Point(class));
        let Value::Object(o) = &a else {
            unreachable!();
        };
        assert!(matches!(o.hash(), Err(Error::Unhashable(name)) if name == "Point"));
        assert!(o.equals(&a).unwrap());
        assert!(!o.equals(&b).unwrap());
        assert_eq!(a.to_string(), "<Point object>");
    }

    #[test]
    fn subclass() {
        let base = TypeHandle::new("Base");
        let derived = TypeHandle::with_base("Derived", &base);
        assert!(derived.is_subclass_of(&base));
        assert!(derived.is_subclass_of(&derived));
        assert!(!base.is_subclass_of(&derived));
    }

    #[test]
    fn display() {
        assert_eq!(Value::tuple([Value::from(1)]).to_string(), "(1,)");
        assert_eq!(
            Value::tuple([Value::from("a"), Value::from(2.0)]).to_string(),
            "('a', 2.0)"
        );
        assert_eq!(Value::None.to_string(), "None");
    }
}
