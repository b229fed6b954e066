//! Bean introspection metadata.
//!
//! Mirrors what the registry reports for one managed object: the
//! implementation class, a description, and descriptors for attributes,
//! constructors, operations and notifications.

/// One described parameter of an operation or constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    /// Parameter name.
    pub name: String,
    /// Parameter type name.
    pub type_name: String,
    /// Description.
    pub description: String,
}

/// Descriptor for one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDescriptor {
    /// Attribute name.
    pub name: String,
    /// Attribute type name.
    pub type_name: String,
    /// Description.
    pub description: String,
    /// Whether the attribute can be read.
    pub readable: bool,
    /// Whether the attribute can be written.
    pub writable: bool,
}

/// Descriptor for one constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtorDescriptor {
    /// Constructor name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Ordered parameters.
    pub params: Vec<ParamDescriptor>,
}

/// Descriptor for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDescriptor {
    /// Operation name.
    pub name: String,
    /// Return type name.
    pub return_type: String,
    /// Description.
    pub description: String,
    /// Ordered parameters.
    pub params: Vec<ParamDescriptor>,
}

/// Descriptor for one notification kind the bean emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifDescriptor {
    /// Notification name.
    pub name: String,
    /// Notification type name.
    pub type_name: String,
    /// Description.
    pub description: String,
}

/// Full introspection metadata for one bean.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeanInfo {
    /// Implementation class name.
    pub class_name: String,
    /// Description.
    pub description: String,
    /// Attribute descriptors.
    pub attributes: Vec<AttrDescriptor>,
    /// Constructor descriptors.
    pub constructors: Vec<CtorDescriptor>,
    /// Operation descriptors.
    pub operations: Vec<OpDescriptor>,
    /// Notification descriptors.
    pub notifications: Vec<NotifDescriptor>,
}

impl BeanInfo {
    /// Create an empty info for the given class.
    pub fn new(class_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Look up an operation descriptor by name.
    pub fn operation(&self, name: &str) -> Option<&OpDescriptor> {
        self.operations.iter().find(|o| o.name == name)
    }

    /// Look up an attribute descriptor by name.
    pub fn attribute(&self, name: &str) -> Option<&AttrDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let mut info = BeanInfo::new("app.CachePool", "a cache pool");
        info.attributes.push(AttrDescriptor {
            name: "Size".into(),
            type_name: "i32".into(),
            description: "entry count".into(),
            readable: true,
            writable: false,
        });
        info.operations.push(OpDescriptor {
            name: "clear".into(),
            return_type: "void".into(),
            description: "drop all entries".into(),
            params: vec![],
        });

        assert!(info.attribute("Size").is_some());
        assert!(info.attribute("Missing").is_none());
        assert_eq!(info.operation("clear").unwrap().return_type, "void");
    }
}
