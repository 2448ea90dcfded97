use std::borrow::Borrow;
use std::fmt;

/// The one channel name the reference protocol recognizes.
pub const PARENT: &str = "parent";

/// Identifier of a logical channel, as announced on the control stream.
///
/// Opaque: any announced text is a name. Whether the relay serves it is
/// decided when a descriptor arrives for it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The reference channel, [`PARENT`].
    pub fn parent() -> Self {
        Self::new(PARENT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ChannelName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_is_the_reference_name() {
        let name = ChannelName::parent();
        assert_eq!(name.as_str(), "parent");
        assert_eq!(name.to_string(), "parent");
        assert_eq!(name, ChannelName::from(PARENT));
    }

    #[test]
    fn any_text_is_a_name() {
        for text in ["", "a\tb", "sibling-2", "\u{7f}"] {
            assert_eq!(ChannelName::new(text).as_str(), text);
        }
        assert_ne!(ChannelName::new("Parent"), ChannelName::parent());
    }
}
