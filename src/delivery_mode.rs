use serde::Deserialize;
use std::fmt;

/// Durability guarantee requested for a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Persistent,
    #[default]
    NonPersistent,
    Reliable,
}

impl DeliveryMode {
    /// Map a mode token onto a delivery mode.
    ///
    /// Matching is case-insensitive against `persistent`, `non_persistent`
    /// and `reliable`. Anything else, including the empty string, yields
    /// [`DeliveryMode::NonPersistent`]: this never fails.
    pub fn resolve(token: &str) -> Self {
        if token.eq_ignore_ascii_case("persistent") {
            Self::Persistent
        } else if token.eq_ignore_ascii_case("reliable") {
            Self::Reliable
        } else {
            Self::NonPersistent
        }
    }

    pub(crate) fn token(&self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::NonPersistent => "non_persistent",
            Self::Reliable => "reliable",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// What kind of destination a name refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    #[default]
    Queue,
    Topic,
}

impl DestinationKind {
    /// Case-insensitive parse of `queue` / `topic`.
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("queue") {
            Some(Self::Queue)
        } else if token.eq_ignore_ascii_case("topic") {
            Some(Self::Topic)
        } else {
            None
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_case_insensitive() {
        assert_eq!(DeliveryMode::resolve("PERSISTENT"), DeliveryMode::Persistent);
        assert_eq!(
            DeliveryMode::resolve("Non_Persistent"),
            DeliveryMode::NonPersistent
        );
        assert_eq!(DeliveryMode::resolve("reliable"), DeliveryMode::Reliable);
        assert_eq!(DeliveryMode::resolve("ReLiAbLe"), DeliveryMode::Reliable);
    }

    #[test]
    fn resolve_defaults_to_non_persistent() {
        assert_eq!(DeliveryMode::resolve("garbage"), DeliveryMode::NonPersistent);
        assert_eq!(DeliveryMode::resolve(""), DeliveryMode::NonPersistent);
        assert_eq!(
            DeliveryMode::resolve(" persistent"),
            DeliveryMode::NonPersistent
        );
        assert_eq!(DeliveryMode::default(), DeliveryMode::NonPersistent);
    }

    #[test]
    fn destination_kind_parse() {
        assert_eq!(DestinationKind::parse("queue"), Some(DestinationKind::Queue));
        assert_eq!(DestinationKind::parse("TOPIC"), Some(DestinationKind::Topic));
        assert_eq!(DestinationKind::parse("exchange"), None);
        assert_eq!(DestinationKind::parse(""), None);
    }
}
