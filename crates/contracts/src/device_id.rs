//! Identifiers of rig devices
//!
//! Projectors, cameras and pattern decoders share one identifier type. The
//! blueprint fixes them at load time; the engine then stamps them onto every
//! frame record, fault, signal name and metric label.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Name of a projector, camera or decoder.
///
/// Backed by `Arc<str>`: a projector thread clones its id into each
/// `FrameRecord` it emits, which only bumps a count.
///
/// ```
/// use contracts::DeviceId;
///
/// let projector: DeviceId = "prj-left".into();
/// let stamped = projector.clone();
/// assert_eq!(stamped, projector);
/// assert_eq!(stamped.to_string(), "prj-left");
/// ```
#[derive(Clone)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for DeviceId {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({:?})", self.0)
    }
}

impl PartialEq for DeviceId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // Clones of one id skip the string compare
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for DeviceId {}

impl Hash for DeviceId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

/// Written as the bare name, the way blueprints spell it
impl Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stamped_clone_shares_storage() {
        let projector: DeviceId = "prj-left".into();
        let stamped = projector.clone();
        assert_eq!(projector.as_str().as_ptr(), stamped.as_str().as_ptr());
    }

    #[test]
    fn test_ids_from_separate_loads_are_equal() {
        let from_blueprint = DeviceId::from(String::from("cam-0"));
        let from_handle = DeviceId::from("cam-0");
        assert_eq!(from_blueprint, from_handle);

        let cameras: HashSet<DeviceId> = [from_blueprint, from_handle, "cam-1".into()]
            .into_iter()
            .collect();
        assert_eq!(cameras.len(), 2);
    }

    #[test]
    fn test_record_field_serializes_as_bare_name() {
        let decoder: DeviceId = "dec-left".into();
        let json = serde_json::to_string(&decoder).unwrap();
        assert_eq!(json, "\"dec-left\"");
        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decoder);
    }
}
