//! Identity profiles and image payloads

use std::sync::Arc;

use crate::geo::GpsLocation;
use crate::ids::sha256;

/// Protocol version carried in profile and activity wire structures.
pub const PROTOCOL_VERSION: [u8; 3] = [1, 0, 0];

/// Image bytes plus their SHA-256, shared cheaply between the primary and
/// propagated profile copies and the snapshot image store.
#[derive(Clone)]
pub struct ImageData {
    hash: [u8; 32],
    bytes: Arc<Vec<u8>>,
}

impl ImageData {
    /// Wrap image bytes, computing their content hash.
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = sha256(&bytes);
        Self {
            hash,
            bytes: Arc::new(bytes),
        }
    }

    /// SHA-256 of the image content.
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for ImageData {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImageData({}, {} bytes)",
            hex::encode(self.hash),
            self.bytes.len()
        )
    }
}

/// A profile as a host or neighbor server sees it.
///
/// Each identity carries two of these: the primary copy (what it told its
/// host) and the propagated copy (what neighbors think it is, which may lag
/// behind after updates).
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileInfo {
    /// Protocol version triple
    pub version: [u8; 3],
    /// Profile name
    pub name: String,
    /// Identity type string
    pub profile_type: String,
    /// Profile location, micro-degree quantized
    pub location: GpsLocation,
    /// Full-size profile image, if any
    pub profile_image: Option<ImageData>,
    /// Thumbnail image, if any
    pub thumbnail_image: Option<ImageData>,
    /// Free-form extra data
    pub extra_data: String,
}

impl ProfileInfo {
    /// Create a profile with the current protocol version and no images.
    pub fn new(name: impl Into<String>, profile_type: impl Into<String>, location: GpsLocation) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            name: name.into(),
            profile_type: profile_type.into(),
            location: location.quantized(),
            profile_image: None,
            thumbnail_image: None,
            extra_data: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_equality_is_content_addressed() {
        let a = ImageData::new(vec![1, 2, 3]);
        let b = ImageData::new(vec![1, 2, 3]);
        let c = ImageData::new(vec![4, 5, 6]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash(), &crate::ids::sha256(&[1, 2, 3]));
    }

    #[test]
    fn profile_location_is_quantized() {
        let loc = GpsLocation::new(1.23456789, 2.3456789).unwrap();
        let profile = ProfileInfo::new("a", "t", loc);
        assert_eq!(profile.location, loc.quantized());
    }
}
