use crate::manifest::sha1_digest;

/// A media file carried by the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub filename: String,
    pub data: Vec<u8>,
    pub size: Option<u32>,
    pub sha1: Option<Vec<u8>>,
}

impl MediaFile {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        MediaFile {
            filename: filename.into(),
            data,
            size: None,
            sha1: None,
        }
    }

    /// Stored hash, or one computed from the bytes
    pub fn digest(&self) -> Vec<u8> {
        self.sha1.clone().unwrap_or_else(|| sha1_digest(&self.data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
