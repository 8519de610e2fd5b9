//! Reference decoder.

use crate::error::DecodeError;
use crate::traits::{Artifact, DecodeInput, DecodeOptions, Decoder};
use std::fs;

/// Identity decoder: network bytes become the artifact unchanged, local
/// files are read whole.
///
/// `DecodeOptions::processing`, when set, is recorded as the artifact's
/// content type so differently processed requests stay distinguishable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

impl PassthroughDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PassthroughDecoder {
    fn decode(&self, input: DecodeInput, options: &DecodeOptions) -> Result<Artifact, DecodeError> {
        let artifact = match input {
            DecodeInput::Bytes(bytes) => Artifact::new(bytes),
            DecodeInput::Local(path) => {
                let data = fs::read(&path).map_err(|e| {
                    DecodeError::new(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Artifact::new(data)
            }
        };

        Ok(match &options.processing {
            Some(processing) => artifact.with_content_type(processing.clone()),
            None => artifact,
        })
    }
}
