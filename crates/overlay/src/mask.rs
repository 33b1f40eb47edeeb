//! Asynchronous lane-mask decoding
//!
//! Every load takes a generation ticket. A decoded mask is only handed
//! back if no newer load or invalidation happened in the meantime, so a
//! slow decode can never paint over a newer frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::Engine;
use image::RgbaImage;
use tracing::debug;

use crate::OverlayError;

/// Decode a base64 PNG/JPEG mask, with or without a `data:` prefix
pub fn decode_mask(encoded: &str) -> Result<RgbaImage, OverlayError> {
    let payload = match encoded.split_once("base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| OverlayError::MaskDecode(format!("base64: {}", e)))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| OverlayError::MaskDecode(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// A decoded mask tagged with the generation that requested it
#[derive(Debug, Clone)]
pub struct DecodedMask {
    pub generation: u64,
    pub image: Arc<RgbaImage>,
}

/// Relevance token for one load
#[derive(Debug, Clone)]
pub struct MaskTicket {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl MaskTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Still the most recent request
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.generation
    }
}

/// Issues generation tickets and decodes masks off the async threads
#[derive(Debug, Clone, Default)]
pub struct MaskLoader {
    latest: Arc<AtomicU64>,
}

impl MaskLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, superseding all earlier tickets
    pub fn begin(&self) -> MaskTicket {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        MaskTicket {
            generation,
            latest: Arc::clone(&self.latest),
        }
    }

    /// Drop interest in any in-flight load
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether `generation` is still the latest
    pub fn is_current(&self, generation: u64) -> bool {
        self.latest.load(Ordering::Acquire) == generation
    }

    /// Decode `encoded` for a ticket obtained from [`MaskLoader::begin`].
    ///
    /// Returns `Ok(None)` when the ticket was superseded while decoding.
    pub async fn load(&self, ticket: MaskTicket, encoded: String) -> Result<Option<DecodedMask>, OverlayError> {
        let image = tokio::task::spawn_blocking(move || decode_mask(&encoded))
            .await
            .map_err(|e| OverlayError::MaskDecode(format!("decode task failed: {}", e)))??;

        if !ticket.is_current() {
            debug!("Discarding superseded lane mask (generation {})", ticket.generation);
            return Ok(None);
        }
        Ok(Some(DecodedMask {
            generation: ticket.generation,
            image: Arc::new(image),
        }))
    }
}
