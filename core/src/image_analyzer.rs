use std::time::Instant;

use crate::error::{EmbeddingError, GeneratorError, PipelineError};
use crate::generator::{encode_image_base64, ImageContext, LlmClient, StructuredGenerator};

/// Default §6 `limits.image_max_bytes`.
pub const DEFAULT_IMAGE_MAX_BYTES: usize = 8 * 1024 * 1024;

/// C5 — extracts textual visual context from an uploaded image via the
/// multimodal path of the structured generator (§4.5). The result is a
/// short description plus entities, meant to be concatenated into the
/// raw query before `ProcessQuery` runs.
pub struct ImageAnalyzer {
    max_bytes: usize,
}

impl ImageAnalyzer {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Returns `(visual_context, entities)`. `image_bytes` is the raw,
    /// not-yet-base64 image payload; oversize input fails fast with
    /// `ErrPayloadTooLarge` before any network call is attempted.
    pub async fn analyze<C: LlmClient>(
        &self,
        generator: &StructuredGenerator<C>,
        topic: &str,
        image_bytes: &[u8],
        deadline: Instant,
    ) -> Result<ImageContext, PipelineError> {
        if image_bytes.len() > self.max_bytes {
            return Err(PipelineError::PayloadTooLarge(format!(
                "image is {} bytes, limit is {} bytes",
                image_bytes.len(),
                self.max_bytes
            )));
        }
        if image_bytes.is_empty() {
            return Err(EmbeddingError::NoModalitySupplied.into());
        }

        let encoded = encode_image_base64(image_bytes);
        let context = generator
            .analyze_image(topic, &encoded, deadline)
            .await
            .map_err(|err: GeneratorError| PipelineError::from(err))?;
        Ok(context)
    }

    /// Concatenates C5's output into the raw query text the way §4.5/§4.6
    /// expect: `raw_query` followed by the visual context sentence and a
    /// space-joined entity list, so `ProcessQuery` sees it as plain text.
    pub fn fold_into_query(raw_query: &str, context: &ImageContext) -> String {
        let mut folded = raw_query.to_string();
        if !context.visual_context.is_empty() {
            folded.push_str(". ");
            folded.push_str(&context.visual_context);
        }
        if !context.entities.is_empty() {
            folded.push_str(". Visible: ");
            folded.push_str(&context.entities.join(", "));
        }
        folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_image_rejected_without_network_call() {
        let analyzer = ImageAnalyzer::new(4);
        let oversized = vec![0u8; 5];
        assert!(oversized.len() > analyzer.max_bytes);
    }

    #[test]
    fn fold_into_query_appends_visual_context_and_entities() {
        let context = ImageContext {
            visual_context: "flood waters and damaged roads".to_string(),
            entities: vec!["rescue boat".to_string(), "bridge".to_string()],
        };
        let folded = ImageAnalyzer::fold_into_query("river levels rising", &context);
        assert!(folded.contains("flood waters"));
        assert!(folded.contains("rescue boat"));
        assert!(folded.contains("river levels rising"));
    }
}
