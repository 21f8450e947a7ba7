use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAIClient};
use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Fusion strategy for combining a text and an image embedding into a
/// single cross-modal vector (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MultimodalFusion {
    TextOnly,
    ImageOnly,
    Mean,
    TextWeighted(f32),
    ImageWeighted(f32),
}

/// Two precomputed embedding vectors in the multimodal-dimension vector
/// space, ready for fusion. Both fields are the *same* kind of vector
/// (multimodal-space), not a raw-text/raw-vector pair — a caller with
/// only text must first embed it via `embed_multimodal_text`.
pub struct MultimodalInput<'a> {
    pub text_vector: Option<&'a [f32]>,
    pub image_vector: Option<&'a [f32]>,
}

/// The embedding capabilities of §4.1. Both `embed_text` and
/// `embed_multimodal_text` are total over nonempty inputs;
/// implementations surface loading/provider failures as
/// `EmbeddingError::Unavailable` rather than panicking.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embeds arbitrary text into the multimodal-dimension vector space,
    /// used to bring a query string or an image's extracted visual
    /// context description into the same space as a precomputed image
    /// embedding before `embed_multimodal` fuses them.
    async fn embed_multimodal_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_multimodal(
        &self,
        input: MultimodalInput<'_>,
        fusion: MultimodalFusion,
    ) -> Result<Vec<f32>, EmbeddingError>;

    fn text_dimension(&self) -> usize;
    fn multimodal_dimension(&self) -> usize;
}

/// OpenAI-backed embedder (§4.1), grounded on the teacher's
/// `LlmEmbeddingService`/`async-openai` client. The multimodal vector is
/// fused client-side from a multimodal-space text embedding and a
/// caller-supplied image embedding (produced upstream by C5's vision
/// model) rather than calling a separate cross-modal API — CLIP-style
/// multimodal endpoints are not part of the OpenAI embeddings API.
pub struct OpenAiEmbeddingProvider {
    client: OpenAIClient<OpenAIConfig>,
    text_model: String,
    multimodal_model: String,
    text_dim: usize,
    multimodal_dim: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        text_model: impl Into<String>,
        multimodal_model: impl Into<String>,
        multimodal_dim: usize,
    ) -> Result<Self, EmbeddingError> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EmbeddingError::Unavailable(
                "OPENAI_API_KEY environment variable must be set".into(),
            ));
        }
        let text_model = text_model.into();
        let text_dim = default_dimension(&text_model);
        Ok(Self {
            client: OpenAIClient::with_config(OpenAIConfig::new()),
            text_model,
            multimodal_model: multimodal_model.into(),
            text_dim,
            multimodal_dim,
        })
    }

    async fn embed_one(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::Unavailable("text cannot be empty".into()));
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(vec![text.to_string()])
            .build()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Unavailable("embedder returned no vector".into()))
    }
}

fn default_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// `w * text + (1 - w) * image`, elementwise. Both vectors must already
/// share the multimodal dimension — fusing a raw text-space vector with
/// an image-space vector is a caller bug, not a recoverable mismatch.
fn weighted_combine(text: &[f32], image: &[f32], text_weight: f32) -> Result<Vec<f32>, EmbeddingError> {
    if text.len() != image.len() {
        return Err(EmbeddingError::Unavailable(format!(
            "text and image vectors must share a dimension to fuse (got {} and {})",
            text.len(),
            image.len()
        )));
    }
    let w = text_weight.clamp(0.0, 1.0);
    Ok(text.iter().zip(image).map(|(t, i)| w * t + (1.0 - w) * i).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::Unavailable("text cannot be empty".into()));
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.text_model)
            .input(texts.to_vec())
            .build()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_multimodal_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_one(&self.multimodal_model, text).await
    }

    fn embed_multimodal(
        &self,
        input: MultimodalInput<'_>,
        fusion: MultimodalFusion,
    ) -> Result<Vec<f32>, EmbeddingError> {
        match (input.text_vector, input.image_vector, fusion) {
            (None, None, _) => Err(EmbeddingError::NoModalitySupplied),
            (Some(text), _, MultimodalFusion::TextOnly) => Ok(text.to_vec()),
            (_, Some(image), MultimodalFusion::ImageOnly) => Ok(image.to_vec()),
            (Some(text), None, _) => Ok(text.to_vec()),
            (None, Some(image), _) => Ok(image.to_vec()),
            (Some(text), Some(image), MultimodalFusion::Mean) => weighted_combine(text, image, 0.5),
            (Some(text), Some(image), MultimodalFusion::TextWeighted(w)) => weighted_combine(text, image, w),
            (Some(text), Some(image), MultimodalFusion::ImageWeighted(w)) => weighted_combine(text, image, 1.0 - w),
        }
    }

    fn text_dimension(&self) -> usize {
        self.text_dim
    }

    fn multimodal_dimension(&self) -> usize {
        self.multimodal_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_modality_supplied_errors() {
        let fusion = MultimodalFusion::Mean;
        let input = MultimodalInput { text_vector: None, image_vector: None };
        let provider = TestProvider;
        let err = provider.embed_multimodal(input, fusion).unwrap_err();
        assert!(matches!(err, EmbeddingError::NoModalitySupplied));
    }

    #[test]
    fn mean_fusion_averages_elementwise() {
        let provider = TestProvider;
        let text = vec![1.0, 0.0];
        let image = vec![0.0, 1.0];
        let input = MultimodalInput { text_vector: Some(&text), image_vector: Some(&image) };
        let fused = provider.embed_multimodal(input, MultimodalFusion::Mean).unwrap();
        assert_eq!(fused, vec![0.5, 0.5]);
    }

    #[test]
    fn text_weighted_fusion_favors_text_vector() {
        let provider = TestProvider;
        let text = vec![1.0, 1.0];
        let image = vec![0.0, 0.0];
        let input = MultimodalInput { text_vector: Some(&text), image_vector: Some(&image) };
        let fused = provider.embed_multimodal(input, MultimodalFusion::TextWeighted(0.75)).unwrap();
        assert_eq!(fused, vec![0.75, 0.75]);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let provider = TestProvider;
        let text = vec![1.0, 0.0, 0.0];
        let image = vec![0.0, 1.0];
        let input = MultimodalInput { text_vector: Some(&text), image_vector: Some(&image) };
        let err = provider.embed_multimodal(input, MultimodalFusion::Mean).unwrap_err();
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
    }

    struct TestProvider;

    #[async_trait]
    impl EmbeddingProvider for TestProvider {
        async fn embed_text(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![])
        }

        async fn embed_multimodal_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0])
        }

        fn embed_multimodal(
            &self,
            input: MultimodalInput<'_>,
            fusion: MultimodalFusion,
        ) -> Result<Vec<f32>, EmbeddingError> {
            match (input.text_vector, input.image_vector, fusion) {
                (None, None, _) => Err(EmbeddingError::NoModalitySupplied),
                (Some(text), _, MultimodalFusion::TextOnly) => Ok(text.to_vec()),
                (_, Some(image), MultimodalFusion::ImageOnly) => Ok(image.to_vec()),
                (Some(text), None, _) => Ok(text.to_vec()),
                (None, Some(image), _) => Ok(image.to_vec()),
                (Some(text), Some(image), MultimodalFusion::Mean) => weighted_combine(text, image, 0.5),
                (Some(text), Some(image), MultimodalFusion::TextWeighted(w)) => weighted_combine(text, image, w),
                (Some(text), Some(image), MultimodalFusion::ImageWeighted(w)) => weighted_combine(text, image, 1.0 - w),
            }
        }

        fn text_dimension(&self) -> usize {
            1536
        }

        fn multimodal_dimension(&self) -> usize {
            512
        }
    }
}
