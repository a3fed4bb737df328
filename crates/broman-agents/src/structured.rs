//! One-shot text analysis returned as typed JSON.

use broman_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::{ChatMessage, LlmProvider, LlmRequest, ReplyFormat};

pub const MAX_KEYWORDS: usize = 10;

const ANALYSIS_MAX_TOKENS: u32 = 600;

const ANALYSIS_SYSTEM_PROMPT: &str = "You analyze text. Reply with a single JSON object \
with exactly these fields: \"sentiment\" (one of \"positive\", \"neutral\", \"negative\"), \
\"summary\" (one or two sentences in the language of the text) and \"keywords\" \
(an array of at most 10 short strings).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnalysis {
    pub sentiment: Sentiment,
    pub summary: String,
    pub keywords: Vec<String>,
}

/// Ask `provider` to analyze `query` in JSON mode and validate the reply.
pub async fn analyze(provider: &dyn LlmProvider, model: &str, query: &str) -> Result<TextAnalysis> {
    let request = LlmRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::user(format!(
            "Analyze the text and return JSON (sentiment, summary, keywords). Text:\n{query}"
        ))],
        system: Some(ANALYSIS_SYSTEM_PROMPT.to_string()),
        max_tokens: Some(ANALYSIS_MAX_TOKENS),
        tools: Vec::new(),
        format: ReplyFormat::JsonObject,
    };

    let completion = provider.complete(&request).await?;
    if completion.is_truncated() {
        return Err(Error::Provider(
            "analysis was cut off at the token limit".to_string(),
        ));
    }
    debug!(model = %completion.model, "analysis completed");
    parse_analysis(&completion.text)
}

/// Parse the model's JSON. Keywords beyond [`MAX_KEYWORDS`] and blank ones are dropped.
pub fn parse_analysis(text: &str) -> Result<TextAnalysis> {
    let mut analysis: TextAnalysis = serde_json::from_str(text.trim())
        .map_err(|e| Error::Provider(format!("model returned an invalid analysis: {e}")))?;

    analysis.keywords.retain(|k| !k.trim().is_empty());
    analysis.keywords.truncate(MAX_KEYWORDS);
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reply() {
        let analysis = parse_analysis(
            r#" {"sentiment":"negative","summary":"Доставка опоздала.","keywords":["доставка","опоздание"]} "#,
        )
        .unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Negative);
        assert_eq!(analysis.summary, "Доставка опоздала.");
        assert_eq!(analysis.keywords, vec!["доставка", "опоздание"]);
    }

    #[test]
    fn caps_keywords() {
        let keywords: Vec<String> = (0..14).map(|i| format!("k{i}")).collect();
        let reply = serde_json::json!({
            "sentiment": "neutral",
            "summary": "s",
            "keywords": keywords,
        });
        let analysis = parse_analysis(&reply.to_string()).unwrap();
        assert_eq!(analysis.keywords.len(), MAX_KEYWORDS);
        assert_eq!(analysis.keywords[0], "k0");
    }

    #[test]
    fn rejects_unknown_sentiment() {
        let err = parse_analysis(r#"{"sentiment":"angry","summary":"s","keywords":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid analysis"));
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(parse_analysis(r#"{"sentiment":"positive"}"#).is_err());
        assert!(parse_analysis("not json").is_err());
    }
}
