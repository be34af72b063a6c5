//! `docsort classify <file>`: one-off extraction and classification.
//!
//! Reads nothing but the given file and writes nothing at all, which makes it
//! the tool for tuning a lexicon against real documents.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::classify::Classifier;
use crate::config::Config;
use crate::extract;
use crate::lexicon::Lexicon;
use crate::models::{ClassificationResult, Fingerprint, RecordStatus};
use crate::router::Router;

#[derive(Debug, Serialize)]
pub struct ClassifyReport {
    pub fingerprint: Fingerprint,
    pub status: RecordStatus,
    pub destination: String,
    pub title_guess: String,
    pub language_guess: String,
    pub page_count: usize,
    pub lexicon_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub classification: ClassificationResult,
}

pub async fn classify_file(config: &Config, path: &Path) -> Result<ClassifyReport> {
    let lexicon = Lexicon::load_or_builtin(config.paths.lexicon.as_deref())?;
    let version = lexicon.version().to_string();
    let classifier = Classifier::new(Arc::new(lexicon), config.classifier.filename_weight);
    let router = Router::from_config(config);

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let fingerprint = Fingerprint::of_bytes(&bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content_type = extract::content_type_for(path);
    let extracted =
        extract::extract_async(bytes, content_type, config.classifier.head_pages).await;

    let report = match extracted {
        Ok(ex) => {
            let classification = classifier.classify(&ex.text, &file_name);
            let status = router.status_for(&classification);
            ClassifyReport {
                fingerprint,
                status,
                destination: router
                    .destination(status, &classification, &file_name)
                    .display()
                    .to_string(),
                title_guess: extract::guess_title(&ex.text, &file_name),
                language_guess: extract::guess_language(&ex.text).to_string(),
                page_count: ex.page_count,
                lexicon_version: version,
                error_reason: None,
                error: None,
                classification,
            }
        }
        Err(e) => {
            let classification = ClassificationResult::unknown();
            let status = RecordStatus::ExtractionError;
            ClassifyReport {
                fingerprint,
                status,
                destination: router
                    .destination(status, &classification, &file_name)
                    .display()
                    .to_string(),
                title_guess: extract::guess_title("", &file_name),
                language_guess: "unknown".to_string(),
                page_count: 0,
                lexicon_version: version,
                error_reason: Some(e.tag()),
                error: Some(e.to_string()),
                classification,
            }
        }
    };

    Ok(report)
}

pub async fn run_classify(config: &Config, path: &Path) -> Result<()> {
    let report = classify_file(config, path).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
